use crate::objects::object::{Object, ObjectType};
use crate::value::Value;

#[repr(C)]
pub struct ObjectList {
    pub object: Object,
    pub elements: Vec<Value>,
}

impl ObjectList {
    pub fn new(elements: Vec<Value>) -> Self {
        ObjectList {
            object: Object {
                obj_type: ObjectType::ObjList,
            },
            elements,
        }
    }
}
