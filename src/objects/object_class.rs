use crate::objects::object::{Object, ObjectType};
use crate::objects::object_string::ObjectString;
use crate::table::Table;

/// A user-defined reference type: field defaults, a method table, and an
/// optional superclass (null when the class has none).
#[repr(C)]
pub struct ObjectClass {
    pub object: Object,
    pub name: *mut ObjectString,
    pub fields: Table,
    pub methods: Table,
    pub superclass: *mut ObjectClass,
}

impl ObjectClass {
    pub fn new(name: *mut ObjectString) -> Self {
        ObjectClass {
            object: Object {
                obj_type: ObjectType::ObjClass,
            },
            name,
            fields: Table::new(),
            methods: Table::new(),
            superclass: std::ptr::null_mut(),
        }
    }
}
