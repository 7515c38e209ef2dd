use crate::objects::object::{Object, ObjectType};
use crate::table::Table;

/// The user-visible map type: the open-addressed table wrapped as a heap
/// object. Keys may be any value.
#[repr(C)]
pub struct ObjectMap {
    pub object: Object,
    pub table: Table,
}

impl ObjectMap {
    pub fn new(table: Table) -> Self {
        ObjectMap {
            object: Object {
                obj_type: ObjectType::ObjMap,
            },
            table,
        }
    }
}
