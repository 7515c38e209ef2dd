use crate::chunk::Chunk;
use crate::objects::object::{Object, ObjectType};

#[repr(C)]
pub struct ObjectFunction {
    pub object: Object,
    pub arity: u8,
    pub upvalue_count: usize,
    pub chunk: Box<Chunk>,
    pub name: String,
}

impl ObjectFunction {
    pub fn new(arity: u8, name: String) -> Self {
        ObjectFunction {
            object: Object {
                obj_type: ObjectType::ObjFunction,
            },
            arity,
            upvalue_count: 0,
            chunk: Chunk::new(),
            name,
        }
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }
}
