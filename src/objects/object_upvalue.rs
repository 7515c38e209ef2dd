use crate::objects::object::{Object, ObjectType};
use crate::value::Value;

/// An upvalue is open while its variable still lives on the VM value stack
/// (it records the slot index), and closed once the slot is abandoned (it
/// owns the value). The transition happens exactly once.
pub enum UpvalueState {
    Open(usize),
    Closed(Value),
}

#[repr(C)]
pub struct ObjectUpvalue {
    pub object: Object,
    pub state: UpvalueState,
}

impl ObjectUpvalue {
    pub fn new_open(slot: usize) -> Self {
        ObjectUpvalue {
            object: Object {
                obj_type: ObjectType::ObjUpvalue,
            },
            state: UpvalueState::Open(slot),
        }
    }

    /// The stack slot this upvalue watches, while still open.
    pub fn location(&self) -> Option<usize> {
        match self.state {
            UpvalueState::Open(slot) => Some(slot),
            UpvalueState::Closed(_) => None,
        }
    }
}
