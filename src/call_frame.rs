use crate::chunk::Chunk;
use crate::objects::object_closure::ObjectClosure;
use crate::objects::object_function::ObjectFunction;

/// One function activation: the closure being run, its instruction pointer,
/// and the stack index of its window base (`slots` holds the callee or the
/// bound receiver).
pub struct CallFrame {
    pub closure: *mut ObjectClosure,
    pub ip: usize,
    pub slots: usize,
}

impl CallFrame {
    pub fn new(closure: *mut ObjectClosure, slots: usize) -> Self {
        CallFrame {
            closure,
            ip: 0,
            slots,
        }
    }

    #[inline(always)]
    pub fn function(&self) -> &ObjectFunction {
        unsafe { &*(*self.closure).function }
    }

    #[inline(always)]
    pub fn chunk(&self) -> &Chunk {
        self.function().chunk()
    }
}
