use crate::objects::object::{Object, ObjectType};
use crate::objects::object_closure::ObjectClosure;
use crate::objects::object_string::ObjectString;
use crate::value::Value;
use crate::vm::VM;

/// A user method packaged with its receiver; calling it installs the
/// receiver in slot zero of the new frame.
#[repr(C)]
pub struct ObjectBoundMethod {
    pub object: Object,
    pub receiver: Value,
    pub method: *mut ObjectClosure,
}

impl ObjectBoundMethod {
    pub fn new(receiver: Value, method: *mut ObjectClosure) -> Self {
        ObjectBoundMethod {
            object: Object {
                obj_type: ObjectType::ObjBoundMethod,
            },
            receiver,
            method,
        }
    }
}

/// Dispatch signature for the built-in string/list/map methods. The method
/// name is passed through so one dispatcher per receiver kind can match on it.
pub type NativeMethodFn =
    fn(&mut VM, receiver: Value, name: &str, args: &[Value]) -> Result<Value, String>;

/// A built-in method plucked off a string, list, or map value. These kinds
/// have no per-instance method table; the dispatch pointer matches on the
/// recorded name when called.
#[repr(C)]
pub struct ObjectBoundNativeMethod {
    pub object: Object,
    pub receiver: Value,
    pub name: *mut ObjectString,
    pub method: NativeMethodFn,
}

impl ObjectBoundNativeMethod {
    pub fn new(receiver: Value, name: *mut ObjectString, method: NativeMethodFn) -> Self {
        ObjectBoundNativeMethod {
            object: Object {
                obj_type: ObjectType::ObjBoundNativeMethod,
            },
            receiver,
            name,
            method,
        }
    }
}
