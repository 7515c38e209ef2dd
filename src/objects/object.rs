use crate::objects::object_bound_method::{ObjectBoundMethod, ObjectBoundNativeMethod};
use crate::objects::object_class::ObjectClass;
use crate::objects::object_closure::ObjectClosure;
use crate::objects::object_function::ObjectFunction;
use crate::objects::object_instance::ObjectInstance;
use crate::objects::object_list::ObjectList;
use crate::objects::object_map::ObjectMap;
use crate::objects::object_native_function::ObjectNativeFunction;
use crate::objects::object_string::ObjectString;
use crate::objects::object_upvalue::ObjectUpvalue;
use crate::value::Value;
use crate::vm::VM;

#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub enum ObjectType {
    ObjString,
    ObjFunction,
    ObjNativeFunction,
    ObjClosure,
    ObjUpvalue,
    ObjClass,
    ObjInstance,
    ObjBoundMethod,
    ObjBoundNativeMethod,
    ObjList,
    ObjMap,
}

/// Common header of every heap object. Each concrete object struct is
/// `#[repr(C)]` with this header as its first field, so a `*mut Object`
/// can be re-cast to the concrete type named by `obj_type`.
#[repr(C)]
pub struct Object {
    pub obj_type: ObjectType,
}

/// ABI of a built-in function. `Ok` yields exactly one result value; `Err`
/// becomes a runtime error and must leave no partial results behind.
pub trait NativeObject {
    fn run(&self, vm: &mut VM, args: &[Value]) -> Result<Value, String>;
}

macro_rules! downcast {
    ($as_ref:ident, $as_mut:ident, $target:ty) => {
        /// # Safety
        /// The header's `obj_type` must name the target variant.
        pub unsafe fn $as_ref(&self) -> &$target {
            &*(self as *const Object as *const $target)
        }

        /// # Safety
        /// The header's `obj_type` must name the target variant.
        pub unsafe fn $as_mut(&mut self) -> &mut $target {
            &mut *(self as *mut Object as *mut $target)
        }
    };
}

impl Object {
    downcast!(as_string, as_string_mut, ObjectString);
    downcast!(as_function, as_function_mut, ObjectFunction);
    downcast!(as_native_function, as_native_function_mut, ObjectNativeFunction);
    downcast!(as_closure, as_closure_mut, ObjectClosure);
    downcast!(as_upvalue, as_upvalue_mut, ObjectUpvalue);
    downcast!(as_class, as_class_mut, ObjectClass);
    downcast!(as_instance, as_instance_mut, ObjectInstance);
    downcast!(as_bound_method, as_bound_method_mut, ObjectBoundMethod);
    downcast!(as_bound_native_method, as_bound_native_method_mut, ObjectBoundNativeMethod);
    downcast!(as_list, as_list_mut, ObjectList);
    downcast!(as_map, as_map_mut, ObjectMap);

    /// Approximate owned size in bytes, used for the GC trigger accounting.
    pub fn deep_size(&self) -> usize {
        use std::mem::size_of;
        unsafe {
            match self.obj_type {
                ObjectType::ObjString => {
                    size_of::<ObjectString>() + self.as_string().content.capacity()
                }
                ObjectType::ObjFunction => {
                    let function = self.as_function();
                    size_of::<ObjectFunction>()
                        + function.name.capacity()
                        + function.chunk.byte_size()
                }
                ObjectType::ObjNativeFunction => {
                    size_of::<ObjectNativeFunction>()
                        + self.as_native_function().name.capacity()
                }
                ObjectType::ObjClosure => {
                    size_of::<ObjectClosure>()
                        + self.as_closure().upvalues.capacity()
                            * size_of::<*mut ObjectUpvalue>()
                }
                ObjectType::ObjUpvalue => size_of::<ObjectUpvalue>(),
                ObjectType::ObjClass => {
                    let class = self.as_class();
                    size_of::<ObjectClass>() + class.fields.byte_size() + class.methods.byte_size()
                }
                ObjectType::ObjInstance => {
                    size_of::<ObjectInstance>() + self.as_instance().fields.byte_size()
                }
                ObjectType::ObjBoundMethod => size_of::<ObjectBoundMethod>(),
                ObjectType::ObjBoundNativeMethod => size_of::<ObjectBoundNativeMethod>(),
                ObjectType::ObjList => {
                    size_of::<ObjectList>()
                        + self.as_list().elements.capacity() * size_of::<Value>()
                }
                ObjectType::ObjMap => size_of::<ObjectMap>() + self.as_map().table.byte_size(),
            }
        }
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Object) -> bool {
        self.obj_type == other.obj_type
    }
}

impl Eq for Object {}
