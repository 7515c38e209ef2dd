use std::collections::HashSet;

use crate::objects::object::{NativeObject, Object, ObjectType};
use crate::objects::object_bound_method::{
    NativeMethodFn, ObjectBoundMethod, ObjectBoundNativeMethod,
};
use crate::objects::object_class::ObjectClass;
use crate::objects::object_closure::ObjectClosure;
use crate::objects::object_function::ObjectFunction;
use crate::objects::object_instance::ObjectInstance;
use crate::objects::object_list::ObjectList;
use crate::objects::object_map::ObjectMap;
use crate::objects::object_native_function::ObjectNativeFunction;
use crate::objects::object_string::ObjectString;
use crate::objects::object_upvalue::ObjectUpvalue;
use crate::table::Table;
use crate::value::Value;

/// Owns every heap allocation. The vector is the canonical object list the
/// sweep phase walks; `pending_bytes` accumulates the size of allocations
/// since the VM last drained it into its trigger accounting.
pub struct ObjectManager {
    objects: Vec<*mut Object>,
    pending_bytes: usize,
}

impl ObjectManager {
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
            pending_bytes: 0,
        }
    }

    /// Drain and return bytes allocated since last call.
    pub fn drain_pending_bytes(&mut self) -> usize {
        let bytes = self.pending_bytes;
        self.pending_bytes = 0;
        bytes
    }

    /// Record a newly allocated object pointer and its deep size.
    fn push_object(&mut self, object: *mut Object) -> usize {
        let size = unsafe { (*object).deep_size() };
        self.pending_bytes += size;
        self.objects.push(object);
        size
    }

    pub fn alloc_string(&mut self, content: &str, hash: u32) -> (*mut ObjectString, usize) {
        let ptr = Box::into_raw(ObjectString::new(content, hash));
        let size = self.push_object(ptr as *mut Object);
        (ptr, size)
    }

    /// Take ownership of a function built elsewhere (the compiler assembles
    /// functions incrementally and hands them over when finished).
    pub fn adopt_function(&mut self, function: Box<ObjectFunction>) -> *mut ObjectFunction {
        let ptr = Box::into_raw(function);
        self.push_object(ptr as *mut Object);
        ptr
    }

    pub fn alloc_native_function(
        &mut self,
        name: String,
        arity: Option<u8>,
        native_object: Box<dyn NativeObject>,
    ) -> (*mut ObjectNativeFunction, usize) {
        let obj = Box::new(ObjectNativeFunction::new(name, arity, native_object));
        let ptr = Box::into_raw(obj);
        let size = self.push_object(ptr as *mut Object);
        (ptr, size)
    }

    pub fn alloc_closure(&mut self, function: *mut ObjectFunction) -> (*mut ObjectClosure, usize) {
        let obj = Box::new(ObjectClosure::new(function));
        let ptr = Box::into_raw(obj);
        let size = self.push_object(ptr as *mut Object);
        (ptr, size)
    }

    pub fn alloc_upvalue(&mut self, slot: usize) -> (*mut ObjectUpvalue, usize) {
        let obj = Box::new(ObjectUpvalue::new_open(slot));
        let ptr = Box::into_raw(obj);
        let size = self.push_object(ptr as *mut Object);
        (ptr, size)
    }

    pub fn alloc_class(&mut self, name: *mut ObjectString) -> (*mut ObjectClass, usize) {
        let obj = Box::new(ObjectClass::new(name));
        let ptr = Box::into_raw(obj);
        let size = self.push_object(ptr as *mut Object);
        (ptr, size)
    }

    pub fn alloc_instance(&mut self, class: *mut ObjectClass) -> (*mut ObjectInstance, usize) {
        let obj = Box::new(ObjectInstance::new(class));
        let ptr = Box::into_raw(obj);
        let size = self.push_object(ptr as *mut Object);
        (ptr, size)
    }

    pub fn alloc_bound_method(
        &mut self,
        receiver: Value,
        method: *mut ObjectClosure,
    ) -> (*mut ObjectBoundMethod, usize) {
        let obj = Box::new(ObjectBoundMethod::new(receiver, method));
        let ptr = Box::into_raw(obj);
        let size = self.push_object(ptr as *mut Object);
        (ptr, size)
    }

    pub fn alloc_bound_native_method(
        &mut self,
        receiver: Value,
        name: *mut ObjectString,
        method: NativeMethodFn,
    ) -> (*mut ObjectBoundNativeMethod, usize) {
        let obj = Box::new(ObjectBoundNativeMethod::new(receiver, name, method));
        let ptr = Box::into_raw(obj);
        let size = self.push_object(ptr as *mut Object);
        (ptr, size)
    }

    pub fn alloc_list(&mut self, elements: Vec<Value>) -> (*mut ObjectList, usize) {
        let obj = Box::new(ObjectList::new(elements));
        let ptr = Box::into_raw(obj);
        let size = self.push_object(ptr as *mut Object);
        (ptr, size)
    }

    pub fn alloc_map(&mut self, table: Table) -> (*mut ObjectMap, usize) {
        let obj = Box::new(ObjectMap::new(table));
        let ptr = Box::into_raw(obj);
        let size = self.push_object(ptr as *mut Object);
        (ptr, size)
    }

    /// Iterate over all managed objects (for GC mark/sweep).
    pub fn iter(&self) -> impl Iterator<Item = &*mut Object> {
        self.objects.iter()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Free every object in `unreachable`, unlinking it from the object
    /// list. Returns the number of bytes released.
    pub fn sweep(&mut self, unreachable: &HashSet<*mut Object>) -> usize {
        if unreachable.is_empty() {
            return 0;
        }

        let mut freed_bytes = 0;
        self.objects.retain(|&ptr| {
            if unreachable.contains(&ptr) {
                unsafe {
                    freed_bytes += (*ptr).deep_size();
                    free_object(ptr);
                }
                false
            } else {
                true
            }
        });
        freed_bytes
    }

    /// Deallocate all objects (VM shutdown).
    pub unsafe fn free_all(&mut self) {
        for &ptr in &self.objects {
            if !ptr.is_null() {
                free_object(ptr);
            }
        }
        self.objects.clear();
    }
}

impl Drop for ObjectManager {
    fn drop(&mut self) {
        unsafe {
            self.free_all();
        }
    }
}

/// Release one object through its concrete type, so each allocation is
/// returned with the layout it was created with.
///
/// # Safety
/// `ptr` must be a live pointer produced by one of the `alloc_*`/`adopt_*`
/// constructors above, and must not be used afterwards.
pub unsafe fn free_object(ptr: *mut Object) {
    debug_feature::trace_drop(ptr);
    match (*ptr).obj_type {
        ObjectType::ObjString => drop(Box::from_raw(ptr as *mut ObjectString)),
        ObjectType::ObjFunction => drop(Box::from_raw(ptr as *mut ObjectFunction)),
        ObjectType::ObjNativeFunction => drop(Box::from_raw(ptr as *mut ObjectNativeFunction)),
        ObjectType::ObjClosure => drop(Box::from_raw(ptr as *mut ObjectClosure)),
        ObjectType::ObjUpvalue => drop(Box::from_raw(ptr as *mut ObjectUpvalue)),
        ObjectType::ObjClass => drop(Box::from_raw(ptr as *mut ObjectClass)),
        ObjectType::ObjInstance => drop(Box::from_raw(ptr as *mut ObjectInstance)),
        ObjectType::ObjBoundMethod => drop(Box::from_raw(ptr as *mut ObjectBoundMethod)),
        ObjectType::ObjBoundNativeMethod => {
            drop(Box::from_raw(ptr as *mut ObjectBoundNativeMethod))
        }
        ObjectType::ObjList => drop(Box::from_raw(ptr as *mut ObjectList)),
        ObjectType::ObjMap => drop(Box::from_raw(ptr as *mut ObjectMap)),
    }
}

#[cfg(feature = "debug_trace_object")]
mod debug_feature {
    use super::*;

    pub fn trace_drop(ptr: *mut Object) {
        unsafe {
            match (*ptr).obj_type {
                ObjectType::ObjString => {
                    eprintln!("drop object: type=ObjString, content={}", (*ptr).as_string().content)
                }
                ObjectType::ObjFunction => {
                    eprintln!("drop object: type=ObjFunction, name={}", (*ptr).as_function().name)
                }
                other => eprintln!("drop object: type={:?}", other),
            }
        }
    }
}

#[cfg(not(feature = "debug_trace_object"))]
mod debug_feature {
    use super::*;

    pub fn trace_drop(_ptr: *mut Object) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::object_string::hash_string;

    #[test]
    fn test_alloc_tracks_pending_bytes() {
        let mut manager = ObjectManager::new();
        let (_, size) = manager.alloc_string("hello", hash_string("hello"));
        assert!(size > 0);
        assert_eq!(manager.drain_pending_bytes(), size);
        assert_eq!(manager.drain_pending_bytes(), 0);
        assert_eq!(manager.object_count(), 1);
    }

    #[test]
    fn test_sweep_frees_only_listed_objects() {
        let mut manager = ObjectManager::new();
        let (keep, _) = manager.alloc_string("keep", hash_string("keep"));
        let (toss, _) = manager.alloc_string("toss", hash_string("toss"));
        let mut unreachable = HashSet::new();
        unreachable.insert(toss as *mut Object);

        let freed = manager.sweep(&unreachable);
        assert!(freed > 0);
        assert_eq!(manager.object_count(), 1);
        assert!(manager.iter().any(|&ptr| ptr == keep as *mut Object));
    }
}
