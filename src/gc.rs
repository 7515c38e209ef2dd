use std::collections::HashSet;

use crate::objects::object::{Object, ObjectType};
use crate::objects::object_manager::ObjectManager;
use crate::objects::object_upvalue::UpvalueState;
use crate::table::Table;
use crate::value::{as_object, is_object, Value};

/// Tri-color mark-sweep. Objects start white, turn gray when discovered
/// reachable, and black once their outgoing references are scanned; sweep
/// frees whatever stayed white.
pub struct GarbageCollector {
    white_set: HashSet<*mut Object>,
    gray_set: HashSet<*mut Object>,
    black_set: HashSet<*mut Object>,
    is_active: bool,
    stats: GCStats,
}

/// Aggregated GC statistics (does not include currently-live total bytes; the
/// VM tracks that).
#[derive(Default, Debug, Clone)]
pub struct GCStats {
    pub cycles: u64,
    pub total_freed_bytes: usize,
    pub last_freed_bytes: usize,
    pub last_before_bytes: usize,
    pub last_after_bytes: usize,
    pub last_next_trigger_bytes: usize,
}

impl GCStats {
    fn record(&mut self, before: usize, freed: usize, after: usize, next_trigger: usize) {
        self.cycles += 1;
        self.total_freed_bytes += freed;
        self.last_freed_bytes = freed;
        self.last_before_bytes = before;
        self.last_after_bytes = after;
        self.last_next_trigger_bytes = next_trigger;
    }
}

// Lightweight tracing macro (only active with gc_debug feature)
#[cfg(feature = "gc_debug")]
macro_rules! gc_trace { ($($arg:tt)*) => { eprintln!("[gc-trace] {}", format_args!($($arg)*)); } }
#[cfg(not(feature = "gc_debug"))]
macro_rules! gc_trace { ($($arg:tt)*) => {}; }

impl GarbageCollector {
    pub fn new() -> Self {
        Self {
            white_set: HashSet::new(),
            gray_set: HashSet::new(),
            black_set: HashSet::new(),
            is_active: false,
            stats: GCStats::default(),
        }
    }

    /// Begin a cycle: every managed object starts white. Collection must not
    /// re-enter while a cycle is running.
    pub fn prepare_collection(&mut self, object_manager: &ObjectManager) {
        assert!(!self.is_active, "collection re-entered");
        self.reset();
        self.is_active = true;
        for &obj_ptr in object_manager.iter() {
            self.white_set.insert(obj_ptr);
        }
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// True while `obj` has not been discovered reachable in this cycle.
    pub fn is_white(&self, obj: *mut Object) -> bool {
        self.white_set.contains(&obj)
    }

    // Mark a single object as gray (moves from white to gray set)
    pub fn mark_object(&mut self, obj: *mut Object) {
        if obj.is_null() || self.black_set.contains(&obj) {
            return;
        }

        if self.white_set.remove(&obj) {
            self.gray_set.insert(obj);
            gc_trace!("mark_object enqueue gray ptr={:p}", obj);
        }
    }

    // Mark a value (if it's an object)
    pub fn mark_value(&mut self, value: &Value) {
        if !is_object(value) {
            return;
        }
        self.mark_object(as_object(value));
    }

    /// Mark every key and value held by a table.
    pub fn mark_table(&mut self, table: &Table) {
        for (key, value) in table.iter() {
            self.mark_value(&key);
            self.mark_value(&value);
        }
    }

    // Process gray objects until none remain
    pub fn trace_references(&mut self) {
        while !self.gray_set.is_empty() {
            let obj = *self.gray_set.iter().next().unwrap();
            self.gray_set.remove(&obj);
            self.black_set.insert(obj);

            unsafe {
                gc_trace!("trace gray -> black ptr={:p}", obj);
                self.blacken_object(obj);
            }
        }
    }

    // Mark all references in an object
    unsafe fn blacken_object(&mut self, object: *mut Object) {
        match (*object).obj_type {
            ObjectType::ObjString => {}
            ObjectType::ObjFunction => {
                let function = (*object).as_function();
                for constant in function.chunk.iter_constants() {
                    self.mark_value(constant);
                }
            }
            ObjectType::ObjNativeFunction => {}
            ObjectType::ObjClosure => {
                let closure = (*object).as_closure();
                self.mark_object(closure.function as *mut Object);
                for upvalue in &closure.upvalues {
                    self.mark_object(*upvalue as *mut Object);
                }
            }
            ObjectType::ObjUpvalue => {
                if let UpvalueState::Closed(value) = &(*object).as_upvalue().state {
                    self.mark_value(value);
                }
            }
            ObjectType::ObjClass => {
                let class = (*object).as_class();
                self.mark_object(class.name as *mut Object);
                self.mark_object(class.superclass as *mut Object);
                self.mark_table(&class.fields);
                self.mark_table(&class.methods);
            }
            ObjectType::ObjInstance => {
                let instance = (*object).as_instance();
                self.mark_object(instance.class as *mut Object);
                self.mark_table(&instance.fields);
            }
            ObjectType::ObjBoundMethod => {
                let bound = (*object).as_bound_method();
                self.mark_value(&bound.receiver);
                self.mark_object(bound.method as *mut Object);
            }
            ObjectType::ObjBoundNativeMethod => {
                let bound = (*object).as_bound_native_method();
                self.mark_value(&bound.receiver);
                self.mark_object(bound.name as *mut Object);
            }
            ObjectType::ObjList => {
                for element in &(*object).as_list().elements {
                    self.mark_value(element);
                }
            }
            ObjectType::ObjMap => {
                self.mark_table(&(*object).as_map().table);
            }
        }
    }

    /// Sweep phase: free every object still white. Ends the cycle.
    pub fn sweep(&mut self, object_manager: &mut ObjectManager) -> usize {
        let freed_bytes = object_manager.sweep(&self.white_set);
        gc_trace!("sweep freed_bytes={}", freed_bytes);
        self.reset();
        freed_bytes
    }

    // Reset collector state
    pub fn reset(&mut self) {
        self.white_set.clear();
        self.gray_set.clear();
        self.black_set.clear();
        self.is_active = false;
    }

    /// Record a completed GC cycle (invoked by the VM, which knows bytes
    /// before/after & threshold)
    pub fn record_cycle(&mut self, before: usize, freed: usize, after: usize, next_trigger: usize) {
        self.stats.record(before, freed, after, next_trigger);
        gc_trace!(
            "cycle summary cycles={} freed={} before={} after={} next_trigger={}",
            self.stats.cycles,
            freed,
            before,
            after,
            next_trigger
        );
    }

    pub fn stats(&self) -> &GCStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::object_function::ObjectFunction;
    use crate::objects::object_string::hash_string;
    use crate::value::{make_object_value, make_string_value, Value};

    fn string_value(manager: &mut ObjectManager, content: &str) -> Value {
        let (ptr, _) = manager.alloc_string(content, hash_string(content));
        make_object_value(ptr as *mut Object)
    }

    #[test]
    fn gc_collects_unreachable_objects() {
        let mut manager = ObjectManager::new();
        let keep = string_value(&mut manager, "keep");
        let _drop1 = string_value(&mut manager, "drop1");
        let _drop2 = string_value(&mut manager, "drop2");
        let _drop3 = string_value(&mut manager, "drop3");

        let mut gc = GarbageCollector::new();
        gc.prepare_collection(&manager);
        gc.mark_value(&keep);
        gc.trace_references();
        let freed = gc.sweep(&mut manager);
        assert!(freed > 0, "Expected some bytes to be freed");
        let remaining = manager.iter().count();
        assert_eq!(remaining, 1, "Only the rooted object should remain (got {remaining})");
    }

    #[test]
    fn gc_preserves_reachable_closure_and_function() {
        let mut manager = ObjectManager::new();
        let func_root = manager.adopt_function(Box::new(ObjectFunction::new(0, "f1".to_string())));
        let (closure_root, _) = manager.alloc_closure(func_root);
        let _unreachable = manager.adopt_function(Box::new(ObjectFunction::new(0, "f2".to_string())));

        let mut gc = GarbageCollector::new();
        gc.prepare_collection(&manager);
        gc.mark_object(closure_root as *mut Object);
        gc.trace_references();
        gc.sweep(&mut manager);
        assert_eq!(manager.iter().count(), 2, "Closure and its function should remain");
    }

    #[test]
    fn gc_marks_through_closed_upvalue() {
        let mut manager = ObjectManager::new();
        let captured = string_value(&mut manager, "captured");
        let (upvalue_ptr, _) = manager.alloc_upvalue(0);
        unsafe {
            (*upvalue_ptr).state = UpvalueState::Closed(captured);
        }

        let mut gc = GarbageCollector::new();
        gc.prepare_collection(&manager);
        gc.mark_object(upvalue_ptr as *mut Object);
        gc.trace_references();
        gc.sweep(&mut manager);
        assert_eq!(manager.iter().count(), 2, "Upvalue and captured string should remain");
    }

    #[test]
    fn gc_marks_through_lists_and_maps() {
        let mut manager = ObjectManager::new();
        let element = string_value(&mut manager, "element");
        let (list_ptr, _) = manager.alloc_list(vec![element]);

        let key = string_value(&mut manager, "key");
        let value = string_value(&mut manager, "value");
        let mut table = Table::new();
        table.set(key, value);
        let (map_ptr, _) = manager.alloc_map(table);

        let _garbage = string_value(&mut manager, "garbage");

        let mut gc = GarbageCollector::new();
        gc.prepare_collection(&manager);
        gc.mark_object(list_ptr as *mut Object);
        gc.mark_object(map_ptr as *mut Object);
        gc.trace_references();
        gc.sweep(&mut manager);
        assert_eq!(manager.iter().count(), 5, "list, element, map, key, value survive");
    }

    #[test]
    fn gc_intern_table_is_weak() {
        let mut manager = ObjectManager::new();
        let mut strings = Table::new();
        let kept = make_string_value(&mut manager, &mut strings, "kept");
        let _doomed = make_string_value(&mut manager, &mut strings, "doomed");
        assert_eq!(strings.len(), 2);

        let mut gc = GarbageCollector::new();
        gc.prepare_collection(&manager);
        gc.mark_value(&kept);
        gc.trace_references();
        strings.remove_unmarked(&gc);
        gc.sweep(&mut manager);

        assert_eq!(strings.len(), 1);
        assert_eq!(manager.iter().count(), 1);
        let hash = hash_string("kept");
        assert!(strings.find_string("kept", hash).is_some());
        assert!(strings.find_string("doomed", hash_string("doomed")).is_none());
    }

    #[test]
    fn gc_stats_record_cycle() {
        let mut gc = GarbageCollector::new();
        assert_eq!(gc.stats().cycles, 0);
        gc.record_cycle(1000, 400, 600, 1200);
        assert_eq!(gc.stats().cycles, 1);
        assert_eq!(gc.stats().last_before_bytes, 1000);
        assert_eq!(gc.stats().last_freed_bytes, 400);
        assert_eq!(gc.stats().last_after_bytes, 600);
        assert_eq!(gc.stats().last_next_trigger_bytes, 1200);
        assert_eq!(gc.stats().total_freed_bytes, 400);
    }

    #[test]
    fn gc_sweep_clears_marks() {
        let mut manager = ObjectManager::new();
        let keep = string_value(&mut manager, "keep");

        let mut gc = GarbageCollector::new();
        gc.prepare_collection(&manager);
        assert!(gc.is_active());
        gc.mark_value(&keep);
        gc.trace_references();
        gc.sweep(&mut manager);
        assert!(!gc.is_active());
        // A fresh cycle starts from all-white again.
        gc.prepare_collection(&manager);
        assert!(gc.is_white(as_object(&keep)));
        gc.reset();
    }
}
