use crate::gc::GarbageCollector;
use crate::objects::object_string::ObjectString;
use crate::value::{
    as_object, as_string, hash_value, is_empty, is_nil, make_bool_value, make_empty_value,
    make_nil_value, values_equal, Value,
};

fn grow_capacity(capacity: usize) -> usize {
    if capacity < 8 {
        8
    } else {
        capacity * 2
    }
}

/// One slot. A vacant slot has the empty-sentinel key and a nil value; a
/// tombstone has the empty-sentinel key and a `true` value so probe chains
/// keep walking across deletions.
#[derive(Clone, Copy)]
pub struct Entry {
    pub key: Value,
    pub value: Value,
}

impl Entry {
    fn vacant() -> Entry {
        Entry {
            key: make_empty_value(),
            value: make_nil_value(),
        }
    }

    fn is_tombstone(&self) -> bool {
        is_empty(&self.key) && !is_nil(&self.value)
    }
}

/// Open addressing with linear probing. Capacity is always a power of two;
/// `count` includes tombstones, so it can briefly exceed the live-key count.
pub struct Table {
    count: usize,
    entries: Vec<Entry>,
}

const TABLE_MAX_LOAD_NUM: usize = 3;
const TABLE_MAX_LOAD_DEN: usize = 4;

impl Table {
    pub fn new() -> Table {
        Table {
            count: 0,
            entries: Vec::new(),
        }
    }

    /// Number of live keys. Walks the slots; tombstones are excluded.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| !is_empty(&entry.key))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn byte_size(&self) -> usize {
        self.entries.capacity() * std::mem::size_of::<Entry>()
    }

    /// Index of the entry for `key`: the occupied slot if present, otherwise
    /// the first tombstone seen (for reuse), otherwise the vacant slot that
    /// terminated the probe.
    fn find_entry(entries: &[Entry], key: &Value) -> usize {
        let mask = entries.len() - 1;
        let mut index = hash_value(key) as usize & mask;
        let mut tombstone: Option<usize> = None;

        loop {
            let entry = &entries[index];
            if is_empty(&entry.key) {
                if is_nil(&entry.value) {
                    return tombstone.unwrap_or(index);
                }
                if tombstone.is_none() {
                    tombstone = Some(index);
                }
            } else if values_equal(&entry.key, key) {
                return index;
            }

            index = (index + 1) & mask;
        }
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        if self.count == 0 {
            return None;
        }

        let index = Self::find_entry(&self.entries, key);
        let entry = &self.entries[index];
        if is_empty(&entry.key) {
            None
        } else {
            Some(entry.value)
        }
    }

    /// Insert or update. Returns true when `key` was not present before.
    pub fn set(&mut self, key: Value, value: Value) -> bool {
        if (self.count + 1) * TABLE_MAX_LOAD_DEN > self.entries.len() * TABLE_MAX_LOAD_NUM {
            self.adjust_capacity(grow_capacity(self.entries.len()));
        }

        let index = Self::find_entry(&self.entries, &key);
        let entry = &mut self.entries[index];
        let is_new_key = is_empty(&entry.key);
        // A reused tombstone was already counted.
        if is_new_key && is_nil(&entry.value) {
            self.count += 1;
        }

        entry.key = key;
        entry.value = value;
        is_new_key
    }

    /// Returns true when the key existed. The slot becomes a tombstone and
    /// stays counted so probe chains over it keep working.
    pub fn delete(&mut self, key: &Value) -> bool {
        if self.count == 0 {
            return false;
        }

        let index = Self::find_entry(&self.entries, key);
        let entry = &mut self.entries[index];
        if is_empty(&entry.key) {
            return false;
        }

        entry.key = make_empty_value();
        entry.value = make_bool_value(true);
        true
    }

    pub fn copy_to(&self, other: &mut Table) {
        for (key, value) in self.iter() {
            other.set(key, value);
        }
    }

    /// Interning lookup by raw characters; only string keys live in the
    /// intern table, so the unchecked string cast is safe there.
    pub fn find_string(&self, content: &str, hash: u32) -> Option<*mut ObjectString> {
        if self.count == 0 {
            return None;
        }

        let mask = self.entries.len() - 1;
        let mut index = hash as usize & mask;
        loop {
            let entry = &self.entries[index];
            if is_empty(&entry.key) {
                if is_nil(&entry.value) {
                    return None;
                }
            } else {
                let string = as_string(&entry.key);
                unsafe {
                    if (*string).hash == hash && (*string).content == content {
                        return Some(string);
                    }
                }
            }

            index = (index + 1) & mask;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Value, Value)> + '_ {
        self.entries
            .iter()
            .filter(|entry| !is_empty(&entry.key))
            .map(|entry| (entry.key, entry.value))
    }

    /// Drop entries whose string key the collector still considers white.
    /// Runs on the intern table right before sweep so interning never hands
    /// out a pointer to memory the sweep is about to release.
    pub fn remove_unmarked(&mut self, gc: &GarbageCollector) {
        for entry in self.entries.iter_mut() {
            if !is_empty(&entry.key) && gc.is_white(as_object(&entry.key)) {
                entry.key = make_empty_value();
                entry.value = make_bool_value(true);
            }
        }
    }

    /// Rebuild at `new_capacity`, re-probing live keys. Tombstones are
    /// dropped and the count becomes the live-key count again.
    fn adjust_capacity(&mut self, new_capacity: usize) {
        let mut new_entries = vec![Entry::vacant(); new_capacity];
        let mut new_count = 0;

        for entry in self.entries.iter() {
            if is_empty(&entry.key) {
                continue;
            }
            let index = Self::find_entry(&new_entries, &entry.key);
            new_entries[index] = *entry;
            new_count += 1;
        }

        self.entries = new_entries;
        self.count = new_count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{as_number, make_number_value, make_string_value};
    use crate::objects::object_manager::ObjectManager;

    #[test]
    fn test_set_get_roundtrip() {
        let mut table = Table::new();
        assert!(table.set(make_number_value(1.0), make_number_value(10.0)));
        assert!(table.set(make_number_value(2.0), make_number_value(20.0)));
        assert!(!table.set(make_number_value(1.0), make_number_value(11.0)));

        assert_eq!(as_number(&table.get(&make_number_value(1.0)).unwrap()), 11.0);
        assert_eq!(as_number(&table.get(&make_number_value(2.0)).unwrap()), 20.0);
        assert!(table.get(&make_number_value(3.0)).is_none());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_delete_leaves_probeable_tombstone() {
        let mut table = Table::new();
        for i in 0..6 {
            table.set(make_number_value(i as f64), make_number_value(i as f64));
        }
        assert!(table.delete(&make_number_value(3.0)));
        assert!(!table.delete(&make_number_value(3.0)));

        // Every survivor must still be reachable through the tombstone.
        for i in [0.0, 1.0, 2.0, 4.0, 5.0] {
            assert!(table.get(&make_number_value(i)).is_some());
        }
        assert_eq!(table.len(), 5);

        // A tombstone slot is reused for a new key.
        assert!(table.set(make_number_value(3.0), make_number_value(30.0)));
        assert_eq!(table.len(), 6);
    }

    #[test]
    fn test_growth_keeps_all_entries() {
        let mut table = Table::new();
        for i in 0..100 {
            table.set(make_number_value(i as f64), make_number_value((i * 2) as f64));
        }
        assert_eq!(table.len(), 100);
        assert!(table.capacity().is_power_of_two());
        for i in 0..100 {
            let value = table.get(&make_number_value(i as f64)).unwrap();
            assert_eq!(as_number(&value), (i * 2) as f64);
        }
    }

    #[test]
    fn test_find_string_matches_by_content() {
        let mut object_manager = ObjectManager::new();
        let mut strings = Table::new();
        let value = make_string_value(&mut object_manager, &mut strings, "needle");
        let found = strings
            .find_string("needle", crate::objects::object_string::hash_string("needle"))
            .unwrap();
        assert_eq!(found, crate::value::as_string(&value));
        assert!(strings
            .find_string("missing", crate::objects::object_string::hash_string("missing"))
            .is_none());
    }

    #[test]
    fn test_copy_to() {
        let mut from = Table::new();
        from.set(make_number_value(1.0), make_number_value(2.0));
        from.set(make_number_value(3.0), make_number_value(4.0));

        let mut to = Table::new();
        from.copy_to(&mut to);
        assert_eq!(to.len(), 2);
        assert_eq!(as_number(&to.get(&make_number_value(3.0)).unwrap()), 4.0);
    }
}
