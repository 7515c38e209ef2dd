use crate::objects::object::{Object, ObjectType};
use crate::objects::object_manager::ObjectManager;
use crate::objects::object_string::{hash_string, ObjectString};
use crate::table::Table;

/// How many entries a list or map may hold before printing falls back to the
/// compact `<list N>` / `<map N>` form.
const PRINT_MAX_ENTRIES: usize = 8;
const PRINT_MAX_DEPTH: usize = 4;

pub type ValueArray = Vec<Value>;

/// `Empty` is the key-absent marker inside the hash table; user programs
/// never observe it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    Empty,
    Object(*mut Object),
}

pub fn make_nil_value() -> Value {
    Value::Nil
}

pub fn make_bool_value(value: bool) -> Value {
    Value::Bool(value)
}

pub fn make_number_value(value: f64) -> Value {
    Value::Number(value)
}

pub fn make_empty_value() -> Value {
    Value::Empty
}

pub fn make_object_value(object: *mut Object) -> Value {
    Value::Object(object)
}

pub fn is_nil(value: &Value) -> bool {
    matches!(value, Value::Nil)
}

pub fn is_bool(value: &Value) -> bool {
    matches!(value, Value::Bool(_))
}

pub fn is_number(value: &Value) -> bool {
    matches!(value, Value::Number(_))
}

pub fn is_empty(value: &Value) -> bool {
    matches!(value, Value::Empty)
}

pub fn is_object(value: &Value) -> bool {
    matches!(value, Value::Object(_))
}

pub fn as_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        _ => unreachable!("Value is not a bool."),
    }
}

pub fn as_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => *n,
        _ => unreachable!("Value is not a number."),
    }
}

pub fn as_object(value: &Value) -> *mut Object {
    match value {
        Value::Object(object) => *object,
        _ => unreachable!("Value is not an object."),
    }
}

fn has_object_type(value: &Value, obj_type: ObjectType) -> bool {
    match value {
        Value::Object(object) => unsafe { (**object).obj_type == obj_type },
        _ => false,
    }
}

pub fn is_string(value: &Value) -> bool {
    has_object_type(value, ObjectType::ObjString)
}

pub fn is_function(value: &Value) -> bool {
    has_object_type(value, ObjectType::ObjFunction)
}

pub fn is_native_function(value: &Value) -> bool {
    has_object_type(value, ObjectType::ObjNativeFunction)
}

pub fn is_closure(value: &Value) -> bool {
    has_object_type(value, ObjectType::ObjClosure)
}

pub fn is_class(value: &Value) -> bool {
    has_object_type(value, ObjectType::ObjClass)
}

pub fn is_instance(value: &Value) -> bool {
    has_object_type(value, ObjectType::ObjInstance)
}

pub fn is_bound_method(value: &Value) -> bool {
    has_object_type(value, ObjectType::ObjBoundMethod)
}

pub fn is_list(value: &Value) -> bool {
    has_object_type(value, ObjectType::ObjList)
}

pub fn is_map(value: &Value) -> bool {
    has_object_type(value, ObjectType::ObjMap)
}

pub fn as_string(value: &Value) -> *mut ObjectString {
    as_object(value) as *mut ObjectString
}

/// `nil`, `false`, and numeric zero are falsey; everything else is truthy.
pub fn is_falsey(value: &Value) -> bool {
    match value {
        Value::Nil => true,
        Value::Bool(b) => !b,
        Value::Number(n) => *n == 0.0,
        _ => false,
    }
}

pub fn values_equal(a: &Value, b: &Value) -> bool {
    a == b
}

pub fn hash_value(value: &Value) -> u32 {
    match value {
        Value::Bool(true) => 3,
        Value::Bool(false) => 5,
        Value::Nil => 7,
        Value::Empty => 0,
        Value::Number(n) => {
            let bits = (n + 1.0).to_bits();
            (bits as u32).wrapping_add((bits >> 32) as u32)
        }
        Value::Object(object) => unsafe {
            if (**object).obj_type == ObjectType::ObjString {
                (*(*object as *mut ObjectString)).hash
            } else {
                // Identity-keyed: hash the address bits.
                let addr = *object as usize as u64;
                (addr as u32).wrapping_add((addr >> 32) as u32)
            }
        },
    }
}

/// Interning entry point. Returns the existing string object for `content`
/// if one is alive, otherwise allocates one and records it in `strings`.
pub fn make_string_value(
    object_manager: &mut ObjectManager,
    strings: &mut Table,
    content: &str,
) -> Value {
    let hash = hash_string(content);
    if let Some(existing) = strings.find_string(content, hash) {
        return make_object_value(existing as *mut Object);
    }

    let (ptr, _) = object_manager.alloc_string(content, hash);
    let value = make_object_value(ptr as *mut Object);
    strings.set(value, make_nil_value());
    value
}

fn format_number(number: f64) -> String {
    if number.is_finite() && number.fract() == 0.0 && number.abs() < 1e15 {
        format!("{}", number as i64)
    } else {
        let formatted = format!("{:.10}", number);
        let formatted = formatted.trim_end_matches('0');
        formatted.trim_end_matches('.').to_string()
    }
}

fn object_to_string(object: *mut Object, depth: usize) -> String {
    unsafe {
        match (*object).obj_type {
            ObjectType::ObjString => (*object).as_string().content.clone(),
            ObjectType::ObjFunction => {
                let function = (*object).as_function();
                if function.name.is_empty() {
                    "<script>".to_string()
                } else {
                    format!("<fn {}>", function.name)
                }
            }
            ObjectType::ObjNativeFunction => {
                format!("<native fn {}>", (*object).as_native_function().name)
            }
            ObjectType::ObjClosure => {
                object_to_string((*object).as_closure().function as *mut Object, depth)
            }
            ObjectType::ObjUpvalue => "<upvalue>".to_string(),
            ObjectType::ObjClass => {
                format!("<class {}>", (*(*object).as_class().name).content)
            }
            ObjectType::ObjInstance => {
                format!("<{} instance>", (*(*(*object).as_instance().class).name).content)
            }
            ObjectType::ObjBoundMethod => "<bound method>".to_string(),
            ObjectType::ObjBoundNativeMethod => "<bound method>".to_string(),
            ObjectType::ObjList => {
                let list = (*object).as_list();
                if list.elements.len() > PRINT_MAX_ENTRIES || depth >= PRINT_MAX_DEPTH {
                    format!("<list {}>", list.elements.len())
                } else {
                    let items: Vec<String> = list
                        .elements
                        .iter()
                        .map(|element| to_string_depth(element, depth + 1))
                        .collect();
                    format!("[{}]", items.join(", "))
                }
            }
            ObjectType::ObjMap => {
                let map = (*object).as_map();
                let len = map.table.len();
                if len > PRINT_MAX_ENTRIES || depth >= PRINT_MAX_DEPTH {
                    format!("<map {}>", len)
                } else {
                    let items: Vec<String> = map
                        .table
                        .iter()
                        .map(|(key, value)| {
                            format!(
                                "{}: {}",
                                to_string_depth(&key, depth + 1),
                                to_string_depth(&value, depth + 1)
                            )
                        })
                        .collect();
                    format!("{{{}}}", items.join(", "))
                }
            }
        }
    }
}

fn to_string_depth(value: &Value, depth: usize) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Bool(b) => format!("{}", b),
        Value::Number(n) => format_number(*n),
        Value::Empty => "<empty>".to_string(),
        Value::Object(object) => object_to_string(*object, depth),
    }
}

/// Canonical textual form, shared by `print`, `eprint`, and the `str` native.
pub fn value_to_string(value: &Value) -> String {
    to_string_depth(value, 0)
}

pub fn print_value(value: &Value) {
    print!("{}", value_to_string(value));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_falsey() {
        assert!(is_falsey(&make_nil_value()));
        assert!(is_falsey(&make_bool_value(false)));
        assert!(is_falsey(&make_number_value(0.0)));
        assert!(!is_falsey(&make_bool_value(true)));
        assert!(!is_falsey(&make_number_value(0.5)));
    }

    #[test]
    fn test_equality_is_tag_first() {
        assert!(values_equal(&make_nil_value(), &make_nil_value()));
        assert!(!values_equal(&make_nil_value(), &make_bool_value(false)));
        assert!(!values_equal(&make_number_value(0.0), &make_bool_value(false)));
        assert!(values_equal(&make_number_value(1.5), &make_number_value(1.5)));
        assert!(!values_equal(&make_empty_value(), &make_nil_value()));
    }

    #[test]
    fn test_fixed_hashes() {
        assert_eq!(hash_value(&make_bool_value(true)), 3);
        assert_eq!(hash_value(&make_bool_value(false)), 5);
        assert_eq!(hash_value(&make_nil_value()), 7);
        assert_eq!(hash_value(&make_empty_value()), 0);
    }

    #[test]
    fn test_number_hash_mixes_halves() {
        let bits = (12.5f64 + 1.0).to_bits();
        let expected = (bits as u32).wrapping_add((bits >> 32) as u32);
        assert_eq!(hash_value(&make_number_value(12.5)), expected);
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(value_to_string(&make_number_value(12.0)), "12");
        assert_eq!(value_to_string(&make_number_value(-3.0)), "-3");
        assert_eq!(value_to_string(&make_number_value(2.5)), "2.5");
    }

    #[test]
    fn test_interning_reuses_strings() {
        let mut object_manager = ObjectManager::new();
        let mut strings = Table::new();
        let a = make_string_value(&mut object_manager, &mut strings, "twice");
        let b = make_string_value(&mut object_manager, &mut strings, "twice");
        assert!(values_equal(&a, &b));
        assert_eq!(strings.len(), 1);
    }
}
