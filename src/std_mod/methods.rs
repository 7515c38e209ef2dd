use crate::objects::object::ObjectType;
use crate::objects::object_bound_method::NativeMethodFn;
use crate::value::{
    as_number, as_object, as_string, is_number, make_bool_value, make_nil_value, make_number_value,
    value_to_string, Value,
};
use crate::vm::VM;

/// The built-in methods of strings, lists, and maps. There is no per-value
/// method table; each receiver kind has one dispatcher that matches on the
/// method name.
pub fn native_method_for(obj_type: ObjectType, name: &str) -> Option<NativeMethodFn> {
    match obj_type {
        ObjectType::ObjString => match name {
            "len" | "substr" | "subscript" => Some(string_method as NativeMethodFn),
            _ => None,
        },
        ObjectType::ObjList => match name {
            "len" | "get" | "clear" | "append" | "remove" | "subscript" => {
                Some(list_method as NativeMethodFn)
            }
            _ => None,
        },
        ObjectType::ObjMap => match name {
            "len" | "get" | "set" | "keys" | "values" | "remove" | "subscript" => {
                Some(map_method as NativeMethodFn)
            }
            _ => None,
        },
        _ => None,
    }
}

fn check_arity(name: &str, expected: usize, got: usize) -> Result<(), String> {
    if expected != got {
        return Err(format!("{}() expects {} arguments but got {}.", name, expected, got));
    }
    Ok(())
}

/// Negative indices count back from the end: `-n` is `len - n`.
fn normalize_index(raw: &Value, len: usize) -> Result<usize, String> {
    if !is_number(raw) {
        return Err("Index must be a number.".to_string());
    }
    let number = as_number(raw);
    if number.fract() != 0.0 {
        return Err("Index must be an integer.".to_string());
    }

    let index = number as i64;
    let adjusted = if index < 0 { index + len as i64 } else { index };
    if adjusted < 0 || adjusted >= len as i64 {
        return Err(format!("Index {} out of range.", value_to_string(raw)));
    }
    Ok(adjusted as usize)
}

fn string_method(vm: &mut VM, receiver: Value, name: &str, args: &[Value]) -> Result<Value, String> {
    let content = unsafe { &(*as_string(&receiver)).content };

    match name {
        "len" => {
            check_arity("len", 0, args.len())?;
            Ok(make_number_value(content.chars().count() as f64))
        }
        "substr" => {
            check_arity("substr", 2, args.len())?;
            let char_count = content.chars().count();
            let start = normalize_index(&args[0], char_count)?;
            if !is_number(&args[1]) {
                return Err("substr() length must be a number.".to_string());
            }
            let length = as_number(&args[1]);
            if length < 0.0 || length.fract() != 0.0 {
                return Err("substr() length must be a non-negative integer.".to_string());
            }
            let taken: String = content.chars().skip(start).take(length as usize).collect();
            Ok(vm.intern(&taken))
        }
        "subscript" => {
            if args.len() == 2 {
                return Err("Strings don't support subscript assignment.".to_string());
            }
            check_arity("subscript", 1, args.len())?;
            let char_count = content.chars().count();
            let index = normalize_index(&args[0], char_count)?;
            let selected: String = content.chars().skip(index).take(1).collect();
            Ok(vm.intern(&selected))
        }
        _ => unreachable!("Unknown string method: {}", name),
    }
}

fn list_method(_vm: &mut VM, receiver: Value, name: &str, args: &[Value]) -> Result<Value, String> {
    let list = unsafe { (*as_object(&receiver)).as_list_mut() };

    match name {
        "len" => {
            check_arity("len", 0, args.len())?;
            Ok(make_number_value(list.elements.len() as f64))
        }
        "get" => {
            check_arity("get", 1, args.len())?;
            let index = normalize_index(&args[0], list.elements.len())?;
            Ok(list.elements[index])
        }
        "clear" => {
            check_arity("clear", 0, args.len())?;
            list.elements.clear();
            Ok(make_nil_value())
        }
        "append" => {
            check_arity("append", 1, args.len())?;
            list.elements.push(args[0]);
            Ok(receiver)
        }
        "remove" => {
            check_arity("remove", 1, args.len())?;
            let index = normalize_index(&args[0], list.elements.len())?;
            Ok(list.elements.remove(index))
        }
        "subscript" => match args.len() {
            1 => {
                let index = normalize_index(&args[0], list.elements.len())?;
                Ok(list.elements[index])
            }
            2 => {
                let index = normalize_index(&args[0], list.elements.len())?;
                list.elements[index] = args[1];
                Ok(args[1])
            }
            got => Err(format!("subscript() expects 1 or 2 arguments but got {}.", got)),
        },
        _ => unreachable!("Unknown list method: {}", name),
    }
}

fn map_method(vm: &mut VM, receiver: Value, name: &str, args: &[Value]) -> Result<Value, String> {
    let map = unsafe { (*as_object(&receiver)).as_map_mut() };

    match name {
        "len" => {
            check_arity("len", 0, args.len())?;
            Ok(make_number_value(map.table.len() as f64))
        }
        "get" => {
            check_arity("get", 1, args.len())?;
            Ok(map.table.get(&args[0]).unwrap_or_else(make_nil_value))
        }
        "set" => {
            check_arity("set", 2, args.len())?;
            map.table.set(args[0], args[1]);
            Ok(args[1])
        }
        "keys" => {
            check_arity("keys", 0, args.len())?;
            let keys: Vec<Value> = map.table.iter().map(|(key, _)| key).collect();
            Ok(vm.alloc_list(keys))
        }
        "values" => {
            check_arity("values", 0, args.len())?;
            let values: Vec<Value> = map.table.iter().map(|(_, value)| value).collect();
            Ok(vm.alloc_list(values))
        }
        "remove" => {
            check_arity("remove", 1, args.len())?;
            Ok(make_bool_value(map.table.delete(&args[0])))
        }
        "subscript" => match args.len() {
            1 => Ok(map.table.get(&args[0]).unwrap_or_else(make_nil_value)),
            2 => {
                map.table.set(args[0], args[1]);
                Ok(args[1])
            }
            got => Err(format!("subscript() expects 1 or 2 arguments but got {}.", got)),
        },
        _ => unreachable!("Unknown map method: {}", name),
    }
}
