pub mod methods;
pub mod time;

use crate::objects::object::NativeObject;
use crate::table::Table;
use crate::value::{
    as_bool, as_object, as_string, is_bool, is_class, is_instance, is_list, is_map,
    is_native_function, is_nil, is_number, is_string, make_bool_value, make_nil_value,
    make_number_value, value_to_string, Value,
};
use crate::vm::VM;

/// Install every built-in native into the VM's global table.
pub fn register_all(vm: &mut VM) {
    time::init_process_clock();

    vm.define_native("clock", Some(0), Box::new(time::Clock));
    vm.define_native("has_field", Some(2), Box::new(HasField));
    vm.define_native("get_field", Some(2), Box::new(GetField));
    vm.define_native("set_field", Some(3), Box::new(SetField));
    vm.define_native("is", Some(2), Box::new(Is));
    vm.define_native("sys_version", Some(0), Box::new(SysVersion));
    vm.define_native("str", Some(1), Box::new(Str));
    vm.define_native("list", None, Box::new(ListNew));
    vm.define_native("map", None, Box::new(MapNew));
    vm.define_native("number", Some(1), Box::new(NumberCast));
}

fn expect_instance_and_name<'a>(
    native: &str,
    args: &'a [Value],
) -> Result<(&'a Value, Value), String> {
    if !is_instance(&args[0]) {
        return Err(format!("{}() expects an instance.", native));
    }
    if !is_string(&args[1]) {
        return Err(format!("{}() expects a field name string.", native));
    }
    Ok((&args[0], args[1]))
}

/// `has_field(instance, name)` -> bool.
struct HasField;

impl NativeObject for HasField {
    fn run(&self, _vm: &mut VM, args: &[Value]) -> Result<Value, String> {
        let (instance, name) = expect_instance_and_name("has_field", args)?;
        let fields = unsafe { &(*as_object(instance)).as_instance().fields };
        Ok(make_bool_value(fields.get(&name).is_some()))
    }
}

/// `get_field(instance, name)` -> the field value, or nil when absent.
struct GetField;

impl NativeObject for GetField {
    fn run(&self, _vm: &mut VM, args: &[Value]) -> Result<Value, String> {
        let (instance, name) = expect_instance_and_name("get_field", args)?;
        let fields = unsafe { &(*as_object(instance)).as_instance().fields };
        Ok(fields.get(&name).unwrap_or_else(make_nil_value))
    }
}

/// `set_field(instance, name, value)` -> the stored value.
struct SetField;

impl NativeObject for SetField {
    fn run(&self, _vm: &mut VM, args: &[Value]) -> Result<Value, String> {
        let (instance, name) = expect_instance_and_name("set_field", args)?;
        let fields = unsafe { &mut (*as_object(instance)).as_instance_mut().fields };
        fields.set(name, args[2]);
        Ok(args[2])
    }
}

/// `is(value, type)`. The type argument is a user class (the instance's
/// class chain is walked), nil (checks for nil), or one of the built-in
/// natives `str`/`list`/`map`/`number` standing in for their kinds.
struct Is;

impl NativeObject for Is {
    fn run(&self, _vm: &mut VM, args: &[Value]) -> Result<Value, String> {
        let value = &args[0];
        let type_tag = &args[1];

        if is_nil(type_tag) {
            return Ok(make_bool_value(is_nil(value)));
        }

        if is_native_function(type_tag) {
            let native = unsafe { (*as_object(type_tag)).as_native_function() };
            let matched = match native.name.as_str() {
                "str" => is_string(value),
                "list" => is_list(value),
                "map" => is_map(value),
                "number" => is_number(value),
                _ => false,
            };
            return Ok(make_bool_value(matched));
        }

        if is_class(type_tag) {
            if !is_instance(value) {
                return Ok(make_bool_value(false));
            }
            let target = as_object(type_tag);
            let mut class = unsafe { (*as_object(value)).as_instance().class };
            while !class.is_null() {
                if class as *mut crate::objects::object::Object == target {
                    return Ok(make_bool_value(true));
                }
                class = unsafe { (*class).superclass };
            }
            return Ok(make_bool_value(false));
        }

        Ok(make_bool_value(false))
    }
}

/// `sys_version()` -> the interpreter version string.
struct SysVersion;

impl NativeObject for SysVersion {
    fn run(&self, vm: &mut VM, _args: &[Value]) -> Result<Value, String> {
        Ok(vm.intern(env!("CARGO_PKG_VERSION")))
    }
}

/// `str(value)` -> the canonical textual form, interned.
struct Str;

impl NativeObject for Str {
    fn run(&self, vm: &mut VM, args: &[Value]) -> Result<Value, String> {
        Ok(vm.intern(&value_to_string(&args[0])))
    }
}

/// `list(...)` -> a new list of the arguments; `list(l)` with a single list
/// argument makes a shallow copy. List literals start from `list()`.
struct ListNew;

impl NativeObject for ListNew {
    fn run(&self, vm: &mut VM, args: &[Value]) -> Result<Value, String> {
        if args.len() == 1 && is_list(&args[0]) {
            let elements = unsafe { (*as_object(&args[0])).as_list().elements.clone() };
            return Ok(vm.alloc_list(elements));
        }
        Ok(vm.alloc_list(args.to_vec()))
    }
}

/// `map(k, v, ...)` builds a map from key/value pairs; `map(m)` copies an
/// existing map.
struct MapNew;

impl NativeObject for MapNew {
    fn run(&self, vm: &mut VM, args: &[Value]) -> Result<Value, String> {
        if args.len() == 1 && is_map(&args[0]) {
            let mut table = Table::new();
            unsafe { (*as_object(&args[0])).as_map().table.copy_to(&mut table) };
            return Ok(vm.alloc_map(table));
        }

        if args.len() % 2 != 0 {
            return Err("map() expects key/value pairs or a single map.".to_string());
        }

        let mut table = Table::new();
        for pair in args.chunks(2) {
            table.set(pair[0], pair[1]);
        }
        Ok(vm.alloc_map(table))
    }
}

/// `number(value)` -> numeric coercion of numbers, bools, nil, and numeric
/// strings.
struct NumberCast;

impl NativeObject for NumberCast {
    fn run(&self, _vm: &mut VM, args: &[Value]) -> Result<Value, String> {
        let value = &args[0];
        if is_number(value) {
            return Ok(*value);
        }
        if is_bool(value) {
            return Ok(make_number_value(if as_bool(value) { 1.0 } else { 0.0 }));
        }
        if is_nil(value) {
            return Ok(make_number_value(0.0));
        }
        if is_string(value) {
            let content: &String = unsafe { &(*as_string(value)).content };
            return match content.trim().parse::<f64>() {
                Ok(number) => Ok(make_number_value(number)),
                Err(_) => Err(format!("Can't convert '{}' to a number.", content)),
            };
        }
        Err("number() expects a number, bool, nil, or numeric string.".to_string())
    }
}
