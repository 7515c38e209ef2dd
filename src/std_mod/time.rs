use once_cell::sync::Lazy;
use std::time::Instant;

use crate::objects::object::NativeObject;
use crate::value::{make_number_value, Value};
use crate::vm::VM;

static PROCESS_START: Lazy<Instant> = Lazy::new(Instant::now);

/// Forces the start instant to be captured; called once during VM setup so
/// `clock()` measures from interpreter startup, not from its first call.
pub fn init_process_clock() {
    Lazy::force(&PROCESS_START);
}

/// `clock()` -> seconds since process start, as a number.
pub struct Clock;

impl NativeObject for Clock {
    fn run(&self, _vm: &mut VM, _args: &[Value]) -> Result<Value, String> {
        Ok(make_number_value(PROCESS_START.elapsed().as_secs_f64()))
    }
}
