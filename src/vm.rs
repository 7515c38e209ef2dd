use crate::call_frame::CallFrame;
use crate::chunk::OpCode;
use crate::compiler::Parser;
use crate::gc::GarbageCollector;
use crate::objects::object::{NativeObject, Object, ObjectType};
use crate::objects::object_class::ObjectClass;
use crate::objects::object_closure::ObjectClosure;
use crate::objects::object_native_function::ObjectNativeFunction;
use crate::objects::object_string::ObjectString;
use crate::objects::object_upvalue::{ObjectUpvalue, UpvalueState};
use crate::objects::object_manager::ObjectManager;
use crate::std_mod;
use crate::std_mod::methods::native_method_for;
use crate::table::Table;
use crate::value::{
    as_number, as_object, as_string, is_class, is_falsey, is_instance, is_list, is_map, is_number,
    is_object, is_string, make_bool_value, make_nil_value, make_number_value, make_object_value,
    make_string_value, value_to_string, Value,
};

pub const FRAMES_MAX: usize = 64;
pub const STACK_MAX: usize = FRAMES_MAX * 256;

/// First collection happens once this many bytes are live; afterwards the
/// threshold tracks twice the surviving heap.
const GC_FIRST_TRIGGER: usize = 1024 * 1024;

pub struct VM {
    frames: Vec<CallFrame>,
    stack: Vec<Value>,
    globals: Table,
    intern_strings: Table,
    init_string: *mut ObjectString,
    /// Open upvalues, ordered by descending stack index.
    open_upvalues: Vec<*mut ObjectUpvalue>,
    object_manager: ObjectManager,
    gc: GarbageCollector,
    bytes_allocated: usize,
    next_gc: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    InterpretOk,
    InterpretCompileError,
    InterpretRuntimeError,
    InterpretExitOk,
    InterpretExit(i32),
}

impl VM {
    pub fn new() -> Box<VM> {
        let mut vm = Box::new(VM {
            frames: Vec::with_capacity(FRAMES_MAX),
            stack: Vec::with_capacity(STACK_MAX),
            globals: Table::new(),
            intern_strings: Table::new(),
            init_string: std::ptr::null_mut(),
            open_upvalues: vec![],
            object_manager: ObjectManager::new(),
            gc: GarbageCollector::new(),
            bytes_allocated: 0,
            next_gc: GC_FIRST_TRIGGER,
        });

        let init = make_string_value(&mut vm.object_manager, &mut vm.intern_strings, "init");
        vm.init_string = as_string(&init);
        std_mod::register_all(&mut vm);
        vm
    }

    /// Register a native function under `name`. `None` arity means variadic.
    pub fn define_native(
        &mut self,
        name: &str,
        arity: Option<u8>,
        native_object: Box<dyn NativeObject>,
    ) {
        let name_value = make_string_value(&mut self.object_manager, &mut self.intern_strings, name);
        let (native, _) =
            self.object_manager
                .alloc_native_function(name.to_string(), arity, native_object);
        self.globals.set(name_value, make_object_value(native as *mut Object));
    }

    /// Bind the globals `argc` and `argv` (a list of strings).
    pub fn set_argv(&mut self, args: &[String]) {
        let argc_name = self.intern("argc");
        self.globals.set(argc_name, make_number_value(args.len() as f64));

        let elements: Vec<Value> = args.iter().map(|arg| self.intern(arg)).collect();
        let argv = self.alloc_list(elements);
        let argv_name = self.intern("argv");
        self.globals.set(argv_name, argv);
    }

    /// Bind the global `env`: a map copied from the process environment.
    pub fn inherit_env(&mut self) {
        let mut table = Table::new();
        for (key, value) in std::env::vars() {
            let key = self.intern(&key);
            let value = self.intern(&value);
            table.set(key, value);
        }
        let env = self.alloc_map(table);
        let env_name = self.intern("env");
        self.globals.set(env_name, env);
    }

    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        let compiled = {
            let mut parser = Parser::new(&mut self.object_manager, &mut self.intern_strings);
            parser.compile(source)
        };

        let Some(function) = compiled else {
            return InterpretResult::InterpretCompileError;
        };

        self.reset_stack();
        let function_ptr = self.object_manager.adopt_function(function);
        self.push(make_object_value(function_ptr as *mut Object));
        let (closure, _) = self.object_manager.alloc_closure(function_ptr);
        self.pop();
        self.push(make_object_value(closure as *mut Object));
        self.call(closure, 0)
            .expect("Top-level script call can't fail.");

        match self.run() {
            Ok(result) => result,
            Err(message) => {
                self.runtime_error(&message);
                InterpretResult::InterpretRuntimeError
            }
        }
    }

    pub(crate) fn intern(&mut self, content: &str) -> Value {
        make_string_value(&mut self.object_manager, &mut self.intern_strings, content)
    }

    pub(crate) fn alloc_list(&mut self, elements: Vec<Value>) -> Value {
        let (list, _) = self.object_manager.alloc_list(elements);
        make_object_value(list as *mut Object)
    }

    pub(crate) fn alloc_map(&mut self, table: Table) -> Value {
        let (map, _) = self.object_manager.alloc_map(table);
        make_object_value(map as *mut Object)
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("Stack underflow.")
    }

    fn peek_steps(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - distance - 1]
    }

    fn frame(&self) -> &CallFrame {
        self.frames.last().expect("No call frame.")
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("No call frame.")
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().expect("No call frame.");
        let byte = unsafe { (&(*(*frame.closure).function).chunk.code)[frame.ip] };
        frame.ip += 1;
        byte
    }

    fn read_short(&mut self) -> u16 {
        let hi = self.read_byte() as u16;
        let lo = self.read_byte() as u16;
        (hi << 8) | lo
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        unsafe { *(*(*self.frame().closure).function).chunk.get_constant(index) }
    }

    fn read_constant_long(&mut self) -> Value {
        let lo = self.read_byte() as usize;
        let mid = self.read_byte() as usize;
        let hi = self.read_byte() as usize;
        let index = lo | (mid << 8) | (hi << 16);
        unsafe { *(*(*self.frame().closure).function).chunk.get_constant(index) }
    }

    fn read_string(&mut self) -> *mut ObjectString {
        let value = self.read_constant();
        as_string(&value)
    }

    fn reset_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
    }

    /// Print the message, then a traceback over the live frames, then drop
    /// the whole stack. The VM stays usable for another `interpret`.
    fn runtime_error(&mut self, message: &str) {
        eprintln!("{}", message);

        for frame in self.frames.iter().rev() {
            let function = frame.function();
            let instruction = frame.ip.saturating_sub(1);
            let line = function.chunk.get_line(instruction);
            if function.name.is_empty() {
                eprintln!("[line {}] in script", line);
            } else {
                eprintln!("[line {}] in {}()", line, function.name);
            }
        }

        self.reset_stack();
    }

    /// Threshold check at the dispatch-loop safe point. Everything live is
    /// rooted by the stack, frames, globals, and open upvalues here, so no
    /// partially constructed object can be swept.
    fn maybe_collect(&mut self) {
        self.bytes_allocated += self.object_manager.drain_pending_bytes();
        let stress = cfg!(feature = "gc_stress");
        if (stress || self.bytes_allocated > self.next_gc) && !self.gc.is_active() {
            self.collect_garbage();
        }
    }

    fn collect_garbage(&mut self) {
        let before = self.bytes_allocated;
        self.gc.prepare_collection(&self.object_manager);

        let gc = &mut self.gc;
        for value in &self.stack {
            gc.mark_value(value);
        }
        for frame in &self.frames {
            gc.mark_object(frame.closure as *mut Object);
        }
        for &upvalue in &self.open_upvalues {
            gc.mark_object(upvalue as *mut Object);
        }
        gc.mark_table(&self.globals);
        gc.mark_object(self.init_string as *mut Object);

        gc.trace_references();

        // The intern table is weak: doomed strings leave it first so a
        // later interning can't resurrect a dangling pointer.
        self.intern_strings.remove_unmarked(&self.gc);
        let freed = self.gc.sweep(&mut self.object_manager);

        self.bytes_allocated = self.bytes_allocated.saturating_sub(freed);
        self.next_gc = self.bytes_allocated * 2;
        self.gc.record_cycle(before, freed, self.bytes_allocated, self.next_gc);
    }

    fn run(&mut self) -> Result<InterpretResult, String> {
        loop {
            self.maybe_collect();
            debug_feature::trace_execution(self);

            let instruction = self.read_byte();
            match OpCode::from_byte(instruction) {
                Some(OpCode::Constant) => {
                    let constant = self.read_constant();
                    self.push(constant);
                }
                Some(OpCode::ConstantLong) => {
                    let constant = self.read_constant_long();
                    self.push(constant);
                }
                Some(OpCode::Nil) => {
                    self.push(make_nil_value());
                }
                Some(OpCode::True) => {
                    self.push(make_bool_value(true));
                }
                Some(OpCode::False) => {
                    self.push(make_bool_value(false));
                }
                Some(OpCode::Pop) => {
                    self.pop();
                }
                Some(OpCode::PopN) => {
                    let count = self.read_byte() as usize;
                    let len = self.stack.len();
                    self.stack.truncate(len - count);
                }
                Some(OpCode::Dup) => {
                    self.push(self.peek_steps(0));
                }
                Some(OpCode::GetLocal) => {
                    let slot = self.read_byte() as usize;
                    let value = self.stack[self.frame().slots + slot];
                    self.push(value);
                }
                Some(OpCode::SetLocal) => {
                    let slot = self.read_byte() as usize;
                    let base = self.frame().slots;
                    let value = self.peek_steps(0);
                    self.stack[base + slot] = value;
                }
                Some(OpCode::GetGlobal) => {
                    let name = self.read_string();
                    let name_value = make_object_value(name as *mut Object);
                    match self.globals.get(&name_value) {
                        Some(value) => self.push(value),
                        None => {
                            return Err(format!("Undefined variable '{}'.", unsafe {
                                &(*name).content
                            }))
                        }
                    }
                }
                Some(OpCode::DefineGlobal) => {
                    let name = self.read_string();
                    let name_value = make_object_value(name as *mut Object);
                    let value = self.peek_steps(0);
                    self.globals.set(name_value, value);
                    self.pop();
                }
                Some(OpCode::SetGlobal) => {
                    let name = self.read_string();
                    let name_value = make_object_value(name as *mut Object);
                    let value = self.peek_steps(0);
                    if self.globals.set(name_value, value) {
                        self.globals.delete(&name_value);
                        return Err(format!("Undefined variable '{}'.", unsafe {
                            &(*name).content
                        }));
                    }
                }
                Some(OpCode::GetUpvalue) => {
                    let slot = self.read_byte() as usize;
                    let upvalue = unsafe { (&(*self.frame().closure).upvalues)[slot] };
                    let value = match unsafe { &(*upvalue).state } {
                        UpvalueState::Open(index) => self.stack[*index],
                        UpvalueState::Closed(value) => *value,
                    };
                    self.push(value);
                }
                Some(OpCode::SetUpvalue) => {
                    let slot = self.read_byte() as usize;
                    let value = self.peek_steps(0);
                    let upvalue = unsafe { (&(*self.frame().closure).upvalues)[slot] };
                    match unsafe { &mut (*upvalue).state } {
                        UpvalueState::Open(index) => self.stack[*index] = value,
                        UpvalueState::Closed(closed) => *closed = value,
                    }
                }
                Some(OpCode::GetProperty) => {
                    let name = self.read_string();
                    let receiver = self.peek_steps(0);

                    if is_instance(&receiver) {
                        let name_value = make_object_value(name as *mut Object);
                        let instance = unsafe { (*as_object(&receiver)).as_instance() };
                        if let Some(field) = instance.fields.get(&name_value) {
                            self.pop();
                            self.push(field);
                        } else {
                            let class = instance.class;
                            self.bind_method(class, name)?;
                        }
                    } else if is_class(&receiver) {
                        // Class fields are readable defaults.
                        let name_value = make_object_value(name as *mut Object);
                        let class = unsafe { (*as_object(&receiver)).as_class() };
                        match class.fields.get(&name_value) {
                            Some(value) => {
                                self.pop();
                                self.push(value);
                            }
                            None => {
                                return Err(format!("Undefined property '{}'.", unsafe {
                                    &(*name).content
                                }))
                            }
                        }
                    } else if is_string(&receiver) || is_list(&receiver) || is_map(&receiver) {
                        let obj_type = unsafe { (*as_object(&receiver)).obj_type };
                        let name_str: &str = unsafe { &(*name).content };
                        match native_method_for(obj_type, name_str) {
                            Some(method) => {
                                let (bound, _) = self
                                    .object_manager
                                    .alloc_bound_native_method(receiver, name, method);
                                self.pop();
                                self.push(make_object_value(bound as *mut Object));
                            }
                            None => return Err(format!("Undefined property '{}'.", name_str)),
                        }
                    } else {
                        return Err("Only instances have properties.".to_string());
                    }
                }
                Some(OpCode::SetProperty) => {
                    let name = self.read_string();
                    let receiver = self.peek_steps(1);

                    if is_instance(&receiver) {
                        let name_value = make_object_value(name as *mut Object);
                        let value = self.peek_steps(0);
                        unsafe {
                            (*as_object(&receiver))
                                .as_instance_mut()
                                .fields
                                .set(name_value, value);
                        }
                        let value = self.pop();
                        self.pop();
                        self.push(value);
                    } else if is_class(&receiver) {
                        return Err("Class fields are read-only.".to_string());
                    } else {
                        return Err("Only instances have fields.".to_string());
                    }
                }
                Some(OpCode::GetSuper) => {
                    let name = self.read_string();
                    let superclass = self.pop();
                    let superclass = as_object(&superclass) as *mut ObjectClass;
                    self.bind_method(superclass, name)?;
                }
                Some(OpCode::Equal) => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(make_bool_value(a == b));
                }
                Some(OpCode::Greater) => self.binary_number_op(OpCode::Greater)?,
                Some(OpCode::Less) => self.binary_number_op(OpCode::Less)?,
                Some(OpCode::Add) => {
                    let b = self.peek_steps(0);
                    let a = self.peek_steps(1);
                    if is_string(&a) && is_string(&b) {
                        let combined = unsafe {
                            let string_a = &(*as_string(&a)).content;
                            let string_b = &(*as_string(&b)).content;
                            let mut combination =
                                String::with_capacity(string_a.len() + string_b.len());
                            combination.push_str(string_a);
                            combination.push_str(string_b);
                            combination
                        };
                        let value = make_string_value(
                            &mut self.object_manager,
                            &mut self.intern_strings,
                            &combined,
                        );
                        self.pop();
                        self.pop();
                        self.push(value);
                    } else if is_number(&a) && is_number(&b) {
                        let number_b = as_number(&self.pop());
                        let number_a = as_number(&self.pop());
                        self.push(make_number_value(number_a + number_b));
                    } else {
                        return Err("Operands must be two numbers or two strings.".to_string());
                    }
                }
                Some(OpCode::Subtract) => self.binary_number_op(OpCode::Subtract)?,
                Some(OpCode::Multiply) => self.binary_number_op(OpCode::Multiply)?,
                Some(OpCode::Divide) => self.binary_number_op(OpCode::Divide)?,
                Some(OpCode::Modulo) => self.binary_number_op(OpCode::Modulo)?,
                Some(OpCode::BitwiseAnd) => self.binary_number_op(OpCode::BitwiseAnd)?,
                Some(OpCode::BitwiseOr) => self.binary_number_op(OpCode::BitwiseOr)?,
                Some(OpCode::BitwiseXor) => self.binary_number_op(OpCode::BitwiseXor)?,
                Some(OpCode::ShiftLeft) => self.binary_number_op(OpCode::ShiftLeft)?,
                Some(OpCode::ShiftRight) => self.binary_number_op(OpCode::ShiftRight)?,
                Some(OpCode::BitwiseNot) => {
                    if !is_number(&self.peek_steps(0)) {
                        return Err("Operand must be a number.".to_string());
                    }
                    let value = as_number(&self.pop()) as i64;
                    self.push(make_number_value((!value) as f64));
                }
                Some(OpCode::Not) => {
                    let value = self.pop();
                    self.push(make_bool_value(is_falsey(&value)));
                }
                Some(OpCode::Negate) => {
                    if !is_number(&self.peek_steps(0)) {
                        return Err("Operand must be a number.".to_string());
                    }
                    let value = self.pop();
                    self.push(make_number_value(-as_number(&value)));
                }
                Some(OpCode::Print) => {
                    let value = self.pop();
                    println!("{}", value_to_string(&value));
                }
                Some(OpCode::Error) => {
                    let value = self.pop();
                    eprintln!("{}", value_to_string(&value));
                }
                Some(OpCode::Jump) => {
                    let offset = self.read_short() as usize;
                    self.frame_mut().ip += offset;
                }
                Some(OpCode::JumpIfFalse) => {
                    let offset = self.read_short() as usize;
                    if is_falsey(&self.peek_steps(0)) {
                        self.frame_mut().ip += offset;
                    }
                }
                Some(OpCode::Loop) => {
                    let offset = self.read_short() as usize;
                    self.frame_mut().ip -= offset;
                }
                Some(OpCode::Call) => {
                    let arg_count = self.read_byte() as usize;
                    let callee = self.peek_steps(arg_count);
                    self.call_value(callee, arg_count)?;
                }
                Some(OpCode::Invoke) => {
                    let name = self.read_string();
                    let arg_count = self.read_byte() as usize;
                    self.invoke(name, arg_count)?;
                }
                Some(OpCode::SuperInvoke) => {
                    let name = self.read_string();
                    let arg_count = self.read_byte() as usize;
                    let superclass = self.pop();
                    let superclass = as_object(&superclass) as *mut ObjectClass;
                    self.invoke_from_class(superclass, name, arg_count)?;
                }
                Some(OpCode::Closure) => {
                    let function_value = self.read_constant();
                    let function_ptr =
                        as_object(&function_value) as *mut crate::objects::object_function::ObjectFunction;
                    let (closure, _) = self.object_manager.alloc_closure(function_ptr);
                    self.push(make_object_value(closure as *mut Object));

                    let upvalue_count = unsafe { (*function_ptr).upvalue_count };
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte();
                        let index = self.read_byte() as usize;
                        let upvalue = if is_local == 1 {
                            let slot = self.frame().slots + index;
                            self.capture_upvalue(slot)
                        } else {
                            unsafe { (&(*self.frame().closure).upvalues)[index] }
                        };
                        unsafe {
                            (*closure).upvalues.push(upvalue);
                        }
                    }
                }
                Some(OpCode::CloseUpvalue) => {
                    self.close_upvalues(self.stack.len() - 1);
                    self.pop();
                }
                Some(OpCode::Return) => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("No call frame.");
                    self.close_upvalues(frame.slots);
                    self.stack.truncate(frame.slots);
                    if self.frames.is_empty() {
                        return Ok(InterpretResult::InterpretOk);
                    }
                    self.push(result);
                }
                Some(OpCode::Exit) => {
                    let value = self.pop();
                    if !is_number(&value) {
                        return Err("Exit code must be a number.".to_string());
                    }
                    let code = as_number(&value) as i32;
                    self.reset_stack();
                    return Ok(if code == 0 {
                        InterpretResult::InterpretExitOk
                    } else {
                        InterpretResult::InterpretExit(code)
                    });
                }
                Some(OpCode::Class) => {
                    let name = self.read_string();
                    let (class, _) = self.object_manager.alloc_class(name);
                    self.push(make_object_value(class as *mut Object));
                }
                Some(OpCode::Inherit) => {
                    let superclass_value = self.peek_steps(1);
                    if !is_class(&superclass_value) {
                        return Err("Superclass must be a class.".to_string());
                    }
                    let subclass_value = self.peek_steps(0);
                    let superclass = as_object(&superclass_value) as *mut ObjectClass;
                    let subclass = as_object(&subclass_value) as *mut ObjectClass;
                    if superclass == subclass {
                        return Err("A class can't inherit from itself.".to_string());
                    }
                    unsafe {
                        (*superclass).fields.copy_to(&mut (*subclass).fields);
                        (*superclass).methods.copy_to(&mut (*subclass).methods);
                        (*subclass).superclass = superclass;
                    }
                    self.pop();
                }
                Some(OpCode::Method) => {
                    let name = self.read_string();
                    let method = self.peek_steps(0);
                    let class_value = self.peek_steps(1);
                    let class = as_object(&class_value) as *mut ObjectClass;
                    unsafe {
                        (*class)
                            .methods
                            .set(make_object_value(name as *mut Object), method);
                    }
                    self.pop();
                }
                Some(OpCode::Field) => {
                    let name = self.read_string();
                    let value = self.peek_steps(0);
                    let class_value = self.peek_steps(1);
                    let class = as_object(&class_value) as *mut ObjectClass;
                    unsafe {
                        (*class)
                            .fields
                            .set(make_object_value(name as *mut Object), value);
                    }
                    self.pop();
                }
                Some(OpCode::Assert) => {
                    let value = self.pop();
                    if is_falsey(&value) {
                        return Err("Assertion failed.".to_string());
                    }
                }
                None => return Err(format!("Unknown opcode {}.", instruction)),
            }
        }
    }

    fn binary_number_op(&mut self, op: OpCode) -> Result<(), String> {
        if !is_number(&self.peek_steps(0)) || !is_number(&self.peek_steps(1)) {
            return Err("Operands must be numbers.".to_string());
        }

        let b = as_number(&self.pop());
        let a = as_number(&self.pop());
        match op {
            OpCode::Greater => self.push(make_bool_value(a > b)),
            OpCode::Less => self.push(make_bool_value(a < b)),
            OpCode::Subtract => self.push(make_number_value(a - b)),
            OpCode::Multiply => self.push(make_number_value(a * b)),
            OpCode::Divide => {
                if b == 0.0 {
                    return Err("Division by zero.".to_string());
                }
                self.push(make_number_value(a / b));
            }
            OpCode::Modulo => {
                if b == 0.0 {
                    return Err("Modulo by zero.".to_string());
                }
                self.push(make_number_value(a % b));
            }
            OpCode::BitwiseAnd => self.push(make_number_value((a as i64 & b as i64) as f64)),
            OpCode::BitwiseOr => self.push(make_number_value((a as i64 | b as i64) as f64)),
            OpCode::BitwiseXor => self.push(make_number_value((a as i64 ^ b as i64) as f64)),
            OpCode::ShiftLeft => {
                self.push(make_number_value((a as i64).wrapping_shl(b as i64 as u32) as f64))
            }
            OpCode::ShiftRight => {
                self.push(make_number_value((a as i64).wrapping_shr(b as i64 as u32) as f64))
            }
            _ => unreachable!("Unknown binary operator."),
        }
        Ok(())
    }

    fn call_value(&mut self, callee: Value, arg_count: usize) -> Result<(), String> {
        if is_object(&callee) {
            let object = as_object(&callee);
            match unsafe { (*object).obj_type } {
                ObjectType::ObjClosure => {
                    return self.call(object as *mut ObjectClosure, arg_count);
                }
                ObjectType::ObjBoundMethod => {
                    let (receiver, method) = unsafe {
                        let bound = (*object).as_bound_method();
                        (bound.receiver, bound.method)
                    };
                    let base = self.stack.len() - arg_count - 1;
                    self.stack[base] = receiver;
                    return self.call(method, arg_count);
                }
                ObjectType::ObjBoundNativeMethod => {
                    let (receiver, name, method) = unsafe {
                        let bound = (*object).as_bound_native_method();
                        (bound.receiver, bound.name, bound.method)
                    };
                    let name_str: &str = unsafe { &(*name).content };
                    let base = self.stack.len() - arg_count;
                    let args: Vec<Value> = self.stack[base..].to_vec();
                    let result = method(self, receiver, name_str, &args)?;
                    self.stack.truncate(base - 1);
                    self.push(result);
                    return Ok(());
                }
                ObjectType::ObjClass => {
                    let class = object as *mut ObjectClass;
                    let (instance, _) = self.object_manager.alloc_instance(class);
                    unsafe {
                        (*class).fields.copy_to(&mut (*instance).fields);
                    }
                    let base = self.stack.len() - arg_count - 1;
                    self.stack[base] = make_object_value(instance as *mut Object);

                    let init_value = make_object_value(self.init_string as *mut Object);
                    let initializer = unsafe { (*class).methods.get(&init_value) };
                    if let Some(initializer) = initializer {
                        return self.call(as_object(&initializer) as *mut ObjectClosure, arg_count);
                    }
                    if arg_count != 0 {
                        return Err(format!("Expected 0 arguments but got {}.", arg_count));
                    }
                    return Ok(());
                }
                ObjectType::ObjNativeFunction => {
                    let native = object as *mut ObjectNativeFunction;
                    if let Some(arity) = unsafe { (*native).arity } {
                        if arity as usize != arg_count {
                            return Err(format!(
                                "Expected {} arguments but got {}.",
                                arity, arg_count
                            ));
                        }
                    }
                    let base = self.stack.len() - arg_count;
                    let args: Vec<Value> = self.stack[base..].to_vec();
                    let result = unsafe { (*native).native_object.run(self, &args) }?;
                    self.stack.truncate(base - 1);
                    self.push(result);
                    return Ok(());
                }
                _ => {}
            }
        }
        Err("Can only call functions and classes.".to_string())
    }

    fn call(&mut self, closure: *mut ObjectClosure, arg_count: usize) -> Result<(), String> {
        let arity = unsafe { (*(*closure).function).arity } as usize;
        if arg_count != arity {
            return Err(format!("Expected {} arguments but got {}.", arity, arg_count));
        }
        if self.frames.len() == FRAMES_MAX {
            return Err("Stack overflow.".to_string());
        }

        let slots = self.stack.len() - arg_count - 1;
        self.frames.push(CallFrame::new(closure, slots));
        Ok(())
    }

    /// Fused property-get + call: fields are checked before methods, so a
    /// callable stored in a field shadows a method of the same name.
    fn invoke(&mut self, name: *mut ObjectString, arg_count: usize) -> Result<(), String> {
        let receiver = self.peek_steps(arg_count);

        if is_instance(&receiver) {
            let name_value = make_object_value(name as *mut Object);
            let instance = unsafe { (*as_object(&receiver)).as_instance() };
            if let Some(field) = instance.fields.get(&name_value) {
                let base = self.stack.len() - arg_count - 1;
                self.stack[base] = field;
                return self.call_value(field, arg_count);
            }
            let class = instance.class;
            return self.invoke_from_class(class, name, arg_count);
        }

        if is_class(&receiver) {
            let name_value = make_object_value(name as *mut Object);
            let class = unsafe { (*as_object(&receiver)).as_class() };
            if let Some(field) = class.fields.get(&name_value) {
                let base = self.stack.len() - arg_count - 1;
                self.stack[base] = field;
                return self.call_value(field, arg_count);
            }
            return Err(format!("Undefined property '{}'.", unsafe { &(*name).content }));
        }

        if is_string(&receiver) || is_list(&receiver) || is_map(&receiver) {
            let obj_type = unsafe { (*as_object(&receiver)).obj_type };
            let name_str: &str = unsafe { &(*name).content };
            let Some(method) = native_method_for(obj_type, name_str) else {
                return Err(format!("Undefined property '{}'.", name_str));
            };
            let base = self.stack.len() - arg_count;
            let args: Vec<Value> = self.stack[base..].to_vec();
            let result = method(self, receiver, name_str, &args)?;
            self.stack.truncate(base - 1);
            self.push(result);
            return Ok(());
        }

        Err("Only instances have methods.".to_string())
    }

    fn invoke_from_class(
        &mut self,
        class: *mut ObjectClass,
        name: *mut ObjectString,
        arg_count: usize,
    ) -> Result<(), String> {
        let name_value = make_object_value(name as *mut Object);
        let method = unsafe { (*class).methods.get(&name_value) };
        match method {
            Some(method) => self.call(as_object(&method) as *mut ObjectClosure, arg_count),
            None => Err(format!("Undefined property '{}'.", unsafe { &(*name).content })),
        }
    }

    fn bind_method(&mut self, class: *mut ObjectClass, name: *mut ObjectString) -> Result<(), String> {
        let name_value = make_object_value(name as *mut Object);
        let method = unsafe { (*class).methods.get(&name_value) };
        match method {
            Some(method) => {
                let closure = as_object(&method) as *mut ObjectClosure;
                let receiver = self.peek_steps(0);
                let (bound, _) = self.object_manager.alloc_bound_method(receiver, closure);
                self.pop();
                self.push(make_object_value(bound as *mut Object));
                Ok(())
            }
            None => Err(format!("Undefined property '{}'.", unsafe { &(*name).content })),
        }
    }

    /// Reuse the open upvalue watching `slot` if one exists; otherwise
    /// create one and splice it into the descending-index list.
    fn capture_upvalue(&mut self, slot: usize) -> *mut ObjectUpvalue {
        let mut insert_at = self.open_upvalues.len();
        for (i, &upvalue) in self.open_upvalues.iter().enumerate() {
            let location = unsafe { (*upvalue).location() }
                .expect("Open upvalue list holds a closed upvalue.");
            if location == slot {
                return upvalue;
            }
            if location < slot {
                insert_at = i;
                break;
            }
        }

        let (created, _) = self.object_manager.alloc_upvalue(slot);
        self.open_upvalues.insert(insert_at, created);
        created
    }

    /// Close every open upvalue watching slot `last` or above: copy the
    /// stack value into the upvalue and unlink it.
    fn close_upvalues(&mut self, last: usize) {
        while let Some(&upvalue) = self.open_upvalues.first() {
            let location = unsafe { (*upvalue).location() }
                .expect("Open upvalue list holds a closed upvalue.");
            if location < last {
                break;
            }
            let value = self.stack[location];
            unsafe {
                (*upvalue).state = UpvalueState::Closed(value);
            }
            self.open_upvalues.remove(0);
        }
    }
}

#[cfg(feature = "debug_trace_execution")]
mod debug_feature {
    use super::*;
    use crate::debug;
    use crate::value::print_value;

    pub fn trace_execution(vm: &VM) {
        print!("{: >10}", "");
        for slot in &vm.stack {
            print!(" [ ");
            print_value(slot);
            print!(" ]");
        }
        println!();
        let frame = vm.frames.last().expect("No call frame.");
        debug::disassemble_instruction(frame.chunk(), frame.ip);
    }
}

#[cfg(not(feature = "debug_trace_execution"))]
mod debug_feature {
    use super::*;

    pub fn trace_execution(_vm: &VM) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interpret(source: &str) -> InterpretResult {
        let mut vm = VM::new();
        vm.interpret(source)
    }

    fn assert_ok(source: &str) {
        assert!(interpret(source) == InterpretResult::InterpretOk, "failed: {}", source);
    }

    fn assert_runtime_error(source: &str) {
        assert!(
            interpret(source) == InterpretResult::InterpretRuntimeError,
            "expected runtime error: {}",
            source
        );
    }

    #[test]
    fn test_arithmetic_and_print() {
        assert_ok("print 1 + 2; print 3 * 4; print \"a\" + \"b\";");
        assert_ok("assert 1 + 2 == 3; assert 3 * 4 == 12;");
    }

    #[test]
    fn test_concatenation_is_interned() {
        assert_ok("assert \"a\" + \"b\" == \"ab\";");
        assert_ok("var a = \"dup\"; var b = \"du\" + \"p\"; assert a == b;");
    }

    #[test]
    fn test_while_loop() {
        assert_ok("var c = 0; while (c < 3) { print c; c = c + 1; } assert c == 3;");
    }

    #[test]
    fn test_closure_captures_local() {
        assert_ok(
            "fun mk() { var l = \"x\"; fun f() { return l; } return f; }
            assert mk()() == \"x\";",
        );
    }

    #[test]
    fn test_closures_share_an_upvalue() {
        assert_ok(
            "fun make() {
                var count = 0;
                fun inc() { count = count + 1; return count; }
                fun get() { return count; }
                return [inc, get];
            }
            var pair = make();
            var inc = pair[0];
            var get = pair[1];
            inc(); inc();
            assert get() == 2;",
        );
    }

    #[test]
    fn test_upvalue_closed_per_loop_iteration() {
        assert_ok(
            "var fns = [];
            for (var i = 0; i < 3; i = i + 1) {
                var j = i;
                fun f() { return j; }
                fns.append(f);
            }
            assert fns[0]() + fns[1]() + fns[2]() == 3;",
        );
    }

    #[test]
    fn test_instance_fields() {
        assert_ok("class P {} var p = P(); p.a = 1; p.b = 2; assert p.a + p.b == 3;");
    }

    #[test]
    fn test_inheritance_and_super() {
        assert_ok(
            "class A { m() { return \"A\"; } }
            class B < A { m() { return super.m() + \"B\"; } }
            assert B().m() == \"AB\";",
        );
    }

    #[test]
    fn test_super_invoke_with_arguments() {
        assert_ok(
            "class A { add(a, b) { return a + b; } }
            class B < A { add(a, b) { return super.add(a, b) * 10; } }
            assert B().add(1, 2) == 30;",
        );
    }

    #[test]
    fn test_initializer() {
        assert_ok(
            "class Point {
                init(x, y) { this.x = x; this.y = y; }
            }
            var p = Point(1, 2);
            assert p.x + p.y == 3;",
        );
    }

    #[test]
    fn test_constructor_arity_is_checked() {
        assert_runtime_error("class P {} P(1);");
        assert_runtime_error("class Q { init(a) {} } Q();");
    }

    #[test]
    fn test_field_defaults_are_copied_per_instance() {
        assert_ok(
            "class C { var x = 10; }
            var a = C();
            var b = C();
            a.x = 1;
            assert a.x == 1;
            assert b.x == 10;",
        );
    }

    #[test]
    fn test_inherited_field_defaults_and_override() {
        assert_ok(
            "class A { var x = 1; var y = 2; }
            class B < A { var y = 3; }
            var b = B();
            assert b.x == 1;
            assert b.y == 3;",
        );
    }

    #[test]
    fn test_class_fields_are_read_only() {
        assert_ok("class C { var x = 5; } assert C.x == 5;");
        assert_runtime_error("class C { var x = 5; } C.x = 6;");
    }

    #[test]
    fn test_list_literal_and_negative_index() {
        assert_ok("var a = [1, \"two\", 3]; assert a[-1] == 3; assert a.len() == 3;");
    }

    #[test]
    fn test_list_literals_nest() {
        assert_ok(
            "var nested = [[1, 2], [3]];
            assert nested.len() == 2;
            assert nested[0].len() == 2;
            assert nested[1][0] == 3;
            assert [].len() == 0;",
        );
    }

    #[test]
    fn test_list_native_copies_a_list() {
        assert_ok(
            "var l = [1, 2, 3];
            var copy = list(l);
            assert copy.len() == l.len();
            assert copy[0] == l[0];
            assert copy[2] == l[2];
            copy.append(4);
            assert l.len() == 3;
            assert list(1, 2).len() == 2;
            assert list(\"only\").len() == 1;",
        );
    }

    #[test]
    fn test_list_methods() {
        assert_ok(
            "var l = [1, 2];
            l.append(3);
            assert l.len() == 3;
            assert l.get(0) == 1;
            assert l.get(-1) == 3;
            assert l.remove(1) == 2;
            assert l.len() == 2;
            l[0] = 10;
            assert l[0] == 10;
            l[-1] = 30;
            assert l[1] == 30;
            l.clear();
            assert l.len() == 0;",
        );
    }

    #[test]
    fn test_list_index_out_of_range() {
        assert_runtime_error("var l = [1]; l[1];");
        assert_runtime_error("var l = [1]; l[-2];");
    }

    #[test]
    fn test_string_methods() {
        assert_ok(
            "var s = \"hello\";
            assert s.len() == 5;
            assert s[0] == \"h\";
            assert s[-1] == \"o\";
            assert s.substr(1, 3) == \"ell\";
            assert s.substr(-2, 2) == \"lo\";",
        );
        assert_runtime_error("var s = \"ro\"; s[0] = \"x\";");
    }

    #[test]
    fn test_map_native_and_methods() {
        assert_ok(
            "var m = map(\"k\", 1, \"j\", 2);
            assert m.len() == 2;
            assert m[\"k\"] == 1;
            assert m.get(\"j\") == 2;
            assert m[\"missing\"] == nil;
            m[\"new\"] = 5;
            assert m.len() == 3;
            assert m.keys().len() == 3;
            assert m.values().len() == 3;
            assert m.remove(\"new\");
            assert !m.remove(\"new\");
            assert m.len() == 2;
            var copy = map(m);
            copy.set(\"extra\", true);
            assert copy.len() == 3;
            assert m.len() == 2;",
        );
        assert_runtime_error("map(\"odd\");");
    }

    #[test]
    fn test_map_accepts_any_key_kind() {
        assert_ok(
            "var m = map();
            m[1] = \"one\";
            m[true] = \"yes\";
            m[nil] = \"none\";
            assert m[1] == \"one\";
            assert m[true] == \"yes\";
            assert m[nil] == \"none\";
            assert m.len() == 3;",
        );
    }

    #[test]
    fn test_exit_codes() {
        assert!(interpret("exit(2);") == InterpretResult::InterpretExit(2));
        assert!(interpret("exit(0);") == InterpretResult::InterpretExitOk);
    }

    #[test]
    fn test_add_type_mismatch_is_a_runtime_error() {
        assert_runtime_error("\"x\" + 1;");
    }

    #[test]
    fn test_numeric_zero_is_falsey() {
        assert_ok(
            "var hit = false;
            if (0) { hit = true; }
            assert !hit;
            if (1) { hit = true; }
            assert hit;
            assert !0;
            while (0) { assert false; }",
        );
    }

    #[test]
    fn test_compound_assignment() {
        assert_ok("var a = 10; a += 5; a -= 3; a *= 2; a /= 4; assert a == 6;");
    }

    #[test]
    fn test_property_compound_assignment() {
        assert_ok(
            "class P { init() { this.n = 10; } }
            var p = P();
            p.n += 5;
            assert p.n == 15;",
        );
    }

    #[test]
    fn test_increment_decrement() {
        assert_ok(
            "var a = 1;
            var b = a++;
            assert a == 2;
            assert b == 1;
            var c = ++a;
            assert a == 3;
            assert c == 3;
            var d = a--;
            assert d == 3;
            assert a == 2;
            --a;
            assert a == 1;",
        );
    }

    #[test]
    fn test_bitwise_operators() {
        assert_ok(
            "assert (6 & 3) == 2;
            assert (6 | 3) == 7;
            assert (6 ^ 3) == 5;
            assert (1 << 4) == 16;
            assert (32 >> 2) == 8;
            assert ~0 == -1;
            assert 7 % 3 == 1;",
        );
    }

    #[test]
    fn test_switch_dispatch() {
        assert_ok(
            "fun pick(x) {
                var out = \"\";
                switch (x) {
                    case 1: out = \"one\";
                    case 2: out = \"two\";
                    default: out = \"many\";
                }
                return out;
            }
            assert pick(1) == \"one\";
            assert pick(2) == \"two\";
            assert pick(99) == \"many\";",
        );
    }

    #[test]
    fn test_switch_without_match_or_default_is_a_noop() {
        assert_ok("var out = \"same\"; switch (5) { case 1: out = \"x\"; } assert out == \"same\";");
    }

    #[test]
    fn test_switch_with_only_default_runs_it() {
        assert_ok("var out = \"\"; switch (42) { default: out = \"d\"; } assert out == \"d\";");
    }

    #[test]
    fn test_break_and_continue() {
        assert_ok(
            "var total = 0;
            for (var i = 0; i < 10; i = i + 1) {
                if (i == 3) { continue; }
                if (i == 6) { break; }
                total = total + i;
            }
            assert total == 12;",
        );
    }

    #[test]
    fn test_break_in_nested_loops() {
        assert_ok(
            "var hits = 0;
            for (var i = 0; i < 3; i = i + 1) {
                var j = 0;
                while (true) {
                    j = j + 1;
                    if (j == 2) { break; }
                }
                hits = hits + j;
            }
            assert hits == 6;",
        );
    }

    #[test]
    fn test_break_inside_switch_leaves_the_switch() {
        assert_ok(
            "var log = \"\";
            for (var i = 0; i < 3; i = i + 1) {
                switch (i) {
                    case 1: log = log + \"b\"; break;
                    default: log = log + \"a\";
                }
            }
            assert log == \"aba\";",
        );
    }

    #[test]
    fn test_continue_across_a_switch() {
        assert_ok(
            "var total = 0;
            for (var i = 0; i < 5; i = i + 1) {
                switch (i % 2) {
                    case 0: continue;
                    default: total = total + i;
                }
            }
            assert total == 4;",
        );
    }

    #[test]
    fn test_stack_overflow() {
        assert_runtime_error("fun f() { f(); } f();");
    }

    #[test]
    fn test_undefined_variables() {
        assert_runtime_error("print missing;");
        assert_runtime_error("missing = 1;");
    }

    #[test]
    fn test_undefined_property() {
        assert_runtime_error("class P {} P().missing;");
        assert_runtime_error("[1].missing();");
    }

    #[test]
    fn test_assert_statement() {
        assert_ok("assert 1 == 1;");
        assert_runtime_error("assert 0;");
        assert_runtime_error("assert false;");
    }

    #[test]
    fn test_division_and_modulo_by_zero() {
        assert_runtime_error("1 / 0;");
        assert_runtime_error("1 % 0;");
        assert_ok("assert 1 / 2 == 0.5;");
    }

    #[test]
    fn test_call_of_non_callable() {
        assert_runtime_error("var x = 1; x();");
        assert_runtime_error("\"s\"();");
    }

    #[test]
    fn test_str_native_and_idempotence() {
        assert_ok(
            "assert str(12) == \"12\";
            assert str(true) == \"true\";
            assert str(nil) == \"nil\";
            assert str(\"s\") == \"s\";
            assert str(str(12.5)) == str(12.5);
            assert str([1, 2]) == \"[1, 2]\";",
        );
    }

    #[test]
    fn test_number_native() {
        assert_ok(
            "assert number(\"42\") == 42;
            assert number(\"3.5\") == 3.5;
            assert number(true) == 1;
            assert number(false) == 0;
            assert number(nil) == 0;
            assert number(12) == 12;",
        );
        assert_runtime_error("number(\"not a number\");");
    }

    #[test]
    fn test_is_native() {
        assert_ok(
            "assert is(\"s\", str);
            assert is([1], list);
            assert is(map(), map);
            assert is(1, number);
            assert is(nil, nil);
            assert !is(1, str);
            assert !is(\"s\", number);
            class P {}
            class Q < P {}
            var q = Q();
            assert is(q, Q);
            assert is(q, P);
            assert !is(P(), Q);",
        );
    }

    #[test]
    fn test_field_natives() {
        assert_ok(
            "class P {}
            var p = P();
            set_field(p, \"a\", 5);
            assert has_field(p, \"a\");
            assert !has_field(p, \"b\");
            assert get_field(p, \"a\") == 5;
            assert get_field(p, \"b\") == nil;
            assert p.a == 5;",
        );
        assert_runtime_error("has_field(1, \"a\");");
    }

    #[test]
    fn test_sys_version_and_clock() {
        assert_ok(
            "assert is(sys_version(), str);
            assert is(clock(), number);
            assert clock() >= 0;",
        );
    }

    #[test]
    fn test_bound_method_keeps_its_receiver() {
        assert_ok(
            "class Counter {
                init() { this.n = 0; }
                bump() { this.n = this.n + 1; return this.n; }
            }
            var c = Counter();
            var bump = c.bump;
            bump(); bump();
            assert c.n == 2;",
        );
    }

    #[test]
    fn test_bound_native_method_as_a_value() {
        assert_ok(
            "var l = [1, 2];
            var push = l.append;
            push(3);
            assert l.len() == 3;",
        );
    }

    #[test]
    fn test_fields_shadow_methods_on_invoke() {
        assert_ok(
            "class C { m() { return \"method\"; } }
            fun f() { return \"field\"; }
            var c = C();
            assert c.m() == \"method\";
            c.m = f;
            assert c.m() == \"field\";",
        );
    }

    #[test]
    fn test_recursion() {
        assert_ok(
            "fun fib(n) { if (n < 2) { return n; } return fib(n - 1) + fib(n - 2); }
            assert fib(10) == 55;",
        );
    }

    #[test]
    fn test_eprint() {
        assert_ok("eprint \"to stderr\";");
    }

    #[test]
    fn test_globals_persist_across_interpret_calls() {
        let mut vm = VM::new();
        assert!(vm.interpret("var a = 1;") == InterpretResult::InterpretOk);
        assert!(vm.interpret("assert a == 1;") == InterpretResult::InterpretOk);
    }

    #[test]
    fn test_stack_is_balanced_after_ok() {
        let mut vm = VM::new();
        let result = vm.interpret("var x = 1; { var y = 2; print y; } print x;");
        assert!(result == InterpretResult::InterpretOk);
        assert!(vm.stack.is_empty());
    }

    #[test]
    fn test_long_constant_pool_at_runtime() {
        let mut source = String::from("var total = 0.5");
        for i in 1..300 {
            source.push_str(&format!(" + {}.5", i));
        }
        source.push_str("; assert total == 45000;");
        assert_ok(&source);
    }

    #[test]
    fn test_gc_runs_during_execution() {
        let mut vm = VM::new();
        let result = vm.interpret(
            "var s = \"\";
            for (var i = 0; i < 400; i = i + 1) {
                s = s + \"0123456789abcdef0123456789abcdef\";
            }
            assert s.len() == 12800;",
        );
        assert!(result == InterpretResult::InterpretOk);
        // The throwaway intermediate strings push the heap past the first
        // threshold, so at least one cycle must have run.
        assert!(vm.gc.stats().cycles >= 1);
    }

    #[test]
    fn test_argv_and_env_bindings() {
        let mut vm = VM::new();
        vm.set_argv(&["one".to_string(), "two".to_string()]);
        vm.inherit_env();
        let result = vm.interpret(
            "assert argc == 2;
            assert argv[0] == \"one\";
            assert argv[1] == \"two\";
            assert is(env, map);",
        );
        assert!(result == InterpretResult::InterpretOk);
    }

    #[test]
    fn test_logical_operators_short_circuit() {
        assert_ok(
            "var calls = 0;
            fun bump() { calls = calls + 1; return true; }
            var a = false and bump();
            assert calls == 0;
            assert !a;
            var b = true or bump();
            assert calls == 0;
            assert b;
            var c = true and bump();
            assert calls == 1;
            assert c;",
        );
    }
}
