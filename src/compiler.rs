use crate::chunk::{Chunk, OpCode};
use crate::objects::object_function::ObjectFunction;
use crate::objects::object_manager::ObjectManager;
use crate::scanner::{Scanner, Token, TokenType};
use crate::table::Table;
use crate::value::{make_number_value, make_object_value, make_string_value, Value};
use std::io::Write;
use std::mem;

pub struct Parser<'a> {
    current: Token<'a>,
    previous: Token<'a>,
    scanner: Option<Box<Scanner<'a>>>,
    has_error: bool,
    panic_mode: bool,
    compilers: Vec<Compiler<'a>>,
    class_contexts: Vec<ClassContext>,
    loops: Vec<LoopContext>,
    object_manager: &'a mut ObjectManager,
    intern_strings: &'a mut Table,
}

struct Local<'a> {
    name: Token<'a>,
    depth: i32,
    is_captured: bool,
}

#[derive(Clone)]
struct Upvalue {
    index: usize,
    is_local: bool,
}

#[derive(Clone, Copy, PartialEq)]
enum FunctionType {
    Function,
    Initializer,
    Method,
    Script,
}

struct ClassContext {
    has_superclass: bool,
}

#[derive(Clone, Copy, PartialEq)]
enum ContextKind {
    Loop,
    Switch,
}

/// Per-construct bookkeeping for `break`/`continue`: where `continue` jumps
/// back to, the scope depth whose locals survive the jump, and the forward
/// jumps `break` leaves to be patched at the end. A `switch` is breakable
/// but not continuable, and keeps its scrutinee on the stack, which
/// `continue` has to pop when jumping across it.
struct LoopContext {
    kind: ContextKind,
    start: usize,
    scope_depth: i32,
    break_jumps: Vec<usize>,
}

struct Compiler<'a> {
    function: Box<ObjectFunction>,
    function_type: FunctionType,
    locals: Vec<Local<'a>>,
    upvalues: Vec<Upvalue>,
    scope_depth: i32,
}

impl<'a> Compiler<'a> {
    pub fn new(function_type: FunctionType) -> Self {
        Compiler {
            function: Box::new(ObjectFunction::new(0, String::new())),
            function_type,
            locals: vec![],
            upvalues: vec![],
            scope_depth: 0,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + - & | ^ << >>
    Factor,     // * / %
    Unary,      // ! - ~
    Call,       // . () []
    Primary,
}

impl From<u8> for Precedence {
    fn from(value: u8) -> Self {
        match value {
            0 => Precedence::None,
            1 => Precedence::Assignment,
            2 => Precedence::Or,
            3 => Precedence::And,
            4 => Precedence::Equality,
            5 => Precedence::Comparison,
            6 => Precedence::Term,
            7 => Precedence::Factor,
            8 => Precedence::Unary,
            9 => Precedence::Call,
            10 => Precedence::Primary,
            _ => unreachable!("Invalid precedence value: {}", value),
        }
    }
}

type ParserFn = fn(&mut Parser<'_>, bool);

#[derive(Debug, Clone, Copy)]
struct ParseRule {
    prefix: Option<ParserFn>,
    infix: Option<ParserFn>,
    precedence: Precedence,
}

impl ParseRule {
    const fn new(
        prefix: Option<ParserFn>,
        infix: Option<ParserFn>,
        precedence: Precedence,
    ) -> Self {
        ParseRule {
            prefix,
            infix,
            precedence,
        }
    }
}

const RULES: [ParseRule; TokenType::Eof as usize + 1] = {
    let mut rules = [ParseRule::new(None, None, Precedence::None); TokenType::Eof as usize + 1];

    rules[TokenType::LeftParen as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.grouping()),
        Some(|parser, can_assign| parser.call(can_assign)),
        Precedence::Call,
    );

    rules[TokenType::LeftBracket as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.list_literal()),
        Some(|parser, can_assign| parser.subscript(can_assign)),
        Precedence::Call,
    );

    rules[TokenType::Dot as usize] = ParseRule::new(
        None,
        Some(|parser, can_assign| parser.dot(can_assign)),
        Precedence::Call,
    );

    rules[TokenType::Minus as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.unary()),
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Term,
    );

    rules[TokenType::Plus as usize] =
        ParseRule::new(None, Some(|parser, _can_assign| parser.binary()), Precedence::Term);

    rules[TokenType::Slash as usize] =
        ParseRule::new(None, Some(|parser, _can_assign| parser.binary()), Precedence::Factor);

    rules[TokenType::Star as usize] =
        ParseRule::new(None, Some(|parser, _can_assign| parser.binary()), Precedence::Factor);

    rules[TokenType::Percent as usize] =
        ParseRule::new(None, Some(|parser, _can_assign| parser.binary()), Precedence::Factor);

    rules[TokenType::Amp as usize] =
        ParseRule::new(None, Some(|parser, _can_assign| parser.binary()), Precedence::Term);

    rules[TokenType::Pipe as usize] =
        ParseRule::new(None, Some(|parser, _can_assign| parser.binary()), Precedence::Term);

    rules[TokenType::Caret as usize] =
        ParseRule::new(None, Some(|parser, _can_assign| parser.binary()), Precedence::Term);

    rules[TokenType::LessLess as usize] =
        ParseRule::new(None, Some(|parser, _can_assign| parser.binary()), Precedence::Term);

    rules[TokenType::GreaterGreater as usize] =
        ParseRule::new(None, Some(|parser, _can_assign| parser.binary()), Precedence::Term);

    rules[TokenType::Tilde as usize] =
        ParseRule::new(Some(|parser, _can_assign| parser.unary()), None, Precedence::None);

    rules[TokenType::Bang as usize] =
        ParseRule::new(Some(|parser, _can_assign| parser.unary()), None, Precedence::None);

    rules[TokenType::BangEqual as usize] =
        ParseRule::new(None, Some(|parser, _can_assign| parser.binary()), Precedence::Equality);

    rules[TokenType::EqualEqual as usize] =
        ParseRule::new(None, Some(|parser, _can_assign| parser.binary()), Precedence::Equality);

    rules[TokenType::Greater as usize] =
        ParseRule::new(None, Some(|parser, _can_assign| parser.binary()), Precedence::Comparison);

    rules[TokenType::GreaterEqual as usize] =
        ParseRule::new(None, Some(|parser, _can_assign| parser.binary()), Precedence::Comparison);

    rules[TokenType::Less as usize] =
        ParseRule::new(None, Some(|parser, _can_assign| parser.binary()), Precedence::Comparison);

    rules[TokenType::LessEqual as usize] =
        ParseRule::new(None, Some(|parser, _can_assign| parser.binary()), Precedence::Comparison);

    rules[TokenType::Number as usize] =
        ParseRule::new(Some(|parser, _can_assign| parser.number()), None, Precedence::None);

    rules[TokenType::String as usize] =
        ParseRule::new(Some(|parser, _can_assign| parser.string()), None, Precedence::None);

    rules[TokenType::False as usize] =
        ParseRule::new(Some(|parser, _can_assign| parser.literal()), None, Precedence::None);

    rules[TokenType::True as usize] =
        ParseRule::new(Some(|parser, _can_assign| parser.literal()), None, Precedence::None);

    rules[TokenType::Nil as usize] =
        ParseRule::new(Some(|parser, _can_assign| parser.literal()), None, Precedence::None);

    rules[TokenType::Identifier as usize] = ParseRule::new(
        Some(|parser, can_assign| parser.variable(can_assign)),
        None,
        Precedence::None,
    );

    rules[TokenType::And as usize] = ParseRule::new(
        None,
        Some(|parser, can_assign| parser.and(can_assign)),
        Precedence::And,
    );

    rules[TokenType::Or as usize] = ParseRule::new(
        None,
        Some(|parser, can_assign| parser.or(can_assign)),
        Precedence::Or,
    );

    rules[TokenType::This as usize] =
        ParseRule::new(Some(|parser, _can_assign| parser.this()), None, Precedence::None);

    rules[TokenType::Super as usize] =
        ParseRule::new(Some(|parser, _can_assign| parser.super_()), None, Precedence::None);

    rules[TokenType::PlusPlus as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.prefix_incdec(false)),
        None,
        Precedence::None,
    );

    rules[TokenType::MinusMinus as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.prefix_incdec(true)),
        None,
        Precedence::None,
    );

    rules
};

impl<'a> Parser<'a> {
    pub fn new(object_manager: &'a mut ObjectManager, intern_strings: &'a mut Table) -> Box<Parser<'a>> {
        let mut parser = Box::new(Parser {
            current: Token {
                token_type: TokenType::Eof,
                value: "",
                line: 0,
            },
            previous: Token {
                token_type: TokenType::Eof,
                value: "",
                line: 0,
            },
            scanner: None,
            has_error: false,
            panic_mode: false,
            compilers: vec![],
            class_contexts: vec![],
            loops: vec![],
            object_manager,
            intern_strings,
        });
        parser.init_compiler(FunctionType::Script);
        parser
    }

    pub fn compile(&mut self, source: &'a str) -> Option<Box<ObjectFunction>> {
        self.scanner = Some(Scanner::new(source));
        self.current = Token {
            token_type: TokenType::Eof,
            value: "",
            line: 0,
        };
        self.previous = Token {
            token_type: TokenType::Eof,
            value: "",
            line: 0,
        };

        self.advance();

        while !self.match_token(TokenType::Eof) {
            self.declaration();
        }

        let function = self.end_compiler();
        if self.has_error {
            None
        } else {
            Some(function)
        }
    }

    fn specific_compiler(&self, compiler_index: usize) -> &Compiler<'a> {
        self.compilers.get(compiler_index).expect("compiler index is invalid.")
    }

    fn specific_compiler_mut(&mut self, compiler_index: usize) -> &mut Compiler<'a> {
        self.compilers.get_mut(compiler_index).expect("compiler index is invalid.")
    }

    fn current_compiler(&self) -> &Compiler<'a> {
        self.compilers.last().expect("No compiler.")
    }

    fn current_compiler_mut(&mut self) -> &mut Compiler<'a> {
        self.compilers.last_mut().expect("No compiler.")
    }

    fn current_function(&self) -> &ObjectFunction {
        &self.current_compiler().function
    }

    fn current_function_mut(&mut self) -> &mut ObjectFunction {
        &mut self.current_compiler_mut().function
    }

    fn current_chunk(&self) -> &Chunk {
        &self.current_function().chunk
    }

    fn current_chunk_mut(&mut self) -> &mut Chunk {
        &mut self.current_function_mut().chunk
    }

    fn current_locals(&self) -> &Vec<Local<'a>> {
        &self.current_compiler().locals
    }

    fn current_locals_mut(&mut self) -> &mut Vec<Local<'a>> {
        &mut self.current_compiler_mut().locals
    }

    fn advance(&mut self) {
        self.previous = self.current.clone();
        loop {
            if let Some(scanner) = &mut self.scanner {
                self.current = scanner.scan_token();
                if self.current.token_type != TokenType::Error {
                    break;
                }

                self.error_at_current(self.current.value);
            } else {
                panic!("Compiler was not initialized correctly.");
            }
        }
    }

    fn match_token(&mut self, token_type: TokenType) -> bool {
        if !self.check(token_type) {
            return false;
        }

        self.advance();
        true
    }

    fn check(&self, token_type: TokenType) -> bool {
        self.current.token_type == token_type
    }

    fn consume(&mut self, token_type: TokenType, message: &str) {
        if self.current.token_type == token_type {
            self.advance();
            return;
        }

        self.error_at_current(message);
    }

    fn synthetic_token(token_type: TokenType, value: &'static str) -> Token<'a> {
        Token {
            token_type,
            value,
            line: 0,
        }
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.current_chunk_mut().write(byte, line);
    }

    fn emit_bytes(&mut self, byte1: u8, byte2: u8) {
        self.emit_byte(byte1);
        self.emit_byte(byte2);
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        if index <= u8::MAX as usize {
            self.emit_bytes(OpCode::Constant.to_byte(), index as u8);
        } else if index <= 0x00ff_ffff {
            self.emit_byte(OpCode::ConstantLong.to_byte());
            self.emit_byte((index & 0xff) as u8);
            self.emit_byte(((index >> 8) & 0xff) as u8);
            self.emit_byte(((index >> 16) & 0xff) as u8);
        } else {
            self.error("Too many constants in one chunk.");
        }
    }

    fn emit_return(&mut self) {
        if self.current_compiler().function_type == FunctionType::Initializer {
            self.emit_bytes(OpCode::GetLocal.to_byte(), 0);
        } else {
            self.emit_byte(OpCode::Nil.to_byte());
        }
        self.emit_byte(OpCode::Return.to_byte());
    }

    fn init_compiler(&mut self, function_type: FunctionType) {
        let mut compiler = Compiler::new(function_type);
        // When compiling a function declaration, init_compiler() runs right
        // after the function's name was parsed, so the name is the previous
        // token.
        if function_type != FunctionType::Script {
            compiler.function.name = self.previous.value.to_string();
        }

        // Stack slot zero holds the function being called; in methods it is
        // the receiver and resolves as 'this'.
        let slot_zero = match function_type {
            FunctionType::Method | FunctionType::Initializer => {
                Self::synthetic_token(TokenType::This, "this")
            }
            _ => Self::synthetic_token(TokenType::Eof, ""),
        };
        compiler.locals.push(Local {
            name: slot_zero,
            depth: 0,
            is_captured: false,
        });
        self.compilers.push(compiler);
    }

    fn end_compiler(&mut self) -> Box<ObjectFunction> {
        self.emit_return();

        if self.current_function().name.is_empty() {
            debug_feature::disassemble_chunk(self, "<script>");
        } else {
            let function_name = self.current_function().name.clone();
            debug_feature::disassemble_chunk(self, &function_name);
        }

        let function = mem::replace(
            &mut self.current_compiler_mut().function,
            Box::new(ObjectFunction::new(0, "".to_string())),
        );
        self.compilers.pop();
        function
    }

    fn make_constant(&mut self, value: Value) -> usize {
        if let Some(index) = self.current_chunk().find_constant(&value) {
            return index;
        }

        self.current_chunk_mut().add_constant(value)
    }

    fn make_constant_u8(&mut self, value: Value) -> u8 {
        let index = self.make_constant(value);
        if index > u8::MAX as usize {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        index as u8
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let value = make_string_value(&mut self.object_manager, &mut self.intern_strings, name);
        self.make_constant_u8(value)
    }

    fn number(&mut self) {
        let value = match self.previous.value.parse::<f64>() {
            Ok(num) => num,
            Err(_) => 0.0,
        };
        self.emit_constant(make_number_value(value));
    }

    fn string(&mut self) {
        // The + 1 and - 1 trim the leading and trailing quotation marks.
        let content = &self.previous.value[1..self.previous.value.len() - 1];
        let value = make_string_value(&mut self.object_manager, &mut self.intern_strings, content);
        self.emit_constant(value);
    }

    fn declaration(&mut self) {
        if self.match_token(TokenType::Var) {
            self.variable_declaration();
        } else if self.match_token(TokenType::Fun) {
            self.function_declaration();
        } else if self.match_token(TokenType::Class) {
            self.class_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn variable_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");

        if self.match_token(TokenType::Equal) {
            self.expression();
        } else {
            self.emit_byte(OpCode::Nil.to_byte());
        }
        self.consume(TokenType::Semicolon, "Expect ';' after variable declaration.");

        self.define_variable(global);
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenType::Identifier, message);

        self.declare_variable();
        if self.current_compiler().scope_depth > 0 {
            return 0;
        }
        let name = self.previous.value;
        self.identifier_constant(name)
    }

    fn declare_variable(&mut self) {
        if self.current_compiler().scope_depth == 0 {
            // Globals are late-bound; nothing to track here.
            return;
        }

        let mut err = false;
        let variable_name = self.previous.clone();
        let scope_depth = self.current_compiler().scope_depth;
        for local in self.current_locals().iter().rev() {
            if local.depth != -1 && local.depth < scope_depth {
                break;
            }

            if Self::identifier_equal(&variable_name, &local.name) {
                err = true;
                break;
            }
        }
        if err {
            self.error("Already a variable with this name in this scope.");
        }

        self.add_local(variable_name);
    }

    fn add_local(&mut self, variable_name: Token<'a>) {
        if self.current_locals().len() >= u8::MAX as usize + 1 {
            self.error("Too many local variables in function.");
            return;
        }

        // Depth -1 marks the variable as declared but not yet initialized;
        // mark_initialized() fills in the real depth once the initializer
        // has been compiled.
        self.current_locals_mut().push(Local {
            name: variable_name,
            depth: -1,
            is_captured: false,
        });
    }

    fn function_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        self.mark_initialized();
        self.function(FunctionType::Function);
        self.define_variable(global);
    }

    fn function(&mut self, function_type: FunctionType) {
        self.init_compiler(function_type);

        self.begin_scope();
        self.consume(TokenType::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenType::RightParen) {
            loop {
                if self.current_function().arity == u8::MAX {
                    self.error_at_current("Can't have more than 255 parameters.");
                } else {
                    self.current_function_mut().arity += 1;
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);

                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expect ')' after parameters.");
        self.consume(TokenType::LeftBrace, "Expect '{' before function body.");
        self.block();

        let upvalues = self.current_compiler().upvalues.clone();

        let function = self.end_compiler();
        let function_ptr = self.object_manager.adopt_function(function);
        let constant =
            self.make_constant_u8(make_object_value(function_ptr as *mut crate::objects::object::Object));
        self.emit_bytes(OpCode::Closure.to_byte(), constant);

        for upvalue in upvalues.iter() {
            self.emit_byte(if upvalue.is_local { 1 } else { 0 });
            self.emit_byte(upvalue.index as u8);
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenType::Identifier, "Expect class name.");
        let class_name = self.previous.clone();
        let name_constant = self.identifier_constant(class_name.value);
        self.declare_variable();
        self.emit_bytes(OpCode::Class.to_byte(), name_constant);
        self.define_variable(name_constant);

        self.class_contexts.push(ClassContext {
            has_superclass: false,
        });

        if self.match_token(TokenType::Less) {
            self.consume(TokenType::Identifier, "Expect superclass name.");
            self.variable(false);
            if Self::identifier_equal(&class_name, &self.previous) {
                self.error("A class can't inherit from itself.");
            }

            // The superclass lives in a hidden local named 'super' wrapping
            // the class body, which is what 'super' expressions resolve to.
            self.begin_scope();
            self.add_local(Self::synthetic_token(TokenType::Super, "super"));
            self.define_variable(0);

            self.named_variable(class_name.clone(), false);
            self.emit_byte(OpCode::Inherit.to_byte());
            self.class_contexts
                .last_mut()
                .expect("No class context.")
                .has_superclass = true;
        }

        self.named_variable(class_name, false);
        self.consume(TokenType::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenType::RightBrace) && !self.check(TokenType::Eof) {
            if self.match_token(TokenType::Var) {
                self.field_declaration();
            } else {
                self.method();
            }
        }
        self.consume(TokenType::RightBrace, "Expect '}' after class body.");
        self.emit_byte(OpCode::Pop.to_byte());

        if self.class_contexts.last().expect("No class context.").has_superclass {
            self.end_scope();
        }
        self.class_contexts.pop();
    }

    fn method(&mut self) {
        self.consume(TokenType::Identifier, "Expect method name.");
        let name = self.previous.value;
        let name_constant = self.identifier_constant(name);
        let function_type = if name == "init" {
            FunctionType::Initializer
        } else {
            FunctionType::Method
        };
        self.function(function_type);
        self.emit_bytes(OpCode::Method.to_byte(), name_constant);
    }

    fn field_declaration(&mut self) {
        self.consume(TokenType::Identifier, "Expect field name.");
        let name_constant = self.identifier_constant(self.previous.value);
        if self.match_token(TokenType::Equal) {
            self.expression();
        } else {
            self.emit_byte(OpCode::Nil.to_byte());
        }
        self.consume(TokenType::Semicolon, "Expect ';' after field declaration.");
        self.emit_bytes(OpCode::Field.to_byte(), name_constant);
    }

    fn argument_list(&mut self) -> u8 {
        let mut argument_count = 0;
        if !self.check(TokenType::RightParen) {
            loop {
                self.expression();
                if argument_count >= 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                argument_count += 1;

                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expect ')' after arguments.");
        argument_count
    }

    fn define_variable(&mut self, global: u8) {
        // > 0 means a local variable
        if self.current_compiler().scope_depth > 0 {
            self.mark_initialized();
            return;
        }

        self.emit_bytes(OpCode::DefineGlobal.to_byte(), global);
    }

    fn mark_initialized(&mut self) {
        let scope_depth = self.current_compiler().scope_depth;
        if scope_depth == 0 {
            return;
        }

        self.current_locals_mut()
            .last_mut()
            .expect("No local to initialize.")
            .depth = scope_depth;
    }

    fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.previous.clone(), can_assign)
    }

    /// Resolution order: current function's locals, then enclosing
    /// functions' upvalues, then a late-bound global.
    fn resolve_variable(&mut self, name: &Token<'a>) -> (OpCode, OpCode, u8) {
        let current_compiler_index = self.compilers.len() - 1;
        let mut index = self.resolve_local(current_compiler_index, name);
        if index != -1 {
            return (OpCode::GetLocal, OpCode::SetLocal, index as u8);
        }

        index = self.resolve_upvalue(current_compiler_index, name);
        if index != -1 {
            return (OpCode::GetUpvalue, OpCode::SetUpvalue, index as u8);
        }

        let constant = self.identifier_constant(name.value);
        (OpCode::GetGlobal, OpCode::SetGlobal, constant)
    }

    fn named_variable(&mut self, name: Token<'a>, can_assign: bool) {
        let (get_op, set_op, slot) = self.resolve_variable(&name);

        if can_assign && self.match_token(TokenType::Equal) {
            self.expression();
            self.emit_bytes(set_op.to_byte(), slot);
        } else if can_assign && self.check_compound_assign() {
            let op = self.compound_assign_op();
            self.emit_bytes(get_op.to_byte(), slot);
            self.expression();
            self.emit_byte(op.to_byte());
            self.emit_bytes(set_op.to_byte(), slot);
        } else if can_assign && self.match_token(TokenType::PlusPlus) {
            self.postfix_incdec(get_op, set_op, slot, OpCode::Add);
        } else if can_assign && self.match_token(TokenType::MinusMinus) {
            self.postfix_incdec(get_op, set_op, slot, OpCode::Subtract);
        } else {
            self.emit_bytes(get_op.to_byte(), slot);
        }
    }

    fn check_compound_assign(&self) -> bool {
        matches!(
            self.current.token_type,
            TokenType::PlusEqual | TokenType::MinusEqual | TokenType::StarEqual | TokenType::SlashEqual
        )
    }

    fn compound_assign_op(&mut self) -> OpCode {
        let op = match self.current.token_type {
            TokenType::PlusEqual => OpCode::Add,
            TokenType::MinusEqual => OpCode::Subtract,
            TokenType::StarEqual => OpCode::Multiply,
            TokenType::SlashEqual => OpCode::Divide,
            _ => unreachable!("Expect compound assignment operator."),
        };
        self.advance();
        op
    }

    /// `x++` leaves the old value behind: duplicate, bump, store, drop the
    /// stored copy.
    fn postfix_incdec(&mut self, get_op: OpCode, set_op: OpCode, slot: u8, op: OpCode) {
        self.emit_bytes(get_op.to_byte(), slot);
        self.emit_byte(OpCode::Dup.to_byte());
        self.emit_constant(make_number_value(1.0));
        self.emit_byte(op.to_byte());
        self.emit_bytes(set_op.to_byte(), slot);
        self.emit_byte(OpCode::Pop.to_byte());
    }

    /// `++x` / `--x`: bump first, the new value is the expression result.
    fn prefix_incdec(&mut self, decrement: bool) {
        let message = if decrement {
            "Expect variable name after '--'."
        } else {
            "Expect variable name after '++'."
        };
        self.consume(TokenType::Identifier, message);
        let name = self.previous.clone();
        let (get_op, set_op, slot) = self.resolve_variable(&name);

        self.emit_bytes(get_op.to_byte(), slot);
        self.emit_constant(make_number_value(1.0));
        self.emit_byte(if decrement {
            OpCode::Subtract.to_byte()
        } else {
            OpCode::Add.to_byte()
        });
        self.emit_bytes(set_op.to_byte(), slot);
    }

    fn resolve_local(&mut self, compiler_index: usize, name: &Token) -> i32 {
        let mut uninitialized = false;
        let mut found: i32 = -1;
        {
            let compiler = self.specific_compiler(compiler_index);
            for (index, local) in compiler.locals.iter().enumerate().rev() {
                if Self::identifier_equal(name, &local.name) {
                    if local.depth == -1 {
                        uninitialized = true;
                    }
                    found = index as i32;
                    break;
                }
            }
        }

        if uninitialized {
            self.error("Can't read local variable in its own initializer.");
        }
        found
    }

    fn identifier_equal(left: &Token, right: &Token) -> bool {
        left.value == right.value
    }

    fn resolve_upvalue(&mut self, compiler_index: usize, name: &Token) -> i32 {
        if compiler_index == 0 {
            return -1;
        }
        let local = self.resolve_local(compiler_index - 1, name);
        if local != -1 {
            self.specific_compiler_mut(compiler_index - 1).locals[local as usize].is_captured = true;
            return self.add_upvalue(compiler_index, local, true) as i32;
        }

        let upvalue = self.resolve_upvalue(compiler_index - 1, name);
        if upvalue != -1 {
            return self.add_upvalue(compiler_index, upvalue, false) as i32;
        }

        -1
    }

    fn add_upvalue(&mut self, compiler_index: usize, local: i32, is_local: bool) -> usize {
        {
            let compiler = self.specific_compiler(compiler_index);
            for (index, upvalue) in compiler.upvalues.iter().enumerate() {
                if upvalue.is_local == is_local && upvalue.index == local as usize {
                    return index;
                }
            }
        }

        if self.specific_compiler(compiler_index).upvalues.len() > u8::MAX as usize {
            self.error("Too many closure variables in function.");
            return 0;
        }

        let compiler = self.specific_compiler_mut(compiler_index);
        compiler.upvalues.push(Upvalue {
            index: local as usize,
            is_local,
        });
        compiler.function.upvalue_count = compiler.upvalues.len();
        compiler.function.upvalue_count - 1
    }

    fn and(&mut self, _can_assign: bool) {
        let jump_offset_operand = self.emit_jump_bytes(OpCode::JumpIfFalse.to_byte());
        self.emit_byte(OpCode::Pop.to_byte());
        self.parse_precedence(Precedence::And);
        self.patch_jump_offset(jump_offset_operand);
    }

    fn or(&mut self, _can_assign: bool) {
        let else_jump_offset_operand = self.emit_jump_bytes(OpCode::JumpIfFalse.to_byte());
        let end_jump_offset_operand = self.emit_jump_bytes(OpCode::Jump.to_byte());

        self.patch_jump_offset(else_jump_offset_operand);
        self.emit_byte(OpCode::Pop.to_byte());
        self.parse_precedence(Precedence::Or);
        self.patch_jump_offset(end_jump_offset_operand);
    }

    fn statement(&mut self) {
        if self.match_token(TokenType::If) {
            self.if_statement();
        } else if self.match_token(TokenType::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else if self.match_token(TokenType::While) {
            self.while_statement();
        } else if self.match_token(TokenType::For) {
            self.for_statement();
        } else if self.match_token(TokenType::Switch) {
            self.switch_statement();
        } else if self.match_token(TokenType::Break) {
            self.break_statement();
        } else if self.match_token(TokenType::Continue) {
            self.continue_statement();
        } else if self.match_token(TokenType::Return) {
            self.return_statement();
        } else if self.match_token(TokenType::Print) {
            self.print_statement();
        } else if self.match_token(TokenType::Eprint) {
            self.eprint_statement();
        } else if self.match_token(TokenType::Exit) {
            self.exit_statement();
        } else if self.match_token(TokenType::Assert) {
            self.assert_statement();
        } else {
            self.expression_statement();
        }
    }

    fn if_statement(&mut self) {
        self.consume(TokenType::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenType::RightParen, "Expect ')' after condition.");

        let jump_offset_operand = self.emit_jump_bytes(OpCode::JumpIfFalse.to_byte());
        self.emit_byte(OpCode::Pop.to_byte()); // pop the condition result
        self.statement();

        let else_jump_offset_operand = self.emit_jump_bytes(OpCode::Jump.to_byte());
        self.patch_jump_offset(jump_offset_operand);
        self.emit_byte(OpCode::Pop.to_byte()); // same pop on the false path

        if self.match_token(TokenType::Else) {
            self.statement();
        }
        self.patch_jump_offset(else_jump_offset_operand);
    }

    fn emit_jump_bytes(&mut self, instruction: u8) -> usize {
        self.emit_byte(instruction);
        // use two bytes for the jump offset operand
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.current_chunk().len() - 2
    }

    fn patch_jump_offset(&mut self, offset: usize) {
        // -2 to adjust for the bytecode for the jump offset itself.
        let jump_offset = self.current_chunk().len() - offset - 2;
        if jump_offset > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }

        let current_chunk = self.current_chunk_mut();
        current_chunk.write_by_offset(offset, ((jump_offset >> 8) & 0xff) as u8);
        current_chunk.write_by_offset(offset + 1, (jump_offset & 0xff) as u8);
    }

    fn begin_scope(&mut self) {
        self.current_compiler_mut().scope_depth += 1
    }

    fn end_scope(&mut self) {
        self.current_compiler_mut().scope_depth -= 1;
        let scope_depth = self.current_compiler().scope_depth;

        let mut leaving = vec![];
        {
            let locals = self.current_locals_mut();
            while let Some(local) = locals.last() {
                if local.depth <= scope_depth {
                    break;
                }
                leaving.push(local.is_captured);
                locals.pop();
            }
        }
        self.emit_scope_exit(&leaving);
    }

    /// Pop a run of leaving locals (top of stack first), closing the
    /// captured ones instead of discarding them.
    fn emit_scope_exit(&mut self, leaving: &[bool]) {
        let mut pending: usize = 0;
        for &is_captured in leaving {
            if is_captured {
                self.flush_pops(pending);
                pending = 0;
                self.emit_byte(OpCode::CloseUpvalue.to_byte());
            } else {
                pending += 1;
            }
        }
        self.flush_pops(pending);
    }

    fn flush_pops(&mut self, count: usize) {
        if count == 1 {
            self.emit_byte(OpCode::Pop.to_byte());
        } else if count > 1 {
            self.emit_bytes(OpCode::PopN.to_byte(), count as u8);
        }
    }

    /// Emit pops for every local deeper than `depth` without forgetting
    /// them; `break`/`continue` leave the scope at run time but the code
    /// after the loop still sees the locals.
    fn discard_locals(&mut self, depth: i32) {
        let leaving: Vec<bool> = self
            .current_locals()
            .iter()
            .rev()
            .take_while(|local| local.depth > depth)
            .map(|local| local.is_captured)
            .collect();
        self.emit_scope_exit(&leaving);
    }

    fn block(&mut self) {
        while !self.check(TokenType::RightBrace) && !self.check(TokenType::Eof) {
            self.declaration();
        }

        self.consume(TokenType::RightBrace, "Expect '}' after block.");
    }

    fn return_statement(&mut self) {
        if self.current_compiler().function_type == FunctionType::Script {
            self.error("Can't return from top-level code.");
        }

        if self.match_token(TokenType::Semicolon) {
            self.emit_return();
        } else {
            if self.current_compiler().function_type == FunctionType::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenType::Semicolon, "Expect ';' after return value.");
            self.emit_byte(OpCode::Return.to_byte());
        }
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenType::Semicolon, "Expect ';' after value.");
        self.emit_byte(OpCode::Print.to_byte());
    }

    fn eprint_statement(&mut self) {
        self.expression();
        self.consume(TokenType::Semicolon, "Expect ';' after value.");
        self.emit_byte(OpCode::Error.to_byte());
    }

    fn exit_statement(&mut self) {
        self.expression();
        self.consume(TokenType::Semicolon, "Expect ';' after exit code.");
        self.emit_byte(OpCode::Exit.to_byte());
    }

    fn assert_statement(&mut self) {
        self.expression();
        self.consume(TokenType::Semicolon, "Expect ';' after assertion.");
        self.emit_byte(OpCode::Assert.to_byte());
    }

    /// `break` leaves the innermost loop or switch.
    fn break_statement(&mut self) {
        if self.loops.is_empty() {
            self.error("Can't use 'break' outside of a loop.");
            return;
        }
        self.consume(TokenType::Semicolon, "Expect ';' after 'break'.");

        let scope_depth = self.loops.last().expect("No loop context.").scope_depth;
        self.discard_locals(scope_depth);
        let jump_offset_operand = self.emit_jump_bytes(OpCode::Jump.to_byte());
        self.loops
            .last_mut()
            .expect("No loop context.")
            .break_jumps
            .push(jump_offset_operand);
    }

    /// `continue` targets the innermost enclosing loop, popping the
    /// scrutinee of every switch it jumps across.
    fn continue_statement(&mut self) {
        let target = self
            .loops
            .iter()
            .rposition(|context| context.kind == ContextKind::Loop);
        let Some(target) = target else {
            self.error("Can't use 'continue' outside of a loop.");
            return;
        };
        self.consume(TokenType::Semicolon, "Expect ';' after 'continue'.");

        let (start, scope_depth) = {
            let context = &self.loops[target];
            (context.start, context.scope_depth)
        };
        let crossed_switches = self.loops.len() - target - 1;
        self.discard_locals(scope_depth);
        self.flush_pops(crossed_switches);
        self.emit_loop(start);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk().len();
        let scope_depth = self.current_compiler().scope_depth;
        self.loops.push(LoopContext {
            kind: ContextKind::Loop,
            start: loop_start,
            scope_depth,
            break_jumps: vec![],
        });

        self.consume(TokenType::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenType::RightParen, "Expect ')' after condition.");

        let jump_offset_operand = self.emit_jump_bytes(OpCode::JumpIfFalse.to_byte());
        self.emit_byte(OpCode::Pop.to_byte());

        self.statement();
        self.emit_loop(loop_start); // back to the condition

        self.patch_jump_offset(jump_offset_operand);
        self.emit_byte(OpCode::Pop.to_byte());

        let context = self.loops.pop().expect("No loop context.");
        for break_jump in context.break_jumps {
            self.patch_jump_offset(break_jump);
        }
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_byte(OpCode::Loop.to_byte());

        // +2 to skip the operand of the Loop instruction itself.
        let offset = self.current_chunk().len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }

        self.emit_byte(((offset >> 8) & 0xff) as u8);
        self.emit_byte((offset & 0xff) as u8);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenType::LeftParen, "Expect '(' after 'for'.");
        if self.match_token(TokenType::Semicolon) {
            // no initializer
        } else if self.match_token(TokenType::Var) {
            self.variable_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_chunk().len();
        let scope_depth = self.current_compiler().scope_depth;
        self.loops.push(LoopContext {
            kind: ContextKind::Loop,
            start: loop_start,
            scope_depth,
            break_jumps: vec![],
        });

        let mut exit_jump_offset_operand = None;
        if !self.match_token(TokenType::Semicolon) {
            self.expression();
            self.consume(TokenType::Semicolon, "Expect ';' after loop condition.");

            // Jump out of the loop if the condition is false.
            exit_jump_offset_operand = Some(self.emit_jump_bytes(OpCode::JumpIfFalse.to_byte()));
            self.emit_byte(OpCode::Pop.to_byte()); // pop the condition result.
        }

        if !self.match_token(TokenType::RightParen) {
            let body_jump_offset_operand = self.emit_jump_bytes(OpCode::Jump.to_byte());
            let increment_start = self.current_chunk().len();
            self.expression();
            self.emit_byte(OpCode::Pop.to_byte());
            self.consume(TokenType::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            // 'continue' now has to run the increment clause first.
            self.loops.last_mut().expect("No loop context.").start = increment_start;
            self.patch_jump_offset(body_jump_offset_operand);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(offset) = exit_jump_offset_operand {
            self.patch_jump_offset(offset);
            self.emit_byte(OpCode::Pop.to_byte()); // pop the condition result.
        }

        let context = self.loops.pop().expect("No loop context.");
        for break_jump in context.break_jumps {
            self.patch_jump_offset(break_jump);
        }

        self.end_scope();
    }

    /// Dispatch on equality. The scrutinee stays on the stack across the
    /// whole statement; each case duplicates it for its comparison, and
    /// every case body jumps past the rest, so there is no fall-through.
    fn switch_statement(&mut self) {
        self.consume(TokenType::LeftParen, "Expect '(' after 'switch'.");
        self.expression();
        self.consume(TokenType::RightParen, "Expect ')' after switch value.");
        self.consume(TokenType::LeftBrace, "Expect '{' before switch cases.");

        let scope_depth = self.current_compiler().scope_depth;
        self.loops.push(LoopContext {
            kind: ContextKind::Switch,
            start: 0,
            scope_depth,
            break_jumps: vec![],
        });

        let mut end_jumps = vec![];
        let mut miss_jump: Option<usize> = None;
        let mut saw_case = false;
        let mut saw_default = false;

        loop {
            if self.match_token(TokenType::Case) {
                if saw_default {
                    self.error("'case' can't follow 'default'.");
                }
                saw_case = true;

                if let Some(offset) = miss_jump.take() {
                    self.patch_jump_offset(offset);
                    self.emit_byte(OpCode::Pop.to_byte()); // failed comparison result
                }

                self.emit_byte(OpCode::Dup.to_byte());
                self.expression();
                self.consume(TokenType::Colon, "Expect ':' after case value.");
                self.emit_byte(OpCode::Equal.to_byte());
                miss_jump = Some(self.emit_jump_bytes(OpCode::JumpIfFalse.to_byte()));
                self.emit_byte(OpCode::Pop.to_byte()); // successful comparison result

                while !self.check(TokenType::Case)
                    && !self.check(TokenType::Default)
                    && !self.check(TokenType::RightBrace)
                    && !self.check(TokenType::Eof)
                {
                    self.statement();
                }
                end_jumps.push(self.emit_jump_bytes(OpCode::Jump.to_byte()));
            } else if self.match_token(TokenType::Default) {
                if saw_default {
                    self.error("Only one 'default' is allowed in a switch.");
                }
                saw_default = true;
                self.consume(TokenType::Colon, "Expect ':' after 'default'.");

                if let Some(offset) = miss_jump.take() {
                    self.patch_jump_offset(offset);
                    self.emit_byte(OpCode::Pop.to_byte());
                }

                while !self.check(TokenType::Case)
                    && !self.check(TokenType::RightBrace)
                    && !self.check(TokenType::Eof)
                {
                    self.statement();
                }
            } else if self.check(TokenType::RightBrace) || self.check(TokenType::Eof) {
                break;
            } else {
                self.error_at_current("Expect 'case' or 'default' inside a switch.");
                if !saw_case && !saw_default {
                    // Swallow the stray statement so parsing can make
                    // progress toward the next case label.
                    self.statement();
                } else {
                    break;
                }
            }
        }

        if let Some(offset) = miss_jump {
            self.patch_jump_offset(offset);
            self.emit_byte(OpCode::Pop.to_byte());
        }

        self.consume(TokenType::RightBrace, "Expect '}' after switch cases.");
        for end_jump in end_jumps {
            self.patch_jump_offset(end_jump);
        }
        let context = self.loops.pop().expect("No switch context.");
        for break_jump in context.break_jumps {
            self.patch_jump_offset(break_jump);
        }
        self.emit_byte(OpCode::Pop.to_byte()); // the scrutinee
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenType::Semicolon, "Expect ';' after expression.");
        self.emit_byte(OpCode::Pop.to_byte());
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenType::RightParen, "Expect ')' after expression.");
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn unary(&mut self) {
        let operator_type = self.previous.token_type;

        self.parse_precedence(Precedence::Unary);

        match operator_type {
            TokenType::Bang => self.emit_byte(OpCode::Not.to_byte()),
            TokenType::Minus => self.emit_byte(OpCode::Negate.to_byte()),
            TokenType::Tilde => self.emit_byte(OpCode::BitwiseNot.to_byte()),
            _ => unreachable!("Expect unary operator."),
        }
    }

    fn binary(&mut self) {
        let operator_type = self.previous.token_type;
        let rule = RULES[operator_type as usize];
        self.parse_precedence((rule.precedence as u8 + 1).into());

        match operator_type {
            TokenType::BangEqual => self.emit_bytes(OpCode::Equal.to_byte(), OpCode::Not.to_byte()),
            TokenType::EqualEqual => self.emit_byte(OpCode::Equal.to_byte()),
            TokenType::Greater => self.emit_byte(OpCode::Greater.to_byte()),
            TokenType::GreaterEqual => self.emit_bytes(OpCode::Less.to_byte(), OpCode::Not.to_byte()),
            TokenType::Less => self.emit_byte(OpCode::Less.to_byte()),
            TokenType::LessEqual => self.emit_bytes(OpCode::Greater.to_byte(), OpCode::Not.to_byte()),
            TokenType::Plus => self.emit_byte(OpCode::Add.to_byte()),
            TokenType::Minus => self.emit_byte(OpCode::Subtract.to_byte()),
            TokenType::Star => self.emit_byte(OpCode::Multiply.to_byte()),
            TokenType::Slash => self.emit_byte(OpCode::Divide.to_byte()),
            TokenType::Percent => self.emit_byte(OpCode::Modulo.to_byte()),
            TokenType::Amp => self.emit_byte(OpCode::BitwiseAnd.to_byte()),
            TokenType::Pipe => self.emit_byte(OpCode::BitwiseOr.to_byte()),
            TokenType::Caret => self.emit_byte(OpCode::BitwiseXor.to_byte()),
            TokenType::LessLess => self.emit_byte(OpCode::ShiftLeft.to_byte()),
            TokenType::GreaterGreater => self.emit_byte(OpCode::ShiftRight.to_byte()),
            _ => unreachable!("Unexpected binary operator: {}", operator_type),
        }
    }

    fn literal(&mut self) {
        let operator_type = self.previous.token_type;
        match operator_type {
            TokenType::False => self.emit_byte(OpCode::False.to_byte()),
            TokenType::True => self.emit_byte(OpCode::True.to_byte()),
            TokenType::Nil => self.emit_byte(OpCode::Nil.to_byte()),
            _ => unreachable!("Unexpected literal operator: {}", operator_type),
        }
    }

    fn call(&mut self, _can_assign: bool) {
        let argument_count = self.argument_list();
        self.emit_bytes(OpCode::Call.to_byte(), argument_count);
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenType::Identifier, "Expect property name after '.'.");
        let name = self.previous.value;
        let name_constant = self.identifier_constant(name);

        if can_assign && self.match_token(TokenType::Equal) {
            self.expression();
            self.emit_bytes(OpCode::SetProperty.to_byte(), name_constant);
        } else if can_assign && self.check_compound_assign() {
            let op = self.compound_assign_op();
            self.emit_byte(OpCode::Dup.to_byte());
            self.emit_bytes(OpCode::GetProperty.to_byte(), name_constant);
            self.expression();
            self.emit_byte(op.to_byte());
            self.emit_bytes(OpCode::SetProperty.to_byte(), name_constant);
        } else if self.match_token(TokenType::LeftParen) {
            let argument_count = self.argument_list();
            self.emit_bytes(OpCode::Invoke.to_byte(), name_constant);
            self.emit_byte(argument_count);
        } else {
            self.emit_bytes(OpCode::GetProperty.to_byte(), name_constant);
        }
    }

    /// `v[i]` and `v[i] = e` invoke the built-in `subscript` method with one
    /// or two arguments; user classes may define their own.
    fn subscript(&mut self, can_assign: bool) {
        let name_constant = self.identifier_constant("subscript");
        self.expression();
        self.consume(TokenType::RightBracket, "Expect ']' after index.");

        if can_assign && self.match_token(TokenType::Equal) {
            self.expression();
            self.emit_bytes(OpCode::Invoke.to_byte(), name_constant);
            self.emit_byte(2);
        } else {
            self.emit_bytes(OpCode::Invoke.to_byte(), name_constant);
            self.emit_byte(1);
        }
    }

    /// `[a, b, c]` builds an empty list through the global `list` native,
    /// then appends each element in order (`append` returns its receiver,
    /// so the list stays on the stack throughout).
    fn list_literal(&mut self) {
        let list_constant = self.identifier_constant("list");
        let append_constant = self.identifier_constant("append");
        self.emit_bytes(OpCode::GetGlobal.to_byte(), list_constant);
        self.emit_bytes(OpCode::Call.to_byte(), 0);

        if !self.check(TokenType::RightBracket) {
            loop {
                self.expression();
                self.emit_bytes(OpCode::Invoke.to_byte(), append_constant);
                self.emit_byte(1);

                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightBracket, "Expect ']' after list elements.");
    }

    fn this(&mut self) {
        if self.class_contexts.is_empty() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        self.variable(false);
    }

    fn super_(&mut self) {
        if self.class_contexts.is_empty() {
            self.error("Can't use 'super' outside of a class.");
        } else if !self.class_contexts.last().expect("No class context.").has_superclass {
            self.error("Can't use 'super' in a class with no superclass.");
        }

        self.consume(TokenType::Dot, "Expect '.' after 'super'.");
        self.consume(TokenType::Identifier, "Expect superclass method name.");
        let name_constant = self.identifier_constant(self.previous.value);

        self.named_variable(Self::synthetic_token(TokenType::This, "this"), false);
        if self.match_token(TokenType::LeftParen) {
            let argument_count = self.argument_list();
            self.named_variable(Self::synthetic_token(TokenType::Super, "super"), false);
            self.emit_bytes(OpCode::SuperInvoke.to_byte(), name_constant);
            self.emit_byte(argument_count);
        } else {
            self.named_variable(Self::synthetic_token(TokenType::Super, "super"), false);
            self.emit_bytes(OpCode::GetSuper.to_byte(), name_constant);
        }
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();

        let can_assign = precedence <= Precedence::Assignment;
        let rule = RULES[self.previous.token_type as usize];
        if let Some(prefix) = rule.prefix {
            prefix(self, can_assign);
        } else {
            self.error("Expect expression.");
            return;
        }

        while precedence as u8 <= RULES[self.current.token_type as usize].precedence as u8 {
            self.advance();
            if let Some(infix) = RULES[self.previous.token_type as usize].infix {
                infix(self, can_assign);
            } else {
                self.error("Expect infix parse function.");
                return;
            }
        }

        if can_assign
            && (self.match_token(TokenType::Equal)
                || self.match_token(TokenType::PlusEqual)
                || self.match_token(TokenType::MinusEqual)
                || self.match_token(TokenType::StarEqual)
                || self.match_token(TokenType::SlashEqual))
        {
            self.error("Invalid assignment target.");
        }
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.token_type != TokenType::Eof {
            if self.previous.token_type == TokenType::Semicolon {
                return;
            }

            match self.current.token_type {
                token_type
                    if matches!(
                        token_type,
                        TokenType::Class
                            | TokenType::Fun
                            | TokenType::Var
                            | TokenType::For
                            | TokenType::If
                            | TokenType::While
                            | TokenType::Switch
                            | TokenType::Break
                            | TokenType::Continue
                            | TokenType::Print
                            | TokenType::Eprint
                            | TokenType::Exit
                            | TokenType::Assert
                            | TokenType::Return
                    ) =>
                {
                    return
                }
                _ => (),
            }

            self.advance()
        }
    }

    fn error(&mut self, message: &str) {
        self.error_at(&self.previous.clone(), message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(&self.current.clone(), message);
    }

    fn error_at(&mut self, token: &Token, message: &str) {
        if self.panic_mode {
            return;
        }

        self.panic_mode = true;
        write!(&mut std::io::stderr(), "[line {}] Error", token.line)
            .expect("Failed to write to stderr");

        match token.token_type {
            TokenType::Eof => {
                write!(&mut std::io::stderr(), " at end").expect("Failed to write to stderr")
            }
            TokenType::Error => {}
            _ => write!(&mut std::io::stderr(), " at '{}'", token.value)
                .expect("Failed to write to stderr"),
        };

        writeln!(&mut std::io::stderr(), ": {}", message).expect("Failed to write to stderr");
        self.has_error = true;
    }
}

#[cfg(feature = "debug_print_code")]
mod debug_feature {
    use crate::debug;

    use super::*;

    pub fn disassemble_chunk(parser: &mut Parser, name: &str) {
        if !parser.has_error {
            debug::disassemble_chunk(parser.current_chunk(), name);
        }
    }
}

#[cfg(not(feature = "debug_print_code"))]
mod debug_feature {
    use super::*;

    pub fn disassemble_chunk(_parser: &mut Parser, _name: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{as_number, is_number};

    fn compile(source: &str) -> Option<Box<ObjectFunction>> {
        let mut object_manager = ObjectManager::new();
        let mut intern_strings = Table::new();
        let mut parser = Parser::new(&mut object_manager, &mut intern_strings);
        parser.compile(source)
    }

    #[test]
    fn test_compile_arithmetic_bytecode() {
        let function = compile("1 + 2;").expect("Unexpected compile error.");
        let chunk = &function.chunk;

        let expected = [
            OpCode::Constant.to_byte(),
            0,
            OpCode::Constant.to_byte(),
            1,
            OpCode::Add.to_byte(),
            OpCode::Pop.to_byte(),
            OpCode::Nil.to_byte(),
            OpCode::Return.to_byte(),
        ];
        assert_eq!(chunk.code, expected);

        assert!(is_number(chunk.get_constant(0)));
        assert_eq!(as_number(chunk.get_constant(0)), 1.0);
        assert_eq!(as_number(chunk.get_constant(1)), 2.0);
    }

    #[test]
    fn test_intern_strings() {
        let mut object_manager = ObjectManager::new();
        let mut intern_strings = Table::new();

        let mut parser = Parser::new(&mut object_manager, &mut intern_strings);
        assert!(parser.compile("\"this is a test string\";").is_some());
        drop(parser);

        let mut parser = Parser::new(&mut object_manager, &mut intern_strings);
        assert!(parser.compile("\"this is a test string\";").is_some());
        drop(parser);

        assert!(intern_strings.len() == 1);
    }

    #[test]
    fn test_function_declaration() {
        let result = compile(
            "fun areWeHavingItYet() {
                print \"Yes we are!\";
            }
            print areWeHavingItYet;",
        );
        assert!(result.is_some());
    }

    #[test]
    fn test_function_with_arguments() {
        let result = compile(
            "fun sum(a, b, c) {
                return a + b + c;
            }
            print 4 + sum(5, 6, 7);",
        );
        assert!(result.is_some());
    }

    #[test]
    fn test_closure_upvalue_metadata() {
        let result = compile(
            "fun outer() {
                var captured = 1;
                fun inner() {
                    return captured;
                }
                return inner;
            }",
        );
        assert!(result.is_some());
    }

    #[test]
    fn test_class_declaration_compiles() {
        let result = compile(
            "class Point {
                var x = 0;
                var y = 0;
                init(x, y) {
                    this.x = x;
                    this.y = y;
                }
                sum() {
                    return this.x + this.y;
                }
            }
            class Point3 < Point {
                sum() { return super.sum(); }
            }",
        );
        assert!(result.is_some());
    }

    #[test]
    fn test_malformed_class_body_is_an_error() {
        assert!(compile("class Point(a) {}").is_none());
        assert!(compile("class Loop < Loop {}").is_none());
    }

    #[test]
    fn test_control_flow_compiles() {
        let result = compile(
            "var total = 0;
            for (var i = 0; i < 10; i = i + 1) {
                if (i % 2 == 0) { continue; }
                if (i > 7) { break; }
                total += i;
            }
            while (total > 0) { total -= 1; }
            switch (total) {
                case 0: print \"zero\";
                default: print \"other\";
            }",
        );
        assert!(result.is_some());
    }

    #[test]
    fn test_invalid_assignment_target() {
        assert!(compile("1 = 2;").is_none());
        assert!(compile("a + b = 3;").is_none());
        assert!(compile("1 += 2;").is_none());
    }

    #[test]
    fn test_uninitialized_local_read_is_an_error() {
        assert!(compile("{ var a = a; }").is_none());
    }

    #[test]
    fn test_duplicate_local_is_an_error() {
        assert!(compile("{ var a = 1; var a = 2; }").is_none());
    }

    #[test]
    fn test_break_outside_loop_is_an_error() {
        assert!(compile("break;").is_none());
        assert!(compile("continue;").is_none());
    }

    #[test]
    fn test_return_at_top_level_is_an_error() {
        assert!(compile("return 1;").is_none());
    }

    #[test]
    fn test_this_outside_class_is_an_error() {
        assert!(compile("print this;").is_none());
    }

    #[test]
    fn test_constant_long_emitted_past_255_constants() {
        // One expression with 300 distinct number literals pushes the
        // constant pool past the one-byte operand range.
        let mut source = String::from("0.5");
        for i in 1..300 {
            source.push_str(&format!(" + {}.5", i));
        }
        source.push(';');

        let function = compile(&source).expect("Unexpected compile error.");
        let chunk = &function.chunk;
        assert_eq!(chunk.constants.len(), 300);

        // Walk the instruction stream and count operand widths honestly.
        let mut saw_long = false;
        let mut offset = 0;
        while offset < chunk.code.len() {
            match OpCode::from_byte(chunk.code[offset]) {
                Some(OpCode::Constant) => offset += 2,
                Some(OpCode::ConstantLong) => {
                    saw_long = true;
                    offset += 4;
                }
                _ => offset += 1,
            }
        }
        assert!(saw_long);
    }
}
