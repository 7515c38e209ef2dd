use crate::chunk::{Chunk, OpCode};
use crate::value::{as_object, value_to_string};

pub fn disassemble_chunk(chunk: &Chunk, name: &str) {
    println!("== {} ==", name);

    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = disassemble_instruction(chunk, offset);
    }
}

pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> usize {
    print!("{:04} ", offset);
    if offset > 0 && chunk.get_line(offset) == chunk.get_line(offset - 1) {
        print!("   | ");
    } else {
        print!("{:4} ", chunk.get_line(offset));
    }

    let instruction = chunk.code[offset];
    match OpCode::from_byte(instruction) {
        Some(OpCode::Constant) => constant_instruction("OP_CONSTANT", chunk, offset),
        Some(OpCode::ConstantLong) => constant_long_instruction("OP_CONSTANT_LONG", chunk, offset),
        Some(OpCode::Nil) => simple_instruction("OP_NIL", offset),
        Some(OpCode::True) => simple_instruction("OP_TRUE", offset),
        Some(OpCode::False) => simple_instruction("OP_FALSE", offset),
        Some(OpCode::Pop) => simple_instruction("OP_POP", offset),
        Some(OpCode::PopN) => byte_instruction("OP_POPN", chunk, offset),
        Some(OpCode::Dup) => simple_instruction("OP_DUP", offset),
        Some(OpCode::GetLocal) => byte_instruction("OP_GET_LOCAL", chunk, offset),
        Some(OpCode::SetLocal) => byte_instruction("OP_SET_LOCAL", chunk, offset),
        Some(OpCode::GetGlobal) => constant_instruction("OP_GET_GLOBAL", chunk, offset),
        Some(OpCode::DefineGlobal) => constant_instruction("OP_DEFINE_GLOBAL", chunk, offset),
        Some(OpCode::SetGlobal) => constant_instruction("OP_SET_GLOBAL", chunk, offset),
        Some(OpCode::GetUpvalue) => byte_instruction("OP_GET_UPVALUE", chunk, offset),
        Some(OpCode::SetUpvalue) => byte_instruction("OP_SET_UPVALUE", chunk, offset),
        Some(OpCode::GetProperty) => constant_instruction("OP_GET_PROPERTY", chunk, offset),
        Some(OpCode::SetProperty) => constant_instruction("OP_SET_PROPERTY", chunk, offset),
        Some(OpCode::GetSuper) => constant_instruction("OP_GET_SUPER", chunk, offset),
        Some(OpCode::Equal) => simple_instruction("OP_EQUAL", offset),
        Some(OpCode::Greater) => simple_instruction("OP_GREATER", offset),
        Some(OpCode::Less) => simple_instruction("OP_LESS", offset),
        Some(OpCode::Add) => simple_instruction("OP_ADD", offset),
        Some(OpCode::Subtract) => simple_instruction("OP_SUBTRACT", offset),
        Some(OpCode::Multiply) => simple_instruction("OP_MULTIPLY", offset),
        Some(OpCode::Divide) => simple_instruction("OP_DIVIDE", offset),
        Some(OpCode::Modulo) => simple_instruction("OP_MODULO", offset),
        Some(OpCode::BitwiseAnd) => simple_instruction("OP_BITWISE_AND", offset),
        Some(OpCode::BitwiseOr) => simple_instruction("OP_BITWISE_OR", offset),
        Some(OpCode::BitwiseXor) => simple_instruction("OP_BITWISE_XOR", offset),
        Some(OpCode::ShiftLeft) => simple_instruction("OP_SHIFT_LEFT", offset),
        Some(OpCode::ShiftRight) => simple_instruction("OP_SHIFT_RIGHT", offset),
        Some(OpCode::BitwiseNot) => simple_instruction("OP_BITWISE_NOT", offset),
        Some(OpCode::Not) => simple_instruction("OP_NOT", offset),
        Some(OpCode::Negate) => simple_instruction("OP_NEGATE", offset),
        Some(OpCode::Print) => simple_instruction("OP_PRINT", offset),
        Some(OpCode::Error) => simple_instruction("OP_ERROR", offset),
        Some(OpCode::Jump) => jump_instruction("OP_JUMP", 1, chunk, offset),
        Some(OpCode::JumpIfFalse) => jump_instruction("OP_JUMP_IF_FALSE", 1, chunk, offset),
        Some(OpCode::Loop) => jump_instruction("OP_LOOP", -1, chunk, offset),
        Some(OpCode::Call) => byte_instruction("OP_CALL", chunk, offset),
        Some(OpCode::Invoke) => invoke_instruction("OP_INVOKE", chunk, offset),
        Some(OpCode::SuperInvoke) => invoke_instruction("OP_SUPER_INVOKE", chunk, offset),
        Some(OpCode::Closure) => closure_instruction(chunk, offset),
        Some(OpCode::CloseUpvalue) => simple_instruction("OP_CLOSE_UPVALUE", offset),
        Some(OpCode::Return) => simple_instruction("OP_RETURN", offset),
        Some(OpCode::Exit) => simple_instruction("OP_EXIT", offset),
        Some(OpCode::Class) => constant_instruction("OP_CLASS", chunk, offset),
        Some(OpCode::Inherit) => simple_instruction("OP_INHERIT", offset),
        Some(OpCode::Method) => constant_instruction("OP_METHOD", chunk, offset),
        Some(OpCode::Field) => constant_instruction("OP_FIELD", chunk, offset),
        Some(OpCode::Assert) => simple_instruction("OP_ASSERT", offset),
        None => {
            println!("Unknown opcode {}", instruction);
            offset + 1
        }
    }
}

fn simple_instruction(name: &str, offset: usize) -> usize {
    println!("{}", name);
    offset + 1
}

fn byte_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let slot = chunk.code[offset + 1];
    println!("{:<16} {:>4}", name, slot);
    offset + 2
}

fn constant_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let constant = chunk.code[offset + 1] as usize;
    print!("{:<16} {:>4} '", name, constant);
    print!("{}", value_to_string(chunk.get_constant(constant)));
    println!("'");
    offset + 2
}

fn constant_long_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let constant = chunk.code[offset + 1] as usize
        | (chunk.code[offset + 2] as usize) << 8
        | (chunk.code[offset + 3] as usize) << 16;
    print!("{:<16} {:>4} '", name, constant);
    print!("{}", value_to_string(chunk.get_constant(constant)));
    println!("'");
    offset + 4
}

fn jump_instruction(name: &str, sign: i64, chunk: &Chunk, offset: usize) -> usize {
    let jump = ((chunk.code[offset + 1] as u16) << 8 | chunk.code[offset + 2] as u16) as i64;
    let target = offset as i64 + 3 + sign * jump;
    println!("{:<16} {:>4} -> {}", name, offset, target);
    offset + 3
}

fn invoke_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let constant = chunk.code[offset + 1] as usize;
    let arg_count = chunk.code[offset + 2];
    print!("{:<16} ({} args) {:>4} '", name, arg_count, constant);
    print!("{}", value_to_string(chunk.get_constant(constant)));
    println!("'");
    offset + 3
}

fn closure_instruction(chunk: &Chunk, offset: usize) -> usize {
    let mut offset = offset + 1;
    let constant = chunk.code[offset] as usize;
    offset += 1;
    print!("{:<16} {:>4} ", "OP_CLOSURE", constant);
    println!("{}", value_to_string(chunk.get_constant(constant)));

    let function = unsafe { (*as_object(chunk.get_constant(constant))).as_function() };
    for _ in 0..function.upvalue_count {
        let is_local = chunk.code[offset];
        let index = chunk.code[offset + 1];
        println!(
            "{:04}      |                     {} {}",
            offset,
            if is_local == 1 { "local" } else { "upvalue" },
            index
        );
        offset += 2;
    }
    offset
}
