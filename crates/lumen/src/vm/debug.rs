// Bytecode disassembler
//
// Renders a code object one instruction per line with decoded operands.
// Output goes to a String so hosts can route it anywhere.

use crate::gc::object::CodeObj;
use crate::value::Value;
use crate::vm::opcode::{BinaryOp, CompareOp, OpCode, UnaryOp};

pub fn disassemble(code: &CodeObj, name: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("== {name} ==\n"));

    let mut offset = 0;
    while offset < code.bytes.len() {
        offset = disassemble_instruction(code, offset, &mut out);
    }
    out
}

fn disassemble_instruction(code: &CodeObj, offset: usize, out: &mut String) -> usize {
    out.push_str(&format!("{offset:04} "));

    let byte = code.bytes[offset];
    let Some(op) = OpCode::from_byte(byte) else {
        out.push_str(&format!("unknown opcode {byte}\n"));
        return offset + 1;
    };

    match op {
        OpCode::LoadConst => constant_instruction("LOAD_CONST", code, offset, out),
        OpCode::PushList => u16_instruction("PUSH_LIST", code, offset, out),
        OpCode::PushMap => u16_instruction("PUSH_MAP", code, offset, out),
        OpCode::Jump => jump_instruction("JUMP", code, offset, out),
        OpCode::JumpIfTrue => jump_instruction("JUMP_IF_TRUE", code, offset, out),
        OpCode::JumpIfFalse => jump_instruction("JUMP_IF_FALSE", code, offset, out),
        OpCode::Loop => jump_instruction("LOOP", code, offset, out),
        OpCode::StoreGlobal => name_instruction("STORE_GLOBAL", code, offset, out),
        OpCode::LoadGlobal => name_instruction("LOAD_GLOBAL", code, offset, out),
        OpCode::LoadLocal => u8_instruction("LOAD_LOCAL", code, offset, out),
        OpCode::StoreLocal => u8_instruction("STORE_LOCAL", code, offset, out),
        OpCode::LoadUpvalue => u8_instruction("LOAD_UPVALUE", code, offset, out),
        OpCode::StoreUpvalue => u8_instruction("STORE_UPVALUE", code, offset, out),
        OpCode::PopN => u8_instruction("POP_N", code, offset, out),
        OpCode::CallFunction => u8_instruction("CALL_FUNCTION", code, offset, out),
        OpCode::PushFunction => u8_instruction("PUSH_FUNCTION", code, offset, out),
        OpCode::PushClosure => closure_instruction(code, offset, out),
        OpCode::Binary => binary_instruction(code, offset, out),
        OpCode::Unary => unary_instruction(code, offset, out),
        OpCode::Compare => compare_instruction(code, offset, out),
        OpCode::No => simple_instruction("NO", offset, out),
        OpCode::PushNil => simple_instruction("PUSH_NIL", offset, out),
        OpCode::DupTop => simple_instruction("DUP_TOP", offset, out),
        OpCode::Pop => simple_instruction("POP", offset, out),
        OpCode::Return => simple_instruction("RETURN", offset, out),
        OpCode::Halt => simple_instruction("HALT", offset, out),
        OpCode::PushRange => simple_instruction("PUSH_RANGE", offset, out),
        OpCode::PushSlice => simple_instruction("PUSH_SLICE", offset, out),
        OpCode::GetItem => simple_instruction("GET_ITEM", offset, out),
        OpCode::SetItem => simple_instruction("SET_ITEM", offset, out),
        OpCode::PushIter => simple_instruction("PUSH_ITER", offset, out),
        OpCode::PopIter => simple_instruction("POP_ITER", offset, out),
        OpCode::Debug => simple_instruction("DEBUG", offset, out),
    }
}

fn read_u16(code: &CodeObj, offset: usize) -> u16 {
    let high = *code.bytes.get(offset).unwrap_or(&0) as u16;
    let low = *code.bytes.get(offset + 1).unwrap_or(&0) as u16;
    (high << 8) | low
}

fn simple_instruction(name: &str, offset: usize, out: &mut String) -> usize {
    out.push_str(name);
    out.push('\n');
    offset + 1
}

fn u8_instruction(name: &str, code: &CodeObj, offset: usize, out: &mut String) -> usize {
    let operand = *code.bytes.get(offset + 1).unwrap_or(&0);
    out.push_str(&format!("{name:<16} {operand:>4}\n"));
    offset + 2
}

fn u16_instruction(name: &str, code: &CodeObj, offset: usize, out: &mut String) -> usize {
    let operand = read_u16(code, offset + 1);
    out.push_str(&format!("{name:<16} {operand:>4}\n"));
    offset + 3
}

fn constant_instruction(name: &str, code: &CodeObj, offset: usize, out: &mut String) -> usize {
    let index = read_u16(code, offset + 1) as usize;
    let rendered = code
        .constants
        .get(index)
        .copied()
        .unwrap_or(Value::Nil)
        .as_string();
    out.push_str(&format!("{name:<16} {index:>4} '{rendered}'\n"));
    offset + 3
}

fn name_instruction(name: &str, code: &CodeObj, offset: usize, out: &mut String) -> usize {
    let index = *code.bytes.get(offset + 1).unwrap_or(&0) as usize;
    match code.names.get(index) {
        Some(global) => out.push_str(&format!("{name:<16} {index:>4} '{global}'\n")),
        None => out.push_str(&format!("{name:<16} {index:>4}\n")),
    }
    offset + 2
}

fn jump_instruction(name: &str, code: &CodeObj, offset: usize, out: &mut String) -> usize {
    let relative = read_u16(code, offset + 1) as i16;
    // Offsets are relative to the byte after the opcode.
    let target = offset as i64 + 1 + relative as i64 - 1;
    out.push_str(&format!("{name:<16} {relative:>4} -> {target}\n"));
    offset + 3
}

fn closure_instruction(code: &CodeObj, offset: usize, out: &mut String) -> usize {
    let params = *code.bytes.get(offset + 1).unwrap_or(&0);
    let upvalues = *code.bytes.get(offset + 2).unwrap_or(&0);
    out.push_str(&format!(
        "{:<16} {params:>4} upvalues {upvalues}\n",
        "PUSH_CLOSURE"
    ));
    offset + 3
}

fn binary_instruction(code: &CodeObj, offset: usize, out: &mut String) -> usize {
    let sub = *code.bytes.get(offset + 1).unwrap_or(&0);
    match BinaryOp::from_byte(sub) {
        Some(op) => out.push_str(&format!("{:<16} {op:?}\n", "BINARY")),
        None => out.push_str(&format!("{:<16} {sub:>4}\n", "BINARY")),
    }
    offset + 2
}

fn unary_instruction(code: &CodeObj, offset: usize, out: &mut String) -> usize {
    let sub = *code.bytes.get(offset + 1).unwrap_or(&0);
    match UnaryOp::from_byte(sub) {
        Some(op) => out.push_str(&format!("{:<16} {op:?}\n", "UNARY")),
        None => out.push_str(&format!("{:<16} {sub:>4}\n", "UNARY")),
    }
    offset + 2
}

fn compare_instruction(code: &CodeObj, offset: usize, out: &mut String) -> usize {
    let sub = *code.bytes.get(offset + 1).unwrap_or(&0);
    match CompareOp::from_byte(sub) {
        Some(op) => out.push_str(&format!("{:<16} {op:?}\n", "COMPARE")),
        None => out.push_str(&format!("{:<16} {sub:>4}\n", "COMPARE")),
    }
    offset + 2
}
