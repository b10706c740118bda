/// Disassembler output
use crate::test::asm::{vm_for_tests, Asm};
use crate::value::Value;
use crate::vm::debug::disassemble;
use crate::vm::opcode::{BinaryOp, CompareOp, OpCode};

#[test]
fn test_disassemble_covers_operand_shapes() {
    let mut vm = vm_for_tests();
    let greeting = vm.alloc_string("hi");

    let mut asm = Asm::new();
    asm.load_const(greeting); // constant with rendered value
    asm.store_global("x"); // name operand
    asm.load_global("x");
    asm.load_num(2.0).binary(BinaryOp::Add);
    asm.load_num(3.0).compare(CompareOp::Lt);
    let skip = asm.jump_fwd(OpCode::JumpIfFalse);
    asm.op(OpCode::PushNil).op(OpCode::Pop);
    asm.patch_jump(skip);
    asm.halt();
    let code = asm.build(&mut vm);

    let listing = disassemble(code.code_ref(), "main");

    assert!(listing.starts_with("== main ==\n"));
    assert!(listing.contains("LOAD_CONST"));
    assert!(listing.contains("'hi'"));
    assert!(listing.contains("STORE_GLOBAL"));
    assert!(listing.contains("'x'"));
    let has_line = |prefix: &str, operand: &str| {
        listing
            .lines()
            .any(|line| line.contains(prefix) && line.ends_with(operand))
    };
    assert!(has_line("BINARY", "Add"));
    assert!(has_line("COMPARE", "Lt"));
    assert!(listing.contains("JUMP_IF_FALSE"));
    assert!(listing.contains("HALT"));
    // One line per instruction plus the header.
    assert_eq!(listing.lines().count(), 12);
}

#[test]
fn test_disassemble_flags_unknown_bytes() {
    let mut vm = vm_for_tests();
    let mut asm = Asm::new();
    asm.u8(200);
    let code = asm.build(&mut vm);
    let listing = disassemble(code.code_ref(), "bad");
    assert!(listing.contains("unknown opcode 200"));
}

#[test]
fn test_jump_targets_are_resolved() {
    let mut vm = vm_for_tests();
    let mut asm = Asm::new();
    asm.load_const(Value::Bool(true));
    let skip = asm.jump_fwd(OpCode::JumpIfTrue);
    asm.op(OpCode::PushNil);
    asm.patch_jump(skip);
    asm.halt();
    let code = asm.build(&mut vm);

    // JUMP_IF_TRUE sits at offset 3; its target is the HALT at offset 7.
    let listing = disassemble(code.code_ref(), "jumps");
    assert!(listing.contains("JUMP_IF_TRUE"), "{listing}");
    assert!(listing.contains("-> 7"), "{listing}");
}
