/// VM lifecycle, stack discipline, globals, natives, errors
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::Ordering;

use crate::test::asm::{run_asm, vm_for_tests, Asm};
use crate::value::Value;
use crate::vm::debug_info::{InstrRecord, InstrTable};
use crate::vm::error::VmResult;
use crate::vm::opcode::OpCode;
use crate::vm::Vm;

#[test]
fn test_dup_then_pop_is_a_no_op() {
    let mut asm = Asm::new();
    asm.load_num(42.0).op(OpCode::DupTop).op(OpCode::Pop).store_global("x").halt();
    let vm = run_asm(asm);
    assert_eq!(vm.get_global("x").unwrap(), Value::Num(42.0));
    assert_eq!(vm.sp, 0);
}

#[test]
fn test_globals_round_trip_preserves_identity() {
    let mut vm = vm_for_tests();
    let list = vm.alloc_list(vec![Value::Num(1.0)]);
    vm.set_global("src", list);

    let mut asm = Asm::new();
    asm.load_global("src").store_global("dst").halt();
    let code = asm.build(&mut vm);
    vm.reset(code);
    vm.execute().unwrap();

    // Same object, not a copy.
    assert_eq!(
        vm.get_global("src").unwrap().as_obj().unwrap(),
        vm.get_global("dst").unwrap().as_obj().unwrap()
    );
}

#[test]
fn test_missing_global_reads_nil() {
    let mut asm = Asm::new();
    asm.load_global("never_defined").store_global("x").halt();
    let vm = run_asm(asm);
    assert_eq!(vm.get_global("x").unwrap(), Value::Nil);
}

#[test]
fn test_locals_round_trip() {
    let mut asm = Asm::new();
    asm.op(OpCode::PushNil); // reserve slot 0
    asm.load_num(7.0).store_local(0);
    asm.load_local(0).store_global("x");
    asm.halt();
    let vm = run_asm(asm);
    assert_eq!(vm.get_global("x").unwrap(), Value::Num(7.0));
}

#[test]
fn test_reset_preserves_globals_and_clears_execution_state() {
    let mut vm = vm_for_tests();

    let mut first = Asm::new();
    first.load_num(1.0).store_global("g").halt();
    let first_code = first.build(&mut vm);
    vm.reset(first_code);
    vm.execute().unwrap();

    let mut second = Asm::new();
    second.load_global("g").store_global("h").halt();
    let second_code = second.build(&mut vm);
    vm.reset(second_code);
    assert_eq!(vm.sp, 0);
    assert!(vm.frames.is_empty());
    assert!(vm.iters.is_empty());
    assert!(vm.open_upvalues.is_none());
    vm.execute().unwrap();

    assert_eq!(vm.get_global("g").unwrap(), Value::Num(1.0));
    assert_eq!(vm.get_global("h").unwrap(), Value::Num(1.0));
}

#[test]
fn test_halt_stops_execution() {
    let mut asm = Asm::new();
    asm.load_num(1.0).store_global("x").halt();
    asm.load_num(2.0).store_global("x");
    let vm = run_asm(asm);
    assert_eq!(vm.get_global("x").unwrap(), Value::Num(1.0));
    assert!(!vm.running.load(Ordering::Relaxed));
}

#[test]
fn test_cancellation_flag_stops_dispatch() {
    let mut vm = vm_for_tests();
    let mut asm = Asm::new();
    let head = asm.here();
    asm.jump_to(OpCode::Jump, head); // infinite loop
    let code = asm.build(&mut vm);
    vm.reset(code);
    vm.run_flag().store(false, Ordering::Relaxed);
    // The dispatcher observes the cleared flag and returns.
    vm.execute().unwrap();
}

#[test]
fn test_key_constants_installed() {
    let vm = vm_for_tests();
    let keys = vm
        .get_global("keys")
        .expect("keys map installed at init")
        .as_obj()
        .unwrap()
        .try_map()
        .unwrap();
    assert_eq!(keys.table.get("A").unwrap().as_number(), 4.0);
    assert_eq!(keys.table.get("Z").unwrap().as_number(), 29.0);
    assert_eq!(keys.table.get("0").unwrap().as_number(), 39.0);
    assert_eq!(keys.table.get("SPACE").unwrap().as_number(), 44.0);
    assert_eq!(keys.table.get("ENTER").unwrap().as_number(), 40.0);
    assert_eq!(keys.table.get("LEFT").unwrap().as_number(), 80.0);
}

fn native_double(_vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    Ok(Value::Num(
        args.first().copied().unwrap_or(Value::Nil).as_number() * 2.0,
    ))
}

fn native_fail(vm: &mut Vm, _args: &[Value]) -> VmResult<Value> {
    Err(vm.error("native exploded"))
}

#[test]
fn test_native_function_call() {
    let mut vm = vm_for_tests();
    vm.register_native("double", native_double);

    let mut asm = Asm::new();
    asm.load_global("double").load_num(21.0).call(1).store_global("r");
    asm.halt();
    let code = asm.build(&mut vm);
    vm.reset(code);
    vm.execute().unwrap();
    assert_eq!(vm.get_global("r").unwrap(), Value::Num(42.0));
}

#[test]
fn test_native_error_propagates() {
    let mut vm = vm_for_tests();
    vm.register_native("boom", native_fail);

    let mut asm = Asm::new();
    asm.load_global("boom").call(0).halt();
    let code = asm.build(&mut vm);
    vm.reset(code);
    assert!(vm.execute().is_err());
    assert!(vm.error_message().contains("native exploded"));
}

#[test]
fn test_stack_underflow_is_an_error() {
    let mut vm = vm_for_tests();
    let mut asm = Asm::new();
    asm.op(OpCode::Pop).halt();
    let code = asm.build(&mut vm);
    vm.reset(code);
    assert!(vm.execute().is_err());
    assert!(vm.error_message().contains("Stack underflow"));
}

#[test]
fn test_stack_overflow_is_an_error() {
    let mut vm = vm_for_tests();
    let mut asm = Asm::new();
    let head = asm.here();
    asm.op(OpCode::PushNil);
    asm.jump_to(OpCode::Jump, head);
    let code = asm.build(&mut vm);
    vm.reset(code);
    assert!(vm.execute().is_err());
    assert!(vm.error_message().contains("Stack overflow"));
}

#[test]
fn test_runaway_recursion_overflows_the_frame_stack() {
    let mut vm = vm_for_tests();

    // f() { return f() }
    let mut body = Asm::new();
    body.load_global("f").call(0).ret();
    let body_code = body.build_value(&mut vm);
    let f_name = vm.alloc_string("f");

    let mut main = Asm::new();
    main.load_const(f_name).load_const(body_code);
    main.op(OpCode::PushFunction).u8(0);
    main.store_global("f");
    main.load_global("f").call(0);
    main.halt();
    let code = main.build(&mut vm);
    vm.reset(code);
    assert!(vm.execute().is_err());
    assert!(vm.error_message().contains("nested function calls"));
}

#[test]
fn test_calling_a_number_errors() {
    let mut vm = vm_for_tests();
    let mut asm = Asm::new();
    asm.load_num(5.0).call(0).halt();
    let code = asm.build(&mut vm);
    vm.reset(code);
    assert!(vm.execute().is_err());
    assert!(vm.error_message().contains("non-function"));
}

#[test]
fn test_unknown_opcode_errors() {
    let mut vm = vm_for_tests();
    let mut asm = Asm::new();
    asm.u8(200);
    let code = asm.build(&mut vm);
    vm.reset(code);
    assert!(vm.execute().is_err());
    assert!(vm.error_message().contains("Unknown opcode"));
}

#[test]
fn test_error_attribution_finds_the_nearest_record() {
    let seen: Rc<RefCell<Option<(String, i32)>>> = Rc::new(RefCell::new(None));
    let sink = seen.clone();

    let mut vm = Vm::new();
    vm.set_error_handler(move |message, line, _column| {
        *sink.borrow_mut() = Some((message.to_string(), line));
    });

    // Offsets: 0 PUSH_NIL, 1 POP, 2 POP (faults here: stack is empty).
    let mut asm = Asm::new();
    asm.op(OpCode::PushNil).op(OpCode::Pop).op(OpCode::Pop).halt();

    let mut instrs = InstrTable::default();
    instrs.insert(
        "<global>".into(),
        vec![
            InstrRecord { offset: 0, line: 1, column: 0, fun_name: None },
            InstrRecord { offset: 1, line: 2, column: 0, fun_name: None },
            InstrRecord { offset: 2, line: 3, column: 0, fun_name: None },
        ],
    );
    let code = asm.build_with_instrs(&mut vm, instrs);
    vm.reset(code);
    assert!(vm.execute().is_err());

    let (message, line) = seen.borrow().clone().expect("handler invoked");
    assert!(message.contains("Stack underflow"));
    assert_eq!(line, 3);
}

#[test]
fn test_error_attribution_names_the_function() {
    let seen: Rc<RefCell<Option<(String, i32)>>> = Rc::new(RefCell::new(None));
    let sink = seen.clone();

    let mut vm = Vm::new();
    vm.set_error_handler(move |message, line, _column| {
        *sink.borrow_mut() = Some((message.to_string(), line));
    });

    // f() { <fault> } with records filed under "f".
    let mut body = Asm::new();
    body.op(OpCode::Pop); // faults at pc 0
    body.op(OpCode::PushNil).ret();
    let mut instrs = InstrTable::default();
    instrs.insert(
        "f".into(),
        vec![InstrRecord {
            offset: 0,
            line: 12,
            column: 0,
            fun_name: Some("f".into()),
        }],
    );
    let body_code = Value::Obj(body.build_with_instrs(&mut vm, instrs));
    let f_name = vm.alloc_string("f");

    let mut main = Asm::new();
    main.load_const(f_name).load_const(body_code);
    main.op(OpCode::PushFunction).u8(0);
    main.call(0);
    main.halt();
    let code = main.build(&mut vm);
    vm.reset(code);
    assert!(vm.execute().is_err());

    let (message, line) = seen.borrow().clone().expect("handler invoked");
    assert!(message.contains("in function 'f'"));
    assert_eq!(line, 12);
}

#[test]
fn test_jump_if_false_pops_the_test() {
    let mut asm = Asm::new();
    asm.load_const(Value::Bool(false));
    let skip = asm.jump_fwd(OpCode::JumpIfFalse);
    asm.load_num(1.0).store_global("x");
    asm.patch_jump(skip);
    asm.load_num(2.0).store_global("y");
    asm.halt();
    let vm = run_asm(asm);
    assert!(vm.get_global("x").is_none());
    assert_eq!(vm.get_global("y").unwrap(), Value::Num(2.0));
    assert_eq!(vm.sp, 0);
}

#[test]
fn test_backward_jump_loops() {
    // x = 0; while x < 3 { x = x + 1 }
    use crate::vm::opcode::{BinaryOp, CompareOp};
    let mut asm = Asm::new();
    asm.load_num(0.0).store_global("x");
    let head = asm.here();
    asm.load_global("x").load_num(3.0).compare(CompareOp::Lt);
    let exit = asm.jump_fwd(OpCode::JumpIfFalse);
    asm.load_global("x").load_num(1.0).binary(BinaryOp::Add).store_global("x");
    asm.jump_to(OpCode::Jump, head);
    asm.patch_jump(exit);
    asm.halt();
    let vm = run_asm(asm);
    assert_eq!(vm.get_global("x").unwrap(), Value::Num(3.0));
}
