/// Closures, upvalue capture and the open/closed transition
use crate::test::asm::{vm_for_tests, Asm};
use crate::value::Value;
use crate::vm::opcode::{BinaryOp, OpCode, UnaryOp};

/// mkAdd(x) { return fn(y) { return x + y } }
/// a = mkAdd(3); r = a(4)  =>  7
#[test]
fn test_closure_captures_argument() {
    let mut vm = vm_for_tests();

    // inner: fn(y) -> x + y, x is upvalue 0, y is local 0
    let mut inner = Asm::new();
    inner.op(OpCode::LoadUpvalue).u8(0);
    inner.load_local(0);
    inner.binary(BinaryOp::Add);
    inner.ret();
    let inner_code = inner.build_value(&mut vm);
    let inner_name = vm.alloc_string("anon");

    // mkAdd: x is local 0; builds the closure capturing it.
    let mut mk_add = Asm::new();
    mk_add.op(OpCode::PushNil); // inner's default for y
    mk_add.load_const(inner_name);
    mk_add.load_const(inner_code);
    // One upvalue descriptor: local slot 0.
    mk_add.load_num(0.0).load_const(Value::Bool(true));
    mk_add.op(OpCode::PushClosure).u8(1).u8(1);
    mk_add.ret();
    let mk_add_code = mk_add.build_value(&mut vm);
    let mk_add_name = vm.alloc_string("mkAdd");

    let mut main = Asm::new();
    main.op(OpCode::PushNil); // mkAdd's default for x
    main.load_const(mk_add_name);
    main.load_const(mk_add_code);
    main.op(OpCode::PushFunction).u8(1);
    main.store_global("mkAdd");
    main.load_global("mkAdd").load_num(3.0).call(1).store_global("a");
    main.load_global("a").load_num(4.0).call(1).store_global("r");
    main.halt();

    let code = main.build(&mut vm);
    vm.reset(code);
    vm.execute().unwrap();
    assert_eq!(vm.get_global("r").unwrap(), Value::Num(7.0));
    // The capture was closed when mkAdd returned.
    assert!(vm.open_upvalues.is_none());
}

/// Two closures over the same local share one cell, before and after the
/// defining frame returns.
#[test]
fn test_sibling_closures_share_one_upvalue() {
    let mut vm = vm_for_tests();

    // inc: counter = counter + 1, returns the new value
    let mut inc = Asm::new();
    inc.op(OpCode::LoadUpvalue).u8(0);
    inc.unary(UnaryOp::Incr);
    inc.op(OpCode::DupTop);
    inc.op(OpCode::StoreUpvalue).u8(0);
    inc.ret();
    let inc_code = inc.build_value(&mut vm);
    let inc_name = vm.alloc_string("inc");

    // get: returns the counter
    let mut get = Asm::new();
    get.op(OpCode::LoadUpvalue).u8(0);
    get.ret();
    let get_code = get.build_value(&mut vm);
    let get_name = vm.alloc_string("get");

    // outer: local 0 = 0; exports both closures as globals.
    let mut outer = Asm::new();
    outer.load_num(0.0); // the counter local, slot 0
    outer.load_const(inc_name).load_const(inc_code);
    outer.load_num(0.0).load_const(Value::Bool(true));
    outer.op(OpCode::PushClosure).u8(0).u8(1);
    outer.store_global("inc");
    outer.load_const(get_name).load_const(get_code);
    outer.load_num(0.0).load_const(Value::Bool(true));
    outer.op(OpCode::PushClosure).u8(0).u8(1);
    outer.store_global("get");
    outer.op(OpCode::PushNil);
    outer.ret();
    let outer_code = outer.build_value(&mut vm);
    let outer_name = vm.alloc_string("outer");

    let mut main = Asm::new();
    main.load_const(outer_name).load_const(outer_code);
    main.op(OpCode::PushFunction).u8(0);
    main.call(0).op(OpCode::Pop);
    main.load_global("inc").call(0).op(OpCode::Pop);
    main.load_global("inc").call(0).op(OpCode::Pop);
    main.load_global("inc").call(0).store_global("third");
    main.load_global("get").call(0).store_global("seen");
    main.halt();

    let code = main.build(&mut vm);
    vm.reset(code);
    vm.execute().unwrap();
    // Both closures observed the same mutations through the shared cell.
    assert_eq!(vm.get_global("third").unwrap(), Value::Num(3.0));
    assert_eq!(vm.get_global("seen").unwrap(), Value::Num(3.0));
}

/// While the defining frame is live, the stack slot is the authoritative
/// storage: writes through the upvalue are visible to the local and back.
#[test]
fn test_open_upvalue_aliases_stack_slot() {
    let mut vm = vm_for_tests();

    // bump: counter = counter + 10
    let mut bump = Asm::new();
    bump.op(OpCode::LoadUpvalue).u8(0);
    bump.load_num(10.0);
    bump.binary(BinaryOp::Add);
    bump.op(OpCode::StoreUpvalue).u8(0);
    bump.op(OpCode::PushNil);
    bump.ret();
    let bump_code = bump.build_value(&mut vm);
    let bump_name = vm.alloc_string("bump");

    // outer: local 0 = 5; bump(); returns the local (read via LOAD_LOCAL).
    let mut outer = Asm::new();
    outer.load_num(5.0);
    outer.load_const(bump_name).load_const(bump_code);
    outer.load_num(0.0).load_const(Value::Bool(true));
    outer.op(OpCode::PushClosure).u8(0).u8(1);
    outer.call(0).op(OpCode::Pop);
    outer.load_local(0);
    outer.ret();
    let outer_code = outer.build_value(&mut vm);
    let outer_name = vm.alloc_string("outer");

    let mut main = Asm::new();
    main.load_const(outer_name).load_const(outer_code);
    main.op(OpCode::PushFunction).u8(0);
    main.call(0).store_global("r");
    main.halt();

    let code = main.build(&mut vm);
    vm.reset(code);
    vm.execute().unwrap();
    assert_eq!(vm.get_global("r").unwrap(), Value::Num(15.0));
}

/// POP closes the upvalue at the popped slot; the closure keeps the value
/// the slot had at close time.
#[test]
fn test_pop_closes_upvalue_at_slot() {
    let mut vm = vm_for_tests();

    let mut get = Asm::new();
    get.op(OpCode::LoadUpvalue).u8(0);
    get.ret();
    let get_code = get.build_value(&mut vm);
    let get_name = vm.alloc_string("get");

    // outer: local 0 = 42; export get; POP the local; the global
    // must still read 42 through the closed cell.
    let mut outer = Asm::new();
    outer.load_num(42.0);
    outer.load_const(get_name).load_const(get_code);
    outer.load_num(0.0).load_const(Value::Bool(true));
    outer.op(OpCode::PushClosure).u8(0).u8(1);
    outer.store_global("get");
    outer.op(OpCode::Pop); // pops the captured local, closing the cell
    outer.op(OpCode::PushNil);
    outer.ret();
    let outer_code = outer.build_value(&mut vm);
    let outer_name = vm.alloc_string("outer");

    let mut main = Asm::new();
    main.load_const(outer_name).load_const(outer_code);
    main.op(OpCode::PushFunction).u8(0);
    main.call(0).op(OpCode::Pop);
    main.load_global("get").call(0).store_global("r");
    main.halt();

    let code = main.build(&mut vm);
    vm.reset(code);
    vm.execute().unwrap();
    assert_eq!(vm.get_global("r").unwrap(), Value::Num(42.0));
    assert!(vm.open_upvalues.is_none());
}

/// A closure nested in a closure reaches the outermost local through the
/// enclosing function's upvalue array (is_local = false).
#[test]
fn test_nested_closure_reuses_enclosing_upvalue() {
    let mut vm = vm_for_tests();

    // innermost: fn() -> x (upvalue 0, inherited)
    let mut innermost = Asm::new();
    innermost.op(OpCode::LoadUpvalue).u8(0);
    innermost.ret();
    let innermost_code = innermost.build_value(&mut vm);
    let innermost_name = vm.alloc_string("innermost");

    // middle: fn() -> innermost closure, reusing its own upvalue 0
    let mut middle = Asm::new();
    middle.load_const(innermost_name).load_const(innermost_code);
    middle.load_num(0.0).load_const(Value::Bool(false)); // not local: inherit
    middle.op(OpCode::PushClosure).u8(0).u8(1);
    middle.ret();
    let middle_code = middle.build_value(&mut vm);
    let middle_name = vm.alloc_string("middle");

    // outer(x): middle captures local x; returns middle()
    let mut outer = Asm::new();
    outer.load_const(middle_name).load_const(middle_code);
    outer.load_num(0.0).load_const(Value::Bool(true));
    outer.op(OpCode::PushClosure).u8(0).u8(1);
    outer.call(0); // call middle, producing the innermost closure
    outer.ret();
    let outer_code = outer.build_value(&mut vm);
    let outer_name = vm.alloc_string("outer");

    let mut main = Asm::new();
    main.op(OpCode::PushNil);
    main.load_const(outer_name).load_const(outer_code);
    main.op(OpCode::PushFunction).u8(1);
    main.store_global("outer");
    main.load_global("outer").load_num(99.0).call(1);
    main.call(0).store_global("r");
    main.halt();

    let code = main.build(&mut vm);
    vm.reset(code);
    vm.execute().unwrap();
    assert_eq!(vm.get_global("r").unwrap(), Value::Num(99.0));
}

#[test]
fn test_default_parameters_fill_missing_arguments() {
    let mut vm = vm_for_tests();

    // f(a = 10, b = 20) -> a + b
    let mut f = Asm::new();
    f.load_local(0).load_local(1).binary(BinaryOp::Add).ret();
    let f_code = f.build_value(&mut vm);
    let f_name = vm.alloc_string("f");

    let mut main = Asm::new();
    main.load_num(10.0).load_num(20.0); // defaults
    main.load_const(f_name).load_const(f_code);
    main.op(OpCode::PushFunction).u8(2);
    main.store_global("f");
    main.load_global("f").call(0).store_global("none");
    main.load_global("f").load_num(1.0).call(1).store_global("one");
    main.load_global("f").load_num(1.0).load_num(2.0).call(2).store_global("two");
    // Extra arguments beyond the formals are dropped.
    main.load_global("f").load_num(1.0).load_num(2.0).load_num(3.0).call(3).store_global("extra");
    main.halt();

    let code = main.build(&mut vm);
    vm.reset(code);
    vm.execute().unwrap();
    assert_eq!(vm.get_global("none").unwrap(), Value::Num(30.0));
    assert_eq!(vm.get_global("one").unwrap(), Value::Num(21.0));
    assert_eq!(vm.get_global("two").unwrap(), Value::Num(3.0));
    assert_eq!(vm.get_global("extra").unwrap(), Value::Num(3.0));
}
