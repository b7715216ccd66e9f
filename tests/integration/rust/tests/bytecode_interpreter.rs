//! Integration tests: bytecode_system chunks executed by the interpreter

use bytecode_system::{Constant, OpCode, ProtoBuilder};
use core_types::Status;
use integration_tests::run_proto;
use interpreter::State;

const TM_ADD: u32 = 6;

#[test]
fn test_numeric_for_loop_sum() {
    // local s = 0; for i = 1, 100 do s = s + i end; return s
    let mut b = ProtoBuilder::main("=sum");
    b.asbx(OpCode::LoadI, 0, 0);
    b.asbx(OpCode::LoadI, 1, 1);
    b.asbx(OpCode::LoadI, 2, 100);
    b.asbx(OpCode::LoadI, 3, 1);
    let prep = b.abx(OpCode::ForPrep, 1, 0);
    b.abc(OpCode::Add, 0, 0, 4, false);
    b.abc(OpCode::MmBin, 0, 4, TM_ADD, false);
    let lp = b.abx(OpCode::ForLoop, 1, 0);
    b.patch_bx(prep, (lp - prep - 1) as u32);
    b.patch_bx(lp, (lp - prep) as u32);
    b.abc(OpCode::Return, 0, 2, 1, false);

    let mut state = State::new();
    assert_eq!(run_proto(&mut state, &b.max_stack(5).build()), Status::Ok);
    assert_eq!(state.to_integer(-1), Some(5050));
}

#[test]
fn test_float_for_loop() {
    // local s = 0.0; for x = 0.5, 2.0, 0.5 do s = s + x end; return s
    let mut b = ProtoBuilder::main("=floats");
    let half = b.constant(Constant::Float(0.5));
    let two = b.constant(Constant::Float(2.0));
    b.asbx(OpCode::LoadF, 0, 0);
    b.abx(OpCode::LoadK, 1, half);
    b.abx(OpCode::LoadK, 2, two);
    b.abx(OpCode::LoadK, 3, half);
    let prep = b.abx(OpCode::ForPrep, 1, 0);
    b.abc(OpCode::Add, 0, 0, 4, false);
    b.abc(OpCode::MmBin, 0, 4, TM_ADD, false);
    let lp = b.abx(OpCode::ForLoop, 1, 0);
    b.patch_bx(prep, (lp - prep - 1) as u32);
    b.patch_bx(lp, (lp - prep) as u32);
    b.abc(OpCode::Return, 0, 2, 1, false);

    let mut state = State::new();
    assert_eq!(run_proto(&mut state, &b.max_stack(5).build()), Status::Ok);
    assert_eq!(state.to_number(-1), Some(5.0));
    assert!(!state.is_integer(-1));
}

#[test]
fn test_table_constructor_and_length() {
    // local t = {10, 20, 30}; return t, #t
    let mut b = ProtoBuilder::main("=table");
    b.abc(OpCode::NewTable, 0, 0, 3, false);
    b.extra_arg(0);
    b.asbx(OpCode::LoadI, 1, 10);
    b.asbx(OpCode::LoadI, 2, 20);
    b.asbx(OpCode::LoadI, 3, 30);
    b.abc(OpCode::SetList, 0, 3, 0, false);
    b.abc(OpCode::Len, 1, 0, 0, false);
    b.abc(OpCode::Return, 0, 3, 1, false);

    let mut state = State::new();
    assert_eq!(run_proto(&mut state, &b.max_stack(4).build()), Status::Ok);
    assert_eq!(state.get_top(), 2);
    assert_eq!(state.to_integer(2), Some(3));
    state.get_i(1, 2).unwrap();
    assert_eq!(state.to_integer(-1), Some(20));
}

#[test]
fn test_concat_mixes_strings_and_numbers() {
    // return "a" .. 1 .. "b"
    let mut b = ProtoBuilder::main("=concat");
    let ka = b.string("a");
    let kb = b.string("b");
    b.abx(OpCode::LoadK, 0, ka);
    b.asbx(OpCode::LoadI, 1, 1);
    b.abx(OpCode::LoadK, 2, kb);
    b.abc(OpCode::Concat, 0, 3, 0, false);
    b.abc(OpCode::Return, 0, 2, 1, false);

    let mut state = State::new();
    assert_eq!(run_proto(&mut state, &b.max_stack(3).build()), Status::Ok);
    assert_eq!(state.to_str(-1).as_deref(), Some("a1b"));
}

#[test]
fn test_runtime_error_carries_position_and_variable() {
    // (line 5) return x + 1
    let mut b = ProtoBuilder::main("=arith");
    let kx = b.string("x");
    b.set_line(5);
    b.abc(OpCode::GetTabUp, 0, 0, kx, false);
    b.asbx(OpCode::LoadI, 1, 1);
    b.abc(OpCode::Add, 2, 0, 1, false);
    b.abc(OpCode::MmBin, 0, 1, TM_ADD, false);
    b.abc(OpCode::Return, 2, 2, 1, false);

    let mut state = State::new();
    assert_eq!(run_proto(&mut state, &b.max_stack(3).build()), Status::Runtime);
    let msg = state.to_str(-1).unwrap();
    assert!(msg.starts_with("arith:5:"), "{}", msg);
    assert!(
        msg.contains("attempt to perform arithmetic on a nil value (global 'x')"),
        "{}",
        msg
    );
}

#[test]
fn test_globals_are_shared_with_host() {
    // y = x * 2 where the host defines x
    let mut b = ProtoBuilder::main("=globals");
    let kx = b.string("x");
    let ky = b.string("y");
    b.abc(OpCode::GetTabUp, 0, 0, kx, false);
    b.asbx(OpCode::LoadI, 1, 2);
    b.abc(OpCode::Mul, 0, 0, 1, false);
    b.abc(OpCode::MmBin, 0, 1, 8, false);
    b.abc(OpCode::SetTabUp, 0, ky, 0, false);
    b.abc(OpCode::Return, 0, 1, 1, false);

    let mut state = State::new();
    state.push_integer(21);
    state.set_global("x").unwrap();
    assert_eq!(run_proto(&mut state, &b.max_stack(2).build()), Status::Ok);
    state.get_global("y").unwrap();
    assert_eq!(state.to_integer(-1), Some(42));
}
