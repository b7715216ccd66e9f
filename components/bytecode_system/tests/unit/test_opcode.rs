//! Tests for opcode properties

use bytecode_system::{OpCode, OpMode};

#[test]
fn test_all_tests_are_abc() {
    for op in OpCode::ALL {
        if op.is_test() {
            assert_eq!(op.mode(), OpMode::IABC, "{}", op.name());
        }
    }
}

#[test]
fn test_loop_instructions_use_bx() {
    for op in [
        OpCode::ForLoop,
        OpCode::ForPrep,
        OpCode::TForPrep,
        OpCode::TForLoop,
        OpCode::Closure,
        OpCode::LoadK,
    ] {
        assert_eq!(op.mode(), OpMode::IABx);
    }
}

#[test]
fn test_top_protocol() {
    assert!(OpCode::VarArg.sets_top());
    assert!(OpCode::TailCall.sets_top());
    assert!(OpCode::SetList.uses_top());
    assert!(OpCode::VarArgPrep.uses_top());
    assert!(!OpCode::Move.uses_top());
}

#[test]
fn test_metamethod_fallbacks() {
    let mm: Vec<_> = OpCode::ALL.iter().filter(|op| op.is_mm()).collect();
    assert_eq!(mm, vec![&OpCode::MmBin, &OpCode::MmBinI, &OpCode::MmBinK]);
}

#[test]
fn test_names_are_unique() {
    let mut names: Vec<_> = OpCode::ALL.iter().map(|op| op.name()).collect();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), OpCode::ALL.len());
}
