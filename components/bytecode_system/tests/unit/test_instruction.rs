//! Tests for instruction encoding

use bytecode_system::instruction::{MAXARG_A, MAXARG_BX, OFFSET_SBX, OFFSET_SC};
use bytecode_system::{Instruction, OpCode};

#[test]
fn test_abc_extremes() {
    let i = Instruction::abc(OpCode::SetList, MAXARG_A, 255, 255, true);
    assert_eq!(i.a(), MAXARG_A);
    assert_eq!(i.b(), 255);
    assert_eq!(i.c(), 255);
    assert!(i.k());
    assert_eq!(i.opcode(), Some(OpCode::SetList));
}

#[test]
fn test_bx_extremes() {
    let i = Instruction::abx(OpCode::LoadK, 7, MAXARG_BX);
    assert_eq!(i.bx(), MAXARG_BX);
    assert_eq!(i.a(), 7);
}

#[test]
fn test_sbx_range() {
    let lo = Instruction::asbx(OpCode::LoadI, 0, -OFFSET_SBX);
    let hi = Instruction::asbx(OpCode::LoadI, 0, OFFSET_SBX);
    assert_eq!(lo.sbx(), -OFFSET_SBX);
    assert_eq!(hi.sbx(), OFFSET_SBX);
}

#[test]
fn test_signed_c_operand() {
    let i = Instruction::abc(OpCode::AddI, 0, 1, (OFFSET_SC + 10) as u32, false);
    assert_eq!(i.sc(), 10);
}

#[test]
fn test_ax_operand() {
    let i = Instruction::ax(OpCode::ExtraArg, 1 << 20);
    assert_eq!(i.ax_arg(), 1 << 20);
    assert_eq!(i.opcode(), Some(OpCode::ExtraArg));
}

#[test]
fn test_unknown_opcode_decodes_to_none() {
    let i = Instruction(0x7f);
    assert_eq!(i.opcode(), None);
    assert_eq!(i.raw_opcode(), 0x7f);
}
