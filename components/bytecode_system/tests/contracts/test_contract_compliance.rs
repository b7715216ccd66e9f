//! Contract tests for the binary chunk header and instruction layout.
//!
//! These values are shared with other producers and consumers of binary
//! chunks and must never drift.

use bytecode_system::{chunk, Instruction, OpCode, Prototype};

#[test]
fn contract_header_bytes() {
    let bytes = chunk::dump(&Prototype::new(), true);
    assert_eq!(&bytes[0..4], b"\x1bLua");
    assert_eq!(bytes[4], 0x54);
    assert_eq!(bytes[5], 0);
    assert_eq!(&bytes[6..12], b"\x19\x93\r\n\x1a\n");
    assert_eq!(&bytes[12..15], &[4, 8, 8]);
    assert_eq!(&bytes[15..23], &0x5678i64.to_le_bytes());
    assert_eq!(&bytes[23..31], &370.5f64.to_le_bytes());
    assert_eq!(bytes[31], 0, "main upvalue count");
}

#[test]
fn contract_instruction_bit_positions() {
    let i = Instruction::abc(OpCode::Move, 1, 2, 3, false);
    assert_eq!(i.0, (3 << 24) | (2 << 16) | (1 << 7));
    let k = Instruction::abc(OpCode::Move, 0, 0, 0, true);
    assert_eq!(k.0, 1 << 15);
}

#[test]
fn contract_empty_function_layout() {
    let bytes = chunk::dump(&Prototype::new(), true);
    // source, line_defined, last_line_defined, params, vararg, maxstack,
    // code, constants, upvalues, protos, 4 debug vectors
    assert_eq!(
        &bytes[32..],
        &[0x80, 0x80, 0x80, 0, 0, 0, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80]
    );
}
