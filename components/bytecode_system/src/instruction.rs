//! 32-bit instruction encoding
//!
//! ```text
//!   iABC   C(8)     |  B(8)   |k|   A(8)   |  Op(7) |
//!   iABx        Bx(17)        |   A(8)   |  Op(7) |
//!   iAsBx      sBx(17)        |   A(8)   |  Op(7) |
//!   iAx               Ax(25)             |  Op(7) |
//!   isJ               sJ(25)             |  Op(7) |
//! ```
//!
//! Signed operands are stored in excess-K form.

use crate::opcode::OpCode;

/// Width of the opcode field.
pub const SIZE_OP: u32 = 7;
/// Width of operand A.
pub const SIZE_A: u32 = 8;
/// Width of operand B.
pub const SIZE_B: u32 = 8;
/// Width of operand C.
pub const SIZE_C: u32 = 8;
/// Width of operand Bx.
pub const SIZE_BX: u32 = SIZE_C + SIZE_B + 1;
/// Width of operand Ax.
pub const SIZE_AX: u32 = SIZE_BX + SIZE_A;
/// Width of operand sJ.
pub const SIZE_SJ: u32 = SIZE_BX + SIZE_A;

const POS_A: u32 = SIZE_OP;
const POS_K: u32 = POS_A + SIZE_A;
const POS_B: u32 = POS_K + 1;
const POS_C: u32 = POS_B + SIZE_B;
const POS_BX: u32 = POS_K;
const POS_AX: u32 = POS_A;
const POS_SJ: u32 = POS_A;

/// Largest value of operand A.
pub const MAXARG_A: u32 = (1 << SIZE_A) - 1;
/// Largest value of operand B.
pub const MAXARG_B: u32 = (1 << SIZE_B) - 1;
/// Largest value of operand C.
pub const MAXARG_C: u32 = (1 << SIZE_C) - 1;
/// Largest value of operand Bx.
pub const MAXARG_BX: u32 = (1 << SIZE_BX) - 1;
/// Largest value of operand Ax.
pub const MAXARG_AX: u32 = (1 << SIZE_AX) - 1;
/// Largest value of operand sJ (before excess-K adjustment).
pub const MAXARG_SJ: u32 = (1 << SIZE_SJ) - 1;
/// Excess-K offset of sBx.
pub const OFFSET_SBX: i32 = (MAXARG_BX >> 1) as i32;
/// Excess-K offset of sJ.
pub const OFFSET_SJ: i32 = (MAXARG_SJ >> 1) as i32;
/// Excess-K offset of sB and sC.
pub const OFFSET_SC: i32 = (MAXARG_C >> 1) as i32;

/// Limit for the number of list items flushed per `SETLIST`.
pub const FIELDS_PER_FLUSH: u32 = 50;

fn mask(size: u32) -> u32 {
    (1u32 << size) - 1
}

/// One encoded instruction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Instruction(pub u32);

impl std::fmt::Debug for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.opcode() {
            Some(op) => write!(f, "{} {:#010x}", op.name(), self.0),
            None => write!(f, "?? {:#010x}", self.0),
        }
    }
}

impl Instruction {
    /// Encodes an `iABC` instruction.
    pub fn abc(op: OpCode, a: u32, b: u32, c: u32, k: bool) -> Self {
        Instruction(
            (op as u32)
                | ((a & MAXARG_A) << POS_A)
                | ((b & MAXARG_B) << POS_B)
                | ((c & MAXARG_C) << POS_C)
                | ((k as u32) << POS_K),
        )
    }

    /// Encodes an `iABx` instruction.
    pub fn abx(op: OpCode, a: u32, bx: u32) -> Self {
        Instruction((op as u32) | ((a & MAXARG_A) << POS_A) | ((bx & MAXARG_BX) << POS_BX))
    }

    /// Encodes an `iAsBx` instruction.
    pub fn asbx(op: OpCode, a: u32, sbx: i32) -> Self {
        Self::abx(op, a, (sbx + OFFSET_SBX) as u32)
    }

    /// Encodes an `iAx` instruction.
    pub fn ax(op: OpCode, ax: u32) -> Self {
        Instruction((op as u32) | ((ax & MAXARG_AX) << POS_AX))
    }

    /// Encodes an `isJ` instruction.
    pub fn sj(op: OpCode, sj: i32) -> Self {
        Instruction((op as u32) | ((((sj + OFFSET_SJ) as u32) & MAXARG_SJ) << POS_SJ))
    }

    /// Raw opcode number.
    #[inline]
    pub fn raw_opcode(self) -> u8 {
        (self.0 & mask(SIZE_OP)) as u8
    }

    /// Decoded opcode, `None` for an out-of-range number.
    #[inline]
    pub fn opcode(self) -> Option<OpCode> {
        OpCode::from_u8(self.raw_opcode())
    }

    /// Operand A.
    #[inline]
    pub fn a(self) -> u32 {
        (self.0 >> POS_A) & MAXARG_A
    }

    /// Operand B.
    #[inline]
    pub fn b(self) -> u32 {
        (self.0 >> POS_B) & MAXARG_B
    }

    /// Operand B read as signed.
    #[inline]
    pub fn sb(self) -> i32 {
        self.b() as i32 - OFFSET_SC
    }

    /// Operand C.
    #[inline]
    pub fn c(self) -> u32 {
        (self.0 >> POS_C) & MAXARG_C
    }

    /// Operand C read as signed.
    #[inline]
    pub fn sc(self) -> i32 {
        self.c() as i32 - OFFSET_SC
    }

    /// Flag k.
    #[inline]
    pub fn k(self) -> bool {
        (self.0 >> POS_K) & 1 != 0
    }

    /// Operand Bx.
    #[inline]
    pub fn bx(self) -> u32 {
        (self.0 >> POS_BX) & MAXARG_BX
    }

    /// Operand sBx.
    #[inline]
    pub fn sbx(self) -> i32 {
        self.bx() as i32 - OFFSET_SBX
    }

    /// Operand Ax.
    #[inline]
    pub fn ax_arg(self) -> u32 {
        (self.0 >> POS_AX) & MAXARG_AX
    }

    /// Operand sJ.
    #[inline]
    pub fn sj_arg(self) -> i32 {
        ((self.0 >> POS_SJ) & MAXARG_SJ) as i32 - OFFSET_SJ
    }

    /// Replaces operand sJ (used to patch forward jumps).
    pub fn set_sj(&mut self, sj: i32) {
        let field = MAXARG_SJ << POS_SJ;
        self.0 = (self.0 & !field) | ((((sj + OFFSET_SJ) as u32) & MAXARG_SJ) << POS_SJ);
    }

    /// Replaces operand Bx (used to patch loop offsets).
    pub fn set_bx(&mut self, bx: u32) {
        let field = MAXARG_BX << POS_BX;
        self.0 = (self.0 & !field) | ((bx & MAXARG_BX) << POS_BX);
    }
}

/// Ceiling of `log2(x)`; `NEWTABLE` encodes its hash-size hint this way.
pub fn ceil_log2(x: u32) -> u32 {
    if x <= 1 {
        0
    } else {
        32 - (x - 1).leading_zeros()
    }
}
