//! Prototype assembler
//!
//! A small builder for hand-written bytecode. It keeps the line table in the
//! same compressed form a compiler front end produces, so prototypes built
//! here behave exactly like loaded ones in tracebacks and line hooks.

use crate::instruction::Instruction;
use crate::opcode::OpCode;
use crate::proto::{
    AbsLineInfo, LocVar, Prototype, UpvalueDesc, ABS_LINE_INFO, LIM_LINE_DIFF,
    MAX_INSTRUCTIONS_WITHOUT_ABS,
};
use crate::value::Constant;
use std::rc::Rc;

/// Incrementally assembles a [`Prototype`].
///
/// # Examples
///
/// ```
/// use bytecode_system::{Constant, OpCode, ProtoBuilder};
///
/// let mut b = ProtoBuilder::main("=example");
/// let k = b.constant(Constant::Integer(42));
/// b.abx(OpCode::LoadK, 0, k);
/// b.abc(OpCode::Return1, 0, 0, 0, false);
/// let proto = b.max_stack(2).build();
/// assert_eq!(proto.code.len(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct ProtoBuilder {
    proto: Prototype,
    line: u32,
    previous_line: u32,
    since_abs: usize,
}

impl ProtoBuilder {
    /// Starts a nested function defined at `line_defined`.
    pub fn function(line_defined: u32) -> Self {
        let proto = Prototype {
            line_defined,
            last_line_defined: line_defined,
            max_stack_size: 2,
            ..Prototype::default()
        };
        Self {
            proto,
            line: line_defined,
            previous_line: line_defined,
            since_abs: 0,
        }
    }

    /// Starts a main chunk: vararg, one `_ENV` upvalue, `VARARGPREP 0`.
    pub fn main(source: &str) -> Self {
        let mut b = Self::function(0);
        b.proto.source = Some(source.as_bytes().to_vec());
        b.proto.is_vararg = true;
        b.proto.upvalues.push(UpvalueDesc::local("_ENV", 0));
        b.line = 1;
        b.abc(OpCode::VarArgPrep, 0, 0, 0, false);
        b
    }

    /// Sets the chunk name.
    pub fn source(mut self, source: &str) -> Self {
        self.proto.source = Some(source.as_bytes().to_vec());
        self
    }

    /// Sets the parameter count and vararg flag.
    pub fn params(mut self, num_params: u8, is_vararg: bool) -> Self {
        self.proto.num_params = num_params;
        self.proto.is_vararg = is_vararg;
        self
    }

    /// Sets the register count.
    pub fn max_stack(mut self, size: u8) -> Self {
        self.proto.max_stack_size = size;
        self
    }

    /// Sets the last line of the definition.
    pub fn last_line(mut self, line: u32) -> Self {
        self.proto.last_line_defined = line;
        self
    }

    /// Source line attributed to the following instructions.
    pub fn set_line(&mut self, line: u32) -> &mut Self {
        self.line = line;
        self
    }

    /// Index the next instruction will get.
    pub fn pc(&self) -> usize {
        self.proto.code.len()
    }

    /// Appends an encoded instruction and records its line.
    pub fn emit(&mut self, instruction: Instruction) -> usize {
        let pc = self.proto.code.len();
        self.proto.code.push(instruction);
        let diff = self.line as i64 - self.previous_line as i64;
        let needs_abs = diff.abs() >= LIM_LINE_DIFF as i64
            || self.since_abs >= MAX_INSTRUCTIONS_WITHOUT_ABS;
        self.since_abs += 1;
        if needs_abs {
            self.proto.abs_line_info.push(AbsLineInfo {
                pc: pc as u32,
                line: self.line,
            });
            self.proto.line_info.push(ABS_LINE_INFO);
            self.since_abs = 1;
        } else {
            self.proto.line_info.push(diff as i8);
        }
        self.previous_line = self.line;
        pc
    }

    /// Emits an `iABC` instruction.
    pub fn abc(&mut self, op: OpCode, a: u32, b: u32, c: u32, k: bool) -> usize {
        self.emit(Instruction::abc(op, a, b, c, k))
    }

    /// Emits an `iABx` instruction.
    pub fn abx(&mut self, op: OpCode, a: u32, bx: u32) -> usize {
        self.emit(Instruction::abx(op, a, bx))
    }

    /// Emits an `iAsBx` instruction.
    pub fn asbx(&mut self, op: OpCode, a: u32, sbx: i32) -> usize {
        self.emit(Instruction::asbx(op, a, sbx))
    }

    /// Emits a jump with a placeholder offset; see [`ProtoBuilder::patch_jump`].
    pub fn jump(&mut self) -> usize {
        self.emit(Instruction::sj(OpCode::Jmp, 0))
    }

    /// Emits an `EXTRAARG`.
    pub fn extra_arg(&mut self, ax: u32) -> usize {
        self.emit(Instruction::ax(OpCode::ExtraArg, ax))
    }

    /// Points the jump at `pc` to `target`.
    pub fn patch_jump(&mut self, pc: usize, target: usize) {
        let offset = target as i32 - (pc as i32 + 1);
        self.proto.code[pc].set_sj(offset);
    }

    /// Sets the `Bx` operand of the loop instruction at `pc`.
    pub fn patch_bx(&mut self, pc: usize, bx: u32) {
        self.proto.code[pc].set_bx(bx);
    }

    /// Adds (or reuses) a constant, returning its index.
    pub fn constant(&mut self, constant: Constant) -> u32 {
        if let Some(i) = self.proto.constants.iter().position(|c| c.same_as(&constant)) {
            return i as u32;
        }
        self.proto.constants.push(constant);
        (self.proto.constants.len() - 1) as u32
    }

    /// Adds a string constant.
    pub fn string(&mut self, s: &str) -> u32 {
        self.constant(Constant::string(s))
    }

    /// Declares an upvalue, returning its index.
    pub fn upvalue(&mut self, desc: UpvalueDesc) -> u32 {
        self.proto.upvalues.push(desc);
        (self.proto.upvalues.len() - 1) as u32
    }

    /// Records a named local active over `[start_pc, end_pc)`.
    pub fn local(&mut self, name: &str, start_pc: usize, end_pc: usize) {
        self.proto.loc_vars.push(LocVar {
            name: name.as_bytes().to_vec(),
            start_pc: start_pc as u32,
            end_pc: end_pc as u32,
        });
    }

    /// Adds a nested prototype, returning the index used by `CLOSURE`.
    pub fn child(&mut self, proto: Prototype) -> u32 {
        self.proto.protos.push(Rc::new(proto));
        (self.proto.protos.len() - 1) as u32
    }

    /// Finishes the prototype.
    pub fn build(self) -> Prototype {
        self.proto
    }
}
