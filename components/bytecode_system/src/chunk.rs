//! Binary chunk format - precompiled prototype serialization
//!
//! Layout:
//!
//! ```text
//! header   "\x1bLua" version(0x54) format(0) "\x19\x93\r\n\x1a\n"
//!          sizeof(Instruction)=4 sizeof(Integer)=8 sizeof(Number)=8
//!          0x5678 as Integer, 370.5 as Number
//! nupvals  byte (upvalue count of the main function)
//! function source, line_defined, last_line_defined, num_params, is_vararg,
//!          max_stack_size, code, constants, upvalues, protos, debug
//! ```
//!
//! Sizes and counts are varints: 7 bits per byte, most significant group
//! first, the final byte flagged with `0x80`. Strings are stored as
//! `size + 1` followed by the bytes, `0` meaning "no string". Fixed-width
//! integers, floats and instructions are little-endian; the sentinel values
//! in the header catch a mismatch.
//!
//! Loading is pure: it builds a [`Prototype`] tree and touches no runtime
//! state, so a rejected chunk cannot leave anything half-installed.

use crate::instruction::Instruction;
use crate::proto::{AbsLineInfo, LocVar, Prototype, UpvalueDesc, VarKind};
use crate::value::{Constant, MAX_SHORT_LEN};
use core_types::variant;
use std::rc::Rc;
use thiserror::Error;

/// First four bytes of every binary chunk.
pub const SIGNATURE: &[u8; 4] = b"\x1bLua";
/// Format version (major * 16 + minor).
pub const VERSION: u8 = 0x54;
/// Official format number.
pub const FORMAT: u8 = 0;
/// Bytes that detect text-mode transfer corruption.
pub const DATA: &[u8; 6] = b"\x19\x93\r\n\x1a\n";
/// Size of an instruction.
pub const INSTRUCTION_SIZE: u8 = 4;
/// Size of an integer.
pub const INTEGER_SIZE: u8 = 8;
/// Size of a float.
pub const NUMBER_SIZE: u8 = 8;
/// Integer sentinel.
pub const CHECK_INTEGER: i64 = 0x5678;
/// Float sentinel.
pub const CHECK_NUMBER: f64 = 370.5;

/// Reasons a binary chunk is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    /// Input ended early
    #[error("truncated chunk")]
    Truncated,
    /// Signature does not match
    #[error("not a binary chunk")]
    NotBinary,
    /// Version byte does not match
    #[error("version mismatch")]
    VersionMismatch,
    /// Format byte does not match
    #[error("format mismatch")]
    FormatMismatch,
    /// Conversion-detection bytes were altered
    #[error("corrupted chunk")]
    Corrupted,
    /// One of the size bytes does not match
    #[error("{0} size mismatch")]
    SizeMismatch(&'static str),
    /// Integer sentinel does not match
    #[error("integer format mismatch")]
    IntegerFormat,
    /// Float sentinel does not match
    #[error("float format mismatch")]
    FloatFormat,
    /// A varint does not fit its destination
    #[error("integer overflow")]
    IntegerOverflow,
    /// A string constant was recorded as absent
    #[error("bad format for constant string")]
    BadConstantString,
    /// Unknown constant tag
    #[error("bad constant tag {0:#04x}")]
    BadConstantTag(u8),
    /// Unknown upvalue kind
    #[error("bad upvalue kind {0}")]
    BadUpvalueKind(u8),
    /// Instruction with an unknown opcode
    #[error("bad opcode {0} at instruction {1}")]
    BadOpcode(u8, usize),
}

// ============================================================================
// Dump
// ============================================================================

struct DumpState {
    out: Vec<u8>,
    strip: bool,
}

impl DumpState {
    fn byte(&mut self, b: u8) {
        self.out.push(b);
    }

    fn size(&mut self, mut x: usize) {
        let mut buf = [0u8; 10];
        let mut n = 0;
        loop {
            n += 1;
            buf[buf.len() - n] = (x & 0x7f) as u8;
            x >>= 7;
            if x == 0 {
                break;
            }
        }
        let last = buf.len() - 1;
        buf[last] |= 0x80;
        self.out.extend_from_slice(&buf[buf.len() - n..]);
    }

    fn string(&mut self, s: Option<&[u8]>) {
        match s {
            None => self.size(0),
            Some(bytes) => {
                self.size(bytes.len() + 1);
                self.out.extend_from_slice(bytes);
            }
        }
    }

    fn header(&mut self) {
        self.out.extend_from_slice(SIGNATURE);
        self.byte(VERSION);
        self.byte(FORMAT);
        self.out.extend_from_slice(DATA);
        self.byte(INSTRUCTION_SIZE);
        self.byte(INTEGER_SIZE);
        self.byte(NUMBER_SIZE);
        self.out.extend_from_slice(&CHECK_INTEGER.to_le_bytes());
        self.out.extend_from_slice(&CHECK_NUMBER.to_le_bytes());
    }

    fn function(&mut self, f: &Prototype, parent_source: Option<&[u8]>) {
        if self.strip || f.source.as_deref() == parent_source {
            self.string(None);
        } else {
            self.string(f.source.as_deref());
        }
        self.size(f.line_defined as usize);
        self.size(f.last_line_defined as usize);
        self.byte(f.num_params);
        self.byte(f.is_vararg as u8);
        self.byte(f.max_stack_size);

        self.size(f.code.len());
        for i in &f.code {
            self.out.extend_from_slice(&i.0.to_le_bytes());
        }

        self.size(f.constants.len());
        for k in &f.constants {
            self.byte(k.variant_tag());
            match k {
                Constant::Nil | Constant::Boolean(_) => {}
                Constant::Integer(i) => self.out.extend_from_slice(&i.to_le_bytes()),
                Constant::Float(n) => self.out.extend_from_slice(&n.to_le_bytes()),
                Constant::String(s) => self.string(Some(s)),
            }
        }

        self.size(f.upvalues.len());
        for uv in &f.upvalues {
            self.byte(uv.in_stack as u8);
            self.byte(uv.index);
            self.byte(uv.kind as u8);
        }

        self.size(f.protos.len());
        for p in &f.protos {
            self.function(p, f.source.as_deref());
        }

        self.debug(f);
    }

    fn debug(&mut self, f: &Prototype) {
        let strip = self.strip;
        if strip {
            self.size(0);
        } else {
            self.size(f.line_info.len());
            self.out.extend(f.line_info.iter().map(|&d| d as u8));
        }
        let abs: &[AbsLineInfo] = if strip { &[] } else { &f.abs_line_info };
        self.size(abs.len());
        for entry in abs {
            self.size(entry.pc as usize);
            self.size(entry.line as usize);
        }
        let locals: &[LocVar] = if strip { &[] } else { &f.loc_vars };
        self.size(locals.len());
        for var in locals {
            self.string(Some(&var.name));
            self.size(var.start_pc as usize);
            self.size(var.end_pc as usize);
        }
        let upvalues: &[UpvalueDesc] = if strip { &[] } else { &f.upvalues };
        self.size(upvalues.len());
        for uv in upvalues {
            self.string(uv.name.as_deref());
        }
    }
}

/// Serializes a main-function prototype to a binary chunk.
///
/// With `strip`, debug information (source, lines, locals, upvalue names) is
/// omitted.
pub fn dump(proto: &Prototype, strip: bool) -> Vec<u8> {
    let mut d = DumpState {
        out: Vec::new(),
        strip,
    };
    d.header();
    d.byte(proto.upvalues.len() as u8);
    d.function(proto, None);
    d.out
}

// ============================================================================
// Undump
// ============================================================================

struct LoadState<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> LoadState<'a> {
    fn block(&mut self, n: usize) -> Result<&'a [u8], ChunkError> {
        let end = self.pos.checked_add(n).ok_or(ChunkError::Truncated)?;
        let slice = self.data.get(self.pos..end).ok_or(ChunkError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8, ChunkError> {
        Ok(self.block(1)?[0])
    }

    fn unsigned(&mut self, limit: usize) -> Result<usize, ChunkError> {
        let limit = limit >> 7;
        let mut x = 0usize;
        loop {
            let b = self.byte()?;
            if x >= limit {
                return Err(ChunkError::IntegerOverflow);
            }
            x = (x << 7) | (b & 0x7f) as usize;
            if b & 0x80 != 0 {
                return Ok(x);
            }
        }
    }

    fn size(&mut self) -> Result<usize, ChunkError> {
        self.unsigned(usize::MAX)
    }

    fn int(&mut self) -> Result<u32, ChunkError> {
        Ok(self.unsigned(i32::MAX as usize)? as u32)
    }

    fn count(&mut self) -> Result<usize, ChunkError> {
        let n = self.int()? as usize;
        if n > self.data.len() - self.pos {
            return Err(ChunkError::Truncated);
        }
        Ok(n)
    }

    fn integer(&mut self) -> Result<i64, ChunkError> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.block(8)?);
        Ok(i64::from_le_bytes(bytes))
    }

    fn number(&mut self) -> Result<f64, ChunkError> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.block(8)?);
        Ok(f64::from_le_bytes(bytes))
    }

    fn string(&mut self) -> Result<Option<Vec<u8>>, ChunkError> {
        let size = self.size()?;
        if size == 0 {
            return Ok(None);
        }
        Ok(Some(self.block(size - 1)?.to_vec()))
    }

    fn literal(&mut self, expected: &[u8], err: ChunkError) -> Result<(), ChunkError> {
        if self.block(expected.len())? != expected {
            return Err(err);
        }
        Ok(())
    }

    fn check_size(&mut self, expected: u8, what: &'static str) -> Result<(), ChunkError> {
        if self.byte()? != expected {
            return Err(ChunkError::SizeMismatch(what));
        }
        Ok(())
    }

    fn header(&mut self) -> Result<(), ChunkError> {
        self.literal(SIGNATURE, ChunkError::NotBinary)?;
        if self.byte()? != VERSION {
            return Err(ChunkError::VersionMismatch);
        }
        if self.byte()? != FORMAT {
            return Err(ChunkError::FormatMismatch);
        }
        self.literal(DATA, ChunkError::Corrupted)?;
        self.check_size(INSTRUCTION_SIZE, "Instruction")?;
        self.check_size(INTEGER_SIZE, "lua_Integer")?;
        self.check_size(NUMBER_SIZE, "lua_Number")?;
        if self.integer()? != CHECK_INTEGER {
            return Err(ChunkError::IntegerFormat);
        }
        if self.number()? != CHECK_NUMBER {
            return Err(ChunkError::FloatFormat);
        }
        Ok(())
    }

    fn function(&mut self, parent_source: Option<&[u8]>) -> Result<Prototype, ChunkError> {
        let mut f = Prototype::new();
        f.source = self.string()?.or_else(|| parent_source.map(<[u8]>::to_vec));
        f.line_defined = self.int()?;
        f.last_line_defined = self.int()?;
        f.num_params = self.byte()?;
        f.is_vararg = self.byte()? != 0;
        f.max_stack_size = self.byte()?;

        let n = self.count()?;
        f.code.reserve(n);
        for pc in 0..n {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(self.block(4)?);
            let instruction = Instruction(u32::from_le_bytes(raw));
            if instruction.opcode().is_none() {
                return Err(ChunkError::BadOpcode(instruction.raw_opcode(), pc));
            }
            f.code.push(instruction);
        }

        let n = self.count()?;
        f.constants.reserve(n);
        for _ in 0..n {
            let tag = self.byte()?;
            let constant = match tag {
                variant::NIL => Constant::Nil,
                variant::FALSE => Constant::Boolean(false),
                variant::TRUE => Constant::Boolean(true),
                variant::FLOAT => Constant::Float(self.number()?),
                variant::INTEGER => Constant::Integer(self.integer()?),
                variant::SHORT_STRING | variant::LONG_STRING => {
                    let s = self.string()?.ok_or(ChunkError::BadConstantString)?;
                    if tag == variant::SHORT_STRING && s.len() > MAX_SHORT_LEN {
                        return Err(ChunkError::BadConstantString);
                    }
                    Constant::String(s)
                }
                other => return Err(ChunkError::BadConstantTag(other)),
            };
            f.constants.push(constant);
        }

        let n = self.count()?;
        f.upvalues.reserve(n);
        for _ in 0..n {
            let in_stack = self.byte()? != 0;
            let index = self.byte()?;
            let raw_kind = self.byte()?;
            let kind = VarKind::from_u8(raw_kind).ok_or(ChunkError::BadUpvalueKind(raw_kind))?;
            f.upvalues.push(UpvalueDesc {
                name: None,
                in_stack,
                index,
                kind,
            });
        }

        let n = self.count()?;
        f.protos.reserve(n);
        for _ in 0..n {
            let child = self.function(f.source.as_deref())?;
            f.protos.push(Rc::new(child));
        }

        self.debug(&mut f)?;
        Ok(f)
    }

    fn debug(&mut self, f: &mut Prototype) -> Result<(), ChunkError> {
        let n = self.count()?;
        f.line_info = self.block(n)?.iter().map(|&b| b as i8).collect();

        let n = self.count()?;
        f.abs_line_info.reserve(n);
        for _ in 0..n {
            let pc = self.int()?;
            let line = self.int()?;
            f.abs_line_info.push(AbsLineInfo { pc, line });
        }

        let n = self.count()?;
        f.loc_vars.reserve(n);
        for _ in 0..n {
            let name = self.string()?.unwrap_or_default();
            let start_pc = self.int()?;
            let end_pc = self.int()?;
            f.loc_vars.push(LocVar {
                name,
                start_pc,
                end_pc,
            });
        }

        let n = self.count()?;
        for i in 0..n {
            let name = self.string()?;
            if let Some(uv) = f.upvalues.get_mut(i) {
                uv.name = name;
            }
        }
        Ok(())
    }
}

/// Parses a binary chunk into its main prototype.
///
/// # Examples
///
/// ```
/// use bytecode_system::{chunk, ProtoBuilder};
///
/// let proto = ProtoBuilder::main("=demo").build();
/// let bytes = chunk::dump(&proto, false);
/// let loaded = chunk::undump(&bytes).unwrap();
/// assert_eq!(loaded.code, proto.code);
///
/// let mut bad = bytes.clone();
/// bad[12] = 8; // instruction size byte
/// assert!(chunk::undump(&bad).is_err());
/// ```
pub fn undump(data: &[u8]) -> Result<Prototype, ChunkError> {
    let mut s = LoadState { data, pos: 0 };
    s.header()?;
    let _nupvalues = s.byte()?;
    s.function(None)
}

/// Whether `data` starts like a binary chunk (first signature byte).
pub fn is_binary(data: &[u8]) -> bool {
    data.first() == Some(&SIGNATURE[0])
}
