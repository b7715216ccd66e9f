//! Bytecode system for the Corten Lua runtime
//!
//! This crate provides the instruction set, function prototypes and the
//! binary chunk format consumed by the interpreter.
//!
//! # Features
//!
//! - Register-based 32-bit instruction encoding
//! - Complete opcode set with per-opcode properties
//! - Function prototypes with compressed line information
//! - A prototype assembler for hand-written bytecode
//! - Binary chunk serialization and validation
//!
//! # Example
//!
//! ```
//! use bytecode_system::{chunk, Constant, OpCode, ProtoBuilder};
//!
//! let mut b = ProtoBuilder::main("=example");
//!
//! // Add constants
//! let idx = b.constant(Constant::Integer(42));
//!
//! // Emit instructions
//! b.abx(OpCode::LoadK, 0, idx);
//! b.abc(OpCode::Return1, 0, 0, 0, false);
//! let proto = b.build();
//!
//! // Serialize
//! let bytes = chunk::dump(&proto, false);
//! let restored = chunk::undump(&bytes).unwrap();
//! assert_eq!(restored.constants, proto.constants);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod chunk;
pub mod instruction;
pub mod opcode;
pub mod proto;
pub mod value;

// Re-export main types at crate root
pub use builder::ProtoBuilder;
pub use chunk::ChunkError;
pub use instruction::Instruction;
pub use opcode::{OpCode, OpMode};
pub use proto::{AbsLineInfo, LocVar, Prototype, UpvalueDesc, VarKind};
pub use value::{Constant, MAX_SHORT_LEN};
