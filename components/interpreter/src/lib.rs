//! Embeddable Lua runtime core
//!
//! This crate executes the register bytecode of `bytecode_system` on top of
//! the object heap of `memory_manager`:
//! - Stack-based embedding API with pseudo-indices and a registry
//! - Call machinery with tail calls, varargs and protected calls
//! - Stackful coroutines with yields across native continuations
//! - Metamethod dispatch and to-be-closed variables
//! - Debug introspection, hooks and tracebacks
//! - Incremental and generational collection driven from safe points
//!
//! # Example
//!
//! ```
//! use bytecode_system::{chunk, Constant, OpCode, ProtoBuilder};
//! use interpreter::State;
//! use core_types::Status;
//!
//! let mut b = ProtoBuilder::main("=example");
//! let k = b.constant(Constant::Integer(42));
//! b.abx(OpCode::LoadK, 0, k);
//! b.abc(OpCode::Return, 0, 2, 1, false);
//! let bytes = chunk::dump(&b.build(), false);
//!
//! let mut state = State::new();
//! assert_eq!(state.load(&bytes, "=example", None), Status::Ok);
//! state.call(0, 1).unwrap();
//! assert_eq!(state.to_integer(-1), Some(42));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod aux;
pub mod config;
pub mod coroutine;
pub mod debug;
pub mod dispatch;
pub mod do_call;
pub mod gc_integration;
pub mod load;
pub mod metamethod;
pub mod state;
pub mod upvalue;
pub mod vm;

// Re-export main types at crate root
pub use api::{upvalue_index, CompareOp, MAX_UPVALUES, REGISTRY_INDEX};
pub use aux::{NOREF, REFNIL};
pub use config::{ConfigError, GcMode, RuntimeConfig};
pub use coroutine::CoroutineStatus;
pub use debug::{DebugInfo, HookEvent, UpvalueId, MASK_CALL, MASK_COUNT, MASK_LINE, MASK_RET};
pub use gc_integration::{GcCommand, GcReply};
pub use load::Compiler;
pub use state::{ContinuationFn, HookFn, NativeFn, PanicFn, State, WarnFn};
pub use vm::ArithOp;
