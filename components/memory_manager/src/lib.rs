//! Memory Manager - garbage-collected heap for the Corten Lua runtime
//!
//! This component provides:
//! - Typed generational arenas holding every collectable object
//! - The string intern table and Lua's hybrid array/hash tables
//! - Closures, upvalues, prototypes, userdata and thread stacks
//! - An incremental tri-color collector with an optional generational mode
//! - Weak tables, ephemerons and finalizer scheduling
//! - Write barriers that keep the collector invariants under mutation
//!
//! # Example
//!
//! ```
//! use core_types::Value;
//! use memory_manager::{Heap, HeapConfig};
//!
//! let mut heap = Heap::new(HeapConfig::default());
//! let t = heap.new_table();
//! let key = heap.new_str("answer");
//! heap.table_set(t, Value::String(key), Value::Integer(42)).unwrap();
//! assert_eq!(heap.table_get_str(t, key), Value::Integer(42));
//!
//! // `t` is not reachable from any root
//! heap.full_gc(false);
//! assert!(!heap.tables.contains(t));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arena;
pub mod gc;
pub mod heap;
pub mod object;
pub mod string;
pub mod table;
pub mod thread;
pub mod write_barrier;

// Re-export main types
pub use arena::{Age, Arena, GcHeader};
pub use gc::{GcKind, GcParams, GcPhase, GcState, StepOutcome, GCFINALIZECOST, GCFINMAX};
pub use heap::{Heap, HeapConfig, MEMERRMSG, RIDX_GLOBALS, RIDX_MAINTHREAD};
pub use object::{LClosure, NClosure, ProtoObj, Upval, Userdata};
pub use string::{hash_bytes, LuaString};
pub use table::{Table, TableError};
pub use thread::{
    CallInfo, CallStatus, ContinuationId, HookId, LuaThread, BASIC_STACK_SIZE, EXTRA_STACK,
    MIN_STACK, MULTRET,
};
