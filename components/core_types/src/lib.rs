//! Core value types, status codes and number coercion for the Corten Lua
//! runtime.
//!
//! This crate provides the foundational, heap-independent types shared by
//! every other component: the tagged [`Value`], the typed GC handles that
//! reference heap objects, the [`Status`]/[`LuaError`] pair used for
//! non-local error propagation, metamethod events, and the string/number
//! conversions the virtual machine applies.
//!
//! # Overview
//!
//! - [`Value`] - Tagged representation of runtime values
//! - [`GcRef`] - Common trait of the typed handles ([`StrRef`], [`TableRef`], ...)
//! - [`LuaError`] - An error (or yield) in flight, with its [`Status`]
//! - [`TagMethod`] - Metamethod events in their fixed order
//! - [`StackFrame`] - Call stack frame information for tracebacks
//!
//! # Examples
//!
//! ```
//! use core_types::{str_to_number, LuaError, Status, Value};
//!
//! let n = str_to_number(b"0x10").unwrap();
//! assert_eq!(n, Value::Integer(16));
//!
//! let err = LuaError::runtime(Value::Integer(42));
//! assert_eq!(err.status, Status::Runtime);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod error;
mod number;
mod source;
mod tag_method;
mod value;

pub use error::{LuaError, LuaResult, Status};
pub use number::{
    float_floor_div, float_mod, float_pow, float_to_integer, format_float, format_g14,
    int_floor_div, int_mod, le_float_int, le_int_float, lt_float_int, lt_int_float,
    number_to_string, shift_left, str_to_number, to_integer_exact, DivByZero, F2I,
};
pub use source::{chunk_id, FrameKind, StackFrame, ID_SIZE};
pub use tag_method::{TagMethod, TM_COUNT};
pub use value::{
    variant, GcObjectRef, GcRef, LClosureRef, LuaType, NClosureRef, NativeFnId, ProtoRef,
    StrRef, TableRef, ThreadRef, UpvalRef, UserdataRef, Value, BIT_COLLECTABLE, NO_VALUE_NAME,
    NUM_TYPES,
};
