//! Status codes and the error value carried through `Result`s.
//!
//! Errors are ordinary values: a runtime error can carry a string, a table,
//! or anything else the script raised. [`LuaError`] pairs that value with the
//! [`Status`] describing what kind of failure (or suspension) is unwinding.

use crate::Value;
use thiserror::Error;

/// Completion status of a call, resume, or load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Status {
    /// Finished normally
    #[error("ok")]
    Ok,
    /// Coroutine suspended
    #[error("yield")]
    Yield,
    /// Runtime error (type mismatch, bad argument, raised value)
    #[error("runtime error")]
    Runtime,
    /// Malformed chunk or front-end failure
    #[error("syntax error")]
    Syntax,
    /// Allocation failure
    #[error("not enough memory")]
    Memory,
    /// A message handler failed while handling an error
    #[error("error in error handling")]
    ErrorHandler,
}

impl Status {
    /// Numeric code compatible with the reference C API.
    pub fn code(self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::Yield => 1,
            Status::Runtime => 2,
            Status::Syntax => 3,
            Status::Memory => 4,
            Status::ErrorHandler => 5,
        }
    }

    /// True for the statuses that represent failures.
    pub fn is_error(self) -> bool {
        !matches!(self, Status::Ok | Status::Yield)
    }
}

/// A non-local transfer in flight: an error or a coroutine suspension.
///
/// The runtime also anchors `value` on the raising thread's stack, so it
/// stays alive while the `Result` unwinds back to the nearest recovery point.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("{status}")]
pub struct LuaError {
    /// Kind of transfer
    pub status: Status,
    /// Error object (`nil` for yields)
    pub value: Value,
}

impl LuaError {
    /// Builds an error with the given status and value.
    pub fn new(status: Status, value: Value) -> Self {
        Self { status, value }
    }

    /// Builds a runtime error.
    pub fn runtime(value: Value) -> Self {
        Self::new(Status::Runtime, value)
    }

    /// The marker used to unwind native frames on a yield.
    pub fn yield_marker() -> Self {
        Self::new(Status::Yield, Value::Nil)
    }

    /// True when this is a yield rather than an error.
    pub fn is_yield(&self) -> bool {
        self.status == Status::Yield
    }
}

/// Result type used by every fallible runtime operation.
pub type LuaResult<T> = Result<T, LuaError>;
