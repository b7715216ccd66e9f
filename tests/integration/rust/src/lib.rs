//! Integration test suite for the Corten Lua runtime
//!
//! This crate provides integration tests that verify components work
//! together correctly across component boundaries.

/// Re-export components for test convenience
pub mod components {
    pub use bytecode_system;
    pub use core_types;
    pub use interpreter;
    pub use memory_manager;
}

use bytecode_system::{chunk, Prototype};
use core_types::Status;
use interpreter::State;

/// Loads `proto` through its binary form, leaving the main function on the
/// stack.
pub fn load_proto(state: &mut State, proto: &Prototype) -> Status {
    let bytes = chunk::dump(proto, false);
    state.load(&bytes, "=test", Some("b"))
}

/// Loads and runs `proto` in protected mode, keeping every result.
pub fn run_proto(state: &mut State, proto: &Prototype) -> Status {
    match load_proto(state, proto) {
        Status::Ok => state.pcall(0, memory_manager::MULTRET, 0),
        status => status,
    }
}
