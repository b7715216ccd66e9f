//! Contract tests for interpreter API
//!
//! These tests pin the observable conventions hosts rely on: status codes,
//! pseudo-indices, configuration handling and protected-call results.

use bytecode_system::{chunk, OpCode, ProtoBuilder};
use core_types::{LuaResult, Status};
use interpreter::{
    upvalue_index, ConfigError, CoroutineStatus, GcCommand, GcMode, GcReply, RuntimeConfig, State,
    NOREF, REFNIL, REGISTRY_INDEX,
};

/// Status codes are stable.
#[test]
fn test_status_codes_contract() {
    let codes: Vec<i32> = [
        Status::Ok,
        Status::Yield,
        Status::Runtime,
        Status::Syntax,
        Status::Memory,
        Status::ErrorHandler,
    ]
    .iter()
    .map(|s| s.code())
    .collect();
    assert_eq!(codes, vec![0, 1, 2, 3, 4, 5]);
}

/// Pseudo-indices sit below every valid stack index.
#[test]
fn test_pseudo_indices_contract() {
    assert!(REGISTRY_INDEX < -1_000_000);
    assert_eq!(upvalue_index(1), REGISTRY_INDEX - 1);
    assert_eq!(REFNIL, -1);
    assert_eq!(NOREF, -2);
}

/// A fresh state has an empty stack and a running collector.
#[test]
fn test_new_state_contract() {
    let mut state = State::new();
    assert_eq!(state.get_top(), 0);
    assert!(state.is_main_thread());
    assert_eq!(state.gc(GcCommand::IsRunning).unwrap(), GcReply::Flag(true));
    assert!(state.is_table(REGISTRY_INDEX));
    state.close();
}

/// Invalid configurations are refused before a state exists.
#[test]
fn test_config_validation_contract() {
    let config = RuntimeConfig {
        max_native_calls: 0,
        ..RuntimeConfig::default()
    };
    assert!(matches!(
        State::with_config(config),
        Err(ConfigError::OutOfRange {
            field: "max_native_calls",
            ..
        })
    ));

    let config = RuntimeConfig {
        gc_mode: GcMode::Generational,
        ..RuntimeConfig::default()
    };
    let mut state = State::with_config(config).unwrap();
    let reply = state
        .gc(GcCommand::Incremental {
            pause: 0,
            step_mul: 0,
            step_size: 0,
        })
        .unwrap();
    assert_eq!(reply, GcReply::Mode(GcMode::Generational));
}

/// pcall leaves exactly the error object in place of function and arguments.
#[test]
fn test_pcall_error_contract() {
    fn raise_table(state: &mut State) -> LuaResult<usize> {
        state.new_table()?;
        Err(state.error())
    }
    let mut state = State::new();
    state.push_native(raise_table);
    state.push_integer(1);
    state.push_integer(2);
    assert_eq!(state.pcall(2, 3, 0), Status::Runtime);
    assert_eq!(state.get_top(), 1);
    assert!(state.is_table(-1));
}

/// Loading never runs the chunk and honours the mode argument.
#[test]
fn test_load_contract() {
    let mut b = ProtoBuilder::main("=c");
    b.abc(OpCode::Return, 0, 1, 1, false);
    let bytes = chunk::dump(&b.build(), true);
    let mut state = State::new();
    assert_eq!(state.load(&bytes, "=c", Some("t")), Status::Syntax);
    assert_eq!(
        state.to_str(-1).as_deref(),
        Some("attempt to load a binary chunk (mode is 't')")
    );
    state.pop(1).unwrap();
    assert_eq!(state.load(&bytes, "=c", Some("bt")), Status::Ok);
    assert!(state.is_function(-1));
    assert_eq!(state.get_top(), 1);
}

/// A thread with nothing to run is suspended; a finished one is dead.
#[test]
fn test_coroutine_status_contract() {
    fn identity(state: &mut State) -> LuaResult<usize> {
        Ok(state.get_top() as usize)
    }
    let mut state = State::new();
    let co = state.new_thread().unwrap();
    state.push_native(identity);
    state.xmove(co, 1);
    assert_eq!(state.coroutine_status(co), CoroutineStatus::Suspended);
    state.push_integer(1);
    state.push_integer(2);
    assert_eq!(state.resume(co, 2).unwrap(), (Status::Ok, 2));
    assert_eq!(state.coroutine_status(co), CoroutineStatus::Dead);
    assert_eq!(CoroutineStatus::Dead.as_str(), "dead");
}
