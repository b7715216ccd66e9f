//! Integration tests: the collector driven through the interpreter's API

use core_types::{LuaResult, Status};
use interpreter::{GcCommand, GcMode, GcReply, State};
use std::sync::Mutex;

fn count_entries(state: &mut State, idx: i32) -> usize {
    let mut n = 0;
    state.push_nil();
    while state.next(idx).unwrap() {
        n += 1;
        state.pop(1).unwrap();
    }
    n
}

#[test]
fn test_weak_keys_are_cleared() {
    let mut state = State::new();
    state.new_table().unwrap();
    state.new_table().unwrap();
    state.push_string("k").unwrap();
    state.set_field(-2, "__mode").unwrap();
    state.set_metatable(1);

    // a collectable key nobody else references
    state.new_table().unwrap();
    state.push_integer(1);
    state.set_table(1).unwrap();
    // a string key survives
    state.push_integer(2);
    state.set_field(1, "kept").unwrap();
    assert_eq!(count_entries(&mut state, 1), 2);

    state.gc(GcCommand::Collect).unwrap();
    assert_eq!(count_entries(&mut state, 1), 1);
    state.get_field(1, "kept").unwrap();
    assert_eq!(state.to_integer(-1), Some(2));
}

#[test]
fn test_generational_mode_keeps_live_data() {
    let mut state = State::new();
    let old = state
        .gc(GcCommand::Generational {
            minor_mul: 0,
            major_mul: 0,
        })
        .unwrap();
    assert_eq!(old, GcReply::Mode(GcMode::Incremental));

    state.new_table().unwrap();
    for i in 0..10_000i64 {
        state.new_table().unwrap();
        state.push_integer(i);
        state.set_field(-2, "id").unwrap();
        if i % 100 == 0 {
            state.raw_set_i(1, i / 100 + 1);
        } else {
            state.pop(1).unwrap();
        }
    }
    state.gc(GcCommand::Collect).unwrap();

    assert_eq!(state.raw_len(1), 100);
    state.raw_get_i(1, 42);
    state.get_field(-1, "id").unwrap();
    assert_eq!(state.to_integer(-1), Some(4100));
    assert!(state.heap().tables.len() < 1_000);
}

#[test]
fn test_suspended_coroutine_is_collected() {
    fn pause(state: &mut State) -> LuaResult<usize> {
        state.yield_values(0)
    }
    let mut state = State::new();
    state.gc(GcCommand::Collect).unwrap();
    let before = state.heap().threads.len();

    let co = state.new_thread().unwrap();
    state.push_native(pause);
    state.xmove(co, 1);
    assert_eq!(state.resume(co, 0).unwrap(), (Status::Yield, 0));
    assert_eq!(state.heap().threads.len(), before + 1);

    state.set_top(0).unwrap();
    state.gc(GcCommand::Collect).unwrap();
    assert_eq!(state.heap().threads.len(), before);
}

#[test]
fn test_finalizers_run_in_reverse_creation_order() {
    static ORDER: Mutex<Vec<i64>> = Mutex::new(Vec::new());
    fn record(state: &mut State) -> LuaResult<usize> {
        if let Some(&id) = state.to_userdata::<i64>(1) {
            ORDER.lock().unwrap().push(id);
        }
        Ok(0)
    }
    let mut state = State::new();
    state.new_table().unwrap();
    state.push_native(record);
    state.set_field(-2, "__gc").unwrap();
    for id in 1..=3i64 {
        state.new_userdata(Box::new(id), 0).unwrap();
        state.push_copy(1);
        state.set_metatable(-2);
        state.pop(1).unwrap();
    }
    state.gc(GcCommand::Collect).unwrap();
    assert_eq!(*ORDER.lock().unwrap(), vec![3, 2, 1]);
}

#[test]
fn test_close_runs_pending_finalizers() {
    static CALLED: Mutex<usize> = Mutex::new(0);
    fn record(_state: &mut State) -> LuaResult<usize> {
        *CALLED.lock().unwrap() += 1;
        Ok(0)
    }
    let mut state = State::new();
    state.new_table().unwrap();
    state.new_table().unwrap();
    state.push_native(record);
    state.set_field(-2, "__gc").unwrap();
    state.set_metatable(-2);
    state.set_global("still_alive").unwrap();
    state.close();
    assert_eq!(*CALLED.lock().unwrap(), 1);
}
