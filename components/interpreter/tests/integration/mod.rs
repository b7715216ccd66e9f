//! Integration tests for interpreter
//!
//! Runs hand-assembled chunks through loading, calls, coroutines, hooks and
//! the collector.

use bytecode_system::{chunk, OpCode, Prototype, ProtoBuilder, UpvalueDesc};
use core_types::{LuaResult, Status};
use interpreter::{
    CoroutineStatus, DebugInfo, GcCommand, HookEvent, RuntimeConfig, State, MASK_CALL, MASK_LINE,
};
use memory_manager::MULTRET;
use std::sync::Mutex;

/// Event number of `__add` in `MMBIN` operands
const TM_ADD: u32 = 6;
/// Event number of `__sub` in `MMBIN` operands
const TM_SUB: u32 = 7;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn load(state: &mut State, proto: &Prototype) {
    init_logging();
    let bytes = chunk::dump(proto, false);
    assert_eq!(state.load(&bytes, "=test", None), Status::Ok);
}

/// `local n = 0; inc = function() n = n + 1 return n end; inc2 = <same>`
fn counter_chunk() -> Prototype {
    let mut inc = ProtoBuilder::function(1).max_stack(2);
    inc.upvalue(UpvalueDesc::local("n", 0));
    inc.abc(OpCode::GetUpval, 0, 0, 0, false);
    inc.asbx(OpCode::LoadI, 1, 1);
    inc.abc(OpCode::Add, 0, 0, 1, false);
    inc.abc(OpCode::MmBin, 0, 1, TM_ADD, false);
    inc.abc(OpCode::SetUpval, 0, 0, 0, false);
    inc.abc(OpCode::Return1, 0, 0, 0, false);

    let mut b = ProtoBuilder::main("=counter");
    let child = b.child(inc.build());
    let k_inc = b.string("inc");
    let k_inc2 = b.string("inc2");
    b.asbx(OpCode::LoadI, 0, 0);
    b.abx(OpCode::Closure, 1, child);
    b.abx(OpCode::Closure, 2, child);
    b.abc(OpCode::SetTabUp, 0, k_inc, 1, false);
    b.abc(OpCode::SetTabUp, 0, k_inc2, 2, false);
    b.abc(OpCode::Return, 0, 1, 1, true);
    b.max_stack(3).build()
}

/// `loop = function(n) if n == 0 then return "done" end return loop(n - 1) end`
/// with the recursive call in tail position when `tail` is set.
fn countdown_chunk(tail: bool) -> Prototype {
    let mut f = ProtoBuilder::function(1).params(1, false).max_stack(3);
    f.upvalue(UpvalueDesc::outer("_ENV", 0));
    let k_done = f.string("done");
    let k_loop = f.string("loop");
    f.asbx(OpCode::LoadI, 1, 0);
    f.abc(OpCode::Eq, 0, 1, 0, false);
    let skip = f.jump();
    f.abx(OpCode::LoadK, 1, k_done);
    f.abc(OpCode::Return1, 1, 0, 0, false);
    let recurse = f.pc();
    f.patch_jump(skip, recurse);
    f.abc(OpCode::GetTabUp, 1, 0, k_loop, false);
    f.asbx(OpCode::LoadI, 2, 1);
    f.abc(OpCode::Sub, 2, 0, 2, false);
    f.abc(OpCode::MmBin, 0, 2, TM_SUB, false);
    if tail {
        f.abc(OpCode::TailCall, 1, 2, 0, false);
        f.abc(OpCode::Return, 1, 0, 0, false);
    } else {
        f.abc(OpCode::Call, 1, 2, 2, false);
        f.abc(OpCode::Return1, 1, 0, 0, false);
    }

    let mut b = ProtoBuilder::main("=countdown");
    let child = b.child(f.build());
    let k_loop = b.string("loop");
    b.abx(OpCode::Closure, 0, child);
    b.abc(OpCode::SetTabUp, 0, k_loop, 0, false);
    b.abc(OpCode::Return, 0, 1, 1, false);
    b.max_stack(2).build()
}

/// `local x = yield(5) return x`
fn yielding_chunk() -> Prototype {
    let mut b = ProtoBuilder::main("=co");
    let k_yield = b.string("yield");
    b.abc(OpCode::GetTabUp, 0, 0, k_yield, false);
    b.asbx(OpCode::LoadI, 1, 5);
    b.abc(OpCode::Call, 0, 2, 2, false);
    b.abc(OpCode::Return, 0, 2, 1, false);
    b.max_stack(3).build()
}

fn yield_all(state: &mut State) -> LuaResult<usize> {
    let n = state.get_top() as usize;
    state.yield_values(n)
}

fn fail(state: &mut State) -> LuaResult<usize> {
    state.push_string("boom")?;
    Err(state.error())
}

fn small_stack_state() -> State {
    let config = RuntimeConfig {
        max_stack: 10_000,
        ..RuntimeConfig::default()
    };
    State::with_config(config).unwrap()
}

// ============================================================================
// Closures and calls
// ============================================================================

#[test]
fn test_closures_share_captured_variable() {
    let mut state = State::new();
    load(&mut state, &counter_chunk());
    state.call(0, 0).unwrap();

    for (name, expected) in [("inc", 1), ("inc", 2), ("inc2", 3), ("inc", 4)] {
        state.get_global(name).unwrap();
        state.call(0, 1).unwrap();
        assert_eq!(state.to_integer(-1), Some(expected));
        state.pop(1).unwrap();
    }
    assert_eq!(state.get_top(), 0);
}

#[test]
fn test_tail_calls_run_in_constant_stack() {
    let mut state = small_stack_state();
    load(&mut state, &countdown_chunk(true));
    state.call(0, 0).unwrap();
    state.get_global("loop").unwrap();
    state.push_integer(50_000);
    state.call(1, 1).unwrap();
    assert_eq!(state.to_str(-1).as_deref(), Some("done"));
}

#[test]
fn test_deep_recursion_overflows_stack() {
    let mut state = small_stack_state();
    load(&mut state, &countdown_chunk(false));
    state.call(0, 0).unwrap();
    state.get_global("loop").unwrap();
    state.push_integer(50_000);
    assert_eq!(state.pcall(1, 1, 0), Status::Runtime);
    let msg = state.to_str(-1).unwrap();
    assert!(msg.contains("stack overflow"), "{}", msg);

    // the state stays usable after the overflow
    state.pop(1).unwrap();
    state.get_global("loop").unwrap();
    state.push_integer(10);
    assert_eq!(state.pcall(1, 1, 0), Status::Ok);
    assert_eq!(state.to_str(-1).as_deref(), Some("done"));
}

#[test]
fn test_host_pushes_stop_at_stack_limit() {
    fn noop(_state: &mut State) -> LuaResult<usize> {
        Ok(0)
    }
    let config = RuntimeConfig {
        max_stack: 200,
        ..RuntimeConfig::default()
    };
    let mut state = State::with_config(config).unwrap();
    for i in 0..195 {
        state.push_integer(i);
    }
    state.push_native(noop);
    assert_eq!(state.pcall(0, 0, 0), Status::Runtime);
    let msg = state.to_str(-1).unwrap();
    assert!(msg.contains("stack overflow"), "{}", msg);
    assert_eq!(state.get_top(), 196);
    assert_eq!(state.to_integer(195), Some(194));
}

#[test]
fn test_calling_nil_reports_variable() {
    let mut state = State::new();
    let mut b = ProtoBuilder::main("=caller");
    let k = b.string("missing");
    b.abc(OpCode::GetTabUp, 0, 0, k, false);
    b.abc(OpCode::Call, 0, 1, 1, false);
    b.abc(OpCode::Return, 0, 1, 1, false);
    load(&mut state, &b.max_stack(2).build());
    assert_eq!(state.pcall(0, 0, 0), Status::Runtime);
    let msg = state.to_str(-1).unwrap();
    assert!(msg.contains("attempt to call a nil value"), "{}", msg);
    assert!(msg.contains("'missing'"), "{}", msg);
}

// ============================================================================
// Protected calls
// ============================================================================

#[test]
fn test_pcall_restores_stack() {
    let mut state = State::new();
    state.push_integer(1);
    state.push_native(fail);
    state.push_integer(2);
    assert_eq!(state.pcall(1, MULTRET, 0), Status::Runtime);
    assert_eq!(state.get_top(), 2);
    assert_eq!(state.to_str(-1).as_deref(), Some("boom"));
    assert_eq!(state.to_integer(1), Some(1));
}

#[test]
fn test_message_handler_rewrites_error() {
    fn handler(state: &mut State) -> LuaResult<usize> {
        let msg = state.to_str(1).unwrap_or_default();
        state.push_string(&format!("handled: {}", msg))?;
        Ok(1)
    }
    let mut state = State::new();
    state.push_native(handler);
    state.push_native(fail);
    assert_eq!(state.pcall(0, 0, 1), Status::Runtime);
    assert_eq!(state.to_str(-1).as_deref(), Some("handled: boom"));
}

/// Gives the table on top of the stack an `id` and a `__close` metamethod,
/// then marks it to-be-closed.
fn push_closable(state: &mut State, id: i64, closer: interpreter::NativeFn) -> LuaResult<()> {
    state.new_table()?;
    state.push_integer(id);
    state.set_field(-2, "id")?;
    state.new_table()?;
    state.push_native(closer);
    state.set_field(-2, "__close")?;
    state.set_metatable(-2);
    state.to_close(-1)
}

fn closed_id(state: &mut State) -> LuaResult<i64> {
    state.get_field(1, "id")?;
    let id = state.to_integer(-1).unwrap_or(0);
    state.pop(1)?;
    Ok(id)
}

#[test]
fn test_error_closes_pending_variables_in_reverse() {
    static ORDER: Mutex<Vec<i64>> = Mutex::new(Vec::new());
    fn closer(state: &mut State) -> LuaResult<usize> {
        let id = closed_id(state)?;
        ORDER.lock().unwrap().push(id);
        if id == 2 {
            state.push_string("closer boom")?;
            return Err(state.error());
        }
        Ok(0)
    }
    fn body(state: &mut State) -> LuaResult<usize> {
        for id in 1..=3 {
            push_closable(state, id, closer)?;
        }
        state.push_string("body boom")?;
        Err(state.error())
    }
    let mut state = State::new();
    state.push_integer(99);
    state.push_native(body);
    assert_eq!(state.pcall(0, 0, 0), Status::Runtime);
    assert_eq!(*ORDER.lock().unwrap(), vec![3, 2, 1]);
    assert_eq!(state.get_top(), 2);
    assert_eq!(state.to_integer(1), Some(99));
    assert_eq!(state.to_str(-1).as_deref(), Some("closer boom"));
}

#[test]
fn test_unprotected_error_resets_stack_and_panics() {
    static PANICS: Mutex<Vec<String>> = Mutex::new(Vec::new());
    fn on_panic(state: &mut State, e: &core_types::LuaError) {
        let text = state.error_text(&e.value);
        PANICS.lock().unwrap().push(text);
    }
    let mut state = State::new();
    assert!(state.set_panic(Some(on_panic)).is_none());
    state.push_integer(1);
    state.push_integer(2);
    state.push_native(fail);
    let err = state.call(0, 0).unwrap_err();
    assert_eq!(err.status, Status::Runtime);
    assert_eq!(*PANICS.lock().unwrap(), vec!["boom".to_string()]);
    assert_eq!(state.get_top(), 1);
    assert_eq!(state.to_str(1).as_deref(), Some("boom"));

    // the state keeps working
    state.pop(1).unwrap();
    state.push_integer(3);
    assert_eq!(state.to_integer(-1), Some(3));
}

#[test]
fn test_traceback_handler_names_frames() {
    let mut state = State::new();
    state.push_native(fail);
    state.set_global("fail").unwrap();
    let mut b = ProtoBuilder::main("=script");
    let k = b.string("fail");
    b.set_line(3);
    b.abc(OpCode::GetTabUp, 0, 0, k, false);
    b.abc(OpCode::Call, 0, 1, 1, false);
    b.abc(OpCode::Return, 0, 1, 1, false);
    load(&mut state, &b.max_stack(2).build());
    assert_eq!(state.call_with_traceback(0), Status::Runtime);
    let text = state.to_str(-1).unwrap();
    assert!(text.starts_with("boom\nstack traceback:"), "{}", text);
    assert!(text.contains("[C]: in global 'fail'"), "{}", text);
    assert!(text.contains("script:3: in main chunk"), "{}", text);
}

// ============================================================================
// Coroutines
// ============================================================================

#[test]
fn test_coroutine_lifecycle() {
    let mut state = State::new();
    state.push_native(yield_all);
    state.set_global("yield").unwrap();

    let co = state.new_thread().unwrap();
    load(&mut state, &yielding_chunk());
    state.xmove(co, 1);
    assert_eq!(state.coroutine_status(co), CoroutineStatus::Suspended);

    let (status, n) = state.resume(co, 0).unwrap();
    assert_eq!((status, n), (Status::Yield, 1));
    assert_eq!(state.to_integer(-1), Some(5));
    assert_eq!(state.coroutine_status(co), CoroutineStatus::Suspended);
    state.pop(1).unwrap();

    state.push_integer(7);
    let (status, n) = state.resume(co, 1).unwrap();
    assert_eq!((status, n), (Status::Ok, 1));
    assert_eq!(state.to_integer(-1), Some(7));
    assert_eq!(state.coroutine_status(co), CoroutineStatus::Dead);
    state.pop(1).unwrap();

    let (status, _) = state.resume(co, 0).unwrap();
    assert_eq!(status, Status::Runtime);
    assert_eq!(state.to_str(-1).as_deref(), Some("cannot resume dead coroutine"));
}

#[test]
fn test_coroutine_error_kills_thread() {
    let mut state = State::new();
    let co = state.new_thread().unwrap();
    state.push_native(fail);
    state.xmove(co, 1);
    let (status, n) = state.resume(co, 0).unwrap();
    assert_eq!((status, n), (Status::Runtime, 1));
    assert_eq!(state.to_str(-1).as_deref(), Some("boom"));
    assert_eq!(state.coroutine_status(co), CoroutineStatus::Dead);
    assert_eq!(state.close_thread(co).unwrap(), Status::Runtime);
}

#[test]
fn test_resuming_running_coroutine_fails() {
    static INNER: Mutex<Option<(Status, String)>> = Mutex::new(None);
    fn reenter(state: &mut State) -> LuaResult<usize> {
        let co = state.to_thread(1).unwrap();
        let (status, n) = state.resume(co, 0)?;
        assert_eq!(n, 1);
        let msg = state.to_str(-1).unwrap_or_default();
        *INNER.lock().unwrap() = Some((status, msg));
        state.set_top(0)?;
        state.yield_values(0)
    }
    let mut state = State::new();
    let co = state.new_thread().unwrap();
    state.push_native(reenter);
    state.xmove(co, 1);
    state.push_copy(1);
    assert_eq!(state.resume(co, 1).unwrap(), (Status::Yield, 0));
    assert_eq!(
        *INNER.lock().unwrap(),
        Some((
            Status::Runtime,
            "cannot resume non-suspended coroutine".to_string()
        ))
    );
    assert_eq!(state.coroutine_status(co), CoroutineStatus::Suspended);
    assert_eq!(state.resume(co, 0).unwrap(), (Status::Ok, 0));
    assert_eq!(state.coroutine_status(co), CoroutineStatus::Dead);
}

#[test]
fn test_closing_suspended_coroutine_runs_closers() {
    static CLOSED: Mutex<Vec<i64>> = Mutex::new(Vec::new());
    fn closer(state: &mut State) -> LuaResult<usize> {
        let id = closed_id(state)?;
        CLOSED.lock().unwrap().push(id);
        Ok(0)
    }
    fn hold(state: &mut State) -> LuaResult<usize> {
        push_closable(state, 10, closer)?;
        push_closable(state, 20, closer)?;
        state.yield_values(0)
    }
    let mut state = State::new();
    let co = state.new_thread().unwrap();
    state.push_native(hold);
    state.xmove(co, 1);
    assert_eq!(state.resume(co, 0).unwrap(), (Status::Yield, 0));
    assert!(CLOSED.lock().unwrap().is_empty());

    assert_eq!(state.close_thread(co).unwrap(), Status::Ok);
    assert_eq!(*CLOSED.lock().unwrap(), vec![20, 10]);
    assert_eq!(state.coroutine_status(co), CoroutineStatus::Dead);
    assert_eq!(state.get_top(), 1);
}

#[test]
fn test_pcall_k_recovers_error_after_resume() {
    static SEEN: Mutex<Option<(Status, String)>> = Mutex::new(None);
    fn raise_late(state: &mut State, _status: Status, _ctx: isize) -> LuaResult<usize> {
        state.push_string("late boom")?;
        Err(state.error())
    }
    fn pause_then_fail(state: &mut State) -> LuaResult<usize> {
        state.yield_k(0, 0, Some(raise_late))
    }
    fn finish(state: &mut State, status: Status, _ctx: isize) -> LuaResult<usize> {
        let msg = state.to_str(-1).unwrap_or_default();
        *SEEN.lock().unwrap() = Some((status, msg));
        state.push_string("recovered")?;
        Ok(1)
    }
    fn guarded(state: &mut State) -> LuaResult<usize> {
        state.push_native(pause_then_fail);
        let status = state.pcall_k(0, 0, 0, 0, Some(finish))?;
        finish(state, status, 0)
    }
    let mut state = State::new();
    let co = state.new_thread().unwrap();
    state.push_native(guarded);
    state.xmove(co, 1);
    assert_eq!(state.resume(co, 0).unwrap(), (Status::Yield, 0));
    assert!(SEEN.lock().unwrap().is_none());

    let (status, n) = state.resume(co, 0).unwrap();
    assert_eq!(status, Status::Ok);
    assert_eq!(
        *SEEN.lock().unwrap(),
        Some((Status::Runtime, "late boom".to_string()))
    );
    assert_eq!(n, 1);
    assert_eq!(state.to_str(-1).as_deref(), Some("recovered"));
    assert_eq!(state.coroutine_status(co), CoroutineStatus::Dead);
}

#[test]
fn test_yield_outside_coroutine_fails() {
    let mut state = State::new();
    state.push_native(yield_all);
    assert_eq!(state.pcall(0, 0, 0), Status::Runtime);
    assert_eq!(
        state.to_str(-1).as_deref(),
        Some("attempt to yield from outside a coroutine")
    );
}

// ============================================================================
// Hooks
// ============================================================================

static LINES: Mutex<Vec<u32>> = Mutex::new(Vec::new());
static CALLS: Mutex<usize> = Mutex::new(0);

fn record_hook(_state: &mut State, ar: &DebugInfo) -> LuaResult<()> {
    match ar.event {
        Some(HookEvent::Line) => {
            if let Some(line) = ar.current_line {
                LINES.lock().unwrap().push(line);
            }
        }
        Some(HookEvent::Call) => *CALLS.lock().unwrap() += 1,
        _ => {}
    }
    Ok(())
}

#[test]
fn test_line_and_call_hooks() {
    let mut state = State::new();
    let mut b = ProtoBuilder::main("=lines");
    b.set_line(2);
    b.asbx(OpCode::LoadI, 0, 1);
    b.set_line(3);
    b.asbx(OpCode::LoadI, 1, 2);
    b.set_line(4);
    b.abc(OpCode::Return, 0, 1, 1, false);
    load(&mut state, &b.max_stack(2).build());

    state.set_hook(Some(record_hook), MASK_LINE | MASK_CALL, 0);
    state.call(0, 0).unwrap();
    state.set_hook(None, 0, 0);

    assert_eq!(*LINES.lock().unwrap(), vec![2, 3, 4]);
    assert!(*CALLS.lock().unwrap() >= 1);
}

// ============================================================================
// Collector
// ============================================================================

#[test]
fn test_finalizer_runs_on_collect() {
    static FINALIZED: Mutex<usize> = Mutex::new(0);
    fn finalize(_state: &mut State) -> LuaResult<usize> {
        *FINALIZED.lock().unwrap() += 1;
        Ok(0)
    }
    let mut state = State::new();
    state.new_userdata(Box::new(17u32), 0).unwrap();
    state.new_table().unwrap();
    state.push_native(finalize);
    state.set_field(-2, "__gc").unwrap();
    state.set_metatable(-2);
    state.pop(1).unwrap();

    state.gc(GcCommand::Collect).unwrap();
    state.gc(GcCommand::Collect).unwrap();
    assert_eq!(*FINALIZED.lock().unwrap(), 1);
}

#[test]
fn test_finalizer_error_becomes_warning() {
    let mut state = State::new();
    state.new_table().unwrap();
    state.new_table().unwrap();
    state.push_native(fail);
    state.set_field(-2, "__gc").unwrap();
    state.set_metatable(-2);
    state.pop(1).unwrap();

    state.gc(GcCommand::Collect).unwrap();
    let warnings = state.take_warnings();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("__gc"), "{}", warnings[0]);
    assert!(warnings[0].contains("boom"), "{}", warnings[0]);
}
