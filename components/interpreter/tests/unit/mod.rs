//! Unit tests for interpreter components

use bytecode_system::{chunk, OpCode, ProtoBuilder, UpvalueDesc};
use core_types::{LuaResult, LuaType, Status};
use interpreter::{ArithOp, CompareOp, RuntimeConfig, State, REFNIL, REGISTRY_INDEX};
use memory_manager::MULTRET;
use std::sync::atomic::{AtomicUsize, Ordering};

// ============================================================================
// Stack manipulation
// ============================================================================

#[test]
fn test_stack_insert_remove_replace() {
    let mut state = State::new();
    for i in 1..=4 {
        state.push_integer(i);
    }
    state.insert(1);
    let values: Vec<_> = (1..=4).map(|i| state.to_integer(i).unwrap()).collect();
    assert_eq!(values, vec![4, 1, 2, 3]);

    state.remove(2).unwrap();
    assert_eq!(state.get_top(), 3);
    assert_eq!(state.to_integer(2), Some(2));

    state.push_integer(9);
    state.replace(1).unwrap();
    assert_eq!(state.to_integer(1), Some(9));
    assert_eq!(state.get_top(), 3);
}

#[test]
fn test_set_top_fills_with_nil() {
    let mut state = State::new();
    state.push_integer(1);
    state.set_top(3).unwrap();
    assert_eq!(state.get_top(), 3);
    assert!(state.is_nil(2));
    assert!(state.is_nil(3));
    state.set_top(0).unwrap();
    assert_eq!(state.get_top(), 0);
    assert!(state.is_none(1));
}

#[test]
fn test_type_queries() {
    let mut state = State::new();
    state.push_integer(3);
    state.push_number(2.5);
    state.push_string("10").unwrap();
    state.push_boolean(true);
    state.push_light_userdata(0x10);
    assert!(state.is_integer(1));
    assert!(!state.is_integer(2));
    assert!(state.is_number(3));
    assert!(state.is_string(1));
    assert_eq!(state.type_of(4), Some(LuaType::Boolean));
    assert_eq!(state.type_of(5), Some(LuaType::LightUserdata));
    assert_eq!(state.type_of(6), None);
    assert_eq!(state.type_name_at(3), "string");
    assert_eq!(state.to_integer(3), Some(10));
}

// ============================================================================
// Tables and metatables
// ============================================================================

#[test]
fn test_table_fields_and_length() {
    let mut state = State::new();
    state.new_table().unwrap();
    for i in 1..=5 {
        state.push_integer(i * 10);
        state.set_i(1, i).unwrap();
    }
    state.push_string("v").unwrap();
    state.set_field(1, "k").unwrap();
    assert_eq!(state.raw_len(1), 5);
    assert_eq!(state.get_i(1, 3).unwrap(), LuaType::Number);
    assert_eq!(state.to_integer(-1), Some(30));
    state.pop(1).unwrap();
    assert_eq!(state.get_field(1, "k").unwrap(), LuaType::String);
    state.pop(1).unwrap();

    let mut count = 0;
    state.push_nil();
    while state.next(1).unwrap() {
        count += 1;
        state.pop(1).unwrap();
    }
    assert_eq!(count, 6);
}

#[test]
fn test_index_metamethod_function() {
    fn index(state: &mut State) -> LuaResult<usize> {
        let key = state.to_str(2).unwrap_or_default();
        state.push_string(&format!("<{}>", key))?;
        Ok(1)
    }
    let mut state = State::new();
    state.new_table().unwrap();
    state.new_table().unwrap();
    state.push_native(index);
    state.set_field(-2, "__index").unwrap();
    state.set_metatable(1);

    assert_eq!(state.get_field(1, "name").unwrap(), LuaType::String);
    assert_eq!(state.to_str(-1).as_deref(), Some("<name>"));
    state.pop(1).unwrap();
    assert_eq!(state.raw_get_i(1, 1), LuaType::Nil);
}

#[test]
fn test_arith_metamethod() {
    fn add(state: &mut State) -> LuaResult<usize> {
        state.push_integer(100);
        Ok(1)
    }
    let mut state = State::new();
    state.new_table().unwrap();
    state.new_table().unwrap();
    state.push_native(add);
    state.set_field(-2, "__add").unwrap();
    state.set_metatable(1);

    state.push_copy(1);
    state.push_integer(1);
    state.arith(ArithOp::Add).unwrap();
    assert_eq!(state.to_integer(-1), Some(100));
}

#[test]
fn test_arith_on_nil_fails() {
    fn add_nil(state: &mut State) -> LuaResult<usize> {
        state.push_nil();
        state.push_integer(1);
        state.arith(ArithOp::Add)?;
        Ok(1)
    }
    let mut state = State::new();
    state.push_native(add_nil);
    assert_eq!(state.pcall(0, 1, 0), Status::Runtime);
    let msg = state.to_str(-1).unwrap();
    assert!(msg.contains("attempt to perform arithmetic on a nil value"), "{}", msg);
}

#[test]
fn test_integer_and_float_arith() {
    let mut state = State::new();
    state.push_integer(7);
    state.push_integer(2);
    state.arith(ArithOp::IDiv).unwrap();
    assert_eq!(state.to_integer(-1), Some(3));
    state.push_integer(2);
    state.arith(ArithOp::Div).unwrap();
    assert_eq!(state.to_number(-1), Some(1.5));
    assert!(!state.is_integer(-1));

    state.push_integer(-7);
    state.push_integer(2);
    state.arith(ArithOp::Mod).unwrap();
    assert_eq!(state.to_integer(-1), Some(1));
}

#[test]
fn test_compare_mixed_numbers() {
    let mut state = State::new();
    state.push_integer(1);
    state.push_number(1.5);
    state.push_number(1.0);
    assert!(state.compare(1, 2, CompareOp::Lt).unwrap());
    assert!(state.compare(1, 3, CompareOp::Eq).unwrap());
    assert!(state.compare(3, 1, CompareOp::Le).unwrap());
    assert!(!state.raw_equal(1, 2));
}

#[test]
fn test_concat_numbers_and_strings() {
    let mut state = State::new();
    state.push_string("x=").unwrap();
    state.push_integer(3);
    state.push_number(0.5);
    state.concat_values(3).unwrap();
    assert_eq!(state.to_str(-1).as_deref(), Some("x=30.5"));
}

#[test]
fn test_length_honours_len_metamethod() {
    fn len(state: &mut State) -> LuaResult<usize> {
        state.push_integer(42);
        Ok(1)
    }
    let mut state = State::new();
    state.new_table().unwrap();
    state.new_table().unwrap();
    state.push_native(len);
    state.set_field(-2, "__len").unwrap();
    state.set_metatable(1);
    assert_eq!(state.length(1).unwrap(), 42);
}

#[test]
fn test_close_metamethod_runs_when_popped() {
    static CLOSED: AtomicUsize = AtomicUsize::new(0);
    fn close(_state: &mut State) -> LuaResult<usize> {
        CLOSED.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }
    fn body(state: &mut State) -> LuaResult<usize> {
        state.new_table()?;
        state.new_table()?;
        state.push_native(close);
        state.set_field(-2, "__close")?;
        state.set_metatable(-2);
        state.to_close(-1)?;
        state.pop(1)?;
        Ok(0)
    }
    let mut state = State::new();
    state.push_native(body);
    assert_eq!(state.pcall(0, 0, 0), Status::Ok);
    assert_eq!(CLOSED.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Native closures and upvalues
// ============================================================================

#[test]
fn test_native_closure_keeps_state() {
    fn counter(state: &mut State) -> LuaResult<usize> {
        let n = state.to_integer(interpreter::upvalue_index(1)).unwrap_or(0) + 1;
        state.push_integer(n);
        state.copy(-1, interpreter::upvalue_index(1));
        Ok(1)
    }
    let mut state = State::new();
    state.push_integer(0);
    state.push_native_closure(counter, 1).unwrap();
    for expected in 1..=3 {
        state.push_copy(-1);
        state.call(0, 1).unwrap();
        assert_eq!(state.to_integer(-1), Some(expected));
        state.pop(1).unwrap();
    }
    assert_eq!(state.get_upvalue(-1, 1).as_deref(), Some(""));
    assert_eq!(state.to_integer(-1), Some(3));
}

#[test]
fn test_lua_upvalue_names_and_join() {
    let mut inner = ProtoBuilder::function(1);
    inner.upvalue(UpvalueDesc::local("a", 0));
    inner.abc(OpCode::Return0, 0, 0, 0, false);
    let mut b = ProtoBuilder::main("=up");
    let child = b.child(inner.build());
    b.asbx(OpCode::LoadI, 0, 1);
    b.abx(OpCode::Closure, 1, child);
    b.asbx(OpCode::LoadI, 0, 2);
    b.abx(OpCode::Closure, 2, child);
    b.abc(OpCode::Return, 1, 3, 1, true);
    let bytes = chunk::dump(&b.max_stack(3).build(), false);

    let mut state = State::new();
    assert_eq!(state.load(&bytes, "=up", None), Status::Ok);
    state.call(0, 2).unwrap();
    // both closures captured the same local
    assert_eq!(state.upvalue_id(1, 1), state.upvalue_id(2, 1));
    assert_eq!(state.get_upvalue(1, 1).as_deref(), Some("a"));
    assert_eq!(state.to_integer(-1), Some(2));
    state.pop(1).unwrap();
    state.push_integer(5);
    assert_eq!(state.set_upvalue(2, 1).as_deref(), Some("a"));
    state.get_upvalue(1, 1);
    assert_eq!(state.to_integer(-1), Some(5));
    assert!(state.upvalue_join(1, 1, 2, 2).is_err());
}

// ============================================================================
// Auxiliary helpers
// ============================================================================

fn wants_integer(state: &mut State) -> LuaResult<usize> {
    let n = state.check_integer(1)?;
    state.push_integer(n * 2);
    Ok(1)
}

#[test]
fn test_check_integer_messages() {
    let mut state = State::new();
    state.push_native(wants_integer);
    state.push_string("x").unwrap();
    assert_eq!(state.pcall(1, 1, 0), Status::Runtime);
    assert_eq!(
        state.to_str(-1).as_deref(),
        Some("bad argument #1 to '?' (number expected, got string)")
    );
    state.pop(1).unwrap();

    state.push_native(wants_integer);
    state.push_number(1.5);
    assert_eq!(state.pcall(1, 1, 0), Status::Runtime);
    assert_eq!(
        state.to_str(-1).as_deref(),
        Some("bad argument #1 to '?' (number has no integer representation)")
    );
    state.pop(1).unwrap();

    state.push_native(wants_integer);
    state.push_string("21").unwrap();
    assert_eq!(state.pcall(1, 1, 0), Status::Ok);
    assert_eq!(state.to_integer(-1), Some(42));
}

#[test]
fn test_registry_references() {
    let mut state = State::new();
    state.push_string("kept").unwrap();
    let r = state.reference(REGISTRY_INDEX).unwrap();
    assert!(r > 0);
    state.raw_get_i(REGISTRY_INDEX, i64::from(r));
    assert_eq!(state.to_str(-1).as_deref(), Some("kept"));
    state.pop(1).unwrap();
    state.unreference(REGISTRY_INDEX, r);
    state.push_nil();
    assert_eq!(state.reference(REGISTRY_INDEX).unwrap(), REFNIL);
}

#[test]
fn test_tostring_metamethod_must_return_string() {
    fn bad(state: &mut State) -> LuaResult<usize> {
        state.push_integer(1);
        Ok(1)
    }
    fn show(state: &mut State) -> LuaResult<usize> {
        state.to_display_string(1)?;
        Ok(1)
    }
    let mut state = State::new();
    state.push_native(show);
    state.new_table().unwrap();
    state.new_table().unwrap();
    state.push_native(bad);
    state.set_field(-2, "__tostring").unwrap();
    state.set_metatable(-2);
    assert_eq!(state.pcall(1, 1, 0), Status::Runtime);
    assert_eq!(
        state.to_str(-1).as_deref(),
        Some("'__tostring' must return a string")
    );
}

// ============================================================================
// Loading and memory
// ============================================================================

#[test]
fn test_truncated_chunk_is_rejected() {
    let mut b = ProtoBuilder::main("=t");
    b.abc(OpCode::Return, 0, 1, 1, false);
    let bytes = chunk::dump(&b.build(), false);
    let mut state = State::new();
    let status = state.load(&bytes[..bytes.len() / 2], "=t", None);
    assert_eq!(status, Status::Syntax);
    let msg = state.to_str(-1).unwrap();
    assert!(msg.starts_with("t: bad binary format"), "{}", msg);
}

#[test]
fn test_results_adjusted_to_multret() {
    fn three(state: &mut State) -> LuaResult<usize> {
        for i in 1..=3 {
            state.push_integer(i);
        }
        Ok(3)
    }
    let mut state = State::new();
    state.push_native(three);
    state.call(0, MULTRET).unwrap();
    assert_eq!(state.get_top(), 3);
    state.push_native(three);
    state.call(0, 1).unwrap();
    assert_eq!(state.get_top(), 4);
    assert_eq!(state.to_integer(-1), Some(1));
}

#[test]
fn test_memory_limit_raises_memory_error() {
    let config = RuntimeConfig {
        memory_limit: Some(256 * 1024),
        ..RuntimeConfig::default()
    };
    let mut state = State::with_config(config).unwrap();
    state.new_table().unwrap();
    let mut status = Status::Ok;
    for i in 1..1_000_000 {
        if let Err(e) = state.new_table() {
            status = e.status;
            break;
        }
        state.raw_set_i(1, i);
    }
    assert_eq!(status, Status::Memory);

    // dropping the garbage makes room again
    state.set_top(0).unwrap();
    assert!(state.new_table().is_ok());
}
