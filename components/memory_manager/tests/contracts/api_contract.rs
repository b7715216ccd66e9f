//! Contract tests verifying the memory_manager API other components rely on.
//! These tests pin exported constants, defaults and the registry layout.

use core_types::{GcObjectRef, Value};
use memory_manager::{
    GcKind, GcParams, GcPhase, Heap, HeapConfig, LuaThread, BASIC_STACK_SIZE, EXTRA_STACK,
    MEMERRMSG, MIN_STACK, MULTRET, RIDX_GLOBALS, RIDX_MAINTHREAD,
};

/// Contract: collector defaults
#[test]
fn contract_gc_params_defaults() {
    let p = GcParams::default();
    assert_eq!(p.pause, 200);
    assert_eq!(p.step_mul, 100);
    assert_eq!(p.step_size, 13);
    assert_eq!(p.gen_minor_mul, 20);
    assert_eq!(p.gen_major_mul, 100);
}

/// Contract: a fresh heap is incremental and paused
#[test]
fn contract_heap_new() {
    let heap = Heap::new(HeapConfig::default());
    assert_eq!(heap.gc.kind(), GcKind::Incremental);
    assert_eq!(heap.gc.phase(), GcPhase::Pause);
    assert!(heap.gc.is_running());
    assert!(heap.total_bytes() > 0 || heap.object_count() > 0);
}

/// Contract: registry slots
#[test]
fn contract_registry_layout() {
    let heap = Heap::new(HeapConfig::default());
    assert_eq!(RIDX_MAINTHREAD, 1);
    assert_eq!(RIDX_GLOBALS, 2);
    assert_eq!(
        heap.table_get_int(heap.registry, RIDX_MAINTHREAD),
        Value::Thread(heap.main_thread)
    );
    assert_eq!(
        heap.table_get_int(heap.registry, RIDX_GLOBALS),
        Value::Table(heap.globals())
    );
}

/// Contract: the memory error message is preallocated and never collected
#[test]
fn contract_memory_error_message() {
    let mut heap = Heap::new(HeapConfig::default());
    assert_eq!(MEMERRMSG, "not enough memory");
    heap.full_gc(false);
    let msg = heap.memory_error_message;
    assert!(heap.contains(GcObjectRef::String(msg)));
    assert_eq!(heap.str_bytes(msg), MEMERRMSG.as_bytes());
}

/// Contract: stack sizing constants
#[test]
fn contract_stack_constants() {
    assert_eq!(MIN_STACK, 20);
    assert_eq!(BASIC_STACK_SIZE, 40);
    assert_eq!(EXTRA_STACK, 5);
    assert_eq!(MULTRET, -1);
    let th = LuaThread::new();
    assert_eq!(th.stack.len(), BASIC_STACK_SIZE + EXTRA_STACK);
}
