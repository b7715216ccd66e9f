//! Unit tests for reachability, sweeping and incremental pacing

use bytecode_system::ProtoBuilder;
use core_types::{GcObjectRef, Value};
use memory_manager::{GcPhase, Heap, HeapConfig, StepOutcome, Upval};
use std::rc::Rc;

fn heap() -> Heap {
    Heap::new(HeapConfig {
        seed: Some(11),
        ..HeapConfig::default()
    })
}

fn anchor(heap: &mut Heap, name: &str, v: Value) {
    let g = heap.globals();
    let k = heap.new_str(name);
    heap.table_set(g, Value::String(k), v).unwrap();
}

#[cfg(test)]
mod reachability_tests {
    use super::*;

    #[test]
    fn test_unreachable_table_is_freed() {
        let mut heap = heap();
        let keep = heap.new_table();
        anchor(&mut heap, "keep", Value::Table(keep));
        let garbage = heap.new_table();
        assert_eq!(heap.full_gc(false), StepOutcome::Done);
        assert!(heap.tables.contains(keep));
        assert!(!heap.tables.contains(garbage));
    }

    #[test]
    fn test_cycles_are_collected() {
        let mut heap = heap();
        let a = heap.new_table();
        let b = heap.new_table();
        heap.table_set_int(a, 1, Value::Table(b));
        heap.table_set_int(b, 1, Value::Table(a));
        heap.full_gc(false);
        assert!(!heap.tables.contains(a));
        assert!(!heap.tables.contains(b));
    }

    #[test]
    fn test_roots_survive_repeated_cycles() {
        let mut heap = heap();
        let globals = heap.globals();
        for _ in 0..3 {
            heap.full_gc(false);
        }
        assert!(heap.tables.contains(globals));
        assert!(heap.threads.contains(heap.main_thread));
        assert_eq!(heap.globals(), globals);
    }

    #[test]
    fn test_stack_values_are_roots() {
        let mut heap = heap();
        let t = heap.new_table();
        let th = heap.main_thread;
        heap.threads[th].push(Value::Table(t));
        heap.full_gc(false);
        assert!(heap.tables.contains(t));
        heap.threads[th].top -= 1;
        heap.full_gc(false);
        assert!(!heap.tables.contains(t));
    }

    #[test]
    fn test_type_metatables_are_roots() {
        let mut heap = heap();
        let mt = heap.new_table();
        heap.set_type_metatable(core_types::LuaType::String, Some(mt));
        heap.full_gc(false);
        assert!(heap.tables.contains(mt));
    }

    #[test]
    fn test_dead_strings_leave_intern_table() {
        let mut heap = heap();
        let before = heap.interned_count();
        let s = heap.new_str("transient");
        assert_eq!(heap.interned_count(), before + 1);
        heap.full_gc(false);
        assert!(!heap.strings.contains(s));
        assert_eq!(heap.interned_count(), before);
        let again = heap.new_str("transient");
        assert_eq!(heap.str_bytes(again), b"transient");
    }

    #[test]
    fn test_freeing_reduces_total_bytes() {
        let mut heap = heap();
        heap.full_gc(false);
        let base = heap.total_bytes();
        for i in 0..100 {
            let t = heap.new_table();
            heap.table_set_int(t, 1, Value::Integer(i));
        }
        assert!(heap.total_bytes() > base);
        heap.full_gc(false);
        assert!(heap.total_bytes() <= base);
    }
}

#[cfg(test)]
mod upvalue_tests {
    use super::*;

    #[test]
    fn test_dead_thread_closes_captured_slots() {
        let mut heap = heap();
        let th = heap.new_thread();
        heap.threads[th].stack[2] = Value::Integer(5);
        heap.threads[th].top = 3;
        let u = heap.find_upval(th, 2);
        let p = heap.new_proto(Rc::new(ProtoBuilder::main("=t").build()));
        let f = heap.new_lclosure(p, vec![u]);
        anchor(&mut heap, "f", Value::LuaClosure(f));
        heap.full_gc(false);
        assert!(!heap.threads.contains(th));
        assert_eq!(heap.upvals[u], Upval::Closed(Value::Integer(5)));
        assert_eq!(heap.upval_get(u), Value::Integer(5));
    }

    #[test]
    fn test_closed_upvalue_keeps_value_alive() {
        let mut heap = heap();
        let th = heap.main_thread;
        let t = heap.new_table();
        heap.threads[th].stack[1] = Value::Table(t);
        let u = heap.find_upval(th, 1);
        heap.close_upvals(th, 1);
        heap.threads[th].stack[1] = Value::Nil;
        let p = heap.new_proto(Rc::new(ProtoBuilder::main("=t").build()));
        let f = heap.new_lclosure(p, vec![u]);
        anchor(&mut heap, "f", Value::LuaClosure(f));
        heap.full_gc(false);
        assert!(heap.tables.contains(t));
        assert!(heap.contains(GcObjectRef::Proto(p)));
    }
}

#[cfg(test)]
mod incremental_tests {
    use super::*;

    #[test]
    fn test_steps_complete_a_cycle() {
        let mut heap = heap();
        let garbage = heap.new_table();
        heap.step();
        let mut guard = 0;
        while heap.gc.phase() != GcPhase::Pause {
            heap.step();
            guard += 1;
            assert!(guard < 10_000, "cycle never finished");
        }
        assert!(!heap.tables.contains(garbage));
        assert!(heap.gc.debt() <= 0);
    }

    #[test]
    fn test_stopped_collector_does_nothing() {
        let mut heap = heap();
        heap.gc.stopped_by_user = true;
        let garbage = heap.new_table();
        assert_eq!(heap.step(), StepOutcome::Done);
        assert_eq!(heap.gc.phase(), GcPhase::Pause);
        assert!(heap.tables.contains(garbage));
        assert!(heap.gc.debt() < 0);
    }

    #[test]
    fn test_objects_created_mid_cycle_survive() {
        let mut heap = heap();
        heap.run_until(GcPhase::Propagate);
        let t = heap.new_table();
        anchor(&mut heap, "late", Value::Table(t));
        heap.run_until(GcPhase::Pause);
        assert!(heap.tables.contains(t));
    }

    #[test]
    fn test_full_gc_mid_sweep() {
        let mut heap = heap();
        let keep = heap.new_table();
        anchor(&mut heap, "keep", Value::Table(keep));
        heap.run_until(GcPhase::Sweep);
        let garbage = heap.new_table();
        heap.full_gc(false);
        assert!(heap.tables.contains(keep));
        assert!(!heap.tables.contains(garbage));
    }
}
