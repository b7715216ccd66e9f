//! Unit tests for finalizer scheduling

use core_types::{GcObjectRef, TableRef, Value};
use memory_manager::{GcPhase, Heap, HeapConfig, StepOutcome};

fn heap() -> Heap {
    Heap::new(HeapConfig {
        seed: Some(13),
        ..HeapConfig::default()
    })
}

fn gc_metatable(heap: &mut Heap) -> TableRef {
    let mt = heap.new_table();
    let key = heap.new_str("__gc");
    heap.table_set(mt, Value::String(key), Value::Boolean(true)).unwrap();
    let g = heap.globals();
    let name = heap.new_str("mt");
    heap.table_set(g, Value::String(name), Value::Table(mt)).unwrap();
    mt
}

#[cfg(test)]
mod finalizer_tests {
    use super::*;

    #[test]
    fn test_unreachable_object_is_resurrected_once() {
        let mut heap = heap();
        let mt = gc_metatable(&mut heap);
        let u = heap.new_userdata(Box::new(7u32), 0);
        heap.set_userdata_metatable(u, Some(mt));
        assert!(heap.userdata.header(u).is_finalizable());

        let outcome = heap.full_gc(false);
        assert!(matches!(outcome, StepOutcome::RunFinalizers(_)));
        assert!(heap.userdata.contains(u));
        assert_eq!(heap.gc.pending_finalizers(), 1);

        assert_eq!(heap.take_finalizable(), Some(Value::Userdata(u)));
        assert_eq!(heap.take_finalizable(), None);
        assert!(!heap.userdata.header(u).is_finalizable());

        assert_eq!(heap.full_gc(false), StepOutcome::Done);
        assert!(!heap.userdata.contains(u));
    }

    #[test]
    fn test_finalized_object_keeps_its_references() {
        let mut heap = heap();
        let mt = gc_metatable(&mut heap);
        let t = heap.new_table();
        let inner = heap.new_table();
        heap.table_set_int(t, 1, Value::Table(inner));
        heap.set_table_metatable(t, Some(mt));
        heap.full_gc(false);
        assert!(heap.tables.contains(t));
        assert!(heap.tables.contains(inner));
    }

    #[test]
    fn test_metatable_without_gc_does_not_register() {
        let mut heap = heap();
        let mt = heap.new_table();
        let t = heap.new_table();
        heap.set_table_metatable(t, Some(mt));
        assert!(!heap.tables.header(t).is_finalizable());
        // adding __gc afterwards has no effect
        let key = heap.new_str("__gc");
        heap.table_set(mt, Value::String(key), Value::Boolean(true)).unwrap();
        assert!(!heap.tables.header(t).is_finalizable());
    }

    #[test]
    fn test_finalizers_run_newest_first() {
        let mut heap = heap();
        let mt = gc_metatable(&mut heap);
        let first = heap.new_table();
        heap.set_table_metatable(first, Some(mt));
        let second = heap.new_table();
        heap.set_table_metatable(second, Some(mt));
        heap.full_gc(false);
        assert_eq!(heap.take_finalizable(), Some(Value::Table(second)));
        assert_eq!(heap.take_finalizable(), Some(Value::Table(first)));
    }

    #[test]
    fn test_emergency_collection_defers_finalizers() {
        let mut heap = heap();
        let mt = gc_metatable(&mut heap);
        let t = heap.new_table();
        heap.set_table_metatable(t, Some(mt));
        assert_eq!(heap.full_gc(true), StepOutcome::Done);
        assert_eq!(heap.gc.phase(), GcPhase::Pause);
        assert_eq!(heap.gc.pending_finalizers(), 1);
        assert!(heap.contains(GcObjectRef::Table(t)));
    }

    #[test]
    fn test_separate_all_for_shutdown() {
        let mut heap = heap();
        let mt = gc_metatable(&mut heap);
        let t = heap.new_table();
        heap.set_table_metatable(t, Some(mt));
        let g = heap.globals();
        heap.table_set_int(g, 1, Value::Table(t));
        heap.separate_all_finalizers();
        assert_eq!(heap.gc.pending_finalizers(), 1);
        heap.gc.closing = true;
        let late = heap.new_table();
        heap.set_table_metatable(late, Some(mt));
        assert!(!heap.tables.header(late).is_finalizable());
    }
}
