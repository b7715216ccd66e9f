//! Unit tests for generational mode

use core_types::Value;
use memory_manager::{Age, GcKind, GcPhase, Heap, HeapConfig};

fn gen_heap() -> Heap {
    Heap::new(HeapConfig {
        seed: Some(14),
        generational: true,
        ..HeapConfig::default()
    })
}

fn anchor(heap: &mut Heap, name: &str, v: Value) {
    let g = heap.globals();
    let k = heap.new_str(name);
    heap.table_set(g, Value::String(k), v).unwrap();
}

#[cfg(test)]
mod generational_tests {
    use super::*;

    #[test]
    fn test_starts_in_generational_mode() {
        let heap = gen_heap();
        assert_eq!(heap.gc.kind(), GcKind::Generational);
        assert_eq!(heap.gc.phase(), GcPhase::Propagate);
        assert_eq!(heap.tables.header(heap.registry).age(), Age::Old);
    }

    #[test]
    fn test_minor_collection_frees_young_garbage() {
        let mut heap = gen_heap();
        let garbage = heap.new_table();
        heap.step();
        assert!(!heap.tables.contains(garbage));
    }

    #[test]
    fn test_survivors_age() {
        let mut heap = gen_heap();
        let t = heap.new_table();
        anchor(&mut heap, "t", Value::Table(t));
        heap.step();
        assert_eq!(heap.tables.header(t).age(), Age::Survival);
        heap.step();
        assert_eq!(heap.tables.header(t).age(), Age::Old1);
        heap.step();
        assert_eq!(heap.tables.header(t).age(), Age::Old);
    }

    #[test]
    fn test_old_table_keeps_young_value() {
        let mut heap = gen_heap();
        let old = heap.new_table();
        anchor(&mut heap, "old", Value::Table(old));
        heap.full_gc(false);
        assert_eq!(heap.tables.header(old).age(), Age::Old);

        let young = heap.new_table();
        heap.table_set_int(old, 1, Value::Table(young));
        assert_eq!(heap.tables.header(old).age(), Age::Touched1);
        for _ in 0..4 {
            heap.step();
            assert!(heap.tables.contains(young));
        }
        assert_eq!(heap.table_get_int(old, 1), Value::Table(young));
        assert_eq!(heap.tables.header(old).age(), Age::Old);
    }

    #[test]
    fn test_old_garbage_needs_major_collection() {
        let mut heap = gen_heap();
        let t = heap.new_table();
        anchor(&mut heap, "t", Value::Table(t));
        heap.full_gc(false);
        let g = heap.globals();
        let k = heap.new_str("t");
        heap.table_set(g, Value::String(k), Value::Nil).unwrap();
        heap.step();
        assert!(heap.tables.contains(t));
        heap.full_gc(false);
        assert!(!heap.tables.contains(t));
    }

    #[test]
    fn test_switching_back_to_incremental() {
        let mut heap = gen_heap();
        let keep = heap.new_table();
        anchor(&mut heap, "keep", Value::Table(keep));
        heap.step();
        heap.change_mode(GcKind::Incremental);
        assert_eq!(heap.gc.kind(), GcKind::Incremental);
        assert_eq!(heap.gc.phase(), GcPhase::Pause);
        let garbage = heap.new_table();
        heap.full_gc(false);
        assert!(heap.tables.contains(keep));
        assert!(!heap.tables.contains(garbage));
    }
}
