//! Unit tests for weak tables and ephemerons

use core_types::{TableRef, Value};
use memory_manager::{Heap, HeapConfig};

fn heap() -> Heap {
    Heap::new(HeapConfig {
        seed: Some(12),
        ..HeapConfig::default()
    })
}

fn anchor(heap: &mut Heap, name: &str, v: Value) {
    let g = heap.globals();
    let k = heap.new_str(name);
    heap.table_set(g, Value::String(k), v).unwrap();
}

fn weak_table(heap: &mut Heap, mode: &str) -> TableRef {
    let t = heap.new_table();
    let mt = heap.new_table();
    let key = heap.new_str("__mode");
    let mode = heap.new_str(mode);
    heap.table_set(mt, Value::String(key), Value::String(mode)).unwrap();
    heap.set_table_metatable(t, Some(mt));
    anchor(heap, "weak", Value::Table(t));
    t
}

#[cfg(test)]
mod weak_value_tests {
    use super::*;

    #[test]
    fn test_unreferenced_values_are_cleared() {
        let mut heap = heap();
        let t = weak_table(&mut heap, "v");
        let kept = heap.new_table();
        anchor(&mut heap, "kept", Value::Table(kept));
        let lost = heap.new_table();
        heap.table_set_int(t, 1, Value::Table(kept));
        heap.table_set_int(t, 2, Value::Table(lost));
        let name = heap.new_str("name");
        let lost_too = heap.new_table();
        heap.table_set(t, Value::String(name), Value::Table(lost_too)).unwrap();
        heap.full_gc(false);
        assert_eq!(heap.table_get_int(t, 1), Value::Table(kept));
        assert_eq!(heap.table_get_int(t, 2), Value::Nil);
        assert_eq!(heap.table_get_str(t, name), Value::Nil);
        assert!(!heap.tables.contains(lost));
    }

    #[test]
    fn test_strings_are_never_cleared() {
        let mut heap = heap();
        let t = weak_table(&mut heap, "v");
        let s = heap.new_str("only here");
        heap.table_set_int(t, 1, Value::String(s));
        heap.full_gc(false);
        assert_eq!(heap.table_get_int(t, 1), Value::String(s));
        assert!(heap.strings.contains(s));
    }

    #[test]
    fn test_scalars_survive() {
        let mut heap = heap();
        let t = weak_table(&mut heap, "kv");
        heap.table_set_int(t, 1, Value::Float(1.5));
        heap.table_set_int(t, 2, Value::Boolean(true));
        heap.full_gc(false);
        assert_eq!(heap.table_get_int(t, 1), Value::Float(1.5));
        assert_eq!(heap.table_get_int(t, 2), Value::Boolean(true));
    }
}

#[cfg(test)]
mod ephemeron_tests {
    use super::*;

    #[test]
    fn test_value_lives_while_key_lives() {
        let mut heap = heap();
        let t = weak_table(&mut heap, "k");
        let key = heap.new_table();
        anchor(&mut heap, "key", Value::Table(key));
        let value = heap.new_table();
        heap.table_set(t, Value::Table(key), Value::Table(value)).unwrap();
        heap.full_gc(false);
        assert_eq!(heap.table_get(t, &Value::Table(key)), Value::Table(value));
        assert!(heap.tables.contains(value));
    }

    #[test]
    fn test_value_referring_to_its_key_does_not_keep_it() {
        let mut heap = heap();
        let t = weak_table(&mut heap, "k");
        let key = heap.new_table();
        let value = heap.new_table();
        heap.table_set_int(value, 1, Value::Table(key));
        heap.table_set(t, Value::Table(key), Value::Table(value)).unwrap();
        heap.full_gc(false);
        assert!(!heap.tables.contains(key));
        assert!(!heap.tables.contains(value));
        assert_eq!(heap.table_next(t, &Value::Nil).unwrap(), None);
    }

    #[test]
    fn test_chained_ephemerons_converge() {
        let mut heap = heap();
        let t = weak_table(&mut heap, "k");
        // root -> a, t[a] = b, t[b] = c
        let a = heap.new_table();
        let b = heap.new_table();
        let c = heap.new_table();
        heap.table_set(t, Value::Table(b), Value::Table(c)).unwrap();
        heap.table_set(t, Value::Table(a), Value::Table(b)).unwrap();
        anchor(&mut heap, "a", Value::Table(a));
        heap.full_gc(false);
        assert!(heap.tables.contains(b));
        assert!(heap.tables.contains(c));
        assert_eq!(heap.table_get(t, &Value::Table(b)), Value::Table(c));
    }

    #[test]
    fn test_all_weak_table_clears_both_sides() {
        let mut heap = heap();
        let t = weak_table(&mut heap, "kv");
        let key = heap.new_table();
        anchor(&mut heap, "key", Value::Table(key));
        let value = heap.new_table();
        heap.table_set(t, Value::Table(key), Value::Table(value)).unwrap();
        heap.full_gc(false);
        assert_eq!(heap.table_get(t, &Value::Table(key)), Value::Nil);
        assert!(heap.tables.contains(key));
        assert!(!heap.tables.contains(value));
    }
}
