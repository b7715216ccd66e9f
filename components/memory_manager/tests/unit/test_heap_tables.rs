//! Unit tests for strings and tables through the heap API

use core_types::Value;
use memory_manager::{Heap, HeapConfig, TableError};

fn heap() -> Heap {
    Heap::new(HeapConfig {
        seed: Some(15),
        ..HeapConfig::default()
    })
}

#[cfg(test)]
mod interning_tests {
    use super::*;

    #[test]
    fn test_short_strings_share_identity() {
        let mut heap = heap();
        for text in ["", "a", "hello world", "0123456789012345678901234567890123456789"] {
            let a = heap.new_str(text);
            let b = heap.new_str(text);
            assert_eq!(a, b, "{text:?} not interned");
        }
    }

    #[test]
    fn test_long_strings_are_distinct_but_equal() {
        let mut heap = heap();
        let text = "x".repeat(41);
        let a = heap.new_str(&text);
        let b = heap.new_str(&text);
        assert_ne!(a, b);
        assert!(heap.raw_equal(&Value::String(a), &Value::String(b)));
        let t = heap.new_table();
        heap.table_set(t, Value::String(a), Value::Integer(1)).unwrap();
        assert_eq!(heap.table_get(t, &Value::String(b)), Value::Integer(1));
    }

    #[test]
    fn test_many_strings_grow_the_table() {
        let mut heap = heap();
        let size = heap.string_table_size();
        let refs: Vec<_> = (0..1000).map(|i| heap.new_str(&format!("s{i}"))).collect();
        assert!(heap.string_table_size() > size);
        for (i, s) in refs.iter().enumerate() {
            assert_eq!(heap.str_bytes(*s), format!("s{i}").as_bytes());
            assert_eq!(heap.new_str(&format!("s{i}")), *s);
        }
    }
}

#[cfg(test)]
mod table_tests {
    use super::*;

    #[test]
    fn test_sequence_length() {
        let mut heap = heap();
        let t = heap.new_table();
        for i in 1..=100 {
            heap.table_set_int(t, i, Value::Integer(i * 10));
        }
        assert_eq!(heap.table_len(t), 100);
        assert!(heap.tables[t].array_size() >= 100);
        heap.table_set_int(t, 100, Value::Nil);
        let border = heap.table_len(t);
        assert_eq!(border, 99);
        assert!(!heap.table_get_int(t, border as i64).is_nil());
    }

    #[test]
    fn test_integral_float_keys_alias_integers() {
        let mut heap = heap();
        let t = heap.new_table();
        heap.table_set(t, Value::Float(2.0), Value::Boolean(true)).unwrap();
        assert_eq!(heap.table_get_int(t, 2), Value::Boolean(true));
        heap.table_set(t, Value::Float(2.5), Value::Integer(3)).unwrap();
        assert_eq!(heap.table_get(t, &Value::Float(2.5)), Value::Integer(3));
    }

    #[test]
    fn test_invalid_keys() {
        let mut heap = heap();
        let t = heap.new_table();
        assert_eq!(
            heap.table_set(t, Value::Nil, Value::Integer(1)),
            Err(TableError::NilIndex)
        );
        assert_eq!(
            heap.table_set(t, Value::Float(f64::NAN), Value::Integer(1)),
            Err(TableError::NaNIndex)
        );
        assert_eq!(
            heap.table_next(t, &Value::Integer(99)),
            Err(TableError::InvalidNextKey)
        );
    }

    #[test]
    fn test_traversal_tolerates_clearing_fields() {
        let mut heap = heap();
        let t = heap.new_table();
        for i in 0..20 {
            let k = heap.new_str(&format!("k{i}"));
            heap.table_set(t, Value::String(k), Value::Integer(i)).unwrap();
        }
        let mut key = Value::Nil;
        let mut seen = 0;
        while let Some((k, _)) = heap.table_next(t, &key).unwrap() {
            heap.table_set(t, k, Value::Nil).unwrap();
            seen += 1;
            key = k;
        }
        assert_eq!(seen, 20);
        assert!(heap.tables[t].is_empty());
    }

    #[test]
    fn test_growth_is_accounted() {
        let mut heap = heap();
        let t = heap.new_table();
        let before = heap.total_bytes();
        for i in 1..=64 {
            heap.table_set_int(t, i, Value::Integer(i));
        }
        assert!(heap.total_bytes() > before);
    }
}
