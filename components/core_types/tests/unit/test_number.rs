//! Unit tests for number coercion and formatting

use core_types::{format_float, number_to_string, str_to_number, to_integer_exact, Value};

#[test]
fn test_str_to_number_integers() {
    assert_eq!(str_to_number(b"42"), Some(Value::Integer(42)));
    assert_eq!(str_to_number(b"-42"), Some(Value::Integer(-42)));
    assert_eq!(str_to_number(b"\t7\n"), Some(Value::Integer(7)));
    assert_eq!(str_to_number(b"0XFF"), Some(Value::Integer(255)));
}

#[test]
fn test_str_to_number_floats() {
    assert_eq!(str_to_number(b"1.5"), Some(Value::Float(1.5)));
    assert_eq!(str_to_number(b".5"), Some(Value::Float(0.5)));
    assert_eq!(str_to_number(b"5."), Some(Value::Float(5.0)));
    assert_eq!(str_to_number(b"0x.8"), Some(Value::Float(0.5)));
    assert_eq!(str_to_number(b"0x1.8p1"), Some(Value::Float(3.0)));
}

#[test]
fn test_str_to_number_rejects_garbage() {
    assert_eq!(str_to_number(b""), None);
    assert_eq!(str_to_number(b"   "), None);
    assert_eq!(str_to_number(b"abc"), None);
    assert_eq!(str_to_number(b"nan"), None);
    assert_eq!(str_to_number(b"1e"), None);
    assert_eq!(str_to_number(b"1_000"), None);
}

#[test]
fn test_number_to_string() {
    assert_eq!(number_to_string(&Value::Integer(-3)).as_deref(), Some("-3"));
    assert_eq!(number_to_string(&Value::Float(2.5)).as_deref(), Some("2.5"));
    assert_eq!(number_to_string(&Value::Nil), None);
    assert_eq!(format_float(1e15), "1e+15");
    assert_eq!(format_float(100.0), "100.0");
}

#[test]
fn test_to_integer_exact() {
    assert_eq!(to_integer_exact(&Value::Float(8.0)), Some(8));
    assert_eq!(to_integer_exact(&Value::Float(8.5)), None);
    assert_eq!(to_integer_exact(&Value::Integer(8)), Some(8));
    assert_eq!(to_integer_exact(&Value::Boolean(true)), None);
}
