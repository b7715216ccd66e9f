//! Number coercions, formatting and arithmetic helpers.
//!
//! Integer arithmetic wraps around; floor division and modulo round toward
//! negative infinity. Mixed integer/float comparisons are exact, even for
//! integers that a float cannot represent.

use crate::Value;
use num_traits::ToPrimitive;

/// Rounding mode for float-to-integer conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum F2I {
    /// Only accept floats with an exact integer value
    Exact,
    /// Round toward negative infinity
    Floor,
    /// Round toward positive infinity
    Ceil,
}

/// Converts a float to an integer using the given rounding mode.
///
/// Returns `None` for NaN, infinities, values out of the `i64` range, and
/// (with [`F2I::Exact`]) values with a fractional part.
pub fn float_to_integer(f: f64, mode: F2I) -> Option<i64> {
    let rounded = f.floor();
    let g = match mode {
        F2I::Exact if rounded != f => return None,
        F2I::Exact | F2I::Floor => rounded,
        F2I::Ceil if rounded != f => rounded + 1.0,
        F2I::Ceil => rounded,
    };
    g.to_i64()
}

/// Integer value of a number, converting integral floats.
pub fn to_integer_exact(v: &Value) -> Option<i64> {
    match *v {
        Value::Integer(i) => Some(i),
        Value::Float(f) => float_to_integer(f, F2I::Exact),
        _ => None,
    }
}

// ============================================================================
// String to number
// ============================================================================

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

fn trim(s: &[u8]) -> &[u8] {
    let start = s.iter().position(|&b| !is_space(b)).unwrap_or(s.len());
    let end = s.iter().rposition(|&b| !is_space(b)).map_or(start, |p| p + 1);
    &s[start..end]
}

fn hex_value(b: u8) -> Option<u32> {
    (b as char).to_digit(16)
}

fn str_to_int(s: &[u8]) -> Option<i64> {
    let (neg, digits) = match s.first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    if digits.is_empty() {
        return None;
    }
    let mut acc: u64 = 0;
    if digits.len() > 2 && digits[0] == b'0' && (digits[1] | 0x20) == b'x' {
        for &b in &digits[2..] {
            acc = acc.wrapping_mul(16).wrapping_add(hex_value(b)? as u64);
        }
    } else {
        let max_by_10 = (i64::MAX as u64) / 10;
        let max_last = (i64::MAX as u64) % 10;
        for &b in digits {
            if !b.is_ascii_digit() {
                return None;
            }
            let d = (b - b'0') as u64;
            if acc >= max_by_10 && (acc > max_by_10 || d > max_last + neg as u64) {
                return None;
            }
            acc = acc * 10 + d;
        }
    }
    let value = acc as i64;
    Some(if neg { value.wrapping_neg() } else { value })
}

fn hex_str_to_float(s: &[u8]) -> Option<f64> {
    let (neg, rest) = match s.first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    if rest.len() < 2 || rest[0] != b'0' || (rest[1] | 0x20) != b'x' {
        return None;
    }
    let mut i = 2;
    let mut mantissa = 0.0f64;
    let mut exp: i64 = 0;
    let mut any_digit = false;
    let mut seen_dot = false;
    while i < rest.len() {
        let b = rest[i];
        if b == b'.' {
            if seen_dot {
                return None;
            }
            seen_dot = true;
        } else if let Some(d) = hex_value(b) {
            mantissa = mantissa * 16.0 + d as f64;
            if seen_dot {
                exp -= 4;
            }
            any_digit = true;
        } else {
            break;
        }
        i += 1;
    }
    if !any_digit {
        return None;
    }
    if i < rest.len() {
        if (rest[i] | 0x20) != b'p' {
            return None;
        }
        i += 1;
        let exp_part = std::str::from_utf8(&rest[i..]).ok()?;
        if exp_part.is_empty() {
            return None;
        }
        exp += exp_part.parse::<i32>().ok()? as i64;
    }
    let value = mantissa * 2f64.powi(exp.clamp(-2000, 2000) as i32);
    Some(if neg { -value } else { value })
}

fn str_to_float(s: &[u8]) -> Option<f64> {
    if s.iter().any(|&b| b == b'n' || b == b'N') {
        return None;
    }
    if s.iter().any(|&b| b == b'x' || b == b'X') {
        return hex_str_to_float(s);
    }
    let text = std::str::from_utf8(s).ok()?;
    if text.is_empty() || text.contains('_') {
        return None;
    }
    text.parse::<f64>().ok()
}

/// Converts a numeral to a number, trying the integer syntax first.
///
/// Leading and trailing whitespace are allowed; `inf` and `nan` spellings
/// are rejected.
///
/// # Examples
///
/// ```
/// use core_types::{str_to_number, Value};
///
/// assert_eq!(str_to_number(b" 10 "), Some(Value::Integer(10)));
/// assert_eq!(str_to_number(b"0x10"), Some(Value::Integer(16)));
/// assert_eq!(str_to_number(b"1e2"), Some(Value::Float(100.0)));
/// assert_eq!(str_to_number(b"0x1p4"), Some(Value::Float(16.0)));
/// assert_eq!(str_to_number(b"inf"), None);
/// ```
pub fn str_to_number(s: &[u8]) -> Option<Value> {
    let s = trim(s);
    if s.is_empty() {
        return None;
    }
    if let Some(i) = str_to_int(s) {
        return Some(Value::Integer(i));
    }
    str_to_float(s).map(Value::Float)
}

// ============================================================================
// Number to string
// ============================================================================

/// Formats a float like C's `%.14g`.
pub fn format_g14(f: f64) -> String {
    const PRECISION: i32 = 14;
    if f.is_nan() {
        return if f.is_sign_negative() { "-nan".into() } else { "nan".into() };
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf".into() } else { "-inf".into() };
    }
    if f == 0.0 {
        return if f.is_sign_negative() { "-0".into() } else { "0".into() };
    }
    let sci = format!("{:.*e}", (PRECISION - 1) as usize, f);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };
    if exp < -4 || exp >= PRECISION {
        let mantissa = strip_fraction_zeros(mantissa);
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exp.abs())
    } else {
        let decimals = (PRECISION - 1 - exp).max(0) as usize;
        strip_fraction_zeros(&format!("{:.*}", decimals, f)).to_string()
    }
}

fn strip_fraction_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Formats a float for `tostring`, adding `.0` when it would read as an
/// integer.
///
/// # Examples
///
/// ```
/// use core_types::format_float;
///
/// assert_eq!(format_float(1.0), "1.0");
/// assert_eq!(format_float(0.1), "0.1");
/// assert_eq!(format_float(1e100), "1e+100");
/// ```
pub fn format_float(f: f64) -> String {
    let mut s = format_g14(f);
    if s.bytes().all(|b| b == b'-' || b.is_ascii_digit()) {
        s.push_str(".0");
    }
    s
}

/// String form of a number value, `None` for non-numbers.
pub fn number_to_string(v: &Value) -> Option<String> {
    match *v {
        Value::Integer(i) => Some(i.to_string()),
        Value::Float(f) => Some(format_float(f)),
        _ => None,
    }
}

// ============================================================================
// Arithmetic
// ============================================================================

/// Error raised by integer division or modulo by zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DivByZero;

/// Floor division of integers.
pub fn int_floor_div(m: i64, n: i64) -> Result<i64, DivByZero> {
    match n {
        0 => Err(DivByZero),
        -1 => Ok(m.wrapping_neg()),
        _ => {
            let q = m / n;
            if (m ^ n) < 0 && m % n != 0 {
                Ok(q - 1)
            } else {
                Ok(q)
            }
        }
    }
}

/// Integer modulo with the sign of the divisor.
pub fn int_mod(m: i64, n: i64) -> Result<i64, DivByZero> {
    match n {
        0 => Err(DivByZero),
        -1 => Ok(0),
        _ => {
            let r = m % n;
            if r != 0 && (r ^ n) < 0 {
                Ok(r + n)
            } else {
                Ok(r)
            }
        }
    }
}

/// Float modulo with the sign of the divisor.
pub fn float_mod(a: f64, b: f64) -> f64 {
    let m = a % b;
    if (m > 0.0 && b < 0.0) || (m < 0.0 && b > 0.0) {
        m + b
    } else {
        m
    }
}

/// Float floor division.
pub fn float_floor_div(a: f64, b: f64) -> f64 {
    (a / b).floor()
}

/// Float exponentiation.
pub fn float_pow(a: f64, b: f64) -> f64 {
    if b == 2.0 {
        a * a
    } else {
        a.powf(b)
    }
}

/// Logical left shift; negative amounts shift right.
pub fn shift_left(x: i64, y: i64) -> i64 {
    if y < 0 {
        if y <= -64 {
            0
        } else {
            ((x as u64) >> (-y) as u32) as i64
        }
    } else if y >= 64 {
        0
    } else {
        ((x as u64) << y as u32) as i64
    }
}

// ============================================================================
// Mixed comparisons
// ============================================================================

const FLOAT_MANTISSA_BITS: u32 = 53;

fn int_fits_float(i: i64) -> bool {
    let limit = 1u64 << FLOAT_MANTISSA_BITS;
    (i as u64).wrapping_add(limit) <= 2 * limit
}

/// `i < f`
pub fn lt_int_float(i: i64, f: f64) -> bool {
    if int_fits_float(i) {
        (i as f64) < f
    } else {
        match float_to_integer(f, F2I::Ceil) {
            Some(fi) => i < fi,
            None => f > 0.0,
        }
    }
}

/// `i <= f`
pub fn le_int_float(i: i64, f: f64) -> bool {
    if int_fits_float(i) {
        (i as f64) <= f
    } else {
        match float_to_integer(f, F2I::Floor) {
            Some(fi) => i <= fi,
            None => f > 0.0,
        }
    }
}

/// `f < i`
pub fn lt_float_int(f: f64, i: i64) -> bool {
    if int_fits_float(i) {
        f < (i as f64)
    } else {
        match float_to_integer(f, F2I::Floor) {
            Some(fi) => fi < i,
            None => f < 0.0,
        }
    }
}

/// `f <= i`
pub fn le_float_int(f: f64, i: i64) -> bool {
    if int_fits_float(i) {
        f <= (i as f64)
    } else {
        match float_to_integer(f, F2I::Ceil) {
            Some(fi) => fi <= i,
            None => f < 0.0,
        }
    }
}
