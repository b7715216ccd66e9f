//! Value semantics of the virtual machine
//!
//! Arithmetic, comparison, concatenation, length and indexing with their
//! metamethod fallbacks. The dispatch loop and the embedding API share
//! these operations.
//!
//! Arithmetic never converts strings to numbers; string operands reach the
//! metamethods like any other non-number.

use crate::debug::VarSite;
use crate::state::State;
use core_types::{
    float_floor_div, float_mod, float_pow, float_to_integer, int_floor_div, int_mod, le_float_int,
    le_int_float, lt_float_int, lt_int_float, number_to_string, shift_left, str_to_number,
    to_integer_exact, LuaResult, TagMethod, Value, F2I,
};
use memory_manager::TableError;

/// Limit of `__index`/`__newindex` chains.
pub const MAX_TAG_LOOP: usize = 2000;

/// Arithmetic and bitwise operators, in API order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `%`
    Mod,
    /// `^`
    Pow,
    /// `/`
    Div,
    /// `//`
    IDiv,
    /// `&`
    BAnd,
    /// `|`
    BOr,
    /// `~`
    BXor,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// unary `-`
    Unm,
    /// unary `~`
    BNot,
}

impl ArithOp {
    /// Metamethod event of the operator.
    pub fn event(self) -> TagMethod {
        match self {
            ArithOp::Add => TagMethod::Add,
            ArithOp::Sub => TagMethod::Sub,
            ArithOp::Mul => TagMethod::Mul,
            ArithOp::Mod => TagMethod::Mod,
            ArithOp::Pow => TagMethod::Pow,
            ArithOp::Div => TagMethod::Div,
            ArithOp::IDiv => TagMethod::IDiv,
            ArithOp::BAnd => TagMethod::BAnd,
            ArithOp::BOr => TagMethod::BOr,
            ArithOp::BXor => TagMethod::BXor,
            ArithOp::Shl => TagMethod::Shl,
            ArithOp::Shr => TagMethod::Shr,
            ArithOp::Unm => TagMethod::Unm,
            ArithOp::BNot => TagMethod::BNot,
        }
    }

    /// Operator of a binary or unary metamethod event.
    pub fn from_event(event: TagMethod) -> Option<ArithOp> {
        Some(match event {
            TagMethod::Add => ArithOp::Add,
            TagMethod::Sub => ArithOp::Sub,
            TagMethod::Mul => ArithOp::Mul,
            TagMethod::Mod => ArithOp::Mod,
            TagMethod::Pow => ArithOp::Pow,
            TagMethod::Div => ArithOp::Div,
            TagMethod::IDiv => ArithOp::IDiv,
            TagMethod::BAnd => ArithOp::BAnd,
            TagMethod::BOr => ArithOp::BOr,
            TagMethod::BXor => ArithOp::BXor,
            TagMethod::Shl => ArithOp::Shl,
            TagMethod::Shr => ArithOp::Shr,
            TagMethod::Unm => ArithOp::Unm,
            TagMethod::BNot => ArithOp::BNot,
            _ => return None,
        })
    }

    fn is_bitwise(self) -> bool {
        matches!(
            self,
            ArithOp::BAnd | ArithOp::BOr | ArithOp::BXor | ArithOp::Shl | ArithOp::Shr | ArithOp::BNot
        )
    }
}

// ============================================================================
// Conversions
// ============================================================================

/// Float value of a number, without string coercion.
#[inline]
pub fn to_number_ns(v: &Value) -> Option<f64> {
    v.as_float()
}

/// Integer value of a number (floats must be integral), without string
/// coercion.
#[inline]
pub fn to_integer_ns(v: &Value) -> Option<i64> {
    to_integer_exact(v)
}

fn float_arith(op: ArithOp, a: f64, b: f64) -> f64 {
    match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => a / b,
        ArithOp::Pow => float_pow(a, b),
        ArithOp::IDiv => float_floor_div(a, b),
        ArithOp::Unm => -a,
        ArithOp::Mod => float_mod(a, b),
        _ => f64::NAN,
    }
}

fn less_than_numbers(l: Value, r: Value) -> bool {
    match (l, r) {
        (Value::Integer(a), Value::Integer(b)) => a < b,
        (Value::Integer(a), Value::Float(b)) => lt_int_float(a, b),
        (Value::Float(a), Value::Integer(b)) => lt_float_int(a, b),
        (Value::Float(a), Value::Float(b)) => a < b,
        _ => false,
    }
}

fn less_equal_numbers(l: Value, r: Value) -> bool {
    match (l, r) {
        (Value::Integer(a), Value::Integer(b)) => a <= b,
        (Value::Integer(a), Value::Float(b)) => le_int_float(a, b),
        (Value::Float(a), Value::Integer(b)) => le_float_int(a, b),
        (Value::Float(a), Value::Float(b)) => a <= b,
        _ => false,
    }
}

impl State {
    // ========================================================================
    // Arithmetic
    // ========================================================================

    /// Integer arithmetic, raising on `//` or `%` by zero.
    pub(crate) fn int_arith(&mut self, op: ArithOp, a: i64, b: i64) -> LuaResult<i64> {
        Ok(match op {
            ArithOp::Add => a.wrapping_add(b),
            ArithOp::Sub => a.wrapping_sub(b),
            ArithOp::Mul => a.wrapping_mul(b),
            ArithOp::Mod => match int_mod(a, b) {
                Ok(r) => r,
                Err(_) => return Err(self.run_error("attempt to perform 'n%0'")),
            },
            ArithOp::IDiv => match int_floor_div(a, b) {
                Ok(q) => q,
                Err(_) => return Err(self.run_error("attempt to perform 'n//0'")),
            },
            ArithOp::BAnd => a & b,
            ArithOp::BOr => a | b,
            ArithOp::BXor => a ^ b,
            ArithOp::Shl => shift_left(a, b),
            ArithOp::Shr => shift_left(a, b.wrapping_neg()),
            ArithOp::Unm => a.wrapping_neg(),
            ArithOp::BNot => !a,
            // float-only operators are dispatched by `raw_arith`
            ArithOp::Pow | ArithOp::Div => 0,
        })
    }

    /// Arithmetic on numbers only; `None` when an operand does not qualify
    /// and a metamethod must be tried.
    pub(crate) fn raw_arith(&mut self, op: ArithOp, p1: Value, p2: Value) -> LuaResult<Option<Value>> {
        if op.is_bitwise() {
            return match (to_integer_ns(&p1), to_integer_ns(&p2)) {
                (Some(a), Some(b)) => Ok(Some(Value::Integer(self.int_arith(op, a, b)?))),
                _ => Ok(None),
            };
        }
        if matches!(op, ArithOp::Div | ArithOp::Pow) {
            return Ok(match (to_number_ns(&p1), to_number_ns(&p2)) {
                (Some(a), Some(b)) => Some(Value::Float(float_arith(op, a, b))),
                _ => None,
            });
        }
        if let (Value::Integer(a), Value::Integer(b)) = (p1, p2) {
            return Ok(Some(Value::Integer(self.int_arith(op, a, b)?)));
        }
        Ok(match (to_number_ns(&p1), to_number_ns(&p2)) {
            (Some(a), Some(b)) => Some(Value::Float(float_arith(op, a, b))),
            _ => None,
        })
    }

    /// Full arithmetic with metamethods.
    pub(crate) fn arith_values(
        &mut self,
        op: ArithOp,
        p1: Value,
        p2: Value,
        sites: (VarSite, VarSite),
    ) -> LuaResult<Value> {
        match self.raw_arith(op, p1, p2)? {
            Some(v) => Ok(v),
            None => self.try_bin_tm(p1, p2, sites, op.event()),
        }
    }

    // ========================================================================
    // Comparison
    // ========================================================================

    /// `t1 == t2`, calling `__eq` for distinct tables or userdata.
    pub(crate) fn equal_values(&mut self, t1: Value, t2: Value) -> LuaResult<bool> {
        if self.heap.raw_equal(&t1, &t2) {
            return Ok(true);
        }
        let (m1, m2) = match (t1, t2) {
            (Value::Table(a), Value::Table(b)) => {
                (self.heap.tables[a].metatable, self.heap.tables[b].metatable)
            }
            (Value::Userdata(a), Value::Userdata(b)) => {
                (self.heap.userdata[a].metatable, self.heap.userdata[b].metatable)
            }
            _ => return Ok(false),
        };
        let mut tm = m1.and_then(|mt| self.heap.fast_tm(mt, TagMethod::Eq));
        if tm.is_none() {
            tm = m2.and_then(|mt| self.heap.fast_tm(mt, TagMethod::Eq));
        }
        match tm {
            Some(tm) => Ok(self.call_tm_res(tm, t1, t2)?.is_truthy()),
            None => Ok(false),
        }
    }

    /// `l < r`
    pub(crate) fn less_than(&mut self, l: Value, r: Value) -> LuaResult<bool> {
        if l.is_number() && r.is_number() {
            return Ok(less_than_numbers(l, r));
        }
        if let (Value::String(a), Value::String(b)) = (l, r) {
            return Ok(self.heap.str_bytes(a) < self.heap.str_bytes(b));
        }
        self.call_order_tm(l, r, TagMethod::Lt)
    }

    /// `l <= r`
    pub(crate) fn less_equal(&mut self, l: Value, r: Value) -> LuaResult<bool> {
        if l.is_number() && r.is_number() {
            return Ok(less_equal_numbers(l, r));
        }
        if let (Value::String(a), Value::String(b)) = (l, r) {
            return Ok(self.heap.str_bytes(a) <= self.heap.str_bytes(b));
        }
        self.call_order_tm(l, r, TagMethod::Le)
    }

    // ========================================================================
    // Strings
    // ========================================================================

    /// Converts a number in stack slot `slot` to a string in place. Returns
    /// whether the slot now holds a string.
    pub(crate) fn to_string_in_place(&mut self, slot: usize) -> bool {
        match self.stack_get(slot) {
            Value::String(_) => true,
            v => match number_to_string(&v) {
                Some(text) => {
                    let s = self.heap.new_str(&text);
                    self.stack_set(slot, Value::String(s));
                    true
                }
                None => false,
            },
        }
    }

    fn is_empty_string(&self, v: Value) -> bool {
        matches!(v, Value::String(s) if self.heap.strings[s].is_empty())
    }

    /// Concatenates the `total` values on top of the stack, leaving the
    /// result in place of the first one.
    pub(crate) fn concat(&mut self, mut total: usize) -> LuaResult<()> {
        while total > 1 {
            let top = self.top();
            let mut n = 2;
            let first = self.stack_get(top - 2);
            let first_ok = matches!(first, Value::String(_)) || first.is_number();
            if !first_ok || !self.to_string_in_place(top - 1) {
                let v = self.try_concat_tm()?;
                self.stack_set(top - 2, v);
            } else if self.is_empty_string(self.stack_get(top - 1)) {
                self.to_string_in_place(top - 2);
            } else if self.is_empty_string(first) {
                let second = self.stack_get(top - 1);
                self.stack_set(top - 2, second);
            } else {
                let mut len = self.string_len(top - 1);
                n = 1;
                while n < total && self.to_string_in_place(top - n - 1) {
                    let l = self.string_len(top - n - 1);
                    if l >= isize::MAX as usize - len {
                        self.set_top_raw(top - total);
                        return Err(self.run_error("string length overflow"));
                    }
                    len += l;
                    n += 1;
                }
                let mut buf = Vec::with_capacity(len);
                for slot in top - n..top {
                    if let Value::String(s) = self.stack_get(slot) {
                        buf.extend_from_slice(self.heap.str_bytes(s));
                    }
                }
                let s = self.heap.new_string(&buf);
                self.stack_set(top - n, Value::String(s));
            }
            total -= n - 1;
            let top = self.top();
            self.set_top_raw(top - (n - 1));
        }
        Ok(())
    }

    fn string_len(&self, slot: usize) -> usize {
        match self.stack_get(slot) {
            Value::String(s) => self.heap.strings[s].len(),
            _ => 0,
        }
    }

    /// `#v`
    pub(crate) fn obj_len(&mut self, v: Value, site: VarSite) -> LuaResult<Value> {
        let tm = match v {
            Value::Table(t) => {
                let mt = self.heap.tables[t].metatable;
                match mt.and_then(|mt| self.heap.fast_tm(mt, TagMethod::Len)) {
                    Some(tm) => tm,
                    None => return Ok(Value::Integer(self.heap.table_len(t) as i64)),
                }
            }
            Value::String(s) => return Ok(Value::Integer(self.heap.strings[s].len() as i64)),
            _ => {
                let tm = self.heap.tm_by_obj(&v, TagMethod::Len);
                if tm.is_nil() {
                    return Err(self.type_error(v, site, "get length of"));
                }
                tm
            }
        };
        self.call_tm_res(tm, v, v)
    }

    // ========================================================================
    // Indexing
    // ========================================================================

    /// `t[key]` with `__index`. `site` locates `t` for error messages.
    pub(crate) fn get_index(&mut self, t: Value, key: Value, site: VarSite) -> LuaResult<Value> {
        if let Value::Table(h) = t {
            let v = self.heap.table_get(h, &key);
            if !v.is_nil() {
                return Ok(v);
            }
        }
        self.finish_get(t, key, site)
    }

    /// Slow path of [`State::get_index`]: `t[key]` is absent or `t` is not
    /// a table.
    pub(crate) fn finish_get(&mut self, mut t: Value, key: Value, mut site: VarSite) -> LuaResult<Value> {
        for _ in 0..MAX_TAG_LOOP {
            let tm = match t {
                Value::Table(h) => {
                    let mt = self.heap.tables[h].metatable;
                    match mt.and_then(|mt| self.heap.fast_tm(mt, TagMethod::Index)) {
                        Some(tm) => tm,
                        None => return Ok(Value::Nil),
                    }
                }
                _ => {
                    let tm = self.heap.tm_by_obj(&t, TagMethod::Index);
                    if tm.is_nil() {
                        return Err(self.type_error(t, site, "index"));
                    }
                    tm
                }
            };
            if tm.is_function() {
                return self.call_tm_res(tm, t, key);
            }
            t = tm;
            site = VarSite::None;
            if let Value::Table(h) = t {
                let v = self.heap.table_get(h, &key);
                if !v.is_nil() {
                    return Ok(v);
                }
            }
        }
        Err(self.run_error("'__index' chain too long; possible loop"))
    }

    /// `t[key] = val` with `__newindex`.
    pub(crate) fn set_index(&mut self, t: Value, key: Value, val: Value, site: VarSite) -> LuaResult<()> {
        if let Value::Table(h) = t {
            if !self.heap.table_get(h, &key).is_nil() {
                return self.raw_set_checked(h, key, val);
            }
        }
        self.finish_set(t, key, val, site)
    }

    /// Slow path of [`State::set_index`].
    pub(crate) fn finish_set(
        &mut self,
        mut t: Value,
        key: Value,
        val: Value,
        mut site: VarSite,
    ) -> LuaResult<()> {
        for _ in 0..MAX_TAG_LOOP {
            let tm = match t {
                Value::Table(h) => {
                    let mt = self.heap.tables[h].metatable;
                    match mt.and_then(|mt| self.heap.fast_tm(mt, TagMethod::NewIndex)) {
                        Some(tm) => tm,
                        None => return self.raw_set_checked(h, key, val),
                    }
                }
                _ => {
                    let tm = self.heap.tm_by_obj(&t, TagMethod::NewIndex);
                    if tm.is_nil() {
                        return Err(self.type_error(t, site, "index"));
                    }
                    tm
                }
            };
            if tm.is_function() {
                return self.call_tm(tm, t, key, val);
            }
            t = tm;
            site = VarSite::None;
            if let Value::Table(h) = t {
                if !self.heap.table_get(h, &key).is_nil() {
                    return self.raw_set_checked(h, key, val);
                }
            }
        }
        Err(self.run_error("'__newindex' chain too long; possible loop"))
    }

    /// Raw store, turning an invalid key into a runtime error.
    pub(crate) fn raw_set_checked(
        &mut self,
        t: core_types::TableRef,
        key: Value,
        val: Value,
    ) -> LuaResult<()> {
        match self.heap.table_set(t, key, val) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.table_error(e)),
        }
    }

    pub(crate) fn table_error(&mut self, e: TableError) -> core_types::LuaError {
        self.run_error(e.to_string())
    }

    // ========================================================================
    // Numeric for loops
    // ========================================================================

    /// Prepares a numeric `for` loop whose control values start at `ra`.
    /// Returns `true` when the loop must be skipped.
    pub(crate) fn for_prep(&mut self, ra: usize) -> LuaResult<bool> {
        let init = self.stack_get(ra);
        let limit = self.stack_get(ra + 1);
        let step = self.stack_get(ra + 2);
        if let (Value::Integer(init), Value::Integer(step)) = (init, step) {
            if step == 0 {
                return Err(self.run_error("'for' step is zero"));
            }
            self.stack_set(ra + 3, Value::Integer(init));
            let limit = match self.for_limit(init, limit, step)? {
                Some(l) => l,
                None => return Ok(true),
            };
            let count = if step > 0 {
                let c = (limit as u64).wrapping_sub(init as u64);
                if step != 1 {
                    c / step as u64
                } else {
                    c
                }
            } else {
                let c = (init as u64).wrapping_sub(limit as u64);
                c / ((-(step + 1)) as u64 + 1)
            };
            self.stack_set(ra + 1, Value::Integer(count as i64));
            return Ok(false);
        }
        let flimit = match to_number_ns(&limit) {
            Some(f) => f,
            None => return Err(self.for_error(limit, "limit")),
        };
        let fstep = match to_number_ns(&step) {
            Some(f) => f,
            None => return Err(self.for_error(step, "step")),
        };
        let finit = match to_number_ns(&init) {
            Some(f) => f,
            None => return Err(self.for_error(init, "initial value")),
        };
        if fstep == 0.0 {
            return Err(self.run_error("'for' step is zero"));
        }
        let skip = if 0.0 < fstep {
            flimit < finit
        } else {
            finit < flimit
        };
        if skip {
            return Ok(true);
        }
        self.stack_set(ra, Value::Float(finit));
        self.stack_set(ra + 1, Value::Float(flimit));
        self.stack_set(ra + 2, Value::Float(fstep));
        self.stack_set(ra + 3, Value::Float(finit));
        Ok(false)
    }

    /// Integer limit of a loop, clipped to the integer range. `None` when
    /// the loop does not run at all.
    fn for_limit(&mut self, init: i64, limit: Value, step: i64) -> LuaResult<Option<i64>> {
        let mode = if step < 0 { F2I::Ceil } else { F2I::Floor };
        let lim = match limit {
            Value::Integer(i) => i,
            Value::Float(f) => match float_to_integer(f, mode) {
                Some(i) => i,
                None => {
                    if 0.0 < f {
                        if step < 0 {
                            return Ok(None);
                        }
                        i64::MAX
                    } else {
                        if step > 0 {
                            return Ok(None);
                        }
                        i64::MIN
                    }
                }
            },
            _ => return Err(self.for_error(limit, "limit")),
        };
        let skip = if step > 0 { init > lim } else { init < lim };
        Ok(if skip { None } else { Some(lim) })
    }

    /// One step of a float loop; `true` to jump back.
    pub(crate) fn float_for_loop(&mut self, ra: usize) -> bool {
        let step = self.stack_get(ra + 2).as_float().unwrap_or(0.0);
        let limit = self.stack_get(ra + 1).as_float().unwrap_or(0.0);
        let idx = self.stack_get(ra).as_float().unwrap_or(0.0) + step;
        let cont = if 0.0 < step { idx <= limit } else { limit <= idx };
        if cont {
            self.stack_set(ra, Value::Float(idx));
            self.stack_set(ra + 3, Value::Float(idx));
        }
        cont
    }

    // ========================================================================
    // Coercions for the embedding API
    // ========================================================================

    /// Number value, converting numeric strings.
    pub(crate) fn to_number_coerce(&self, v: &Value) -> Option<Value> {
        match *v {
            Value::Integer(_) | Value::Float(_) => Some(*v),
            Value::String(s) => str_to_number(self.heap.str_bytes(s)),
            _ => None,
        }
    }

    /// Integer value, converting numeric strings and integral floats.
    pub(crate) fn to_integer_coerce(&self, v: &Value) -> Option<i64> {
        self.to_number_coerce(v).and_then(|n| to_integer_exact(&n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arith_op_events_round_trip() {
        for op in [ArithOp::Add, ArithOp::IDiv, ArithOp::Shr, ArithOp::BNot] {
            assert_eq!(ArithOp::from_event(op.event()), Some(op));
        }
        assert_eq!(ArithOp::from_event(TagMethod::Index), None);
    }

    #[test]
    fn test_mixed_number_ordering() {
        assert!(less_than_numbers(Value::Integer(1), Value::Float(1.5)));
        assert!(!less_than_numbers(Value::Float(f64::NAN), Value::Integer(1)));
        assert!(less_equal_numbers(Value::Integer(i64::MAX), Value::Float(9.3e18)));
    }
}
