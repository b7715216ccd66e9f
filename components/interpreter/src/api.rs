//! Embedding API
//!
//! The stack protocol the host uses to talk to the runtime. Values are
//! addressed by index: positive indices count from the base of the running
//! function's frame (1 is its first argument), negative ones from the top
//! (-1 is the last value pushed). [`REGISTRY_INDEX`] and
//! [`upvalue_index`] are pseudo-indices for the registry and for the
//! upvalues of the running native closure.
//!
//! Passing an index that designates no acceptable slot where a slot is
//! required is a host bug and panics.

use crate::debug::VarSite;
use crate::do_call::code_nresults;
use crate::state::{ContinuationFn, NativeFn, State};
use crate::vm::ArithOp;
use core_types::{
    number_to_string, str_to_number, GcObjectRef, LuaError, LuaResult, LuaType, Status,
    StrRef, TableRef, ThreadRef, Value,
};
use memory_manager::{CallStatus, MULTRET, RIDX_GLOBALS};
use std::any::Any;

/// Pseudo-index of the registry.
pub const REGISTRY_INDEX: i32 = -1_001_000;

/// Largest number of upvalues of a native closure.
pub const MAX_UPVALUES: usize = 255;

/// Pseudo-index of upvalue `i` (1-based) of the running native closure.
pub const fn upvalue_index(i: i32) -> i32 {
    REGISTRY_INDEX - i
}

/// Comparison performed by [`State::compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `==`
    Eq,
    /// `<`
    Lt,
    /// `<=`
    Le,
}

impl State {
    // ========================================================================
    // Index resolution
    // ========================================================================

    /// Stack slot of a stack index, if it designates a value.
    fn slot_of(&self, idx: i32) -> Option<usize> {
        let th = self.thread();
        let func = th.current_ci().func;
        if idx > 0 {
            let slot = func + idx as usize;
            (slot < th.top).then_some(slot)
        } else if idx > REGISTRY_INDEX && idx != 0 {
            let slot = th.top as i64 + idx as i64;
            (slot > func as i64).then_some(slot as usize)
        } else {
            None
        }
    }

    fn slot(&self, idx: i32) -> usize {
        match self.slot_of(idx) {
            Some(slot) => slot,
            None => panic!("invalid stack index {}", idx),
        }
    }

    /// Value at an acceptable index, `nil` when the index designates none.
    pub(crate) fn value_at(&self, idx: i32) -> Value {
        if idx == REGISTRY_INDEX {
            return Value::Table(self.heap.registry);
        }
        if idx < REGISTRY_INDEX {
            let n = (REGISTRY_INDEX - idx) as usize;
            let f = self.stack_get(self.thread().current_ci().func);
            return match f {
                Value::NativeClosure(cl) => self.heap.nclosures[cl]
                    .upvalues
                    .get(n - 1)
                    .copied()
                    .unwrap_or(Value::Nil),
                _ => Value::Nil,
            };
        }
        self.slot_of(idx).map_or(Value::Nil, |slot| self.stack_get(slot))
    }

    fn is_valid_index(&self, idx: i32) -> bool {
        if idx == REGISTRY_INDEX {
            return true;
        }
        if idx < REGISTRY_INDEX {
            let n = (REGISTRY_INDEX - idx) as usize;
            let f = self.stack_get(self.thread().current_ci().func);
            return matches!(f, Value::NativeClosure(cl) if n <= self.heap.nclosures[cl].upvalues.len());
        }
        self.slot_of(idx).is_some()
    }

    fn set_at(&mut self, idx: i32, v: Value) {
        if idx < REGISTRY_INDEX {
            let n = (REGISTRY_INDEX - idx) as usize;
            let f = self.stack_get(self.thread().current_ci().func);
            match f {
                Value::NativeClosure(cl) if n <= self.heap.nclosures[cl].upvalues.len() => {
                    self.heap.nclosures[cl].upvalues[n - 1] = v;
                    self.heap.barrier_back(GcObjectRef::NativeClosure(cl), v);
                }
                _ => panic!("invalid upvalue index {}", n),
            }
            return;
        }
        let slot = self.slot(idx);
        self.stack_set(slot, v);
    }

    /// Converts an acceptable index into an absolute one.
    pub fn abs_index(&self, idx: i32) -> i32 {
        if idx > 0 || idx <= REGISTRY_INDEX {
            idx
        } else {
            let th = self.thread();
            (th.top - th.current_ci().func) as i32 + idx
        }
    }

    // ========================================================================
    // Stack manipulation
    // ========================================================================

    /// Index of the top value, which is also the number of values in the
    /// running function's frame.
    pub fn get_top(&self) -> i32 {
        let th = self.thread();
        (th.top - (th.current_ci().func + 1)) as i32
    }

    /// Sets the top to `idx`, filling new slots with `nil`. Pending
    /// to-be-closed variables above the new top are closed.
    pub fn set_top(&mut self, idx: i32) -> LuaResult<()> {
        let (func, top) = {
            let th = self.thread();
            (th.current_ci().func, th.top)
        };
        let new_top = if idx >= 0 {
            let new_top = func + 1 + idx as usize;
            assert!(
                new_top <= self.thread().current_ci().top,
                "new top {} past the frame's limit",
                idx
            );
            for slot in top..new_top {
                self.stack_set(slot, Value::Nil);
            }
            new_top
        } else {
            let new_top = top as i64 + 1 + idx as i64;
            assert!(new_top > func as i64, "invalid new top {}", idx);
            new_top as usize
        };
        if new_top < top && self.thread().current_ci().nresults < MULTRET {
            self.close_level(new_top, None, false)?;
        }
        self.set_top_raw(new_top);
        Ok(())
    }

    /// Pops `n` values.
    pub fn pop(&mut self, n: i32) -> LuaResult<()> {
        self.set_top(-n - 1)
    }

    /// Pushes a copy of the value at `idx`.
    pub fn push_copy(&mut self, idx: i32) {
        let v = self.value_at(idx);
        self.push_value(v);
    }

    /// Rotates the values from `idx` to the top `n` positions towards the
    /// top (negative `n` rotates the other way).
    pub fn rotate(&mut self, idx: i32, n: i32) {
        let start = self.slot(idx);
        let end = self.top();
        let len = end - start;
        let n = n.rem_euclid(len.max(1) as i32) as usize;
        self.thread_mut().stack[start..end].rotate_right(n);
    }

    /// Copies the value at `from` into `to`.
    pub fn copy(&mut self, from: i32, to: i32) {
        let v = self.value_at(from);
        self.set_at(to, v);
    }

    /// Moves the top value into position `idx`, shifting values up.
    pub fn insert(&mut self, idx: i32) {
        self.rotate(idx, 1);
    }

    /// Removes the value at `idx`, shifting values down.
    pub fn remove(&mut self, idx: i32) -> LuaResult<()> {
        self.rotate(idx, -1);
        self.pop(1)
    }

    /// Pops the top value into position `idx`.
    pub fn replace(&mut self, idx: i32) -> LuaResult<()> {
        self.copy(-1, idx);
        self.pop(1)
    }

    /// Ensures room for `n` more values. Returns `false` when the stack
    /// cannot grow that much.
    pub fn check_stack_room(&mut self, n: usize) -> bool {
        let (free, top) = {
            let th = self.thread();
            (th.stack_size() - th.top, th.top)
        };
        let ok = if free > n {
            true
        } else {
            matches!(self.grow_stack(n, false), Ok(true))
        };
        if ok {
            let th = self.thread_mut();
            let ci = th.current_ci_mut();
            if ci.top < top + n {
                ci.top = top + n;
            }
        }
        ok
    }

    // ========================================================================
    // Push
    // ========================================================================

    /// Pushes `nil`.
    pub fn push_nil(&mut self) {
        self.push_value(Value::Nil);
    }

    /// Pushes a boolean.
    pub fn push_boolean(&mut self, b: bool) {
        self.push_value(Value::Boolean(b));
    }

    /// Pushes an integer.
    pub fn push_integer(&mut self, n: i64) {
        self.push_value(Value::Integer(n));
    }

    /// Pushes a float.
    pub fn push_number(&mut self, n: f64) {
        self.push_value(Value::Float(n));
    }

    /// Pushes a string.
    pub fn push_string(&mut self, s: &str) -> LuaResult<StrRef> {
        self.push_bytes(s.as_bytes())
    }

    /// Pushes a byte string.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> LuaResult<StrRef> {
        let s = self.heap.new_string(bytes);
        self.push_value(Value::String(s));
        self.check_gc()?;
        Ok(s)
    }

    /// Pushes an opaque host pointer-sized value.
    pub fn push_light_userdata(&mut self, p: usize) {
        self.push_value(Value::LightUserdata(p));
    }

    /// Pushes a native function without upvalues.
    pub fn push_native(&mut self, f: NativeFn) {
        let id = self.register_native(f);
        self.push_value(Value::LightNative(id));
    }

    /// Pops `n` values and pushes a native closure holding them as upvalues.
    pub fn push_native_closure(&mut self, f: NativeFn, n: usize) -> LuaResult<()> {
        if n == 0 {
            self.push_native(f);
            return Ok(());
        }
        assert!(n <= MAX_UPVALUES, "upvalue index too large");
        let id = self.register_native(f);
        let top = self.top();
        let upvalues = self.thread().stack[top - n..top].to_vec();
        let cl = self.heap.new_nclosure(id, upvalues);
        self.set_top_raw(top - n);
        self.push_value(Value::NativeClosure(cl));
        self.check_gc()
    }

    /// Pushes the running thread; returns whether it is the main thread.
    pub fn push_thread(&mut self) -> bool {
        let th = self.heap.running;
        self.push_value(Value::Thread(th));
        self.is_main_thread()
    }

    /// Pushes the globals table.
    pub fn push_global_table(&mut self) {
        let g = self.heap.table_get_int(self.heap.registry, RIDX_GLOBALS);
        self.push_value(g);
    }

    /// Pushes a new empty table.
    pub fn new_table(&mut self) -> LuaResult<TableRef> {
        self.create_table(0, 0)
    }

    /// Pushes a new table with room preallocated for `narray` sequence
    /// elements and `nhash` other entries.
    pub fn create_table(&mut self, narray: usize, nhash: usize) -> LuaResult<TableRef> {
        let t = self.heap.new_table_sized(narray, nhash);
        self.push_value(Value::Table(t));
        self.check_gc()?;
        Ok(t)
    }

    /// Pushes a new full userdata wrapping `data`, with `nuv` user values.
    pub fn new_userdata(&mut self, data: Box<dyn Any>, nuv: usize) -> LuaResult<()> {
        let u = self.heap.new_userdata(data, nuv);
        self.push_value(Value::Userdata(u));
        self.check_gc()
    }

    // ========================================================================
    // Query
    // ========================================================================

    /// Type of the value at `idx`; `None` for an index with no value.
    pub fn type_of(&self, idx: i32) -> Option<LuaType> {
        if self.is_valid_index(idx) {
            Some(self.value_at(idx).lua_type())
        } else {
            None
        }
    }

    /// Type name of the value at `idx` (`"no value"` when there is none).
    pub fn type_name_at(&self, idx: i32) -> &'static str {
        self.type_of(idx)
            .map_or(core_types::NO_VALUE_NAME, LuaType::name)
    }

    /// Whether `idx` holds no value.
    pub fn is_none(&self, idx: i32) -> bool {
        self.type_of(idx).is_none()
    }

    /// Whether `idx` holds `nil`.
    pub fn is_nil(&self, idx: i32) -> bool {
        self.type_of(idx) == Some(LuaType::Nil)
    }

    /// Whether `idx` holds `nil` or no value.
    pub fn is_none_or_nil(&self, idx: i32) -> bool {
        matches!(self.type_of(idx), None | Some(LuaType::Nil))
    }

    /// Whether `idx` holds a boolean.
    pub fn is_boolean(&self, idx: i32) -> bool {
        self.type_of(idx) == Some(LuaType::Boolean)
    }

    /// Whether `idx` holds a number or a string convertible to one.
    pub fn is_number(&self, idx: i32) -> bool {
        self.to_number_coerce(&self.value_at(idx)).is_some()
    }

    /// Whether `idx` holds an integer.
    pub fn is_integer(&self, idx: i32) -> bool {
        matches!(self.value_at(idx), Value::Integer(_))
    }

    /// Whether `idx` holds a string or a number.
    pub fn is_string(&self, idx: i32) -> bool {
        matches!(self.value_at(idx), Value::String(_)) || self.value_at(idx).is_number()
    }

    /// Whether `idx` holds a table.
    pub fn is_table(&self, idx: i32) -> bool {
        matches!(self.value_at(idx), Value::Table(_))
    }

    /// Whether `idx` holds a function.
    pub fn is_function(&self, idx: i32) -> bool {
        self.value_at(idx).is_function()
    }

    /// Whether `idx` holds a native function.
    pub fn is_native_function(&self, idx: i32) -> bool {
        matches!(
            self.value_at(idx),
            Value::LightNative(_) | Value::NativeClosure(_)
        )
    }

    /// Whether `idx` holds a full or light userdata.
    pub fn is_userdata(&self, idx: i32) -> bool {
        matches!(
            self.value_at(idx),
            Value::Userdata(_) | Value::LightUserdata(_)
        )
    }

    /// Whether `idx` holds a thread.
    pub fn is_thread(&self, idx: i32) -> bool {
        matches!(self.value_at(idx), Value::Thread(_))
    }

    // ========================================================================
    // Get values
    // ========================================================================

    /// Truthiness of the value at `idx`.
    pub fn to_boolean(&self, idx: i32) -> bool {
        self.value_at(idx).is_truthy()
    }

    /// Integer value at `idx`, converting integral floats and numeric
    /// strings.
    pub fn to_integer(&self, idx: i32) -> Option<i64> {
        self.to_integer_coerce(&self.value_at(idx))
    }

    /// Float value at `idx`, converting numeric strings.
    pub fn to_number(&self, idx: i32) -> Option<f64> {
        match self.to_number_coerce(&self.value_at(idx))? {
            Value::Integer(i) => Some(i as f64),
            Value::Float(f) => Some(f),
            _ => None,
        }
    }

    /// Bytes of the string at `idx`. A number is converted to a string in
    /// place. `None` for other values.
    pub fn to_bytes(&mut self, idx: i32) -> Option<Vec<u8>> {
        let v = self.value_at(idx);
        let s = match v {
            Value::String(s) => s,
            Value::Integer(_) | Value::Float(_) => {
                let text = number_to_string(&v)?;
                let s = self.heap.new_str(&text);
                self.set_at(idx, Value::String(s));
                s
            }
            _ => return None,
        };
        Some(self.heap.str_bytes(s).to_vec())
    }

    /// Like [`State::to_bytes`], decoding the bytes as UTF-8 lossily.
    pub fn to_str(&mut self, idx: i32) -> Option<String> {
        self.to_bytes(idx)
            .map(|b| String::from_utf8_lossy(&b).into_owned())
    }

    /// Thread at `idx`.
    pub fn to_thread(&self, idx: i32) -> Option<ThreadRef> {
        self.value_at(idx).as_thread()
    }

    /// Payload of a light userdata at `idx`.
    pub fn to_light_userdata(&self, idx: i32) -> Option<usize> {
        match self.value_at(idx) {
            Value::LightUserdata(p) => Some(p),
            _ => None,
        }
    }

    /// Payload of the full userdata at `idx`, if it has type `T`.
    pub fn to_userdata<T: Any>(&self, idx: i32) -> Option<&T> {
        match self.value_at(idx) {
            Value::Userdata(u) => self.heap.userdata[u].data.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Payload of the full userdata at `idx`, mutably.
    pub fn to_userdata_mut<T: Any>(&mut self, idx: i32) -> Option<&mut T> {
        match self.value_at(idx) {
            Value::Userdata(u) => self.heap.userdata[u].data.downcast_mut::<T>(),
            _ => None,
        }
    }

    /// Raw length: bytes of a string, border of a table, 0 otherwise.
    pub fn raw_len(&self, idx: i32) -> u64 {
        match self.value_at(idx) {
            Value::String(s) => self.heap.strings[s].len() as u64,
            Value::Table(t) => self.heap.table_len(t),
            _ => 0,
        }
    }

    /// Converts a numeric string and pushes the number. Returns the
    /// string's length plus one on success.
    pub fn string_to_number(&mut self, s: &str) -> Option<usize> {
        let v = str_to_number(s.as_bytes())?;
        self.push_value(v);
        Some(s.len() + 1)
    }

    // ========================================================================
    // Tables
    // ========================================================================

    fn push_key_str(&mut self, k: &str) -> Value {
        let s = self.heap.new_str(k);
        let v = Value::String(s);
        self.push_value(v);
        v
    }

    /// Replaces the key on top with `t[key]` for the table at `idx`,
    /// honouring `__index`. Returns the type of the value.
    pub fn get_table(&mut self, idx: i32) -> LuaResult<LuaType> {
        let t = self.value_at(idx);
        let top = self.top();
        let key = self.stack_get(top - 1);
        let v = self.get_index(t, key, VarSite::None)?;
        self.stack_set(top - 1, v);
        Ok(v.lua_type())
    }

    /// Pushes `t[k]` for the table at `idx`.
    pub fn get_field(&mut self, idx: i32, k: &str) -> LuaResult<LuaType> {
        let t = self.value_at(idx);
        self.push_key_str(k);
        let top = self.top();
        let key = self.stack_get(top - 1);
        let v = self.get_index(t, key, VarSite::None)?;
        self.stack_set(top - 1, v);
        Ok(v.lua_type())
    }

    /// Pushes `t[n]` for the table at `idx`.
    pub fn get_i(&mut self, idx: i32, n: i64) -> LuaResult<LuaType> {
        let t = self.value_at(idx);
        let v = self.get_index(t, Value::Integer(n), VarSite::None)?;
        self.push_value(v);
        Ok(v.lua_type())
    }

    /// Pushes the global `name`.
    pub fn get_global(&mut self, name: &str) -> LuaResult<LuaType> {
        self.push_global_table();
        let ty = self.get_field(-1, name)?;
        self.remove(-2)?;
        Ok(ty)
    }

    /// Like [`State::get_table`] without metamethods.
    pub fn raw_get(&mut self, idx: i32) -> LuaType {
        let t = self.raw_table_at(idx);
        let top = self.top();
        let key = self.stack_get(top - 1);
        let v = self.heap.table_get(t, &key);
        self.stack_set(top - 1, v);
        v.lua_type()
    }

    /// Pushes `t[n]` without metamethods.
    pub fn raw_get_i(&mut self, idx: i32, n: i64) -> LuaType {
        let t = self.raw_table_at(idx);
        let v = self.heap.table_get_int(t, n);
        self.push_value(v);
        v.lua_type()
    }

    fn raw_table_at(&self, idx: i32) -> TableRef {
        match self.value_at(idx) {
            Value::Table(t) => t,
            v => panic!("table expected at index {}, got {}", idx, v.type_name()),
        }
    }

    /// `t[key] = value` for the table at `idx`, with the key and the value
    /// on top of the stack (value topmost). Pops both.
    pub fn set_table(&mut self, idx: i32) -> LuaResult<()> {
        let t = self.value_at(idx);
        let top = self.top();
        let (key, val) = (self.stack_get(top - 2), self.stack_get(top - 1));
        self.set_index(t, key, val, VarSite::None)?;
        self.set_top_raw(top - 2);
        Ok(())
    }

    /// `t[k] = v` where `v` is popped from the stack.
    pub fn set_field(&mut self, idx: i32, k: &str) -> LuaResult<()> {
        let t = self.value_at(idx);
        let key = self.push_key_str(k);
        let top = self.top();
        let val = self.stack_get(top - 2);
        self.set_index(t, key, val, VarSite::None)?;
        self.set_top_raw(top - 2);
        Ok(())
    }

    /// `t[n] = v` where `v` is popped from the stack.
    pub fn set_i(&mut self, idx: i32, n: i64) -> LuaResult<()> {
        let t = self.value_at(idx);
        let top = self.top();
        let val = self.stack_get(top - 1);
        self.set_index(t, Value::Integer(n), val, VarSite::None)?;
        self.set_top_raw(top - 1);
        Ok(())
    }

    /// Pops a value into the global `name`.
    pub fn set_global(&mut self, name: &str) -> LuaResult<()> {
        let g = Value::Table(self.heap.globals());
        let key = self.push_key_str(name);
        let top = self.top();
        let val = self.stack_get(top - 2);
        self.set_index(g, key, val, VarSite::None)?;
        self.set_top_raw(top - 2);
        Ok(())
    }

    /// Like [`State::set_table`] without metamethods.
    pub fn raw_set(&mut self, idx: i32) -> LuaResult<()> {
        let t = self.raw_table_at(idx);
        let top = self.top();
        let (key, val) = (self.stack_get(top - 2), self.stack_get(top - 1));
        self.raw_set_checked(t, key, val)?;
        self.set_top_raw(top - 2);
        Ok(())
    }

    /// Pops a value into `t[n]` without metamethods.
    pub fn raw_set_i(&mut self, idx: i32, n: i64) {
        let t = self.raw_table_at(idx);
        let v = self.pop_value();
        self.heap.table_set_int(t, n, v);
    }

    /// Pushes the next key/value pair after the key on top of the stack
    /// (popped); returns `false`, pushing nothing, at the end.
    pub fn next(&mut self, idx: i32) -> LuaResult<bool> {
        let t = self.raw_table_at(idx);
        let key = self.pop_value();
        match self.heap.table_next(t, &key) {
            Ok(Some((k, v))) => {
                self.push_value(k);
                self.push_value(v);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(self.table_error(e)),
        }
    }

    // ========================================================================
    // Metatables and user values
    // ========================================================================

    /// Pushes the metatable of the value at `idx`, if it has one.
    pub fn get_metatable(&mut self, idx: i32) -> bool {
        let v = self.value_at(idx);
        match self.heap.metatable_of(&v) {
            Some(mt) => {
                self.push_value(Value::Table(mt));
                true
            }
            None => false,
        }
    }

    /// Pops a table (or `nil`) and makes it the metatable of the value at
    /// `idx`. For values other than tables and full userdata the metatable
    /// is shared by the whole type.
    pub fn set_metatable(&mut self, idx: i32) {
        let obj = self.value_at(idx);
        let mt = match self.pop_value() {
            Value::Table(mt) => Some(mt),
            Value::Nil => None,
            v => panic!("table expected as metatable, got {}", v.type_name()),
        };
        match obj {
            Value::Table(t) => self.heap.set_table_metatable(t, mt),
            Value::Userdata(u) => self.heap.set_userdata_metatable(u, mt),
            v => self.heap.set_type_metatable(v.lua_type(), mt),
        }
    }

    /// Pushes user value `n` (1-based) of the full userdata at `idx`;
    /// `None` (with `nil` pushed) when it has no such value.
    pub fn get_i_uservalue(&mut self, idx: i32, n: usize) -> Option<LuaType> {
        let v = match self.value_at(idx) {
            Value::Userdata(u) => n
                .checked_sub(1)
                .and_then(|i| self.heap.userdata[u].user_values.get(i).copied()),
            _ => None,
        };
        self.push_value(v.unwrap_or(Value::Nil));
        v.map(|v| v.lua_type())
    }

    /// Pops a value into user value `n` of the full userdata at `idx`.
    /// Returns `false` when the userdata has no such value.
    pub fn set_i_uservalue(&mut self, idx: i32, n: usize) -> bool {
        let u = self.value_at(idx);
        let v = self.pop_value();
        match (u, n.checked_sub(1)) {
            (Value::Userdata(u), Some(i)) => {
                let ok = self.heap.set_user_value(u, i, v);
                if ok {
                    self.heap.barrier_back(GcObjectRef::Userdata(u), v);
                }
                ok
            }
            _ => false,
        }
    }

    // ========================================================================
    // Operators
    // ========================================================================

    /// Applies `op` to the two values on top of the stack (one for the
    /// unary operators), replacing them with the result.
    pub fn arith(&mut self, op: ArithOp) -> LuaResult<()> {
        if matches!(op, ArithOp::Unm | ArithOp::BNot) {
            let v = self.stack_get(self.top() - 1);
            self.push_value(v);
        }
        let top = self.top();
        let (p1, p2) = (self.stack_get(top - 2), self.stack_get(top - 1));
        let v = self.arith_values(op, p1, p2, (VarSite::None, VarSite::None))?;
        self.stack_set(top - 2, v);
        self.set_top_raw(top - 1);
        Ok(())
    }

    /// Compares the values at two indices, with metamethods. An index
    /// without a value compares as `false`.
    pub fn compare(&mut self, idx1: i32, idx2: i32, op: CompareOp) -> LuaResult<bool> {
        if !self.is_valid_index(idx1) || !self.is_valid_index(idx2) {
            return Ok(false);
        }
        let (a, b) = (self.value_at(idx1), self.value_at(idx2));
        match op {
            CompareOp::Eq => self.equal_values(a, b),
            CompareOp::Lt => self.less_than(a, b),
            CompareOp::Le => self.less_equal(a, b),
        }
    }

    /// Primitive equality of the values at two indices.
    pub fn raw_equal(&self, idx1: i32, idx2: i32) -> bool {
        self.is_valid_index(idx1)
            && self.is_valid_index(idx2)
            && self
                .heap
                .raw_equal(&self.value_at(idx1), &self.value_at(idx2))
    }

    /// Concatenates the `n` values on top of the stack, replacing them with
    /// the result (the empty string when `n` is 0).
    pub fn concat_values(&mut self, n: usize) -> LuaResult<()> {
        if n == 0 {
            self.push_bytes(b"")?;
            return Ok(());
        }
        if n > 1 {
            self.concat(n)?;
        }
        self.check_gc()
    }

    /// Pushes the length of the value at `idx`, honouring `__len`.
    pub fn len(&mut self, idx: i32) -> LuaResult<()> {
        let v = self.value_at(idx);
        let n = self.obj_len(v, VarSite::None)?;
        self.push_value(n);
        Ok(())
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Calls the function below the `nargs` values on top of the stack,
    /// replacing all of them with `nresults` results (all of them for
    /// `MULTRET`).
    ///
    /// An error with no protected call to catch it resets the running
    /// thread: every pending to-be-closed variable is closed, the whole
    /// stack is discarded except for the error object, left alone at index
    /// 1, and the panic function (see [`State::set_panic`]) runs before the
    /// error is returned.
    pub fn call(&mut self, nargs: usize, nresults: i32) -> LuaResult<()> {
        self.call_k(nargs, nresults, 0, None)
    }

    /// [`State::call`] from a native function that may be interrupted by a
    /// yield inside the callee: after resumption `k` is called with `ctx`
    /// in place of the rest of the calling function.
    pub fn call_k(
        &mut self,
        nargs: usize,
        nresults: i32,
        ctx: isize,
        k: Option<ContinuationFn>,
    ) -> LuaResult<()> {
        let func = self.top() - nargs - 1;
        let result = match k {
            Some(k) if self.is_yieldable() => {
                let id = self.register_continuation(k);
                let ci = self.ci();
                let c = &mut self.thread_mut().call_infos[ci];
                c.k = Some(id);
                c.ctx = ctx;
                self.call_value(func, nresults)
            }
            _ => self.call_no_yield(func, nresults),
        };
        match result {
            Ok(()) => {
                self.adjust_results(nresults);
                Ok(())
            }
            Err(e) => Err(self.escape(e)),
        }
    }

    /// Last stop of an error on its way to the host: with no recovery point
    /// left, the thread is reset and the panic hook runs before the error is
    /// returned.
    fn escape(&mut self, e: LuaError) -> LuaError {
        if e.is_yield() || self.recover_depth > 0 {
            return e;
        }
        let th = self.heap.running;
        let top = self.top();
        self.set_error_obj(top, &e);
        let status = self.reset_thread(th, e.status);
        let value = self.stack_get(self.top() - 1);
        let e = LuaError::new(status, value);
        self.unprotected_error(&e);
        e
    }

    fn errfunc_slot(&self, msgh: i32) -> usize {
        if msgh == 0 {
            0
        } else {
            self.slot(msgh)
        }
    }

    /// Calls the function below the `nargs` values on top of the stack in
    /// protected mode. On error the function and its arguments are replaced
    /// by the error object, after message handler `msgh` (a stack index, 0
    /// for none) had the chance to rewrite it.
    pub fn pcall(&mut self, nargs: usize, nresults: i32, msgh: i32) -> Status {
        let func = self.top() - nargs - 1;
        let errfunc = self.errfunc_slot(msgh);
        let status = self.pcall_raw(func, errfunc, |s| s.call_no_yield(func, nresults));
        if status == Status::Ok {
            self.adjust_results(nresults);
        }
        status
    }

    /// [`State::pcall`] that lets the callee yield. The only error returned
    /// is the yield itself; when the coroutine is resumed, `k` runs with
    /// the final status in place of the rest of the calling function.
    pub fn pcall_k(
        &mut self,
        nargs: usize,
        nresults: i32,
        msgh: i32,
        ctx: isize,
        k: Option<ContinuationFn>,
    ) -> LuaResult<Status> {
        let k = match k {
            Some(k) if self.is_yieldable() => k,
            _ => return Ok(self.pcall(nargs, nresults, msgh)),
        };
        let func = self.top() - nargs - 1;
        let errfunc = self.errfunc_slot(msgh);
        let id = self.register_continuation(k);
        let ci = self.ci();
        {
            let th = self.thread_mut();
            let old_errfunc = th.err_func;
            let allow_hook = th.allow_hook;
            let c = &mut th.call_infos[ci];
            c.k = Some(id);
            c.ctx = ctx;
            c.func_idx = func;
            c.old_errfunc = old_errfunc;
            c.callstatus.insert(CallStatus::YPCALL);
            if allow_hook {
                c.callstatus.insert(CallStatus::OAH);
            } else {
                c.callstatus.remove(CallStatus::OAH);
            }
            th.err_func = errfunc;
        }
        let result = self.run_protected(|s| s.call_value(func, nresults));
        let status = match result {
            Err(e) if e.is_yield() => return Err(e),
            Ok(()) => {
                self.adjust_results(nresults);
                Status::Ok
            }
            Err(e) => {
                let th = self.thread_mut();
                th.ci = ci;
                th.allow_hook = th.call_infos[ci].callstatus.contains(CallStatus::OAH);
                let e = self.close_protected(func, e);
                self.set_error_obj(func, &e);
                self.shrink_stack();
                e.status
            }
        };
        let th = self.thread_mut();
        th.call_infos[ci].callstatus.remove(CallStatus::YPCALL);
        th.err_func = th.call_infos[ci].old_errfunc;
        Ok(status)
    }

    /// Raises the value on top of the stack as an error. A native function
    /// returns the result: `return Err(state.error())`.
    pub fn error(&mut self) -> LuaError {
        let v = self.pop_value();
        if let Value::String(s) = v {
            if s == self.heap.memory_error_message {
                return self.memory_error();
            }
        }
        self.throw(v)
    }

    // ========================================================================
    // To-be-closed variables
    // ========================================================================

    /// Marks the slot at `idx` as a to-be-closed variable of the running
    /// native function. Its `__close` metamethod runs when the slot is
    /// popped by [`State::set_top`] or the function returns.
    pub fn to_close(&mut self, idx: i32) -> LuaResult<()> {
        let slot = self.slot(idx);
        self.new_tbc(slot)?;
        let ci = self.ci();
        let c = &mut self.thread_mut().call_infos[ci];
        if c.nresults >= MULTRET {
            c.nresults = code_nresults(c.nresults);
        }
        Ok(())
    }

    /// Closes the to-be-closed slot at `idx` and sets it to `nil`.
    pub fn close_slot(&mut self, idx: i32) -> LuaResult<()> {
        let slot = self.slot(idx);
        self.close_level(slot, None, false)?;
        self.stack_set(slot, Value::Nil);
        Ok(())
    }
}
