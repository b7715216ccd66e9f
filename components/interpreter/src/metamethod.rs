//! Metamethod dispatch
//!
//! Calls into `__add`, `__lt`, `__concat` and the other events, and the
//! errors raised when an operand has no suitable metamethod.

use crate::debug::VarSite;
use crate::state::State;
use core_types::{LuaResult, TagMethod, Value};

impl State {
    /// Calls metamethod `f` with two arguments and returns its first result.
    /// The call may yield only when issued from Lua code.
    pub(crate) fn call_tm_res(&mut self, f: Value, p1: Value, p2: Value) -> LuaResult<Value> {
        let func = self.top();
        {
            let th = self.thread_mut();
            th.stack[func] = f;
            th.stack[func + 1] = p1;
            th.stack[func + 2] = p2;
            th.top = func + 3;
        }
        if self.running_lua_code() {
            self.call_value(func, 1)?;
        } else {
            self.call_no_yield(func, 1)?;
        }
        Ok(self.pop_value())
    }

    /// Calls metamethod `f` with three arguments, discarding results.
    pub(crate) fn call_tm(&mut self, f: Value, p1: Value, p2: Value, p3: Value) -> LuaResult<()> {
        let func = self.top();
        {
            let th = self.thread_mut();
            th.stack[func] = f;
            th.stack[func + 1] = p1;
            th.stack[func + 2] = p2;
            th.stack[func + 3] = p3;
            th.top = func + 4;
        }
        if self.running_lua_code() {
            self.call_value(func, 0)
        } else {
            self.call_no_yield(func, 0)
        }
    }

    /// Whether the current frame runs Lua bytecode (not a hook).
    pub(crate) fn running_lua_code(&self) -> bool {
        let ci = self.thread().current_ci();
        ci.is_lua() && !ci.callstatus.contains(memory_manager::CallStatus::HOOKED)
    }

    fn call_bin_tm(&mut self, p1: Value, p2: Value, event: TagMethod) -> LuaResult<Option<Value>> {
        let mut tm = self.heap.tm_by_obj(&p1, event);
        if tm.is_nil() {
            tm = self.heap.tm_by_obj(&p2, event);
        }
        if tm.is_nil() {
            return Ok(None);
        }
        self.call_tm_res(tm, p1, p2).map(Some)
    }

    /// Binary arithmetic or bitwise event, raising the matching error when
    /// neither operand has the metamethod.
    pub(crate) fn try_bin_tm(
        &mut self,
        p1: Value,
        p2: Value,
        sites: (VarSite, VarSite),
        event: TagMethod,
    ) -> LuaResult<Value> {
        if let Some(v) = self.call_bin_tm(p1, p2, event)? {
            return Ok(v);
        }
        let (s1, s2) = sites;
        if event.is_bitwise() {
            if p1.is_number() && p2.is_number() {
                return Err(self.to_int_error(p1, p2, s1, s2));
            }
            return Err(self.op_int_error(p1, p2, s1, s2, "perform bitwise operation on"));
        }
        Err(self.op_int_error(p1, p2, s1, s2, "perform arithmetic on"))
    }

    /// Like [`State::try_bin_tm`] with the operands possibly swapped back to
    /// source order (`flip`) after an immediate or constant operand.
    pub(crate) fn try_bin_assoc_tm(
        &mut self,
        p1: Value,
        p2: Value,
        sites: (VarSite, VarSite),
        flip: bool,
        event: TagMethod,
    ) -> LuaResult<Value> {
        if flip {
            self.try_bin_tm(p2, p1, (sites.1, sites.0), event)
        } else {
            self.try_bin_tm(p1, p2, sites, event)
        }
    }

    /// `__concat` for the two values on top of the stack.
    pub(crate) fn try_concat_tm(&mut self) -> LuaResult<Value> {
        let top = self.top();
        let (p1, p2) = (self.stack_get(top - 2), self.stack_get(top - 1));
        match self.call_bin_tm(p1, p2, TagMethod::Concat)? {
            Some(v) => Ok(v),
            None => Err(self.concat_error(p1, p2, VarSite::Stack(top - 2), VarSite::Stack(top - 1))),
        }
    }

    /// `__lt`/`__le` comparison.
    pub(crate) fn call_order_tm(&mut self, p1: Value, p2: Value, event: TagMethod) -> LuaResult<bool> {
        match self.call_bin_tm(p1, p2, event)? {
            Some(v) => Ok(v.is_truthy()),
            None => Err(self.order_error(p1, p2)),
        }
    }

    /// Comparison against an immediate operand `v2`, possibly swapped.
    pub(crate) fn call_order_i_tm(
        &mut self,
        p1: Value,
        v2: i64,
        flip: bool,
        is_float: bool,
        event: TagMethod,
    ) -> LuaResult<bool> {
        let aux = if is_float {
            Value::Float(v2 as f64)
        } else {
            Value::Integer(v2)
        };
        if flip {
            self.call_order_tm(aux, p1, event)
        } else {
            self.call_order_tm(p1, aux, event)
        }
    }

    /// Type name used in messages: `__name` from the metatable of a table
    /// or full userdata when it is a string, the basic type name otherwise.
    pub fn obj_type_name(&mut self, v: &Value) -> String {
        if matches!(v, Value::Table(_) | Value::Userdata(_)) {
            if let Some(mt) = self.heap.metatable_of(v) {
                let key = self.heap.new_str("__name");
                if let Value::String(s) = self.heap.table_get_str(mt, key) {
                    return self.heap.strings[s].to_str_lossy().into_owned();
                }
            }
        }
        v.type_name().to_string()
    }
}
