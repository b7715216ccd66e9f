//! Closures, upvalues and to-be-closed variables
//!
//! Open upvalues live in the heap and alias a stack slot of their thread;
//! the thread keeps them sorted by level so that every closure capturing a
//! slot shares one upvalue. To-be-closed variables are kept in a separate
//! per-thread list of stack levels.

use crate::state::State;
use core_types::{LClosureRef, LuaError, LuaResult, TagMethod, Value};

impl State {
    /// Instantiates nested prototype `index` of closure `parent` into slot
    /// `ra`, capturing locals of the frame based at `base`.
    pub(crate) fn push_closure(
        &mut self,
        parent: LClosureRef,
        index: usize,
        base: usize,
        ra: usize,
    ) {
        let child = self.heap.protos[self.heap.lclosures[parent].proto].children[index];
        let descs = self.heap.protos[child].proto.upvalues.clone();
        let th = self.heap.running;
        let mut upvals = Vec::with_capacity(descs.len());
        for desc in &descs {
            let u = if desc.in_stack {
                self.heap.find_upval(th, base + desc.index as usize)
            } else {
                self.heap.lclosures[parent].upvals[desc.index as usize]
            };
            upvals.push(u);
        }
        let cl = self.heap.new_lclosure(child, upvals);
        self.stack_set(ra, Value::LuaClosure(cl));
    }

    /// Marks the variable at `level` as to-be-closed. `false` and `nil`
    /// need no closing; anything else must have a `__close` metamethod.
    pub(crate) fn new_tbc(&mut self, level: usize) -> LuaResult<()> {
        let v = self.stack_get(level);
        if v.is_falsy() {
            return Ok(());
        }
        if self.heap.tm_by_obj(&v, TagMethod::Close).is_nil() {
            let ci = self.ci();
            let idx = level - self.thread().call_infos[ci].func;
            let name = self
                .find_local(ci, idx as i32)
                .map(|(name, _)| name)
                .unwrap_or_else(|| "?".to_string());
            return Err(self.run_error(format!("variable '{}' got a non-closable value", name)));
        }
        self.thread_mut().tbc_list.push(level);
        Ok(())
    }

    /// Closes every open upvalue and to-be-closed variable at or above
    /// `level`, newest first. `err` is the status being unwound: `None`
    /// closes with a `nil` error and keeps the stack top, `Some` places the
    /// error object after each variable before its method runs.
    pub(crate) fn close_level(
        &mut self,
        level: usize,
        err: Option<LuaError>,
        yieldable: bool,
    ) -> LuaResult<usize> {
        let th = self.heap.running;
        self.heap.close_upvals(th, level);
        while let Some(&tbc) = self.thread().tbc_list.last() {
            if tbc < level {
                break;
            }
            self.thread_mut().tbc_list.pop();
            let obj = self.stack_get(tbc);
            let errobj = match err {
                None => Value::Nil,
                Some(e) => {
                    self.set_error_obj(tbc + 1, &e);
                    self.stack_get(tbc + 1)
                }
            };
            self.call_close_method(obj, errobj, yieldable)?;
        }
        Ok(level)
    }

    fn call_close_method(&mut self, obj: Value, err: Value, yieldable: bool) -> LuaResult<()> {
        let top = self.top();
        let tm = self.heap.tm_by_obj(&obj, TagMethod::Close);
        let th = self.thread_mut();
        th.stack[top] = tm;
        th.stack[top + 1] = obj;
        th.stack[top + 2] = err;
        th.top = top + 3;
        if yieldable {
            self.call_value(top, 0)
        } else {
            self.call_no_yield(top, 0)
        }
    }
}
