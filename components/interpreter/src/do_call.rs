//! Calls, returns and protected execution
//!
//! Stack growth, activation records, the call/return protocol shared by
//! native and Lua functions, and the recovery points that turn a raised
//! error back into a status.
//!
//! Stack positions are plain indices into the running thread's stack, so
//! growing the buffer never invalidates a saved position.

use crate::debug::{HookEvent, MASK_CALL, MASK_RET};
use crate::state::State;
use core_types::{LuaError, LuaResult, NativeFnId, Status, TagMethod, Value};
use memory_manager::{CallInfo, CallStatus, MIN_STACK, MULTRET};
use tracing::trace;

/// Slots granted beyond the configured maximum while a stack overflow error
/// is being handled.
pub const ERROR_STACK_EXTRA: usize = 200;

/// Encodes a result count for a frame with pending to-be-closed variables.
#[inline]
pub(crate) fn code_nresults(n: i32) -> i32 {
    -n - 3
}

/// Inverse of [`code_nresults`].
#[inline]
pub(crate) fn decode_nresults(n: i32) -> i32 {
    -n - 3
}

impl State {
    // ========================================================================
    // Stack size
    // ========================================================================

    /// Ensures `n` free slots above the top, raising "stack overflow" when
    /// the thread would exceed its limit.
    pub(crate) fn check_stack(&mut self, n: usize) -> LuaResult<()> {
        let th = self.thread();
        if th.stack_size().saturating_sub(th.top) <= n {
            self.grow_stack(n, true)?;
        }
        Ok(())
    }

    /// Like [`State::check_stack`], giving the collector a chance to run
    /// before the buffer grows.
    pub(crate) fn check_stack_gc(&mut self, n: usize) -> LuaResult<()> {
        let th = self.thread();
        if th.stack_size().saturating_sub(th.top) <= n {
            self.check_gc()?;
            self.grow_stack(n, true)?;
        }
        Ok(())
    }

    /// Grows the running thread's stack to fit `n` more slots. Returns
    /// `false` (or raises, with `raise`) when the limit is reached.
    pub(crate) fn grow_stack(&mut self, n: usize, raise: bool) -> LuaResult<bool> {
        let th = self.heap.running;
        let size = self.heap.threads[th].stack_size();
        let max = self.heap.max_stack;
        if size > max {
            // already using the slots reserved for the overflow error
            if raise {
                return Err(self.error_in_error_handling());
            }
            return Ok(false);
        }
        if n < max {
            let needed = self.heap.threads[th].top + n;
            let new_size = (2 * size).min(max).max(needed);
            if new_size <= max {
                trace!(from = size, to = new_size, "stack grown");
                self.heap.resize_stack(th, new_size);
                return Ok(true);
            }
        }
        self.heap.resize_stack(th, max + ERROR_STACK_EXTRA);
        if raise {
            return Err(self.run_error("stack overflow"));
        }
        Ok(false)
    }

    /// Gives back stack space left over from a deep recursion or an
    /// overflow.
    pub(crate) fn shrink_stack(&mut self) {
        let th = self.heap.running;
        self.heap.shrink_stack(th);
    }

    /// Raises "C stack overflow" when native calls nest too deeply, and
    /// "error in error handling" when that error itself keeps recursing.
    pub(crate) fn check_cstack(&mut self) -> LuaResult<()> {
        let n = self.thread().n_ccalls;
        let max = self.config.max_native_calls;
        if n == max {
            Err(self.run_error("C stack overflow"))
        } else if n >= max / 10 * 11 {
            Err(self.error_in_error_handling())
        } else {
            Ok(())
        }
    }

    // ========================================================================
    // Call protocol
    // ========================================================================

    /// Replaces a non-callable value at `func` by its `__call` metamethod,
    /// shifting the arguments up by one.
    pub(crate) fn try_func_tm(&mut self, func: usize) -> LuaResult<usize> {
        self.check_stack_gc(1)?;
        let f = self.stack_get(func);
        let tm = self.heap.tm_by_obj(&f, TagMethod::Call);
        if tm.is_nil() {
            return Err(self.call_error(func));
        }
        let th = self.thread_mut();
        let top = th.top;
        th.stack.copy_within(func..top, func + 1);
        th.top += 1;
        th.stack[func] = tm;
        Ok(func)
    }

    fn native_of(&self, v: &Value) -> Option<NativeFnId> {
        match *v {
            Value::LightNative(id) => Some(id),
            Value::NativeClosure(c) => Some(self.heap.nclosures[c].f),
            _ => None,
        }
    }

    /// Starts a call to the function at `func` with its arguments above it.
    /// A native function runs to completion and `None` is returned; for a
    /// Lua function the new frame is returned, ready for [`State::execute`].
    pub(crate) fn precall(&mut self, mut func: usize, nresults: i32) -> LuaResult<Option<usize>> {
        loop {
            let f = self.stack_get(func);
            if let Some(id) = self.native_of(&f) {
                self.precall_native(func, nresults, id)?;
                return Ok(None);
            }
            if let Value::LuaClosure(cl) = f {
                let (nparams, fsize) = {
                    let p = self.heap.closure_proto(cl);
                    (p.num_params as usize, p.max_stack_size as usize)
                };
                let narg = self.top() - func - 1;
                self.check_stack_gc(fsize)?;
                let th = self.thread_mut();
                let ci = th.next_ci();
                th.call_infos[ci] = CallInfo {
                    func,
                    top: func + 1 + fsize,
                    nresults,
                    ..CallInfo::default()
                };
                for _ in narg..nparams {
                    th.push(Value::Nil);
                }
                return Ok(Some(ci));
            }
            func = self.try_func_tm(func)?;
        }
    }

    /// Tail call: the function at `func` with `narg1 - 1` arguments replaces
    /// frame `ci`. `delta` undoes the shift of a vararg frame. Returns the
    /// number of results when the callee was native.
    pub(crate) fn pretailcall(
        &mut self,
        ci: usize,
        mut func: usize,
        mut narg1: usize,
        delta: usize,
    ) -> LuaResult<Option<usize>> {
        loop {
            let f = self.stack_get(func);
            if let Some(id) = self.native_of(&f) {
                let n = self.precall_native(func, MULTRET, id)?;
                return Ok(Some(n));
            }
            if let Value::LuaClosure(cl) = f {
                let (nparams, fsize) = {
                    let p = self.heap.closure_proto(cl);
                    (p.num_params as usize, p.max_stack_size as usize)
                };
                self.check_stack_gc(fsize.saturating_sub(delta))?;
                let th = self.thread_mut();
                let base = th.call_infos[ci].func - delta;
                th.stack.copy_within(func..func + narg1, base);
                while narg1 <= nparams {
                    th.stack[base + narg1] = Value::Nil;
                    narg1 += 1;
                }
                let c = &mut th.call_infos[ci];
                c.func = base;
                c.top = base + 1 + fsize;
                c.saved_pc = 0;
                c.callstatus.insert(CallStatus::TAIL);
                th.top = base + narg1;
                return Ok(None);
            }
            func = self.try_func_tm(func)?;
            narg1 += 1;
        }
    }

    fn precall_native(&mut self, func: usize, nresults: i32, id: NativeFnId) -> LuaResult<usize> {
        self.check_stack_gc(MIN_STACK)?;
        let th = self.thread_mut();
        let top = th.top;
        let ci = th.next_ci();
        th.call_infos[ci] = CallInfo {
            func,
            top: top + MIN_STACK,
            nresults,
            callstatus: CallStatus::C,
            ..CallInfo::default()
        };
        if self.thread().hook_mask & MASK_CALL != 0 {
            let narg = top - func - 1;
            self.call_hook_event(HookEvent::Call, None, 1, narg)?;
        }
        let f = self.native(id);
        let n = f(self)?;
        let n = self.checked_result_count(n);
        self.poscall(ci, n)?;
        Ok(n)
    }

    /// Clamps a native's claimed result count to the values it pushed.
    pub(crate) fn checked_result_count(&self, n: usize) -> usize {
        let th = self.thread();
        let available = th.top - (th.current_ci().func + 1);
        debug_assert!(n <= available, "native returned more results than it pushed");
        n.min(available)
    }

    /// Finishes a call: runs the return hook, moves the `nres` results on
    /// top of the stack to where the caller expects them, and pops the frame.
    pub(crate) fn poscall(&mut self, ci: usize, nres: usize) -> LuaResult<()> {
        let wanted = self.thread().call_infos[ci].nresults;
        if self.thread().hook_mask != 0 && wanted >= MULTRET {
            self.ret_hook(ci, nres)?;
        }
        let func = self.thread().call_infos[ci].func;
        self.move_results(func, nres, wanted)?;
        self.thread_mut().ci = ci - 1;
        Ok(())
    }

    fn move_results(&mut self, res: usize, mut nres: usize, wanted: i32) -> LuaResult<()> {
        let wanted = match wanted {
            0 => {
                self.set_top_raw(res);
                return Ok(());
            }
            1 => {
                let v = if nres == 0 {
                    Value::Nil
                } else {
                    self.stack_get(self.top() - nres)
                };
                self.stack_set(res, v);
                self.set_top_raw(res + 1);
                return Ok(());
            }
            MULTRET => nres,
            w if w < MULTRET => {
                // the frame has to-be-closed variables
                let ci = self.ci();
                {
                    let c = &mut self.thread_mut().call_infos[ci];
                    c.callstatus.insert(CallStatus::CLSRET);
                    c.n_res = nres;
                }
                self.close_level(res, None, true)?;
                self.thread_mut().call_infos[ci]
                    .callstatus
                    .remove(CallStatus::CLSRET);
                if self.thread().hook_mask != 0 {
                    self.ret_hook(ci, nres)?;
                }
                match decode_nresults(w) {
                    MULTRET => nres,
                    w => w as usize,
                }
            }
            w => w as usize,
        };
        let th = self.thread_mut();
        let first = th.top - nres;
        nres = nres.min(wanted);
        th.stack.copy_within(first..first + nres, res);
        for slot in &mut th.stack[res + nres..res + wanted] {
            *slot = Value::Nil;
        }
        th.top = res + wanted;
        Ok(())
    }

    fn ret_hook(&mut self, ci: usize, nres: usize) -> LuaResult<()> {
        if self.thread().hook_mask & MASK_RET != 0 {
            let first = self.top() - nres;
            let delta = match self.frame_proto(ci) {
                Some(p) if p.is_vararg => {
                    self.thread().call_infos[ci].n_extra_args + p.num_params as usize + 1
                }
                _ => 0,
            };
            self.thread_mut().call_infos[ci].func += delta;
            let ftransfer = first - self.thread().call_infos[ci].func;
            self.call_hook_event(HookEvent::Return, None, ftransfer, nres)?;
            self.thread_mut().call_infos[ci].func -= delta;
        }
        if ci > 0 && self.thread().call_infos[ci - 1].is_lua() {
            let pc = self.thread().call_infos[ci - 1].saved_pc;
            self.thread_mut().old_pc = pc.saturating_sub(1);
        }
        Ok(())
    }

    /// Ensures the caller's frame covers results returned in full.
    pub(crate) fn adjust_results(&mut self, nresults: i32) {
        if nresults <= MULTRET {
            let th = self.thread_mut();
            let top = th.top;
            let ci = th.current_ci_mut();
            if ci.top < top {
                ci.top = top;
            }
        }
    }

    // ========================================================================
    // Calls
    // ========================================================================

    fn ccall(&mut self, func: usize, nresults: i32, no_yield: bool) -> LuaResult<()> {
        {
            let th = self.thread_mut();
            th.n_ccalls += 1;
            if no_yield {
                th.nny += 1;
            }
        }
        if self.thread().n_ccalls >= self.config.max_native_calls {
            self.check_stack(0)?;
            self.check_cstack()?;
        }
        if let Some(ci) = self.precall(func, nresults)? {
            self.thread_mut().call_infos[ci].callstatus = CallStatus::FRESH;
            self.execute(ci)?;
        }
        let th = self.thread_mut();
        th.n_ccalls -= 1;
        if no_yield {
            th.nny -= 1;
        }
        Ok(())
    }

    /// Calls the function at `func`; its results replace it and its
    /// arguments. The callee may yield.
    pub(crate) fn call_value(&mut self, func: usize, nresults: i32) -> LuaResult<()> {
        self.ccall(func, nresults, false)
    }

    /// Calls the function at `func` in a non-yieldable context.
    pub(crate) fn call_no_yield(&mut self, func: usize, nresults: i32) -> LuaResult<()> {
        self.ccall(func, nresults, true)
    }

    // ========================================================================
    // Recovery points
    // ========================================================================

    /// Runs `f` as a recovery point: on error the native call counters of
    /// the running thread are restored to their values at entry.
    pub(crate) fn run_protected<T>(
        &mut self,
        f: impl FnOnce(&mut State) -> LuaResult<T>,
    ) -> LuaResult<T> {
        let th = self.heap.running;
        let (n_ccalls, nny) = {
            let t = &self.heap.threads[th];
            (t.n_ccalls, t.nny)
        };
        self.recover_depth += 1;
        let result = f(self);
        self.recover_depth -= 1;
        let t = &mut self.heap.threads[th];
        t.n_ccalls = n_ccalls;
        t.nny = nny;
        result
    }

    /// Places the error object for `err` at `slot` and sets the top just
    /// above it. A successful status places `nil`.
    pub(crate) fn set_error_obj(&mut self, slot: usize, err: &LuaError) {
        let v = match err.status {
            Status::Ok => Value::Nil,
            Status::Memory => Value::String(self.heap.memory_error_message),
            _ => err.value,
        };
        self.stack_set(slot, v);
        self.set_top_raw(slot + 1);
    }

    /// Closes upvalues and to-be-closed variables down to `level`, in
    /// protected mode. An error raised by a closing method replaces the
    /// current one and closing goes on with the remaining variables.
    pub(crate) fn close_protected(&mut self, level: usize, mut err: LuaError) -> LuaError {
        let old_ci = self.ci();
        let old_allow_hook = self.thread().allow_hook;
        loop {
            let current = err;
            match self.run_protected(|s| s.close_level(level, Some(current), false)) {
                Ok(_) => return err,
                Err(e) => {
                    let th = self.thread_mut();
                    th.ci = old_ci;
                    th.allow_hook = old_allow_hook;
                    err = e;
                }
            }
        }
    }

    /// Runs `f` under a recovery point with message handler `errfunc`. On
    /// error, the stack is unwound to `old_top`, pending variables above it
    /// are closed, and the error object is left at `old_top`.
    pub(crate) fn pcall_raw(
        &mut self,
        old_top: usize,
        errfunc: usize,
        f: impl FnOnce(&mut State) -> LuaResult<()>,
    ) -> Status {
        let old_ci = self.ci();
        let old_allow_hook = self.thread().allow_hook;
        let old_errfunc = self.thread().err_func;
        self.thread_mut().err_func = errfunc;
        let status = match self.run_protected(f) {
            Ok(()) => Status::Ok,
            Err(e) => {
                let th = self.thread_mut();
                th.ci = old_ci;
                th.allow_hook = old_allow_hook;
                let e = self.close_protected(old_top, e);
                self.set_error_obj(old_top, &e);
                self.shrink_stack();
                e.status
            }
        };
        self.thread_mut().err_func = old_errfunc;
        status
    }
}
