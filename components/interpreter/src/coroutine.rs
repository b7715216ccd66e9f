//! Coroutines
//!
//! Every thread has its own stack and call chain. Resuming switches the
//! running thread; a yield unwinds the native frames of the coroutine as an
//! `Err` carrying [`Status::Yield`], and the next resume rebuilds them from
//! the saved call records: continuations of native functions are called and
//! interrupted Lua instructions are completed ([`State::unroll`]).

use crate::state::{ContinuationFn, State};
use core_types::{LuaError, LuaResult, Status, ThreadRef, Value};
use memory_manager::{CallStatus, MIN_STACK, MULTRET};
use tracing::trace;

/// Status of a coroutine as seen from the running thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineStatus {
    /// It is the running thread
    Running,
    /// Suspended in a yield, or not started yet
    Suspended,
    /// Active but not running: it resumed another coroutine
    Normal,
    /// Finished or stopped by an error
    Dead,
}

impl CoroutineStatus {
    /// The name used by `coroutine.status`.
    pub fn as_str(self) -> &'static str {
        match self {
            CoroutineStatus::Running => "running",
            CoroutineStatus::Suspended => "suspended",
            CoroutineStatus::Normal => "normal",
            CoroutineStatus::Dead => "dead",
        }
    }
}

impl State {
    // ========================================================================
    // Threads
    // ========================================================================

    /// Creates a thread, pushes it on the stack and returns it. The new
    /// thread shares the globals and inherits the hook of the running one.
    pub fn new_thread(&mut self) -> LuaResult<ThreadRef> {
        self.check_gc()?;
        let th = self.heap.new_thread();
        let (hook, mask, count) = {
            let t = self.thread();
            (t.hook, t.hook_mask, t.base_hook_count)
        };
        let t = &mut self.heap.threads[th];
        t.hook = hook;
        t.hook_mask = mask;
        t.base_hook_count = count;
        t.hook_count = count;
        self.push_value(Value::Thread(th));
        Ok(th)
    }

    /// Moves `n` values from the top of the running thread to thread `to`.
    pub fn xmove(&mut self, to: ThreadRef, n: usize) {
        let from = self.heap.running;
        self.move_values(from, to, n);
    }

    pub(crate) fn move_values(&mut self, from: ThreadRef, to: ThreadRef, n: usize) {
        if from == to || n == 0 {
            return;
        }
        let needed = self.heap.threads[to].top + n;
        if needed > self.heap.threads[to].stack_size() {
            self.heap.resize_stack(to, needed + MIN_STACK);
        }
        let values: Vec<Value> = {
            let f = &mut self.heap.threads[from];
            f.top -= n;
            f.stack[f.top..f.top + n].to_vec()
        };
        let t = &mut self.heap.threads[to];
        for v in values {
            t.push(v);
        }
    }

    /// Raw status of a thread: `Ok`, `Yield`, or the error that killed it.
    pub fn thread_status(&self, th: ThreadRef) -> Status {
        self.heap.threads[th].status
    }

    /// Status of `co` relative to the running thread.
    pub fn coroutine_status(&self, co: ThreadRef) -> CoroutineStatus {
        if co == self.heap.running {
            return CoroutineStatus::Running;
        }
        let t = &self.heap.threads[co];
        match t.status {
            Status::Yield => CoroutineStatus::Suspended,
            Status::Ok if t.ci > 0 => CoroutineStatus::Normal,
            Status::Ok if t.top == 1 => CoroutineStatus::Dead,
            Status::Ok => CoroutineStatus::Suspended,
            _ => CoroutineStatus::Dead,
        }
    }

    /// Whether the running code may yield.
    pub fn is_yieldable(&self) -> bool {
        self.thread().nny == 0
    }

    // ========================================================================
    // Resume and yield
    // ========================================================================

    fn resume_error(&mut self, msg: &str, nargs: usize) -> (Status, usize) {
        let top = self.top() - nargs;
        self.set_top_raw(top);
        let s = self.heap.new_str(msg);
        self.push_value(Value::String(s));
        (Status::Runtime, 1)
    }

    /// Starts or continues coroutine `co` with the `nargs` values on top of
    /// the running thread's stack as arguments. The first resume calls the
    /// function that sits alone on `co`'s stack.
    ///
    /// Returns the coroutine's status together with the number of values
    /// moved to the running thread's stack: the yielded or returned values,
    /// or the error object. The caller keeps `co` reachable while it runs.
    pub fn resume(&mut self, co: ThreadRef, nargs: usize) -> LuaResult<(Status, usize)> {
        let from = self.heap.running;
        {
            let t = &self.heap.threads[co];
            match t.status {
                Status::Ok if co == from || t.ci != 0 => {
                    return Ok(self.resume_error("cannot resume non-suspended coroutine", nargs));
                }
                Status::Ok if t.top == 1 => {
                    return Ok(self.resume_error("cannot resume dead coroutine", nargs));
                }
                Status::Ok | Status::Yield => {}
                _ => return Ok(self.resume_error("cannot resume dead coroutine", nargs)),
            }
        }
        let n_ccalls = self.heap.threads[from].n_ccalls;
        if n_ccalls >= self.config.max_native_calls {
            return Ok(self.resume_error("C stack overflow", nargs));
        }
        self.move_values(from, co, nargs);
        {
            let t = &mut self.heap.threads[co];
            t.n_ccalls = n_ccalls + 1;
            t.nny = 0;
        }
        trace!(nargs, "resuming coroutine");
        self.heap.running = co;
        let mut outcome = self.run_protected(|s| s.resume_body(nargs));
        outcome = self.recover(outcome);
        let status = match outcome {
            Ok(()) => Status::Ok,
            Err(e) if e.is_yield() => Status::Yield,
            Err(e) => {
                // the thread is dead; keep a copy of the error object for
                // closing its pending variables later
                self.thread_mut().status = e.status;
                let top = self.top();
                self.set_error_obj(top, &e);
                let v = self.stack_get(top);
                self.push_value(v);
                let top = self.top();
                self.thread_mut().current_ci_mut().top = top;
                e.status
            }
        };
        let nres = match status {
            Status::Yield => self.thread().current_ci().n_yield,
            Status::Ok => self.top() - (self.thread().current_ci().func + 1),
            _ => 1,
        };
        self.heap.running = from;
        if matches!(status, Status::Ok | Status::Yield) {
            let room = self.thread().stack_size() - self.top();
            if nres + 1 > room && !self.grow_stack(nres + 1, false)? {
                self.heap.threads[co].top -= nres;
                let s = self.heap.new_str("too many results to resume");
                self.push_value(Value::String(s));
                return Ok((Status::Runtime, 1));
            }
        }
        self.move_values(co, from, nres);
        trace!(?status, nres, "coroutine suspended or finished");
        Ok((status, nres))
    }

    fn resume_body(&mut self, nargs: usize) -> LuaResult<()> {
        let first_arg = self.top() - nargs;
        if self.thread().status == Status::Ok {
            return self.call_value(first_arg - 1, MULTRET);
        }
        self.thread_mut().status = Status::Ok;
        let ci = self.ci();
        if self.thread().call_infos[ci].is_lua() {
            // yielded inside a hook
            self.set_top_raw(first_arg);
            self.execute(ci)?;
        } else {
            let (k, ctx) = {
                let c = &self.thread().call_infos[ci];
                (c.k, c.ctx)
            };
            let mut n = nargs;
            if let Some(k) = k {
                let k = self.continuation(k);
                n = k(self, Status::Yield, ctx)?;
                n = self.checked_result_count(n);
            }
            self.poscall(ci, n)?;
        }
        self.unroll()
    }

    /// Keeps running after errors caught by yieldable protected calls of
    /// the coroutine.
    fn recover(&mut self, mut outcome: LuaResult<()>) -> LuaResult<()> {
        while let Err(e) = outcome {
            if e.is_yield() {
                return Err(e);
            }
            let Some(ci) = self.find_pcall() else {
                return Err(e);
            };
            let v = match e.status {
                Status::Memory => Value::String(self.heap.memory_error_message),
                _ => e.value,
            };
            self.push_value(v);
            let th = self.thread_mut();
            th.ci = ci;
            th.call_infos[ci].recover_status = Some(e.status);
            outcome = self.run_protected(|s| s.unroll());
        }
        outcome
    }

    fn find_pcall(&self) -> Option<usize> {
        let th = self.thread();
        (1..=th.ci)
            .rev()
            .find(|&ci| th.call_infos[ci].callstatus.contains(CallStatus::YPCALL))
    }

    /// Completes every frame interrupted by a yield, down to the base.
    pub(crate) fn unroll(&mut self) -> LuaResult<()> {
        while self.ci() != 0 {
            let ci = self.ci();
            if self.thread().call_infos[ci].is_lua() {
                self.finish_op()?;
                self.execute(ci)?;
            } else {
                self.finish_ccall(ci)?;
            }
        }
        Ok(())
    }

    fn finish_ccall(&mut self, ci: usize) -> LuaResult<()> {
        let n = if self.thread().call_infos[ci].callstatus.contains(CallStatus::CLSRET) {
            // was closing variables while returning
            self.thread().call_infos[ci].n_res
        } else {
            let mut status = Status::Yield;
            if self.thread().call_infos[ci].callstatus.contains(CallStatus::YPCALL) {
                status = self.finish_pcallk(ci)?;
            }
            self.adjust_results(MULTRET);
            let (k, ctx, func) = {
                let c = &self.thread().call_infos[ci];
                (c.k, c.ctx, c.func)
            };
            match k {
                Some(k) => {
                    let k = self.continuation(k);
                    let n = k(self, status, ctx)?;
                    self.checked_result_count(n)
                }
                None => self.top() - func - 1,
            }
        };
        self.poscall(ci, n)
    }

    /// Finishes a yieldable protected call after a resume: on a recovered
    /// error, closes its pending variables and leaves the error object at
    /// the position of the called function.
    fn finish_pcallk(&mut self, ci: usize) -> LuaResult<Status> {
        let recovered = self.thread().call_infos[ci].recover_status;
        let status = match recovered {
            None | Some(Status::Ok) => Status::Yield,
            Some(status) => {
                let (func, allow_hook) = {
                    let c = &self.thread().call_infos[ci];
                    (c.func_idx, c.callstatus.contains(CallStatus::OAH))
                };
                self.thread_mut().allow_hook = allow_hook;
                let top = self.top();
                let err = LuaError::new(status, self.stack_get(top - 1));
                self.close_level(func, Some(err), true)?;
                self.set_error_obj(func, &err);
                self.shrink_stack();
                self.thread_mut().call_infos[ci].recover_status = None;
                status
            }
        };
        let th = self.thread_mut();
        let c = &mut th.call_infos[ci];
        c.callstatus.remove(CallStatus::YPCALL);
        th.err_func = th.call_infos[ci].old_errfunc;
        Ok(status)
    }

    /// Suspends the running coroutine, handing the `nresults` values on
    /// top of the stack to the resumer. A native function returns the
    /// result of this call. When resumed, `k` (if any) is called in place of
    /// the rest of the native function; without it the resume arguments
    /// become the function's results.
    pub fn yield_k(
        &mut self,
        nresults: usize,
        ctx: isize,
        k: Option<ContinuationFn>,
    ) -> LuaResult<usize> {
        if !self.is_yieldable() {
            let msg = if self.is_main_thread() {
                "attempt to yield from outside a coroutine"
            } else {
                "attempt to yield across a C-call boundary"
            };
            return Err(self.run_error(msg));
        }
        let ci = self.ci();
        if self.thread().call_infos[ci].is_lua() {
            return Err(self.run_error("hooks cannot yield"));
        }
        let k = k.map(|k| self.register_continuation(k));
        let th = self.thread_mut();
        th.status = Status::Yield;
        let c = &mut th.call_infos[ci];
        c.n_yield = nresults;
        c.k = k;
        if k.is_some() {
            c.ctx = ctx;
        }
        Err(LuaError::yield_marker())
    }

    /// [`State::yield_k`] without a continuation.
    pub fn yield_values(&mut self, nresults: usize) -> LuaResult<usize> {
        self.yield_k(nresults, 0, None)
    }

    // ========================================================================
    // Closing
    // ========================================================================

    /// Unwinds thread `th` to its base, closing its pending to-be-closed
    /// variables with the error that stopped it (if any). Returns the final
    /// status; on error the error object is left at index 1 of `th`.
    pub(crate) fn reset_thread(&mut self, th: ThreadRef, status: Status) -> Status {
        let prev = self.heap.running;
        self.heap.running = th;
        let err_value = {
            let t = &mut self.heap.threads[th];
            let v = if t.top > 1 { t.stack[t.top - 1] } else { Value::Nil };
            t.ci = 0;
            t.stack[0] = Value::Nil;
            let base = &mut t.call_infos[0];
            base.func = 0;
            base.callstatus = CallStatus::C;
            t.status = Status::Ok;
            v
        };
        let status = if status == Status::Yield { Status::Ok } else { status };
        let e = self.close_protected(1, LuaError::new(status, err_value));
        if e.status == Status::Ok {
            self.set_top_raw(1);
        } else {
            self.set_error_obj(1, &e);
        }
        let top = self.top();
        self.thread_mut().call_infos[0].top = top + MIN_STACK;
        self.heap.shrink_stack(th);
        self.heap.running = prev;
        e.status
    }

    /// Closes a suspended or dead coroutine: its pending to-be-closed
    /// variables are closed and the thread becomes dead. On error the error
    /// object is pushed on the running thread's stack.
    pub fn close_thread(&mut self, co: ThreadRef) -> LuaResult<Status> {
        match self.coroutine_status(co) {
            CoroutineStatus::Running => {
                return Err(self.run_error("cannot close a running coroutine"));
            }
            CoroutineStatus::Normal => {
                return Err(self.run_error("cannot close a normal coroutine"));
            }
            CoroutineStatus::Suspended | CoroutineStatus::Dead => {}
        }
        let from = self.heap.running;
        self.heap.threads[co].n_ccalls = self.heap.threads[from].n_ccalls;
        let status = self.heap.threads[co].status;
        let status = self.reset_thread(co, status);
        if status != Status::Ok {
            self.move_values(co, from, 1);
        }
        Ok(status)
    }
}
