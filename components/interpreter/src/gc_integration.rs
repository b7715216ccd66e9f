//! GC integration
//!
//! The collector in `memory_manager` only marks and sweeps. This module
//! drives it from the interpreter's safe points, runs the `__gc`
//! finalizers it queues (they are Lua calls), enforces the configured
//! memory limit and implements the host-facing `gc` control commands.

use crate::config::GcMode;
use crate::state::State;
use core_types::{LuaResult, Status, TagMethod};
use memory_manager::{CallStatus, GcKind, GcPhase, StepOutcome};
use tracing::{debug, warn};

/// A collector control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcCommand {
    /// Stops automatic collection
    Stop,
    /// Restarts automatic collection
    Restart,
    /// Runs a full cycle
    Collect,
    /// Memory in use, in KiB
    Count,
    /// Remainder of memory in use modulo 1024, in bytes
    CountBytes,
    /// Performs a step as if this many KiB had been allocated (0 for one
    /// basic step); answers whether a cycle finished
    Step(usize),
    /// Whether the collector is running (not stopped by the host)
    IsRunning,
    /// Switches to incremental mode; zero parameters keep their value
    Incremental {
        /// Pause between cycles, in percent
        pause: usize,
        /// Step multiplier, in percent
        step_mul: usize,
        /// Log2 of the step size in bytes
        step_size: u32,
    },
    /// Switches to generational mode; zero parameters keep their value
    Generational {
        /// Minor multiplier, in percent
        minor_mul: usize,
        /// Major multiplier, in percent
        major_mul: usize,
    },
}

/// Answer to a [`GcCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcReply {
    /// The command has no answer
    Done,
    /// A memory amount
    Count(usize),
    /// A yes/no answer
    Flag(bool),
    /// The mode in effect before the command
    Mode(GcMode),
}

impl State {
    /// Executes a collector command.
    ///
    /// # Examples
    ///
    /// ```
    /// use interpreter::{GcCommand, GcReply, State};
    ///
    /// let mut state = State::new();
    /// state.gc(GcCommand::Stop).unwrap();
    /// assert_eq!(state.gc(GcCommand::IsRunning).unwrap(), GcReply::Flag(false));
    /// ```
    pub fn gc(&mut self, cmd: GcCommand) -> LuaResult<GcReply> {
        if self.heap.gc.stopped_internally {
            // inside a finalizer: the collector stays untouched
            return Ok(GcReply::Done);
        }
        let reply = match cmd {
            GcCommand::Stop => {
                self.heap.gc.stopped_by_user = true;
                GcReply::Done
            }
            GcCommand::Restart => {
                self.heap.gc.set_debt(0);
                self.heap.gc.stopped_by_user = false;
                GcReply::Done
            }
            GcCommand::Collect => {
                self.full_collect(false)?;
                GcReply::Done
            }
            GcCommand::Count => GcReply::Count(self.heap.total_bytes() >> 10),
            GcCommand::CountBytes => GcReply::Count(self.heap.total_bytes() & 0x3ff),
            GcCommand::Step(kib) => {
                let stopped = self.heap.gc.stopped_by_user;
                self.heap.gc.stopped_by_user = false;
                let mut debt = 1isize;
                if kib == 0 {
                    self.heap.gc.set_debt(0);
                    self.gc_step()?;
                } else {
                    debt = (kib as isize).saturating_mul(1024) + self.heap.gc.debt();
                    self.heap.gc.set_debt(debt);
                    self.check_gc()?;
                }
                self.heap.gc.stopped_by_user = stopped;
                GcReply::Flag(debt > 0 && self.heap.gc.phase() == GcPhase::Pause)
            }
            GcCommand::IsRunning => GcReply::Flag(!self.heap.gc.stopped_by_user),
            GcCommand::Incremental {
                pause,
                step_mul,
                step_size,
            } => {
                let old = self.gc_mode();
                let params = &mut self.heap.gc.params;
                if pause != 0 {
                    params.pause = pause;
                }
                if step_mul != 0 {
                    params.step_mul = step_mul;
                }
                if step_size != 0 {
                    params.step_size = step_size;
                }
                self.heap.change_mode(GcKind::Incremental);
                GcReply::Mode(old)
            }
            GcCommand::Generational {
                minor_mul,
                major_mul,
            } => {
                let old = self.gc_mode();
                let params = &mut self.heap.gc.params;
                if minor_mul != 0 {
                    params.gen_minor_mul = minor_mul;
                }
                if major_mul != 0 {
                    params.gen_major_mul = major_mul;
                }
                self.heap.change_mode(GcKind::Generational);
                GcReply::Mode(old)
            }
        };
        Ok(reply)
    }

    fn gc_mode(&self) -> GcMode {
        if self.heap.gc.is_generational() {
            GcMode::Generational
        } else {
            GcMode::Incremental
        }
    }

    // ========================================================================
    // Safe points
    // ========================================================================

    /// Collector safe point: performs a step when allocation debt is due and
    /// enforces the memory limit.
    pub(crate) fn check_gc(&mut self) -> LuaResult<()> {
        if self.heap.gc.debt() > 0 {
            self.gc_step()?;
        }
        self.check_memory_limit()
    }

    fn gc_step(&mut self) -> LuaResult<()> {
        match self.heap.step() {
            StepOutcome::Done => Ok(()),
            StepOutcome::RunFinalizers(n) => {
                self.run_finalizers(n);
                Ok(())
            }
        }
    }

    fn full_collect(&mut self, emergency: bool) -> LuaResult<()> {
        debug!(emergency, "full collection requested");
        if let StepOutcome::RunFinalizers(n) = self.heap.full_gc(emergency) {
            self.run_finalizers(n);
        }
        Ok(())
    }

    fn check_memory_limit(&mut self) -> LuaResult<()> {
        let Some(limit) = self.config.memory_limit else {
            return Ok(());
        };
        if self.heap.total_bytes() <= limit {
            return Ok(());
        }
        if self.heap.gc.is_running() {
            self.full_collect(true)?;
        }
        if self.heap.total_bytes() > limit {
            warn!(
                total = self.heap.total_bytes(),
                limit, "memory limit exceeded"
            );
            return Err(self.memory_error());
        }
        Ok(())
    }

    // ========================================================================
    // Finalizers
    // ========================================================================

    /// Runs up to `n` queued finalizers.
    fn run_finalizers(&mut self, n: usize) {
        for _ in 0..n {
            if !self.call_one_finalizer() {
                break;
            }
        }
    }

    /// Runs every queued finalizer, regardless of the collector's state.
    pub(crate) fn call_all_pending_finalizers(&mut self) {
        while self.call_one_finalizer() {}
    }

    /// Calls the `__gc` metamethod of the next queued object. Errors become
    /// warnings. Returns `false` when the queue is empty.
    fn call_one_finalizer(&mut self) -> bool {
        let Some(obj) = self.heap.take_finalizable() else {
            return false;
        };
        let tm = self.heap.tm_by_obj(&obj, TagMethod::Gc);
        if tm.is_nil() {
            // the field was removed after registration
            return true;
        }
        if self.check_stack(2).is_err() {
            return true;
        }
        let old_allow_hook = self.thread().allow_hook;
        let old_stopped = self.heap.gc.stopped_internally;
        self.heap.gc.stopped_internally = true;
        self.thread_mut().allow_hook = false;
        let func = self.top();
        self.push_value(tm);
        self.push_value(obj);
        let ci = self.ci();
        self.thread_mut().call_infos[ci]
            .callstatus
            .insert(CallStatus::FIN);
        let status = self.pcall_raw(func, 0, |s| s.call_no_yield(func, 0));
        let ci = self.ci();
        self.thread_mut().call_infos[ci]
            .callstatus
            .remove(CallStatus::FIN);
        self.thread_mut().allow_hook = old_allow_hook;
        self.heap.gc.stopped_internally = old_stopped;
        if status != Status::Ok {
            let err = self.pop_value();
            warn!(status = ?status, "error in finalizer");
            self.warn_error("__gc", &err);
        }
        true
    }
}
