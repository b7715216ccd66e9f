//! The runtime instance
//!
//! A [`State`] owns the heap (and with it every thread, string and table),
//! the registries of native functions, continuations and hooks, and the
//! host callbacks for panics and warnings. Every operation of the runtime is
//! a method on it; there is no global state.

use crate::config::{ConfigError, RuntimeConfig};
use crate::debug::DebugInfo;
use crate::do_call::ERROR_STACK_EXTRA;
use crate::load::Compiler;
use core_types::{chunk_id, LuaError, LuaResult, NativeFnId, Status, StrRef, ThreadRef, Value};
use memory_manager::{ContinuationId, Heap, HookId, LuaThread};
use std::collections::HashMap;
use std::fmt;
use tracing::{error, warn};

/// A native function. Arguments are at stack indices `1..=get_top()`; the
/// function pushes its results and returns how many there are.
pub type NativeFn = fn(&mut State) -> LuaResult<usize>;

/// Continuation of a native function interrupted by a yield, or of a
/// yieldable protected call that caught an error after a resumption.
pub type ContinuationFn = fn(&mut State, Status, isize) -> LuaResult<usize>;

/// Debug hook.
pub type HookFn = fn(&mut State, &DebugInfo) -> LuaResult<()>;

/// Called when an error escapes every recovery point.
pub type PanicFn = fn(&mut State, &LuaError);

/// Receives warning pieces; `to_continue` is set when more pieces follow.
pub type WarnFn = fn(&mut State, &str, bool);

/// Registry key of the table of loaded modules.
pub const LOADED_TABLE: &str = "_LOADED";

/// Message of the error raised when a message handler fails.
pub const ERRERR_MSG: &str = "error in error handling";

/// A runtime instance.
pub struct State {
    pub(crate) heap: Heap,
    natives: Vec<NativeFn>,
    native_ids: HashMap<usize, NativeFnId>,
    continuations: Vec<ContinuationFn>,
    continuation_ids: HashMap<usize, ContinuationId>,
    hooks: Vec<HookFn>,
    hook_ids: HashMap<usize, HookId>,
    pub(crate) config: RuntimeConfig,
    pub(crate) compiler: Option<Box<dyn Compiler>>,
    panic: Option<PanicFn>,
    warn: Option<WarnFn>,
    warnings_on: bool,
    warn_buffer: String,
    warnings: Vec<String>,
    /// Recovery points (protected calls, resumes) currently established
    pub(crate) recover_depth: u32,
    closed: bool,
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("objects", &self.heap.object_count())
            .field("total_bytes", &self.heap.total_bytes())
            .field("natives", &self.natives.len())
            .field("has_compiler", &self.compiler.is_some())
            .field("recover_depth", &self.recover_depth)
            .finish()
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    /// Creates a runtime with the default configuration.
    pub fn new() -> Self {
        Self::build(RuntimeConfig::default())
    }

    /// Creates a runtime with a validated configuration.
    pub fn with_config(config: RuntimeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: RuntimeConfig) -> Self {
        let mut heap = Heap::new(config.heap_config());
        let main = heap.main_thread;
        // the main thread can never yield
        heap.threads[main].nny = 1;
        let loaded = heap.new_table();
        let key = heap.new_str(LOADED_TABLE);
        let registry = heap.registry;
        // a string key never fails to store
        let _ = heap.table_set(registry, Value::String(key), Value::Table(loaded));
        Self {
            heap,
            natives: Vec::new(),
            native_ids: HashMap::new(),
            continuations: Vec::new(),
            continuation_ids: HashMap::new(),
            hooks: Vec::new(),
            hook_ids: HashMap::new(),
            config,
            compiler: None,
            panic: None,
            warn: None,
            warnings_on: true,
            warn_buffer: String::new(),
            warnings: Vec::new(),
            recover_depth: 0,
            closed: false,
        }
    }

    /// The heap.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// The heap, mutably.
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Configuration in effect.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The main thread.
    pub fn main_thread(&self) -> ThreadRef {
        self.heap.main_thread
    }

    /// The running thread.
    pub fn running(&self) -> ThreadRef {
        self.heap.running
    }

    /// Whether the running thread is the main thread.
    pub fn is_main_thread(&self) -> bool {
        self.heap.running == self.heap.main_thread
    }

    // ========================================================================
    // Function registries
    // ========================================================================

    /// Registers a native function, returning its stable identifier.
    pub fn register_native(&mut self, f: NativeFn) -> NativeFnId {
        let key = f as usize;
        if let Some(&id) = self.native_ids.get(&key) {
            return id;
        }
        let id = NativeFnId(self.natives.len() as u32);
        self.natives.push(f);
        self.native_ids.insert(key, id);
        id
    }

    pub(crate) fn native(&self, id: NativeFnId) -> NativeFn {
        self.natives[id.0 as usize]
    }

    pub(crate) fn register_continuation(&mut self, k: ContinuationFn) -> ContinuationId {
        let key = k as usize;
        if let Some(&id) = self.continuation_ids.get(&key) {
            return id;
        }
        let id = ContinuationId(self.continuations.len() as u32);
        self.continuations.push(k);
        self.continuation_ids.insert(key, id);
        id
    }

    pub(crate) fn continuation(&self, id: ContinuationId) -> ContinuationFn {
        self.continuations[id.0 as usize]
    }

    pub(crate) fn register_hook(&mut self, h: HookFn) -> HookId {
        let key = h as usize;
        if let Some(&id) = self.hook_ids.get(&key) {
            return id;
        }
        let id = HookId(self.hooks.len() as u32);
        self.hooks.push(h);
        self.hook_ids.insert(key, id);
        id
    }

    pub(crate) fn hook_fn(&self, id: HookId) -> HookFn {
        self.hooks[id.0 as usize]
    }

    // ========================================================================
    // Running thread
    // ========================================================================

    #[inline]
    pub(crate) fn thread(&self) -> &LuaThread {
        &self.heap.threads[self.heap.running]
    }

    #[inline]
    pub(crate) fn thread_mut(&mut self) -> &mut LuaThread {
        let th = self.heap.running;
        &mut self.heap.threads[th]
    }

    #[inline]
    pub(crate) fn stack_get(&self, i: usize) -> Value {
        self.thread().stack[i]
    }

    #[inline]
    pub(crate) fn stack_set(&mut self, i: usize, v: Value) {
        self.thread_mut().stack[i] = v;
    }

    #[inline]
    pub(crate) fn top(&self) -> usize {
        self.thread().top
    }

    #[inline]
    pub(crate) fn set_top_raw(&mut self, top: usize) {
        self.thread_mut().top = top;
    }

    #[inline]
    pub(crate) fn ci(&self) -> usize {
        self.thread().ci
    }

    /// Pushes a value, growing the buffer when the reserved room is used up.
    /// Growth stops at the configured maximum; past it only the slots
    /// reserved for the overflow error remain.
    pub(crate) fn push_value(&mut self, v: Value) {
        let th = self.heap.running;
        let size = self.heap.threads[th].stack_size();
        if self.heap.threads[th].top >= size {
            let max = self.heap.max_stack;
            let new_size = if size < max {
                (size * 2).min(max)
            } else {
                max + ERROR_STACK_EXTRA
            };
            assert!(new_size > size, "stack overflow (pushed past the error zone)");
            self.heap.resize_stack(th, new_size);
        }
        self.heap.threads[th].push(v);
    }

    pub(crate) fn pop_value(&mut self) -> Value {
        let th = self.thread_mut();
        th.top -= 1;
        th.stack[th.top]
    }

    // ========================================================================
    // Raising errors
    // ========================================================================

    /// Raises `v` as a runtime error, giving the message handler in effect
    /// the chance to replace it.
    pub(crate) fn throw(&mut self, v: Value) -> LuaError {
        let errfunc = self.thread().err_func;
        if errfunc == 0 {
            return LuaError::runtime(v);
        }
        let handler = self.stack_get(errfunc);
        if let Err(e) = self.check_stack(2) {
            return e;
        }
        let func = self.top();
        self.push_value(handler);
        self.push_value(v);
        match self.call_no_yield(func, 1) {
            Ok(()) => {
                let v = self.pop_value();
                LuaError::runtime(v)
            }
            Err(e) => e,
        }
    }

    /// Raises a runtime error with a message, prefixed with the current
    /// source position when a Lua function is running.
    pub(crate) fn run_error(&mut self, msg: impl AsRef<str>) -> LuaError {
        let msg = match self.current_location() {
            Some(loc) => format!("{} {}", loc, msg.as_ref()),
            None => msg.as_ref().to_string(),
        };
        let s = self.heap.new_str(&msg);
        self.throw(Value::String(s))
    }

    /// `chunk:line:` of the running Lua function, if any.
    pub(crate) fn current_location(&self) -> Option<String> {
        let ci = &self.thread().call_infos[self.ci()];
        if !ci.is_lua() {
            return None;
        }
        let f = self.stack_get(ci.func);
        let cl = match f {
            Value::LuaClosure(cl) => cl,
            _ => return None,
        };
        let p = &self.heap.protos[self.heap.lclosures[cl].proto];
        let src = p
            .proto
            .source
            .as_deref()
            .map(chunk_id)
            .unwrap_or_else(|| "?".to_string());
        let line = p
            .proto
            .line_at(ci.saved_pc.saturating_sub(1))
            .map_or_else(|| "?".to_string(), |l| l.to_string());
        Some(format!("{}:{}:", src, line))
    }

    /// The preallocated memory error.
    pub(crate) fn memory_error(&self) -> LuaError {
        LuaError::new(Status::Memory, Value::String(self.heap.memory_error_message))
    }

    pub(crate) fn error_in_error_handling(&mut self) -> LuaError {
        let s = self.heap.new_str(ERRERR_MSG);
        LuaError::new(Status::ErrorHandler, Value::String(s))
    }

    /// Reports an error that escaped every recovery point.
    pub(crate) fn unprotected_error(&mut self, e: &LuaError) {
        let msg = self.error_text(&e.value);
        error!(status = ?e.status, message = %msg, "unprotected error");
        if let Some(panic) = self.panic {
            panic(self, e);
        }
    }

    /// Printable form of an error object.
    pub fn error_text(&self, v: &Value) -> String {
        match *v {
            Value::String(s) => self.heap.strings[s].to_str_lossy().into_owned(),
            Value::Integer(_) | Value::Float(_) => {
                core_types::number_to_string(v).unwrap_or_default()
            }
            _ => format!("(error object is a {} value)", v.type_name()),
        }
    }

    /// Installs the last-resort handler for unprotected errors.
    pub fn set_panic(&mut self, panic: Option<PanicFn>) -> Option<PanicFn> {
        std::mem::replace(&mut self.panic, panic)
    }

    // ========================================================================
    // Warnings
    // ========================================================================

    /// Installs a warning function, replacing the default one that logs
    /// complete messages and keeps them for [`State::take_warnings`].
    pub fn set_warn_fn(&mut self, f: Option<WarnFn>) {
        self.warn = f;
    }

    /// Emits a warning piece. The default handler understands the control
    /// messages `@on` and `@off`.
    pub fn warning(&mut self, msg: &str, to_continue: bool) {
        if let Some(f) = self.warn {
            f(self, msg, to_continue);
            return;
        }
        if self.warn_buffer.is_empty() && !to_continue && msg.starts_with('@') {
            match msg {
                "@on" => self.warnings_on = true,
                "@off" => self.warnings_on = false,
                _ => {}
            }
            return;
        }
        self.warn_buffer.push_str(msg);
        if !to_continue {
            let text = std::mem::take(&mut self.warn_buffer);
            if self.warnings_on {
                warn!(message = %text, "runtime warning");
                self.warnings.push(text);
            }
        }
    }

    /// Warns about the error object on top of the stack, raised in `where_`.
    pub(crate) fn warn_error(&mut self, where_: &str, err: &Value) {
        let msg = match *err {
            Value::String(s) => self.heap.strings[s].to_str_lossy().into_owned(),
            _ => "error object is not a string".to_string(),
        };
        self.warning("error in ", true);
        self.warning(where_, true);
        self.warning(" (", true);
        self.warning(&msg, true);
        self.warning(")", false);
    }

    /// Complete warnings collected by the default handler.
    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    // ========================================================================
    // Registry
    // ========================================================================

    /// The globals table.
    pub fn globals(&self) -> core_types::TableRef {
        self.heap.globals()
    }

    pub(crate) fn loaded_key(&mut self) -> StrRef {
        self.heap.new_str(LOADED_TABLE)
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Closes the runtime: pending to-be-closed variables of the main thread
    /// are closed and every pending finalizer runs.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let main = self.heap.main_thread;
        self.heap.running = main;
        // close the main thread's pending variables
        let _ = self.reset_thread(main, Status::Ok);
        self.heap.gc.closing = true;
        self.heap.separate_all_finalizers();
        self.call_all_pending_finalizers();
    }
}

impl Drop for State {
    fn drop(&mut self) {
        self.shutdown();
    }
}
