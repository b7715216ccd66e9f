//! Debug interface
//!
//! Stack introspection, local and upvalue access, hooks, and the symbolic
//! execution that names the variable involved in a runtime error
//! ("attempt to call a nil value (global 'f')").

use crate::state::{HookFn, State};
use bytecode_system::{Constant, Instruction, OpCode, Prototype};
use core_types::{
    chunk_id, FrameKind, GcObjectRef, LuaError, LuaResult, NClosureRef, TagMethod, ThreadRef,
    UpvalRef, Value,
};
use memory_manager::{CallStatus, MIN_STACK};
use std::rc::Rc;

/// Call hook mask bit.
pub const MASK_CALL: u8 = 1 << 0;
/// Return hook mask bit.
pub const MASK_RET: u8 = 1 << 1;
/// Line hook mask bit.
pub const MASK_LINE: u8 = 1 << 2;
/// Count hook mask bit.
pub const MASK_COUNT: u8 = 1 << 3;

/// Event reported to a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    /// A function is called
    Call,
    /// A function returns
    Return,
    /// The interpreter reaches a new line
    Line,
    /// The instruction count elapsed
    Count,
    /// A function is tail called
    TailCall,
}

/// Where an operand of a failing operation came from, for naming it in the
/// error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VarSite {
    /// An absolute stack slot of the running thread
    Stack(usize),
    /// Upvalue `n` of the running Lua function
    Upvalue(usize),
    /// A temporary value with no location
    None,
}

/// Activation record description filled by [`State::get_info`].
#[derive(Debug, Clone, Default)]
pub struct DebugInfo {
    /// Event being reported, for records handed to hooks
    pub event: Option<HookEvent>,
    /// Name of the function, when it can be inferred
    pub name: Option<String>,
    /// `global`, `local`, `method`, `field`, `upvalue`, `metamethod`, ... or empty
    pub name_what: &'static str,
    /// `Lua`, `C` or `main`
    pub what: &'static str,
    /// Source of the chunk that defined the function
    pub source: String,
    /// Printable version of `source`
    pub short_src: String,
    /// Line being executed
    pub current_line: Option<u32>,
    /// Line where the definition starts
    pub line_defined: Option<u32>,
    /// Line where the definition ends
    pub last_line_defined: Option<u32>,
    /// Number of upvalues
    pub nups: u8,
    /// Number of fixed parameters
    pub nparams: u8,
    /// Whether the function takes varargs
    pub is_vararg: bool,
    /// Whether this activation was reached by a tail call
    pub is_tail_call: bool,
    /// Index of the first value transferred by a call or return
    pub ftransfer: usize,
    /// Number of values transferred
    pub ntransfer: usize,
    /// Lines with code, filled by option `L`
    pub active_lines: Vec<u32>,
    pub(crate) thread: Option<ThreadRef>,
    pub(crate) ci: Option<usize>,
}

/// Identity of an upvalue, equal for closures sharing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpvalueId {
    /// An upvalue of a Lua closure
    Shared(UpvalRef),
    /// Slot `n` of a native closure
    Native(NClosureRef, usize),
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn format_varinfo(found: Option<(&'static str, String)>) -> String {
    match found {
        Some((kind, name)) => format!(" ({} '{}')", kind, name),
        None => String::new(),
    }
}

// ============================================================================
// Symbolic execution
// ============================================================================

fn upvalue_name(p: &Prototype, i: usize) -> String {
    p.upvalue_name(i).map_or_else(|| "?".to_string(), lossy)
}

fn constant_name(p: &Prototype, k: usize) -> String {
    match p.constants.get(k) {
        Some(Constant::String(s)) => lossy(s),
        _ => "?".to_string(),
    }
}

/// Name of register `c` only when it holds a constant string.
fn register_name(p: &Prototype, pc: usize, c: usize) -> String {
    match obj_name(p, pc, c) {
        Some(("constant", name)) => name,
        _ => "?".to_string(),
    }
}

fn rk_name(p: &Prototype, pc: usize, i: Instruction) -> String {
    let c = i.c() as usize;
    if i.k() {
        constant_name(p, c)
    } else {
        register_name(p, pc, c)
    }
}

fn filter_pc(pc: usize, jmp_target: usize) -> Option<usize> {
    // code before a jump target is conditional
    if pc < jmp_target {
        None
    } else {
        Some(pc)
    }
}

/// Last instruction before `last_pc` that changed register `reg`.
fn find_set_reg(p: &Prototype, mut last_pc: usize, reg: usize) -> Option<usize> {
    if let Some(op) = p.code[last_pc].opcode() {
        if op.is_mm() {
            // the metamethod instruction was not executed yet
            last_pc = last_pc.saturating_sub(1);
        }
    }
    let mut set_reg = None;
    let mut jmp_target = 0usize;
    for pc in 0..last_pc {
        let i = p.code[pc];
        let Some(op) = i.opcode() else { continue };
        let a = i.a() as usize;
        let change = match op {
            OpCode::LoadNil => a <= reg && reg <= a + i.b() as usize,
            OpCode::TForCall => reg >= a + 2,
            OpCode::Call | OpCode::TailCall => reg >= a,
            OpCode::Jmp => {
                let dest = pc as i64 + 1 + i.sj_arg() as i64;
                if dest <= last_pc as i64 && dest > jmp_target as i64 {
                    jmp_target = dest as usize;
                }
                false
            }
            _ => op.sets_a() && reg == a,
        };
        if change {
            set_reg = filter_pc(pc, jmp_target);
        }
    }
    set_reg
}

/// `global` when the indexed table is `_ENV`, `field` otherwise.
fn gxf(p: &Prototype, pc: usize, i: Instruction, is_up: bool) -> &'static str {
    let t = i.b() as usize;
    let name = if is_up {
        Some(upvalue_name(p, t))
    } else {
        obj_name(p, pc, t).map(|(_, n)| n)
    };
    if name.as_deref() == Some("_ENV") {
        "global"
    } else {
        "field"
    }
}

/// Kind and name of the value in register `reg` at `last_pc`.
fn obj_name(p: &Prototype, last_pc: usize, reg: usize) -> Option<(&'static str, String)> {
    if let Some(name) = p.local_name(reg + 1, last_pc) {
        return Some(("local", lossy(name)));
    }
    let pc = find_set_reg(p, last_pc, reg)?;
    let i = p.code[pc];
    match i.opcode()? {
        OpCode::Move => {
            let b = i.b() as usize;
            if b < i.a() as usize {
                return obj_name(p, pc, b);
            }
            None
        }
        OpCode::GetTabUp => {
            let name = constant_name(p, i.c() as usize);
            Some((gxf(p, pc, i, true), name))
        }
        OpCode::GetTable => {
            let name = register_name(p, pc, i.c() as usize);
            Some((gxf(p, pc, i, false), name))
        }
        OpCode::GetI => Some(("field", "integer index".to_string())),
        OpCode::GetField => {
            let name = constant_name(p, i.c() as usize);
            Some((gxf(p, pc, i, false), name))
        }
        OpCode::GetUpval => Some(("upvalue", upvalue_name(p, i.b() as usize))),
        op @ (OpCode::LoadK | OpCode::LoadKX) => {
            let b = if op == OpCode::LoadK {
                i.bx() as usize
            } else {
                p.code.get(pc + 1)?.ax_arg() as usize
            };
            match p.constants.get(b) {
                Some(Constant::String(s)) => Some(("constant", lossy(s))),
                _ => None,
            }
        }
        OpCode::SelfOp => Some(("method", rk_name(p, pc, i))),
        _ => None,
    }
}

/// Name of the function called by instruction `pc`.
fn func_name_from_code(p: &Prototype, pc: usize) -> Option<(&'static str, String)> {
    let i = *p.code.get(pc)?;
    let tm = match i.opcode()? {
        OpCode::Call | OpCode::TailCall => return obj_name(p, pc, i.a() as usize),
        OpCode::TForCall => return Some(("for iterator", "for iterator".to_string())),
        OpCode::SelfOp
        | OpCode::GetTabUp
        | OpCode::GetTable
        | OpCode::GetI
        | OpCode::GetField => TagMethod::Index,
        OpCode::SetTabUp | OpCode::SetTable | OpCode::SetI | OpCode::SetField => {
            TagMethod::NewIndex
        }
        OpCode::MmBin | OpCode::MmBinI | OpCode::MmBinK => {
            TagMethod::from_index(i.c() as usize)?
        }
        OpCode::Unm => TagMethod::Unm,
        OpCode::BNot => TagMethod::BNot,
        OpCode::Len => TagMethod::Len,
        OpCode::Concat => TagMethod::Concat,
        OpCode::Eq => TagMethod::Eq,
        OpCode::Lt | OpCode::LtI | OpCode::GtI => TagMethod::Lt,
        OpCode::Le | OpCode::LeI | OpCode::GeI => TagMethod::Le,
        OpCode::Close | OpCode::Return => TagMethod::Close,
        _ => return None,
    };
    let name = tm.name().trim_start_matches("__").to_string();
    Some(("metamethod", name))
}

impl State {
    // ========================================================================
    // Frames
    // ========================================================================

    /// Prototype of frame `ci` of thread `th`, when it runs a Lua function.
    pub(crate) fn proto_in(&self, th: ThreadRef, ci: usize) -> Option<Rc<Prototype>> {
        let t = &self.heap.threads[th];
        let c = t.call_infos.get(ci)?;
        if !c.is_lua() {
            return None;
        }
        match t.stack[c.func] {
            Value::LuaClosure(cl) => Some(Rc::clone(self.heap.closure_proto(cl))),
            _ => None,
        }
    }

    /// Prototype of frame `ci` of the running thread.
    pub(crate) fn frame_proto(&self, ci: usize) -> Option<Rc<Prototype>> {
        self.proto_in(self.heap.running, ci)
    }

    fn current_pc(&self, th: ThreadRef, ci: usize) -> usize {
        self.heap.threads[th].call_infos[ci].saved_pc.saturating_sub(1)
    }

    fn current_line_in(&self, th: ThreadRef, ci: usize) -> Option<u32> {
        let p = self.proto_in(th, ci)?;
        p.line_at(self.current_pc(th, ci))
    }

    /// Name and stack slot of local `n` of frame `ci` on thread `th`.
    /// Negative `n` addresses varargs.
    pub(crate) fn find_local_in(&self, th: ThreadRef, ci: usize, n: i32) -> Option<(String, usize)> {
        let t = &self.heap.threads[th];
        let c = &t.call_infos[ci];
        let base = c.func + 1;
        let mut name = None;
        if let Some(p) = self.proto_in(th, ci) {
            if n < 0 {
                if !p.is_vararg {
                    return None;
                }
                let nextra = c.n_extra_args as i64;
                if i64::from(n) >= -nextra {
                    let slot = c.func as i64 - nextra - (i64::from(n) + 1);
                    return Some(("(vararg)".to_string(), slot as usize));
                }
                return None;
            }
            name = p
                .local_name(n as usize, self.current_pc(th, ci))
                .map(lossy);
        }
        let name = match name {
            Some(name) => name,
            None => {
                let limit = if ci == t.ci {
                    t.top
                } else {
                    t.call_infos[ci + 1].func
                };
                if n > 0 && limit - base >= n as usize {
                    if c.is_lua() { "(temporary)" } else { "(C temporary)" }.to_string()
                } else {
                    return None;
                }
            }
        };
        Some((name, base + n as usize - 1))
    }

    /// Local `n` of frame `ci` of the running thread.
    pub(crate) fn find_local(&self, ci: usize, n: i32) -> Option<(String, usize)> {
        self.find_local_in(self.heap.running, ci, n)
    }

    /// Name of the function running in frame `ci`, inferred from how its
    /// caller invoked it.
    fn func_name_from_call(&self, th: ThreadRef, ci: usize) -> Option<(&'static str, String)> {
        let c = &self.heap.threads[th].call_infos[ci];
        if c.callstatus.contains(CallStatus::HOOKED) {
            return Some(("hook", "?".to_string()));
        }
        if c.callstatus.contains(CallStatus::FIN) {
            return Some(("metamethod", "__gc".to_string()));
        }
        let p = self.proto_in(th, ci)?;
        func_name_from_code(&p, self.current_pc(th, ci))
    }

    fn func_name(&self, th: ThreadRef, ci: usize) -> Option<(&'static str, String)> {
        let c = &self.heap.threads[th].call_infos[ci];
        if ci == 0 || c.callstatus.contains(CallStatus::TAIL) {
            return None;
        }
        self.func_name_from_call(th, ci - 1)
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Activation record of the function at `level` of the running thread;
    /// level 0 is the current function.
    pub fn get_stack(&self, level: usize) -> Option<DebugInfo> {
        self.get_thread_stack(self.heap.running, level)
    }

    /// Activation record at `level` of thread `th`.
    pub fn get_thread_stack(&self, th: ThreadRef, level: usize) -> Option<DebugInfo> {
        let ci = self.heap.threads[th].ci;
        if level >= ci {
            return None;
        }
        Some(DebugInfo {
            thread: Some(th),
            ci: Some(ci - level),
            ..DebugInfo::default()
        })
    }

    /// Fills the fields of `ar` selected by `what`: `S` source, `l` current
    /// line, `u` upvalues and parameters, `t` tail call, `n` name, `r`
    /// transfer, `L` active lines (also pushed as a table), `f` pushes the
    /// function. A leading `>` describes the function popped from the
    /// stack instead of an activation. Returns `false` on an unknown option.
    pub fn get_info(&mut self, what: &str, ar: &mut DebugInfo) -> bool {
        let (func, frame, what) = match what.strip_prefix('>') {
            Some(rest) => (self.pop_value(), None, rest),
            None => {
                let th = ar.thread.unwrap_or(self.heap.running);
                let Some(ci) = ar.ci else { return false };
                let f = self.heap.threads[th].stack[self.heap.threads[th].call_infos[ci].func];
                (f, Some((th, ci)), what)
            }
        };
        let proto = match func {
            Value::LuaClosure(cl) => Some(Rc::clone(self.heap.closure_proto(cl))),
            _ => None,
        };
        let mut status = true;
        for option in what.chars() {
            match option {
                'S' => self.func_info(ar, &func, proto.as_deref()),
                'l' => {
                    ar.current_line = frame.and_then(|(th, ci)| self.current_line_in(th, ci));
                }
                'u' => {
                    ar.nups = match func {
                        Value::LuaClosure(cl) => self.heap.lclosures[cl].upvals.len() as u8,
                        Value::NativeClosure(cl) => self.heap.nclosures[cl].upvalues.len() as u8,
                        _ => 0,
                    };
                    match &proto {
                        Some(p) => {
                            ar.is_vararg = p.is_vararg;
                            ar.nparams = p.num_params;
                        }
                        None => {
                            ar.is_vararg = true;
                            ar.nparams = 0;
                        }
                    }
                }
                't' => {
                    ar.is_tail_call = frame.is_some_and(|(th, ci)| {
                        self.heap.threads[th].call_infos[ci]
                            .callstatus
                            .contains(CallStatus::TAIL)
                    });
                }
                'n' => match frame.and_then(|(th, ci)| self.func_name(th, ci)) {
                    Some((kind, name)) => {
                        ar.name_what = kind;
                        ar.name = Some(name);
                    }
                    None => {
                        ar.name_what = "";
                        ar.name = None;
                    }
                },
                'r' => {
                    let transfer = frame.and_then(|(th, ci)| {
                        let c = &self.heap.threads[th].call_infos[ci];
                        c.callstatus
                            .contains(CallStatus::TRAN)
                            .then_some((c.first_transfer, c.n_transfer))
                    });
                    (ar.ftransfer, ar.ntransfer) = transfer.unwrap_or((0, 0));
                }
                'L' | 'f' => {}
                _ => status = false,
            }
        }
        if what.contains('f') {
            self.push_value(func);
        }
        if what.contains('L') {
            match &proto {
                Some(p) => {
                    ar.active_lines = p.active_lines();
                    let t = self.heap.new_table();
                    for &line in &ar.active_lines {
                        self.heap.table_set_int(t, i64::from(line), Value::Boolean(true));
                    }
                    self.push_value(Value::Table(t));
                }
                None => {
                    ar.active_lines.clear();
                    self.push_value(Value::Nil);
                }
            }
        }
        status
    }

    fn func_info(&self, ar: &mut DebugInfo, func: &Value, proto: Option<&Prototype>) {
        match (func, proto) {
            (Value::LuaClosure(_), Some(p)) => {
                let source = p.source.as_deref().unwrap_or(b"=?");
                ar.source = lossy(source);
                ar.short_src = chunk_id(source);
                ar.line_defined = Some(p.line_defined);
                ar.last_line_defined = Some(p.last_line_defined);
                ar.what = if p.line_defined == 0 {
                    FrameKind::Main.as_str()
                } else {
                    FrameKind::Lua.as_str()
                };
            }
            _ => {
                ar.source = "=[C]".to_string();
                ar.short_src = chunk_id(b"=[C]");
                ar.line_defined = None;
                ar.last_line_defined = None;
                ar.what = FrameKind::Native.as_str();
            }
        }
    }

    /// Pushes local `n` of the activation `ar` and returns its name. Without
    /// a record, names parameter `n` of the Lua function on top of the stack
    /// and pushes nothing.
    pub fn get_local(&mut self, ar: Option<&DebugInfo>, n: i32) -> Option<String> {
        let Some(ar) = ar else {
            let top = self.top();
            return match self.stack_get(top - 1) {
                Value::LuaClosure(cl) if n > 0 => self
                    .heap
                    .closure_proto(cl)
                    .local_name(n as usize, 0)
                    .map(lossy),
                _ => None,
            };
        };
        let th = ar.thread.unwrap_or(self.heap.running);
        let (name, slot) = self.find_local_in(th, ar.ci?, n)?;
        let v = self.heap.threads[th].stack[slot];
        self.push_value(v);
        Some(name)
    }

    /// Pops a value into local `n` of activation `ar`, returning its name.
    /// Nothing is popped when there is no such local.
    pub fn set_local(&mut self, ar: &DebugInfo, n: i32) -> Option<String> {
        let th = ar.thread.unwrap_or(self.heap.running);
        let (name, slot) = self.find_local_in(th, ar.ci?, n)?;
        let v = self.pop_value();
        self.heap.threads[th].stack[slot] = v;
        Some(name)
    }

    fn upvalue_slot(&self, f: Value, n: usize) -> Option<(String, UpvalueId)> {
        match f {
            Value::LuaClosure(cl) => {
                let c = &self.heap.lclosures[cl];
                let u = *c.upvals.get(n.checked_sub(1)?)?;
                let name = self
                    .heap
                    .closure_proto(cl)
                    .upvalue_name(n - 1)
                    .map_or_else(|| "(no name)".to_string(), lossy);
                Some((name, UpvalueId::Shared(u)))
            }
            Value::NativeClosure(cl) => {
                let i = n.checked_sub(1)?;
                if i < self.heap.nclosures[cl].upvalues.len() {
                    Some((String::new(), UpvalueId::Native(cl, i)))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Pushes upvalue `n` of the closure at `func_idx` and returns its name
    /// (empty for native closures).
    pub fn get_upvalue(&mut self, func_idx: i32, n: usize) -> Option<String> {
        let f = self.value_at(func_idx);
        let (name, id) = self.upvalue_slot(f, n)?;
        let v = match id {
            UpvalueId::Shared(u) => self.heap.upval_get(u),
            UpvalueId::Native(cl, i) => self.heap.nclosures[cl].upvalues[i],
        };
        self.push_value(v);
        Some(name)
    }

    /// Pops a value into upvalue `n` of the closure at `func_idx`.
    pub fn set_upvalue(&mut self, func_idx: i32, n: usize) -> Option<String> {
        let f = self.value_at(func_idx);
        let (name, id) = self.upvalue_slot(f, n)?;
        let v = self.pop_value();
        match id {
            UpvalueId::Shared(u) => self.heap.upval_set(u, v),
            UpvalueId::Native(cl, i) => {
                self.heap.nclosures[cl].upvalues[i] = v;
                self.heap.barrier_back(GcObjectRef::NativeClosure(cl), v);
            }
        }
        Some(name)
    }

    /// Identity of upvalue `n` of the closure at `func_idx`.
    pub fn upvalue_id(&mut self, func_idx: i32, n: usize) -> Option<UpvalueId> {
        let f = self.value_at(func_idx);
        self.upvalue_slot(f, n).map(|(_, id)| id)
    }

    /// Makes upvalue `n1` of the Lua closure at `f1` refer to upvalue `n2`
    /// of the Lua closure at `f2`.
    pub fn upvalue_join(&mut self, f1: i32, n1: usize, f2: i32, n2: usize) -> LuaResult<()> {
        let (v1, v2) = (self.value_at(f1), self.value_at(f2));
        match (v1, v2) {
            (Value::LuaClosure(c1), Value::LuaClosure(c2))
                if (1..=self.heap.lclosures[c1].upvals.len()).contains(&n1)
                    && (1..=self.heap.lclosures[c2].upvals.len()).contains(&n2) =>
            {
                self.heap.join_upvals(c1, n1 - 1, c2, n2 - 1);
                Ok(())
            }
            _ => Err(self.run_error("invalid upvalue index")),
        }
    }

    // ========================================================================
    // Hooks
    // ========================================================================

    /// Sets the debug hook of the running thread. A missing function or an
    /// empty mask turns hooks off.
    pub fn set_hook(&mut self, f: Option<HookFn>, mask: u8, count: i32) {
        let th = self.heap.running;
        self.set_thread_hook(th, f, mask, count);
    }

    /// Sets the debug hook of thread `th`.
    pub fn set_thread_hook(&mut self, th: ThreadRef, f: Option<HookFn>, mask: u8, count: i32) {
        let (hook, mask) = match f {
            Some(f) if mask != 0 => (Some(self.register_hook(f)), mask),
            _ => (None, 0),
        };
        let t = &mut self.heap.threads[th];
        t.hook = hook;
        t.base_hook_count = count;
        t.hook_count = count;
        t.hook_mask = mask;
        if mask != 0 {
            // running Lua frames must notice the hook
            let ci = t.ci;
            for c in &mut t.call_infos[..=ci] {
                if c.is_lua() {
                    c.trap = true;
                }
            }
        }
    }

    /// Current hook of the running thread.
    pub fn get_hook(&self) -> Option<HookFn> {
        self.thread().hook.map(|id| self.hook_fn(id))
    }

    /// Current hook mask.
    pub fn get_hook_mask(&self) -> u8 {
        self.thread().hook_mask
    }

    /// Current hook count.
    pub fn get_hook_count(&self) -> i32 {
        self.thread().base_hook_count
    }

    /// Calls the hook for `event`. Hooks are disabled while one runs.
    pub(crate) fn call_hook_event(
        &mut self,
        event: HookEvent,
        line: Option<u32>,
        ftransfer: usize,
        ntransfer: usize,
    ) -> LuaResult<()> {
        let Some(id) = self.thread().hook else {
            return Ok(());
        };
        if !self.thread().allow_hook {
            return Ok(());
        }
        let ci = self.ci();
        let mut mask = CallStatus::HOOKED;
        let old_top = self.top();
        let old_ci_top = self.thread().call_infos[ci].top;
        if ntransfer != 0 {
            mask = mask | CallStatus::TRAN;
            let c = &mut self.thread_mut().call_infos[ci];
            c.first_transfer = ftransfer;
            c.n_transfer = ntransfer;
        }
        if self.thread().call_infos[ci].is_lua() && old_top < old_ci_top {
            // protect the whole frame
            self.set_top_raw(old_ci_top);
        }
        self.check_stack(MIN_STACK)?;
        {
            let th = self.thread_mut();
            let top = th.top;
            let c = &mut th.call_infos[ci];
            if c.top < top + MIN_STACK {
                c.top = top + MIN_STACK;
            }
            th.allow_hook = false;
            th.call_infos[ci].callstatus.insert(mask);
        }
        let ar = DebugInfo {
            event: Some(event),
            current_line: line,
            thread: Some(self.heap.running),
            ci: Some(ci),
            ..DebugInfo::default()
        };
        let hook = self.hook_fn(id);
        hook(self, &ar)?;
        let th = self.thread_mut();
        th.allow_hook = true;
        th.call_infos[ci].top = old_ci_top;
        th.top = old_top;
        th.call_infos[ci].callstatus.remove(mask);
        Ok(())
    }

    /// Call hook for a Lua function entering frame `ci`.
    pub(crate) fn hook_call(&mut self, ci: usize) -> LuaResult<()> {
        self.thread_mut().old_pc = 0;
        if self.thread().hook_mask & MASK_CALL != 0 {
            let c = &self.thread().call_infos[ci];
            let event = if c.callstatus.contains(CallStatus::TAIL) {
                HookEvent::TailCall
            } else {
                HookEvent::Call
            };
            let nparams = self.frame_proto(ci).map_or(0, |p| p.num_params as usize);
            // hooks see 'pc' already incremented
            self.thread_mut().call_infos[ci].saved_pc += 1;
            let result = self.call_hook_event(event, None, 1, nparams);
            self.thread_mut().call_infos[ci].saved_pc -= 1;
            result?;
        }
        Ok(())
    }

    /// Line and count hooks before instruction `pc` of frame `ci`. Returns
    /// whether the interpreter must keep trapping.
    pub(crate) fn trace_exec(&mut self, ci: usize, pc: usize, p: &Prototype) -> LuaResult<bool> {
        let mask = self.thread().hook_mask;
        if mask & (MASK_LINE | MASK_COUNT) == 0 {
            self.thread_mut().call_infos[ci].trap = false;
            return Ok(false);
        }
        self.thread_mut().call_infos[ci].saved_pc = pc + 1;
        let count_hook = {
            let th = self.thread_mut();
            th.hook_count -= 1;
            let fire = th.hook_count == 0 && mask & MASK_COUNT != 0;
            if fire {
                th.hook_count = th.base_hook_count;
            }
            fire
        };
        if !count_hook && mask & MASK_LINE == 0 {
            return Ok(true);
        }
        {
            let c = &mut self.thread_mut().call_infos[ci];
            if c.callstatus.contains(CallStatus::HOOKYIELD) {
                c.callstatus.remove(CallStatus::HOOKYIELD);
                return Ok(true);
            }
        }
        let uses_top = p.code[pc]
            .opcode()
            .is_some_and(|op| op.uses_top() && p.code[pc].b() == 0);
        if !uses_top {
            let top = self.thread().call_infos[ci].top;
            self.set_top_raw(top);
        }
        if count_hook {
            self.call_hook_event(HookEvent::Count, None, 0, 0)?;
        }
        if mask & MASK_LINE != 0 {
            let old_pc = self.thread().old_pc;
            let old_pc = if old_pc < p.code.len() { old_pc } else { 0 };
            if pc <= old_pc || p.line_at(old_pc) != p.line_at(pc) {
                let line = p.line_at(pc);
                self.call_hook_event(HookEvent::Line, line, 0, 0)?;
            }
            self.thread_mut().old_pc = pc;
        }
        Ok(true)
    }

    // ========================================================================
    // Error messages
    // ========================================================================

    fn var_info(&self, site: VarSite) -> String {
        let ci = self.ci();
        let Some(p) = self.frame_proto(ci) else {
            return String::new();
        };
        let c = &self.thread().call_infos[ci];
        let found = match site {
            VarSite::Upvalue(i) => Some(("upvalue", upvalue_name(&p, i))),
            VarSite::Stack(slot) if slot > c.func && slot < c.top => {
                obj_name(&p, c.saved_pc.saturating_sub(1), slot - c.func - 1)
            }
            _ => None,
        };
        format_varinfo(found)
    }

    fn type_error_extra(&mut self, v: Value, op: &str, extra: String) -> LuaError {
        let t = self.obj_type_name(&v);
        self.run_error(format!("attempt to {} a {} value{}", op, t, extra))
    }

    /// "attempt to `op` a `type` value", naming the variable at `site`.
    pub(crate) fn type_error(&mut self, v: Value, site: VarSite, op: &str) -> LuaError {
        let extra = self.var_info(site);
        self.type_error_extra(v, op, extra)
    }

    /// Error for calling the non-callable value at stack slot `func`.
    pub(crate) fn call_error(&mut self, func: usize) -> LuaError {
        let v = self.stack_get(func);
        let extra = match self.func_name_from_call(self.heap.running, self.ci()) {
            Some(found) => format_varinfo(Some(found)),
            None => self.var_info(VarSite::Stack(func)),
        };
        self.type_error_extra(v, "call", extra)
    }

    /// Error for concatenating a value that is neither string nor number.
    pub(crate) fn concat_error(&mut self, p1: Value, p2: Value, s1: VarSite, s2: VarSite) -> LuaError {
        if p1.is_number() || matches!(p1, Value::String(_)) {
            self.type_error(p2, s2, "concatenate")
        } else {
            self.type_error(p1, s1, "concatenate")
        }
    }

    /// Error for an arithmetic or bitwise operand of the wrong type.
    pub(crate) fn op_int_error(
        &mut self,
        p1: Value,
        p2: Value,
        s1: VarSite,
        s2: VarSite,
        msg: &str,
    ) -> LuaError {
        if p1.is_number() {
            self.type_error(p2, s2, msg)
        } else {
            self.type_error(p1, s1, msg)
        }
    }

    /// Error for a bitwise operand without an integer representation.
    pub(crate) fn to_int_error(&mut self, p1: Value, _p2: Value, s1: VarSite, s2: VarSite) -> LuaError {
        let site = if crate::vm::to_integer_ns(&p1).is_none() {
            s1
        } else {
            s2
        };
        let extra = self.var_info(site);
        self.run_error(format!("number{} has no integer representation", extra))
    }

    /// Error for comparing values without an order.
    pub(crate) fn order_error(&mut self, p1: Value, p2: Value) -> LuaError {
        let t1 = self.obj_type_name(&p1);
        let t2 = self.obj_type_name(&p2);
        if t1 == t2 {
            self.run_error(format!("attempt to compare two {} values", t1))
        } else {
            self.run_error(format!("attempt to compare {} with {}", t1, t2))
        }
    }

    /// Error for a non-numeric `for` loop control value.
    pub(crate) fn for_error(&mut self, v: Value, what: &str) -> LuaError {
        let t = self.obj_type_name(&v);
        self.run_error(format!("bad 'for' {} (number expected, got {})", what, t))
    }
}
