//! Incremental and generational mark-and-sweep collector.
//!
//! The collector is a tri-color marker interleaved with the mutator. In
//! incremental mode a cycle runs through the phases
//!
//! ```text
//! Pause -> Propagate -> EnterAtomic -> Sweep -> SweepEnd -> CallFin -> Pause
//! ```
//!
//! doing a bounded amount of work per step. In generational mode objects
//! carry an [`Age`]; minor collections only trace young objects plus the old
//! ones touched since the last cycle, and a major (full) collection runs when
//! memory grows past a threshold.
//!
//! The collector only runs at safe points chosen by the interpreter, so every
//! live value is reachable from a root: the registry, the main and running
//! threads (their stacks), the per-type metatables and the objects waiting
//! for finalization.
//!
//! Finalizers are Lua calls and therefore run by the interpreter. The
//! collector moves unreachable finalizable objects to a queue (resurrecting
//! them for one more cycle) and reports when the queue should be drained.

use crate::arena::{Age, GcHeader};
use crate::heap::Heap;
use crate::object::Upval;
use crate::table::Node;
use core_types::{GcObjectRef, TableRef, TagMethod, ThreadRef, UserdataRef, Value};
use std::collections::VecDeque;
use tracing::debug;

/// Objects swept per step.
const GCSWEEPMAX: usize = 100;
/// Finalizers run per step.
pub const GCFINMAX: usize = 10;
/// Work charged per finalizer.
pub const GCFINALIZECOST: usize = 50;
/// Bytes allocated per unit of collector work.
const WORK2MEM: isize = std::mem::size_of::<Value>() as isize;
/// Divisor of the pause parameter.
const PAUSEADJ: usize = 100;

/// Collector phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GcPhase {
    /// Marking gray objects
    Propagate,
    /// Marking done; the atomic step comes next
    EnterAtomic,
    /// Inside the atomic step
    Atomic,
    /// Sweeping the arenas
    Sweep,
    /// Sweep finished
    SweepEnd,
    /// Calling pending finalizers
    CallFin,
    /// Between cycles
    Pause,
}

/// Collector mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcKind {
    /// Incremental cycles
    Incremental,
    /// Minor/major generational collections
    Generational,
}

/// Tuning parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcParams {
    /// Memory growth (percent) before a new cycle starts
    pub pause: usize,
    /// Collector speed relative to allocation (percent)
    pub step_mul: usize,
    /// Log2 of the bytes allocated between steps
    pub step_size: u32,
    /// Young growth (percent) that triggers a minor collection
    pub gen_minor_mul: usize,
    /// Total growth (percent) that triggers a major collection
    pub gen_major_mul: usize,
}

impl Default for GcParams {
    fn default() -> Self {
        Self {
            pause: 200,
            step_mul: 100,
            step_size: 13,
            gen_minor_mul: 20,
            gen_major_mul: 100,
        }
    }
}

/// What the interpreter must do after a collector step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing
    Done,
    /// Run up to this many pending finalizers
    RunFinalizers(usize),
}

enum Step {
    Work(usize),
    Finalize,
}

#[derive(Debug, Clone, Copy, Default)]
struct SweepCursor {
    kind: usize,
    index: u32,
}

const SWEEP_KINDS: usize = 8;

/// Collector bookkeeping.
#[derive(Debug)]
pub struct GcState {
    pub(crate) current_white: u8,
    pub(crate) phase: GcPhase,
    pub(crate) kind: GcKind,
    gray: Vec<GcObjectRef>,
    grayagain: Vec<GcObjectRef>,
    weak: Vec<TableRef>,
    ephemeron: Vec<TableRef>,
    allweak: Vec<TableRef>,
    pub(crate) finobj: Vec<GcObjectRef>,
    pub(crate) tobefnz: VecDeque<GcObjectRef>,
    sweep: SweepCursor,
    total: usize,
    debt: isize,
    estimate: usize,
    last_atomic: usize,
    /// Params in effect
    pub params: GcParams,
    /// Running an emergency collection (no finalizers, no shrinking)
    pub emergency: bool,
    /// Stopped by the host
    pub stopped_by_user: bool,
    /// Stopped while a finalizer runs
    pub stopped_internally: bool,
    /// The runtime is shutting down
    pub closing: bool,
}

impl GcState {
    pub(crate) fn new(params: GcParams) -> Self {
        Self {
            current_white: 0,
            phase: GcPhase::Pause,
            kind: GcKind::Incremental,
            gray: Vec::new(),
            grayagain: Vec::new(),
            weak: Vec::new(),
            ephemeron: Vec::new(),
            allweak: Vec::new(),
            finobj: Vec::new(),
            tobefnz: VecDeque::new(),
            sweep: SweepCursor::default(),
            total: 0,
            debt: 0,
            estimate: 0,
            last_atomic: 0,
            params,
            emergency: false,
            stopped_by_user: false,
            stopped_internally: false,
            closing: false,
        }
    }

    /// Header for an object allocated now.
    pub(crate) fn new_header(&self) -> GcHeader {
        GcHeader::new(self.current_white)
    }

    pub(crate) fn account_alloc(&mut self, bytes: usize) {
        self.total += bytes;
        self.debt += bytes as isize;
    }

    pub(crate) fn account_free(&mut self, bytes: usize) {
        self.total = self.total.saturating_sub(bytes);
        self.debt -= bytes as isize;
    }

    pub(crate) fn account_delta(&mut self, delta: isize) {
        if delta >= 0 {
            self.account_alloc(delta as usize);
        } else {
            self.account_free(delta.unsigned_abs());
        }
    }

    /// Overrides the allocation debt; a step is due once it is positive.
    pub fn set_debt(&mut self, debt: isize) {
        self.debt = debt;
    }

    /// Bytes currently allocated.
    pub fn total_bytes(&self) -> usize {
        self.total
    }

    /// Allocation debt; a step is due when positive.
    pub fn debt(&self) -> isize {
        self.debt
    }

    /// Current phase.
    pub fn phase(&self) -> GcPhase {
        self.phase
    }

    /// Current mode.
    pub fn kind(&self) -> GcKind {
        self.kind
    }

    /// Whether the collector behaves generationally. After a major
    /// collection that freed too little the mode is temporarily incremental
    /// but still counts as generational.
    pub fn is_generational(&self) -> bool {
        self.kind == GcKind::Generational || self.last_atomic != 0
    }

    /// Whether the collector may run.
    pub fn is_running(&self) -> bool {
        !self.stopped_by_user && !self.stopped_internally && !self.closing
    }

    /// Objects waiting for their finalizer.
    pub fn pending_finalizers(&self) -> usize {
        self.tobefnz.len()
    }

    fn keep_invariant(&self) -> bool {
        self.phase <= GcPhase::Atomic
    }

    fn is_sweep_phase(&self) -> bool {
        matches!(self.phase, GcPhase::Sweep | GcPhase::SweepEnd)
    }

    /// Postpones the next cycle until memory grows by `pause` percent.
    fn set_pause(&mut self) {
        let estimate = (self.estimate / PAUSEADJ).max(1);
        let threshold = estimate.saturating_mul(self.params.pause);
        let debt = self.total as isize - threshold.min(isize::MAX as usize) as isize;
        self.set_debt(debt.min(0));
    }

    fn set_minor_debt(&mut self) {
        let debt = (self.total / 100) * self.params.gen_minor_mul;
        self.set_debt(-(debt as isize));
    }
}

impl Heap {
    // ========================================================================
    // Object dispatch
    // ========================================================================

    pub(crate) fn header(&self, o: GcObjectRef) -> &GcHeader {
        match o {
            GcObjectRef::String(r) => self.strings.header(r),
            GcObjectRef::Table(r) => self.tables.header(r),
            GcObjectRef::LuaClosure(r) => self.lclosures.header(r),
            GcObjectRef::NativeClosure(r) => self.nclosures.header(r),
            GcObjectRef::Upval(r) => self.upvals.header(r),
            GcObjectRef::Proto(r) => self.protos.header(r),
            GcObjectRef::Userdata(r) => self.userdata.header(r),
            GcObjectRef::Thread(r) => self.threads.header(r),
        }
    }

    pub(crate) fn header_mut(&mut self, o: GcObjectRef) -> &mut GcHeader {
        match o {
            GcObjectRef::String(r) => self.strings.header_mut(r),
            GcObjectRef::Table(r) => self.tables.header_mut(r),
            GcObjectRef::LuaClosure(r) => self.lclosures.header_mut(r),
            GcObjectRef::NativeClosure(r) => self.nclosures.header_mut(r),
            GcObjectRef::Upval(r) => self.upvals.header_mut(r),
            GcObjectRef::Proto(r) => self.protos.header_mut(r),
            GcObjectRef::Userdata(r) => self.userdata.header_mut(r),
            GcObjectRef::Thread(r) => self.threads.header_mut(r),
        }
    }

    fn ref_at(&self, kind: usize, index: u32) -> Option<GcObjectRef> {
        match kind {
            0 => self.strings.ref_at(index).map(GcObjectRef::String),
            1 => self.tables.ref_at(index).map(GcObjectRef::Table),
            2 => self.lclosures.ref_at(index).map(GcObjectRef::LuaClosure),
            3 => self.nclosures.ref_at(index).map(GcObjectRef::NativeClosure),
            4 => self.upvals.ref_at(index).map(GcObjectRef::Upval),
            5 => self.protos.ref_at(index).map(GcObjectRef::Proto),
            6 => self.userdata.ref_at(index).map(GcObjectRef::Userdata),
            _ => self.threads.ref_at(index).map(GcObjectRef::Thread),
        }
    }

    fn capacity_of(&self, kind: usize) -> u32 {
        match kind {
            0 => self.strings.capacity(),
            1 => self.tables.capacity(),
            2 => self.lclosures.capacity(),
            3 => self.nclosures.capacity(),
            4 => self.upvals.capacity(),
            5 => self.protos.capacity(),
            6 => self.userdata.capacity(),
            _ => self.threads.capacity(),
        }
    }

    fn all_objects(&self) -> Vec<GcObjectRef> {
        (0..SWEEP_KINDS)
            .flat_map(|kind| (0..self.capacity_of(kind)).filter_map(move |i| self.ref_at(kind, i)))
            .collect()
    }

    /// Frees an object, returning the bytes released.
    fn free_object(&mut self, o: GcObjectRef) -> usize {
        match o {
            GcObjectRef::String(r) => {
                if self.strings[r].is_short() {
                    self.unlink_string(r);
                }
                self.strings.remove(r).map_or(0, |s| s.heap_size())
            }
            GcObjectRef::Table(r) => self.tables.remove(r).map_or(0, |t| t.heap_size()),
            GcObjectRef::LuaClosure(r) => self.lclosures.remove(r).map_or(0, |c| c.heap_size()),
            GcObjectRef::NativeClosure(r) => self.nclosures.remove(r).map_or(0, |c| c.heap_size()),
            GcObjectRef::Upval(r) => {
                if let Upval::Open { thread, .. } = self.upvals[r] {
                    if let Some(th) = self.threads.get_mut(thread) {
                        th.open_upvals.retain(|u| *u != r);
                    }
                }
                self.upvals.remove(r).map_or(0, |_| std::mem::size_of::<Upval>())
            }
            GcObjectRef::Proto(r) => self.protos.remove(r).map_or(0, |p| p.heap_size()),
            GcObjectRef::Userdata(r) => self.userdata.remove(r).map_or(0, |u| u.heap_size()),
            GcObjectRef::Thread(r) => {
                self.close_dead_thread_upvals(r);
                self.threads.remove(r).map_or(0, |t| t.heap_size())
            }
        }
    }

    fn close_dead_thread_upvals(&mut self, th: ThreadRef) {
        let open = std::mem::take(&mut self.threads[th].open_upvals);
        for u in open {
            if let Some(Upval::Open { level, .. }) = self.upvals.get(u).copied() {
                let v = self.threads[th].stack[level];
                self.upvals[u] = Upval::Closed(v);
                if self.upvals.header(u).is_gray() {
                    self.upvals.header_mut(u).set_black();
                }
            }
        }
    }

    // ========================================================================
    // Marking
    // ========================================================================

    pub(crate) fn mark_value(&mut self, v: Value) {
        if let Some(o) = v.as_gc() {
            self.mark_object(o);
        }
    }

    pub(crate) fn mark_object(&mut self, o: GcObjectRef) {
        if self.header(o).is_white() {
            self.really_mark(o);
        }
    }

    fn value_is_white(&self, v: &Value) -> bool {
        v.as_gc().is_some_and(|o| self.header(o).is_white())
    }

    pub(crate) fn really_mark(&mut self, o: GcObjectRef) {
        match o {
            GcObjectRef::String(s) => self.strings.header_mut(s).set_black(),
            GcObjectRef::Upval(u) => {
                if self.upval_is_open(u) {
                    self.upvals.header_mut(u).set_gray();
                } else {
                    self.upvals.header_mut(u).set_black();
                }
                let v = self.upval_get(u);
                self.mark_value(v);
            }
            GcObjectRef::Userdata(u) if self.userdata[u].user_values.is_empty() => {
                let mt = self.userdata[u].metatable;
                self.userdata.header_mut(u).set_black();
                if let Some(mt) = mt {
                    self.mark_object(GcObjectRef::Table(mt));
                }
            }
            _ => {
                self.header_mut(o).set_gray();
                self.gc.gray.push(o);
            }
        }
    }

    pub(crate) fn link_grayagain(&mut self, o: GcObjectRef) {
        self.header_mut(o).set_gray();
        self.gc.grayagain.push(o);
    }

    fn mark_metatables(&mut self) {
        for mt in self.type_metatables.into_iter().flatten() {
            self.mark_object(GcObjectRef::Table(mt));
        }
    }

    fn mark_being_finalized(&mut self) -> usize {
        let pending: Vec<GcObjectRef> = self.gc.tobefnz.iter().copied().collect();
        for o in &pending {
            self.mark_object(*o);
        }
        pending.len()
    }

    fn restart_collection(&mut self) {
        self.clear_gray_lists();
        self.mark_object(GcObjectRef::Thread(self.main_thread));
        self.mark_object(GcObjectRef::Table(self.registry));
        self.mark_metatables();
        self.mark_being_finalized();
    }

    fn clear_gray_lists(&mut self) {
        self.gc.gray.clear();
        self.gc.grayagain.clear();
        self.gc.weak.clear();
        self.gc.allweak.clear();
        self.gc.ephemeron.clear();
    }

    // ========================================================================
    // Traversal
    // ========================================================================

    fn gen_link(&mut self, o: GcObjectRef) {
        match self.header(o).age() {
            Age::Touched1 => self.link_grayagain(o),
            Age::Touched2 => self.header_mut(o).set_age(Age::Old),
            _ => {}
        }
    }

    fn weak_mode(&mut self, t: TableRef) -> (bool, bool) {
        let mt = match self.tables[t].metatable {
            Some(mt) => mt,
            None => return (false, false),
        };
        match self.fast_tm(mt, TagMethod::Mode) {
            Some(Value::String(s)) if self.strings[s].is_short() => {
                let mode = self.strings[s].as_bytes();
                (mode.contains(&b'k'), mode.contains(&b'v'))
            }
            _ => (false, false),
        }
    }

    /// Strings are values: they are marked and never cleared.
    fn is_cleared(&mut self, v: Value) -> bool {
        match v.as_gc() {
            None => false,
            Some(GcObjectRef::String(s)) => {
                self.mark_object(GcObjectRef::String(s));
                false
            }
            Some(o) => self.header(o).is_white(),
        }
    }

    fn is_cleared_key(&mut self, n: &Node) -> bool {
        !n.dead && self.is_cleared(n.key)
    }

    fn traverse_table(&mut self, t: TableRef) -> usize {
        let (weak_key, weak_value) = self.weak_mode(t);
        if let Some(mt) = self.tables[t].metatable {
            self.mark_object(GcObjectRef::Table(mt));
        }
        match (weak_key, weak_value) {
            (false, false) => self.traverse_strong_table(t),
            (false, true) => self.traverse_weak_value(t),
            (true, false) => {
                self.traverse_ephemeron(t, false);
            }
            (true, true) => {
                self.tables.header_mut(t).set_gray();
                self.gc.allweak.push(t);
            }
        }
        let table = &self.tables[t];
        1 + table.array_size() + 2 * table.node_size()
    }

    fn traverse_strong_table(&mut self, t: TableRef) {
        let array = std::mem::take(&mut self.tables[t].array);
        for v in &array {
            self.mark_value(*v);
        }
        self.tables[t].array = array;
        let mut nodes = std::mem::take(&mut self.tables[t].node);
        for n in nodes.iter_mut() {
            if n.val.is_nil() {
                clear_key(n);
            } else {
                self.mark_value(n.key);
                self.mark_value(n.val);
            }
        }
        self.tables[t].node = nodes;
        self.gen_link(GcObjectRef::Table(t));
    }

    fn traverse_weak_value(&mut self, t: TableRef) {
        let mut has_clears = self.tables[t].array_size() > 0;
        let mut nodes = std::mem::take(&mut self.tables[t].node);
        for n in nodes.iter_mut() {
            if n.val.is_nil() {
                clear_key(n);
            } else {
                self.mark_value(n.key);
                if !has_clears && self.is_cleared(n.val) {
                    has_clears = true;
                }
            }
        }
        self.tables[t].node = nodes;
        self.tables.header_mut(t).set_gray();
        if self.gc.phase == GcPhase::Atomic && has_clears {
            self.gc.weak.push(t);
        } else {
            self.gc.grayagain.push(GcObjectRef::Table(t));
        }
    }

    /// Marks values whose keys are marked; returns whether anything was
    /// marked. `inverse` traverses the hash part backwards.
    fn traverse_ephemeron(&mut self, t: TableRef, inverse: bool) -> bool {
        let mut marked = false;
        let mut has_clears = false;
        let mut has_white_white = false;
        let array = std::mem::take(&mut self.tables[t].array);
        for v in &array {
            if self.value_is_white(v) {
                marked = true;
                self.mark_value(*v);
            }
        }
        self.tables[t].array = array;
        let mut nodes = std::mem::take(&mut self.tables[t].node);
        let size = nodes.len();
        for i in 0..size {
            let n = &mut nodes[if inverse { size - 1 - i } else { i }];
            if n.val.is_nil() {
                clear_key(n);
            } else if self.is_cleared_key(n) {
                has_clears = true;
                if self.value_is_white(&n.val) {
                    has_white_white = true;
                }
            } else if self.value_is_white(&n.val) {
                marked = true;
                self.mark_value(n.val);
            }
        }
        self.tables[t].node = nodes;
        if self.gc.phase == GcPhase::Propagate {
            self.link_grayagain(GcObjectRef::Table(t));
        } else if has_white_white {
            self.tables.header_mut(t).set_gray();
            self.gc.ephemeron.push(t);
        } else if has_clears {
            self.tables.header_mut(t).set_gray();
            self.gc.allweak.push(t);
        } else {
            self.gen_link(GcObjectRef::Table(t));
        }
        marked
    }

    fn traverse_userdata(&mut self, u: UserdataRef) -> usize {
        let (mt, values) = {
            let ud = &self.userdata[u];
            (ud.metatable, ud.user_values.clone())
        };
        if let Some(mt) = mt {
            self.mark_object(GcObjectRef::Table(mt));
        }
        for v in &values {
            self.mark_value(*v);
        }
        self.gen_link(GcObjectRef::Userdata(u));
        1 + values.len()
    }

    fn traverse_thread(&mut self, th: ThreadRef) -> usize {
        if self.threads.header(th).age().is_old() || self.gc.phase == GcPhase::Propagate {
            self.link_grayagain(GcObjectRef::Thread(th));
        }
        let open = self.threads[th].open_upvals.clone();
        for u in open {
            self.mark_object(GcObjectRef::Upval(u));
        }
        let mut stack = std::mem::take(&mut self.threads[th].stack);
        let top = self.threads[th].top.min(stack.len());
        for v in &stack[..top] {
            self.mark_value(*v);
        }
        let size = stack.len();
        if self.gc.phase == GcPhase::Atomic {
            for v in &mut stack[top..] {
                *v = Value::Nil;
            }
        }
        self.threads[th].stack = stack;
        if self.gc.phase != GcPhase::Atomic && !self.gc.emergency {
            self.shrink_stack(th);
        }
        1 + size
    }

    fn propagate_mark(&mut self) -> usize {
        let o = match self.gc.gray.pop() {
            Some(o) => o,
            None => return 0,
        };
        self.header_mut(o).set_black();
        match o {
            GcObjectRef::Table(t) => self.traverse_table(t),
            GcObjectRef::Userdata(u) => self.traverse_userdata(u),
            GcObjectRef::LuaClosure(c) => {
                let (proto, upvals) = {
                    let cl = &self.lclosures[c];
                    (cl.proto, cl.upvals.clone())
                };
                self.mark_object(GcObjectRef::Proto(proto));
                for u in &upvals {
                    self.mark_object(GcObjectRef::Upval(*u));
                }
                1 + upvals.len()
            }
            GcObjectRef::NativeClosure(c) => {
                let upvalues = self.nclosures[c].upvalues.clone();
                for v in &upvalues {
                    self.mark_value(*v);
                }
                1 + upvalues.len()
            }
            GcObjectRef::Proto(p) => {
                let (source, constants, children) = {
                    let proto = &self.protos[p];
                    (proto.source, proto.constants.clone(), proto.children.clone())
                };
                if let Some(s) = source {
                    self.mark_object(GcObjectRef::String(s));
                }
                for k in &constants {
                    self.mark_value(*k);
                }
                for c in &children {
                    self.mark_object(GcObjectRef::Proto(*c));
                }
                1 + constants.len() + children.len()
            }
            GcObjectRef::Thread(th) => self.traverse_thread(th),
            GcObjectRef::String(_) | GcObjectRef::Upval(_) => 1,
        }
    }

    fn propagate_all(&mut self) -> usize {
        let mut work = 0;
        while !self.gc.gray.is_empty() {
            work += self.propagate_mark();
        }
        work
    }

    /// Traverses ephemeron tables until no more values get marked.
    fn converge_ephemerons(&mut self) {
        let mut inverse = false;
        loop {
            let tables = std::mem::take(&mut self.gc.ephemeron);
            let mut changed = false;
            for t in tables {
                self.tables.header_mut(t).set_black();
                if self.traverse_ephemeron(t, inverse) {
                    self.propagate_all();
                    changed = true;
                }
            }
            inverse = !inverse;
            if !changed {
                break;
            }
        }
    }

    /// Marks the values of open upvalues whose thread is not marked.
    fn remark_upvals(&mut self) -> usize {
        let mut work = 0;
        let threads: Vec<ThreadRef> = self
            .threads
            .iter()
            .filter(|(_, e)| e.header.is_white() && !e.value.open_upvals.is_empty())
            .map(|(r, _)| r)
            .collect();
        for th in threads {
            work += 1;
            for u in self.threads[th].open_upvals.clone() {
                work += 1;
                if !self.upvals.header(u).is_white() {
                    let v = self.upval_get(u);
                    self.mark_value(v);
                }
            }
        }
        work
    }

    // ========================================================================
    // Weak table clearing
    // ========================================================================

    fn clear_by_keys(&mut self, tables: &[TableRef]) {
        for &t in tables {
            let mut nodes = std::mem::take(&mut self.tables[t].node);
            for n in nodes.iter_mut() {
                if self.is_cleared_key(n) {
                    n.val = Value::Nil;
                }
                if n.val.is_nil() {
                    clear_key(n);
                }
            }
            self.tables[t].node = nodes;
        }
    }

    fn clear_by_values(&mut self, tables: &[TableRef]) {
        for &t in tables {
            let mut array = std::mem::take(&mut self.tables[t].array);
            for v in array.iter_mut() {
                if self.is_cleared(*v) {
                    *v = Value::Nil;
                }
            }
            self.tables[t].array = array;
            let mut nodes = std::mem::take(&mut self.tables[t].node);
            for n in nodes.iter_mut() {
                if self.is_cleared(n.val) {
                    n.val = Value::Nil;
                }
                if n.val.is_nil() {
                    clear_key(n);
                }
            }
            self.tables[t].node = nodes;
        }
    }

    // ========================================================================
    // Finalization
    // ========================================================================

    /// Registers `o` for finalization if `mt` has a `__gc` field.
    pub fn check_finalizer(&mut self, o: GcObjectRef, mt: TableRef) {
        if self.header(o).is_finalizable()
            || self.gc.closing
            || self.fast_tm(mt, TagMethod::Gc).is_none()
        {
            return;
        }
        if self.gc.is_sweep_phase() {
            let white = self.gc.current_white;
            self.header_mut(o).make_white(white);
        }
        self.header_mut(o).finobj = true;
        self.gc.finobj.push(o);
    }

    /// Moves unreachable finalizable objects (all of them when `all`) to
    /// the finalization queue, newest first.
    fn separate_to_be_finalized(&mut self, all: bool) {
        let mut keep = Vec::with_capacity(self.gc.finobj.len());
        let finobj = std::mem::take(&mut self.gc.finobj);
        for &o in finobj.iter().rev() {
            if !self.contains(o) {
                continue;
            }
            if all || self.header(o).is_white() {
                self.gc.tobefnz.push_back(o);
            } else {
                keep.push(o);
            }
        }
        keep.reverse();
        self.gc.finobj = keep;
    }

    /// Queues every finalizable object, for shutdown.
    pub fn separate_all_finalizers(&mut self) {
        self.separate_to_be_finalized(true);
    }

    /// Takes the next object to finalize, making it an ordinary object again.
    pub fn take_finalizable(&mut self) -> Option<Value> {
        while let Some(o) = self.gc.tobefnz.pop_front() {
            if !self.contains(o) {
                continue;
            }
            let white = self.gc.current_white;
            let sweeping = self.gc.is_sweep_phase();
            let header = self.header_mut(o);
            header.finobj = false;
            if sweeping {
                header.make_white(white);
            }
            return o.into();
        }
        None
    }

    // ========================================================================
    // Incremental cycle
    // ========================================================================

    fn atomic(&mut self) -> usize {
        let grayagain = std::mem::take(&mut self.gc.grayagain);
        self.gc.phase = GcPhase::Atomic;
        let mut work = 0;
        self.mark_object(GcObjectRef::Thread(self.running));
        self.mark_object(GcObjectRef::Table(self.registry));
        self.mark_metatables();
        work += self.propagate_all();
        work += self.remark_upvals();
        work += self.propagate_all();
        for o in grayagain {
            if self.contains(o) {
                self.gc.gray.push(o);
            }
        }
        work += self.propagate_all();
        self.converge_ephemerons();
        let weak = self.gc.weak.clone();
        let allweak = self.gc.allweak.clone();
        self.clear_by_values(&weak);
        self.clear_by_values(&allweak);
        let (orig_weak, orig_all) = (weak.len(), allweak.len());
        self.separate_to_be_finalized(false);
        work += self.mark_being_finalized();
        work += self.propagate_all();
        self.converge_ephemerons();
        let ephemeron = self.gc.ephemeron.clone();
        let allweak = self.gc.allweak.clone();
        self.clear_by_keys(&ephemeron);
        self.clear_by_keys(&allweak);
        let weak = self.gc.weak[orig_weak.min(self.gc.weak.len())..].to_vec();
        let resurrected_all = allweak[orig_all.min(allweak.len())..].to_vec();
        self.clear_by_values(&weak);
        self.clear_by_values(&resurrected_all);
        self.gc.current_white ^= 1;
        work
    }

    fn enter_sweep(&mut self) {
        self.gc.phase = GcPhase::Sweep;
        self.gc.sweep = SweepCursor::default();
    }

    /// Sweeps up to `max` slots; returns the count and whether the sweep is
    /// complete.
    fn sweep_step(&mut self, max: usize) -> (usize, bool) {
        let white = self.gc.current_white;
        let mut count = 0;
        while count < max {
            let SweepCursor { kind, index } = self.gc.sweep;
            if kind >= SWEEP_KINDS {
                return (count, true);
            }
            if index >= self.capacity_of(kind) {
                self.gc.sweep = SweepCursor {
                    kind: kind + 1,
                    index: 0,
                };
                continue;
            }
            self.gc.sweep.index += 1;
            if let Some(o) = self.ref_at(kind, index) {
                count += 1;
                if self.header(o).is_dead(white) {
                    let freed = self.free_object(o);
                    self.gc.account_free(freed);
                    self.gc.estimate = self.gc.estimate.saturating_sub(freed);
                } else {
                    let header = self.header_mut(o);
                    header.make_white(white);
                    header.set_age(Age::New);
                }
            }
        }
        (count, self.gc.sweep.kind >= SWEEP_KINDS)
    }

    fn check_sizes(&mut self) {
        if !self.gc.emergency {
            self.shrink_string_table();
        }
    }

    fn single_step(&mut self) -> Step {
        match self.gc.phase {
            GcPhase::Pause => {
                self.restart_collection();
                self.gc.phase = GcPhase::Propagate;
                Step::Work(1)
            }
            GcPhase::Propagate => {
                if self.gc.gray.is_empty() {
                    self.gc.phase = GcPhase::EnterAtomic;
                    Step::Work(0)
                } else {
                    Step::Work(self.propagate_mark())
                }
            }
            GcPhase::EnterAtomic | GcPhase::Atomic => {
                let work = self.atomic();
                self.enter_sweep();
                self.gc.estimate = self.gc.total;
                debug!(work, "collector atomic phase finished");
                Step::Work(work)
            }
            GcPhase::Sweep => {
                let (count, done) = self.sweep_step(GCSWEEPMAX);
                if done {
                    self.gc.phase = GcPhase::SweepEnd;
                }
                Step::Work(count)
            }
            GcPhase::SweepEnd => {
                self.check_sizes();
                self.gc.phase = GcPhase::CallFin;
                Step::Work(0)
            }
            GcPhase::CallFin => {
                if !self.gc.tobefnz.is_empty() && !self.gc.emergency {
                    Step::Finalize
                } else {
                    self.gc.phase = GcPhase::Pause;
                    debug!(total = self.gc.total, "collection cycle finished");
                    Step::Work(0)
                }
            }
        }
    }

    /// Steps until the collector reaches `phase`. Pending finalizers stay
    /// queued for the interpreter.
    pub fn run_until(&mut self, phase: GcPhase) {
        while self.gc.phase != phase {
            if let Step::Finalize = self.single_step() {
                self.gc.phase = GcPhase::Pause;
            }
        }
    }

    fn incremental_step(&mut self) -> StepOutcome {
        let step_mul = (self.gc.params.step_mul | 1) as isize;
        let mut debt = (self.gc.debt / WORK2MEM) * step_mul;
        let step_size = if self.gc.params.step_size < isize::BITS - 2 {
            ((1isize << self.gc.params.step_size) / WORK2MEM) * step_mul
        } else {
            isize::MAX
        };
        let mut outcome = StepOutcome::Done;
        loop {
            match self.single_step() {
                Step::Work(work) => debt -= work as isize,
                Step::Finalize => {
                    debt -= (GCFINMAX * GCFINALIZECOST) as isize;
                    outcome = StepOutcome::RunFinalizers(GCFINMAX);
                    break;
                }
            }
            if debt <= -step_size || self.gc.phase == GcPhase::Pause {
                break;
            }
        }
        if self.gc.phase == GcPhase::Pause {
            self.gc.set_pause();
        } else {
            self.gc.set_debt((debt / step_mul) * WORK2MEM);
        }
        outcome
    }

    /// Performs one step of collection, as paced by the allocation debt.
    pub fn step(&mut self) -> StepOutcome {
        if !self.gc.is_running() {
            self.gc.set_debt(-2000);
            return StepOutcome::Done;
        }
        if self.gc.is_generational() {
            self.generational_step();
            self.finalizers_due()
        } else {
            self.incremental_step()
        }
    }

    fn finalizers_due(&self) -> StepOutcome {
        if self.gc.tobefnz.is_empty() || self.gc.emergency {
            StepOutcome::Done
        } else {
            StepOutcome::RunFinalizers(usize::MAX)
        }
    }

    /// Runs a complete cycle. An emergency collection neither shrinks
    /// buffers nor asks for finalizers.
    pub fn full_gc(&mut self, emergency: bool) -> StepOutcome {
        self.gc.emergency = emergency;
        match self.gc.kind {
            GcKind::Incremental => {
                if self.gc.keep_invariant() {
                    // black objects may exist: sweep them back to white first
                    self.enter_sweep();
                }
                self.run_until(GcPhase::Pause);
                self.run_until(GcPhase::CallFin);
                if self.gc.tobefnz.is_empty() || emergency {
                    self.gc.phase = GcPhase::Pause;
                }
                self.gc.set_pause();
            }
            GcKind::Generational => {
                self.full_generational();
            }
        }
        self.gc.emergency = false;
        if emergency {
            StepOutcome::Done
        } else {
            self.finalizers_due()
        }
    }

    // ========================================================================
    // Generational mode
    // ========================================================================

    /// Switches collector mode.
    pub fn change_mode(&mut self, kind: GcKind) {
        if kind != self.gc.kind {
            match kind {
                GcKind::Generational => {
                    self.enter_generational();
                }
                GcKind::Incremental => self.enter_incremental(),
            }
            debug!(?kind, "collector mode changed");
        }
        self.gc.last_atomic = 0;
    }

    fn whiten_all(&mut self) {
        let white = self.gc.current_white;
        for o in self.all_objects() {
            let header = self.header_mut(o);
            header.make_white(white);
            header.set_age(Age::New);
        }
    }

    fn enter_incremental(&mut self) {
        self.whiten_all();
        self.clear_gray_lists();
        self.gc.phase = GcPhase::Pause;
        self.gc.kind = GcKind::Incremental;
        self.gc.last_atomic = 0;
    }

    fn enter_generational(&mut self) -> usize {
        self.run_until(GcPhase::Pause);
        self.run_until(GcPhase::Propagate);
        let work = self.atomic();
        self.atomic_to_generational();
        self.gc.set_minor_debt();
        work
    }

    /// Frees dead objects and makes every survivor old.
    fn sweep_to_old(&mut self) {
        for o in self.all_objects() {
            if self.header(o).is_dead(self.gc.current_white) {
                let freed = self.free_object(o);
                self.gc.account_free(freed);
                continue;
            }
            self.header_mut(o).set_age(Age::Old);
            match o {
                GcObjectRef::Thread(_) => self.link_grayagain(o),
                GcObjectRef::Upval(u) if self.upval_is_open(u) => {
                    self.upvals.header_mut(u).set_gray();
                }
                _ => self.header_mut(o).set_black(),
            }
        }
    }

    fn atomic_to_generational(&mut self) {
        self.clear_gray_lists();
        self.gc.phase = GcPhase::Sweep;
        self.sweep_to_old();
        self.gc.kind = GcKind::Generational;
        self.gc.last_atomic = 0;
        self.gc.estimate = self.gc.total;
        self.finish_generational_cycle();
    }

    /// Sweep of a minor collection: frees dead young objects, advances ages.
    fn sweep_generational(&mut self) {
        let white = self.gc.current_white;
        for o in self.all_objects() {
            let header = *self.header(o);
            if header.is_white() && !header.is_fixed() {
                let freed = self.free_object(o);
                self.gc.account_free(freed);
            } else if header.age() == Age::New {
                let header = self.header_mut(o);
                header.make_white(white);
                header.set_age(Age::Survival);
            } else {
                self.header_mut(o).set_age(header.age().next());
            }
        }
    }

    /// OLD1 objects become old; black ones are re-traversed since they may
    /// point to objects that were young in the previous cycle.
    fn mark_old(&mut self) {
        for o in self.all_objects() {
            if self.header(o).age() == Age::Old1 {
                self.header_mut(o).set_age(Age::Old);
                if self.header(o).is_black() {
                    self.really_mark(o);
                }
            }
        }
    }

    fn young_collection(&mut self) {
        self.mark_old();
        self.atomic();
        self.gc.phase = GcPhase::Sweep;
        self.sweep_generational();
        self.finish_generational_cycle();
    }

    fn correct_gray_list(&mut self, list: Vec<GcObjectRef>) -> Vec<GcObjectRef> {
        let mut kept = Vec::with_capacity(list.len());
        for o in list {
            if !self.contains(o) || self.header(o).is_white() {
                continue;
            }
            match self.header(o).age() {
                Age::Touched1 => {
                    let header = self.header_mut(o);
                    header.set_black();
                    header.set_age(Age::Touched2);
                    kept.push(o);
                }
                _ if matches!(o, GcObjectRef::Thread(_)) => kept.push(o),
                age => {
                    let header = self.header_mut(o);
                    if age == Age::Touched2 {
                        header.set_age(Age::Old);
                    }
                    header.set_black();
                }
            }
        }
        kept
    }

    fn correct_gray_lists(&mut self) {
        let mut all = std::mem::take(&mut self.gc.grayagain);
        all.extend(self.gc.weak.drain(..).map(GcObjectRef::Table));
        all.extend(self.gc.allweak.drain(..).map(GcObjectRef::Table));
        all.extend(self.gc.ephemeron.drain(..).map(GcObjectRef::Table));
        self.gc.grayagain = self.correct_gray_list(all);
    }

    fn finish_generational_cycle(&mut self) {
        self.correct_gray_lists();
        self.check_sizes();
        self.gc.phase = GcPhase::Propagate;
    }

    fn full_generational(&mut self) -> usize {
        self.enter_incremental();
        self.enter_generational()
    }

    /// After a bad major collection: collect in incremental mode and return
    /// to generational mode only if the cycle freed enough.
    fn step_generational_full(&mut self) {
        let last_atomic = self.gc.last_atomic;
        if self.gc.kind == GcKind::Generational {
            self.enter_incremental();
        }
        self.run_until(GcPhase::Propagate);
        let new_atomic = self.atomic();
        if new_atomic < last_atomic + (last_atomic >> 3) {
            self.atomic_to_generational();
            self.gc.set_minor_debt();
        } else {
            self.gc.estimate = self.gc.total;
            self.enter_sweep();
            self.run_until(GcPhase::Pause);
            self.gc.set_pause();
            self.gc.last_atomic = new_atomic;
        }
    }

    fn generational_step(&mut self) {
        if self.gc.last_atomic != 0 {
            self.step_generational_full();
            return;
        }
        let major_base = self.gc.estimate;
        let major_inc = (major_base / 100) * self.gc.params.gen_major_mul;
        if self.gc.debt > 0 && self.gc.total > major_base + major_inc {
            let objects = self.full_generational();
            if self.gc.total >= major_base + major_inc / 2 {
                debug!(objects, "major collection did not free enough");
                self.gc.last_atomic = objects;
                self.gc.set_pause();
            }
        } else {
            self.young_collection();
            self.gc.set_minor_debt();
            self.gc.estimate = major_base;
        }
    }
}

fn clear_key(n: &mut Node) {
    if n.key.is_collectable() {
        n.dead = true;
    }
}
