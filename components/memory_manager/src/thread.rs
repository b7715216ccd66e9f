//! Coroutine objects: value stack and activation records.
//!
//! Every slot reference into a stack is an index, so growing or shrinking
//! the buffer never invalidates open upvalues, saved frame bounds or
//! to-be-closed markers.

use core_types::{Status, UpvalRef, Value};

/// Slots allocated for a new thread.
pub const BASIC_STACK_SIZE: usize = 2 * MIN_STACK;
/// Slots guaranteed to a native function.
pub const MIN_STACK: usize = 20;
/// Spare slots past the usable end, for metamethod calls and the like.
pub const EXTRA_STACK: usize = 5;
/// "As many results as produced".
pub const MULTRET: i32 = -1;

/// Handle of a registered debug hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(pub u32);

/// Handle of a registered native continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContinuationId(pub u32);

/// Flag word of an activation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallStatus(u16);

impl CallStatus {
    /// Original value of `allow_hook`
    pub const OAH: CallStatus = CallStatus(1 << 0);
    /// Native function frame
    pub const C: CallStatus = CallStatus(1 << 1);
    /// Fresh interpreter invocation (return leaves the loop)
    pub const FRESH: CallStatus = CallStatus(1 << 2);
    /// Running a debug hook
    pub const HOOKED: CallStatus = CallStatus(1 << 3);
    /// Yieldable protected call
    pub const YPCALL: CallStatus = CallStatus(1 << 4);
    /// Frame was tail called
    pub const TAIL: CallStatus = CallStatus(1 << 5);
    /// Last hook yielded
    pub const HOOKYIELD: CallStatus = CallStatus(1 << 6);
    /// Running a finalizer
    pub const FIN: CallStatus = CallStatus(1 << 7);
    /// Transfer information is valid
    pub const TRAN: CallStatus = CallStatus(1 << 8);
    /// Closing variables of a returning frame
    pub const CLSRET: CallStatus = CallStatus(1 << 9);

    /// No flags.
    pub const fn empty() -> Self {
        CallStatus(0)
    }

    /// Whether every flag of `other` is set.
    pub const fn contains(self, other: CallStatus) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets the flags of `other`.
    pub fn insert(&mut self, other: CallStatus) {
        self.0 |= other.0;
    }

    /// Clears the flags of `other`.
    pub fn remove(&mut self, other: CallStatus) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for CallStatus {
    type Output = CallStatus;

    fn bitor(self, rhs: CallStatus) -> CallStatus {
        CallStatus(self.0 | rhs.0)
    }
}

/// Activation record of one in-flight call.
#[derive(Debug, Clone, Default)]
pub struct CallInfo {
    /// Slot of the called function
    pub func: usize,
    /// Frame's stack limit
    pub top: usize,
    /// Results wanted by the caller (`MULTRET` for all)
    pub nresults: i32,
    /// Flags
    pub callstatus: CallStatus,
    /// Next instruction (Lua frames)
    pub saved_pc: usize,
    /// Hooks or stack changes need the dispatch loop's attention
    pub trap: bool,
    /// Varargs above the fixed parameters (Lua frames)
    pub n_extra_args: usize,
    /// Continuation (native frames)
    pub k: Option<ContinuationId>,
    /// Context passed to the continuation
    pub ctx: isize,
    /// Message handler in effect before a yieldable protected call
    pub old_errfunc: usize,
    /// Function slot of a yieldable protected call
    pub func_idx: usize,
    /// Values yielded by this frame
    pub n_yield: usize,
    /// Values returned (for return hooks and closing)
    pub n_res: usize,
    /// First value transferred in a call/return hook
    pub first_transfer: usize,
    /// Number of values transferred in a call/return hook
    pub n_transfer: usize,
    /// Error caught for a yieldable protected call, pending its continuation
    pub recover_status: Option<Status>,
}

impl CallInfo {
    /// Whether the frame runs a Lua function.
    pub fn is_lua(&self) -> bool {
        !self.callstatus.contains(CallStatus::C)
    }
}

/// A coroutine.
#[derive(Debug)]
pub struct LuaThread {
    /// Value slots; `len()` is the usable size plus `EXTRA_STACK`
    pub stack: Vec<Value>,
    /// First free slot
    pub top: usize,
    /// Activation records; entries past `ci` are kept for reuse
    pub call_infos: Vec<CallInfo>,
    /// Current activation record
    pub ci: usize,
    /// Open upvalues, sorted by increasing level
    pub open_upvals: Vec<UpvalRef>,
    /// Pending to-be-closed slots, in declaration order
    pub tbc_list: Vec<usize>,
    /// `Ok`, `Yield` while suspended, or the error that killed it
    pub status: Status,
    /// Nested native calls
    pub n_ccalls: u32,
    /// Non-yieldable calls in the chain
    pub nny: u32,
    /// Slot of the current message handler (0 for none)
    pub err_func: usize,
    /// Installed hook
    pub hook: Option<HookId>,
    /// Hook event mask
    pub hook_mask: u8,
    /// Count hook period
    pub base_hook_count: i32,
    /// Instructions left before the next count event
    pub hook_count: i32,
    /// Hooks enabled
    pub allow_hook: bool,
    /// Last pc traced by the line hook
    pub old_pc: usize,
}

impl Default for LuaThread {
    fn default() -> Self {
        Self::new()
    }
}

impl LuaThread {
    /// A thread with an empty stack holding only the base frame.
    pub fn new() -> Self {
        let base = CallInfo {
            func: 0,
            top: 1 + MIN_STACK,
            nresults: 0,
            callstatus: CallStatus::C,
            ..CallInfo::default()
        };
        Self {
            stack: vec![Value::Nil; BASIC_STACK_SIZE + EXTRA_STACK],
            top: 1,
            call_infos: vec![base],
            ci: 0,
            open_upvals: Vec::new(),
            tbc_list: Vec::new(),
            status: Status::Ok,
            n_ccalls: 0,
            nny: 0,
            err_func: 0,
            hook: None,
            hook_mask: 0,
            base_hook_count: 0,
            hook_count: 0,
            allow_hook: true,
            old_pc: 0,
        }
    }

    /// Usable stack size.
    pub fn stack_size(&self) -> usize {
        self.stack.len() - EXTRA_STACK
    }

    /// Current activation record.
    pub fn current_ci(&self) -> &CallInfo {
        &self.call_infos[self.ci]
    }

    /// Current activation record, mutably.
    pub fn current_ci_mut(&mut self) -> &mut CallInfo {
        &mut self.call_infos[self.ci]
    }

    /// Pushes a fresh activation record and returns its index.
    pub fn next_ci(&mut self) -> usize {
        self.ci += 1;
        if self.ci == self.call_infos.len() {
            self.call_infos.push(CallInfo::default());
        } else {
            self.call_infos[self.ci] = CallInfo::default();
        }
        self.ci
    }

    /// Number of active calls (excluding the base frame).
    pub fn call_depth(&self) -> usize {
        self.ci
    }

    /// Pushes a value, assuming room was reserved.
    pub fn push(&mut self, v: Value) {
        self.stack[self.top] = v;
        self.top += 1;
    }

    /// Reallocates the stack to `new_size` usable slots.
    pub fn realloc_stack(&mut self, new_size: usize) {
        self.stack.resize(new_size + EXTRA_STACK, Value::Nil);
    }

    /// Highest slot any frame may still touch, plus one.
    pub fn stack_in_use(&self) -> usize {
        let lim = self.call_infos[..=self.ci]
            .iter()
            .map(|ci| ci.top)
            .fold(self.top, usize::max);
        (lim + 1).max(MIN_STACK)
    }

    /// Shrinks an oversized stack, returning the change in slots.
    pub fn shrink_stack(&mut self, max_stack: usize) -> isize {
        let before = self.stack.len();
        let inuse = self.stack_in_use();
        let max = if inuse > max_stack / 3 {
            max_stack
        } else {
            inuse * 3
        };
        if inuse <= max_stack && self.stack_size() > max {
            let nsize = if inuse > max_stack / 2 {
                max_stack
            } else {
                inuse * 2
            };
            self.realloc_stack(nsize);
        }
        self.shrink_ci();
        self.stack.len() as isize - before as isize
    }

    /// Frees half of the unused activation records.
    pub fn shrink_ci(&mut self) {
        let used = self.ci + 1;
        let spare = self.call_infos.len() - used;
        self.call_infos.truncate(used + spare / 2);
    }

    pub(crate) fn heap_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.stack.len() * std::mem::size_of::<Value>()
            + self.call_infos.len() * std::mem::size_of::<CallInfo>()
    }
}
