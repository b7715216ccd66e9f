//! Function, upvalue, prototype and userdata objects.
//!
//! A Lua closure shares its upvalues with every other closure that captured
//! the same variable. While the variable's frame is alive the upvalue is
//! *open* and names a slot of its thread's stack; when the frame exits the
//! value is copied into the upvalue, which becomes *closed*. Each thread
//! keeps its open upvalues sorted by stack level so a capture site can find
//! the one already aliasing a slot.

use crate::heap::Heap;
use bytecode_system::{Constant, Prototype};
use core_types::{
    GcObjectRef, LClosureRef, NClosureRef, NativeFnId, ProtoRef, StrRef, TableRef, ThreadRef,
    UpvalRef, UserdataRef, Value,
};
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Closure over a compiled prototype.
#[derive(Debug, Clone)]
pub struct LClosure {
    /// Function body
    pub proto: ProtoRef,
    /// Captured variables, one per upvalue descriptor
    pub upvals: Vec<UpvalRef>,
}

/// Closure over a native function with its own captured values.
#[derive(Debug, Clone)]
pub struct NClosure {
    /// Registered native function
    pub f: NativeFnId,
    /// Captured values
    pub upvalues: Vec<Value>,
}

/// A captured variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Upval {
    /// Aliases `thread.stack[level]`
    Open {
        /// Owning thread
        thread: ThreadRef,
        /// Stack slot
        level: usize,
    },
    /// Holds its own value
    Closed(Value),
}

/// A prototype installed in the heap, with its constants interned.
#[derive(Debug, Clone)]
pub struct ProtoObj {
    /// Compiled body (code, debug info)
    pub proto: Rc<Prototype>,
    /// Constants as runtime values
    pub constants: Vec<Value>,
    /// Installed nested prototypes, parallel to `proto.protos`
    pub children: Vec<ProtoRef>,
    /// Chunk name
    pub source: Option<StrRef>,
}

/// Full userdata: a host payload plus user values.
pub struct Userdata {
    /// Host payload
    pub data: Box<dyn Any>,
    /// User values
    pub user_values: Vec<Value>,
    /// Metatable
    pub metatable: Option<TableRef>,
}

impl fmt::Debug for Userdata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Userdata")
            .field("user_values", &self.user_values)
            .field("metatable", &self.metatable)
            .finish_non_exhaustive()
    }
}

impl LClosure {
    pub(crate) fn heap_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.upvals.len() * std::mem::size_of::<UpvalRef>()
    }
}

impl NClosure {
    pub(crate) fn heap_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.upvalues.len() * std::mem::size_of::<Value>()
    }
}

impl ProtoObj {
    pub(crate) fn heap_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.proto.code.len() * 4
            + self.constants.len() * std::mem::size_of::<Value>()
            + self.children.len() * std::mem::size_of::<ProtoRef>()
            + self.proto.line_info.len()
    }
}

impl Userdata {
    pub(crate) fn heap_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.user_values.len() * std::mem::size_of::<Value>()
    }
}

fn constant_value(heap: &mut Heap, constant: &Constant) -> Value {
    match constant {
        Constant::Nil => Value::Nil,
        Constant::Boolean(b) => Value::Boolean(*b),
        Constant::Integer(i) => Value::Integer(*i),
        Constant::Float(n) => Value::Float(*n),
        Constant::String(bytes) => Value::String(heap.new_string(bytes)),
    }
}

impl Heap {
    /// Creates a Lua closure.
    pub fn new_lclosure(&mut self, proto: ProtoRef, upvals: Vec<UpvalRef>) -> LClosureRef {
        let cl = LClosure { proto, upvals };
        let size = cl.heap_size();
        let r = self.lclosures.insert(self.gc.new_header(), cl);
        self.gc.account_alloc(size);
        r
    }

    /// Creates a native closure.
    pub fn new_nclosure(&mut self, f: NativeFnId, upvalues: Vec<Value>) -> NClosureRef {
        let cl = NClosure { f, upvalues };
        let size = cl.heap_size();
        let r = self.nclosures.insert(self.gc.new_header(), cl);
        self.gc.account_alloc(size);
        r
    }

    /// Installs a prototype tree, interning its string constants.
    pub fn new_proto(&mut self, proto: Rc<Prototype>) -> ProtoRef {
        let children: Vec<ProtoRef> = proto
            .protos
            .iter()
            .map(|child| self.new_proto(Rc::clone(child)))
            .collect();
        let constants: Vec<Value> = proto
            .constants
            .iter()
            .map(|k| constant_value(self, k))
            .collect();
        let source = proto.source.as_ref().map(|s| self.new_string(s));
        let obj = ProtoObj {
            proto,
            constants,
            children,
            source,
        };
        let size = obj.heap_size();
        let r = self.protos.insert(self.gc.new_header(), obj);
        self.gc.account_alloc(size);
        r
    }

    /// Creates a full userdata with `nuv` user values set to `nil`.
    pub fn new_userdata(&mut self, data: Box<dyn Any>, nuv: usize) -> UserdataRef {
        let u = Userdata {
            data,
            user_values: vec![Value::Nil; nuv],
            metatable: None,
        };
        let size = u.heap_size();
        let r = self.userdata.insert(self.gc.new_header(), u);
        self.gc.account_alloc(size);
        r
    }

    /// Sets user value `n` (0-based); `false` when out of range.
    pub fn set_user_value(&mut self, u: UserdataRef, n: usize, v: Value) -> bool {
        match self.userdata[u].user_values.get_mut(n) {
            Some(slot) => *slot = v,
            None => return false,
        }
        self.barrier_back(GcObjectRef::Userdata(u), v);
        true
    }

    // ========================================================================
    // Upvalues
    // ========================================================================

    /// Returns the open upvalue aliasing `level` of `thread`, creating it if
    /// no closure captured that slot yet.
    pub fn find_upval(&mut self, thread: ThreadRef, level: usize) -> UpvalRef {
        let open = &self.threads[thread].open_upvals;
        let mut pos = open.len();
        while pos > 0 {
            let u = open[pos - 1];
            match self.upvals[u] {
                Upval::Open { level: l, .. } if l == level => return u,
                Upval::Open { level: l, .. } if l < level => break,
                _ => pos -= 1,
            }
        }
        let header = self.gc.new_header();
        let u = self.upvals.insert(header, Upval::Open { thread, level });
        self.threads[thread].open_upvals.insert(pos, u);
        self.gc.account_alloc(std::mem::size_of::<Upval>());
        u
    }

    /// Creates a closed upvalue holding `v`.
    pub fn new_closed_upval(&mut self, v: Value) -> UpvalRef {
        let header = self.gc.new_header();
        let u = self.upvals.insert(header, Upval::Closed(v));
        self.gc.account_alloc(std::mem::size_of::<Upval>());
        u
    }

    /// Closes every open upvalue of `thread` at or above `level`.
    pub fn close_upvals(&mut self, thread: ThreadRef, level: usize) {
        loop {
            let u = match self.threads[thread].open_upvals.last() {
                Some(&u) => u,
                None => break,
            };
            let l = match self.upvals[u] {
                Upval::Open { level: l, .. } => l,
                Upval::Closed(_) => {
                    self.threads[thread].open_upvals.pop();
                    continue;
                }
            };
            if l < level {
                break;
            }
            self.threads[thread].open_upvals.pop();
            let v = self.threads[thread].stack[l];
            self.upvals[u] = Upval::Closed(v);
            if !self.upvals.header(u).is_white() {
                self.upvals.header_mut(u).set_black();
                self.barrier_forward(GcObjectRef::Upval(u), v);
            }
        }
    }

    /// Current value of an upvalue.
    pub fn upval_get(&self, u: UpvalRef) -> Value {
        match self.upvals[u] {
            Upval::Open { thread, level } => self.threads[thread].stack[level],
            Upval::Closed(v) => v,
        }
    }

    /// Assigns an upvalue.
    pub fn upval_set(&mut self, u: UpvalRef, v: Value) {
        match self.upvals[u] {
            Upval::Open { thread, level } => self.threads[thread].stack[level] = v,
            Upval::Closed(_) => self.upvals[u] = Upval::Closed(v),
        }
        self.barrier_forward(GcObjectRef::Upval(u), v);
    }

    /// Whether the upvalue still aliases a stack slot.
    pub fn upval_is_open(&self, u: UpvalRef) -> bool {
        matches!(self.upvals[u], Upval::Open { .. })
    }

    /// Makes upvalue `n1` of `f1` refer to upvalue `n2` of `f2`.
    pub fn join_upvals(&mut self, f1: LClosureRef, n1: usize, f2: LClosureRef, n2: usize) {
        let u = self.lclosures[f2].upvals[n2];
        self.lclosures[f1].upvals[n1] = u;
        let parent = GcObjectRef::LuaClosure(f1);
        self.object_barrier(parent, GcObjectRef::Upval(u));
    }

    /// Prototype of a Lua closure.
    pub fn closure_proto(&self, f: LClosureRef) -> &Rc<Prototype> {
        &self.protos[self.lclosures[f].proto].proto
    }
}
