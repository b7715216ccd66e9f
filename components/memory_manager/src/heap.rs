//! The heap: every collectable object of one runtime instance.
//!
//! A [`Heap`] owns one arena per object kind, the string intern table, the
//! collector state and the roots the collector starts from (the registry,
//! the main thread, the running thread and the per-type metatables). All
//! mutations of heap objects that can create a black-to-white reference go
//! through methods here so that the write barriers are never skipped.

use crate::arena::Arena;
use crate::gc::{GcKind, GcParams, GcState};
use crate::object::{LClosure, NClosure, ProtoObj, Upval, Userdata};
use crate::string::{LuaString, StringTable};
use crate::table::{Table, TableError};
use crate::thread::LuaThread;
use core_types::{
    float_to_integer, GcObjectRef, GcRef, LClosureRef, LuaType, NClosureRef, ProtoRef, StrRef, TableRef,
    TagMethod, ThreadRef, UpvalRef, UserdataRef, Value, F2I, NUM_TYPES, TM_COUNT,
};
use std::time::{SystemTime, UNIX_EPOCH};

/// Registry slot of the main thread.
pub const RIDX_MAINTHREAD: i64 = 1;
/// Registry slot of the globals table.
pub const RIDX_GLOBALS: i64 = 2;

/// Message of the preallocated memory error.
pub const MEMERRMSG: &str = "not enough memory";

/// Heap construction parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct HeapConfig {
    /// Fixed hash seed; a random one is derived when `None`
    pub seed: Option<u32>,
    /// Collector tuning
    pub params: GcParams,
    /// Start in generational mode
    pub generational: bool,
    /// Largest stack a thread may grow to
    pub max_stack: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            seed: None,
            params: GcParams::default(),
            generational: false,
            max_stack: 1_000_000,
        }
    }
}

fn make_seed() -> u32 {
    let local = 0u8;
    let address = &local as *const u8 as usize;
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let mut buff = Vec::with_capacity(24);
    buff.extend_from_slice(&(address as u64).to_le_bytes());
    buff.extend_from_slice(&nanos.to_le_bytes());
    crate::string::hash_bytes(&buff, nanos as u32)
}

/// All collectable objects of one runtime instance, plus the collector.
#[derive(Debug)]
pub struct Heap {
    /// Strings
    pub strings: Arena<LuaString, StrRef>,
    /// Tables
    pub tables: Arena<Table, TableRef>,
    /// Lua closures
    pub lclosures: Arena<LClosure, LClosureRef>,
    /// Native closures
    pub nclosures: Arena<NClosure, NClosureRef>,
    /// Upvalues
    pub upvals: Arena<Upval, UpvalRef>,
    /// Installed prototypes
    pub protos: Arena<ProtoObj, ProtoRef>,
    /// Full userdata
    pub userdata: Arena<Userdata, UserdataRef>,
    /// Threads
    pub threads: Arena<LuaThread, ThreadRef>,
    pub(crate) strt: StringTable,
    /// Hash seed
    pub seed: u32,
    /// Collector state
    pub gc: GcState,
    /// The registry table
    pub registry: TableRef,
    /// The main thread (never collected)
    pub main_thread: ThreadRef,
    /// Thread currently running
    pub running: ThreadRef,
    /// Metatables of the non-table, non-userdata types
    pub type_metatables: [Option<TableRef>; NUM_TYPES],
    /// Interned metamethod names, indexed by event
    pub tm_names: [StrRef; TM_COUNT],
    /// Preallocated memory error message
    pub memory_error_message: StrRef,
    /// Largest stack a thread may grow to
    pub max_stack: usize,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(HeapConfig::default())
    }
}

impl Heap {
    /// Creates a heap with its registry, main thread and fixed strings.
    pub fn new(config: HeapConfig) -> Self {
        let gc = GcState::new(config.params.clone());
        let strings = Arena::new("string");
        let mut threads = Arena::new("thread");
        let mut tables = Arena::new("table");
        let main_thread = threads.insert(gc.new_header(), LuaThread::new());
        let registry = tables.insert(gc.new_header(), Table::new());
        // replaced below, once the names are interned
        let placeholder = StrRef::from_raw(u32::MAX, 0);
        let mut heap = Self {
            strings,
            tables,
            lclosures: Arena::new("Lua closure"),
            nclosures: Arena::new("native closure"),
            upvals: Arena::new("upvalue"),
            protos: Arena::new("prototype"),
            userdata: Arena::new("userdata"),
            threads,
            strt: StringTable::new(),
            seed: config.seed.unwrap_or_else(make_seed),
            gc,
            registry,
            main_thread,
            running: main_thread,
            type_metatables: [None; NUM_TYPES],
            tm_names: [placeholder; TM_COUNT],
            memory_error_message: placeholder,
            max_stack: config.max_stack,
        };
        heap.threads.header_mut(main_thread).fixed = true;
        heap.memory_error_message = heap.intern(MEMERRMSG.as_bytes());
        heap.fix_string(heap.memory_error_message);
        for tm in TagMethod::ALL {
            let s = heap.intern(tm.name().as_bytes());
            heap.fix_string(s);
            heap.tm_names[tm as usize] = s;
        }
        let globals = heap.new_table();
        heap.table_set_int(registry, RIDX_MAINTHREAD, Value::Thread(main_thread));
        heap.table_set_int(registry, RIDX_GLOBALS, Value::Table(globals));
        if config.generational {
            heap.change_mode(GcKind::Generational);
        }
        heap
    }

    fn fix_string(&mut self, s: StrRef) {
        self.strings.header_mut(s).fixed = true;
    }

    /// The globals table.
    pub fn globals(&self) -> TableRef {
        match self.tables[self.registry].get_int(RIDX_GLOBALS) {
            Value::Table(t) => t,
            _ => self.registry,
        }
    }

    /// Whether the object behind `o` is still allocated.
    pub fn contains(&self, o: GcObjectRef) -> bool {
        match o {
            GcObjectRef::String(r) => self.strings.contains(r),
            GcObjectRef::Table(r) => self.tables.contains(r),
            GcObjectRef::LuaClosure(r) => self.lclosures.contains(r),
            GcObjectRef::NativeClosure(r) => self.nclosures.contains(r),
            GcObjectRef::Upval(r) => self.upvals.contains(r),
            GcObjectRef::Proto(r) => self.protos.contains(r),
            GcObjectRef::Userdata(r) => self.userdata.contains(r),
            GcObjectRef::Thread(r) => self.threads.contains(r),
        }
    }

    /// Number of live objects of every kind.
    pub fn object_count(&self) -> usize {
        self.strings.len()
            + self.tables.len()
            + self.lclosures.len()
            + self.nclosures.len()
            + self.upvals.len()
            + self.protos.len()
            + self.userdata.len()
            + self.threads.len()
    }

    // ========================================================================
    // Raw equality and strings
    // ========================================================================

    /// Equality without metamethods: numbers by value, long strings by
    /// contents, everything else by identity.
    pub fn raw_equal(&self, a: &Value, b: &Value) -> bool {
        match (*a, *b) {
            (Value::Integer(x), Value::Float(y)) | (Value::Float(y), Value::Integer(x)) => {
                float_to_integer(y, F2I::Exact) == Some(x)
            }
            (Value::String(x), Value::String(y)) => {
                x == y || {
                    let (x, y) = (&self.strings[x], &self.strings[y]);
                    !x.is_short() && !y.is_short() && x.as_bytes() == y.as_bytes()
                }
            }
            _ => a == b,
        }
    }

    /// Interns a `&str`.
    pub fn new_str(&mut self, s: &str) -> StrRef {
        self.new_string(s.as_bytes())
    }

    // ========================================================================
    // Tables
    // ========================================================================

    /// Creates an empty table.
    pub fn new_table(&mut self) -> TableRef {
        self.new_table_sized(0, 0)
    }

    /// Creates a table with preallocated parts.
    pub fn new_table_sized(&mut self, narray: usize, nhash: usize) -> TableRef {
        let t = Table::with_sizes(narray, nhash);
        let size = t.heap_size();
        let r = self.tables.insert(self.gc.new_header(), t);
        self.gc.account_alloc(size);
        r
    }

    /// Raw `t[key]`.
    pub fn table_get(&self, t: TableRef, key: &Value) -> Value {
        self.tables[t].get(&self.strings, key)
    }

    /// Raw `t[i]`.
    pub fn table_get_int(&self, t: TableRef, i: i64) -> Value {
        self.tables[t].get_int(i)
    }

    /// Raw `t[name]` for a string key.
    pub fn table_get_str(&self, t: TableRef, name: StrRef) -> Value {
        self.tables[t].get(&self.strings, &Value::String(name))
    }

    /// Raw `t[key] = val`.
    pub fn table_set(&mut self, t: TableRef, key: Value, val: Value) -> Result<(), TableError> {
        let before = self.tables[t].heap_size();
        self.tables[t].set(&self.strings, key, val)?;
        self.after_table_store(t, before, key, val);
        Ok(())
    }

    /// Raw `t[i] = val`.
    pub fn table_set_int(&mut self, t: TableRef, i: i64, val: Value) {
        let before = self.tables[t].heap_size();
        self.tables[t].set_int(&self.strings, i, val);
        self.after_table_store(t, before, Value::Integer(i), val);
    }

    fn after_table_store(&mut self, t: TableRef, before: usize, key: Value, val: Value) {
        let table = &mut self.tables[t];
        table.flags = 0;
        let after = table.heap_size();
        self.gc.account_delta(after as isize - before as isize);
        self.barrier_back(GcObjectRef::Table(t), key);
        self.barrier_back(GcObjectRef::Table(t), val);
    }

    /// Border of `t` (raw length).
    pub fn table_len(&self, t: TableRef) -> u64 {
        self.tables[t].len()
    }

    /// Raw traversal step.
    pub fn table_next(
        &self,
        t: TableRef,
        key: &Value,
    ) -> Result<Option<(Value, Value)>, TableError> {
        self.tables[t].next(&self.strings, key)
    }

    /// Resizes both parts of a table.
    pub fn table_resize(&mut self, t: TableRef, narray: usize, nhash: usize) {
        let before = self.tables[t].heap_size();
        self.tables[t].resize(&self.strings, narray, nhash);
        let after = self.tables[t].heap_size();
        self.gc.account_delta(after as isize - before as isize);
    }

    // ========================================================================
    // Metatables
    // ========================================================================

    /// Metatable of any value.
    pub fn metatable_of(&self, v: &Value) -> Option<TableRef> {
        match *v {
            Value::Table(t) => self.tables[t].metatable,
            Value::Userdata(u) => self.userdata[u].metatable,
            _ => self.type_metatables[v.lua_type() as usize],
        }
    }

    /// Sets the metatable of a table, registering it for finalization when
    /// the metatable has `__gc`.
    pub fn set_table_metatable(&mut self, t: TableRef, mt: Option<TableRef>) {
        self.tables[t].metatable = mt;
        if let Some(mt) = mt {
            self.object_barrier(GcObjectRef::Table(t), GcObjectRef::Table(mt));
            self.check_finalizer(GcObjectRef::Table(t), mt);
        }
    }

    /// Sets the metatable of a full userdata.
    pub fn set_userdata_metatable(&mut self, u: UserdataRef, mt: Option<TableRef>) {
        self.userdata[u].metatable = mt;
        if let Some(mt) = mt {
            self.object_barrier(GcObjectRef::Userdata(u), GcObjectRef::Table(mt));
            self.check_finalizer(GcObjectRef::Userdata(u), mt);
        }
    }

    /// Sets the shared metatable of a basic type.
    pub fn set_type_metatable(&mut self, ty: LuaType, mt: Option<TableRef>) {
        self.type_metatables[ty as usize] = mt;
    }

    /// Metamethod `event` of metatable `mt`, caching absence of the fast
    /// events in the table's flags.
    pub fn fast_tm(&mut self, mt: TableRef, event: TagMethod) -> Option<Value> {
        if event.is_fast() && self.tables[mt].flags & event.fast_bit() != 0 {
            return None;
        }
        let name = self.tm_names[event as usize];
        let tm = self.table_get_str(mt, name);
        if tm.is_nil() {
            if event.is_fast() {
                self.tables[mt].flags |= event.fast_bit();
            }
            None
        } else {
            Some(tm)
        }
    }

    /// Metamethod `event` of the value's metatable (`nil` when absent).
    pub fn tm_by_obj(&self, v: &Value, event: TagMethod) -> Value {
        match self.metatable_of(v) {
            Some(mt) => self.table_get_str(mt, self.tm_names[event as usize]),
            None => Value::Nil,
        }
    }

    // ========================================================================
    // Threads
    // ========================================================================

    /// Creates a thread with a fresh stack.
    pub fn new_thread(&mut self) -> ThreadRef {
        let th = LuaThread::new();
        let size = th.heap_size();
        let r = self.threads.insert(self.gc.new_header(), th);
        self.gc.account_alloc(size);
        r
    }

    /// Reallocates a thread's stack to `new_size` usable slots.
    pub fn resize_stack(&mut self, th: ThreadRef, new_size: usize) {
        let before = self.threads[th].heap_size();
        self.threads[th].realloc_stack(new_size);
        let after = self.threads[th].heap_size();
        self.gc.account_delta(after as isize - before as isize);
    }

    /// Shrinks an oversized stack, keeping every slot a frame may touch.
    pub fn shrink_stack(&mut self, th: ThreadRef) {
        let max_stack = self.max_stack;
        let before = self.threads[th].heap_size();
        self.threads[th].shrink_stack(max_stack);
        let after = self.threads[th].heap_size();
        self.gc.account_delta(after as isize - before as isize);
    }

    /// Bytes currently allocated.
    pub fn total_bytes(&self) -> usize {
        self.gc.total_bytes()
    }
}
