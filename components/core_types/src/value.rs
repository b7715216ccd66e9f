//! Tagged value representation.
//!
//! Every value handled by the runtime is a [`Value`]: primitives are stored
//! inline and collectable objects are referenced through typed, generational
//! arena handles. A handle is only meaningful together with the heap that
//! issued it; looking up a handle whose object was already reclaimed is a
//! stale-reference bug that the heap reports at the lookup site.

use std::fmt;
use std::hash::Hash;

/// Common behaviour of the typed GC handles.
///
/// A handle is an `(index, generation)` pair. The generation is bumped every
/// time an arena slot is recycled, so a handle that outlived its object no
/// longer matches the slot.
pub trait GcRef: Copy + Eq + Hash + fmt::Debug {
    /// Builds a handle from its raw parts.
    fn from_raw(index: u32, generation: u32) -> Self;
    /// Slot index inside the owning arena.
    fn index(self) -> u32;
    /// Slot generation the handle was issued for.
    fn generation(self) -> u32;
}

macro_rules! gc_ref {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name {
            index: u32,
            generation: u32,
        }

        impl GcRef for $name {
            #[inline]
            fn from_raw(index: u32, generation: u32) -> Self {
                Self { index, generation }
            }

            #[inline]
            fn index(self) -> u32 {
                self.index
            }

            #[inline]
            fn generation(self) -> u32 {
                self.generation
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({}#{})", stringify!($name), self.index, self.generation)
            }
        }
    };
}

gc_ref!(
    /// Handle to an interned short string or a long string.
    StrRef
);
gc_ref!(
    /// Handle to a table.
    TableRef
);
gc_ref!(
    /// Handle to a closure over a compiled prototype.
    LClosureRef
);
gc_ref!(
    /// Handle to a native closure carrying captured values.
    NClosureRef
);
gc_ref!(
    /// Handle to a full userdata block.
    UserdataRef
);
gc_ref!(
    /// Handle to a thread (coroutine).
    ThreadRef
);
gc_ref!(
    /// Handle to an upvalue cell.
    UpvalRef
);
gc_ref!(
    /// Handle to a loaded function prototype.
    ProtoRef
);

/// Identifier of a native function registered with a runtime instance.
///
/// Light native functions are not collectable: the identifier indexes the
/// runtime's native function registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeFnId(pub u32);

/// Basic type tags, numbered like the reference implementation so that the
/// binary chunk format can reuse them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LuaType {
    /// `nil`
    Nil = 0,
    /// `true` / `false`
    Boolean = 1,
    /// Light userdata (opaque host pointer)
    LightUserdata = 2,
    /// Integer or float
    Number = 3,
    /// Byte string
    String = 4,
    /// Table
    Table = 5,
    /// Any function
    Function = 6,
    /// Full userdata
    Userdata = 7,
    /// Coroutine
    Thread = 8,
}

/// Number of basic types.
pub const NUM_TYPES: usize = 9;

/// Bit marking a variant tag as collectable.
pub const BIT_COLLECTABLE: u8 = 1 << 6;

/// Variant tags (basic type in bits 0-3, variant in bits 4-5).
pub mod variant {
    /// nil
    pub const NIL: u8 = 0;
    /// false
    pub const FALSE: u8 = 0x01;
    /// true
    pub const TRUE: u8 = 0x11;
    /// Light userdata
    pub const LIGHT_USERDATA: u8 = 0x02;
    /// Integer number
    pub const INTEGER: u8 = 0x03;
    /// Float number
    pub const FLOAT: u8 = 0x13;
    /// Short (interned) string
    pub const SHORT_STRING: u8 = 0x04;
    /// Long string
    pub const LONG_STRING: u8 = 0x14;
    /// Table
    pub const TABLE: u8 = 0x05;
    /// Lua closure
    pub const LUA_CLOSURE: u8 = 0x06;
    /// Light native function
    pub const LIGHT_NATIVE: u8 = 0x16;
    /// Native closure
    pub const NATIVE_CLOSURE: u8 = 0x26;
    /// Full userdata
    pub const USERDATA: u8 = 0x07;
    /// Thread
    pub const THREAD: u8 = 0x08;
}

impl LuaType {
    /// All basic types in tag order.
    pub const ALL: [LuaType; NUM_TYPES] = [
        LuaType::Nil,
        LuaType::Boolean,
        LuaType::LightUserdata,
        LuaType::Number,
        LuaType::String,
        LuaType::Table,
        LuaType::Function,
        LuaType::Userdata,
        LuaType::Thread,
    ];

    /// Name used in error messages and by `type()`.
    pub fn name(self) -> &'static str {
        match self {
            LuaType::Nil => "nil",
            LuaType::Boolean => "boolean",
            LuaType::LightUserdata | LuaType::Userdata => "userdata",
            LuaType::Number => "number",
            LuaType::String => "string",
            LuaType::Table => "table",
            LuaType::Function => "function",
            LuaType::Thread => "thread",
        }
    }

    /// Tag as a small integer.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Looks a basic type up by tag.
    pub fn from_tag(tag: u8) -> Option<LuaType> {
        LuaType::ALL.get(tag as usize).copied()
    }
}

/// Name reported for an invalid (absent) stack index.
pub const NO_VALUE_NAME: &str = "no value";

/// Any collectable object, used by the collector's work lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GcObjectRef {
    /// String object
    String(StrRef),
    /// Table object
    Table(TableRef),
    /// Lua closure
    LuaClosure(LClosureRef),
    /// Native closure
    NativeClosure(NClosureRef),
    /// Full userdata
    Userdata(UserdataRef),
    /// Thread
    Thread(ThreadRef),
    /// Upvalue cell
    Upval(UpvalRef),
    /// Function prototype
    Proto(ProtoRef),
}

/// A runtime value.
///
/// `PartialEq` compares variant and payload: references compare by identity,
/// and an integer never equals a float. Language-level raw equality (which
/// equates `1` and `1.0` and compares long strings by content) lives in the
/// heap, which can see string contents.
///
/// # Examples
///
/// ```
/// use core_types::{Value, LuaType};
///
/// let n = Value::Integer(42);
/// assert_eq!(n.lua_type(), LuaType::Number);
/// assert!(!Value::Nil.is_truthy());
/// assert!(Value::Boolean(true).is_truthy());
/// assert!(Value::Integer(0).is_truthy());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Value {
    /// `nil`
    #[default]
    Nil,
    /// Boolean
    Boolean(bool),
    /// 64-bit integer
    Integer(i64),
    /// 64-bit float
    Float(f64),
    /// Opaque host pointer
    LightUserdata(usize),
    /// Registered native function without upvalues
    LightNative(NativeFnId),
    /// String object
    String(StrRef),
    /// Table object
    Table(TableRef),
    /// Closure over a compiled prototype
    LuaClosure(LClosureRef),
    /// Native closure with captured values
    NativeClosure(NClosureRef),
    /// Full userdata
    Userdata(UserdataRef),
    /// Coroutine
    Thread(ThreadRef),
}

impl Value {
    /// Basic type of the value.
    #[inline]
    pub fn lua_type(&self) -> LuaType {
        match self {
            Value::Nil => LuaType::Nil,
            Value::Boolean(_) => LuaType::Boolean,
            Value::Integer(_) | Value::Float(_) => LuaType::Number,
            Value::LightUserdata(_) => LuaType::LightUserdata,
            Value::String(_) => LuaType::String,
            Value::Table(_) => LuaType::Table,
            Value::LightNative(_) | Value::LuaClosure(_) | Value::NativeClosure(_) => {
                LuaType::Function
            }
            Value::Userdata(_) => LuaType::Userdata,
            Value::Thread(_) => LuaType::Thread,
        }
    }

    /// Variant tag byte, with the collectable bit set for heap objects.
    ///
    /// Strings report the short-string variant; only the heap knows whether
    /// a particular string is long.
    pub fn variant_tag(&self) -> u8 {
        let raw = match self {
            Value::Nil => variant::NIL,
            Value::Boolean(false) => variant::FALSE,
            Value::Boolean(true) => variant::TRUE,
            Value::Integer(_) => variant::INTEGER,
            Value::Float(_) => variant::FLOAT,
            Value::LightUserdata(_) => variant::LIGHT_USERDATA,
            Value::LightNative(_) => variant::LIGHT_NATIVE,
            Value::String(_) => variant::SHORT_STRING,
            Value::Table(_) => variant::TABLE,
            Value::LuaClosure(_) => variant::LUA_CLOSURE,
            Value::NativeClosure(_) => variant::NATIVE_CLOSURE,
            Value::Userdata(_) => variant::USERDATA,
            Value::Thread(_) => variant::THREAD,
        };
        if self.is_collectable() {
            raw | BIT_COLLECTABLE
        } else {
            raw
        }
    }

    /// Type name as reported by `type()`.
    pub fn type_name(&self) -> &'static str {
        self.lua_type().name()
    }

    /// Whether the payload is a heap reference.
    #[inline]
    pub fn is_collectable(&self) -> bool {
        self.as_gc().is_some()
    }

    /// Heap reference carried by the value, if any.
    #[inline]
    pub fn as_gc(&self) -> Option<GcObjectRef> {
        match *self {
            Value::String(s) => Some(GcObjectRef::String(s)),
            Value::Table(t) => Some(GcObjectRef::Table(t)),
            Value::LuaClosure(c) => Some(GcObjectRef::LuaClosure(c)),
            Value::NativeClosure(c) => Some(GcObjectRef::NativeClosure(c)),
            Value::Userdata(u) => Some(GcObjectRef::Userdata(u)),
            Value::Thread(t) => Some(GcObjectRef::Thread(t)),
            _ => None,
        }
    }

    /// `nil` test.
    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Only `nil` and `false` are falsy.
    #[inline]
    pub fn is_falsy(&self) -> bool {
        matches!(self, Value::Nil | Value::Boolean(false))
    }

    /// Negation of [`Value::is_falsy`].
    #[inline]
    pub fn is_truthy(&self) -> bool {
        !self.is_falsy()
    }

    /// Integer or float.
    #[inline]
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_))
    }

    /// Any kind of function.
    #[inline]
    pub fn is_function(&self) -> bool {
        matches!(
            self,
            Value::LightNative(_) | Value::LuaClosure(_) | Value::NativeClosure(_)
        )
    }

    /// Integer payload without coercion.
    #[inline]
    pub fn as_integer(&self) -> Option<i64> {
        match *self {
            Value::Integer(i) => Some(i),
            _ => None,
        }
    }

    /// Numeric payload as a float without string coercion.
    #[inline]
    pub fn as_float(&self) -> Option<f64> {
        match *self {
            Value::Integer(i) => Some(i as f64),
            Value::Float(f) => Some(f),
            _ => None,
        }
    }

    /// String handle, if the value is a string.
    #[inline]
    pub fn as_string(&self) -> Option<StrRef> {
        match *self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Table handle, if the value is a table.
    #[inline]
    pub fn as_table(&self) -> Option<TableRef> {
        match *self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Thread handle, if the value is a thread.
    #[inline]
    pub fn as_thread(&self) -> Option<ThreadRef> {
        match *self {
            Value::Thread(t) => Some(t),
            _ => None,
        }
    }
}

impl From<GcObjectRef> for Option<Value> {
    fn from(obj: GcObjectRef) -> Self {
        match obj {
            GcObjectRef::String(s) => Some(Value::String(s)),
            GcObjectRef::Table(t) => Some(Value::Table(t)),
            GcObjectRef::LuaClosure(c) => Some(Value::LuaClosure(c)),
            GcObjectRef::NativeClosure(c) => Some(Value::NativeClosure(c)),
            GcObjectRef::Userdata(u) => Some(Value::Userdata(u)),
            GcObjectRef::Thread(t) => Some(Value::Thread(t)),
            GcObjectRef::Upval(_) | GcObjectRef::Proto(_) => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}
