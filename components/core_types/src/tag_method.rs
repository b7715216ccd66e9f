//! Metamethod events.
//!
//! The order matters: the first six events ([`TagMethod::Index`] through
//! [`TagMethod::Eq`]) are cached as absent-bits in a table's flags byte, and
//! the arithmetic events are encoded by number in `MMBIN` instructions.

/// A metamethod event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum TagMethod {
    /// `__index`
    Index = 0,
    /// `__newindex`
    NewIndex,
    /// `__gc`
    Gc,
    /// `__mode`
    Mode,
    /// `__len`
    Len,
    /// `__eq`
    Eq,
    /// `__add`
    Add,
    /// `__sub`
    Sub,
    /// `__mul`
    Mul,
    /// `__mod`
    Mod,
    /// `__pow`
    Pow,
    /// `__div`
    Div,
    /// `__idiv`
    IDiv,
    /// `__band`
    BAnd,
    /// `__bor`
    BOr,
    /// `__bxor`
    BXor,
    /// `__shl`
    Shl,
    /// `__shr`
    Shr,
    /// `__unm`
    Unm,
    /// `__bnot`
    BNot,
    /// `__lt`
    Lt,
    /// `__le`
    Le,
    /// `__concat`
    Concat,
    /// `__call`
    Call,
    /// `__close`
    Close,
}

/// Number of events.
pub const TM_COUNT: usize = 25;

impl TagMethod {
    /// Every event in numeric order.
    pub const ALL: [TagMethod; TM_COUNT] = [
        TagMethod::Index,
        TagMethod::NewIndex,
        TagMethod::Gc,
        TagMethod::Mode,
        TagMethod::Len,
        TagMethod::Eq,
        TagMethod::Add,
        TagMethod::Sub,
        TagMethod::Mul,
        TagMethod::Mod,
        TagMethod::Pow,
        TagMethod::Div,
        TagMethod::IDiv,
        TagMethod::BAnd,
        TagMethod::BOr,
        TagMethod::BXor,
        TagMethod::Shl,
        TagMethod::Shr,
        TagMethod::Unm,
        TagMethod::BNot,
        TagMethod::Lt,
        TagMethod::Le,
        TagMethod::Concat,
        TagMethod::Call,
        TagMethod::Close,
    ];

    /// Field name looked up in metatables.
    pub fn name(self) -> &'static str {
        match self {
            TagMethod::Index => "__index",
            TagMethod::NewIndex => "__newindex",
            TagMethod::Gc => "__gc",
            TagMethod::Mode => "__mode",
            TagMethod::Len => "__len",
            TagMethod::Eq => "__eq",
            TagMethod::Add => "__add",
            TagMethod::Sub => "__sub",
            TagMethod::Mul => "__mul",
            TagMethod::Mod => "__mod",
            TagMethod::Pow => "__pow",
            TagMethod::Div => "__div",
            TagMethod::IDiv => "__idiv",
            TagMethod::BAnd => "__band",
            TagMethod::BOr => "__bor",
            TagMethod::BXor => "__bxor",
            TagMethod::Shl => "__shl",
            TagMethod::Shr => "__shr",
            TagMethod::Unm => "__unm",
            TagMethod::BNot => "__bnot",
            TagMethod::Lt => "__lt",
            TagMethod::Le => "__le",
            TagMethod::Concat => "__concat",
            TagMethod::Call => "__call",
            TagMethod::Close => "__close",
        }
    }

    /// Event by number.
    pub fn from_index(index: usize) -> Option<TagMethod> {
        TagMethod::ALL.get(index).copied()
    }

    /// Whether the absence of this event is cached in table flags.
    pub fn is_fast(self) -> bool {
        self <= TagMethod::Eq
    }

    /// Bit used in the table flags cache.
    pub fn fast_bit(self) -> u8 {
        1 << (self as u8)
    }

    /// Whether the event belongs to a binary bitwise operator.
    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            TagMethod::BAnd
                | TagMethod::BOr
                | TagMethod::BXor
                | TagMethod::Shl
                | TagMethod::Shr
                | TagMethod::BNot
        )
    }
}
