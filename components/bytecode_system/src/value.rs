//! Constant-pool values
//!
//! Prototypes produced by a front end or read from a binary chunk carry their
//! constants in this heap-independent form. The runtime interns the string
//! constants when it installs a prototype.

use core_types::variant;

/// Longest string that is interned (and dumped with the short-string tag).
pub const MAX_SHORT_LEN: usize = 40;

/// A literal in a prototype's constant pool.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// `nil`
    Nil,
    /// `true` / `false`
    Boolean(bool),
    /// Integer literal
    Integer(i64),
    /// Float literal
    Float(f64),
    /// String literal (raw bytes)
    String(Vec<u8>),
}

impl Constant {
    /// Variant tag written to binary chunks.
    pub fn variant_tag(&self) -> u8 {
        match self {
            Constant::Nil => variant::NIL,
            Constant::Boolean(false) => variant::FALSE,
            Constant::Boolean(true) => variant::TRUE,
            Constant::Integer(_) => variant::INTEGER,
            Constant::Float(_) => variant::FLOAT,
            Constant::String(s) if s.len() <= MAX_SHORT_LEN => variant::SHORT_STRING,
            Constant::String(_) => variant::LONG_STRING,
        }
    }

    /// Builds a string constant.
    pub fn string(s: impl AsRef<[u8]>) -> Self {
        Constant::String(s.as_ref().to_vec())
    }

    /// Bytes of a string constant.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Constant::String(s) => Some(s),
            _ => None,
        }
    }

    /// Bitwise equality, treating two NaNs with the same payload as equal.
    ///
    /// The constant table of a prototype deduplicates with this relation so
    /// that `0.0` and `-0.0` stay distinct.
    pub fn same_as(&self, other: &Constant) -> bool {
        match (self, other) {
            (Constant::Float(a), Constant::Float(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }
}
