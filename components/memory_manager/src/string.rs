//! String objects and the short-string intern table.
//!
//! Strings up to [`MAX_SHORT_LEN`] bytes are interned: the heap keeps at most
//! one object per byte sequence, so equality of short strings is identity.
//! Longer strings are created fresh every time and hash lazily.
//!
//! The intern table is a power-of-two array of chains threaded through the
//! string objects themselves. It doubles when the number of entries reaches
//! its size, and shrinks (during collection) when it is less than a quarter
//! full.

use crate::heap::Heap;
use bytecode_system::MAX_SHORT_LEN;
use core_types::StrRef;
use std::borrow::Cow;
use std::cell::Cell;
use tracing::debug;

/// Initial (and minimum) number of intern buckets.
pub const MIN_STRTAB_SIZE: usize = 128;

/// Seeded string hash shared by interned and long strings.
///
/// # Examples
///
/// ```
/// use memory_manager::string::hash_bytes;
///
/// assert_eq!(hash_bytes(b"abc", 7), hash_bytes(b"abc", 7));
/// assert_ne!(hash_bytes(b"abc", 7), hash_bytes(b"abc", 8));
/// ```
pub fn hash_bytes(bytes: &[u8], seed: u32) -> u32 {
    let mut h = seed ^ (bytes.len() as u32);
    for &b in bytes.iter().rev() {
        h ^= (h << 5).wrapping_add(h >> 2).wrapping_add(b as u32);
    }
    h
}

/// An immutable byte string.
#[derive(Debug)]
pub struct LuaString {
    bytes: Box<[u8]>,
    hash: Cell<u32>,
    hashed: Cell<bool>,
    short: bool,
    pub(crate) hnext: Option<StrRef>,
}

impl LuaString {
    /// Contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the string is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Interned strings are short; long strings are never deduplicated.
    pub fn is_short(&self) -> bool {
        self.short
    }

    /// Hash of the contents (computed on first use for long strings).
    pub fn hash(&self) -> u32 {
        if !self.hashed.get() {
            self.hash.set(hash_bytes(&self.bytes, self.hash.get()));
            self.hashed.set(true);
        }
        self.hash.get()
    }

    /// Contents as UTF-8, replacing invalid sequences.
    pub fn to_str_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    pub(crate) fn heap_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.bytes.len() + 1
    }
}

/// Buckets of the intern table.
#[derive(Debug)]
pub(crate) struct StringTable {
    pub(crate) buckets: Vec<Option<StrRef>>,
    pub(crate) nuse: usize,
}

impl StringTable {
    pub(crate) fn new() -> Self {
        Self {
            buckets: vec![None; MIN_STRTAB_SIZE],
            nuse: 0,
        }
    }

    fn slot(&self, hash: u32) -> usize {
        hash as usize & (self.buckets.len() - 1)
    }
}

impl Heap {
    /// Returns the string object for `bytes`, interning short strings.
    pub fn new_string(&mut self, bytes: &[u8]) -> StrRef {
        if bytes.len() <= MAX_SHORT_LEN {
            self.intern(bytes)
        } else {
            self.new_long_string(bytes)
        }
    }

    /// Returns the unique short string with these contents.
    ///
    /// A string that is unreachable but not yet swept is revived rather
    /// than duplicated.
    pub fn intern(&mut self, bytes: &[u8]) -> StrRef {
        debug_assert!(bytes.len() <= MAX_SHORT_LEN);
        let hash = hash_bytes(bytes, self.seed);
        let mut cursor = self.strt.buckets[self.strt.slot(hash)];
        while let Some(s) = cursor {
            let candidate = &self.strings[s];
            let found = candidate.hash.get() == hash && &*candidate.bytes == bytes;
            cursor = candidate.hnext;
            if found {
                let white = self.gc.current_white;
                let header = self.strings.header_mut(s);
                if header.is_dead(white) {
                    header.make_white(white);
                }
                return s;
            }
        }
        if self.strt.nuse >= self.strt.buckets.len() {
            let size = self.strt.buckets.len() * 2;
            self.resize_string_table(size);
        }
        let slot = self.strt.slot(hash);
        let string = LuaString {
            bytes: bytes.into(),
            hash: Cell::new(hash),
            hashed: Cell::new(true),
            short: true,
            hnext: self.strt.buckets[slot],
        };
        let size = string.heap_size();
        let s = self.strings.insert(self.gc.new_header(), string);
        self.strt.buckets[slot] = Some(s);
        self.strt.nuse += 1;
        self.gc.account_alloc(size);
        s
    }

    /// Creates a string that is never deduplicated.
    pub fn new_long_string(&mut self, bytes: &[u8]) -> StrRef {
        let string = LuaString {
            bytes: bytes.into(),
            hash: Cell::new(self.seed),
            hashed: Cell::new(false),
            short: false,
            hnext: None,
        };
        let size = string.heap_size();
        let s = self.strings.insert(self.gc.new_header(), string);
        self.gc.account_alloc(size);
        s
    }

    /// Contents of a string.
    pub fn str_bytes(&self, s: StrRef) -> &[u8] {
        self.strings[s].as_bytes()
    }

    /// Number of interned strings.
    pub fn interned_count(&self) -> usize {
        self.strt.nuse
    }

    /// Number of intern buckets.
    pub fn string_table_size(&self) -> usize {
        self.strt.buckets.len()
    }

    /// Unlinks a short string from its chain before it is freed.
    pub(crate) fn unlink_string(&mut self, s: StrRef) {
        let hash = self.strings[s].hash.get();
        let slot = self.strt.slot(hash);
        let next = self.strings[s].hnext;
        if self.strt.buckets[slot] == Some(s) {
            self.strt.buckets[slot] = next;
        } else {
            let mut cursor = self.strt.buckets[slot];
            while let Some(c) = cursor {
                if self.strings[c].hnext == Some(s) {
                    self.strings[c].hnext = next;
                    break;
                }
                cursor = self.strings[c].hnext;
            }
        }
        self.strt.nuse -= 1;
    }

    /// Rehashes the intern table into `new_size` buckets (a power of two).
    pub(crate) fn resize_string_table(&mut self, new_size: usize) {
        let old_size = self.strt.buckets.len();
        let old = std::mem::replace(&mut self.strt.buckets, vec![None; new_size]);
        for head in old {
            let mut cursor = head;
            while let Some(s) = cursor {
                let string = &mut self.strings[s];
                cursor = string.hnext;
                let slot = string.hash.get() as usize & (new_size - 1);
                string.hnext = self.strt.buckets[slot];
                self.strt.buckets[slot] = Some(s);
            }
        }
        let delta = (new_size as isize - old_size as isize)
            * std::mem::size_of::<Option<StrRef>>() as isize;
        self.gc.account_delta(delta);
        debug!(old_size, new_size, "string table resized");
    }

    /// Halves the intern table when it is less than a quarter full.
    pub(crate) fn shrink_string_table(&mut self) {
        let size = self.strt.buckets.len();
        if self.strt.nuse < size / 4 && size / 2 >= MIN_STRTAB_SIZE {
            self.resize_string_table(size / 2);
        }
    }
}
