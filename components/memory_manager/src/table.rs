//! Hybrid array/hash tables.
//!
//! A table keeps the values of keys `1..=n` in a dense array part and every
//! other key in a hash part of `2^k` nodes. Collisions are chained through a
//! relative `next` offset stored in each node; a colliding key that is not in
//! its main position is moved to a free node so that every chain starts at
//! its main position (Brent's variation).
//!
//! Removing a key only empties its value: the key stays in place to keep
//! chains intact and to let `next` continue a traversal, until the next
//! rehash drops it. Keys whose object has been collected are flagged dead and
//! can only be matched by `next`.

use crate::arena::Arena;
use crate::string::LuaString;
use core_types::{float_to_integer, GcRef, StrRef, TableRef, TagMethod, Value, F2I};
use thiserror::Error;

type Strings = Arena<LuaString, StrRef>;

/// Bits of the largest array-part index.
const MAX_ABITS: usize = 31;
/// Largest array part.
const MAX_ASIZE: u64 = 1 << MAX_ABITS;

/// Flag bits caching the absence of the fast metamethods.
pub const MASK_FLAGS: u8 = (1 << (TagMethod::Eq as u8 + 1)) - 1;

/// Errors raised by raw table stores and traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TableError {
    /// `nil` used as a key
    #[error("index is nil")]
    NilIndex,
    /// NaN used as a key
    #[error("index is NaN")]
    NaNIndex,
    /// `next` called with a key that is not in the table
    #[error("invalid key to 'next'")]
    InvalidNextKey,
}

/// One hash-part entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct Node {
    pub(crate) key: Value,
    pub(crate) dead: bool,
    pub(crate) val: Value,
    pub(crate) next: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Array(usize),
    Node(usize),
}

/// A table object.
#[derive(Debug, Default)]
pub struct Table {
    /// Cache of absent fast metamethods (bit set = absent)
    pub flags: u8,
    /// Metatable
    pub metatable: Option<TableRef>,
    pub(crate) array: Vec<Value>,
    pub(crate) node: Vec<Node>,
    lastfree: usize,
}

// ============================================================================
// Hashing
// ============================================================================

fn frexp(x: f64) -> (f64, i32) {
    if x == 0.0 || !x.is_finite() {
        return (x, 0);
    }
    let bits = x.to_bits();
    let exp = ((bits >> 52) & 0x7ff) as i32;
    if exp == 0 {
        let (m, e) = frexp(x * 2f64.powi(54));
        return (m, e - 54);
    }
    let mantissa = f64::from_bits((bits & !(0x7ffu64 << 52)) | (1022u64 << 52));
    (mantissa, exp - 1022)
}

fn hash_float(n: f64) -> u32 {
    let (m, e) = frexp(n);
    let m = m * -(i32::MIN as f64);
    if !(m >= i64::MIN as f64 && m < -(i64::MIN as f64)) {
        return 0;
    }
    let ni = m as i64;
    let u = (e as u32).wrapping_add(ni as u32);
    if u <= i32::MAX as u32 {
        u
    } else {
        !u
    }
}

fn ceil_log2(x: u64) -> usize {
    if x <= 1 {
        0
    } else {
        (64 - (x - 1).leading_zeros()) as usize
    }
}

fn array_index(k: i64) -> Option<u64> {
    let k = k as u64;
    if k.wrapping_sub(1) < MAX_ASIZE {
        Some(k)
    } else {
        None
    }
}

fn count_int(key: i64, nums: &mut [u32]) -> u32 {
    match array_index(key) {
        Some(k) => {
            nums[ceil_log2(k)] += 1;
            1
        }
        None => 0,
    }
}

/// Largest `n` (a power of two) such that more than half of `1..=n` is in
/// use; `na` becomes the number of keys that will go to the array part.
fn compute_sizes(nums: &[u32], na: &mut u32) -> usize {
    let mut a = 0u32;
    let mut in_array = 0u32;
    let mut optimal = 0usize;
    let mut twotoi = 1u64;
    let mut i = 0;
    while i < nums.len() && (*na as u64) > twotoi / 2 {
        a += nums[i];
        if a as u64 > twotoi / 2 {
            optimal = twotoi as usize;
            in_array = a;
        }
        i += 1;
        twotoi *= 2;
    }
    *na = in_array;
    optimal
}

/// Normalizes a key for storage: integral floats become integers.
pub fn normalize_key(key: Value) -> Result<Value, TableError> {
    match key {
        Value::Nil => Err(TableError::NilIndex),
        Value::Float(f) if f.is_nan() => Err(TableError::NaNIndex),
        Value::Float(f) => Ok(float_to_integer(f, F2I::Exact).map_or(key, Value::Integer)),
        _ => Ok(key),
    }
}

fn long_strings_equal(strings: &Strings, a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) => match (strings.get(*x), strings.get(*y)) {
            (Some(x), Some(y)) => !x.is_short() && !y.is_short() && x.as_bytes() == y.as_bytes(),
            _ => false,
        },
        _ => false,
    }
}

impl Table {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            flags: MASK_FLAGS,
            ..Self::default()
        }
    }

    /// Creates a table with preallocated parts.
    pub fn with_sizes(narray: usize, nhash: usize) -> Self {
        let mut t = Self::new();
        t.array = vec![Value::Nil; narray];
        t.set_node_vector(nhash);
        t
    }

    /// Length of the array part.
    pub fn array_size(&self) -> usize {
        self.array.len()
    }

    /// Number of hash nodes.
    pub fn node_size(&self) -> usize {
        self.node.len()
    }

    pub(crate) fn heap_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.array.len() * std::mem::size_of::<Value>()
            + self.node.len() * std::mem::size_of::<Node>()
    }

    fn set_node_vector(&mut self, size: usize) {
        if size == 0 {
            self.node = Vec::new();
            self.lastfree = 0;
        } else {
            let size = size.next_power_of_two();
            self.node = vec![Node::default(); size];
            self.lastfree = size;
        }
    }

    fn hash_mod(&self, n: u64) -> usize {
        (n % ((self.node.len() as u64 - 1) | 1)) as usize
    }

    fn hash_pow2(&self, h: u32) -> usize {
        h as usize & (self.node.len() - 1)
    }

    fn hash_int(&self, i: i64) -> usize {
        self.hash_mod(i as u64)
    }

    fn main_position(&self, strings: &Strings, key: &Value) -> usize {
        match *key {
            Value::Integer(i) => self.hash_int(i),
            Value::Float(n) => self.hash_mod(hash_float(n) as u64),
            Value::String(s) => self.hash_pow2(strings[s].hash()),
            Value::Boolean(b) => self.hash_pow2(b as u32),
            Value::LightUserdata(p) => self.hash_mod(p as u32 as u64),
            Value::LightNative(f) => self.hash_mod(f.0 as u64),
            Value::Table(r) => self.hash_mod(r.index() as u64),
            Value::LuaClosure(r) => self.hash_mod(r.index() as u64),
            Value::NativeClosure(r) => self.hash_mod(r.index() as u64),
            Value::Userdata(r) => self.hash_mod(r.index() as u64),
            Value::Thread(r) => self.hash_mod(r.index() as u64),
            Value::Nil => 0,
        }
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    fn find_node(&self, strings: &Strings, key: &Value, dead_ok: bool) -> Option<usize> {
        if self.node.is_empty() {
            return None;
        }
        let mut i = self.main_position(strings, key);
        loop {
            let n = &self.node[i];
            let hit = if n.dead {
                dead_ok && key.is_collectable() && n.key == *key
            } else {
                n.key == *key || long_strings_equal(strings, &n.key, key)
            };
            if hit {
                return Some(i);
            }
            if n.next == 0 {
                return None;
            }
            i = (i as i64 + n.next as i64) as usize;
        }
    }

    fn find_int_node(&self, key: i64) -> Option<usize> {
        if self.node.is_empty() {
            return None;
        }
        let mut i = self.hash_int(key);
        loop {
            let n = &self.node[i];
            if !n.dead && n.key == Value::Integer(key) {
                return Some(i);
            }
            if n.next == 0 {
                return None;
            }
            i = (i as i64 + n.next as i64) as usize;
        }
    }

    fn find_slot(&self, strings: &Strings, key: &Value) -> Option<Slot> {
        match *key {
            Value::Integer(i) => {
                if (i as u64).wrapping_sub(1) < self.array.len() as u64 {
                    Some(Slot::Array(i as usize - 1))
                } else {
                    self.find_int_node(i).map(Slot::Node)
                }
            }
            Value::Nil => None,
            _ => self.find_node(strings, key, false).map(Slot::Node),
        }
    }

    /// Value stored under an integer key (`nil` if absent).
    pub fn get_int(&self, key: i64) -> Value {
        if (key as u64).wrapping_sub(1) < self.array.len() as u64 {
            self.array[key as usize - 1]
        } else {
            self.find_int_node(key)
                .map_or(Value::Nil, |i| self.node[i].val)
        }
    }

    /// Raw lookup (`nil` if absent).
    pub fn get(&self, strings: &Strings, key: &Value) -> Value {
        let key = match *key {
            Value::Float(f) => match float_to_integer(f, F2I::Exact) {
                Some(i) => Value::Integer(i),
                None if f.is_nan() => return Value::Nil,
                None => *key,
            },
            _ => *key,
        };
        match self.find_slot(strings, &key) {
            Some(Slot::Array(i)) => self.array[i],
            Some(Slot::Node(i)) => self.node[i].val,
            None => Value::Nil,
        }
    }

    // ========================================================================
    // Insertion
    // ========================================================================

    /// Raw store. Storing `nil` under an absent key is a no-op.
    pub fn set(&mut self, strings: &Strings, key: Value, val: Value) -> Result<(), TableError> {
        let key = normalize_key(key)?;
        if let Some(slot) = self.find_slot(strings, &key) {
            self.write(slot, val);
            return Ok(());
        }
        if !val.is_nil() {
            self.new_key(strings, key, val);
        }
        Ok(())
    }

    /// Raw store under an integer key.
    pub fn set_int(&mut self, strings: &Strings, key: i64, val: Value) {
        if (key as u64).wrapping_sub(1) < self.array.len() as u64 {
            self.array[key as usize - 1] = val;
        } else if let Some(i) = self.find_int_node(key) {
            self.node[i].val = val;
        } else if !val.is_nil() {
            self.new_key(strings, Value::Integer(key), val);
        }
    }

    fn write(&mut self, slot: Slot, val: Value) {
        match slot {
            Slot::Array(i) => self.array[i] = val,
            Slot::Node(i) => self.node[i].val = val,
        }
    }

    fn new_key(&mut self, strings: &Strings, key: Value, val: Value) {
        if self.insert_node(strings, key, val) {
            return;
        }
        self.rehash(strings, &key);
        match self.find_slot(strings, &key) {
            Some(slot) => self.write(slot, val),
            None => {
                let inserted = self.insert_node(strings, key, val);
                debug_assert!(inserted, "rehash left no free node");
            }
        }
    }

    fn free_position(&mut self) -> Option<usize> {
        while self.lastfree > 0 {
            self.lastfree -= 1;
            let n = &self.node[self.lastfree];
            if n.key.is_nil() && !n.dead {
                return Some(self.lastfree);
            }
        }
        None
    }

    /// Inserts a key known to be absent into the hash part. Returns `false`
    /// when there is no free node.
    fn insert_node(&mut self, strings: &Strings, key: Value, val: Value) -> bool {
        if self.node.is_empty() {
            return false;
        }
        let mut mp = self.main_position(strings, &key);
        if !self.node[mp].val.is_nil() {
            let f = match self.free_position() {
                Some(f) => f,
                None => return false,
            };
            let mut other = self.main_position(strings, &self.node[mp].key);
            if other != mp {
                // colliding node is out of its main position: move it away
                while (other as i64 + self.node[other].next as i64) as usize != mp {
                    other = (other as i64 + self.node[other].next as i64) as usize;
                }
                self.node[other].next = (f as i64 - other as i64) as i32;
                self.node[f] = self.node[mp];
                if self.node[mp].next != 0 {
                    self.node[f].next += (mp as i64 - f as i64) as i32;
                    self.node[mp].next = 0;
                }
                self.node[mp].val = Value::Nil;
            } else {
                // colliding node is in its main position: chain the new key
                self.node[f].next = if self.node[mp].next != 0 {
                    (mp as i64 + self.node[mp].next as i64 - f as i64) as i32
                } else {
                    0
                };
                self.node[mp].next = (f as i64 - mp as i64) as i32;
                mp = f;
            }
        }
        let n = &mut self.node[mp];
        n.key = key;
        n.dead = false;
        n.val = val;
        true
    }

    // ========================================================================
    // Rehash
    // ========================================================================

    fn num_use_array(&self, nums: &mut [u32]) -> u32 {
        let asize = self.array.len() as u64;
        let mut ause = 0;
        let mut i = 1u64;
        let mut ttlg = 1u64;
        for lg in 0..=MAX_ABITS {
            let mut lim = ttlg;
            if lim > asize {
                lim = asize;
                if i > lim {
                    break;
                }
            }
            let mut lc = 0;
            while i <= lim {
                if !self.array[i as usize - 1].is_nil() {
                    lc += 1;
                }
                i += 1;
            }
            nums[lg] += lc;
            ause += lc;
            ttlg *= 2;
        }
        ause
    }

    fn num_use_hash(&self, nums: &mut [u32], na: &mut u32) -> u32 {
        let mut total = 0;
        let mut ause = 0;
        for n in self.node.iter().rev() {
            if !n.val.is_nil() {
                if let Value::Integer(k) = n.key {
                    ause += count_int(k, nums);
                }
                total += 1;
            }
        }
        *na += ause;
        total
    }

    fn rehash(&mut self, strings: &Strings, extra: &Value) {
        let mut nums = [0u32; MAX_ABITS + 1];
        let mut na = self.num_use_array(&mut nums);
        let mut total = na;
        total += self.num_use_hash(&mut nums, &mut na);
        if let Value::Integer(k) = *extra {
            na += count_int(k, &mut nums);
        }
        total += 1;
        let asize = compute_sizes(&nums, &mut na);
        self.resize(strings, asize, (total - na) as usize);
    }

    /// Resizes both parts, re-inserting every entry.
    pub fn resize(&mut self, strings: &Strings, new_asize: usize, nhsize: usize) {
        let old_nodes = std::mem::take(&mut self.node);
        self.set_node_vector(nhsize);
        if new_asize < self.array.len() {
            let vanishing: Vec<Value> = self.array.drain(new_asize..).collect();
            for (j, v) in vanishing.into_iter().enumerate() {
                if !v.is_nil() {
                    self.insert_node(strings, Value::Integer((new_asize + j + 1) as i64), v);
                }
            }
        } else {
            self.array.resize(new_asize, Value::Nil);
        }
        for n in old_nodes.into_iter().filter(|n| !n.val.is_nil()) {
            match self.find_slot(strings, &n.key) {
                Some(slot) => self.write(slot, n.val),
                None => {
                    self.insert_node(strings, n.key, n.val);
                }
            }
        }
    }

    // ========================================================================
    // Length and traversal
    // ========================================================================

    fn hash_search(&self, mut j: u64) -> u64 {
        let mut i;
        if j == 0 {
            j = 1;
        }
        loop {
            i = j;
            if j <= i64::MAX as u64 / 2 {
                j *= 2;
            } else {
                j = i64::MAX as u64;
                if self.get_int(j as i64).is_nil() {
                    break;
                }
                return j;
            }
            if self.get_int(j as i64).is_nil() {
                break;
            }
        }
        while j - i > 1 {
            let m = (i + j) / 2;
            if self.get_int(m as i64).is_nil() {
                j = m;
            } else {
                i = m;
            }
        }
        i
    }

    /// A border: `n` such that `t[n]` is non-nil and `t[n + 1]` is nil, or
    /// `0` when `t[1]` is nil.
    pub fn len(&self) -> u64 {
        let limit = self.array.len();
        if limit > 0 && self.array[limit - 1].is_nil() {
            if limit >= 2 && !self.array[limit - 2].is_nil() {
                return (limit - 1) as u64;
            }
            let (mut i, mut j) = (0usize, limit);
            while j - i > 1 {
                let m = (i + j) / 2;
                if self.array[m - 1].is_nil() {
                    j = m;
                } else {
                    i = m;
                }
            }
            return i as u64;
        }
        if self.node.is_empty() || self.get_int(limit as i64 + 1).is_nil() {
            return limit as u64;
        }
        self.hash_search(limit as u64)
    }

    /// Whether the table has no entries at all.
    pub fn is_empty(&self) -> bool {
        self.array.iter().all(Value::is_nil) && self.node.iter().all(|n| n.val.is_nil())
    }

    fn find_index(&self, strings: &Strings, key: &Value) -> Result<usize, TableError> {
        match *key {
            Value::Nil => Ok(0),
            Value::Integer(i) if (i as u64).wrapping_sub(1) < self.array.len() as u64 => {
                Ok(i as usize)
            }
            _ => {
                let key = match *key {
                    Value::Float(f) => float_to_integer(f, F2I::Exact).map_or(*key, Value::Integer),
                    k => k,
                };
                match self.find_node(strings, &key, true) {
                    Some(i) => Ok(self.array.len() + i + 1),
                    None => Err(TableError::InvalidNextKey),
                }
            }
        }
    }

    /// Entry following `key` in traversal order (`nil` starts a traversal).
    pub fn next(
        &self,
        strings: &Strings,
        key: &Value,
    ) -> Result<Option<(Value, Value)>, TableError> {
        let asize = self.array.len();
        let mut i = self.find_index(strings, key)?;
        while i < asize {
            if !self.array[i].is_nil() {
                return Ok(Some((Value::Integer(i as i64 + 1), self.array[i])));
            }
            i += 1;
        }
        for n in &self.node[i - asize..] {
            if !n.val.is_nil() {
                return Ok(Some((n.key, n.val)));
            }
        }
        Ok(None)
    }

    /// Iterates over the live entries.
    pub fn iter(&self) -> impl Iterator<Item = (Value, Value)> + '_ {
        let array = self
            .array
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_nil())
            .map(|(i, v)| (Value::Integer(i as i64 + 1), *v));
        let nodes = self
            .node
            .iter()
            .filter(|n| !n.val.is_nil())
            .map(|n| (n.key, n.val));
        array.chain(nodes)
    }
}
