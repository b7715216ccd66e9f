//! Typed generational arenas.
//!
//! Every collectable object lives in an arena slot together with its
//! [`GcHeader`]. Handles are `(index, generation)` pairs; freeing a slot bumps
//! its generation, so a handle that outlived its object no longer resolves.
//! Indexing with such a handle panics at the lookup site instead of reading
//! an unrelated object that happens to reuse the slot.

use core_types::GcRef;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

// ============================================================================
// Header
// ============================================================================

const WHITE0: u8 = 1 << 0;
const WHITE1: u8 = 1 << 1;
const BLACK: u8 = 1 << 2;
const WHITE_BITS: u8 = WHITE0 | WHITE1;

/// Generational age of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Age {
    /// Created in the current cycle
    #[default]
    New,
    /// Survived one minor collection
    Survival,
    /// Marked old by a forward barrier in this cycle
    Old0,
    /// First full cycle as old
    Old1,
    /// Really old (not visited in minor collections)
    Old,
    /// Old object touched in this cycle
    Touched1,
    /// Old object touched in the previous cycle
    Touched2,
}

impl Age {
    /// Age after surviving a minor collection.
    pub fn next(self) -> Age {
        match self {
            Age::New => Age::Survival,
            Age::Survival | Age::Old0 => Age::Old1,
            Age::Old1 | Age::Old => Age::Old,
            Age::Touched1 => Age::Touched1,
            Age::Touched2 => Age::Touched2,
        }
    }

    /// Whether the object counts as old.
    pub fn is_old(self) -> bool {
        self > Age::Survival
    }
}

/// Per-object collector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcHeader {
    marked: u8,
    age: Age,
    pub(crate) finobj: bool,
    pub(crate) fixed: bool,
}

impl GcHeader {
    /// Header of a fresh object, painted with the given current white.
    pub fn new(current_white: u8) -> Self {
        Self {
            marked: white_bit(current_white),
            age: Age::New,
            finobj: false,
            fixed: false,
        }
    }

    /// Not reached (yet) in the current cycle.
    #[inline]
    pub fn is_white(&self) -> bool {
        self.marked & WHITE_BITS != 0
    }

    /// Reached and fully traversed.
    #[inline]
    pub fn is_black(&self) -> bool {
        self.marked & BLACK != 0
    }

    /// Reached but children not traversed.
    #[inline]
    pub fn is_gray(&self) -> bool {
        self.marked & (WHITE_BITS | BLACK) == 0
    }

    /// Carries the white of the previous cycle (unreachable during a sweep).
    #[inline]
    pub fn is_dead(&self, current_white: u8) -> bool {
        !self.fixed && self.marked & white_bit(current_white ^ 1) != 0
    }

    /// Generational age.
    #[inline]
    pub fn age(&self) -> Age {
        self.age
    }

    /// Whether the object waits in the finalization set.
    pub fn is_finalizable(&self) -> bool {
        self.finobj
    }

    /// Whether the object is exempt from collection.
    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    pub(crate) fn set_age(&mut self, age: Age) {
        self.age = age;
    }

    pub(crate) fn set_gray(&mut self) {
        self.marked &= !(WHITE_BITS | BLACK);
    }

    pub(crate) fn set_black(&mut self) {
        self.marked = (self.marked & !WHITE_BITS) | BLACK;
    }

    pub(crate) fn make_white(&mut self, current_white: u8) {
        self.marked = (self.marked & !(WHITE_BITS | BLACK)) | white_bit(current_white);
    }
}

fn white_bit(white: u8) -> u8 {
    if white == 0 {
        WHITE0
    } else {
        WHITE1
    }
}

// ============================================================================
// Arena
// ============================================================================

/// A live object and its header.
#[derive(Debug)]
pub struct Entry<T> {
    /// Collector state
    pub header: GcHeader,
    /// The object
    pub value: T,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    entry: Option<Entry<T>>,
}

/// Slot storage for one kind of object.
#[derive(Debug)]
pub struct Arena<T, R: GcRef> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
    kind: &'static str,
    _marker: PhantomData<R>,
}

impl<T, R: GcRef> Arena<T, R> {
    /// Creates an empty arena; `kind` names the objects in panic messages.
    pub fn new(kind: &'static str) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            kind,
            _marker: PhantomData,
        }
    }

    /// Stores an object, reusing a freed slot when one is available.
    pub fn insert(&mut self, header: GcHeader, value: T) -> R {
        self.live += 1;
        let entry = Some(Entry { header, value });
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = entry;
                R::from_raw(index, slot.generation)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entry,
                });
                R::from_raw(index, 0)
            }
        }
    }

    /// Frees an object, returning it. Stale handles yield `None`.
    pub fn remove(&mut self, r: R) -> Option<T> {
        let slot = self.slots.get_mut(r.index() as usize)?;
        if slot.generation != r.generation() {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(r.index());
        self.live -= 1;
        Some(entry.value)
    }

    fn entry(&self, r: R) -> Option<&Entry<T>> {
        self.slots
            .get(r.index() as usize)
            .filter(|slot| slot.generation == r.generation())
            .and_then(|slot| slot.entry.as_ref())
    }

    fn entry_mut(&mut self, r: R) -> Option<&mut Entry<T>> {
        self.slots
            .get_mut(r.index() as usize)
            .filter(|slot| slot.generation == r.generation())
            .and_then(|slot| slot.entry.as_mut())
    }

    /// Whether the handle still names a live object.
    pub fn contains(&self, r: R) -> bool {
        self.entry(r).is_some()
    }

    /// Object behind a handle, if still live.
    pub fn get(&self, r: R) -> Option<&T> {
        self.entry(r).map(|e| &e.value)
    }

    /// Mutable object behind a handle, if still live.
    pub fn get_mut(&mut self, r: R) -> Option<&mut T> {
        self.entry_mut(r).map(|e| &mut e.value)
    }

    /// Header of a live object.
    ///
    /// # Panics
    ///
    /// Panics on a stale handle.
    pub fn header(&self, r: R) -> &GcHeader {
        match self.entry(r) {
            Some(e) => &e.header,
            None => self.stale(r),
        }
    }

    /// Mutable header of a live object.
    ///
    /// # Panics
    ///
    /// Panics on a stale handle.
    pub fn header_mut(&mut self, r: R) -> &mut GcHeader {
        let kind = self.kind;
        match self.entry_mut(r) {
            Some(e) => &mut e.header,
            None => panic!("stale {} reference {:?}", kind, r),
        }
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether the arena holds no live object.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of slots, live or free; sweep cursors range over this.
    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Handle of the live object in slot `index`, if any.
    pub fn ref_at(&self, index: u32) -> Option<R> {
        let slot = self.slots.get(index as usize)?;
        slot.entry
            .as_ref()
            .map(|_| R::from_raw(index, slot.generation))
    }

    /// Handles of every live object, in slot order.
    pub fn refs(&self) -> Vec<R> {
        (0..self.capacity()).filter_map(|i| self.ref_at(i)).collect()
    }

    /// Iterates over live objects.
    pub fn iter(&self) -> impl Iterator<Item = (R, &Entry<T>)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.entry
                .as_ref()
                .map(|e| (R::from_raw(i as u32, slot.generation), e))
        })
    }

    fn stale(&self, r: R) -> ! {
        panic!("stale {} reference {:?}", self.kind, r)
    }
}

impl<T, R: GcRef> Index<R> for Arena<T, R> {
    type Output = T;

    fn index(&self, r: R) -> &T {
        match self.entry(r) {
            Some(e) => &e.value,
            None => self.stale(r),
        }
    }
}

impl<T, R: GcRef> IndexMut<R> for Arena<T, R> {
    fn index_mut(&mut self, r: R) -> &mut T {
        let kind = self.kind;
        match self.entry_mut(r) {
            Some(e) => &mut e.value,
            None => panic!("stale {} reference {:?}", kind, r),
        }
    }
}
