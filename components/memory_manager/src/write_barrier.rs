//! Write barriers.
//!
//! While the collector is marking, a black object must never point to a white
//! one. Every store of a collectable value into a heap object goes through
//! one of the barriers here:
//!
//! - [`Heap::barrier_forward`] marks the stored value (used where stores are
//!   rare: upvalues, metatables, joined upvalues)
//! - [`Heap::barrier_back`] turns the container gray again so it is
//!   re-traversed in the atomic step (used for tables and user values, which
//!   tend to receive many stores)
//!
//! In generational mode the barriers also maintain the old-to-young
//! invariant: a forward barrier from an old object ages the target to
//! [`Age::Old0`], a back barrier marks the container as touched.

use crate::arena::Age;
use crate::gc::{GcKind, GcPhase};
use crate::heap::Heap;
use core_types::{GcObjectRef, Value};

impl Heap {
    fn needs_barrier(&self, o: GcObjectRef, v: GcObjectRef) -> bool {
        self.header(o).is_black() && self.header(v).is_white()
    }

    /// Forward barrier for storing `v` into `o`.
    pub fn barrier_forward(&mut self, o: GcObjectRef, v: Value) {
        if let Some(target) = v.as_gc() {
            self.object_barrier(o, target);
        }
    }

    /// Forward barrier for making `o` point to object `v`.
    pub fn object_barrier(&mut self, o: GcObjectRef, v: GcObjectRef) {
        if !self.needs_barrier(o, v) {
            return;
        }
        if self.gc.phase <= GcPhase::Atomic {
            self.really_mark(v);
            if self.header(o).age().is_old() {
                self.header_mut(v).set_age(Age::Old0);
            }
        } else if self.gc.kind == GcKind::Incremental {
            // sweeping: no need to keep the invariant, just avoid repeating
            // the barrier for this object
            let white = self.gc.current_white;
            self.header_mut(o).make_white(white);
        }
    }

    /// Back barrier for storing `v` into container `o`.
    pub fn barrier_back(&mut self, o: GcObjectRef, v: Value) {
        let target = match v.as_gc() {
            Some(target) => target,
            None => return,
        };
        if !self.needs_barrier(o, target) {
            return;
        }
        let age = self.header(o).age();
        if age == Age::Touched2 {
            // already in the gray-again list
            self.header_mut(o).set_gray();
        } else {
            self.link_grayagain(o);
        }
        if age.is_old() {
            self.header_mut(o).set_age(Age::Touched1);
        }
    }
}
