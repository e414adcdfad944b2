//! Memory management
//!
//! Objects are reference counted through `Rc`, so acyclic garbage is freed
//! the moment its last reference drops. Reference cycles are reclaimed by
//! an explicit collection pass.
//!
//! # Architecture
//!
//! - **Collectable**: implemented by every object kind that can hold
//!   references (tables, arrays, closures, cells, classes, instances,
//!   generators, user data, threads)
//! - **GarbageCollector**: a registry of weak handles to every live
//!   collectable plus the trial-deletion pass
//!
//! # Collection
//!
//! ```text
//! gc_refs(n) = strong_count(n) - 1 - (references to n from other registered objects)
//! ```
//!
//! An object with `gc_refs > 0` is referenced from outside the object graph
//! (the interpreter stack, the host, a prototype) and is a root. Everything
//! reachable from a root survives; the rest is unreachable cycles, whose
//! contents are moved out so the counts can fall to zero.
//!
//! An object that is mutably borrowed while the pass runs cannot be traced
//! and is treated as a root.

mod collector;
mod trace;

pub use collector::{GarbageCollector, GcStats};

use std::rc::Rc;

use crate::value::Value;

/// Object that can take part in a reference cycle
pub trait Collectable {
    /// Report the address of every collectable this object references
    ///
    /// Returns false if the object is currently borrowed and could not be
    /// inspected.
    fn trace(&self, visit: &mut dyn FnMut(usize)) -> bool;

    /// Move every held reference into `garbage`
    fn clear(&self, garbage: &mut Vec<Value>);
}

/// Address identifying the allocation behind an `Rc`
pub fn address_of<T: ?Sized>(rc: &Rc<T>) -> usize {
    Rc::as_ptr(rc) as *const () as usize
}
