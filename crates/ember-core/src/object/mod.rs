//! Heap object model
//!
//! Every object kind is shared through `Rc`; mutable kinds sit behind a
//! `RefCell`. Handle aliases (`TableRef`, `ClassRef`, ...) live in
//! [`crate::value`].

pub mod array;
pub mod class;
pub mod closure;
pub mod generator;
pub mod prototype;
pub mod table;
pub mod userdata;

pub use array::{quicksort, Array, EmptyError, IndexError};
pub use class::{Class, Instance, Member, MetaMethod, CONSTRUCTOR_NAME};
pub use closure::{typemask, Closure, NativeClosure, NativeFn, NativeReturn, Outer, ParamCheck};
pub use generator::{Generator, GeneratorState, SavedTrap};
pub use prototype::Prototype;
pub use table::{Table, MIN_TABLE_SIZE};
pub use userdata::UserData;
