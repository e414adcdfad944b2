//! Opcode handler modules for the VM interpreter
//!
//! Each module implements a category of opcode handlers as methods on `Vm`.

pub mod arithmetic;
pub mod calls;
pub mod closures;
pub mod comparison;
pub mod control_flow;
pub mod exceptions;
pub mod generators;
pub mod iteration;
pub mod loads;
pub mod objects;
