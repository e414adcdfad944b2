//! Virtual machine
//!
//! - [`context`]: runtime state shared by every thread (strings, root table, collector)
//! - [`interpreter`]: the register-based dispatch loop and the host API
//! - [`thread`]: cooperative threads with whole-thread suspension
//! - [`baselib`]: the default global functions

pub mod baselib;
pub mod context;
pub mod defaults;
pub mod interpreter;
pub mod thread;

pub use baselib::register_base_library;
pub use context::{PrintFn, RuntimeContext, VmOptions};
pub use interpreter::{ArithOp, ExecutionResult, ThreadState, Vm, VmStats};
