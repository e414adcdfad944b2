//! Ember VM Core Runtime
//!
//! This crate provides the embeddable runtime:
//! - Dynamic values and interned strings
//! - Tables, arrays, closures, classes, generators and user data
//! - Reference counting plus a cycle collector
//! - The register-based interpreter with traps, generators and threads

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod gc;
pub mod object;
pub mod stack;
pub mod string;
pub mod value;
pub mod vm;

pub use gc::{Collectable, GarbageCollector, GcStats};
pub use object::{
    Array, Class, Closure, Generator, GeneratorState, Instance, MetaMethod, NativeClosure,
    NativeFn, NativeReturn, Outer, ParamCheck, Prototype, Table, UserData,
};
pub use stack::{CallFrame, Stack, StackStats};
pub use string::{ScriptString, StringInterner};
pub use value::Value;
pub use vm::{ExecutionResult, RuntimeContext, ThreadState, Vm, VmOptions, VmStats};

use ember_bytecode::{SerializeError, VerifyError};

/// VM execution errors
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// Call depth or value stack exhausted
    #[error("Stack overflow")]
    StackOverflow,

    /// Too many nested native calls; never caught by script traps
    #[error("Native stack overflow")]
    NativeStackOverflow,

    /// Operation applied to a value of the wrong type
    #[error("Type error: {0}")]
    TypeError(String),

    /// Arithmetic failure such as integer division by zero
    #[error("Arithmetic error: {0}")]
    ArithmeticError(String),

    /// Index out of range
    #[error("Index error: {0}")]
    IndexError(String),

    /// Missing key or member
    #[error("Lookup error: {0}")]
    LookupError(String),

    /// Invalid structural change (locked class, delegate cycle, invalid key)
    #[error("Structural error: {0}")]
    StructuralError(String),

    /// Wrong argument count or argument type
    #[error("Argument error: {0}")]
    ArgumentError(String),

    /// Invalid generator transition
    #[error("Generator error: {0}")]
    GeneratorError(String),

    /// Invalid thread operation
    #[error("Thread error: {0}")]
    ThreadError(String),

    /// Invalid opcode
    #[error("Invalid opcode: {0}")]
    InvalidOpcode(u8),

    /// Runtime error
    #[error("Runtime error: {0}")]
    RuntimeError(String),

    /// Value raised by a THROW instruction or a native
    #[error("Uncaught exception: {0}")]
    Thrown(Value),

    /// Closure stream could not be decoded
    #[error("Serialization error: {0}")]
    Serialize(#[from] SerializeError),

    /// Decoded prototype failed verification
    #[error("Verification error: {0}")]
    Verify(#[from] VerifyError),
}

impl VmError {
    /// Errors that skip every trap and unwind to the host
    pub fn is_fatal(&self) -> bool {
        matches!(self, VmError::NativeStackOverflow)
    }
}

/// VM execution result
pub type VmResult<T> = Result<T, VmError>;
