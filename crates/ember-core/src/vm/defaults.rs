//! Default constants for VM configuration.
//!
//! Centralizes the limits shared by the stack, the string table, the
//! collector and [`super::VmOptions`].

/// Maximum nested native calls and run loops before a fatal overflow.
pub const DEFAULT_MAX_NATIVE_CALLS: usize = 100;

/// Maximum script call frames per thread.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 1024;

/// Initial register stack capacity in slots.
pub const DEFAULT_INITIAL_STACK_SIZE: usize = 1024;

/// Maximum register stack size in slots (1 Mi).
pub const DEFAULT_MAX_STACK_SIZE: usize = 1024 * 1024;

/// Registry length at which the collector prunes dead entries.
pub const DEFAULT_GC_PRUNE_THRESHOLD: usize = 1024;

/// Initial string table bucket count.
pub const DEFAULT_STRING_BUCKETS: usize = 32;
