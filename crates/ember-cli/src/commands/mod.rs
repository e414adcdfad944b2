//! CLI subcommand implementations.

pub mod disasm;
pub mod files;
pub mod run;
pub mod verify;
