//! Ember VM Bytecode Definitions
//!
//! This crate provides the register-based instruction set, the function
//! prototype format consumed by the interpreter, a builder used by hosts and
//! tests to assemble prototypes, a structural verifier, and the
//! sentinel-guarded binary format used to save and load closures.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod builder;
pub mod encoder;
pub mod instruction;
pub mod opcode;
pub mod proto;
pub mod serialize;
pub mod verify;

pub use builder::FunctionBuilder;
pub use encoder::{BytecodeReader, BytecodeWriter, DecodeError};
pub use instruction::{Instruction, NO_TARGET};
pub use opcode::{AppendKind, BitOp, CmpOp, NewObjKind, Opcode};
pub use proto::{FunctionProto, LineInfo, Literal, OuterDesc, OuterSource};
pub use serialize::{decode_proto, encode_proto, SerializeError};
pub use verify::{verify_proto, VerifyError};
