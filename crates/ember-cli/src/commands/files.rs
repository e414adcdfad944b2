//! Reading closure files.

use anyhow::Context;
use ember_bytecode::{decode_proto, FunctionProto};
use std::path::Path;

/// Read the raw bytes of a closure file
pub fn read_bytes(path: &Path) -> anyhow::Result<Vec<u8>> {
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Read and decode a closure file without verifying it
pub fn read_proto(path: &Path) -> anyhow::Result<FunctionProto> {
    let bytes = read_bytes(path)?;
    decode_proto(&bytes).with_context(|| format!("Failed to decode {}", path.display()))
}
