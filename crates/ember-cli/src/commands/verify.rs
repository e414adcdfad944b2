//! `ember verify`: decode a closure file and check its structure.

use anyhow::Context;
use ember_bytecode::{verify_proto, FunctionProto};
use std::path::Path;

use super::files;

pub fn execute(path: &Path) -> anyhow::Result<()> {
    let proto = files::read_proto(path)?;
    verify_proto(&proto).with_context(|| format!("{} failed verification", path.display()))?;

    let (functions, instructions) = totals(&proto);
    println!(
        "{}: ok ({} functions, {} instructions)",
        path.display(),
        functions,
        instructions
    );
    Ok(())
}

/// Function and instruction counts over the whole prototype tree
fn totals(proto: &FunctionProto) -> (usize, usize) {
    proto
        .functions
        .iter()
        .map(totals)
        .fold((1, proto.instructions.len()), |(f, i), (cf, ci)| {
            (f + cf, i + ci)
        })
}
