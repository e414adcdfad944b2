//! `ember disasm`: print the instruction listing of a closure file.

use std::path::Path;

use super::files;

pub fn execute(path: &Path) -> anyhow::Result<()> {
    let proto = files::read_proto(path)?;
    if !proto.source_name.is_empty() {
        println!("; source {}", proto.source_name);
    }
    print!("{}", proto.disassemble());
    Ok(())
}
