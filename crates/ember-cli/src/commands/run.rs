//! `ember run`: load a closure file and call it.

use anyhow::anyhow;
use ember_core::vm::register_base_library;
use ember_core::{ExecutionResult, Value, Vm, VmError};
use std::path::Path;

use super::files;

/// Script errors hold reference-counted values, so they are reported by text
fn script_error(error: VmError) -> anyhow::Error {
    anyhow!("{}", error)
}

pub fn execute(path: &Path, args: &[String]) -> anyhow::Result<()> {
    let bytes = files::read_bytes(path)?;
    let mut vm = Vm::new();
    register_base_library(&mut vm).map_err(script_error)?;

    let closure = vm
        .load_closure(&bytes)
        .map_err(|e| anyhow!("Failed to load {}: {}", path.display(), e))?;
    let args: Vec<Value> = args.iter().map(|a| vm.intern(a)).collect();

    let mut result = vm.run(&closure, &args).map_err(script_error)?;
    // There is no host loop to hand control to; a suspended script is woken with null.
    while let ExecutionResult::Suspended(value) = result {
        tracing::debug!(value = %value, "script suspended");
        result = vm.wakeup(Value::Null).map_err(script_error)?;
    }

    let value = result.into_value();
    if !value.is_null() {
        println!("{}", vm.to_display_string(&value).map_err(script_error)?);
    }
    Ok(())
}
