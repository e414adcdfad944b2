//! Integration tests for the `ember` binary.
//!
//! Each test writes a closure file with the builder and the stream encoder,
//! then drives the binary on it.

use ember_bytecode::{encode_proto, FunctionBuilder, FunctionProto};
use std::path::PathBuf;
use std::process::{Command, Output};

fn write_fixture(name: &str, proto: &FunctionProto) -> PathBuf {
    let path = std::env::temp_dir().join(format!("ember-cli-{}-{}.emc", std::process::id(), name));
    std::fs::write(&path, encode_proto(proto)).expect("write fixture");
    path
}

fn ember(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ember"))
        .args(args)
        .output()
        .expect("run ember")
}

/// main(): print("hello"); return 6 * 7
fn hello() -> FunctionProto {
    let mut b = FunctionBuilder::new("main");
    b.source("hello.nut");
    b.line(1);
    b.load_root(1);
    b.get_k(2, 1, "print");
    b.load_root(3);
    b.load(4, "hello");
    b.call(5, 2, 3, 2);
    b.line(2);
    b.load_int(5, 6);
    b.load_int(6, 7);
    b.mul(7, 5, 6);
    b.ret(7);
    b.build()
}

#[test]
fn test_run_prints_output_and_result() {
    let path = write_fixture("run", &hello());
    let output = ember(&["run", path.to_str().unwrap()]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().collect::<Vec<_>>(), vec!["hello", "42"]);
    let _ = std::fs::remove_file(path);
}

#[test]
fn test_disasm_lists_instructions() {
    let path = write_fixture("disasm", &hello());
    let output = ember(&["disasm", path.to_str().unwrap()]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("function main"));
    assert!(stdout.contains("hello.nut"));
    let _ = std::fs::remove_file(path);
}

#[test]
fn test_verify_reports_counts() {
    let path = write_fixture("verify", &hello());
    let output = ember(&["verify", path.to_str().unwrap()]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ok (1 functions, 9 instructions)"));
    let _ = std::fs::remove_file(path);
}

#[test]
fn test_script_error_fails_the_run() {
    let mut b = FunctionBuilder::new("main");
    b.load(1, "bad");
    b.throw(1);
    let path = write_fixture("throw", &b.build());
    let output = ember(&["run", path.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("bad"));
    let _ = std::fs::remove_file(path);
}

#[test]
fn test_missing_file_fails() {
    let output = ember(&["verify", "/nonexistent/closure.emc"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("File not found"));
}
