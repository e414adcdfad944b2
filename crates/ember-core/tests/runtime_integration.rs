//! Integration tests for the runtime around the interpreter
//!
//! Covers cycle collection through the VM, closure serialization, threads
//! driven from script through the base library, generators and string
//! interning.

use std::rc::Rc;

use ember_bytecode::{FunctionBuilder, SerializeError};
use ember_core::vm::{register_base_library, thread};
use ember_core::{GeneratorState, ThreadState, Value, Vm, VmError};

// ============================================================================
// Garbage collection
// ============================================================================

#[test]
fn test_table_cycle_needs_collection() {
    let mut vm = Vm::new();
    let a = vm.new_table();
    let b = vm.new_table();
    vm.new_slot(&a, Value::Integer(1), b.clone()).unwrap();
    vm.new_slot(&b, Value::Integer(1), a.clone()).unwrap();

    let weak_a = Rc::downgrade(a.as_table().unwrap());
    let weak_b = Rc::downgrade(b.as_table().unwrap());
    drop(a);
    drop(b);
    assert!(weak_a.upgrade().is_some());
    assert!(weak_b.upgrade().is_some());

    assert!(vm.collect_garbage() >= 2);
    assert!(weak_a.upgrade().is_none());
    assert!(weak_b.upgrade().is_none());
    assert_eq!(vm.context().gc_stats().collections, 1);
}

#[test]
fn test_acyclic_graph_is_freed_by_refcount() {
    let mut vm = Vm::new();
    let before = vm.context().live_objects();
    let table = vm.new_table();
    let array = vm.new_array(vec![table.clone(), Value::Integer(3)]);
    let weak = Rc::downgrade(table.as_table().unwrap());
    drop(table);
    drop(array);

    assert!(weak.upgrade().is_none());
    assert_eq!(vm.context().live_objects(), before);
    assert_eq!(vm.collect_garbage(), 0);
}

#[test]
fn test_self_capturing_closure_is_collected() {
    let mut vm = Vm::new();
    let mut b = FunctionBuilder::new("recursive");
    b.outer_symbol("recursive");
    b.ret_null();
    let closure = vm.load_function(&b.build()).unwrap();
    let handle = closure.as_closure().unwrap().clone();
    handle.outer(0).unwrap().set(closure.clone());

    let weak = Rc::downgrade(&handle);
    drop(handle);
    drop(closure);
    assert!(weak.upgrade().is_some());
    assert!(vm.collect_garbage() >= 2);
    assert!(weak.upgrade().is_none());
}

#[test]
fn test_globals_survive_collection() {
    let mut vm = Vm::new();
    let a = vm.new_table();
    let b = vm.new_table();
    vm.new_slot(&a, Value::Integer(0), b.clone()).unwrap();
    vm.new_slot(&b, Value::Integer(0), a.clone()).unwrap();
    vm.set_global("keep", a).unwrap();
    let weak = Rc::downgrade(b.as_table().unwrap());
    drop(b);

    assert_eq!(vm.collect_garbage(), 0);
    assert!(weak.upgrade().is_some());
    assert!(vm.get_global("keep").is_some());
}

// ============================================================================
// Serialization
// ============================================================================

/// main(): return square(7) + bias where square is a nested function
fn program(vm: &Vm) -> Value {
    let mut square = FunctionBuilder::new("square");
    let x = square.param("x");
    square.mul(2, x, x);
    square.ret(2);

    let mut main = FunctionBuilder::new("main");
    main.source("program.nut");
    main.line(1);
    let index = main.function(square.build());
    main.closure(1, index);
    main.load_root(2);
    main.load_int(3, 7);
    main.call(4, 1, 2, 2);
    main.line(2);
    main.load(5, 0.5);
    main.add(6, 4, 5);
    main.ret(6);
    vm.load_function(&main.build()).unwrap()
}

#[test]
fn test_saved_closure_runs_after_loading() {
    let mut vm = Vm::new();
    let main = program(&vm);
    let expected = vm.call(&main, &[]).unwrap();
    assert_eq!(expected, Value::Float(49.5));

    let bytes = vm.save_closure(&main).unwrap();
    let loaded = vm.load_closure(&bytes).unwrap();
    assert_eq!(vm.call(&loaded, &[]).unwrap(), expected);

    let mut other = Vm::new();
    let moved = other.load_closure(&bytes).unwrap();
    assert_eq!(other.call(&moved, &[]).unwrap(), expected);
}

#[test]
fn test_damaged_sentinel_is_reported() {
    let vm = Vm::new();
    let main = program(&vm);
    let mut bytes = vm.save_closure(&main).unwrap();
    // First section sentinel follows the magic and the version
    bytes[8] ^= 0xFF;
    assert!(matches!(
        vm.load_closure(&bytes),
        Err(VmError::Serialize(SerializeError::SentinelMismatch { offset: 8, .. }))
    ));
}

#[test]
fn test_damaged_payload_is_reported() {
    let vm = Vm::new();
    let main = program(&vm);
    let mut bytes = vm.save_closure(&main).unwrap();
    let at = bytes
        .windows(6)
        .position(|w| w == b"square")
        .expect("function name in stream");
    bytes[at] = b'q';
    assert!(matches!(
        vm.load_closure(&bytes),
        Err(VmError::Serialize(SerializeError::ChecksumMismatch { .. }))
    ));
}

#[test]
fn test_truncated_stream_fails() {
    let vm = Vm::new();
    let main = program(&vm);
    let bytes = vm.save_closure(&main).unwrap();
    assert!(matches!(
        vm.load_closure(&bytes[..bytes.len() / 2]),
        Err(VmError::Serialize(_))
    ));
}

// ============================================================================
// Threads
// ============================================================================

/// worker(): return suspend(5) + 1
fn worker(vm: &mut Vm) -> Value {
    let mut b = FunctionBuilder::new("worker");
    b.load_root(1);
    b.get_k(2, 1, "suspend");
    b.load_root(3);
    b.load_int(4, 5);
    b.call(5, 2, 3, 2);
    b.load_int(6, 1);
    b.add(7, 5, 6);
    b.ret(7);
    let worker = vm.load_function(&b.build()).unwrap();
    vm.set_global("worker", worker.clone()).unwrap();
    worker
}

#[test]
fn test_script_drives_thread_through_base_library() {
    let mut vm = Vm::new();
    register_base_library(&mut vm).unwrap();
    worker(&mut vm);

    let mut b = FunctionBuilder::new("main");
    b.load_root(1);
    // t = newthread(worker)
    b.get_k(2, 1, "newthread");
    b.get_k(3, 1, "worker");
    b.load_root(4);
    b.mov(5, 3);
    b.call(6, 2, 4, 2);
    // first = threadcall(t)
    b.get_k(7, 1, "threadcall");
    b.load_root(8);
    b.mov(9, 6);
    b.call(10, 7, 8, 2);
    // status = threadstatus(t)
    b.get_k(11, 1, "threadstatus");
    b.load_root(12);
    b.mov(13, 6);
    b.call(14, 11, 12, 2);
    // last = threadwakeup(t, 7)
    b.get_k(15, 1, "threadwakeup");
    b.load_root(16);
    b.mov(17, 6);
    b.load_int(18, 7);
    b.call(19, 15, 16, 3);
    // return [first, status, last, t]
    b.new_array(20, 4);
    b.append(20, 10);
    b.append(20, 14);
    b.append(20, 19);
    b.append(20, 6);
    b.ret(20);
    let main = vm.load_function(&b.build()).unwrap();

    let result = vm.call(&main, &[]).unwrap();
    let values = result.as_array().unwrap().borrow().values().to_vec();
    assert_eq!(values[0], Value::Integer(5));
    assert_eq!(values[1].as_str(), Some("suspended"));
    assert_eq!(values[2], Value::Integer(8));
    let thread_ref = values[3].as_thread().unwrap();
    assert_eq!(thread::state(thread_ref), ThreadState::Idle);
    assert_eq!(vm.state(), ThreadState::Idle);
}

#[test]
fn test_host_suspends_and_wakes_thread() {
    let mut vm = Vm::new();
    register_base_library(&mut vm).unwrap();
    let entry = worker(&mut vm);
    let t = vm.new_thread();
    t.borrow_mut().set_thread_function(entry).unwrap();

    let first = thread::call(&t, &[]).unwrap();
    assert!(first.is_suspended());
    assert_eq!(*first.value(), Value::Integer(5));
    assert!(matches!(
        thread::wakeup(&t, Value::Integer(1)).map(|r| r.into_value()),
        Ok(Value::Integer(2))
    ));
    assert!(matches!(
        thread::wakeup(&t, Value::Null),
        Err(VmError::ThreadError(_))
    ));
}

#[test]
fn test_suspend_inside_native_callback_fails() {
    let mut vm = Vm::new();
    register_base_library(&mut vm).unwrap();

    // compare(a, b): return suspend(0)
    let mut b = FunctionBuilder::new("compare");
    b.param("a");
    b.param("b");
    b.load_root(3);
    b.get_k(4, 3, "suspend");
    b.load_root(5);
    b.load_int(6, 0);
    b.call(7, 4, 5, 2);
    b.ret(7);
    let compare = vm.load_function(&b.build()).unwrap();

    // sort runs the comparator from a native, so it cannot suspend there
    let array = vm.new_array(vec![Value::Integer(2), Value::Integer(1)]);
    let sort = vm.get_global("sort").unwrap();
    assert!(matches!(
        vm.call(&sort, &[array, compare]),
        Err(VmError::ThreadError(_))
    ));
    assert_eq!(vm.state(), ThreadState::Idle);
}

// ============================================================================
// Generators and strings
// ============================================================================

#[test]
fn test_generator_state_machine() {
    let mut vm = Vm::new();
    let mut g = FunctionBuilder::new("pair");
    g.generator();
    let first = g.param("first");
    g.yield_value(first);
    g.load_int(2, 2);
    g.mul(2, first, 2);
    g.yield_value(2);
    g.ret_null();
    let pair = vm.load_function(&g.build()).unwrap();

    let generator = vm.call(&pair, &[Value::Integer(4)]).unwrap();
    let generator = generator.as_generator().unwrap().clone();
    assert_eq!(generator.borrow().state(), GeneratorState::Suspended);
    assert_eq!(vm.resume_generator(&generator).unwrap(), Value::Integer(4));
    assert_eq!(generator.borrow().state(), GeneratorState::Suspended);
    assert_eq!(vm.resume_generator(&generator).unwrap(), Value::Integer(8));
    assert_eq!(vm.resume_generator(&generator).unwrap(), Value::Null);
    assert_eq!(generator.borrow().state(), GeneratorState::Dead);
    assert!(vm.resume_generator(&generator).is_err());
}

#[test]
fn test_interned_strings_share_storage() {
    let vm = Vm::new();
    let strings = vm.context().strings();
    let before = strings.len();

    let a = vm.intern("interned-once");
    let b = vm.intern("interned-once");
    assert!(Rc::ptr_eq(a.as_string().unwrap(), b.as_string().unwrap()));
    assert_eq!(strings.len(), before + 1);

    drop(a);
    assert_eq!(strings.len(), before + 1);
    drop(b);
    assert_eq!(strings.len(), before);
}
