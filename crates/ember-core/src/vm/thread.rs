//! Cooperative threads
//!
//! A thread is a separate [`Vm`] with its own register stack and frames
//! that shares the creating VM's [`super::RuntimeContext`]. Only one of
//! them runs at a time: calling into a thread runs it to completion or
//! until a native suspends it, and [`wakeup`] continues it later.

use std::cell::RefCell;
use std::rc::Rc;

use crate::value::{ThreadRef, Value};
use crate::vm::interpreter::{ExecutionResult, ThreadState, Vm};
use crate::{VmError, VmResult};

impl Vm {
    /// Create a thread sharing this VM's runtime
    pub fn new_thread(&self) -> ThreadRef {
        let thread = Rc::new(RefCell::new(Vm::from_context(Rc::clone(&self.ctx), true)));
        self.ctx.register(&thread);
        thread
    }

    /// Set the function [`call`] runs on this thread
    pub fn set_thread_function(&mut self, entry: Value) -> VmResult<()> {
        if !entry.is_callable() && !matches!(entry, Value::Class(_)) {
            return Err(VmError::TypeError(format!(
                "a thread cannot run a '{}'",
                entry.type_name()
            )));
        }
        self.entry = Some(entry);
        Ok(())
    }

    /// Function this thread runs
    pub fn thread_function(&self) -> Option<&Value> {
        self.entry.as_ref()
    }
}

fn enter(thread: &ThreadRef) -> VmResult<std::cell::RefMut<'_, Vm>> {
    thread
        .try_borrow_mut()
        .map_err(|_| VmError::ThreadError("the thread is already running".into()))
}

/// Run the thread's function with `args`, `this` being the root table
///
/// # Errors
///
/// Returns `VmError::ThreadError` if the thread is running, suspended or
/// has no function, or any error its function raises.
pub fn call(thread: &ThreadRef, args: &[Value]) -> VmResult<ExecutionResult> {
    let mut vm = enter(thread)?;
    let entry = vm
        .entry
        .clone()
        .ok_or_else(|| VmError::ThreadError("the thread has no function".into()))?;
    vm.run(&entry, args)
}

/// Continue a suspended thread, delivering `value` to the native that suspended it
pub fn wakeup(thread: &ThreadRef, value: Value) -> VmResult<ExecutionResult> {
    enter(thread)?.wakeup(value)
}

/// State of a thread; a thread that cannot be borrowed is the one running
pub fn state(thread: &ThreadRef) -> ThreadState {
    thread
        .try_borrow()
        .map_or(ThreadState::Running, |vm| vm.state())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{NativeReturn, ParamCheck};
    use ember_bytecode::FunctionBuilder;

    fn pause(vm: &mut Vm) -> VmResult<NativeReturn> {
        Ok(NativeReturn::Suspend(vm.arg(1)))
    }

    /// worker(): return pause(1) + pause(2)
    fn worker(vm: &mut Vm) -> Value {
        vm.register_native("pause", pause, ParamCheck::Exact(2), None)
            .unwrap();
        let mut b = FunctionBuilder::new("worker");
        b.load_root(1);
        b.get_k(2, 1, "pause");
        b.load_root(3);
        b.load_int(4, 1);
        b.call(5, 2, 3, 2);
        b.load_root(3);
        b.load_int(4, 2);
        b.call(6, 2, 3, 2);
        b.add(7, 5, 6);
        b.ret(7);
        vm.load_function(&b.build()).unwrap()
    }

    #[test]
    fn test_thread_suspends_and_wakes_up() {
        let mut vm = Vm::new();
        let entry = worker(&mut vm);
        let thread = vm.new_thread();
        thread.borrow_mut().set_thread_function(entry).unwrap();

        let first = call(&thread, &[]).unwrap();
        assert!(first.is_suspended());
        assert_eq!(*first.value(), Value::Integer(1));
        assert_eq!(state(&thread), ThreadState::Suspended);

        let second = wakeup(&thread, Value::Integer(10)).unwrap();
        assert_eq!(*second.value(), Value::Integer(2));

        let done = wakeup(&thread, Value::Integer(20)).unwrap();
        assert!(done.is_completed());
        assert_eq!(done.into_value(), Value::Integer(30));
        assert_eq!(state(&thread), ThreadState::Idle);
    }

    #[test]
    fn test_suspended_thread_rejects_calls() {
        let mut vm = Vm::new();
        let entry = worker(&mut vm);
        let thread = vm.new_thread();
        thread.borrow_mut().set_thread_function(entry).unwrap();
        call(&thread, &[]).unwrap();
        assert!(matches!(call(&thread, &[]), Err(VmError::ThreadError(_))));
        assert!(matches!(
            vm.wakeup(Value::Null),
            Err(VmError::ThreadError(_))
        ));
    }

    #[test]
    fn test_threads_share_globals() {
        let vm = Vm::new();
        let thread = vm.new_thread();
        thread
            .borrow_mut()
            .set_global("shared", Value::Integer(5))
            .unwrap();
        assert_eq!(vm.get_global("shared"), Some(Value::Integer(5)));
    }
}
