//! Base library
//!
//! Global functions installed by [`register_base_library`]:
//!
//! | Name            | Arguments                  | Result                          |
//! |-----------------|----------------------------|---------------------------------|
//! | `print`         | value                      | writes its text, no value       |
//! | `assert`        | condition, message?        | throws when condition is falsy  |
//! | `len`           | string, array or table     | integer                         |
//! | `sort`          | array, comparator?         | sorts in place, no value        |
//! | `collectgarbage`|                            | objects freed                   |
//! | `suspend`       | value?                     | suspends the thread             |
//! | `newthread`     | function                   | thread                          |
//! | `threadcall`    | thread, args...            | return or suspension value      |
//! | `threadwakeup`  | thread, value?             | return or suspension value      |
//! | `threadstatus`  | thread                     | "idle", "running", "suspended"  |
//! | `getroottable`  |                            | root table                      |

use crate::object::{quicksort, NativeFn, NativeReturn, ParamCheck};
use crate::value::{ArrayRef, ThreadRef, Value};
use crate::vm::interpreter::Vm;
use crate::vm::thread;
use crate::{VmError, VmResult};

const BASE_LIBRARY: &[(&str, NativeFn, ParamCheck, Option<&str>)] = &[
    ("print", base_print, ParamCheck::Exact(2), None),
    ("assert", base_assert, ParamCheck::AtLeast(2), None),
    ("len", base_len, ParamCheck::Exact(2), Some(".s|a|t")),
    ("sort", base_sort, ParamCheck::AtLeast(2), Some(".ac")),
    ("collectgarbage", base_collect_garbage, ParamCheck::Exact(1), None),
    ("suspend", base_suspend, ParamCheck::AtLeast(1), None),
    ("newthread", base_new_thread, ParamCheck::Exact(2), Some(".c|y")),
    ("threadcall", base_thread_call, ParamCheck::AtLeast(2), Some(".v")),
    ("threadwakeup", base_thread_wakeup, ParamCheck::AtLeast(2), Some(".v")),
    ("threadstatus", base_thread_status, ParamCheck::Exact(2), Some(".v")),
    ("getroottable", base_get_root_table, ParamCheck::Exact(1), None),
];

/// Install the base library in the root table
pub fn register_base_library(vm: &mut Vm) -> VmResult<()> {
    for (name, function, params, typemask) in BASE_LIBRARY {
        vm.register_native(name, *function, *params, *typemask)?;
    }
    tracing::debug!(functions = BASE_LIBRARY.len(), "base library registered");
    Ok(())
}

impl Vm {
    /// Sort an array in place, with the default ordering or a script comparator
    ///
    /// The comparator receives two values and returns a negative, zero or
    /// positive integer. It sees the array unsorted while the sort runs; a
    /// comparator that resizes the array fails the sort.
    pub fn sort_array(&mut self, array: &ArrayRef, comparator: Option<Value>) -> VmResult<()> {
        let mut values = array.borrow().values().to_vec();
        let len = values.len();
        match comparator {
            None => quicksort(&mut values, &mut |a: &Value, b: &Value| self.compare(a, b))?,
            Some(comparator) => {
                let this = Value::Table(self.root_table());
                quicksort(&mut values, &mut |a: &Value, b: &Value| {
                    match self.call_sync(&comparator, this.clone(), &[a.clone(), b.clone()])? {
                        Value::Integer(i) => Ok(i.cmp(&0)),
                        other => Err(VmError::TypeError(format!(
                            "sort comparator must return an integer, got '{}'",
                            other.type_name()
                        ))),
                    }
                })?
            }
        }
        let mut array = array.borrow_mut();
        if array.len() != len {
            return Err(VmError::RuntimeError(format!(
                "array resized from {} to {} during sort",
                len,
                array.len()
            )));
        }
        array.restore_values(values);
        Ok(())
    }
}

fn base_print(vm: &mut Vm) -> VmResult<NativeReturn> {
    let value = vm.arg(1);
    let text = vm.to_display_string(&value)?;
    vm.context().print(&text);
    Ok(NativeReturn::NoValue)
}

fn base_assert(vm: &mut Vm) -> VmResult<NativeReturn> {
    if vm.arg(1).is_truthy() {
        return Ok(NativeReturn::NoValue);
    }
    let message = match vm.arg(2) {
        Value::Null => vm.intern("assertion failed"),
        message => message,
    };
    Err(VmError::Thrown(message))
}

fn base_len(vm: &mut Vm) -> VmResult<NativeReturn> {
    let len = match vm.arg(1) {
        Value::String(s) => s.len(),
        Value::Array(a) => a.borrow().len(),
        Value::Table(t) => t.borrow().len(),
        other => {
            return Err(VmError::TypeError(format!(
                "'{}' has no length",
                other.type_name()
            )))
        }
    };
    Ok(Value::Integer(len as i64).into())
}

fn base_sort(vm: &mut Vm) -> VmResult<NativeReturn> {
    let array = vm.arg_array(1)?;
    let comparator = match vm.arg(2) {
        Value::Null => None,
        f => Some(f),
    };
    vm.sort_array(&array, comparator)?;
    Ok(NativeReturn::NoValue)
}

fn base_collect_garbage(vm: &mut Vm) -> VmResult<NativeReturn> {
    let freed = vm.collect_garbage();
    Ok(Value::Integer(freed as i64).into())
}

fn base_suspend(vm: &mut Vm) -> VmResult<NativeReturn> {
    Ok(NativeReturn::Suspend(vm.arg(1)))
}

fn base_new_thread(vm: &mut Vm) -> VmResult<NativeReturn> {
    let thread = vm.new_thread();
    thread.borrow_mut().set_thread_function(vm.arg(1))?;
    Ok(Value::Thread(thread).into())
}

fn thread_arg(vm: &Vm) -> VmResult<ThreadRef> {
    match vm.arg(1) {
        Value::Thread(thread) => Ok(thread),
        other => Err(VmError::ArgumentError(format!(
            "parameter 1 has an invalid type '{}'; expected: 'thread'",
            other.type_name()
        ))),
    }
}

fn base_thread_call(vm: &mut Vm) -> VmResult<NativeReturn> {
    let thread = thread_arg(vm)?;
    let args = vm.args();
    let result = thread::call(&thread, args.get(2..).unwrap_or_default())?;
    Ok(result.into_value().into())
}

fn base_thread_wakeup(vm: &mut Vm) -> VmResult<NativeReturn> {
    let thread = thread_arg(vm)?;
    let result = thread::wakeup(&thread, vm.arg(2))?;
    Ok(result.into_value().into())
}

fn base_thread_status(vm: &mut Vm) -> VmResult<NativeReturn> {
    let thread = thread_arg(vm)?;
    let status = thread::state(&thread).name();
    Ok(vm.intern(status).into())
}

fn base_get_root_table(vm: &mut Vm) -> VmResult<NativeReturn> {
    Ok(Value::Table(vm.root_table()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::NativeClosure;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn setup() -> (Vm, Rc<RefCell<Vec<String>>>) {
        let mut vm = Vm::new();
        register_base_library(&mut vm).unwrap();
        let lines = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&lines);
        vm.set_print_function(Some(Rc::new(move |text: &str| {
            sink.borrow_mut().push(text.to_string())
        })));
        (vm, lines)
    }

    fn global(vm: &Vm, name: &str) -> Value {
        vm.get_global(name).unwrap()
    }

    #[test]
    fn test_print_uses_host_callback() {
        let (mut vm, lines) = setup();
        let print = global(&vm, "print");
        vm.call(&print, &[Value::Integer(7)]).unwrap();
        let text = vm.intern("hi");
        vm.call(&print, &[text]).unwrap();
        assert_eq!(*lines.borrow(), vec!["7".to_string(), "hi".to_string()]);
    }

    #[test]
    fn test_len_and_sort() {
        let (mut vm, _) = setup();
        let array = vm.new_array(vec![Value::Integer(3), Value::Integer(1), Value::Integer(2)]);
        let sort = global(&vm, "sort");
        vm.call(&sort, &[array.clone()]).unwrap();
        let sorted: Vec<_> = array.as_array().unwrap().borrow().values().to_vec();
        assert_eq!(sorted, vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);

        let len = global(&vm, "len");
        assert_eq!(vm.call(&len, &[array]).unwrap(), Value::Integer(3));
        assert!(matches!(
            vm.call(&len, &[Value::Integer(1)]),
            Err(VmError::TypeError(_))
        ));
    }

    fn length_of_arr(vm: &mut Vm) -> VmResult<NativeReturn> {
        let len = match vm.get_global("arr") {
            Some(Value::Array(a)) => a.borrow().len() as i64,
            _ => -1,
        };
        let seen = vm.get_global("seen").unwrap();
        seen.as_array().unwrap().borrow_mut().push(Value::Integer(len));
        let (a, b) = (vm.arg(1), vm.arg(2));
        let ordering = vm.compare(&a, &b)?;
        Ok(Value::Integer(ordering as i64).into())
    }

    fn grow_arr(vm: &mut Vm) -> VmResult<NativeReturn> {
        if let Some(Value::Array(a)) = vm.get_global("arr") {
            a.borrow_mut().push(Value::Null);
        }
        Ok(Value::Integer(0).into())
    }

    #[test]
    fn test_sort_comparator_sees_whole_array() {
        let (mut vm, _) = setup();
        let array = vm.new_array(vec![Value::Integer(3), Value::Integer(1), Value::Integer(2)]);
        let seen = vm.new_array(Vec::new());
        vm.set_global("arr", array.clone()).unwrap();
        vm.set_global("seen", seen.clone()).unwrap();
        let comparator = vm.new_native(NativeClosure::new("length_of_arr", length_of_arr));

        let sort = global(&vm, "sort");
        vm.call(&sort, &[array.clone(), comparator]).unwrap();

        let sorted: Vec<_> = array.as_array().unwrap().borrow().values().to_vec();
        assert_eq!(sorted, vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
        let seen = seen.as_array().unwrap().borrow().values().to_vec();
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|len| *len == Value::Integer(3)));
    }

    #[test]
    fn test_sort_comparator_resizing_array_fails() {
        let (mut vm, _) = setup();
        let array = vm.new_array(vec![Value::Integer(2), Value::Integer(1)]);
        vm.set_global("arr", array.clone()).unwrap();
        let comparator = vm.new_native(NativeClosure::new("grow_arr", grow_arr));

        let sort = global(&vm, "sort");
        assert!(matches!(
            vm.call(&sort, &[array.clone(), comparator]),
            Err(VmError::RuntimeError(_))
        ));
        assert_eq!(array.as_array().unwrap().borrow().len(), 3);
    }

    #[test]
    fn test_assert_throws_message() {
        let (mut vm, _) = setup();
        let assert = global(&vm, "assert");
        let message = vm.intern("nope");
        match vm.call(&assert, &[Value::Bool(false), message]) {
            Err(VmError::Thrown(v)) => assert_eq!(v.as_str(), Some("nope")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(vm.call(&assert, &[Value::Integer(1)]).is_ok());
    }

    #[test]
    fn test_suspend_from_host_call() {
        let (mut vm, _) = setup();
        let suspend = global(&vm, "suspend");
        let result = vm.run(&suspend, &[Value::Integer(4)]).unwrap();
        assert!(result.is_suspended());
        assert_eq!(vm.state(), crate::vm::ThreadState::Suspended);
        let resumed = vm.wakeup(Value::Integer(9)).unwrap();
        assert_eq!(resumed.into_value(), Value::Integer(9));
    }
}
