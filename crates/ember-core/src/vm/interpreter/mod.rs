//! Interpreter state and host API
//!
//! A [`Vm`] owns one register stack, its call frames and its exception
//! traps. Script execution happens in nested run loops: the host entry
//! points start the outermost loop, and every native that calls back into
//! script (or every metamethod dispatched from an opcode) starts a nested
//! one. Each run loop and each native call counts against
//! [`VmOptions::max_native_calls`].

mod execution;
mod opcodes;

pub use execution::ExecutionResult;
pub use opcodes::arithmetic::ArithOp;

use std::rc::Rc;

use ember_bytecode::{decode_proto, encode_proto, verify_proto, FunctionProto};

use crate::object::{NativeClosure, NativeFn, ParamCheck, Prototype, UserData};
use crate::stack::Stack;
use crate::value::{ArrayRef, ClassRef, NativeRef, TableRef, Value};
use crate::vm::context::{PrintFn, RuntimeContext, VmOptions};
use crate::{VmError, VmResult};

/// Execution state of one interpreter thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// No script running
    Idle,
    /// Inside a run loop
    Running,
    /// Paused by a native; continue with [`Vm::wakeup`]
    Suspended,
}

impl ThreadState {
    /// Script-visible name
    pub fn name(self) -> &'static str {
        match self {
            ThreadState::Idle => "idle",
            ThreadState::Running => "running",
            ThreadState::Suspended => "suspended",
        }
    }
}

/// Interpreter counters
#[derive(Debug, Clone, Default)]
pub struct VmStats {
    /// Script frames entered
    pub calls: u64,

    /// Native functions invoked
    pub native_calls: u64,

    /// Calls that reused the caller's frame
    pub tail_calls: u64,

    /// Frames discarded while unwinding an error
    pub frames_unwound: u64,

    /// Errors caught by script traps
    pub errors_caught: u64,

    /// Generators created
    pub generators_created: u64,
}

/// Exception trap registered by PUSHTRAP
#[derive(Debug, Clone, Copy)]
pub(crate) struct Trap {
    /// Index of the frame that pushed the trap
    pub frame: usize,
    /// Handler instruction
    pub ip: usize,
    /// Stack length to restore
    pub stack_top: usize,
    /// Register receiving the error value
    pub ex_target: u8,
}

/// Active native call
pub(crate) struct NativeFrame {
    pub closure: NativeRef,
    pub base: usize,
    pub nargs: usize,
}

/// Where a suspended thread continues
#[derive(Debug, Clone, Copy)]
pub(crate) struct SuspendPoint {
    /// Register receiving the wakeup value
    pub target: Option<u8>,
    /// Root frame of the suspended run loop
    pub root_depth: usize,
    /// Stack length before the host entry
    pub stack_base: usize,
}

/// Ember virtual machine
pub struct Vm {
    pub(crate) ctx: Rc<RuntimeContext>,
    pub(crate) stack: Stack,
    pub(crate) traps: Vec<Trap>,
    pub(crate) native_frames: Vec<NativeFrame>,

    /// Run loops plus native calls currently active
    pub(crate) native_calls: usize,

    /// Run loops currently active
    pub(crate) nesting: usize,

    /// Synchronous calls from natives, metamethods or the error handler
    pub(crate) sync_calls: usize,

    pub(crate) state: ThreadState,
    pub(crate) suspended: Option<SuspendPoint>,
    pub(crate) stats: VmStats,

    /// Threads share the runtime and never shut it down
    pub(crate) is_thread: bool,

    /// Function run by `threadcall`
    pub(crate) entry: Option<Value>,
}

impl Vm {
    /// Create a VM with a fresh runtime and default options
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    /// Create a VM with a fresh runtime
    pub fn with_options(options: VmOptions) -> Self {
        Self::from_context(RuntimeContext::new(options), false)
    }

    pub(crate) fn from_context(ctx: Rc<RuntimeContext>, is_thread: bool) -> Self {
        let options = ctx.options();
        let stack = Stack::with_limits(
            options.initial_stack_size,
            options.max_stack_size,
            options.max_call_depth,
        );
        Self {
            ctx,
            stack,
            traps: Vec::new(),
            native_frames: Vec::new(),
            native_calls: 0,
            nesting: 0,
            sync_calls: 0,
            state: ThreadState::Idle,
            suspended: None,
            stats: VmStats::default(),
            is_thread,
            entry: None,
        }
    }

    // ===== Accessors =====

    /// Shared runtime
    pub fn context(&self) -> &Rc<RuntimeContext> {
        &self.ctx
    }

    /// Root (global) table
    pub fn root_table(&self) -> TableRef {
        self.ctx.root_table()
    }

    /// Intern a string value
    pub fn intern(&self, text: &str) -> Value {
        self.ctx.intern(text)
    }

    /// Thread state
    pub fn state(&self) -> ThreadState {
        self.state
    }

    /// Interpreter counters
    pub fn stats(&self) -> &VmStats {
        &self.stats
    }

    /// Register stack
    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    /// Check if this VM is a thread of another VM
    pub fn is_thread(&self) -> bool {
        self.is_thread
    }

    // ===== Object Creation =====

    /// Allocate a table value
    pub fn new_table(&self) -> Value {
        Value::Table(self.ctx.new_table())
    }

    /// Allocate an array value holding `values`
    pub fn new_array(&self, values: Vec<Value>) -> Value {
        Value::Array(self.ctx.array_from(values))
    }

    /// Allocate a class value
    pub fn new_class(&self, base: Option<ClassRef>) -> Value {
        Value::Class(self.ctx.new_class(base))
    }

    /// Wrap host data
    pub fn new_userdata(&self, data: UserData) -> Value {
        Value::UserData(self.ctx.new_userdata(data))
    }

    /// Wrap a host function without binding it
    pub fn new_native(&self, native: NativeClosure) -> Value {
        Value::NativeClosure(self.ctx.new_native(native))
    }

    /// Bind a host function in the root table
    ///
    /// `params` checks the argument count (including `this`) and
    /// `typemask` optionally checks each argument's type.
    pub fn register_native(
        &mut self,
        name: &str,
        function: NativeFn,
        params: ParamCheck,
        typemask: Option<&str>,
    ) -> VmResult<Value> {
        let mut native = NativeClosure::new(name, function).with_params(params);
        if let Some(mask) = typemask {
            native = native.with_typemask(mask)?;
        }
        let value = self.new_native(native);
        self.root_table()
            .borrow_mut()
            .new_slot(self.intern(name), value.clone())?;
        Ok(value)
    }

    /// Read a global
    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.root_table().borrow().get(&self.intern(name))
    }

    /// Create or replace a global
    pub fn set_global(&mut self, name: &str, value: Value) -> VmResult<()> {
        self.root_table()
            .borrow_mut()
            .new_slot(self.intern(name), value)
    }

    /// Install the handler receiving errors that escape every trap
    pub fn set_error_handler(&mut self, handler: Option<Value>) {
        self.ctx.set_error_handler(handler);
    }

    /// Route `print` output to a host callback
    pub fn set_print_function(&mut self, print: Option<PrintFn>) {
        self.ctx.set_print_function(print);
    }

    /// Run the cycle collector, returning the number of objects freed
    ///
    /// Values held in registers are roots, so this is safe between host
    /// calls as well as from a native.
    pub fn collect_garbage(&mut self) -> usize {
        self.ctx.collect_garbage()
    }

    // ===== Loading & Serialization =====

    /// Verify a compiled function and wrap it in a closure
    ///
    /// Captured variables of the top-level function start as null.
    pub fn load_function(&self, proto: &FunctionProto) -> VmResult<Value> {
        verify_proto(proto)?;
        let proto = Prototype::load(self.ctx.strings(), proto);
        Ok(self.closure_over(proto))
    }

    /// Verify a compiled function and load it as a prototype value
    pub fn load_prototype(&self, proto: &FunctionProto) -> VmResult<Value> {
        verify_proto(proto)?;
        Ok(Value::FuncProto(Prototype::load(self.ctx.strings(), proto)))
    }

    /// Create a closure from a prototype value
    pub fn new_closure(&self, proto: &Value) -> VmResult<Value> {
        match proto {
            Value::FuncProto(proto) => Ok(self.closure_over(Rc::clone(proto))),
            other => Err(VmError::TypeError(format!(
                "expected a function prototype, got '{}'",
                other.type_name()
            ))),
        }
    }

    fn closure_over(&self, proto: Rc<Prototype>) -> Value {
        let outers = proto
            .outer_values
            .iter()
            .map(|_| self.ctx.new_outer(Value::Null))
            .collect();
        Value::Closure(self.ctx.new_closure(proto, outers))
    }

    /// Serialize a closure
    ///
    /// # Errors
    ///
    /// Returns `VmError::StructuralError` for closures carrying captured
    /// values, which have no serialized form.
    pub fn save_closure(&self, closure: &Value) -> VmResult<Vec<u8>> {
        let closure = closure.as_closure().ok_or_else(|| {
            VmError::TypeError(format!("cannot serialize a '{}'", closure.type_name()))
        })?;
        if !closure.outers().is_empty() {
            return Err(VmError::StructuralError(
                "cannot serialize a closure with outer values".into(),
            ));
        }
        Ok(encode_proto(&closure.proto().to_function_proto()))
    }

    /// Decode, verify and load a serialized closure
    pub fn load_closure(&self, bytes: &[u8]) -> VmResult<Value> {
        let proto = decode_proto(bytes)?;
        self.load_function(&proto)
    }

    // ===== Native ABI =====

    /// Arguments of the running native, including `this`
    pub fn arg_count(&self) -> usize {
        self.native_frames.last().map_or(0, |f| f.nargs)
    }

    /// Argument `index` of the running native; 0 is `this`
    pub fn arg(&self, index: usize) -> Value {
        match self.native_frames.last() {
            Some(frame) if index < frame.nargs => self.stack.get(frame.base + index),
            _ => Value::Null,
        }
    }

    /// `this` of the running native
    pub fn this(&self) -> Value {
        self.arg(0)
    }

    /// All arguments of the running native, including `this`
    pub fn args(&self) -> Vec<Value> {
        match self.native_frames.last() {
            Some(frame) => self.stack.range(frame.base, frame.base + frame.nargs).to_vec(),
            None => Vec::new(),
        }
    }

    /// Free variable `index` bound to the running native
    pub fn native_outer(&self, index: usize) -> Value {
        self.native_frames
            .last()
            .map_or(Value::Null, |f| f.closure.outer(index))
    }

    /// Integer argument, or an argument error naming the position
    pub fn arg_integer(&self, index: usize) -> VmResult<i64> {
        match self.arg(index) {
            Value::Integer(i) => Ok(i),
            Value::Float(f) => Ok(f as i64),
            other => Err(VmError::ArgumentError(format!(
                "parameter {} has an invalid type '{}'; expected: 'integer'",
                index,
                other.type_name()
            ))),
        }
    }

    /// Array argument, or an argument error naming the position
    pub fn arg_array(&self, index: usize) -> VmResult<ArrayRef> {
        match self.arg(index) {
            Value::Array(a) => Ok(a),
            other => Err(VmError::ArgumentError(format!(
                "parameter {} has an invalid type '{}'; expected: 'array'",
                index,
                other.type_name()
            ))),
        }
    }

    // ===== Collector Support =====

    /// Visit every collectable object this VM references
    pub(crate) fn trace_refs(&self, visit: &mut dyn FnMut(usize)) {
        for value in self.stack.slots() {
            if let Some(addr) = value.gc_address() {
                visit(addr);
            }
        }
        for frame in self.stack.frames() {
            visit(crate::gc::address_of(&frame.closure));
            if let Some(generator) = &frame.generator {
                visit(crate::gc::address_of(generator));
            }
        }
        for frame in &self.native_frames {
            visit(crate::gc::address_of(&frame.closure));
        }
        if let Some(addr) = self.entry.as_ref().and_then(Value::gc_address) {
            visit(addr);
        }
    }

    /// Release everything this VM references
    pub(crate) fn drain_into(&mut self, garbage: &mut Vec<Value>) {
        self.stack.drain_into(garbage);
        garbage.extend(
            self.native_frames
                .drain(..)
                .map(|f| Value::NativeClosure(f.closure)),
        );
        garbage.extend(self.entry.take());
        self.traps.clear();
        self.suspended = None;
        self.state = ThreadState::Idle;
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        if self.is_thread {
            return;
        }
        let mut garbage = Vec::new();
        self.drain_into(&mut garbage);
        drop(garbage);
        self.ctx.shutdown();
    }
}
