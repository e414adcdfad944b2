//! Run loop, call protocol and error unwinding
//!
//! The interpreter returns an [`ExecutionResult`] to the host: a script
//! either completes with a value or suspends its thread. Errors travel as
//! `Err(VmError)` and are turned into script values only when a trap
//! catches them.

use std::rc::Rc;

use ember_bytecode::{Instruction, Opcode, NO_TARGET};

use super::{NativeFrame, SuspendPoint, ThreadState, Vm};
use crate::object::{MetaMethod, NativeReturn, Prototype};
use crate::stack::CallFrame;
use crate::value::{ClassRef, ClosureRef, NativeRef, Value};
use crate::{VmError, VmResult};

/// Result of running script code to a stopping point
#[derive(Debug, Clone)]
pub enum ExecutionResult {
    /// The call returned a value
    Completed(Value),

    /// The thread suspended itself with a value; continue with [`Vm::wakeup`]
    Suspended(Value),
}

impl ExecutionResult {
    /// Check if the call completed
    pub fn is_completed(&self) -> bool {
        matches!(self, ExecutionResult::Completed(_))
    }

    /// Check if the thread suspended
    pub fn is_suspended(&self) -> bool {
        matches!(self, ExecutionResult::Suspended(_))
    }

    /// Returned or suspension value
    pub fn value(&self) -> &Value {
        match self {
            ExecutionResult::Completed(v) | ExecutionResult::Suspended(v) => v,
        }
    }

    /// Take the returned or suspension value
    pub fn into_value(self) -> Value {
        match self {
            ExecutionResult::Completed(v) | ExecutionResult::Suspended(v) => v,
        }
    }
}

/// Result of executing a single opcode
///
/// Used internally by the interpreter to determine control flow.
#[derive(Debug)]
pub enum OpcodeResult {
    /// Continue to next instruction
    Continue,

    /// The run loop's root frame returned
    Return(Value),

    /// The thread suspended itself
    Suspend(Value),

    /// The instruction raised an error
    Error(VmError),
}

impl From<VmResult<()>> for OpcodeResult {
    #[inline]
    fn from(result: VmResult<()>) -> Self {
        match result {
            Ok(()) => OpcodeResult::Continue,
            Err(e) => OpcodeResult::Error(e),
        }
    }
}

impl From<VmResult<OpcodeResult>> for OpcodeResult {
    #[inline]
    fn from(result: VmResult<OpcodeResult>) -> Self {
        result.unwrap_or_else(OpcodeResult::Error)
    }
}

/// How a call got started
pub(crate) enum CallStart {
    /// A script frame was pushed; the run loop continues in it
    Pushed,
    /// The callee finished immediately (natives, classes, generators)
    Done(Value),
    /// A native asked to suspend the thread
    Suspend(Value),
}

pub(crate) fn no_frame() -> VmError {
    VmError::RuntimeError("no active call frame".into())
}

impl Vm {
    // ===== Host Entry Points =====

    /// Call `callee` with the root table as `this`
    ///
    /// If the script suspends its thread, the suspension value is returned
    /// and [`Vm::state`] reports `Suspended`.
    pub fn call(&mut self, callee: &Value, args: &[Value]) -> VmResult<Value> {
        self.run(callee, args).map(ExecutionResult::into_value)
    }

    /// Call `callee` with an explicit `this`
    pub fn call_with_this(
        &mut self,
        callee: &Value,
        this: Value,
        args: &[Value],
    ) -> VmResult<Value> {
        self.run_with_this(callee, this, args)
            .map(ExecutionResult::into_value)
    }

    /// Call `callee` with the root table as `this`, reporting suspension
    pub fn run(&mut self, callee: &Value, args: &[Value]) -> VmResult<ExecutionResult> {
        let this = Value::Table(self.ctx.root_table());
        self.run_with_this(callee, this, args)
    }

    /// Call `callee` with an explicit `this`, reporting suspension
    ///
    /// # Errors
    ///
    /// Returns the error that escaped every script trap. When this is the
    /// outermost call, the runtime's error handler has already been invoked
    /// with the error value.
    pub fn run_with_this(
        &mut self,
        callee: &Value,
        this: Value,
        args: &[Value],
    ) -> VmResult<ExecutionResult> {
        if self.state == ThreadState::Suspended {
            return Err(VmError::ThreadError(
                "cannot call into a suspended thread".into(),
            ));
        }
        let outermost = self.is_outermost();
        let previous = self.state;
        let stack_base = self.stack.len();
        let root_depth = self.stack.frame_count();

        self.state = ThreadState::Running;
        let result = self.push_args(this, args).and_then(|()| {
            match self.call_value(callee.clone(), stack_base, args.len() + 1, None, true)? {
                CallStart::Pushed => self.run_frames(root_depth),
                CallStart::Done(v) => Ok(ExecutionResult::Completed(v)),
                CallStart::Suspend(v) if outermost => {
                    self.suspended = Some(SuspendPoint {
                        target: None,
                        root_depth,
                        stack_base,
                    });
                    Ok(ExecutionResult::Suspended(v))
                }
                CallStart::Suspend(_) => Err(VmError::ThreadError(
                    "cannot suspend a thread from a nested call".into(),
                )),
            }
        });
        self.finish_entry(result, stack_base, root_depth, previous, outermost)
    }

    /// Continue a suspended thread, delivering `value` as the result of the
    /// native call that suspended it
    pub fn wakeup(&mut self, value: Value) -> VmResult<ExecutionResult> {
        if self.state != ThreadState::Suspended {
            return Err(VmError::ThreadError(format!(
                "cannot wake up a thread that is {}",
                self.state.name()
            )));
        }
        let point = self
            .suspended
            .take()
            .ok_or_else(|| VmError::ThreadError("missing suspension point".into()))?;
        tracing::debug!(frames = self.stack.frame_count(), "thread woken up");

        self.state = ThreadState::Running;
        let result = if self.stack.frame_count() <= point.root_depth {
            Ok(ExecutionResult::Completed(value))
        } else {
            let delivered = match point.target {
                Some(target) => self.set_reg(target, value),
                None => Ok(()),
            };
            delivered.and_then(|()| self.run_frames(point.root_depth))
        };
        self.finish_entry(
            result,
            point.stack_base,
            point.root_depth,
            ThreadState::Idle,
            true,
        )
    }

    fn is_outermost(&self) -> bool {
        self.nesting == 0 && self.native_frames.is_empty() && self.sync_calls == 0
    }

    fn push_args(&mut self, this: Value, args: &[Value]) -> VmResult<()> {
        self.stack.push(this)?;
        for arg in args {
            self.stack.push(arg.clone())?;
        }
        Ok(())
    }

    pub(crate) fn finish_entry(
        &mut self,
        result: VmResult<ExecutionResult>,
        stack_base: usize,
        root_depth: usize,
        previous: ThreadState,
        outermost: bool,
    ) -> VmResult<ExecutionResult> {
        match result {
            Ok(ExecutionResult::Suspended(value)) => {
                let target = self.suspended.take().and_then(|p| p.target);
                self.suspended = Some(SuspendPoint {
                    target,
                    root_depth,
                    stack_base,
                });
                self.state = ThreadState::Suspended;
                tracing::debug!(frames = self.stack.frame_count(), "thread suspended");
                Ok(ExecutionResult::Suspended(value))
            }
            Ok(completed) => {
                self.stack.truncate(stack_base);
                self.state = previous;
                Ok(completed)
            }
            Err(error) => {
                self.unwind_to(root_depth);
                self.stack.truncate(stack_base);
                self.state = previous;
                if outermost {
                    self.report_error(&error);
                }
                Err(error)
            }
        }
    }

    /// Hand an escaped error to the runtime's error handler
    fn report_error(&mut self, error: &VmError) {
        tracing::warn!(error = %error, "script error escaped to the host");
        let Some(handler) = self.ctx.error_handler() else {
            return;
        };
        // The handler is detached while it runs so its own errors do not recurse.
        self.ctx.set_error_handler(None);
        let value = self.error_value_of(error);
        let root = Value::Table(self.ctx.root_table());
        if let Err(e) = self.call_sync(&handler, root, &[value]) {
            tracing::warn!(error = %e, "error handler failed");
        }
        self.ctx.set_error_handler(Some(handler));
    }

    /// Script value carried by an error
    pub(crate) fn error_value(&self, error: VmError) -> Value {
        match error {
            VmError::Thrown(value) => value,
            other => self.ctx.intern(&other.to_string()),
        }
    }

    fn error_value_of(&self, error: &VmError) -> Value {
        match error {
            VmError::Thrown(value) => value.clone(),
            other => self.ctx.intern(&other.to_string()),
        }
    }

    // ===== Synchronous Calls =====

    /// Call `callee` from a native or a metamethod and wait for its result
    ///
    /// The thread cannot suspend inside such a call.
    pub fn call_sync(&mut self, callee: &Value, this: Value, args: &[Value]) -> VmResult<Value> {
        let base = self.stack.len();
        let result = self
            .push_args(this, args)
            .and_then(|()| self.call_at(callee.clone(), base, args.len() + 1));
        self.stack.truncate(base);
        result
    }

    /// Run `callee` on arguments already placed at `base`
    pub(crate) fn call_at(&mut self, callee: Value, base: usize, nargs: usize) -> VmResult<Value> {
        let saved_len = self.stack.len();
        let root_depth = self.stack.frame_count();
        self.sync_calls += 1;
        let result = match self.call_value(callee, base, nargs, None, true) {
            Ok(CallStart::Pushed) => self.run_frames(root_depth),
            Ok(CallStart::Done(v)) => Ok(ExecutionResult::Completed(v)),
            Ok(CallStart::Suspend(_)) => Err(VmError::ThreadError(
                "cannot suspend a thread from a nested call".into(),
            )),
            Err(e) => Err(e),
        };
        self.sync_calls -= 1;
        self.stack.resize(saved_len)?;
        match result? {
            ExecutionResult::Completed(v) => Ok(v),
            ExecutionResult::Suspended(_) => Err(VmError::ThreadError(
                "cannot suspend a thread from a nested call".into(),
            )),
        }
    }

    // ===== Call Protocol =====

    /// Start a call whose `this` and arguments occupy `base .. base + nargs`
    pub(crate) fn call_value(
        &mut self,
        callee: Value,
        base: usize,
        nargs: usize,
        target: Option<u8>,
        root: bool,
    ) -> VmResult<CallStart> {
        match callee {
            Value::Closure(closure) => {
                if closure.proto().is_generator {
                    return self.create_generator(closure, base, nargs).map(CallStart::Done);
                }
                self.enter_closure(closure, base, nargs, target, root)?;
                Ok(CallStart::Pushed)
            }
            Value::NativeClosure(native) => Ok(match self.call_native(&native, base, nargs)? {
                NativeReturn::Value(v) => CallStart::Done(v),
                NativeReturn::NoValue => CallStart::Done(Value::Null),
                NativeReturn::Suspend(v) => CallStart::Suspend(v),
            }),
            Value::Class(class) => self.construct(&class, base, nargs).map(CallStart::Done),
            other => {
                let Some(handler) = self.metamethod(&other, MetaMethod::Call) else {
                    return Err(VmError::TypeError(format!(
                        "attempt to call '{}'",
                        other.type_name()
                    )));
                };
                // `_call` receives the object as `this`, then the original `this` and arguments.
                let args = self.stack.range(base, base + nargs).to_vec();
                self.call_sync(&handler, other, &args).map(CallStart::Done)
            }
        }
    }

    pub(crate) fn enter_closure(
        &mut self,
        closure: ClosureRef,
        base: usize,
        nargs: usize,
        target: Option<u8>,
        root: bool,
    ) -> VmResult<()> {
        self.prepare_args(closure.proto(), base, nargs)?;
        self.stack.push_frame(CallFrame {
            closure,
            ip: 0,
            base,
            target,
            root,
            generator: None,
        })?;
        self.stats.calls += 1;
        Ok(())
    }

    /// Check the argument count and pack variadic arguments into `vargv`
    pub(crate) fn prepare_args(
        &mut self,
        proto: &Prototype,
        base: usize,
        nargs: usize,
    ) -> VmResult<()> {
        let nparams = proto.param_count();
        if proto.varparams {
            let fixed = nparams.saturating_sub(1);
            if nargs < fixed {
                return Err(arity_error(proto, nargs));
            }
            let extra = self.stack.take_range(base + fixed, base + nargs);
            let vargv = self.ctx.array_from(extra);
            self.stack.set(base + fixed, Value::Array(vargv))?;
        } else if nargs != nparams {
            return Err(arity_error(proto, nargs));
        }
        Ok(())
    }

    /// Calling a generator function captures its arguments without running it
    fn create_generator(&mut self, closure: ClosureRef, base: usize, nargs: usize) -> VmResult<Value> {
        let proto = Rc::clone(closure.proto());
        self.prepare_args(&proto, base, nargs)?;
        let mut window = self.stack.take_range(base, base + proto.param_count());
        window.resize(proto.stack_size, Value::Null);
        let generator = self.ctx.new_generator(closure, window);
        self.stats.generators_created += 1;
        Ok(Value::Generator(generator))
    }

    pub(crate) fn call_native(
        &mut self,
        native: &NativeRef,
        base: usize,
        nargs: usize,
    ) -> VmResult<NativeReturn> {
        native.check_args(self.stack.range(base, base + nargs))?;
        if self.native_calls >= self.ctx.options().max_native_calls {
            return Err(VmError::NativeStackOverflow);
        }
        self.native_calls += 1;
        self.native_frames.push(NativeFrame {
            closure: Rc::clone(native),
            base,
            nargs,
        });
        self.stats.native_calls += 1;

        let function = native.function();
        let result = function(self);

        self.native_frames.pop();
        self.native_calls -= 1;
        result
    }

    /// Calling a class creates an instance and runs its constructor on it
    fn construct(&mut self, class: &ClassRef, base: usize, nargs: usize) -> VmResult<Value> {
        let instance = Value::Instance(self.ctx.new_instance(class));
        let constructor = class.borrow().constructor();
        if let Some(constructor) = constructor {
            self.stack.set(base, instance.clone())?;
            self.call_at(constructor, base, nargs)?;
        }
        Ok(instance)
    }

    // ===== Run Loop =====

    /// Execute until the frame at `root_depth` returns or the thread suspends
    pub(crate) fn run_frames(&mut self, root_depth: usize) -> VmResult<ExecutionResult> {
        if self.native_calls >= self.ctx.options().max_native_calls {
            self.unwind_to(root_depth);
            return Err(VmError::NativeStackOverflow);
        }
        self.native_calls += 1;
        self.nesting += 1;
        let result = self.execute(root_depth);
        self.nesting -= 1;
        self.native_calls -= 1;
        result
    }

    fn execute(&mut self, root_depth: usize) -> VmResult<ExecutionResult> {
        loop {
            let result = match self.fetch()? {
                Some(instr) => self.dispatch(instr),
                // Falling off the end returns null.
                None => self.return_value(Value::Null).into(),
            };
            match result {
                OpcodeResult::Continue => {}
                OpcodeResult::Return(v) => return Ok(ExecutionResult::Completed(v)),
                OpcodeResult::Suspend(v) => return Ok(ExecutionResult::Suspended(v)),
                OpcodeResult::Error(e) => self.handle_error(e, root_depth)?,
            }
        }
    }

    #[inline]
    fn fetch(&mut self) -> VmResult<Option<Instruction>> {
        let frame = self.stack.current_frame_mut().ok_or_else(no_frame)?;
        let instr = frame.closure.proto().instructions.get(frame.ip).copied();
        if instr.is_some() {
            frame.ip += 1;
        }
        Ok(instr)
    }

    fn dispatch(&mut self, instr: Instruction) -> OpcodeResult {
        match instr.op {
            Opcode::Load
            | Opcode::LoadInt
            | Opcode::LoadFloat
            | Opcode::LoadNulls
            | Opcode::LoadBool
            | Opcode::LoadRoot
            | Opcode::Move => self.exec_load_ops(instr),

            Opcode::Get | Opcode::GetK | Opcode::Set | Opcode::NewSlot | Opcode::Delete => {
                self.exec_slot_ops(instr)
            }

            Opcode::NewObj
            | Opcode::AppendArray
            | Opcode::Delegate
            | Opcode::InstanceOf
            | Opcode::TypeOf => self.exec_object_ops(instr),

            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::Bitw
            | Opcode::Neg
            | Opcode::Not => self.exec_arithmetic_ops(instr),

            Opcode::Cmp | Opcode::Eq | Opcode::Ne => self.exec_comparison_ops(instr),

            Opcode::Jmp | Opcode::Jz | Opcode::And | Opcode::Or => {
                self.exec_control_flow_ops(instr)
            }

            Opcode::PrepCall
            | Opcode::PrepCallK
            | Opcode::Call
            | Opcode::TailCall
            | Opcode::Return => self.exec_call_ops(instr),

            Opcode::Closure | Opcode::GetOuter | Opcode::SetOuter => self.exec_closure_ops(instr),

            Opcode::PushTrap | Opcode::PopTrap | Opcode::Throw => self.exec_exception_ops(instr),

            Opcode::Yield | Opcode::Resume => self.exec_generator_ops(instr),

            Opcode::Foreach | Opcode::PostForeach => self.exec_iteration_ops(instr),
        }
    }

    // ===== Unwinding =====

    /// Route an error to the nearest trap of this run loop, or unwind it
    fn handle_error(&mut self, error: VmError, root_depth: usize) -> VmResult<()> {
        let trap = self
            .traps
            .last()
            .copied()
            .filter(|trap| trap.frame >= root_depth && !error.is_fatal());
        let Some(trap) = trap else {
            self.unwind_to(root_depth);
            return Err(error);
        };

        self.traps.pop();
        self.unwind_frames_above(trap.frame);
        self.stack.truncate(trap.stack_top);
        let frame = self.stack.current_frame_mut().ok_or_else(no_frame)?;
        frame.ip = trap.ip;
        let top = frame.top();
        self.stack.ensure(top)?;

        tracing::trace!(error = %error, frame = trap.frame, "error caught by trap");
        let value = self.error_value(error);
        self.set_reg(trap.ex_target, value)?;
        self.stats.errors_caught += 1;
        Ok(())
    }

    fn unwind_frames_above(&mut self, frame_index: usize) {
        while self.stack.frame_count() > frame_index + 1 {
            self.discard_frame();
        }
    }

    /// Pop every frame at or above `depth`
    pub(crate) fn unwind_to(&mut self, depth: usize) {
        while self.stack.frame_count() > depth {
            self.discard_frame();
        }
        self.drop_traps(depth);
    }

    fn discard_frame(&mut self) {
        if let Some(frame) = self.stack.pop_frame() {
            if let Some(generator) = &frame.generator {
                drop(generator.borrow_mut().kill());
            }
            self.stats.frames_unwound += 1;
        }
    }

    /// Forget traps registered by frames at or above `depth`
    pub(crate) fn drop_traps(&mut self, depth: usize) {
        while self.traps.last().is_some_and(|t| t.frame >= depth) {
            self.traps.pop();
        }
    }

    // ===== Registers =====

    #[inline]
    pub(crate) fn frame(&self) -> VmResult<&CallFrame> {
        self.stack.current_frame().ok_or_else(no_frame)
    }

    #[inline]
    pub(crate) fn base(&self) -> usize {
        self.stack.current_frame().map_or(0, |f| f.base)
    }

    /// Register of the current frame
    #[inline]
    pub(crate) fn reg(&self, reg: u8) -> Value {
        self.stack.get(self.base() + usize::from(reg))
    }

    #[inline]
    pub(crate) fn set_reg(&mut self, reg: u8, value: Value) -> VmResult<()> {
        let pos = self.base() + usize::from(reg);
        self.stack.set(pos, value)
    }

    /// Store into `reg` unless it is `NO_TARGET`
    #[inline]
    pub(crate) fn set_target(&mut self, reg: u8, value: Value) -> VmResult<()> {
        if reg == NO_TARGET {
            return Ok(());
        }
        self.set_reg(reg, value)
    }

    pub(crate) fn literal(&self, index: i32) -> VmResult<Value> {
        let frame = self.frame()?;
        usize::try_from(index)
            .ok()
            .and_then(|i| frame.closure.proto().literals.get(i).cloned())
            .ok_or_else(|| VmError::RuntimeError(format!("literal {} out of range", index)))
    }

    /// Move the instruction pointer relative to the next instruction
    pub(crate) fn jump(&mut self, offset: i32) -> VmResult<()> {
        let frame = self.stack.current_frame_mut().ok_or_else(no_frame)?;
        let len = frame.closure.proto().instructions.len() as i64;
        let target = frame.ip as i64 + i64::from(offset);
        if !(0..=len).contains(&target) {
            return Err(VmError::RuntimeError(format!(
                "jump to {} outside of '{}'",
                target,
                frame.closure.proto().display_name()
            )));
        }
        frame.ip = target as usize;
        Ok(())
    }
}

fn arity_error(proto: &Prototype, nargs: usize) -> VmError {
    VmError::ArgumentError(format!(
        "wrong number of parameters: '{}' expects {}, got {}",
        proto.display_name(),
        proto.param_count(),
        nargs
    ))
}
