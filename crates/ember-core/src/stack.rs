//! Register stack and call frame management
//!
//! Every script activation owns a window of `stack_size` registers starting
//! at its base. A call places `this` and the arguments in consecutive
//! registers of the caller; the callee's window starts at the first of
//! them, so arguments are passed without copying.
//!
//! # Memory Layout
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │ Frame N window (current)            │  ← base(N)
//! │   r2                                │
//! │   r1  (first parameter)             │
//! │   r0  (this)                        │
//! ├─────────────────────────────────────┤
//! │ Frame N-1 window                    │  ← base(N-1)
//! │   ...                               │
//! └─────────────────────────────────────┘
//! ```

use crate::value::{ClosureRef, GeneratorRef, Value};
use crate::vm::defaults::{DEFAULT_INITIAL_STACK_SIZE, DEFAULT_MAX_CALL_DEPTH, DEFAULT_MAX_STACK_SIZE};
use crate::{VmError, VmResult};

/// Activation record of a script closure
#[derive(Clone)]
pub struct CallFrame {
    /// Closure being executed
    pub closure: ClosureRef,

    /// Next instruction to execute
    pub ip: usize,

    /// Absolute stack index of register 0
    pub base: usize,

    /// Caller register receiving the return value
    pub target: Option<u8>,

    /// Returning from this frame leaves the current run loop
    pub root: bool,

    /// Generator this frame is running, if any
    pub generator: Option<GeneratorRef>,
}

impl CallFrame {
    /// Registers required by the frame
    #[inline]
    pub fn window_size(&self) -> usize {
        self.closure.proto().stack_size
    }

    /// One past the last register of the frame
    #[inline]
    pub fn top(&self) -> usize {
        self.base + self.window_size()
    }
}

/// Register stack plus call frames
pub struct Stack {
    /// Register slots
    slots: Vec<Value>,

    /// Call frames
    frames: Vec<CallFrame>,

    /// Maximum number of slots
    max_size: usize,

    /// Maximum number of frames
    max_frames: usize,

    /// Highest slot count reached
    peak: usize,
}

impl Stack {
    /// Create a stack with default limits
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_INITIAL_STACK_SIZE, DEFAULT_MAX_STACK_SIZE, DEFAULT_MAX_CALL_DEPTH)
    }

    /// Create a stack with specific limits
    pub fn with_limits(initial: usize, max_size: usize, max_frames: usize) -> Self {
        Self {
            slots: Vec::with_capacity(initial.min(max_size)),
            frames: Vec::with_capacity(64),
            max_size,
            max_frames,
            peak: 0,
        }
    }

    // ========================================================================
    // Slot Operations
    // ========================================================================

    /// Number of slots in use
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if no slots are in use
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Push a value
    ///
    /// # Errors
    ///
    /// Returns `VmError::StackOverflow` if the stack is full.
    pub fn push(&mut self, value: Value) -> VmResult<()> {
        if self.slots.len() >= self.max_size {
            return Err(VmError::StackOverflow);
        }
        self.slots.push(value);
        self.peak = self.peak.max(self.slots.len());
        Ok(())
    }

    /// Grow with nulls so that at least `len` slots exist
    ///
    /// # Errors
    ///
    /// Returns `VmError::StackOverflow` if `len` exceeds the maximum size.
    pub fn ensure(&mut self, len: usize) -> VmResult<()> {
        if len > self.max_size {
            return Err(VmError::StackOverflow);
        }
        if len > self.slots.len() {
            self.slots.resize(len, Value::Null);
            self.peak = self.peak.max(len);
        }
        Ok(())
    }

    /// Set the slot count to exactly `len`
    pub fn resize(&mut self, len: usize) -> VmResult<()> {
        self.truncate(len);
        self.ensure(len)
    }

    /// Drop slots at and above `len`
    pub fn truncate(&mut self, len: usize) {
        self.slots.truncate(len);
    }

    /// Null out `from..to`
    pub fn clear_range(&mut self, from: usize, to: usize) {
        let to = to.min(self.slots.len());
        if from < to {
            self.slots[from..to].fill(Value::Null);
        }
    }

    /// Value at an absolute position, or null past the end
    #[inline]
    pub fn get(&self, pos: usize) -> Value {
        self.slots.get(pos).cloned().unwrap_or_default()
    }

    /// Borrow the value at an absolute position
    #[inline]
    pub fn get_ref(&self, pos: usize) -> Option<&Value> {
        self.slots.get(pos)
    }

    /// Store at an absolute position
    ///
    /// # Errors
    ///
    /// Returns `VmError::StackOverflow` if the position lies beyond the maximum size.
    #[inline]
    pub fn set(&mut self, pos: usize, value: Value) -> VmResult<()> {
        if pos >= self.slots.len() {
            self.ensure(pos + 1)?;
        }
        self.slots[pos] = value;
        Ok(())
    }

    /// Move the value out of a slot, leaving null
    pub fn take(&mut self, pos: usize) -> Value {
        self.slots.get_mut(pos).map(std::mem::take).unwrap_or_default()
    }

    /// Values in `from..to`
    pub fn range(&self, from: usize, to: usize) -> &[Value] {
        let to = to.min(self.slots.len());
        &self.slots[from.min(to)..to]
    }

    /// Move the values in `from..to` out, leaving nulls
    pub fn take_range(&mut self, from: usize, to: usize) -> Vec<Value> {
        let to = to.min(self.slots.len());
        self.slots[from.min(to)..to]
            .iter_mut()
            .map(std::mem::take)
            .collect()
    }

    /// All live slots
    pub fn slots(&self) -> &[Value] {
        &self.slots
    }

    /// Maximum slot count
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    // ========================================================================
    // Call Frame Management
    // ========================================================================

    /// Push a new call frame
    ///
    /// # Errors
    ///
    /// Returns `VmError::StackOverflow` if the frame limit is reached or the
    /// frame's register window does not fit.
    pub fn push_frame(&mut self, frame: CallFrame) -> VmResult<()> {
        if self.frames.len() >= self.max_frames {
            return Err(VmError::StackOverflow);
        }
        self.ensure(frame.top())?;
        self.frames.push(frame);
        Ok(())
    }

    /// Pop the current call frame
    pub fn pop_frame(&mut self) -> Option<CallFrame> {
        self.frames.pop()
    }

    /// Get the current call frame
    #[inline]
    pub fn current_frame(&self) -> Option<&CallFrame> {
        self.frames.last()
    }

    /// Get the current call frame mutably
    #[inline]
    pub fn current_frame_mut(&mut self) -> Option<&mut CallFrame> {
        self.frames.last_mut()
    }

    /// Number of active frames
    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// All active frames, oldest first
    pub fn frames(&self) -> &[CallFrame] {
        &self.frames
    }

    /// Remove every slot and frame, returning what they held
    pub(crate) fn drain_into(&mut self, garbage: &mut Vec<Value>) {
        garbage.append(&mut self.slots);
        for frame in self.frames.drain(..) {
            garbage.push(Value::Closure(frame.closure));
            if let Some(generator) = frame.generator {
                garbage.push(Value::Generator(generator));
            }
        }
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Get stack statistics
    pub fn stats(&self) -> StackStats {
        StackStats {
            depth: self.slots.len(),
            peak: self.peak,
            max_size: self.max_size,
            frame_count: self.frames.len(),
            utilization: if self.max_size > 0 {
                (self.slots.len() as f64 / self.max_size as f64) * 100.0
            } else {
                0.0
            },
        }
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}

/// Stack statistics
#[derive(Debug, Clone)]
pub struct StackStats {
    /// Current slot count
    pub depth: usize,

    /// Highest slot count reached
    pub peak: usize,

    /// Maximum allowed size
    pub max_size: usize,

    /// Number of active call frames
    pub frame_count: usize,

    /// Stack utilization percentage (0-100)
    pub utilization: f64,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_overflow() {
        let mut stack = Stack::with_limits(4, 2, 8);
        stack.push(Value::Integer(1)).unwrap();
        stack.push(Value::Integer(2)).unwrap();
        assert!(matches!(stack.push(Value::Null), Err(VmError::StackOverflow)));
    }

    #[test]
    fn test_ensure_and_clear() {
        let mut stack = Stack::with_limits(4, 16, 8);
        stack.ensure(4).unwrap();
        stack.set(2, Value::Integer(7)).unwrap();
        assert_eq!(stack.get(2), Value::Integer(7));
        assert_eq!(stack.get(10), Value::Null);

        stack.clear_range(0, 3);
        assert_eq!(stack.get(2), Value::Null);
        assert!(matches!(stack.ensure(17), Err(VmError::StackOverflow)));
    }

    #[test]
    fn test_take_range_leaves_nulls() {
        let mut stack = Stack::new();
        for i in 0..4 {
            stack.push(Value::Integer(i)).unwrap();
        }
        let taken = stack.take_range(1, 3);
        assert_eq!(taken, vec![Value::Integer(1), Value::Integer(2)]);
        assert_eq!(stack.len(), 4);
        assert_eq!(stack.get(1), Value::Null);
        assert_eq!(stack.stats().peak, 4);
    }
}
