//! Generators
//!
//! Calling a generator function produces a [`Generator`] in the
//! `Suspended` state without running any of the body. Each resume copies
//! the saved register window back onto the interpreter stack and continues
//! from the saved instruction; YIELD copies it out again.

use std::fmt;

use crate::value::{ClosureRef, Value};

/// Generator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    /// Waiting to be resumed (also the initial state)
    Suspended,
    /// Currently executing
    Running,
    /// Returned or raised; cannot be resumed
    Dead,
}

impl fmt::Display for GeneratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GeneratorState::Suspended => "suspended",
            GeneratorState::Running => "running",
            GeneratorState::Dead => "dead",
        })
    }
}

/// Exception trap saved across a yield, relative to the generator frame
#[derive(Debug, Clone, Copy)]
pub struct SavedTrap {
    /// Handler instruction
    pub ip: usize,
    /// Stack length to restore, relative to the frame base
    pub stack_offset: usize,
    /// Register receiving the error
    pub ex_target: u8,
}

/// Resumable function activation
pub struct Generator {
    closure: ClosureRef,
    state: GeneratorState,
    stack: Vec<Value>,
    ip: usize,
    traps: Vec<SavedTrap>,
}

impl Generator {
    /// Create a suspended generator whose registers start as `window`
    pub fn new(closure: ClosureRef, window: Vec<Value>) -> Self {
        Self {
            closure,
            state: GeneratorState::Suspended,
            stack: window,
            ip: 0,
            traps: Vec::new(),
        }
    }

    /// Current state
    pub fn state(&self) -> GeneratorState {
        self.state
    }

    /// Function being run
    pub fn closure(&self) -> &ClosureRef {
        &self.closure
    }

    /// Take the saved activation and mark the generator running
    pub(crate) fn start_resume(&mut self) -> (Vec<Value>, usize, Vec<SavedTrap>) {
        self.state = GeneratorState::Running;
        (
            std::mem::take(&mut self.stack),
            self.ip,
            std::mem::take(&mut self.traps),
        )
    }

    /// Store the activation at a yield
    pub(crate) fn save(&mut self, stack: Vec<Value>, ip: usize, traps: Vec<SavedTrap>) {
        self.stack = stack;
        self.ip = ip;
        self.traps = traps;
        self.state = GeneratorState::Suspended;
    }

    /// Mark finished, releasing the saved registers
    pub(crate) fn kill(&mut self) -> Vec<Value> {
        self.state = GeneratorState::Dead;
        self.traps.clear();
        std::mem::take(&mut self.stack)
    }

    pub(crate) fn saved_values(&self) -> &[Value] {
        &self.stack
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Closure, Prototype};
    use crate::string::StringInterner;
    use ember_bytecode::FunctionBuilder;
    use std::rc::Rc;

    fn closure() -> ClosureRef {
        let mut b = FunctionBuilder::new("g");
        b.generator();
        b.ret_null();
        let proto = Prototype::load(&StringInterner::new(), &b.build());
        Rc::new(Closure::new(proto, Vec::new()))
    }

    #[test]
    fn test_lifecycle() {
        let mut generator = Generator::new(closure(), vec![Value::Null, Value::Integer(4)]);
        assert_eq!(generator.state(), GeneratorState::Suspended);

        let (stack, ip, traps) = generator.start_resume();
        assert_eq!(generator.state(), GeneratorState::Running);
        assert_eq!(stack.len(), 2);
        assert_eq!(ip, 0);
        assert!(traps.is_empty());

        generator.save(stack, 3, Vec::new());
        assert_eq!(generator.state(), GeneratorState::Suspended);
        assert_eq!(generator.saved_values()[1], Value::Integer(4));

        let released = generator.kill();
        assert_eq!(released.len(), 2);
        assert_eq!(generator.state(), GeneratorState::Dead);
        assert_eq!(generator.state().to_string(), "dead");
    }
}
