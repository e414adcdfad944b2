//! Script closures, captured cells and native closures

use std::cell::RefCell;
use std::rc::Rc;

use crate::object::Prototype;
use crate::value::Value;
use crate::vm::Vm;
use crate::{VmError, VmResult};

/// Captured variable cell, shared by every closure that captures it
#[derive(Default)]
pub struct Outer {
    value: RefCell<Value>,
}

impl Outer {
    /// Create a cell holding `value`
    pub fn new(value: Value) -> Self {
        Self {
            value: RefCell::new(value),
        }
    }

    /// Current value
    pub fn get(&self) -> Value {
        self.value.borrow().clone()
    }

    /// Replace the value
    pub fn set(&self, value: Value) {
        *self.value.borrow_mut() = value;
    }

    pub(crate) fn cell(&self) -> &RefCell<Value> {
        &self.value
    }
}

/// Script function instance: a prototype plus its captured cells
pub struct Closure {
    proto: Rc<Prototype>,
    outers: Vec<Rc<Outer>>,
}

impl Closure {
    /// Bind a prototype to its captured cells
    pub fn new(proto: Rc<Prototype>, outers: Vec<Rc<Outer>>) -> Self {
        Self { proto, outers }
    }

    /// Shared prototype
    pub fn proto(&self) -> &Rc<Prototype> {
        &self.proto
    }

    /// Captured cells, in prototype order
    pub fn outers(&self) -> &[Rc<Outer>] {
        &self.outers
    }

    /// Captured cell at `index`
    pub fn outer(&self, index: usize) -> VmResult<&Rc<Outer>> {
        self.outers.get(index).ok_or_else(|| {
            VmError::RuntimeError(format!(
                "outer value {} out of range in '{}'",
                index,
                self.proto.display_name()
            ))
        })
    }
}

/// Host function signature
///
/// Arguments are read through [`Vm::arg`] (index 0 is `this`) and
/// captured values through [`Vm::native_outer`].
pub type NativeFn = fn(&mut Vm) -> VmResult<NativeReturn>;

/// What a native hands back to the interpreter
#[derive(Debug, Clone)]
pub enum NativeReturn {
    /// Return a value
    Value(Value),
    /// Return null
    NoValue,
    /// Suspend the thread, handing the value to whoever resumed it
    Suspend(Value),
}

impl From<Value> for NativeReturn {
    fn from(value: Value) -> Self {
        NativeReturn::Value(value)
    }
}

/// Argument-count rule for a native, counting `this`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamCheck {
    /// Any number of arguments
    #[default]
    Any,
    /// Exactly this many
    Exact(usize),
    /// At least this many
    AtLeast(usize),
}

impl ParamCheck {
    /// Decode the signed convention: 0 = any, n > 0 exact, n < 0 at least |n|
    pub fn from_count(count: i32) -> Self {
        match count {
            0 => ParamCheck::Any,
            n if n > 0 => ParamCheck::Exact(n as usize),
            n => ParamCheck::AtLeast(n.unsigned_abs() as usize),
        }
    }

    fn accepts(self, nargs: usize) -> bool {
        match self {
            ParamCheck::Any => true,
            ParamCheck::Exact(n) => nargs == n,
            ParamCheck::AtLeast(n) => nargs >= n,
        }
    }
}

/// Per-argument type masks
pub mod typemask {
    /// null
    pub const NULL: u32 = 1 << 0;
    /// integer
    pub const INTEGER: u32 = 1 << 1;
    /// float
    pub const FLOAT: u32 = 1 << 2;
    /// bool
    pub const BOOL: u32 = 1 << 3;
    /// string
    pub const STRING: u32 = 1 << 4;
    /// table
    pub const TABLE: u32 = 1 << 5;
    /// array
    pub const ARRAY: u32 = 1 << 6;
    /// userdata
    pub const USERDATA: u32 = 1 << 7;
    /// closure or native closure
    pub const CLOSURE: u32 = 1 << 8;
    /// generator
    pub const GENERATOR: u32 = 1 << 9;
    /// userpointer
    pub const USERPOINTER: u32 = 1 << 10;
    /// thread
    pub const THREAD: u32 = 1 << 11;
    /// instance
    pub const INSTANCE: u32 = 1 << 12;
    /// class
    pub const CLASS: u32 = 1 << 13;
    /// function prototype
    pub const FUNCPROTO: u32 = 1 << 14;
    /// integer or float
    pub const NUMBER: u32 = INTEGER | FLOAT;
    /// anything
    pub const ANY: u32 = u32::MAX;

    /// Parse a mask string: one group per argument, alternatives joined by `|`
    ///
    /// Letters: `o` null, `i` integer, `f` float, `n` number, `b` bool,
    /// `s` string, `t` table, `a` array, `u` userdata, `c` closure,
    /// `g` generator, `p` userpointer, `v` thread, `x` instance, `y` class,
    /// `r` funcproto, `.` any.
    pub fn parse(spec: &str) -> Result<Vec<u32>, String> {
        let mut masks = Vec::new();
        let mut current = 0u32;
        let mut pending_alternative = false;
        for ch in spec.chars() {
            let bit = match ch {
                ' ' => continue,
                '|' => {
                    if current == 0 {
                        return Err(format!("'|' without a preceding type in '{}'", spec));
                    }
                    pending_alternative = true;
                    continue;
                }
                'o' => NULL,
                'i' => INTEGER,
                'f' => FLOAT,
                'n' => NUMBER,
                'b' => BOOL,
                's' => STRING,
                't' => TABLE,
                'a' => ARRAY,
                'u' => USERDATA,
                'c' => CLOSURE,
                'g' => GENERATOR,
                'p' => USERPOINTER,
                'v' => THREAD,
                'x' => INSTANCE,
                'y' => CLASS,
                'r' => FUNCPROTO,
                '.' => ANY,
                other => return Err(format!("invalid type mask character '{}'", other)),
            };
            if pending_alternative {
                current |= bit;
                pending_alternative = false;
            } else {
                if current != 0 {
                    masks.push(current);
                }
                current = bit;
            }
        }
        if pending_alternative {
            return Err(format!("trailing '|' in '{}'", spec));
        }
        if current != 0 {
            masks.push(current);
        }
        Ok(masks)
    }
}

fn mask_of(value: &Value) -> u32 {
    match value {
        Value::Null => typemask::NULL,
        Value::Bool(_) => typemask::BOOL,
        Value::Integer(_) => typemask::INTEGER,
        Value::Float(_) => typemask::FLOAT,
        Value::UserPointer(_) => typemask::USERPOINTER,
        Value::String(_) => typemask::STRING,
        Value::Table(_) => typemask::TABLE,
        Value::Array(_) => typemask::ARRAY,
        Value::Closure(_) | Value::NativeClosure(_) => typemask::CLOSURE,
        Value::Generator(_) => typemask::GENERATOR,
        Value::Class(_) => typemask::CLASS,
        Value::Instance(_) => typemask::INSTANCE,
        Value::UserData(_) => typemask::USERDATA,
        Value::Thread(_) => typemask::THREAD,
        Value::FuncProto(_) => typemask::FUNCPROTO,
    }
}

/// Host function bound as a script value
pub struct NativeClosure {
    name: String,
    function: NativeFn,
    params: ParamCheck,
    type_masks: Vec<u32>,
    outers: RefCell<Vec<Value>>,
}

impl NativeClosure {
    /// Wrap a host function
    pub fn new(name: impl Into<String>, function: NativeFn) -> Self {
        Self {
            name: name.into(),
            function,
            params: ParamCheck::Any,
            type_masks: Vec::new(),
            outers: RefCell::new(Vec::new()),
        }
    }

    /// Set the argument-count rule
    pub fn with_params(mut self, params: ParamCheck) -> Self {
        self.params = params;
        self
    }

    /// Set per-argument type masks from a mask string (see [`typemask::parse`])
    pub fn with_typemask(mut self, spec: &str) -> VmResult<Self> {
        self.type_masks = typemask::parse(spec).map_err(VmError::ArgumentError)?;
        Ok(self)
    }

    /// Attach captured values
    pub fn with_outers(self, outers: Vec<Value>) -> Self {
        *self.outers.borrow_mut() = outers;
        self
    }

    /// Function name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Host function pointer
    pub fn function(&self) -> NativeFn {
        self.function
    }

    /// Captured value at `index`, or null
    pub fn outer(&self, index: usize) -> Value {
        self.outers.borrow().get(index).cloned().unwrap_or_default()
    }

    pub(crate) fn outers(&self) -> &RefCell<Vec<Value>> {
        &self.outers
    }

    /// Validate argument count and types; `args[0]` is `this`
    pub fn check_args(&self, args: &[Value]) -> VmResult<()> {
        if !self.params.accepts(args.len()) {
            return Err(VmError::ArgumentError(format!(
                "wrong number of parameters for '{}': got {}, expected {}",
                self.name,
                args.len(),
                match self.params {
                    ParamCheck::Any => "any".to_string(),
                    ParamCheck::Exact(n) => n.to_string(),
                    ParamCheck::AtLeast(n) => format!("at least {}", n),
                }
            )));
        }
        for (i, (arg, mask)) in args.iter().zip(&self.type_masks).enumerate() {
            if mask_of(arg) & mask == 0 {
                return Err(VmError::TypeError(format!(
                    "parameter {} of '{}' has an invalid type '{}'",
                    i,
                    self.name,
                    arg.type_name()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut Vm) -> VmResult<NativeReturn> {
        Ok(NativeReturn::NoValue)
    }

    #[test]
    fn test_param_count_convention() {
        assert_eq!(ParamCheck::from_count(0), ParamCheck::Any);
        assert_eq!(ParamCheck::from_count(2), ParamCheck::Exact(2));
        assert_eq!(ParamCheck::from_count(-3), ParamCheck::AtLeast(3));
    }

    #[test]
    fn test_typemask_parse() {
        assert_eq!(
            typemask::parse(".s|n").unwrap(),
            vec![typemask::ANY, typemask::STRING | typemask::NUMBER]
        );
        assert!(typemask::parse("q").is_err());
        assert!(typemask::parse("s|").is_err());
    }

    #[test]
    fn test_check_args() {
        let native = NativeClosure::new("f", noop)
            .with_params(ParamCheck::AtLeast(2))
            .with_typemask(".i")
            .unwrap();

        assert!(native.check_args(&[Value::Null]).is_err());
        assert!(native
            .check_args(&[Value::Null, Value::Integer(1), Value::Bool(true)])
            .is_ok());
        assert!(matches!(
            native.check_args(&[Value::Null, Value::Float(1.0)]),
            Err(VmError::TypeError(_))
        ));
    }

    #[test]
    fn test_outer_cell_sharing() {
        let cell = Rc::new(Outer::new(Value::Integer(1)));
        let shared = cell.clone();
        shared.set(Value::Integer(2));
        assert_eq!(cell.get(), Value::Integer(2));
    }
}
