//! Loaded function prototypes
//!
//! [`Prototype`] is the runtime form of a [`FunctionProto`]: string
//! literals are interned once so the interpreter can hand them out as
//! values without copying.

use std::rc::Rc;

use ember_bytecode::{FunctionProto, Instruction, LineInfo, Literal, OuterDesc};

use crate::string::StringInterner;
use crate::value::Value;

/// Immutable function body shared by every closure created from it
pub struct Prototype {
    /// Function name
    pub name: String,
    /// Source file name
    pub source_name: String,
    /// Literal pool
    pub literals: Vec<Value>,
    /// Parameter names; index 0 is `this`
    pub parameters: Vec<String>,
    /// Captured-variable descriptors
    pub outer_values: Vec<OuterDesc>,
    /// Line table
    pub line_info: Vec<LineInfo>,
    /// Instruction array
    pub instructions: Vec<Instruction>,
    /// Nested prototypes
    pub functions: Vec<Rc<Prototype>>,
    /// Registers per activation
    pub stack_size: usize,
    /// Calls create a generator
    pub is_generator: bool,
    /// Extra arguments are packed into the last parameter
    pub varparams: bool,
}

impl Prototype {
    /// Load a compiled prototype, interning its string literals
    pub fn load(strings: &StringInterner, proto: &FunctionProto) -> Rc<Prototype> {
        let literals = proto
            .literals
            .iter()
            .map(|lit| match lit {
                Literal::Null => Value::Null,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Integer(i) => Value::Integer(*i),
                Literal::Float(f) => Value::Float(*f),
                Literal::String(s) => Value::String(strings.intern(s)),
            })
            .collect();

        Rc::new(Prototype {
            name: proto.name.clone(),
            source_name: proto.source_name.clone(),
            literals,
            parameters: proto.parameters.clone(),
            outer_values: proto.outer_values.clone(),
            line_info: proto.line_info.clone(),
            instructions: proto.instructions.clone(),
            functions: proto
                .functions
                .iter()
                .map(|f| Prototype::load(strings, f))
                .collect(),
            stack_size: proto.stack_size.max(proto.parameters.len()),
            is_generator: proto.is_generator,
            varparams: proto.varparams,
        })
    }

    /// Convert back to the serializable form
    pub fn to_function_proto(&self) -> FunctionProto {
        FunctionProto {
            name: self.name.clone(),
            source_name: self.source_name.clone(),
            literals: self
                .literals
                .iter()
                .map(|v| match v {
                    Value::Bool(b) => Literal::Bool(*b),
                    Value::Integer(i) => Literal::Integer(*i),
                    Value::Float(f) => Literal::Float(*f),
                    Value::String(s) => Literal::String(s.to_string_lossy()),
                    _ => Literal::Null,
                })
                .collect(),
            parameters: self.parameters.clone(),
            outer_values: self.outer_values.clone(),
            line_info: self.line_info.clone(),
            instructions: self.instructions.clone(),
            functions: self.functions.iter().map(|f| f.to_function_proto()).collect(),
            stack_size: self.stack_size,
            is_generator: self.is_generator,
            varparams: self.varparams,
        }
    }

    /// Number of parameters including `this`
    pub fn param_count(&self) -> usize {
        self.parameters.len()
    }

    /// Source line of the instruction at `ip`
    pub fn line_for(&self, ip: usize) -> Option<u32> {
        let idx = self
            .line_info
            .partition_point(|info| info.op_index as usize <= ip);
        idx.checked_sub(1).map(|i| self.line_info[i].line)
    }

    /// Display name for diagnostics
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            "<anonymous>"
        } else {
            &self.name
        }
    }
}
