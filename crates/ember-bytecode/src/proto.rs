//! Compiled function prototypes
//!
//! A [`FunctionProto`] is the immutable output of a compiler: literal pool,
//! parameter names, captured-variable descriptors, line table, instruction
//! array and nested prototypes. The runtime loads it once and shares it
//! between every closure created from it.

use crate::instruction::Instruction;
use std::fmt::{self, Write as _};

/// Literal pool entry
#[derive(Debug, Clone)]
pub enum Literal {
    /// null
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit integer
    Integer(i64),
    /// 64-bit float
    Float(f64),
    /// String
    String(String),
}

impl Literal {
    /// Structural equality, comparing floats by bit pattern
    pub fn same_as(&self, other: &Literal) -> bool {
        match (self, other) {
            (Literal::Null, Literal::Null) => true,
            (Literal::Bool(a), Literal::Bool(b)) => a == b,
            (Literal::Integer(a), Literal::Integer(b)) => a == b,
            (Literal::Float(a), Literal::Float(b)) => a.to_bits() == b.to_bits(),
            (Literal::String(a), Literal::String(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::String(value.to_string())
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Literal::Integer(value)
    }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Literal::Float(value)
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Literal::Bool(value)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => f.write_str("null"),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Integer(i) => write!(f, "{}", i),
            Literal::Float(x) => write!(f, "{:?}", x),
            Literal::String(s) => write!(f, "{:?}", s),
        }
    }
}

/// Where a captured variable comes from when a closure is created
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OuterSource {
    /// Copy of the creating frame's register
    Local(u32),
    /// Shared with the creating closure's outer value at this index
    Outer(u32),
    /// Looked up by name on the creating frame's `this`
    Symbol(String),
}

/// Captured-variable descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OuterDesc {
    /// Variable name, for diagnostics
    pub name: String,
    /// Capture mode and source
    pub source: OuterSource,
}

/// Line table entry: instructions from `op_index` on belong to `line`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineInfo {
    /// Source line
    pub line: u32,
    /// First instruction of the line
    pub op_index: u32,
}

/// Immutable compiled function body
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionProto {
    /// Function name
    pub name: String,
    /// Source file name
    pub source_name: String,
    /// Literal pool
    pub literals: Vec<Literal>,
    /// Parameter names; index 0 is always `this`
    pub parameters: Vec<String>,
    /// Captured-variable descriptors
    pub outer_values: Vec<OuterDesc>,
    /// Line table, sorted by `op_index`
    pub line_info: Vec<LineInfo>,
    /// Instruction array
    pub instructions: Vec<Instruction>,
    /// Nested prototypes referenced by CLOSURE
    pub functions: Vec<FunctionProto>,
    /// Registers required by one activation
    pub stack_size: usize,
    /// Calls produce a generator instead of running the body
    pub is_generator: bool,
    /// Extra arguments are collected into a `vargv` array
    pub varparams: bool,
}

impl FunctionProto {
    /// Create an empty prototype taking only `this`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_name: String::new(),
            literals: Vec::new(),
            parameters: vec!["this".to_string()],
            outer_values: Vec::new(),
            line_info: Vec::new(),
            instructions: Vec::new(),
            functions: Vec::new(),
            stack_size: 1,
            is_generator: false,
            varparams: false,
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

    /// Human-readable listing of this prototype and its nested functions
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        self.disassemble_into(&mut out, 0);
        out
    }

    fn disassemble_into(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        let _ = writeln!(
            out,
            "{}function {}({}) stack={}{}{}",
            indent,
            if self.name.is_empty() { "<anonymous>" } else { self.name.as_str() },
            self.parameters.join(", "),
            self.stack_size,
            if self.is_generator { " generator" } else { "" },
            if self.varparams { " varparams" } else { "" },
        );
        for (i, lit) in self.literals.iter().enumerate() {
            let _ = writeln!(out, "{}  .literal {:<4} {}", indent, i, lit);
        }
        for (i, outer) in self.outer_values.iter().enumerate() {
            let _ = writeln!(out, "{}  .outer   {:<4} {} {:?}", indent, i, outer.name, outer.source);
        }
        for (i, instr) in self.instructions.iter().enumerate() {
            match self.line_for(i) {
                Some(line) => {
                    let _ = writeln!(out, "{}  {:>5} [{:>4}] {}", indent, i, line, instr);
                }
                None => {
                    let _ = writeln!(out, "{}  {:>5} [    ] {}", indent, i, instr);
                }
            }
        }
        for func in &self.functions {
            func.disassemble_into(out, depth + 1);
        }
    }
}
