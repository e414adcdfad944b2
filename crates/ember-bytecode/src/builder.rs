//! Prototype assembly
//!
//! [`FunctionBuilder`] is what a compiler (or a host test) uses to produce a
//! [`FunctionProto`]: it deduplicates literals, tracks the highest register
//! touched so `stack_size` stays correct, and patches forward jumps.

use crate::instruction::{Instruction, NO_TARGET};
use crate::opcode::{AppendKind, BitOp, CmpOp, NewObjKind, Opcode};
use crate::proto::{FunctionProto, LineInfo, Literal, OuterDesc, OuterSource};

/// Incremental builder for a [`FunctionProto`]
#[derive(Debug, Clone)]
pub struct FunctionBuilder {
    proto: FunctionProto,
}

impl FunctionBuilder {
    /// Start a function taking only `this`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            proto: FunctionProto::new(name),
        }
    }

    /// Set the source file name
    pub fn source(&mut self, name: impl Into<String>) -> &mut Self {
        self.proto.source_name = name.into();
        self
    }

    /// Declare a parameter, returning its register
    pub fn param(&mut self, name: impl Into<String>) -> u8 {
        self.proto.parameters.push(name.into());
        let reg = (self.proto.parameters.len() - 1) as u8;
        self.touch(reg);
        reg
    }

    /// Reserve at least `size` registers
    pub fn stack_size(&mut self, size: usize) -> &mut Self {
        self.proto.stack_size = self.proto.stack_size.max(size);
        self
    }

    /// Mark the function as a generator
    pub fn generator(&mut self) -> &mut Self {
        self.proto.is_generator = true;
        self
    }

    /// Collect extra arguments into a trailing `vargv` parameter, returning its register
    pub fn varparams(&mut self) -> u8 {
        self.proto.varparams = true;
        self.param("vargv")
    }

    /// Add a literal, reusing an identical existing entry
    pub fn literal(&mut self, literal: impl Into<Literal>) -> i32 {
        let literal = literal.into();
        if let Some(idx) = self.proto.literals.iter().position(|l| l.same_as(&literal)) {
            return idx as i32;
        }
        self.proto.literals.push(literal);
        (self.proto.literals.len() - 1) as i32
    }

    /// Add a nested prototype, returning its index for CLOSURE
    pub fn function(&mut self, proto: FunctionProto) -> i32 {
        self.proto.functions.push(proto);
        (self.proto.functions.len() - 1) as i32
    }

    /// Capture a register of the creating frame by value
    pub fn outer_local(&mut self, name: impl Into<String>, reg: u8) -> i32 {
        self.outer(name.into(), OuterSource::Local(u32::from(reg)))
    }

    /// Share an outer value of the creating closure
    pub fn outer_outer(&mut self, name: impl Into<String>, index: u32) -> i32 {
        self.outer(name.into(), OuterSource::Outer(index))
    }

    /// Capture a member of the creating frame's `this` by name
    pub fn outer_symbol(&mut self, name: impl Into<String>) -> i32 {
        let name = name.into();
        let source = OuterSource::Symbol(name.clone());
        self.outer(name, source)
    }

    fn outer(&mut self, name: String, source: OuterSource) -> i32 {
        self.proto.outer_values.push(OuterDesc { name, source });
        (self.proto.outer_values.len() - 1) as i32
    }

    /// Start a new source line at the next instruction
    pub fn line(&mut self, line: u32) -> &mut Self {
        let op_index = self.proto.instructions.len() as u32;
        match self.proto.line_info.last_mut() {
            Some(last) if last.op_index == op_index => last.line = line,
            _ => self.proto.line_info.push(LineInfo { line, op_index }),
        }
        self
    }

    /// Index the next instruction will get
    pub fn pos(&self) -> usize {
        self.proto.instructions.len()
    }

    /// Append a raw instruction
    pub fn emit(&mut self, instr: Instruction) -> usize {
        self.proto.instructions.push(instr);
        self.proto.instructions.len() - 1
    }

    /// Make the jump at `at` land on the next instruction to be emitted
    pub fn patch_jump(&mut self, at: usize) {
        let offset = self.pos() as i32 - (at as i32 + 1);
        if let Some(instr) = self.proto.instructions.get_mut(at) {
            instr.arg1 = offset;
        }
    }

    /// Finish the prototype
    pub fn build(mut self) -> FunctionProto {
        let params = self.proto.parameters.len();
        self.proto.stack_size = self.proto.stack_size.max(params);
        self.proto
    }

    fn touch(&mut self, reg: u8) {
        if reg != NO_TARGET {
            self.stack_size(usize::from(reg) + 1);
        }
    }

    fn op(&mut self, op: Opcode, arg0: u8, arg1: i32, arg2: u8, arg3: u8) -> usize {
        self.emit(Instruction::new(op, arg0, arg1, arg2, arg3))
    }

    fn backward_offset(&self, target: usize) -> i32 {
        target as i32 - (self.pos() as i32 + 1)
    }

    // ===== Loads & Moves =====

    /// r[dst] = literal
    pub fn load(&mut self, dst: u8, literal: impl Into<Literal>) -> usize {
        self.touch(dst);
        let idx = self.literal(literal);
        self.op(Opcode::Load, dst, idx, 0, 0)
    }

    /// r[dst] = integer
    pub fn load_int(&mut self, dst: u8, value: i32) -> usize {
        self.touch(dst);
        self.op(Opcode::LoadInt, dst, value, 0, 0)
    }

    /// r[dst] = float (single precision immediate)
    pub fn load_float(&mut self, dst: u8, value: f32) -> usize {
        self.touch(dst);
        self.op(Opcode::LoadFloat, dst, value.to_bits() as i32, 0, 0)
    }

    /// r[dst .. dst+count] = null
    pub fn load_nulls(&mut self, dst: u8, count: u8) -> usize {
        self.touch(dst.saturating_add(count.saturating_sub(1)));
        self.op(Opcode::LoadNulls, dst, i32::from(count), 0, 0)
    }

    /// r[dst] = bool
    pub fn load_bool(&mut self, dst: u8, value: bool) -> usize {
        self.touch(dst);
        self.op(Opcode::LoadBool, dst, i32::from(value), 0, 0)
    }

    /// r[dst] = root table
    pub fn load_root(&mut self, dst: u8) -> usize {
        self.touch(dst);
        self.op(Opcode::LoadRoot, dst, 0, 0, 0)
    }

    /// r[dst] = r[src]
    pub fn mov(&mut self, dst: u8, src: u8) -> usize {
        self.touch(dst);
        self.touch(src);
        self.op(Opcode::Move, dst, i32::from(src), 0, 0)
    }

    // ===== Slot Access =====

    /// r[dst] = r[obj][r[key]]
    pub fn get(&mut self, dst: u8, obj: u8, key: u8) -> usize {
        self.touch(dst);
        self.op(Opcode::Get, dst, i32::from(obj), key, 0)
    }

    /// r[dst] = r[obj][literal]
    pub fn get_k(&mut self, dst: u8, obj: u8, key: impl Into<Literal>) -> usize {
        self.touch(dst);
        self.touch(obj);
        let idx = self.literal(key);
        self.op(Opcode::GetK, dst, idx, obj, 0)
    }

    /// r[obj][r[key]] = r[val]
    pub fn set(&mut self, dst: u8, obj: u8, key: u8, val: u8) -> usize {
        self.touch(dst);
        self.touch(val);
        self.op(Opcode::Set, dst, i32::from(obj), key, val)
    }

    /// r[obj][r[key]] <- r[val]
    pub fn new_slot(&mut self, dst: u8, obj: u8, key: u8, val: u8) -> usize {
        self.touch(dst);
        self.touch(val);
        self.op(Opcode::NewSlot, dst, i32::from(obj), key, val)
    }

    /// r[dst] = delete r[obj][r[key]]
    pub fn delete(&mut self, dst: u8, obj: u8, key: u8) -> usize {
        self.touch(dst);
        self.op(Opcode::Delete, dst, i32::from(obj), key, 0)
    }

    // ===== Arithmetic & Logic =====

    /// r[dst] = r[a] <op> r[b] for ADD, SUB, MUL, DIV or MOD
    pub fn arith(&mut self, op: Opcode, dst: u8, a: u8, b: u8) -> usize {
        self.touch(dst);
        self.touch(a);
        self.touch(b);
        self.op(op, dst, i32::from(a), b, 0)
    }

    /// r[dst] = r[a] + r[b]
    pub fn add(&mut self, dst: u8, a: u8, b: u8) -> usize {
        self.arith(Opcode::Add, dst, a, b)
    }

    /// r[dst] = r[a] - r[b]
    pub fn sub(&mut self, dst: u8, a: u8, b: u8) -> usize {
        self.arith(Opcode::Sub, dst, a, b)
    }

    /// r[dst] = r[a] * r[b]
    pub fn mul(&mut self, dst: u8, a: u8, b: u8) -> usize {
        self.arith(Opcode::Mul, dst, a, b)
    }

    /// r[dst] = r[a] / r[b]
    pub fn div(&mut self, dst: u8, a: u8, b: u8) -> usize {
        self.arith(Opcode::Div, dst, a, b)
    }

    /// r[dst] = r[a] % r[b]
    pub fn modulo(&mut self, dst: u8, a: u8, b: u8) -> usize {
        self.arith(Opcode::Mod, dst, a, b)
    }

    /// r[dst] = r[a] <bitop> r[b]
    pub fn bitw(&mut self, op: BitOp, dst: u8, a: u8, b: u8) -> usize {
        self.touch(dst);
        self.op(Opcode::Bitw, dst, i32::from(a), b, op as u8)
    }

    /// r[dst] = -r[src]
    pub fn neg(&mut self, dst: u8, src: u8) -> usize {
        self.touch(dst);
        self.op(Opcode::Neg, dst, i32::from(src), 0, 0)
    }

    /// r[dst] = !r[src]
    pub fn not(&mut self, dst: u8, src: u8) -> usize {
        self.touch(dst);
        self.op(Opcode::Not, dst, i32::from(src), 0, 0)
    }

    // ===== Comparison =====

    /// r[dst] = r[a] <cmp> r[b]
    pub fn cmp(&mut self, op: CmpOp, dst: u8, a: u8, b: u8) -> usize {
        self.touch(dst);
        self.op(Opcode::Cmp, dst, i32::from(a), b, op as u8)
    }

    /// r[dst] = r[a] == r[b]
    pub fn eq(&mut self, dst: u8, a: u8, b: u8) -> usize {
        self.touch(dst);
        self.op(Opcode::Eq, dst, i32::from(b), a, 0)
    }

    /// r[dst] = r[a] == literal
    pub fn eq_literal(&mut self, dst: u8, a: u8, literal: impl Into<Literal>) -> usize {
        self.touch(dst);
        let idx = self.literal(literal);
        self.op(Opcode::Eq, dst, idx, a, 1)
    }

    /// r[dst] = r[a] != r[b]
    pub fn ne(&mut self, dst: u8, a: u8, b: u8) -> usize {
        self.touch(dst);
        self.op(Opcode::Ne, dst, i32::from(b), a, 0)
    }

    // ===== Control Flow =====

    /// Forward jump; patch with [`FunctionBuilder::patch_jump`]
    pub fn jmp(&mut self) -> usize {
        self.op(Opcode::Jmp, 0, 0, 0, 0)
    }

    /// Jump back to an already emitted instruction
    pub fn jmp_to(&mut self, target: usize) -> usize {
        let offset = self.backward_offset(target);
        self.op(Opcode::Jmp, 0, offset, 0, 0)
    }

    /// Forward jump taken when r[cond] is falsy
    pub fn jz(&mut self, cond: u8) -> usize {
        self.op(Opcode::Jz, cond, 0, 0, 0)
    }

    /// Short-circuit `&&`
    pub fn and(&mut self, dst: u8, src: u8) -> usize {
        self.touch(dst);
        self.op(Opcode::And, dst, 0, src, 0)
    }

    /// Short-circuit `||`
    pub fn or(&mut self, dst: u8, src: u8) -> usize {
        self.touch(dst);
        self.op(Opcode::Or, dst, 0, src, 0)
    }

    // ===== Calls =====

    /// r[this_reg] = r[obj]; r[dst] = r[obj][r[key]]
    pub fn prep_call(&mut self, dst: u8, obj: u8, key: u8, this_reg: u8) -> usize {
        self.touch(dst);
        self.touch(this_reg);
        self.op(Opcode::PrepCall, dst, i32::from(key), obj, this_reg)
    }

    /// r[this_reg] = r[obj]; r[dst] = r[obj][literal]
    pub fn prep_call_k(
        &mut self,
        dst: u8,
        obj: u8,
        key: impl Into<Literal>,
        this_reg: u8,
    ) -> usize {
        self.touch(dst);
        self.touch(this_reg);
        let idx = self.literal(key);
        self.op(Opcode::PrepCallK, dst, idx, obj, this_reg)
    }

    /// r[dst] = r[func](r[args] .. r[args+nargs]), where r[args] is `this`
    pub fn call(&mut self, dst: u8, func: u8, args: u8, nargs: u8) -> usize {
        self.touch(dst);
        self.touch(args.saturating_add(nargs.saturating_sub(1)));
        self.op(Opcode::Call, dst, i32::from(func), args, nargs)
    }

    /// Tail call; emit a `ret(dst)` right after it
    pub fn tail_call(&mut self, dst: u8, func: u8, args: u8, nargs: u8) -> usize {
        self.touch(dst);
        self.touch(args.saturating_add(nargs.saturating_sub(1)));
        self.op(Opcode::TailCall, dst, i32::from(func), args, nargs)
    }

    /// Return r[src]
    pub fn ret(&mut self, src: u8) -> usize {
        self.op(Opcode::Return, 1, i32::from(src), 0, 0)
    }

    /// Return null
    pub fn ret_null(&mut self) -> usize {
        self.op(Opcode::Return, NO_TARGET, 0, 0, 0)
    }

    // ===== Closures =====

    /// r[dst] = closure over nested function `index`
    pub fn closure(&mut self, dst: u8, index: i32) -> usize {
        self.touch(dst);
        self.op(Opcode::Closure, dst, index, 0, 0)
    }

    /// r[dst] = outer[index]
    pub fn get_outer(&mut self, dst: u8, index: i32) -> usize {
        self.touch(dst);
        self.op(Opcode::GetOuter, dst, index, 0, 0)
    }

    /// outer[index] = r[src]
    pub fn set_outer(&mut self, dst: u8, index: i32, src: u8) -> usize {
        self.touch(dst);
        self.touch(src);
        self.op(Opcode::SetOuter, dst, index, src, 0)
    }

    // ===== Objects =====

    /// r[dst] = {}
    pub fn new_table(&mut self, dst: u8) -> usize {
        self.touch(dst);
        self.op(Opcode::NewObj, dst, 0, 0, NewObjKind::Table as u8)
    }

    /// r[dst] = [] with room for `capacity` elements
    pub fn new_array(&mut self, dst: u8, capacity: i32) -> usize {
        self.touch(dst);
        self.op(Opcode::NewObj, dst, capacity, 0, NewObjKind::Array as u8)
    }

    /// r[dst] = class, optionally extending r[base]
    pub fn new_class(&mut self, dst: u8, base: Option<u8>) -> usize {
        self.touch(dst);
        let base = base.map_or(-1, i32::from);
        self.op(Opcode::NewObj, dst, base, 0, NewObjKind::Class as u8)
    }

    /// r[array].push(r[src])
    pub fn append(&mut self, array: u8, src: u8) -> usize {
        self.op(Opcode::AppendArray, array, i32::from(src), AppendKind::Register as u8, 0)
    }

    /// r[array].push(literal)
    pub fn append_literal(&mut self, array: u8, literal: impl Into<Literal>) -> usize {
        let idx = self.literal(literal);
        self.op(Opcode::AppendArray, array, idx, AppendKind::Literal as u8, 0)
    }

    /// r[array].push(integer)
    pub fn append_int(&mut self, array: u8, value: i32) -> usize {
        self.op(Opcode::AppendArray, array, value, AppendKind::Integer as u8, 0)
    }

    /// r[dst] = r[table] with delegate r[delegate]
    pub fn delegate(&mut self, dst: u8, table: u8, delegate: u8) -> usize {
        self.touch(dst);
        self.op(Opcode::Delegate, dst, i32::from(table), delegate, 0)
    }

    /// r[dst] = r[obj] instanceof r[class]
    pub fn instance_of(&mut self, dst: u8, obj: u8, class: u8) -> usize {
        self.touch(dst);
        self.op(Opcode::InstanceOf, dst, i32::from(class), obj, 0)
    }

    /// r[dst] = typeof r[src]
    pub fn type_of(&mut self, dst: u8, src: u8) -> usize {
        self.touch(dst);
        self.op(Opcode::TypeOf, dst, i32::from(src), 0, 0)
    }

    // ===== Exception Traps =====

    /// Forward trap whose handler receives the error in r[ex_reg]
    pub fn push_trap(&mut self, ex_reg: u8) -> usize {
        self.touch(ex_reg);
        self.op(Opcode::PushTrap, ex_reg, 0, 0, 0)
    }

    /// Pop `count` traps
    pub fn pop_trap(&mut self, count: u8) -> usize {
        self.op(Opcode::PopTrap, count, 0, 0, 0)
    }

    /// Throw r[src]
    pub fn throw(&mut self, src: u8) -> usize {
        self.op(Opcode::Throw, src, 0, 0, 0)
    }

    // ===== Generators & Iteration =====

    /// Yield r[src]
    pub fn yield_value(&mut self, src: u8) -> usize {
        self.op(Opcode::Yield, 1, i32::from(src), 0, 0)
    }

    /// Yield null
    pub fn yield_null(&mut self) -> usize {
        self.op(Opcode::Yield, NO_TARGET, 0, 0, 0)
    }

    /// r[dst] = resume r[gen]
    pub fn resume(&mut self, dst: u8, generator: u8) -> usize {
        self.touch(dst);
        self.op(Opcode::Resume, dst, i32::from(generator), 0, 0)
    }

    /// Step iteration of r[container] into r[first..first+3]; forward exit jump
    pub fn foreach(&mut self, container: u8, first: u8) -> usize {
        self.touch(first.saturating_add(2));
        self.op(Opcode::Foreach, container, 0, first, 0)
    }

    /// Exit jump taken when r[container] is a finished generator
    pub fn post_foreach(&mut self, container: u8) -> usize {
        self.op(Opcode::PostForeach, container, 0, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_dedup() {
        let mut b = FunctionBuilder::new("f");
        let a = b.literal("x");
        let c = b.literal(1i64);
        assert_eq!(b.literal("x"), a);
        assert_ne!(b.literal(1.0f64), c);
        assert_eq!(b.build().literals.len(), 3);
    }

    #[test]
    fn test_stack_size_tracks_registers() {
        let mut b = FunctionBuilder::new("f");
        b.param("a");
        b.load_int(7, 1);
        b.ret(7);
        assert_eq!(b.build().stack_size, 8);
    }

    #[test]
    fn test_patch_forward_jump() {
        let mut b = FunctionBuilder::new("f");
        let j = b.jz(0);
        b.load_int(1, 1);
        b.load_int(1, 2);
        b.patch_jump(j);
        b.ret(1);
        let proto = b.build();
        assert_eq!(proto.instructions[j].arg1, 2);
        assert_eq!(proto.instructions[j].jump_target(j), Some(3));
    }

    #[test]
    fn test_backward_jump() {
        let mut b = FunctionBuilder::new("f");
        let top = b.load_int(1, 0);
        b.load_int(2, 0);
        let j = b.jmp_to(top);
        let proto = b.build();
        assert_eq!(proto.instructions[j].jump_target(j), Some(top as i64));
    }

    #[test]
    fn test_line_marks_merge() {
        let mut b = FunctionBuilder::new("f");
        b.line(1).line(2);
        b.ret_null();
        b.line(3);
        let proto = b.build();
        assert_eq!(proto.line_info.len(), 2);
        assert_eq!(proto.line_for(0), Some(2));
    }
}
