//! `CodeBuilder`: incremental chunk emission with jump patching and
//! stack-depth tracking — `spec.md` §4.5/§8 invariant 6.
//!
//! Grounded closely on `ouros::bytecode::builder::CodeBuilder`'s emit/patch
//! API, generalized from Python bytecode's variable-length instructions to
//! this language's fixed-width operand encoding (`bytecode/op.rs`).

use crate::bytecode::code::{Chunk, Constant};
use crate::bytecode::op::Opcode;
use crate::resolver::UpvalueDesc;
use crate::token::Source;

/// A forward jump emitted before its target address is known; `patch`
/// rewrites the placeholder offset once the target is reached. `spec.md` §8
/// invariant 6 requires each jump's patch step run exactly once.
#[derive(Debug, Clone, Copy)]
pub struct JumpHandle {
    operand_offset: usize,
}

pub struct CodeBuilder {
    pub chunk: Chunk,
    /// Current compile-time stack depth, used only for debug assertions —
    /// the VM re-derives the real depth at runtime.
    stack_depth: i32,
    max_stack_depth: i32,
}

impl CodeBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { chunk: Chunk::new(name), stack_depth: 0, max_stack_depth: 0 }
    }

    #[must_use]
    pub fn offset(&self) -> usize {
        self.chunk.code.len()
    }

    #[must_use]
    pub fn max_stack_depth(&self) -> i32 {
        self.max_stack_depth
    }

    fn note_stack(&mut self, delta: i32) {
        self.stack_depth += delta;
        self.max_stack_depth = self.max_stack_depth.max(self.stack_depth);
    }

    fn emit_tag(&mut self, op: Opcode, source: Source) -> usize {
        let at = self.offset();
        self.chunk.record_source(at, source);
        self.chunk.code.push(op as u8);
        at
    }

    pub fn emit(&mut self, op: Opcode, source: Source, stack_delta: i32) {
        self.emit_tag(op, source);
        self.note_stack(stack_delta);
    }

    pub fn emit_u8(&mut self, op: Opcode, operand: u8, source: Source, stack_delta: i32) {
        self.emit_tag(op, source);
        self.chunk.code.push(operand);
        self.note_stack(stack_delta);
    }

    pub fn emit_u16(&mut self, op: Opcode, operand: u16, source: Source, stack_delta: i32) {
        self.emit_tag(op, source);
        self.chunk.code.extend_from_slice(&operand.to_le_bytes());
        self.note_stack(stack_delta);
    }

    pub fn emit_constant(&mut self, constant: Constant, source: Source) -> u16 {
        let idx = self.chunk.add_constant(constant);
        self.emit_u16(Opcode::Constant, idx, source, 1);
        idx
    }

    /// Emits `op` with a placeholder 16-bit offset, returning a handle to
    /// patch once the jump target is known.
    pub fn emit_jump(&mut self, op: Opcode, source: Source) -> JumpHandle {
        self.emit_tag(op, source);
        let operand_offset = self.offset();
        self.chunk.code.extend_from_slice(&0u16.to_le_bytes());
        JumpHandle { operand_offset }
    }

    /// Patches a forward jump to land just past the current offset.
    pub fn patch_jump(&mut self, handle: JumpHandle) {
        let target = self.offset();
        let from = handle.operand_offset + 2;
        let delta = (target - from) as u16;
        self.chunk.code[handle.operand_offset..handle.operand_offset + 2].copy_from_slice(&delta.to_le_bytes());
    }

    /// Emits a backward `LOOP` targeting `loop_start`.
    pub fn emit_loop(&mut self, loop_start: usize, source: Source) {
        self.emit_tag(Opcode::Loop, source);
        let from = self.offset() + 2;
        let delta = (from - loop_start) as u16;
        self.chunk.code.extend_from_slice(&delta.to_le_bytes());
    }

    /// `CLOSURE const_idx upvalue_count (is_local, index)*upvalue_count` —
    /// the one opcode whose operand length isn't fixed, so `op.rs` only
    /// covers its 3-byte prefix and the trailing pairs are written here.
    pub fn emit_closure(&mut self, const_idx: u16, upvalues: &[UpvalueDesc], source: Source) {
        self.emit_tag(Opcode::Closure, source);
        self.chunk.code.extend_from_slice(&const_idx.to_le_bytes());
        self.chunk.code.push(upvalues.len() as u8);
        for uv in upvalues {
            self.chunk.code.push(u8::from(uv.is_local));
            self.chunk.code.extend_from_slice(&uv.index.to_le_bytes());
        }
        self.note_stack(1);
    }

    /// `CLASS ctor_count var_count const_count parent_count`. The stack it
    /// consumes (bottom to top) is: the class's own name, then
    /// `(name, value)` pairs for `const_count` non-constructor constants
    /// (methods and nested enums), then `(arity, closure)` pairs for
    /// `ctor_count` constructors — one entry per overload, keyed by arity so
    /// same-named constructors at different arities don't collide — then
    /// `(name, value)` pairs for `var_count` mutable fields, then
    /// `parent_count` already-evaluated parent class values —
    /// `bytecode/compiler.rs` pushes them in exactly that order.
    pub fn emit_class(&mut self, ctor_count: u8, var_count: u8, const_count: u8, parent_count: u8, source: Source) {
        self.emit_tag(Opcode::Class, source);
        self.chunk.code.push(ctor_count);
        self.chunk.code.push(var_count);
        self.chunk.code.push(const_count);
        self.chunk.code.push(parent_count);
        let consumed = 1
            + 2 * i32::from(const_count)
            + 2 * i32::from(ctor_count)
            + 2 * i32::from(var_count)
            + i32::from(parent_count);
        self.note_stack(1 - consumed);
    }

    /// `MODULE var_count const_count`, same stack shape as [`Self::emit_class`]
    /// minus the parent list: module name, then `const_count` `(name, value)`
    /// pairs. `bytecode/compiler.rs` always compiles module bodies and enum
    /// declarations with `var_count == 0`, since neither has a mutable-field
    /// concept distinct from its named bindings.
    pub fn emit_module(&mut self, var_count: u8, const_count: u8, source: Source) {
        self.emit_tag(Opcode::Module, source);
        self.chunk.code.push(var_count);
        self.chunk.code.push(const_count);
        let consumed = 1 + 2 * i32::from(var_count) + 2 * i32::from(const_count);
        self.note_stack(1 - consumed);
    }
}
