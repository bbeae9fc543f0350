//! Class, enum, and module heap objects — `spec.md` §3/§4.5/§4.9.
//!
//! Grounded on `ouros::types::{class.rs, module.rs}`'s member-map shape.
//! `original_source/Object.h`'s richer `lwscript` dialect gives classes and
//! instances the same `OBJECT_CLASS` representation rather than a separate
//! instance kind; this module keeps that: [`Class`] is used both as the
//! template bound to the class name and as the value produced by `new` —
//! see `DESIGN.md` for why parent links are kept as shared template
//! references (correct `this`-binding for inherited methods) rather than
//! the per-instance parent clones a literal reading of `spec.md` §4.5's
//! "`CALL 0` them to obtain instantiated parents" would suggest.

use crate::heap::HeapId;
use crate::types::Globals;

#[derive(Debug, Clone)]
pub struct Class {
    pub name: String,
    /// Parent class templates, in declared order (`spec.md` §4.5:
    /// "parents are kept in declared order; member lookup walks self, then
    /// parents in order").
    pub parents: Vec<HeapId>,
    /// Constructors keyed by arity — a method named identically to the
    /// class, overloaded by parameter count (`spec.md` §4.4's function
    /// overload rule applied to constructors).
    pub constructors: ahash::AHashMap<u8, HeapId>,
    /// Non-constructor methods and constant (immutable) fields.
    pub constants: Globals,
    /// Mutable instance fields. On the template this holds declared
    /// defaults; on an instance (produced by `new`/zero-arg `CALL`) it holds
    /// the flattened, mutated per-instance state.
    pub fields: Globals,
    /// False on the `CLASS`-built template, true on every value `CALL`
    /// produces by cloning one. `new X(...)`'s two-`CALL` lowering
    /// (`bytecode/compiler.rs`) would otherwise run a zero-arity
    /// constructor twice — once per `CALL` — since both calls land on a
    /// `Class` value with no other way to tell "fresh template" from
    /// "already an instance" apart (`vm/call.rs`'s `instantiate`).
    pub is_instance: bool,
}

#[derive(Debug, Clone)]
pub struct EnumDef {
    pub name: String,
    pub constants: Globals,
}

/// Alias kept distinct from [`EnumDef`]'s AST counterpart in `ast.rs`.
pub type EnumObj = EnumDef;

#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub bindings: Globals,
}
