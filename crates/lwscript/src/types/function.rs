//! Function-family heap objects — `spec.md` §3/§4.9.
//!
//! Grounded on `ouros::types`'s function/closure split plus
//! `original_source/LibraryManager.cpp`'s native-function registration
//! shape for [`NativeFunction`].

use crate::bytecode::code::Chunk;
use crate::diagnostics::DiagnosticSink;
use crate::heap::HeapId;
use crate::token::Source;
use crate::value::Value;

/// Arity-matching discipline for a call, per `spec.md` §4.9's call
/// semantics table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArityKind {
    /// `argc` must equal `arity` exactly.
    None,
    /// `argc >= arity`; surplus arguments are discarded.
    Unnamed,
    /// `argc >= arity`; surplus arguments are packed into an array bound to
    /// the last formal parameter.
    Named,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    /// Count of named, non-varargs parameters.
    pub arity: u8,
    pub arity_kind: ArityKind,
    pub chunk: Chunk,
}

#[derive(Debug, Clone)]
pub struct Closure {
    pub function: HeapId,
    pub upvalues: Vec<HeapId>,
}

/// A captured variable. *Open* while the frame that declared it is still
/// executing — `location` is an absolute index into the VM's value stack.
/// *Closed* once that frame returns — the last value is copied in and the
/// upvalue no longer depends on the stack at all (`spec.md` §4.9's
/// open→closed transition).
#[derive(Debug, Clone, Copy)]
pub enum Upvalue {
    Open { stack_index: usize },
    Closed(Value),
}

/// Host callable ABI, per `spec.md` §6: `(args, argc, origin-token, result
/// out-param) -> produced?`. The `bool` return overloads "no value produced"
/// and "an error was already reported via `sink`" — `spec.md` §9's Open
/// Question notes this ambiguity is inherent to the original signature and
/// left unresolved here; callers must check `sink.has_errors()` themselves
/// if they need to distinguish the two.
pub type NativeFn =
    fn(args: &[Value], origin: Source, heap: &mut crate::heap::Heap, sink: &mut dyn DiagnosticSink, result: &mut Value) -> bool;

#[derive(Clone, Copy)]
pub struct NativeFunction {
    pub name: &'static str,
    pub arity: u8,
    pub func: NativeFn,
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFunction").field("name", &self.name).field("arity", &self.arity).finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BoundMethod {
    pub receiver: Value,
    pub closure: HeapId,
}
