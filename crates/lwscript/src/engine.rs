//! Top-level embedding entry point — `spec.md` §9's re-architecture note
//! ("replace the global `Allocator`/`LibraryManager` singletons with an
//! explicit context object").
//!
//! Grounded on `ouros::run::Runner`/`Executor`'s parse-once, run-many split:
//! [`Engine::compile`] turns source text into a reusable compiled unit,
//! [`Engine::run`] executes one against the engine's own heap and globals,
//! which persist across calls the way `Executor`'s heap/namespace capacity
//! carries forward between `Runner::run` invocations.

use crate::bytecode::{self, code::Function};
use crate::diagnostics::{CollectingSink, Diagnostic, DiagnosticSink};
use crate::heap::{Heap, HeapId};
use crate::lexer;
use crate::natives;
use crate::parser;
use crate::passes;
use crate::types::Object;
use crate::value::Value;
use crate::vm::Vm;
use crate::Config;

/// A compiled, ready-to-run program, returned by [`Engine::compile`] and
/// consumed by [`Engine::run`]. Wraps the heap id of the top-level
/// function's `Object::Function`; `run` wraps it in a closure of its own
/// when it starts the VM (`vm/mod.rs`'s `run`).
#[derive(Debug, Clone, Copy)]
pub struct Closure(HeapId);

/// Owns one run's [`Heap`] and global-variable table. Source is compiled
/// against the engine's current globals (so a later `compile` call sees
/// bindings a previous `run` created at the top level), and each `run`
/// shares the same heap, so objects allocated by one script survive into
/// the next the way a REPL session expects.
pub struct Engine {
    heap: Heap,
    globals: Vec<Value>,
    /// Name→slot table for every global `compile` has seen across this
    /// engine's lifetime, seeded with the native functions `natives::install`
    /// registers. Carried into each `compile` call so a name keeps the same
    /// slot in `globals` no matter which compile unit first referenced it —
    /// without this, `resolver.rs`'s per-call global numbering would let two
    /// scripts disagree about which slot `println` (or any shared top-level
    /// binding) lives in.
    global_names: ahash::AHashMap<String, u16>,
    config: Config,
}

impl Engine {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let mut heap = Heap::new(config.gc_initial_threshold, config.gc_growth_factor);
        heap.stress_gc = config.stress_gc;
        let mut globals = Vec::new();
        let global_names = natives::install(&mut heap, &mut globals);
        Self { heap, globals, global_names, config }
    }

    /// Read access to the engine's heap, so a host can inspect a heap-backed
    /// return value (an array, string, or instance) that [`Engine::run`]
    /// handed back as an opaque [`Value::Object`].
    #[must_use]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Lexes, parses, runs the AST passes, and compiles `source` into a
    /// top-level function, allocating it onto this engine's heap.
    ///
    /// # Errors
    /// Returns every diagnostic collected across the pipeline once any phase
    /// reports a fatal one; non-fatal diagnostics from an otherwise
    /// successful compile are discarded (`spec.md` §4.5's "collect warnings
    /// but still produce a result" only applies within a single phase, not
    /// across `compile`'s `Result` boundary).
    pub fn compile(&mut self, source: &str, name: &str) -> Result<Closure, Vec<Diagnostic>> {
        let mut sink = CollectingSink::new();
        let tokens = lexer::scan(source, &mut sink);
        let mut ast = parser::parse(tokens, &mut sink);
        passes::run_passes(&mut ast, &mut sink);
        let (function, global_names): (Function, ahash::AHashMap<String, u16>) =
            bytecode::compiler::compile_with_globals(&ast, &mut sink, self.global_names.clone());
        if sink.has_errors() {
            return Err(sink.diagnostics);
        }
        let _ = name;
        self.global_names = global_names;
        if self.globals.len() < self.global_names.len() {
            self.globals.resize(self.global_names.len(), Value::Null);
        }
        let globals = &self.globals;
        let id = self.heap.allocate(Object::Function(function), &mut |roots| {
            for v in globals {
                if let Value::Object(id) = v {
                    roots.push(*id);
                }
            }
        });
        Ok(Closure(id))
    }

    /// Serializes the compiled chunk behind `closure` to its binary wire
    /// format (`bytecode/code.rs`'s `Chunk::serialize`), for the CLI's
    /// `-s/--serialize` flag (`spec.md` §6).
    #[must_use]
    pub fn serialize(&self, closure: Closure) -> Vec<u8> {
        match self.heap.get(closure.0) {
            Object::Function(f) => f.chunk.serialize(),
            _ => unreachable!("Closure always wraps a compiled top-level function"),
        }
    }

    /// Runs a previously compiled [`Closure`] to completion.
    ///
    /// # Errors
    /// Returns the last fatal diagnostic the VM reported (`spec.md` §7's
    /// `RuntimeError`) if execution aborts.
    pub fn run(&mut self, closure: Closure) -> Result<Value, Diagnostic> {
        let mut sink = CollectingSink::new();
        let heap = std::mem::replace(&mut self.heap, Heap::new(1, self.config.gc_growth_factor));
        let mut vm = Vm::new(heap, &mut sink, self.config.value_stack_size, self.config.call_frame_stack_size);
        vm.globals = std::mem::take(&mut self.globals);
        let result = vm.run(closure.0);
        self.heap = vm.heap;
        self.globals = vm.globals;
        result.map_err(|_| sink.diagnostics.into_iter().last().expect("RuntimeAbort reported no diagnostic"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_and_runs_an_expression() {
        let mut engine = Engine::new(Config::default());
        let closure = engine.compile("fn main() { return 1 + 2; }\nreturn main();", "test").unwrap();
        let result = engine.run(closure).unwrap();
        assert_eq!(result, Value::Int(3));
    }

    #[test]
    fn compile_error_collects_diagnostics() {
        let mut engine = Engine::new(Config::default());
        let err = engine.compile("let = ;", "test").unwrap_err();
        assert!(!err.is_empty());
    }

    #[test]
    fn serialize_round_trips_through_chunk_deserialize() {
        let mut engine = Engine::new(Config::default());
        let closure = engine.compile("return 1 + 2;", "test").unwrap();
        let bytes = engine.serialize(closure);
        let chunk = crate::bytecode::code::Chunk::deserialize(&bytes).unwrap();
        assert_eq!(chunk.serialize(), bytes);
    }

    #[test]
    fn heap_and_globals_persist_across_runs() {
        let mut engine = Engine::new(Config::default());
        let first = engine.compile("let counter = 41;", "test").unwrap();
        engine.run(first).unwrap();
        let second = engine.compile("return counter + 1;", "test").unwrap();
        let result = engine.run(second).unwrap();
        assert_eq!(result, Value::Int(42));
    }
}
