//! Native-function ABI and the two illustrative natives this crate ships —
//! `spec.md` §6/§9.
//!
//! Grounded on `original_source/liblwScript/LibraryManager.cpp`'s
//! registration shape: native functions are bound into the global table
//! under a fixed name before compilation begins, exactly like an ordinary
//! global variable, so user code calls them with plain call syntax. The
//! broader io/ds/mem/time standard library stays an external collaborator's
//! concern (`spec.md` §1); `println`/`len` exist to exercise the mechanism
//! end to end.

use ahash::AHashMap;

use crate::diagnostics::{Diagnostic, DiagnosticSink, Phase};
use crate::heap::Heap;
use crate::token::Source;
use crate::types::function::NativeFunction;
use crate::types::Object;
use crate::value::Value;

const NATIVES: &[NativeFunction] =
    &[NativeFunction { name: "println", arity: 0, func: println }, NativeFunction { name: "len", arity: 1, func: len }];

/// Registers every native function as a global binding, in the order
/// `NATIVES` lists them, and returns the name→slot table `engine.rs` seeds
/// its resolver with so user code resolves `println`/`len` to the same
/// slots these natives were actually installed at.
pub fn install(heap: &mut Heap, globals: &mut Vec<Value>) -> AHashMap<String, u16> {
    let mut names = AHashMap::default();
    for native in NATIVES {
        let slot = globals.len() as u16;
        let id = heap.allocate(Object::Native(*native), &mut |_| {});
        globals.push(Value::Object(id));
        names.insert(native.name.to_string(), slot);
    }
    names
}

/// Displays a value the way `println` does: heap objects render through
/// [`Object::to_display_string`], scalars through [`Value`]'s own `Display`.
fn display(value: Value, heap: &Heap) -> String {
    match value {
        Value::Object(id) => heap.get(id).to_display_string(),
        scalar => scalar.to_string(),
    }
}

/// `println(...)`: prints every argument separated by a space, followed by a
/// newline. Accepts any arity (`NativeFunction::arity` is advisory here,
/// matching the varargs-friendly natives `original_source`'s library
/// functions use); never produces a value.
fn println(args: &[Value], _origin: Source, heap: &mut Heap, _sink: &mut dyn DiagnosticSink, _result: &mut Value) -> bool {
    let rendered: Vec<String> = args.iter().map(|v| display(*v, heap)).collect();
    println!("{}", rendered.join(" "));
    false
}

/// `len(x)`: element count of a string (in `char`s), array, or dict. Any
/// other argument count or type reports a runtime diagnostic through `sink`
/// and produces no value.
fn len(args: &[Value], origin: Source, heap: &mut Heap, sink: &mut dyn DiagnosticSink, result: &mut Value) -> bool {
    let [arg] = args else {
        sink.report(Diagnostic::error(Phase::Runtime, format!("len() expects 1 argument, got {}", args.len()), origin));
        return false;
    };
    let Value::Object(id) = arg else {
        sink.report(Diagnostic::error(Phase::Runtime, format!("len() has no meaning for a {}", arg.type_name()), origin));
        return false;
    };
    let count = match heap.get(*id) {
        Object::String(s) => s.value.chars().count(),
        Object::Array(a) => a.elements.len(),
        Object::Dict(d) => d.entries.len(),
        other => {
            sink.report(Diagnostic::error(Phase::Runtime, format!("len() has no meaning for a {}", other.kind_name()), origin));
            return false;
        }
    };
    #[allow(clippy::cast_possible_wrap)]
    {
        *result = Value::Int(count as i64);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LwString;

    #[test]
    fn install_registers_both_natives_in_order() {
        let mut heap = Heap::new(1 << 20, 2.0);
        let mut globals = Vec::new();
        let names = install(&mut heap, &mut globals);
        assert_eq!(names["println"], 0);
        assert_eq!(names["len"], 1);
        assert_eq!(globals.len(), 2);
        assert!(matches!(heap.get(extract_id(globals[0])), Object::Native(n) if n.name == "println"));
        assert!(matches!(heap.get(extract_id(globals[1])), Object::Native(n) if n.name == "len"));
    }

    #[test]
    fn len_counts_string_chars() {
        let mut heap = Heap::new(1 << 20, 2.0);
        let id = heap.allocate(Object::String(LwString::new("hi")), &mut |_| {});
        let mut sink = crate::diagnostics::CollectingSink::new();
        let mut result = Value::Null;
        let produced = len(&[Value::Object(id)], Source::new(1, 1, 0), &mut heap, &mut sink, &mut result);
        assert!(produced);
        assert_eq!(result, Value::Int(2));
        assert!(!sink.has_errors());
    }

    #[test]
    fn len_rejects_wrong_arity() {
        let mut heap = Heap::new(1 << 20, 2.0);
        let mut sink = crate::diagnostics::CollectingSink::new();
        let mut result = Value::Null;
        let produced = len(&[], Source::new(1, 1, 0), &mut heap, &mut sink, &mut result);
        assert!(!produced);
        assert!(sink.has_errors());
    }

    fn extract_id(value: Value) -> crate::heap::HeapId {
        match value {
            Value::Object(id) => id,
            _ => panic!("expected an object value"),
        }
    }
}
