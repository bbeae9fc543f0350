//! Invariant checks that cut across the pipeline rather than following one
//! `spec.md` §8 scenario — garbage collection reachability under real
//! execution, and destructuring a shorter right-hand side than the pattern
//! asks for (`spec.md` §4.2: "a missing trailing element binds `null`").

use lwscript::config::Config;
use lwscript::engine::Engine;
use lwscript::types::Object;
use lwscript::value::Value;

#[test]
fn stress_gc_preserves_reachable_globals_across_many_allocations() {
    let mut engine = Engine::new(Config::default().stress_gc(true));
    let closure = engine
        .compile(
            "let kept = [\"alive\"];\n\
             fn churn() {\n\
               let i = 0;\n\
               while (i < 200) {\n\
                 let garbage = [i, i + 1, i + 2];\n\
                 i = i + 1;\n\
               }\n\
               return kept[0];\n\
             }\n\
             return churn();",
            "test",
        )
        .unwrap();
    let result = engine.run(closure).unwrap();
    let Value::Object(id) = result else { panic!("expected a string") };
    let Object::String(s) = engine.heap().get(id) else { panic!("expected a string") };
    assert_eq!(s.value, "alive");
}

#[test]
fn destructuring_a_shorter_array_fills_missing_names_with_null() {
    let mut engine = Engine::new(Config::default());
    let closure = engine.compile("let [x, y, z] = [1]; return [x, y, z];", "test").unwrap();
    let result = engine.run(closure).unwrap();
    let Value::Object(id) = result else { panic!("expected an array") };
    let Object::Array(arr) = engine.heap().get(id) else { panic!("expected an array") };
    assert_eq!(arr.elements[0], Value::Int(1));
    assert_eq!(arr.elements[1], Value::Null);
    assert_eq!(arr.elements[2], Value::Null);
}

#[test]
fn rest_pattern_is_empty_when_nothing_remains() {
    let mut engine = Engine::new(Config::default());
    let closure = engine.compile("let [x, ...rest] = [1]; return rest;", "test").unwrap();
    let result = engine.run(closure).unwrap();
    let Value::Object(id) = result else { panic!("expected an array") };
    let Object::Array(arr) = engine.heap().get(id) else { panic!("expected an array") };
    assert!(arr.elements.is_empty());
}
