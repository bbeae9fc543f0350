//! End-to-end scenarios driving the public `Engine` API, one per scenario —
//! `spec.md` §8's numbered program/output pairs, re-expressed with an
//! explicit top-level `return` in place of capturing `println`'s stdout
//! side effect, since a test has no portable way to intercept a native
//! function writing directly to the process's stdout.

use lwscript::config::Config;
use lwscript::engine::Engine;
use lwscript::types::Object;
use lwscript::value::Value;

fn run(source: &str) -> Value {
    let mut engine = Engine::new(Config::default());
    let closure = engine.compile(source, "test").expect("compile failed");
    engine.run(closure).expect("run failed")
}

#[test]
fn scenario_1_arithmetic() {
    let value = run("let a = 3; let b = 4; return a * a + b * b;");
    assert_eq!(value, Value::Int(25));
}

#[test]
fn scenario_2_recursive_factorial() {
    let value = run("fn fact(n) { if (n <= 1) return 1; return n * fact(n - 1); }\nreturn fact(6);");
    assert_eq!(value, Value::Int(720));
}

#[test]
fn scenario_3_array_destructuring_with_rest() {
    let mut engine = Engine::new(Config::default());
    let closure = engine
        .compile("let [x, y, ...rest] = [1, 2, 3, 4, 5]; return [x, y, rest];", "test")
        .unwrap();
    let result = engine.run(closure).unwrap();
    let Value::Object(id) = result else { panic!("expected an array") };
    let Object::Array(outer) = engine.heap().get(id) else { panic!("expected an array") };
    assert_eq!(outer.elements[0], Value::Int(1));
    assert_eq!(outer.elements[1], Value::Int(2));
    let Value::Object(rest_id) = outer.elements[2] else { panic!("expected rest to be an array") };
    let Object::Array(rest) = engine.heap().get(rest_id) else { panic!("expected rest to be an array") };
    assert_eq!(rest.elements, vec![Value::Int(3), Value::Int(4), Value::Int(5)]);
}

#[test]
fn scenario_4_closure_over_mutable_upvalue() {
    let value = run(
        "fn make_counter() { let c = 0; return fn() { c = c + 1; return c; }; }\n\
         let k = make_counter();\n\
         k();\n\
         k();\n\
         return k();",
    );
    assert_eq!(value, Value::Int(3));
}

#[test]
fn scenario_5_multi_inheritance_base_call() {
    let mut engine = Engine::new(Config::default());
    let closure = engine
        .compile(
            "class A { fn hi() { return \"a\"; } }\n\
             class B : A { fn hi2() { return base.hi() + \"!\"; } }\n\
             let b = new B();\n\
             return b.hi2();",
            "test",
        )
        .unwrap();
    let result = engine.run(closure).unwrap();
    let Value::Object(id) = result else { panic!("expected a string") };
    let Object::String(s) = engine.heap().get(id) else { panic!("expected a string") };
    assert_eq!(s.value, "a!");
}

#[test]
fn scenario_6_reference_follows_live_slot() {
    let value = run("let arr = [10, 20, 30]; let r = &arr[1]; arr[1] = 99; return r;");
    assert_eq!(value, Value::Int(99));
}

#[test]
fn negative_index_mirrors_length_minus_one() {
    let value = run("let arr = [10, 20, 30]; return arr[-1];");
    assert_eq!(value, Value::Int(30));
}

#[test]
fn out_of_range_index_is_a_runtime_error() {
    let mut engine = Engine::new(Config::default());
    let closure = engine.compile("let arr = [1, 2, 3]; return arr[10];", "test").unwrap();
    assert!(engine.run(closure).is_err());
}

#[test]
fn call_with_too_few_arguments_against_fixed_arity_is_a_runtime_error() {
    let mut engine = Engine::new(Config::default());
    let closure = engine.compile("fn needs_two(a, b) { return a + b; }\nreturn needs_two(1);", "test").unwrap();
    assert!(engine.run(closure).is_err());
}

#[test]
fn upvalue_capture_survives_two_enclosing_returns() {
    let value = run(
        "fn outer() {\n\
           let shared = 10;\n\
           fn middle() {\n\
             fn inner() { return shared + 1; }\n\
             return inner;\n\
           }\n\
           return middle();\n\
         }\n\
         let f = outer();\n\
         return f();",
    );
    assert_eq!(value, Value::Int(11));
}
