//! Structural syntax checks — `spec.md` §4.3.
//!
//! Grounded on `original_source/SyntaxCheckPass.cpp`: a tree walk tracking
//! loop/function nesting so that `break`/`continue` outside a loop, a
//! duplicate parameter name, a duplicate enum constant, a class inheriting
//! from itself, a `ref` target that isn't an lvalue, a `new` not followed by
//! a call, or a dict key that isn't a constant literal or identifier are all
//! reported as diagnostics rather than only surfacing later as a confusing
//! compiler or VM failure. This pass does not mutate the tree — it is purely
//! advisory/diagnostic, matching `spec.md` §4.3's "proceeds on non-fatal
//! errors... to surface multiple diagnostics".

use std::collections::HashSet;

use crate::ast::{ClassDef, EnumDef, Expr, ExprKind, FunctionDef, ReturnValue, Stmt, StmtKind};
use crate::diagnostics::{Diagnostic, DiagnosticSink, Phase};

pub fn run(ast: &Stmt, sink: &mut impl DiagnosticSink) {
    let mut checker = Checker { loop_depth: 0 };
    checker.check_stmt(ast, sink);
}

struct Checker {
    loop_depth: u32,
}

impl Checker {
    fn check_stmt(&mut self, stmt: &Stmt, sink: &mut impl DiagnosticSink) {
        match &stmt.kind {
            StmtKind::Break => {
                if self.loop_depth == 0 {
                    sink.report(Diagnostic::error(Phase::Semantic, "'break' outside of a loop", stmt.token.source));
                }
            }
            StmtKind::Continue => {
                if self.loop_depth == 0 {
                    sink.report(Diagnostic::error(Phase::Semantic, "'continue' outside of a loop", stmt.token.source));
                }
            }
            StmtKind::If { cond, then_branch, else_branch } => {
                self.check_expr(cond, sink);
                self.check_stmt(then_branch, sink);
                if let Some(else_branch) = else_branch {
                    self.check_stmt(else_branch, sink);
                }
            }
            StmtKind::Scope(stmts) | StmtKind::AstStmts(stmts) => stmts.iter().for_each(|s| self.check_stmt(s, sink)),
            StmtKind::While { cond, body, increment } => {
                self.check_expr(cond, sink);
                self.loop_depth += 1;
                self.check_stmt(body, sink);
                if let Some(increment) = increment {
                    self.check_stmt(increment, sink);
                }
                self.loop_depth -= 1;
            }
            StmtKind::Function(def) => self.check_function(def, sink),
            StmtKind::Class(def) => self.check_class(def, sink),
            StmtKind::Enum(def) => self.check_enum(def, sink),
            StmtKind::Module(def) => {
                let saved = self.loop_depth;
                self.loop_depth = 0;
                def.body.iter().for_each(|s| self.check_stmt(s, sink));
                self.loop_depth = saved;
            }
            StmtKind::Expr(expr) => self.check_expr(expr, sink),
            StmtKind::Return(Some(ReturnValue::Single(expr))) => self.check_expr(expr, sink),
            StmtKind::Return(Some(ReturnValue::Aggregate(exprs))) => exprs.iter().for_each(|e| self.check_expr(e, sink)),
            StmtKind::Return(None) => {}
            StmtKind::Var { bindings, .. } => {
                for binding in bindings {
                    if let Some(init) = &binding.initializer {
                        self.check_expr(init, sink);
                    }
                }
            }
        }
    }

    fn check_expr(&mut self, expr: &Expr, sink: &mut impl DiagnosticSink) {
        match &expr.kind {
            ExprKind::Literal(_) | ExprKind::Identifier(_) | ExprKind::This | ExprKind::Base | ExprKind::Varargs => {}
            ExprKind::Grouping(inner) | ExprKind::Prefix { operand: inner, .. } | ExprKind::Postfix { operand: inner, .. } => {
                self.check_expr(inner, sink);
            }
            ExprKind::Factorial(inner) => self.check_expr(inner, sink),
            ExprKind::Infix { left, right, .. } => {
                self.check_expr(left, sink);
                self.check_expr(right, sink);
            }
            ExprKind::Ternary { cond, then_branch, else_branch } => {
                self.check_expr(cond, sink);
                self.check_expr(then_branch, sink);
                self.check_expr(else_branch, sink);
            }
            ExprKind::Array(elements) | ExprKind::Aggregate(elements) => elements.iter().for_each(|e| self.check_expr(e, sink)),
            ExprKind::Dict(entries) => {
                for (key, value) in entries {
                    if !matches!(key.kind, ExprKind::Literal(_) | ExprKind::Identifier(_)) {
                        sink.report(Diagnostic::error(
                            Phase::Semantic,
                            "dict keys must be constant literals or identifiers",
                            key.token.source,
                        ));
                    }
                    self.check_expr(key, sink);
                    self.check_expr(value, sink);
                }
            }
            ExprKind::Struct(fields) => fields.iter().for_each(|(_, value)| self.check_expr(value, sink)),
            ExprKind::Index { object, index } => {
                self.check_expr(object, sink);
                self.check_expr(index, sink);
            }
            ExprKind::Call { callee, args } => {
                self.check_expr(callee, sink);
                args.iter().for_each(|a| self.check_expr(a, sink));
            }
            ExprKind::Dot { object, .. } => self.check_expr(object, sink),
            ExprKind::Reference(inner) => {
                if !is_lvalue(inner) {
                    sink.report(Diagnostic::error(Phase::Semantic, "'ref' target must be an identifier or index expression", inner.token.source));
                }
                self.check_expr(inner, sink);
            }
            ExprKind::New(inner) => {
                if !matches!(inner.kind, ExprKind::Call { .. }) {
                    sink.report(Diagnostic::error(Phase::Semantic, "'new' requires a call expression", inner.token.source));
                }
                self.check_expr(inner, sink);
            }
            ExprKind::Lambda(def) => self.check_function(def, sink),
            ExprKind::CompoundExpr { stmts, trailing } => {
                stmts.iter().for_each(|s| self.check_stmt(s, sink));
                self.check_expr(trailing, sink);
            }
        }
    }

    fn check_function(&mut self, def: &FunctionDef, sink: &mut impl DiagnosticSink) {
        let mut seen = HashSet::new();
        for param in &def.params {
            if !seen.insert(param.name.as_str()) {
                sink.report(Diagnostic::error(
                    Phase::Semantic,
                    format!("duplicate parameter name '{}'", param.name),
                    param.token.source,
                ));
            }
        }
        let saved = self.loop_depth;
        self.loop_depth = 0;
        def.body.iter().for_each(|s| self.check_stmt(s, sink));
        self.loop_depth = saved;
    }

    fn check_class(&mut self, def: &ClassDef, sink: &mut impl DiagnosticSink) {
        if def.parents.iter().any(|(name, _)| name == &def.name) {
            sink.report(Diagnostic::error(
                Phase::Semantic,
                format!("class '{}' cannot inherit from itself", def.name),
                def.token.source,
            ));
        }
        let mut seen_parents = HashSet::new();
        for (name, token) in &def.parents {
            if !seen_parents.insert(name.as_str()) {
                sink.report(Diagnostic::error(Phase::Semantic, format!("duplicate base class '{name}'"), token.source));
            }
        }
        for binding in &def.fields {
            if let Some(init) = &binding.initializer {
                self.check_expr(init, sink);
            }
        }
        for method in &def.methods {
            self.check_function(method, sink);
        }
        for nested in &def.nested_enums {
            self.check_enum(nested, sink);
        }
    }

    fn check_enum(&mut self, def: &EnumDef, sink: &mut impl DiagnosticSink) {
        let mut seen = HashSet::new();
        for (name, _) in &def.constants {
            if !seen.insert(name.as_str()) {
                sink.report(Diagnostic::error(
                    Phase::Semantic,
                    format!("duplicate enum constant '{name}' in '{}'", def.name),
                    def.token.source,
                ));
            }
        }
        for (_, value) in &def.constants {
            if let Some(value) = value {
                self.check_expr(value, sink);
            }
        }
    }
}

/// `ref` may only target an identifier or an index expression — the two
/// expression forms the VM can turn into a slot/element reference
/// (`RefLocal`/`RefUpvalue`/`RefGlobal`/`RefIndex`).
fn is_lvalue(expr: &Expr) -> bool {
    matches!(expr.kind, ExprKind::Identifier(_) | ExprKind::Index { .. })
}

#[cfg(test)]
mod tests {
    use crate::diagnostics::CollectingSink;
    use crate::lexer;
    use crate::parser;

    fn check(src: &str) -> CollectingSink {
        let mut sink = CollectingSink::new();
        let tokens = lexer::scan(src, &mut sink);
        let ast = parser::parse(tokens, &mut sink);
        super::run(&ast, &mut sink);
        sink
    }

    #[test]
    fn flags_break_outside_loop() {
        let sink = check("break;");
        assert!(sink.has_errors());
    }

    #[test]
    fn allows_break_inside_while() {
        let sink = check("while (true) { break; }");
        assert!(!sink.has_errors());
    }

    #[test]
    fn flags_self_inheriting_class() {
        let sink = check("class A : A { }");
        assert!(sink.has_errors());
    }

    #[test]
    fn flags_duplicate_enum_constants() {
        let sink = check("enum Color { Red, Red }");
        assert!(sink.has_errors());
    }

    #[test]
    fn flags_ref_of_a_non_lvalue() {
        let sink = check("let x = &5;");
        assert!(sink.has_errors());
    }

    #[test]
    fn allows_ref_of_an_identifier_and_index() {
        let sink = check("let a = 1; let b = [1]; let x = &a; let y = &b[0];");
        assert!(!sink.has_errors());
    }

    #[test]
    fn flags_new_not_followed_by_a_call() {
        let sink = check("let x = new Foo;");
        assert!(sink.has_errors());
    }

    #[test]
    fn allows_new_followed_by_a_call() {
        let sink = check("let x = new Foo();");
        assert!(!sink.has_errors());
    }

    #[test]
    fn flags_non_constant_dict_key() {
        let sink = check("let a = 1; let d = { a + 1: 2 };");
        assert!(sink.has_errors());
    }

    #[test]
    fn allows_literal_and_identifier_dict_keys() {
        let sink = check("let a = 1; let d = { \"k\": 1, a: 2 };");
        assert!(!sink.has_errors());
    }
}
