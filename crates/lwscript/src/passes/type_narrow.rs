//! Advisory type narrowing — `spec.md` §4.3 / §9.
//!
//! Grounded on `original_source/TypeCheckAndResolvePass.cpp`. This dialect
//! has no runtime type checking beyond what the VM enforces dynamically
//! (`spec.md` §9's Open Question resolution: narrowing stays advisory-only,
//! never coerces). This pass only compares a declared [`TypeAnnotation`]
//! against a *literal* initializer — the one case where the static type is
//! known for certain.
//!
//! For the ten primitive numeric kinds, `spec.md` §4.3 calls for a fixed
//! (K₁, K₂) narrowing/widening table rather than coarse category membership:
//! an integer literal's natural kind is the widest signed kind it could be
//! written as (`i64`), a float literal's is `f64`. Declaring anything
//! narrower emits `Diagnostic::info` if the literal's value still fits, or
//! `Diagnostic::warning` if it overflows the declared kind (`let x: u8 =
//! 300;`); declaring the same or a wider kind is silent. A non-numeric
//! mismatch (`let x: bool = 1;`) keeps the old coarse-category warning.

use crate::ast::{Binding, ClassDef, Literal, Pattern, Stmt, StmtKind, TypeAnnotation};
use crate::diagnostics::{Diagnostic, DiagnosticSink, Phase};
use crate::token::Source;

pub fn run(ast: &Stmt, sink: &mut impl DiagnosticSink) {
    check_stmt(ast, sink);
}

fn check_stmt(stmt: &Stmt, sink: &mut impl DiagnosticSink) {
    match &stmt.kind {
        StmtKind::Var { bindings, .. } => bindings.iter().for_each(|b| check_binding(b, sink)),
        StmtKind::If { then_branch, else_branch, .. } => {
            check_stmt(then_branch, sink);
            if let Some(else_branch) = else_branch {
                check_stmt(else_branch, sink);
            }
        }
        StmtKind::Scope(stmts) | StmtKind::AstStmts(stmts) => stmts.iter().for_each(|s| check_stmt(s, sink)),
        StmtKind::While { body, increment, .. } => {
            check_stmt(body, sink);
            if let Some(increment) = increment {
                check_stmt(increment, sink);
            }
        }
        StmtKind::Function(def) => def.body.iter().for_each(|s| check_stmt(s, sink)),
        StmtKind::Class(def) => check_class(def, sink),
        StmtKind::Module(def) => def.body.iter().for_each(|s| check_stmt(s, sink)),
        StmtKind::Expr(_) | StmtKind::Return(_) | StmtKind::Break | StmtKind::Continue | StmtKind::Enum(_) => {}
    }
}

fn check_class(def: &ClassDef, sink: &mut impl DiagnosticSink) {
    def.fields.iter().for_each(|b| check_binding(b, sink));
    for method in &def.methods {
        method.body.iter().for_each(|s| check_stmt(s, sink));
    }
}

fn check_binding(binding: &Binding, sink: &mut impl DiagnosticSink) {
    let Pattern::Name { type_annotation: Some(annotation), .. } = &binding.pattern else { return };
    let Some(initializer) = &binding.initializer else { return };
    let crate::ast::ExprKind::Literal(literal) = &initializer.kind else { return };
    let source = initializer.token.source;
    if let Some(declared) = numeric_kind(&annotation.name) {
        if let Some(diag) = narrowing_diagnostic(declared, literal, &annotation.name, source) {
            sink.report(diag);
        }
        return;
    }
    if !literal_matches(annotation, literal) {
        sink.report(Diagnostic::warning(
            Phase::TypeNarrowing,
            format!("initializer does not match declared type '{}'", annotation.name),
            source,
        ));
    }
}

/// One of `spec.md` §4.3's ten primitive numeric kinds, ranked for the
/// narrowing/widening table. Ordering within a signedness family follows bit
/// width; `i64`/`f64` are each family's natural literal kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

fn numeric_kind(name: &str) -> Option<NumKind> {
    Some(match name {
        "i8" => NumKind::I8,
        "i16" => NumKind::I16,
        "i32" => NumKind::I32,
        "i64" => NumKind::I64,
        "u8" => NumKind::U8,
        "u16" => NumKind::U16,
        "u32" => NumKind::U32,
        "u64" => NumKind::U64,
        "f32" => NumKind::F32,
        "f64" => NumKind::F64,
        _ => return None,
    })
}

fn int_fits(kind: NumKind, n: i64) -> bool {
    match kind {
        NumKind::I8 => i8::try_from(n).is_ok(),
        NumKind::I16 => i16::try_from(n).is_ok(),
        NumKind::I32 => i32::try_from(n).is_ok(),
        NumKind::I64 => true,
        NumKind::U8 => u8::try_from(n).is_ok(),
        NumKind::U16 => u16::try_from(n).is_ok(),
        NumKind::U32 => u32::try_from(n).is_ok(),
        NumKind::U64 => u64::try_from(n).is_ok(),
        NumKind::F32 | NumKind::F64 => true,
    }
}

/// The (K₁, K₂) table lookup: `declared` is K₁, the literal's own kind (`i64`
/// for every int literal, `f64` for every float literal) is K₂.
fn narrowing_diagnostic(declared: NumKind, literal: &Literal, name: &str, source: Source) -> Option<Diagnostic> {
    match literal {
        Literal::Int(n) => int_narrowing(declared, *n, name, source),
        Literal::Float(f) => float_narrowing(declared, *f, name, source),
        _ => Some(Diagnostic::warning(Phase::TypeNarrowing, format!("initializer does not match declared type '{name}'"), source)),
    }
}

fn int_narrowing(declared: NumKind, n: i64, name: &str, source: Source) -> Option<Diagnostic> {
    if matches!(declared, NumKind::F32 | NumKind::F64) {
        return Some(Diagnostic::info(Phase::TypeNarrowing, format!("integer literal widened to '{name}'"), source));
    }
    if declared == NumKind::I64 {
        return None;
    }
    if int_fits(declared, n) {
        Some(Diagnostic::info(Phase::TypeNarrowing, format!("integer literal narrowed to '{name}'"), source))
    } else {
        Some(Diagnostic::warning(Phase::TypeNarrowing, format!("integer literal {n} overflows declared type '{name}'"), source))
    }
}

fn float_narrowing(declared: NumKind, f: f64, name: &str, source: Source) -> Option<Diagnostic> {
    match declared {
        NumKind::F64 => None,
        NumKind::F32 => {
            if f.is_finite() && (f as f32).is_infinite() {
                Some(Diagnostic::warning(Phase::TypeNarrowing, format!("float literal {f} overflows declared type '{name}'"), source))
            } else {
                Some(Diagnostic::info(Phase::TypeNarrowing, format!("float literal narrowed to '{name}'"), source))
            }
        }
        _ => Some(Diagnostic::warning(Phase::TypeNarrowing, format!("float literal assigned to integer-typed '{name}'"), source)),
    }
}

fn literal_matches(annotation: &TypeAnnotation, literal: &Literal) -> bool {
    match (annotation.name.as_str(), literal) {
        ("bool", Literal::Bool(_)) => true,
        ("char", Literal::Char(_)) => true,
        ("any", _) => true,
        (_, Literal::Null) => true,
        // a user-defined class/enum name can't be statically checked against
        // a literal at all — only scalar built-ins are narrowed.
        (name, _) if !matches!(name, "bool" | "char") => true,
        _ => false,
    }
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
    fn warns_on_mismatched_scalar_initializer() {
        let sink = check("let x: bool = 1;");
        assert!(!sink.has_errors());
        assert_eq!(sink.diagnostics.len(), 1);
    }

    #[test]
    fn accepts_exact_kind_match_silently() {
        let sink = check("let x: i64 = 1;");
        assert!(sink.diagnostics.is_empty());
    }

    #[test]
    fn notes_a_narrowing_int_literal_that_still_fits() {
        let sink = check("let x: i32 = 1;");
        assert_eq!(sink.diagnostics.len(), 1);
        assert_eq!(sink.diagnostics[0].severity, crate::diagnostics::Severity::Info);
    }

    #[test]
    fn warns_on_a_narrowing_int_literal_that_overflows() {
        let sink = check("let x: u8 = 300;");
        assert_eq!(sink.diagnostics.len(), 1);
        assert_eq!(sink.diagnostics[0].severity, crate::diagnostics::Severity::Warning);
    }

    #[test]
    fn notes_an_int_literal_widened_to_a_float_kind() {
        let sink = check("let x: f64 = 1;");
        assert_eq!(sink.diagnostics.len(), 1);
        assert_eq!(sink.diagnostics[0].severity, crate::diagnostics::Severity::Info);
    }

    #[test]
    fn does_not_touch_non_literal_initializers() {
        let sink = check("let x: i32 = f();");
        assert!(sink.diagnostics.is_empty());
    }
}
