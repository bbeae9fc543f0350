//! Constant folding — `spec.md` §4.3.
//!
//! Grounded on `original_source/ConstantFoldPass.cpp`: a bottom-up walk that
//! replaces an arithmetic/comparison/logical `Infix` node whose operands are
//! both literals with the single literal result, and a unary `Prefix` node
//! over a literal likewise. Folding is purely an optimization — `spec.md`
//! §4.3 requires it not change observable behavior, so division and modulo
//! by a literal zero are left unfolded for the VM to raise at runtime
//! (`spec.md` §4.9's "division/modulo by zero is a runtime error").

use crate::ast::{Expr, ExprKind, Literal, Stmt, StmtKind};
use crate::token::TokenKind;

pub fn run(ast: &mut Stmt) {
    fold_stmt(ast);
}

fn fold_stmt(stmt: &mut Stmt) {
    match &mut stmt.kind {
        StmtKind::Expr(expr) => fold_expr(expr),
        StmtKind::Return(Some(crate::ast::ReturnValue::Single(expr))) => fold_expr(expr),
        StmtKind::Return(Some(crate::ast::ReturnValue::Aggregate(exprs))) => exprs.iter_mut().for_each(fold_expr),
        StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue => {}
        StmtKind::If { cond, then_branch, else_branch } => {
            fold_expr(cond);
            fold_stmt(then_branch);
            if let Some(else_branch) = else_branch {
                fold_stmt(else_branch);
            }
        }
        StmtKind::Scope(stmts) | StmtKind::AstStmts(stmts) => stmts.iter_mut().for_each(fold_stmt),
        StmtKind::While { cond, body, increment } => {
            fold_expr(cond);
            fold_stmt(body);
            if let Some(increment) = increment {
                fold_stmt(increment);
            }
        }
        StmtKind::Var { bindings, .. } => {
            for binding in bindings {
                if let Some(init) = &mut binding.initializer {
                    fold_expr(init);
                }
            }
        }
        StmtKind::Function(def) => def.body.iter_mut().for_each(fold_stmt),
        StmtKind::Class(def) => {
            for binding in &mut def.fields {
                if let Some(init) = &mut binding.initializer {
                    fold_expr(init);
                }
            }
            for method in &mut def.methods {
                method.body.iter_mut().for_each(fold_stmt);
            }
        }
        StmtKind::Enum(def) => {
            for (_, value) in &mut def.constants {
                if let Some(value) = value {
                    fold_expr(value);
                }
            }
        }
        StmtKind::Module(def) => def.body.iter_mut().for_each(fold_stmt),
    }
}

fn fold_expr(expr: &mut Expr) {
    match &mut expr.kind {
        ExprKind::Grouping(inner) => {
            fold_expr(inner);
        }
        ExprKind::Prefix { op, operand } => {
            fold_expr(operand);
            if let Some(folded) = fold_prefix(*op, operand) {
                expr.kind = ExprKind::Literal(folded);
            }
        }
        ExprKind::Infix { op, left, right } => {
            fold_expr(left);
            fold_expr(right);
            if let Some(folded) = fold_infix(*op, left, right) {
                expr.kind = ExprKind::Literal(folded);
            }
        }
        ExprKind::Ternary { cond, then_branch, else_branch } => {
            fold_expr(cond);
            fold_expr(then_branch);
            fold_expr(else_branch);
            if let ExprKind::Literal(Literal::Bool(b)) = cond.kind {
                expr.kind = if b { then_branch.kind.clone() } else { else_branch.kind.clone() };
            }
        }
        ExprKind::Array(elements) | ExprKind::Aggregate(elements) => elements.iter_mut().for_each(fold_expr),
        ExprKind::Dict(entries) => {
            for (key, value) in entries {
                fold_expr(key);
                fold_expr(value);
            }
        }
        ExprKind::Struct(fields) => fields.iter_mut().for_each(|(_, value)| fold_expr(value)),
        ExprKind::Index { object, index } => {
            fold_expr(object);
            fold_expr(index);
        }
        ExprKind::Call { callee, args } => {
            fold_expr(callee);
            args.iter_mut().for_each(fold_expr);
        }
        ExprKind::Dot { object, .. } | ExprKind::New(object) | ExprKind::Reference(object) => {
            fold_expr(object);
        }
        ExprKind::Factorial(operand) => {
            fold_expr(operand);
            if let Some(folded) = fold_factorial(operand) {
                expr.kind = ExprKind::Literal(folded);
            }
        }
        ExprKind::Postfix { operand, .. } => fold_expr(operand),
        ExprKind::CompoundExpr { stmts, trailing } => {
            stmts.iter_mut().for_each(fold_stmt);
            fold_expr(trailing);
        }
        ExprKind::Lambda(def) => def.body.iter_mut().for_each(fold_stmt),
        ExprKind::Literal(_) | ExprKind::Identifier(_) | ExprKind::This | ExprKind::Base | ExprKind::Varargs => {}
    }
}

fn fold_prefix(op: TokenKind, operand: &Expr) -> Option<Literal> {
    let ExprKind::Literal(lit) = &operand.kind else { return None };
    match (op, lit) {
        (TokenKind::Minus, Literal::Int(n)) => Some(Literal::Int(-n)),
        (TokenKind::Minus, Literal::Float(f)) => Some(Literal::Float(-f)),
        (TokenKind::Bang, Literal::Bool(b)) => Some(Literal::Bool(!b)),
        (TokenKind::Tilde, Literal::Int(n)) => Some(Literal::Int(!n)),
        _ => None,
    }
}

/// Folds postfix `!` of an integer literal the way `vm/ops.rs`'s `factorial`
/// computes it at runtime: a tail-recursive product from 2 up to `n`, with
/// wrapping overflow. A negative operand is left unfolded so the VM raises
/// its runtime diagnostic instead of the pass silently picking a result.
fn fold_factorial(operand: &Expr) -> Option<Literal> {
    let ExprKind::Literal(Literal::Int(n)) = operand.kind else { return None };
    if n < 0 {
        return None;
    }
    let mut acc: i64 = 1;
    for i in 2..=n {
        acc = acc.wrapping_mul(i);
    }
    Some(Literal::Int(acc))
}

fn fold_infix(op: TokenKind, left: &Expr, right: &Expr) -> Option<Literal> {
    let ExprKind::Literal(lhs) = &left.kind else { return None };
    let ExprKind::Literal(rhs) = &right.kind else { return None };
    match (lhs, rhs) {
        (Literal::Int(a), Literal::Int(b)) => fold_int(op, *a, *b),
        (Literal::Float(a), Literal::Float(b)) => fold_float(op, *a, *b),
        (Literal::Bool(a), Literal::Bool(b)) => fold_bool(op, *a, *b),
        _ => None,
    }
}

fn fold_int(op: TokenKind, a: i64, b: i64) -> Option<Literal> {
    Some(match op {
        TokenKind::Plus => Literal::Int(a.wrapping_add(b)),
        TokenKind::Minus => Literal::Int(a.wrapping_sub(b)),
        TokenKind::Asterisk => Literal::Int(a.wrapping_mul(b)),
        // leave div/mod by zero unfolded — the VM raises the runtime diagnostic
        TokenKind::Slash if b != 0 => Literal::Int(a.wrapping_div(b)),
        TokenKind::Percent if b != 0 => Literal::Int(a.wrapping_rem(b)),
        TokenKind::Ampersand => Literal::Int(a & b),
        TokenKind::VBar => Literal::Int(a | b),
        TokenKind::Caret => Literal::Int(a ^ b),
        TokenKind::LessLess => Literal::Int(a.wrapping_shl(b as u32)),
        TokenKind::GreaterGreater => Literal::Int(a.wrapping_shr(b as u32)),
        TokenKind::EqualEqual => Literal::Bool(a == b),
        TokenKind::BangEqual => Literal::Bool(a != b),
        TokenKind::Less => Literal::Bool(a < b),
        TokenKind::LessEqual => Literal::Bool(a <= b),
        TokenKind::Greater => Literal::Bool(a > b),
        TokenKind::GreaterEqual => Literal::Bool(a >= b),
        _ => return None,
    })
}

fn fold_float(op: TokenKind, a: f64, b: f64) -> Option<Literal> {
    Some(match op {
        TokenKind::Plus => Literal::Float(a + b),
        TokenKind::Minus => Literal::Float(a - b),
        TokenKind::Asterisk => Literal::Float(a * b),
        TokenKind::Slash => Literal::Float(a / b),
        TokenKind::EqualEqual => Literal::Bool(a == b),
        TokenKind::BangEqual => Literal::Bool(a != b),
        TokenKind::Less => Literal::Bool(a < b),
        TokenKind::LessEqual => Literal::Bool(a <= b),
        TokenKind::Greater => Literal::Bool(a > b),
        TokenKind::GreaterEqual => Literal::Bool(a >= b),
        _ => return None,
    })
}

fn fold_bool(op: TokenKind, a: bool, b: bool) -> Option<Literal> {
    Some(match op {
        TokenKind::AmpersandAmpersand => Literal::Bool(a && b),
        TokenKind::VBarVBar => Literal::Bool(a || b),
        TokenKind::EqualEqual => Literal::Bool(a == b),
        TokenKind::BangEqual => Literal::Bool(a != b),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{Source, Token};

    fn lit(n: i64) -> Expr {
        Expr::new(ExprKind::Literal(Literal::Int(n)), Token::new(TokenKind::Number, n.to_string(), Source::default()))
    }

    #[test]
    fn folds_nested_arithmetic() {
        let mut expr = Expr::new(
            ExprKind::Infix {
                op: TokenKind::Plus,
                left: Box::new(lit(1)),
                right: Box::new(Expr::new(
                    ExprKind::Infix { op: TokenKind::Asterisk, left: Box::new(lit(2)), right: Box::new(lit(3)) },
                    Token::new(TokenKind::Asterisk, "*", Source::default()),
                )),
            },
            Token::new(TokenKind::Plus, "+", Source::default()),
        );
        fold_expr(&mut expr);
        assert_eq!(expr.kind, ExprKind::Literal(Literal::Int(7)));
    }

    #[test]
    fn leaves_division_by_zero_unfolded() {
        let mut expr = Expr::new(
            ExprKind::Infix { op: TokenKind::Slash, left: Box::new(lit(1)), right: Box::new(lit(0)) },
            Token::new(TokenKind::Slash, "/", Source::default()),
        );
        fold_expr(&mut expr);
        assert!(matches!(expr.kind, ExprKind::Infix { .. }));
    }

    #[test]
    fn folds_factorial_of_a_literal() {
        let mut expr = Expr::new(
            ExprKind::Factorial(Box::new(lit(5))),
            Token::new(TokenKind::Bang, "!", Source::default()),
        );
        fold_expr(&mut expr);
        assert_eq!(expr.kind, ExprKind::Literal(Literal::Int(120)));
    }

    #[test]
    fn leaves_factorial_of_a_negative_literal_unfolded() {
        let mut expr = Expr::new(
            ExprKind::Factorial(Box::new(lit(-1))),
            Token::new(TokenKind::Bang, "!", Source::default()),
        );
        fold_expr(&mut expr);
        assert!(matches!(expr.kind, ExprKind::Factorial(_)));
    }
}
