//! AST pass manager — `spec.md` §4.3.
//!
//! Grounded on `original_source/AstPass.h`'s fixed pipeline of passes run
//! in sequence over the whole tree before compilation. The original defines
//! an abstract pass base class with virtual dispatch; since this crate has
//! exactly three passes and no plugin mechanism, a plain ordered sequence of
//! free functions captures the same "each pass sees the previous pass's
//! output" contract without an unnecessary trait-object layer.

mod constant_fold;
mod syntax_check;
mod type_narrow;

use crate::ast::Stmt;
use crate::diagnostics::DiagnosticSink;

/// Runs every pass in prerequisite order: folding first (so later passes see
/// simplified literals), then structural syntax checks, then advisory type
/// narrowing last, since narrowing only makes sense once the tree is known
/// structurally sound.
pub fn run_passes(ast: &mut Stmt, sink: &mut impl DiagnosticSink) {
    constant_fold::run(ast);
    syntax_check::run(ast, sink);
    type_narrow::run(ast, sink);
}

#[cfg(test)]
mod tests {
    use super::run_passes;
    use crate::diagnostics::CollectingSink;
    use crate::lexer;
    use crate::parser;

    #[test]
    fn pipeline_runs_without_panicking_on_a_full_program() {
        let src = "fn main() { let x = 1 + 2; if (x > 0) { x++; } else { break; } return x; }";
        let mut sink = CollectingSink::new();
        let tokens = lexer::scan(src, &mut sink);
        let mut ast = parser::parse(tokens, &mut sink);
        run_passes(&mut ast, &mut sink);
        // the stray `break` outside a loop should be flagged by syntax_check
        assert!(sink.has_errors());
    }
}
