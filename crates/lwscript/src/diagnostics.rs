//! Centralized diagnostic reporting.
//!
//! Every phase that can fail or warn — lexer, parser, passes, compiler, VM —
//! produces [`Diagnostic`]s instead of panicking or writing directly to
//! stderr. A [`DiagnosticSink`] collects them; callers choose whether that
//! sink is a `Vec` (tests, programmatic embedding) or something that prints
//! immediately (the CLI).

use std::fmt;

use crate::token::Source;

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// The phase that produced a diagnostic, used to group related kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Phase {
    Lexical,
    Syntax,
    Semantic,
    TypeNarrowing,
    Runtime,
}

/// One reported problem or advisory.
///
/// Carries the [`Source`] triple of the offending token so a caller can
/// underline the original source text; the `(line, column, byte_offset)`
/// triple is authoritative, per `spec.md` §3.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub phase: Phase,
    pub message: String,
    pub source: Source,
    /// Length, in bytes, of the source span to underline. `1` for a single
    /// character/token when the exact span isn't known.
    pub span_len: usize,
}

impl Diagnostic {
    #[must_use]
    pub fn error(phase: Phase, message: impl Into<String>, source: Source) -> Self {
        Self { severity: Severity::Error, phase, message: message.into(), source, span_len: 1 }
    }

    #[must_use]
    pub fn warning(phase: Phase, message: impl Into<String>, source: Source) -> Self {
        Self { severity: Severity::Warning, phase, message: message.into(), source, span_len: 1 }
    }

    #[must_use]
    pub fn info(phase: Phase, message: impl Into<String>, source: Source) -> Self {
        Self { severity: Severity::Info, phase, message: message.into(), source, span_len: 1 }
    }

    #[must_use]
    pub fn with_span_len(mut self, len: usize) -> Self {
        self.span_len = len.max(1);
        self
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Formats this diagnostic with a caret-pointed excerpt of `source_text`,
    /// per `spec.md` §7's "file path, line, column, and caret-pointed source
    /// excerpt" user-visible failure shape.
    #[must_use]
    pub fn render(&self, file_path: &str, source_text: &str) -> String {
        let line_text = source_text.lines().nth(self.source.line.saturating_sub(1)).unwrap_or_default();
        let caret_pad = " ".repeat(self.source.column.saturating_sub(1));
        let carets = "^".repeat(self.span_len.max(1));
        format!(
            "{severity}: {message}\n  --> {file}:{line}:{column}\n{line_no:>4} | {text}\n     | {pad}{carets}",
            severity = self.severity,
            message = self.message,
            file = file_path,
            line = self.source.line,
            column = self.source.column,
            line_no = self.source.line,
            text = line_text,
            pad = caret_pad,
            carets = carets,
        )
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} (line {}, column {})", self.severity, self.message, self.source.line, self.source.column)
    }
}

/// Receives diagnostics as phases produce them.
///
/// Mirrors the teacher's typed-error-plus-position pairing (`RunError` +
/// `CodeLoc` in the teacher's exception machinery) generalized into a push
/// sink so multiple non-fatal diagnostics can be collected per compile, as
/// `spec.md` §4.5 requires ("proceeds on non-fatal errors... to surface
/// multiple diagnostics").
pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic);

    /// True once a fatal diagnostic has been reported; phases consult this
    /// to decide whether to keep proceeding or abort.
    fn has_errors(&self) -> bool;
}

/// A sink that collects every diagnostic into a `Vec`, for tests and for
/// embedding this engine in a host that wants to format diagnostics itself.
#[derive(Debug, Default, Clone)]
pub struct CollectingSink {
    pub diagnostics: Vec<Diagnostic>,
}

impl CollectingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn errors(&self) -> Vec<&Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_fatal()).collect()
    }
}

impl DiagnosticSink for CollectingSink {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_fatal)
    }
}

/// A sink that writes each diagnostic to stderr as it arrives, underlining
/// the offending source region using the original source text — the shape
/// the CLI driver (`crates/lwscript-cli`) uses.
pub struct StderrSink<'a> {
    file_path: &'a str,
    source_text: &'a str,
    saw_error: bool,
}

impl<'a> StderrSink<'a> {
    #[must_use]
    pub fn new(file_path: &'a str, source_text: &'a str) -> Self {
        Self { file_path, source_text, saw_error: false }
    }
}

impl DiagnosticSink for StderrSink<'_> {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.saw_error |= diagnostic.is_fatal();
        eprintln!("{}", diagnostic.render(self.file_path, self.source_text));
    }

    fn has_errors(&self) -> bool {
        self.saw_error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Source;

    #[test]
    fn render_points_caret_at_column() {
        let source = Source::new(2, 5, 10);
        let diag = Diagnostic::error(Phase::Syntax, "expected ';'", source);
        let rendered = diag.render("test.lws", "let a = 1\nlet b = 2\n");
        assert!(rendered.contains("test.lws:2:5"));
        assert!(rendered.contains("let b = 2"));
    }

    #[test]
    fn collecting_sink_tracks_errors() {
        let mut sink = CollectingSink::new();
        assert!(!sink.has_errors());
        sink.report(Diagnostic::warning(Phase::TypeNarrowing, "narrowing", Source::new(1, 1, 0)));
        assert!(!sink.has_errors());
        sink.report(Diagnostic::error(Phase::Syntax, "bad", Source::new(1, 1, 0)));
        assert!(sink.has_errors());
        assert_eq!(sink.errors().len(), 1);
    }
}
