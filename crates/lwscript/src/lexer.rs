//! Lexer — `spec.md` §4.1.
//!
//! Scans a source buffer left to right into an ordered token stream ending
//! in [`TokenKind::End`], tracking `(line, column, byte_offset)` per
//! `spec.md` §3. Grounded on `original_source/Lexer.cpp` (the richer
//! `lwscript` dialect).

use crate::diagnostics::{Diagnostic, DiagnosticSink, Phase};
use crate::token::{Source, Token, TokenKind};

pub struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    start: usize,
    current: usize,
    line: usize,
    column: usize,
    start_line: usize,
    start_column: usize,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    #[must_use]
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            start: 0,
            current: 0,
            line: 1,
            column: 1,
            start_line: 1,
            start_column: 1,
            tokens: Vec::new(),
        }
    }

    /// Scans the whole source buffer, reporting lexical errors to `sink`
    /// but always terminating the returned stream with [`TokenKind::End`]
    /// so the parser can continue past the first bad token.
    pub fn scan(mut self, sink: &mut impl DiagnosticSink) -> Vec<Token> {
        while !self.is_at_end() {
            self.start = self.current;
            self.start_line = self.line;
            self.start_column = self.column;
            self.scan_token(sink);
        }
        self.add_token(TokenKind::End, String::new());
        self.tokens
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.bytes.len()
    }

    fn peek(&self) -> u8 {
        if self.is_at_end() { 0 } else { self.bytes[self.current] }
    }

    fn peek_next(&self) -> u8 {
        self.bytes.get(self.current + 1).copied().unwrap_or(0)
    }

    fn advance(&mut self) -> u8 {
        let c = self.bytes[self.current];
        self.current += 1;
        self.column += 1;
        c
    }

    fn matches(&mut self, expected: u8) -> bool {
        if self.is_at_end() || self.bytes[self.current] != expected {
            return false;
        }
        self.current += 1;
        self.column += 1;
        true
    }

    fn current_source(&self) -> Source {
        Source::new(self.start_line, self.start_column, self.start)
    }

    fn lexeme(&self) -> &'a str {
        &self.source[self.start..self.current]
    }

    fn add_token(&mut self, kind: TokenKind, lexeme: impl Into<String>) {
        let source = self.current_source();
        self.tokens.push(Token::new(kind, lexeme, source));
    }

    fn add_current(&mut self, kind: TokenKind) {
        let lexeme = self.lexeme().to_owned();
        self.add_token(kind, lexeme);
    }

    fn scan_token(&mut self, sink: &mut impl DiagnosticSink) {
        let c = self.advance();
        match c {
            b'(' => {
                if self.matches(b'{') {
                    self.add_current(TokenKind::LParenLBrace);
                } else {
                    self.add_current(TokenKind::LParen);
                }
            }
            b')' => self.add_current(TokenKind::RParen),
            b'[' => self.add_current(TokenKind::LBracket),
            b']' => self.add_current(TokenKind::RBracket),
            b'{' => self.add_current(TokenKind::LBrace),
            b'}' => {
                if self.matches(b')') {
                    self.add_current(TokenKind::RBraceRParen);
                } else {
                    self.add_current(TokenKind::RBrace);
                }
            }
            b'.' => {
                if self.matches(b'.') && self.matches(b'.') {
                    self.add_current(TokenKind::Ellipsis);
                } else {
                    self.add_current(TokenKind::Dot);
                }
            }
            b',' => self.add_current(TokenKind::Comma),
            b':' => self.add_current(TokenKind::Colon),
            b';' => self.add_current(TokenKind::Semicolon),
            b'?' => self.add_current(TokenKind::Question),
            b'~' => self.add_current(TokenKind::Tilde),
            b' ' | b'\t' | b'\r' => {}
            b'\n' => {
                self.line += 1;
                self.column = 1;
            }
            b'"' => self.scan_string(sink),
            b'\'' => self.scan_character(sink),
            b'+' => {
                if self.matches(b'+') {
                    self.add_current(TokenKind::PlusPlus);
                } else if self.matches(b'=') {
                    self.add_current(TokenKind::PlusEqual);
                } else {
                    self.add_current(TokenKind::Plus);
                }
            }
            b'-' => {
                if self.matches(b'-') {
                    self.add_current(TokenKind::MinusMinus);
                } else if self.matches(b'=') {
                    self.add_current(TokenKind::MinusEqual);
                } else {
                    self.add_current(TokenKind::Minus);
                }
            }
            b'*' => {
                if self.matches(b'=') {
                    self.add_current(TokenKind::AsteriskEqual);
                } else {
                    self.add_current(TokenKind::Asterisk);
                }
            }
            b'/' => self.scan_slash(sink),
            b'%' => {
                if self.matches(b'=') {
                    self.add_current(TokenKind::PercentEqual);
                } else {
                    self.add_current(TokenKind::Percent);
                }
            }
            b'!' => {
                if self.matches(b'=') {
                    self.add_current(TokenKind::BangEqual);
                } else {
                    self.add_current(TokenKind::Bang);
                }
            }
            b'&' => {
                if self.matches(b'&') {
                    self.add_current(TokenKind::AmpersandAmpersand);
                } else if self.matches(b'=') {
                    self.add_current(TokenKind::AmpersandEqual);
                } else {
                    self.add_current(TokenKind::Ampersand);
                }
            }
            b'|' => {
                if self.matches(b'|') {
                    self.add_current(TokenKind::VBarVBar);
                } else if self.matches(b'=') {
                    self.add_current(TokenKind::VBarEqual);
                } else {
                    self.add_current(TokenKind::VBar);
                }
            }
            b'^' => {
                if self.matches(b'=') {
                    self.add_current(TokenKind::CaretEqual);
                } else {
                    self.add_current(TokenKind::Caret);
                }
            }
            b'<' => {
                if self.matches(b'=') {
                    self.add_current(TokenKind::LessEqual);
                } else if self.matches(b'<') {
                    if self.matches(b'=') {
                        self.add_current(TokenKind::LessLessEqual);
                    } else {
                        self.add_current(TokenKind::LessLess);
                    }
                } else {
                    self.add_current(TokenKind::Less);
                }
            }
            b'>' => {
                if self.matches(b'=') {
                    self.add_current(TokenKind::GreaterEqual);
                } else if self.matches(b'>') {
                    if self.matches(b'=') {
                        self.add_current(TokenKind::GreaterGreaterEqual);
                    } else {
                        self.add_current(TokenKind::GreaterGreater);
                    }
                } else {
                    self.add_current(TokenKind::Greater);
                }
            }
            b'=' => {
                if self.matches(b'=') {
                    self.add_current(TokenKind::EqualEqual);
                } else {
                    self.add_current(TokenKind::Equal);
                }
            }
            _ if c.is_ascii_digit() => self.scan_number(sink),
            _ if c.is_ascii_alphabetic() || c == b'_' => self.scan_identifier(),
            _ if c >= 0x80 => self.scan_identifier(),
            _ => {
                let source = self.current_source();
                sink.report(Diagnostic::error(
                    Phase::Lexical,
                    format!("unknown literal '{}'", self.lexeme()),
                    source,
                ));
            }
        }
    }

    fn scan_slash(&mut self, sink: &mut impl DiagnosticSink) {
        if self.matches(b'/') {
            while self.peek() != b'\n' && !self.is_at_end() {
                self.advance();
            }
        } else if self.matches(b'*') {
            loop {
                if self.is_at_end() {
                    let source = self.current_source();
                    sink.report(Diagnostic::error(Phase::Lexical, "unterminated block comment", source));
                    break;
                }
                if self.peek() == b'*' && self.peek_next() == b'/' {
                    self.advance();
                    self.advance();
                    break;
                }
                if self.peek() == b'\n' {
                    self.line += 1;
                    self.column = 0;
                }
                self.advance();
            }
        } else if self.matches(b'=') {
            self.add_current(TokenKind::SlashEqual);
        } else {
            self.add_current(TokenKind::Slash);
        }
    }

    fn scan_string(&mut self, sink: &mut impl DiagnosticSink) {
        let content_start = self.current;
        while self.peek() != b'"' && !self.is_at_end() {
            if self.peek() == b'\n' {
                self.line += 1;
                self.column = 0;
            }
            self.advance();
        }
        let value = self.source[content_start..self.current].to_owned();
        if self.is_at_end() {
            let source = self.current_source();
            sink.report(Diagnostic::error(Phase::Lexical, "unterminated string literal", source));
            self.add_token(TokenKind::String, value);
            return;
        }
        self.advance(); // closing quote
        self.add_token(TokenKind::String, value);
    }

    fn scan_character(&mut self, sink: &mut impl DiagnosticSink) {
        if self.is_at_end() {
            let source = self.current_source();
            sink.report(Diagnostic::error(Phase::Lexical, "unterminated character literal", source));
            return;
        }
        let ch = self.advance();
        if !self.matches(b'\'') {
            let source = self.current_source();
            sink.report(Diagnostic::error(Phase::Lexical, "character literal must contain exactly one character", source));
        }
        self.add_token(TokenKind::Character, (ch as char).to_string());
    }

    fn scan_number(&mut self, sink: &mut impl DiagnosticSink) {
        while self.peek().is_ascii_digit() {
            self.advance();
        }
        let mut is_float = false;
        if self.peek() == b'.' {
            if self.peek_next().is_ascii_digit() {
                is_float = true;
                self.advance();
                while self.peek().is_ascii_digit() {
                    self.advance();
                }
            } else if self.peek_next() != b'f' {
                let source = self.current_source();
                sink.report(Diagnostic::error(
                    Phase::Lexical,
                    "malformed number: '.' must be followed by digits or 'f'",
                    source,
                ));
            }
        }
        if self.matches(b'f') {
            is_float = true;
        }
        let kind = if is_float { TokenKind::FloatNumber } else { TokenKind::Number };
        self.add_current(kind);
    }

    fn scan_identifier(&mut self) {
        while !self.is_at_end() {
            let c = self.peek();
            if c.is_ascii_alphanumeric() || c == b'_' || c >= 0x80 {
                self.advance();
            } else {
                break;
            }
        }
        let word = self.lexeme();
        if let Some(kind) = TokenKind::keyword_lookup(word) {
            self.add_current(kind);
        } else {
            self.add_current(TokenKind::Identifier);
        }
    }
}

/// Convenience entry point: `spec.md` §4.1's `scan(source) -> tokens`.
#[must_use]
pub fn scan(source: &str, sink: &mut impl DiagnosticSink) -> Vec<Token> {
    Lexer::new(source).scan(sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingSink;

    fn lex(source: &str) -> Vec<Token> {
        let mut sink = CollectingSink::new();
        let tokens = scan(source, &mut sink);
        assert!(!sink.has_errors(), "unexpected lex errors: {:?}", sink.diagnostics);
        tokens
    }

    #[test]
    fn scans_arithmetic_expression() {
        let tokens = lex("1 + 2 * 3");
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Number,
                TokenKind::Plus,
                TokenKind::Number,
                TokenKind::Asterisk,
                TokenKind::Number,
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn keywords_are_recognized() {
        let tokens = lex("let const fn class base this");
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Let,
                TokenKind::Const,
                TokenKind::Function,
                TokenKind::Class,
                TokenKind::Base,
                TokenKind::This,
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn compound_operators_scan_longest_match() {
        let tokens = lex("a <<= b >> c <= d ... e");
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Identifier,
                TokenKind::LessLessEqual,
                TokenKind::Identifier,
                TokenKind::GreaterGreater,
                TokenKind::Identifier,
                TokenKind::LessEqual,
                TokenKind::Identifier,
                TokenKind::Ellipsis,
                TokenKind::Identifier,
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn tokens_identify_real_substrings() {
        // spec.md §8 invariant 2: src[offset..offset+len(lexeme)] == lexeme
        let source = "let x_1 = 42;";
        let tokens = lex(source);
        for token in &tokens {
            if token.kind == TokenKind::End {
                continue;
            }
            let slice = &source[token.source.byte_offset..token.source.byte_offset + token.lexeme.len()];
            assert_eq!(slice, token.lexeme);
        }
    }

    #[test]
    fn unterminated_string_reports_error() {
        let mut sink = CollectingSink::new();
        scan("\"abc", &mut sink);
        assert!(sink.has_errors());
    }

    #[test]
    fn line_and_column_track_newlines() {
        let tokens = lex("a\nb");
        assert_eq!(tokens[0].source.line, 1);
        assert_eq!(tokens[1].source.line, 2);
        assert_eq!(tokens[1].source.column, 1);
    }

    #[test]
    fn float_suffix_and_fraction_both_yield_float() {
        let tokens = lex("1.5 2f 3");
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![TokenKind::FloatNumber, TokenKind::FloatNumber, TokenKind::Number, TokenKind::End]
        );
    }

    #[test]
    fn brace_paren_compound_tokens() {
        let tokens = lex("({ 1 })");
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![TokenKind::LParenLBrace, TokenKind::Number, TokenKind::RBraceRParen, TokenKind::End]
        );
    }
}
