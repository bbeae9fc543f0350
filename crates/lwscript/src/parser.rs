//! Pratt / precedence-climbing parser — `spec.md` §4.2.
//!
//! Grounded on `original_source/Parser.cpp`'s recursive-descent-plus-
//! precedence-table structure: a `parse_expr(min_precedence)` loop with a
//! prefix-rule dispatch and an infix-rule table keyed by [`TokenKind`],
//! restyled as idiomatic Rust (no virtual dispatch table, a `match` instead).
//! Parse errors are reported through a [`DiagnosticSink`] and the parser
//! performs statement-boundary recovery (skip to the next `;` or block
//! delimiter) so a single syntax error doesn't abort the whole parse,
//! matching `spec.md` §4.2's "recovers at statement boundaries" note.

use crate::ast::{
    Binding, ClassDef, EnumDef, Expr, ExprKind, FunctionDef, Literal, ModuleDef, Param, Pattern, ReturnValue, Stmt,
    StmtKind, TypeAnnotation, Varargs,
};
use crate::diagnostics::{Diagnostic, DiagnosticSink, Phase};
use crate::token::{Source, Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment,
    Ternary,
    Or,
    And,
    BitOr,
    BitXor,
    BitAnd,
    Equality,
    Comparison,
    Shift,
    Term,
    Factor,
    Unary,
    Postfix,
    Call,
}

impl Precedence {
    fn next(self) -> Self {
        use Precedence::{
            And, Assignment, BitAnd, BitOr, BitXor, Call, Comparison, Equality, Factor, None, Or, Postfix, Shift,
            Term, Ternary, Unary,
        };
        match self {
            None => Assignment,
            Assignment => Ternary,
            Ternary => Or,
            Or => And,
            And => BitOr,
            BitOr => BitXor,
            BitXor => BitAnd,
            BitAnd => Equality,
            Equality => Comparison,
            Comparison => Shift,
            Shift => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Postfix,
            Postfix | Call => Call,
        }
    }
}

fn infix_precedence(kind: TokenKind) -> Option<Precedence> {
    use TokenKind::{
        AmpersandAmpersand, AmpersandEqual, Asterisk, AsteriskEqual, Bang, BangEqual, Caret, CaretEqual, Equal,
        EqualEqual, Greater, GreaterEqual, GreaterGreater, GreaterGreaterEqual, LBrace, LBracket, LParen, Less,
        LessEqual, LessLess, LessLessEqual, Minus, MinusEqual, MinusMinus, Percent, PercentEqual, Plus, PlusEqual,
        PlusPlus, Question, Slash, SlashEqual, VBar, VBarEqual, VBarVBar,
    };
    Some(match kind {
        Equal | PlusEqual | MinusEqual | AsteriskEqual | SlashEqual | PercentEqual | AmpersandEqual | VBarEqual
        | CaretEqual | LessLessEqual | GreaterGreaterEqual => Precedence::Assignment,
        Question => Precedence::Ternary,
        VBarVBar => Precedence::Or,
        AmpersandAmpersand => Precedence::And,
        VBar => Precedence::BitOr,
        Caret => Precedence::BitXor,
        TokenKind::Ampersand => Precedence::BitAnd,
        EqualEqual | BangEqual => Precedence::Equality,
        Less | LessEqual | Greater | GreaterEqual => Precedence::Comparison,
        LessLess | GreaterGreater => Precedence::Shift,
        Plus | Minus => Precedence::Term,
        Asterisk | Slash | Percent => Precedence::Factor,
        PlusPlus | MinusMinus | Bang => Precedence::Postfix,
        LParen | LBracket | TokenKind::Dot | LBrace => Precedence::Call,
        _ => return None,
    })
}

fn is_assignment_op(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Equal
            | TokenKind::PlusEqual
            | TokenKind::MinusEqual
            | TokenKind::AsteriskEqual
            | TokenKind::SlashEqual
            | TokenKind::PercentEqual
            | TokenKind::AmpersandEqual
            | TokenKind::VBarEqual
            | TokenKind::CaretEqual
            | TokenKind::LessLessEqual
            | TokenKind::GreaterGreaterEqual
    )
}

/// Parses a full token stream into a root [`Stmt::AstStmts`].
pub fn parse(tokens: Vec<Token>, sink: &mut impl DiagnosticSink) -> Stmt {
    let mut parser = Parser::new(tokens);
    let stmts = parser.parse_program(sink);
    let token = stmts.first().map_or_else(Token::eof, |s| s.token.clone());
    Stmt::new(StmtKind::AstStmts(stmts), token)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Token {
    fn eof() -> Self {
        Token::new(TokenKind::End, "", Source::default())
    }
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.pos.saturating_sub(1).min(self.tokens.len() - 1)]
    }

    fn is_at_end(&self) -> bool {
        self.peek_kind() == TokenKind::End
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if !self.is_at_end() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn match_(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, msg: &str, sink: &mut impl DiagnosticSink) -> Token {
        if self.check(kind) {
            self.advance()
        } else {
            let tok = self.peek().clone();
            sink.report(Diagnostic::error(Phase::Syntax, format!("{msg}, found {tok}"), tok.source));
            tok
        }
    }

    fn synchronize(&mut self) {
        self.advance();
        while !self.is_at_end() {
            if self.previous().kind == TokenKind::Semicolon {
                return;
            }
            match self.peek_kind() {
                TokenKind::Let
                | TokenKind::Const
                | TokenKind::Function
                | TokenKind::Class
                | TokenKind::If
                | TokenKind::While
                | TokenKind::For
                | TokenKind::Switch
                | TokenKind::Return
                | TokenKind::Enum
                | TokenKind::Module => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    fn parse_program(&mut self, sink: &mut impl DiagnosticSink) -> Vec<Stmt> {
        let mut stmts = Vec::new();
        while !self.is_at_end() {
            match self.declaration(sink) {
                Some(stmt) => stmts.push(stmt),
                None => self.synchronize(),
            }
        }
        stmts
    }

    fn declaration(&mut self, sink: &mut impl DiagnosticSink) -> Option<Stmt> {
        match self.peek_kind() {
            TokenKind::Let | TokenKind::Const => Some(self.var_decl(sink)),
            TokenKind::Function => Some(self.function_decl(sink)),
            TokenKind::Class => Some(self.class_decl(sink)),
            TokenKind::Enum => Some(self.enum_decl(sink)),
            TokenKind::Module => Some(self.module_decl(sink)),
            _ => Some(self.statement(sink)),
        }
    }

    // ---- declarations ----

    fn var_decl(&mut self, sink: &mut impl DiagnosticSink) -> Stmt {
        let tok = self.advance();
        let mutable = tok.kind == TokenKind::Let;
        let mut bindings = Vec::new();
        loop {
            let pattern = self.pattern(sink);
            let initializer =
                if self.match_(TokenKind::Equal) { Some(self.expression(sink, Precedence::Ternary)) } else { None };
            bindings.push(Binding { pattern, initializer });
            if !self.match_(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::Semicolon, "expected ';' after variable declaration", sink);
        Stmt::new(StmtKind::Var { mutable, bindings }, tok)
    }

    fn pattern(&mut self, sink: &mut impl DiagnosticSink) -> Pattern {
        if self.match_(TokenKind::LBracket) {
            let mut elements = Vec::new();
            let mut varargs = None;
            while !self.check(TokenKind::RBracket) && !self.is_at_end() {
                if self.match_(TokenKind::Ellipsis) {
                    varargs = Some(Box::new(self.pattern(sink)));
                    break;
                }
                elements.push(self.pattern(sink));
                if !self.match_(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::RBracket, "expected ']' to close destructuring pattern", sink);
            return Pattern::Array { elements, varargs };
        }
        let name_tok = self.expect(TokenKind::Identifier, "expected a binding name", sink);
        let type_annotation = self.optional_type_annotation(sink);
        Pattern::Name { name: name_tok.lexeme.clone(), type_annotation, token: name_tok }
    }

    fn optional_type_annotation(&mut self, _sink: &mut impl DiagnosticSink) -> Option<TypeAnnotation> {
        if self.match_(TokenKind::Colon) {
            let tok = self.advance();
            Some(TypeAnnotation { name: type_name(&tok), token: tok })
        } else {
            None
        }
    }

    fn function_decl(&mut self, sink: &mut impl DiagnosticSink) -> Stmt {
        let tok = self.advance();
        let name_tok = self.expect(TokenKind::Identifier, "expected a function name", sink);
        let def = self.function_tail(Some(name_tok.lexeme.clone()), tok.clone(), sink);
        Stmt::new(StmtKind::Function(def), tok)
    }

    fn function_tail(&mut self, name: Option<String>, tok: Token, sink: &mut impl DiagnosticSink) -> FunctionDef {
        self.expect(TokenKind::LParen, "expected '(' to start parameter list", sink);
        let (params, varargs) = self.parameter_list(sink);
        self.expect(TokenKind::RParen, "expected ')' to close parameter list", sink);
        self.optional_type_annotation(sink);
        self.expect(TokenKind::LBrace, "expected '{' to start function body", sink);
        let body = self.block(sink);
        FunctionDef { name, params, varargs, body, token: tok }
    }

    fn parameter_list(&mut self, sink: &mut impl DiagnosticSink) -> (Vec<Param>, Varargs) {
        let mut params = Vec::new();
        let mut varargs = Varargs::None;
        while !self.check(TokenKind::RParen) && !self.is_at_end() {
            if self.match_(TokenKind::Ellipsis) {
                if self.check(TokenKind::Identifier) {
                    let name_tok = self.advance();
                    let type_annotation = self.optional_type_annotation(sink);
                    varargs =
                        Varargs::Named(Param { name: name_tok.lexeme.clone(), type_annotation, token: name_tok });
                } else {
                    varargs = Varargs::Unnamed;
                }
                break;
            }
            let name_tok = self.expect(TokenKind::Identifier, "expected a parameter name", sink);
            let type_annotation = self.optional_type_annotation(sink);
            params.push(Param { name: name_tok.lexeme.clone(), type_annotation, token: name_tok });
            if !self.match_(TokenKind::Comma) {
                break;
            }
        }
        (params, varargs)
    }

    fn class_decl(&mut self, sink: &mut impl DiagnosticSink) -> Stmt {
        let tok = self.advance();
        let name_tok = self.expect(TokenKind::Identifier, "expected a class name", sink);
        let mut parents = Vec::new();
        if self.match_(TokenKind::Colon) {
            loop {
                let parent_tok = self.expect(TokenKind::Identifier, "expected a base class name", sink);
                parents.push((parent_tok.lexeme.clone(), parent_tok));
                if !self.match_(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::LBrace, "expected '{' to start class body", sink);
        let mut fields = Vec::new();
        let mut methods = Vec::new();
        let mut nested_enums = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_at_end() {
            match self.peek_kind() {
                TokenKind::Let | TokenKind::Const => {
                    if let StmtKind::Var { bindings, .. } = self.var_decl(sink).kind {
                        fields.extend(bindings);
                    }
                }
                TokenKind::Enum => {
                    if let StmtKind::Enum(def) = self.enum_decl(sink).kind {
                        nested_enums.push(def);
                    }
                }
                TokenKind::Function => {
                    let fn_tok = self.advance();
                    let name_tok = self.expect(TokenKind::Identifier, "expected a method name", sink);
                    methods.push(self.function_tail(Some(name_tok.lexeme.clone()), fn_tok, sink));
                }
                TokenKind::Identifier if self.peek().lexeme == name_tok.lexeme => {
                    let ctor_tok = self.advance();
                    methods.push(self.function_tail(Some(ctor_tok.lexeme.clone()), ctor_tok.clone(), sink));
                }
                _ => {
                    let tok = self.peek().clone();
                    sink.report(Diagnostic::error(Phase::Syntax, format!("unexpected {tok} in class body"), tok.source));
                    self.advance();
                }
            }
        }
        self.expect(TokenKind::RBrace, "expected '}' to close class body", sink);
        Stmt::new(
            StmtKind::Class(ClassDef { name: name_tok.lexeme.clone(), parents, fields, methods, nested_enums, token: tok.clone() }),
            tok,
        )
    }

    fn enum_decl(&mut self, sink: &mut impl DiagnosticSink) -> Stmt {
        let tok = self.advance();
        let name_tok = self.expect(TokenKind::Identifier, "expected an enum name", sink);
        self.expect(TokenKind::LBrace, "expected '{' to start enum body", sink);
        let mut constants = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_at_end() {
            let const_tok = self.expect(TokenKind::Identifier, "expected an enum constant name", sink);
            let value = if self.match_(TokenKind::Equal) { Some(self.expression(sink, Precedence::Ternary)) } else { None };
            constants.push((const_tok.lexeme.clone(), value));
            if !self.match_(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrace, "expected '}' to close enum body", sink);
        Stmt::new(StmtKind::Enum(EnumDef { name: name_tok.lexeme.clone(), constants, token: tok.clone() }), tok)
    }

    fn module_decl(&mut self, sink: &mut impl DiagnosticSink) -> Stmt {
        let tok = self.advance();
        let name_tok = self.expect(TokenKind::Identifier, "expected a module name", sink);
        self.expect(TokenKind::LBrace, "expected '{' to start module body", sink);
        let body = self.block(sink);
        Stmt::new(StmtKind::Module(ModuleDef { name: name_tok.lexeme.clone(), body, token: tok.clone() }), tok)
    }

    // ---- statements ----

    fn statement(&mut self, sink: &mut impl DiagnosticSink) -> Stmt {
        match self.peek_kind() {
            TokenKind::LBrace => {
                let tok = self.advance();
                let stmts = self.block(sink);
                Stmt::new(StmtKind::Scope(stmts), tok)
            }
            TokenKind::If => self.if_statement(sink),
            TokenKind::While => self.while_statement(sink),
            TokenKind::For => self.for_statement(sink),
            TokenKind::Switch => self.switch_statement(sink),
            TokenKind::Return => self.return_statement(sink),
            TokenKind::Break => {
                let tok = self.advance();
                self.expect(TokenKind::Semicolon, "expected ';' after 'break'", sink);
                Stmt::new(StmtKind::Break, tok)
            }
            TokenKind::Continue => {
                let tok = self.advance();
                self.expect(TokenKind::Semicolon, "expected ';' after 'continue'", sink);
                Stmt::new(StmtKind::Continue, tok)
            }
            _ => self.expr_statement(sink),
        }
    }

    fn block(&mut self, sink: &mut impl DiagnosticSink) -> Vec<Stmt> {
        let mut stmts = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_at_end() {
            if let Some(stmt) = self.declaration(sink) {
                stmts.push(stmt);
            } else {
                self.synchronize();
            }
        }
        self.expect(TokenKind::RBrace, "expected '}' to close block", sink);
        stmts
    }

    fn if_statement(&mut self, sink: &mut impl DiagnosticSink) -> Stmt {
        let tok = self.advance();
        self.expect(TokenKind::LParen, "expected '(' after 'if'", sink);
        let cond = self.expression(sink, Precedence::Assignment);
        self.expect(TokenKind::RParen, "expected ')' after condition", sink);
        let then_branch = Box::new(self.statement(sink));
        let else_branch = if self.match_(TokenKind::Else) { Some(Box::new(self.statement(sink))) } else { None };
        Stmt::new(StmtKind::If { cond, then_branch, else_branch }, tok)
    }

    fn while_statement(&mut self, sink: &mut impl DiagnosticSink) -> Stmt {
        let tok = self.advance();
        self.expect(TokenKind::LParen, "expected '(' after 'while'", sink);
        let cond = self.expression(sink, Precedence::Assignment);
        self.expect(TokenKind::RParen, "expected ')' after condition", sink);
        let body = Box::new(self.statement(sink));
        Stmt::new(StmtKind::While { cond, body, increment: None }, tok)
    }

    /// Desugars `for (init; cond; incr) body` into `{ init while (cond) { body incr } }`.
    fn for_statement(&mut self, sink: &mut impl DiagnosticSink) -> Stmt {
        let tok = self.advance();
        self.expect(TokenKind::LParen, "expected '(' after 'for'", sink);
        let init = if self.check(TokenKind::Semicolon) {
            self.advance();
            None
        } else if matches!(self.peek_kind(), TokenKind::Let | TokenKind::Const) {
            Some(self.var_decl(sink))
        } else {
            Some(self.expr_statement(sink))
        };
        let cond = if self.check(TokenKind::Semicolon) {
            Expr::new(ExprKind::Literal(Literal::Bool(true)), tok.clone())
        } else {
            self.expression(sink, Precedence::Assignment)
        };
        self.expect(TokenKind::Semicolon, "expected ';' after loop condition", sink);
        let increment = if self.check(TokenKind::RParen) { None } else { Some(self.expression(sink, Precedence::Assignment)) };
        self.expect(TokenKind::RParen, "expected ')' after 'for' clauses", sink);
        let body = Box::new(self.statement(sink));
        let increment_stmt = increment.map(|e| Box::new(Stmt::new(StmtKind::Expr(e.clone()), e.token)));
        let while_stmt = Stmt::new(StmtKind::While { cond, body, increment: increment_stmt }, tok.clone());
        match init {
            Some(init_stmt) => Stmt::new(StmtKind::Scope(vec![init_stmt, while_stmt]), tok),
            None => while_stmt,
        }
    }

    /// Desugars `switch (subject) { c1, c2: body; default: body; }` into a
    /// chain of `if (subject == c1 || subject == c2) body else ...` ending in
    /// `default`'s body (or nothing), per `original_source/Parser.cpp`'s
    /// `ParseSwitchStmt`. The subject is restricted to a bare identifier, the
    /// same restriction the original parser makes, since the desugared form
    /// re-evaluates it once per case.
    fn switch_statement(&mut self, sink: &mut impl DiagnosticSink) -> Stmt {
        let tok = self.advance();
        self.expect(TokenKind::LParen, "expected '(' after 'switch'", sink);
        let subject_tok = self.expect(TokenKind::Identifier, "expected an identifier as switch's subject", sink);
        self.expect(TokenKind::RParen, "expected ')' after switch's expression", sink);
        self.expect(TokenKind::LBrace, "expected '{' after 'switch' keyword", sink);

        let mut arms: Vec<(Vec<Expr>, Stmt)> = Vec::new();
        let mut default_arm: Option<Stmt> = None;
        while !self.check(TokenKind::RBrace) && !self.is_at_end() {
            if self.match_(TokenKind::Default) {
                self.expect(TokenKind::Colon, "expected ':' after 'default'", sink);
                default_arm = Some(self.case_body(sink));
            } else {
                let mut conditions = vec![self.expression(sink, Precedence::Ternary)];
                while self.match_(TokenKind::Comma) {
                    conditions.push(self.expression(sink, Precedence::Ternary));
                }
                self.expect(TokenKind::Colon, "expected ':' after case value", sink);
                arms.push((conditions, self.case_body(sink)));
            }
        }
        self.expect(TokenKind::RBrace, "expected '}' after switch statement", sink);

        if arms.is_empty() {
            return default_arm.unwrap_or_else(|| Stmt::new(StmtKind::Scope(Vec::new()), tok));
        }

        let mut chain = default_arm;
        for (conditions, body) in arms.into_iter().rev() {
            let condition = case_condition(&subject_tok, conditions);
            chain = Some(Stmt::new(
                StmtKind::If { cond: condition, then_branch: Box::new(body), else_branch: chain.map(Box::new) },
                tok.clone(),
            ));
        }
        chain.expect("at least one case arm produces an if statement")
    }

    /// A `switch`/`match` case body: a brace-delimited list of statements, or
    /// a single bare statement, matching `original_source`'s `ParseScopeStmt`
    /// vs. single-`ParseStmt` split for a case arm.
    fn case_body(&mut self, sink: &mut impl DiagnosticSink) -> Stmt {
        let tok = self.peek().clone();
        if self.match_(TokenKind::LBrace) {
            let stmts = self.block(sink);
            Stmt::new(StmtKind::Scope(stmts), tok)
        } else {
            self.declaration(sink).unwrap_or_else(|| Stmt::new(StmtKind::Scope(Vec::new()), tok))
        }
    }

    fn return_statement(&mut self, sink: &mut impl DiagnosticSink) -> Stmt {
        let tok = self.advance();
        let value = if self.check(TokenKind::Semicolon) {
            None
        } else {
            let first = self.expression(sink, Precedence::Ternary);
            if self.match_(TokenKind::Comma) {
                let mut rest = vec![first];
                loop {
                    rest.push(self.expression(sink, Precedence::Ternary));
                    if !self.match_(TokenKind::Comma) {
                        break;
                    }
                }
                Some(ReturnValue::Aggregate(rest))
            } else {
                Some(ReturnValue::Single(first))
            }
        };
        self.expect(TokenKind::Semicolon, "expected ';' after return value", sink);
        Stmt::new(StmtKind::Return(value), tok)
    }

    fn expr_statement(&mut self, sink: &mut impl DiagnosticSink) -> Stmt {
        let expr = self.expression(sink, Precedence::Assignment);
        let tok = expr.token.clone();
        self.expect(TokenKind::Semicolon, "expected ';' after expression", sink);
        Stmt::new(StmtKind::Expr(expr), tok)
    }

    // ---- expressions ----

    fn expression(&mut self, sink: &mut impl DiagnosticSink, min_prec: Precedence) -> Expr {
        let mut left = self.prefix(sink);
        loop {
            let kind = self.peek_kind();
            let Some(prec) = infix_precedence(kind) else { break };
            if prec < min_prec {
                break;
            }
            left = self.infix(left, sink, prec);
        }
        left
    }

    fn prefix(&mut self, sink: &mut impl DiagnosticSink) -> Expr {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Number => {
                self.advance();
                Expr::new(ExprKind::Literal(Literal::Int(tok.lexeme.parse().unwrap_or(0))), tok)
            }
            TokenKind::FloatNumber => {
                self.advance();
                Expr::new(ExprKind::Literal(Literal::Float(tok.lexeme.parse().unwrap_or(0.0))), tok)
            }
            TokenKind::String => {
                self.advance();
                Expr::new(ExprKind::Literal(Literal::Str(tok.lexeme.clone())), tok)
            }
            TokenKind::Character => {
                self.advance();
                let ch = tok.lexeme.chars().next().unwrap_or('\0');
                Expr::new(ExprKind::Literal(Literal::Char(ch)), tok)
            }
            TokenKind::True => {
                self.advance();
                Expr::new(ExprKind::Literal(Literal::Bool(true)), tok)
            }
            TokenKind::False => {
                self.advance();
                Expr::new(ExprKind::Literal(Literal::Bool(false)), tok)
            }
            TokenKind::Nil => {
                self.advance();
                Expr::new(ExprKind::Literal(Literal::Null), tok)
            }
            TokenKind::Identifier => {
                self.advance();
                Expr::new(ExprKind::Identifier(tok.lexeme.clone()), tok)
            }
            TokenKind::This => {
                self.advance();
                Expr::new(ExprKind::This, tok)
            }
            TokenKind::Base => {
                self.advance();
                Expr::new(ExprKind::Base, tok)
            }
            TokenKind::Ellipsis => {
                self.advance();
                Expr::new(ExprKind::Varargs, tok)
            }
            TokenKind::LParen => self.grouping_or_compound(sink, tok),
            TokenKind::LBracket => self.array_literal(sink, tok),
            TokenKind::LBrace => self.dict_literal(sink, tok),
            TokenKind::Struct => self.struct_literal(sink, tok),
            TokenKind::Function => {
                self.advance();
                let def = self.function_tail(None, tok.clone(), sink);
                Expr::new(ExprKind::Lambda(Box::new(def)), tok)
            }
            TokenKind::New => {
                self.advance();
                let call = self.expression(sink, Precedence::Call);
                Expr::new(ExprKind::New(Box::new(call)), tok)
            }
            TokenKind::Minus | TokenKind::Bang | TokenKind::Tilde | TokenKind::PlusPlus | TokenKind::MinusMinus => {
                self.advance();
                let operand = self.expression(sink, Precedence::Unary);
                Expr::new(ExprKind::Prefix { op: tok.kind, operand: Box::new(operand) }, tok)
            }
            TokenKind::Ampersand => {
                self.advance();
                let operand = self.expression(sink, Precedence::Unary);
                Expr::new(ExprKind::Reference(Box::new(operand)), tok)
            }
            TokenKind::Match => self.match_expr(sink, tok),
            _ => {
                sink.report(Diagnostic::error(Phase::Syntax, format!("unexpected token {tok} in expression"), tok.source));
                self.advance();
                Expr::new(ExprKind::Literal(Literal::Null), tok)
            }
        }
    }

    fn grouping_or_compound(&mut self, sink: &mut impl DiagnosticSink, tok: Token) -> Expr {
        self.advance();
        if self.match_(TokenKind::LBrace) {
            let mut stmts = Vec::new();
            loop {
                if self.is_at_end() {
                    break;
                }
                let save = self.pos;
                let candidate = self.expression(sink, Precedence::Assignment);
                if self.check(TokenKind::RBrace) {
                    self.advance();
                    self.expect(TokenKind::RParen, "expected ')' to close compound expression", sink);
                    return Expr::new(ExprKind::CompoundExpr { stmts, trailing: Box::new(candidate) }, tok);
                }
                self.pos = save;
                if let Some(stmt) = self.declaration(sink) {
                    stmts.push(stmt);
                } else {
                    self.synchronize();
                }
            }
            self.expect(TokenKind::RBrace, "expected '}' to close compound expression", sink);
            self.expect(TokenKind::RParen, "expected ')' to close compound expression", sink);
            let trailing = Box::new(Expr::new(ExprKind::Literal(Literal::Null), tok.clone()));
            Expr::new(ExprKind::CompoundExpr { stmts, trailing }, tok)
        } else {
            let inner = self.expression(sink, Precedence::Assignment);
            self.expect(TokenKind::RParen, "expected ')' to close grouping", sink);
            Expr::new(ExprKind::Grouping(Box::new(inner)), tok)
        }
    }

    fn array_literal(&mut self, sink: &mut impl DiagnosticSink, tok: Token) -> Expr {
        self.advance();
        let mut elements = Vec::new();
        while !self.check(TokenKind::RBracket) && !self.is_at_end() {
            elements.push(self.expression(sink, Precedence::Ternary));
            if !self.match_(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBracket, "expected ']' to close array literal", sink);
        Expr::new(ExprKind::Array(elements), tok)
    }

    fn dict_literal(&mut self, sink: &mut impl DiagnosticSink, tok: Token) -> Expr {
        self.advance();
        let mut entries = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_at_end() {
            let key = self.expression(sink, Precedence::Ternary);
            self.expect(TokenKind::Colon, "expected ':' after dict key", sink);
            let value = self.expression(sink, Precedence::Ternary);
            entries.push((key, value));
            if !self.match_(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrace, "expected '}' to close dict literal", sink);
        Expr::new(ExprKind::Dict(entries), tok)
    }

    fn struct_literal(&mut self, sink: &mut impl DiagnosticSink, tok: Token) -> Expr {
        self.advance();
        self.expect(TokenKind::LBrace, "expected '{' to start struct literal", sink);
        let mut fields = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_at_end() {
            let name_tok = self.expect(TokenKind::Identifier, "expected a struct field name", sink);
            self.expect(TokenKind::Colon, "expected ':' after struct field name", sink);
            let value = self.expression(sink, Precedence::Ternary);
            fields.push((name_tok.lexeme.clone(), value));
            if !self.match_(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrace, "expected '}' to close struct literal", sink);
        Expr::new(ExprKind::Struct(fields), tok)
    }

    fn infix(&mut self, left: Expr, sink: &mut impl DiagnosticSink, prec: Precedence) -> Expr {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::LParen => self.call(left, sink, tok),
            TokenKind::LBracket => self.index(left, sink, tok),
            TokenKind::Dot => self.dot(left, sink, tok),
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                self.advance();
                Expr::new(ExprKind::Postfix { op: tok.kind, operand: Box::new(left) }, tok)
            }
            TokenKind::Bang => {
                self.advance();
                Expr::new(ExprKind::Factorial(Box::new(left)), tok)
            }
            TokenKind::Question => self.ternary(left, sink, tok),
            kind if is_assignment_op(kind) => {
                self.advance();
                // right-associative: same precedence level on the RHS
                let right = self.expression(sink, Precedence::Assignment);
                Expr::new(ExprKind::Infix { op: kind, left: Box::new(left), right: Box::new(right) }, tok)
            }
            kind => {
                self.advance();
                let right = self.expression(sink, prec.next());
                Expr::new(ExprKind::Infix { op: kind, left: Box::new(left), right: Box::new(right) }, tok)
            }
        }
    }

    fn call(&mut self, callee: Expr, sink: &mut impl DiagnosticSink, tok: Token) -> Expr {
        self.advance();
        let mut args = Vec::new();
        while !self.check(TokenKind::RParen) && !self.is_at_end() {
            args.push(self.expression(sink, Precedence::Ternary));
            if !self.match_(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen, "expected ')' to close call arguments", sink);
        Expr::new(ExprKind::Call { callee: Box::new(callee), args }, tok)
    }

    fn index(&mut self, object: Expr, sink: &mut impl DiagnosticSink, tok: Token) -> Expr {
        self.advance();
        let index = self.expression(sink, Precedence::Assignment);
        self.expect(TokenKind::RBracket, "expected ']' to close index expression", sink);
        Expr::new(ExprKind::Index { object: Box::new(object), index: Box::new(index) }, tok)
    }

    fn dot(&mut self, object: Expr, sink: &mut impl DiagnosticSink, tok: Token) -> Expr {
        self.advance();
        let name_tok = self.expect(TokenKind::Identifier, "expected a property name after '.'", sink);
        Expr::new(ExprKind::Dot { object: Box::new(object), name: name_tok.lexeme.clone() }, tok)
    }

    /// Desugars `match (subject) { c1, c2: value; default: value; }` into
    /// nested ternaries, per `original_source/Parser.cpp`'s `ParseMatchExpr`:
    /// `subject == c1 || subject == c2 ? value : (...)`, falling back to
    /// `null` if there is no `default` arm. Same bare-identifier restriction
    /// on the subject as `switch`.
    fn match_expr(&mut self, sink: &mut impl DiagnosticSink, tok: Token) -> Expr {
        self.advance();
        self.expect(TokenKind::LParen, "expected '(' after 'match'", sink);
        let subject_tok = self.expect(TokenKind::Identifier, "expected an identifier as match's subject", sink);
        self.expect(TokenKind::RParen, "expected ')' after match's expression", sink);
        self.expect(TokenKind::LBrace, "expected '{' after 'match' keyword", sink);

        let mut arms: Vec<(Vec<Expr>, Expr)> = Vec::new();
        let mut default_arm: Option<Expr> = None;
        if !self.check(TokenKind::RBrace) {
            loop {
                if self.match_(TokenKind::Default) {
                    self.expect(TokenKind::Colon, "expected ':' after default's condition expr", sink);
                    if default_arm.is_some() {
                        let here = self.peek().clone();
                        sink.report(Diagnostic::error(
                            Phase::Syntax,
                            "a match expression can only have one default branch",
                            here.source,
                        ));
                    }
                    default_arm = Some(self.expression(sink, Precedence::Ternary));
                } else {
                    let mut conditions = vec![self.expression(sink, Precedence::Ternary)];
                    while self.match_(TokenKind::Comma) {
                        conditions.push(self.expression(sink, Precedence::Ternary));
                    }
                    self.expect(TokenKind::Colon, "expected ':' after match item's condition expr", sink);
                    arms.push((conditions, self.expression(sink, Precedence::Ternary)));
                }
                if !self.match_(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RBrace, "expected '}' after match expr", sink);

        let mut result = default_arm.unwrap_or_else(|| Expr::new(ExprKind::Literal(Literal::Null), tok.clone()));
        for (conditions, value) in arms.into_iter().rev() {
            let condition = case_condition(&subject_tok, conditions);
            result = Expr::new(
                ExprKind::Ternary { cond: Box::new(condition), then_branch: Box::new(value), else_branch: Box::new(result) },
                tok.clone(),
            );
        }
        result
    }

    fn ternary(&mut self, cond: Expr, sink: &mut impl DiagnosticSink, tok: Token) -> Expr {
        self.advance();
        let then_branch = self.expression(sink, Precedence::Ternary);
        self.expect(TokenKind::Colon, "expected ':' in ternary expression", sink);
        let else_branch = self.expression(sink, Precedence::Assignment);
        Expr::new(
            ExprKind::Ternary { cond: Box::new(cond), then_branch: Box::new(then_branch), else_branch: Box::new(else_branch) },
            tok,
        )
    }
}

/// Builds `subject == v1 || subject == v2 || ...` for a `switch`/`match` case
/// arm, cloning a fresh `Identifier` reference to the subject for each
/// comparison (the subject is restricted to a plain identifier, so re-reading
/// it has no side effect to duplicate).
fn case_condition(subject_tok: &Token, values: Vec<Expr>) -> Expr {
    let mut values = values.into_iter();
    let first = values.next().expect("a case always has at least one value");
    let subject = || Expr::new(ExprKind::Identifier(subject_tok.lexeme.clone()), subject_tok.clone());
    let mut condition = Expr::new(
        ExprKind::Infix { op: TokenKind::EqualEqual, left: Box::new(subject()), right: Box::new(first) },
        subject_tok.clone(),
    );
    for value in values {
        let eq = Expr::new(
            ExprKind::Infix { op: TokenKind::EqualEqual, left: Box::new(subject()), right: Box::new(value) },
            subject_tok.clone(),
        );
        condition = Expr::new(
            ExprKind::Infix { op: TokenKind::VBarVBar, left: Box::new(condition), right: Box::new(eq) },
            subject_tok.clone(),
        );
    }
    condition
}

fn type_name(tok: &Token) -> String {
    if tok.kind == TokenKind::Identifier {
        tok.lexeme.clone()
    } else {
        tok.kind.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingSink;
    use crate::lexer;

    fn parse_source(src: &str) -> (Stmt, CollectingSink) {
        let mut sink = CollectingSink::new();
        let tokens = lexer::scan(src, &mut sink);
        let ast = parse(tokens, &mut sink);
        (ast, sink)
    }

    #[test]
    fn parses_arithmetic_with_precedence() {
        let (ast, sink) = parse_source("let x = 1 + 2 * 3;");
        assert!(!sink.has_errors());
        let StmtKind::AstStmts(stmts) = ast.kind else { panic!("expected program") };
        assert_eq!(stmts.len(), 1);
        let StmtKind::Var { bindings, .. } = &stmts[0].kind else { panic!("expected var decl") };
        let initializer = bindings[0].initializer.as_ref().unwrap();
        let ExprKind::Infix { op, right, .. } = &initializer.kind else { panic!("expected infix") };
        assert_eq!(*op, TokenKind::Plus);
        assert!(matches!(right.kind, ExprKind::Infix { op: TokenKind::Asterisk, .. }));
    }

    #[test]
    fn parses_if_else_and_while() {
        let (_, sink) = parse_source("if (x < 1) { return 1; } else { return 2; } while (true) { x++; }");
        assert!(!sink.has_errors());
    }

    #[test]
    fn parses_function_with_varargs() {
        let (ast, sink) = parse_source("fn f(a, b, ...rest) { return a; }");
        assert!(!sink.has_errors());
        let StmtKind::AstStmts(stmts) = ast.kind else { panic!() };
        let StmtKind::Function(def) = &stmts[0].kind else { panic!("expected fn decl") };
        assert_eq!(def.params.len(), 2);
        assert!(matches!(def.varargs, Varargs::Named(_)));
    }

    #[test]
    fn parses_class_with_base_and_constructor() {
        let (ast, sink) = parse_source("class Dog : Animal { let name; Dog(n) { this.name = n; } fn speak() { return 1; } }");
        assert!(!sink.has_errors());
        let StmtKind::AstStmts(stmts) = ast.kind else { panic!() };
        let StmtKind::Class(def) = &stmts[0].kind else { panic!("expected class decl") };
        assert_eq!(def.parents[0].0, "Animal");
        assert_eq!(def.methods.len(), 2);
    }

    #[test]
    fn parses_destructuring_with_varargs_tail() {
        let (ast, sink) = parse_source("let [a, b, ...rest] = arr;");
        assert!(!sink.has_errors());
        let StmtKind::AstStmts(stmts) = ast.kind else { panic!() };
        let StmtKind::Var { bindings, .. } = &stmts[0].kind else { panic!() };
        assert!(matches!(bindings[0].pattern, Pattern::Array { .. }));
    }

    #[test]
    fn parses_ternary_and_reference() {
        let (_, sink) = parse_source("let x = a > b ? &a : &b;");
        assert!(!sink.has_errors());
    }

    #[test]
    fn reports_error_and_recovers_at_next_statement() {
        let (ast, sink) = parse_source("let = ; let y = 1;");
        assert!(sink.has_errors());
        let StmtKind::AstStmts(stmts) = ast.kind else { panic!() };
        assert!(stmts.iter().any(|s| matches!(&s.kind, StmtKind::Var { bindings, .. } if bindings.first().is_some())));
    }

    #[test]
    fn switch_desugars_to_an_if_chain() {
        let (ast, sink) = parse_source("switch (x) { 1, 2: return 1; default: return 0; }");
        assert!(!sink.has_errors());
        let StmtKind::AstStmts(stmts) = ast.kind else { panic!() };
        let StmtKind::If { cond, else_branch, .. } = &stmts[0].kind else { panic!("expected an if chain") };
        assert!(matches!(
            cond.kind,
            ExprKind::Infix { op: TokenKind::VBarVBar, .. }
        ));
        assert!(matches!(else_branch.as_deref().map(|s| &s.kind), Some(StmtKind::Return(Some(_)))));
    }

    #[test]
    fn match_desugars_to_nested_ternary() {
        let (ast, sink) = parse_source("let y = match (x) { 1: 10, default: 0 };");
        assert!(!sink.has_errors());
        let StmtKind::AstStmts(stmts) = ast.kind else { panic!() };
        let StmtKind::Var { bindings, .. } = &stmts[0].kind else { panic!() };
        let initializer = bindings[0].initializer.as_ref().unwrap();
        let ExprKind::Ternary { cond, else_branch, .. } = &initializer.kind else { panic!("expected ternary") };
        assert!(matches!(cond.kind, ExprKind::Infix { op: TokenKind::EqualEqual, .. }));
        assert!(matches!(else_branch.kind, ExprKind::Literal(Literal::Int(0))));
    }
}
