//! AST node shapes — `spec.md` §3.
//!
//! Every node carries its originating ("tag") token for diagnostics plus a
//! discriminated `kind`, matching `spec.md` §3 exactly: `Expr { token, kind }`
//! / `Stmt { token, kind }` rather than per-variant structs. Grounded on
//! `original_source/Ast.h`'s node catalogue, translated from a C++ class
//! hierarchy into Rust enums (`spec.md` §9's "discriminated union, explicit
//! kind tag" strategy for virtual dispatch across node kinds).

use crate::token::Token;

/// A type annotation: canonical name plus source location, used only for
/// diagnostics (`spec.md` §3) — never for runtime dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeAnnotation {
    pub name: String,
    pub token: Token,
}

/// `name = initializer` with an optional declared type, or an array
/// destructuring pattern with an optional trailing varargs tail.
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Name { name: String, type_annotation: Option<TypeAnnotation>, token: Token },
    Array { elements: Vec<Pattern>, varargs: Option<Box<Pattern>> },
}

impl Pattern {
    #[must_use]
    pub fn token(&self) -> &Token {
        match self {
            Pattern::Name { token, .. } => token,
            Pattern::Array { elements, varargs } => {
                elements.first().map_or_else(|| varargs.as_ref().expect("empty pattern").token(), Pattern::token)
            }
        }
    }
}

/// One `pattern = initializer` binding inside a `let`/`const` declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub pattern: Pattern,
    pub initializer: Option<Expr>,
}

/// A function parameter: a plain name/type descriptor, since parameters
/// never destructure (`spec.md` §4.3 syntax-check: varargs position only).
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub type_annotation: Option<TypeAnnotation>,
    pub token: Token,
}

/// Trailing-varargs discipline for a parameter list, matching the function
/// object's `none`/`unnamed`/`named` arity kind (`spec.md` §3).
#[derive(Debug, Clone, PartialEq)]
pub enum Varargs {
    None,
    Unnamed,
    Named(Param),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: Option<String>,
    pub params: Vec<Param>,
    pub varargs: Varargs,
    pub body: Vec<Stmt>,
    pub token: Token,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
    Char(char),
    Str(String),
    Null,
}

/// Expression node kinds, per `spec.md` §3's catalogue.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Identifier(String),
    Grouping(Box<Expr>),
    Array(Vec<Expr>),
    /// Ordered key-value pairs (`spec.md` §3: dict is an ordered map).
    Dict(Vec<(Expr, Expr)>),
    /// Anonymous string-keyed field record.
    Struct(Vec<(String, Expr)>),
    Prefix { op: crate::token::TokenKind, operand: Box<Expr> },
    Infix { op: crate::token::TokenKind, left: Box<Expr>, right: Box<Expr> },
    /// Postfix `++`/`--`.
    Postfix { op: crate::token::TokenKind, operand: Box<Expr> },
    /// Postfix `!` applied to an integer expression (`spec.md` §4.3).
    Factorial(Box<Expr>),
    Ternary { cond: Box<Expr>, then_branch: Box<Expr>, else_branch: Box<Expr> },
    Index { object: Box<Expr>, index: Box<Expr> },
    /// `&x` / `&a[i]` — a first-class pointer to a value slot.
    Reference(Box<Expr>),
    Lambda(Box<FunctionDef>),
    Call { callee: Box<Expr>, args: Vec<Expr> },
    Dot { object: Box<Expr>, name: String },
    New(Box<Expr>),
    This,
    Base,
    /// `({ stmts; trailing })` — a block whose value is its trailing
    /// expression (`spec.md` §4.2).
    CompoundExpr { stmts: Vec<Stmt>, trailing: Box<Expr> },
    /// `...` appearing as a call argument, forwarding a named varargs tail.
    Varargs,
    /// Multi-return packing, e.g. the RHS of a destructuring assignment.
    Aggregate(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub token: Token,
}

impl Expr {
    #[must_use]
    pub fn new(kind: ExprKind, token: Token) -> Self {
        Self { kind, token }
    }

    #[must_use]
    pub fn is_literal(&self) -> bool {
        matches!(self.kind, ExprKind::Literal(_))
    }
}

/// Either a single expression or an aggregate list, carried by `return`.
#[derive(Debug, Clone, PartialEq)]
pub enum ReturnValue {
    Single(Expr),
    Aggregate(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumDef {
    pub name: String,
    pub constants: Vec<(String, Option<Expr>)>,
    pub token: Token,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub name: String,
    pub parents: Vec<(String, Token)>,
    /// Mutable instance fields.
    pub fields: Vec<Binding>,
    /// Methods, including zero or more constructors (a method whose name
    /// equals the class name, overloaded by arity).
    pub methods: Vec<FunctionDef>,
    pub nested_enums: Vec<EnumDef>,
    pub token: Token,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleDef {
    pub name: String,
    pub body: Vec<Stmt>,
    pub token: Token,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr(Expr),
    Return(Option<ReturnValue>),
    If { cond: Expr, then_branch: Box<Stmt>, else_branch: Option<Box<Stmt>> },
    /// A lexical block.
    Scope(Vec<Stmt>),
    While { cond: Expr, body: Box<Stmt>, increment: Option<Box<Stmt>> },
    Break,
    Continue,
    /// A top-level sequence, the root of every parsed program.
    AstStmts(Vec<Stmt>),
    Var { mutable: bool, bindings: Vec<Binding> },
    Function(FunctionDef),
    Class(ClassDef),
    Enum(EnumDef),
    Module(ModuleDef),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub token: Token,
}

impl Stmt {
    #[must_use]
    pub fn new(kind: StmtKind, token: Token) -> Self {
        Self { kind, token }
    }
}
