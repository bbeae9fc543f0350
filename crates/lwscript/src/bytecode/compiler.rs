//! AST-to-bytecode compiler — `spec.md` §4.5.
//!
//! Grounded on `ouros::bytecode::compiler`'s single-pass, resolver-driven
//! emission shape (no separate IR between AST and `Chunk`), generalized from
//! Python's variable-length instruction set to this language's fixed-width
//! opcodes (`bytecode/op.rs`) and driven by `resolver.rs`'s scope tracking in
//! lockstep with emission rather than as a standalone pass.
//!
//! `spec.md` §4.5 describes several lowerings only at the level of "which
//! opcode"; where it leaves the exact stack protocol open, this compiler
//! settles on one concrete scheme (mirrored by the VM that consumes it):
//!
//! - **Multi-value `return`.** `CALL` always yields exactly one value.
//!   `return a, b;` evaluates each expression and hands `RETURN` a count; the
//!   VM packs counts greater than one into a single array before it becomes
//!   the call's result, so `AGGREGATE_RESOLVE[_VAR_ARG]` can destructure a
//!   multi-value return the same way it destructures a literal array.
//! - **`CLASS`/`MODULE`.** Operands carry only the counts `op.rs` documents;
//!   names travel as ordinary `CONSTANT` string pushes interleaved with their
//!   values on the stack (`name, value` pairs), in the order: class/module
//!   name, `const_count` pairs, `var_count` pairs, then (`CLASS` only)
//!   `parent_count` already-evaluated parent values.
//! - **`enum`.** `spec.md`'s opcode list has no dedicated `ENUM`; enum
//!   declarations (top-level or nested in a class) compile through `MODULE`
//!   with `var_count == 0`, so an enum value is a `Module` at runtime whose
//!   bindings are its constants.
//! - **`new X(...)`.** No separate opcode: compiles the callee then `CALL 0`
//!   (instantiates a bare instance from the `Class` value), then compiles
//!   the argument list and `CALL argc` again on that instance (runs its
//!   matching-arity constructor, if any), per `spec.md` §4.5.
//! - **`RESET n`.** Used only to close a `({ stmts; trailing })` compound
//!   expression's scope: pops the top value, discards the `n` values below
//!   it (closing any that became open upvalues), then pushes the top value
//!   back. Ordinary block exits use plain `POP`/`CLOSE_UPVALUE` per local
//!   instead, since nothing sits above them there.
//! - **Postfix `x++`/`x--`.** Compiled identically to the prefix form (yields
//!   the *new* value) since there is no `DUP` opcode to stash the old one.
//! - **Compound assignment to a property or index** (`x.y += v`,
//!   `a[i] += v`) re-evaluates `x`/`a[i]`'s object and index subexpressions
//!   once for the read and once for the write, for the same reason. Rule:
//!   assignment targets assume no side effects in their object/index
//!   subexpressions.
//! - **`...` splat.** Forwarding a named varargs tail in a call argument
//!   list pushes it as a single array argument rather than flattening it
//!   into the caller's argument list.
//!
//! These are concretizations of an intentionally summary-level spec, not
//! spec violations; see `DESIGN.md`.

use crate::ast::{
    Binding, ClassDef, EnumDef, Expr, ExprKind, FunctionDef, Literal, ModuleDef, Pattern, ReturnValue, Stmt,
    StmtKind, Varargs,
};
use crate::bytecode::builder::{CodeBuilder, JumpHandle};
use crate::bytecode::code::{Constant, FunctionConstant};
use crate::bytecode::op::Opcode;
use crate::diagnostics::{Diagnostic, DiagnosticSink, Phase};
use crate::resolver::{Binding as Resolved, Resolver, Signature};
use crate::token::{Source, TokenKind};
use crate::types::function::{ArityKind, Function};

/// Compiles a whole program into its top-level function object, named
/// `_main_start_up` per `spec.md` §4.5. Starts with an empty global name
/// table; use [`compile_with_globals`] to keep global slot numbers stable
/// across more than one compile unit (`engine.rs`'s repeated `compile` calls
/// against one persistent `Vm`).
pub fn compile(ast: &Stmt, sink: &mut impl DiagnosticSink) -> Function {
    compile_with_globals(ast, sink, ahash::AHashMap::default()).0
}

/// Like [`compile`], but seeds the resolver's global name→slot table with
/// `globals` and returns the table grown by whatever new names this unit
/// declared or referenced, alongside the compiled function.
pub fn compile_with_globals(
    ast: &Stmt,
    sink: &mut impl DiagnosticSink,
    globals: ahash::AHashMap<String, u16>,
) -> (Function, ahash::AHashMap<String, u16>) {
    let mut compiler = Compiler::with_globals(sink, globals);
    compiler.push_frame("_main_start_up".to_string());
    match &ast.kind {
        StmtKind::AstStmts(stmts) => {
            compiler.hoist_globals(stmts);
            for stmt in stmts {
                compiler.compile_stmt(stmt);
            }
        }
        _ => compiler.compile_stmt(ast),
    }
    let source = ast.token.source;
    compiler.frame().builder.emit(Opcode::Null, source, 1);
    compiler.frame().builder.emit_u8(Opcode::Return, 1, source, -1);
    let frame = compiler.pop_frame();
    let function =
        Function { name: "_main_start_up".to_string(), arity: 0, arity_kind: ArityKind::None, chunk: frame.builder.chunk };
    (function, compiler.resolver.into_globals())
}

struct LoopCtx {
    break_jumps: Vec<JumpHandle>,
    continue_jumps: Vec<JumpHandle>,
}

struct FunctionFrame {
    builder: CodeBuilder,
    loops: Vec<LoopCtx>,
    /// Local slot holding the named varargs tail, if this function declares
    /// one (`spec.md` §3's `Varargs::Named`), for compiling a bare `...`.
    varargs_slot: Option<u16>,
}

struct Compiler<'a, S: DiagnosticSink> {
    resolver: Resolver,
    sink: &'a mut S,
    frames: Vec<FunctionFrame>,
}

impl<'a, S: DiagnosticSink> Compiler<'a, S> {
    fn new(sink: &'a mut S) -> Self {
        Self { resolver: Resolver::new(), sink, frames: Vec::new() }
    }

    fn with_globals(sink: &'a mut S, globals: ahash::AHashMap<String, u16>) -> Self {
        Self { resolver: Resolver::with_globals(globals), sink, frames: Vec::new() }
    }

    fn push_frame(&mut self, name: String) {
        self.frames.push(FunctionFrame { builder: CodeBuilder::new(name), loops: Vec::new(), varargs_slot: None });
    }

    fn pop_frame(&mut self) -> FunctionFrame {
        self.frames.pop().expect("unbalanced function frame")
    }

    fn frame(&mut self) -> &mut FunctionFrame {
        self.frames.last_mut().expect("no active function frame")
    }

    // ---- statements ----------------------------------------------------

    /// Pre-declares every top-level `fn`/`class`/`enum`/`module` name's
    /// global slot before any statement body is compiled, so a reference to
    /// one that textually appears earlier in the program (mutual recursion
    /// between two top-level functions, most commonly) resolves to `Global`
    /// instead of tripping `resolver.rs`'s `Undefined` diagnostic. Plain
    /// top-level `let`/`const` bindings are deliberately not hoisted — using
    /// one before its declaration is the case that diagnostic exists to
    /// catch.
    fn hoist_globals(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::Function(def) => {
                    let name = def.name.clone().expect("statement-form function must be named");
                    self.resolver.declare_global_function(&name, function_signature(def));
                }
                StmtKind::Class(def) => {
                    self.resolver.global_slot(&def.name);
                }
                StmtKind::Enum(def) => {
                    self.resolver.global_slot(&def.name);
                }
                StmtKind::Module(def) => {
                    self.resolver.global_slot(&def.name);
                }
                _ => {}
            }
        }
    }

    fn compile_stmt(&mut self, stmt: &Stmt) {
        let source = stmt.token.source;
        match &stmt.kind {
            StmtKind::Expr(e) => {
                self.compile_expr(e);
                self.frame().builder.emit(Opcode::Pop, source, -1);
            }
            StmtKind::Return(rv) => self.compile_return(rv.as_ref(), source),
            StmtKind::If { cond, then_branch, else_branch } => {
                self.compile_if(cond, then_branch, else_branch.as_deref(), source);
            }
            StmtKind::Scope(stmts) => self.compile_scope(stmts, source),
            StmtKind::While { cond, body, increment } => {
                self.compile_while(cond, body, increment.as_deref(), source);
            }
            StmtKind::Break => self.compile_break(source),
            StmtKind::Continue => self.compile_continue(source),
            StmtKind::AstStmts(stmts) => {
                for s in stmts {
                    self.compile_stmt(s);
                }
            }
            StmtKind::Var { bindings, .. } => self.compile_var_decl(bindings, source),
            StmtKind::Function(def) => self.compile_function_decl(def, source),
            StmtKind::Class(def) => self.compile_class_decl(def, source),
            StmtKind::Enum(def) => self.compile_enum_decl(def, source),
            StmtKind::Module(def) => self.compile_module_decl(def, source),
        }
    }

    fn compile_return(&mut self, rv: Option<&ReturnValue>, source: Source) {
        match rv {
            None => {
                self.frame().builder.emit(Opcode::Null, source, 1);
                self.frame().builder.emit_u8(Opcode::Return, 1, source, -1);
            }
            Some(ReturnValue::Single(e)) => {
                self.compile_expr(e);
                self.frame().builder.emit_u8(Opcode::Return, 1, source, -1);
            }
            Some(ReturnValue::Aggregate(exprs)) => {
                for e in exprs {
                    self.compile_expr(e);
                }
                let n = exprs.len().min(255) as u8;
                self.frame().builder.emit_u8(Opcode::Return, n, source, -(exprs.len() as i32));
            }
        }
    }

    fn compile_if(&mut self, cond: &Expr, then_branch: &Stmt, else_branch: Option<&Stmt>, source: Source) {
        self.compile_expr(cond);
        let else_jump = self.frame().builder.emit_jump(Opcode::JumpIfFalse, source);
        self.frame().builder.emit(Opcode::Pop, source, -1);
        self.compile_stmt(then_branch);
        if let Some(else_stmt) = else_branch {
            let end_jump = self.frame().builder.emit_jump(Opcode::Jump, source);
            self.frame().builder.patch_jump(else_jump);
            self.frame().builder.emit(Opcode::Pop, source, -1);
            self.compile_stmt(else_stmt);
            self.frame().builder.patch_jump(end_jump);
        } else {
            self.frame().builder.patch_jump(else_jump);
            self.frame().builder.emit(Opcode::Pop, source, -1);
        }
    }

    fn compile_scope(&mut self, stmts: &[Stmt], source: Source) {
        self.resolver.push_scope();
        for s in stmts {
            self.compile_stmt(s);
        }
        let popped = self.resolver.pop_scope();
        for (_, captured) in popped {
            if captured {
                self.frame().builder.emit(Opcode::CloseUpvalue, source, -1);
            } else {
                self.frame().builder.emit(Opcode::Pop, source, -1);
            }
        }
    }

    fn compile_while(&mut self, cond: &Expr, body: &Stmt, increment: Option<&Stmt>, source: Source) {
        let loop_start = self.frame().builder.offset();
        self.compile_expr(cond);
        let exit_jump = self.frame().builder.emit_jump(Opcode::JumpIfFalse, source);
        self.frame().builder.emit(Opcode::Pop, source, -1);
        self.frame().loops.push(LoopCtx { break_jumps: Vec::new(), continue_jumps: Vec::new() });
        self.compile_stmt(body);
        // a `continue` lands here, whether or not there's an increment, so
        // `for`'s desugared increment still runs on every iteration.
        let continue_handles: Vec<JumpHandle> = self.frame().loops.last().unwrap().continue_jumps.clone();
        for h in continue_handles {
            self.frame().builder.patch_jump(h);
        }
        if let Some(inc) = increment {
            self.compile_stmt(inc);
        }
        self.frame().builder.emit_loop(loop_start, source);
        self.frame().builder.patch_jump(exit_jump);
        self.frame().builder.emit(Opcode::Pop, source, -1);
        let ctx = self.frame().loops.pop().unwrap();
        for h in ctx.break_jumps {
            self.frame().builder.patch_jump(h);
        }
    }

    fn compile_break(&mut self, source: Source) {
        if self.frame().loops.is_empty() {
            self.sink.report(Diagnostic::error(Phase::Semantic, "'break' outside a loop", source));
            return;
        }
        let handle = self.frame().builder.emit_jump(Opcode::Jump, source);
        self.frame().loops.last_mut().unwrap().break_jumps.push(handle);
    }

    fn compile_continue(&mut self, source: Source) {
        if self.frame().loops.is_empty() {
            self.sink.report(Diagnostic::error(Phase::Semantic, "'continue' outside a loop", source));
            return;
        }
        let handle = self.frame().builder.emit_jump(Opcode::Jump, source);
        self.frame().loops.last_mut().unwrap().continue_jumps.push(handle);
    }

    fn compile_var_decl(&mut self, bindings: &[Binding], source: Source) {
        let is_global = self.resolver.at_global_scope();
        if is_global {
            self.resolver.push_scope();
        }
        let mut bound: Vec<(String, u16)> = Vec::new();
        for binding in bindings {
            match &binding.initializer {
                Some(init) => self.compile_expr(init),
                None => {
                    self.frame().builder.emit(Opcode::Null, source, 1);
                }
            }
            match &binding.pattern {
                Pattern::Name { name, .. } => {
                    let slot = self.resolver.declare_local(name);
                    self.resolver.mark_initialized();
                    bound.push((name.clone(), slot));
                }
                Pattern::Array { elements, varargs } => {
                    self.destructure_top_of_stack(elements, varargs.as_deref(), &mut bound, source);
                }
            }
        }
        if is_global {
            for (name, slot) in &bound {
                self.frame().builder.emit_u16(Opcode::GetLocal, *slot, source, 1);
                let gslot = self.resolver.global_slot(name);
                self.frame().builder.emit_u16(Opcode::SetGlobal, gslot, source, 0);
                self.frame().builder.emit(Opcode::Pop, source, -1);
            }
            let popped = self.resolver.pop_scope();
            for (_, captured) in popped {
                if captured {
                    self.frame().builder.emit(Opcode::CloseUpvalue, source, -1);
                } else {
                    self.frame().builder.emit(Opcode::Pop, source, -1);
                }
            }
        }
    }

    /// Expands the array value currently on top of the stack against
    /// `elements`/`varargs`, declaring one fresh local per target (in push
    /// order, so each local's slot matches the position `AGGREGATE_RESOLVE`
    /// leaves its value at). Nested array patterns get an anonymous slot
    /// here and are recursively expanded afterward via an explicit
    /// `GET_LOCAL`, since by the time a non-trailing nested pattern is
    /// processed its value is no longer on top of the stack.
    fn destructure_top_of_stack(
        &mut self,
        elements: &[Pattern],
        varargs: Option<&Pattern>,
        out: &mut Vec<(String, u16)>,
        source: Source,
    ) {
        let k = elements.len().min(255) as u8;
        if varargs.is_some() {
            self.frame().builder.emit_u8(Opcode::AggregateResolveVarArg, k, source, i32::from(k));
        } else {
            self.frame().builder.emit_u8(Opcode::AggregateResolve, k, source, i32::from(k) - 1);
        }
        let mut slots: Vec<u16> = Vec::with_capacity(elements.len() + 1);
        for el in elements.iter().chain(varargs) {
            match el {
                Pattern::Name { name, .. } => {
                    let slot = self.resolver.declare_local(name);
                    self.resolver.mark_initialized();
                    out.push((name.clone(), slot));
                    slots.push(slot);
                }
                Pattern::Array { .. } => {
                    let slot = self.resolver.declare_local("");
                    self.resolver.mark_initialized();
                    slots.push(slot);
                }
            }
        }
        for (i, el) in elements.iter().chain(varargs).enumerate() {
            if let Pattern::Array { elements: sub_elements, varargs: sub_varargs } = el {
                self.frame().builder.emit_u16(Opcode::GetLocal, slots[i], source, 1);
                self.destructure_top_of_stack(sub_elements, sub_varargs.as_deref(), out, source);
            }
        }
    }

    fn compile_function_decl(&mut self, def: &FunctionDef, source: Source) {
        let name = def.name.clone().expect("statement-form function must be named");
        let sig = function_signature(def);
        if self.resolver.at_global_scope() {
            self.compile_function(def, false, source);
            // already registered by hoist_globals; re-declaring here just
            // recovers this signature's slot.
            let g = self.resolver.declare_global_function(&name, sig);
            self.frame().builder.emit_u16(Opcode::SetGlobal, g, source, 0);
            self.frame().builder.emit(Opcode::Pop, source, -1);
        } else {
            // declared before compiling the body so a recursive self-call
            // inside it resolves as a local/upvalue instead of a global.
            // A fresh slot per signature lets same-named local overloads
            // coexist (`spec.md` §4.4's function overload rule).
            self.resolver.declare_local_function(&name, sig);
            self.compile_function(def, false, source);
        }
    }

    fn compile_class_decl(&mut self, def: &ClassDef, source: Source) {
        if self.resolver.at_global_scope() {
            let g = self.resolver.global_slot(&def.name);
            self.compile_class(def, source);
            self.frame().builder.emit_u16(Opcode::SetGlobal, g, source, 0);
            self.frame().builder.emit(Opcode::Pop, source, -1);
        } else {
            self.resolver.declare_local(&def.name);
            self.resolver.mark_initialized();
            self.compile_class(def, source);
        }
    }

    fn compile_enum_decl(&mut self, def: &EnumDef, source: Source) {
        if self.resolver.at_global_scope() {
            self.compile_enum_value(def, source);
            let g = self.resolver.global_slot(&def.name);
            self.frame().builder.emit_u16(Opcode::SetGlobal, g, source, 0);
            self.frame().builder.emit(Opcode::Pop, source, -1);
        } else {
            self.compile_enum_value(def, source);
            self.resolver.declare_local(&def.name);
            self.resolver.mark_initialized();
        }
    }

    fn compile_module_decl(&mut self, def: &ModuleDef, source: Source) {
        if self.resolver.at_global_scope() {
            let g = self.resolver.global_slot(&def.name);
            self.compile_module(def, source);
            self.frame().builder.emit_u16(Opcode::SetGlobal, g, source, 0);
            self.frame().builder.emit(Opcode::Pop, source, -1);
        } else {
            self.resolver.declare_local(&def.name);
            self.resolver.mark_initialized();
            self.compile_module(def, source);
        }
    }

    // ---- function / class / enum / module bodies ------------------------

    fn compile_function(&mut self, def: &FunctionDef, is_method: bool, source: Source) {
        self.resolver.push_function();
        self.push_frame(def.name.clone().unwrap_or_else(|| "<anonymous>".to_string()));
        self.resolver.push_scope();
        if is_method {
            self.resolver.declare_local("this");
            self.resolver.mark_initialized();
        }
        for p in &def.params {
            self.resolver.declare_local(&p.name);
            self.resolver.mark_initialized();
        }
        let arity_kind = match &def.varargs {
            Varargs::None => ArityKind::None,
            Varargs::Unnamed => ArityKind::Unnamed,
            Varargs::Named(p) => {
                let slot = self.resolver.declare_local(&p.name);
                self.resolver.mark_initialized();
                self.frame().varargs_slot = Some(slot);
                ArityKind::Named
            }
        };
        for s in &def.body {
            self.compile_stmt(s);
        }
        self.frame().builder.emit(Opcode::Null, source, 1);
        self.frame().builder.emit_u8(Opcode::Return, 1, source, -1);
        self.resolver.pop_scope();
        let upvalues = self.resolver.pop_function();
        let completed = self.pop_frame();
        let arity = def.params.len().min(255) as u8;
        let function_constant = Constant::Function(Box::new(FunctionConstant {
            name: def.name.clone().unwrap_or_else(|| "<anonymous>".to_string()),
            arity,
            arity_kind,
            chunk: completed.builder.chunk,
        }));
        let const_idx = self.frame().builder.chunk.add_constant(function_constant);
        self.frame().builder.emit_closure(const_idx, &upvalues, source);
    }

    fn compile_class(&mut self, def: &ClassDef, source: Source) {
        self.frame().builder.emit_constant(Constant::Str(def.name.clone()), source);
        let mut const_count: usize = 0;
        for method in &def.methods {
            if method.name.as_deref() == Some(def.name.as_str()) {
                continue; // constructors are pushed below, keyed by arity
            }
            let method_name = method.name.clone().expect("class method must be named");
            self.frame().builder.emit_constant(Constant::Str(method_name), method.token.source);
            self.compile_function(method, true, method.token.source);
            const_count += 1;
        }
        for nested in &def.nested_enums {
            self.frame().builder.emit_constant(Constant::Str(nested.name.clone()), nested.token.source);
            self.compile_enum_value(nested, nested.token.source);
            const_count += 1;
        }
        let mut ctor_count: usize = 0;
        for method in &def.methods {
            if method.name.as_deref() != Some(def.name.as_str()) {
                continue;
            }
            let arity = method.params.len().min(255) as i64;
            self.frame().builder.emit_constant(Constant::Int(arity), method.token.source);
            self.compile_function(method, true, method.token.source);
            ctor_count += 1;
        }
        let mut var_count: usize = 0;
        for field in &def.fields {
            if let Pattern::Name { name, .. } = &field.pattern {
                self.frame().builder.emit_constant(Constant::Str(name.clone()), source);
                match &field.initializer {
                    Some(init) => self.compile_expr(init),
                    None => {
                        self.frame().builder.emit(Opcode::Null, source, 1);
                    }
                }
                var_count += 1;
            } else {
                self.sink.report(Diagnostic::error(
                    Phase::Semantic,
                    "class fields cannot use a destructuring pattern",
                    field.pattern.token().source,
                ));
            }
        }
        let parent_count = def.parents.len();
        for (parent_name, parent_token) in &def.parents {
            self.compile_identifier(parent_name, parent_token.source);
        }
        self.frame().builder.emit_class(
            ctor_count.min(255) as u8,
            var_count.min(255) as u8,
            const_count.min(255) as u8,
            parent_count.min(255) as u8,
            source,
        );
    }

    /// Lowers an `enum` declaration (top-level or nested in a class) through
    /// `MODULE` — `spec.md`'s opcode set has no dedicated `ENUM`, so an enum
    /// value is a `Module` at runtime whose bindings are its constants.
    /// Unset constants auto-increment from the previous one (or `0`), like a
    /// C-style enum; a non-integer-literal initializer just bumps the
    /// counter by one for whatever follows it.
    fn compile_enum_value(&mut self, def: &EnumDef, source: Source) {
        self.frame().builder.emit_constant(Constant::Str(def.name.clone()), source);
        let mut next_auto: i64 = 0;
        for (name, init) in &def.constants {
            self.frame().builder.emit_constant(Constant::Str(name.clone()), source);
            match init {
                Some(expr) => {
                    self.compile_expr(expr);
                    next_auto = if let ExprKind::Literal(Literal::Int(n)) = expr.kind { n + 1 } else { next_auto + 1 };
                }
                None => {
                    self.frame().builder.emit_constant(Constant::Int(next_auto), source);
                    next_auto += 1;
                }
            }
        }
        self.frame().builder.emit_module(0, def.constants.len().min(255) as u8, source);
    }

    /// A module's body runs as an immediately-invoked zero-arg closure; the
    /// names it declares at its own top level become the resulting
    /// `Module`'s bindings (`spec.md` §4.5).
    fn compile_module(&mut self, def: &ModuleDef, source: Source) {
        self.resolver.push_function();
        self.push_frame(format!("<module {}>", def.name));
        self.resolver.push_scope();
        let mut collected: Vec<(String, u16)> = Vec::new();
        for stmt in &def.body {
            let stmt_source = stmt.token.source;
            match &stmt.kind {
                StmtKind::Var { bindings, .. } => {
                    for binding in bindings {
                        match &binding.initializer {
                            Some(init) => self.compile_expr(init),
                            None => {
                                self.frame().builder.emit(Opcode::Null, stmt_source, 1);
                            }
                        }
                        match &binding.pattern {
                            Pattern::Name { name, .. } => {
                                let slot = self.resolver.declare_local(name);
                                self.resolver.mark_initialized();
                                collected.push((name.clone(), slot));
                            }
                            Pattern::Array { elements, varargs } => {
                                self.destructure_top_of_stack(elements, varargs.as_deref(), &mut collected, stmt_source);
                            }
                        }
                    }
                }
                StmtKind::Function(fd) => {
                    let name = fd.name.clone().expect("module-level function must be named");
                    let slot = self.resolver.declare_local(&name);
                    self.resolver.mark_initialized();
                    self.compile_function(fd, false, stmt_source);
                    collected.push((name, slot));
                }
                StmtKind::Class(cd) => {
                    let slot = self.resolver.declare_local(&cd.name);
                    self.resolver.mark_initialized();
                    self.compile_class(cd, stmt_source);
                    collected.push((cd.name.clone(), slot));
                }
                StmtKind::Enum(ed) => {
                    let slot = self.resolver.declare_local(&ed.name);
                    self.resolver.mark_initialized();
                    self.compile_enum_value(ed, stmt_source);
                    collected.push((ed.name.clone(), slot));
                }
                _ => self.compile_stmt(stmt),
            }
        }
        self.frame().builder.emit_constant(Constant::Str(def.name.clone()), source);
        for (name, slot) in &collected {
            self.frame().builder.emit_constant(Constant::Str(name.clone()), source);
            self.frame().builder.emit_u16(Opcode::GetLocal, *slot, source, 1);
        }
        self.frame().builder.emit_module(0, collected.len().min(255) as u8, source);
        self.frame().builder.emit_u8(Opcode::Return, 1, source, -1);
        self.resolver.pop_scope();
        let upvalues = self.resolver.pop_function();
        let completed = self.pop_frame();
        let function_constant = Constant::Function(Box::new(FunctionConstant {
            name: format!("<module {}>", def.name),
            arity: 0,
            arity_kind: ArityKind::None,
            chunk: completed.builder.chunk,
        }));
        let const_idx = self.frame().builder.chunk.add_constant(function_constant);
        self.frame().builder.emit_closure(const_idx, &upvalues, source);
        self.frame().builder.emit_u8(Opcode::Call, 0, source, 0);
    }

    // ---- expressions -----------------------------------------------------

    fn compile_expr(&mut self, expr: &Expr) {
        let source = expr.token.source;
        match &expr.kind {
            ExprKind::Literal(lit) => self.compile_literal(lit, source),
            ExprKind::Identifier(name) => self.compile_identifier(name, source),
            ExprKind::Grouping(inner) => self.compile_expr(inner),
            ExprKind::Array(elements) => self.compile_array(elements, source),
            ExprKind::Dict(pairs) => self.compile_dict(pairs, source),
            ExprKind::Struct(fields) => self.compile_struct(fields, source),
            ExprKind::Prefix { op, operand } => self.compile_prefix(*op, operand, source),
            ExprKind::Infix { op, left, right } => self.compile_infix(*op, left, right, source),
            ExprKind::Postfix { op, operand } => self.compile_incr_decr(*op, operand, source),
            ExprKind::Factorial(operand) => {
                self.compile_expr(operand);
                self.frame().builder.emit(Opcode::Factorial, source, 0);
            }
            ExprKind::Ternary { cond, then_branch, else_branch } => {
                self.compile_ternary(cond, then_branch, else_branch, source);
            }
            ExprKind::Index { object, index } => {
                self.compile_expr(object);
                self.compile_expr(index);
                self.frame().builder.emit(Opcode::GetIndex, source, -1);
            }
            ExprKind::Reference(inner) => self.compile_reference(inner, source),
            ExprKind::Lambda(def) => self.compile_function(def, false, source),
            ExprKind::Call { callee, args } => self.compile_call(callee, args, source),
            ExprKind::Dot { object, name } => self.compile_dot_get(object, name, source),
            ExprKind::New(inner) => self.compile_new(inner, source),
            ExprKind::This | ExprKind::Base => self.compile_identifier("this", source),
            ExprKind::CompoundExpr { stmts, trailing } => self.compile_compound_expr(stmts, trailing, source),
            ExprKind::Varargs => self.compile_varargs(source),
            ExprKind::Aggregate(exprs) => {
                for e in exprs {
                    self.compile_expr(e);
                }
                let n = exprs.len().min(u16::MAX as usize) as u16;
                self.frame().builder.emit_u16(Opcode::Array, n, source, 1 - exprs.len() as i32);
            }
        }
    }

    fn compile_literal(&mut self, lit: &Literal, source: Source) {
        match lit {
            Literal::Null => {
                self.frame().builder.emit(Opcode::Null, source, 1);
            }
            Literal::Bool(b) => {
                self.frame().builder.emit_constant(Constant::Bool(*b), source);
            }
            Literal::Int(n) => {
                self.frame().builder.emit_constant(Constant::Int(*n), source);
            }
            Literal::Float(f) => {
                self.frame().builder.emit_constant(Constant::Float(*f), source);
            }
            Literal::Char(c) => {
                self.frame().builder.emit_constant(Constant::Char(*c), source);
            }
            Literal::Str(s) => {
                self.frame().builder.emit_constant(Constant::Str(s.clone()), source);
            }
        }
    }

    fn compile_identifier(&mut self, name: &str, source: Source) {
        match self.resolver.resolve(name) {
            Resolved::Local(slot) => self.frame().builder.emit_u16(Opcode::GetLocal, slot, source, 1),
            Resolved::Upvalue(idx) => self.frame().builder.emit_u16(Opcode::GetUpvalue, idx, source, 1),
            Resolved::Global => {
                let g = self.resolver.global_slot(name);
                self.frame().builder.emit_u16(Opcode::GetGlobal, g, source, 1);
            }
            Resolved::Undefined => {
                self.sink.report(Diagnostic::error(Phase::Semantic, format!("undefined name '{name}'"), source));
                self.frame().builder.emit(Opcode::Null, source, 1);
            }
        }
    }

    fn compile_array(&mut self, elements: &[Expr], source: Source) {
        for e in elements {
            self.compile_expr(e);
        }
        let n = elements.len().min(u16::MAX as usize) as u16;
        self.frame().builder.emit_u16(Opcode::Array, n, source, 1 - elements.len() as i32);
    }

    fn compile_dict(&mut self, pairs: &[(Expr, Expr)], source: Source) {
        for (k, v) in pairs {
            self.compile_expr(k);
            self.compile_expr(v);
        }
        let n = pairs.len().min(u16::MAX as usize) as u16;
        self.frame().builder.emit_u16(Opcode::Dict, n, source, 1 - 2 * pairs.len() as i32);
    }

    fn compile_struct(&mut self, fields: &[(String, Expr)], source: Source) {
        for (name, value) in fields {
            self.frame().builder.emit_constant(Constant::Str(name.clone()), source);
            self.compile_expr(value);
        }
        let n = fields.len().min(u16::MAX as usize) as u16;
        self.frame().builder.emit_u16(Opcode::Struct, n, source, 1 - 2 * fields.len() as i32);
    }

    fn compile_prefix(&mut self, op: TokenKind, operand: &Expr, source: Source) {
        match op {
            TokenKind::PlusPlus | TokenKind::MinusMinus => self.compile_incr_decr(op, operand, source),
            TokenKind::Minus => {
                self.compile_expr(operand);
                self.frame().builder.emit(Opcode::Minus, source, 0);
            }
            TokenKind::Bang => {
                self.compile_expr(operand);
                self.frame().builder.emit(Opcode::Not, source, 0);
            }
            TokenKind::Tilde => {
                self.compile_expr(operand);
                self.frame().builder.emit(Opcode::BitNot, source, 0);
            }
            _ => {
                self.sink.report(Diagnostic::error(Phase::Semantic, format!("unsupported prefix operator {op}"), source));
                self.compile_expr(operand);
            }
        }
    }

    /// Shared lowering for prefix and postfix `++`/`--`: both compile to the
    /// *new* value (no `DUP` opcode exists to preserve the old one for a true
    /// postfix result).
    fn compile_incr_decr(&mut self, op: TokenKind, operand: &Expr, source: Source) {
        self.compile_expr(operand);
        self.frame().builder.emit_constant(Constant::Int(1), source);
        let arith = if op == TokenKind::PlusPlus { Opcode::Add } else { Opcode::Sub };
        self.frame().builder.emit(arith, source, -1);
        self.compile_write(operand, source);
    }

    fn compile_ternary(&mut self, cond: &Expr, then_branch: &Expr, else_branch: &Expr, source: Source) {
        self.compile_expr(cond);
        let else_jump = self.frame().builder.emit_jump(Opcode::JumpIfFalse, source);
        self.frame().builder.emit(Opcode::Pop, source, -1);
        self.compile_expr(then_branch);
        let end_jump = self.frame().builder.emit_jump(Opcode::Jump, source);
        self.frame().builder.patch_jump(else_jump);
        self.frame().builder.emit(Opcode::Pop, source, -1);
        self.compile_expr(else_branch);
        self.frame().builder.patch_jump(end_jump);
    }

    fn compile_reference(&mut self, inner: &Expr, source: Source) {
        match &inner.kind {
            ExprKind::Identifier(name) => match self.resolver.resolve(name) {
                Resolved::Local(slot) => self.frame().builder.emit_u16(Opcode::RefLocal, slot, source, 1),
                Resolved::Upvalue(idx) => self.frame().builder.emit_u16(Opcode::RefUpvalue, idx, source, 1),
                Resolved::Global => {
                    let g = self.resolver.global_slot(name);
                    self.frame().builder.emit_u16(Opcode::RefGlobal, g, source, 1);
                }
                Resolved::Undefined => {
                    self.sink.report(Diagnostic::error(Phase::Semantic, format!("undefined name '{name}'"), source));
                    self.frame().builder.emit(Opcode::Null, source, 1);
                }
            },
            ExprKind::Index { object, index } => {
                self.compile_expr(object);
                self.compile_expr(index);
                self.frame().builder.emit(Opcode::RefIndex, source, -1);
            }
            // syntax_check rejects anything else before codegen runs.
            _ => {
                self.frame().builder.emit(Opcode::Null, source, 1);
            }
        }
    }

    fn compile_call(&mut self, callee: &Expr, args: &[Expr], source: Source) {
        if let ExprKind::Identifier(name) = &callee.kind {
            self.compile_callee_for_call(name, args.len(), callee.token.source);
        } else {
            self.compile_expr(callee);
        }
        for a in args {
            self.compile_expr(a);
        }
        let argc = args.len().min(255) as u8;
        self.frame().builder.emit_u8(Opcode::Call, argc, source, -(args.len() as i32));
    }

    /// A bare-identifier callee needs the call's argument count to pick the
    /// right overload (`spec.md` §4.4's `resolve(token, name, argcount)`),
    /// which [`Compiler::compile_identifier`]'s plain name lookup has no way
    /// to ask for.
    fn compile_callee_for_call(&mut self, name: &str, argcount: usize, source: Source) {
        if let Some(slot) = self.resolver.resolve_local_call(name, argcount) {
            self.frame().builder.emit_u16(Opcode::GetLocal, slot, source, 1);
            return;
        }
        match self.resolver.resolve(name) {
            Resolved::Local(slot) => self.frame().builder.emit_u16(Opcode::GetLocal, slot, source, 1),
            Resolved::Upvalue(idx) => self.frame().builder.emit_u16(Opcode::GetUpvalue, idx, source, 1),
            Resolved::Global => {
                let g = self.resolver.resolve_global_call(name, argcount).unwrap_or_else(|| self.resolver.global_slot(name));
                self.frame().builder.emit_u16(Opcode::GetGlobal, g, source, 1);
            }
            Resolved::Undefined => {
                self.sink.report(Diagnostic::error(Phase::Semantic, format!("undefined name '{name}'"), source));
                self.frame().builder.emit(Opcode::Null, source, 1);
            }
        }
    }

    /// `new X(...)` needs no opcode of its own: `spec.md` §4.5 lowers it to
    /// two `CALL`s against the same class value — `CALL 0` first, which the
    /// VM's `Class`-as-callee dispatch turns into a bare instance (no
    /// matching-arity constructor required), then `CALL argc` on that
    /// instance, which runs the matching-arity constructor against it (or
    /// is a no-op if none matches).
    fn compile_new(&mut self, inner: &Expr, source: Source) {
        match &inner.kind {
            ExprKind::Call { callee, args } => {
                self.compile_expr(callee);
                self.frame().builder.emit_u8(Opcode::Call, 0, source, 0);
                for a in args {
                    self.compile_expr(a);
                }
                let argc = args.len().min(255) as u8;
                self.frame().builder.emit_u8(Opcode::Call, argc, source, -(args.len() as i32));
            }
            // syntax_check rejects a non-call operand before codegen runs.
            _ => {
                self.frame().builder.emit(Opcode::Null, source, 1);
            }
        }
    }

    fn compile_dot_get(&mut self, object: &Expr, name: &str, source: Source) {
        if matches!(object.kind, ExprKind::Base) {
            self.compile_identifier("this", source);
            self.frame().builder.emit_constant(Constant::Str(name.to_string()), source);
            self.frame().builder.emit(Opcode::GetBase, source, -1);
        } else {
            self.compile_expr(object);
            let idx = self.frame().builder.chunk.add_constant(Constant::Str(name.to_string()));
            self.frame().builder.emit_u16(Opcode::GetProperty, idx, source, 0);
        }
    }

    fn compile_varargs(&mut self, source: Source) {
        match self.frame().varargs_slot {
            Some(slot) => self.frame().builder.emit_u16(Opcode::GetLocal, slot, source, 1),
            None => {
                self.sink.report(Diagnostic::error(
                    Phase::Semantic,
                    "'...' used outside a named-varargs function",
                    source,
                ));
                self.frame().builder.emit(Opcode::Null, source, 1);
            }
        }
    }

    fn compile_compound_expr(&mut self, stmts: &[Stmt], trailing: &Expr, source: Source) {
        self.resolver.push_scope();
        for s in stmts {
            self.compile_stmt(s);
        }
        self.compile_expr(trailing);
        let popped = self.resolver.pop_scope();
        let n = popped.len().min(255) as u8;
        if n > 0 {
            self.frame().builder.emit_u8(Opcode::Reset, n, source, -(i32::from(n)));
        }
    }

    fn compile_infix(&mut self, op: TokenKind, left: &Expr, right: &Expr, source: Source) {
        use TokenKind::{
            AmpersandAmpersand, AmpersandEqual, AsteriskEqual, CaretEqual, Equal, GreaterGreaterEqual, LessLessEqual,
            MinusEqual, PercentEqual, PlusEqual, SlashEqual, VBarEqual, VBarVBar,
        };
        match op {
            Equal => {
                self.compile_expr(right);
                self.compile_write(left, source);
            }
            PlusEqual | MinusEqual | AsteriskEqual | SlashEqual | PercentEqual | AmpersandEqual | VBarEqual
            | CaretEqual | LessLessEqual | GreaterGreaterEqual => {
                let arith = compound_arith_opcode(op);
                self.compile_expr(left);
                self.compile_expr(right);
                self.frame().builder.emit(arith, source, -1);
                self.compile_write(left, source);
            }
            AmpersandAmpersand => {
                self.compile_expr(left);
                let false_jump = self.frame().builder.emit_jump(Opcode::JumpIfFalse, source);
                self.frame().builder.emit(Opcode::Pop, source, -1);
                self.compile_expr(right);
                self.frame().builder.patch_jump(false_jump);
            }
            VBarVBar => {
                self.compile_expr(left);
                let false_jump = self.frame().builder.emit_jump(Opcode::JumpIfFalse, source);
                let end_jump = self.frame().builder.emit_jump(Opcode::Jump, source);
                self.frame().builder.patch_jump(false_jump);
                self.frame().builder.emit(Opcode::Pop, source, -1);
                self.compile_expr(right);
                self.frame().builder.patch_jump(end_jump);
            }
            _ => {
                self.compile_expr(left);
                self.compile_expr(right);
                match infix_opcode(op) {
                    Some((opcode, negate)) => {
                        self.frame().builder.emit(opcode, source, -1);
                        if negate {
                            self.frame().builder.emit(Opcode::Not, source, 0);
                        }
                    }
                    None => {
                        self.sink.report(Diagnostic::error(
                            Phase::Semantic,
                            format!("unsupported infix operator {op}"),
                            source,
                        ));
                        self.frame().builder.emit(Opcode::Pop, source, -1);
                    }
                }
            }
        }
    }

    /// Stores the value currently on top of the stack into `target`,
    /// leaving it there afterward (assignment is an expression). `Dot`/`Index`
    /// targets re-evaluate their object/index subexpressions, so compound
    /// assignment to one assumes those subexpressions are side-effect-free.
    fn compile_write(&mut self, target: &Expr, source: Source) {
        match &target.kind {
            ExprKind::Identifier(name) => match self.resolver.resolve(name) {
                Resolved::Local(slot) => self.frame().builder.emit_u16(Opcode::SetLocal, slot, source, 0),
                Resolved::Upvalue(idx) => self.frame().builder.emit_u16(Opcode::SetUpvalue, idx, source, 0),
                Resolved::Global => {
                    let g = self.resolver.global_slot(name);
                    self.frame().builder.emit_u16(Opcode::SetGlobal, g, source, 0);
                }
                Resolved::Undefined => {
                    self.sink.report(Diagnostic::error(Phase::Semantic, format!("undefined name '{name}'"), source));
                }
            },
            ExprKind::Dot { object, name } => {
                if matches!(object.kind, ExprKind::Base) {
                    self.sink.report(Diagnostic::error(Phase::Semantic, "cannot assign through 'base'", source));
                    return;
                }
                self.compile_expr(object);
                let idx = self.frame().builder.chunk.add_constant(Constant::Str(name.clone()));
                self.frame().builder.emit_u16(Opcode::SetProperty, idx, source, -1);
            }
            ExprKind::Index { object, index } => {
                self.compile_expr(object);
                self.compile_expr(index);
                self.frame().builder.emit(Opcode::SetIndex, source, -2);
            }
            _ => {
                self.sink.report(Diagnostic::error(Phase::Semantic, "invalid assignment target", source));
            }
        }
    }
}

/// A `fn` declaration's call-site shape, for the overload-aware resolver
/// entry points (`resolver.rs`'s `declare_global_function`/
/// `declare_local_function`/`resolve_*_call`).
fn function_signature(def: &FunctionDef) -> Signature {
    let varargs = match &def.varargs {
        Varargs::None => ArityKind::None,
        Varargs::Unnamed => ArityKind::Unnamed,
        Varargs::Named(_) => ArityKind::Named,
    };
    Signature { arity: def.params.len().min(255) as u8, varargs }
}

fn infix_opcode(op: TokenKind) -> Option<(Opcode, bool)> {
    use TokenKind::{
        Ampersand, Asterisk, BangEqual, Caret, EqualEqual, Greater, GreaterEqual, GreaterGreater, Less, LessEqual,
        LessLess, Minus, Percent, Plus, Slash, VBar,
    };
    Some(match op {
        Plus => (Opcode::Add, false),
        Minus => (Opcode::Sub, false),
        Asterisk => (Opcode::Mul, false),
        Slash => (Opcode::Div, false),
        Percent => (Opcode::Mod, false),
        Ampersand => (Opcode::BitAnd, false),
        VBar => (Opcode::BitOr, false),
        Caret => (Opcode::BitXor, false),
        LessLess => (Opcode::BitLeftShift, false),
        GreaterGreater => (Opcode::BitRightShift, false),
        Less => (Opcode::Less, false),
        Greater => (Opcode::Greater, false),
        EqualEqual => (Opcode::Equal, false),
        LessEqual => (Opcode::Greater, true),
        GreaterEqual => (Opcode::Less, true),
        BangEqual => (Opcode::Equal, true),
        _ => return None,
    })
}

fn compound_arith_opcode(op: TokenKind) -> Opcode {
    use TokenKind::{
        AmpersandEqual, AsteriskEqual, CaretEqual, GreaterGreaterEqual, LessLessEqual, MinusEqual, PercentEqual,
        PlusEqual, SlashEqual, VBarEqual,
    };
    match op {
        PlusEqual => Opcode::Add,
        MinusEqual => Opcode::Sub,
        AsteriskEqual => Opcode::Mul,
        SlashEqual => Opcode::Div,
        PercentEqual => Opcode::Mod,
        AmpersandEqual => Opcode::BitAnd,
        VBarEqual => Opcode::BitOr,
        CaretEqual => Opcode::BitXor,
        LessLessEqual => Opcode::BitLeftShift,
        GreaterGreaterEqual => Opcode::BitRightShift,
        _ => unreachable!("compound_arith_opcode called with a non-compound-assignment token"),
    }
}

#[cfg(test)]
mod tests {
    use super::compile;
    use crate::bytecode::code::Constant;
    use crate::bytecode::op::Opcode;
    use crate::diagnostics::CollectingSink;
    use crate::lexer;
    use crate::parser;
    use crate::passes;

    fn compile_source(src: &str) -> (crate::types::function::Function, CollectingSink) {
        let mut sink = CollectingSink::new();
        let tokens = lexer::scan(src, &mut sink);
        let mut ast = parser::parse(tokens, &mut sink);
        passes::run_passes(&mut ast, &mut sink);
        let function = compile(&ast, &mut sink);
        (function, sink)
    }

    #[test]
    fn compiles_arithmetic_expression_statement() {
        let (function, sink) = compile_source("1 + 2 * 3;");
        assert!(!sink.has_errors());
        assert!(function.chunk.constants.iter().any(|c| *c == Constant::Int(1)));
        assert!(function.chunk.code.contains(&(Opcode::Mul as u8)));
        assert!(function.chunk.code.contains(&(Opcode::Add as u8)));
    }

    #[test]
    fn compiles_recursive_local_function_with_upvalue_free_call() {
        let (function, sink) = compile_source("fn fact(n) { if (n < 2) { return 1; } return n * fact(n - 1); }");
        assert!(!sink.has_errors());
        assert!(function.chunk.code.contains(&(Opcode::Closure as u8)));
        let inner = function.chunk.constants.iter().find_map(|c| match c {
            Constant::Function(f) => Some(f),
            _ => None,
        });
        assert!(inner.is_some());
        assert!(inner.unwrap().chunk.code.contains(&(Opcode::Call as u8)));
    }

    #[test]
    fn compiles_closure_capturing_enclosing_local() {
        let src = "fn make_counter() { let n = 0; fn inc() { n = n + 1; return n; } return inc; }";
        let (function, sink) = compile_source(src);
        assert!(!sink.has_errors());
        let make_counter = function.chunk.constants.iter().find_map(|c| match c {
            Constant::Function(f) if f.name == "make_counter" => Some(f),
            _ => None,
        });
        assert!(make_counter.is_some());
        let inc = make_counter.unwrap().chunk.constants.iter().find_map(|c| match c {
            Constant::Function(f) if f.name == "inc" => Some(f),
            _ => None,
        });
        assert!(inc.is_some());
        assert!(inc.unwrap().chunk.code.contains(&(Opcode::GetUpvalue as u8)));
        assert!(inc.unwrap().chunk.code.contains(&(Opcode::SetUpvalue as u8)));
    }

    #[test]
    fn compiles_array_destructuring_with_varargs_tail() {
        let (function, sink) = compile_source("let [x, y, ...rest] = [1, 2, 3, 4, 5];");
        assert!(!sink.has_errors());
        assert!(function.chunk.code.contains(&(Opcode::AggregateResolveVarArg as u8)));
    }

    #[test]
    fn compiles_while_loop_with_break_and_continue() {
        let src = "let i = 0; while (i < 10) { if (i == 5) { break; } i = i + 1; continue; }";
        let (function, sink) = compile_source(src);
        assert!(!sink.has_errors());
        assert!(function.chunk.code.contains(&(Opcode::Loop as u8)));
        assert!(function.chunk.code.contains(&(Opcode::Jump as u8)));
    }

    #[test]
    fn compiles_class_with_base_call() {
        let src = "class A { hi() { return 1; } } class B : A { hi() { return base.hi(); } }";
        let (function, sink) = compile_source(src);
        assert!(!sink.has_errors());
        assert!(function.chunk.code.contains(&(Opcode::Class as u8)));
        let b = function.chunk.constants.iter().find_map(|c| match c {
            Constant::Function(_) => None,
            _ => None,
        });
        let _ = b;
        let found_base = function.chunk.constants.iter().any(|c| match c {
            Constant::Function(f) => f.chunk.code.contains(&(Opcode::GetBase as u8)),
            _ => false,
        });
        assert!(found_base);
    }

    #[test]
    fn reports_break_outside_loop() {
        // syntax_check already flags this; the compiler backstop must not panic.
        let (_function, sink) = compile_source("break;");
        assert!(sink.has_errors());
    }

    #[test]
    fn mutual_recursion_between_top_level_functions_compiles_without_error() {
        let src = "fn is_even(n) { if (n == 0) { return true; } return is_odd(n - 1); }\n\
                   fn is_odd(n) { if (n == 0) { return false; } return is_even(n - 1); }";
        let (_function, sink) = compile_source(src);
        assert!(!sink.has_errors());
    }

    #[test]
    fn reports_an_undefined_name() {
        let (_function, sink) = compile_source("return nonexistent + 1;");
        assert!(sink.has_errors());
    }

    #[test]
    fn overloaded_global_functions_dispatch_by_argument_count() {
        let src = "fn add(a) { return a; } fn add(a, b) { return a + b; }\nreturn add(1, 2);";
        let (_function, sink) = compile_source(src);
        assert!(!sink.has_errors());
    }
}
