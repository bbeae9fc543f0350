//! Nested symbol tables and upvalue capture — `spec.md` §4.4.
//!
//! Grounded on `navicore-cem3/crates/compiler/src/resolver.rs`'s scope-chain
//! shape (a stack of per-function scopes, each holding a stack of locals at
//! increasing block depth) generalized with the classic single-pass upvalue
//! capture algorithm `spec.md` §4.4 calls for: resolving a free variable
//! walks outward through enclosing function scopes, capturing a local (or an
//! already-captured upvalue) at every level on the way back in so a deeply
//! nested closure only pays for one upvalue slot per enclosing function, not
//! one per level. `bytecode/compiler.rs` drives this resolver in lockstep
//! with AST compilation rather than running it as a separate tree pass,
//! since resolution and bytecode emission share the same scope-depth
//! bookkeeping.

use ahash::AHashMap;

use crate::types::function::ArityKind;

/// Where a resolved name lives once the compiler is ready to emit a
/// bytecode operand for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Local(u16),
    Upvalue(u16),
    Global,
    /// A reference to a name with no declaration visible anywhere in the
    /// enclosing scope chain (`spec.md` §4.4 `resolve` step 3).
    Undefined,
}

/// A `fn` declaration's call-site shape: how many named parameters it takes
/// and its varargs discipline. Two declarations of the same name coexist in
/// one scope as long as their signatures differ (`spec.md` §4.4's function
/// overload rule); the call-site argument count disambiguates between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub arity: u8,
    pub varargs: ArityKind,
}

impl Signature {
    /// Whether a call with `argcount` arguments could dispatch to this
    /// signature, per `spec.md` §4.9's arity-compatibility rule.
    #[must_use]
    pub fn accepts(&self, argcount: usize) -> bool {
        match self.varargs {
            ArityKind::None => argcount == self.arity as usize,
            ArityKind::Unnamed | ArityKind::Named => argcount >= self.arity as usize,
        }
    }
}

#[derive(Debug, Clone)]
struct LocalVar {
    name: String,
    depth: u32,
    /// False between a `let`/`const` binding's slot being reserved and its
    /// initializer finishing evaluation, so `let x = x;` cannot read its own
    /// uninitialized slot (`spec.md` §4.4's "no self-referential initializer").
    initialized: bool,
    captured: bool,
    /// `Some` only for a slot introduced by a named `fn` declaration — lets
    /// [`Resolver::resolve_local_call`] pick the right overload by arity
    /// instead of always binding to the most recently declared same-named
    /// local.
    signature: Option<Signature>,
}

/// One entry in a function's upvalue list: either a direct capture of a
/// local in the immediately enclosing function, or a capture of one of that
/// function's own upvalues (chaining through multiple nesting levels).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpvalueDesc {
    pub index: u16,
    pub is_local: bool,
}

struct FunctionScope {
    locals: Vec<LocalVar>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: u32,
}

impl FunctionScope {
    fn new() -> Self {
        Self { locals: Vec::new(), upvalues: Vec::new(), scope_depth: 0 }
    }
}

pub struct Resolver {
    functions: Vec<FunctionScope>,
    globals: AHashMap<String, u16>,
    /// Extra signatures for a global name beyond its primary slot in
    /// `globals`, keyed by that name. A global with no entry here has at
    /// most one declared shape, so ordinary `global_slot` lookups suffice;
    /// an entry appears only once a second distinct signature is declared
    /// for the same name (`spec.md` §4.4's function overload rule, applied
    /// at global scope).
    global_overloads: AHashMap<String, Vec<(Signature, u16)>>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    #[must_use]
    pub fn new() -> Self {
        Self { functions: vec![FunctionScope::new()], globals: AHashMap::default(), global_overloads: AHashMap::default() }
    }

    /// Starts resolution with a name→slot table already populated —
    /// `engine.rs` seeds this with the globals a previous `compile` call (or
    /// native-function installation) already assigned, so a name the host
    /// has seen before keeps its slot instead of being renumbered from zero
    /// in every separate compile unit.
    #[must_use]
    pub fn with_globals(globals: AHashMap<String, u16>) -> Self {
        Self { functions: vec![FunctionScope::new()], globals, global_overloads: AHashMap::default() }
    }

    /// Hands back the name→slot table, grown by whatever new top-level names
    /// this compile unit introduced, so the caller can carry it into the next
    /// one.
    #[must_use]
    pub fn into_globals(self) -> AHashMap<String, u16> {
        self.globals
    }

    /// Returns the slot a top-level name is bound to, assigning a fresh one
    /// the first time it is declared. Later declarations of the same name
    /// (shadowing at the global scope) reuse the slot, matching `SET_GLOBAL`
    /// being the only opcode both declaration and assignment lower to.
    pub fn global_slot(&mut self, name: &str) -> u16 {
        let next = self.globals.len() as u16;
        *self.globals.entry(name.to_string()).or_insert(next)
    }

    /// Registers a global `fn` declaration under `sig`, returning its slot.
    /// The first signature seen for `name` reuses its ordinary
    /// [`Resolver::global_slot`]; each later *distinct* signature gets a
    /// fresh slot of its own, recorded under a synthetic disambiguating key
    /// in `globals` purely so `globals.len()` — which `engine.rs` uses to
    /// size the VM's global-value array — still equals the true slot count.
    pub fn declare_global_function(&mut self, name: &str, sig: Signature) -> u16 {
        let primary = self.global_slot(name);
        if let Some(existing) =
            self.global_overloads.get(name).and_then(|v| v.iter().find(|(s, _)| *s == sig).map(|(_, slot)| *slot))
        {
            return existing;
        }
        let count = self.global_overloads.get(name).map_or(0, Vec::len);
        let slot = if count == 0 {
            primary
        } else {
            let new_slot = self.globals.len() as u16;
            self.globals.insert(format!("{name}#{count}"), new_slot);
            new_slot
        };
        self.global_overloads.entry(name.to_string()).or_default().push((sig, slot));
        slot
    }

    /// Looks up the slot a call to global `name` with `argcount` arguments
    /// should dispatch to, preferring an exact arity match over a
    /// varargs-absorbing one. Returns `None` when `name` has no more than
    /// one declared signature — the caller should fall back to the plain
    /// [`Resolver::global_slot`] in that case.
    #[must_use]
    pub fn resolve_global_call(&self, name: &str, argcount: usize) -> Option<u16> {
        let overloads = self.global_overloads.get(name)?;
        let mut fallback = None;
        for (sig, slot) in overloads {
            if sig.arity as usize == argcount {
                return Some(*slot);
            }
            if fallback.is_none() && sig.accepts(argcount) {
                fallback = Some(*slot);
            }
        }
        fallback
    }

    /// Looks up the local slot a call to `name` with `argcount` arguments
    /// should dispatch to among signatured locals in the current function,
    /// searching newest-to-oldest. Returns `None` if `name` names no
    /// signatured local at all (an ordinary variable, or no binding),
    /// leaving the caller to fall back to [`Resolver::resolve`].
    pub fn resolve_local_call(&mut self, name: &str, argcount: usize) -> Option<u16> {
        let func = self.functions.last().unwrap();
        let mut fallback = None;
        for (i, local) in func.locals.iter().enumerate().rev() {
            if local.name != name || !local.initialized {
                continue;
            }
            let Some(sig) = local.signature else { continue };
            if sig.arity as usize == argcount {
                return Some(i as u16);
            }
            if fallback.is_none() && sig.accepts(argcount) {
                fallback = Some(i as u16);
            }
        }
        fallback
    }

    /// True only at the true top level: the outermost function scope at
    /// block depth zero (`spec.md` §4.4's global-vs-local rule).
    #[must_use]
    pub fn at_global_scope(&self) -> bool {
        self.functions.len() == 1 && self.functions[0].scope_depth == 0
    }

    pub fn push_function(&mut self) {
        self.functions.push(FunctionScope::new());
    }

    /// Pops the innermost function scope, returning its captured-upvalue
    /// descriptor list for the compiler's `OP_CLOSURE` operand emission.
    pub fn pop_function(&mut self) -> Vec<UpvalueDesc> {
        self.functions.pop().expect("unbalanced function scope").upvalues
    }

    pub fn push_scope(&mut self) {
        self.current().scope_depth += 1;
    }

    /// Pops the innermost block scope, returning the locals that leave
    /// scope in declaration order (for `OP_POP`/`OP_CLOSE_UPVALUE` emission
    /// — a local with `captured == true` needs the latter).
    pub fn pop_scope(&mut self) -> Vec<(u16, bool)> {
        let func = self.current();
        func.scope_depth -= 1;
        let depth = func.scope_depth;
        let mut popped = Vec::new();
        while let Some(local) = func.locals.last() {
            if local.depth <= depth {
                break;
            }
            let local = func.locals.pop().unwrap();
            popped.push((0, local.captured));
        }
        let base = func.locals.len() as u16;
        for (i, (slot, _)) in popped.iter_mut().enumerate() {
            *slot = base + (popped.len() - 1 - i) as u16;
        }
        popped
    }

    /// Reserves a local slot for `name` at the current depth; returns its
    /// slot index. Not yet readable until [`Resolver::mark_initialized`].
    pub fn declare_local(&mut self, name: &str) -> u16 {
        let func = self.current();
        let depth = func.scope_depth;
        let slot = func.locals.len() as u16;
        func.locals.push(LocalVar { name: name.to_string(), depth, initialized: false, captured: false, signature: None });
        slot
    }

    /// Reserves a local slot for a named `fn` declaration at the current
    /// depth, tagging it with `sig` so [`Resolver::resolve_local_call`] can
    /// pick this overload over a same-named sibling by arity. Always
    /// allocates a fresh slot — multiple signatures of the same name coexist
    /// in one scope per `spec.md` §4.4's function overload rule, found by
    /// search order rather than collapsed into one binding.
    pub fn declare_local_function(&mut self, name: &str, sig: Signature) -> u16 {
        let func = self.current();
        let depth = func.scope_depth;
        let slot = func.locals.len() as u16;
        func.locals.push(LocalVar { name: name.to_string(), depth, initialized: true, captured: false, signature: Some(sig) });
        slot
    }

    pub fn mark_initialized(&mut self) {
        if let Some(local) = self.current().locals.last_mut() {
            local.initialized = true;
        }
    }

    #[must_use]
    pub fn in_function_scope(&self) -> bool {
        self.current().scope_depth > 0 || self.functions.len() > 1
    }

    /// Resolves `name`, searching the current function's locals, then
    /// walking outward capturing upvalues, then falling back to global —
    /// and if no declaration is visible anywhere, `Undefined`
    /// (`spec.md` §4.4 `resolve` step 3). Top-level `fn`/`class`/`enum`/
    /// `module` names are pre-declared into `globals` by the compiler's
    /// hoisting pass before any statement body is resolved, so a forward
    /// reference between two such declarations still resolves to `Global`
    /// here; only a name with no declaration anywhere becomes `Undefined`.
    pub fn resolve(&mut self, name: &str) -> Binding {
        if let Some(slot) = Self::resolve_local(self.functions.last().unwrap(), name) {
            return Binding::Local(slot);
        }
        if let Some(index) = self.resolve_upvalue(self.functions.len() - 1, name) {
            return Binding::Upvalue(index);
        }
        if self.globals.contains_key(name) {
            Binding::Global
        } else {
            Binding::Undefined
        }
    }

    fn resolve_local(func: &FunctionScope, name: &str) -> Option<u16> {
        func.locals.iter().enumerate().rev().find(|(_, l)| l.name == name && l.initialized).map(|(i, _)| i as u16)
    }

    /// Classic recursive upvalue resolution: capture a local directly from
    /// the parent if present there, otherwise recurse into the parent's own
    /// upvalues, adding one descriptor per level so inner closures reuse the
    /// outer closure's already-captured upvalue instead of re-walking the
    /// whole chain at runtime.
    fn resolve_upvalue(&mut self, func_index: usize, name: &str) -> Option<u16> {
        if func_index == 0 {
            return None;
        }
        let parent_index = func_index - 1;
        if let Some(local_slot) = Self::resolve_local(&self.functions[parent_index], name) {
            self.functions[parent_index].locals[local_slot as usize].captured = true;
            return Some(self.add_upvalue(func_index, local_slot, true));
        }
        if let Some(upvalue_index) = self.resolve_upvalue(parent_index, name) {
            return Some(self.add_upvalue(func_index, upvalue_index, false));
        }
        None
    }

    fn add_upvalue(&mut self, func_index: usize, index: u16, is_local: bool) -> u16 {
        let func = &mut self.functions[func_index];
        if let Some(pos) = func.upvalues.iter().position(|u| u.index == index && u.is_local == is_local) {
            return pos as u16;
        }
        func.upvalues.push(UpvalueDesc { index, is_local });
        (func.upvalues.len() - 1) as u16
    }

    fn current(&mut self) -> &mut FunctionScope {
        self.functions.last_mut().expect("resolver has no active function scope")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_local_in_same_scope() {
        let mut r = Resolver::new();
        r.declare_local("x");
        r.mark_initialized();
        assert_eq!(r.resolve("x"), Binding::Local(0));
    }

    #[test]
    fn resolves_a_declared_global() {
        let mut r = Resolver::new();
        r.global_slot("counter");
        assert_eq!(r.resolve("counter"), Binding::Global);
    }

    #[test]
    fn reports_undefined_for_an_unknown_name() {
        let mut r = Resolver::new();
        assert_eq!(r.resolve("missing"), Binding::Undefined);
    }

    #[test]
    fn local_call_prefers_the_overload_matching_argcount() {
        let mut r = Resolver::new();
        let one_arg = r.declare_local_function("f", Signature { arity: 1, varargs: ArityKind::None });
        let two_arg = r.declare_local_function("f", Signature { arity: 2, varargs: ArityKind::None });
        assert_eq!(r.resolve_local_call("f", 1), Some(one_arg));
        assert_eq!(r.resolve_local_call("f", 2), Some(two_arg));
        assert_eq!(r.resolve_local_call("f", 3), None);
    }

    #[test]
    fn global_call_prefers_the_overload_matching_argcount() {
        let mut r = Resolver::new();
        let one_arg = r.declare_global_function("g", Signature { arity: 1, varargs: ArityKind::None });
        let two_arg = r.declare_global_function("g", Signature { arity: 2, varargs: ArityKind::None });
        assert_ne!(one_arg, two_arg);
        assert_eq!(r.resolve_global_call("g", 1), Some(one_arg));
        assert_eq!(r.resolve_global_call("g", 2), Some(two_arg));
    }

    #[test]
    fn redeclaring_a_global_with_the_same_signature_reuses_its_slot() {
        let mut r = Resolver::new();
        let first = r.declare_global_function("h", Signature { arity: 0, varargs: ArityKind::None });
        let second = r.declare_global_function("h", Signature { arity: 0, varargs: ArityKind::None });
        assert_eq!(first, second);
    }

    #[test]
    fn captures_enclosing_local_as_upvalue() {
        let mut r = Resolver::new();
        r.declare_local("counter");
        r.mark_initialized();
        r.push_function();
        let binding = r.resolve("counter");
        assert_eq!(binding, Binding::Upvalue(0));
        let upvalues = r.pop_function();
        assert_eq!(upvalues, vec![UpvalueDesc { index: 0, is_local: true }]);
    }

    #[test]
    fn chains_upvalue_through_two_nested_functions() {
        let mut r = Resolver::new();
        r.declare_local("shared");
        r.mark_initialized();
        r.push_function();
        r.push_function();
        assert_eq!(r.resolve("shared"), Binding::Upvalue(0));
        let inner_upvalues = r.pop_function();
        assert_eq!(inner_upvalues, vec![UpvalueDesc { index: 0, is_local: false }]);
        let outer_upvalues = r.pop_function();
        assert_eq!(outer_upvalues, vec![UpvalueDesc { index: 0, is_local: true }]);
    }

    #[test]
    fn pop_scope_reports_slots_and_capture_flags() {
        let mut r = Resolver::new();
        r.push_scope();
        r.declare_local("a");
        r.mark_initialized();
        r.declare_local("b");
        r.mark_initialized();
        let popped = r.pop_scope();
        assert_eq!(popped.len(), 2);
        assert!(popped.iter().all(|(_, captured)| !captured));
    }
}
