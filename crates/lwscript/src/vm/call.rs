//! Call/return, arity/varargs discipline, class instantiation, bound
//! methods, upvalue open/close, and reference creation — `spec.md` §4.9.
//!
//! Grounded on `ouros::bytecode::vm::call`'s callee-kind dispatch shape
//! (peek the callee below the argument window, branch on its heap tag),
//! generalized to this language's four callable kinds (native function,
//! closure, bound method, class-as-constructor) and its explicit upvalue
//! open/close machinery, which the teacher's refcounted Python values don't
//! need an equivalent of.

use super::{CallFrame, OpResult, Vm};
use crate::diagnostics::DiagnosticSink;
use crate::heap::HeapId;
use crate::token::Source;
use crate::types::function::{ArityKind, Closure, NativeFunction, Upvalue};
use crate::types::{Class, LwArray, Object, Slot};
use crate::value::Value;

enum CalleeKind {
    Native(NativeFunction),
    Closure,
    BoundMethod(Value, HeapId),
    Class,
}

impl<'a, S: DiagnosticSink> Vm<'a, S> {
    fn classify_callee(&self, id: HeapId) -> Option<CalleeKind> {
        match self.heap.get(id) {
            Object::Native(n) => Some(CalleeKind::Native(*n)),
            Object::Closure(_) => Some(CalleeKind::Closure),
            Object::BoundMethod(b) => Some(CalleeKind::BoundMethod(b.receiver, b.closure)),
            Object::Class(_) => Some(CalleeKind::Class),
            _ => None,
        }
    }

    /// `CALL argc`: the callee sits `argc` slots below the top of the
    /// argument window (`spec.md` §4.9).
    pub(super) fn call(&mut self, argc: u8) -> OpResult<()> {
        let argc = argc as usize;
        let source = self.current_source();
        let callee_slot = self.stack.len() - argc - 1;
        let callee = self.stack[callee_slot];
        let Value::Object(id) = callee else {
            return Err(self.fatal(format!("cannot call a {}", callee.type_name()), source));
        };
        match self.classify_callee(id) {
            Some(CalleeKind::Native(nf)) => self.call_native(nf, callee_slot, argc, source),
            Some(CalleeKind::Closure) => self.enter_closure_frame(id, callee_slot, argc, false, None, source),
            Some(CalleeKind::BoundMethod(receiver, closure_id)) => {
                self.stack[callee_slot] = receiver;
                self.enter_closure_frame(closure_id, callee_slot, argc, true, None, source)
            }
            Some(CalleeKind::Class) => self.instantiate(id, callee_slot, argc, source),
            None => Err(self.fatal(format!("cannot call a {}", self.heap.get(id).kind_name()), source)),
        }
    }

    fn call_native(&mut self, nf: NativeFunction, callee_slot: usize, argc: usize, source: Source) -> OpResult<()> {
        let args: Vec<Value> = self.stack[callee_slot + 1..].to_vec();
        let mut result = Value::Null;
        let produced = (nf.func)(&args, source, &mut self.heap, &mut *self.sink, &mut result);
        self.stack.truncate(callee_slot);
        if self.sink.has_errors() {
            return Err(super::RuntimeAbort);
        }
        self.push(if produced { result } else { Value::Null }, source)
    }

    /// Pushes a new frame for `closure_id` over the `argc` arguments already
    /// sitting above `callee_slot`. `has_receiver` is true when slot 0 of the
    /// new frame is `this` (bound methods, constructors) rather than the
    /// first positional parameter.
    fn enter_closure_frame(
        &mut self,
        closure_id: HeapId,
        callee_slot: usize,
        argc: usize,
        has_receiver: bool,
        return_override: Option<Value>,
        source: Source,
    ) -> OpResult<()> {
        let function_id = match self.heap.get(closure_id) {
            Object::Closure(c) => c.function,
            _ => unreachable!("call target is not a closure"),
        };
        let (arity, arity_kind) = match self.heap.get(function_id) {
            Object::Function(f) => (f.arity, f.arity_kind),
            _ => unreachable!("closure points at a non-function"),
        };
        let args_start = callee_slot + 1;
        self.prepare_args(args_start, argc, arity, arity_kind, source)?;
        if self.frames.len() >= self.max_frames {
            return Err(self.fatal("call stack overflow", source));
        }
        let slots_base = if has_receiver { callee_slot } else { args_start };
        self.frames.push(CallFrame { closure: closure_id, ip: 0, slots_base, call_base: callee_slot, return_override });
        Ok(())
    }

    /// Adjusts the `argc` values at `stack[args_start..]` into exactly the
    /// local-slot layout `arity_kind` calls for (`spec.md` §4.9's call
    /// table): `None` needs an exact match, `Unnamed` discards surplus,
    /// `Named` packs surplus into a trailing array bound to the varargs
    /// parameter.
    fn prepare_args(&mut self, args_start: usize, argc: usize, arity: u8, arity_kind: ArityKind, source: Source) -> OpResult<()> {
        let arity = arity as usize;
        match arity_kind {
            ArityKind::None => {
                if argc != arity {
                    return Err(self.fatal(format!("expected {arity} argument(s), got {argc}"), source));
                }
            }
            ArityKind::Unnamed => {
                if argc < arity {
                    return Err(self.fatal(format!("expected at least {arity} argument(s), got {argc}"), source));
                }
                self.stack.truncate(args_start + arity);
            }
            ArityKind::Named => {
                if argc < arity {
                    return Err(self.fatal(format!("expected at least {arity} argument(s), got {argc}"), source));
                }
                let rest: Vec<Value> = self.stack[args_start + arity..].to_vec();
                self.stack.truncate(args_start + arity);
                let id = self.alloc(Object::Array(LwArray { elements: rest }));
                self.stack.push(Value::Object(id));
            }
        }
        Ok(())
    }

    /// `RETURN n`: packs the top `n` values into the call's single result
    /// (a raw value when `n <= 1`, a freshly built array when `n > 1`, per
    /// `bytecode/compiler.rs`'s aggregate-return lowering), closes upvalues
    /// captured from this frame, and restores the caller's stack. Returns
    /// `Some` only when the returning frame was the outermost one.
    pub(super) fn do_return(&mut self, n: u8) -> OpResult<Option<Value>> {
        let n = n as usize;
        let mut values = Vec::with_capacity(n);
        for _ in 0..n {
            values.push(self.pop());
        }
        values.reverse();
        let result = if n <= 1 {
            values.into_iter().next().unwrap_or(Value::Null)
        } else {
            let id = self.alloc(Object::Array(LwArray { elements: values }));
            Value::Object(id)
        };
        let frame = self.frames.pop().expect("return with no active frame");
        self.close_upvalues_from(frame.slots_base);
        self.stack.truncate(frame.call_base);
        let final_value = frame.return_override.unwrap_or(result);
        if self.frames.is_empty() {
            return Ok(Some(final_value));
        }
        let source = self.current_source();
        self.push(final_value, source)?;
        Ok(None)
    }

    /// `new X(...)` lowers to two `CALL`s against the same class value
    /// (`bytecode/compiler.rs`'s `compile_new`): a `CALL 0` to materialize
    /// the instance, then a `CALL argc` against that same instance to run
    /// its constructor. `Class::is_instance` tells the two calls apart —
    /// only a template (`is_instance == false`) gets cloned into a fresh
    /// instance here; a `CALL` on an already-instantiated object just runs
    /// its matching constructor in place (or, with none, is a no-op that
    /// returns the receiver unchanged). Without this check a zero-arg
    /// constructor would run twice: once for each `CALL`.
    fn instantiate(&mut self, target_id: HeapId, callee_slot: usize, argc: usize, source: Source) -> OpResult<()> {
        let is_instance = match self.heap.get(target_id) {
            Object::Class(c) => c.is_instance,
            _ => unreachable!("instantiate called on a non-class object"),
        };
        let (instance_value, constructors) = if is_instance {
            let constructors = match self.heap.get(target_id) {
                Object::Class(c) => c.constructors.clone(),
                _ => unreachable!(),
            };
            (Value::Object(target_id), constructors)
        } else {
            let (name, parents, constants, fields, constructors) = match self.heap.get(target_id) {
                Object::Class(c) => (c.name.clone(), c.parents.clone(), c.constants.clone(), c.fields.clone(), c.constructors.clone()),
                _ => unreachable!(),
            };
            let instance = Class { name, parents, constructors: constructors.clone(), constants, fields, is_instance: true };
            let instance_id = self.alloc(Object::Class(instance));
            (Value::Object(instance_id), constructors)
        };
        let ctor = constructors.get(&(argc.min(255) as u8)).copied();
        match ctor {
            Some(ctor_closure) => {
                self.stack[callee_slot] = instance_value;
                self.enter_closure_frame(ctor_closure, callee_slot, argc, true, Some(instance_value), source)
            }
            None => {
                self.stack.truncate(callee_slot);
                self.push(instance_value, source)
            }
        }
    }

    /// Closes every open upvalue pointing at or above `stack_index`
    /// (`spec.md` §3 invariant: a captured local outlives its frame).
    /// `open_upvalues` is kept sorted by descending `stack_index`, so the
    /// upvalues to close are always a prefix.
    pub(super) fn close_upvalues_from(&mut self, stack_index: usize) {
        let mut cut = 0;
        for &id in &self.open_upvalues {
            let idx = match self.heap.get(id) {
                Object::Upvalue(Upvalue::Open { stack_index }) => *stack_index,
                _ => break,
            };
            if idx < stack_index {
                break;
            }
            cut += 1;
        }
        for &id in &self.open_upvalues[..cut] {
            let idx = match self.heap.get(id) {
                Object::Upvalue(Upvalue::Open { stack_index }) => *stack_index,
                _ => unreachable!(),
            };
            let value = self.stack[idx];
            if let Object::Upvalue(u) = self.heap.get_mut(id) {
                *u = Upvalue::Closed(value);
            }
        }
        self.open_upvalues.drain(..cut);
    }

    /// Returns the open upvalue cell for `stack_index`, reusing one already
    /// open at that address or opening a fresh one, inserted to keep
    /// `open_upvalues` sorted by descending `stack_index`.
    fn find_or_create_upvalue(&mut self, stack_index: usize) -> HeapId {
        for &id in &self.open_upvalues {
            if let Object::Upvalue(Upvalue::Open { stack_index: idx }) = self.heap.get(id) {
                if *idx == stack_index {
                    return id;
                }
            }
        }
        let id = self.alloc(Object::Upvalue(Upvalue::Open { stack_index }));
        let pos = self
            .open_upvalues
            .iter()
            .position(|&existing| match self.heap.get(existing) {
                Object::Upvalue(Upvalue::Open { stack_index: idx }) => *idx < stack_index,
                _ => false,
            })
            .unwrap_or(self.open_upvalues.len());
        self.open_upvalues.insert(pos, id);
        id
    }

    /// `CLOSURE`: builds a closure over the function constant, capturing
    /// each listed upvalue either directly from the enclosing frame's
    /// locals (`is_local`) or by chaining through the enclosing closure's
    /// own upvalue list.
    pub(super) fn make_closure(&mut self) -> OpResult<()> {
        let const_idx = self.read_u16();
        let constant = self.current_chunk().constants[const_idx as usize].clone();
        let function_value = self.materialize_constant(constant);
        let Value::Object(function_id) = function_value else {
            unreachable!("CLOSURE constant must materialize to a function object")
        };
        let upvalue_count = self.read_u8();
        let frame_base = self.frames.last().unwrap().slots_base;
        let enclosing_closure = self.frames.last().unwrap().closure;
        let mut upvalues = Vec::with_capacity(upvalue_count as usize);
        for _ in 0..upvalue_count {
            let is_local = self.read_u8() != 0;
            let index = self.read_u16() as usize;
            let id = if is_local {
                self.find_or_create_upvalue(frame_base + index)
            } else {
                match self.heap.get(enclosing_closure) {
                    Object::Closure(c) => c.upvalues[index],
                    _ => unreachable!("enclosing frame's closure slot holds a non-closure object"),
                }
            };
            upvalues.push(id);
        }
        let id = self.alloc(Object::Closure(Closure { function: function_id, upvalues }));
        let source = self.current_source();
        self.push(Value::Object(id), source)
    }

    pub(super) fn write_upvalue(&mut self, idx: usize, value: Value) {
        let closure_id = self.frames.last().unwrap().closure;
        let uv_id = match self.heap.get(closure_id) {
            Object::Closure(c) => c.upvalues[idx],
            _ => unreachable!(),
        };
        match self.heap.get(uv_id) {
            Object::Upvalue(Upvalue::Open { stack_index }) => {
                self.stack[*stack_index] = value;
            }
            Object::Upvalue(Upvalue::Closed(_)) => {
                if let Object::Upvalue(u) = self.heap.get_mut(uv_id) {
                    *u = Upvalue::Closed(value);
                }
            }
            _ => unreachable!(),
        }
    }

    pub(super) fn read_upvalue(&mut self, idx: usize) -> Value {
        let closure_id = self.frames.last().unwrap().closure;
        let uv_id = match self.heap.get(closure_id) {
            Object::Closure(c) => c.upvalues[idx],
            _ => unreachable!(),
        };
        match self.heap.get(uv_id) {
            Object::Upvalue(Upvalue::Open { stack_index }) => self.stack[*stack_index],
            Object::Upvalue(Upvalue::Closed(v)) => *v,
            _ => unreachable!(),
        }
    }

    pub(super) fn make_reference(&mut self, slot: Slot) -> OpResult<()> {
        let id = self.alloc(Object::Reference(crate::types::Reference { slot }));
        let source = self.current_source();
        self.push(Value::Object(id), source)
    }

    /// `REF_LOCAL`: a referenced local is force-opened as an upvalue cell
    /// even when no closure captures it, so the reference keeps working
    /// after the declaring frame returns (`types/mod.rs`'s `Slot` doc
    /// comment).
    pub(super) fn ref_local(&mut self, abs_index: usize) -> OpResult<()> {
        let cell_id = self.find_or_create_upvalue(abs_index);
        self.make_reference(Slot::Cell(cell_id))
    }

    pub(super) fn ref_upvalue(&mut self, idx: usize) -> OpResult<()> {
        let closure_id = self.frames.last().unwrap().closure;
        let cell_id = match self.heap.get(closure_id) {
            Object::Closure(c) => c.upvalues[idx],
            _ => unreachable!(),
        };
        self.make_reference(Slot::Cell(cell_id))
    }

    pub(super) fn ref_index(&mut self) -> OpResult<()> {
        let index = self.pop();
        let container = self.pop();
        let source = self.current_source();
        let Value::Object(id) = container else {
            return Err(self.fatal(format!("cannot reference an index into a {}", container.type_name()), source));
        };
        let Value::Int(i) = index else {
            return Err(self.fatal("reference index must be an int", source));
        };
        let len = match self.heap.get(id) {
            Object::Array(a) => a.elements.len(),
            other => return Err(self.fatal(format!("cannot reference an index into a {}", other.kind_name()), source)),
        };
        let resolved = if i < 0 { i + len as i64 } else { i };
        if resolved < 0 || resolved as usize >= len {
            return Err(self.fatal("array index out of range", source));
        }
        self.make_reference(Slot::ArrayElement(id, resolved as usize))
    }
}
