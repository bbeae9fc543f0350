//! Index/property access, `CLASS`/`MODULE` construction, `GET_BASE` —
//! `spec.md` §4.5/§4.9.
//!
//! Grounded on `ouros::bytecode::vm::{attr, collections}`'s container-access
//! shape, generalized to this language's class/module/struct kinds and to
//! the compiler's `CLASS`/`MODULE` stack protocol documented in
//! `bytecode/compiler.rs`.

use super::{OpResult, Vm};
use crate::diagnostics::DiagnosticSink;
use crate::types::{Class, DictKey, LwArray, LwDict, LwStruct, Module, Object};
use crate::value::Value;

/// What a field/method lookup on a struct/class/module found, so the
/// borrow of `self.heap` can end before a method value is bound to its
/// receiver (which needs `&mut self` to allocate the `BoundMethod`).
enum Found {
    Value(Value),
    Method(Value),
    SearchParents,
}

impl<'a, S: DiagnosticSink> Vm<'a, S> {
    pub(super) fn build_array(&mut self, n: usize) -> OpResult<()> {
        let source = self.current_source();
        let mut elements = vec![Value::Null; n];
        for i in (0..n).rev() {
            elements[i] = self.pop();
        }
        let id = self.alloc(Object::Array(LwArray { elements }));
        self.push(Value::Object(id), source)
    }

    pub(super) fn build_dict(&mut self, n: usize) -> OpResult<()> {
        let source = self.current_source();
        let mut pairs = Vec::with_capacity(n);
        for _ in 0..n {
            let value = self.pop();
            let key = self.pop();
            pairs.push((key, value));
        }
        pairs.reverse();
        let mut entries = indexmap::IndexMap::default();
        for (key, value) in pairs {
            entries.insert(DictKey::from_value(key), value);
        }
        let id = self.alloc(Object::Dict(LwDict { entries }));
        self.push(Value::Object(id), source)
    }

    pub(super) fn build_struct(&mut self, n: usize) -> OpResult<()> {
        let source = self.current_source();
        let mut pairs = Vec::with_capacity(n);
        for _ in 0..n {
            let value = self.pop();
            let name_value = self.pop();
            let name = self.value_as_string(name_value);
            pairs.push((name, value));
        }
        pairs.reverse();
        let mut fields = indexmap::IndexMap::default();
        for (name, value) in pairs {
            fields.insert(name, value);
        }
        let id = self.alloc(Object::Struct(LwStruct { fields }));
        self.push(Value::Object(id), source)
    }

    fn value_as_string(&self, value: Value) -> String {
        match value {
            Value::Object(id) => match self.heap.get(id) {
                Object::String(s) => s.value.clone(),
                other => other.to_display_string(),
            },
            other => other.to_string(),
        }
    }

    fn normalize_index(len: usize, index: i64) -> Option<usize> {
        let resolved = if index < 0 { index + len as i64 } else { index };
        if resolved < 0 || resolved as usize >= len { None } else { Some(resolved as usize) }
    }

    pub(super) fn get_index(&mut self) -> OpResult<()> {
        let index = self.pop();
        let container = self.pop();
        let source = self.current_source();
        let Value::Object(id) = container else {
            return Err(self.fatal(format!("cannot index a {}", container.type_name()), source));
        };
        let result = match self.heap.get(id) {
            Object::Array(a) => {
                let Value::Int(i) = index else {
                    return Err(self.fatal("array index must be an int", source));
                };
                match Self::normalize_index(a.elements.len(), i) {
                    Some(pos) => a.elements[pos],
                    None => return Err(self.fatal("array index out of range", source)),
                }
            }
            Object::String(s) => {
                let Value::Int(i) = index else {
                    return Err(self.fatal("string index must be an int", source));
                };
                let chars: Vec<char> = s.value.chars().collect();
                match Self::normalize_index(chars.len(), i) {
                    Some(pos) => {
                        let ch = chars[pos];
                        let id = self.alloc(Object::String(crate::types::LwString::new(ch.to_string())));
                        Value::Object(id)
                    }
                    None => return Err(self.fatal("string index out of range", source)),
                }
            }
            Object::Dict(d) => {
                let key = DictKey::from_value(index);
                d.entries.get(&key).copied().unwrap_or(Value::Null)
            }
            other => return Err(self.fatal(format!("cannot index a {}", other.kind_name()), source)),
        };
        self.push(result, source)
    }

    pub(super) fn set_index(&mut self) -> OpResult<()> {
        let index = self.pop();
        let container = self.pop();
        let value = self.peek(0);
        let source = self.current_source();
        let Value::Object(id) = container else {
            return Err(self.fatal(format!("cannot index a {}", container.type_name()), source));
        };
        match self.heap.get_mut(id) {
            Object::Array(a) => {
                let Value::Int(i) = index else {
                    return Err(self.fatal("array index must be an int", source));
                };
                let len = a.elements.len();
                match Self::normalize_index(len, i) {
                    Some(pos) => a.elements[pos] = value,
                    None => return Err(self.fatal("array index out of range", source)),
                }
            }
            Object::Dict(d) => {
                d.entries.insert(DictKey::from_value(index), value);
            }
            other => return Err(self.fatal(format!("cannot assign through an index into a {}", other.kind_name()), source)),
        }
        Ok(())
    }

    /// `GET_PROPERTY nameIdx`: struct field, class instance field/constant
    /// (methods become bound methods), or module export.
    pub(super) fn get_property(&mut self, name_idx: u16) -> OpResult<()> {
        let name_value = self.load_constant(name_idx);
        let name = self.value_as_string(name_value);
        let receiver = self.pop();
        let source = self.current_source();
        let Value::Object(id) = receiver else {
            return Err(self.fatal(format!("cannot access property '{name}' on a {}", receiver.type_name()), source));
        };
        let found = match self.heap.get(id) {
            Object::Struct(s) => Found::Value(s.fields.get(&name).copied().unwrap_or(Value::Null)),
            Object::Module(m) => Found::Value(m.bindings.get(&name).copied().unwrap_or(Value::Null)),
            Object::Class(c) => {
                if let Some(v) = c.fields.get(&name) {
                    Found::Value(*v)
                } else if let Some(v) = c.constants.get(&name) {
                    Found::Method(*v)
                } else {
                    Found::SearchParents
                }
            }
            other => return Err(self.fatal(format!("cannot access property '{name}' on a {}", other.kind_name()), source)),
        };
        let result = match found {
            Found::Value(v) => v,
            Found::Method(closure) => self.bind_method(closure, receiver),
            Found::SearchParents => match self.lookup_in_parents(id, &name) {
                Some(v) => v,
                None => return Err(self.fatal(format!("undefined property '{name}'"), source)),
            },
        };
        self.push(result, source)
    }

    /// Method values found via `constants` are plain closures; binding packs
    /// them with `receiver` so a later `CALL` sees `this` already set.
    fn bind_method(&mut self, value: Value, receiver: Value) -> Value {
        match value {
            Value::Object(id) if matches!(self.heap.get(id), Object::Closure(_)) => {
                let bound = self.alloc(Object::BoundMethod(crate::types::BoundMethod { receiver, closure: id }));
                Value::Object(bound)
            }
            other => other,
        }
    }

    /// Walks `self`'s parent chain in declared order (`spec.md` §4.5/§4.9),
    /// looking for `name` among fields, then constants (binding methods to
    /// `receiver`, not to the parent template).
    fn lookup_in_parents(&mut self, receiver_id: crate::heap::HeapId, name: &str) -> Option<Value> {
        let parents = match self.heap.get(receiver_id) {
            Object::Class(c) => c.parents.clone(),
            _ => return None,
        };
        let receiver = Value::Object(receiver_id);
        for parent_id in parents {
            let direct = match self.heap.get(parent_id) {
                Object::Class(parent) => {
                    if let Some(v) = parent.fields.get(name) {
                        Some(Found::Value(*v))
                    } else {
                        parent.constants.get(name).map(|v| Found::Method(*v))
                    }
                }
                _ => None,
            };
            match direct {
                Some(Found::Value(v)) => return Some(v),
                Some(Found::Method(closure)) => return Some(self.bind_method(closure, receiver)),
                None => {}
            }
            if let Some(v) = self.lookup_in_parents(parent_id, name) {
                return Some(v);
            }
        }
        None
    }

    pub(super) fn set_property(&mut self, name_idx: u16) -> OpResult<()> {
        let name_value = self.load_constant(name_idx);
        let name = self.value_as_string(name_value);
        let receiver = self.pop();
        let value = self.peek(0);
        let source = self.current_source();
        let Value::Object(id) = receiver else {
            return Err(self.fatal(format!("cannot assign property '{name}' on a {}", receiver.type_name()), source));
        };
        match self.heap.get_mut(id) {
            Object::Struct(s) => {
                s.fields.insert(name, value);
            }
            Object::Class(c) => {
                c.fields.insert(name, value);
            }
            other => return Err(self.fatal(format!("cannot assign property '{name}' on a {}", other.kind_name()), source)),
        }
        Ok(())
    }

    /// `GET_BASE`: `this` is already on the stack (pushed by
    /// `bytecode/compiler.rs`'s `base.x` lowering); resolves `x` in the
    /// parent chain only, then binds any method found to `this`.
    pub(super) fn get_base(&mut self) -> OpResult<()> {
        let name_value = self.pop();
        let name = self.value_as_string(name_value);
        let this = self.pop();
        let source = self.current_source();
        let Value::Object(id) = this else {
            return Err(self.fatal("'base' used outside a method", source));
        };
        match self.lookup_in_parents(id, &name) {
            Some(v) => self.push(v, source),
            None => Err(self.fatal(format!("undefined base property '{name}'"), source)),
        }
    }

    /// `CLASS ctor_count var_count const_count parent_count`. Consumes (top
    /// to bottom): `parent_count` parent class values, `var_count`
    /// `(name, value)` field pairs, `ctor_count` `(arity, closure)`
    /// constructor pairs, `const_count` `(name, value)` constant pairs, then
    /// the class's own name — `bytecode/compiler.rs` pushes them in the
    /// mirror order, bottom to top.
    pub(super) fn build_class(&mut self, ctor_count: u8, var_count: u8, const_count: u8, parent_count: u8) -> OpResult<()> {
        let source = self.current_source();
        let mut parents = Vec::with_capacity(parent_count as usize);
        for _ in 0..parent_count {
            let v = self.pop();
            if let Value::Object(id) = v {
                parents.push(id);
            }
        }
        parents.reverse();
        let mut fields = ahash::AHashMap::default();
        for _ in 0..var_count {
            let value = self.pop();
            let name = self.value_as_string(self.pop());
            fields.insert(name, value);
        }
        let mut constructors = ahash::AHashMap::default();
        for _ in 0..ctor_count {
            let value = self.pop();
            let Value::Int(arity) = self.pop() else {
                return Err(self.fatal("malformed constructor entry", source));
            };
            if let Value::Object(id) = value {
                constructors.insert(arity as u8, id);
            }
        }
        let mut constants = ahash::AHashMap::default();
        for _ in 0..const_count {
            let value = self.pop();
            let name = self.value_as_string(self.pop());
            constants.insert(name, value);
        }
        let name = self.value_as_string(self.pop());
        let class = Class { name, parents, constructors, constants, fields, is_instance: false };
        let id = self.alloc(Object::Class(class));
        self.push(Value::Object(id), source)
    }

    /// `MODULE var_count const_count`, same shape as [`Self::build_class`]
    /// minus the parent list.
    pub(super) fn build_module(&mut self, var_count: u8, const_count: u8) -> OpResult<()> {
        let source = self.current_source();
        let mut bindings = ahash::AHashMap::default();
        for _ in 0..var_count {
            let value = self.pop();
            let name = self.value_as_string(self.pop());
            bindings.insert(name, value);
        }
        for _ in 0..const_count {
            let value = self.pop();
            let name = self.value_as_string(self.pop());
            bindings.insert(name, value);
        }
        let name = self.value_as_string(self.pop());
        let module = Module { name, bindings };
        let id = self.alloc(Object::Module(module));
        self.push(Value::Object(id), source)
    }
}
