//! Heap object variants — `spec.md` §3/§4.7.
//!
//! Grounded on `ouros::types::{class.rs, module.rs, dict.rs}`'s per-kind
//! struct shapes, collapsed into a discriminated `Object` enum per
//! `spec.md` §9's virtual-dispatch strategy ("a discriminated-union
//! `Object` with an explicit `kind` tag and per-kind `match` arms"). Every
//! variant needs `to_string`/`equals`/`clone`/`blacken` per `spec.md` §4.7;
//! `blacken` is implemented once, centrally, as [`trace_children`], since a
//! `match` arm listing each variant's outgoing `HeapId`s *is* the blacken
//! step the GC's gray worklist needs (`heap.rs`).

pub mod class;
pub mod function;

pub use class::{Class, EnumObj, Module};
pub use function::{ArityKind, BoundMethod, Closure, Function, NativeFn, NativeFunction, Upvalue};

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::heap::HeapId;
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct LwString {
    pub value: String,
}

impl LwString {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self { value: value.into() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LwArray {
    pub elements: Vec<Value>,
}

/// Insertion-ordered dict, per `spec.md` §3 ("dict is an ordered map") —
/// grounded on `ouros::types::dict.rs`'s use of `indexmap` for the same
/// reason (Python's `dict` preserves insertion order too).
#[derive(Debug, Clone, Default)]
pub struct LwDict {
    pub entries: IndexMap<DictKey, Value, ahash::RandomState>,
}

/// A hashable projection of [`Value`] for use as a dict key. Object keys
/// hash/compare by heap identity, matching the "values can serve as dict
/// keys" requirement of `spec.md` §4.7 without needing deep structural
/// hashing of arbitrary cyclic objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DictKey {
    Null,
    Bool(bool),
    Int(i64),
    /// `f64` bit pattern, so NaN-bearing floats still hash consistently.
    FloatBits(u64),
    Char(char),
    Object(HeapId),
}

impl DictKey {
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Null => DictKey::Null,
            Value::Bool(b) => DictKey::Bool(b),
            Value::Int(n) => DictKey::Int(n),
            Value::Float(f) => DictKey::FloatBits(f.to_bits()),
            Value::Char(c) => DictKey::Char(c),
            Value::Object(id) => DictKey::Object(id),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LwStruct {
    pub fields: IndexMap<String, Value, ahash::RandomState>,
}

/// Where a [`Reference`] value points, per `spec.md` §4.5's reference
/// lowering. A local binding is referenced through the same open-upvalue
/// cell machinery a closure capture uses, so the reference keeps working
/// after the frame that declared the local returns — there is no separate
/// "dangling local reference" case to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Global(u16),
    Cell(HeapId),
    ArrayElement(HeapId, usize),
}

#[derive(Debug, Clone, Copy)]
pub struct Reference {
    pub slot: Slot,
}

/// The heap object kinds of `spec.md` §3: string, array, dict, struct,
/// function, closure, upvalue, native function, class, bound method, enum,
/// module, reference.
#[derive(Debug, Clone)]
pub enum Object {
    String(LwString),
    Array(LwArray),
    Dict(LwDict),
    Struct(LwStruct),
    Function(Function),
    Closure(Closure),
    Upvalue(Upvalue),
    Native(NativeFunction),
    Class(Class),
    BoundMethod(BoundMethod),
    Enum(EnumObj),
    Module(Module),
    Reference(Reference),
}

impl Object {
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Object::String(_) => "string",
            Object::Array(_) => "array",
            Object::Dict(_) => "dict",
            Object::Struct(_) => "struct",
            Object::Function(_) => "function",
            Object::Closure(_) => "closure",
            Object::Upvalue(_) => "upvalue",
            Object::Native(_) => "native function",
            Object::Class(_) => "class",
            Object::BoundMethod(_) => "bound method",
            Object::Enum(_) => "enum",
            Object::Module(_) => "module",
            Object::Reference(_) => "reference",
        }
    }

    #[must_use]
    pub fn heap_child_count(&self) -> usize {
        trace_children(self).len()
    }

    #[must_use]
    pub fn to_display_string(&self) -> String {
        match self {
            Object::String(s) => s.value.clone(),
            Object::Array(a) => format!("[{}]", a.elements.iter().map(Value::to_string).collect::<Vec<_>>().join(",")),
            Object::Dict(d) => format!(
                "{{{}}}",
                d.entries.values().map(Value::to_string).collect::<Vec<_>>().join(",")
            ),
            Object::Struct(s) => format!(
                "struct{{{}}}",
                s.fields.iter().map(|(k, v)| format!("{k}: {v}")).collect::<Vec<_>>().join(", ")
            ),
            Object::Function(f) => format!("<fn {}>", f.name),
            Object::Closure(_) => "<closure>".to_string(),
            Object::Upvalue(_) => "<upvalue>".to_string(),
            Object::Native(n) => format!("<native fn {}>", n.name),
            Object::Class(c) => format!("<class {}>", c.name),
            Object::BoundMethod(_) => "<bound method>".to_string(),
            Object::Enum(e) => format!("<enum {}>", e.name),
            Object::Module(m) => format!("<module {}>", m.name),
            Object::Reference(_) => "<reference>".to_string(),
        }
    }
}

/// The central `blacken` step: every `HeapId` an object directly holds,
/// enqueued into the GC's gray worklist by `heap.rs`.
pub fn trace_children(object: &Object) -> Vec<HeapId> {
    match object {
        Object::Array(a) => a.elements.iter().filter_map(value_object_id).collect(),
        Object::Dict(d) => {
            let mut ids: Vec<HeapId> = d.entries.keys().filter_map(dict_key_object_id).collect();
            ids.extend(d.entries.values().filter_map(value_object_id));
            ids
        }
        Object::Struct(s) => s.fields.values().filter_map(value_object_id).collect(),
        Object::Closure(c) => {
            let mut ids = vec![c.function];
            ids.extend(c.upvalues.iter().copied());
            ids
        }
        Object::Upvalue(u) => match u {
            Upvalue::Closed(v) => value_object_id(v).into_iter().collect(),
            Upvalue::Open { .. } => Vec::new(),
        },
        Object::Class(c) => {
            let mut ids: Vec<HeapId> = c.parents.clone();
            ids.extend(c.constants.values().filter_map(value_object_id));
            ids.extend(c.fields.values().filter_map(value_object_id));
            ids.extend(c.constructors.values().copied());
            ids
        }
        Object::BoundMethod(b) => {
            let mut ids = vec![b.closure];
            ids.extend(value_object_id(&b.receiver));
            ids
        }
        Object::Enum(e) => e.constants.values().filter_map(value_object_id).collect(),
        Object::Module(m) => m.bindings.values().filter_map(value_object_id).collect(),
        Object::Reference(r) => match r.slot {
            Slot::Cell(id) | Slot::ArrayElement(id, _) => vec![id],
            Slot::Global(_) => Vec::new(),
        },
        Object::String(_) | Object::Function(_) | Object::Native(_) => Vec::new(),
    }
}

fn value_object_id(value: &Value) -> Option<HeapId> {
    match value {
        Value::Object(id) => Some(*id),
        _ => None,
    }
}

fn dict_key_object_id(key: &DictKey) -> Option<HeapId> {
    match key {
        DictKey::Object(id) => Some(*id),
        _ => None,
    }
}

pub(crate) type Globals = AHashMap<String, Value>;
