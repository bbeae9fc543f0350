//! The runtime value representation — `spec.md` §4.7.
//!
//! Grounded on `ouros::value::Value`'s hybrid design: small, common kinds
//! (`null`, `bool`, fixed-width `int`/`float`, `char`) live inline in the
//! tagged union with no allocation; everything bigger or reference-shaped
//! (`string`, `array`, `dict`, `struct`, `function`, `closure`, `upvalue`,
//! `native function`, `class`, `bound method`, `enum`, `module`,
//! `reference`) is a [`crate::heap::HeapId`] indirection into the object
//! arena so `Value` itself stays `Copy` and cheap to push/pop on the value
//! stack.

use std::fmt;

use crate::heap::HeapId;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    /// A heap-allocated object: string, array, dict, struct, function,
    /// closure, upvalue, native function, class, bound method, enum,
    /// module, or reference — see [`crate::types`].
    Object(HeapId),
}

impl Value {
    #[must_use]
    pub fn type_name(self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Char(_) => "char",
            Value::Object(_) => "object",
        }
    }

    /// Truthiness per `spec.md` §4.2's `if`/`while`/`&&`/`||` condition
    /// evaluation: only `null` and `false` are falsy, everything else
    /// (including `0` and `""`) is truthy.
    #[must_use]
    pub fn is_truthy(self) -> bool {
        !matches!(self, Value::Null | Value::Bool(false))
    }

    /// Scalar equality for the non-object tags; object equality needs heap
    /// access and is implemented on [`crate::heap::Heap`] instead.
    #[must_use]
    pub fn scalar_eq(self, other: Value) -> Option<bool> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(true),
            (Value::Bool(a), Value::Bool(b)) => Some(a == b),
            (Value::Int(a), Value::Int(b)) => Some(a == b),
            (Value::Float(a), Value::Float(b)) => Some((a - b).abs() == 0.0),
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                #[allow(clippy::cast_precision_loss)]
                Some((a as f64 - b).abs() == 0.0)
            }
            (Value::Char(a), Value::Char(b)) => Some(a == b),
            (Value::Object(_), Value::Object(_)) => None,
            _ => Some(false),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::Char(c) => write!(f, "{c}"),
            Value::Object(id) => write!(f, "<object #{id}>", id = id.index()),
        }
    }
}
