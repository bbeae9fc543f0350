//! Arithmetic, bitwise, comparison, `RESET`, and aggregate-resolve —
//! `spec.md` §4.5/§4.9.
//!
//! Grounded on `ouros::bytecode::vm::binary`/`compare`'s numeric-promotion
//! shape (int op int stays int; either operand float promotes both to
//! float), generalized to also cover this language's `+`-as-string-concat
//! and the explicit bitwise family `spec.md` §4.5 lists alongside it.

use super::{OpResult, Vm};
use crate::bytecode::op::Opcode;
use crate::diagnostics::DiagnosticSink;
use crate::types::{LwString, Object};
use crate::value::Value;

impl<'a, S: DiagnosticSink> Vm<'a, S> {
    pub(super) fn binary_arith(&mut self, op: Opcode) -> OpResult<()> {
        let b = self.pop();
        let a = self.pop();
        let source = self.current_source();
        let result = match (a, b, op) {
            (Value::Object(lhs), Value::Object(rhs), Opcode::Add)
                if matches!(self.heap.get(lhs), Object::String(_)) && matches!(self.heap.get(rhs), Object::String(_)) =>
            {
                let concatenated = match (self.heap.get(lhs), self.heap.get(rhs)) {
                    (Object::String(l), Object::String(r)) => format!("{}{}", l.value, r.value),
                    _ => unreachable!(),
                };
                let id = self.alloc(Object::String(LwString::new(concatenated)));
                Value::Object(id)
            }
            (Value::Int(x), Value::Int(y), _) => match Self::int_arith(op, x, y) {
                Some(v) => v,
                None => return Err(self.fatal("division or modulo by zero", source)),
            },
            (Value::Float(_) | Value::Int(_), Value::Float(_) | Value::Int(_), _) => {
                let x = Self::as_f64(a);
                let y = Self::as_f64(b);
                match Self::float_arith(op, x, y) {
                    Some(v) => v,
                    None => return Err(self.fatal("unsupported operator between these numeric kinds", source)),
                }
            }
            _ => return Err(self.fatal(format!("operator {op} is not defined for {}/{}", a.type_name(), b.type_name()), source)),
        };
        self.push(result, source)
    }

    fn as_f64(v: Value) -> f64 {
        match v {
            Value::Int(n) => {
                #[allow(clippy::cast_precision_loss)]
                {
                    n as f64
                }
            }
            Value::Float(f) => f,
            _ => unreachable!("as_f64 called on a non-numeric value"),
        }
    }

    fn int_arith(op: Opcode, x: i64, y: i64) -> Option<Value> {
        Some(Value::Int(match op {
            Opcode::Add => x.wrapping_add(y),
            Opcode::Sub => x.wrapping_sub(y),
            Opcode::Mul => x.wrapping_mul(y),
            Opcode::Div => {
                if y == 0 {
                    return None;
                }
                x.wrapping_div(y)
            }
            Opcode::Mod => {
                if y == 0 {
                    return None;
                }
                x.wrapping_rem(y)
            }
            Opcode::BitAnd => x & y,
            Opcode::BitOr => x | y,
            Opcode::BitXor => x ^ y,
            Opcode::BitLeftShift => x.wrapping_shl(y as u32),
            Opcode::BitRightShift => x.wrapping_shr(y as u32),
            _ => unreachable!("int_arith called with non-arithmetic opcode"),
        }))
    }

    fn float_arith(op: Opcode, x: f64, y: f64) -> Option<Value> {
        Some(Value::Float(match op {
            Opcode::Add => x + y,
            Opcode::Sub => x - y,
            Opcode::Mul => x * y,
            Opcode::Div => x / y,
            Opcode::Mod => x % y,
            _ => return None,
        }))
    }

    pub(super) fn unary_minus(&mut self) -> OpResult<()> {
        let v = self.pop();
        let source = self.current_source();
        let result = match v {
            Value::Int(n) => Value::Int(-n),
            Value::Float(f) => Value::Float(-f),
            _ => return Err(self.fatal(format!("cannot negate a {}", v.type_name()), source)),
        };
        self.push(result, source)
    }

    pub(super) fn unary_bit_not(&mut self) -> OpResult<()> {
        let v = self.pop();
        let source = self.current_source();
        match v {
            Value::Int(n) => self.push(Value::Int(!n), source),
            _ => Err(self.fatal(format!("cannot bitwise-not a {}", v.type_name()), source)),
        }
    }

    /// Postfix `!` (`spec.md` §3/§4.3): `n! = n * (n-1) * ... * 1`, `0! = 1`.
    pub(super) fn factorial(&mut self) -> OpResult<()> {
        let v = self.pop();
        let source = self.current_source();
        let Value::Int(n) = v else {
            return Err(self.fatal(format!("cannot take the factorial of a {}", v.type_name()), source));
        };
        if n < 0 {
            return Err(self.fatal("factorial of a negative number", source));
        }
        let mut acc: i64 = 1;
        for i in 2..=n {
            acc = acc.wrapping_mul(i);
        }
        self.push(Value::Int(acc), source)
    }

    pub(super) fn compare(&mut self, op: Opcode) -> OpResult<()> {
        let b = self.pop();
        let a = self.pop();
        let source = self.current_source();
        let result = match op {
            Opcode::Equal => self.values_equal(a, b),
            Opcode::Less | Opcode::Greater => match (a, b) {
                (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                    let x = Self::as_f64(a);
                    let y = Self::as_f64(b);
                    if op == Opcode::Less { x < y } else { x > y }
                }
                (Value::Char(x), Value::Char(y)) => {
                    if op == Opcode::Less { x < y } else { x > y }
                }
                _ => return Err(self.fatal(format!("cannot order {} and {}", a.type_name(), b.type_name()), source)),
            },
            _ => unreachable!("compare called with a non-comparison opcode"),
        };
        self.push(Value::Bool(result), source)
    }

    fn values_equal(&self, a: Value, b: Value) -> bool {
        if let Some(eq) = a.scalar_eq(b) {
            return eq;
        }
        match (a, b) {
            (Value::Object(x), Value::Object(y)) => {
                if x == y {
                    return true;
                }
                match (self.heap.get(x), self.heap.get(y)) {
                    (Object::String(l), Object::String(r)) => l.value == r.value,
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// `RESET n`: pops the compound expression's trailing result, discards
    /// the `n` scope locals beneath it (closing any that were captured),
    /// then pushes the result back on top.
    pub(super) fn reset(&mut self, n: u8) {
        let result = self.pop();
        let base = self.stack.len() - n as usize;
        self.close_upvalues_from(base);
        self.stack.truncate(base);
        self.stack.push(result);
    }

    /// `AGGREGATE_RESOLVE[_VAR_ARG] n`: pops an array and pushes its first
    /// `n` elements (padding with `null` if the array is shorter, per
    /// `spec.md` §8's boundary behavior), plus — for the vararg form — the
    /// remaining elements packed into a new array.
    pub(super) fn aggregate_resolve(&mut self, n: u8, vararg: bool) -> OpResult<()> {
        let v = self.pop();
        let source = self.current_source();
        let Value::Object(id) = v else {
            return Err(self.fatal(format!("cannot destructure a {}", v.type_name()), source));
        };
        let elements = match self.heap.get(id) {
            Object::Array(a) => a.elements.clone(),
            other => return Err(self.fatal(format!("cannot destructure a {}", other.kind_name()), source)),
        };
        let n = n as usize;
        for i in 0..n {
            self.push(elements.get(i).copied().unwrap_or(Value::Null), source)?;
        }
        if vararg {
            let rest: Vec<Value> = if elements.len() > n { elements[n..].to_vec() } else { Vec::new() };
            let id = self.alloc(Object::Array(crate::types::LwArray { elements: rest }));
            self.push(Value::Object(id), source)?;
        }
        Ok(())
    }
}
