// Value model
//
// A Value is a small Copy tagged union: nil, boolean, number, the NaN
// singleton, or a pointer to a heap object. Object payloads live in
// `gc::object`; everything here is by-value plumbing: coercions, equality,
// ordering and rendering.

pub mod table;

use crate::gc::object::{ObjBody, ObjPtr};

#[derive(Clone, Copy, Debug)]
pub enum Value {
    Nil,
    Bool(bool),
    Num(f64),
    /// Distinct not-a-number singleton, as produced by `x % 0`. Unlike
    /// `Num(f64::NAN)` it compares equal to itself.
    NaN,
    Obj(ObjPtr),
}

impl Value {
    #[inline(always)]
    pub fn is_nil(self) -> bool {
        matches!(self, Value::Nil)
    }

    #[inline(always)]
    pub fn is_num(self) -> bool {
        matches!(self, Value::Num(_))
    }

    #[inline(always)]
    pub fn is_nan(self) -> bool {
        matches!(self, Value::NaN)
    }

    #[inline(always)]
    pub fn as_obj(self) -> Option<ObjPtr> {
        match self {
            Value::Obj(ptr) => Some(ptr),
            _ => None,
        }
    }

    /// Arithmetic operand guard: numbers and booleans take the numeric
    /// fast paths, everything else goes through the operator's own rules.
    #[inline(always)]
    pub fn is_numeric(self) -> bool {
        matches!(self, Value::Num(_) | Value::Bool(_))
    }

    #[inline(always)]
    pub fn is_string(self) -> bool {
        self.as_str().is_some()
    }

    /// Borrow the string payload when this value is a string object.
    #[inline(always)]
    pub fn as_str<'a>(self) -> Option<&'a str> {
        match self {
            Value::Obj(ptr) => match &ptr.get().body {
                ObjBody::Str(s) => Some(&s.data),
                _ => None,
            },
            _ => None,
        }
    }

    /// Numeric coercion: nil is 0, booleans are 0/1, strings parse (0 on
    /// failure), other objects are 0.
    pub fn as_number(self) -> f64 {
        match self {
            Value::Nil => 0.0,
            Value::Bool(b) => b as i64 as f64,
            Value::Num(n) => n,
            Value::NaN => f64::NAN,
            Value::Obj(_) => match self.as_str() {
                Some(s) => s.trim().parse::<f64>().unwrap_or(0.0),
                None => 0.0,
            },
        }
    }

    /// Truthiness: only nil and false are false.
    #[inline(always)]
    pub fn as_bool(self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    /// Render any value as a string.
    pub fn as_string(self) -> String {
        match self {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => if b { "true" } else { "false" }.to_string(),
            Value::Num(n) => format_number(n),
            Value::NaN => "NaN".to_string(),
            Value::Obj(ptr) => ptr.get().render(),
        }
    }

    pub fn type_name(self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Num(_) => "number",
            Value::NaN => "NaN",
            Value::Obj(ptr) => ptr.get().type_name(),
        }
    }
}

/// Numbers with no fractional part print as integers, the rest trim
/// trailing zeros off a fixed-precision rendering.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        let mut buffer = itoa::Buffer::new();
        return buffer.format(n as i64).to_string();
    }
    let formatted = format!("{:.10}", n);
    formatted.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Value equality. Strings compare by content, lists element-wise, ranges
/// by their fields; maps, functions, natives and code compare by identity.
pub fn equals(a: Value, b: Value) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Num(x), Value::Num(y)) => x == y,
        (Value::NaN, Value::NaN) => true,
        (Value::Obj(x), Value::Obj(y)) => {
            if x == y {
                return true;
            }
            match (&x.get().body, &y.get().body) {
                (ObjBody::Str(s), ObjBody::Str(t)) => s.data == t.data,
                (ObjBody::List(s), ObjBody::List(t)) => {
                    s.items.len() == t.items.len()
                        && s.items
                            .iter()
                            .zip(t.items.iter())
                            .all(|(&p, &q)| equals(p, q))
                }
                (ObjBody::Range(s), ObjBody::Range(t)) => {
                    s.start == t.start && s.end == t.end && s.step == t.step
                }
                _ => false,
            }
        }
        _ => false,
    }
}

/// Rank used to order values of different kinds; only meaningful through
/// `compare`.
fn variant_rank(v: Value) -> i32 {
    match v {
        Value::Nil => 0,
        Value::Bool(_) => 1,
        Value::Num(_) => 2,
        Value::NaN => 3,
        Value::Obj(ptr) => 4 + ptr.get().kind_rank(),
    }
}

/// Total ordering backing the COMPARE opcode. Numeric-coercible operands
/// order numerically, strings lexicographically; anything else is 0 exactly
/// when `equals` holds, so `!=` works on every operand pair.
pub fn compare(a: Value, b: Value) -> i32 {
    if a.is_nan() && b.is_nan() {
        return 0;
    }
    let numeric = |v: Value| matches!(v, Value::Nil | Value::Bool(_) | Value::Num(_) | Value::NaN);
    if numeric(a) && numeric(b) {
        let x = a.as_number();
        let y = b.as_number();
        return if x < y {
            -1
        } else if x > y {
            1
        } else if x == y {
            0
        } else {
            // Unordered against an IEEE NaN payload.
            1
        };
    }
    if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
        return match x.cmp(y) {
            std::cmp::Ordering::Less => -1,
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Greater => 1,
        };
    }
    if equals(a, b) {
        0
    } else {
        let rank = (variant_rank(a) - variant_rank(b)).signum();
        if rank != 0 { rank } else { 1 }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        equals(*self, *other)
    }
}
