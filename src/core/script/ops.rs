//! Operations on values.
//!
//! Arithmetic, comparison and bitwise operators with the coercions passage
//! authors expect from the hosted language.

use super::ast::{BinaryOp, UnaryOp};
use super::value::{ScriptError, ScriptResult, Value};

/// Apply a unary operator (except `typeof`/`void`, which never fail).
pub fn unary(op: UnaryOp, value: Value) -> Value {
    match op {
        UnaryOp::Not => Value::Bool(!value.is_truthy()),
        UnaryOp::Neg => Value::Number(-value.to_number()),
        UnaryOp::Pos => Value::Number(value.to_number()),
        UnaryOp::BitNot => Value::Number(!to_int32(value.to_number()) as f64),
        UnaryOp::Typeof => Value::from(value.type_name()),
        UnaryOp::Void => Value::Undefined,
    }
}

/// Apply a binary operator.
pub fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> ScriptResult<Value> {
    use BinaryOp::*;
    Ok(match op {
        Add => add(lhs, rhs),
        Sub => Value::Number(lhs.to_number() - rhs.to_number()),
        Mul => Value::Number(lhs.to_number() * rhs.to_number()),
        // Division by zero yields Infinity or NaN, never an error.
        Div => Value::Number(lhs.to_number() / rhs.to_number()),
        Rem => Value::Number(lhs.to_number() % rhs.to_number()),
        Exp => Value::Number(lhs.to_number().powf(rhs.to_number())),
        Eq => Value::Bool(lhs.loose_eq(&rhs)),
        NotEq => Value::Bool(!lhs.loose_eq(&rhs)),
        StrictEq => Value::Bool(lhs.strict_eq(&rhs)),
        StrictNotEq => Value::Bool(!lhs.strict_eq(&rhs)),
        Lt => compare(&lhs, &rhs, |o| o.is_lt()),
        LtEq => compare(&lhs, &rhs, |o| o.is_le()),
        Gt => compare(&lhs, &rhs, |o| o.is_gt()),
        GtEq => compare(&lhs, &rhs, |o| o.is_ge()),
        In => Value::Bool(contains_key(&rhs, &lhs)?),
        BitAnd => Value::Number((to_int32(lhs.to_number()) & to_int32(rhs.to_number())) as f64),
        BitOr => Value::Number((to_int32(lhs.to_number()) | to_int32(rhs.to_number())) as f64),
        BitXor => Value::Number((to_int32(lhs.to_number()) ^ to_int32(rhs.to_number())) as f64),
    })
}

/// `+`: string concatenation if either side is (or converts to) a string,
/// numeric addition otherwise.
pub fn add(lhs: Value, rhs: Value) -> Value {
    use Value::*;
    match (lhs, rhs) {
        (Number(a), Number(b)) => Number(a + b),
        (Str(a), Str(b)) => Str(a + &b),
        (Str(a), b) => Str(a + &b.display()),
        (a, Str(b)) => Str(a.display() + &b),
        (a @ (Array(_) | Object(_) | Function(_) | Regex(_)), b)
        | (a, b @ (Array(_) | Object(_) | Function(_) | Regex(_))) => {
            Str(a.display() + &b.display())
        }
        (a, b) => Number(a.to_number() + b.to_number()),
    }
}

/// Relational comparison: strings compare lexically, everything else
/// numerically. Any comparison involving NaN is false.
fn compare(lhs: &Value, rhs: &Value, test: fn(std::cmp::Ordering) -> bool) -> Value {
    let ordering = match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => lhs.to_number().partial_cmp(&rhs.to_number()),
    };
    Value::Bool(ordering.map(test).unwrap_or(false))
}

/// `key in container`.
pub fn contains_key(container: &Value, key: &Value) -> ScriptResult<bool> {
    match container {
        Value::Object(o) => Ok(o.borrow().contains_key(&key.display())),
        Value::Array(a) => {
            let key = key.display();
            if key == "length" {
                return Ok(true);
            }
            Ok(key
                .parse::<usize>()
                .map(|i| i < a.borrow().len())
                .unwrap_or(false))
        }
        other => Err(ScriptError::type_error(format!(
            "cannot use 'in' to search for '{}' in {}",
            key.display(),
            other.describe_type()
        ))),
    }
}

/// Convert to a 32-bit integer the way bitwise operators do.
pub fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    (n.trunc() as i64 & 0xffff_ffff) as u32 as i32
}

/// Convert a value to an array index, if it is one.
pub fn to_index(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Some(*n as usize),
        Value::Str(s) => s.parse::<usize>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> Value {
        Value::Number(n)
    }

    #[test]
    fn test_add_coercions() {
        assert_eq!(add(num(1.0), num(2.0)), num(3.0));
        assert_eq!(add(Value::from("a"), num(1.0)), Value::from("a1"));
        assert_eq!(add(num(1.0), Value::from("a")), Value::from("1a"));
        assert_eq!(add(Value::Bool(true), num(1.0)), num(2.0));
        assert_eq!(
            add(Value::from(vec![num(1.0), num(2.0)]), Value::from("!")),
            Value::from("1,2!")
        );
    }

    #[test]
    fn test_division_by_zero() {
        let v = binary(BinaryOp::Div, num(1.0), num(0.0)).unwrap();
        assert_eq!(v, num(f64::INFINITY));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(binary(BinaryOp::Lt, Value::from("a"), Value::from("b")).unwrap(), Value::Bool(true));
        assert_eq!(binary(BinaryOp::Lt, Value::from("10"), num(9.0)).unwrap(), Value::Bool(false));
        assert_eq!(binary(BinaryOp::GtEq, num(f64::NAN), num(1.0)).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_bitwise() {
        assert_eq!(binary(BinaryOp::BitOr, num(5.7), num(0.0)).unwrap(), num(5.0));
        assert_eq!(unary(UnaryOp::BitNot, num(0.0)), num(-1.0));
    }

    #[test]
    fn test_in_operator() {
        let arr = Value::from(vec![num(1.0)]);
        assert!(contains_key(&arr, &num(0.0)).unwrap());
        assert!(!contains_key(&arr, &num(1.0)).unwrap());
        assert!(contains_key(&num(1.0), &num(0.0)).is_err());
    }
}
