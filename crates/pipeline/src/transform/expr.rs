//! Evaluation of calculated-field expressions.
//!
//! Arithmetic propagates `null`: any null operand (or division by zero)
//! yields `null`. Non-numeric operands are an error.

use ledgerflow_core::Expression;
use serde_json::{Map, Number, Value};

use crate::fields::get_path;

pub fn eval(expr: &Expression, record: &Map<String, Value>) -> Result<Value, String> {
    match expr {
        Expression::Field(path) => Ok(get_path(record, path).cloned().unwrap_or(Value::Null)),
        Expression::Literal(v) => Ok(v.clone()),
        Expression::Add(args) => fold(args, record, 0.0, |a, b| a + b),
        Expression::Multiply(args) => fold(args, record, 1.0, |a, b| a * b),
        Expression::Subtract(a, b) => binary(a, b, record, |x, y| Some(x - y)),
        Expression::Divide(a, b) => binary(a, b, record, |x, y| (y != 0.0).then(|| x / y)),
        Expression::Concat(args) => {
            let mut out = String::new();
            for arg in args {
                match eval(arg, record)? {
                    Value::Null => {}
                    Value::String(s) => out.push_str(&s),
                    other => out.push_str(&other.to_string()),
                }
            }
            Ok(Value::String(out))
        }
        Expression::Coalesce(args) => {
            for arg in args {
                let v = eval(arg, record)?;
                if !v.is_null() {
                    return Ok(v);
                }
            }
            Ok(Value::Null)
        }
    }
}

fn operand(v: Value) -> Result<Option<f64>, String> {
    match v {
        Value::Null => Ok(None),
        Value::Number(n) => n.as_f64().map(Some).ok_or_else(|| format!("{n} is out of range")),
        other => Err(format!("{other} is not numeric")),
    }
}

fn fold(
    args: &[Expression],
    record: &Map<String, Value>,
    init: f64,
    op: impl Fn(f64, f64) -> f64,
) -> Result<Value, String> {
    let mut acc = init;
    for arg in args {
        match operand(eval(arg, record)?)? {
            Some(x) => acc = op(acc, x),
            None => return Ok(Value::Null),
        }
    }
    Ok(number(acc))
}

fn binary(
    a: &Expression,
    b: &Expression,
    record: &Map<String, Value>,
    op: impl Fn(f64, f64) -> Option<f64>,
) -> Result<Value, String> {
    let (Some(x), Some(y)) = (operand(eval(a, record)?)?, operand(eval(b, record)?)?) else {
        return Ok(Value::Null);
    };
    Ok(op(x, y).map(number).unwrap_or(Value::Null))
}

/// Integral results are emitted as JSON integers.
fn number(x: f64) -> Value {
    if x.fract() == 0.0 && x.abs() < 9.0e15 {
        Value::from(x as i64)
    } else {
        Number::from_f64(x).map(Value::Number).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(name: &str) -> Expression {
        Expression::Field(name.into())
    }

    fn lit(v: Value) -> Expression {
        Expression::Literal(v)
    }

    fn rec() -> Map<String, Value> {
        json!({"price": 2.5, "qty": 4, "first": "Ada", "last": "Lovelace", "none": null})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn arithmetic() {
        let r = rec();
        let total = Expression::Multiply(vec![field("price"), field("qty")]);
        assert_eq!(eval(&total, &r).unwrap(), json!(10));
        let sum = Expression::Add(vec![field("qty"), lit(json!(0.5))]);
        assert_eq!(eval(&sum, &r).unwrap(), json!(4.5));
        let diff = Expression::Subtract(Box::new(field("qty")), Box::new(lit(json!(1))));
        assert_eq!(eval(&diff, &r).unwrap(), json!(3));
    }

    #[test]
    fn null_propagation_and_division_by_zero() {
        let r = rec();
        let with_null = Expression::Add(vec![field("qty"), field("none")]);
        assert_eq!(eval(&with_null, &r).unwrap(), Value::Null);
        let div0 = Expression::Divide(Box::new(field("qty")), Box::new(lit(json!(0))));
        assert_eq!(eval(&div0, &r).unwrap(), Value::Null);
        let half = Expression::Divide(Box::new(field("qty")), Box::new(lit(json!(8))));
        assert_eq!(eval(&half, &r).unwrap(), json!(0.5));
    }

    #[test]
    fn non_numeric_operand_is_error() {
        let r = rec();
        assert!(eval(&Expression::Add(vec![field("first"), lit(json!(1))]), &r).is_err());
    }

    #[test]
    fn concat_and_coalesce() {
        let r = rec();
        let full = Expression::Concat(vec![field("first"), lit(json!(" ")), field("last"), field("none")]);
        assert_eq!(eval(&full, &r).unwrap(), json!("Ada Lovelace"));
        let c = Expression::Coalesce(vec![field("none"), field("missing"), field("qty")]);
        assert_eq!(eval(&c, &r).unwrap(), json!(4));
    }
}
