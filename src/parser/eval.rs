//! Parser Expression Evaluation
//!
//! Evaluates an [`Expr`] against a payload root. Arithmetic coerces its
//! operands to `f64`: JSON numbers as-is, numeric strings by parsing,
//! booleans as 1/0. Anything else is a decode failure.

use serde_json::{Map, Number, Value};

use crate::extract;
use crate::parser::ast::Expr;
use crate::parser::error::DecodeError;

/// Evaluate an expression against the payload root
pub fn evaluate(expr: &Expr, root: &Value) -> Result<Value, DecodeError> {
    match expr {
        Expr::Number(n) => number_value(*n),
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Payload => Ok(root.clone()),
        Expr::Field(path) => extract::resolve(root, path)
            .cloned()
            .ok_or_else(|| DecodeError::MissingField(path.to_string())),
        Expr::Object(fields) => {
            let mut object = Map::with_capacity(fields.len());
            for (key, value) in fields {
                object.insert(key.clone(), evaluate(value, root)?);
            }
            Ok(Value::Object(object))
        }
        _ => number_value(evaluate_number(expr, root)?),
    }
}

/// Evaluate an expression that must produce a number
fn evaluate_number(expr: &Expr, root: &Value) -> Result<f64, DecodeError> {
    match expr {
        Expr::Neg(inner) => Ok(-evaluate_number(inner, root)?),
        Expr::Binary { op, lhs, rhs } => {
            let lhs = evaluate_number(lhs, root)?;
            let rhs = evaluate_number(rhs, root)?;
            finite(op.apply(lhs, rhs))
        }
        Expr::Call { func, args } => {
            let args = args
                .iter()
                .map(|arg| evaluate_number(arg, root))
                .collect::<Result<Vec<_>, _>>()?;
            finite(func.apply(&args))
        }
        other => coerce_number(&evaluate(other, root)?),
    }
}

/// Coerce a JSON value to a number
pub fn coerce_number(value: &Value) -> Result<f64, DecodeError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| DecodeError::NotNumeric(n.to_string())),
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| DecodeError::Conversion {
            value: s.clone(),
            target: "number",
        }),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        other => Err(DecodeError::NotNumeric(other.to_string())),
    }
}

fn finite(n: f64) -> Result<f64, DecodeError> {
    if n.is_finite() {
        Ok(n)
    } else {
        Err(DecodeError::NonFinite)
    }
}

fn number_value(n: f64) -> Result<Value, DecodeError> {
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or(DecodeError::NonFinite)
}
