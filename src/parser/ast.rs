//! Parser Expression AST
//!
//! A small, side-effect free expression language used to describe custom
//! payload parsers. It covers field paths, arithmetic, a handful of math
//! functions and object construction. There are no loops, assignments or
//! host calls, so an expression can be evaluated against untrusted input.
//!
//! # Example Expressions
//!
//! ```text
//! v * 2
//! (temp_f - 32) * 5 / 9
//! round(payload.humidity)
//! { value: reading.raw / 10, unit: "C" }
//! ```

use crate::extract::FieldPath;
use std::fmt;

/// A node in the expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Numeric literal
    Number(f64),
    /// String literal
    Str(String),
    /// The whole payload (`payload`)
    Payload,
    /// A field path into the payload (`a.b.c` or `payload.a.b.c`)
    Field(FieldPath),
    /// Unary negation
    Neg(Box<Expr>),
    /// Binary arithmetic
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Builtin function call
    Call { func: Func, args: Vec<Expr> },
    /// Object construction, fields kept in source order
    Object(Vec<(String, Expr)>),
}

impl Expr {
    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Longest chain of nested nodes, leaves counting as 1
    pub fn depth(&self) -> usize {
        match self {
            Expr::Number(_) | Expr::Str(_) | Expr::Payload | Expr::Field(_) => 1,
            Expr::Neg(inner) => inner.depth() + 1,
            Expr::Binary { lhs, rhs, .. } => lhs.depth().max(rhs.depth()) + 1,
            Expr::Call { args, .. } => args.iter().map(Expr::depth).max().unwrap_or(0) + 1,
            Expr::Object(fields) => {
                fields.iter().map(|(_, value)| value.depth()).max().unwrap_or(0) + 1
            }
        }
    }

    /// Field path from a dotted string; a blank string becomes `payload`
    pub fn field(path: &str) -> Self {
        match FieldPath::parse(path) {
            Some(path) => Expr::Field(path),
            None => Expr::Payload,
        }
    }
}

/// Binary arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    /// Apply to two operands
    pub fn apply(&self, lhs: f64, rhs: f64) -> f64 {
        match self {
            Self::Add => lhs + rhs,
            Self::Sub => lhs - rhs,
            Self::Mul => lhs * rhs,
            Self::Div => lhs / rhs,
            Self::Rem => lhs % rhs,
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "+"),
            Self::Sub => write!(f, "-"),
            Self::Mul => write!(f, "*"),
            Self::Div => write!(f, "/"),
            Self::Rem => write!(f, "%"),
        }
    }
}

/// Builtin functions available in expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    /// Absolute value
    Abs,
    /// Round half away from zero
    Round,
    /// Round down
    Floor,
    /// Round up
    Ceil,
    /// Smaller of two values
    Min,
    /// Larger of two values
    Max,
    /// Coerce a string or bool to a number
    Number,
}

impl Func {
    /// Look up a function by name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "abs" => Some(Self::Abs),
            "round" => Some(Self::Round),
            "floor" => Some(Self::Floor),
            "ceil" => Some(Self::Ceil),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "number" | "num" => Some(Self::Number),
            _ => None,
        }
    }

    /// Number of arguments the function takes
    pub fn arity(&self) -> usize {
        match self {
            Self::Min | Self::Max => 2,
            _ => 1,
        }
    }

    /// Apply to already-evaluated numeric arguments
    pub fn apply(&self, args: &[f64]) -> f64 {
        match self {
            Self::Abs => args[0].abs(),
            Self::Round => args[0].round(),
            Self::Floor => args[0].floor(),
            Self::Ceil => args[0].ceil(),
            Self::Min => args[0].min(args[1]),
            Self::Max => args[0].max(args[1]),
            Self::Number => args[0],
        }
    }
}

impl fmt::Display for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abs => write!(f, "abs"),
            Self::Round => write!(f, "round"),
            Self::Floor => write!(f, "floor"),
            Self::Ceil => write!(f, "ceil"),
            Self::Min => write!(f, "min"),
            Self::Max => write!(f, "max"),
            Self::Number => write!(f, "number"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_func_from_name() {
        assert_eq!(Func::from_name("ROUND"), Some(Func::Round));
        assert_eq!(Func::from_name("num"), Some(Func::Number));
        assert_eq!(Func::from_name("eval"), None);
    }

    #[test]
    fn test_func_apply() {
        assert_eq!(Func::Abs.apply(&[-3.5]), 3.5);
        assert_eq!(Func::Round.apply(&[2.5]), 3.0);
        assert_eq!(Func::Max.apply(&[1.0, 4.0]), 4.0);
        assert_eq!(Func::Min.arity(), 2);
    }

    #[test]
    fn test_binary_op_apply() {
        assert_eq!(BinaryOp::Sub.apply(10.0, 4.0), 6.0);
        assert_eq!(BinaryOp::Rem.apply(10.0, 4.0), 2.0);
        assert!(BinaryOp::Div.apply(1.0, 0.0).is_infinite());
    }

    #[test]
    fn test_field_blank_is_payload() {
        assert_eq!(Expr::field(""), Expr::Payload);
        assert_eq!(
            Expr::field("a.b"),
            Expr::Field(FieldPath::from_segments(["a", "b"]))
        );
    }
}
