//! Parser Expression Grammar
//!
//! Parses expression text into an [`Expr`] tree.
//!
//! # Supported Syntax
//!
//! ```text
//! expr     := additive | object
//! object   := '{' [ key ':' expr { ',' key ':' expr } ] '}'
//! additive := term { ('+' | '-') term }
//! term     := unary { ('*' | '/' | '%') unary }
//! unary    := '-' unary | primary
//! primary  := number | string | '(' expr ')' | call | path
//! call     := ident '(' expr { ',' expr } ')'
//! path     := ident { '.' ident }
//! ```
//!
//! The identifier `payload` at the head of a path refers to the payload
//! root, so `payload` and `payload.temp` are both valid.

use nom::{
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::{char, digit1, multispace0, one_of},
    combinator::{map, map_res, opt, recognize},
    error::ErrorKind,
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

use crate::extract::FieldPath;
use crate::parser::ast::{BinaryOp, Expr, Func};
use crate::parser::error::ParseError;

/// Deepest nesting accepted, counting parentheses, negations, call
/// arguments, object values and operator chains
pub const MAX_DEPTH: usize = 64;

/// Parse an expression string into an AST
pub fn parse_expression(input: &str) -> Result<Expr, ParseError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseError::Syntax("empty expression".to_string()));
    }

    match parse_expr(input, 0) {
        Ok((remaining, expr)) => {
            if !remaining.trim().is_empty() {
                return Err(ParseError::Syntax(format!(
                    "Unexpected input after expression: '{}'",
                    remaining.trim()
                )));
            }
            if expr.depth() > MAX_DEPTH {
                return Err(too_deep());
            }
            validate(&expr)?;
            Ok(expr)
        }
        Err(nom::Err::Failure(e)) if e.code == ErrorKind::TooLarge => Err(too_deep()),
        Err(e) => Err(ParseError::Syntax(format!("{:?}", e))),
    }
}

fn too_deep() -> ParseError {
    ParseError::Syntax(format!("expression nested deeper than {} levels", MAX_DEPTH))
}

/// Abort the whole parse once nesting passes [`MAX_DEPTH`]
fn check_depth(input: &str, depth: usize) -> IResult<&str, ()> {
    if depth > MAX_DEPTH {
        Err(nom::Err::Failure(nom::error::Error::new(input, ErrorKind::TooLarge)))
    } else {
        Ok((input, ()))
    }
}

/// Check function names and arities once the tree is built
fn validate(expr: &Expr) -> Result<(), ParseError> {
    match expr {
        Expr::Number(_) | Expr::Str(_) | Expr::Payload | Expr::Field(_) => Ok(()),
        Expr::Neg(inner) => validate(inner),
        Expr::Binary { lhs, rhs, .. } => {
            validate(lhs)?;
            validate(rhs)
        }
        Expr::Call { func, args } => {
            if args.len() != func.arity() {
                return Err(ParseError::Arity {
                    name: func.to_string(),
                    expected: func.arity(),
                    got: args.len(),
                });
            }
            args.iter().try_for_each(validate)
        }
        Expr::Object(fields) => fields.iter().try_for_each(|(_, value)| validate(value)),
    }
}

fn parse_expr(input: &str, depth: usize) -> IResult<&str, Expr> {
    let (input, _) = check_depth(input, depth)?;
    let (input, _) = multispace0(input)?;
    let (input, expr) = alt((
        |i| parse_object(i, depth + 1),
        |i| parse_additive(i, depth + 1),
    ))(input)?;
    let (input, _) = multispace0(input)?;
    Ok((input, expr))
}

/// Parse `{ key: expr, ... }`
fn parse_object(input: &str, depth: usize) -> IResult<&str, Expr> {
    let (input, _) = char('{')(input)?;
    let (input, _) = multispace0(input)?;
    let (input, fields) = separated_list0(
        delimited(multispace0, char(','), multispace0),
        |i| parse_object_field(i, depth),
    )(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = char('}')(input)?;
    Ok((input, Expr::Object(fields)))
}

fn parse_object_field(input: &str, depth: usize) -> IResult<&str, (String, Expr)> {
    let (input, key) = alt((
        map(parse_identifier, |s: &str| s.to_string()),
        parse_quoted_string,
    ))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = char(':')(input)?;
    let (input, value) = parse_expr(input, depth)?;
    Ok((input, (key, value)))
}

/// Parse a chain of `+` / `-`
fn parse_additive(input: &str, depth: usize) -> IResult<&str, Expr> {
    let (input, first) = parse_term(input, depth)?;
    let (input, rest) = many0(pair(
        delimited(multispace0, one_of("+-"), multispace0),
        |i| parse_term(i, depth),
    ))(input)?;

    // Each operator in the chain adds a level to the folded tree
    let (input, _) = check_depth(input, depth + rest.len())?;
    Ok((input, fold_binary(first, rest)))
}

/// Parse a chain of `*` / `/` / `%`
fn parse_term(input: &str, depth: usize) -> IResult<&str, Expr> {
    let (input, first) = parse_unary(input, depth)?;
    let (input, rest) = many0(pair(
        delimited(multispace0, one_of("*/%"), multispace0),
        |i| parse_unary(i, depth),
    ))(input)?;

    let (input, _) = check_depth(input, depth + rest.len())?;
    Ok((input, fold_binary(first, rest)))
}

/// Left-associative fold of an operator chain
fn fold_binary(first: Expr, rest: Vec<(char, Expr)>) -> Expr {
    rest.into_iter().fold(first, |lhs, (op, rhs)| {
        let op = match op {
            '+' => BinaryOp::Add,
            '-' => BinaryOp::Sub,
            '*' => BinaryOp::Mul,
            '/' => BinaryOp::Div,
            _ => BinaryOp::Rem,
        };
        Expr::binary(op, lhs, rhs)
    })
}

fn parse_unary(input: &str, depth: usize) -> IResult<&str, Expr> {
    let (input, _) = check_depth(input, depth)?;
    alt((
        map(
            preceded(pair(char('-'), multispace0), |i| parse_unary(i, depth + 1)),
            |e| Expr::Neg(Box::new(e)),
        ),
        |i| parse_primary(i, depth),
    ))(input)
}

fn parse_primary(input: &str, depth: usize) -> IResult<&str, Expr> {
    alt((
        map(parse_number, Expr::Number),
        map(parse_quoted_string, Expr::Str),
        delimited(
            pair(char('('), multispace0),
            |i| parse_expr(i, depth + 1),
            pair(multispace0, char(')')),
        ),
        |i| parse_call(i, depth),
        parse_path,
    ))(input)
}

/// Parse `name(arg, ...)`. Unknown names fail here so the path parser
/// does not silently take `foo(1)` apart.
fn parse_call(input: &str, depth: usize) -> IResult<&str, Expr> {
    let (rest, name) = parse_identifier(input)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, _) = char('(')(rest)?;

    let func = match Func::from_name(name) {
        Some(func) => func,
        None => {
            return Err(nom::Err::Failure(nom::error::Error::new(
                input,
                ErrorKind::Verify,
            )))
        }
    };

    let (rest, args) = separated_list0(
        delimited(multispace0, char(','), multispace0),
        |i| parse_expr(i, depth + 1),
    )(rest)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, _) = char(')')(rest)?;

    Ok((rest, Expr::Call { func, args }))
}

/// Parse a dotted field path, treating a leading `payload` as the root
fn parse_path(input: &str) -> IResult<&str, Expr> {
    let (input, head) = parse_identifier(input)?;
    let (input, tail) = many0(preceded(char('.'), parse_identifier))(input)?;

    let mut segments: Vec<&str> = Vec::with_capacity(tail.len() + 1);
    if head != "payload" {
        segments.push(head);
    }
    segments.extend(tail);

    if segments.is_empty() {
        Ok((input, Expr::Payload))
    } else {
        Ok((input, Expr::Field(FieldPath::from_segments(segments))))
    }
}

/// Parse identifier (field name or function name)
fn parse_identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_'),
    ))(input)
}

/// Parse a single- or double-quoted string (no escapes)
fn parse_quoted_string(input: &str) -> IResult<&str, String> {
    alt((
        map(
            delimited(char('"'), take_while(|c| c != '"'), char('"')),
            |s: &str| s.to_string(),
        ),
        map(
            delimited(char('\''), take_while(|c| c != '\''), char('\'')),
            |s: &str| s.to_string(),
        ),
    ))(input)
}

/// Parse an unsigned decimal number with optional fraction and exponent
fn parse_number(input: &str) -> IResult<&str, f64> {
    map_res(
        recognize(tuple((
            digit1,
            opt(pair(char('.'), digit1)),
            opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
        ))),
        |s: &str| s.parse::<f64>(),
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(path: &str) -> Expr {
        Expr::field(path)
    }

    #[test]
    fn test_parse_field_times_constant() {
        let expr = parse_expression("v * 2").unwrap();
        assert_eq!(expr, Expr::binary(BinaryOp::Mul, field("v"), Expr::Number(2.0)));
    }

    #[test]
    fn test_precedence() {
        let expr = parse_expression("a + b * 2").unwrap();
        assert_eq!(
            expr,
            Expr::binary(
                BinaryOp::Add,
                field("a"),
                Expr::binary(BinaryOp::Mul, field("b"), Expr::Number(2.0)),
            )
        );
    }

    #[test]
    fn test_left_associative() {
        let expr = parse_expression("10 - 4 - 3").unwrap();
        assert_eq!(
            expr,
            Expr::binary(
                BinaryOp::Sub,
                Expr::binary(BinaryOp::Sub, Expr::Number(10.0), Expr::Number(4.0)),
                Expr::Number(3.0),
            )
        );
    }

    #[test]
    fn test_parentheses_and_negation() {
        let expr = parse_expression("-(temp_f - 32) / 1.8").unwrap();
        assert_eq!(
            expr,
            Expr::binary(
                BinaryOp::Div,
                Expr::Neg(Box::new(Expr::binary(
                    BinaryOp::Sub,
                    field("temp_f"),
                    Expr::Number(32.0),
                ))),
                Expr::Number(1.8),
            )
        );
    }

    #[test]
    fn test_payload_root() {
        assert_eq!(parse_expression("payload").unwrap(), Expr::Payload);
        assert_eq!(parse_expression("payload.sensor.t").unwrap(), field("sensor.t"));
        assert_eq!(parse_expression("sensor.t").unwrap(), field("sensor.t"));
    }

    #[test]
    fn test_function_call() {
        let expr = parse_expression("max(a, 0)").unwrap();
        assert_eq!(
            expr,
            Expr::Call {
                func: Func::Max,
                args: vec![field("a"), Expr::Number(0.0)],
            }
        );
    }

    #[test]
    fn test_object_construction() {
        let expr = parse_expression(r#"{ value: v * 2, unit: "C" }"#).unwrap();
        assert_eq!(
            expr,
            Expr::Object(vec![
                (
                    "value".to_string(),
                    Expr::binary(BinaryOp::Mul, field("v"), Expr::Number(2.0)),
                ),
                ("unit".to_string(), Expr::Str("C".to_string())),
            ])
        );
    }

    #[test]
    fn test_exponent_number() {
        assert_eq!(parse_expression("1.5e3").unwrap(), Expr::Number(1500.0));
    }

    #[test]
    fn test_unknown_function_rejected() {
        assert!(parse_expression("eval(payload)").is_err());
    }

    #[test]
    fn test_arity_checked() {
        let err = parse_expression("min(a)").unwrap_err();
        assert!(matches!(err, ParseError::Arity { expected: 2, got: 1, .. }));
    }

    #[test]
    fn test_deep_nesting_rejected() {
        let parens = format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000));
        assert!(matches!(parse_expression(&parens), Err(ParseError::Syntax(_))));

        let negations = format!("{}1", "-".repeat(100_000));
        assert!(matches!(parse_expression(&negations), Err(ParseError::Syntax(_))));

        let chain = vec!["1"; 100_000].join(" + ");
        assert!(matches!(parse_expression(&chain), Err(ParseError::Syntax(_))));

        let calls = format!("{}1{}", "abs(".repeat(10_000), ")".repeat(10_000));
        assert!(matches!(parse_expression(&calls), Err(ParseError::Syntax(_))));
    }

    #[test]
    fn test_moderate_nesting_accepted() {
        let parens = format!("{}v{}", "(".repeat(20), ")".repeat(20));
        assert_eq!(parse_expression(&parens).unwrap(), field("v"));

        let sum = vec!["v"; 20].join(" + ");
        assert!(parse_expression(&sum).unwrap().depth() <= MAX_DEPTH);
    }

    #[test]
    fn test_trailing_input_rejected() {
        assert!(parse_expression("a b").is_err());
        assert!(parse_expression("return payload;").is_err());
        assert!(parse_expression("").is_err());
    }
}
