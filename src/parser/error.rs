//! Parser error types
//!
//! `ParseError` covers compiling a parser expression. `DecodeError` covers
//! a decode that failed at ingestion time; it is recorded on the message
//! and never propagated to callers.

use thiserror::Error;

/// Errors raised while compiling a parser expression or spec
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Expression text did not match the grammar
    #[error("Syntax error: {0}")]
    Syntax(String),

    /// Function name not in the builtin set
    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    /// Function called with the wrong number of arguments
    #[error("Function {name} expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },

    /// Builtin parser name not recognised
    #[error("Unknown builtin parser: {0}")]
    UnknownBuiltin(String),

    /// Neither or both of `expression`/`builtin` given
    #[error("Invalid parser spec: {0}")]
    InvalidSpec(String),
}

/// Reasons a payload could not be decoded
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Payload is not valid JSON
    #[error("Invalid JSON: {0}")]
    Json(String),

    /// Payload is not valid UTF-8 where text was required
    #[error("Payload is not valid UTF-8")]
    Utf8,

    /// Payload text could not be converted to the requested scalar
    #[error("Cannot convert '{value}' to {target}")]
    Conversion { value: String, target: &'static str },

    /// Expression referenced a field the payload does not have
    #[error("Missing field: {0}")]
    MissingField(String),

    /// Expression applied arithmetic to a non-numeric value
    #[error("Not a number: {0}")]
    NotNumeric(String),

    /// Arithmetic produced NaN or infinity (e.g. division by zero)
    #[error("Arithmetic result is not finite")]
    NonFinite,

    /// A user-supplied decode function panicked
    #[error("Decoder panicked: {0}")]
    Panicked(String),

    /// A user-supplied decode function reported its own failure
    #[error("{0}")]
    Custom(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ParseError::Arity {
            name: "min".to_string(),
            expected: 2,
            got: 1,
        };
        assert_eq!(err.to_string(), "Function min expects 2 argument(s), got 1");

        let err = DecodeError::Conversion {
            value: "abc".to_string(),
            target: "number",
        };
        assert_eq!(err.to_string(), "Cannot convert 'abc' to number");
    }
}
