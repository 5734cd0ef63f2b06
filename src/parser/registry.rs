//! Parser Registry
//!
//! Maps exact topic strings to decoders. Topics without an entry fall back
//! to the default builtin parser (JSON). Every decode is fenced: errors and
//! panics from a decoder become a [`DecodeError`] and ingestion carries on.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::parser::ast::Expr;
use crate::parser::error::{DecodeError, ParseError};
use crate::parser::eval::evaluate;
use crate::parser::grammar::parse_expression;

/// A compiled-in decoder selected by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuiltinParser {
    /// Self-describing JSON document
    #[default]
    Json,
    /// Payload as a UTF-8 string
    Text,
    /// Trimmed payload parsed as a floating point number
    Number,
    /// `true/false`, `on/off`, `1/0` (case-insensitive)
    Bool,
}

impl BuiltinParser {
    /// Look up a builtin by name
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "text" | "string" => Some(Self::Text),
            "number" | "float" => Some(Self::Number),
            "bool" | "boolean" => Some(Self::Bool),
            _ => None,
        }
    }

    /// Decode a raw payload
    pub fn decode(&self, payload: &[u8]) -> Result<Value, DecodeError> {
        match self {
            Self::Json => {
                serde_json::from_slice(payload).map_err(|e| DecodeError::Json(e.to_string()))
            }
            Self::Text => Ok(Value::String(text(payload)?.to_string())),
            Self::Number => {
                let text = text(payload)?.trim();
                let n = text.parse::<f64>().map_err(|_| DecodeError::Conversion {
                    value: text.to_string(),
                    target: "number",
                })?;
                serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .ok_or(DecodeError::NonFinite)
            }
            Self::Bool => {
                let text = text(payload)?.trim();
                match text.to_lowercase().as_str() {
                    "true" | "on" | "1" => Ok(Value::Bool(true)),
                    "false" | "off" | "0" => Ok(Value::Bool(false)),
                    _ => Err(DecodeError::Conversion {
                        value: text.to_string(),
                        target: "bool",
                    }),
                }
            }
        }
    }
}

impl fmt::Display for BuiltinParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Text => write!(f, "text"),
            Self::Number => write!(f, "number"),
            Self::Bool => write!(f, "bool"),
        }
    }
}

fn text(payload: &[u8]) -> Result<&str, DecodeError> {
    std::str::from_utf8(payload).map_err(|_| DecodeError::Utf8)
}

/// A compiled parser expression together with its source text
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    expr: Expr,
}

impl Expression {
    /// Compile expression text
    pub fn compile(source: &str) -> Result<Self, ParseError> {
        Ok(Self {
            source: source.trim().to_string(),
            expr: parse_expression(source)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Decode a payload: JSON documents are evaluated as-is, anything else
    /// is presented to the expression as a string root.
    pub fn decode(&self, payload: &[u8]) -> Result<Value, DecodeError> {
        let root = match serde_json::from_slice::<Value>(payload) {
            Ok(value) => value,
            Err(_) => Value::String(text(payload)?.to_string()),
        };
        evaluate(&self.expr, &root)
    }
}

/// Host-supplied decode function
pub type DecodeFn = Arc<dyn Fn(&[u8]) -> Result<Value, DecodeError> + Send + Sync>;

/// A decoder registered for a topic
#[derive(Clone)]
pub enum Parser {
    Builtin(BuiltinParser),
    Expression(Expression),
    Custom(DecodeFn),
}

impl Parser {
    /// Wrap a closure as a parser
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&[u8]) -> Result<Value, DecodeError> + Send + Sync + 'static,
    {
        Parser::Custom(Arc::new(f))
    }

    /// Compile an expression parser
    pub fn expression(source: &str) -> Result<Self, ParseError> {
        Expression::compile(source).map(Parser::Expression)
    }

    fn run(&self, payload: &[u8]) -> Result<Value, DecodeError> {
        match self {
            Parser::Builtin(builtin) => builtin.decode(payload),
            Parser::Expression(expression) => expression.decode(payload),
            Parser::Custom(f) => f(payload),
        }
    }
}

impl fmt::Debug for Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parser::Builtin(builtin) => write!(f, "Builtin({})", builtin),
            Parser::Expression(expression) => write!(f, "Expression({:?})", expression.source()),
            Parser::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Parser declaration as it appears in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParserSpec {
    /// Exact topic the parser applies to
    pub topic: String,
    /// Expression source, e.g. `v * 2`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Builtin parser name, e.g. `number`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builtin: Option<String>,
}

impl ParserSpec {
    /// Build the parser this spec describes
    pub fn build(&self) -> Result<Parser, ParseError> {
        match (&self.expression, &self.builtin) {
            (Some(source), None) => Parser::expression(source),
            (None, Some(name)) => BuiltinParser::from_name(name)
                .map(Parser::Builtin)
                .ok_or_else(|| ParseError::UnknownBuiltin(name.clone())),
            (Some(_), Some(_)) => Err(ParseError::InvalidSpec(format!(
                "parser for '{}' sets both expression and builtin",
                self.topic
            ))),
            (None, None) => Err(ParseError::InvalidSpec(format!(
                "parser for '{}' sets neither expression nor builtin",
                self.topic
            ))),
        }
    }
}

/// Per-topic decoder table
#[derive(Debug, Default)]
pub struct ParserRegistry {
    entries: HashMap<String, Parser>,
    default: BuiltinParser,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose fallback is `default` instead of JSON
    pub fn with_default(default: BuiltinParser) -> Self {
        Self {
            entries: HashMap::new(),
            default,
        }
    }

    /// Register or replace the parser for a topic
    pub fn set_parser(&mut self, topic: impl Into<String>, parser: Parser) {
        let topic = topic.into();
        tracing::debug!(topic = %topic, parser = ?parser, "Parser registered");
        self.entries.insert(topic, parser);
    }

    /// Remove a topic's parser, restoring the default
    pub fn remove_parser(&mut self, topic: &str) -> Option<Parser> {
        self.entries.remove(topic)
    }

    pub fn get(&self, topic: &str) -> Option<&Parser> {
        self.entries.get(topic)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decode a payload for a topic. Never panics.
    pub fn decode(&self, topic: &str, payload: &[u8]) -> Result<Value, DecodeError> {
        match self.entries.get(topic) {
            Some(parser) => {
                match panic::catch_unwind(AssertUnwindSafe(|| parser.run(payload))) {
                    Ok(result) => result,
                    Err(cause) => Err(DecodeError::Panicked(panic_message(cause.as_ref()))),
                }
            }
            None => self.default.decode(payload),
        }
    }
}

fn panic_message(cause: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = cause.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
