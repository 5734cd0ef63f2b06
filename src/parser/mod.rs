//! Payload Decoding
//!
//! Turns raw payload bytes into structured values:
//!
//! - **registry**: Per-topic decoder table with a JSON default
//! - **ast**: Expression tree for custom parsers
//! - **grammar**: Expression text → AST
//! - **eval**: AST evaluation against a payload
//!
//! Custom parsers are either compiled-in builtins selected by name or
//! expressions in a small arithmetic language. Host code embedding the bus
//! can also register a Rust closure.
//!
//! # Example
//!
//! ```rust
//! use mqttdeck::parser::{Parser, ParserRegistry};
//!
//! let mut registry = ParserRegistry::new();
//! registry.set_parser("sensors/t2", Parser::expression("v * 2").unwrap());
//!
//! let value = registry.decode("sensors/t2", br#"{"v":3}"#).unwrap();
//! assert_eq!(value.as_f64(), Some(6.0));
//! ```

mod ast;
mod error;
mod eval;
mod grammar;
mod registry;

pub use ast::{BinaryOp, Expr, Func};
pub use error::{DecodeError, ParseError};
pub use eval::{coerce_number, evaluate};
pub use grammar::parse_expression;
pub use registry::{BuiltinParser, DecodeFn, Expression, Parser, ParserRegistry, ParserSpec};
