//! Bus error types
//!
//! The crate-level error taxonomy. Decode failures are not part of it:
//! they are recorded on the [`Message`](crate::cache::Message) and never
//! returned from an operation.

use thiserror::Error;

use crate::parser::ParseError;
use crate::series::HistoryError;
use crate::transport::TransportError;

/// Errors returned by [`MessageBus`](crate::bus::MessageBus) operations
#[derive(Error, Debug)]
pub enum BusError {
    /// Operation requires a Connected session
    #[error("Not connected to a broker")]
    NotConnected,

    /// The transport rejected a command or failed to open a session
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Invalid input at the configuration boundary (endpoint, widget, topic)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Parser expression failed to compile
    #[error("Parser error: {0}")]
    Parser(#[from] ParseError),

    /// History snapshot could not be read or written
    #[error("History error: {0}")]
    History(#[from] HistoryError),
}

impl BusError {
    pub fn config(message: impl Into<String>) -> Self {
        BusError::Configuration(message.into())
    }
}

/// Result type alias for bus operations
pub type BusResult<T> = Result<T, BusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(BusError::NotConnected.to_string(), "Not connected to a broker");

        let err = BusError::config("widget title is required");
        assert_eq!(
            err.to_string(),
            "Configuration error: widget title is required"
        );
    }

    #[test]
    fn test_transport_error_conversion() {
        let err: BusError = TransportError::Closed.into();
        assert!(matches!(err, BusError::Transport(TransportError::Closed)));
    }
}
