//! # mqttdeck
//!
//! Message bus client and derived-data cache for MQTT dashboards: one
//! broker connection, topic subscriptions, payload decoding, a latest-value
//! cache, value extraction, and bounded per-widget time series.
//!
//! ## Modules
//!
//! - [`bus`]: `MessageBus`, the core object handed to widgets
//! - [`connection`]: session lifecycle and connectivity state
//! - [`subscriptions`]: desired vs. acknowledged topic sets
//! - [`parser`]: per-topic decoders and the expression mini-language
//! - [`cache`]: latest message per topic with change notification
//! - [`extract`]: field-path value extraction
//! - [`series`]: bounded sample buffers with optional history
//! - [`transport`]: the narrow broker surface, over `rumqttc` or in memory
//! - [`widgets`]: widget specs validated at the configuration boundary
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mqttdeck::{BusConfig, ConnectOptions, MessageBus, MqttTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = MessageBus::new(Arc::new(MqttTransport::default()), BusConfig::default(), None);
//!     bus.init()?;
//!
//!     bus.connect("mqtt://localhost:1883", ConnectOptions::default()).await?;
//!     bus.watch_state().wait_for(|s| s.is_connected()).await?;
//!
//!     bus.subscribe("sensors/t1").await?;
//!     if let Some(value) = bus.extract("sensors/t1", Some("value")).await {
//!         println!("sensors/t1 = {}", value);
//!     }
//!
//!     bus.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod extract;
pub mod logging;
pub mod parser;
pub mod series;
pub mod subscriptions;
pub mod transport;
pub mod widgets;

// Re-export top-level types for convenience
pub use bus::{BusConfig, MessageBus};

pub use cache::{CacheEvent, Message, MessageCache};

pub use connection::{ConnectionManager, ConnectionState};

pub use error::{BusError, BusResult};

pub use extract::{extract, FieldPath};

pub use parser::{BuiltinParser, DecodeError, ParseError, Parser, ParserRegistry, ParserSpec};

pub use series::{
    FileHistoryStore, HistoryError, HistoryStore, MemoryHistoryStore, Sample, SeriesBuffer,
    SeriesStore, Trend,
};

pub use subscriptions::{SubscribeOutcome, SubscriptionRegistry, UnsubscribeOutcome};

pub use transport::{
    ConnectOptions, Endpoint, LoopbackTransport, MqttTransport, Transport, TransportError,
    TransportSession,
};

pub use widgets::{SeriesBinding, WidgetKind, WidgetSpec};

pub use config::{Config, ConfigError, LoggingConfig};
