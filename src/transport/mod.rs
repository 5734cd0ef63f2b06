//! Transport Abstraction
//!
//! The bus only talks to a broker through this narrow surface:
//!
//! - [`Transport::open`] starts a session and hands it an [`EventSink`]
//! - the session reports `Connected` / `Disconnected` / `Error` / `Message`
//!   events through the sink, tagged with the session epoch
//! - [`TransportSession`] accepts `subscribe` / `unsubscribe` / `publish` /
//!   `end` commands without blocking on network I/O
//!
//! Two implementations ship with the crate: [`MqttTransport`] on top of
//! `rumqttc`, and [`LoopbackTransport`], an in-memory transport that
//! records commands and lets the host inject events.

mod loopback;
mod mqtt;

pub use loopback::{LoopbackCommand, LoopbackTransport};
pub use mqtt::MqttTransport;

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

/// Errors reported by a transport
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Session could not be opened
    #[error("Failed to open session: {0}")]
    Open(String),

    /// A subscribe/unsubscribe/publish command was rejected
    #[error("{op} failed: {reason}")]
    Command { op: &'static str, reason: String },

    /// The session has already ended
    #[error("Session closed")]
    Closed,
}

impl TransportError {
    pub fn command(op: &'static str, reason: impl fmt::Display) -> Self {
        TransportError::Command {
            op,
            reason: reason.to_string(),
        }
    }
}

/// Wire flavour of a broker endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Plain MQTT over TCP (`mqtt://`, `tcp://`)
    Tcp,
    /// MQTT over TLS (`mqtts://`, `ssl://`)
    Tls,
    /// MQTT over WebSocket (`ws://`)
    Ws,
    /// MQTT over secure WebSocket (`wss://`)
    Wss,
}

impl Scheme {
    fn from_url_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "mqtt" | "tcp" => Some(Self::Tcp),
            "mqtts" | "ssl" | "tls" => Some(Self::Tls),
            "ws" => Some(Self::Ws),
            "wss" => Some(Self::Wss),
            _ => None,
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Self::Tcp => 1883,
            Self::Tls => 8883,
            Self::Ws => 80,
            Self::Wss => 443,
        }
    }

    pub fn is_websocket(&self) -> bool {
        matches!(self, Self::Ws | Self::Wss)
    }
}

/// A parsed broker address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    /// Request path, only meaningful for WebSocket endpoints
    pub path: String,
    url: String,
}

impl Endpoint {
    /// Parse a broker URL such as `mqtt://broker.local:1883` or
    /// `ws://broker.local:8080/mqtt`
    pub fn parse(input: &str) -> Result<Self, String> {
        let url = Url::parse(input.trim()).map_err(|e| format!("invalid broker URL '{}': {}", input, e))?;

        let scheme = Scheme::from_url_scheme(url.scheme())
            .ok_or_else(|| format!("unsupported broker URL scheme '{}'", url.scheme()))?;

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| format!("broker URL '{}' has no host", input))?
            .to_string();

        let port = url.port().unwrap_or_else(|| scheme.default_port());

        Ok(Self {
            scheme,
            host,
            port,
            path: url.path().to_string(),
            url: url.to_string(),
        })
    }

    /// The normalised URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Session options supplied by the caller of `connect`
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Client id; generated when `None`
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// MQTT keep-alive interval
    pub keep_alive: Duration,
    /// Fixed delay between reconnect attempts
    pub reconnect_period: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            client_id: None,
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            reconnect_period: Duration::from_millis(1000),
        }
    }
}

impl ConnectOptions {
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Client id to present to the broker
    pub fn resolved_client_id(&self) -> String {
        self.client_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(generate_client_id)
    }
}

/// Generate a broker client id like `mqttdeck-3f2a9c1d`
pub fn generate_client_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("mqttdeck-{}", &id[..8])
}

/// Lifecycle and data events raised by a session
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Broker accepted the connection
    Connected,
    /// Connection closed (the session may retry)
    Disconnected,
    /// Transport-level failure (the session may retry)
    Error(String),
    /// Inbound publish
    Message { topic: String, payload: Vec<u8> },
}

/// A transport event tagged with the session that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub epoch: u64,
    pub event: TransportEvent,
}

/// Where a session delivers its events
#[derive(Debug, Clone)]
pub struct EventSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    pub fn new(epoch: u64, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { epoch, tx }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Deliver an event. Returns false once the bus has gone away.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(SessionEvent {
                epoch: self.epoch,
                event,
            })
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Commands accepted by a live session. None of these wait for the
/// broker; outcomes arrive later as events.
pub trait TransportSession: Send + Sync {
    fn subscribe(&self, topic: &str) -> Result<(), TransportError>;
    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;
    /// Close the session. Idempotent.
    fn end(&self);
}

/// Factory for sessions
pub trait Transport: Send + Sync {
    fn open(
        &self,
        endpoint: &Endpoint,
        options: &ConnectOptions,
        events: EventSink,
    ) -> Result<Box<dyn TransportSession>, TransportError>;
}
