//! Connection Manager
//!
//! Owns the transport session and the visible [`ConnectionState`]. Each
//! `connect` starts a new session epoch; events carrying an older epoch are
//! dropped so a late callback from a torn-down session cannot touch the
//! state of its successor.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::error::{BusError, BusResult};
use crate::transport::{
    ConnectOptions, Endpoint, EventSink, SessionEvent, Transport, TransportEvent, TransportSession,
};

/// Visible connectivity of the bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum ConnectionState {
    /// No session
    Disconnected,
    /// Session opened, waiting for the broker
    Connecting,
    /// Broker accepted the session
    Connected,
    /// Transport failure; the session keeps retrying
    Failed(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// What an accepted session event means for the rest of the bus
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Session is (again) connected; broker-side subscriptions are empty
    Connected,
    /// Session lost its connection; broker-side subscriptions are void
    Lost,
    /// Inbound message for the current session
    Message { topic: String, payload: Vec<u8> },
}

struct ActiveSession {
    epoch: u64,
    endpoint: Endpoint,
    handle: Box<dyn TransportSession>,
}

/// Sole owner of the session and its state
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    session: Option<ActiveSession>,
    epoch: u64,
    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    /// Create a manager. Sessions deliver their events into `events_tx`.
    pub fn new(
        transport: Arc<dyn Transport>,
        events_tx: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            events_tx,
            session: None,
            epoch: 0,
            state_tx,
        }
    }

    /// Open a session to `url`, replacing any existing one.
    ///
    /// Returns as soon as the session is opened; the Connected transition
    /// arrives later as an event. Returns the new session epoch.
    ///
    /// Broker-side failures happen inside the opened session, which keeps
    /// retrying every `reconnect_period`. A failure to open the session at
    /// all (no runtime, transport refused) is final: the state becomes
    /// `Failed` and the caller must connect again. A bad URL is rejected
    /// before anything changes.
    pub fn connect(&mut self, url: &str, options: &ConnectOptions) -> BusResult<u64> {
        let endpoint = Endpoint::parse(url).map_err(BusError::Configuration)?;

        if self.session.is_some() {
            tracing::info!(endpoint = %endpoint, "Replacing existing session");
            self.teardown();
        }

        self.epoch += 1;
        let epoch = self.epoch;
        self.set_state(ConnectionState::Connecting);

        let sink = EventSink::new(epoch, self.events_tx.clone());
        match self.transport.open(&endpoint, options, sink) {
            Ok(handle) => {
                tracing::info!(endpoint = %endpoint, epoch, "Connecting");
                self.session = Some(ActiveSession {
                    epoch,
                    endpoint,
                    handle,
                });
                Ok(epoch)
            }
            Err(e) => {
                tracing::warn!(endpoint = %endpoint, error = %e, "Failed to open session");
                self.set_state(ConnectionState::Failed(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Close the session. Idempotent; never reconnects by itself.
    pub fn disconnect(&mut self) {
        if self.session.is_some() {
            self.teardown();
            tracing::info!("Disconnected");
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            session.handle.end();
            tracing::debug!(epoch = session.epoch, endpoint = %session.endpoint, "Session ended");
        }
        // Anything still in flight from the old session is now stale
        self.epoch += 1;
    }

    pub fn is_connected(&self) -> bool {
        self.state_tx.borrow().is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    /// Watch state transitions
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Endpoint of the current session, if any
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.session.as_ref().map(|s| &s.endpoint)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// The session, only while Connected
    pub fn session(&self) -> BusResult<&dyn TransportSession> {
        match &self.session {
            Some(session) if self.is_connected() => Ok(session.handle.as_ref()),
            _ => Err(BusError::NotConnected),
        }
    }

    /// Apply an event from a session. Returns `None` for stale events and
    /// events that do not change anything downstream.
    pub fn apply(&mut self, event: SessionEvent) -> Option<Transition> {
        let current = self.session.as_ref().map(|s| s.epoch);
        if current != Some(event.epoch) {
            tracing::debug!(
                epoch = event.epoch,
                current = ?current,
                "Ignoring event from stale session"
            );
            return None;
        }

        match event.event {
            TransportEvent::Connected => {
                tracing::info!(epoch = event.epoch, "Connected");
                self.set_state(ConnectionState::Connected);
                Some(Transition::Connected)
            }
            TransportEvent::Disconnected => {
                let was_connected = self.is_connected();
                tracing::info!(epoch = event.epoch, "Connection closed, retrying");
                self.set_state(ConnectionState::Connecting);
                was_connected.then_some(Transition::Lost)
            }
            TransportEvent::Error(reason) => {
                let was_connected = self.is_connected();
                tracing::warn!(epoch = event.epoch, error = %reason, "Transport error");
                self.set_state(ConnectionState::Failed(reason));
                was_connected.then_some(Transition::Lost)
            }
            TransportEvent::Message { topic, payload } => {
                Some(Transition::Message { topic, payload })
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{LoopbackCommand, LoopbackTransport};

    fn manager(transport: &LoopbackTransport) -> (ConnectionManager, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionManager::new(Arc::new(transport.clone()), tx), rx)
    }

    fn pump(manager: &mut ConnectionManager, rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<Transition> {
        std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|event| manager.apply(event))
            .collect()
    }

    #[test]
    fn test_connect_lifecycle() {
        let transport = LoopbackTransport::new();
        let (mut manager, mut rx) = manager(&transport);

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        manager.connect("mqtt://localhost", &ConnectOptions::default()).unwrap();
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert!(!manager.is_connected());

        transport.accept();
        assert_eq!(pump(&mut manager, &mut rx), vec![Transition::Connected]);
        assert!(manager.is_connected());
        assert!(manager.session().is_ok());

        manager.disconnect();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(matches!(manager.session(), Err(BusError::NotConnected)));
        assert_eq!(transport.commands().last(), Some(&LoopbackCommand::End));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let transport = LoopbackTransport::new();
        let (mut manager, _rx) = manager(&transport);

        manager.disconnect();
        manager.disconnect();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(transport.commands().is_empty());
    }

    #[test]
    fn test_invalid_url_is_configuration_error() {
        let transport = LoopbackTransport::new();
        let (mut manager, _rx) = manager(&transport);

        let err = manager.connect("http://nope", &ConnectOptions::default()).unwrap_err();
        assert!(matches!(err, BusError::Configuration(_)));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_open_failure_sets_failed() {
        let transport = LoopbackTransport::new();
        let (mut manager, _rx) = manager(&transport);

        transport.fail_next_open("connection refused");
        let err = manager.connect("mqtt://localhost", &ConnectOptions::default()).unwrap_err();
        assert!(matches!(err, BusError::Transport(_)));
        assert!(matches!(manager.state(), ConnectionState::Failed(_)));
    }

    #[test]
    fn test_stale_events_ignored() {
        let transport = LoopbackTransport::new();
        let (mut manager, mut rx) = manager(&transport);

        manager.connect("mqtt://first", &ConnectOptions::default()).unwrap();
        let first_epoch = transport.current_epoch().unwrap();

        manager.connect("mqtt://second", &ConnectOptions::default()).unwrap();

        // A late event from the first session
        let stale = SessionEvent {
            epoch: first_epoch,
            event: TransportEvent::Connected,
        };
        assert_eq!(manager.apply(stale), None);
        assert_eq!(manager.state(), ConnectionState::Connecting);

        transport.accept();
        assert_eq!(pump(&mut manager, &mut rx), vec![Transition::Connected]);
        assert_eq!(manager.endpoint().unwrap().host, "second");
    }

    #[test]
    fn test_events_after_disconnect_ignored() {
        let transport = LoopbackTransport::auto_connect();
        let (mut manager, mut rx) = manager(&transport);

        manager.connect("mqtt://localhost", &ConnectOptions::default()).unwrap();
        manager.disconnect();

        // Queued Connected plus a late message, both from the ended session
        transport.deliver("t", "1");
        assert!(pump(&mut manager, &mut rx).is_empty());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_error_then_reconnect() {
        let transport = LoopbackTransport::auto_connect();
        let (mut manager, mut rx) = manager(&transport);

        manager.connect("mqtt://localhost", &ConnectOptions::default()).unwrap();
        assert_eq!(pump(&mut manager, &mut rx), vec![Transition::Connected]);

        transport.inject(TransportEvent::Error("broken pipe".to_string()));
        assert_eq!(pump(&mut manager, &mut rx), vec![Transition::Lost]);
        assert_eq!(manager.state(), ConnectionState::Failed("broken pipe".to_string()));

        // Repeated failures while already down are not new losses
        transport.inject(TransportEvent::Error("refused".to_string()));
        assert!(pump(&mut manager, &mut rx).is_empty());

        transport.accept();
        assert_eq!(pump(&mut manager, &mut rx), vec![Transition::Connected]);
    }

    #[test]
    fn test_watch_state() {
        let transport = LoopbackTransport::auto_connect();
        let (mut manager, mut rx) = manager(&transport);
        let watcher = manager.watch();

        manager.connect("mqtt://localhost", &ConnectOptions::default()).unwrap();
        pump(&mut manager, &mut rx);
        assert_eq!(*watcher.borrow(), ConnectionState::Connected);
    }
}
