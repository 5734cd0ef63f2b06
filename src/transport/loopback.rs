//! In-memory transport
//!
//! Records every command the bus issues and lets the host play the broker:
//! inject connection lifecycle events and inbound messages into the
//! current session. Used by the test suite and the benchmarks, and handy
//! for driving a dashboard without a broker.

use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    ConnectOptions, Endpoint, EventSink, Transport, TransportError, TransportEvent,
    TransportSession,
};

/// A command observed by the loopback transport
#[derive(Debug, Clone, PartialEq)]
pub enum LoopbackCommand {
    Open { url: String, client_id: String },
    Subscribe(String),
    Unsubscribe(String),
    Publish { topic: String, payload: Vec<u8> },
    End,
}

#[derive(Default)]
struct LoopbackState {
    commands: Vec<LoopbackCommand>,
    sink: Option<EventSink>,
    fail_open: Option<String>,
    fail_commands: Option<String>,
}

/// Recording transport; clones share the same log
#[derive(Clone, Default)]
pub struct LoopbackTransport {
    state: Arc<Mutex<LoopbackState>>,
    auto_connect: bool,
}

impl LoopbackTransport {
    /// A transport whose sessions stay in Connecting until
    /// [`accept`](Self::accept) is called
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose sessions report Connected as soon as they open
    pub fn auto_connect() -> Self {
        Self {
            state: Arc::default(),
            auto_connect: true,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every command issued so far, in order
    pub fn commands(&self) -> Vec<LoopbackCommand> {
        self.lock().commands.clone()
    }

    /// Topics subscribed so far, in order (duplicates included)
    pub fn subscribes(&self) -> Vec<String> {
        self.lock()
            .commands
            .iter()
            .filter_map(|c| match c {
                LoopbackCommand::Subscribe(topic) => Some(topic.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear_commands(&self) {
        self.lock().commands.clear();
    }

    /// Make the next `open` fail with the given reason
    pub fn fail_next_open(&self, reason: impl Into<String>) {
        self.lock().fail_open = Some(reason.into());
    }

    /// Make subscribe/unsubscribe/publish fail until cleared with `None`
    pub fn fail_commands(&self, reason: Option<String>) {
        self.lock().fail_commands = reason;
    }

    /// Epoch of the most recently opened session
    pub fn current_epoch(&self) -> Option<u64> {
        self.lock().sink.as_ref().map(EventSink::epoch)
    }

    /// Emit an event on the most recently opened session
    pub fn inject(&self, event: TransportEvent) -> bool {
        match self.lock().sink.as_ref() {
            Some(sink) => sink.emit(event),
            None => false,
        }
    }

    /// Broker accepted the connection
    pub fn accept(&self) -> bool {
        self.inject(TransportEvent::Connected)
    }

    /// Connection dropped by the network or broker
    pub fn drop_connection(&self) -> bool {
        self.inject(TransportEvent::Disconnected)
    }

    /// Deliver an inbound message
    pub fn deliver(&self, topic: &str, payload: impl Into<Vec<u8>>) -> bool {
        self.inject(TransportEvent::Message {
            topic: topic.to_string(),
            payload: payload.into(),
        })
    }

    fn record(&self, command: LoopbackCommand) -> Result<(), TransportError> {
        let mut state = self.lock();
        if let Some(reason) = &state.fail_commands {
            let op = match command {
                LoopbackCommand::Subscribe(_) => "subscribe",
                LoopbackCommand::Unsubscribe(_) => "unsubscribe",
                _ => "publish",
            };
            return Err(TransportError::command(op, reason));
        }
        state.commands.push(command);
        Ok(())
    }
}

impl Transport for LoopbackTransport {
    fn open(
        &self,
        endpoint: &Endpoint,
        options: &ConnectOptions,
        events: EventSink,
    ) -> Result<Box<dyn TransportSession>, TransportError> {
        let mut state = self.lock();
        if let Some(reason) = state.fail_open.take() {
            return Err(TransportError::Open(reason));
        }

        state.commands.push(LoopbackCommand::Open {
            url: endpoint.url().to_string(),
            client_id: options.resolved_client_id(),
        });

        if self.auto_connect {
            events.emit(TransportEvent::Connected);
        }
        state.sink = Some(events);

        Ok(Box::new(LoopbackSession {
            transport: self.clone(),
        }))
    }
}

struct LoopbackSession {
    transport: LoopbackTransport,
}

impl TransportSession for LoopbackSession {
    fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.transport
            .record(LoopbackCommand::Subscribe(topic.to_string()))
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.transport
            .record(LoopbackCommand::Unsubscribe(topic.to_string()))
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.transport.record(LoopbackCommand::Publish {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        })
    }

    fn end(&self) {
        self.transport.lock().commands.push(LoopbackCommand::End);
    }
}
