//! Message Bus
//!
//! [`MessageBus`] is the explicitly constructed core object the host
//! application passes to its widgets. It composes the connection manager,
//! subscription registry, parser registry, message cache and series store
//! behind one lock, and runs two background tasks once initialised:
//!
//! - the event pump, applying session events one at a time
//! - the history flusher, snapshotting dirty series (only with a history store)
//!
//! ```text
//! transport → SessionEvent → ConnectionManager (epoch check)
//!           → Subscriptions (filter) → ParserRegistry → MessageCache (notify)
//!           → SeriesStore (bound series)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mqttdeck::bus::{BusConfig, MessageBus};
//! use mqttdeck::transport::{ConnectOptions, MqttTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = MessageBus::new(Arc::new(MqttTransport::default()), BusConfig::default(), None);
//!     bus.init()?;
//!
//!     bus.connect("mqtt://localhost:1883", ConnectOptions::default()).await?;
//!     let mut state = bus.watch_state();
//!     state.wait_for(|s| s.is_connected()).await?;
//!
//!     bus.subscribe("sensors/#").await?;
//!     bus.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod state;

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::cache::{CacheEvent, Message, MessageCache};
use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::{BusError, BusResult};
use crate::extract::{extract, FieldPath};
use crate::parser::{BuiltinParser, DecodeError, Parser, ParserRegistry};
use crate::series::{write_snapshots, HistoryError, HistoryStore, Sample, SeriesStore, Trend};
use crate::subscriptions::{
    valid_filter, valid_topic, SubscribeOutcome, SubscriptionRegistry, UnsubscribeOutcome,
};
use crate::transport::{ConnectOptions, SessionEvent, Transport};
use crate::widgets::{SeriesBinding, WidgetSpec};

use state::BusState;

/// Tunables for a [`MessageBus`]
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Buffered cache notifications per lagging watcher
    pub cache_events_capacity: usize,
    /// Capacity of series created without an explicit one
    pub series_capacity: usize,
    /// How often dirty series are snapshotted
    pub history_flush_interval: Duration,
    /// Parser for topics without an explicit one
    pub default_parser: BuiltinParser,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            cache_events_capacity: 1024,
            series_capacity: 20,
            history_flush_interval: Duration::from_secs(5),
            default_parser: BuiltinParser::Json,
        }
    }
}

struct Shared {
    state: Mutex<BusState>,
    state_rx: watch::Receiver<ConnectionState>,
    /// Taken by the event pump on `init`
    events_rx: StdMutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    /// Held from taking snapshots until they are written, so an older
    /// snapshot never lands after a newer one
    flush_lock: Mutex<()>,
    has_history: bool,
    config: BusConfig,
}

/// Handle to the core; clones share the same bus
#[derive(Clone)]
pub struct MessageBus {
    shared: Arc<Shared>,
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MessageBus {
    /// Build a bus over `transport`. Series are snapshotted to `history`
    /// when one is given.
    pub fn new(
        transport: Arc<dyn Transport>,
        config: BusConfig,
        history: Option<Arc<dyn HistoryStore>>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connection = ConnectionManager::new(transport, events_tx);
        let state_rx = connection.watch();

        let has_history = history.is_some();
        let mut series = SeriesStore::new(config.series_capacity);
        if let Some(history) = history {
            series = series.with_history(history);
        }

        let state = BusState {
            connection,
            subscriptions: SubscriptionRegistry::new(),
            parsers: ParserRegistry::with_default(config.default_parser),
            cache: MessageCache::new(config.cache_events_capacity),
            series,
            bindings: HashMap::new(),
        };

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                state_rx,
                events_rx: StdMutex::new(Some(events_rx)),
                tasks: StdMutex::new(Vec::new()),
                flush_lock: Mutex::new(()),
                has_history,
                config,
            }),
        }
    }

    // ==================== Lifecycle ====================

    /// Start the background tasks. Must run inside a tokio runtime.
    /// Calling it again is a no-op.
    pub fn init(&self) -> BusResult<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BusError::config(format!("no async runtime: {}", e)))?;

        let Some(events_rx) = lock(&self.shared.events_rx).take() else {
            tracing::debug!("Bus already initialised");
            return Ok(());
        };

        let mut tasks = lock(&self.shared.tasks);
        tasks.push(runtime.spawn(run_event_pump(self.clone(), events_rx)));

        if self.shared.has_history {
            tasks.push(runtime.spawn(run_history_flush(
                self.clone(),
                self.shared.config.history_flush_interval,
            )));
        }

        tracing::info!(history = self.shared.has_history, "Message bus started");
        Ok(())
    }

    /// Stop background tasks, end the session and flush series history.
    /// The bus cannot be initialised again afterwards.
    pub async fn shutdown(&self) -> BusResult<()> {
        let tasks: Vec<JoinHandle<()>> = lock(&self.shared.tasks).drain(..).collect();
        for task in tasks {
            task.abort();
        }
        lock(&self.shared.events_rx).take();

        {
            let mut state = self.shared.state.lock().await;
            state.connection.disconnect();
            state.subscriptions.invalidate();
        }
        let flushed = self.flush_history().await?;

        tracing::info!(flushed, "Message bus stopped");
        Ok(())
    }

    // ==================== Connection ====================

    /// Open a session to `url`, replacing the current one. Returns once the
    /// session is opened; watch [`state`](Self::state) for the outcome.
    pub async fn connect(&self, url: &str, options: ConnectOptions) -> BusResult<()> {
        let mut state = self.shared.state.lock().await;
        let BusState {
            connection,
            subscriptions,
            ..
        } = &mut *state;

        // The old session's broker-side subscriptions die with it
        subscriptions.invalidate();
        connection.connect(url, &options)?;
        Ok(())
    }

    /// End the session. Idempotent. Desired subscriptions are kept and
    /// re-issued on the next connect.
    pub async fn disconnect(&self) {
        let mut state = self.shared.state.lock().await;
        state.connection.disconnect();
        state.subscriptions.invalidate();
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state_rx.borrow().is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state_rx.borrow().clone()
    }

    /// Observe connection state transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_rx.clone()
    }

    // ==================== Subscriptions ====================

    /// Subscribe to a topic filter. Fails with `NotConnected` unless the
    /// session is Connected; a duplicate is reported, not rejected.
    pub async fn subscribe(&self, topic: &str) -> BusResult<SubscribeOutcome> {
        if !valid_filter(topic) {
            return Err(BusError::config(format!("invalid topic filter '{}'", topic)));
        }

        let mut state = self.shared.state.lock().await;
        let BusState {
            connection,
            subscriptions,
            ..
        } = &mut *state;

        let session = connection.session()?;
        subscriptions.subscribe(topic, session)
    }

    /// Drop a subscription and the cached messages it covered. Local
    /// bookkeeping always happens; the broker is told only while Connected.
    pub async fn unsubscribe(&self, topic: &str) -> BusResult<UnsubscribeOutcome> {
        Ok(self.shared.state.lock().await.unsubscribe(topic))
    }

    /// Desired subscriptions, sorted
    pub async fn subscriptions(&self) -> Vec<String> {
        self.shared.state.lock().await.subscriptions.topics()
    }

    // ==================== Publish ====================

    /// Publish a payload. Fails with `NotConnected` unless Connected.
    pub async fn publish(&self, topic: &str, payload: impl AsRef<[u8]>) -> BusResult<()> {
        if !valid_topic(topic) {
            return Err(BusError::config(format!("invalid publish topic '{}'", topic)));
        }

        let state = self.shared.state.lock().await;
        state.connection.session()?.publish(topic, payload.as_ref())?;
        tracing::debug!(topic = %topic, "Published");
        Ok(())
    }

    // ==================== Parsers ====================

    /// Register or replace the parser for a topic
    pub async fn set_parser(&self, topic: &str, parser: Parser) {
        self.shared.state.lock().await.parsers.set_parser(topic, parser);
    }

    /// Compile and register an expression parser
    pub async fn set_expression(&self, topic: &str, expression: &str) -> BusResult<()> {
        let parser = Parser::expression(expression)?;
        self.set_parser(topic, parser).await;
        Ok(())
    }

    /// Register a closure as the parser for a topic
    pub async fn set_decode_fn<F>(&self, topic: &str, decode: F)
    where
        F: Fn(&[u8]) -> Result<Value, DecodeError> + Send + Sync + 'static,
    {
        self.set_parser(topic, Parser::custom(decode)).await;
    }

    pub async fn remove_parser(&self, topic: &str) -> Option<Parser> {
        self.shared.state.lock().await.parsers.remove_parser(topic)
    }

    // ==================== Cache ====================

    /// Apply an inbound message directly, bypassing the transport
    pub async fn on_message(
        &self,
        topic: &str,
        payload: impl Into<Vec<u8>>,
        received_at: i64,
    ) -> Arc<Message> {
        let mut state = self.shared.state.lock().await;
        state.ingest(topic, payload.into(), received_at)
    }

    pub async fn get_message(&self, topic: &str) -> Option<Arc<Message>> {
        self.shared.state.lock().await.cache.get(topic)
    }

    /// Extract a value from the latest message on `topic`
    pub async fn extract(&self, topic: &str, path: Option<&str>) -> Option<Value> {
        let message = self.get_message(topic).await;
        let path = path.and_then(FieldPath::parse);
        extract(message.as_deref(), path.as_ref())
    }

    /// Topics with a cached message, sorted
    pub async fn topics(&self) -> Vec<String> {
        self.shared.state.lock().await.cache.topics()
    }

    /// Receive cache change notifications
    pub async fn watch_messages(&self) -> broadcast::Receiver<CacheEvent> {
        self.shared.state.lock().await.cache.subscribe()
    }

    /// Drop every cached message. Subscriptions are kept.
    pub async fn clear_messages(&self) {
        self.shared.state.lock().await.cache.clear();
    }

    // ==================== Series ====================

    /// Validate a widget, install its parser and bind its series
    pub async fn add_widget(&self, spec: &WidgetSpec) -> BusResult<SeriesBinding> {
        let binding = spec.binding()?;
        let parser = spec
            .parser
            .as_deref()
            .filter(|source| !source.trim().is_empty())
            .map(Parser::expression)
            .transpose()?;

        let mut state = self.shared.state.lock().await;
        if let Some(parser) = parser {
            state.parsers.set_parser(binding.topic.clone(), parser);
        }
        bind(&mut state, binding.clone());
        Ok(binding)
    }

    /// Feed a series from every message on the binding's topic
    pub async fn bind_series(&self, binding: SeriesBinding) {
        let mut state = self.shared.state.lock().await;
        bind(&mut state, binding);
    }

    /// Stop feeding a series. Its samples and history are kept.
    pub async fn unbind_series(&self, series_id: &str) -> Option<SeriesBinding> {
        self.shared.state.lock().await.bindings.remove(series_id)
    }

    pub async fn push_sample(&self, series_id: &str, sample: Sample) {
        self.shared.state.lock().await.series.push(series_id, sample);
    }

    /// Samples of a series, oldest first
    pub async fn read_series(&self, series_id: &str) -> Vec<Sample> {
        self.shared.state.lock().await.series.read(series_id)
    }

    pub async fn latest_sample(&self, series_id: &str) -> Option<Sample> {
        self.shared.state.lock().await.series.latest(series_id)
    }

    pub async fn trend(&self, series_id: &str) -> Option<Trend> {
        self.shared.state.lock().await.series.trend(series_id)
    }

    pub async fn clear_series(&self, series_id: &str) {
        self.shared.state.lock().await.series.clear(series_id);
    }

    /// Snapshot dirty series now. Returns how many were written.
    ///
    /// Snapshots are encoded under the bus lock and written on the blocking
    /// pool, so ingestion never waits on disk.
    pub async fn flush_history(&self) -> BusResult<usize> {
        let _flushing = self.shared.flush_lock.lock().await;

        let (history, snapshots) = {
            let mut state = self.shared.state.lock().await;
            let Some(history) = state.series.history() else {
                return Ok(0);
            };
            (history, state.series.take_snapshots()?)
        };
        if snapshots.is_empty() {
            return Ok(0);
        }

        let (snapshots, result) = tokio::task::spawn_blocking(move || {
            let result = write_snapshots(history.as_ref(), &snapshots);
            (snapshots, result)
        })
        .await
        .map_err(|e| HistoryError::Task(e.to_string()))?;

        match result {
            Ok(written) => Ok(written),
            Err(e) => {
                self.shared.state.lock().await.series.mark_dirty(&snapshots);
                Err(e.into())
            }
        }
    }

    // ==================== Events ====================

    /// Apply one session event
    pub async fn handle_event(&self, event: SessionEvent) {
        let received_at = Utc::now().timestamp_millis();
        self.shared.state.lock().await.apply(event, received_at);
    }

    /// Apply every queued session event without the background pump.
    /// Returns 0 once `init` has handed the queue to the pump.
    pub async fn process_pending(&self) -> usize {
        let events: Vec<SessionEvent> = {
            let mut guard = lock(&self.shared.events_rx);
            match guard.as_mut() {
                Some(rx) => std::iter::from_fn(|| rx.try_recv().ok()).collect(),
                None => return 0,
            }
        };

        let count = events.len();
        for event in events {
            self.handle_event(event).await;
        }
        count
    }
}

fn bind(state: &mut BusState, binding: SeriesBinding) {
    state.series.ensure(&binding.series_id, Some(binding.capacity));
    tracing::debug!(
        series_id = %binding.series_id,
        topic = %binding.topic,
        capacity = binding.capacity,
        "Series bound"
    );
    state.bindings.insert(binding.series_id.clone(), binding);
}

async fn run_event_pump(bus: MessageBus, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        bus.handle_event(event).await;
    }
    tracing::debug!("Event pump stopped");
}

async fn run_history_flush(bus: MessageBus, period: Duration) {
    let mut interval = tokio::time::interval(period);
    // First tick completes immediately
    interval.tick().await;

    loop {
        interval.tick().await;
        if let Err(e) = bus.flush_history().await {
            tracing::warn!(error = %e, "Failed to flush series history");
        }
    }
}
