//! Single-owner core state
//!
//! Everything in here is synchronous: `MessageBus` serialises access
//! through one lock, so each inbound event is handled to completion
//! (decode → cache write → notify → series push) before the next.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::{Message, MessageCache};
use crate::connection::{ConnectionManager, Transition};
use crate::extract::extract_number;
use crate::parser::ParserRegistry;
use crate::series::{Sample, SeriesStore};
use crate::subscriptions::{topic_matches, SubscriptionRegistry, UnsubscribeOutcome};
use crate::transport::SessionEvent;
use crate::widgets::SeriesBinding;

pub(crate) struct BusState {
    pub(crate) connection: ConnectionManager,
    pub(crate) subscriptions: SubscriptionRegistry,
    pub(crate) parsers: ParserRegistry,
    pub(crate) cache: MessageCache,
    pub(crate) series: SeriesStore,
    /// Series id → binding
    pub(crate) bindings: HashMap<String, SeriesBinding>,
}

impl BusState {
    /// Apply one session event
    pub(crate) fn apply(&mut self, event: SessionEvent, received_at: i64) {
        match self.connection.apply(event) {
            None => {}
            Some(Transition::Connected) => {
                if let Ok(session) = self.connection.session() {
                    self.subscriptions.reconcile(session);
                }
            }
            Some(Transition::Lost) => self.subscriptions.invalidate(),
            Some(Transition::Message { topic, payload }) => {
                if self.subscriptions.matches(&topic) {
                    self.ingest(&topic, payload, received_at);
                } else {
                    tracing::debug!(topic = %topic, "Dropping message for untracked topic");
                }
            }
        }
    }

    /// Decode, cache, and feed bound series
    pub(crate) fn ingest(&mut self, topic: &str, payload: Vec<u8>, received_at: i64) -> Arc<Message> {
        let message = self
            .cache
            .on_message(topic, payload, received_at, &self.parsers);

        for binding in self.bindings.values() {
            if !topic_matches(&binding.topic, topic) {
                continue;
            }
            match extract_number(Some(&message), binding.path.as_ref()) {
                Some(value) => {
                    self.series
                        .ensure(&binding.series_id, Some(binding.capacity))
                        .push(Sample::new(received_at, value));
                }
                None => {
                    tracing::trace!(
                        topic = %topic,
                        series_id = %binding.series_id,
                        "No numeric value for series"
                    );
                }
            }
        }

        message
    }

    /// Drop a filter and every cached message it covered. Topics still
    /// matched by another desired filter keep their entry, except the
    /// filter's own literal topic.
    pub(crate) fn unsubscribe(&mut self, filter: &str) -> UnsubscribeOutcome {
        let outcome = self
            .subscriptions
            .unsubscribe(filter, self.connection.session().ok());

        self.cache.evict(filter);
        let stale: Vec<String> = self
            .cache
            .topics()
            .into_iter()
            .filter(|topic| topic_matches(filter, topic) && !self.subscriptions.matches(topic))
            .collect();
        for topic in &stale {
            self.cache.evict(topic);
        }
        if !stale.is_empty() {
            tracing::debug!(filter = %filter, evicted = stale.len(), "Evicted cached topics");
        }

        outcome
    }
}
