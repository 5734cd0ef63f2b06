//! Message Cache
//!
//! Latest-value store: one [`Message`] per topic, replaced on every
//! arrival. There is no queue and no history here; a consumer slower than
//! the arrival rate simply sees the newest value. Changes are announced on
//! a tokio broadcast channel before `on_message` returns.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::parser::ParserRegistry;

/// The most recent message received on a topic
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Topic the message arrived on
    pub topic: String,
    /// Raw payload bytes, always preserved
    pub payload: Vec<u8>,
    /// Arrival time, Unix milliseconds
    pub received_at: i64,
    /// Decoded value, `None` when decoding failed
    pub decoded: Option<Value>,
    /// Why decoding failed, if it did
    pub decode_error: Option<String>,
}

impl Message {
    /// Payload as text (lossy for non UTF-8 payloads)
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    pub fn is_decoded(&self) -> bool {
        self.decoded.is_some()
    }
}

/// Change notification emitted by the cache
#[derive(Debug, Clone)]
pub enum CacheEvent {
    /// A topic received a new message
    Updated(Arc<Message>),
    /// A topic's entry was dropped (unsubscribe)
    Evicted(String),
    /// All entries were dropped
    Cleared,
}

/// Topic → latest message store
pub struct MessageCache {
    messages: HashMap<String, Arc<Message>>,
    events: broadcast::Sender<CacheEvent>,
}

impl MessageCache {
    /// Create a cache whose notification channel buffers `capacity` events
    /// per lagging receiver
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            messages: HashMap::new(),
            events,
        }
    }

    /// Decode and store a message, replacing any previous one for the topic
    pub fn on_message(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        received_at: i64,
        parsers: &ParserRegistry,
    ) -> Arc<Message> {
        let (decoded, decode_error) = match parsers.decode(topic, &payload) {
            Ok(value) => (Some(value), None),
            Err(e) => {
                tracing::debug!(topic = %topic, error = %e, "Payload left unparsed");
                (None, Some(e.to_string()))
            }
        };

        let message = Arc::new(Message {
            topic: topic.to_string(),
            payload,
            received_at,
            decoded,
            decode_error,
        });

        self.messages.insert(topic.to_string(), Arc::clone(&message));
        self.notify(CacheEvent::Updated(Arc::clone(&message)));

        message
    }

    /// Latest message for a topic
    pub fn get(&self, topic: &str) -> Option<Arc<Message>> {
        self.messages.get(topic).cloned()
    }

    /// Drop one topic's entry
    pub fn evict(&mut self, topic: &str) -> Option<Arc<Message>> {
        let removed = self.messages.remove(topic);
        if removed.is_some() {
            self.notify(CacheEvent::Evicted(topic.to_string()));
        }
        removed
    }

    /// Drop every entry. Subscriptions are not affected.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.notify(CacheEvent::Cleared);
    }

    /// Topics with a cached message, sorted
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.messages.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Receive change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    fn notify(&self, event: CacheEvent) {
        // No receivers is fine: nobody is watching yet
        let _ = self.events.send(event);
    }
}

impl Default for MessageCache {
    fn default() -> Self {
        Self::new(1024)
    }
}
