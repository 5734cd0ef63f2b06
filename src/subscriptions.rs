//! Subscription Registry
//!
//! Tracks two sets: the topics the caller wants (`desired`) and the topics
//! the current session has actually been asked for (`acknowledged`). A
//! connection loss voids the second set but not the first; every Connected
//! transition reconciles them.

use std::collections::{BTreeSet, HashSet};

use crate::error::BusResult;
use crate::transport::TransportSession;

/// Result of a subscribe call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// A subscribe command was issued
    Subscribed,
    /// Topic was already tracked; nothing was sent
    AlreadySubscribed,
}

/// Result of an unsubscribe call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    /// Removed locally and an unsubscribe command was issued
    Unsubscribed,
    /// Removed locally only; there was no live session
    LocalOnly,
    /// Topic was not tracked
    NotSubscribed,
}

/// Outcome of re-issuing subscriptions after a (re)connect
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub resubscribed: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// A concrete topic name: non-empty, no wildcards
pub fn valid_topic(topic: &str) -> bool {
    !topic.is_empty() && !topic.contains(['+', '#', '\0'])
}

/// A subscription filter: `+` must fill a whole level, `#` must be the
/// whole last level
pub fn valid_filter(filter: &str) -> bool {
    if filter.is_empty() || filter.contains('\0') {
        return false;
    }

    let levels: Vec<&str> = filter.split('/').collect();
    levels.iter().enumerate().all(|(i, level)| match *level {
        "#" => i == levels.len() - 1,
        "+" => true,
        level => !level.contains(['+', '#']),
    })
}

/// MQTT filter matching. Topics starting with `$` are not matched by a
/// leading wildcard.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    desired: BTreeSet<String>,
    acknowledged: HashSet<String>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `topic` and issue a subscribe command on `session`.
    ///
    /// A transport failure leaves the registry unchanged.
    pub fn subscribe(
        &mut self,
        topic: &str,
        session: &dyn TransportSession,
    ) -> BusResult<SubscribeOutcome> {
        if self.desired.contains(topic) {
            tracing::debug!(topic = %topic, "Already subscribed");
            return Ok(SubscribeOutcome::AlreadySubscribed);
        }

        session.subscribe(topic)?;
        self.desired.insert(topic.to_string());
        self.acknowledged.insert(topic.to_string());
        tracing::info!(topic = %topic, "Subscribed");
        Ok(SubscribeOutcome::Subscribed)
    }

    /// Stop tracking `topic`. The unsubscribe command is sent only when a
    /// session is given; a failing command is logged and the local removal
    /// stands.
    pub fn unsubscribe(
        &mut self,
        topic: &str,
        session: Option<&dyn TransportSession>,
    ) -> UnsubscribeOutcome {
        if !self.desired.remove(topic) {
            return UnsubscribeOutcome::NotSubscribed;
        }
        let was_acknowledged = self.acknowledged.remove(topic);

        match session {
            Some(session) if was_acknowledged => {
                if let Err(e) = session.unsubscribe(topic) {
                    tracing::warn!(topic = %topic, error = %e, "Unsubscribe command failed");
                }
                tracing::info!(topic = %topic, "Unsubscribed");
                UnsubscribeOutcome::Unsubscribed
            }
            _ => {
                tracing::info!(topic = %topic, "Unsubscribed locally");
                UnsubscribeOutcome::LocalOnly
            }
        }
    }

    /// Re-issue subscribe commands for every desired topic the session has
    /// not been asked for yet
    pub fn reconcile(&mut self, session: &dyn TransportSession) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for topic in &self.desired {
            if self.acknowledged.contains(topic) {
                continue;
            }
            match session.subscribe(topic) {
                Ok(()) => {
                    self.acknowledged.insert(topic.clone());
                    report.resubscribed.push(topic.clone());
                }
                Err(e) => {
                    tracing::warn!(topic = %topic, error = %e, "Resubscribe failed");
                    report.failed.push((topic.clone(), e.to_string()));
                }
            }
        }

        if !report.resubscribed.is_empty() {
            tracing::info!(count = report.resubscribed.len(), "Resubscribed topics");
        }
        report
    }

    /// The broker forgot everything (connection lost or session ended)
    pub fn invalidate(&mut self) {
        self.acknowledged.clear();
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.desired.contains(topic)
    }

    /// Whether an inbound message on `topic` is covered by a desired filter
    pub fn matches(&self, topic: &str) -> bool {
        self.desired.contains(topic) || self.desired.iter().any(|f| topic_matches(f, topic))
    }

    /// Desired topics, sorted
    pub fn topics(&self) -> Vec<String> {
        self.desired.iter().cloned().collect()
    }

    /// Desired topics not yet requested from the current session
    pub fn pending(&self) -> Vec<String> {
        self.desired
            .iter()
            .filter(|t| !self.acknowledged.contains(*t))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.desired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.desired.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BusError;
    use crate::transport::{
        ConnectOptions, Endpoint, EventSink, LoopbackCommand, LoopbackTransport, Transport,
    };
    use tokio::sync::mpsc;

    fn open(transport: &LoopbackTransport) -> Box<dyn TransportSession> {
        let (tx, _rx) = mpsc::unbounded_channel();
        let endpoint = Endpoint::parse("mqtt://localhost").unwrap();
        let session = transport
            .open(&endpoint, &ConnectOptions::default(), EventSink::new(1, tx))
            .unwrap();
        transport.clear_commands();
        session
    }

    #[test]
    fn test_topic_validation() {
        assert!(valid_topic("sensors/t1"));
        assert!(!valid_topic(""));
        assert!(!valid_topic("sensors/+"));

        assert!(valid_filter("sensors/#"));
        assert!(valid_filter("sensors/+/temp"));
        assert!(valid_filter("#"));
        assert!(!valid_filter(""));
        assert!(!valid_filter("sensors/#/temp"));
        assert!(!valid_filter("sensors/t+"));
    }

    #[test]
    fn test_topic_matches() {
        assert!(topic_matches("sensors/t1", "sensors/t1"));
        assert!(!topic_matches("sensors/t1", "sensors/t2"));
        assert!(topic_matches("sensors/+", "sensors/t1"));
        assert!(!topic_matches("sensors/+", "sensors/t1/raw"));
        assert!(topic_matches("sensors/#", "sensors/t1/raw"));
        assert!(topic_matches("sensors/#", "sensors"));
        assert!(!topic_matches("#", "$SYS/uptime"));
    }

    #[test]
    fn test_registry_matches_filters() {
        let transport = LoopbackTransport::new();
        let session = open(&transport);
        let mut registry = SubscriptionRegistry::new();

        registry.subscribe("home/+/temp", session.as_ref()).unwrap();
        assert!(registry.matches("home/kitchen/temp"));
        assert!(!registry.matches("home/kitchen/humidity"));
    }

    #[test]
    fn test_subscribe_dedup() {
        let transport = LoopbackTransport::new();
        let session = open(&transport);
        let mut registry = SubscriptionRegistry::new();

        assert_eq!(
            registry.subscribe("sensors/t1", session.as_ref()).unwrap(),
            SubscribeOutcome::Subscribed
        );
        assert_eq!(
            registry.subscribe("sensors/t1", session.as_ref()).unwrap(),
            SubscribeOutcome::AlreadySubscribed
        );
        assert_eq!(transport.subscribes(), vec!["sensors/t1"]);
    }

    #[test]
    fn test_subscribe_failure_not_tracked() {
        let transport = LoopbackTransport::new();
        let session = open(&transport);
        let mut registry = SubscriptionRegistry::new();

        transport.fail_commands(Some("queue full".to_string()));
        let err = registry.subscribe("a", session.as_ref()).unwrap_err();
        assert!(matches!(err, BusError::Transport(_)));
        assert!(!registry.is_subscribed("a"));
    }

    #[test]
    fn test_unsubscribe_outcomes() {
        let transport = LoopbackTransport::new();
        let session = open(&transport);
        let mut registry = SubscriptionRegistry::new();

        registry.subscribe("a", session.as_ref()).unwrap();
        registry.subscribe("b", session.as_ref()).unwrap();

        assert_eq!(
            registry.unsubscribe("a", Some(session.as_ref())),
            UnsubscribeOutcome::Unsubscribed
        );
        assert_eq!(registry.unsubscribe("b", None), UnsubscribeOutcome::LocalOnly);
        assert_eq!(registry.unsubscribe("c", None), UnsubscribeOutcome::NotSubscribed);
        assert!(registry.is_empty());

        let unsubscribes: Vec<_> = transport
            .commands()
            .into_iter()
            .filter(|c| matches!(c, LoopbackCommand::Unsubscribe(_)))
            .collect();
        assert_eq!(unsubscribes, vec![LoopbackCommand::Unsubscribe("a".to_string())]);
    }

    #[test]
    fn test_reconcile_after_invalidate() {
        let transport = LoopbackTransport::new();
        let session = open(&transport);
        let mut registry = SubscriptionRegistry::new();

        registry.subscribe("b", session.as_ref()).unwrap();
        registry.subscribe("a", session.as_ref()).unwrap();

        // Nothing pending while the session is intact
        assert!(registry.reconcile(session.as_ref()).resubscribed.is_empty());

        registry.invalidate();
        assert_eq!(registry.pending(), vec!["a", "b"]);

        transport.clear_commands();
        let report = registry.reconcile(session.as_ref());
        assert_eq!(report.resubscribed, vec!["a", "b"]);
        assert!(report.failed.is_empty());
        assert_eq!(transport.subscribes(), vec!["a", "b"]);
        assert!(registry.pending().is_empty());
    }

    #[test]
    fn test_reconcile_keeps_failed_topics_pending() {
        let transport = LoopbackTransport::new();
        let session = open(&transport);
        let mut registry = SubscriptionRegistry::new();

        registry.subscribe("a", session.as_ref()).unwrap();
        registry.invalidate();

        transport.fail_commands(Some("queue full".to_string()));
        let report = registry.reconcile(session.as_ref());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(registry.pending(), vec!["a"]);
        assert!(registry.is_subscribed("a"));

        transport.fail_commands(None);
        assert_eq!(registry.reconcile(session.as_ref()).resubscribed, vec!["a"]);
    }
}
