//! MQTT transport on top of `rumqttc`
//!
//! Each session owns an `AsyncClient` for commands and a spawned task that
//! drives the `EventLoop`. Connection failures are reported as events and
//! the task sleeps for the configured reconnect period before polling
//! again; `rumqttc` re-dials on the next poll.

use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::{
    ConnectOptions, Endpoint, EventSink, Scheme, Transport, TransportError, TransportEvent,
    TransportSession,
};

/// How long a cancelled session may keep polling to flush its DISCONNECT
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// rumqttc rejects keep-alives shorter than this
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// `rumqttc`-backed transport
#[derive(Debug, Clone)]
pub struct MqttTransport {
    /// Capacity of the client → event loop request channel
    command_capacity: usize,
}

impl MqttTransport {
    pub fn new(command_capacity: usize) -> Self {
        Self {
            command_capacity: command_capacity.max(1),
        }
    }
}

impl Default for MqttTransport {
    fn default() -> Self {
        Self::new(100)
    }
}

impl Transport for MqttTransport {
    fn open(
        &self,
        endpoint: &Endpoint,
        options: &ConnectOptions,
        events: EventSink,
    ) -> Result<Box<dyn TransportSession>, TransportError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::Open(format!("no async runtime: {}", e)))?;

        let mqtt_options = build_options(endpoint, options);
        let (client, eventloop) = AsyncClient::new(mqtt_options, self.command_capacity);

        let cancel = Arc::new(Cancel::default());
        let task = runtime.spawn(drive_event_loop(
            eventloop,
            events,
            options.reconnect_period,
            Arc::clone(&cancel),
        ));

        tracing::debug!(endpoint = %endpoint, "MQTT session opened");

        Ok(Box::new(MqttSession {
            client,
            cancel,
            task,
        }))
    }
}

fn build_options(endpoint: &Endpoint, options: &ConnectOptions) -> MqttOptions {
    let client_id = options.resolved_client_id();

    // Websocket transports take the full URL in place of the host
    let host = if endpoint.scheme.is_websocket() {
        endpoint.url().to_string()
    } else {
        endpoint.host.clone()
    };

    let mut mqtt_options = MqttOptions::new(client_id, host, endpoint.port);
    mqtt_options.set_keep_alive(options.keep_alive.max(MIN_KEEP_ALIVE));

    if let (Some(username), Some(password)) = (&options.username, &options.password) {
        mqtt_options.set_credentials(username, password);
    } else if let Some(username) = &options.username {
        mqtt_options.set_credentials(username, "");
    }

    match endpoint.scheme {
        Scheme::Tcp => {}
        Scheme::Tls => {
            mqtt_options.set_transport(rumqttc::Transport::tls_with_default_config());
        }
        Scheme::Ws => {
            mqtt_options.set_transport(rumqttc::Transport::Ws);
        }
        Scheme::Wss => {
            mqtt_options.set_transport(rumqttc::Transport::wss_with_default_config());
        }
    }

    mqtt_options
}

/// Drive the event loop until cancelled or the bus drops its receiver
async fn drive_event_loop(
    mut eventloop: EventLoop,
    events: EventSink,
    reconnect_period: Duration,
    cancel: Arc<Cancel>,
) {
    let epoch = events.epoch();

    loop {
        if events.is_closed() {
            break;
        }

        let polled = if cancel.is_set() {
            // Flush what is queued (the DISCONNECT included), then stop
            match tokio::time::timeout(SHUTDOWN_GRACE, eventloop.poll()).await {
                Ok(polled) => polled,
                Err(_) => break,
            }
        } else {
            tokio::select! {
                polled = eventloop.poll() => polled,
                _ = cancel.notify.notified() => continue,
            }
        };

        match polled {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    events.emit(TransportEvent::Connected);
                } else {
                    events.emit(TransportEvent::Error(format!(
                        "connection refused: {:?}",
                        ack.code
                    )));
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                events.emit(TransportEvent::Message {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                });
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                events.emit(TransportEvent::Disconnected);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                // Our own disconnect request went out
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if cancel.is_set() {
                    break;
                }
                tracing::warn!(epoch, error = %e, "MQTT connection error");
                events.emit(TransportEvent::Error(e.to_string()));
                tokio::select! {
                    _ = tokio::time::sleep(reconnect_period) => {}
                    _ = cancel.notify.notified() => {}
                }
            }
        }
    }

    tracing::debug!(epoch, "MQTT event loop stopped");
}

/// Cancellation shared between a session handle and its event loop task
#[derive(Default)]
struct Cancel {
    flag: AtomicBool,
    notify: Notify,
}

impl Cancel {
    fn is_set(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Returns false if already cancelled
    fn set(&self) -> bool {
        if self.flag.swap(true, Ordering::Relaxed) {
            return false;
        }
        self.notify.notify_one();
        true
    }
}

struct MqttSession {
    client: AsyncClient,
    cancel: Arc<Cancel>,
    task: JoinHandle<()>,
}

impl TransportSession for MqttSession {
    fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.client
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| TransportError::command("subscribe", e))
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.client
            .try_unsubscribe(topic)
            .map_err(|e| TransportError::command("unsubscribe", e))
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .map_err(|e| TransportError::command("publish", e))
    }

    fn end(&self) {
        if !self.cancel.set() {
            return;
        }
        // Queued behind any pending publishes; the loop exits once it is sent
        if self.client.try_disconnect().is_err() {
            self.task.abort();
        }
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        self.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_options_tcp() {
        let endpoint = Endpoint::parse("mqtt://broker.local:1884").unwrap();
        let options = ConnectOptions::default()
            .client_id("dash-1")
            .credentials("user", "secret");

        let mqtt_options = build_options(&endpoint, &options);
        assert_eq!(mqtt_options.client_id(), "dash-1");
        assert_eq!(
            mqtt_options.broker_address(),
            ("broker.local".to_string(), 1884)
        );
        assert_eq!(
            mqtt_options.credentials(),
            Some(("user".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn test_build_options_websocket_uses_url() {
        let endpoint = Endpoint::parse("ws://broker.local:8083/mqtt").unwrap();
        let mqtt_options = build_options(&endpoint, &ConnectOptions::default());

        let (host, port) = mqtt_options.broker_address();
        assert_eq!(host, "ws://broker.local:8083/mqtt");
        assert_eq!(port, 8083);
    }

    #[test]
    fn test_keep_alive_clamped() {
        let endpoint = Endpoint::parse("mqtt://h").unwrap();
        let options = ConnectOptions {
            keep_alive: Duration::from_secs(1),
            ..Default::default()
        };
        let mqtt_options = build_options(&endpoint, &options);
        assert_eq!(mqtt_options.keep_alive(), MIN_KEEP_ALIVE);
    }

    #[tokio::test]
    async fn test_unreachable_broker_reports_error() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let transport = MqttTransport::default();
        let endpoint = Endpoint::parse("mqtt://127.0.0.1:1").unwrap();

        let session = transport
            .open(&endpoint, &ConnectOptions::default(), EventSink::new(1, tx))
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.epoch, 1);
        assert!(matches!(event.event, TransportEvent::Error(_)));

        session.end();
    }

    async fn next_error(
        rx: &mut tokio::sync::mpsc::UnboundedReceiver<crate::transport::SessionEvent>,
    ) -> tokio::time::Instant {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if matches!(event.event, TransportEvent::Error(_)) {
                return tokio::time::Instant::now();
            }
        }
    }

    #[tokio::test]
    async fn test_retries_wait_for_reconnect_period() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let transport = MqttTransport::default();
        let endpoint = Endpoint::parse("mqtt://127.0.0.1:1").unwrap();
        let options = ConnectOptions {
            reconnect_period: Duration::from_millis(300),
            ..Default::default()
        };

        let session = transport
            .open(&endpoint, &options, EventSink::new(1, tx))
            .unwrap();

        let first = next_error(&mut rx).await;
        let second = next_error(&mut rx).await;
        assert!(second - first >= Duration::from_millis(250));

        session.end();
    }
}
