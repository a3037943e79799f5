//! Connector state notifications: logging, metrics and readiness.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use gsm_telemetry::{TelemetryLabels, record_counter, record_gauge, record_histogram};
use serde::Serialize;
use tracing::{debug, info, warn};

pub const HEALTH_CHECK_NAME: &str = "amqp-connector";

const METRIC_SENT: &str = "amqp_messages_sent";
const METRIC_REJECTED: &str = "amqp_messages_rejected";
const METRIC_RECEIVED: &str = "amqp_messages_received";
const METRIC_SEND_LATENCY: &str = "amqp_send_latency_ms";
const METRIC_CONNECTED: &str = "amqp_connected";

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectorEvent {
    ClientCreated { endpoint: String },
    Connected { endpoint: String },
    Disconnected { reason: String },
    ReceiverOpened { address: String },
    SenderReady { address: String },
    MessageSent { address: String, latency_ms: f64 },
    MessageReceived { address: String },
    SendFailed { address: String, reason: String },
    Closed,
}

pub trait ConnectorObserver: Send + Sync {
    fn on_event(&self, event: &ConnectorEvent);
}

/// Logs every event and records the connector metrics.
#[derive(Debug, Clone, Default)]
pub struct TracingObserver;

fn labels(address: &str, direction: &str) -> TelemetryLabels {
    TelemetryLabels::new(HEALTH_CHECK_NAME)
        .with_direction(direction)
        .with_address(address)
}

impl ConnectorObserver for TracingObserver {
    fn on_event(&self, event: &ConnectorEvent) {
        match event {
            ConnectorEvent::ClientCreated { endpoint } => {
                debug!(endpoint = %endpoint, "AMQP client created");
            }
            ConnectorEvent::Connected { endpoint } => {
                info!(endpoint = %endpoint, "connected to AMQP broker");
                record_gauge(METRIC_CONNECTED, 1.0, &TelemetryLabels::new(HEALTH_CHECK_NAME));
            }
            ConnectorEvent::Disconnected { reason } => {
                warn!(reason = %reason, "AMQP connection lost");
                record_gauge(METRIC_CONNECTED, 0.0, &TelemetryLabels::new(HEALTH_CHECK_NAME));
            }
            ConnectorEvent::ReceiverOpened { address } => {
                info!(address = %address, "AMQP receiver opened");
            }
            ConnectorEvent::SenderReady { address } => {
                info!(address = %address, "AMQP sender ready");
            }
            ConnectorEvent::MessageSent {
                address,
                latency_ms,
            } => {
                let tags = labels(address, "outbound");
                record_counter(METRIC_SENT, 1, &tags);
                record_histogram(METRIC_SEND_LATENCY, *latency_ms, &tags);
            }
            ConnectorEvent::MessageReceived { address } => {
                record_counter(METRIC_RECEIVED, 1, &labels(address, "inbound"));
            }
            ConnectorEvent::SendFailed { address, reason } => {
                warn!(address = %address, error = %reason, "unable to send AMQP message");
                record_counter(METRIC_REJECTED, 1, &labels(address, "outbound"));
            }
            ConnectorEvent::Closed => {
                info!("AMQP connector closed");
                record_gauge(METRIC_CONNECTED, 0.0, &TelemetryLabels::new(HEALTH_CHECK_NAME));
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub name: &'static str,
    pub ready: bool,
}

/// Ready while connected and not closed.
#[derive(Debug, Default)]
pub struct ReadinessObserver {
    connected: AtomicBool,
    closed: AtomicBool,
}

impl ReadinessObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.closed.load(Ordering::Acquire)
    }

    pub fn report(&self) -> HealthReport {
        HealthReport {
            name: HEALTH_CHECK_NAME,
            ready: self.is_ready(),
        }
    }
}

impl ConnectorObserver for ReadinessObserver {
    fn on_event(&self, event: &ConnectorEvent) {
        match event {
            ConnectorEvent::Connected { .. } => self.connected.store(true, Ordering::Release),
            ConnectorEvent::Disconnected { .. } => self.connected.store(false, Ordering::Release),
            ConnectorEvent::Closed => {
                self.closed.store(true, Ordering::Release);
                self.connected.store(false, Ordering::Release);
            }
            _ => {}
        }
    }
}

/// Forwards each event to every registered observer, in order.
#[derive(Default, Clone)]
pub struct Observers {
    observers: Vec<Arc<dyn ConnectorObserver>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, observer: Arc<dyn ConnectorObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl ConnectorObserver for Observers {
    fn on_event(&self, event: &ConnectorEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}
