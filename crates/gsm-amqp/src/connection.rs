use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::client::{BrokerClient, ClientFactory};
use crate::config::{ChannelConfig, ClientOptions, ConnectorDefaults};
use crate::error::ConnectorError;
use crate::observer::{ConnectorEvent, ConnectorObserver, ReadinessObserver};

enum ClientSlot {
    Empty,
    Ready(Arc<dyn BrokerClient>),
    Closed,
}

/// Owns the connector's single broker client.
///
/// The client is built from the first channel configuration that asks for it;
/// later callers share it without their configuration being read again.
pub struct ConnectionManager {
    factory: Arc<dyn ClientFactory>,
    defaults: ConnectorDefaults,
    observer: Arc<dyn ConnectorObserver>,
    readiness: Arc<ReadinessObserver>,
    slot: Mutex<ClientSlot>,
}

impl ConnectionManager {
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        defaults: ConnectorDefaults,
        observer: Arc<dyn ConnectorObserver>,
        readiness: Arc<ReadinessObserver>,
    ) -> Self {
        Self {
            factory,
            defaults,
            observer,
            readiness,
            slot: Mutex::new(ClientSlot::Empty),
        }
    }

    fn slot(&self) -> MutexGuard<'_, ClientSlot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn client(&self, config: &ChannelConfig) -> Result<Arc<dyn BrokerClient>, ConnectorError> {
        let mut slot = self.slot();
        match &*slot {
            ClientSlot::Ready(client) => return Ok(Arc::clone(client)),
            ClientSlot::Closed => return Err(ConnectorError::Closed),
            ClientSlot::Empty => {}
        }

        let options = ClientOptions::resolve(config, &self.defaults)?;
        debug!(endpoint = %options.endpoint(), "creating AMQP client");
        let client = self
            .factory
            .create(&options, Arc::clone(&self.observer))
            .map_err(ConnectorError::ConnectionConfiguration)?;
        *slot = ClientSlot::Ready(Arc::clone(&client));
        Ok(client)
    }

    pub fn observer(&self) -> &Arc<dyn ConnectorObserver> {
        &self.observer
    }

    pub fn is_connected(&self) -> bool {
        self.readiness.is_ready()
    }

    pub fn is_closed(&self) -> bool {
        matches!(&*self.slot(), ClientSlot::Closed)
    }

    /// Closes the client, if any, exactly once.
    pub async fn close(&self) {
        let previous = std::mem::replace(&mut *self.slot(), ClientSlot::Closed);
        let client = match previous {
            ClientSlot::Closed => return,
            ClientSlot::Empty => None,
            ClientSlot::Ready(client) => Some(client),
        };
        if let Some(client) = client {
            if let Err(err) = client.close().await {
                warn!(error = %err, "failed to close AMQP client");
            }
        }
        self.observer.on_event(&ConnectorEvent::Closed);
    }
}
