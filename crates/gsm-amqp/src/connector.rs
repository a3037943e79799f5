use std::sync::Arc;

use tracing::info;

use crate::client::{AmqpClientFactory, ClientFactory};
use crate::config::{ChannelConfig, ClientOptions, ConnectorDefaults, InboundOptions, OutboundOptions};
use crate::connection::ConnectionManager;
use crate::error::ConnectorError;
use crate::inbound::IncomingChannel;
use crate::observer::{ConnectorObserver, HealthReport, Observers, ReadinessObserver, TracingObserver};
use crate::outbound::OutgoingChannel;

/// Entry point: hands out channels that share one broker client.
pub struct Connector {
    manager: Arc<ConnectionManager>,
    readiness: Arc<ReadinessObserver>,
}

pub struct ConnectorBuilder {
    defaults: ConnectorDefaults,
    factory: Arc<dyn ClientFactory>,
    observers: Vec<Arc<dyn ConnectorObserver>>,
    tracing: bool,
}

impl ConnectorBuilder {
    pub fn new(defaults: ConnectorDefaults) -> Self {
        Self {
            defaults,
            factory: Arc::new(AmqpClientFactory),
            observers: Vec::new(),
            tracing: true,
        }
    }

    pub fn factory(mut self, factory: Arc<dyn ClientFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn ConnectorObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Leaves out the built-in logging and metrics observer.
    pub fn without_tracing(mut self) -> Self {
        self.tracing = false;
        self
    }

    pub fn build(self) -> Connector {
        let readiness = Arc::new(ReadinessObserver::new());
        let mut observers = Observers::new();
        if self.tracing {
            observers.push(Arc::new(TracingObserver));
        }
        observers.push(readiness.clone());
        for observer in self.observers {
            observers.push(observer);
        }
        let manager = ConnectionManager::new(
            self.factory,
            self.defaults,
            Arc::new(observers),
            Arc::clone(&readiness),
        );
        Connector {
            manager: Arc::new(manager),
            readiness,
        }
    }
}

impl Connector {
    /// Connector backed by `lapin`, logging through `tracing`.
    pub fn open(defaults: ConnectorDefaults) -> Self {
        ConnectorBuilder::new(defaults).build()
    }

    pub fn builder(defaults: ConnectorDefaults) -> ConnectorBuilder {
        ConnectorBuilder::new(defaults)
    }

    fn check_open(&self) -> Result<(), ConnectorError> {
        if self.manager.is_closed() {
            Err(ConnectorError::Closed)
        } else {
            Ok(())
        }
    }

    /// Validates `config` and returns the channel; no network activity happens
    /// until the channel is subscribed and polled.
    pub fn incoming(&self, config: ChannelConfig) -> Result<IncomingChannel, ConnectorError> {
        self.check_open()?;
        let options = InboundOptions::from_config(&config)?;
        ClientOptions::validate(&config)?;
        info!(address = %options.address, broadcast = options.broadcast, "opening AMQP incoming channel");
        Ok(IncomingChannel::new(Arc::clone(&self.manager), config, options))
    }

    /// Validates `config` and returns the channel; the sender is created on the
    /// first send.
    pub fn outgoing(&self, config: ChannelConfig) -> Result<OutgoingChannel, ConnectorError> {
        self.check_open()?;
        let options = OutboundOptions::from_config(&config)?;
        ClientOptions::validate(&config)?;
        info!(address = %options.address, "opening AMQP outgoing channel");
        Ok(OutgoingChannel::new(Arc::clone(&self.manager), config, options))
    }

    pub fn is_ready(&self) -> bool {
        self.readiness.is_ready()
    }

    pub fn health(&self) -> HealthReport {
        self.readiness.report()
    }

    pub fn is_closed(&self) -> bool {
        self.manager.is_closed()
    }

    pub async fn close(&self) {
        self.manager.close().await;
    }
}
