//! Broker client seam. The bridges only talk to these traits; `amqp` speaks the wire
//! protocol through `lapin`, `memory` is an in-process broker.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::config::ClientOptions;
use crate::envelope::Envelope;
use crate::error::ClientError;
use crate::message::AmqpMessage;
use crate::observer::ConnectorObserver;

pub mod amqp;
pub mod memory;

pub use amqp::AmqpClientFactory;
pub use memory::InMemoryBroker;

/// Broker deliveries in broker order. Ends with at most one error.
pub type DeliveryStream = BoxStream<'static, Result<Envelope<AmqpMessage>, ClientError>>;

/// Both sides declare the queue at their address before using it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderOptions {
    pub durable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverOptions {
    pub durable: bool,
    pub auto_acknowledgement: bool,
}

#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Resolves once a connection is established, reconnecting if needed.
    async fn connect(&self) -> Result<(), ClientError>;

    async fn create_sender(
        &self,
        address: &str,
        options: SenderOptions,
    ) -> Result<Arc<dyn BrokerSender>, ClientError>;

    async fn create_receiver(
        &self,
        address: &str,
        options: ReceiverOptions,
    ) -> Result<DeliveryStream, ClientError>;

    async fn close(&self) -> Result<(), ClientError>;

    fn is_closed(&self) -> bool;
}

#[async_trait]
pub trait BrokerSender: Send + Sync {
    /// Completes once the broker confirmed (or refused) the message.
    async fn send_with_ack(&self, message: AmqpMessage) -> Result<(), ClientError>;
}

pub trait ClientFactory: Send + Sync {
    fn create(
        &self,
        options: &ClientOptions,
        observer: Arc<dyn ConnectorObserver>,
    ) -> Result<Arc<dyn BrokerClient>, ClientError>;
}
