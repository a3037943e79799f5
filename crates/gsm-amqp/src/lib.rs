//! AMQP connector for Greentic message channels.
//!
//! A [`Connector`] owns one broker client, created lazily from the first channel
//! that needs it. [`Connector::incoming`] turns broker deliveries into a stream of
//! [`Envelope`]s; [`Connector::outgoing`] sends envelopes and settles each one from
//! the broker's acknowledgement.
//!
//! ```no_run
//! use futures::StreamExt;
//! use gsm_amqp::{ChannelConfig, Connector, ConnectorDefaults, Envelope, Payload};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! gsm_telemetry::install("gsm-amqp")?;
//! let connector = Connector::open(ConnectorDefaults::from_env()?);
//!
//! let orders = connector.outgoing(
//!     ChannelConfig::new().with("address", "orders").with("ttl", "5000"),
//! )?;
//! let (envelope, acked) = Envelope::tracked(Payload::Int(42));
//! orders.send(envelope).await?;
//! println!("{:?}", acked.outcome().await);
//!
//! let inbox = connector.incoming(ChannelConfig::new().with("address", "orders"))?;
//! let mut deliveries = inbox.subscribe()?;
//! if let Some(delivery) = deliveries.next().await {
//!     let delivery = delivery?;
//!     delivery.ack().await?;
//! }
//! connector.close().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod connector;
pub mod envelope;
pub mod error;
pub mod fanout;
pub mod inbound;
pub mod message;
pub mod observer;
pub mod outbound;
pub mod payload;

pub use client::{
    AmqpClientFactory, BrokerClient, BrokerSender, ClientFactory, DeliveryStream,
    InMemoryBroker, ReceiverOptions, SenderOptions,
};
pub use config::{ChannelConfig, ClientOptions, ConnectorDefaults, InboundOptions, OutboundOptions};
pub use connection::ConnectionManager;
pub use connector::{Connector, ConnectorBuilder};
pub use envelope::{AckOutcome, AckReceiver, Acknowledgement, Envelope, NoopAck};
pub use error::{ClientError, ConfigError, ConnectorError};
pub use fanout::Fanout;
pub use inbound::{IncomingChannel, InboundStream};
pub use message::{AmqpMessage, Body, DeliveryInfo};
pub use observer::{
    ConnectorEvent, ConnectorObserver, HealthReport, Observers, ReadinessObserver,
    TracingObserver,
};
pub use outbound::{OutgoingChannel, SendOutcome};
pub use payload::Payload;
