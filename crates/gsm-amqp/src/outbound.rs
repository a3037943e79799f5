use std::sync::Arc;
use std::time::Instant;

use futures::{Sink, Stream, StreamExt, pin_mut};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::client::{BrokerSender, SenderOptions};
use crate::codec;
use crate::config::{ChannelConfig, OutboundOptions};
use crate::connection::ConnectionManager;
use crate::envelope::Envelope;
use crate::error::ConnectorError;
use crate::observer::ConnectorEvent;
use crate::payload::Payload;

/// Result of a single send that did not break the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Acknowledged,
    Rejected(String),
}

/// Writable side of a channel. The broker sender is created on the first send
/// and reused afterwards.
pub struct OutgoingChannel {
    manager: Arc<ConnectionManager>,
    config: ChannelConfig,
    options: OutboundOptions,
    sender: OnceCell<Arc<dyn BrokerSender>>,
}

impl OutgoingChannel {
    pub(crate) fn new(
        manager: Arc<ConnectionManager>,
        config: ChannelConfig,
        options: OutboundOptions,
    ) -> Self {
        Self {
            manager,
            config,
            options,
            sender: OnceCell::new(),
        }
    }

    pub fn address(&self) -> &str {
        &self.options.address
    }

    pub fn options(&self) -> &OutboundOptions {
        &self.options
    }

    /// True once the sender exists.
    pub fn is_ready(&self) -> bool {
        self.sender.initialized()
    }

    async fn sender(&self) -> Result<&Arc<dyn BrokerSender>, ConnectorError> {
        self.sender
            .get_or_try_init(|| async {
                let address = self.options.address.clone();
                let client = self.manager.client(&self.config)?;
                let sender_options = SenderOptions {
                    durable: self.options.durable,
                };
                let sender = client
                    .create_sender(&address, sender_options)
                    .await
                    .map_err(|source| ConnectorError::SenderCreation {
                        address: address.clone(),
                        source,
                    })?;
                self.manager
                    .observer()
                    .on_event(&ConnectorEvent::SenderReady { address });
                Ok::<_, ConnectorError>(sender)
            })
            .await
    }

    /// Sends one envelope and settles it from the broker's answer.
    ///
    /// A refused message is nacked and reported as [`SendOutcome::Rejected`];
    /// only failures that make the channel unusable are returned as errors, and
    /// the envelope is nacked in that case too.
    pub async fn send(&self, envelope: Envelope<Payload>) -> Result<SendOutcome, ConnectorError> {
        if self.manager.is_closed() {
            envelope.nack_logged("connector closed").await;
            return Err(ConnectorError::Closed);
        }
        let sender = match self.sender().await {
            Ok(sender) => sender,
            Err(err) => {
                warn!(address = %self.options.address, error = %err, "unable to create AMQP sender");
                envelope.nack_logged(&err.to_string()).await;
                return Err(err);
            }
        };

        let message = codec::encode(envelope.payload(), self.options.durable, self.options.ttl);
        let started = Instant::now();
        match sender.send_with_ack(message).await {
            Ok(()) => {
                self.manager.observer().on_event(&ConnectorEvent::MessageSent {
                    address: self.options.address.clone(),
                    latency_ms: started.elapsed().as_secs_f64() * 1000.0,
                });
                if let Err(err) = envelope.ack().await {
                    warn!(address = %self.options.address, error = %err, "failed to ack envelope");
                }
                Ok(SendOutcome::Acknowledged)
            }
            Err(err) => {
                let reason = err.to_string();
                self.manager.observer().on_event(&ConnectorEvent::SendFailed {
                    address: self.options.address.clone(),
                    reason: reason.clone(),
                });
                envelope.nack_logged(&reason).await;
                Ok(SendOutcome::Rejected(reason))
            }
        }
    }

    /// Sends every envelope of `stream`, one at a time and in order.
    pub async fn run<S>(&self, stream: S) -> Result<(), ConnectorError>
    where
        S: Stream<Item = Envelope<Payload>>,
    {
        pin_mut!(stream);
        while let Some(envelope) = stream.next().await {
            self.send(envelope).await?;
        }
        debug!(address = %self.options.address, "outbound stream completed");
        Ok(())
    }

    pub fn sink(self: Arc<Self>) -> impl Sink<Envelope<Payload>, Error = ConnectorError> {
        futures::sink::unfold(self, |channel, envelope| async move {
            channel.send(envelope).await?;
            Ok::<_, ConnectorError>(channel)
        })
    }
}
