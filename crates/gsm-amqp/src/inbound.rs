use std::future;
use std::sync::{Arc, Mutex};

use futures::stream::BoxStream;
use futures::{StreamExt, TryFutureExt, TryStreamExt};
use tracing::error;

use crate::client::ReceiverOptions;
use crate::config::{ChannelConfig, InboundOptions};
use crate::connection::ConnectionManager;
use crate::envelope::Envelope;
use crate::error::ConnectorError;
use crate::fanout::Fanout;
use crate::message::AmqpMessage;
use crate::observer::ConnectorEvent;

pub type InboundItem = Result<Envelope<AmqpMessage>, ConnectorError>;
pub type InboundStream = BoxStream<'static, InboundItem>;

/// Lazy stream of received messages for `options.address`.
///
/// Nothing happens until the first poll: then the shared client is obtained,
/// connected, and a receiver is opened. A failure in any of those steps, or
/// later in the receiver, is yielded once and ends the stream.
pub fn open(
    manager: Arc<ConnectionManager>,
    config: ChannelConfig,
    options: &InboundOptions,
) -> InboundStream {
    let address = options.address.clone();
    let receiver_options = ReceiverOptions {
        durable: options.durable,
        auto_acknowledgement: options.auto_acknowledgement,
    };
    let observer = Arc::clone(manager.observer());

    let receiver = {
        let address = address.clone();
        let observer = Arc::clone(&observer);
        async move {
            let client = manager.client(&config)?;
            let stream_error = |source| ConnectorError::Stream {
                address: address.clone(),
                source,
            };
            client.connect().await.map_err(stream_error)?;
            let deliveries = client
                .create_receiver(&address, receiver_options)
                .await
                .map_err(stream_error)?;
            observer.on_event(&ConnectorEvent::ReceiverOpened {
                address: address.clone(),
            });
            Ok::<_, ConnectorError>(deliveries.map_err(move |source| ConnectorError::Stream {
                address: address.clone(),
                source,
            }))
        }
    };

    receiver
        .try_flatten_stream()
        .inspect_ok(move |envelope| {
            observer.on_event(&ConnectorEvent::MessageReceived {
                address: envelope
                    .payload()
                    .address
                    .clone()
                    .unwrap_or_else(|| address.clone()),
            });
        })
        .inspect_err(|err| error!(error = %err, "AMQP inbound stream failed"))
        .scan(false, |failed, item| {
            if *failed {
                return future::ready(None);
            }
            *failed = item.is_err();
            future::ready(Some(item))
        })
        .boxed()
}

/// Readable side of a channel.
pub struct IncomingChannel {
    address: String,
    single: Mutex<Option<InboundStream>>,
    fanout: Option<Fanout<InboundItem>>,
}

impl IncomingChannel {
    pub(crate) fn new(
        manager: Arc<ConnectionManager>,
        config: ChannelConfig,
        options: InboundOptions,
    ) -> Self {
        let stream = open(manager, config, &options);
        let (single, fanout) = if options.broadcast {
            (None, Some(Fanout::new(stream)))
        } else {
            (Some(stream), None)
        };
        Self {
            address: options.address,
            single: Mutex::new(single),
            fanout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_broadcast(&self) -> bool {
        self.fanout.is_some()
    }

    /// Broadcast channels hand out any number of subscriptions; other channels
    /// only one.
    pub fn subscribe(&self) -> Result<InboundStream, ConnectorError> {
        if let Some(fanout) = &self.fanout {
            return Ok(fanout.subscribe());
        }
        self.single
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or_else(|| ConnectorError::AlreadySubscribed {
                address: self.address.clone(),
            })
    }
}
