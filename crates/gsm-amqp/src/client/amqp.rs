use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use lapin::acker::Acker;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::uri::{AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use super::{
    BrokerClient, BrokerSender, ClientFactory, DeliveryStream, ReceiverOptions, SenderOptions,
};
use crate::config::ClientOptions;
use crate::envelope::{Acknowledgement, Envelope};
use crate::error::ClientError;
use crate::message::{AmqpMessage, BODY_TYPE_HEADER, Body, DeliveryInfo};
use crate::observer::{ConnectorEvent, ConnectorObserver};

const PERSISTENT: u8 = 2;
const TRANSIENT: u8 = 1;
const REPLY_SUCCESS: u16 = 200;

/// Builds `lapin`-backed clients. The first connection attempt starts in the
/// background as soon as the client exists.
#[derive(Debug, Clone, Default)]
pub struct AmqpClientFactory;

impl ClientFactory for AmqpClientFactory {
    fn create(
        &self,
        options: &ClientOptions,
        observer: Arc<dyn ConnectorObserver>,
    ) -> Result<Arc<dyn BrokerClient>, ClientError> {
        let uri = broker_uri(options)?;
        let client = Arc::new(AmqpBrokerClient {
            uri,
            endpoint: options.endpoint(),
            connection_name: options.container_id.clone(),
            reconnect_attempts: options.reconnect_attempts.max(1),
            reconnect_interval: options.reconnect_interval,
            connect_timeout: options.connect_timeout,
            connection: Mutex::new(None),
            closed: AtomicBool::new(false),
            observer,
        });
        client.observer.on_event(&ConnectorEvent::ClientCreated {
            endpoint: client.endpoint.clone(),
        });

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let eager = Arc::clone(&client);
            handle.spawn(async move {
                if let Err(err) = eager.connect().await {
                    warn!(endpoint = %eager.endpoint, error = %err, "initial AMQP connection failed");
                }
            });
        }

        Ok(client)
    }
}

fn broker_uri(options: &ClientOptions) -> Result<AMQPUri, ClientError> {
    let host = options.host.trim();
    if host.is_empty() {
        return Err(ClientError::InvalidOptions("host must not be empty".into()));
    }
    if host.contains(|c: char| c.is_whitespace() || c == '/' || c == '@') {
        return Err(ClientError::InvalidOptions(format!(
            "`{host}` is not a valid host name"
        )));
    }
    if options.port == 0 {
        return Err(ClientError::InvalidOptions("port must not be 0".into()));
    }

    let mut uri = AMQPUri::default();
    uri.scheme = if options.use_ssl {
        AMQPScheme::AMQPS
    } else {
        AMQPScheme::AMQP
    };
    let mut userinfo = AMQPUserInfo::default();
    if let Some(username) = &options.username {
        userinfo.username = username.clone();
    }
    if let Some(password) = &options.password {
        userinfo.password = password.clone();
    }
    uri.authority = AMQPAuthority {
        userinfo,
        host: host.to_string(),
        port: options.port,
    };
    uri.query = AMQPQueryString {
        connection_timeout: Some(options.connect_timeout.as_millis() as u64),
        ..AMQPQueryString::default()
    };
    Ok(uri)
}

fn transport(err: lapin::Error) -> ClientError {
    ClientError::Transport(err.to_string())
}

struct AmqpBrokerClient {
    uri: AMQPUri,
    endpoint: String,
    connection_name: Option<String>,
    reconnect_attempts: u32,
    reconnect_interval: Duration,
    connect_timeout: Duration,
    connection: Mutex<Option<Arc<Connection>>>,
    closed: AtomicBool,
    observer: Arc<dyn ConnectorObserver>,
}

impl AmqpBrokerClient {
    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.closed.load(Ordering::Acquire) {
            Err(ClientError::Closed)
        } else {
            Ok(())
        }
    }

    /// Live connection, reconnecting when the previous one dropped.
    async fn connection(&self) -> Result<Arc<Connection>, ClientError> {
        self.ensure_open()?;
        let mut guard = self.connection.lock().await;
        if let Some(connection) = guard.as_ref() {
            if connection.status().connected() {
                return Ok(Arc::clone(connection));
            }
        }
        let connection = self.establish().await?;
        *guard = Some(Arc::clone(&connection));
        Ok(connection)
    }

    async fn establish(&self) -> Result<Arc<Connection>, ClientError> {
        let mut last_error = String::from("no attempt made");
        for attempt in 1..=self.reconnect_attempts {
            self.ensure_open()?;
            let connect = Connection::connect_uri(self.uri.clone(), self.properties());
            match tokio::time::timeout(self.connect_timeout, connect).await {
                Ok(Ok(connection)) => {
                    let observer = Arc::clone(&self.observer);
                    connection.on_error(move |err| {
                        observer.on_event(&ConnectorEvent::Disconnected {
                            reason: err.to_string(),
                        });
                    });
                    self.observer.on_event(&ConnectorEvent::Connected {
                        endpoint: self.endpoint.clone(),
                    });
                    return Ok(Arc::new(connection));
                }
                Ok(Err(err)) => last_error = err.to_string(),
                Err(_) => last_error = format!("timed out after {:?}", self.connect_timeout),
            }
            debug!(endpoint = %self.endpoint, attempt, error = %last_error, "AMQP connection attempt failed");
            if attempt < self.reconnect_attempts {
                tokio::time::sleep(self.reconnect_interval).await;
            }
        }
        Err(ClientError::Connect {
            endpoint: self.endpoint.clone(),
            attempts: self.reconnect_attempts,
            reason: last_error,
        })
    }

    fn properties(&self) -> ConnectionProperties {
        let properties = ConnectionProperties::default();
        match &self.connection_name {
            Some(name) => properties.with_connection_name(LongString::from(name.clone())),
            None => properties,
        }
    }
}

#[async_trait]
impl BrokerClient for AmqpBrokerClient {
    async fn connect(&self) -> Result<(), ClientError> {
        self.connection().await.map(|_| ())
    }

    async fn create_sender(
        &self,
        address: &str,
        options: SenderOptions,
    ) -> Result<Arc<dyn BrokerSender>, ClientError> {
        let connection = self.connection().await?;
        let channel = connection.create_channel().await.map_err(transport)?;
        declare_queue(&channel, address, options.durable).await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(transport)?;
        Ok(Arc::new(AmqpSender {
            address: address.to_string(),
            channel,
        }))
    }

    async fn create_receiver(
        &self,
        address: &str,
        options: ReceiverOptions,
    ) -> Result<DeliveryStream, ClientError> {
        let connection = self.connection().await?;
        let channel = connection.create_channel().await.map_err(transport)?;
        declare_queue(&channel, address, options.durable).await?;
        let consumer = channel
            .basic_consume(
                address,
                "",
                BasicConsumeOptions {
                    no_ack: options.auto_acknowledgement,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(transport)?;

        let auto_ack = options.auto_acknowledgement;
        let address = address.to_string();
        let deliveries = consumer.map(move |delivery| {
            delivery.map_err(transport).map(|delivery| {
                trace!(channel = channel.id(), delivery_tag = delivery.delivery_tag, "AMQP delivery");
                into_envelope(&address, delivery, auto_ack)
            })
        });
        Ok(deliveries.boxed())
    }

    async fn close(&self) -> Result<(), ClientError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let connection = self.connection.lock().await.take();
        if let Some(connection) = connection {
            if connection.status().connected() {
                connection
                    .close(REPLY_SUCCESS, "connector closed")
                    .await
                    .map_err(transport)?;
            }
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Publishes go to the default exchange, which routes by queue name, so the queue
/// must exist before the first message.
async fn declare_queue(channel: &Channel, address: &str, durable: bool) -> Result<(), ClientError> {
    channel
        .queue_declare(
            address,
            QueueDeclareOptions {
                durable,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map(|_| ())
        .map_err(transport)
}

struct AmqpSender {
    address: String,
    channel: Channel,
}

#[async_trait]
impl BrokerSender for AmqpSender {
    async fn send_with_ack(&self, message: AmqpMessage) -> Result<(), ClientError> {
        let payload = message.body.to_bytes();
        let confirm = self
            .channel
            .basic_publish(
                "",
                &self.address,
                BasicPublishOptions {
                    mandatory: true,
                    ..BasicPublishOptions::default()
                },
                &payload,
                outgoing_properties(&message),
            )
            .await
            .map_err(transport)?;

        match confirm.await.map_err(transport)? {
            Confirmation::Ack(None) | Confirmation::NotRequested => Ok(()),
            Confirmation::Ack(Some(returned)) => Err(ClientError::Rejected(format!(
                "message returned: {}",
                returned.reply_text
            ))),
            Confirmation::Nack(_) => Err(ClientError::Rejected(
                "negatively acknowledged by broker".into(),
            )),
        }
    }
}

fn outgoing_properties(message: &AmqpMessage) -> BasicProperties {
    let mut headers = FieldTable::default();
    for (key, value) in &message.headers {
        headers.insert(
            ShortString::from(key.as_str()),
            AMQPValue::LongString(LongString::from(value.as_str())),
        );
    }
    headers.insert(
        ShortString::from(BODY_TYPE_HEADER),
        AMQPValue::LongString(LongString::from(message.body.type_name())),
    );

    let properties = BasicProperties::default()
        .with_content_type(ShortString::from(message.effective_content_type()))
        .with_headers(headers)
        .with_delivery_mode(if message.durable { PERSISTENT } else { TRANSIENT })
        .with_timestamp(message.created_at.unix_timestamp().max(0) as u64);

    match message.ttl {
        Some(ttl) => properties.with_expiration(ShortString::from(ttl.as_millis().to_string())),
        None => properties,
    }
}

fn into_envelope(address: &str, delivery: Delivery, auto_ack: bool) -> Envelope<AmqpMessage> {
    let message = incoming_message(address, &delivery);
    if auto_ack {
        Envelope::new(message)
    } else {
        Envelope::with_ack(message, AmqpAck(delivery.acker))
    }
}

fn incoming_message(address: &str, delivery: &Delivery) -> AmqpMessage {
    let properties = &delivery.properties;
    let mut headers = std::collections::BTreeMap::new();
    if let Some(table) = properties.headers() {
        for (key, value) in table {
            let text = match value {
                AMQPValue::LongString(v) => v.to_string(),
                AMQPValue::ShortString(v) => v.to_string(),
                _ => continue,
            };
            headers.insert(key.to_string(), text);
        }
    }

    let content_type = properties.content_type().as_ref().map(ShortString::to_string);
    let body = Body::decode(
        headers.get(BODY_TYPE_HEADER).map(String::as_str),
        content_type.as_deref(),
        Bytes::from(delivery.data.clone()),
    );
    let created_at = (*properties.timestamp())
        .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts as i64).ok())
        .unwrap_or_else(OffsetDateTime::now_utc);
    let ttl = properties
        .expiration()
        .as_ref()
        .and_then(|exp| exp.as_str().parse::<u64>().ok())
        .map(Duration::from_millis);

    let mut message = AmqpMessage::new(body)
        .with_address(address)
        .with_durable(*properties.delivery_mode() == Some(PERSISTENT))
        .with_ttl(ttl)
        .with_created_at(created_at)
        .with_delivery(DeliveryInfo {
            delivery_tag: delivery.delivery_tag,
            redelivered: delivery.redelivered,
        });
    message.content_type = content_type;
    message.headers = headers;
    message
}

struct AmqpAck(Acker);

#[async_trait]
impl Acknowledgement for AmqpAck {
    async fn ack(&self) -> Result<(), ClientError> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map_err(transport)
    }

    async fn nack(&self, reason: &str) -> Result<(), ClientError> {
        debug!(reason, "rejecting AMQP delivery");
        self.0
            .nack(BasicNackOptions {
                multiple: false,
                requeue: false,
            })
            .await
            .map_err(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChannelConfig, ConnectorDefaults};
    use crate::observer::TracingObserver;
    use std::collections::BTreeMap;

    fn options(config: ChannelConfig) -> ClientOptions {
        ClientOptions::resolve(&config, &ConnectorDefaults::default()).unwrap()
    }

    #[test]
    fn uri_carries_credentials_and_scheme() {
        let options = options(
            ChannelConfig::new()
                .with("host", "rabbit.local")
                .with("port", "5671")
                .with("use-ssl", "true")
                .with("username", "svc")
                .with("password", "pw"),
        );
        let uri = broker_uri(&options).unwrap();
        assert_eq!(uri.scheme, AMQPScheme::AMQPS);
        assert_eq!(uri.authority.host, "rabbit.local");
        assert_eq!(uri.authority.port, 5671);
        assert_eq!(uri.authority.userinfo.username, "svc");
        assert_eq!(uri.authority.userinfo.password, "pw");
        assert_eq!(uri.query.connection_timeout, Some(1000));
    }

    #[test]
    fn missing_credentials_keep_broker_defaults() {
        let uri = broker_uri(&options(ChannelConfig::new())).unwrap();
        assert_eq!(uri.authority.userinfo, AMQPUserInfo::default());
        assert_eq!(uri.scheme, AMQPScheme::AMQP);
    }

    #[test]
    fn malformed_hosts_are_rejected_by_the_factory() {
        let options = options(ChannelConfig::new().with("host", "bad host"));
        let result = AmqpClientFactory.create(&options, Arc::new(TracingObserver));
        assert!(matches!(result, Err(ClientError::InvalidOptions(_))));
    }

    #[test]
    fn outgoing_properties_map_durability_ttl_and_type() {
        let message = AmqpMessage::new(Body::Int(42))
            .with_durable(true)
            .with_ttl(Some(Duration::from_millis(5000)))
            .with_header("trace-id", "abc");
        let properties = outgoing_properties(&message);

        assert_eq!(*properties.delivery_mode(), Some(PERSISTENT));
        assert_eq!(
            properties.expiration().as_ref().map(ShortString::as_str),
            Some("5000")
        );
        assert_eq!(
            properties.content_type().as_ref().map(ShortString::as_str),
            Some("text/plain")
        );
        let headers: BTreeMap<String, String> = properties
            .headers()
            .as_ref()
            .unwrap()
            .into_iter()
            .filter_map(|(k, v)| match v {
                AMQPValue::LongString(s) => Some((k.to_string(), s.to_string())),
                _ => None,
            })
            .collect();
        assert_eq!(headers.get(BODY_TYPE_HEADER).map(String::as_str), Some("int"));
        assert_eq!(headers.get("trace-id").map(String::as_str), Some("abc"));
    }

    #[test]
    fn transient_messages_without_ttl() {
        let properties = outgoing_properties(&AmqpMessage::new(Body::Text("x".into())));
        assert_eq!(*properties.delivery_mode(), Some(TRANSIENT));
        assert!(properties.expiration().is_none());
    }
}
