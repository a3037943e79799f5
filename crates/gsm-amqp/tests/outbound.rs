use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt, stream};
use gsm_amqp::{
    AckOutcome, AmqpMessage, Body, ChannelConfig, ClientError, Connector, ConnectorDefaults,
    ConnectorError, Envelope, InMemoryBroker, Payload, SendOutcome,
};

fn connector(broker: &InMemoryBroker) -> Connector {
    Connector::builder(ConnectorDefaults::default())
        .factory(Arc::new(broker.clone()))
        .build()
}

fn orders() -> ChannelConfig {
    ChannelConfig::new().with("address", "orders")
}

struct Composite {
    id: u32,
    tags: Vec<&'static str>,
}

impl std::fmt::Display for Composite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Composite#{}[{}]", self.id, self.tags.join(","))
    }
}

#[tokio::test]
async fn int_payload_is_sent_durable_with_expiry_and_acked() {
    let broker = InMemoryBroker::new();
    let connector = connector(&broker);
    let channel = connector
        .outgoing(orders().with("ttl", "5000").with("durable", "true"))
        .unwrap();

    let (envelope, outcome) = Envelope::tracked(Payload::Int(42));
    let sent = channel.send(envelope).await.unwrap();

    assert_eq!(sent, SendOutcome::Acknowledged);
    assert_eq!(outcome.outcome().await, Some(AckOutcome::Acked));

    let published = broker.published("orders");
    assert_eq!(published.len(), 1);
    let message = &published[0];
    assert_eq!(message.body, Body::Int(42));
    assert!(message.durable);
    assert_eq!(message.ttl, Some(Duration::from_millis(5000)));
    let expires_at = message.expires_at().unwrap();
    assert_eq!(
        expires_at - message.created_at,
        time::Duration::milliseconds(5000)
    );
}

#[tokio::test]
async fn unrecognised_values_are_sent_as_text() {
    let broker = InMemoryBroker::new();
    let connector = connector(&broker);
    let channel = connector.outgoing(orders()).unwrap();

    let payload = Payload::other(Composite {
        id: 7,
        tags: vec!["a", "b"],
    });
    let (envelope, outcome) = Envelope::tracked(payload);
    assert_eq!(
        channel.send(envelope).await.unwrap(),
        SendOutcome::Acknowledged
    );
    assert_eq!(outcome.outcome().await, Some(AckOutcome::Acked));

    let published = broker.take_published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].body, Body::Text("Composite#7[a,b]".into()));
    assert!(published[0].durable);
    assert_eq!(published[0].ttl, None);
}

#[tokio::test]
#[tracing_test::traced_test]
async fn failed_send_is_nacked_and_next_message_still_goes_out() {
    let broker = InMemoryBroker::new();
    broker.fail_next_sends(1);
    let connector = connector(&broker);
    let channel = connector.outgoing(orders()).unwrap();

    let (first, first_outcome) = Envelope::tracked(Payload::from("m"));
    let (second, second_outcome) = Envelope::tracked(Payload::from("m+1"));
    channel.run(stream::iter(vec![first, second])).await.unwrap();

    assert!(matches!(
        first_outcome.outcome().await,
        Some(AckOutcome::Nacked(reason)) if reason.contains("refused")
    ));
    assert_eq!(second_outcome.outcome().await, Some(AckOutcome::Acked));

    let published = broker.published("orders");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].body, Body::Text("m+1".into()));
    assert!(logs_contain("unable to send AMQP message"));
}

#[tokio::test]
async fn rejected_send_reports_outcome_without_error() {
    let broker = InMemoryBroker::new();
    broker.fail_next_sends(1);
    let connector = connector(&broker);
    let channel = connector.outgoing(orders()).unwrap();

    let outcome = channel.send(Envelope::new(Payload::Bool(true))).await.unwrap();
    assert!(matches!(outcome, SendOutcome::Rejected(_)));
    assert!(channel.is_ready());
}

#[tokio::test(start_paused = true)]
async fn concurrent_first_sends_share_one_sender() {
    let broker = InMemoryBroker::new();
    broker.delay_sender_creation(Duration::from_millis(50));
    let connector = connector(&broker);
    let channel = Arc::new(connector.outgoing(orders()).unwrap());
    assert!(!channel.is_ready());

    let sends = (0..10).map(|n| {
        let channel = Arc::clone(&channel);
        async move { channel.send(Envelope::new(Payload::Int(n))).await }
    });
    let results = futures::future::join_all(sends).await;

    assert!(
        results
            .iter()
            .all(|r| matches!(r, Ok(SendOutcome::Acknowledged)))
    );
    assert_eq!(broker.senders_created(), 1);
    assert_eq!(broker.clients_created(), 1);
    assert_eq!(broker.published("orders").len(), 10);
    assert!(channel.is_ready());
}

#[tokio::test]
async fn sender_creation_failure_terminates_run_and_nacks() {
    let broker = InMemoryBroker::new();
    broker.fail_sender_creation(true);
    let connector = connector(&broker);
    let channel = connector.outgoing(orders()).unwrap();

    let (first, first_outcome) = Envelope::tracked(Payload::Int(1));
    let (second, second_outcome) = Envelope::tracked(Payload::Int(2));
    let err = channel
        .run(stream::iter(vec![first, second]))
        .await
        .unwrap_err();

    match err {
        ConnectorError::SenderCreation { address, source } => {
            assert_eq!(address, "orders");
            assert!(matches!(source, ClientError::Rejected(_)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(matches!(
        first_outcome.outcome().await,
        Some(AckOutcome::Nacked(_))
    ));
    assert_eq!(second_outcome.outcome().await, None);
    assert!(broker.published("orders").is_empty());
    assert!(!channel.is_ready());
}

#[tokio::test]
async fn broker_messages_are_forwarded_untouched() {
    let broker = InMemoryBroker::new();
    let connector = connector(&broker);
    let channel = connector.outgoing(orders().with("ttl", "1000")).unwrap();

    let message = AmqpMessage::new(Body::Text("<order/>".into()))
        .with_content_type("application/xml")
        .with_header("tenant", "acme");
    channel
        .send(Envelope::new(Payload::Message(message)))
        .await
        .unwrap();

    let published = broker.published("orders");
    assert_eq!(published[0].effective_content_type(), "application/xml");
    assert_eq!(
        published[0].headers.get("tenant").map(String::as_str),
        Some("acme")
    );
    assert_eq!(published[0].ttl, None);
    assert!(!published[0].durable);
}

#[tokio::test]
async fn sink_sends_in_order() {
    let broker = InMemoryBroker::new();
    let connector = connector(&broker);
    let channel = Arc::new(connector.outgoing(orders()).unwrap());

    let sink = Arc::clone(&channel).sink();
    futures::pin_mut!(sink);
    for n in 1..=3i64 {
        sink.send(Envelope::new(Payload::Long(n))).await.unwrap();
    }
    sink.close().await.unwrap();

    let bodies: Vec<Body> = broker
        .published("orders")
        .into_iter()
        .map(|m| m.body)
        .collect();
    assert_eq!(bodies, vec![Body::Long(1), Body::Long(2), Body::Long(3)]);
}

#[tokio::test]
async fn sends_after_close_fail_fast() {
    let broker = InMemoryBroker::new();
    let connector = connector(&broker);
    let channel = connector.outgoing(orders()).unwrap();
    channel.send(Envelope::new(Payload::Int(1))).await.unwrap();

    connector.close().await;

    let (envelope, outcome) = Envelope::tracked(Payload::Int(2));
    let err = channel.send(envelope).await.unwrap_err();
    assert!(err.is_closed());
    assert!(matches!(outcome.outcome().await, Some(AckOutcome::Nacked(_))));
    assert!(matches!(
        connector.outgoing(orders()),
        Err(ConnectorError::Closed)
    ));
    assert_eq!(broker.published("orders").len(), 1);
}

#[tokio::test]
async fn sender_declares_its_queue_with_channel_durability() {
    let broker = InMemoryBroker::new();
    let connector = connector(&broker);
    assert_eq!(broker.declared_durable("audit"), None);

    let channel = connector
        .outgoing(
            ChannelConfig::new()
                .with("address", "audit")
                .with("durable", "false"),
        )
        .unwrap();
    channel.send(Envelope::new(Payload::Int(1))).await.unwrap();

    assert_eq!(broker.declared_durable("audit"), Some(false));
}

#[tokio::test]
async fn conflicting_queue_declaration_fails_sender_creation() {
    let broker = InMemoryBroker::new();
    let connector = connector(&broker);
    let incoming = connector
        .incoming(ChannelConfig::new().with("address", "orders"))
        .unwrap();
    let mut deliveries = incoming.subscribe().unwrap();
    broker.publish("orders", AmqpMessage::new(Body::Int(0)));
    deliveries.next().await.unwrap().unwrap().ack().await.unwrap();
    assert_eq!(broker.declared_durable("orders"), Some(true));

    let outgoing = connector
        .outgoing(orders().with("durable", "false"))
        .unwrap();
    let (envelope, outcome) = Envelope::tracked(Payload::Int(1));
    let err = outgoing.send(envelope).await.unwrap_err();

    assert!(matches!(
        err,
        ConnectorError::SenderCreation { ref address, source: ClientError::Rejected(_) }
            if address == "orders"
    ));
    assert!(matches!(outcome.outcome().await, Some(AckOutcome::Nacked(_))));
    assert!(broker.published("orders").is_empty());
}
