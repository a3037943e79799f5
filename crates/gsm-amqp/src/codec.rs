//! Payload to broker message mapping. Outbound only; received messages are handed
//! through without decoding.

use std::time::Duration;

use crate::message::{AmqpMessage, Body};
use crate::payload::Payload;

/// Encodes `payload` into a broker message. Never fails.
///
/// `ttl` is in milliseconds; zero or less sets no expiry. A [`Payload::Message`] is
/// returned unchanged, ignoring `durable` and `ttl`.
pub fn encode(payload: &Payload, durable: bool, ttl: i64) -> AmqpMessage {
    let body = match payload {
        Payload::Message(message) => return message.clone(),
        Payload::Text(v) => Body::Text(v.clone()),
        Payload::Bool(v) => Body::Bool(*v),
        Payload::Byte(v) => Body::Byte(*v),
        Payload::Char(v) => Body::Char(*v),
        Payload::Double(v) => Body::Double(*v),
        Payload::Float(v) => Body::Float(*v),
        Payload::Int(v) => Body::Int(*v),
        Payload::Long(v) => Body::Long(*v),
        Payload::Short(v) => Body::Short(*v),
        Payload::Timestamp(v) => Body::Timestamp(*v),
        Payload::Uuid(v) => Body::Uuid(*v),
        Payload::JsonArray(v) => Body::JsonArray(v.clone()),
        Payload::JsonObject(v) => Body::JsonObject(v.clone()),
        Payload::Binary(v) => Body::Binary(v.clone()),
        Payload::Other(v) => Body::Text(v.to_string()),
    };

    AmqpMessage::new(body)
        .with_durable(durable)
        .with_ttl(ttl_from_millis(ttl))
}

fn ttl_from_millis(ttl: i64) -> Option<Duration> {
    u64::try_from(ttl)
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;
    use time::macros::datetime;
    use uuid::Uuid;

    struct Point {
        x: i32,
        y: i32,
    }

    impl std::fmt::Display for Point {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "Point({}, {})", self.x, self.y)
        }
    }

    #[test]
    fn int_with_ttl_and_durability() {
        let message = encode(&Payload::Int(42), true, 5000);
        assert_eq!(message.body, Body::Int(42));
        assert!(message.durable);
        assert_eq!(message.ttl, Some(Duration::from_millis(5000)));
        let expires = message.expires_at().expect("expiry");
        assert_eq!(expires - message.created_at, time::Duration::milliseconds(5000));
    }

    #[test]
    fn non_positive_ttl_means_no_expiry() {
        assert_eq!(encode(&Payload::from("x"), false, 0).ttl, None);
        assert_eq!(encode(&Payload::from("x"), false, -1).ttl, None);
        assert!(!encode(&Payload::from("x"), false, 0).durable);
    }

    #[test]
    fn scalar_and_structured_payloads_keep_their_type() {
        let id = Uuid::new_v4();
        let ts = datetime!(2024-01-01 00:00:00 UTC);
        let cases = vec![
            (Payload::from("hello"), "string"),
            (Payload::Bool(false), "boolean"),
            (Payload::Byte(-3), "byte"),
            (Payload::Char('z'), "char"),
            (Payload::Double(2.5), "double"),
            (Payload::Float(1.25), "float"),
            (Payload::Long(1 << 40), "long"),
            (Payload::Short(7), "short"),
            (Payload::Timestamp(ts), "timestamp"),
            (Payload::Uuid(id), "uuid"),
            (Payload::from(json!(["a"])), "json-array"),
            (Payload::from(json!({"k": "v"})), "json-object"),
            (Payload::Binary(Bytes::from_static(b"\x00\x01")), "binary"),
        ];
        for (payload, expected) in cases {
            let message = encode(&payload, true, 0);
            assert_eq!(message.body.type_name(), expected, "{payload:?}");
        }
    }

    #[test]
    fn unknown_values_fall_back_to_text() {
        let message = encode(&Payload::other(Point { x: 1, y: 2 }), true, 0);
        assert_eq!(message.body, Body::Text("Point(1, 2)".into()));
    }

    #[test]
    fn broker_messages_pass_through_untouched() {
        let original = AmqpMessage::new(Body::Text("raw".into()))
            .with_address("elsewhere")
            .with_header("trace", "abc");
        let message = encode(&Payload::Message(original.clone()), true, 1000);
        assert_eq!(message, original);
    }
}
