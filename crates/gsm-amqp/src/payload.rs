use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::message::AmqpMessage;

/// Application value written to an outgoing channel.
#[derive(Clone)]
pub enum Payload {
    Text(String),
    Bool(bool),
    Byte(i8),
    Char(char),
    Double(f64),
    Float(f32),
    Int(i32),
    Long(i64),
    Short(i16),
    Timestamp(OffsetDateTime),
    Uuid(Uuid),
    JsonArray(Vec<Value>),
    JsonObject(Map<String, Value>),
    Binary(Bytes),
    /// Already broker-native; sent as is.
    Message(AmqpMessage),
    /// Anything else; sent in its `Display` form.
    Other(Arc<dyn fmt::Display + Send + Sync>),
}

impl Payload {
    pub fn other<T>(value: T) -> Self
    where
        T: fmt::Display + Send + Sync + 'static,
    {
        Payload::Other(Arc::new(value))
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Text(v) => f.debug_tuple("Text").field(v).finish(),
            Payload::Bool(v) => f.debug_tuple("Bool").field(v).finish(),
            Payload::Byte(v) => f.debug_tuple("Byte").field(v).finish(),
            Payload::Char(v) => f.debug_tuple("Char").field(v).finish(),
            Payload::Double(v) => f.debug_tuple("Double").field(v).finish(),
            Payload::Float(v) => f.debug_tuple("Float").field(v).finish(),
            Payload::Int(v) => f.debug_tuple("Int").field(v).finish(),
            Payload::Long(v) => f.debug_tuple("Long").field(v).finish(),
            Payload::Short(v) => f.debug_tuple("Short").field(v).finish(),
            Payload::Timestamp(v) => f.debug_tuple("Timestamp").field(v).finish(),
            Payload::Uuid(v) => f.debug_tuple("Uuid").field(v).finish(),
            Payload::JsonArray(v) => f.debug_tuple("JsonArray").field(v).finish(),
            Payload::JsonObject(v) => f.debug_tuple("JsonObject").field(v).finish(),
            Payload::Binary(v) => f.debug_tuple("Binary").field(v).finish(),
            Payload::Message(v) => f.debug_tuple("Message").field(v).finish(),
            Payload::Other(v) => f.debug_tuple("Other").field(&v.to_string()).finish(),
        }
    }
}

macro_rules! payload_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Payload {
                fn from(value: $ty) -> Self {
                    Payload::$variant(value)
                }
            }
        )*
    };
}

payload_from! {
    String => Text,
    bool => Bool,
    i8 => Byte,
    char => Char,
    f64 => Double,
    f32 => Float,
    i32 => Int,
    i64 => Long,
    i16 => Short,
    OffsetDateTime => Timestamp,
    Uuid => Uuid,
    Vec<Value> => JsonArray,
    Map<String, Value> => JsonObject,
    Bytes => Binary,
    AmqpMessage => Message,
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Binary(Bytes::from(value))
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => Payload::JsonArray(items),
            Value::Object(map) => Payload::JsonObject(map),
            Value::String(text) => Payload::Text(text),
            Value::Bool(v) => Payload::Bool(v),
            Value::Number(n) => match n.as_i64() {
                Some(v) => Payload::Long(v),
                None => match n.as_f64() {
                    Some(v) => Payload::Double(v),
                    None => Payload::Text(n.to_string()),
                },
            },
            Value::Null => Payload::Text("null".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_values_map_to_structured_variants() {
        assert!(matches!(Payload::from(json!([1, 2])), Payload::JsonArray(v) if v.len() == 2));
        assert!(matches!(Payload::from(json!({"a": 1})), Payload::JsonObject(_)));
        assert!(matches!(Payload::from(json!(7)), Payload::Long(7)));
        assert!(matches!(Payload::from(json!(1.5)), Payload::Double(v) if v == 1.5));
    }

    #[test]
    fn other_debug_shows_display_form() {
        let payload = Payload::other(std::net::Ipv4Addr::LOCALHOST);
        assert_eq!(format!("{payload:?}"), r#"Other("127.0.0.1")"#);
    }
}
