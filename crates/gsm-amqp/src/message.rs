//! Broker-native message model shared by the codec and the client backends.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

pub const BODY_TYPE_HEADER: &str = "x-body-type";

const TEXT_PLAIN: &str = "text/plain";
const APPLICATION_JSON: &str = "application/json";
const OCTET_STREAM: &str = "application/octet-stream";

/// Typed message body. Scalars travel in their textual form.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
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
}

impl Body {
    /// Value written to the `x-body-type` header.
    pub fn type_name(&self) -> &'static str {
        match self {
            Body::Text(_) => "string",
            Body::Bool(_) => "boolean",
            Body::Byte(_) => "byte",
            Body::Char(_) => "char",
            Body::Double(_) => "double",
            Body::Float(_) => "float",
            Body::Int(_) => "int",
            Body::Long(_) => "long",
            Body::Short(_) => "short",
            Body::Timestamp(_) => "timestamp",
            Body::Uuid(_) => "uuid",
            Body::JsonArray(_) => "json-array",
            Body::JsonObject(_) => "json-object",
            Body::Binary(_) => "binary",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Body::JsonArray(_) | Body::JsonObject(_) => APPLICATION_JSON,
            Body::Binary(_) => OCTET_STREAM,
            _ => TEXT_PLAIN,
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        match self {
            Body::Text(text) => Bytes::from(text.clone()),
            Body::Bool(v) => Bytes::from(v.to_string()),
            Body::Byte(v) => Bytes::from(v.to_string()),
            Body::Char(v) => Bytes::from(v.to_string()),
            Body::Double(v) => Bytes::from(v.to_string()),
            Body::Float(v) => Bytes::from(v.to_string()),
            Body::Int(v) => Bytes::from(v.to_string()),
            Body::Long(v) => Bytes::from(v.to_string()),
            Body::Short(v) => Bytes::from(v.to_string()),
            Body::Timestamp(ts) => Bytes::from(format_timestamp(*ts)),
            Body::Uuid(id) => Bytes::from(id.to_string()),
            Body::JsonArray(items) => json_bytes(&Value::Array(items.clone())),
            Body::JsonObject(map) => json_bytes(&Value::Object(map.clone())),
            Body::Binary(bytes) => bytes.clone(),
        }
    }

    /// Rebuilds a body from wire bytes and the `x-body-type` header.
    ///
    /// Unknown or missing type names and unparsable scalars yield [`Body::Binary`];
    /// a `text/*` content type without a type name yields [`Body::Text`].
    pub fn decode(type_name: Option<&str>, content_type: Option<&str>, data: Bytes) -> Body {
        let text = || std::str::from_utf8(&data).ok().map(str::to_string);
        let decoded = match type_name {
            Some("string") => text().map(Body::Text),
            Some("boolean") => text().and_then(|t| t.parse().ok()).map(Body::Bool),
            Some("byte") => text().and_then(|t| t.parse().ok()).map(Body::Byte),
            Some("char") => text().and_then(|t| t.parse().ok()).map(Body::Char),
            Some("double") => text().and_then(|t| t.parse().ok()).map(Body::Double),
            Some("float") => text().and_then(|t| t.parse().ok()).map(Body::Float),
            Some("int") => text().and_then(|t| t.parse().ok()).map(Body::Int),
            Some("long") => text().and_then(|t| t.parse().ok()).map(Body::Long),
            Some("short") => text().and_then(|t| t.parse().ok()).map(Body::Short),
            Some("timestamp") => text()
                .and_then(|t| OffsetDateTime::parse(&t, &Rfc3339).ok())
                .map(Body::Timestamp),
            Some("uuid") => text().and_then(|t| t.parse().ok()).map(Body::Uuid),
            Some("json-array") => match serde_json::from_slice(&data) {
                Ok(Value::Array(items)) => Some(Body::JsonArray(items)),
                _ => None,
            },
            Some("json-object") => match serde_json::from_slice(&data) {
                Ok(Value::Object(map)) => Some(Body::JsonObject(map)),
                _ => None,
            },
            None if content_type.is_some_and(|ct| ct.starts_with("text/")) => {
                text().map(Body::Text)
            }
            _ => None,
        };
        decoded.unwrap_or(Body::Binary(data))
    }
}

fn format_timestamp(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339)
        .unwrap_or_else(|_| ts.unix_timestamp().to_string())
}

fn json_bytes(value: &Value) -> Bytes {
    Bytes::from(value.to_string())
}

/// Set on messages that came from the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryInfo {
    pub delivery_tag: u64,
    pub redelivered: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AmqpMessage {
    pub address: Option<String>,
    pub body: Body,
    pub durable: bool,
    pub ttl: Option<Duration>,
    pub created_at: OffsetDateTime,
    pub content_type: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub delivery: Option<DeliveryInfo>,
}

impl AmqpMessage {
    pub fn new(body: Body) -> Self {
        Self {
            address: None,
            body,
            durable: false,
            ttl: None,
            created_at: OffsetDateTime::now_utc(),
            content_type: None,
            headers: BTreeMap::new(),
            delivery: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_created_at(mut self, created_at: OffsetDateTime) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_delivery(mut self, delivery: DeliveryInfo) -> Self {
        self.delivery = Some(delivery);
        self
    }

    /// Explicit content type, else the one implied by the body.
    pub fn effective_content_type(&self) -> &str {
        self.content_type
            .as_deref()
            .unwrap_or_else(|| self.body.content_type())
    }

    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        let ttl = self.ttl?;
        let ttl = time::Duration::try_from(ttl).ok()?;
        self.created_at.checked_add(ttl)
    }
}
