//! Channel configuration and its typed resolution.
//!
//! A channel is described by flat string properties (`address`, `durable`, `ttl`, ...).
//! Connection-level keys fall back to [`ConnectorDefaults`], then to built-in values.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde_json::Value;
use tracing::info;

use crate::error::ConfigError;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5672;
pub const RECONNECT_ATTEMPTS: u32 = 100;
pub const RECONNECT_INTERVAL: Duration = Duration::from_millis(10);
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(1000);

pub const KEY_ADDRESS: &str = "address";
pub const KEY_CHANNEL_NAME: &str = "channel-name";
pub const KEY_BROADCAST: &str = "broadcast";
pub const KEY_DURABLE: &str = "durable";
pub const KEY_AUTO_ACK: &str = "auto-acknowledgement";
pub const KEY_TTL: &str = "ttl";
pub const KEY_HOST: &str = "host";
pub const KEY_PORT: &str = "port";
pub const KEY_USERNAME: &str = "username";
pub const KEY_PASSWORD: &str = "password";
pub const KEY_USE_SSL: &str = "use-ssl";
pub const KEY_CONTAINER_ID: &str = "containerId";

const HOST_ENV: &str = "AMQP_HOST";
const PORT_ENV: &str = "AMQP_PORT";
const USERNAME_ENV: &str = "AMQP_USERNAME";
const PASSWORD_ENV: &str = "AMQP_PASSWORD";
const USE_SSL_ENV: &str = "AMQP_USE_SSL";

/// Raw per-channel properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelConfig {
    properties: BTreeMap<String, String>,
}

impl ChannelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            properties: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Builds a configuration from a flat JSON object; scalar values are stringified.
    pub fn from_json(value: &Value) -> Result<Self, ConfigError> {
        let Value::Object(map) = value else {
            return Err(ConfigError::InvalidValue {
                key: "<root>".into(),
                value: value.to_string(),
                reason: "expected a JSON object".into(),
            });
        };
        let mut properties = BTreeMap::new();
        for (key, value) in map {
            let text = match value {
                Value::Null => continue,
                Value::String(s) => s.clone(),
                Value::Bool(_) | Value::Number(_) => value.to_string(),
                Value::Array(_) | Value::Object(_) => {
                    return Err(ConfigError::InvalidValue {
                        key: key.clone(),
                        value: value.to_string(),
                        reason: "nested values are not supported".into(),
                    });
                }
            };
            properties.insert(key.clone(), text);
        }
        Ok(Self { properties })
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn get<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.get_str(key)
            .map(|raw| {
                raw.trim()
                    .parse::<T>()
                    .map_err(|err| invalid(key, raw, err.to_string()))
            })
            .transpose()
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        self.get_str(key).map(|raw| parse_bool(key, raw)).transpose()
    }

    /// `address`, falling back to `channel-name`.
    pub fn address(&self) -> Result<String, ConfigError> {
        self.get_str(KEY_ADDRESS)
            .or_else(|| self.get_str(KEY_CHANNEL_NAME))
            .map(str::to_string)
            .ok_or(ConfigError::MissingAddress)
    }
}

fn invalid(key: &str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, raw, "expected a boolean")),
    }
}

/// Connector-wide connection defaults, used when a channel does not set a field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectorDefaults {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_ssl: Option<bool>,
}

impl ConnectorDefaults {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let port = read(PORT_ENV)
            .map(|raw| {
                raw.trim()
                    .parse::<u16>()
                    .map_err(|err| invalid(PORT_ENV, &raw, err.to_string()))
            })
            .transpose()?;
        let use_ssl = read(USE_SSL_ENV)
            .map(|raw| parse_bool(USE_SSL_ENV, &raw))
            .transpose()?;

        Ok(Self {
            host: read(HOST_ENV),
            port,
            username: read(USERNAME_ENV),
            password: read(PASSWORD_ENV),
            use_ssl,
        })
    }
}

/// Fully resolved options for building a broker client.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_ssl: bool,
    pub container_id: Option<String>,
    pub reconnect_attempts: u32,
    pub reconnect_interval: Duration,
    pub connect_timeout: Duration,
}

impl ClientOptions {
    /// Checks the typed connection keys of `config` without resolving anything.
    pub fn validate(config: &ChannelConfig) -> Result<(), ConfigError> {
        config.get::<u16>(KEY_PORT)?;
        config.get_bool(KEY_USE_SSL)?;
        Ok(())
    }

    /// Per-channel value, else connector default, else built-in default.
    pub fn resolve(
        config: &ChannelConfig,
        defaults: &ConnectorDefaults,
    ) -> Result<Self, ConfigError> {
        let host = match config.get_str(KEY_HOST) {
            Some(host) => host.to_string(),
            None => match &defaults.host {
                Some(host) => host.clone(),
                None => {
                    info!("no AMQP host configured, using {DEFAULT_HOST}");
                    DEFAULT_HOST.to_string()
                }
            },
        };
        let port = config
            .get::<u16>(KEY_PORT)?
            .or(defaults.port)
            .unwrap_or(DEFAULT_PORT);
        let use_ssl = config
            .get_bool(KEY_USE_SSL)?
            .or(defaults.use_ssl)
            .unwrap_or(false);
        let username = config
            .get_str(KEY_USERNAME)
            .map(str::to_string)
            .or_else(|| defaults.username.clone());
        let password = config
            .get_str(KEY_PASSWORD)
            .map(str::to_string)
            .or_else(|| defaults.password.clone());

        Ok(Self {
            host,
            port,
            username,
            password,
            use_ssl,
            container_id: config.get_str(KEY_CONTAINER_ID).map(str::to_string),
            reconnect_attempts: RECONNECT_ATTEMPTS,
            reconnect_interval: RECONNECT_INTERVAL,
            connect_timeout: CONNECT_TIMEOUT,
        })
    }

    /// Scheme, host and port; never includes credentials.
    pub fn endpoint(&self) -> String {
        let scheme = if self.use_ssl { "amqps" } else { "amqp" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("use_ssl", &self.use_ssl)
            .field("container_id", &self.container_id)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .field("reconnect_interval", &self.reconnect_interval)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundOptions {
    pub address: String,
    pub broadcast: bool,
    pub durable: bool,
    pub auto_acknowledgement: bool,
}

impl InboundOptions {
    pub fn from_config(config: &ChannelConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            address: config.address()?,
            broadcast: config.get_bool(KEY_BROADCAST)?.unwrap_or(false),
            durable: config.get_bool(KEY_DURABLE)?.unwrap_or(true),
            auto_acknowledgement: config.get_bool(KEY_AUTO_ACK)?.unwrap_or(false),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundOptions {
    pub address: String,
    pub durable: bool,
    /// Time-to-live in milliseconds; zero or less disables expiry.
    pub ttl: i64,
}

impl OutboundOptions {
    pub fn from_config(config: &ChannelConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            address: config.address()?,
            durable: config.get_bool(KEY_DURABLE)?.unwrap_or(true),
            ttl: config.get::<i64>(KEY_TTL)?.unwrap_or(0),
        })
    }
}
