use thiserror::Error;

/// Channel configuration could not be resolved. Raised before any network activity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("address must be set (`address` or `channel-name`)")]
    MissingAddress,
    #[error("invalid value `{value}` for `{key}`: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Failure reported by a broker client backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("invalid client options: {0}")]
    InvalidOptions(String),
    #[error("unable to connect to {endpoint} after {attempts} attempts: {reason}")]
    Connect {
        endpoint: String,
        attempts: u32,
        reason: String,
    },
    #[error("client is closed")]
    Closed,
    #[error("broker rejected the message: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Error)]
pub enum ConnectorError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error("unable to create the AMQP client, probably a configuration error")]
    ConnectionConfiguration(#[source] ClientError),
    #[error("unable to create a sender for `{address}`")]
    SenderCreation {
        address: String,
        #[source]
        source: ClientError,
    },
    #[error("inbound stream for `{address}` failed")]
    Stream {
        address: String,
        #[source]
        source: ClientError,
    },
    #[error("channel `{address}` is not broadcast and already has a subscriber")]
    AlreadySubscribed { address: String },
    #[error("connector is closed")]
    Closed,
}

impl ConnectorError {
    /// True when the error comes from a closed connector or client.
    pub fn is_closed(&self) -> bool {
        match self {
            ConnectorError::Closed => true,
            ConnectorError::ConnectionConfiguration(source)
            | ConnectorError::SenderCreation { source, .. }
            | ConnectorError::Stream { source, .. } => matches!(source, ClientError::Closed),
            _ => false,
        }
    }
}
