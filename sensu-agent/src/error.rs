//! Error types shared across the agent
//!
//! Transport and check errors are returned to callers as typed values; the
//! processors decide whether to log and swallow them.

use thiserror::Error;

/// Failures of the message-bus transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("the connection is not opened")]
    NotConnected,

    #[error("all {attempts} endpoint(s) failed, first error: {source}")]
    AllEndpointsFailed {
        attempts: usize,
        #[source]
        source: Box<TransportError>,
    },

    #[error("invalid endpoint `{uri}`: {reason}")]
    InvalidEndpoint { uri: String, reason: String },

    #[error("invalid topic `{0}`")]
    InvalidTopic(String),

    #[error("no CONNACK received from {0} in time")]
    ConnectTimeout(String),

    #[error("broker refused the connection: {0}")]
    Refused(String),

    #[error("bus client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("bus connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    #[error("packet of {size} bytes exceeds the {limit} byte limit")]
    PacketTooLarge { size: usize, limit: usize },
}

/// Failures of the check dispatch itself; execution failures are reported
/// as regular check outputs instead
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CheckError {
    #[error("Command key not filled")]
    MissingCommand,
}

/// Configuration loading failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No client name provided")]
    MissingClientName,

    #[error("could not find a configuration directory")]
    NoConfigDir,

    #[error(transparent)]
    Endpoint(#[from] TransportError),
}
