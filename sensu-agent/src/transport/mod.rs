//! Message-bus transport
//!
//! The agent talks to the bus through the [`Transport`] trait: connect with
//! failover, publish to an exchange, subscribe a queue until told to stop,
//! and learn about unexpected disconnects through [`Transport::closed`].
//!
//! Exchanges and routing keys are mapped onto broker topics:
//!
//! | kind     | publish topic                          | subscription filter               |
//! |----------|----------------------------------------|-----------------------------------|
//! | `direct` | `exchange` or `exchange/routing_key`   | `exchange/#` or `exchange/key`    |
//! | `fanout` | `exchange`                             | `exchange/#`                      |

pub mod endpoint;
pub mod mqtt;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::signal::StopListener;

pub use endpoint::{BrokerAddress, TransportEndpoint};
pub use mqtt::MqttTransport;

/// Exchange used for liveness announcements
pub const KEEPALIVES_EXCHANGE: &str = "keepalives";
/// Exchange used for check results
pub const RESULTS_EXCHANGE: &str = "results";
/// Routing key binding every message of an exchange
pub const MATCH_ALL: &str = "#";

/// Routing mode of an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Direct,
    #[default]
    Fanout,
}

impl ExchangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(ExchangeKind::Direct),
            "fanout" => Ok(ExchangeKind::Fanout),
            other => Err(other.to_string()),
        }
    }
}

/// A queue bound to an exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub exchange_kind: ExchangeKind,
    pub exchange: String,
    /// Funnel name, unique per subscriber instance
    pub queue: String,
    pub routing_key: String,
}

impl Binding {
    /// Broker topic filter receiving what this binding would receive
    pub fn filter(&self) -> Result<String, TransportError> {
        validate_exchange(&self.exchange)?;

        let key = self.routing_key.as_str();
        match self.exchange_kind {
            ExchangeKind::Direct if !key.is_empty() && key != MATCH_ALL => {
                validate_segment(&self.exchange, key)?;
                Ok(format!("{}/{}", self.exchange, key))
            }
            _ => Ok(format!("{}/{}", self.exchange, MATCH_ALL)),
        }
    }
}

/// Broker topic a message published to `exchange` with `routing_key` lands on
pub fn publish_topic(
    kind: ExchangeKind,
    exchange: &str,
    routing_key: &str,
) -> Result<String, TransportError> {
    validate_exchange(exchange)?;

    match kind {
        ExchangeKind::Direct if !routing_key.is_empty() => {
            validate_segment(exchange, routing_key)?;
            Ok(format!("{}/{}", exchange, routing_key))
        }
        _ => Ok(exchange.to_string()),
    }
}

fn validate_exchange(exchange: &str) -> Result<(), TransportError> {
    if exchange.is_empty() {
        return Err(TransportError::InvalidTopic(exchange.to_string()));
    }
    validate_segment(exchange, exchange)
}

fn validate_segment(exchange: &str, segment: &str) -> Result<(), TransportError> {
    if segment.contains(['+', '#', '\0']) {
        return Err(TransportError::InvalidTopic(format!("{}/{}", exchange, segment)));
    }
    Ok(())
}

/// MQTT-style filter matching (`+` one level, trailing `#` any remainder,
/// including the parent level itself)
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Connection to the message bus.
///
/// Only the orchestrator connects and closes; processors share the handle
/// to publish and subscribe.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Try every endpoint in random order, keeping the first that answers.
    async fn connect(&self) -> Result<(), TransportError>;

    /// A live connection exists and has not been lost
    fn is_connected(&self) -> bool;

    /// Drop the connection. Fails when there is none; the internal state is
    /// reset either way.
    async fn close(&self) -> Result<(), TransportError>;

    /// Fire-and-forget publish, no confirmation
    async fn publish(
        &self,
        kind: ExchangeKind,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> Result<(), TransportError>;

    /// Stream deliveries for `binding` into `deliveries` until `stop` fires or
    /// the delivery stream closes. Blocks for its whole lifetime, run it on a
    /// dedicated task.
    async fn subscribe(
        &self,
        binding: Binding,
        deliveries: mpsc::Sender<Vec<u8>>,
        stop: StopListener,
    ) -> Result<(), TransportError>;

    /// Resolves when the current connection is lost without `close()` being
    /// called. Never resolves while disconnected.
    async fn closed(&self);
}
