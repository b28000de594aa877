//! Liveness announcement
//!
//! Publishes `{"timestamp", "version", "name", "address", "subscriptions"}`
//! to the `keepalives` exchange, right away and then every interval.

use std::time::Duration;

use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{schedule_period, ProcessorContext};
use crate::config::{ClientIdentity, AGENT_VERSION};
use crate::signal::StopSignal;
use crate::transport::{ExchangeKind, KEEPALIVES_EXCHANGE};

#[derive(Debug, Serialize)]
pub struct KeepAlivePayload<'a> {
    pub timestamp: i64,
    pub version: &'static str,
    #[serde(flatten)]
    pub identity: &'a ClientIdentity,
}

impl<'a> KeepAlivePayload<'a> {
    pub fn now(identity: &'a ClientIdentity) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp(),
            version: AGENT_VERSION,
            identity,
        }
    }
}

pub struct KeepAlive {
    ctx: ProcessorContext,
    period: Duration,
    stop: StopSignal,
}

impl KeepAlive {
    pub fn new(ctx: ProcessorContext) -> Self {
        let period = schedule_period(ctx.settings.keepalive_interval, "keepalive");

        Self {
            ctx,
            period,
            stop: StopSignal::new(),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        let mut stop = self.stop.listener();
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval = ?self.period, "Keepalive started");
        loop {
            tokio::select! {
                biased;
                _ = stop.stopped() => break,
                _ = ticker.tick() => self.announce().await,
            }
        }

        debug!("Keepalive stopped");
        Ok(())
    }

    pub fn close(&self) {
        self.stop.fire();
    }

    async fn announce(&self) {
        let payload = KeepAlivePayload::now(&self.ctx.settings.identity);
        let payload = match serde_json::to_vec(&payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to serialize keepalive");
                return;
            }
        };

        match self
            .ctx
            .transport
            .publish(ExchangeKind::Direct, KEEPALIVES_EXCHANGE, "", payload)
            .await
        {
            Ok(()) => debug!("Keepalive sent"),
            Err(e) => warn!(error = %e, "Failed to publish keepalive"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let identity = ClientIdentity::new("test_client", "10.0.0.42", ["email"]).unwrap();
        let value = serde_json::to_value(KeepAlivePayload::now(&identity)).unwrap();

        assert_eq!(value["name"], "test_client");
        assert_eq!(value["address"], "10.0.0.42");
        assert_eq!(value["version"], AGENT_VERSION);
        assert!(value["timestamp"].as_i64().unwrap() > 0);
        assert_eq!(value["subscriptions"].as_array().unwrap().len(), 2);
    }
}
