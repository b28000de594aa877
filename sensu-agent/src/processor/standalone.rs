//! Locally scheduled check

use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::{schedule_period, ProcessorContext};
use crate::check::{CheckDefinition, CheckRequest};
use crate::signal::StopSignal;

pub struct Standalone {
    ctx: ProcessorContext,
    check: CheckDefinition,
    period: Duration,
    stop: StopSignal,
}

impl Standalone {
    /// The check runs every `check.interval` seconds, or at the keepalive
    /// interval when unset. First run is one period after start.
    pub fn new(ctx: ProcessorContext, check: CheckDefinition) -> Self {
        let requested = match check.interval {
            0 => ctx.settings.keepalive_interval,
            secs => Duration::from_secs(secs),
        };
        let period = schedule_period(requested, &check.name);

        Self {
            ctx,
            check,
            period,
            stop: StopSignal::new(),
        }
    }

    pub fn check(&self) -> &CheckDefinition {
        &self.check
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        let mut stop = self.stop.listener();
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(check = %self.check.name, interval = ?self.period, "Standalone check scheduled");
        loop {
            tokio::select! {
                biased;
                _ = stop.stopped() => break,
                _ = ticker.tick() => {
                    let request = CheckRequest::issued_now(self.check.clone());
                    self.ctx.run_check(request).await;
                }
            }
        }

        debug!(check = %self.check.name, "Standalone check stopped");
        Ok(())
    }

    pub fn close(&self) {
        self.stop.fire();
    }
}
