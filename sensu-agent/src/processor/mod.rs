//! Processors: the concurrent units of work of a connection epoch
//!
//! - [`KeepAlive`]: periodic liveness announcement
//! - [`Subscriber`]: runs checks requested on a subscription
//! - [`Standalone`]: runs one check on a local timer
//!
//! Each processor owns its stop signal. `close()` only fires it; the
//! processor notices at its next wait point and finishes any in-flight
//! check and publish before returning from `start()`.

pub mod keepalive;
pub mod standalone;
pub mod subscriber;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::check::{CheckOutput, CheckRequest, CheckResponse};
use crate::config::{Settings, DEFAULT_KEEPALIVE_INTERVAL};
use crate::executor::CheckExecutor;
use crate::transport::{ExchangeKind, Transport, RESULTS_EXCHANGE};

pub use keepalive::KeepAlive;
pub use standalone::Standalone;
pub use subscriber::Subscriber;

/// Longest timer period a processor will schedule
pub const MAX_PERIOD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Zero falls back to the keepalive default; anything past [`MAX_PERIOD`]
/// is capped so the first deadline stays representable.
pub(crate) fn schedule_period(period: Duration, name: &str) -> Duration {
    if period.is_zero() {
        DEFAULT_KEEPALIVE_INTERVAL
    } else if period > MAX_PERIOD {
        warn!(processor = name, requested = ?period, "Interval too long, capped at {:?}", MAX_PERIOD);
        MAX_PERIOD
    } else {
        period
    }
}

/// What every processor borrows from the client
#[derive(Clone)]
pub struct ProcessorContext {
    pub transport: Arc<dyn Transport>,
    pub settings: Arc<Settings>,
    pub executor: CheckExecutor,
}

impl ProcessorContext {
    pub fn new(transport: Arc<dyn Transport>, settings: Arc<Settings>, executor: CheckExecutor) -> Self {
        Self {
            transport,
            settings,
            executor,
        }
    }

    /// Execute `request` and publish its result. Nothing escapes: dispatch,
    /// serialization and publish failures are logged.
    pub async fn run_check(&self, request: CheckRequest) {
        let name = request.check.name.clone();
        match self.executor.execute(request).await {
            Ok(output) => self.publish_result(output).await,
            Err(e) => warn!(check = %name, error = %e, "Check not executed"),
        }
    }

    pub async fn publish_result(&self, output: CheckOutput) {
        let check = output.request.check.name.clone();
        let status = output.status;
        let response = CheckResponse {
            check: output,
            client: self.settings.identity.name().to_string(),
        };

        let payload = match serde_json::to_vec(&response) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(check = %check, error = %e, "Failed to serialize check result");
                return;
            }
        };

        match self
            .transport
            .publish(ExchangeKind::Direct, RESULTS_EXCHANGE, "", payload)
            .await
        {
            Ok(()) => debug!(check = %check, status = %status, "Check result published"),
            Err(e) => warn!(check = %check, error = %e, "Failed to publish check result"),
        }
    }
}

/// One unit of concurrent work, closed over the three roles
pub enum Processor {
    KeepAlive(KeepAlive),
    Subscriber(Subscriber),
    Standalone(Standalone),
}

impl Processor {
    /// Run until stopped
    pub async fn start(&self) -> anyhow::Result<()> {
        match self {
            Processor::KeepAlive(processor) => processor.start().await,
            Processor::Subscriber(processor) => processor.start().await,
            Processor::Standalone(processor) => processor.start().await,
        }
    }

    /// Ask the processor to stop. Never blocks.
    pub fn close(&self) {
        match self {
            Processor::KeepAlive(processor) => processor.close(),
            Processor::Subscriber(processor) => processor.close(),
            Processor::Standalone(processor) => processor.close(),
        }
    }

    /// Short label for logs
    pub fn describe(&self) -> String {
        match self {
            Processor::KeepAlive(_) => "keepalive".to_string(),
            Processor::Subscriber(processor) => format!("subscriber:{}", processor.subscription()),
            Processor::Standalone(processor) => format!("standalone:{}", processor.check().name),
        }
    }
}

impl From<KeepAlive> for Processor {
    fn from(processor: KeepAlive) -> Self {
        Processor::KeepAlive(processor)
    }
}

impl From<Subscriber> for Processor {
    fn from(processor: Subscriber) -> Self {
        Processor::Subscriber(processor)
    }
}

impl From<Standalone> for Processor {
    fn from(processor: Standalone) -> Self {
        Processor::Standalone(processor)
    }
}
