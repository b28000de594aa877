//! Threshold-based extension checks
//!
//! A [`StandardCheck`] computes a value and grades it against a warning and an
//! error threshold. The same definition can also be reported as a metric.

use std::fmt;
use std::sync::Arc;

use super::handler::{self, Metric, Point};
use super::registry::ExtensionCheck;
use super::ExtensionCheckResult;

type ValueFn = Arc<dyn Fn() -> anyhow::Result<f64> + Send + Sync>;
type MessageFn = Arc<dyn Fn(f64) -> String + Send + Sync>;
type CompareFn = Arc<dyn Fn(f64, f64) -> bool + Send + Sync>;

/// Read a numeric threshold from the environment, falling back to `default`
/// when the variable is unset or not a number.
pub fn env_value_or(var: &str, default: f64) -> f64 {
    std::env::var(var)
        .ok()
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .unwrap_or(default)
}

/// `compare(threshold, value)` helpers
pub fn above(threshold: f64, value: f64) -> bool {
    threshold < value
}

pub fn below(threshold: f64, value: f64) -> bool {
    threshold > value
}

#[derive(Clone)]
pub struct StandardCheck {
    /// Value at which the check turns to error
    pub error_threshold: f64,
    /// Value at which the check turns to warning
    pub warning_threshold: f64,
    /// Name used when reported as a metric
    pub metric_name: String,
    value: ValueFn,
    message: MessageFn,
    compare: CompareFn,
}

impl StandardCheck {
    pub fn new<N, V, M, C>(
        metric_name: N,
        error_threshold: f64,
        warning_threshold: f64,
        value: V,
        message: M,
        compare: C,
    ) -> Self
    where
        N: Into<String>,
        V: Fn() -> anyhow::Result<f64> + Send + Sync + 'static,
        M: Fn(f64) -> String + Send + Sync + 'static,
        C: Fn(f64, f64) -> bool + Send + Sync + 'static,
    {
        Self {
            error_threshold,
            warning_threshold,
            metric_name: metric_name.into(),
            value: Arc::new(value),
            message: Arc::new(message),
            compare: Arc::new(compare),
        }
    }

    pub fn check(&self) -> ExtensionCheckResult {
        let value = match (self.value)() {
            Ok(value) => value,
            Err(e) => return handler::error(e.to_string()),
        };

        if (self.compare)(self.error_threshold, value) {
            handler::error((self.message)(value))
        } else if (self.compare)(self.warning_threshold, value) {
            handler::warning((self.message)(value))
        } else {
            handler::ok((self.message)(value))
        }
    }

    pub fn metric(&self) -> ExtensionCheckResult {
        let mut metric = Metric::new();
        if let Ok(value) = (self.value)() {
            metric.add_point(Point::new(self.metric_name.clone(), value));
        }
        metric.render()
    }

    /// Same definition registered as a metric producer
    pub fn into_metric(self) -> MetricCheck {
        MetricCheck(self)
    }
}

impl ExtensionCheck for StandardCheck {
    fn run(&self) -> ExtensionCheckResult {
        self.check()
    }
}

impl fmt::Debug for StandardCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StandardCheck")
            .field("metric_name", &self.metric_name)
            .field("error_threshold", &self.error_threshold)
            .field("warning_threshold", &self.warning_threshold)
            .finish_non_exhaustive()
    }
}

/// A [`StandardCheck`] reporting its raw value instead of a grade
#[derive(Debug, Clone)]
pub struct MetricCheck(pub StandardCheck);

impl ExtensionCheck for MetricCheck {
    fn run(&self) -> ExtensionCheckResult {
        self.0.metric()
    }
}
