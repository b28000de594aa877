//! Helpers for writing extension checks
//!
//! Status helpers prefix the message the way check plugins traditionally do,
//! and [`Metric`] renders graphite-style lines.

use super::{ExitStatus, ExtensionCheckResult};

pub fn ok<S: AsRef<str>>(message: S) -> ExtensionCheckResult {
    ExtensionCheckResult::new(ExitStatus::SUCCESS, format!("OK: {}", message.as_ref()))
}

pub fn warning<S: AsRef<str>>(message: S) -> ExtensionCheckResult {
    ExtensionCheckResult::new(ExitStatus::WARNING, format!("WARNING: {}", message.as_ref()))
}

pub fn error<S: AsRef<str>>(message: S) -> ExtensionCheckResult {
    ExtensionCheckResult::new(ExitStatus::ERROR, format!("ERROR: {}", message.as_ref()))
}

/// A single metric sample
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub name: String,
    pub value: f64,
}

impl Point {
    pub fn new<S: Into<String>>(name: S, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// `<name> <value> <timestamp>`
    pub fn render(&self, timestamp: i64) -> String {
        format!("{} {:.6} {}", self.name, self.value, timestamp)
    }
}

/// A batch of points reported as one check output
#[derive(Debug, Clone, Default)]
pub struct Metric {
    points: Vec<Point>,
}

impl Metric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_point(&mut self, point: Point) -> &mut Self {
        self.points.push(point);
        self
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn render(&self) -> ExtensionCheckResult {
        self.render_at(chrono::Utc::now().timestamp())
    }

    pub fn render_at(&self, timestamp: i64) -> ExtensionCheckResult {
        let output = self
            .points
            .iter()
            .map(|point| point.render(timestamp))
            .collect::<Vec<_>>()
            .join("\n");

        ExtensionCheckResult::new(ExitStatus::SUCCESS, output)
    }
}
