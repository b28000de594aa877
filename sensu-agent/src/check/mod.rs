//! Check data model
//!
//! A check is either a shell command or an in-process extension function.
//! Requests arrive from the bus (or from a local ticker), are turned into a
//! [`CheckOutput`] by the executor, and leave wrapped in a [`CheckResponse`].
//!
//! Wire shapes:
//! - request: `{"name"?, "command"?, "extension"?, "interval"?, "standalone"?, "issued"}`
//! - response: `{"check": {"status", "output", "duration", "executed", ...request}, "client"}`

pub mod extension;
pub mod external;
pub mod handler;
pub mod registry;
pub mod standard;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use registry::{CheckRegistry, ExtensionCheck};

/// Exit status of a check.
///
/// The three named values are conventions only: any integer reported by an
/// external process is carried verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExitStatus(pub i32);

impl ExitStatus {
    pub const SUCCESS: ExitStatus = ExitStatus(0);
    pub const WARNING: ExitStatus = ExitStatus(1);
    pub const ERROR: ExitStatus = ExitStatus(2);

    pub fn code(self) -> i32 {
        self.0
    }
}

impl From<i32> for ExitStatus {
    fn from(code: i32) -> Self {
        ExitStatus(code)
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ExitStatus::SUCCESS => write!(f, "success"),
            ExitStatus::WARNING => write!(f, "warning"),
            ExitStatus::ERROR => write!(f, "error"),
            ExitStatus(code) => write!(f, "exit {}", code),
        }
    }
}

/// Static description of a check, from config or from the bus
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckDefinition {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Shell command line run through `/bin/sh -c`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    /// Name of a registered in-process check, takes priority over `name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    /// Seconds between standalone runs, 0 means the default interval
    #[serde(default, skip_serializing_if = "is_zero")]
    pub interval: u64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub standalone: bool,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

impl CheckDefinition {
    pub fn command<N: Into<String>, C: Into<String>>(name: N, command: C) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn extension<N: Into<String>, E: Into<String>>(name: N, extension: E) -> Self {
        Self {
            name: name.into(),
            extension: Some(extension.into()),
            ..Self::default()
        }
    }
}

/// A single request to run a check
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckRequest {
    #[serde(flatten)]
    pub check: CheckDefinition,
    /// Unix timestamp at which the request was issued
    #[serde(default)]
    pub issued: i64,
}

impl CheckRequest {
    pub fn new(check: CheckDefinition, issued: i64) -> Self {
        Self { check, issued }
    }

    /// Request issued right now, as the standalone ticker does
    pub fn issued_now(check: CheckDefinition) -> Self {
        Self::new(check, chrono::Utc::now().timestamp())
    }
}

/// Normalized result of one check execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutput {
    pub status: ExitStatus,
    pub output: String,
    /// Wall-clock seconds spent executing
    pub duration: f64,
    /// Unix timestamp at which execution started
    pub executed: i64,
    /// Originating request, echoed into the published result
    #[serde(flatten)]
    pub request: CheckRequest,
}

/// Envelope published on the results exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResponse {
    pub check: CheckOutput,
    pub client: String,
}

/// What an in-process check returns; timing is added by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionCheckResult {
    pub status: ExitStatus,
    pub output: String,
}

impl ExtensionCheckResult {
    pub fn new<S: Into<String>>(status: ExitStatus, output: S) -> Self {
        Self {
            status,
            output: output.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_from_bus_payload() {
        let payload = r#"{"name":"disk","command":"check-disk -w 80","issued":1700000000,"handlers":["default"]}"#;
        let request: CheckRequest = serde_json::from_str(payload).unwrap();

        assert_eq!(request.check.name, "disk");
        assert_eq!(request.check.command, "check-disk -w 80");
        assert_eq!(request.check.extension, None);
        assert!(!request.check.standalone);
        assert_eq!(request.issued, 1_700_000_000);
    }

    #[test]
    fn test_empty_request_is_valid_json() {
        let request: CheckRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request, CheckRequest::default());
    }

    #[test]
    fn test_response_echoes_request_fields() {
        let response = CheckResponse {
            check: CheckOutput {
                status: ExitStatus(3),
                output: "UNKNOWN".into(),
                duration: 0.25,
                executed: 1_700_000_001,
                request: CheckRequest::new(CheckDefinition::command("load", "uptime"), 1_700_000_000),
            },
            client: "web-1".into(),
        };

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["client"], "web-1");
        assert_eq!(value["check"]["status"], 3);
        assert_eq!(value["check"]["output"], "UNKNOWN");
        assert_eq!(value["check"]["name"], "load");
        assert_eq!(value["check"]["command"], "uptime");
        assert_eq!(value["check"]["issued"], 1_700_000_000);
        assert!(value["check"].get("extension").is_none());
        assert!(value["check"].get("standalone").is_none());

        let parsed: CheckResponse = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.client, "web-1");
        assert_eq!(parsed.check.status, ExitStatus(3));
        assert_eq!(parsed.check.output, "UNKNOWN");
        assert!((parsed.check.duration - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_exit_status_display() {
        assert_eq!(ExitStatus::SUCCESS.to_string(), "success");
        assert_eq!(ExitStatus(127).to_string(), "exit 127");
    }
}
