//! Sensu Agent - monitoring agent runtime
//!
//! Keeps a connection to the message bus, announces itself on a schedule,
//! runs checks requested over its subscriptions or on local timers, and
//! publishes the results back onto the bus.
//!
//! ```no_run
//! use std::sync::Arc;
//! use sensu_agent::{handler, AgentConfig, CheckRegistry, Client, MqttTransport};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let settings = Arc::new(AgentConfig::load()?.resolve()?);
//! let mut registry = CheckRegistry::new();
//! registry.register("heartbeat", || handler::ok("alive"));
//!
//! let transport = Arc::new(MqttTransport::new(
//!     settings.endpoints.clone(),
//!     settings.identity.name(),
//! ));
//! let client = Client::new(transport, settings, Arc::new(registry));
//! client.start(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! # Ok(())
//! # }
//! ```

pub mod check;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod processor;
pub mod signal;
pub mod transport;

pub use check::{
    handler, CheckDefinition, CheckOutput, CheckRegistry, CheckRequest, CheckResponse,
    ExitStatus, ExtensionCheck, ExtensionCheckResult,
};
pub use client::{Client, ClientState};
pub use config::{AgentConfig, ClientIdentity, Settings};
pub use error::{CheckError, ConfigError, TransportError};
pub use executor::CheckExecutor;
pub use processor::{Processor, ProcessorContext};
pub use signal::{StopListener, StopSignal};
pub use transport::{Binding, ExchangeKind, MqttTransport, Transport, TransportEndpoint};
