//! Client orchestrator
//!
//! Owns the transport and the processors of the current connection epoch:
//!
//! ```text
//! Disconnected -> Connecting -> Running -> Disconnected (bus lost, loop)
//!                                      \-> Closing (shutdown, terminal)
//! ```
//!
//! Processors are rebuilt on every reconnect. Stopping them is
//! fire-and-forget: the client never waits for them to drain.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::check::CheckRegistry;
use crate::config::Settings;
use crate::error::TransportError;
use crate::executor::CheckExecutor;
use crate::processor::{KeepAlive, Processor, ProcessorContext, Standalone, Subscriber};
use crate::transport::Transport;

/// Lifecycle of the client, observable through [`Client::state`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Running,
    Closing,
}

pub struct Client {
    transport: Arc<dyn Transport>,
    settings: Arc<Settings>,
    executor: CheckExecutor,
    state: watch::Sender<ClientState>,
}

impl Client {
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: Arc<Settings>,
        registry: Arc<CheckRegistry>,
    ) -> Self {
        let (state, _) = watch::channel(ClientState::Disconnected);
        Self {
            transport,
            settings,
            executor: CheckExecutor::new(registry),
            state,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn state(&self) -> watch::Receiver<ClientState> {
        self.state.subscribe()
    }

    /// One keepalive, one subscriber per subscription, one standalone per
    /// standalone check
    pub fn build_processors(&self) -> Vec<Processor> {
        let ctx = ProcessorContext::new(
            self.transport.clone(),
            self.settings.clone(),
            self.executor.clone(),
        );

        let mut processors = vec![Processor::from(KeepAlive::new(ctx.clone()))];
        processors.extend(
            self.settings
                .identity
                .subscriptions()
                .iter()
                .map(|subscription| Subscriber::new(ctx.clone(), subscription.as_str()).into()),
        );
        processors.extend(
            self.settings
                .standalone_checks()
                .map(|check| Standalone::new(ctx.clone(), check.clone()).into()),
        );
        processors
    }

    /// Run until `shutdown` resolves, reconnecting whenever the bus is lost.
    ///
    /// Returns the result of the final `close()`, except when the bus was
    /// never reached, which is not an error.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), TransportError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            self.set_state(ClientState::Connecting);
            loop {
                if let Err(e) = self.transport.connect().await {
                    debug!(error = %e, "Connect attempt failed");
                }
                if self.transport.is_connected() {
                    break;
                }

                self.set_state(ClientState::Disconnected);
                warn!(
                    retry_in = ?self.settings.reconnect_interval,
                    "Bus unreachable, waiting before reconnecting"
                );
                tokio::select! {
                    biased;
                    _ = &mut shutdown => return self.shutdown(&[]).await,
                    _ = tokio::time::sleep(self.settings.reconnect_interval) => {}
                }
                self.set_state(ClientState::Connecting);
            }

            let processors = self.spawn_processors();
            self.set_state(ClientState::Running);
            info!(processors = processors.len(), "Client running");

            tokio::select! {
                biased;
                _ = &mut shutdown => return self.shutdown(&processors).await,
                _ = self.transport.closed() => {
                    warn!("Bus connection lost, reconnecting");
                    stop_all(&processors);
                    if let Err(e) = self.transport.close().await {
                        debug!(error = %e, "Close after connection loss failed");
                    }
                    self.set_state(ClientState::Disconnected);
                }
            }
        }
    }

    fn spawn_processors(&self) -> Vec<Arc<Processor>> {
        self.build_processors()
            .into_iter()
            .map(|processor| {
                let processor = Arc::new(processor);
                let task = processor.clone();
                tokio::spawn(async move {
                    if let Err(e) = task.start().await {
                        error!(processor = %task.describe(), error = ?e, "Processor failed");
                    }
                });
                processor
            })
            .collect()
    }

    async fn shutdown(&self, processors: &[Arc<Processor>]) -> Result<(), TransportError> {
        info!("Shutting down client");
        self.set_state(ClientState::Closing);
        stop_all(processors);

        let connected = self.transport.is_connected();
        match self.transport.close().await {
            Err(e) if !connected => {
                debug!(error = %e, "Nothing to close");
                Ok(())
            }
            result => result,
        }
    }

    fn set_state(&self, state: ClientState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!(from = ?current, to = ?state, "Client state changed");
            *current = state;
            true
        });
    }
}

fn stop_all(processors: &[Arc<Processor>]) {
    for processor in processors {
        processor.close();
    }
}
