/*!
Test harness for the agent

Wires a [`MockTransport`], a check registry and settings together, and
polls the transport for expected publishes.
*/

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sensu_agent::check::ExtensionCheck;
use sensu_agent::transport::ExchangeKind;
use sensu_agent::{
    CheckDefinition, CheckExecutor, CheckRegistry, Client, ClientIdentity, ProcessorContext,
    Settings,
};
use tokio::time::Instant;

use crate::mock_transport::{MockTransport, PublishedMessage};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub struct TestHarness {
    pub transport: MockTransport,
    pub registry: CheckRegistry,
    settings: Settings,
}

impl TestHarness {
    pub fn new<N, I, S>(client_name: N, subscriptions: I) -> Result<Self>
    where
        N: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        env_logger::builder().is_test(true).try_init().ok();

        let identity = ClientIdentity::new(client_name, "127.0.0.1", subscriptions)?;
        Ok(Self {
            transport: MockTransport::new(),
            registry: CheckRegistry::new(),
            settings: Settings::new(identity),
        })
    }

    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.settings.keepalive_interval = interval;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.settings.reconnect_interval = interval;
        self
    }

    pub fn with_check(mut self, check: CheckDefinition) -> Self {
        self.settings.checks.push(check);
        self
    }

    pub fn with_exchange_kind<S: Into<String>>(mut self, subscription: S, kind: ExchangeKind) -> Self {
        self.settings.exchange_kinds.insert(subscription.into(), kind);
        self
    }

    pub fn register<N, C>(&mut self, name: N, check: C) -> &mut Self
    where
        N: Into<String>,
        C: ExtensionCheck + 'static,
    {
        self.registry.register(name, check);
        self
    }

    pub fn settings(&self) -> Arc<Settings> {
        Arc::new(self.settings.clone())
    }

    /// Context for driving a single processor by hand
    pub fn context(&self) -> ProcessorContext {
        ProcessorContext::new(
            Arc::new(self.transport.clone()),
            self.settings(),
            CheckExecutor::new(Arc::new(self.registry.clone())),
        )
    }

    pub fn client(&self) -> Client {
        Client::new(
            Arc::new(self.transport.clone()),
            self.settings(),
            Arc::new(self.registry.clone()),
        )
    }

    /// Wait until at least `count` messages were published to `exchange`
    pub async fn wait_for_messages(
        &self,
        exchange: &str,
        count: usize,
        timeout: Duration,
    ) -> Result<Vec<PublishedMessage>> {
        let deadline = Instant::now() + timeout;
        loop {
            let messages = self.transport.published_to(exchange);
            if messages.len() >= count {
                log::info!("Got {} message(s) on {}", messages.len(), exchange);
                return Ok(messages);
            }
            if Instant::now() >= deadline {
                anyhow::bail!(
                    "expected {} message(s) on '{}' within {:?}, got {}",
                    count,
                    exchange,
                    timeout,
                    messages.len()
                );
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Wait until something consumes `exchange`
    pub async fn wait_for_subscription(&self, exchange: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while self.transport.active_subscriptions(exchange) == 0 {
            if Instant::now() >= deadline {
                anyhow::bail!("no subscription on '{}' within {:?}", exchange, timeout);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        Ok(())
    }

    /// Give the agent `window` to publish, then check nothing reached `exchange`
    pub async fn assert_silent(&self, exchange: &str, window: Duration) -> Result<()> {
        tokio::time::sleep(window).await;
        let messages = self.transport.published_to(exchange);
        if !messages.is_empty() {
            anyhow::bail!("expected no message on '{}', got {}", exchange, messages.len());
        }
        Ok(())
    }
}
