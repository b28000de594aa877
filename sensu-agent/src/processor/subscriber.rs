//! Bus-driven check execution for one subscription

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::ProcessorContext;
use crate::check::CheckRequest;
use crate::config::AGENT_VERSION;
use crate::signal::{StopListener, StopSignal};
use crate::transport::{Binding, ExchangeKind, Transport, MATCH_ALL};

const DELIVERY_BUFFER: usize = 32;
const RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(1);

/// Queue name of a subscriber started at `started` (unix seconds)
pub fn funnel_name(client: &str, version: &str, started: i64) -> String {
    format!("{}-{}-{}", client, version, started)
}

pub struct Subscriber {
    ctx: ProcessorContext,
    subscription: String,
    exchange_kind: ExchangeKind,
    funnel: String,
    stop: StopSignal,
}

impl Subscriber {
    pub fn new<S: Into<String>>(ctx: ProcessorContext, subscription: S) -> Self {
        Self::started_at(ctx, subscription, chrono::Utc::now().timestamp())
    }

    pub fn started_at<S: Into<String>>(ctx: ProcessorContext, subscription: S, started: i64) -> Self {
        let subscription = subscription.into();
        let exchange_kind = ctx.settings.exchange_kind_for(&subscription);
        let funnel = funnel_name(ctx.settings.identity.name(), AGENT_VERSION, started);

        Self {
            ctx,
            subscription,
            exchange_kind,
            funnel,
            stop: StopSignal::new(),
        }
    }

    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    pub fn funnel(&self) -> &str {
        &self.funnel
    }

    pub fn binding(&self) -> Binding {
        Binding {
            exchange_kind: self.exchange_kind,
            exchange: self.subscription.clone(),
            queue: self.funnel.clone(),
            routing_key: MATCH_ALL.to_string(),
        }
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::channel(DELIVERY_BUFFER);
        let consumer = tokio::spawn(consume(
            self.ctx.transport.clone(),
            self.binding(),
            tx,
            self.stop.listener(),
        ));

        let mut stop = self.stop.listener();
        info!(subscription = %self.subscription, funnel = %self.funnel, "Subscriber started");
        loop {
            tokio::select! {
                biased;
                _ = stop.stopped() => break,
                delivery = rx.recv() => match delivery {
                    Some(body) => self.handle(&body).await,
                    None => break,
                },
            }
        }
        drop(rx);

        consumer
            .await
            .with_context(|| format!("subscription task for `{}` failed", self.subscription))?;
        debug!(subscription = %self.subscription, "Subscriber stopped");
        Ok(())
    }

    pub fn close(&self) {
        self.stop.fire();
    }

    async fn handle(&self, body: &[u8]) {
        let request: CheckRequest = match serde_json::from_slice(body) {
            Ok(request) => request,
            Err(e) => {
                warn!(subscription = %self.subscription, error = %e, "Dropping malformed check request");
                return;
            }
        };

        debug!(subscription = %self.subscription, check = %request.check.name, "Check requested");
        self.ctx.run_check(request).await;
    }
}

/// Keep a subscription open until stopped. A closed delivery stream is
/// reopened right away; a failed subscribe is retried after a pause.
async fn consume(
    transport: Arc<dyn Transport>,
    binding: Binding,
    deliveries: mpsc::Sender<Vec<u8>>,
    mut stop: StopListener,
) {
    while !stop.is_stopped() && !deliveries.is_closed() {
        match transport
            .subscribe(binding.clone(), deliveries.clone(), stop.clone())
            .await
        {
            Ok(()) => debug!(queue = %binding.queue, "Subscription ended"),
            Err(e) => {
                warn!(exchange = %binding.exchange, error = %e, "Subscribe failed, retrying");
                tokio::select! {
                    _ = stop.stopped() => break,
                    _ = tokio::time::sleep(RESUBSCRIBE_BACKOFF) => {}
                }
            }
        }
    }
}
