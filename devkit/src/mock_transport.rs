/*!
In-memory transport for tests without a broker

Records every publish and subscription, lets tests push deliveries into
active subscriptions, and simulates connection failures and losses.
*/

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use sensu_agent::signal::StopListener;
use sensu_agent::transport::{publish_topic, Binding, ExchangeKind, Transport};
use sensu_agent::TransportError;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, watch};

/// A message handed to `publish`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub kind: ExchangeKind,
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    pub fn json<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

struct Route {
    id: u64,
    binding: Binding,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

struct MockState {
    open: bool,
    alive: bool,
    closing: watch::Sender<bool>,
    published: Vec<PublishedMessage>,
    subscriptions: Vec<Binding>,
    routes: Vec<Route>,
    failing_connects: usize,
    connect_calls: usize,
    close_calls: usize,
}

/// Mock transport, cheap to clone; clones share state
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    next_route: Arc<AtomicU64>,
}

impl MockTransport {
    pub fn new() -> Self {
        let (closing, _) = watch::channel(false);
        Self {
            state: Arc::new(Mutex::new(MockState {
                open: false,
                alive: false,
                closing,
                published: Vec::new(),
                subscriptions: Vec::new(),
                routes: Vec::new(),
                failing_connects: 0,
                connect_calls: 0,
                close_calls: 0,
            })),
            next_route: Arc::new(AtomicU64::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `count` connect attempts fail
    pub fn fail_next_connects(&self, count: usize) -> &Self {
        self.lock().failing_connects = count;
        self
    }

    /// Deliver `payload` to every active subscription on `exchange`.
    /// Returns the number of subscriptions reached.
    pub fn simulate_incoming<S, V>(&self, exchange: S, payload: V) -> usize
    where
        S: AsRef<str>,
        V: Into<Vec<u8>>,
    {
        let exchange = exchange.as_ref();
        let payload = payload.into();
        let delivered = self
            .lock()
            .routes
            .iter()
            .filter(|route| route.binding.exchange == exchange)
            .filter(|route| route.tx.send(payload.clone()).is_ok())
            .count();

        log::info!("[MOCK] Delivered to {} subscription(s) on {}", delivered, exchange);
        delivered
    }

    /// Lose the connection as the broker would: delivery streams close and
    /// the closing signal fires
    pub fn simulate_disconnect(&self) {
        let mut state = self.lock();
        state.alive = false;
        state.routes.clear();
        state.closing.send_replace(true);
        log::info!("[MOCK] Connection lost");
    }

    /// Close every delivery stream without losing the connection
    pub fn simulate_stream_close(&self) {
        self.lock().routes.clear();
        log::info!("[MOCK] Delivery streams closed");
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    pub fn published_to(&self, exchange: &str) -> Vec<PublishedMessage> {
        self.lock()
            .published
            .iter()
            .filter(|message| message.exchange == exchange)
            .cloned()
            .collect()
    }

    /// Every binding ever subscribed, in order
    pub fn subscriptions(&self) -> Vec<Binding> {
        self.lock().subscriptions.clone()
    }

    /// Subscriptions currently consuming `exchange`
    pub fn active_subscriptions(&self, exchange: &str) -> usize {
        self.lock()
            .routes
            .iter()
            .filter(|route| route.binding.exchange == exchange)
            .count()
    }

    pub fn connect_calls(&self) -> usize {
        self.lock().connect_calls
    }

    pub fn close_calls(&self) -> usize {
        self.lock().close_calls
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.published.clear();
        state.subscriptions.clear();
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.connect_calls += 1;

        if state.open && state.alive {
            return Ok(());
        }
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(TransportError::AllEndpointsFailed {
                attempts: 1,
                source: Box::new(TransportError::ConnectTimeout("mock".to_string())),
            });
        }

        let (closing, _) = watch::channel(false);
        state.closing = closing;
        state.open = true;
        state.alive = true;
        log::info!("[MOCK] Connected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        let state = self.lock();
        state.open && state.alive
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.close_calls += 1;

        let was_open = state.open;
        state.open = false;
        state.alive = false;
        state.routes.clear();

        if was_open {
            log::info!("[MOCK] Closed");
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    async fn publish(
        &self,
        kind: ExchangeKind,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        publish_topic(kind, exchange, routing_key)?;

        let mut state = self.lock();
        if !(state.open && state.alive) {
            return Err(TransportError::NotConnected);
        }

        log::info!("[MOCK] Published to {}: {} bytes", exchange, payload.len());
        state.published.push(PublishedMessage {
            kind,
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(
        &self,
        binding: Binding,
        deliveries: mpsc::Sender<Vec<u8>>,
        mut stop: StopListener,
    ) -> Result<(), TransportError> {
        if stop.is_stopped() {
            return Ok(());
        }
        binding.filter()?;

        let id = self.next_route.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let mut state = self.lock();
            if !(state.open && state.alive) {
                return Err(TransportError::NotConnected);
            }
            state.subscriptions.push(binding.clone());
            state.routes.push(Route {
                id,
                binding: binding.clone(),
                tx,
            });
        }
        log::info!("[MOCK] Subscribed {} to {}", binding.queue, binding.exchange);

        loop {
            tokio::select! {
                delivery = rx.recv() => match delivery {
                    Some(payload) => {
                        if deliveries.send(payload).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = stop.stopped() => break,
            }
        }

        self.lock().routes.retain(|route| route.id != id);
        Ok(())
    }

    async fn closed(&self) {
        let closing = {
            let state = self.lock();
            (state.open && state.alive).then(|| state.closing.subscribe())
        };

        match closing {
            Some(mut closing) => {
                let _ = closing.wait_for(|closed| *closed).await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensu_agent::signal::StopSignal;
    use sensu_agent::transport::MATCH_ALL;
    use std::time::Duration;

    fn binding(exchange: &str) -> Binding {
        Binding {
            exchange_kind: ExchangeKind::Fanout,
            exchange: exchange.to_string(),
            queue: "test_client-0.1.0-1".to_string(),
            routing_key: MATCH_ALL.to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let transport = MockTransport::new();

        let result = transport
            .publish(ExchangeKind::Direct, "results", "", b"{}".to_vec())
            .await;
        assert!(matches!(result, Err(TransportError::NotConnected)));

        transport.connect().await.unwrap();
        transport
            .publish(ExchangeKind::Direct, "results", "", b"{}".to_vec())
            .await
            .unwrap();

        let published = transport.published_to("results");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].kind, ExchangeKind::Direct);
        assert_eq!(published[0].routing_key, "");
    }

    #[tokio::test]
    async fn test_failing_connects() {
        let transport = MockTransport::new();
        transport.fail_next_connects(2);

        assert!(transport.connect().await.is_err());
        assert!(transport.connect().await.is_err());
        assert!(transport.connect().await.is_ok());
        assert!(transport.is_connected());
        assert_eq!(transport.connect_calls(), 3);
    }

    #[tokio::test]
    async fn test_close_fails_when_not_connected() {
        let transport = MockTransport::new();
        assert!(matches!(transport.close().await, Err(TransportError::NotConnected)));

        transport.connect().await.unwrap();
        transport.simulate_disconnect();
        assert!(!transport.is_connected());
        assert!(transport.close().await.is_ok());
        assert_eq!(transport.close_calls(), 2);
    }

    #[tokio::test]
    async fn test_deliveries_until_stopped() {
        let transport = MockTransport::new();
        transport.connect().await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let stop = StopSignal::new();
        let task = {
            let transport = transport.clone();
            let listener = stop.listener();
            tokio::spawn(async move { transport.subscribe(binding("linux"), tx, listener).await })
        };

        while transport.active_subscriptions("linux") == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(transport.simulate_incoming("linux", b"hello".to_vec()), 1);
        assert_eq!(transport.simulate_incoming("windows", b"nope".to_vec()), 0);
        assert_eq!(rx.recv().await.unwrap(), b"hello");

        stop.fire();
        task.await.unwrap().unwrap();
        assert_eq!(transport.active_subscriptions("linux"), 0);
    }

    #[tokio::test]
    async fn test_closed_fires_on_disconnect() {
        let transport = MockTransport::new();
        transport.connect().await.unwrap();

        let waiter = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.closed().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.simulate_disconnect();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("closed() should resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn test_closed_pending_while_disconnected() {
        let transport = MockTransport::new();
        let result = tokio::time::timeout(Duration::from_millis(50), transport.closed()).await;
        assert!(result.is_err());
    }
}
