//! Broker-backed transport over MQTT
//!
//! Each successful `connect()` opens a session: an `AsyncClient` plus a
//! driver task polling its event loop. The driver routes inbound publishes to
//! the active subscription routes and, when the event loop fails, marks the
//! session dead, ends every subscription and fires the session's closing
//! signal.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{publish_topic, topic_matches, Binding, ExchangeKind, Transport, TransportEndpoint};
use crate::error::TransportError;
use crate::signal::StopListener;

/// Time allowed for the broker to acknowledge a connection
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
/// Time allowed for a DISCONNECT to be flushed on close
const DISCONNECT_GRACE: Duration = Duration::from_millis(500);
const REQUEST_CAPACITY: usize = 64;

struct Route {
    id: u64,
    queue: String,
    filter: String,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

type Routes = Arc<Mutex<Vec<Route>>>;

struct Session {
    client: AsyncClient,
    broker: String,
    max_packet_size: usize,
    alive: Arc<AtomicBool>,
    explicit_close: Arc<AtomicBool>,
    closing: watch::Receiver<bool>,
    routes: Routes,
    driver: JoinHandle<()>,
}

pub struct MqttTransport {
    endpoints: Vec<TransportEndpoint>,
    client_name: String,
    session: Mutex<Option<Session>>,
    next_route: AtomicU64,
}

impl MqttTransport {
    pub fn new<S: Into<String>>(endpoints: Vec<TransportEndpoint>, client_name: S) -> Self {
        Self {
            endpoints,
            client_name: client_name.into(),
            session: Mutex::new(None),
            next_route: AtomicU64::new(0),
        }
    }

    pub fn endpoints(&self) -> &[TransportEndpoint] {
        &self.endpoints
    }

    async fn open(&self, endpoint: &TransportEndpoint) -> Result<Session, TransportError> {
        let broker = endpoint.broker_address()?;
        let client_id = format!("{}-{}", self.client_name, Uuid::new_v4());

        let mut options = MqttOptions::new(client_id, broker.host.clone(), broker.port);
        options.set_keep_alive(Duration::from_secs(endpoint.heartbeat_secs()));
        options.set_clean_session(true);
        options.set_max_packet_size(endpoint.max_packet_size(), endpoint.max_packet_size());
        if let Some(username) = &broker.username {
            options.set_credentials(username.clone(), broker.password.clone().unwrap_or_default());
        }

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        match tokio::time::timeout(CONNECTION_TIMEOUT, wait_for_connack(&mut eventloop)).await {
            Err(_) => return Err(TransportError::ConnectTimeout(broker.to_string())),
            Ok(Err(e)) => return Err(e),
            Ok(Ok(())) => {}
        }

        let alive = Arc::new(AtomicBool::new(true));
        let explicit_close = Arc::new(AtomicBool::new(false));
        let routes: Routes = Arc::new(Mutex::new(Vec::new()));
        let (closing_tx, closing) = watch::channel(false);

        let driver = tokio::spawn(drive(
            eventloop,
            routes.clone(),
            alive.clone(),
            explicit_close.clone(),
            closing_tx,
            broker.to_string(),
        ));

        Ok(Session {
            client,
            broker: broker.to_string(),
            max_packet_size: endpoint.max_packet_size(),
            alive,
            explicit_close,
            closing,
            routes,
            driver,
        })
    }

    fn install(&self, session: Session) {
        let previous = self.session.lock().replace(session);
        if let Some(previous) = previous {
            previous.explicit_close.store(true, Ordering::SeqCst);
            previous.driver.abort();
        }
    }

    fn live_client(&self) -> Result<LiveClient, TransportError> {
        match self.session.lock().as_ref() {
            Some(session) if session.alive.load(Ordering::SeqCst) => Ok(LiveClient {
                client: session.client.clone(),
                routes: session.routes.clone(),
                max_packet_size: session.max_packet_size,
            }),
            _ => Err(TransportError::NotConnected),
        }
    }
}

struct LiveClient {
    client: AsyncClient,
    routes: Routes,
    max_packet_size: usize,
}

/// Encoded size of a QoS 1 PUBLISH: fixed header, topic, packet id, payload
fn publish_packet_size(topic: &str, payload: &[u8]) -> usize {
    let remaining = 2 + topic.len() + 2 + payload.len();
    let length_bytes = match remaining {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    };
    1 + length_bytes + remaining
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), TransportError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(ack)) = eventloop.poll().await? {
            return match ack.code {
                ConnectReturnCode::Success => Ok(()),
                code => Err(TransportError::Refused(format!("{:?}", code))),
            };
        }
    }
}

async fn drive(
    mut eventloop: EventLoop,
    routes: Routes,
    alive: Arc<AtomicBool>,
    explicit_close: Arc<AtomicBool>,
    closing: watch::Sender<bool>,
    broker: String,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let mut routes = routes.lock();
                routes.retain(|route| !route.tx.is_closed());
                for route in routes.iter().filter(|r| topic_matches(&r.filter, &publish.topic)) {
                    debug!(queue = %route.queue, topic = %publish.topic, "Delivery");
                    let _ = route.tx.send(publish.payload.to_vec());
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!(broker = %broker, "Broker closed the session");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if !explicit_close.load(Ordering::SeqCst) {
                    error!(broker = %broker, error = %e, "Bus connection lost");
                }
                break;
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    routes.lock().clear();
    if !explicit_close.load(Ordering::SeqCst) {
        closing.send_replace(true);
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            debug!("Already connected");
            return Ok(());
        }

        let mut order: Vec<usize> = (0..self.endpoints.len()).collect();
        order.shuffle(&mut rand::thread_rng());

        let mut first_error = None;
        for idx in order {
            let endpoint = &self.endpoints[idx];
            info!(uri = %endpoint.redacted(), "Trying to connect");

            match self.open(endpoint).await {
                Ok(session) => {
                    info!(broker = %session.broker, "Bus connection opened");
                    self.install(session);
                    return Ok(());
                }
                Err(e) => {
                    warn!(uri = %endpoint.redacted(), error = %e, "Failed to connect");
                    first_error.get_or_insert(e);
                }
            }
        }

        let error = TransportError::AllEndpointsFailed {
            attempts: self.endpoints.len(),
            source: Box::new(first_error.unwrap_or(TransportError::NotConnected)),
        };
        error!(error = %error, "Bus connection error");
        Err(error)
    }

    fn is_connected(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .map(|session| session.alive.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    async fn close(&self) -> Result<(), TransportError> {
        let session = self.session.lock().take();
        let Some(mut session) = session else {
            return Err(TransportError::NotConnected);
        };

        session.explicit_close.store(true, Ordering::SeqCst);
        if let Err(e) = session.client.disconnect().await {
            debug!(error = %e, "Disconnect request not sent");
        }
        if tokio::time::timeout(DISCONNECT_GRACE, &mut session.driver).await.is_err() {
            session.driver.abort();
        }
        session.routes.lock().clear();

        info!(broker = %session.broker, "Bus connection closed");
        Ok(())
    }

    async fn publish(
        &self,
        kind: ExchangeKind,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        let topic = publish_topic(kind, exchange, routing_key)?;
        let live = self.live_client()?;

        // the event loop treats an oversized packet as a connection failure
        let size = publish_packet_size(&topic, &payload);
        if size > live.max_packet_size {
            return Err(TransportError::PacketTooLarge {
                size,
                limit: live.max_packet_size,
            });
        }

        live.client.publish(topic, QoS::AtLeastOnce, false, payload).await?;
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

        let filter = binding.filter()?;
        let LiveClient { client, routes, .. } = self.live_client()?;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = self.next_route.fetch_add(1, Ordering::Relaxed);

        routes.lock().push(Route {
            id,
            queue: binding.queue.clone(),
            filter: filter.clone(),
            tx,
        });

        if let Err(e) = client.subscribe(filter.clone(), QoS::AtLeastOnce).await {
            error!(queue = %binding.queue, error = %e, "Can't consume the queue");
            routes.lock().retain(|route| route.id != id);
            return Err(e.into());
        }
        info!(
            queue = %binding.queue,
            exchange = %binding.exchange,
            kind = %binding.exchange_kind,
            filter = %filter,
            "Consuming the queue"
        );

        loop {
            tokio::select! {
                delivery = rx.recv() => match delivery {
                    Some(payload) => {
                        if deliveries.send(payload).await.is_err() {
                            debug!(queue = %binding.queue, "Delivery receiver dropped");
                            break;
                        }
                    }
                    None => {
                        warn!(queue = %binding.queue, "Delivery stream closed");
                        break;
                    }
                },
                _ = stop.stopped() => {
                    if let Err(e) = client.unsubscribe(filter.clone()).await {
                        debug!(queue = %binding.queue, error = %e, "Unsubscribe not sent");
                    }
                    break;
                }
            }
        }

        routes.lock().retain(|route| route.id != id);
        Ok(())
    }

    async fn closed(&self) {
        let closing = self
            .session
            .lock()
            .as_ref()
            .map(|session| session.closing.clone());

        match closing {
            Some(mut closing) => {
                let _ = closing.wait_for(|closed| *closed).await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.explicit_close.store(true, Ordering::SeqCst);
            session.driver.abort();
        }
    }
}
