//! Broker client backed by `rumqttc`.
//!
//! Each client runs two tasks once connected:
//!
//! ```text
//!             requests                     inbound publishes
//! publish() ──────────▶ event loop task ──────────────────▶ delivery task ──▶ MessageSink
//!    ▲                  (network, acks,       unbounded         (in order,
//!    └──── ack ──────── reconnects)           channel           one at a time)
//! ```
//!
//! The event loop never waits on the sink, so a sink may publish through the
//! same client and wait for the acknowledgment.

use crate::client::{BrokerClient, ClientFactory, DynClient, DynSink, InboundMessage};
use crate::error::{MqttError, Result};
use crate::options::{ClientOptions, Transport};
use crate::settings::Qos;
use crate::store::{self, DynStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Capacity of the request channel between a client and its event loop.
const REQUEST_CAPACITY: usize = 10;

/// Pause between reconnect attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Time the event loop gets to write the DISCONNECT packet on top of the
/// caller's grace period.
const DISCONNECT_FLUSH: Duration = Duration::from_millis(100);

impl From<Qos> for rumqttc::QoS {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => rumqttc::QoS::AtMostOnce,
            Qos::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            Qos::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

impl From<rumqttc::QoS> for Qos {
    fn from(qos: rumqttc::QoS) -> Self {
        match qos {
            rumqttc::QoS::AtMostOnce => Qos::AtMostOnce,
            rumqttc::QoS::AtLeastOnce => Qos::AtLeastOnce,
            rumqttc::QoS::ExactlyOnce => Qos::ExactlyOnce,
        }
    }
}

/// Build `rumqttc` options from client options.
pub fn mqtt_options(options: &ClientOptions) -> Result<MqttOptions> {
    if options.client_id.starts_with(char::is_whitespace) {
        return Err(MqttError::Config(format!(
            "Invalid client id '{}'",
            options.client_id
        )));
    }

    let mut opts = MqttOptions::new(
        options.client_id.clone(),
        options.broker.host.clone(),
        options.broker.port,
    );
    opts.set_keep_alive(options.keep_alive);
    opts.set_clean_session(options.clean_session);

    if let Some(credentials) = &options.credentials {
        opts.set_credentials(credentials.username.clone(), credentials.password.clone());
    }

    if options.broker.transport == Transport::Tls {
        opts.set_transport(rumqttc::Transport::tls_with_default_config());
    }

    Ok(opts)
}

/// Request kinds the broker acknowledges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum AckKind {
    Publish,
    Subscribe,
    Unsubscribe,
}

type AckResult = std::result::Result<(), String>;

struct Waiter {
    tx: oneshot::Sender<AckResult>,
    qos: Qos,
    record: Option<Vec<u8>>,
}

struct TrackerState {
    closed: bool,
    // Requests handed to the event loop, not yet written.
    queued: HashMap<AckKind, VecDeque<Waiter>>,
    // Requests written under a packet id, waiting for the broker.
    awaiting: HashMap<(AckKind, u16), Waiter>,
}

/// Matches broker acknowledgments to pending requests.
///
/// `rumqttc` reports the packet id of a request only once the event loop has
/// written it. Requests are queued per kind in submission order and bound to
/// their packet id when the matching outgoing event is seen.
struct AckTracker {
    state: Mutex<TrackerState>,
    store: Mutex<Option<DynStore>>,
}

impl AckTracker {
    fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState {
                closed: true,
                queued: HashMap::new(),
                awaiting: HashMap::new(),
            }),
            store: Mutex::new(None),
        }
    }

    /// Accept requests, recording in-flight publishes in `store`.
    fn open(&self, store: DynStore) {
        *self.store.lock() = Some(store);
        self.state.lock().closed = false;
    }

    /// Queue a request. `None` once the tracker is closed.
    fn enqueue(
        &self,
        kind: AckKind,
        qos: Qos,
        record: Option<Vec<u8>>,
    ) -> Option<oneshot::Receiver<AckResult>> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        state
            .queued
            .entry(kind)
            .or_default()
            .push_back(Waiter { tx, qos, record });
        Some(rx)
    }

    /// Drop the most recent request of `kind`, which never reached the event
    /// loop.
    fn withdraw_last(&self, kind: AckKind) {
        if let Some(queue) = self.state.lock().queued.get_mut(&kind) {
            queue.pop_back();
        }
    }

    fn on_sent(&self, kind: AckKind, pkid: u16) {
        let mut state = self.state.lock();
        // Replays after a reconnect keep their packet id.
        if pkid != 0 && state.awaiting.contains_key(&(kind, pkid)) {
            return;
        }

        let Some(waiter) = state.queued.get_mut(&kind).and_then(VecDeque::pop_front) else {
            return;
        };

        if kind == AckKind::Publish && waiter.qos == Qos::AtMostOnce {
            let _ = waiter.tx.send(Ok(()));
            return;
        }

        if let Some(record) = &waiter.record {
            self.with_store(|store| store.put(&store::outbound_key(pkid), record));
        }
        state.awaiting.insert((kind, pkid), waiter);
    }

    fn on_ack(&self, kind: AckKind, pkid: u16, result: AckResult) {
        let waiter = self.state.lock().awaiting.remove(&(kind, pkid));
        if kind == AckKind::Publish {
            self.with_store(|store| store.del(&store::outbound_key(pkid)));
        }
        if let Some(waiter) = waiter {
            let _ = waiter.tx.send(result);
        }
    }

    /// Fail every pending request and refuse new ones.
    fn close(&self, reason: &str) {
        let waiters: Vec<Waiter> = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.closed = true;
            let queued = state.queued.drain().flat_map(|(_, queue)| queue);
            let awaiting = state.awaiting.drain().map(|(_, waiter)| waiter);
            queued.chain(awaiting).collect()
        };
        for waiter in waiters {
            let _ = waiter.tx.send(Err(reason.to_string()));
        }
    }

    fn with_store(&self, op: impl FnOnce(&DynStore) -> std::io::Result<()>) {
        if let Some(store) = self.store.lock().as_ref() {
            if let Err(e) = op(store) {
                tracing::warn!("Message store update failed: {}", e);
            }
        }
    }

    fn release_store(&self) {
        self.store.lock().take();
    }
}

#[derive(Serialize)]
struct OutboundRecord<'a> {
    topic: &'a str,
    qos: Qos,
    retain: bool,
    payload: &'a [u8],
}

struct Inner {
    options: ClientOptions,
    client: AsyncClient,
    event_loop: Mutex<Option<EventLoop>>,
    sink: Option<DynSink>,
    tracker: AckTracker,
    // Held while a request is queued and handed to the event loop.
    gate: tokio::sync::Mutex<()>,
    connected: AtomicBool,
    closing: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Broker client on top of `rumqttc::AsyncClient`.
///
/// A client connects once. After [`BrokerClient::disconnect`] every request
/// fails with [`MqttError::NotConnected`].
#[derive(Clone)]
pub struct RumqttcClient {
    inner: Arc<Inner>,
}

impl RumqttcClient {
    /// Create a disconnected client.
    pub fn new(options: &ClientOptions, sink: Option<DynSink>) -> Result<Self> {
        let (client, event_loop) = AsyncClient::new(mqtt_options(options)?, REQUEST_CAPACITY);

        Ok(Self {
            inner: Arc::new(Inner {
                options: options.clone(),
                client,
                event_loop: Mutex::new(Some(event_loop)),
                sink,
                tracker: AckTracker::new(),
                gate: tokio::sync::Mutex::new(()),
                connected: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                task: Mutex::new(None),
            }),
        })
    }

    fn open_store(&self) -> Result<DynStore> {
        let store = store::open_store(&self.inner.options.persistence)?;
        if self.inner.options.clean_session {
            store.reset()?;
        } else {
            let pending = store.keys()?.len();
            if pending > 0 {
                tracing::info!(
                    "MQTT client {} has {} unacknowledged messages from a previous session",
                    self.inner.options.client_id,
                    pending
                );
            }
        }
        Ok(store)
    }

    fn abort(&self) {
        if let Some(handle) = self.inner.task.lock().take() {
            handle.abort();
        }
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.tracker.close("connect failed");
        self.inner.tracker.release_store();
    }

    /// Queue a request and hand it to the event loop, returning the pending
    /// acknowledgment.
    async fn submit<F>(
        &self,
        kind: AckKind,
        qos: Qos,
        record: Option<Vec<u8>>,
        send: F,
    ) -> Result<std::result::Result<oneshot::Receiver<AckResult>, String>>
    where
        F: std::future::Future<Output = std::result::Result<(), rumqttc::ClientError>>,
    {
        let _gate = self.inner.gate.lock().await;
        let rx = self
            .inner
            .tracker
            .enqueue(kind, qos, record)
            .ok_or(MqttError::NotConnected)?;

        match send.await {
            Ok(()) => Ok(Ok(rx)),
            Err(e) => {
                self.inner.tracker.withdraw_last(kind);
                Ok(Err(e.to_string()))
            }
        }
    }

    async fn run_event_loop(
        self,
        mut event_loop: EventLoop,
        inbound: Option<mpsc::UnboundedSender<InboundMessage>>,
        connack: oneshot::Sender<AckResult>,
    ) {
        let client_id = self.inner.options.client_id.clone();
        let tracker = &self.inner.tracker;
        let mut connack = Some(connack);

        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        self.inner.connected.store(true, Ordering::SeqCst);
                        match connack.take() {
                            Some(tx) => {
                                let _ = tx.send(Ok(()));
                            }
                            None => tracing::info!("MQTT client {} reconnected", client_id),
                        }
                    } else {
                        let reason = format!("connection refused: {:?}", ack.code);
                        if let Some(tx) = connack.take() {
                            let _ = tx.send(Err(reason));
                            break;
                        }
                        tracing::warn!("MQTT client {} {}", client_id, reason);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(p))) => {
                    if let Some(tx) = &inbound {
                        let message = InboundMessage {
                            topic: p.topic,
                            payload: p.payload.to_vec(),
                            qos: p.qos.into(),
                            retain: p.retain,
                        };
                        if tx.send(message).is_err() {
                            tracing::debug!(
                                "MQTT client {} dropped a message, delivery stopped",
                                client_id
                            );
                        }
                    }
                }
                Ok(Event::Incoming(Packet::PubAck(ack))) => {
                    tracker.on_ack(AckKind::Publish, ack.pkid, Ok(()));
                }
                Ok(Event::Incoming(Packet::PubComp(comp))) => {
                    tracker.on_ack(AckKind::Publish, comp.pkid, Ok(()));
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    let rejected = ack
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, rumqttc::SubscribeReasonCode::Failure));
                    let result = if rejected {
                        Err("rejected by broker".to_string())
                    } else {
                        Ok(())
                    };
                    tracker.on_ack(AckKind::Subscribe, ack.pkid, result);
                }
                Ok(Event::Incoming(Packet::UnsubAck(ack))) => {
                    tracker.on_ack(AckKind::Unsubscribe, ack.pkid, Ok(()));
                }
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                    tracker.on_sent(AckKind::Publish, pkid);
                }
                Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                    tracker.on_sent(AckKind::Subscribe, pkid);
                }
                Ok(Event::Outgoing(Outgoing::Unsubscribe(pkid))) => {
                    tracker.on_sent(AckKind::Unsubscribe, pkid);
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    tracing::debug!("MQTT client {} sent disconnect", client_id);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    self.inner.connected.store(false, Ordering::SeqCst);
                    if let Some(tx) = connack.take() {
                        let _ = tx.send(Err(e.to_string()));
                        break;
                    }
                    if self.inner.closing.load(Ordering::SeqCst) {
                        break;
                    }
                    tracing::warn!("MQTT client {} connection error: {}", client_id, e);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }

        self.inner.connected.store(false, Ordering::SeqCst);
        tracker.close("client disconnected");
        tracing::debug!("MQTT client {} event loop stopped", client_id);
    }

    async fn deliver(self, mut inbound: mpsc::UnboundedReceiver<InboundMessage>, sink: DynSink) {
        while let Some(message) = inbound.recv().await {
            sink.on_message(&self, message).await;
        }
    }
}

#[async_trait]
impl BrokerClient for RumqttcClient {
    fn client_id(&self) -> &str {
        &self.inner.options.client_id
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<()> {
        let event_loop = self.inner.event_loop.lock().take().ok_or_else(|| {
            MqttError::Connect(format!(
                "client {} cannot be connected twice",
                self.inner.options.client_id
            ))
        })?;

        self.inner.tracker.open(self.open_store()?);

        let inbound = self.inner.sink.clone().map(|sink| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(self.clone().deliver(rx, sink));
            tx
        });

        let (connack_tx, connack_rx) = oneshot::channel();
        let handle = tokio::spawn(self.clone().run_event_loop(event_loop, inbound, connack_tx));
        *self.inner.task.lock() = Some(handle);

        let timeout = self.inner.options.connect_timeout;
        let outcome = match tokio::time::timeout(timeout, connack_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(reason),
            Ok(Err(_)) => Err("event loop stopped".to_string()),
            Err(_) => Err(format!("no answer within {:?}", timeout)),
        };

        match outcome {
            Ok(()) => {
                tracing::info!(
                    "MQTT client {} connected to {}",
                    self.inner.options.client_id,
                    self.inner.options.broker
                );
                Ok(())
            }
            Err(reason) => {
                self.abort();
                let broker = &self.inner.options.broker;
                Err(MqttError::Connect(format!("{}: {}", broker, reason)))
            }
        }
    }

    async fn publish(&self, topic: &str, qos: Qos, retain: bool, payload: Vec<u8>) -> Result<()> {
        let record = (qos != Qos::AtMostOnce)
            .then(|| {
                serde_json::to_vec(&OutboundRecord {
                    topic,
                    qos,
                    retain,
                    payload: &payload,
                })
                .ok()
            })
            .flatten();

        let send = self.inner.client.publish(topic, qos.into(), retain, payload);
        let rx = self
            .submit(AckKind::Publish, qos, record, send)
            .await?
            .map_err(|reason| MqttError::publish(topic, reason))?;

        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(MqttError::publish(topic, reason)),
            Err(_) => Err(MqttError::publish(topic, "client dropped")),
        }
    }

    async fn subscribe(&self, topic: &str, qos: Qos) -> Result<()> {
        let send = self.inner.client.subscribe(topic, qos.into());
        let rx = self
            .submit(AckKind::Subscribe, qos, None, send)
            .await?
            .map_err(|reason| MqttError::subscribe(topic, reason))?;

        match rx.await {
            Ok(Ok(())) => {
                tracing::debug!("MQTT client {} subscribed to {}", self.client_id(), topic);
                Ok(())
            }
            Ok(Err(reason)) => Err(MqttError::subscribe(topic, reason)),
            Err(_) => Err(MqttError::subscribe(topic, "client dropped")),
        }
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        let send = self.inner.client.unsubscribe(topic);
        let rx = self
            .submit(AckKind::Unsubscribe, Qos::AtMostOnce, None, send)
            .await?
            .map_err(|reason| MqttError::unsubscribe(topic, reason))?;

        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(MqttError::unsubscribe(topic, reason)),
            Err(_) => Err(MqttError::unsubscribe(topic, "client dropped")),
        }
    }

    async fn disconnect(&self, grace: Duration) -> Result<()> {
        self.inner.closing.store(true, Ordering::SeqCst);

        let handle = self.inner.task.lock().take();
        let Some(mut handle) = handle else {
            return Ok(());
        };

        if let Err(e) = self.inner.client.try_disconnect() {
            tracing::debug!(
                "MQTT client {} disconnect request failed: {}",
                self.client_id(),
                e
            );
        }

        if tokio::time::timeout(grace + DISCONNECT_FLUSH, &mut handle)
            .await
            .is_err()
        {
            tracing::warn!(
                "MQTT client {} did not close within {:?}, aborting",
                self.client_id(),
                grace
            );
            handle.abort();
        }

        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.tracker.close("client disconnected");
        self.inner.tracker.release_store();
        tracing::info!("MQTT client {} disconnected", self.client_id());
        Ok(())
    }
}

/// Creates [`RumqttcClient`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct RumqttcClientFactory;

impl ClientFactory for RumqttcClientFactory {
    fn create(&self, options: &ClientOptions, sink: Option<DynSink>) -> Result<DynClient> {
        Ok(Arc::new(RumqttcClient::new(options, sink)?))
    }
}
