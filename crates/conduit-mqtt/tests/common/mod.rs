//! In-process broker client used by the integration tests.
//!
//! Records every call in order and injects failures on demand. Messages are
//! delivered by calling [`MockClient::deliver`], which runs the client's sink
//! the same way a real client's delivery task does.

#![allow(dead_code)]

use async_trait::async_trait;
use conduit_core::{Attrs, DynHandler, FnHandler, HandlerConfig, HandlerError};
use conduit_mqtt::{
    BrokerClient, ClientFactory, ClientOptions, DynClient, DynSink, InboundMessage, MqttError, Qos,
    Result,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Connect {
        client: String,
    },
    Subscribe {
        client: String,
        topic: String,
        qos: Qos,
    },
    Unsubscribe {
        client: String,
        topic: String,
    },
    Publish {
        client: String,
        topic: String,
        qos: Qos,
        retain: bool,
        payload: Vec<u8>,
    },
    Disconnect {
        client: String,
        grace: Duration,
    },
}

/// Shared state of every client created by one [`MockFactory`].
#[derive(Default)]
pub struct MockBroker {
    calls: Mutex<Vec<Call>>,
    clients: Mutex<Vec<Arc<MockClient>>>,
    fail_connect_at: Mutex<Option<usize>>,
    fail_disconnect_at: Mutex<Option<usize>>,
    fail_subscribe: Mutex<HashSet<String>>,
    fail_unsubscribe: AtomicBool,
    fail_publish: AtomicBool,
    withhold_acks: AtomicBool,
}

impl MockBroker {
    /// Refuse the connect of the `index`-th created client (0-based).
    pub fn fail_connect_at(&self, index: usize) {
        *self.fail_connect_at.lock() = Some(index);
    }

    /// Fail the disconnect of the `index`-th created client (0-based).
    pub fn fail_disconnect_at(&self, index: usize) {
        *self.fail_disconnect_at.lock() = Some(index);
    }

    pub fn fail_subscribe(&self, topic: &str) {
        self.fail_subscribe.lock().insert(topic.to_string());
    }

    pub fn fail_unsubscribe(&self, fail: bool) {
        self.fail_unsubscribe.store(fail, Ordering::SeqCst);
    }

    pub fn fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Never acknowledge publishes.
    pub fn withhold_acks(&self, withhold: bool) {
        self.withhold_acks.store(withhold, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn clients(&self) -> Vec<Arc<MockClient>> {
        self.clients.lock().clone()
    }

    pub fn client(&self, index: usize) -> Arc<MockClient> {
        self.clients.lock()[index].clone()
    }

    pub fn created(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn publishes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Publish { .. }))
            .collect()
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Subscribe { topic, .. } => Some(topic),
                _ => None,
            })
            .collect()
    }

    pub fn disconnected_clients(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Disconnect { client, .. } => Some(client),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

pub struct MockClient {
    id: String,
    index: usize,
    sink: Option<DynSink>,
    broker: Arc<MockBroker>,
    connected: AtomicBool,
}

impl MockClient {
    /// Deliver a message to the client's sink and wait for it to finish.
    pub async fn deliver(&self, topic: &str, payload: &[u8]) {
        if let Some(sink) = &self.sink {
            sink.on_message(self, InboundMessage::new(topic, payload.to_vec()))
                .await;
        }
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }
}

#[async_trait]
impl BrokerClient for MockClient {
    fn client_id(&self) -> &str {
        &self.id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<()> {
        self.broker.record(Call::Connect {
            client: self.id.clone(),
        });
        if *self.broker.fail_connect_at.lock() == Some(self.index) {
            return Err(MqttError::Connect("connection refused".into()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, topic: &str, qos: Qos, retain: bool, payload: Vec<u8>) -> Result<()> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected);
        }
        self.broker.record(Call::Publish {
            client: self.id.clone(),
            topic: topic.to_string(),
            qos,
            retain,
            payload,
        });
        if self.broker.fail_publish.load(Ordering::SeqCst) {
            return Err(MqttError::publish(topic, "not authorized"));
        }
        if self.broker.withhold_acks.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: Qos) -> Result<()> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected);
        }
        if self.broker.fail_subscribe.lock().contains(topic) {
            return Err(MqttError::subscribe(topic, "rejected by broker"));
        }
        self.broker.record(Call::Subscribe {
            client: self.id.clone(),
            topic: topic.to_string(),
            qos,
        });
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.broker.record(Call::Unsubscribe {
            client: self.id.clone(),
            topic: topic.to_string(),
        });
        if self.broker.fail_unsubscribe.load(Ordering::SeqCst) {
            return Err(MqttError::unsubscribe(topic, "rejected by broker"));
        }
        Ok(())
    }

    async fn disconnect(&self, grace: Duration) -> Result<()> {
        self.broker.record(Call::Disconnect {
            client: self.id.clone(),
            grace,
        });
        if *self.broker.fail_disconnect_at.lock() == Some(self.index) {
            return Err(MqttError::Connect("connection reset".into()));
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Client factory handing out [`MockClient`]s.
#[derive(Default, Clone)]
pub struct MockFactory {
    pub broker: Arc<MockBroker>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClientFactory for MockFactory {
    fn create(&self, options: &ClientOptions, sink: Option<DynSink>) -> Result<DynClient> {
        let mut clients = self.broker.clients.lock();
        let client = Arc::new(MockClient {
            id: options.client_id.clone(),
            index: clients.len(),
            sink,
            broker: self.broker.clone(),
            connected: AtomicBool::new(false),
        });
        clients.push(client.clone());
        Ok(client)
    }
}

/// Settings map from a JSON object.
pub fn attrs(value: Value) -> Attrs {
    value.as_object().cloned().unwrap_or_default()
}

/// Handler bound to `topic`, replying to `reply_topic`, running `action`.
pub fn handler<F, Fut>(name: &str, topic: &str, reply_topic: &str, action: F) -> DynHandler
where
    F: Fn(Attrs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Attrs, HandlerError>> + Send + 'static,
{
    let config = HandlerConfig::new(name)
        .with_setting("topic", json!(topic))
        .with_setting("replyTopic", json!(reply_topic));
    Arc::new(FnHandler::new(config, action))
}

/// Handler returning fixed results.
pub fn replying(name: &str, topic: &str, reply_topic: &str, results: Value) -> DynHandler {
    let results = attrs(results);
    handler(name, topic, reply_topic, move |_data| {
        let results = results.clone();
        async move { Ok(results) }
    })
}
