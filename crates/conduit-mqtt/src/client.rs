//! Broker client capability.
//!
//! The trigger and the activity only talk to a broker through
//! [`BrokerClient`]. Clients are built by a [`ClientFactory`] from
//! [`ClientOptions`]; the message sink is fixed when the client is created
//! and receives every message delivered on the client's subscriptions.

use crate::error::Result;
use crate::options::ClientOptions;
use crate::settings::Qos;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// A message delivered on a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Topic the message was published to.
    pub topic: String,

    /// Payload.
    pub payload: Vec<u8>,

    /// QoS the message was delivered with.
    pub qos: Qos,

    /// Retain flag.
    pub retain: bool,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: Qos::AtMostOnce,
            retain: false,
        }
    }
}

/// Connection to one broker under one client id.
///
/// Request methods resolve once the broker has acknowledged the request
/// (QoS 0 publishes once written). There is no timeout on the wait; it only
/// ends early when the client disconnects.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Client id.
    fn client_id(&self) -> &str;

    /// Check if the client holds an open session.
    fn is_connected(&self) -> bool;

    /// Open the session and wait for the broker to accept it.
    async fn connect(&self) -> Result<()>;

    /// Publish a message.
    async fn publish(&self, topic: &str, qos: Qos, retain: bool, payload: Vec<u8>) -> Result<()>;

    /// Subscribe to a topic filter.
    async fn subscribe(&self, topic: &str, qos: Qos) -> Result<()>;

    /// Remove a subscription.
    async fn unsubscribe(&self, topic: &str) -> Result<()>;

    /// Close the session, giving in-flight work up to `grace` to finish.
    async fn disconnect(&self, grace: Duration) -> Result<()>;
}

/// Dynamic client wrapper for trait objects.
pub type DynClient = Arc<dyn BrokerClient>;

/// Receives the messages delivered to a client.
///
/// Messages of one client are delivered one at a time, in arrival order.
/// `client` is the client the message arrived on and may be used to publish
/// a reply.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn on_message(&self, client: &dyn BrokerClient, message: InboundMessage);
}

/// Dynamic sink wrapper for trait objects.
pub type DynSink = Arc<dyn MessageSink>;

/// Instantiates broker clients.
pub trait ClientFactory: Send + Sync {
    /// Create a disconnected client.
    fn create(&self, options: &ClientOptions, sink: Option<DynSink>) -> Result<DynClient>;
}

/// Client lent by a host connection pool.
///
/// Pools hand out MQTT connections as a `SharedClient` inside a
/// [`conduit_core::ConnectionManager`].
#[derive(Clone)]
pub struct SharedClient(pub DynClient);

impl SharedClient {
    pub fn new(client: DynClient) -> Self {
        Self(client)
    }

    /// The pooled client.
    pub fn client(&self) -> &DynClient {
        &self.0
    }
}

impl std::fmt::Debug for SharedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SharedClient").field(&self.0.client_id()).finish()
    }
}
