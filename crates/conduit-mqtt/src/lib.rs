//! MQTT connector for conduit hosts.
//!
//! Provides two connector kinds:
//! - [`MqttTrigger`]: subscribes one broker session per handler, runs the
//!   handler for every inbound message and republishes its `data` result to
//!   the handler's `replyTopic`
//! - [`MqttActivity`]: publishes one message per invocation through a
//!   dedicated client or a connection lent by the host
//!
//! ## Example
//!
//! ```rust,no_run
//! use conduit_core::{ConnectorRegistry, TriggerConfig, HandlerConfig};
//! use serde_json::json;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = ConnectorRegistry::new();
//! conduit_mqtt::register(&registry)?;
//!
//! let config = TriggerConfig::new("sensors")
//!     .with_ref(conduit_mqtt::TRIGGER_REF)
//!     .with_setting("broker", json!("tcp://localhost:1883"))
//!     .with_handler(HandlerConfig::new("echo").with_setting("topic", json!("sensors/in")));
//! let trigger = registry.create_trigger(&config)?;
//! # let _ = trigger;
//! # Ok(())
//! # }
//! ```

pub mod activity;
pub mod client;
pub mod error;
pub mod options;
pub mod router;
#[cfg(feature = "mqtt")]
pub mod rumqtt;
pub mod settings;
pub mod store;
pub mod trigger;

pub use activity::{activity_metadata, MqttActivity, MqttActivityFactory, ACTIVITY_REF};
pub use client::{
    BrokerClient, ClientFactory, DynClient, DynSink, InboundMessage, MessageSink, SharedClient,
};
pub use error::{MqttError, Result};
pub use options::{BrokerAddress, ClientOptions, ConnectionSettings, Credentials, Transport};
pub use router::{HandlerRouter, ReplyEnvelope};
#[cfg(feature = "mqtt")]
pub use rumqtt::{RumqttcClient, RumqttcClientFactory};
pub use settings::{ActivitySettings, HandlerSettings, PublishInput, Qos, TriggerSettings};
pub use store::{MessageStore, Persistence, MEMORY_STORE};
pub use trigger::{trigger_metadata, MqttTrigger, MqttTriggerFactory, Session, TRIGGER_REF};

use conduit_core::{ConnectorRegistry, RegistryError};
use std::sync::Arc;

/// Register the MQTT trigger and activity with clients from `client_factory`.
pub fn register_with(
    registry: &ConnectorRegistry,
    client_factory: Arc<dyn ClientFactory>,
) -> std::result::Result<(), RegistryError> {
    registry.register_trigger(
        TRIGGER_REF,
        Arc::new(MqttTriggerFactory::new(client_factory.clone())),
    )?;
    registry.register_activity(ACTIVITY_REF, Arc::new(MqttActivityFactory::new(client_factory)))?;
    tracing::info!("Registered MQTT connector");
    Ok(())
}

/// Register the MQTT trigger and activity backed by `rumqttc` clients.
#[cfg(feature = "mqtt")]
pub fn register(registry: &ConnectorRegistry) -> std::result::Result<(), RegistryError> {
    register_with(registry, Arc::new(RumqttcClientFactory))
}
