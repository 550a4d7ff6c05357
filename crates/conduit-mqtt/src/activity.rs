//! Publish activity.
//!
//! Publishes one message per invocation, either through a connection lent
//! by the host (`connection` input) or through a dedicated client the
//! activity connects when it is created. A dedicated client is disconnected
//! after its first successful publish and is not reconnected.

use crate::client::{ClientFactory, DynClient, SharedClient};
use crate::error::{MqttError, Result};
use crate::options::ClientOptions;
use crate::settings::{ActivitySettings, PublishInput};
use async_trait::async_trait;
use conduit_core::{
    Activity, ActivityConfig, ActivityContext, ActivityError, ActivityFactory, DataType, Field,
    Metadata, SharedConnection,
};
use std::sync::Arc;

/// Reference the activity is registered under.
pub const ACTIVITY_REF: &str = "conduit-mqtt/activity";

/// Input holding the shared connection.
pub const CONNECTION_INPUT: &str = "connection";

/// Activity publishes are retained by the broker.
const RETAIN: bool = true;

/// Metadata of the publish activity.
pub fn activity_metadata() -> Metadata {
    Metadata::new()
        .with_settings(vec![
            Field::new("broker", DataType::String),
            Field::new("id", DataType::String),
            Field::new("user", DataType::String),
            Field::new("password", DataType::String),
            Field::new("store", DataType::String),
            Field::new("cleansess", DataType::Boolean),
            Field::new("close", DataType::Integer),
            Field::required("sharedconnection", DataType::Boolean),
        ])
        .with_inputs(vec![
            Field::required("topic", DataType::String),
            Field::new("qos", DataType::Integer),
            Field::new("message", DataType::Any),
            Field::new(CONNECTION_INPUT, DataType::Connection),
        ])
}

/// MQTT publish activity.
pub struct MqttActivity {
    metadata: Metadata,
    settings: ActivitySettings,
    client: tokio::sync::Mutex<Option<DynClient>>,
}

impl MqttActivity {
    /// Create the activity, connecting the dedicated client unless the
    /// activity publishes through shared connections.
    pub async fn new(
        settings: ActivitySettings,
        client_factory: &dyn ClientFactory,
    ) -> Result<Self> {
        let client = match &settings.connection {
            Some(connection) if !settings.shared_connection => {
                let options = ClientOptions::new(connection)?;
                let client = client_factory.create(&options, None)?;
                client.connect().await?;
                Some(client)
            }
            _ => None,
        };

        Ok(Self {
            metadata: activity_metadata(),
            settings,
            client: tokio::sync::Mutex::new(client),
        })
    }

    /// Activity settings.
    pub fn settings(&self) -> &ActivitySettings {
        &self.settings
    }

    /// Publish through a connection lent by the host. The connection is
    /// never closed here.
    pub async fn publish_shared(
        &self,
        connection: &SharedConnection,
        input: &PublishInput,
    ) -> Result<()> {
        let pooled = connection.connection();
        let shared = pooled.downcast_ref::<SharedClient>().ok_or_else(|| {
            MqttError::InvalidInput(format!(
                "connection of type '{}' is not an MQTT connection",
                connection.connection_type()
            ))
        })?;

        tracing::info!("Using shared connection to publish to {}", input.topic);
        shared
            .client()
            .publish(&input.topic, input.qos, RETAIN, input.payload()?)
            .await
    }

    /// Publish through the dedicated client, then disconnect it.
    pub async fn publish_dedicated(&self, input: &PublishInput) -> Result<()> {
        let mut guard = self.client.lock().await;
        let client = guard.as_ref().ok_or(MqttError::NotConnected)?;

        client
            .publish(&input.topic, input.qos, RETAIN, input.payload()?)
            .await?;

        if let Some(client) = guard.take() {
            if let Err(e) = client.disconnect(self.settings.close).await {
                tracing::warn!("Failed to disconnect client {}: {}", client.client_id(), e);
            }
        }
        Ok(())
    }

    async fn publish(&self, ctx: &ActivityContext) -> Result<()> {
        let input = PublishInput::from_inputs(ctx.inputs())?;
        match ctx.connection(CONNECTION_INPUT) {
            Some(connection) => self.publish_shared(connection, &input).await,
            None => self.publish_dedicated(&input).await,
        }
    }
}

#[async_trait]
impl Activity for MqttActivity {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    async fn eval(&self, ctx: &mut ActivityContext) -> std::result::Result<bool, ActivityError> {
        if let Err(e) = self.publish(ctx).await {
            tracing::error!("Error in publishing: {}", e);
            return Err(e.into());
        }
        tracing::info!("Message published");
        Ok(true)
    }
}

/// Builds [`MqttActivity`]s.
pub struct MqttActivityFactory {
    metadata: Metadata,
    client_factory: Arc<dyn ClientFactory>,
}

impl MqttActivityFactory {
    /// Create a factory whose activities build clients with `client_factory`.
    pub fn new(client_factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            metadata: activity_metadata(),
            client_factory,
        }
    }
}

#[async_trait]
impl ActivityFactory for MqttActivityFactory {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    async fn create(
        &self,
        config: &ActivityConfig,
    ) -> std::result::Result<Box<dyn Activity>, ActivityError> {
        let settings = ActivitySettings::from_settings(&config.settings)?;
        let activity = MqttActivity::new(settings, self.client_factory.as_ref()).await?;
        Ok(Box::new(activity))
    }
}
