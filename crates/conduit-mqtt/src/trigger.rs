//! Subscription trigger.
//!
//! One trigger fans out into one broker session per handler. Every session
//! owns a dedicated client whose messages are routed to that handler only.

use crate::client::{ClientFactory, DynClient, DynSink};
use crate::error::{MqttError, Result};
use crate::options::ClientOptions;
use crate::router::HandlerRouter;
use crate::settings::{HandlerSettings, Qos, TriggerSettings};
use async_trait::async_trait;
use conduit_core::{
    DataType, DynHandler, Field, Metadata, Trigger, TriggerConfig, TriggerError, TriggerFactory,
    TriggerState,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Reference the trigger is registered under.
pub const TRIGGER_REF: &str = "conduit-mqtt/trigger";

/// Grace period of the disconnect on stop.
pub const STOP_GRACE: Duration = Duration::from_millis(250);

/// Metadata of the subscription trigger.
///
/// A handler subscribes to its `topic`. Replies go to its `replyTopic`, and
/// no reply is published when that setting is empty or absent.
pub fn trigger_metadata() -> Metadata {
    Metadata::new()
        .with_settings(vec![
            Field::required("broker", DataType::String),
            Field::new("id", DataType::String),
            Field::new("user", DataType::String),
            Field::new("password", DataType::String),
            Field::new("store", DataType::String),
            Field::new("cleansess", DataType::Boolean),
            Field::new("qos", DataType::Integer),
        ])
        .with_handler_settings(vec![
            Field::required("topic", DataType::String),
            Field::new("qos", DataType::Integer),
            Field::new("replyTopic", DataType::String),
        ])
        .with_outputs(vec![Field::new("message", DataType::String)])
        .with_reply(vec![Field::new("data", DataType::Any)])
}

/// A handler binding and the client serving it.
pub struct Session {
    pub handler: String,
    pub topic: String,
    pub qos: Qos,
    pub client: DynClient,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("handler", &self.handler)
            .field("topic", &self.topic)
            .field("qos", &self.qos)
            .field("client", &self.client.client_id())
            .finish()
    }
}

/// MQTT subscription trigger.
pub struct MqttTrigger {
    id: String,
    settings: TriggerSettings,
    client_factory: Arc<dyn ClientFactory>,
    sessions: Vec<Session>,
    state: TriggerState,
}

impl MqttTrigger {
    /// Create a trigger in the uninitialized state.
    pub fn new(
        id: impl Into<String>,
        settings: TriggerSettings,
        client_factory: Arc<dyn ClientFactory>,
    ) -> Self {
        Self {
            id: id.into(),
            settings,
            client_factory,
            sessions: Vec::new(),
            state: TriggerState::Uninitialized,
        }
    }

    /// Trigger settings.
    pub fn settings(&self) -> &TriggerSettings {
        &self.settings
    }

    /// Sessions, one per handler, in handler order.
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    fn check_state(
        &self,
        operation: &'static str,
        expected: TriggerState,
    ) -> std::result::Result<(), TriggerError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(TriggerError::InvalidState {
                trigger: self.id.clone(),
                operation,
                state: self.state.to_string(),
            })
        }
    }

    /// Client options of one session. With several handlers a configured
    /// client id is suffixed with the handler name so sessions do not take
    /// over each other at the broker.
    fn session_options(&self, handler: &str, handler_count: usize) -> Result<ClientOptions> {
        let mut connection = self.settings.connection.clone();
        if handler_count > 1 && !connection.client_id.is_empty() {
            connection.client_id = format!("{}_{}", connection.client_id, handler);
        }
        ClientOptions::new(&connection)
    }

    async fn open_session(
        &self,
        handler: DynHandler,
        binding: HandlerSettings,
        handler_count: usize,
    ) -> Result<Session> {
        let name = handler.name().to_string();
        let options = self.session_options(&name, handler_count)?;

        let sink: DynSink = Arc::new(HandlerRouter::new(
            handler,
            binding.reply_topic,
            self.settings.reply_qos,
        ));
        let client = self.client_factory.create(&options, Some(sink))?;
        client.connect().await?;

        tracing::debug!(
            "Trigger {} connected session for handler {} as {}",
            self.id,
            name,
            client.client_id()
        );

        Ok(Session {
            handler: name,
            topic: binding.topic,
            qos: binding.qos,
            client,
        })
    }

    /// Connect one session per handler.
    ///
    /// Fails as a whole: sessions connected before the failing one are
    /// disconnected again and no session is kept. Handler names must be
    /// unique since they derive the session client ids.
    pub async fn initialize_sessions(&mut self, handlers: Vec<DynHandler>) -> Result<()> {
        {
            let mut names = HashSet::new();
            if let Some(duplicate) = handlers.iter().find(|h| !names.insert(h.name())) {
                return Err(MqttError::Config(format!(
                    "Duplicate handler name '{}' in trigger {}",
                    duplicate.name(),
                    self.id
                )));
            }
        }

        let bindings = handlers
            .into_iter()
            .map(|handler| HandlerSettings::from_settings(handler.settings()).map(|b| (handler, b)))
            .collect::<Result<Vec<_>>>()?;
        let handler_count = bindings.len();

        let mut sessions = Vec::with_capacity(handler_count);
        for (handler, binding) in bindings {
            match self.open_session(handler, binding, handler_count).await {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    tracing::error!("Trigger {} failed to initialize: {}", self.id, e);
                    for session in &sessions {
                        if let Err(de) = session.client.disconnect(STOP_GRACE).await {
                            tracing::warn!(
                                "Failed to disconnect session for handler {}: {}",
                                session.handler,
                                de
                            );
                        }
                    }
                    return Err(e);
                }
            }
        }

        self.sessions = sessions;
        Ok(())
    }

    /// Subscribe every session, in order. Stops at the first failure without
    /// undoing earlier subscriptions.
    pub async fn subscribe_sessions(&self) -> Result<()> {
        for session in &self.sessions {
            if let Err(e) = session.client.subscribe(&session.topic, session.qos).await {
                tracing::error!("Error subscribing to topic {}: {}", session.topic, e);
                return Err(e);
            }
            tracing::debug!(
                "Subscribed to topic: {}, will trigger handler: {}",
                session.topic,
                session.handler
            );
        }
        Ok(())
    }

    /// Unsubscribe and disconnect every session. Failures are logged.
    pub async fn close_sessions(&self) {
        for session in &self.sessions {
            tracing::debug!("Unsubscribing from topic: {}", session.topic);
            if let Err(e) = session.client.unsubscribe(&session.topic).await {
                tracing::error!("Error unsubscribing from topic {}: {}", session.topic, e);
            }
            if let Err(e) = session.client.disconnect(STOP_GRACE).await {
                tracing::error!(
                    "Error disconnecting session for handler {}: {}",
                    session.handler,
                    e
                );
            }
        }
    }
}

#[async_trait]
impl Trigger for MqttTrigger {
    fn id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> TriggerState {
        self.state
    }

    async fn initialize(
        &mut self,
        handlers: Vec<DynHandler>,
    ) -> std::result::Result<(), TriggerError> {
        self.check_state("initialize", TriggerState::Uninitialized)?;
        self.initialize_sessions(handlers).await?;
        self.state = TriggerState::Initialized;
        tracing::info!(
            "Trigger {} initialized with {} sessions",
            self.id,
            self.sessions.len()
        );
        Ok(())
    }

    async fn start(&mut self) -> std::result::Result<(), TriggerError> {
        self.check_state("start", TriggerState::Initialized)?;
        self.subscribe_sessions().await?;
        self.state = TriggerState::Started;
        tracing::info!("Trigger {} started", self.id);
        Ok(())
    }

    async fn stop(&mut self) -> std::result::Result<(), TriggerError> {
        match self.state {
            TriggerState::Initialized | TriggerState::Started => {
                self.close_sessions().await;
                self.state = TriggerState::Stopped;
                tracing::info!("Trigger {} stopped", self.id);
            }
            TriggerState::Uninitialized | TriggerState::Stopped => {
                tracing::debug!("Trigger {} stop ignored while {}", self.id, self.state);
            }
        }
        Ok(())
    }
}

/// Builds [`MqttTrigger`]s.
pub struct MqttTriggerFactory {
    metadata: Metadata,
    client_factory: Arc<dyn ClientFactory>,
}

impl MqttTriggerFactory {
    /// Create a factory whose triggers build clients with `client_factory`.
    pub fn new(client_factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            metadata: trigger_metadata(),
            client_factory,
        }
    }
}

impl TriggerFactory for MqttTriggerFactory {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn create(
        &self,
        config: &TriggerConfig,
    ) -> std::result::Result<Box<dyn Trigger>, TriggerError> {
        self.metadata.check_required(&config.settings)?;
        let settings = TriggerSettings::from_settings(&config.settings).map_err(|e| {
            tracing::error!("Invalid settings for trigger {}: {}", config.id, e);
            e
        })?;

        Ok(Box::new(MqttTrigger::new(
            config.id.clone(),
            settings,
            self.client_factory.clone(),
        )))
    }
}
