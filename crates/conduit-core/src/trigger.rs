//! Trigger and handler abstractions.
//!
//! A trigger listens to an external system and turns what it receives into
//! handler invocations. The host builds a trigger from a [`TriggerConfig`],
//! hands it the application handlers bound to it, then drives the lifecycle:
//!
//! ```text
//! Uninitialized ──initialize──▶ Initialized ──start──▶ Started ──stop──▶ Stopped
//!                                    │                                    ▲
//!                                    └───────────────stop─────────────────┘
//! ```

use crate::coerce::Attrs;
use crate::error::{HandlerError, TriggerError};
use crate::metadata::Metadata;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

/// Trigger lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerState {
    Uninitialized,
    Initialized,
    Started,
    Stopped,
}

impl TriggerState {
    /// Get the state as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Started => "started",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for TriggerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Application handler bound to a trigger.
///
/// The handler carries its own settings (for example the topic it listens
/// on) and runs the application action for every event the trigger routes
/// to it.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handler name, unique within a trigger.
    fn name(&self) -> &str;

    /// Handler settings as configured by the host.
    fn settings(&self) -> &Attrs;

    /// Run the action with the trigger output and return its results.
    async fn handle(&self, data: Attrs) -> Result<Attrs, HandlerError>;
}

/// Dynamic handler wrapper for trait objects.
pub type DynHandler = Arc<dyn Handler>;

/// Trigger lifecycle.
#[async_trait]
pub trait Trigger: Send + Sync {
    /// Trigger instance id.
    fn id(&self) -> &str;

    /// Current lifecycle state.
    fn state(&self) -> TriggerState;

    /// Prepare the trigger for the given handlers.
    async fn initialize(&mut self, handlers: Vec<DynHandler>) -> Result<(), TriggerError>;

    /// Begin delivering events to handlers.
    async fn start(&mut self) -> Result<(), TriggerError>;

    /// Stop delivering events and release resources.
    async fn stop(&mut self) -> Result<(), TriggerError>;
}

/// Builds triggers of one kind.
pub trait TriggerFactory: Send + Sync {
    /// Metadata of the triggers this factory builds.
    fn metadata(&self) -> &Metadata;

    /// Create a trigger from its configuration.
    fn create(&self, config: &TriggerConfig) -> Result<Box<dyn Trigger>, TriggerError>;
}

/// Trigger configuration as supplied by the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Trigger instance id.
    pub id: String,

    /// Reference of the trigger implementation.
    #[serde(rename = "ref", default)]
    pub reference: String,

    /// Trigger settings.
    #[serde(default)]
    pub settings: Attrs,

    /// Handlers bound to the trigger.
    #[serde(default)]
    pub handlers: Vec<HandlerConfig>,
}

impl TriggerConfig {
    /// Create a new trigger configuration.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Set the trigger reference.
    pub fn with_ref(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    /// Set a single setting.
    pub fn with_setting(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.settings.insert(name.into(), value);
        self
    }

    /// Add a handler.
    pub fn with_handler(mut self, handler: HandlerConfig) -> Self {
        self.handlers.push(handler);
        self
    }
}

/// Handler configuration as supplied by the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Handler name.
    pub name: String,

    /// Handler settings.
    #[serde(default)]
    pub settings: Attrs,
}

impl HandlerConfig {
    /// Create a new handler configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set a single setting.
    pub fn with_setting(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.settings.insert(name.into(), value);
        self
    }
}

/// Handler backed by an async closure.
pub struct FnHandler<F> {
    name: String,
    settings: Attrs,
    action: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(Attrs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Attrs, HandlerError>> + Send,
{
    /// Bind an action to a handler configuration.
    pub fn new(config: HandlerConfig, action: F) -> Self {
        Self {
            name: config.name,
            settings: config.settings,
            action,
        }
    }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Attrs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Attrs, HandlerError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> &Attrs {
        &self.settings
    }

    async fn handle(&self, data: Attrs) -> Result<Attrs, HandlerError> {
        (self.action)(data).await
    }
}
