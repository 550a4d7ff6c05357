//! Activity abstractions.
//!
//! An activity is a single step the host runs on demand: it reads its inputs
//! from an [`ActivityContext`], does its work and reports whether it is done.

use crate::coerce::Attrs;
use crate::connection::SharedConnection;
use crate::error::ActivityError;
use crate::metadata::Metadata;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Inputs and lent connections of one activity invocation.
#[derive(Default)]
pub struct ActivityContext {
    inputs: Attrs,
    connections: HashMap<String, SharedConnection>,
}

impl ActivityContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context from an input map.
    pub fn with_inputs(inputs: Attrs) -> Self {
        Self {
            inputs,
            ..Self::default()
        }
    }

    /// Set an input value.
    pub fn set_input(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.inputs.insert(name.into(), value);
    }

    /// Bind a shared connection to an input name.
    pub fn set_connection(&mut self, name: impl Into<String>, connection: SharedConnection) {
        self.connections.insert(name.into(), connection);
    }

    /// Get an input value.
    pub fn input(&self, name: &str) -> Option<&serde_json::Value> {
        self.inputs.get(name)
    }

    /// All input values.
    pub fn inputs(&self) -> &Attrs {
        &self.inputs
    }

    /// Get the shared connection bound to an input name.
    pub fn connection(&self, name: &str) -> Option<&SharedConnection> {
        self.connections.get(name)
    }
}

impl std::fmt::Debug for ActivityContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityContext")
            .field("inputs", &self.inputs)
            .field("connections", &self.connections.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A runnable activity.
#[async_trait]
pub trait Activity: Send + Sync {
    /// Metadata of the activity.
    fn metadata(&self) -> &Metadata;

    /// Run the activity once. Returns `true` when the activity is done.
    async fn eval(&self, ctx: &mut ActivityContext) -> Result<bool, ActivityError>;
}

/// Builds activities of one kind.
#[async_trait]
pub trait ActivityFactory: Send + Sync {
    /// Metadata of the activities this factory builds.
    fn metadata(&self) -> &Metadata;

    /// Create an activity from its configuration.
    async fn create(&self, config: &ActivityConfig) -> Result<Box<dyn Activity>, ActivityError>;
}

/// Activity configuration as supplied by the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivityConfig {
    /// Activity instance id.
    pub id: String,

    /// Reference of the activity implementation.
    #[serde(rename = "ref", default)]
    pub reference: String,

    /// Activity settings.
    #[serde(default)]
    pub settings: Attrs,
}

impl ActivityConfig {
    /// Create a new activity configuration.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Set the activity reference.
    pub fn with_ref(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    /// Set a single setting.
    pub fn with_setting(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.settings.insert(name.into(), value);
        self
    }
}
