//! Connector registry.
//!
//! The registry provides:
//! - Trigger and activity factory registration by reference
//! - Instantiation of configured triggers and activities
//!
//! Hosts own the registry and pass it to each connector crate's `register`
//! function; there is no process wide instance.

use crate::activity::{Activity, ActivityConfig, ActivityFactory};
use crate::trigger::{Trigger, TriggerConfig, TriggerFactory};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Registry error types.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Reference already registered.
    #[error("Already registered: {0}")]
    AlreadyRegistered(String),

    /// Reference not found.
    #[error("Not registered: {0}")]
    NotFound(String),

    /// Trigger construction failed.
    #[error("Trigger creation failed: {0}")]
    Trigger(#[from] crate::TriggerError),

    /// Activity construction failed.
    #[error("Activity creation failed: {0}")]
    Activity(#[from] crate::ActivityError),
}

/// Registry of trigger and activity factories.
#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    triggers: Arc<RwLock<HashMap<String, Arc<dyn TriggerFactory>>>>,
    activities: Arc<RwLock<HashMap<String, Arc<dyn ActivityFactory>>>>,
}

impl ConnectorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a trigger factory under a reference.
    pub fn register_trigger(
        &self,
        reference: impl Into<String>,
        factory: Arc<dyn TriggerFactory>,
    ) -> Result<()> {
        let reference = reference.into();
        let mut triggers = self.triggers.write();
        if triggers.contains_key(&reference) {
            return Err(RegistryError::AlreadyRegistered(reference));
        }
        tracing::debug!("Registered trigger factory: {}", reference);
        triggers.insert(reference, factory);
        Ok(())
    }

    /// Register an activity factory under a reference.
    pub fn register_activity(
        &self,
        reference: impl Into<String>,
        factory: Arc<dyn ActivityFactory>,
    ) -> Result<()> {
        let reference = reference.into();
        let mut activities = self.activities.write();
        if activities.contains_key(&reference) {
            return Err(RegistryError::AlreadyRegistered(reference));
        }
        tracing::debug!("Registered activity factory: {}", reference);
        activities.insert(reference, factory);
        Ok(())
    }

    /// Get a trigger factory.
    pub fn trigger_factory(&self, reference: &str) -> Option<Arc<dyn TriggerFactory>> {
        self.triggers.read().get(reference).cloned()
    }

    /// Get an activity factory.
    pub fn activity_factory(&self, reference: &str) -> Option<Arc<dyn ActivityFactory>> {
        self.activities.read().get(reference).cloned()
    }

    /// Create the trigger referenced by a configuration.
    pub fn create_trigger(&self, config: &TriggerConfig) -> Result<Box<dyn Trigger>> {
        let factory = self
            .trigger_factory(&config.reference)
            .ok_or_else(|| RegistryError::NotFound(config.reference.clone()))?;
        Ok(factory.create(config)?)
    }

    /// Create the activity referenced by a configuration.
    pub async fn create_activity(&self, config: &ActivityConfig) -> Result<Box<dyn Activity>> {
        // Clone the factory out so the lock is not held across the await.
        let factory = self
            .activity_factory(&config.reference)
            .ok_or_else(|| RegistryError::NotFound(config.reference.clone()))?;
        Ok(factory.create(config).await?)
    }

    /// List registered trigger references.
    pub fn triggers(&self) -> Vec<String> {
        self.triggers.read().keys().cloned().collect()
    }

    /// List registered activity references.
    pub fn activities(&self) -> Vec<String> {
        self.activities.read().keys().cloned().collect()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.triggers.read().is_empty() && self.activities.read().is_empty()
    }
}
