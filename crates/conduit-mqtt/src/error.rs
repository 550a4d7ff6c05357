//! MQTT connector error types.

use conduit_core::{ActivityError, CoerceError, TriggerError};

/// Result type for MQTT connector operations.
pub type Result<T> = std::result::Result<T, MqttError>;

/// MQTT connector error types.
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    /// Bad or missing settings. Fatal, aborts construction.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Broker unreachable or connection refused.
    #[error("Connect failed: {0}")]
    Connect(String),

    /// Subscription rejected or not acknowledged.
    #[error("Subscribe to '{topic}' failed: {reason}")]
    Subscribe { topic: String, reason: String },

    /// Unsubscribe rejected or not acknowledged.
    #[error("Unsubscribe from '{topic}' failed: {reason}")]
    Unsubscribe { topic: String, reason: String },

    /// Publish rejected or not acknowledged.
    #[error("Publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    /// Handler result could not be encoded as a reply.
    #[error("Reply serialization failed: {0}")]
    ReplySerialization(#[from] serde_json::Error),

    /// The application handler failed.
    #[error("Handler '{handler}' failed: {reason}")]
    HandlerInvocation { handler: String, reason: String },

    /// The client is not connected.
    #[error("Client not connected")]
    NotConnected,

    /// Invocation input is invalid.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Message-id store failure.
    #[error("Store error: {0}")]
    Store(#[from] std::io::Error),
}

impl MqttError {
    /// Create a publish error.
    pub fn publish(topic: impl Into<String>, reason: impl ToString) -> Self {
        Self::Publish {
            topic: topic.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a subscribe error.
    pub fn subscribe(topic: impl Into<String>, reason: impl ToString) -> Self {
        Self::Subscribe {
            topic: topic.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an unsubscribe error.
    pub fn unsubscribe(topic: impl Into<String>, reason: impl ToString) -> Self {
        Self::Unsubscribe {
            topic: topic.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<CoerceError> for MqttError {
    fn from(err: CoerceError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<MqttError> for TriggerError {
    fn from(err: MqttError) -> Self {
        TriggerError::Other(anyhow::Error::new(err))
    }
}

impl From<MqttError> for ActivityError {
    fn from(err: MqttError) -> Self {
        ActivityError::Other(anyhow::Error::new(err))
    }
}
