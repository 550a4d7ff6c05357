//! Error types shared by every connector.
//!
//! Each layer owns its own enum. Connector crates keep their richer error
//! types and surface them through the `Other` variants, so a host can still
//! downcast to the concrete error with [`anyhow::Error::downcast_ref`].

/// A settings value could not be coerced into the requested type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoerceError {
    /// The value has a type that cannot represent the target.
    #[error("Cannot coerce {value} to {target}")]
    Incompatible { value: String, target: &'static str },

    /// A required setting is missing.
    #[error("Missing required setting: {0}")]
    Missing(String),

    /// A setting is present but invalid.
    #[error("Invalid value for setting '{name}': {reason}")]
    Invalid { name: String, reason: String },
}

impl CoerceError {
    pub(crate) fn incompatible(value: &serde_json::Value, target: &'static str) -> Self {
        Self::Incompatible {
            value: value.to_string(),
            target,
        }
    }

    /// Attach the setting name to a coercion failure.
    pub fn for_setting(self, name: &str) -> Self {
        match self {
            Self::Incompatible { value, target } => Self::Invalid {
                name: name.to_string(),
                reason: format!("cannot coerce {} to {}", value, target),
            },
            other => other,
        }
    }
}

/// Trigger lifecycle error types.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    /// Lifecycle method called in the wrong state.
    #[error("Trigger {trigger} cannot {operation} while {state}")]
    InvalidState {
        trigger: String,
        operation: &'static str,
        state: String,
    },

    /// Settings could not be read.
    #[error("Invalid trigger settings: {0}")]
    Settings(#[from] CoerceError),

    /// Connector specific failure.
    #[error("Trigger error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Activity error types.
#[derive(Debug, thiserror::Error)]
pub enum ActivityError {
    /// Inputs could not be read.
    #[error("Invalid activity input: {0}")]
    Input(#[from] CoerceError),

    /// Connector specific failure.
    #[error("Activity error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Error returned by an application handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The action behind the handler failed.
    #[error("Action failed: {0}")]
    ActionFailed(String),

    /// Other error.
    #[error("Handler error: {0}")]
    Other(#[from] anyhow::Error),
}
