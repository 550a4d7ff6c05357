//! Connector metadata descriptors.
//!
//! Triggers and activities describe the settings, inputs and outputs they
//! understand so that hosts can validate configuration and render editors
//! without knowing the connector.

use serde::{Deserialize, Serialize};

/// Value type of a described field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Integer,
    Boolean,
    Any,
    Object,
    Connection,
}

impl DataType {
    /// Get the data type as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Any => "any",
            Self::Object => "object",
            Self::Connection => "connection",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single described field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Field name as it appears in settings maps.
    pub name: String,

    /// Value type.
    #[serde(rename = "type")]
    pub data_type: DataType,

    /// Whether the host must provide the field.
    #[serde(default)]
    pub required: bool,
}

impl Field {
    /// Create an optional field.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            required: false,
        }
    }

    /// Create a required field.
    pub fn required(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            required: true,
            ..Self::new(name, data_type)
        }
    }
}

/// Metadata describing a trigger or an activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Connector level settings.
    #[serde(default)]
    pub settings: Vec<Field>,

    /// Per handler settings (triggers only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub handler_settings: Vec<Field>,

    /// Invocation inputs (activities only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<Field>,

    /// Values produced for handlers or callers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<Field>,

    /// Values a handler may return as a reply (triggers only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reply: Vec<Field>,
}

impl Metadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connector settings.
    pub fn with_settings(mut self, settings: Vec<Field>) -> Self {
        self.settings = settings;
        self
    }

    /// Set the handler settings.
    pub fn with_handler_settings(mut self, settings: Vec<Field>) -> Self {
        self.handler_settings = settings;
        self
    }

    /// Set the inputs.
    pub fn with_inputs(mut self, inputs: Vec<Field>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Set the outputs.
    pub fn with_outputs(mut self, outputs: Vec<Field>) -> Self {
        self.outputs = outputs;
        self
    }

    /// Set the reply fields.
    pub fn with_reply(mut self, reply: Vec<Field>) -> Self {
        self.reply = reply;
        self
    }

    /// Names of the required connector settings.
    pub fn required_settings(&self) -> impl Iterator<Item = &str> {
        self.settings
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
    }

    /// Report the first required setting missing from `settings`.
    pub fn check_required(&self, settings: &crate::Attrs) -> Result<(), crate::CoerceError> {
        match self
            .required_settings()
            .find(|name| settings.get(*name).map_or(true, |v| v.is_null()))
        {
            Some(name) => Err(crate::CoerceError::Missing(name.to_string())),
            None => Ok(()),
        }
    }
}
