//! Typed trigger, handler and activity settings.

use crate::error::{MqttError, Result};
use crate::options::ConnectionSettings;
use conduit_core::coerce::{self, Attrs};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// MQTT quality of service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Qos {
    /// Fire and forget.
    #[default]
    AtMostOnce = 0,
    /// Acknowledged delivery.
    AtLeastOnce = 1,
    /// Assured delivery.
    ExactlyOnce = 2,
}

impl Qos {
    /// Map a numeric level to a QoS.
    pub fn from_level(level: i64) -> Option<Self> {
        match level {
            0 => Some(Self::AtMostOnce),
            1 => Some(Self::AtLeastOnce),
            2 => Some(Self::ExactlyOnce),
            _ => None,
        }
    }

    /// Numeric level of the QoS.
    pub fn level(self) -> u8 {
        self as u8
    }

    /// Read a QoS setting, defaulting to [`Qos::AtMostOnce`].
    pub fn from_settings(settings: &Attrs, name: &str) -> std::result::Result<Self, String> {
        let level = coerce::get_int(settings, name, 0).map_err(|e| e.to_string())?;
        Self::from_level(level).ok_or_else(|| format!("Invalid QoS level {} for '{}'", level, name))
    }
}

impl From<Qos> for u8 {
    fn from(qos: Qos) -> Self {
        qos.level()
    }
}

impl TryFrom<u8> for Qos {
    type Error = String;

    fn try_from(level: u8) -> std::result::Result<Self, Self::Error> {
        Self::from_level(i64::from(level)).ok_or_else(|| format!("Invalid QoS level {}", level))
    }
}

/// Trigger level settings.
#[derive(Debug, Clone)]
pub struct TriggerSettings {
    /// Connection settings shared by every session.
    pub connection: ConnectionSettings,

    /// QoS of reply publishes.
    pub reply_qos: Qos,
}

impl TriggerSettings {
    pub fn from_settings(settings: &Attrs) -> Result<Self> {
        Ok(Self {
            connection: ConnectionSettings::from_settings(settings)?,
            reply_qos: Qos::from_settings(settings, "qos").map_err(MqttError::Config)?,
        })
    }
}

/// Settings of one handler binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerSettings {
    /// Subscription topic filter.
    pub topic: String,

    /// Subscription QoS.
    pub qos: Qos,

    /// Destination of replies. Empty means no reply is published.
    pub reply_topic: String,
}

impl HandlerSettings {
    pub fn from_settings(settings: &Attrs) -> Result<Self> {
        let topic = coerce::get_string(settings, "topic")?;
        if topic.is_empty() {
            return Err(MqttError::Config("handler topic must not be empty".into()));
        }

        Ok(Self {
            topic,
            qos: Qos::from_settings(settings, "qos").map_err(MqttError::Config)?,
            reply_topic: coerce::get_string(settings, "replyTopic")?,
        })
    }
}

/// Publish activity settings.
#[derive(Debug, Clone)]
pub struct ActivitySettings {
    /// Publish through a connection lent by the host.
    pub shared_connection: bool,

    /// Grace period of the disconnect after a dedicated publish.
    pub close: Duration,

    /// Dedicated connection settings, absent for shared connections.
    pub connection: Option<ConnectionSettings>,
}

impl ActivitySettings {
    pub fn from_settings(settings: &Attrs) -> Result<Self> {
        let shared_connection = coerce::require_bool(settings, "sharedconnection")?;
        let close = Duration::from_millis(coerce::get_u64(settings, "close", 0)?);

        let connection = if shared_connection {
            None
        } else {
            Some(ConnectionSettings::from_settings(settings)?)
        };

        Ok(Self {
            shared_connection,
            close,
            connection,
        })
    }
}

/// Inputs of one publish invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishInput {
    pub topic: String,
    pub qos: Qos,
    pub message: Value,
}

impl PublishInput {
    /// Read publish inputs.
    pub fn from_inputs(inputs: &Attrs) -> Result<Self> {
        let topic = coerce::get_string(inputs, "topic")
            .map_err(|e| MqttError::InvalidInput(e.to_string()))?;
        if topic.is_empty() {
            return Err(MqttError::InvalidInput("topic must not be empty".into()));
        }

        let qos = Qos::from_settings(inputs, "qos").map_err(MqttError::InvalidInput)?;

        Ok(Self {
            topic,
            qos,
            message: inputs.get("message").cloned().unwrap_or(Value::Null),
        })
    }

    /// Message body as sent on the wire.
    ///
    /// Strings are sent verbatim, null as an empty body and anything else as
    /// JSON.
    pub fn payload(&self) -> Result<Vec<u8>> {
        Ok(match &self.message {
            Value::Null => Vec::new(),
            Value::String(s) => s.as_bytes().to_vec(),
            other => serde_json::to_vec(other)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Attrs {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_qos_levels() {
        assert_eq!(Qos::from_level(1), Some(Qos::AtLeastOnce));
        assert_eq!(Qos::from_level(3), None);
        assert_eq!(Qos::ExactlyOnce.level(), 2);
        assert_eq!(Qos::default(), Qos::AtMostOnce);

        assert_eq!(serde_json::to_value(Qos::AtLeastOnce).unwrap(), json!(1));
        assert!(serde_json::from_value::<Qos>(json!(5)).is_err());
    }

    #[test]
    fn test_qos_setting_accepts_strings() {
        let s = attrs(json!({"qos": "2"}));
        assert_eq!(Qos::from_settings(&s, "qos").unwrap(), Qos::ExactlyOnce);
        assert_eq!(Qos::from_settings(&Attrs::new(), "qos").unwrap(), Qos::AtMostOnce);
        assert!(Qos::from_settings(&attrs(json!({"qos": 7})), "qos").is_err());
    }

    #[test]
    fn test_trigger_settings() {
        let s = TriggerSettings::from_settings(&attrs(json!({
            "broker": "tcp://localhost:1883",
            "qos": 1
        })))
        .unwrap();
        assert_eq!(s.reply_qos, Qos::AtLeastOnce);
        assert_eq!(s.connection.broker, "tcp://localhost:1883");
    }

    #[test]
    fn test_handler_settings() {
        let s = HandlerSettings::from_settings(&attrs(json!({
            "topic": "sensors/in",
            "qos": "1",
            "replyTopic": "sensors/out"
        })))
        .unwrap();
        assert_eq!(s.topic, "sensors/in");
        assert_eq!(s.qos, Qos::AtLeastOnce);
        assert_eq!(s.reply_topic, "sensors/out");

        let err = HandlerSettings::from_settings(&attrs(json!({"qos": 0}))).unwrap_err();
        assert!(matches!(err, MqttError::Config(_)));
    }

    #[test]
    fn test_activity_settings() {
        let s = ActivitySettings::from_settings(&attrs(json!({
            "sharedconnection": true,
            "close": 250
        })))
        .unwrap();
        assert!(s.shared_connection);
        assert_eq!(s.close, Duration::from_millis(250));
        assert!(s.connection.is_none());

        let s = ActivitySettings::from_settings(&attrs(json!({
            "sharedconnection": "false",
            "broker": "localhost"
        })))
        .unwrap();
        assert!(s.connection.is_some());
        assert_eq!(s.close, Duration::ZERO);

        assert!(ActivitySettings::from_settings(&attrs(json!({"broker": "localhost"}))).is_err());
    }

    #[test]
    fn test_publish_input() {
        let input = PublishInput::from_inputs(&attrs(json!({
            "topic": "a/b",
            "qos": 1,
            "message": "hello"
        })))
        .unwrap();
        assert_eq!(input.qos, Qos::AtLeastOnce);
        assert_eq!(input.payload().unwrap(), b"hello".to_vec());

        let input = PublishInput::from_inputs(&attrs(json!({
            "topic": "a/b",
            "message": {"v": 1}
        })))
        .unwrap();
        assert_eq!(input.payload().unwrap(), br#"{"v":1}"#.to_vec());

        let input = PublishInput::from_inputs(&attrs(json!({"topic": "a/b"}))).unwrap();
        assert!(input.payload().unwrap().is_empty());
    }

    #[test]
    fn test_publish_input_rejects_bad_values() {
        let err = PublishInput::from_inputs(&attrs(json!({"topic": ""}))).unwrap_err();
        assert!(matches!(err, MqttError::InvalidInput(_)));

        let err = PublishInput::from_inputs(&attrs(json!({"topic": "a", "qos": 3}))).unwrap_err();
        assert!(matches!(err, MqttError::InvalidInput(_)));
    }
}
