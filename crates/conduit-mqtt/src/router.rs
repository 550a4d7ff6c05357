//! Routing of inbound messages to application handlers.

use crate::client::{BrokerClient, InboundMessage, MessageSink};
use crate::error::{MqttError, Result};
use crate::settings::Qos;
use async_trait::async_trait;
use conduit_core::{Attrs, DynHandler};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Handler results published as a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub data: Value,
}

impl ReplyEnvelope {
    /// Extract the reply from handler results. Absent and null `data` mean
    /// no reply.
    pub fn from_results(results: &Attrs) -> Option<Self> {
        match results.get("data") {
            None | Some(Value::Null) => None,
            Some(data) => Some(Self { data: data.clone() }),
        }
    }

    /// Reply body: the JSON encoding of `data`.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.data)?)
    }
}

/// Delivers the messages of one session to its handler and publishes the
/// handler's reply.
pub struct HandlerRouter {
    handler: DynHandler,
    reply_topic: String,
    reply_qos: Qos,
}

impl HandlerRouter {
    pub fn new(handler: DynHandler, reply_topic: impl Into<String>, reply_qos: Qos) -> Self {
        Self {
            handler,
            reply_topic: reply_topic.into(),
            reply_qos,
        }
    }

    /// Handler output for a message: `{"message": <payload as text>}`.
    pub fn trigger_output(message: &InboundMessage) -> Attrs {
        let mut data = Attrs::new();
        data.insert(
            "message".to_string(),
            Value::String(String::from_utf8_lossy(&message.payload).into_owned()),
        );
        data
    }

    /// Run the handler and build the reply body, if any.
    async fn invoke(&self, message: &InboundMessage) -> Result<Option<Vec<u8>>> {
        let results = self
            .handler
            .handle(Self::trigger_output(message))
            .await
            .map_err(|e| MqttError::HandlerInvocation {
                handler: self.handler.name().to_string(),
                reason: e.to_string(),
            })?;

        ReplyEnvelope::from_results(&results)
            .map(|reply| reply.to_payload())
            .transpose()
    }
}

#[async_trait]
impl MessageSink for HandlerRouter {
    async fn on_message(&self, client: &dyn BrokerClient, message: InboundMessage) {
        tracing::debug!(
            "Handler {} received message on {}",
            self.handler.name(),
            message.topic
        );

        let payload = match self.invoke(&message).await {
            Ok(Some(payload)) => payload,
            Ok(None) => return,
            Err(e) => {
                tracing::error!("Failed to handle message on {}: {}", message.topic, e);
                return;
            }
        };

        if self.reply_topic.is_empty() {
            return;
        }

        if let Err(e) = client
            .publish(&self.reply_topic, self.reply_qos, false, payload)
            .await
        {
            tracing::error!("Failed to publish reply for {}: {}", message.topic, e);
        }
    }
}
