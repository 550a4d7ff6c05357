//! End-to-end delivery through `rumqttc` clients against an in-process broker.
//!
//! The broker speaks just enough MQTT 3.1.1 for one trigger session:
//! CONNACK, SUBACK, PUBACK, UNSUBACK and PINGRESP. After acknowledging a
//! subscription it publishes the configured messages at QoS 0.

#![cfg(feature = "mqtt")]

mod common;

use common::{attrs, handler};
use conduit_core::{Attrs, Trigger, TriggerState};
use conduit_mqtt::{MqttTrigger, RumqttcClientFactory, TriggerSettings};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// A publish the broker received.
#[derive(Debug, Clone, PartialEq)]
struct Received {
    connection: usize,
    topic: String,
    payload: String,
}

struct FakeBroker {
    port: u16,
    received: mpsc::UnboundedReceiver<Received>,
}

impl FakeBroker {
    async fn start(topic: &'static str, messages: Vec<&'static str>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, received) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut connection = 0;
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                let messages = messages.clone();
                tokio::spawn(serve(stream, connection, topic, messages, tx));
                connection += 1;
            }
        });

        Self { port, received }
    }

    /// Wait for `count` publishes on `topic`.
    async fn publishes_on(&mut self, topic: &str, count: usize) -> Vec<Received> {
        let mut found = Vec::new();
        while found.len() < count {
            let next = tokio::time::timeout(Duration::from_secs(10), self.received.recv())
                .await
                .expect("broker saw no publish in time")
                .expect("broker stopped");
            if next.topic == topic {
                found.push(next);
            }
        }
        found
    }
}

async fn read_length(stream: &mut TcpStream) -> std::io::Result<usize> {
    let mut length = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await?;
        length |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            return Ok(length);
        }
        shift += 7;
    }
}

fn write_length(packet: &mut Vec<u8>, mut length: usize) {
    loop {
        let mut byte = (length % 128) as u8;
        length /= 128;
        if length > 0 {
            byte |= 0x80;
        }
        packet.push(byte);
        if length == 0 {
            return;
        }
    }
}

fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    body.extend_from_slice(topic.as_bytes());
    body.extend_from_slice(payload);

    let mut packet = vec![0x30];
    write_length(&mut packet, body.len());
    packet.extend(body);
    packet
}

async fn serve(
    mut stream: TcpStream,
    connection: usize,
    topic: &'static str,
    messages: Vec<&'static str>,
    tx: mpsc::UnboundedSender<Received>,
) -> std::io::Result<()> {
    loop {
        let Ok(header) = stream.read_u8().await else {
            return Ok(());
        };
        let length = read_length(&mut stream).await?;
        let mut body = vec![0u8; length];
        stream.read_exact(&mut body).await?;

        match header >> 4 {
            // CONNECT
            1 => stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await?,
            // PUBLISH
            3 => {
                let qos = (header >> 1) & 0x03;
                let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
                let mut offset = 2 + topic_len;
                let received_topic = String::from_utf8_lossy(&body[2..offset]).to_string();
                if qos > 0 {
                    let (hi, lo) = (body[offset], body[offset + 1]);
                    offset += 2;
                    stream.write_all(&[0x40, 0x02, hi, lo]).await?;
                }
                let _ = tx.send(Received {
                    connection,
                    topic: received_topic,
                    payload: String::from_utf8_lossy(&body[offset..]).to_string(),
                });
            }
            // SUBSCRIBE
            8 => {
                stream.write_all(&[0x90, 0x03, body[0], body[1], 0x00]).await?;
                for message in &messages {
                    stream.write_all(&publish_packet(topic, message.as_bytes())).await?;
                }
            }
            // UNSUBSCRIBE
            10 => stream.write_all(&[0xb0, 0x02, body[0], body[1]]).await?,
            // PINGREQ
            12 => stream.write_all(&[0xd0, 0x00]).await?,
            // DISCONNECT
            14 => return Ok(()),
            _ => {}
        }
    }
}

fn trigger_for(broker: &FakeBroker) -> MqttTrigger {
    let settings = TriggerSettings::from_settings(&attrs(json!({
        "broker": format!("tcp://127.0.0.1:{}", broker.port),
        "id": "delivery",
        "qos": 1
    })))
    .unwrap();
    MqttTrigger::new("delivery", settings, Arc::new(RumqttcClientFactory))
}

#[tokio::test]
async fn test_replies_follow_message_order() {
    let mut broker = FakeBroker::start("sensors/in", vec!["1", "2", "3"]).await;
    let mut trigger = trigger_for(&broker);

    let times_ten = handler("sensors", "sensors/in", "sensors/out", |data| async move {
        let n: i64 = data["message"]
            .as_str()
            .and_then(|m| m.parse().ok())
            .unwrap_or_default();
        let mut results = Attrs::new();
        results.insert("data".into(), json!(n * 10));
        Ok(results)
    });

    trigger.initialize(vec![times_ten]).await.unwrap();
    trigger.start().await.unwrap();

    // Each QoS 1 reply is acknowledged before the next message is handled.
    let replies = broker.publishes_on("sensors/out", 3).await;
    let payloads: Vec<_> = replies.iter().map(|r| r.payload.as_str()).collect();
    assert_eq!(payloads, vec!["10", "20", "30"]);

    // Replies go out on the session that received the messages.
    assert!(replies.iter().all(|r| r.connection == 0));

    trigger.stop().await.unwrap();
    assert_eq!(trigger.state(), TriggerState::Stopped);
    assert!(!trigger.sessions()[0].client.is_connected());
}

#[tokio::test]
async fn test_handler_without_reply_topic_publishes_nothing() {
    let mut broker = FakeBroker::start("cmd/in", vec!["a", "b"]).await;
    let mut trigger = trigger_for(&broker);

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let recorder = handler("cmd", "cmd/in", "", move |data| {
        let seen_tx = seen_tx.clone();
        async move {
            let _ = seen_tx.send(data["message"].clone());
            Ok(Attrs::new())
        }
    });

    trigger.initialize(vec![recorder]).await.unwrap();
    trigger.start().await.unwrap();

    for expected in ["a", "b"] {
        let message = tokio::time::timeout(Duration::from_secs(10), seen_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message, json!(expected));
    }

    trigger.stop().await.unwrap();
    assert!(broker.received.try_recv().is_err());
}
