//! NATS JetStream-backed [`MessageBus`] (§4.6). Grounded on
//! `examples/cp5337-sx9/crates/sx9-nats-router`'s `async_nats::connect` +
//! `subscribe` + `Message` idiom, adapted to a pull consumer so messages
//! can be acked individually as the contract requires.

use std::sync::Mutex;
use std::time::Duration;

use async_nats::jetstream::consumer::PullConsumer;
use async_nats::jetstream::{self, Message as JsMessage};
use async_trait::async_trait;
use futures::StreamExt;

use super::{BusMessage, MessageBus};

const STREAM_NAME: &str = "URBAN_GRID_TELEMETRY";
const CONSUMER_NAME: &str = "urban-grid-ingester";

pub struct NatsBus {
    jetstream: jetstream::Context,
    consumer: Mutex<Option<PullConsumer>>,
    pending: Mutex<std::collections::HashMap<u64, JsMessage>>,
    next_token: std::sync::atomic::AtomicU64,
}

impl NatsBus {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = async_nats::connect(url).await?;
        let jetstream = jetstream::new(client);
        Ok(Self {
            jetstream,
            consumer: Mutex::new(None),
            pending: Mutex::new(std::collections::HashMap::new()),
            next_token: std::sync::atomic::AtomicU64::new(1),
        })
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn subscribe(&self, topics: &[&str]) -> anyhow::Result<()> {
        let subjects: Vec<String> = topics.iter().map(|t| t.to_string()).collect();
        let stream = self
            .jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: STREAM_NAME.to_string(),
                subjects,
                ..Default::default()
            })
            .await?;

        let consumer = stream
            .get_or_create_consumer(
                CONSUMER_NAME,
                jetstream::consumer::pull::Config {
                    durable_name: Some(CONSUMER_NAME.to_string()),
                    ..Default::default()
                },
            )
            .await?;

        *self.consumer.lock().unwrap_or_else(|e| e.into_inner()) = Some(consumer);
        Ok(())
    }

    async fn next(&self, timeout: Duration) -> Option<BusMessage> {
        let consumer = self.consumer.lock().ok()?.clone()?;
        let mut messages = consumer.messages().await.ok()?;
        let message = tokio::time::timeout(timeout, messages.next()).await.ok()??.ok()?;

        let token = self.next_token.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let topic = message.subject.to_string();
        let payload = message.payload.to_vec();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(token, message);

        Some(BusMessage {
            topic,
            payload,
            ack_token: token,
        })
    }

    async fn ack(&self, ack_token: u64) -> anyhow::Result<()> {
        let message = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&ack_token);
        if let Some(message) = message {
            message.ack().await.map_err(|e| anyhow::anyhow!(e))?;
        }
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
