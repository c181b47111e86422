//! Streaming ingester (C6): bus-agnostic consumption of the telemetry
//! topics, with batched live-feed persistence and raw-latest upserts
//! (§4.6).
//!
//! The bus client itself is a small trait so the ingester never depends on
//! a specific transport; the shipped implementation is backed by
//! `async-nats` (grounded on `sx9-nats-router`'s subscribe/ack idiom), and
//! an in-memory channel implementation exists for tests. Batching-by-
//! count-or-idle is grounded on the teacher's `background/self_healer.rs`
//! interval-loop shape.

pub mod nats_bus;

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::defaults::{STREAM_BATCH_SIZE, STREAM_IDLE_FLUSH_MILLIS};
use crate::storage::{LiveFeedEntry, StateStore};

/// One message pulled off the bus: its topic, an opaque ack handle, and the
/// raw bytes (decoded as JSON by the ingester, not the bus).
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub ack_token: u64,
}

/// Bus-agnostic subscribe/ack/close surface (§4.6).
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn subscribe(&self, topics: &[&str]) -> anyhow::Result<()>;
    /// Pull the next available message, or `None` if none arrived before
    /// the given timeout.
    async fn next(&self, timeout: Duration) -> Option<BusMessage>;
    async fn ack(&self, ack_token: u64) -> anyhow::Result<()>;
    async fn close(&self) -> anyhow::Result<()>;
}

const TOPICS: [&str; 5] = [
    "power_demand",
    "aqi_stream",
    "traffic_events",
    "grid_alerts",
    "incident_text",
];

/// Decode a message payload as JSON, falling back to a `{raw: <string>}`
/// wrapper on parse failure (§4.6 step 1).
fn decode_payload(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap_or_else(|_| {
        serde_json::json!({ "raw": String::from_utf8_lossy(bytes).to_string() })
    })
}

/// Route a topic (and, for `aqi_stream`, the decoded payload's `type`
/// field) to its raw-latest collection (§4.6 step 3).
fn raw_collection_for(topic: &str, payload: &Value) -> &'static str {
    match topic {
        "aqi_stream" => {
            if payload.get("type").and_then(Value::as_str) == Some("weather") {
                "raw_weather"
            } else {
                "raw_aqi"
            }
        }
        "traffic_events" => "raw_traffic",
        "power_demand" => "raw_power_demand",
        "grid_alerts" => "raw_grid_alerts",
        "incident_text" => "raw_311",
        other => other,
    }
}

fn extract_ids(payload: &Value) -> (String, String) {
    let city_id = payload
        .get("city_id")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let zone_id = payload
        .get("zone_id")
        .and_then(Value::as_str)
        .unwrap_or(crate::types::SYSTEM_ZONE)
        .to_string();
    (city_id, zone_id)
}

pub struct StreamingIngester<B: MessageBus> {
    bus: B,
    store: StateStore,
}

impl<B: MessageBus> StreamingIngester<B> {
    pub fn new(bus: B, store: StateStore) -> Self {
        Self { bus, store }
    }

    /// Run the ingest loop until `cancel` fires, flushing any pending batch
    /// before returning (§4.6 cancellation).
    pub async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        self.bus.subscribe(&TOPICS).await?;
        let idle = Duration::from_millis(STREAM_IDLE_FLUSH_MILLIS);
        let mut batch: Vec<LiveFeedEntry> = Vec::with_capacity(STREAM_BATCH_SIZE);

        loop {
            if cancel.is_cancelled() {
                self.flush(&mut batch)?;
                self.bus.close().await?;
                return Ok(());
            }

            let message = tokio::select! {
                _ = cancel.cancelled() => {
                    self.flush(&mut batch)?;
                    self.bus.close().await?;
                    return Ok(());
                }
                message = self.bus.next(idle) => message,
            };

            match message {
                Some(message) => {
                    self.ingest_one(&message, &mut batch)?;
                    self.bus.ack(message.ack_token).await?;
                    if batch.len() >= STREAM_BATCH_SIZE {
                        self.flush(&mut batch)?;
                    }
                }
                None => self.flush(&mut batch)?,
            }
        }
    }

    fn ingest_one(&self, message: &BusMessage, batch: &mut Vec<LiveFeedEntry>) -> anyhow::Result<()> {
        let payload = decode_payload(&message.payload);
        let now = Utc::now();

        batch.push(LiveFeedEntry {
            topic: message.topic.clone(),
            ts: now,
            payload: payload.clone(),
        });

        let collection = raw_collection_for(&message.topic, &payload);
        let (city_id, zone_id) = extract_ids(&payload);
        self.store
            .upsert_raw_latest(collection, &city_id, &zone_id, &payload, now, now)?;

        Ok(())
    }

    fn flush(&self, batch: &mut Vec<LiveFeedEntry>) -> anyhow::Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.store.append_live_feed(batch)?;
        batch.clear();
        Ok(())
    }
}

#[cfg(test)]
pub mod test_bus {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// In-memory `MessageBus` for tests: a channel of pre-loaded messages,
    /// consumed in order, with acks recorded for assertions.
    pub struct InMemoryBus {
        rx: Mutex<mpsc::Receiver<BusMessage>>,
        pub acked: Mutex<Vec<u64>>,
    }

    impl InMemoryBus {
        pub fn new(messages: Vec<BusMessage>) -> (Self, mpsc::Sender<BusMessage>) {
            let (tx, rx) = mpsc::channel(messages.len().max(1) + 1);
            for message in messages {
                tx.try_send(message).expect("test channel capacity");
            }
            (
                Self {
                    rx: Mutex::new(rx),
                    acked: Mutex::new(Vec::new()),
                },
                tx,
            )
        }
    }

    #[async_trait]
    impl MessageBus for InMemoryBus {
        async fn subscribe(&self, _topics: &[&str]) -> anyhow::Result<()> {
            Ok(())
        }

        async fn next(&self, timeout: Duration) -> Option<BusMessage> {
            let mut rx = self.rx.lock().unwrap();
            tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
        }

        async fn ack(&self, ack_token: u64) -> anyhow::Result<()> {
            self.acked.lock().unwrap().push(ack_token);
            Ok(())
        }

        async fn close(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_bus::InMemoryBus;
    use super::*;

    fn msg(topic: &str, payload: serde_json::Value, token: u64) -> BusMessage {
        BusMessage {
            topic: topic.to_string(),
            payload: serde_json::to_vec(&payload).unwrap(),
            ack_token: token,
        }
    }

    #[test]
    fn aqi_stream_routes_by_payload_type() {
        let weather = serde_json::json!({"type": "weather"});
        let aqi = serde_json::json!({"type": "pollutant"});
        assert_eq!(raw_collection_for("aqi_stream", &weather), "raw_weather");
        assert_eq!(raw_collection_for("aqi_stream", &aqi), "raw_aqi");
    }

    #[test]
    fn other_topics_map_one_to_one() {
        assert_eq!(raw_collection_for("traffic_events", &Value::Null), "raw_traffic");
        assert_eq!(raw_collection_for("power_demand", &Value::Null), "raw_power_demand");
        assert_eq!(raw_collection_for("grid_alerts", &Value::Null), "raw_grid_alerts");
        assert_eq!(raw_collection_for("incident_text", &Value::Null), "raw_311");
    }

    #[test]
    fn malformed_payload_wraps_as_raw_string() {
        let decoded = decode_payload(b"not json");
        assert_eq!(decoded["raw"], "not json");
    }

    #[tokio::test]
    async fn scenario_s5_keeps_only_the_newest_raw_aqi_per_zone() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(1);
        let t2 = t0 + chrono::Duration::seconds(2);
        let messages = vec![
            msg("aqi_stream", serde_json::json!({"city_id": "nyc", "zone_id": "Z_002", "ts": t0, "aqi": 40}), 1),
            msg("aqi_stream", serde_json::json!({"city_id": "nyc", "zone_id": "Z_002", "ts": t1, "aqi": 55}), 2),
            msg("aqi_stream", serde_json::json!({"city_id": "nyc", "zone_id": "Z_002", "ts": t2, "aqi": 70}), 3),
        ];
        let (bus, _tx) = InMemoryBus::new(messages);
        let ingester = StreamingIngester::new(bus, store.clone());

        let cancel = CancellationToken::new();
        let child = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            child.cancel();
        });
        ingester.run(cancel).await.unwrap();

        let bundles = store.read_raw_latest("nyc").unwrap();
        assert_eq!(bundles.len(), 1);
        let aqi = bundles.get("Z_002").unwrap().aqi.clone().unwrap();
        assert_eq!(aqi["aqi"], 70);
        assert_eq!(ingester.bus.acked.lock().unwrap().len(), 3);
    }
}
