//! State store adapter (C2): typed access to per-zone snapshots, alerts,
//! raw-topic latest, and processing summaries, backed by a single sled
//! database with one named tree per logical collection (§3, §4.2, §6).
//!
//! Grounded on the teacher's `storage/mod.rs` / `storage/history.rs`:
//! a single `Arc<sled::Db>` handle, big-endian timestamp keys for natural
//! chronological sort, JSON-serialized values, `.iter().rev()` for
//! newest-first reads.

pub mod sanitize;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{Alert, AlertLevel, ProcessingSummary, ZoneSnapshot};

const SEP: u8 = 0x00;

fn ts_be_bytes(ts: DateTime<Utc>) -> [u8; 8] {
    (ts.timestamp_nanos_opt().unwrap_or(0) as u64).to_be_bytes()
}

fn ts_from_be_bytes(bytes: &[u8]) -> DateTime<Utc> {
    let mut buf = [0u8; 8];
    let len = bytes.len().min(8);
    buf[..len].copy_from_slice(&bytes[..len]);
    let nanos = u64::from_be_bytes(buf) as i64;
    Utc.timestamp_nanos(nanos)
}

/// Fused raw-latest view for one zone, combining the three streamed topics
/// C5's bus-fed path reads (§4.2, `ReadRawLatest`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawLatestBundle {
    pub weather: Option<serde_json::Value>,
    pub aqi: Option<serde_json::Value>,
    pub traffic: Option<serde_json::Value>,
}

/// A single entry in the time-ordered live feed (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveFeedEntry {
    pub topic: String,
    pub ts: DateTime<Utc>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRun {
    pub run_id: String,
    pub session_id: String,
    pub city_id: String,
    pub ts: DateTime<Utc>,
    pub user_message: String,
    pub assistant_reply: String,
    pub trace: serde_json::Value,
}

/// Typed access to the persisted state layout in §6. Cheap to clone: all
/// handles share the same underlying `sled::Db`.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<sled::Db>,
}

impl StateStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self { db: Arc::new(db) })
    }

    fn tree(&self, name: &str) -> Result<sled::Tree, StoreError> {
        Ok(self.db.open_tree(name)?)
    }

    // -- snapshots ---------------------------------------------------

    pub fn write_snapshot(&self, snapshot: &ZoneSnapshot) -> Result<(), StoreError> {
        let tree = self.tree("snapshots")?;
        let mut key = Vec::with_capacity(snapshot.city_id.len() + snapshot.zone_id.len() + 10);
        key.extend_from_slice(snapshot.city_id.as_bytes());
        key.push(SEP);
        key.extend_from_slice(snapshot.zone_id.as_bytes());
        key.push(SEP);
        key.extend_from_slice(&ts_be_bytes(snapshot.timestamp));
        let value = serde_json::to_vec(snapshot)?;
        tree.insert(key, value)?;
        Ok(())
    }

    /// Returns at most one snapshot per zone - the most recent by
    /// timestamp - ordered by zone id (§4.2, §8 property 3).
    pub fn latest_snapshots(
        &self,
        city_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ZoneSnapshot>, StoreError> {
        let tree = self.tree("snapshots")?;
        let mut prefix = city_id.as_bytes().to_vec();
        prefix.push(SEP);

        let mut by_zone: HashMap<String, ZoneSnapshot> = HashMap::new();
        for item in tree.scan_prefix(&prefix) {
            let (_, value) = item?;
            let snapshot: ZoneSnapshot = serde_json::from_slice(&value)?;
            // Keys within a city are ordered by (zone_id, timestamp), so the
            // last entry seen per zone in forward iteration order is always
            // the maximum-timestamp one for that zone.
            by_zone.insert(snapshot.zone_id.clone(), snapshot);
        }

        let mut result: Vec<ZoneSnapshot> = by_zone.into_values().collect();
        result.sort_by(|a, b| a.zone_id.cmp(&b.zone_id));
        if let Some(limit) = limit {
            result.truncate(limit);
        }
        Ok(result)
    }

    // -- alerts --------------------------------------------------------

    pub fn insert_alerts(&self, alerts: &[Alert]) -> Result<(), StoreError> {
        let tree = self.tree("alerts")?;
        for alert in alerts {
            let mut key = ts_be_bytes(alert.ts).to_vec();
            key.extend_from_slice(Uuid::new_v4().as_bytes());
            let value = serde_json::to_vec(alert)?;
            tree.insert(key, value)?;
        }
        Ok(())
    }

    pub fn query_alerts(
        &self,
        city_id: Option<&str>,
        zone_id: Option<&str>,
        level: Option<AlertLevel>,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Alert>, StoreError> {
        let tree = self.tree("alerts")?;
        let mut out = Vec::with_capacity(limit.min(256));
        for item in tree.iter().rev() {
            if out.len() >= limit {
                break;
            }
            let (key, value) = item?;
            if let Some(since) = since {
                if ts_from_be_bytes(&key) < since {
                    continue;
                }
            }
            let alert: Alert = serde_json::from_slice(&value)?;
            if let Some(city_id) = city_id {
                if alert.city_id != city_id {
                    continue;
                }
            }
            if let Some(zone_id) = zone_id {
                if alert.zone_id != zone_id {
                    continue;
                }
            }
            if let Some(level) = level {
                if alert.level != level {
                    continue;
                }
            }
            out.push(alert);
        }
        Ok(out)
    }

    // -- raw latest ------------------------------------------------------

    fn raw_latest_key(city_id: &str, zone_id: &str) -> Vec<u8> {
        let mut key = city_id.as_bytes().to_vec();
        key.push(SEP);
        key.extend_from_slice(zone_id.as_bytes());
        key
    }

    /// Replace the unique `(city_id, zone_id)` row within `collection`
    /// (one of `raw_weather`, `raw_aqi`, `raw_traffic`, `raw_power_demand`,
    /// `raw_grid_alerts`, `raw_311`) (§4.2, §4.6, §8 property 4).
    pub fn upsert_raw_latest(
        &self,
        collection: &str,
        city_id: &str,
        zone_id: &str,
        payload: &serde_json::Value,
        ts: DateTime<Utc>,
        ingested_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let tree = self.tree(collection)?;
        let record = crate::types::RawLatest {
            city_id: city_id.to_string(),
            zone_id: zone_id.to_string(),
            topic: collection.to_string(),
            ts,
            ingested_at,
            payload: sanitize::clean(payload),
        };
        let key = Self::raw_latest_key(city_id, zone_id);
        tree.insert(key, serde_json::to_vec(&record)?)?;
        Ok(())
    }

    /// Fused weather/AQI/traffic raw-latest view per zone for a city,
    /// consumed by `process_city_from_stream` (§4.2, §4.5).
    pub fn read_raw_latest(
        &self,
        city_id: &str,
    ) -> Result<HashMap<String, RawLatestBundle>, StoreError> {
        let mut prefix = city_id.as_bytes().to_vec();
        prefix.push(SEP);

        let mut bundles: HashMap<String, RawLatestBundle> = HashMap::new();
        for (collection, pick) in [
            ("raw_weather", 0),
            ("raw_aqi", 1),
            ("raw_traffic", 2),
        ] {
            let tree = self.tree(collection)?;
            for item in tree.scan_prefix(&prefix) {
                let (_, value) = item?;
                let record: crate::types::RawLatest = serde_json::from_slice(&value)?;
                let bundle = bundles.entry(record.zone_id.clone()).or_default();
                match pick {
                    0 => bundle.weather = Some(record.payload),
                    1 => bundle.aqi = Some(record.payload),
                    _ => bundle.traffic = Some(record.payload),
                }
            }
        }
        Ok(bundles)
    }

    // -- live feed ---------------------------------------------------

    pub fn append_live_feed(&self, entries: &[LiveFeedEntry]) -> Result<(), StoreError> {
        let tree = self.tree("live_feed")?;
        for entry in entries {
            let mut key = ts_be_bytes(entry.ts).to_vec();
            key.extend_from_slice(Uuid::new_v4().as_bytes());
            tree.insert(key, serde_json::to_vec(entry)?)?;
        }
        Ok(())
    }

    // -- processing summaries -----------------------------------------

    pub fn write_processing_summary(&self, summary: &ProcessingSummary) -> Result<(), StoreError> {
        let tree = self.tree("processing_summaries")?;
        let key = ts_be_bytes(summary.timestamp);
        tree.insert(key, serde_json::to_vec(summary)?)?;
        Ok(())
    }

    // -- agent runs (observability / replay) --------------------------

    pub fn write_agent_run(&self, run: &AgentRun) -> Result<(), StoreError> {
        let tree = self.tree("agent_runs")?;
        let key = run.run_id.as_bytes().to_vec();
        tree.insert(key, serde_json::to_vec(run)?)?;
        Ok(())
    }

    pub fn get_agent_run(&self, run_id: &str) -> Result<Option<AgentRun>, StoreError> {
        let tree = self.tree("agent_runs")?;
        match tree.get(run_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn list_agent_runs(&self, limit: usize) -> Result<Vec<AgentRun>, StoreError> {
        let tree = self.tree("agent_runs")?;
        let mut out = Vec::with_capacity(limit.min(256));
        for item in tree.iter().rev() {
            if out.len() >= limit {
                break;
            }
            let (_, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;
    use serde_json::json;

    fn sample_snapshot(city: &str, zone: &str, ts: DateTime<Utc>) -> ZoneSnapshot {
        ZoneSnapshot {
            city_id: city.to_string(),
            zone_id: zone.to_string(),
            timestamp: ts,
            raw: RawRecord {
                weather: WeatherSignal {
                    source: "synthetic".into(),
                    timestamp: ts,
                    location: Location { lat: 0.0, lon: 0.0 },
                    temperature_c: 20.0,
                    humidity_pct: 50.0,
                    wind_mps: 1.0,
                    description: "clear".into(),
                },
                aqi: AqiSignal {
                    source: "synthetic".into(),
                    timestamp: ts,
                    location: Location { lat: 0.0, lon: 0.0 },
                    aqi: 50.0,
                    pm2_5: None,
                    pm10: None,
                    o3: None,
                    no2: None,
                },
                traffic: TrafficSignal {
                    source: "synthetic".into(),
                    timestamp: ts,
                    location: Location { lat: 0.0, lon: 0.0 },
                    current_speed_kmh: 40.0,
                    free_flow_speed_kmh: 50.0,
                    congestion: Congestion::Free,
                },
                grid_priority: 2,
            },
            analytics: Analytics {
                demand_forecast: DemandForecast {
                    next_hour_kwh: 600.0,
                    confidence: 0.6,
                    model: "synthetic".into(),
                    factors: vec![],
                },
                anomaly_detection: AnomalyDetection {
                    is_anomaly: false,
                    anomaly_score: 0.0,
                    current_demand: 600.0,
                    baseline_mean: 600.0,
                    threshold: 2.0,
                },
                risk_score: RiskScore {
                    score: 20.0,
                    level: Level::Low,
                    factors: vec![],
                },
                resilience_score: ResilienceScore {
                    score: 80.0,
                    level: Level::High,
                },
                aqi_prediction: AqiPrediction {
                    next_hour_aqi: 50.0,
                    factors: vec![],
                },
            },
            recommendations: vec![],
        }
    }

    #[test]
    fn write_then_latest_round_trips_numeric_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let ts = Utc::now();
        let snap = sample_snapshot("nyc", "Z_001", ts);
        store.write_snapshot(&snap).unwrap();

        let latest = store.latest_snapshots("nyc", None).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].analytics.risk_score.score, 20.0);
    }

    #[test]
    fn latest_snapshots_keeps_only_max_timestamp_per_zone() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(60);

        let mut older = sample_snapshot("nyc", "Z_001", t0);
        older.analytics.risk_score.score = 10.0;
        let mut newer = sample_snapshot("nyc", "Z_001", t1);
        newer.analytics.risk_score.score = 90.0;

        store.write_snapshot(&older).unwrap();
        store.write_snapshot(&newer).unwrap();

        let latest = store.latest_snapshots("nyc", None).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].analytics.risk_score.score, 90.0);
    }

    #[test]
    fn latest_snapshots_orders_by_zone_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let ts = Utc::now();
        store.write_snapshot(&sample_snapshot("nyc", "Z_003", ts)).unwrap();
        store.write_snapshot(&sample_snapshot("nyc", "Z_001", ts)).unwrap();
        store.write_snapshot(&sample_snapshot("nyc", "Z_002", ts)).unwrap();

        let latest = store.latest_snapshots("nyc", None).unwrap();
        let ids: Vec<_> = latest.iter().map(|s| s.zone_id.clone()).collect();
        assert_eq!(ids, vec!["Z_001", "Z_002", "Z_003"]);
    }

    #[test]
    fn raw_latest_upsert_keeps_only_newest_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(1);
        let t2 = t0 + chrono::Duration::seconds(2);

        for ts in [t0, t1, t2] {
            store
                .upsert_raw_latest("raw_aqi", "nyc", "Z_002", &json!({"aqi": 80}), ts, ts)
                .unwrap();
        }

        let bundles = store.read_raw_latest("nyc").unwrap();
        assert_eq!(bundles.len(), 1);
        let tree = store.tree("raw_aqi").unwrap();
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn alerts_are_append_only_and_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(5);

        let a1 = Alert {
            city_id: "nyc".into(),
            zone_id: "Z_001".into(),
            ts: t0,
            level: AlertLevel::Info,
            kind: AlertType::ProcessingComplete,
            message: "first".into(),
            details: json!({}),
            source: "engine".into(),
        };
        let mut a2 = a1.clone();
        a2.ts = t1;
        a2.message = "second".into();

        store.insert_alerts(&[a1]).unwrap();
        store.insert_alerts(&[a2]).unwrap();

        let alerts = store.query_alerts(None, None, None, None, 10).unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].message, "second");
    }
}
