//! Zone-processing engine (C5): fan-out over zones, fuse C1 outputs via C4,
//! persist via C2, emit alerts (§4.5).
//!
//! Grounded on the teacher's `pipeline/coordinator.rs` phase-ordered
//! `process_packet` (strict phase order, `tracing` spans, `Instant`-based
//! cycle timing) and on the reference `data_processor.py`'s
//! concurrent-fetch-then-fuse-then-persist shape.

pub mod recommendations;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::Semaphore;

use crate::analytics;
use crate::cities::{City, Zone};
use crate::config::defaults::{PROVIDER_TIMEOUT_SECS, ZONE_CONCURRENCY};
use crate::providers::{AirQualityProvider, SignalSource, TrafficProvider, WeatherProvider};
use crate::storage::StateStore;
use crate::types::{
    Alert, AlertLevel, AlertType, AqiSignal, ProcessingSummary, RawRecord, TrafficSignal,
    WeatherSignal, ZoneProcessingStatus, ZoneSnapshot, ZoneStatus, SYSTEM_ZONE,
};

const HISTORY_WINDOW: usize = 24;

/// Per-zone demand history, kept in memory only - not the source of truth
/// (the snapshot log is), just an accelerator for the anomaly/forecast
/// functions so they do not have to scan the store on every call.
#[derive(Default)]
struct DemandHistoryStore {
    by_zone: DashMap<(String, String), VecDeque<f64>>,
}

impl DemandHistoryStore {
    fn snapshot(&self, city_id: &str, zone_id: &str) -> Vec<f64> {
        self.by_zone
            .get(&(city_id.to_string(), zone_id.to_string()))
            .map(|v| v.iter().copied().collect())
            .unwrap_or_default()
    }

    fn push(&self, city_id: &str, zone_id: &str, value: f64) {
        let mut entry = self
            .by_zone
            .entry((city_id.to_string(), zone_id.to_string()))
            .or_default();
        entry.push_back(value);
        while entry.len() > HISTORY_WINDOW {
            entry.pop_front();
        }
    }
}

pub struct ZoneProcessingEngine {
    store: StateStore,
    weather: WeatherProvider,
    aqi: AirQualityProvider,
    traffic: TrafficProvider,
    history: DemandHistoryStore,
}

impl ZoneProcessingEngine {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            weather: WeatherProvider::new(),
            aqi: AirQualityProvider::new(),
            traffic: TrafficProvider::new(),
            history: DemandHistoryStore::default(),
        }
    }

    /// `ProcessZone` (§4.5): live-pull fusion for one zone.
    pub async fn process_zone(&self, city: &City, zone: &Zone) -> anyhow::Result<ZoneSnapshot> {
        let deadline = Duration::from_secs(PROVIDER_TIMEOUT_SECS);
        let lat = zone.center_lat;
        let lon = zone.center_lon;
        let city_id = city.id.as_str();

        let (weather, aqi, traffic) = tokio::time::timeout(deadline, async {
            tokio::join!(
                SignalSource::<WeatherSignal>::fetch(&self.weather, lat, lon, Some(city_id)),
                SignalSource::<AqiSignal>::fetch(&self.aqi, lat, lon, Some(city_id)),
                SignalSource::<TrafficSignal>::fetch(&self.traffic, lat, lon, Some(city_id)),
            )
        })
        .await
        .map_err(|_| anyhow::anyhow!("zone {} signal fetch exceeded deadline", zone.zone_id))?;

        self.persist_raw_best_effort(city_id, &zone.zone_id, &weather, &aqi, &traffic);

        let history = self.history.snapshot(city_id, &zone.zone_id);
        let analytics =
            analytics::analyze(&traffic, aqi.aqi, weather.temperature_c, weather.wind_mps, &history);
        self.history.push(city_id, &zone.zone_id, analytics.demand_forecast.next_hour_kwh);

        let recs = recommendations::derive(&analytics, aqi.aqi, traffic.congestion);

        let snapshot = ZoneSnapshot {
            city_id: city_id.to_string(),
            zone_id: zone.zone_id.clone(),
            timestamp: Utc::now(),
            raw: RawRecord {
                weather: weather.clone(),
                aqi: aqi.clone(),
                traffic: traffic.clone(),
                grid_priority: analytics.grid_priority,
            },
            analytics: crate::types::Analytics {
                demand_forecast: analytics.demand_forecast,
                anomaly_detection: analytics.anomaly_detection,
                risk_score: analytics.risk_score,
                resilience_score: analytics.resilience_score,
                aqi_prediction: analytics.aqi_prediction,
            },
            recommendations: recs,
        };

        self.store.write_snapshot(&snapshot)?;
        self.emit_alerts(&snapshot)?;

        Ok(snapshot)
    }

    /// Same fusion path, but sourced from `ReadRawLatest` instead of live
    /// provider calls (`ProcessCityFromStream`, §4.5).
    pub async fn process_zone_from_stream(
        &self,
        city: &City,
        zone: &Zone,
    ) -> anyhow::Result<ZoneSnapshot> {
        let bundle = self
            .store
            .read_raw_latest(&city.id)?
            .remove(&zone.zone_id)
            .ok_or_else(|| anyhow::anyhow!("no raw-latest data for zone {}", zone.zone_id))?;

        let weather = parse_weather(bundle.weather.as_ref(), zone);
        let aqi = parse_aqi(bundle.aqi.as_ref(), zone);
        let traffic = parse_traffic(bundle.traffic.as_ref(), zone);

        let history = self.history.snapshot(&city.id, &zone.zone_id);
        let analytics =
            analytics::analyze(&traffic, aqi.aqi, weather.temperature_c, weather.wind_mps, &history);
        self.history
            .push(&city.id, &zone.zone_id, analytics.demand_forecast.next_hour_kwh);

        let recs = recommendations::derive(&analytics, aqi.aqi, traffic.congestion);

        let snapshot = ZoneSnapshot {
            city_id: city.id.clone(),
            zone_id: zone.zone_id.clone(),
            timestamp: Utc::now(),
            raw: RawRecord {
                weather,
                aqi,
                traffic,
                grid_priority: analytics.grid_priority,
            },
            analytics: crate::types::Analytics {
                demand_forecast: analytics.demand_forecast,
                anomaly_detection: analytics.anomaly_detection,
                risk_score: analytics.risk_score,
                resilience_score: analytics.resilience_score,
                aqi_prediction: analytics.aqi_prediction,
            },
            recommendations: recs,
        };

        self.store.write_snapshot(&snapshot)?;
        self.emit_alerts(&snapshot)?;

        Ok(snapshot)
    }

    fn persist_raw_best_effort(
        &self,
        city_id: &str,
        zone_id: &str,
        weather: &WeatherSignal,
        aqi: &AqiSignal,
        traffic: &TrafficSignal,
    ) {
        let now = Utc::now();
        let attempts = [
            ("raw_weather", serde_json::to_value(weather)),
            ("raw_aqi", serde_json::to_value(aqi)),
            ("raw_traffic", serde_json::to_value(traffic)),
        ];
        for (collection, payload) in attempts {
            let payload = match payload {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, collection, "failed to serialize raw signal");
                    continue;
                }
            };
            if let Err(e) =
                self.store
                    .upsert_raw_latest(collection, city_id, zone_id, &payload, now, now)
            {
                tracing::warn!(error = %e, collection, zone_id, "best-effort raw persist failed");
            }
        }
    }

    fn emit_alerts(&self, snapshot: &ZoneSnapshot) -> anyhow::Result<()> {
        let mut alerts = Vec::new();
        let now = snapshot.timestamp;

        if snapshot.analytics.anomaly_detection.is_anomaly {
            alerts.push(Alert {
                city_id: snapshot.city_id.clone(),
                zone_id: snapshot.zone_id.clone(),
                ts: now,
                level: AlertLevel::Alert,
                kind: AlertType::Anomaly,
                message: format!("Anomaly detected in zone {}", snapshot.zone_id),
                details: json!({"anomaly_score": snapshot.analytics.anomaly_detection.anomaly_score}),
                source: "zone_processing_engine".to_string(),
            });
        }

        if snapshot.analytics.risk_score.level == crate::types::Level::High {
            alerts.push(Alert {
                city_id: snapshot.city_id.clone(),
                zone_id: snapshot.zone_id.clone(),
                ts: now,
                level: AlertLevel::Warning,
                kind: AlertType::HighRisk,
                message: format!("High risk in zone {}", snapshot.zone_id),
                details: json!({"risk_score": snapshot.analytics.risk_score.score}),
                source: "zone_processing_engine".to_string(),
            });
        }

        let aqi = snapshot.raw.aqi.aqi;
        if aqi > 200.0 {
            alerts.push(aqi_alert(snapshot, AlertLevel::Emergency, aqi));
        } else if aqi > 150.0 {
            alerts.push(aqi_alert(snapshot, AlertLevel::Alert, aqi));
        } else if aqi > 100.0 {
            alerts.push(aqi_alert(snapshot, AlertLevel::Watch, aqi));
        }

        if snapshot.analytics.demand_forecast.next_hour_kwh > 1000.0 {
            alerts.push(Alert {
                city_id: snapshot.city_id.clone(),
                zone_id: snapshot.zone_id.clone(),
                ts: now,
                level: AlertLevel::Warning,
                kind: AlertType::DemandSpike,
                message: format!("Predicted demand spike in zone {}", snapshot.zone_id),
                details: json!({"next_hour_kwh": snapshot.analytics.demand_forecast.next_hour_kwh}),
                source: "zone_processing_engine".to_string(),
            });
        }

        if !alerts.is_empty() {
            self.store.insert_alerts(&alerts)?;
        }
        Ok(())
    }

    /// `ProcessCity` (§4.5): bounded-concurrency fan-out over a city's
    /// zones (semaphore of [`ZONE_CONCURRENCY`]).
    pub async fn process_city(self: &Arc<Self>, city: &City) -> ProcessingSummary {
        self.run_city(city, ProcessMode::LivePull).await
    }

    /// `ProcessCityFromStream` (§4.5): same fusion, sourced from raw-latest.
    pub async fn process_city_from_stream(self: &Arc<Self>, city: &City) -> ProcessingSummary {
        self.run_city(city, ProcessMode::Stream).await
    }

    async fn run_city(self: &Arc<Self>, city: &City, mode: ProcessMode) -> ProcessingSummary {
        let started = Instant::now();
        let zones = crate::cities::derive_zones(city);
        let total = zones.len();
        let semaphore = Arc::new(Semaphore::new(ZONE_CONCURRENCY));

        let mut handles = Vec::with_capacity(total);
        for zone in zones {
            let engine = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let city = city.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = match mode {
                    ProcessMode::LivePull => engine.process_zone(&city, &zone).await,
                    ProcessMode::Stream => engine.process_zone_from_stream(&city, &zone).await,
                };
                (zone.zone_id, result)
            }));
        }

        let mut statuses = Vec::with_capacity(total);
        let mut successful = 0usize;
        let mut failed = 0usize;

        for handle in handles {
            match handle.await {
                Ok((zone_id, Ok(_))) => {
                    successful += 1;
                    statuses.push(ZoneProcessingStatus {
                        zone_id,
                        status: ZoneStatus::Success,
                        error: None,
                    });
                }
                Ok((zone_id, Err(e))) => {
                    failed += 1;
                    tracing::warn!(zone_id, error = %e, "zone processing failed");
                    statuses.push(ZoneProcessingStatus {
                        zone_id,
                        status: ZoneStatus::Failed,
                        error: Some(e.to_string()),
                    });
                }
                Err(join_err) => {
                    failed += 1;
                    tracing::error!(error = %join_err, "zone task panicked");
                }
            }
        }

        let summary = ProcessingSummary {
            city_id: city.id.clone(),
            timestamp: Utc::now(),
            total,
            successful,
            failed,
            zones: statuses,
        };

        if let Err(e) = self.store.write_processing_summary(&summary) {
            tracing::warn!(error = %e, "failed to persist processing summary");
        }

        if successful > 0 {
            let alert = Alert {
                city_id: city.id.clone(),
                zone_id: SYSTEM_ZONE.to_string(),
                ts: summary.timestamp,
                level: AlertLevel::Info,
                kind: AlertType::ProcessingComplete,
                message: format!(
                    "Processed {successful}/{total} zones for {} in {:?}",
                    city.id,
                    started.elapsed()
                ),
                details: json!({"successful": successful, "failed": failed, "total": total}),
                source: "zone_processing_engine".to_string(),
            };
            if let Err(e) = self.store.insert_alerts(&[alert]) {
                tracing::warn!(error = %e, "failed to persist processing-complete alert");
            }
        }

        tracing::info!(
            city_id = %city.id,
            successful,
            failed,
            total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "process_city complete"
        );

        summary
    }
}

#[derive(Clone, Copy)]
enum ProcessMode {
    LivePull,
    Stream,
}

fn aqi_alert(snapshot: &ZoneSnapshot, level: AlertLevel, aqi: f64) -> Alert {
    Alert {
        city_id: snapshot.city_id.clone(),
        zone_id: snapshot.zone_id.clone(),
        ts: snapshot.timestamp,
        level,
        kind: AlertType::Aqi,
        message: format!("AQI {aqi:.0} in zone {}", snapshot.zone_id),
        details: json!({"aqi": aqi}),
        source: "zone_processing_engine".to_string(),
    }
}

fn get_f64(payload: Option<&serde_json::Value>, key: &str, default: f64) -> f64 {
    payload
        .and_then(|v| v.get(key))
        .and_then(|v| v.as_f64())
        .unwrap_or(default)
}

fn parse_weather(payload: Option<&serde_json::Value>, zone: &Zone) -> WeatherSignal {
    WeatherSignal {
        source: "stream".to_string(),
        timestamp: Utc::now(),
        location: crate::types::Location {
            lat: zone.center_lat,
            lon: zone.center_lon,
        },
        temperature_c: get_f64(payload, "temperature_c", 15.0),
        humidity_pct: get_f64(payload, "humidity_pct", 50.0),
        wind_mps: get_f64(payload, "wind_mps", 2.0),
        description: payload
            .and_then(|v| v.get("description"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
    }
}

fn parse_aqi(payload: Option<&serde_json::Value>, zone: &Zone) -> AqiSignal {
    AqiSignal {
        source: "stream".to_string(),
        timestamp: Utc::now(),
        location: crate::types::Location {
            lat: zone.center_lat,
            lon: zone.center_lon,
        },
        aqi: get_f64(payload, "aqi", 50.0),
        pm2_5: payload.and_then(|v| v.get("pm2_5")).and_then(|v| v.as_f64()),
        pm10: payload.and_then(|v| v.get("pm10")).and_then(|v| v.as_f64()),
        o3: payload.and_then(|v| v.get("o3")).and_then(|v| v.as_f64()),
        no2: payload.and_then(|v| v.get("no2")).and_then(|v| v.as_f64()),
    }
}

fn parse_traffic(payload: Option<&serde_json::Value>, zone: &Zone) -> TrafficSignal {
    let current = get_f64(payload, "current_speed_kmh", 40.0);
    let free_flow = get_f64(payload, "free_flow_speed_kmh", 50.0);
    TrafficSignal {
        source: "stream".to_string(),
        timestamp: Utc::now(),
        location: crate::types::Location {
            lat: zone.center_lat,
            lon: zone.center_lon,
        },
        current_speed_kmh: current,
        free_flow_speed_kmh: free_flow,
        congestion: crate::types::Congestion::from_speeds(current, free_flow),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_city() -> City {
        crate::cities::find("sf").unwrap().clone()
    }

    #[tokio::test]
    async fn process_zone_persists_a_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let engine = ZoneProcessingEngine::new(store.clone());
        let city = test_city();
        let zone = crate::cities::derive_zones(&city).remove(0);

        let snapshot = engine.process_zone(&city, &zone).await.unwrap();
        assert_eq!(snapshot.zone_id, zone.zone_id);

        let latest = store.latest_snapshots(&city.id, None).unwrap();
        assert_eq!(latest.len(), 1);
    }

    #[tokio::test]
    async fn process_city_reports_consistent_counts() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let engine = Arc::new(ZoneProcessingEngine::new(store));
        let city = test_city();

        let summary = engine.process_city(&city).await;
        assert!(summary.invariant_holds());
        assert_eq!(summary.total, city.num_zones as usize);
    }
}
