//! Core data model shared across components (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Uniform envelope every C1 provider returns (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub location: Location,
    /// Signal-specific fields, one object per provider kind.
    #[serde(flatten)]
    pub fields: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherSignal {
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub location: Location,
    pub temperature_c: f64,
    pub humidity_pct: f64,
    pub wind_mps: f64,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AqiSignal {
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub location: Location,
    pub aqi: f64,
    pub pm2_5: Option<f64>,
    pub pm10: Option<f64>,
    pub o3: Option<f64>,
    pub no2: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Congestion {
    Free,
    Moderate,
    Heavy,
    Severe,
    Unknown,
}

impl Congestion {
    /// Derive congestion tier from the current/free-flow speed ratio (§4.1).
    pub fn from_speeds(current_speed: f64, free_flow_speed: f64) -> Self {
        if free_flow_speed <= 0.0 {
            return Congestion::Unknown;
        }
        let ratio = current_speed / free_flow_speed;
        if ratio >= 0.9 {
            Congestion::Free
        } else if ratio >= 0.7 {
            Congestion::Moderate
        } else if ratio >= 0.5 {
            Congestion::Heavy
        } else {
            Congestion::Severe
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficSignal {
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub location: Location,
    pub current_speed_kmh: f64,
    pub free_flow_speed_kmh: f64,
    pub congestion: Congestion,
}

/// Raw per-zone record fused into a [`ZoneSnapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub weather: WeatherSignal,
    pub aqi: AqiSignal,
    pub traffic: TrafficSignal,
    pub grid_priority: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemandForecast {
    pub next_hour_kwh: f64,
    pub confidence: f64,
    pub model: String,
    pub factors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyDetection {
    pub is_anomaly: bool,
    pub anomaly_score: f64,
    pub current_demand: f64,
    pub baseline_mean: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScore {
    pub score: f64,
    pub level: Level,
    pub factors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceScore {
    pub score: f64,
    pub level: Level,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AqiPrediction {
    pub next_hour_aqi: f64,
    pub factors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analytics {
    pub demand_forecast: DemandForecast,
    pub anomaly_detection: AnomalyDetection,
    pub risk_score: RiskScore,
    pub resilience_score: ResilienceScore,
    pub aqi_prediction: AqiPrediction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: u8,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub description: String,
    pub urgency: Urgency,
}

/// The central entity: one per (city, zone) produced by a processing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneSnapshot {
    pub city_id: String,
    pub zone_id: String,
    pub timestamp: DateTime<Utc>,
    pub raw: RawRecord,
    pub analytics: Analytics,
    pub recommendations: Vec<Recommendation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Info,
    Watch,
    Warning,
    Alert,
    Emergency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Anomaly,
    HighRisk,
    Aqi,
    DemandSpike,
    ProcessingComplete,
}

/// Sentinel zone id used for alerts that are not scoped to a single zone.
pub const SYSTEM_ZONE: &str = "system";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub city_id: String,
    pub zone_id: String,
    pub ts: DateTime<Utc>,
    pub level: AlertLevel,
    #[serde(rename = "type")]
    pub kind: AlertType,
    pub message: String,
    pub details: Value,
    pub source: String,
}

/// One per (city, zone, topic), upserted by the streaming ingester.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLatest {
    pub city_id: String,
    pub zone_id: String,
    pub topic: String,
    pub ts: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneProcessingStatus {
    pub zone_id: String,
    pub status: ZoneStatus,
    pub error: Option<String>,
}

/// One per processing run (§3, §4.5, §8 property 5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingSummary {
    pub city_id: String,
    pub timestamp: DateTime<Utc>,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub zones: Vec<ZoneProcessingStatus>,
}

impl ProcessingSummary {
    pub fn invariant_holds(&self) -> bool {
        self.total == self.successful + self.failed && self.zones.len() <= self.total
    }
}
