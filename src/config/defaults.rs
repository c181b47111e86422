//! Named constants for every tunable in the core. Grouped by the component
//! that consumes them.

/// Bounded-concurrency fan-out width for `ProcessCity` (§4.5, §5, scenario S6).
pub const ZONE_CONCURRENCY: usize = 8;

/// Per-call deadline for provider fetches (§4.1, §5).
pub const PROVIDER_TIMEOUT_SECS: u64 = 10;

/// Default producer cycle interval for the background scheduler (§4.9).
pub const DEFAULT_CYCLE_INTERVAL_SECS: u64 = 300;

/// Grace period given to an in-flight `process_city` before hard cancellation.
pub const SCHEDULER_SHUTDOWN_GRACE_SECS: u64 = 30;

/// Maximum zones processed per cycle on the producer side; also the hard cap.
pub const MAX_ZONES_PER_CYCLE: usize = 5;
pub const MAX_ZONES_PER_CYCLE_HARD_CAP: usize = 5;

/// Streaming ingester batch size / idle flush interval (§4.6).
pub const STREAM_BATCH_SIZE: usize = 50;
pub const STREAM_IDLE_FLUSH_MILLIS: u64 = 1_000;

/// Scenario orchestrator clarification cap (§4.7, §8 property 7).
pub const MAX_CLARIFYING_QUESTIONS: u32 = 3;

/// Scenario session idle eviction timeout (§9).
pub const SESSION_IDLE_TIMEOUT_SECS: u64 = 30 * 60;

/// Cost aggregator tuning constants (§4.8).
pub const DEFAULT_PRICE_PER_KWH_USD: f64 = 0.12;
pub const KG_CO2_PER_KWH: f64 = 0.4;
pub const CARBON_PRICE_PER_TON_USD: f64 = 50.0;
pub const COST_PER_AQI_POINT_ABOVE_50: f64 = 0.5;
pub const COST_PER_INCIDENT_DEFAULT: f64 = 50.0;

/// Analytics kernel thresholds (§4.4).
pub const ANOMALY_Z_SCORE_THRESHOLD: f64 = 2.0;
pub const RISK_LEVEL_HIGH: f64 = 60.0;
pub const RISK_LEVEL_MEDIUM: f64 = 35.0;
pub const RESILIENCE_LEVEL_HIGH: f64 = 70.0;
pub const RESILIENCE_LEVEL_MEDIUM: f64 = 40.0;

/// History window considered "enough" to forecast from rather than from
/// temperature alone (one hour of per-cycle samples).
pub const DEMAND_HISTORY_MIN_SAMPLES: usize = 1;

/// Haversine search radius for the AQI nearest-point dataset fallback (§4.1).
pub const AQI_DATASET_SEARCH_RADIUS_KM: f64 = 50.0;
