//! Process-wide configuration singleton.
//!
//! Mirrors the teacher's well-config pattern: `init()` is called exactly once
//! at startup from environment variables, `get()` hands back a `'static`
//! reference and panics if called before `init` (a startup bug, not a
//! recoverable condition).

pub mod defaults;

use std::sync::OnceLock;

static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Runtime configuration loaded from the environment (§6 CLI/environment).
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Message bus bootstrap address (e.g. a NATS server URL).
    pub bus_addr: String,
    /// Filesystem path backing the sled state store.
    pub state_store_path: String,
    /// Logical database/namespace name for the city scope.
    pub city_scope_db: String,
    /// Default city slug used at startup if no selection command arrives.
    pub default_city: String,
    /// Background scheduler cycle interval, in seconds.
    pub cycle_interval_secs: u64,
    /// Maximum zones processed per cycle on the producer side.
    pub max_zones_per_cycle: usize,
    /// HTTP bind address for the thin pass-through API router.
    pub http_addr: String,
    pub carbon_price_per_ton_usd: f64,
    pub default_price_per_kwh_usd: f64,
    pub cost_per_aqi_point_above_50: f64,
    pub cost_per_incident_default: f64,
}

impl AppConfig {
    /// Load from environment variables, falling back to documented defaults.
    pub fn from_env() -> Self {
        Self {
            bus_addr: std::env::var("GRID_BUS_ADDR")
                .unwrap_or_else(|_| "nats://127.0.0.1:4222".to_string()),
            state_store_path: std::env::var("GRID_STATE_STORE_URI")
                .unwrap_or_else(|_| "./data/state.db".to_string()),
            city_scope_db: std::env::var("GRID_CITY_SCOPE_DB")
                .unwrap_or_else(|_| "urban_grid".to_string()),
            default_city: std::env::var("GRID_DEFAULT_CITY")
                .unwrap_or_else(|_| "nyc".to_string())
                .to_lowercase(),
            cycle_interval_secs: std::env::var("GRID_CYCLE_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults::DEFAULT_CYCLE_INTERVAL_SECS),
            max_zones_per_cycle: std::env::var("GRID_MAX_ZONES_PER_CYCLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults::MAX_ZONES_PER_CYCLE)
                .min(defaults::MAX_ZONES_PER_CYCLE_HARD_CAP),
            http_addr: std::env::var("GRID_SERVER_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            carbon_price_per_ton_usd: std::env::var("GRID_CARBON_PRICE_PER_TON_USD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults::CARBON_PRICE_PER_TON_USD),
            default_price_per_kwh_usd: std::env::var("GRID_DEFAULT_PRICE_PER_KWH_USD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults::DEFAULT_PRICE_PER_KWH_USD),
            cost_per_aqi_point_above_50: std::env::var("GRID_COST_PER_AQI_POINT_ABOVE_50")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults::COST_PER_AQI_POINT_ABOVE_50),
            cost_per_incident_default: std::env::var("GRID_COST_PER_INCIDENT_DEFAULT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults::COST_PER_INCIDENT_DEFAULT),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Initialize the global config. Logs a warning rather than panicking if
/// called twice (tests may call this more than once across modules).
pub fn init(config: AppConfig) {
    if APP_CONFIG.set(config).is_err() {
        tracing::warn!("config::init called more than once; keeping first value");
    }
}

/// Fetch the global config.
///
/// # Panics
/// Panics if called before `init()`. This indicates a startup bug: every
/// binary entrypoint must call `config::init` before touching any component
/// that reads configuration.
pub fn get() -> &'static AppConfig {
    APP_CONFIG
        .get()
        .expect("config::get called before config::init - startup bug")
}

pub fn is_initialized() -> bool {
    APP_CONFIG.get().is_some()
}
