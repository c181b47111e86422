//! External signal providers (C1): per-signal fetch with dataset fallback
//! and synthetic-of-last-resort. Every provider is safe for concurrent
//! invocation and bounds its own latency; errors never escape a provider,
//! they downgrade through the fallback chain (§4.1, §7).

pub mod air_quality;
pub mod datasets;
pub mod tariff;
pub mod traffic;
pub mod weather;

pub use air_quality::AirQualityProvider;
pub use tariff::TariffProvider;
pub use traffic::TrafficProvider;
pub use weather::WeatherProvider;

/// Which tier of a provider's fallback chain produced a signal. Exposed so
/// tests can assert a specific tier was exercised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackTier {
    Primary,
    Dataset,
    Synthetic,
}

/// Uniform async-fetch surface over a provider, generic over its signal
/// type. Mirrors the teacher's `SensorSource` async-trait shape
/// (`acquisition/mod.rs`) generalised from a single concrete reading type
/// to whichever signal the provider produces.
#[async_trait::async_trait]
pub trait SignalSource<T>: Send + Sync {
    async fn fetch(&self, lat: f64, lon: f64, city_id: Option<&str>) -> T;
}

pub(crate) fn http_client() -> &'static reqwest::Client {
    static CLIENT: std::sync::OnceLock<reqwest::Client> = std::sync::OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(
                crate::config::defaults::PROVIDER_TIMEOUT_SECS,
            ))
            .build()
            .unwrap_or_default()
    })
}
