//! Weather provider (§4.1): current conditions, falling back to a
//! monthly-mean table keyed by city, then to a neutral synthetic record.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use crate::error::ProviderError;
use crate::types::{Location, WeatherSignal};

use super::datasets::TemperatureMeans;
use super::{http_client, FallbackTier};

const PROVIDER_NAME: &str = "weather";

/// Vendor-neutral shape for the upstream weather API response. The contract
/// only requires that *some* provider return this envelope (§6); no
/// specific vendor endpoint is mandated.
#[derive(Debug, Deserialize)]
struct UpstreamResponse {
    main: UpstreamMain,
    wind: UpstreamWind,
    weather: Vec<UpstreamDescription>,
}

#[derive(Debug, Deserialize)]
struct UpstreamMain {
    temp: f64,
    humidity: f64,
}

#[derive(Debug, Deserialize)]
struct UpstreamWind {
    speed: f64,
}

#[derive(Debug, Deserialize)]
struct UpstreamDescription {
    description: String,
}

pub struct WeatherProvider {
    api_key: Option<String>,
    base_url: String,
}

impl WeatherProvider {
    pub fn new() -> Self {
        Self {
            api_key: std::env::var("WEATHER_API_KEY").ok().filter(|k| !k.is_empty()),
            base_url: std::env::var("WEATHER_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.openweathermap.org/data/2.5/weather".to_string()),
        }
    }

    async fn fetch_primary(&self, lat: f64, lon: f64) -> Result<WeatherSignal, ProviderError> {
        let Some(key) = &self.api_key else {
            return Err(ProviderError::MissingCredential(PROVIDER_NAME));
        };
        let response = http_client()
            .get(&self.base_url)
            .query(&[
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
                ("appid", key.clone()),
                ("units", "metric".to_string()),
            ])
            .send()
            .await
            .map_err(|_| ProviderError::Timeout(PROVIDER_NAME))?;

        if response.status().as_u16() == 429 {
            return Err(ProviderError::RateLimited(PROVIDER_NAME));
        }
        if !response.status().is_success() {
            return Err(ProviderError::InvalidResponse(
                PROVIDER_NAME,
                response.status().to_string(),
            ));
        }

        let body: UpstreamResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(PROVIDER_NAME, e.to_string()))?;

        Ok(WeatherSignal {
            source: "openweathermap".to_string(),
            timestamp: Utc::now(),
            location: Location { lat, lon },
            temperature_c: body.main.temp,
            humidity_pct: body.main.humidity,
            wind_mps: body.wind.speed,
            description: body
                .weather
                .first()
                .map(|d| d.description.clone())
                .unwrap_or_default(),
        })
    }

    fn fetch_dataset(&self, lat: f64, lon: f64, city_id: Option<&str>) -> Option<WeatherSignal> {
        let temp = TemperatureMeans::get().lookup(city_id)?;
        Some(WeatherSignal {
            source: "weather_fallback".to_string(),
            timestamp: Utc::now(),
            location: Location { lat, lon },
            temperature_c: temp,
            humidity_pct: 65.0,
            wind_mps: 3.5,
            description: "fallback from dataset".to_string(),
        })
    }

    fn fetch_synthetic(&self, lat: f64, lon: f64) -> WeatherSignal {
        WeatherSignal {
            source: "synthetic".to_string(),
            timestamp: Utc::now(),
            location: Location { lat, lon },
            temperature_c: 15.0,
            humidity_pct: 50.0,
            wind_mps: 2.0,
            description: "synthetic".to_string(),
        }
    }

    /// Run the full fallback chain, returning the signal and which tier
    /// produced it.
    pub async fn fetch_with_tier(
        &self,
        lat: f64,
        lon: f64,
        city_id: Option<&str>,
    ) -> (WeatherSignal, FallbackTier) {
        let deadline = std::time::Duration::from_secs(
            crate::config::defaults::PROVIDER_TIMEOUT_SECS,
        );
        match tokio::time::timeout(deadline, self.fetch_primary(lat, lon)).await {
            Ok(Ok(signal)) => (signal, FallbackTier::Primary),
            _ => {
                if let Some(signal) = self.fetch_dataset(lat, lon, city_id) {
                    (signal, FallbackTier::Dataset)
                } else {
                    (self.fetch_synthetic(lat, lon), FallbackTier::Synthetic)
                }
            }
        }
    }

    pub async fn fetch(&self, lat: f64, lon: f64, city_id: Option<&str>) -> WeatherSignal {
        self.fetch_with_tier(lat, lon, city_id).await.0
    }
}

impl Default for WeatherProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl super::SignalSource<WeatherSignal> for WeatherProvider {
    async fn fetch(&self, lat: f64, lon: f64, city_id: Option<&str>) -> WeatherSignal {
        WeatherProvider::fetch(self, lat, lon, city_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_api_key_falls_through_to_dataset_or_synthetic() {
        let provider = WeatherProvider {
            api_key: None,
            base_url: String::new(),
        };
        let (signal, tier) = provider.fetch_with_tier(40.0, -74.0, Some("nyc")).await;
        assert_ne!(tier, FallbackTier::Primary);
        assert!(signal.temperature_c.is_finite());
    }

    #[test]
    fn synthetic_tier_is_always_available() {
        let provider = WeatherProvider {
            api_key: None,
            base_url: String::new(),
        };
        let signal = provider.fetch_synthetic(0.0, 0.0);
        assert_eq!(signal.source, "synthetic");
    }
}
