//! Air quality provider (§4.1): AQI plus pollutant components, falling back
//! to a nearest-point dataset index, then to a synthetic `aqi = 50` record.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use crate::error::ProviderError;
use crate::types::{AqiSignal, Location};

use super::datasets::AqiDataset;
use super::{http_client, FallbackTier};

const PROVIDER_NAME: &str = "air_quality";

#[derive(Debug, Deserialize)]
struct UpstreamResponse {
    list: Vec<UpstreamEntry>,
}

#[derive(Debug, Deserialize)]
struct UpstreamEntry {
    main: UpstreamMain,
    components: UpstreamComponents,
}

#[derive(Debug, Deserialize)]
struct UpstreamMain {
    aqi: f64,
}

#[derive(Debug, Deserialize, Default)]
struct UpstreamComponents {
    pm2_5: Option<f64>,
    pm10: Option<f64>,
    o3: Option<f64>,
    no2: Option<f64>,
}

pub struct AirQualityProvider {
    api_key: Option<String>,
    base_url: String,
}

impl AirQualityProvider {
    pub fn new() -> Self {
        Self {
            api_key: std::env::var("AQI_API_KEY").ok().filter(|k| !k.is_empty()),
            base_url: std::env::var("AQI_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.openweathermap.org/data/2.5/air_pollution".to_string()),
        }
    }

    async fn fetch_primary(&self, lat: f64, lon: f64) -> Result<AqiSignal, ProviderError> {
        let Some(key) = &self.api_key else {
            return Err(ProviderError::MissingCredential(PROVIDER_NAME));
        };
        let response = http_client()
            .get(&self.base_url)
            .query(&[
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
                ("appid", key.clone()),
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
        let entry = body
            .list
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse(PROVIDER_NAME, "empty list".into()))?;

        // Upstream reports a 1-5 category; the contract here wants a 0-500
        // index, so rescale onto the same band the dataset/synthetic tiers
        // use (category 1 -> 25, ..., category 5 -> 250).
        let aqi = entry.main.aqi * 50.0;

        Ok(AqiSignal {
            source: "openweathermap".to_string(),
            timestamp: Utc::now(),
            location: Location { lat, lon },
            aqi,
            pm2_5: entry.components.pm2_5,
            pm10: entry.components.pm10,
            o3: entry.components.o3,
            no2: entry.components.no2,
        })
    }

    fn fetch_dataset(&self, lat: f64, lon: f64) -> Option<AqiSignal> {
        let (aqi, pm2_5) = AqiDataset::get().nearest(
            lat,
            lon,
            crate::config::defaults::AQI_DATASET_SEARCH_RADIUS_KM,
        )?;
        Some(AqiSignal {
            source: "aqi_dataset".to_string(),
            timestamp: Utc::now(),
            location: Location { lat, lon },
            aqi,
            pm2_5,
            pm10: None,
            o3: None,
            no2: None,
        })
    }

    fn fetch_synthetic(&self, lat: f64, lon: f64) -> AqiSignal {
        AqiSignal {
            source: "synthetic".to_string(),
            timestamp: Utc::now(),
            location: Location { lat, lon },
            aqi: 50.0,
            pm2_5: None,
            pm10: None,
            o3: None,
            no2: None,
        }
    }

    pub async fn fetch_with_tier(&self, lat: f64, lon: f64) -> (AqiSignal, FallbackTier) {
        let deadline = std::time::Duration::from_secs(
            crate::config::defaults::PROVIDER_TIMEOUT_SECS,
        );
        match tokio::time::timeout(deadline, self.fetch_primary(lat, lon)).await {
            Ok(Ok(signal)) => (signal, FallbackTier::Primary),
            _ => {
                if let Some(signal) = self.fetch_dataset(lat, lon) {
                    (signal, FallbackTier::Dataset)
                } else {
                    (self.fetch_synthetic(lat, lon), FallbackTier::Synthetic)
                }
            }
        }
    }

    pub async fn fetch(&self, lat: f64, lon: f64, _city_id: Option<&str>) -> AqiSignal {
        self.fetch_with_tier(lat, lon).await.0
    }
}

impl Default for AirQualityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl super::SignalSource<AqiSignal> for AirQualityProvider {
    async fn fetch(&self, lat: f64, lon: f64, city_id: Option<&str>) -> AqiSignal {
        AirQualityProvider::fetch(self, lat, lon, city_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_tier_uses_neutral_aqi() {
        let provider = AirQualityProvider {
            api_key: None,
            base_url: String::new(),
        };
        let signal = provider.fetch_synthetic(0.0, 0.0);
        assert_eq!(signal.aqi, 50.0);
        assert_eq!(signal.source, "synthetic");
    }

    #[tokio::test]
    async fn no_api_key_skips_primary_tier() {
        let provider = AirQualityProvider {
            api_key: None,
            base_url: String::new(),
        };
        let (_, tier) = provider.fetch_with_tier(40.0, -74.0).await;
        assert_ne!(tier, FallbackTier::Primary);
    }
}
