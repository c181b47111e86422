//! Traffic provider (§4.1): current/free-flow speed, from which congestion
//! is derived. Falls back through a dataset tier to a free/unknown
//! synthetic reading.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use crate::error::ProviderError;
use crate::types::{Congestion, Location, TrafficSignal};

use super::{http_client, FallbackTier};

const PROVIDER_NAME: &str = "traffic";

#[derive(Debug, Deserialize)]
struct UpstreamResponse {
    #[serde(rename = "flowSegmentData")]
    flow_segment_data: UpstreamFlow,
}

#[derive(Debug, Deserialize)]
struct UpstreamFlow {
    #[serde(rename = "currentSpeed")]
    current_speed: f64,
    #[serde(rename = "freeFlowSpeed")]
    free_flow_speed: f64,
}

pub struct TrafficProvider {
    api_key: Option<String>,
    base_url: String,
}

impl TrafficProvider {
    pub fn new() -> Self {
        Self {
            api_key: std::env::var("TRAFFIC_API_KEY").ok().filter(|k| !k.is_empty()),
            base_url: std::env::var("TRAFFIC_API_BASE_URL").unwrap_or_else(|_| {
                "https://api.tomtom.com/traffic/services/4/flowSegmentData/absolute/10/json"
                    .to_string()
            }),
        }
    }

    async fn fetch_primary(&self, lat: f64, lon: f64) -> Result<TrafficSignal, ProviderError> {
        let Some(key) = &self.api_key else {
            return Err(ProviderError::MissingCredential(PROVIDER_NAME));
        };
        let response = http_client()
            .get(&self.base_url)
            .query(&[
                ("point", format!("{lat},{lon}")),
                ("key", key.clone()),
                ("unit", "KMPH".to_string()),
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

        let current_speed_kmh = body.flow_segment_data.current_speed;
        let free_flow_speed_kmh = body.flow_segment_data.free_flow_speed;
        Ok(TrafficSignal {
            source: "tomtom".to_string(),
            timestamp: Utc::now(),
            location: Location { lat, lon },
            current_speed_kmh,
            free_flow_speed_kmh,
            congestion: Congestion::from_speeds(current_speed_kmh, free_flow_speed_kmh),
        })
    }

    /// No general-purpose traffic-speed CSV ships with the crate; this
    /// tier exists so the chain shape matches weather/AQI and so a future
    /// dataset file can be dropped in without a code change.
    fn fetch_dataset(&self, _lat: f64, _lon: f64) -> Option<TrafficSignal> {
        None
    }

    fn fetch_synthetic(&self, lat: f64, lon: f64) -> TrafficSignal {
        TrafficSignal {
            source: "synthetic".to_string(),
            timestamp: Utc::now(),
            location: Location { lat, lon },
            current_speed_kmh: 40.0,
            free_flow_speed_kmh: 50.0,
            congestion: Congestion::from_speeds(40.0, 50.0),
        }
    }

    pub async fn fetch_with_tier(&self, lat: f64, lon: f64) -> (TrafficSignal, FallbackTier) {
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

    pub async fn fetch(&self, lat: f64, lon: f64, _city_id: Option<&str>) -> TrafficSignal {
        self.fetch_with_tier(lat, lon).await.0
    }
}

impl Default for TrafficProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl super::SignalSource<TrafficSignal> for TrafficProvider {
    async fn fetch(&self, lat: f64, lon: f64, city_id: Option<&str>) -> TrafficSignal {
        TrafficProvider::fetch(self, lat, lon, city_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn congestion_ratio_bands() {
        assert_eq!(Congestion::from_speeds(95.0, 100.0), Congestion::Free);
        assert_eq!(Congestion::from_speeds(75.0, 100.0), Congestion::Moderate);
        assert_eq!(Congestion::from_speeds(55.0, 100.0), Congestion::Heavy);
        assert_eq!(Congestion::from_speeds(10.0, 100.0), Congestion::Severe);
        assert_eq!(Congestion::from_speeds(10.0, 0.0), Congestion::Unknown);
    }

    #[tokio::test]
    async fn no_api_key_falls_through_to_synthetic() {
        let provider = TrafficProvider {
            api_key: None,
            base_url: String::new(),
        };
        let (signal, tier) = provider.fetch_with_tier(0.0, 0.0).await;
        assert_eq!(tier, FallbackTier::Synthetic);
        assert_eq!(signal.source, "synthetic");
    }
}
