//! Electricity tariff provider (§4.1, used only by C8): state-level monthly
//! retail price in $/kWh, with a dataset fallback and a configured default.

use crate::error::ProviderError;

use super::{http_client, datasets::TariffDataset, FallbackTier};

const PROVIDER_NAME: &str = "tariff";

pub struct TariffProvider {
    api_key: Option<String>,
    base_url: String,
}

impl TariffProvider {
    pub fn new() -> Self {
        Self {
            api_key: std::env::var("EIA_API_KEY").ok().filter(|k| !k.is_empty()),
            base_url: std::env::var("EIA_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.eia.gov/v2/electricity/retail-sales/data".to_string()),
        }
    }

    async fn fetch_primary(&self, state: &str) -> Result<f64, ProviderError> {
        let Some(key) = &self.api_key else {
            return Err(ProviderError::MissingCredential(PROVIDER_NAME));
        };
        let response = http_client()
            .get(&self.base_url)
            .query(&[
                ("api_key", key.clone()),
                ("facets[stateid][]", state.to_string()),
                ("facets[sectorid][]", "RES".to_string()),
            ])
            .send()
            .await
            .map_err(|_| ProviderError::Timeout(PROVIDER_NAME))?;

        if !response.status().is_success() {
            return Err(ProviderError::InvalidResponse(
                PROVIDER_NAME,
                response.status().to_string(),
            ));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(PROVIDER_NAME, e.to_string()))?;

        body["response"]["data"]
            .as_array()
            .and_then(|rows| rows.first())
            .and_then(|row| row["price"].as_f64())
            // EIA reports cents/kWh; rescale to dollars.
            .map(|cents| cents / 100.0)
            .ok_or_else(|| ProviderError::InvalidResponse(PROVIDER_NAME, "no price row".into()))
    }

    fn fetch_dataset(&self, state: &str) -> Option<f64> {
        TariffDataset::get().lookup(state)
    }

    fn fetch_synthetic(&self) -> f64 {
        crate::config::get().default_price_per_kwh_usd
    }

    pub async fn fetch_with_tier(&self, state: &str) -> (f64, FallbackTier) {
        let deadline = std::time::Duration::from_secs(
            crate::config::defaults::PROVIDER_TIMEOUT_SECS,
        );
        match tokio::time::timeout(deadline, self.fetch_primary(state)).await {
            Ok(Ok(price)) => (price, FallbackTier::Primary),
            _ => {
                if let Some(price) = self.fetch_dataset(state) {
                    (price, FallbackTier::Dataset)
                } else {
                    (self.fetch_synthetic(), FallbackTier::Synthetic)
                }
            }
        }
    }

    pub async fn price_per_kwh(&self, state: &str) -> f64 {
        self.fetch_with_tier(state).await.0
    }
}

impl Default for TariffProvider {
    fn default() -> Self {
        Self::new()
    }
}
