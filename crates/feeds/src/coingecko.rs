//! CoinGecko REST price source.
//!
//! Uses the `simple/price` endpoint, which answers with
//! `{"<id>": {"<currency>": <price>}}`.

use crate::{FetchError, PriceSource};
use async_trait::async_trait;
use pricebot_core::{PriceSample, TrackedAsset};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Configuration for the CoinGecko client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinGeckoConfig {
    /// API base URL.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Optional demo/pro API key sent as `x-cg-demo-api-key`.
    pub api_key: Option<String>,
}

impl Default for CoinGeckoConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.coingecko.com".to_string(),
            timeout_secs: 10,
            api_key: None,
        }
    }
}

/// CoinGecko spot price fetcher.
pub struct CoinGeckoSource {
    config: CoinGeckoConfig,
    client: reqwest::Client,
}

impl CoinGeckoSource {
    /// Build a client with the configured timeout.
    pub fn new(config: CoinGeckoConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    fn price_url(&self) -> String {
        format!(
            "{}/api/v3/simple/price",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl PriceSource for CoinGeckoSource {
    async fn fetch_price(&self, asset: &TrackedAsset) -> Result<PriceSample, FetchError> {
        let mut request = self.client.get(self.price_url()).query(&[
            ("ids", asset.id.as_str()),
            ("vs_currencies", asset.vs_currency.as_str()),
        ]);
        if let Some(key) = &self.config.api_key {
            request = request.header("x-cg-demo-api-key", key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.as_u16() == 429 {
            return Err(FetchError::RateLimitExceeded);
        }
        if !status.is_success() {
            debug!(asset = %asset, status = status.as_u16(), "CoinGecko: non-success status");
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let body: serde_json::Value = response.json().await?;
        let price = parse_simple_price(&body, &asset.id, &asset.vs_currency)?;
        debug!(asset = %asset, price = price, "CoinGecko: price fetched");
        Ok(PriceSample::now(price))
    }

    fn name(&self) -> &str {
        "coingecko"
    }
}

/// Extract `body[id][currency]` as a number.
pub fn parse_simple_price(
    body: &serde_json::Value,
    id: &str,
    currency: &str,
) -> Result<f64, FetchError> {
    let entry = body
        .get(id)
        .ok_or_else(|| FetchError::Malformed(format!("asset '{}' missing from response", id)))?;
    let value = entry.get(currency).ok_or_else(|| {
        FetchError::Malformed(format!("currency '{}' missing for '{}'", currency, id))
    })?;
    value
        .as_f64()
        .ok_or_else(|| FetchError::Malformed(format!("price is not a number: {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_simple_price() {
        let body = json!({"worldcoin-wld": {"usd": 2.314}});
        let price = parse_simple_price(&body, "worldcoin-wld", "usd").unwrap();
        assert!((price - 2.314).abs() < 1e-12);
    }

    #[test]
    fn test_parse_integer_price() {
        let body = json!({"bitcoin": {"usd": 65000}});
        assert_eq!(parse_simple_price(&body, "bitcoin", "usd").unwrap(), 65000.0);
    }

    #[test]
    fn test_parse_missing_asset() {
        let body = json!({});
        let err = parse_simple_price(&body, "worldcoin-wld", "usd").unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
    }

    #[test]
    fn test_parse_missing_currency() {
        let body = json!({"worldcoin-wld": {"eur": 2.0}});
        let err = parse_simple_price(&body, "worldcoin-wld", "usd").unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
    }

    #[test]
    fn test_parse_non_numeric() {
        let body = json!({"worldcoin-wld": {"usd": "2.31"}});
        let err = parse_simple_price(&body, "worldcoin-wld", "usd").unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
    }

    #[test]
    fn test_price_url_trims_slash() {
        let source = CoinGeckoSource::new(CoinGeckoConfig {
            base_url: "http://localhost:8080/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            source.price_url(),
            "http://localhost:8080/api/v3/simple/price"
        );
        assert_eq!(source.name(), "coingecko");
    }
}
