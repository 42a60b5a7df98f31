//! Application configuration.

use pricebot_core::TrackedAsset;
use pricebot_engine::{BackoffPolicy, HistoryConfig, RegistryConfig, SchedulerConfig};
use pricebot_feeds::CoinGeckoConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("TELEGRAM_BOT_TOKEN is not set")]
    MissingToken,
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("Backoff initial delay ({initial}s) exceeds the maximum ({max}s)")]
    InvalidBackoff { initial: u64, max: u64 },
    #[error("WINDOW_HOURS is too large: {0}")]
    WindowTooLarge(u64),
    #[error("Increase threshold must be a positive number, got {0}")]
    InvalidThreshold(f64),
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Bot token for the command bot and alert delivery.
    pub telegram_bot_token: String,
    /// CoinGecko coin id.
    pub symbol: String,
    /// Quote currency.
    pub currency: String,
    pub poll_interval_secs: u64,
    pub window_hours: u64,
    pub backoff_initial_secs: u64,
    pub backoff_max_secs: u64,
    /// Consecutive poll failures before the feed is reported degraded.
    pub degraded_after: u32,
    /// Rise that triggers the built-in alert.
    pub increase_threshold: f64,
    pub max_alerts_per_user: usize,
    /// SQLite URL; persistence is off when unset.
    pub database_url: Option<String>,
    pub coingecko_base_url: String,
    pub coingecko_api_key: Option<String>,
    /// Logging level.
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            telegram_bot_token: String::new(),
            symbol: "worldcoin-wld".to_string(),
            currency: "usd".to_string(),
            poll_interval_secs: 60,
            window_hours: 24,
            backoff_initial_secs: 5,
            backoff_max_secs: 600,
            degraded_after: 5,
            increase_threshold: 1.0,
            max_alerts_per_user: 20,
            database_url: None,
            coingecko_base_url: CoinGeckoConfig::default().base_url,
            coingecko_api_key: None,
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Check values that would make the service misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram_bot_token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Zero("POLL_INTERVAL_SECS"));
        }
        if self.window_hours == 0 {
            return Err(ConfigError::Zero("WINDOW_HOURS"));
        }
        if self.window_hours.checked_mul(3600).is_none() {
            return Err(ConfigError::WindowTooLarge(self.window_hours));
        }
        if self.backoff_initial_secs == 0 {
            return Err(ConfigError::Zero("BACKOFF_INITIAL_SECS"));
        }
        if self.backoff_initial_secs > self.backoff_max_secs {
            return Err(ConfigError::InvalidBackoff {
                initial: self.backoff_initial_secs,
                max: self.backoff_max_secs,
            });
        }
        if self.degraded_after == 0 {
            return Err(ConfigError::Zero("DEGRADED_AFTER"));
        }
        if !self.increase_threshold.is_finite() || self.increase_threshold <= 0.0 {
            return Err(ConfigError::InvalidThreshold(self.increase_threshold));
        }
        if self.max_alerts_per_user == 0 {
            return Err(ConfigError::Zero("MAX_ALERTS_PER_USER"));
        }
        Ok(())
    }

    pub fn asset(&self) -> TrackedAsset {
        TrackedAsset::new(&self.symbol, &self.currency)
    }

    pub fn history_config(&self) -> HistoryConfig {
        HistoryConfig {
            window: Duration::from_secs(self.window_hours.saturating_mul(3600)),
            ..Default::default()
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            increase_threshold: self.increase_threshold,
            max_alerts_per_user: self.max_alerts_per_user,
            ..Default::default()
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            backoff: BackoffPolicy::new(
                Duration::from_secs(self.backoff_initial_secs),
                Duration::from_secs(self.backoff_max_secs),
            ),
            degraded_after: self.degraded_after,
        }
    }

    pub fn coingecko_config(&self) -> CoinGeckoConfig {
        CoinGeckoConfig {
            base_url: self.coingecko_base_url.clone(),
            api_key: self.coingecko_api_key.clone(),
            ..Default::default()
        }
    }
}
