//! Rolling price history and the analytics derived from it.
//!
//! The window is bounded by time, not by count: the poll cadence changes
//! under backoff and a count bound would silently change the horizon.

use chrono::{DateTime, Utc};
use pricebot_core::PriceSample;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error, PartialEq)]
pub enum HistoryError {
    #[error("No price data recorded yet")]
    NoData,
    #[error("Invalid price sample: {0}")]
    InvalidSample(f64),
}

/// Configuration for the history window.
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// How far back samples are retained, relative to the newest one.
    pub window: Duration,
    /// Relative change (in percent) below which the trend is flat.
    pub flat_tolerance_pct: f64,
    /// Relative change (in percent) above which a trend counts as strong.
    pub strong_trend_pct: f64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(24 * 60 * 60),
            flat_tolerance_pct: 0.1,
            strong_trend_pct: 5.0,
        }
    }
}

/// Summary statistics over the retained window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceStats {
    pub current: f64,
    pub min: f64,
    pub max: f64,
    /// Unweighted arithmetic mean of the retained samples.
    pub average: f64,
    pub samples: usize,
    pub oldest_at: DateTime<Utc>,
    pub newest_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendDirection {
    Rising,
    Falling,
    Flat,
}

/// Movement between the oldest and newest retained samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub direction: TrendDirection,
    /// Percentage change from oldest to newest.
    pub change_pct: f64,
    pub oldest: f64,
    pub newest: f64,
    /// Magnitude exceeds the configured strong-trend threshold.
    pub strong: bool,
}

/// Result of appending a sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordOutcome {
    /// Newest value before this sample was appended.
    pub previous: Option<f64>,
    /// Samples dropped because they fell out of the window.
    pub evicted: usize,
    /// The sample became the newest one. False when it landed behind an
    /// already recorded, later sample.
    pub is_newest: bool,
}

/// Time-bounded ring of price samples for one asset.
pub struct HistoryStore {
    config: HistoryConfig,
    window: chrono::Duration,
    samples: RwLock<VecDeque<PriceSample>>,
}

impl HistoryStore {
    pub fn new(config: HistoryConfig) -> Self {
        let window = chrono::Duration::from_std(config.window)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        Self {
            config,
            window,
            samples: RwLock::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Append a sample and evict everything older than the window.
    ///
    /// Non-positive or non-finite values are rejected and leave the window
    /// untouched.
    pub fn record(&self, sample: PriceSample) -> Result<RecordOutcome, HistoryError> {
        if !sample.is_valid() {
            return Err(HistoryError::InvalidSample(sample.value()));
        }

        let mut samples = self.samples.write().unwrap_or_else(PoisonError::into_inner);
        let previous = samples.back().map(|s| s.value());

        // Keep ascending order even if the wall clock stepped backwards.
        let position = samples.partition_point(|s| s.timestamp() <= sample.timestamp());
        let is_newest = position == samples.len();
        samples.insert(position, sample);

        let newest = samples.back().map(|s| s.timestamp()).unwrap_or(sample.timestamp());
        let cutoff = newest - self.window;
        let mut evicted = 0;
        while samples.front().is_some_and(|s| s.timestamp() < cutoff) {
            samples.pop_front();
            evicted += 1;
        }

        trace!(
            price = sample.value(),
            retained = samples.len(),
            evicted = evicted,
            "Sample recorded"
        );
        Ok(RecordOutcome {
            previous,
            evicted,
            is_newest,
        })
    }

    /// Most recently recorded price.
    pub fn current_price(&self) -> Result<f64, HistoryError> {
        let samples = self.samples.read().unwrap_or_else(PoisonError::into_inner);
        samples.back().map(|s| s.value()).ok_or(HistoryError::NoData)
    }

    /// Newest sample, if any.
    pub fn latest(&self) -> Option<PriceSample> {
        let samples = self.samples.read().unwrap_or_else(PoisonError::into_inner);
        samples.back().copied()
    }

    /// Min, max, and mean over the retained window.
    pub fn statistics(&self) -> Result<PriceStats, HistoryError> {
        let samples = self.samples.read().unwrap_or_else(PoisonError::into_inner);
        let (first, last) = match (samples.front(), samples.back()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return Err(HistoryError::NoData),
        };

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for sample in samples.iter() {
            let value = sample.value();
            min = min.min(value);
            max = max.max(value);
            sum += value;
        }

        Ok(PriceStats {
            current: last.value(),
            min,
            max,
            average: sum / samples.len() as f64,
            samples: samples.len(),
            oldest_at: first.timestamp(),
            newest_at: last.timestamp(),
        })
    }

    /// Direction and size of the move across the window.
    pub fn trend(&self) -> Result<Trend, HistoryError> {
        let samples = self.samples.read().unwrap_or_else(PoisonError::into_inner);
        if samples.len() < 2 {
            return Err(HistoryError::NoData);
        }
        let (oldest, newest) = match (samples.front(), samples.back()) {
            (Some(first), Some(last)) => (first.value(), last.value()),
            _ => return Err(HistoryError::NoData),
        };

        let change_pct = (newest - oldest) / oldest * 100.0;
        let direction = if change_pct.abs() < self.config.flat_tolerance_pct {
            TrendDirection::Flat
        } else if change_pct > 0.0 {
            TrendDirection::Rising
        } else {
            TrendDirection::Falling
        };

        Ok(Trend {
            direction,
            change_pct,
            oldest,
            newest,
            strong: change_pct.abs() > self.config.strong_trend_pct,
        })
    }

    /// Number of retained samples.
    pub fn len(&self) -> usize {
        self.samples.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the retained samples, oldest first.
    pub fn snapshot(&self) -> Vec<PriceSample> {
        let samples = self.samples.read().unwrap_or_else(PoisonError::into_inner);
        samples.iter().copied().collect()
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}
