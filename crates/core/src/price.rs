//! Price observations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One timestamped price observation.
///
/// Samples are immutable once created; the history window only ever
/// appends and evicts them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    value: f64,
    timestamp: DateTime<Utc>,
}

impl PriceSample {
    /// Create a sample taken at `timestamp`.
    pub fn new(value: f64, timestamp: DateTime<Utc>) -> Self {
        Self { value, timestamp }
    }

    /// Create a sample taken now.
    pub fn now(value: f64) -> Self {
        Self::new(value, Utc::now())
    }

    /// Price in quote currency units.
    #[inline]
    pub fn value(&self) -> f64 {
        self.value
    }

    /// When the sample was taken.
    #[inline]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// A usable price is finite and strictly positive.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.value.is_finite() && self.value > 0.0
    }
}
