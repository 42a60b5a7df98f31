//! Price source abstraction.

use crate::FetchError;
use async_trait::async_trait;
use pricebot_core::{PriceSample, TrackedAsset};

/// Supplies the current price of an asset on demand.
///
/// Implementations must be side-effect free so a failed attempt can simply
/// be repeated. Timeouts are the implementation's concern and surface as
/// [`FetchError::Timeout`].
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Fetch the current spot price.
    async fn fetch_price(&self, asset: &TrackedAsset) -> Result<PriceSample, FetchError>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}
