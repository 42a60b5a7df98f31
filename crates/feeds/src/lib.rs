//! Upstream price feeds.
//!
//! This crate provides:
//! - The `PriceSource` abstraction consumed by the polling scheduler
//! - A CoinGecko REST implementation
//! - `FetchError`, which collapses network, status, and payload failures

pub mod coingecko;
pub mod error;
pub mod source;

pub use coingecko::{parse_simple_price, CoinGeckoConfig, CoinGeckoSource};
pub use error::FetchError;
pub use source::PriceSource;
