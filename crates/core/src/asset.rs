//! Tracked asset definition.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Asset whose spot price is monitored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackedAsset {
    /// Price feed identifier (e.g., "worldcoin-wld", "bitcoin")
    pub id: CompactString,
    /// Quote currency used by the feed (e.g., "usd")
    pub vs_currency: CompactString,
    /// Human readable name used in messages (e.g., "Worldcoin")
    pub display_name: CompactString,
}

impl TrackedAsset {
    /// Create an asset quoted in the given currency.
    pub fn new(id: &str, vs_currency: &str) -> Self {
        Self {
            id: CompactString::new(id),
            vs_currency: CompactString::new(vs_currency.to_ascii_lowercase()),
            display_name: CompactString::new(display_name_for(id)),
        }
    }

    /// Override the display name.
    pub fn with_display_name(mut self, name: &str) -> Self {
        self.display_name = CompactString::new(name);
        self
    }

    /// Worldcoin quoted in USD.
    pub fn worldcoin() -> Self {
        Self::new("worldcoin-wld", "usd")
    }
}

impl Default for TrackedAsset {
    fn default() -> Self {
        Self::worldcoin()
    }
}

impl fmt::Display for TrackedAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.id, self.vs_currency.to_ascii_uppercase())
    }
}

/// Derive a display name from a feed id: "worldcoin-wld" -> "Worldcoin".
fn display_name_for(id: &str) -> String {
    let head = id.split('-').next().unwrap_or(id);
    let mut chars = head.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
