//! Alert definitions shared by the engine, the bot, and persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Opaque, stable identifier of a subscribed user (a chat id for Telegram).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a custom alert, unique across all users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AlertId(pub u64);

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AlertId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .trim_start_matches('#')
            .parse::<u64>()
            .map(AlertId)
            .map_err(|_| ParseError::AlertId(s.to_string()))
    }
}

/// Errors from parsing user-supplied alert fields.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unknown direction '{0}', expected 'above' or 'below'")]
    Direction(String),
    #[error("Invalid alert id '{0}'")]
    AlertId(String),
    #[error("Invalid quiet hours '{0}', expected HH:MM-HH:MM")]
    QuietHours(String),
    #[error("Unknown alert status '{0}'")]
    Status(String),
}

/// Side of the threshold a custom alert waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Fires when the price rises through the target.
    Above,
    /// Fires when the price falls through the target.
    Below,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Above => "above",
            Direction::Below => "below",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "above" | "up" | ">" => Ok(Direction::Above),
            "below" | "down" | "<" => Ok(Direction::Below),
            _ => Err(ParseError::Direction(s.to_string())),
        }
    }
}

/// Lifecycle of a custom alert. `Fired` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertStatus {
    Armed,
    Fired,
    Cancelled,
}

impl AlertStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AlertStatus::Armed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Armed => "armed",
            AlertStatus::Fired => "fired",
            AlertStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for AlertStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "armed" => Ok(AlertStatus::Armed),
            "fired" => Ok(AlertStatus::Fired),
            "cancelled" => Ok(AlertStatus::Cancelled),
            other => Err(ParseError::Status(other.to_string())),
        }
    }
}

/// User-defined price threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomAlert {
    pub id: AlertId,
    pub target_price: f64,
    pub direction: Direction,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub fired_at: Option<DateTime<Utc>>,
}

impl CustomAlert {
    /// Create an armed alert.
    pub fn armed(id: AlertId, target_price: f64, direction: Direction, now: DateTime<Utc>) -> Self {
        Self {
            id,
            target_price,
            direction,
            status: AlertStatus::Armed,
            created_at: now,
            fired_at: None,
        }
    }

    /// Whether moving from `previous` to `current` crosses the target in
    /// this alert's direction. Landing exactly on the target counts.
    pub fn is_crossed(&self, previous: f64, current: f64) -> bool {
        match self.direction {
            Direction::Above => previous < self.target_price && self.target_price <= current,
            Direction::Below => previous > self.target_price && self.target_price >= current,
        }
    }

    #[inline]
    pub fn is_armed(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// An alert that matched during one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FiredAlert {
    /// Built-in alert: price rose by at least the increase threshold.
    PriceIncrease {
        user_id: UserId,
        baseline: f64,
        price: f64,
    },
    /// A custom alert's threshold was crossed.
    Target {
        user_id: UserId,
        alert_id: AlertId,
        target_price: f64,
        direction: Direction,
        price: f64,
    },
}

impl FiredAlert {
    /// User to notify.
    pub fn user_id(&self) -> UserId {
        match self {
            FiredAlert::PriceIncrease { user_id, .. } | FiredAlert::Target { user_id, .. } => {
                *user_id
            }
        }
    }

    /// Price that triggered the alert.
    pub fn price(&self) -> f64 {
        match self {
            FiredAlert::PriceIncrease { price, .. } | FiredAlert::Target { price, .. } => *price,
        }
    }
}
