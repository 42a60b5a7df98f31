//! Per-user notification preferences.

use crate::ParseError;
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Daily time range (UTC) during which the built-in alert is held back.
/// A range whose start is after its end wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietHours {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Whether `time` falls inside the range. The end is exclusive.
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= time && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

impl fmt::Display for QuietHours {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

impl FromStr for QuietHours {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseError::QuietHours(s.to_string());
        let (start, end) = s.trim().split_once('-').ok_or_else(err)?;
        let start = NaiveTime::parse_from_str(start.trim(), "%H:%M").map_err(|_| err())?;
        let end = NaiveTime::parse_from_str(end.trim(), "%H:%M").map_err(|_| err())?;
        Ok(Self { start, end })
    }
}

/// Recognized notification options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub quiet_hours: Option<QuietHours>,
    /// Minimum seconds between two built-in increase alerts (0 = no limit).
    pub min_interval_seconds: u64,
}

impl NotificationPreferences {
    /// Whether a built-in alert may be sent at `now`, given when the last
    /// one went out.
    pub fn allows(&self, now: DateTime<Utc>, last_notified_at: Option<DateTime<Utc>>) -> bool {
        if let Some(quiet) = self.quiet_hours {
            if quiet.contains(now.time()) {
                return false;
            }
        }
        match last_notified_at {
            Some(last) if self.min_interval_seconds > 0 => {
                let elapsed = now.signed_duration_since(last).num_seconds();
                elapsed < 0 || elapsed as u64 >= self.min_interval_seconds
            }
            _ => true,
        }
    }

    /// Apply a single change.
    pub fn apply(&mut self, change: PreferenceChange) {
        match change {
            PreferenceChange::QuietHours(hours) => self.quiet_hours = hours,
            PreferenceChange::MinInterval(secs) => self.min_interval_seconds = secs,
        }
    }
}

/// One update to a user's preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferenceChange {
    /// Set or clear quiet hours.
    QuietHours(Option<QuietHours>),
    /// Set the minimum interval between built-in alerts, in seconds.
    MinInterval(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_quiet_hours_same_day() {
        let quiet = QuietHours::new(t(9, 0), t(17, 0));
        assert!(quiet.contains(t(9, 0)));
        assert!(quiet.contains(t(12, 30)));
        assert!(!quiet.contains(t(17, 0)));
        assert!(!quiet.contains(t(8, 59)));
    }

    #[test]
    fn test_quiet_hours_wrap_midnight() {
        let quiet: QuietHours = "22:00-07:00".parse().unwrap();
        assert!(quiet.contains(t(23, 15)));
        assert!(quiet.contains(t(0, 0)));
        assert!(quiet.contains(t(6, 59)));
        assert!(!quiet.contains(t(7, 0)));
        assert!(!quiet.contains(t(12, 0)));
        assert_eq!(quiet.to_string(), "22:00-07:00");
    }

    #[test]
    fn test_quiet_hours_parse_error() {
        assert!("22:00".parse::<QuietHours>().is_err());
        assert!("25:00-07:00".parse::<QuietHours>().is_err());
    }

    #[test]
    fn test_allows_quiet_hours() {
        let prefs = NotificationPreferences {
            quiet_hours: Some(QuietHours::new(t(22, 0), t(7, 0))),
            min_interval_seconds: 0,
        };
        let night = Utc.with_ymd_and_hms(2024, 5, 1, 23, 0, 0).unwrap();
        let noon = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert!(!prefs.allows(night, None));
        assert!(prefs.allows(noon, None));
    }

    #[test]
    fn test_allows_min_interval() {
        let prefs = NotificationPreferences {
            quiet_hours: None,
            min_interval_seconds: 600,
        };
        let last = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert!(prefs.allows(last, None));
        assert!(!prefs.allows(last + chrono::Duration::seconds(599), Some(last)));
        assert!(prefs.allows(last + chrono::Duration::seconds(600), Some(last)));
    }

    #[test]
    fn test_apply_changes() {
        let mut prefs = NotificationPreferences::default();
        prefs.apply(PreferenceChange::MinInterval(300));
        prefs.apply(PreferenceChange::QuietHours(Some(QuietHours::new(t(1, 0), t(2, 0)))));
        assert_eq!(prefs.min_interval_seconds, 300);
        assert!(prefs.quiet_hours.is_some());
        prefs.apply(PreferenceChange::QuietHours(None));
        assert_eq!(prefs.quiet_hours, None);
    }
}
