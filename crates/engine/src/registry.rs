//! Per-user alert registry.
//!
//! Holds every user's custom threshold alerts and built-in increase alert
//! state, and decides which of them fire for a new price.
//!
//! Each user's state lives in its own map entry. Mutations and the user's
//! part of an evaluation both run under that entry's lock, so a
//! cancellation and a firing can never both win for the same alert.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use pricebot_core::{
    AlertId, AlertStatus, CustomAlert, Direction, FiredAlert, NotificationPreferences,
    PreferenceChange, UserAlertState, UserId,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Float slack when comparing a price move against the increase threshold.
const INCREASE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistryError {
    #[error("Target price must be a positive number, got {0}")]
    InvalidThreshold(f64),
    #[error("Alert #{alert_id} not found")]
    NotFound { user_id: UserId, alert_id: AlertId },
    #[error("Too many active alerts (limit {0})")]
    TooManyAlerts(usize),
}

/// Configuration for alert evaluation.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Rise (in quote currency) that triggers the built-in alert.
    pub increase_threshold: f64,
    /// Maximum armed custom alerts per user.
    pub max_alerts_per_user: usize,
    /// Fired or cancelled alerts kept per user; older ones are dropped.
    pub finished_alerts_kept: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            increase_threshold: 1.0,
            max_alerts_per_user: 20,
            finished_alerts_kept: 10,
        }
    }
}

/// What `/alerts` shows a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertListing {
    pub tracking_enabled: bool,
    /// Non-terminal custom alerts, oldest first.
    pub alerts: Vec<CustomAlert>,
}

/// Registry of all users' alert state.
pub struct AlertRegistry {
    config: RegistryConfig,
    users: DashMap<UserId, UserAlertState>,
    /// Serializes copy-then-save of one user so writes land in order.
    save_locks: DashMap<UserId, Arc<tokio::sync::Mutex<()>>>,
    next_alert_id: AtomicU64,
}

impl AlertRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            users: DashMap::new(),
            save_locks: DashMap::new(),
            next_alert_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Create an armed custom alert for `user_id`.
    pub fn register_custom_alert(
        &self,
        user_id: UserId,
        target_price: f64,
        direction: Direction,
    ) -> Result<AlertId, RegistryError> {
        if !target_price.is_finite() || target_price <= 0.0 {
            return Err(RegistryError::InvalidThreshold(target_price));
        }

        let mut user = self
            .users
            .entry(user_id)
            .or_insert_with(|| UserAlertState::new(user_id));

        if user.armed_alerts().count() >= self.config.max_alerts_per_user {
            return Err(RegistryError::TooManyAlerts(self.config.max_alerts_per_user));
        }

        let id = AlertId(self.next_alert_id.fetch_add(1, Ordering::Relaxed));
        user.custom_alerts
            .push(CustomAlert::armed(id, target_price, direction, Utc::now()));

        info!(
            user_id = %user_id,
            alert_id = %id,
            target_price = target_price,
            direction = %direction,
            "Custom alert registered"
        );
        Ok(id)
    }

    /// Cancel an armed alert owned by `user_id`.
    ///
    /// Unknown ids, other users' alerts, and alerts that already fired or
    /// were cancelled all report `NotFound`.
    pub fn cancel_alert(
        &self,
        user_id: UserId,
        alert_id: AlertId,
    ) -> Result<CustomAlert, RegistryError> {
        let not_found = RegistryError::NotFound { user_id, alert_id };
        let mut user = self.users.get_mut(&user_id).ok_or(not_found.clone())?;

        let alert = user
            .custom_alerts
            .iter_mut()
            .find(|a| a.id == alert_id && a.is_armed())
            .ok_or(not_found)?;
        alert.status = AlertStatus::Cancelled;
        let cancelled = alert.clone();
        user.prune_finished(self.config.finished_alerts_kept);

        info!(user_id = %user_id, alert_id = %alert_id, "Custom alert cancelled");
        Ok(cancelled)
    }

    /// Enable or disable the built-in increase alert. Returns whether the
    /// setting changed.
    ///
    /// Enabling clears the stored baseline; the next evaluation anchors it
    /// to that evaluation's previous price.
    pub fn set_tracking(&self, user_id: UserId, enabled: bool) -> bool {
        let mut user = self
            .users
            .entry(user_id)
            .or_insert_with(|| UserAlertState::new(user_id));

        if user.tracking_enabled == enabled {
            return false;
        }
        user.tracking_enabled = enabled;
        if enabled {
            user.last_notified_price = None;
        }
        info!(user_id = %user_id, enabled = enabled, "Tracking updated");
        true
    }

    pub fn is_tracking(&self, user_id: UserId) -> bool {
        self.users
            .get(&user_id)
            .map(|u| u.tracking_enabled)
            .unwrap_or(false)
    }

    /// Non-terminal custom alerts plus the tracking flag.
    pub fn list_alerts(&self, user_id: UserId) -> AlertListing {
        match self.users.get(&user_id) {
            Some(user) => AlertListing {
                tracking_enabled: user.tracking_enabled,
                alerts: user.armed_alerts().cloned().collect(),
            },
            None => AlertListing {
                tracking_enabled: false,
                alerts: Vec::new(),
            },
        }
    }

    pub fn preferences(&self, user_id: UserId) -> NotificationPreferences {
        self.users
            .get(&user_id)
            .map(|u| u.notification_preferences.clone())
            .unwrap_or_default()
    }

    /// Apply a preference change and return the resulting preferences.
    pub fn update_preferences(
        &self,
        user_id: UserId,
        change: PreferenceChange,
    ) -> NotificationPreferences {
        let mut user = self
            .users
            .entry(user_id)
            .or_insert_with(|| UserAlertState::new(user_id));
        user.notification_preferences.apply(change);
        debug!(user_id = %user_id, change = ?change, "Preferences updated");
        user.notification_preferences.clone()
    }

    /// Evaluate a price move against every user's alerts.
    ///
    /// Fired custom alerts become `Fired` and built-in baselines move to
    /// `new_price` before this returns, whatever happens to delivery.
    pub fn evaluate(
        &self,
        previous_price: f64,
        new_price: f64,
        now: DateTime<Utc>,
    ) -> Vec<FiredAlert> {
        let mut fired = Vec::new();

        for mut entry in self.users.iter_mut() {
            let user = entry.value_mut();
            let user_id = user.user_id;

            if user.tracking_enabled {
                let baseline = *user.last_notified_price.get_or_insert(previous_price);
                if new_price - baseline >= self.config.increase_threshold - INCREASE_EPSILON {
                    if user
                        .notification_preferences
                        .allows(now, user.last_notified_at)
                    {
                        user.last_notified_price = Some(new_price);
                        user.last_notified_at = Some(now);
                        fired.push(FiredAlert::PriceIncrease {
                            user_id,
                            baseline,
                            price: new_price,
                        });
                    } else {
                        debug!(
                            user_id = %user_id,
                            price = new_price,
                            "Increase alert held back by preferences"
                        );
                    }
                }
            }

            let mut any_fired = false;
            for alert in user.custom_alerts.iter_mut().filter(|a| a.is_armed()) {
                if alert.is_crossed(previous_price, new_price) {
                    any_fired = true;
                    alert.status = AlertStatus::Fired;
                    alert.fired_at = Some(now);
                    fired.push(FiredAlert::Target {
                        user_id,
                        alert_id: alert.id,
                        target_price: alert.target_price,
                        direction: alert.direction,
                        price: new_price,
                    });
                }
            }
            if any_fired {
                user.prune_finished(self.config.finished_alerts_kept);
            }
        }

        if !fired.is_empty() {
            debug!(
                previous = previous_price,
                price = new_price,
                fired = fired.len(),
                "Alerts fired"
            );
        }
        fired
    }

    /// Copy of one user's state.
    pub fn user_state(&self, user_id: UserId) -> Option<UserAlertState> {
        self.users.get(&user_id).map(|u| u.clone())
    }

    /// Lock held while one user's state is copied and written to a store.
    pub fn save_lock(&self, user_id: UserId) -> Arc<tokio::sync::Mutex<()>> {
        self.save_locks.entry(user_id).or_default().clone()
    }

    /// Copy of every user's state.
    pub fn snapshot(&self) -> Vec<UserAlertState> {
        self.users.iter().map(|u| u.value().clone()).collect()
    }

    /// Load previously persisted users, replacing any in-memory entries with
    /// the same id. Alert ids continue after the highest one restored.
    pub fn restore(&self, users: Vec<UserAlertState>) {
        let max_id = users
            .iter()
            .flat_map(|u| u.custom_alerts.iter().map(|a| a.id.0))
            .max()
            .unwrap_or(0);
        self.next_alert_id.fetch_max(max_id + 1, Ordering::Relaxed);

        let count = users.len();
        for mut user in users {
            user.prune_finished(self.config.finished_alerts_kept);
            self.users.insert(user.user_id, user);
        }
        info!(users = count, "Alert registry restored");
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Users with the built-in alert enabled.
    pub fn tracking_count(&self) -> usize {
        self.users.iter().filter(|u| u.tracking_enabled).count()
    }
}

impl Default for AlertRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}
