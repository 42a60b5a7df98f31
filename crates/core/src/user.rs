//! Per-user alert state.

use crate::{CustomAlert, NotificationPreferences, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything the engine knows about one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAlertState {
    pub user_id: UserId,
    /// Whether the built-in increase alert is enabled.
    pub tracking_enabled: bool,
    /// Reference price for the built-in alert. Unset until the first
    /// evaluation after tracking is enabled, which anchors it to the prior
    /// sample; moved to the new price every time the alert fires.
    pub last_notified_price: Option<f64>,
    /// When the built-in alert last fired.
    pub last_notified_at: Option<DateTime<Utc>>,
    pub custom_alerts: Vec<CustomAlert>,
    pub notification_preferences: NotificationPreferences,
}

impl UserAlertState {
    /// Fresh state with nothing enabled.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            tracking_enabled: false,
            last_notified_price: None,
            last_notified_at: None,
            custom_alerts: Vec::new(),
            notification_preferences: NotificationPreferences::default(),
        }
    }

    /// Custom alerts that are still armed.
    pub fn armed_alerts(&self) -> impl Iterator<Item = &CustomAlert> {
        self.custom_alerts.iter().filter(|a| a.is_armed())
    }

    /// Drop the oldest fired or cancelled alerts so that at most `keep`
    /// of them remain. Armed alerts are never touched. Returns how many
    /// were dropped.
    pub fn prune_finished(&mut self, keep: usize) -> usize {
        let finished = self
            .custom_alerts
            .iter()
            .filter(|a| a.status.is_terminal())
            .count();
        let mut excess = finished.saturating_sub(keep);
        if excess == 0 {
            return 0;
        }

        let dropped = excess;
        // Alerts are kept in creation order, so the first terminal ones are the oldest.
        self.custom_alerts.retain(|a| {
            if excess > 0 && a.status.is_terminal() {
                excess -= 1;
                false
            } else {
                true
            }
        });
        dropped
    }

    /// Nothing enabled, no armed alerts, default preferences.
    pub fn is_idle(&self) -> bool {
        !self.tracking_enabled
            && self.armed_alerts().next().is_none()
            && self.notification_preferences == NotificationPreferences::default()
    }
}
