//! Delivery of fired alerts.

use crate::format::format_fired_alert;
use async_trait::async_trait;
use pricebot_core::{FiredAlert, TrackedAsset, UserId};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Delivery to {user_id} failed: {reason}")]
    Failed { user_id: UserId, reason: String },
}

/// Delivers a formatted message to one user.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, user_id: UserId, message: &str) -> Result<(), DeliveryError>;
}

/// Counts from one dispatch round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub delivered: u32,
    pub failed: u32,
}

/// Send every fired alert. A failure is logged and does not stop the rest;
/// nothing is retried and the alerts stay fired.
pub async fn dispatch(
    notifier: &dyn Notifier,
    asset: &TrackedAsset,
    alerts: &[FiredAlert],
) -> DispatchSummary {
    let mut summary = DispatchSummary::default();

    for alert in alerts {
        let user_id = alert.user_id();
        let message = format_fired_alert(alert, asset);
        match notifier.send(user_id, &message).await {
            Ok(()) => {
                info!(user_id = %user_id, price = alert.price(), "Alert sent");
                summary.delivered += 1;
            }
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Failed to send alert");
                summary.failed += 1;
            }
        }
    }

    summary
}
