//! User-facing operations behind the chat commands.

use crate::store::{persist_users, UserStore};
use crate::{
    AlertListing, AlertRegistry, HistoryError, HistoryStore, PriceStats, RegistryError, Trend,
};
use pricebot_core::{
    AlertId, CustomAlert, Direction, NotificationPreferences, PreferenceChange, PriceSample,
    TrackedAsset, UserId,
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ServiceError {
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Shared handle over the history and the registry.
///
/// Every mutation is written through to the store, when one is configured,
/// before the call returns.
#[derive(Clone)]
pub struct PriceService {
    asset: TrackedAsset,
    history: Arc<HistoryStore>,
    registry: Arc<AlertRegistry>,
    store: Option<Arc<dyn UserStore>>,
}

impl PriceService {
    pub fn new(
        asset: TrackedAsset,
        history: Arc<HistoryStore>,
        registry: Arc<AlertRegistry>,
    ) -> Self {
        Self {
            asset,
            history,
            registry,
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn UserStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn asset(&self) -> &TrackedAsset {
        &self.asset
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn registry(&self) -> &AlertRegistry {
        &self.registry
    }

    async fn persist(&self, user_id: UserId) {
        if let Some(store) = &self.store {
            persist_users(store.as_ref(), &self.registry, [user_id]).await;
        }
    }

    /// Enable the built-in increase alert. Returns false if it was already on.
    pub async fn track(&self, user_id: UserId) -> bool {
        let changed = self.registry.set_tracking(user_id, true);
        self.persist(user_id).await;
        changed
    }

    /// Disable the built-in increase alert. Returns false if it was already off.
    pub async fn stop(&self, user_id: UserId) -> bool {
        let changed = self.registry.set_tracking(user_id, false);
        self.persist(user_id).await;
        changed
    }

    /// Register a custom alert. Without an explicit direction the alert
    /// waits for the price to move towards the target from where it is now;
    /// with no price data yet it defaults to `Above`.
    pub async fn set_alert(
        &self,
        user_id: UserId,
        target_price: f64,
        direction: Option<Direction>,
    ) -> Result<(AlertId, Direction), ServiceError> {
        let direction = direction.unwrap_or_else(|| match self.history.current_price() {
            Ok(current) if target_price < current => Direction::Below,
            _ => Direction::Above,
        });

        let id = self
            .registry
            .register_custom_alert(user_id, target_price, direction)?;
        self.persist(user_id).await;
        Ok((id, direction))
    }

    pub async fn cancel_alert(
        &self,
        user_id: UserId,
        alert_id: AlertId,
    ) -> Result<CustomAlert, ServiceError> {
        let alert = self.registry.cancel_alert(user_id, alert_id)?;
        self.persist(user_id).await;
        Ok(alert)
    }

    /// Apply preference changes in order and return the result. An empty
    /// slice just reads the current preferences.
    pub async fn settings(
        &self,
        user_id: UserId,
        changes: &[PreferenceChange],
    ) -> NotificationPreferences {
        if changes.is_empty() {
            return self.registry.preferences(user_id);
        }

        let mut prefs = NotificationPreferences::default();
        for change in changes {
            prefs = self.registry.update_preferences(user_id, *change);
        }
        self.persist(user_id).await;
        prefs
    }

    /// Latest recorded sample.
    pub fn current_price(&self) -> Result<PriceSample, ServiceError> {
        self.history.latest().ok_or(ServiceError::History(HistoryError::NoData))
    }

    pub fn list_alerts(&self, user_id: UserId) -> AlertListing {
        self.registry.list_alerts(user_id)
    }

    pub fn trend(&self) -> Result<Trend, ServiceError> {
        Ok(self.history.trend()?)
    }

    pub fn stats(&self) -> Result<PriceStats, ServiceError> {
        Ok(self.history.statistics()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use crate::HistoryConfig;
    use async_trait::async_trait;
    use dashmap::DashMap;
    use pretty_assertions::assert_eq;
    use pricebot_core::{QuietHours, UserAlertState};

    #[derive(Default)]
    struct MemoryStore {
        users: DashMap<UserId, UserAlertState>,
    }

    #[async_trait]
    impl UserStore for MemoryStore {
        async fn load_users(&self) -> Result<Vec<UserAlertState>, StoreError> {
            Ok(self.users.iter().map(|u| u.value().clone()).collect())
        }

        async fn save_user(&self, user: &UserAlertState) -> Result<(), StoreError> {
            self.users.insert(user.user_id, user.clone());
            Ok(())
        }
    }

    fn service() -> (PriceService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::default());
        let service = PriceService::new(
            TrackedAsset::worldcoin(),
            Arc::new(HistoryStore::new(HistoryConfig::default())),
            Arc::new(AlertRegistry::default()),
        )
        .with_store(store.clone());
        (service, store)
    }

    #[tokio::test]
    async fn test_queries_without_data() {
        let (service, _) = service();
        assert_eq!(
            service.current_price(),
            Err(ServiceError::History(HistoryError::NoData))
        );
        assert!(service.trend().is_err());
        assert!(service.stats().is_err());
    }

    #[tokio::test]
    async fn test_track_and_stop_are_persisted() {
        let (service, store) = service();
        let user = UserId(10);

        assert!(service.track(user).await);
        assert!(!service.track(user).await);
        assert!(store.users.get(&user).unwrap().tracking_enabled);

        assert!(service.stop(user).await);
        assert!(!store.users.get(&user).unwrap().tracking_enabled);
    }

    #[tokio::test]
    async fn test_set_alert_infers_direction() {
        let (service, _) = service();
        let user = UserId(10);

        // No data yet.
        let (_, direction) = service.set_alert(user, 2.0, None).await.unwrap();
        assert_eq!(direction, Direction::Above);

        service.history().record(PriceSample::now(2.5)).unwrap();
        let (_, direction) = service.set_alert(user, 2.0, None).await.unwrap();
        assert_eq!(direction, Direction::Below);
        let (_, direction) = service.set_alert(user, 3.0, None).await.unwrap();
        assert_eq!(direction, Direction::Above);
        let (_, direction) = service
            .set_alert(user, 3.0, Some(Direction::Below))
            .await
            .unwrap();
        assert_eq!(direction, Direction::Below);

        assert_eq!(service.list_alerts(user).alerts.len(), 4);
    }

    #[tokio::test]
    async fn test_set_alert_rejects_bad_target() {
        let (service, store) = service();
        assert_eq!(
            service.set_alert(UserId(1), -1.0, None).await,
            Err(ServiceError::Registry(RegistryError::InvalidThreshold(-1.0)))
        );
        assert!(store.users.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_alert_persists() {
        let (service, store) = service();
        let user = UserId(3);
        let (id, _) = service.set_alert(user, 5.0, None).await.unwrap();

        service.cancel_alert(user, id).await.unwrap();
        let saved = store.users.get(&user).unwrap().clone();
        assert!(saved.armed_alerts().next().is_none());
        assert!(matches!(
            service.cancel_alert(user, id).await,
            Err(ServiceError::Registry(RegistryError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_settings_apply_in_order() {
        let (service, store) = service();
        let user = UserId(4);
        let quiet: QuietHours = "22:00-07:00".parse().unwrap();

        let prefs = service
            .settings(
                user,
                &[
                    PreferenceChange::QuietHours(Some(quiet)),
                    PreferenceChange::MinInterval(600),
                ],
            )
            .await;
        assert_eq!(prefs.quiet_hours, Some(quiet));
        assert_eq!(prefs.min_interval_seconds, 600);
        assert_eq!(store.users.get(&user).unwrap().notification_preferences, prefs);

        assert_eq!(service.settings(user, &[]).await, prefs);
    }

    #[tokio::test]
    async fn test_stats_and_trend_after_samples() {
        let (service, _) = service();
        service.history().record(PriceSample::now(2.0)).unwrap();
        service.history().record(PriceSample::now(2.4)).unwrap();

        assert_eq!(service.current_price().unwrap().value(), 2.4);
        let stats = service.stats().unwrap();
        assert_eq!(stats.max, 2.4);
        assert_eq!(stats.samples, 2);
        assert!(service.trend().unwrap().change_pct > 0.0);
    }
}
