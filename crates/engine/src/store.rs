//! Durable storage seam for user state.
//!
//! The registry is the source of truth while the process runs. A store, when
//! configured, receives a copy of each user whose state changed and hands
//! everything back at startup.

use crate::AlertRegistry;
use async_trait::async_trait;
use pricebot_core::{UserAlertState, UserId};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Corrupt stored record for user {user_id}: {reason}")]
    Corrupt { user_id: i64, reason: String },
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Every persisted user.
    async fn load_users(&self) -> Result<Vec<UserAlertState>, StoreError>;

    /// Insert or replace one user and their alerts.
    async fn save_user(&self, user: &UserAlertState) -> Result<(), StoreError>;
}

/// Write the current state of `users` to `store`. Failures are logged; the
/// in-memory state stays authoritative.
///
/// Each user is copied and saved under that user's save lock, so a later
/// copy is never overwritten by an earlier one.
pub async fn persist_users(
    store: &dyn UserStore,
    registry: &AlertRegistry,
    users: impl IntoIterator<Item = UserId>,
) -> usize {
    let mut saved = 0;
    for user_id in users {
        let lock = registry.save_lock(user_id);
        let _guard = lock.lock().await;
        let Some(state) = registry.user_state(user_id) else {
            continue;
        };
        match store.save_user(&state).await {
            Ok(()) => saved += 1,
            Err(e) => warn!(user_id = %user_id, error = %e, "Failed to persist user state"),
        }
    }
    saved
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashmap::DashMap;
    use pretty_assertions::assert_eq;
    use pricebot_core::{AlertStatus, Direction};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Notify;

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

    #[tokio::test]
    async fn test_persist_round_trip_through_registry() {
        let store = MemoryStore::default();
        let registry = AlertRegistry::default();
        registry.set_tracking(UserId(7), true);
        registry
            .register_custom_alert(UserId(7), 3.0, Direction::Above)
            .unwrap();

        let saved = persist_users(&store, &registry, [UserId(7), UserId(8)]).await;
        assert_eq!(saved, 1);

        let restored = AlertRegistry::default();
        restored.restore(store.load_users().await.unwrap());
        assert_eq!(restored.user_state(UserId(7)), registry.user_state(UserId(7)));
    }

    /// Holds the first save until released.
    #[derive(Default)]
    struct GatedStore {
        inner: MemoryStore,
        calls: AtomicUsize,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl UserStore for GatedStore {
        async fn load_users(&self) -> Result<Vec<UserAlertState>, StoreError> {
            self.inner.load_users().await
        }

        async fn save_user(&self, user: &UserAlertState) -> Result<(), StoreError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.save_user(user).await
        }
    }

    #[tokio::test]
    async fn test_overlapping_saves_keep_latest_state() {
        let store = Arc::new(GatedStore::default());
        let registry = Arc::new(AlertRegistry::default());
        let user = UserId(9);
        let id = registry
            .register_custom_alert(user, 3.0, Direction::Above)
            .unwrap();

        let first = {
            let (store, registry) = (store.clone(), registry.clone());
            tokio::spawn(async move { persist_users(store.as_ref(), &registry, [user]).await })
        };
        // The first save has copied the armed alert and is parked.
        store.entered.notified().await;

        registry.cancel_alert(user, id).unwrap();
        let second = {
            let (store, registry) = (store.clone(), registry.clone());
            tokio::spawn(async move { persist_users(store.as_ref(), &registry, [user]).await })
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        store.release.notify_one();
        assert_eq!(first.await.unwrap(), 1);
        assert_eq!(second.await.unwrap(), 1);

        let saved = store.inner.users.get(&user).unwrap().clone();
        assert_eq!(saved.custom_alerts[0].status, AlertStatus::Cancelled);
    }
}
