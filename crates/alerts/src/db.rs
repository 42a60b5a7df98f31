//! SQLite persistence for user alert state.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use pricebot_core::{
    AlertId, AlertStatus, CustomAlert, Direction, NotificationPreferences, QuietHours,
    UserAlertState, UserId,
};
use pricebot_engine::{StoreError, UserStore};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Corrupt record for user {user_id}: {reason}")]
    Corrupt { user_id: i64, reason: String },
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Sqlx(e) => StoreError::Backend(e.to_string()),
            DbError::Corrupt { user_id, reason } => StoreError::Corrupt { user_id, reason },
        }
    }
}

type UserRow = (i64, bool, Option<f64>, Option<String>, Option<String>, i64);
type AlertRow = (i64, i64, f64, String, String, String, Option<String>);

/// Database connection for user state.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to the SQLite database at the given URL and create the schema.
    pub async fn connect(database_url: &str) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        // Each in-memory connection is its own database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), DbError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY,
                tracking_enabled INTEGER NOT NULL DEFAULT 0,
                last_notified_price REAL,
                last_notified_at TEXT,
                quiet_hours TEXT,
                min_interval_seconds INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS custom_alerts (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                target_price REAL NOT NULL,
                direction TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                fired_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_custom_alerts_user ON custom_alerts(user_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert or replace a user together with all of their alerts.
    pub async fn upsert_user(&self, user: &UserAlertState) -> Result<(), DbError> {
        let prefs = &user.notification_preferences;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO users (user_id, tracking_enabled, last_notified_price, last_notified_at, quiet_hours, min_interval_seconds)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                tracking_enabled = excluded.tracking_enabled,
                last_notified_price = excluded.last_notified_price,
                last_notified_at = excluded.last_notified_at,
                quiet_hours = excluded.quiet_hours,
                min_interval_seconds = excluded.min_interval_seconds
            "#,
        )
        .bind(user.user_id.0)
        .bind(user.tracking_enabled)
        .bind(user.last_notified_price)
        .bind(user.last_notified_at.map(encode_time))
        .bind(prefs.quiet_hours.map(|q| q.to_string()))
        .bind(i64::try_from(prefs.min_interval_seconds).unwrap_or(i64::MAX))
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM custom_alerts WHERE user_id = ?")
            .bind(user.user_id.0)
            .execute(&mut *tx)
            .await?;

        for alert in &user.custom_alerts {
            sqlx::query(
                r#"
                INSERT INTO custom_alerts (id, user_id, target_price, direction, status, created_at, fired_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(alert.id.0 as i64)
            .bind(user.user_id.0)
            .bind(alert.target_price)
            .bind(alert.direction.as_str())
            .bind(alert.status.as_str())
            .bind(encode_time(alert.created_at))
            .bind(alert.fired_at.map(encode_time))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(user_id = %user.user_id, alerts = user.custom_alerts.len(), "User saved");
        Ok(())
    }

    /// Load every stored user with their alerts.
    pub async fn get_all_users(&self) -> Result<Vec<UserAlertState>, DbError> {
        let users = sqlx::query_as::<_, UserRow>(
            "SELECT user_id, tracking_enabled, last_notified_price, last_notified_at, quiet_hours, min_interval_seconds FROM users ORDER BY user_id",
        )
        .fetch_all(&self.pool)
        .await?;

        let alerts = sqlx::query_as::<_, AlertRow>(
            "SELECT id, user_id, target_price, direction, status, created_at, fired_at FROM custom_alerts ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut states = BTreeMap::new();
        for row in users {
            let state = decode_user(row)?;
            states.insert(state.user_id, state);
        }

        for row in alerts {
            let user_id = row.1;
            let alert = decode_alert(row)?;
            let state = states.get_mut(&UserId(user_id)).ok_or_else(|| DbError::Corrupt {
                user_id,
                reason: format!("alert #{} has no owning user", alert.id),
            })?;
            state.custom_alerts.push(alert);
        }

        Ok(states.into_values().collect())
    }

    /// Delete users with nothing enabled and no armed alerts.
    pub async fn prune_idle_users(&self) -> Result<u64, DbError> {
        let result = sqlx::query(
            r#"
            DELETE FROM users
            WHERE tracking_enabled = 0
              AND quiet_hours IS NULL
              AND min_interval_seconds = 0
              AND NOT EXISTS (
                  SELECT 1 FROM custom_alerts
                  WHERE custom_alerts.user_id = users.user_id AND status = 'armed'
              )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "DELETE FROM custom_alerts WHERE user_id NOT IN (SELECT user_id FROM users)",
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl UserStore for Database {
    async fn load_users(&self) -> Result<Vec<UserAlertState>, StoreError> {
        Ok(self.get_all_users().await?)
    }

    async fn save_user(&self, user: &UserAlertState) -> Result<(), StoreError> {
        Ok(self.upsert_user(user).await?)
    }
}

fn encode_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_time(user_id: i64, raw: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DbError::Corrupt {
            user_id,
            reason: format!("bad timestamp '{}': {}", raw, e),
        })
}

fn decode_user(row: UserRow) -> Result<UserAlertState, DbError> {
    let (user_id, tracking_enabled, last_notified_price, last_notified_at, quiet_hours, min_interval) =
        row;
    let corrupt = |reason: String| DbError::Corrupt { user_id, reason };

    let last_notified_at = last_notified_at
        .as_deref()
        .map(|raw| decode_time(user_id, raw))
        .transpose()?;
    let quiet_hours = quiet_hours
        .as_deref()
        .map(QuietHours::from_str)
        .transpose()
        .map_err(|e| corrupt(e.to_string()))?;

    Ok(UserAlertState {
        user_id: UserId(user_id),
        tracking_enabled,
        last_notified_price,
        last_notified_at,
        custom_alerts: Vec::new(),
        notification_preferences: NotificationPreferences {
            quiet_hours,
            min_interval_seconds: u64::try_from(min_interval).unwrap_or(0),
        },
    })
}

fn decode_alert(row: AlertRow) -> Result<CustomAlert, DbError> {
    let (id, user_id, target_price, direction, status, created_at, fired_at) = row;
    let corrupt = |reason: String| DbError::Corrupt { user_id, reason };

    Ok(CustomAlert {
        id: AlertId(u64::try_from(id).map_err(|_| corrupt(format!("negative alert id {}", id)))?),
        target_price,
        direction: Direction::from_str(&direction).map_err(|e| corrupt(e.to_string()))?,
        status: AlertStatus::from_str(&status).map_err(|e| corrupt(e.to_string()))?,
        created_at: decode_time(user_id, &created_at)?,
        fired_at: fired_at
            .as_deref()
            .map(|raw| decode_time(user_id, raw))
            .transpose()?,
    })
}
