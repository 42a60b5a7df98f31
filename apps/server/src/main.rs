//! Price Alert Bot - Headless Server
//!
//! Polls the price of one asset, keeps a rolling history, and notifies
//! Telegram users when their alerts trigger.

mod config;
mod status_notifier;

use clap::Parser;
use config::AppConfig;
use pricebot_alerts::{Database, TelegramBot, TelegramNotifier};
use pricebot_engine::{AlertRegistry, HistoryStore, PollingScheduler, PriceService, UserStore};
use pricebot_feeds::CoinGeckoSource;
use status_notifier::{start_status_notifier, StatusNotifierConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Price Alert Bot CLI
#[derive(Parser, Debug)]
#[command(name = "price-alert-bot")]
#[command(about = "Crypto price alert bot for Telegram", long_about = None)]
struct Args {
    /// Telegram bot token
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    telegram_bot_token: String,

    /// CoinGecko coin id to track
    #[arg(long, env = "PRICE_SYMBOL", default_value = "worldcoin-wld")]
    symbol: String,

    /// Quote currency
    #[arg(long, env = "PRICE_CURRENCY", default_value = "usd")]
    currency: String,

    /// Seconds between polls
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value_t = 60)]
    poll_interval_secs: u64,

    /// Rolling history window in hours
    #[arg(long, env = "WINDOW_HOURS", default_value_t = 24)]
    window_hours: u64,

    /// First retry delay after a failed poll
    #[arg(long, env = "BACKOFF_INITIAL_SECS", default_value_t = 5)]
    backoff_initial_secs: u64,

    /// Retry delay cap
    #[arg(long, env = "BACKOFF_MAX_SECS", default_value_t = 600)]
    backoff_max_secs: u64,

    /// Consecutive failures before the feed is reported degraded
    #[arg(long, env = "DEGRADED_AFTER", default_value_t = 5)]
    degraded_after: u32,

    /// Price rise that triggers the built-in alert
    #[arg(long, env = "INCREASE_THRESHOLD", default_value_t = 1.0)]
    increase_threshold: f64,

    /// Maximum active target alerts per user
    #[arg(long, env = "MAX_ALERTS_PER_USER", default_value_t = 20)]
    max_alerts_per_user: usize,

    /// SQLite URL for persisting users (e.g. sqlite://pricebot.db)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// CoinGecko API base URL
    #[arg(long, env = "COINGECKO_BASE_URL", default_value = "https://api.coingecko.com")]
    coingecko_base_url: String,

    /// CoinGecko demo API key
    #[arg(long, env = "COINGECKO_API_KEY", hide_env_values = true)]
    coingecko_api_key: Option<String>,

    /// Bot token for operator status messages
    #[arg(long, env = "TELEGRAM_STATUS_BOT_TOKEN", hide_env_values = true)]
    status_bot_token: Option<String>,

    /// Chat that receives operator status messages
    #[arg(long, env = "TELEGRAM_STATUS_CHAT_ID")]
    status_chat_id: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl From<&Args> for AppConfig {
    fn from(args: &Args) -> Self {
        AppConfig {
            telegram_bot_token: args.telegram_bot_token.clone(),
            symbol: args.symbol.clone(),
            currency: args.currency.clone(),
            poll_interval_secs: args.poll_interval_secs,
            window_hours: args.window_hours,
            backoff_initial_secs: args.backoff_initial_secs,
            backoff_max_secs: args.backoff_max_secs,
            degraded_after: args.degraded_after,
            increase_threshold: args.increase_threshold,
            max_alerts_per_user: args.max_alerts_per_user,
            database_url: args.database_url.clone().filter(|u| !u.is_empty()),
            coingecko_base_url: args.coingecko_base_url.clone(),
            coingecko_api_key: args.coingecko_api_key.clone().filter(|k| !k.is_empty()),
            log_level: args.log_level.clone(),
        }
    }
}

fn init_logging(level: &str) {
    let level = match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
}

/// Open the database, drop idle users, and load the rest into the registry.
async fn open_store(url: &str, registry: &AlertRegistry) -> Result<Database, pricebot_alerts::DbError> {
    let db = Database::connect(url).await?;

    let pruned = db.prune_idle_users().await?;
    if pruned > 0 {
        info!("  Pruned {} idle users", pruned);
    }

    let users = db.get_all_users().await?;
    registry.restore(users);
    Ok(db)
}

#[tokio::main]
async fn main() {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    init_logging(&args.log_level);

    let config = AppConfig::from(&args);
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return;
    }

    let asset = config.asset();
    info!("🚀 Price Alert Bot starting...");
    info!("  Asset: {}", asset);
    info!("  Poll interval: {}s", config.poll_interval_secs);
    info!("  Window: {}h", config.window_hours);
    info!("  Increase threshold: {}", config.increase_threshold);

    let history = Arc::new(HistoryStore::new(config.history_config()));
    let registry = Arc::new(AlertRegistry::new(config.registry_config()));

    let store: Option<Arc<dyn UserStore>> = match &config.database_url {
        Some(url) => match open_store(url, &registry).await {
            Ok(db) => {
                info!(
                    "  Persistence: {} ({} users restored)",
                    url,
                    registry.user_count()
                );
                Some(Arc::new(db))
            }
            Err(e) => {
                error!("Failed to open database {}: {}", url, e);
                return;
            }
        },
        None => {
            info!("  Persistence: in-memory only (DATABASE_URL not set)");
            None
        }
    };

    let source = match CoinGeckoSource::new(config.coingecko_config()) {
        Ok(source) => Arc::new(source),
        Err(e) => {
            error!("Failed to create price source: {}", e);
            return;
        }
    };

    let mut service = PriceService::new(asset.clone(), history.clone(), registry.clone());
    if let Some(store) = &store {
        service = service.with_store(store.clone());
    }
    let bot = Arc::new(TelegramBot::new(&config.telegram_bot_token, Arc::new(service)));
    let notifier = Arc::new(TelegramNotifier::new(bot.bot().clone()));

    let mut scheduler = PollingScheduler::new(
        asset.clone(),
        config.scheduler_config(),
        source,
        history.clone(),
        registry.clone(),
        notifier,
    );
    if let Some(store) = store {
        scheduler = scheduler.with_store(store);
    }

    let status_handle = match StatusNotifierConfig::new(
        args.status_bot_token.clone(),
        args.status_chat_id.clone(),
    ) {
        Some(status_config) => {
            let (health_tx, health_rx) = mpsc::channel(100);
            scheduler = scheduler.with_health_events(health_tx);
            Some(start_status_notifier(status_config, asset.to_string(), health_rx))
        }
        None => {
            info!("Status notifier disabled (TELEGRAM_STATUS_BOT_TOKEN or TELEGRAM_STATUS_CHAT_ID not set)");
            None
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));
    let bot_handle = tokio::spawn(bot.run());

    // Handle shutdown
    info!("Press Ctrl+C to stop...");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
    }

    warn!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    // Wait for tasks with timeout, then abort
    if tokio::time::timeout(Duration::from_secs(15), scheduler_handle)
        .await
        .is_err()
    {
        warn!("Scheduler did not stop in time");
    }
    if tokio::time::timeout(Duration::from_secs(5), bot_handle)
        .await
        .is_err()
    {
        warn!("Bot dispatcher did not stop in time");
    }
    if let Some(handle) = status_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }

    info!("📈 Final Stats:");
    info!("  Users: {}", registry.user_count());
    info!("  Tracking: {}", registry.tracking_count());
    info!("  Samples in window: {}", history.len());

    info!("👋 Price Alert Bot stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use pricebot_core::{Direction, UserId};

    #[test]
    fn test_args_into_config() {
        let args = Args::parse_from([
            "price-alert-bot",
            "--telegram-bot-token",
            "123:abc",
            "--poll-interval-secs",
            "30",
            "--database-url",
            "",
        ]);
        let config = AppConfig::from(&args);
        assert_eq!(config.poll_interval_secs, 30);
        assert_eq!(config.symbol, "worldcoin-wld");
        assert_eq!(config.database_url, None);
        assert_eq!(config.validate(), Ok(()));
    }

    #[tokio::test]
    async fn test_open_store_restores_registry() {
        let source = AlertRegistry::default();
        source.set_tracking(UserId(5), true);
        source
            .register_custom_alert(UserId(5), 3.0, Direction::Above)
            .unwrap();

        // A file-backed database so two connections see the same data.
        let path = std::env::temp_dir().join(format!("pricebot-test-{}.db", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let url = format!("sqlite://{}", path.display());
        let db = Database::connect(&url).await.unwrap();
        for user in source.snapshot() {
            db.upsert_user(&user).await.unwrap();
        }
        db.upsert_user(&pricebot_core::UserAlertState::new(UserId(6)))
            .await
            .unwrap();

        let registry = AlertRegistry::default();
        open_store(&url, &registry).await.unwrap();
        assert_eq!(registry.user_count(), 1);
        assert!(registry.is_tracking(UserId(5)));
        assert_eq!(registry.list_alerts(UserId(5)).alerts.len(), 1);

        let _ = std::fs::remove_file(&path);
    }
}
