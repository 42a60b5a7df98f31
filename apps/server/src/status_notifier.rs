//! Operator notifications for price feed health.
//!
//! Sends Telegram messages when the scheduler reports the feed degraded
//! or recovered.

use pricebot_engine::HealthEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Configuration for status notifications.
#[derive(Debug, Clone)]
pub struct StatusNotifierConfig {
    /// Telegram bot token for status notifications
    pub bot_token: String,
    /// Telegram chat ID to send notifications to
    pub chat_id: String,
}

impl StatusNotifierConfig {
    /// Build from TELEGRAM_STATUS_BOT_TOKEN / TELEGRAM_STATUS_CHAT_ID.
    /// Returns None unless both are set and non-empty.
    pub fn new(bot_token: Option<String>, chat_id: Option<String>) -> Option<Self> {
        let bot_token = bot_token.filter(|t| !t.is_empty())?;
        let chat_id = chat_id.filter(|c| !c.is_empty())?;

        Some(Self { bot_token, chat_id })
    }
}

/// Status notifier that sends Telegram messages for health events.
pub struct StatusNotifier {
    config: StatusNotifierConfig,
    http_client: reqwest::Client,
    hostname: String,
    asset: String,
}

impl StatusNotifier {
    pub fn new(config: StatusNotifierConfig, asset: String) -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        Self {
            config,
            http_client: reqwest::Client::new(),
            hostname,
            asset,
        }
    }

    /// Message body for an event.
    fn describe(&self, event: &HealthEvent) -> String {
        match event {
            HealthEvent::Degraded {
                consecutive_failures,
                last_error,
            } => format!(
                "⚠️ <b>{}</b> price feed degraded\n{} consecutive failures\nLast error: {}",
                self.asset,
                consecutive_failures,
                escape_html(last_error)
            ),
            HealthEvent::Recovered { after_failures } => format!(
                "🔄 <b>{}</b> price feed recovered after {} failures",
                self.asset, after_failures
            ),
        }
    }

    /// Send a status notification.
    pub async fn notify(&self, event: &HealthEvent) {
        let message = self.describe(event);

        let now = chrono::Utc::now();
        let full_message = format!(
            "<b>{}</b>\n{}\n\n⏰ {}",
            self.hostname,
            message,
            now.format("%Y-%m-%d %H:%M:%S UTC")
        );

        if let Err(e) = self.send_telegram_message(&full_message).await {
            error!("Failed to send status notification: {}", e);
        }
    }

    /// Send a message via Telegram Bot API.
    async fn send_telegram_message(&self, message: &str) -> Result<(), reqwest::Error> {
        let url = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            self.config.bot_token
        );

        let params = [
            ("chat_id", self.config.chat_id.as_str()),
            ("text", message),
            ("parse_mode", "HTML"),
            ("disable_web_page_preview", "true"),
        ];

        let response = self.http_client.post(&url).form(&params).send().await?;

        if !response.status().is_success() {
            warn!(
                "Telegram API returned non-success status: {}",
                response.status()
            );
        }

        Ok(())
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Start the status notifier background task. It runs until every sender
/// of `rx` is dropped.
pub fn start_status_notifier(
    config: StatusNotifierConfig,
    asset: String,
    mut rx: mpsc::Receiver<HealthEvent>,
) -> tokio::task::JoinHandle<()> {
    info!(
        "Status notifier enabled (chat_id: {})",
        &config.chat_id[..config.chat_id.len().min(6)]
    );
    let notifier = Arc::new(StatusNotifier::new(config, asset));

    tokio::spawn(async move {
        info!("Status notifier started");

        while let Some(event) = rx.recv().await {
            notifier.notify(&event).await;
        }

        info!("Status notifier stopped");
    })
}
