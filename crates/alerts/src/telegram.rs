//! Telegram bot handlers and alert delivery.

use crate::commands::{parse_cancel, parse_set_alert, parse_settings, Command};
use async_trait::async_trait;
use pricebot_core::UserId;
use pricebot_engine::format::{
    format_current_price, format_listing, format_preferences, format_price, format_stats,
    format_trend,
};
use pricebot_engine::{DeliveryError, HistoryError, Notifier, PriceService, RegistryError, ServiceError};
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::utils::command::BotCommands;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum TelegramError {
    #[error("Telegram API error: {0}")]
    Api(#[from] teloxide::RequestError),
}

/// Delivers fired alerts as HTML chat messages.
#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, user_id: UserId, message: &str) -> Result<(), DeliveryError> {
        self.bot
            .send_message(ChatId(user_id.0), message)
            .parse_mode(ParseMode::Html)
            .await
            .map(|_| ())
            .map_err(|e| DeliveryError::Failed {
                user_id,
                reason: e.to_string(),
            })
    }
}

/// Telegram bot wrapper.
pub struct TelegramBot {
    bot: Bot,
    service: Arc<PriceService>,
}

impl TelegramBot {
    /// Create a new bot with the given token.
    pub fn new(token: &str, service: Arc<PriceService>) -> Self {
        let bot = Bot::new(token);
        Self { bot, service }
    }

    /// Get the underlying bot for sending messages.
    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    /// Run the bot command handler until Ctrl+C.
    pub async fn run(self: Arc<Self>) {
        if let Err(e) = self.bot.set_my_commands(Command::bot_commands()).await {
            warn!("Failed to register bot commands: {}", e);
        }

        let bot = self.bot.clone();
        let handler = Update::filter_message().filter_command::<Command>().endpoint(
            move |bot: Bot, msg: Message, cmd: Command| {
                let this = Arc::clone(&self);
                async move { this.handle_command(bot, msg, cmd).await }
            },
        );

        info!("Telegram bot started");
        Dispatcher::builder(bot, handler)
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;
        info!("Telegram bot stopped");
    }

    async fn handle_command(
        &self,
        bot: Bot,
        msg: Message,
        cmd: Command,
    ) -> Result<(), TelegramError> {
        let user_id = UserId(msg.chat.id.0);
        let text = self.reply(user_id, cmd).await;
        bot.send_message(msg.chat.id, text)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }

    /// Build the reply for one command, applying its effect first.
    async fn reply(&self, user_id: UserId, cmd: Command) -> String {
        let service = &self.service;
        let asset = service.asset();
        let currency = asset.vs_currency.as_str();

        match cmd {
            Command::Start => format!(
                "👋 Welcome to the {} Price Alert Bot!\n\n\
                 Use /track to get notified when the price rises by {}, or \
                 /setalert to watch a target price.\n\n{}",
                asset.display_name,
                format_price(service.registry().config().increase_threshold, currency),
                escape_html(&Command::descriptions().to_string()),
            ),

            Command::Help => escape_html(&Command::descriptions().to_string()),

            Command::Track => {
                let step = format_price(service.registry().config().increase_threshold, currency);
                if service.track(user_id).await {
                    format!(
                        "✅ You are now tracking {}. You'll be notified every time the price rises by {}.",
                        asset.display_name, step
                    )
                } else {
                    format!("You are already tracking {}.", asset.display_name)
                }
            }

            Command::Stop => {
                if service.stop(user_id).await {
                    "🛑 Price increase notifications stopped. Your target alerts stay active."
                        .to_string()
                } else {
                    "You are not tracking the price. Use /track to start.".to_string()
                }
            }

            Command::Price => match service.current_price() {
                Ok(sample) => format_current_price(asset, sample.value(), sample.timestamp()),
                Err(_) => no_data_reply(),
            },

            Command::SetAlert(args) => {
                let (target, direction) = match parse_set_alert(&args) {
                    Ok(parsed) => parsed,
                    Err(e) => return escape_html(&e.to_string()),
                };
                match service.set_alert(user_id, target, direction).await {
                    Ok((id, direction)) => format!(
                        "🎯 Alert #{} set: you'll be notified when {} goes {} {}.",
                        id,
                        asset.display_name,
                        direction,
                        format_price(target, currency),
                    ),
                    Err(e) => escape_html(&e.to_string()),
                }
            }

            Command::Cancel(args) => {
                let alert_id = match parse_cancel(&args) {
                    Ok(id) => id,
                    Err(e) => return escape_html(&e.to_string()),
                };
                match service.cancel_alert(user_id, alert_id).await {
                    Ok(alert) => format!(
                        "Alert #{} ({} {}) cancelled.",
                        alert.id,
                        alert.direction,
                        format_price(alert.target_price, currency),
                    ),
                    Err(ServiceError::Registry(RegistryError::NotFound { alert_id, .. })) => {
                        format!("Alert #{} not found or already completed.", alert_id)
                    }
                    Err(e) => escape_html(&e.to_string()),
                }
            }

            Command::Alerts => format_listing(asset, &service.list_alerts(user_id)),

            Command::Trend => match service.trend() {
                Ok(trend) => format_trend(asset, &trend),
                Err(ServiceError::History(HistoryError::NoData)) => {
                    "Not enough data for trend analysis yet. Please try again later.".to_string()
                }
                Err(e) => escape_html(&e.to_string()),
            },

            Command::Stats => match service.stats() {
                Ok(stats) => {
                    let window_hours = service.history().config().window.as_secs() / 3600;
                    format_stats(asset, &stats, window_hours)
                }
                Err(_) => no_data_reply(),
            },

            Command::Settings(args) => match parse_settings(&args) {
                Ok(changes) => format_preferences(&service.settings(user_id, &changes).await),
                Err(e) => escape_html(&e.to_string()),
            },
        }
    }
}

fn no_data_reply() -> String {
    "No price data yet. Please try again in a minute.".to_string()
}

/// Escape text for Telegram's HTML parse mode.
fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
