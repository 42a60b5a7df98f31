//! Bot command definitions and argument parsing.

use pricebot_core::{AlertId, Direction, ParseError, PreferenceChange, QuietHours};
use teloxide::utils::command::BotCommands;
use thiserror::Error;

/// Bot commands.
#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "Start the bot and show available commands")]
    Start,
    #[command(description = "Show help")]
    Help,
    #[command(description = "Get notified every time the price rises by the alert step")]
    Track,
    #[command(description = "Stop price increase notifications")]
    Stop,
    #[command(description = "Show the current price")]
    Price,
    #[command(description = "Set a target alert. Usage: /setalert 2.50 [above|below]")]
    SetAlert(String),
    #[command(description = "Cancel a target alert. Usage: /cancel 3")]
    Cancel(String),
    #[command(description = "List your active alerts")]
    Alerts,
    #[command(description = "Show the price trend over the window")]
    Trend,
    #[command(description = "Show high, low, and average over the window")]
    Stats,
    #[command(description = "Notification settings. Usage: /settings quiet 22:00-07:00 | quiet off | interval 600")]
    Settings(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum ArgsError {
    #[error("Usage: /setalert <price> [above|below]\nExample: /setalert 2.50 above")]
    SetAlertUsage,
    #[error("'{0}' is not a valid price")]
    InvalidPrice(String),
    #[error("Usage: /cancel <id>\nSee /alerts for your alert ids")]
    CancelUsage,
    #[error("Unknown setting '{0}'. Use 'quiet' or 'interval'")]
    UnknownSetting(String),
    #[error("Missing value for '{0}'")]
    MissingValue(String),
    #[error("Invalid interval '{0}', expected a number of seconds")]
    InvalidInterval(String),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// `/setalert <price> [above|below]`. A leading `$` is accepted.
pub fn parse_set_alert(args: &str) -> Result<(f64, Option<Direction>), ArgsError> {
    let mut parts = args.split_whitespace();
    let raw_price = parts.next().ok_or(ArgsError::SetAlertUsage)?;
    let price = raw_price
        .trim_start_matches('$')
        .parse::<f64>()
        .map_err(|_| ArgsError::InvalidPrice(raw_price.to_string()))?;
    let direction = parts.next().map(str::parse::<Direction>).transpose()?;

    if parts.next().is_some() {
        return Err(ArgsError::SetAlertUsage);
    }
    Ok((price, direction))
}

/// `/cancel <id>`.
pub fn parse_cancel(args: &str) -> Result<AlertId, ArgsError> {
    let raw = args.trim();
    if raw.is_empty() {
        return Err(ArgsError::CancelUsage);
    }
    Ok(raw.parse::<AlertId>()?)
}

/// `/settings` arguments as `key value` pairs. Empty input means "show".
pub fn parse_settings(args: &str) -> Result<Vec<PreferenceChange>, ArgsError> {
    let tokens: Vec<&str> = args.split_whitespace().collect();
    let mut changes = Vec::new();

    for pair in tokens.chunks(2) {
        let key = pair[0].to_ascii_lowercase();
        let value = pair
            .get(1)
            .ok_or_else(|| ArgsError::MissingValue(key.clone()))?;

        let change = match key.as_str() {
            "quiet" if value.eq_ignore_ascii_case("off") => PreferenceChange::QuietHours(None),
            "quiet" => PreferenceChange::QuietHours(Some(value.parse::<QuietHours>()?)),
            "interval" => PreferenceChange::MinInterval(
                value
                    .parse::<u64>()
                    .map_err(|_| ArgsError::InvalidInterval(value.to_string()))?,
            ),
            _ => return Err(ArgsError::UnknownSetting(key)),
        };
        changes.push(change);
    }

    Ok(changes)
}
