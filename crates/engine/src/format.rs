//! Chat message formatting (Telegram HTML).

use crate::{AlertListing, PriceStats, Trend, TrendDirection};
use chrono::{DateTime, Utc};
use pricebot_core::{Direction, FiredAlert, NotificationPreferences, TrackedAsset};

/// Format a price with precision based on magnitude.
pub fn format_price(price: f64, currency: &str) -> String {
    let abs_price = price.abs();
    let digits = if abs_price >= 1000.0 {
        2
    } else if abs_price >= 1.0 {
        4
    } else if abs_price >= 0.01 {
        6
    } else if abs_price >= 0.0001 {
        8
    } else {
        10
    };

    match currency.to_ascii_lowercase().as_str() {
        "usd" => format!("${:.*}", digits, price),
        "eur" => format!("€{:.*}", digits, price),
        other => format!("{:.*} {}", digits, price, other.to_ascii_uppercase()),
    }
}

fn timestamp_line(now: DateTime<Utc>) -> String {
    format!("⏰ {}", now.format("%Y-%m-%d %H:%M:%S UTC"))
}

/// Notification text for a fired alert.
pub fn format_fired_alert(alert: &FiredAlert, asset: &TrackedAsset) -> String {
    let currency = asset.vs_currency.as_str();
    let body = match alert {
        FiredAlert::PriceIncrease {
            baseline, price, ..
        } => format!(
            "🚨 <b>{} Price Alert</b> 🚨\n\n\
             <b>Current Price:</b> {}\n\
             Price has increased by {} since your last alert (from {}).",
            asset.display_name,
            format_price(*price, currency),
            format_price(price - baseline, currency),
            format_price(*baseline, currency),
        ),
        FiredAlert::Target {
            alert_id,
            target_price,
            direction,
            price,
            ..
        } => {
            let verb = match direction {
                Direction::Above => "risen above",
                Direction::Below => "fallen below",
            };
            format!(
                "🎯 <b>Price Alert #{}</b>\n\n\
                 {} has {} your target of {}.\n\
                 <b>Current Price:</b> {}",
                alert_id,
                asset.display_name,
                verb,
                format_price(*target_price, currency),
                format_price(*price, currency),
            )
        }
    };
    format!("{}\n\n{}", body, timestamp_line(Utc::now()))
}

/// Reply for `/price`.
pub fn format_current_price(asset: &TrackedAsset, price: f64, at: DateTime<Utc>) -> String {
    format!(
        "Current {} Price: <b>{}</b>\n<i>as of {}</i>",
        asset.display_name,
        format_price(price, &asset.vs_currency),
        at.format("%H:%M:%S UTC")
    )
}

/// Reply for `/stats`.
pub fn format_stats(asset: &TrackedAsset, stats: &PriceStats, window_hours: u64) -> String {
    let currency = asset.vs_currency.as_str();
    format!(
        "📊 <b>{} Price Statistics</b>\n\n\
         Current: {}\n\
         {}h High: {}\n\
         {}h Low: {}\n\
         {}h Average: {}\n\n\
         <i>{} samples since {}</i>",
        asset.display_name,
        format_price(stats.current, currency),
        window_hours,
        format_price(stats.max, currency),
        window_hours,
        format_price(stats.min, currency),
        window_hours,
        format_price(stats.average, currency),
        stats.samples,
        stats.oldest_at.format("%Y-%m-%d %H:%M UTC"),
    )
}

/// One-line trend description.
pub fn describe_trend(trend: &Trend) -> String {
    match (trend.direction, trend.strong) {
        (TrendDirection::Rising, true) => {
            format!("📈 Strong Upward Trend (+{:.2}%)", trend.change_pct)
        }
        (TrendDirection::Rising, false) => {
            format!("↗️ Slight Upward Trend (+{:.2}%)", trend.change_pct)
        }
        (TrendDirection::Falling, true) => {
            format!("📉 Strong Downward Trend ({:.2}%)", trend.change_pct)
        }
        (TrendDirection::Falling, false) => {
            format!("↘️ Slight Downward Trend ({:.2}%)", trend.change_pct)
        }
        (TrendDirection::Flat, _) => format!("➡️ Stable Price ({:+.2}%)", trend.change_pct),
    }
}

/// Reply for `/trend`.
pub fn format_trend(asset: &TrackedAsset, trend: &Trend) -> String {
    let currency = asset.vs_currency.as_str();
    format!(
        "<b>{} Price Trend</b>\n{}\n\n{} → {}",
        asset.display_name,
        describe_trend(trend),
        format_price(trend.oldest, currency),
        format_price(trend.newest, currency),
    )
}

/// Reply for `/alerts`.
pub fn format_listing(asset: &TrackedAsset, listing: &AlertListing) -> String {
    let tracking = if listing.tracking_enabled {
        "✅ On"
    } else {
        "⏸ Off"
    };
    let mut text = format!("<b>Your Price Alerts</b>\n\nIncrease tracking: {}\n", tracking);

    if listing.alerts.is_empty() {
        text.push_str("\nYou have no active price alerts.");
        return text;
    }

    text.push('\n');
    for alert in &listing.alerts {
        text.push_str(&format!(
            "#{} — {} {} ⏳ Waiting\n",
            alert.id,
            alert.direction,
            format_price(alert.target_price, &asset.vs_currency),
        ));
    }
    text.push_str("\nCancel one with /cancel &lt;id&gt;");
    text
}

/// Reply for `/settings`.
pub fn format_preferences(prefs: &NotificationPreferences) -> String {
    let quiet = prefs
        .quiet_hours
        .map(|q| format!("{} UTC", q))
        .unwrap_or_else(|| "off".to_string());
    let interval = if prefs.min_interval_seconds == 0 {
        "none".to_string()
    } else {
        format!("{}s", prefs.min_interval_seconds)
    };
    format!(
        "<b>Notification Settings</b>\n\n\
         Quiet hours: {}\n\
         Minimum interval: {}\n\n\
         Change with:\n\
         /settings quiet 22:00-07:00\n\
         /settings quiet off\n\
         /settings interval 600",
        quiet, interval
    )
}
