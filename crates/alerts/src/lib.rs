//! Telegram front end and SQLite persistence for the price alert bot.
//!
//! This crate provides:
//! - Command parsing and the Telegram command handler
//! - Alert delivery through the Bot API
//! - SQLite-backed storage of user alert state

pub mod commands;
pub mod db;
pub mod telegram;

pub use commands::Command;
pub use db::{Database, DbError};
pub use telegram::{TelegramBot, TelegramError, TelegramNotifier};
