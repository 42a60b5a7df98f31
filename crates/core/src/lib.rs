//! Core data types for the price alert bot.

pub mod alert;
pub mod asset;
pub mod preferences;
pub mod price;
pub mod user;

pub use alert::*;
pub use asset::*;
pub use preferences::*;
pub use price::*;
pub use user::*;
