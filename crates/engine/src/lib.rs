//! Price alert engine.
//!
//! This crate owns the rolling price history, the per-user alert registry,
//! and the polling loop that feeds new prices through both.

pub mod format;
pub mod history;
pub mod notifier;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod store;

pub use history::*;
pub use notifier::*;
pub use registry::*;
pub use scheduler::*;
pub use service::*;
pub use store::*;
