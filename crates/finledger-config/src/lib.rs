//! finledger-config
//!
//! Persistent engine configuration: ledger timezone, scheduler time,
//! storage location and logging defaults, plus JSON persistence helpers.

pub mod error;
pub mod manager;
pub mod model;

pub use error::ConfigError;
pub use manager::ConfigManager;
pub use model::{default_home_dir, Config, SchedulerConfig};
