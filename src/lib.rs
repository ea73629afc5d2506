//! finledger: ledger and credit-card invoice reconciliation engine.
//!
//! This crate wires the domain, core services, JSON storage and
//! configuration crates into a runnable engine and CLI.

pub mod engine;
pub mod errors;
pub mod scheduler;
pub mod system_clock;
pub mod utils;

pub use engine::LedgerEngine;
pub use errors::AppError;

use std::sync::Once;

static INIT_TRACING: Once = Once::new();

/// Initializes global tracing with the default filter.
pub fn init() {
    init_with_filter(utils::DEFAULT_LOG_FILTER);
}

/// Initializes global tracing once; `RUST_LOG` takes precedence over `filter`.
pub fn init_with_filter(filter: &str) {
    INIT_TRACING.call_once(|| {
        utils::init_tracing(filter);
        tracing::debug!(version = utils::build_info::VERSION, "finledger tracing initialized");
    });
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_is_idempotent() {
        super::init();
        super::init_with_filter("finledger=debug");
    }
}
