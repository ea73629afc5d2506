//! finledger-core
//!
//! Ledger and credit-invoice reconciliation logic for finledger.
//! Depends on finledger-domain. No CLI, no terminal I/O; persistence goes
//! through the store traits in [`storage`].

pub mod account_service;
pub mod balance_reconciler;
pub mod credit_card_service;
pub mod error;
pub mod invoice_service;
pub mod invoice_status_scheduler;
pub mod invoice_transaction_service;
pub mod memory_store;
pub mod recurring_transaction_service;
pub mod requests;
pub mod settings;
pub mod simple_transaction_service;
pub mod storage;
pub mod time;
pub mod transaction_service;

pub use account_service::*;
pub use balance_reconciler::*;
pub use credit_card_service::*;
pub use error::{CoreError, CoreResult, ErrorKind, InvariantViolation};
pub use invoice_service::*;
pub use invoice_status_scheduler::*;
pub use invoice_transaction_service::*;
pub use memory_store::MemoryLedgerStore;
pub use recurring_transaction_service::*;
pub use requests::*;
pub use settings::LedgerSettings;
pub use simple_transaction_service::*;
pub use storage::*;
pub use time::{Clock, FixedClock};
pub use transaction_service::*;
