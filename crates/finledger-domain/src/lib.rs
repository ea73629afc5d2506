//! finledger-domain
//!
//! Pure domain models (bank accounts, transactions, credit cards, invoices and
//! the per-user ledger partition). No I/O, no storage. Only data types,
//! calendar helpers and core enums.

pub mod account;
pub mod card;
pub mod common;
pub mod ledger;
pub mod transaction;

pub use account::*;
pub use card::*;
pub use common::*;
pub use ledger::*;
pub use transaction::*;
