//! Per-user partition document holding every entity owned by one user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{account::BankAccount, card::*, common::UserId, transaction::*};

/// Schema version written by this crate. Loaders reject documents with a newer one.
pub const CURRENT_SCHEMA_VERSION: u8 = 1;

fn default_schema_version() -> u8 {
    CURRENT_SCHEMA_VERSION
}

/// A credit card together with its invoice collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CardRecord {
    pub card: CreditCard,
    #[serde(default)]
    pub invoices: Vec<CreditCardInvoice>,
}

impl CardRecord {
    pub fn new(card: CreditCard) -> Self {
        Self {
            card,
            invoices: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserLedger {
    #[serde(default = "default_schema_version")]
    pub schema_version: u8,
    pub user_id: UserId,
    #[serde(default)]
    pub accounts: Vec<BankAccount>,
    #[serde(default)]
    pub credit_cards: Vec<CardRecord>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    pub updated_at: DateTime<Utc>,
}

impl UserLedger {
    pub fn new(user_id: UserId) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            user_id,
            accounts: Vec::new(),
            credit_cards: Vec::new(),
            transactions: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn account(&self, id: Uuid) -> Option<&BankAccount> {
        self.accounts.iter().find(|account| account.id == id)
    }

    pub fn account_mut(&mut self, id: Uuid) -> Option<&mut BankAccount> {
        self.accounts.iter_mut().find(|account| account.id == id)
    }

    pub fn card_record(&self, card_id: Uuid) -> Option<&CardRecord> {
        self.credit_cards
            .iter()
            .find(|record| record.card.id == card_id)
    }

    pub fn card_record_mut(&mut self, card_id: Uuid) -> Option<&mut CardRecord> {
        self.credit_cards
            .iter_mut()
            .find(|record| record.card.id == card_id)
    }

    pub fn transaction(&self, id: Uuid) -> Option<&Transaction> {
        self.transactions.iter().find(|txn| txn.id == id)
    }

    pub fn transaction_index(&self, id: Uuid) -> Option<usize> {
        self.transactions.iter().position(|txn| txn.id == id)
    }

    /// Transactions matching `query`, ordered by date then insertion.
    pub fn select(&self, query: &TransactionQuery) -> Vec<Transaction> {
        let mut rows: Vec<Transaction> = self
            .transactions
            .iter()
            .filter(|txn| query.matches(txn))
            .cloned()
            .collect();
        rows.sort_by_key(|txn| txn.date);
        rows
    }
}
