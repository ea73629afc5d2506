//! Bank account documents owned by a single user.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::*;

/// Represents a bank account whose balance tracks its paid transactions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BankAccount {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AccountType,
    #[serde(default)]
    pub bank: String,
    pub currency: String,
    pub balance: f64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Incremented on every balance write; used for compare-and-set updates.
    #[serde(default)]
    pub version: u64,
}

impl BankAccount {
    /// Creates an active account holding `balance`.
    pub fn new(
        name: impl Into<String>,
        kind: AccountType,
        currency: impl Into<String>,
        balance: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            bank: String::new(),
            currency: currency.into(),
            balance,
            is_active: true,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn with_bank(mut self, bank: impl Into<String>) -> Self {
        self.bank = bank.into();
        self
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl Identifiable for BankAccount {
    fn id(&self) -> Uuid {
        self.id
    }
}

impl NamedEntity for BankAccount {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Enumerates the supported account classifications.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    Checking,
    Savings,
    Investment,
    Wallet,
    Other,
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AccountType::Checking => "Checking",
            AccountType::Savings => "Savings",
            AccountType::Investment => "Investment",
            AccountType::Wallet => "Wallet",
            AccountType::Other => "Other",
        };
        f.write_str(label)
    }
}
