//! Domain models for ledger transactions, recurrence frequencies, and queries.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::*;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    pub name: String,
    pub category: String,
    pub value: f64,
    pub date: NaiveDate,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub is_recurring: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<Frequency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    pub is_paid: bool,
    pub currency: String,
    pub bank_account_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credit_card_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_transaction_id: Option<Uuid>,
}

impl Transaction {
    /// Creates an unpaid, non-recurring transaction.
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        value: f64,
        date: NaiveDate,
        kind: TransactionType,
        currency: impl Into<String>,
        bank_account_id: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            category: category.into(),
            value,
            date,
            kind,
            is_recurring: false,
            frequency: None,
            start_date: None,
            end_date: None,
            is_paid: false,
            currency: currency.into(),
            bank_account_id,
            series_id: None,
            invoice_id: None,
            credit_card_id: None,
            primary_transaction_id: None,
        }
    }

    pub fn paid(mut self, is_paid: bool) -> Self {
        self.is_paid = is_paid;
        self
    }

    /// Monetary effect this transaction currently has on its bank account.
    ///
    /// Unpaid and INVOICE transactions never touch an account balance.
    pub fn paid_effect(&self) -> Option<BalanceEffect> {
        if !self.is_paid || self.kind == TransactionType::Invoice {
            return None;
        }
        Some(BalanceEffect {
            bank_account_id: self.bank_account_id,
            value: self.value,
            kind: self.kind,
        })
    }

    /// Structural identity used to group recurring rows persisted without a series id.
    pub fn series_key(&self) -> Option<SeriesKey> {
        if !self.is_recurring {
            return None;
        }
        Some(SeriesKey {
            name: self.name.clone(),
            category: self.category.clone(),
            frequency: self.frequency,
            bank_account_id: self.bank_account_id,
            kind: self.kind,
            start_date: self.start_date,
            end_date: self.end_date,
        })
    }
}

impl Identifiable for Transaction {
    fn id(&self) -> Uuid {
        self.id
    }
}

impl NamedEntity for Transaction {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Signed contribution of a paid transaction to one bank account.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalanceEffect {
    pub bank_account_id: Uuid,
    pub value: f64,
    pub kind: TransactionType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesKey {
    pub name: String,
    pub category: String,
    pub frequency: Option<Frequency>,
    pub bank_account_id: Uuid,
    pub kind: TransactionType,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Income,
    Expense,
    Invoice,
}

impl TransactionType {
    /// +1 for money entering an account, -1 for money leaving it.
    pub fn sign(self) -> f64 {
        match self {
            TransactionType::Income => 1.0,
            TransactionType::Expense | TransactionType::Invoice => -1.0,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransactionType::Income => "INCOME",
            TransactionType::Expense => "EXPENSE",
            TransactionType::Invoice => "INVOICE",
        };
        f.write_str(label)
    }
}

/// Cadence of a recurring transaction series.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frequency {
    Weekly,
    Biweekly,
    Monthly,
    Bimonthly,
    Quarterly,
    Semiannually,
    Annually,
}

impl Frequency {
    pub fn interval(self) -> TimeInterval {
        match self {
            Frequency::Weekly => TimeInterval::new(1, TimeUnit::Week),
            Frequency::Biweekly => TimeInterval::new(2, TimeUnit::Week),
            Frequency::Monthly => TimeInterval::new(1, TimeUnit::Month),
            Frequency::Bimonthly => TimeInterval::new(2, TimeUnit::Month),
            Frequency::Quarterly => TimeInterval::new(3, TimeUnit::Month),
            Frequency::Semiannually => TimeInterval::new(6, TimeUnit::Month),
            Frequency::Annually => TimeInterval::new(1, TimeUnit::Year),
        }
    }

    pub fn next_date(self, from: NaiveDate) -> NaiveDate {
        self.interval().next_date(from)
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.interval().label())
    }
}

/// Secondary-attribute predicates supported by transaction stores.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionQuery {
    All,
    Kind(TransactionType),
    Series(Uuid),
    Invoice { credit_card_id: Uuid, invoice_id: Uuid },
    Installments(Uuid),
    /// Inclusive on both ends.
    DateRange { start: NaiveDate, end: NaiveDate },
}

impl TransactionQuery {
    pub fn matches(&self, txn: &Transaction) -> bool {
        match self {
            TransactionQuery::All => true,
            TransactionQuery::Kind(kind) => txn.kind == *kind,
            TransactionQuery::Series(series_id) => txn.series_id == Some(*series_id),
            TransactionQuery::Invoice {
                credit_card_id,
                invoice_id,
            } => {
                txn.credit_card_id == Some(*credit_card_id) && txn.invoice_id == Some(*invoice_id)
            }
            TransactionQuery::Installments(primary_id) => {
                txn.primary_transaction_id == Some(*primary_id)
            }
            TransactionQuery::DateRange { start, end } => txn.date >= *start && txn.date <= *end,
        }
    }
}
