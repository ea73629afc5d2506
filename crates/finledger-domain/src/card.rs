//! Credit cards, their monthly invoices, and billing-cycle arithmetic.

use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::*;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreditCard {
    pub id: Uuid,
    pub name: String,
    pub flag: CardFlag,
    pub closing_day: u32,
    pub due_day: u32,
    pub limit: f64,
    pub bank_account_id: Uuid,
}

impl CreditCard {
    pub fn new(
        name: impl Into<String>,
        flag: CardFlag,
        closing_day: u32,
        due_day: u32,
        limit: f64,
        bank_account_id: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            flag,
            closing_day,
            due_day,
            limit,
            bank_account_id,
        }
    }

    /// Billing cycle an installment dated `date` is charged to.
    pub fn cycle_for(&self, date: NaiveDate) -> InvoiceCycle {
        InvoiceCycle::containing(date, self.closing_day)
    }
}

impl Identifiable for CreditCard {
    fn id(&self) -> Uuid {
        self.id
    }
}

impl NamedEntity for CreditCard {
    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardFlag {
    Visa,
    Mastercard,
    Elo,
    AmericanExpress,
    Hipercard,
    Other,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Open,
    Closed,
    Overdue,
    Paid,
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InvoiceStatus::Open => "OPEN",
            InvoiceStatus::Closed => "CLOSED",
            InvoiceStatus::Overdue => "OVERDUE",
            InvoiceStatus::Paid => "PAID",
        };
        f.write_str(label)
    }
}

/// One invoice document per (card, month, year).
///
/// `total` is the amount already committed to the cycle and never exceeds the
/// card limit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreditCardInvoice {
    pub id: Uuid,
    pub card_id: Uuid,
    pub status: InvoiceStatus,
    pub total: f64,
    pub month: u32,
    pub year: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_account_id: Option<Uuid>,
    #[serde(default)]
    pub version: u64,
}

impl CreditCardInvoice {
    pub fn new(card_id: Uuid, cycle: InvoiceCycle, status: InvoiceStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            card_id,
            status,
            total: 0.0,
            month: cycle.month,
            year: cycle.year,
            bank_account_id: None,
            version: 0,
        }
    }

    pub fn cycle(&self) -> InvoiceCycle {
        InvoiceCycle::new(self.month, self.year)
    }

    pub fn is_paid(&self) -> bool {
        self.status == InvoiceStatus::Paid
    }
}

impl Identifiable for CreditCardInvoice {
    fn id(&self) -> Uuid {
        self.id
    }
}

/// Billing month of a card, identified by the month its closing date falls in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InvoiceCycle {
    pub year: i32,
    pub month: u32,
}

impl InvoiceCycle {
    pub const fn new(month: u32, year: i32) -> Self {
        Self { year, month }
    }

    /// Cycle whose closing date is the first one on or after `date`.
    pub fn containing(date: NaiveDate, closing_day: u32) -> Self {
        let this_month = Self::new(date.month(), date.year());
        if date.day() <= this_month.clamp_day(closing_day) {
            this_month
        } else {
            this_month.offset(1)
        }
    }

    /// Absolute month number, suitable for cycle distance arithmetic.
    pub fn index(&self) -> i32 {
        self.year * 12 + self.month as i32 - 1
    }

    pub fn months_until(&self, other: InvoiceCycle) -> i32 {
        other.index() - self.index()
    }

    pub fn offset(&self, months: i32) -> Self {
        let index = self.index() + months;
        Self::new((index.rem_euclid(12) + 1) as u32, index.div_euclid(12))
    }

    pub fn closing_date(&self, closing_day: u32) -> Option<NaiveDate> {
        self.date_on(closing_day)
    }

    /// Due dates are taken in the same month as the closing date.
    pub fn due_date(&self, due_day: u32) -> Option<NaiveDate> {
        self.date_on(due_day)
    }

    fn clamp_day(&self, day: u32) -> u32 {
        day.clamp(1, days_in_month(self.year, self.month).max(1))
    }

    fn date_on(&self, day: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.clamp_day(day))
    }

    /// `MM/YYYY` label used on invoice payment entries.
    pub fn label(&self) -> String {
        format!("{:02}/{}", self.month, self.year)
    }
}

impl fmt::Display for InvoiceCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}
