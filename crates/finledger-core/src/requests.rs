//! Request payloads accepted by the ledger services.

use chrono::NaiveDate;
use finledger_domain::{
    AccountType, BankAccount, CardFlag, CreditCard, Frequency, Transaction, TransactionType,
};
use uuid::Uuid;

use crate::{error::InvariantViolation, CoreError, CoreResult};

fn require_name(name: &str) -> CoreResult<()> {
    if name.trim().is_empty() {
        return Err(CoreError::Validation("name must not be empty".into()));
    }
    Ok(())
}

fn require_currency(currency: &str) -> CoreResult<()> {
    if currency.trim().is_empty() {
        return Err(CoreError::Validation("currency must not be empty".into()));
    }
    Ok(())
}

fn require_amount(value: f64) -> CoreResult<()> {
    if !value.is_finite() {
        return Err(CoreError::Validation(format!(
            "value must be a finite number (got {value})"
        )));
    }
    if value < 0.0 {
        return Err(InvariantViolation::NegativeValue(value).into());
    }
    Ok(())
}

/// Income or expense creation request, simple or recurring.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionDraft {
    pub name: String,
    pub category: String,
    pub value: f64,
    pub date: NaiveDate,
    pub kind: TransactionType,
    pub is_recurring: bool,
    pub frequency: Option<Frequency>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub is_paid: bool,
    pub currency: String,
    pub bank_account_id: Uuid,
}

impl TransactionDraft {
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
        }
    }

    pub fn paid(mut self, is_paid: bool) -> Self {
        self.is_paid = is_paid;
        self
    }

    pub fn recurring(mut self, frequency: Frequency, start: NaiveDate, end: NaiveDate) -> Self {
        self.is_recurring = true;
        self.frequency = Some(frequency);
        self.start_date = Some(start);
        self.end_date = Some(end);
        self
    }

    pub fn validate(&self) -> CoreResult<()> {
        require_name(&self.name)?;
        require_currency(&self.currency)?;
        require_amount(self.value)?;
        if self.kind == TransactionType::Invoice {
            return Err(InvariantViolation::UnsupportedTransactionType(self.kind).into());
        }
        if self.is_recurring {
            let (Some(start), Some(end)) = (self.start_date, self.end_date) else {
                return Err(CoreError::Validation(
                    "recurring transactions need a start and end date".into(),
                ));
            };
            if self.frequency.is_none() {
                return Err(CoreError::Validation(
                    "recurring transactions need a frequency".into(),
                ));
            }
            if end < start {
                return Err(CoreError::Validation(
                    "end date must not precede start date".into(),
                ));
            }
        }
        Ok(())
    }

    /// Materialises a non-recurring row from the draft.
    pub fn to_transaction(&self) -> Transaction {
        Transaction::new(
            self.name.trim(),
            self.category.clone(),
            self.value,
            self.date,
            self.kind,
            self.currency.clone(),
            self.bank_account_id,
        )
        .paid(self.is_paid)
    }
}

/// Credit-card purchase request; `end_date` spreads it over monthly installments.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoicePurchase {
    pub name: String,
    pub category: String,
    pub value: f64,
    pub date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub is_paid: bool,
    pub currency: String,
    pub credit_card_id: Uuid,
}

impl InvoicePurchase {
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        value: f64,
        date: NaiveDate,
        currency: impl Into<String>,
        credit_card_id: Uuid,
    ) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            value,
            date,
            end_date: None,
            is_paid: false,
            currency: currency.into(),
            credit_card_id,
        }
    }

    pub fn until(mut self, end_date: NaiveDate) -> Self {
        self.end_date = Some(end_date);
        self
    }

    pub fn validate(&self) -> CoreResult<()> {
        require_name(&self.name)?;
        require_currency(&self.currency)?;
        require_amount(self.value)?;
        if self.is_paid {
            return Err(InvariantViolation::InvoiceMustBeUnpaid.into());
        }
        Ok(())
    }
}

/// Partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionPatch {
    pub name: Option<String>,
    pub category: Option<String>,
    pub value: Option<f64>,
    pub date: Option<NaiveDate>,
    pub kind: Option<TransactionType>,
    pub is_paid: Option<bool>,
    pub currency: Option<String>,
    pub bank_account_id: Option<Uuid>,
    pub is_recurring: Option<bool>,
    pub frequency: Option<Frequency>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl TransactionPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn validate_common(&self) -> CoreResult<()> {
        if self.is_empty() {
            return Err(CoreError::Validation("no fields to update".into()));
        }
        if let Some(name) = &self.name {
            require_name(name)?;
        }
        if let Some(currency) = &self.currency {
            require_currency(currency)?;
        }
        if let Some(value) = self.value {
            require_amount(value)?;
        }
        Ok(())
    }

    /// Rules for editing a single, non-recurring income or expense.
    pub fn validate_simple(&self) -> CoreResult<()> {
        self.validate_common()?;
        if self.is_recurring == Some(true)
            || self.frequency.is_some()
            || self.start_date.is_some()
            || self.end_date.is_some()
        {
            return Err(CoreError::Validation(
                "a simple transaction cannot carry recurrence fields".into(),
            ));
        }
        if self.kind == Some(TransactionType::Invoice) {
            return Err(
                InvariantViolation::UnsupportedTransactionType(TransactionType::Invoice).into(),
            );
        }
        Ok(())
    }

    /// Group edits accept name, category, value, currency, account and paid flag.
    pub fn validate_group(&self) -> CoreResult<()> {
        self.validate_common()?;
        if self.date.is_some()
            || self.frequency.is_some()
            || self.start_date.is_some()
            || self.end_date.is_some()
        {
            return Err(InvariantViolation::RecurringDateChange.into());
        }
        if self.kind.is_some() {
            return Err(InvariantViolation::FieldNotAllowed("type").into());
        }
        if self.is_recurring.is_some() {
            return Err(InvariantViolation::FieldNotAllowed("isRecurring").into());
        }
        Ok(())
    }

    /// Installment edits accept name, category and value; date fields are ignored.
    pub fn validate_installments(&self) -> CoreResult<()> {
        let relevant = TransactionPatch {
            date: None,
            start_date: None,
            end_date: None,
            ..self.clone()
        };
        relevant.validate_common()?;
        let disallowed = [
            ("type", self.kind.is_some()),
            ("isPaid", self.is_paid.is_some()),
            ("currency", self.currency.is_some()),
            ("bankAccountId", self.bank_account_id.is_some()),
            ("isRecurring", self.is_recurring.is_some()),
            ("frequency", self.frequency.is_some()),
        ];
        if let Some((field, _)) = disallowed.iter().find(|(_, present)| *present) {
            return Err(InvariantViolation::FieldNotAllowed(*field).into());
        }
        Ok(())
    }

    /// Copies every present field onto `txn`.
    pub fn apply_to(&self, txn: &mut Transaction) {
        if let Some(name) = &self.name {
            txn.name = name.trim().to_string();
        }
        if let Some(category) = &self.category {
            txn.category = category.clone();
        }
        if let Some(value) = self.value {
            txn.value = value;
        }
        if let Some(date) = self.date {
            txn.date = date;
        }
        if let Some(kind) = self.kind {
            txn.kind = kind;
        }
        if let Some(is_paid) = self.is_paid {
            txn.is_paid = is_paid;
        }
        if let Some(currency) = &self.currency {
            txn.currency = currency.clone();
        }
        if let Some(account) = self.bank_account_id {
            txn.bank_account_id = account;
        }
    }
}

/// Bank account fields that may change after registration. The balance is
/// only moved by reconciliation or `set_balance`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountUpdate {
    pub name: Option<String>,
    pub kind: Option<AccountType>,
    pub bank: Option<String>,
    pub currency: Option<String>,
    pub is_active: Option<bool>,
}

impl AccountUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, account: &mut BankAccount) -> CoreResult<()> {
        if self.is_empty() {
            return Err(CoreError::Validation("no fields to update".into()));
        }
        if let Some(name) = &self.name {
            require_name(name)?;
            account.name = name.trim().to_string();
        }
        if let Some(currency) = &self.currency {
            require_currency(currency)?;
            account.currency = currency.trim().to_string();
        }
        if let Some(kind) = self.kind {
            account.kind = kind;
        }
        if let Some(bank) = &self.bank {
            account.bank = bank.trim().to_string();
        }
        if let Some(is_active) = self.is_active {
            account.is_active = is_active;
        }
        Ok(())
    }
}

/// Credit card fields that may change; range checks happen in the card service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CardUpdate {
    pub name: Option<String>,
    pub flag: Option<CardFlag>,
    pub closing_day: Option<u32>,
    pub due_day: Option<u32>,
    pub limit: Option<f64>,
    pub bank_account_id: Option<Uuid>,
}

impl CardUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, card: &mut CreditCard) -> CoreResult<()> {
        if self.is_empty() {
            return Err(CoreError::Validation("no fields to update".into()));
        }
        if let Some(name) = &self.name {
            card.name = name.clone();
        }
        if let Some(flag) = self.flag {
            card.flag = flag;
        }
        if let Some(day) = self.closing_day {
            card.closing_day = day;
        }
        if let Some(day) = self.due_day {
            card.due_day = day;
        }
        if let Some(limit) = self.limit {
            card.limit = limit;
        }
        if let Some(account) = self.bank_account_id {
            card.bank_account_id = account;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn recurring_draft_requires_bounds() {
        let mut draft = TransactionDraft::new(
            "Gym",
            "Health",
            90.0,
            date(2024, 1, 1),
            TransactionType::Expense,
            "BRL",
            Uuid::new_v4(),
        );
        draft.is_recurring = true;
        assert!(matches!(draft.validate(), Err(CoreError::Validation(_))));

        let draft = draft.recurring(Frequency::Monthly, date(2024, 3, 1), date(2024, 1, 1));
        assert!(matches!(draft.validate(), Err(CoreError::Validation(_))));
    }

    #[test]
    fn negative_values_are_invariant_violations() {
        let draft = TransactionDraft::new(
            "Refund",
            "Misc",
            -1.0,
            date(2024, 1, 1),
            TransactionType::Income,
            "BRL",
            Uuid::new_v4(),
        );
        let err = draft.validate().unwrap_err();
        assert_eq!(err.invariant(), Some(&InvariantViolation::NegativeValue(-1.0)));
    }

    #[test]
    fn group_patch_rejects_date_changes() {
        let patch = TransactionPatch {
            date: Some(date(2024, 2, 2)),
            ..Default::default()
        };
        assert_eq!(
            patch.validate_group().unwrap_err().invariant(),
            Some(&InvariantViolation::RecurringDateChange)
        );
        assert!(matches!(
            TransactionPatch::default().validate_group(),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn installment_patch_ignores_dates_but_rejects_other_fields() {
        let dates_only = TransactionPatch {
            date: Some(date(2024, 2, 2)),
            ..Default::default()
        };
        assert!(matches!(
            dates_only.validate_installments(),
            Err(CoreError::Validation(_))
        ));

        let with_currency = TransactionPatch {
            value: Some(10.0),
            currency: Some("USD".into()),
            ..Default::default()
        };
        assert_eq!(
            with_currency.validate_installments().unwrap_err().invariant(),
            Some(&InvariantViolation::FieldNotAllowed("currency"))
        );
    }
}
