//! Recurring income and expense series: generation and group-level changes.

use std::sync::Arc;

use finledger_domain::{add_months, Transaction, TransactionQuery, UserId};
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    balance_reconciler::{Adjustment, BalanceJournal, BalanceReconciler},
    error::InvariantViolation,
    requests::{TransactionDraft, TransactionPatch},
    storage::{BankAccountStore, TransactionStore},
    CoreError, CoreResult,
};

/// Longest span a single series may cover, in months.
pub const MAX_SERIES_SPAN_MONTHS: i32 = 12;

#[derive(Clone)]
pub struct RecurringTransactionService {
    accounts: Arc<dyn BankAccountStore>,
    transactions: Arc<dyn TransactionStore>,
    reconciler: BalanceReconciler,
}

impl RecurringTransactionService {
    pub fn new(
        accounts: Arc<dyn BankAccountStore>,
        transactions: Arc<dyn TransactionStore>,
        reconciler: BalanceReconciler,
    ) -> Self {
        Self {
            accounts,
            transactions,
            reconciler,
        }
    }

    /// Generates one row per occurrence from start to end inclusive.
    ///
    /// Only the first occurrence carries the requested paid flag, and only its
    /// effect is reconciled.
    pub fn create(&self, user: &UserId, draft: &TransactionDraft) -> CoreResult<Vec<Transaction>> {
        if !draft.is_recurring {
            return Err(CoreError::Validation(
                "recurring creation requires isRecurring".into(),
            ));
        }
        draft.validate()?;
        let (Some(frequency), Some(start), Some(end)) =
            (draft.frequency, draft.start_date, draft.end_date)
        else {
            return Err(CoreError::Validation(
                "recurring transactions need frequency, start and end dates".into(),
            ));
        };
        if end > add_months(start, MAX_SERIES_SPAN_MONTHS) {
            return Err(InvariantViolation::RecurringPeriodTooLong.into());
        }
        self.accounts.account(user, draft.bank_account_id)?;

        let series_id = Uuid::new_v4();
        let mut occurrences = Vec::new();
        let mut date = start;
        while date <= end {
            let mut txn = draft.to_transaction();
            txn.date = date;
            txn.is_recurring = true;
            txn.frequency = Some(frequency);
            txn.start_date = Some(start);
            txn.end_date = Some(end);
            txn.series_id = Some(series_id);
            txn.is_paid = occurrences.is_empty() && draft.is_paid;
            occurrences.push(txn);
            date = frequency.next_date(date);
        }

        self.transactions.insert_many(user, occurrences.clone())?;
        if let Some(effect) = occurrences.first().and_then(Transaction::paid_effect) {
            let applied = self.reconciler.adjust(
                user,
                effect.bank_account_id,
                effect.value,
                effect.kind,
                Adjustment::Apply,
            );
            if let Err(err) = applied {
                let ids: Vec<Uuid> = occurrences.iter().map(|txn| txn.id).collect();
                if let Err(cleanup) = self.transactions.delete_many(user, &ids) {
                    error!(
                        user = %user,
                        series = %series_id,
                        error = %cleanup,
                        "failed to discard series after reconciliation failure"
                    );
                }
                return Err(err);
            }
        }
        info!(
            user = %user,
            series = %series_id,
            occurrences = occurrences.len(),
            frequency = %frequency,
            "recurring series generated"
        );
        Ok(occurrences)
    }

    /// All members of the series `id` belongs to, ordered by date.
    pub fn series(&self, user: &UserId, id: Uuid) -> CoreResult<Vec<Transaction>> {
        let target = self.recurring_target(user, id)?;
        self.members_of(user, &target)
    }

    /// Deletes the target occurrence and every later one, reversing paid rows first.
    pub fn delete_recurring(&self, user: &UserId, id: Uuid) -> CoreResult<Vec<Transaction>> {
        let target = self.recurring_target(user, id)?;
        let doomed: Vec<Transaction> = self
            .members_of(user, &target)?
            .into_iter()
            .filter(|txn| txn.date >= target.date)
            .collect();

        let mut journal = BalanceJournal::new();
        for txn in &doomed {
            if let Some(effect) = txn.paid_effect() {
                if let Err(err) =
                    self.reconciler
                        .adjust_logged(user, effect, Adjustment::Reverse, &mut journal)
                {
                    self.reconciler.rollback(user, journal);
                    return Err(err);
                }
            }
        }
        let ids: Vec<Uuid> = doomed.iter().map(|txn| txn.id).collect();
        match self.transactions.delete_many(user, &ids) {
            Ok(removed) => {
                info!(
                    user = %user,
                    transaction = %id,
                    removed = removed.len(),
                    reversed = journal.len(),
                    "recurring occurrences deleted"
                );
                Ok(removed)
            }
            Err(err) => {
                self.reconciler.rollback(user, journal);
                Err(err)
            }
        }
    }

    /// Applies an allow-listed change to every member of the series.
    pub fn update_group(
        &self,
        user: &UserId,
        id: Uuid,
        patch: &TransactionPatch,
    ) -> CoreResult<Vec<Transaction>> {
        patch.validate_group()?;
        let target = self.recurring_target(user, id)?;
        if let Some(account) = patch.bank_account_id {
            self.accounts.account(user, account)?;
        }
        let members = self.members_of(user, &target)?;

        let mut journal = BalanceJournal::new();
        let mut updated = Vec::with_capacity(members.len());
        for member in &members {
            let mut next = member.clone();
            patch.apply_to(&mut next);
            if let Err(err) = self.reconciler.reconcile_change(
                user,
                member.paid_effect(),
                next.paid_effect(),
                &mut journal,
            ) {
                self.reconciler.rollback(user, journal);
                return Err(err);
            }
            updated.push(next);
        }
        if let Err(err) = self.transactions.update_many(user, updated.clone()) {
            self.reconciler.rollback(user, journal);
            return Err(err);
        }
        info!(
            user = %user,
            transaction = %id,
            members = updated.len(),
            "recurring series updated"
        );
        Ok(updated)
    }

    pub fn mark_paid(&self, user: &UserId, id: Uuid) -> CoreResult<Transaction> {
        self.set_paid(user, id, true)
    }

    pub fn mark_unpaid(&self, user: &UserId, id: Uuid) -> CoreResult<Transaction> {
        self.set_paid(user, id, false)
    }

    fn set_paid(&self, user: &UserId, id: Uuid, paid: bool) -> CoreResult<Transaction> {
        let current = self.recurring_target(user, id)?;
        if current.is_paid == paid {
            let violation = if paid {
                InvariantViolation::AlreadyPaid
            } else {
                InvariantViolation::AlreadyUnpaid
            };
            return Err(violation.into());
        }
        let mut updated = current.clone();
        updated.is_paid = paid;

        let mut journal = BalanceJournal::new();
        if let Err(err) = self.reconciler.reconcile_change(
            user,
            current.paid_effect(),
            updated.paid_effect(),
            &mut journal,
        ) {
            self.reconciler.rollback(user, journal);
            return Err(err);
        }
        if let Err(err) = self.transactions.update_many(user, vec![updated.clone()]) {
            self.reconciler.rollback(user, journal);
            return Err(err);
        }
        info!(user = %user, transaction = %id, paid, "occurrence paid state changed");
        Ok(updated)
    }

    fn recurring_target(&self, user: &UserId, id: Uuid) -> CoreResult<Transaction> {
        let target = self.transactions.transaction(user, id)?;
        if !target.is_recurring {
            return Err(InvariantViolation::NotRecurring.into());
        }
        Ok(target)
    }

    /// Resolves the series by id, falling back to structural matching for
    /// rows persisted before series ids existed.
    fn members_of(&self, user: &UserId, target: &Transaction) -> CoreResult<Vec<Transaction>> {
        if let Some(series_id) = target.series_id {
            return self
                .transactions
                .query(user, &TransactionQuery::Series(series_id));
        }
        let key = target.series_key();
        Ok(self
            .transactions
            .query(user, &TransactionQuery::All)?
            .into_iter()
            .filter(|txn| txn.series_id.is_none() && txn.series_key() == key)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use finledger_domain::{AccountType, BankAccount, Frequency, TransactionType};

    use super::*;
    use crate::memory_store::MemoryLedgerStore;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn setup() -> (Arc<MemoryLedgerStore>, RecurringTransactionService, UserId, Uuid) {
        let store = Arc::new(MemoryLedgerStore::new());
        let user = UserId::new("u-1");
        let account = BankAccount::new("Main", AccountType::Checking, "BRL", 1000.0);
        let id = account.id;
        store.insert_account(&user, account).unwrap();
        let service = RecurringTransactionService::new(
            store.clone(),
            store.clone(),
            BalanceReconciler::new(store.clone()),
        );
        (store, service, user, id)
    }

    fn monthly(account: Uuid, start: NaiveDate, end: NaiveDate) -> TransactionDraft {
        TransactionDraft::new(
            "Rent",
            "Housing",
            300.0,
            start,
            TransactionType::Expense,
            "BRL",
            account,
        )
        .recurring(Frequency::Monthly, start, end)
    }

    #[test]
    fn monthly_series_is_inclusive_and_only_first_is_paid() {
        let (store, service, user, account) = setup();
        let rows = service
            .create(&user, &monthly(account, date(2024, 1, 1), date(2024, 3, 1)).paid(true))
            .unwrap();
        let dates: Vec<_> = rows.iter().map(|txn| txn.date).collect();
        assert_eq!(dates, vec![date(2024, 1, 1), date(2024, 2, 1), date(2024, 3, 1)]);
        assert!(rows[0].is_paid);
        assert!(rows[1..].iter().all(|txn| !txn.is_paid));
        assert!(rows.iter().all(|txn| txn.series_id == rows[0].series_id));
        assert_eq!(store.account(&user, account).unwrap().balance, 700.0);
    }

    #[test]
    fn rejects_series_longer_than_a_year() {
        let (_, service, user, account) = setup();
        let err = service
            .create(&user, &monthly(account, date(2024, 1, 1), date(2025, 1, 2)))
            .unwrap_err();
        assert_eq!(err.invariant(), Some(&InvariantViolation::RecurringPeriodTooLong));
    }

    #[test]
    fn forward_delete_keeps_earlier_occurrences_and_reverses_paid_ones() {
        let (store, service, user, account) = setup();
        let rows = service
            .create(&user, &monthly(account, date(2024, 1, 1), date(2024, 4, 1)))
            .unwrap();
        service.mark_paid(&user, rows[2].id).unwrap();
        assert_eq!(store.account(&user, account).unwrap().balance, 700.0);

        let removed = service.delete_recurring(&user, rows[1].id).unwrap();
        assert_eq!(removed.len(), 3);
        assert_eq!(store.account(&user, account).unwrap().balance, 1000.0);
        let left = service.series(&user, rows[0].id).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, rows[0].id);
    }

    #[test]
    fn group_update_reconciles_each_paid_member() {
        let (store, service, user, account) = setup();
        let rows = service
            .create(&user, &monthly(account, date(2024, 1, 1), date(2024, 3, 1)).paid(true))
            .unwrap();
        service.mark_paid(&user, rows[1].id).unwrap();
        assert_eq!(store.account(&user, account).unwrap().balance, 400.0);

        let patch = TransactionPatch {
            value: Some(250.0),
            ..Default::default()
        };
        let updated = service.update_group(&user, rows[0].id, &patch).unwrap();
        assert!(updated.iter().all(|txn| txn.value == 250.0));
        assert_eq!(store.account(&user, account).unwrap().balance, 500.0);
    }

    #[test]
    fn mark_paid_twice_fails() {
        let (_, service, user, account) = setup();
        let rows = service
            .create(&user, &monthly(account, date(2024, 1, 1), date(2024, 2, 1)))
            .unwrap();
        service.mark_paid(&user, rows[1].id).unwrap();
        let err = service.mark_paid(&user, rows[1].id).unwrap_err();
        assert_eq!(err.invariant(), Some(&InvariantViolation::AlreadyPaid));
        service.mark_unpaid(&user, rows[1].id).unwrap();
        let err = service.mark_unpaid(&user, rows[1].id).unwrap_err();
        assert_eq!(err.invariant(), Some(&InvariantViolation::AlreadyUnpaid));
    }

    #[test]
    fn legacy_rows_without_series_id_group_structurally() {
        let (store, service, user, account) = setup();
        let rows = service
            .create(&user, &monthly(account, date(2024, 1, 1), date(2024, 3, 1)))
            .unwrap();
        let legacy: Vec<Transaction> = rows
            .iter()
            .cloned()
            .map(|mut txn| {
                txn.series_id = None;
                txn
            })
            .collect();
        store.update_many(&user, legacy).unwrap();

        let members = service.series(&user, rows[1].id).unwrap();
        assert_eq!(members.len(), 3);
    }
}
