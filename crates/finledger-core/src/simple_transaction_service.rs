//! Single, non-recurring income and expense transactions.

use std::sync::Arc;

use finledger_domain::{Transaction, TransactionType, UserId};
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    balance_reconciler::{Adjustment, BalanceJournal, BalanceReconciler},
    error::InvariantViolation,
    requests::{TransactionDraft, TransactionPatch},
    storage::{BankAccountStore, TransactionStore},
    CoreResult,
};

#[derive(Clone)]
pub struct SimpleTransactionService {
    accounts: Arc<dyn BankAccountStore>,
    transactions: Arc<dyn TransactionStore>,
    reconciler: BalanceReconciler,
}

fn ensure_simple(txn: &Transaction) -> CoreResult<()> {
    if txn.kind == TransactionType::Invoice {
        return Err(InvariantViolation::UnsupportedTransactionType(txn.kind).into());
    }
    if txn.is_recurring {
        return Err(InvariantViolation::RecurringTransaction.into());
    }
    Ok(())
}

impl SimpleTransactionService {
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

    pub fn create(&self, user: &UserId, draft: &TransactionDraft) -> CoreResult<Transaction> {
        draft.validate()?;
        self.accounts.account(user, draft.bank_account_id)?;
        let txn = draft.to_transaction();
        self.transactions.insert_many(user, vec![txn.clone()])?;

        if let Some(effect) = txn.paid_effect() {
            let applied = self.reconciler.adjust(
                user,
                effect.bank_account_id,
                effect.value,
                effect.kind,
                Adjustment::Apply,
            );
            if let Err(err) = applied {
                self.discard(user, txn.id);
                return Err(err);
            }
        }
        info!(
            user = %user,
            transaction = %txn.id,
            account = %txn.bank_account_id,
            kind = %txn.kind,
            paid = txn.is_paid,
            "transaction created"
        );
        Ok(txn)
    }

    pub fn update(
        &self,
        user: &UserId,
        id: Uuid,
        patch: &TransactionPatch,
    ) -> CoreResult<Transaction> {
        patch.validate_simple()?;
        let current = self.transactions.transaction(user, id)?;
        ensure_simple(&current)?;

        let mut updated = current.clone();
        patch.apply_to(&mut updated);
        if updated.bank_account_id != current.bank_account_id {
            self.accounts.account(user, updated.bank_account_id)?;
        }

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
        info!(user = %user, transaction = %id, "transaction updated");
        Ok(updated)
    }

    /// Deletes the transaction, reversing its effect first when paid.
    pub fn delete(&self, user: &UserId, id: Uuid) -> CoreResult<Transaction> {
        let current = self.transactions.transaction(user, id)?;
        ensure_simple(&current)?;

        let mut journal = BalanceJournal::new();
        if let Some(effect) = current.paid_effect() {
            self.reconciler
                .adjust_logged(user, effect, Adjustment::Reverse, &mut journal)?;
        }
        match self.transactions.delete_many(user, &[id]) {
            Ok(mut removed) => {
                info!(user = %user, transaction = %id, "transaction deleted");
                Ok(removed.pop().unwrap_or(current))
            }
            Err(err) => {
                self.reconciler.rollback(user, journal);
                Err(err)
            }
        }
    }

    fn discard(&self, user: &UserId, id: Uuid) {
        if let Err(err) = self.transactions.delete_many(user, &[id]) {
            error!(
                user = %user,
                transaction = %id,
                error = %err,
                "failed to discard transaction after reconciliation failure"
            );
        }
    }
}
