//! Applies and reverses the monetary effect of paid transactions on bank balances.

use std::sync::Arc;

use finledger_domain::{round_to_cents, BalanceEffect, TransactionType, UserId};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{error::InvariantViolation, storage::BankAccountStore, CoreResult};

/// Additional attempts made after a compare-and-set conflict.
pub const CONFLICT_RETRIES: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Apply,
    Reverse,
}

impl Adjustment {
    fn sign(self) -> f64 {
        match self {
            Adjustment::Apply => 1.0,
            Adjustment::Reverse => -1.0,
        }
    }

    fn inverse(self) -> Self {
        match self {
            Adjustment::Apply => Adjustment::Reverse,
            Adjustment::Reverse => Adjustment::Apply,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct JournalEntry {
    account_id: Uuid,
    value: f64,
    kind: TransactionType,
    adjustment: Adjustment,
}

/// Balance adjustments applied so far by a multi-step operation.
#[derive(Debug, Default)]
pub struct BalanceJournal {
    entries: Vec<JournalEntry>,
}

impl BalanceJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Clone)]
pub struct BalanceReconciler {
    accounts: Arc<dyn BankAccountStore>,
}

impl BalanceReconciler {
    pub fn new(accounts: Arc<dyn BankAccountStore>) -> Self {
        Self { accounts }
    }

    /// Adds (`Apply`) or removes (`Reverse`) `value` signed by `kind` on the account.
    ///
    /// Never touches `is_paid`; callers decide when a paid-state transition happened.
    pub fn adjust(
        &self,
        user: &UserId,
        account_id: Uuid,
        value: f64,
        kind: TransactionType,
        adjustment: Adjustment,
    ) -> CoreResult<f64> {
        if kind == TransactionType::Invoice {
            return Err(InvariantViolation::UnsupportedTransactionType(kind).into());
        }
        if !(value >= 0.0) {
            return Err(InvariantViolation::NegativeValue(value).into());
        }
        let delta = value * kind.sign() * adjustment.sign();
        let mut attempt = 0;
        loop {
            let account = self.accounts.account(user, account_id)?;
            let balance = round_to_cents(account.balance + delta);
            match self
                .accounts
                .set_balance(user, account_id, account.version, balance)
            {
                Ok(_) => {
                    debug!(
                        user = %user,
                        account = %account_id,
                        delta,
                        balance,
                        "bank balance adjusted"
                    );
                    return Ok(balance);
                }
                Err(err) if err.is_retryable() && attempt < CONFLICT_RETRIES => {
                    attempt += 1;
                    warn!(
                        user = %user,
                        account = %account_id,
                        "balance write conflicted, retrying"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Like [`adjust`](Self::adjust) but records the step so it can be rolled back.
    pub fn adjust_logged(
        &self,
        user: &UserId,
        effect: BalanceEffect,
        adjustment: Adjustment,
        journal: &mut BalanceJournal,
    ) -> CoreResult<()> {
        self.adjust(user, effect.bank_account_id, effect.value, effect.kind, adjustment)?;
        journal.entries.push(JournalEntry {
            account_id: effect.bank_account_id,
            value: effect.value,
            kind: effect.kind,
            adjustment,
        });
        Ok(())
    }

    /// Moves an account state from `before` to `after`.
    ///
    /// Covers paid to unpaid, unpaid to paid, value changes and account moves:
    /// the old effect is reversed from its account and the new one applied to
    /// its own. Identical effects are left alone.
    pub fn reconcile_change(
        &self,
        user: &UserId,
        before: Option<BalanceEffect>,
        after: Option<BalanceEffect>,
        journal: &mut BalanceJournal,
    ) -> CoreResult<()> {
        if before == after {
            return Ok(());
        }
        if let Some(old) = before {
            self.adjust_logged(user, old, Adjustment::Reverse, journal)?;
        }
        if let Some(new) = after {
            self.adjust_logged(user, new, Adjustment::Apply, journal)?;
        }
        Ok(())
    }

    /// Undoes every journaled adjustment, newest first.
    pub fn rollback(&self, user: &UserId, journal: BalanceJournal) {
        if journal.is_empty() {
            return;
        }
        warn!(user = %user, steps = journal.len(), "rolling back balance adjustments");
        for entry in journal.entries.into_iter().rev() {
            if let Err(err) = self.adjust(
                user,
                entry.account_id,
                entry.value,
                entry.kind,
                entry.adjustment.inverse(),
            ) {
                error!(
                    user = %user,
                    account = %entry.account_id,
                    error = %err,
                    "failed to roll back balance adjustment"
                );
            }
        }
    }
}
