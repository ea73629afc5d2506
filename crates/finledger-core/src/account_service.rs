use std::sync::Arc;

use finledger_domain::{round_to_cents, BankAccount, UserId};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    balance_reconciler::CONFLICT_RETRIES, error::InvariantViolation, requests::AccountUpdate,
    storage::BankAccountStore, CoreError, CoreResult,
};

/// Balance line returned by [`AccountService::balance_snapshot`].
#[derive(Debug, Clone, PartialEq)]
pub struct AccountBalance {
    pub id: Uuid,
    pub name: String,
    pub currency: String,
    pub balance: f64,
}

/// Bank account registration and explicit balance management.
#[derive(Clone)]
pub struct AccountService {
    accounts: Arc<dyn BankAccountStore>,
}

impl AccountService {
    pub fn new(accounts: Arc<dyn BankAccountStore>) -> Self {
        Self { accounts }
    }

    /// Registers an account; names are unique per user, ignoring case.
    pub fn create_account(
        &self,
        user: &UserId,
        mut account: BankAccount,
    ) -> CoreResult<BankAccount> {
        let name = account.name.trim().to_string();
        if name.is_empty() {
            return Err(CoreError::Validation("account name must not be empty".into()));
        }
        if account.currency.trim().is_empty() {
            return Err(CoreError::Validation("currency must not be empty".into()));
        }
        if !account.balance.is_finite() {
            return Err(CoreError::Validation("initial balance must be finite".into()));
        }
        let taken = self
            .accounts
            .accounts(user)?
            .iter()
            .any(|existing| existing.name.eq_ignore_ascii_case(&name));
        if taken {
            return Err(InvariantViolation::DuplicateName(name).into());
        }
        account.name = name;
        account.balance = round_to_cents(account.balance);
        account.version = 0;
        self.accounts.insert_account(user, account.clone())?;
        info!(user = %user, account = %account.id, "bank account created");
        Ok(account)
    }

    pub fn account(&self, user: &UserId, id: Uuid) -> CoreResult<BankAccount> {
        self.accounts.account(user, id)
    }

    pub fn accounts(&self, user: &UserId) -> CoreResult<Vec<BankAccount>> {
        self.accounts.accounts(user)
    }

    /// Overwrites the balance outside of reconciliation.
    pub fn set_balance(&self, user: &UserId, id: Uuid, balance: f64) -> CoreResult<BankAccount> {
        if !balance.is_finite() {
            return Err(CoreError::Validation("balance must be finite".into()));
        }
        let balance = round_to_cents(balance);
        let mut attempt = 0;
        loop {
            let account = self.accounts.account(user, id)?;
            match self.accounts.set_balance(user, id, account.version, balance) {
                Ok(version) => {
                    info!(user = %user, account = %id, balance, "bank balance set");
                    return Ok(BankAccount {
                        balance,
                        version,
                        ..account
                    });
                }
                Err(err) if err.is_retryable() && attempt < CONFLICT_RETRIES => {
                    attempt += 1;
                    warn!(user = %user, account = %id, "balance write conflicted, retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Renames or reclassifies an account, keeping its balance.
    pub fn update_account(
        &self,
        user: &UserId,
        id: Uuid,
        update: &AccountUpdate,
    ) -> CoreResult<BankAccount> {
        let mut attempt = 0;
        loop {
            let mut account = self.accounts.account(user, id)?;
            update.apply(&mut account)?;
            match self.accounts.update_account(user, account) {
                Ok(updated) => {
                    info!(user = %user, account = %id, "bank account updated");
                    return Ok(updated);
                }
                Err(err) if err.is_retryable() && attempt < CONFLICT_RETRIES => {
                    attempt += 1;
                    warn!(user = %user, account = %id, "account write conflicted, retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Removes an account nothing references anymore.
    pub fn delete_account(&self, user: &UserId, id: Uuid) -> CoreResult<BankAccount> {
        let removed = self.accounts.delete_account(user, id)?;
        info!(user = %user, account = %id, "bank account deleted");
        Ok(removed)
    }

    pub fn balance_snapshot(&self, user: &UserId) -> CoreResult<Vec<AccountBalance>> {
        Ok(self
            .accounts
            .accounts(user)?
            .into_iter()
            .map(|account| AccountBalance {
                id: account.id,
                name: account.name,
                currency: account.currency,
                balance: account.balance,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use finledger_domain::{AccountType, CardFlag, CreditCard, Transaction, TransactionType};

    use super::*;
    use crate::{
        memory_store::MemoryLedgerStore,
        storage::{CreditCardStore, TransactionStore},
    };

    fn checking(name: &str, balance: f64) -> BankAccount {
        BankAccount::new(name, AccountType::Checking, "BRL", balance)
    }

    #[test]
    fn names_are_unique_ignoring_case() {
        let service = AccountService::new(Arc::new(MemoryLedgerStore::new()));
        let user = UserId::new("u-1");
        service.create_account(&user, checking("Nubank", 10.0)).unwrap();
        let err = service
            .create_account(
                &user,
                BankAccount::new(" nubank ", AccountType::Savings, "BRL", 0.0),
            )
            .unwrap_err();
        assert!(matches!(
            err.invariant(),
            Some(InvariantViolation::DuplicateName(_))
        ));

        let other_user = UserId::new("u-2");
        service.create_account(&other_user, checking("Nubank", 0.0)).unwrap();
    }

    #[test]
    fn set_balance_bumps_version() {
        let service = AccountService::new(Arc::new(MemoryLedgerStore::new()));
        let user = UserId::new("u-1");
        let account = service.create_account(&user, checking("Main", 10.0)).unwrap();
        let updated = service.set_balance(&user, account.id, 42.424).unwrap();
        assert_eq!(updated.balance, 42.42);
        assert_eq!(updated.version, 1);

        let snapshot = service.balance_snapshot(&user).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].balance, 42.42);
    }

    #[test]
    fn update_keeps_balance_and_rejects_taken_names() {
        let service = AccountService::new(Arc::new(MemoryLedgerStore::new()));
        let user = UserId::new("u-1");
        let main = service.create_account(&user, checking("Main", 80.0)).unwrap();
        service.create_account(&user, checking("Savings", 0.0)).unwrap();

        let rename = AccountUpdate {
            name: Some("  Daily ".into()),
            bank: Some("Itaú".into()),
            ..AccountUpdate::default()
        };
        let updated = service.update_account(&user, main.id, &rename).unwrap();
        assert_eq!(updated.name, "Daily");
        assert_eq!(updated.bank, "Itaú");
        assert_eq!(updated.balance, 80.0);
        assert_eq!(updated.version, main.version + 1);

        // Changing only the case of its own name is allowed.
        let recase = AccountUpdate {
            name: Some("DAILY".into()),
            ..AccountUpdate::default()
        };
        service.update_account(&user, main.id, &recase).unwrap();

        let clash = AccountUpdate {
            name: Some("savings".into()),
            ..AccountUpdate::default()
        };
        let err = service.update_account(&user, main.id, &clash).unwrap_err();
        assert!(matches!(
            err.invariant(),
            Some(InvariantViolation::DuplicateName(_))
        ));
        assert!(matches!(
            service.update_account(&user, main.id, &AccountUpdate::default()),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn delete_refuses_referenced_accounts() {
        let store = Arc::new(MemoryLedgerStore::new());
        let service = AccountService::new(store.clone());
        let user = UserId::new("u-1");
        let with_card = service.create_account(&user, checking("Card", 0.0)).unwrap();
        let with_txn = service.create_account(&user, checking("Bills", 0.0)).unwrap();
        let unused = service.create_account(&user, checking("Spare", 0.0)).unwrap();

        let card = CreditCard::new("Gold", CardFlag::Visa, 5, 15, 100.0, with_card.id);
        store.insert_card(&user, card).unwrap();
        let txn = Transaction::new(
            "Rent",
            "Home",
            50.0,
            chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            TransactionType::Expense,
            "BRL",
            with_txn.id,
        );
        store.insert_many(&user, vec![txn]).unwrap();

        for id in [with_card.id, with_txn.id] {
            let err = service.delete_account(&user, id).unwrap_err();
            assert_eq!(err.invariant(), Some(&InvariantViolation::AccountInUse(id)));
        }
        service.delete_account(&user, unused.id).unwrap();
        assert_eq!(service.accounts(&user).unwrap().len(), 2);
        assert!(matches!(
            service.delete_account(&user, unused.id),
            Err(CoreError::AccountNotFound(_))
        ));
    }
}
