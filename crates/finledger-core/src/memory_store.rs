use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use finledger_domain::{UserId, UserLedger};

use crate::{storage::PartitionBackend, CoreError, CoreResult};

/// In-process partition backend used by tests and embedders without persistence.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    partitions: Mutex<HashMap<UserId, UserLedger>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the stored partition, if the user has one.
    pub fn snapshot(&self, user: &UserId) -> CoreResult<Option<UserLedger>> {
        Ok(self.lock()?.get(user).cloned())
    }

    fn lock(&self) -> CoreResult<MutexGuard<'_, HashMap<UserId, UserLedger>>> {
        self.partitions
            .lock()
            .map_err(|_| CoreError::Storage("memory store lock poisoned".into()))
    }
}

impl PartitionBackend for MemoryLedgerStore {
    fn user_ids(&self) -> CoreResult<Vec<UserId>> {
        let mut ids: Vec<UserId> = self.lock()?.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn read_partition<R>(
        &self,
        user: &UserId,
        f: impl FnOnce(&UserLedger) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let partitions = self.lock()?;
        match partitions.get(user) {
            Some(ledger) => f(ledger),
            None => f(&UserLedger::new(user.clone())),
        }
    }

    fn write_partition<R>(
        &self,
        user: &UserId,
        f: impl FnOnce(&mut UserLedger) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let mut partitions = self.lock()?;
        let mut working = partitions
            .get(user)
            .cloned()
            .unwrap_or_else(|| UserLedger::new(user.clone()));
        let result = f(&mut working)?;
        partitions.insert(user.clone(), working);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use finledger_domain::{AccountType, BankAccount};

    use super::*;
    use crate::storage::BankAccountStore;

    #[test]
    fn failed_writes_leave_partition_untouched() {
        let store = MemoryLedgerStore::new();
        let user = UserId::new("u-1");
        let account = BankAccount::new("Main", AccountType::Checking, "BRL", 10.0);
        let id = account.id;
        store.insert_account(&user, account).unwrap();

        let err = store.set_balance(&user, id, 7, 99.0).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.account(&user, id).unwrap().balance, 10.0);

        let version = store.set_balance(&user, id, 0, 99.0).unwrap();
        assert_eq!(version, 1);
        assert_eq!(store.account(&user, id).unwrap().balance, 99.0);
    }

    #[test]
    fn unknown_users_read_as_empty() {
        let store = MemoryLedgerStore::new();
        let user = UserId::new("ghost");
        assert!(store.accounts(&user).unwrap().is_empty());
        assert!(PartitionBackend::user_ids(&store).unwrap().is_empty());
    }
}
