//! Store abstractions used by the ledger services.
//!
//! Every store trait is object-safe so services can hold `Arc<dyn ...>` handles
//! and tests can substitute doubles. Any [`PartitionBackend`] gets all of them
//! for free through the blanket implementations below; each call maps to one
//! atomic partition write.

use std::sync::Arc;

use finledger_domain::{
    round_to_cents, BankAccount, CardRecord, CreditCard, CreditCardInvoice, InvoiceCycle,
    Transaction, TransactionQuery, UserId, UserLedger,
};
use uuid::Uuid;

use crate::{error::InvariantViolation, CoreError, CoreResult};

/// Storage unit holding one user's whole ledger document.
pub trait PartitionBackend: Send + Sync {
    fn user_ids(&self) -> CoreResult<Vec<UserId>>;

    /// Reads the partition; unknown users read as an empty ledger.
    fn read_partition<R>(
        &self,
        user: &UserId,
        f: impl FnOnce(&UserLedger) -> CoreResult<R>,
    ) -> CoreResult<R>;

    /// Applies `f` to a copy of the partition and persists it only when `f` succeeds.
    fn write_partition<R>(
        &self,
        user: &UserId,
        f: impl FnOnce(&mut UserLedger) -> CoreResult<R>,
    ) -> CoreResult<R>;
}

pub trait UserDirectory: Send + Sync {
    fn user_ids(&self) -> CoreResult<Vec<UserId>>;
}

pub trait BankAccountStore: Send + Sync {
    fn account(&self, user: &UserId, id: Uuid) -> CoreResult<BankAccount>;
    fn accounts(&self, user: &UserId) -> CoreResult<Vec<BankAccount>>;
    fn insert_account(&self, user: &UserId, account: BankAccount) -> CoreResult<()>;
    /// Compare-and-set on the account version; returns the new version.
    fn set_balance(
        &self,
        user: &UserId,
        id: Uuid,
        expected_version: u64,
        balance: f64,
    ) -> CoreResult<u64>;
    /// Compare-and-set on `account.version`; the stored balance is kept.
    /// Fails with `DuplicateName` when another account uses the name.
    fn update_account(&self, user: &UserId, account: BankAccount) -> CoreResult<BankAccount>;
    /// Refused while any transaction or card points at the account.
    fn delete_account(&self, user: &UserId, id: Uuid) -> CoreResult<BankAccount>;
}

pub trait TransactionStore: Send + Sync {
    fn transaction(&self, user: &UserId, id: Uuid) -> CoreResult<Transaction>;
    fn query(&self, user: &UserId, query: &TransactionQuery) -> CoreResult<Vec<Transaction>>;
    fn insert_many(&self, user: &UserId, transactions: Vec<Transaction>) -> CoreResult<()>;
    fn update_many(&self, user: &UserId, transactions: Vec<Transaction>) -> CoreResult<()>;
    fn delete_many(&self, user: &UserId, ids: &[Uuid]) -> CoreResult<Vec<Transaction>>;
}

pub trait CreditCardStore: Send + Sync {
    fn card(&self, user: &UserId, id: Uuid) -> CoreResult<CreditCard>;
    fn cards(&self, user: &UserId) -> CoreResult<Vec<CreditCard>>;
    fn insert_card(&self, user: &UserId, card: CreditCard) -> CoreResult<()>;
    /// Billing days are frozen once the card has invoices, and the limit may
    /// not drop below any unpaid invoice total.
    fn update_card(&self, user: &UserId, card: CreditCard) -> CoreResult<CreditCard>;
    /// Refused while the card has invoices.
    fn delete_card(&self, user: &UserId, id: Uuid) -> CoreResult<CreditCard>;
}

pub trait InvoiceStore: Send + Sync {
    fn invoice(&self, user: &UserId, card_id: Uuid, invoice_id: Uuid)
        -> CoreResult<CreditCardInvoice>;
    fn invoices(&self, user: &UserId, card_id: Uuid) -> CoreResult<Vec<CreditCardInvoice>>;
    fn invoice_for_cycle(
        &self,
        user: &UserId,
        card_id: Uuid,
        cycle: InvoiceCycle,
    ) -> CoreResult<Option<CreditCardInvoice>>;
    /// Fails with `StateConflict` when the card already has an invoice for the cycle.
    fn insert_invoice(&self, user: &UserId, invoice: CreditCardInvoice) -> CoreResult<()>;
    /// Compare-and-set on `invoice.version`; returns the stored copy.
    fn update_invoice(
        &self,
        user: &UserId,
        invoice: CreditCardInvoice,
    ) -> CoreResult<CreditCardInvoice>;
    /// Removes an unpaid invoice no transaction references, compare-and-set
    /// on its version.
    fn delete_invoice(
        &self,
        user: &UserId,
        card_id: Uuid,
        invoice_id: Uuid,
        expected_version: u64,
    ) -> CoreResult<CreditCardInvoice>;
}

/// Shared store handles injected into the services.
#[derive(Clone)]
pub struct StoreHandles {
    pub users: Arc<dyn UserDirectory>,
    pub accounts: Arc<dyn BankAccountStore>,
    pub transactions: Arc<dyn TransactionStore>,
    pub cards: Arc<dyn CreditCardStore>,
    pub invoices: Arc<dyn InvoiceStore>,
}

impl StoreHandles {
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: PartitionBackend + 'static,
    {
        Self {
            users: backend.clone(),
            accounts: backend.clone(),
            transactions: backend.clone(),
            cards: backend.clone(),
            invoices: backend,
        }
    }
}

fn find_record(ledger: &UserLedger, card_id: Uuid) -> CoreResult<&CardRecord> {
    ledger
        .card_record(card_id)
        .ok_or(CoreError::CreditCardNotFound(card_id))
}

impl<T: PartitionBackend> UserDirectory for T {
    fn user_ids(&self) -> CoreResult<Vec<UserId>> {
        PartitionBackend::user_ids(self)
    }
}

impl<T: PartitionBackend> BankAccountStore for T {
    fn account(&self, user: &UserId, id: Uuid) -> CoreResult<BankAccount> {
        self.read_partition(user, |ledger| {
            ledger
                .account(id)
                .cloned()
                .ok_or(CoreError::AccountNotFound(id))
        })
    }

    fn accounts(&self, user: &UserId) -> CoreResult<Vec<BankAccount>> {
        self.read_partition(user, |ledger| Ok(ledger.accounts.clone()))
    }

    fn insert_account(&self, user: &UserId, account: BankAccount) -> CoreResult<()> {
        self.write_partition(user, |ledger| {
            if ledger.account(account.id).is_some() {
                return Err(CoreError::StateConflict(format!(
                    "bank account {} already exists",
                    account.id
                )));
            }
            ledger.accounts.push(account);
            ledger.touch();
            Ok(())
        })
    }

    fn set_balance(
        &self,
        user: &UserId,
        id: Uuid,
        expected_version: u64,
        balance: f64,
    ) -> CoreResult<u64> {
        self.write_partition(user, |ledger| {
            let account = ledger.account_mut(id).ok_or(CoreError::AccountNotFound(id))?;
            if account.version != expected_version {
                return Err(CoreError::StateConflict(format!(
                    "bank account {id} changed (expected version {expected_version}, found {})",
                    account.version
                )));
            }
            account.balance = balance;
            account.version += 1;
            account.touch();
            let version = account.version;
            ledger.touch();
            Ok(version)
        })
    }

    fn update_account(&self, user: &UserId, account: BankAccount) -> CoreResult<BankAccount> {
        self.write_partition(user, |ledger| {
            let id = account.id;
            if ledger
                .accounts
                .iter()
                .any(|other| other.id != id && other.name.eq_ignore_ascii_case(&account.name))
            {
                return Err(InvariantViolation::DuplicateName(account.name).into());
            }
            let stored = ledger.account_mut(id).ok_or(CoreError::AccountNotFound(id))?;
            if stored.version != account.version {
                return Err(CoreError::StateConflict(format!(
                    "bank account {id} changed (expected version {}, found {})",
                    account.version, stored.version
                )));
            }
            *stored = BankAccount {
                balance: stored.balance,
                created_at: stored.created_at,
                version: stored.version + 1,
                ..account
            };
            stored.touch();
            let updated = stored.clone();
            ledger.touch();
            Ok(updated)
        })
    }

    fn delete_account(&self, user: &UserId, id: Uuid) -> CoreResult<BankAccount> {
        self.write_partition(user, |ledger| {
            let index = ledger
                .accounts
                .iter()
                .position(|account| account.id == id)
                .ok_or(CoreError::AccountNotFound(id))?;
            let referenced = ledger.transactions.iter().any(|txn| txn.bank_account_id == id)
                || ledger
                    .credit_cards
                    .iter()
                    .any(|record| record.card.bank_account_id == id);
            if referenced {
                return Err(InvariantViolation::AccountInUse(id).into());
            }
            let removed = ledger.accounts.remove(index);
            ledger.touch();
            Ok(removed)
        })
    }
}

impl<T: PartitionBackend> TransactionStore for T {
    fn transaction(&self, user: &UserId, id: Uuid) -> CoreResult<Transaction> {
        self.read_partition(user, |ledger| {
            ledger
                .transaction(id)
                .cloned()
                .ok_or(CoreError::TransactionNotFound(id))
        })
    }

    fn query(&self, user: &UserId, query: &TransactionQuery) -> CoreResult<Vec<Transaction>> {
        self.read_partition(user, |ledger| Ok(ledger.select(query)))
    }

    fn insert_many(&self, user: &UserId, transactions: Vec<Transaction>) -> CoreResult<()> {
        self.write_partition(user, |ledger| {
            for txn in transactions {
                if ledger.transaction(txn.id).is_some() {
                    return Err(CoreError::StateConflict(format!(
                        "transaction {} already exists",
                        txn.id
                    )));
                }
                ledger.transactions.push(txn);
            }
            ledger.touch();
            Ok(())
        })
    }

    fn update_many(&self, user: &UserId, transactions: Vec<Transaction>) -> CoreResult<()> {
        self.write_partition(user, |ledger| {
            for txn in transactions {
                let index = ledger
                    .transaction_index(txn.id)
                    .ok_or(CoreError::TransactionNotFound(txn.id))?;
                ledger.transactions[index] = txn;
            }
            ledger.touch();
            Ok(())
        })
    }

    fn delete_many(&self, user: &UserId, ids: &[Uuid]) -> CoreResult<Vec<Transaction>> {
        self.write_partition(user, |ledger| {
            let mut removed = Vec::with_capacity(ids.len());
            for id in ids {
                let index = ledger
                    .transaction_index(*id)
                    .ok_or(CoreError::TransactionNotFound(*id))?;
                removed.push(ledger.transactions.remove(index));
            }
            ledger.touch();
            Ok(removed)
        })
    }
}

impl<T: PartitionBackend> CreditCardStore for T {
    fn card(&self, user: &UserId, id: Uuid) -> CoreResult<CreditCard> {
        self.read_partition(user, |ledger| Ok(find_record(ledger, id)?.card.clone()))
    }

    fn cards(&self, user: &UserId) -> CoreResult<Vec<CreditCard>> {
        self.read_partition(user, |ledger| {
            Ok(ledger
                .credit_cards
                .iter()
                .map(|record| record.card.clone())
                .collect())
        })
    }

    fn insert_card(&self, user: &UserId, card: CreditCard) -> CoreResult<()> {
        self.write_partition(user, |ledger| {
            if ledger.card_record(card.id).is_some() {
                return Err(CoreError::StateConflict(format!(
                    "credit card {} already exists",
                    card.id
                )));
            }
            ledger.credit_cards.push(CardRecord::new(card));
            ledger.touch();
            Ok(())
        })
    }

    fn update_card(&self, user: &UserId, card: CreditCard) -> CoreResult<CreditCard> {
        self.write_partition(user, |ledger| {
            if ledger.account(card.bank_account_id).is_none() {
                return Err(CoreError::AccountNotFound(card.bank_account_id));
            }
            let record = ledger
                .card_record_mut(card.id)
                .ok_or(CoreError::CreditCardNotFound(card.id))?;
            if !record.invoices.is_empty() {
                if record.card.closing_day != card.closing_day {
                    return Err(InvariantViolation::FieldNotAllowed("closing_day").into());
                }
                if record.card.due_day != card.due_day {
                    return Err(InvariantViolation::FieldNotAllowed("due_day").into());
                }
            }
            let highest = record
                .invoices
                .iter()
                .filter(|invoice| !invoice.is_paid())
                .map(|invoice| invoice.total)
                .fold(0.0, f64::max);
            if round_to_cents(highest) > round_to_cents(card.limit) {
                return Err(InvariantViolation::LimitBelowInvoiceTotal {
                    limit: card.limit,
                    total: highest,
                }
                .into());
            }
            record.card = card.clone();
            ledger.touch();
            Ok(card)
        })
    }

    fn delete_card(&self, user: &UserId, id: Uuid) -> CoreResult<CreditCard> {
        self.write_partition(user, |ledger| {
            let index = ledger
                .credit_cards
                .iter()
                .position(|record| record.card.id == id)
                .ok_or(CoreError::CreditCardNotFound(id))?;
            if !ledger.credit_cards[index].invoices.is_empty() {
                return Err(InvariantViolation::CardHasInvoices(id).into());
            }
            let removed = ledger.credit_cards.remove(index);
            ledger.touch();
            Ok(removed.card)
        })
    }
}

impl<T: PartitionBackend> InvoiceStore for T {
    fn invoice(
        &self,
        user: &UserId,
        card_id: Uuid,
        invoice_id: Uuid,
    ) -> CoreResult<CreditCardInvoice> {
        self.read_partition(user, |ledger| {
            find_record(ledger, card_id)?
                .invoices
                .iter()
                .find(|invoice| invoice.id == invoice_id)
                .cloned()
                .ok_or(CoreError::InvoiceNotFound(invoice_id))
        })
    }

    fn invoices(&self, user: &UserId, card_id: Uuid) -> CoreResult<Vec<CreditCardInvoice>> {
        self.read_partition(user, |ledger| {
            let mut invoices = find_record(ledger, card_id)?.invoices.clone();
            invoices.sort_by_key(|invoice| invoice.cycle());
            Ok(invoices)
        })
    }

    fn invoice_for_cycle(
        &self,
        user: &UserId,
        card_id: Uuid,
        cycle: InvoiceCycle,
    ) -> CoreResult<Option<CreditCardInvoice>> {
        self.read_partition(user, |ledger| {
            Ok(find_record(ledger, card_id)?
                .invoices
                .iter()
                .find(|invoice| invoice.cycle() == cycle)
                .cloned())
        })
    }

    fn insert_invoice(&self, user: &UserId, invoice: CreditCardInvoice) -> CoreResult<()> {
        self.write_partition(user, |ledger| {
            let card_id = invoice.card_id;
            let record = ledger
                .card_record_mut(card_id)
                .ok_or(CoreError::CreditCardNotFound(card_id))?;
            if record
                .invoices
                .iter()
                .any(|existing| existing.cycle() == invoice.cycle())
            {
                return Err(CoreError::StateConflict(format!(
                    "card {card_id} already has an invoice for {}",
                    invoice.cycle()
                )));
            }
            record.invoices.push(invoice);
            ledger.touch();
            Ok(())
        })
    }

    fn update_invoice(
        &self,
        user: &UserId,
        invoice: CreditCardInvoice,
    ) -> CoreResult<CreditCardInvoice> {
        self.write_partition(user, |ledger| {
            let record = ledger
                .card_record_mut(invoice.card_id)
                .ok_or(CoreError::CreditCardNotFound(invoice.card_id))?;
            let stored = record
                .invoices
                .iter_mut()
                .find(|existing| existing.id == invoice.id)
                .ok_or(CoreError::InvoiceNotFound(invoice.id))?;
            if stored.version != invoice.version {
                return Err(CoreError::StateConflict(format!(
                    "invoice {} changed (expected version {}, found {})",
                    invoice.id, invoice.version, stored.version
                )));
            }
            if stored.is_paid() {
                return Err(InvariantViolation::InvoicePaid(stored.id).into());
            }
            *stored = CreditCardInvoice {
                version: invoice.version + 1,
                ..invoice
            };
            let updated = stored.clone();
            ledger.touch();
            Ok(updated)
        })
    }

    fn delete_invoice(
        &self,
        user: &UserId,
        card_id: Uuid,
        invoice_id: Uuid,
        expected_version: u64,
    ) -> CoreResult<CreditCardInvoice> {
        self.write_partition(user, |ledger| {
            if ledger
                .transactions
                .iter()
                .any(|txn| txn.invoice_id == Some(invoice_id))
            {
                return Err(InvariantViolation::InvoiceInUse(invoice_id).into());
            }
            let record = ledger
                .card_record_mut(card_id)
                .ok_or(CoreError::CreditCardNotFound(card_id))?;
            let index = record
                .invoices
                .iter()
                .position(|invoice| invoice.id == invoice_id)
                .ok_or(CoreError::InvoiceNotFound(invoice_id))?;
            let stored = &record.invoices[index];
            if stored.version != expected_version {
                return Err(CoreError::StateConflict(format!(
                    "invoice {invoice_id} changed (expected version {expected_version}, found {})",
                    stored.version
                )));
            }
            if stored.is_paid() {
                return Err(InvariantViolation::InvoicePaid(invoice_id).into());
            }
            let removed = record.invoices.remove(index);
            ledger.touch();
            Ok(removed)
        })
    }
}
