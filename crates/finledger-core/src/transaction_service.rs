//! Entry point for every transaction and invoice operation exposed to callers.
//!
//! Routes each request to the manager that owns it: simple or recurring
//! income/expense, card installments, or the invoice lifecycle.

use std::sync::Arc;

use chrono::NaiveDate;
use finledger_domain::{Transaction, TransactionQuery, TransactionType, UserId};
use tracing::warn;
use uuid::Uuid;

use crate::{
    balance_reconciler::BalanceReconciler,
    invoice_service::{InvoicePayment, InvoiceService},
    invoice_status_scheduler::InvoiceStatusScheduler,
    invoice_transaction_service::InvoiceTransactionService,
    recurring_transaction_service::RecurringTransactionService,
    requests::{InvoicePurchase, TransactionDraft, TransactionPatch},
    settings::LedgerSettings,
    simple_transaction_service::SimpleTransactionService,
    storage::{StoreHandles, TransactionStore},
    time::Clock,
    CoreError, CoreResult,
};

#[derive(Clone)]
pub struct TransactionService {
    transactions: Arc<dyn TransactionStore>,
    simple: SimpleTransactionService,
    recurring: RecurringTransactionService,
    installments: InvoiceTransactionService,
    invoices: InvoiceService,
}

impl TransactionService {
    pub fn new(stores: &StoreHandles, clock: Arc<dyn Clock>, settings: LedgerSettings) -> Self {
        let reconciler = BalanceReconciler::new(stores.accounts.clone());
        let simple = SimpleTransactionService::new(
            stores.accounts.clone(),
            stores.transactions.clone(),
            reconciler.clone(),
        );
        let recurring = RecurringTransactionService::new(
            stores.accounts.clone(),
            stores.transactions.clone(),
            reconciler,
        );
        let installments = InvoiceTransactionService::new(
            stores.cards.clone(),
            stores.invoices.clone(),
            stores.transactions.clone(),
            clock.clone(),
            settings.clone(),
        );
        let scheduler = InvoiceStatusScheduler::new(
            stores.users.clone(),
            stores.cards.clone(),
            stores.invoices.clone(),
            clock.clone(),
            settings.clone(),
        );
        let invoices = InvoiceService::new(stores, simple.clone(), scheduler, clock, settings);
        Self {
            transactions: stores.transactions.clone(),
            simple,
            recurring,
            installments,
            invoices,
        }
    }

    pub fn invoice_service(&self) -> &InvoiceService {
        &self.invoices
    }

    /// Creates a single transaction, or a whole series when the draft is recurring.
    pub fn create_income_or_expense(
        &self,
        user: &UserId,
        draft: &TransactionDraft,
    ) -> CoreResult<Vec<Transaction>> {
        if draft.is_recurring {
            self.recurring.create(user, draft)
        } else {
            self.simple.create(user, draft).map(|txn| vec![txn])
        }
    }

    pub fn create_invoice_transaction(
        &self,
        user: &UserId,
        purchase: &InvoicePurchase,
    ) -> CoreResult<Vec<Transaction>> {
        self.installments.create(user, purchase)
    }

    pub fn update_transaction(
        &self,
        user: &UserId,
        id: Uuid,
        patch: &TransactionPatch,
    ) -> CoreResult<Transaction> {
        self.simple.update(user, id, patch)
    }

    pub fn delete_income_or_expense(&self, user: &UserId, id: Uuid) -> CoreResult<Transaction> {
        self.simple.delete(user, id)
    }

    pub fn delete_invoice_transaction(
        &self,
        user: &UserId,
        primary_id: Uuid,
    ) -> CoreResult<Vec<Transaction>> {
        self.installments.delete(user, primary_id)
    }

    pub fn update_invoice_transactions(
        &self,
        user: &UserId,
        primary_id: Uuid,
        patch: &TransactionPatch,
    ) -> CoreResult<Vec<Transaction>> {
        self.installments.update(user, primary_id, patch)
    }

    pub fn delete_recurring_transactions(
        &self,
        user: &UserId,
        id: Uuid,
    ) -> CoreResult<Vec<Transaction>> {
        self.recurring.delete_recurring(user, id)
    }

    pub fn update_recurring_transaction_group(
        &self,
        user: &UserId,
        id: Uuid,
        patch: &TransactionPatch,
    ) -> CoreResult<Vec<Transaction>> {
        self.recurring.update_group(user, id, patch)
    }

    pub fn mark_recurring_paid(&self, user: &UserId, id: Uuid) -> CoreResult<Transaction> {
        self.recurring.mark_paid(user, id)
    }

    pub fn mark_recurring_unpaid(&self, user: &UserId, id: Uuid) -> CoreResult<Transaction> {
        self.recurring.mark_unpaid(user, id)
    }

    pub fn pay_invoice_installment(&self, user: &UserId, id: Uuid) -> CoreResult<Transaction> {
        self.installments.pay_installment(user, id)
    }

    pub fn pay_invoice(
        &self,
        user: &UserId,
        card_id: Uuid,
        invoice_id: Uuid,
        bank_account_id: Uuid,
    ) -> CoreResult<InvoicePayment> {
        self.invoices
            .pay_invoice(user, card_id, invoice_id, bank_account_id)
    }

    /// Every INCOME and EXPENSE transaction of the user.
    pub fn list_income_or_expense(&self, user: &UserId) -> CoreResult<Vec<Transaction>> {
        Ok(self
            .transactions
            .query(user, &TransactionQuery::All)?
            .into_iter()
            .filter(|txn| txn.kind != TransactionType::Invoice)
            .collect())
    }

    /// Every installment of the user, after bringing invoice statuses up to date.
    pub fn list_invoice_transactions(&self, user: &UserId) -> CoreResult<Vec<Transaction>> {
        if let Err(err) = self.invoices.refresh_all(user) {
            warn!(user = %user, error = %err, "listing installments with stale invoice statuses");
        }
        self.transactions
            .query(user, &TransactionQuery::Kind(TransactionType::Invoice))
    }

    pub fn list_in_range(
        &self,
        user: &UserId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> CoreResult<Vec<Transaction>> {
        if end < start {
            return Err(CoreError::Validation(
                "range end must not precede its start".into(),
            ));
        }
        self.transactions
            .query(user, &TransactionQuery::DateRange { start, end })
    }

    pub fn installments(&self, user: &UserId, primary_id: Uuid) -> CoreResult<Vec<Transaction>> {
        self.installments.installments(user, primary_id)
    }

    pub fn series(&self, user: &UserId, id: Uuid) -> CoreResult<Vec<Transaction>> {
        self.recurring.series(user, id)
    }
}
