//! Invoice lifecycle: listing, status refresh and whole-invoice payment.

use std::sync::Arc;

use finledger_domain::{
    CreditCardInvoice, InvoiceStatus, Transaction, TransactionQuery, TransactionType, UserId,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    balance_reconciler::CONFLICT_RETRIES,
    error::InvariantViolation,
    invoice_status_scheduler::{CardRefresh, InvoiceStatusScheduler},
    requests::TransactionDraft,
    settings::LedgerSettings,
    simple_transaction_service::SimpleTransactionService,
    storage::{BankAccountStore, CreditCardStore, InvoiceStore, StoreHandles, TransactionStore},
    time::Clock,
    CoreResult,
};

#[derive(Clone)]
pub struct InvoiceService {
    accounts: Arc<dyn BankAccountStore>,
    cards: Arc<dyn CreditCardStore>,
    invoices: Arc<dyn InvoiceStore>,
    transactions: Arc<dyn TransactionStore>,
    simple: SimpleTransactionService,
    scheduler: InvoiceStatusScheduler,
    clock: Arc<dyn Clock>,
    settings: LedgerSettings,
}

/// Result of settling an invoice.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoicePayment {
    pub invoice: CreditCardInvoice,
    pub payment: Transaction,
    pub installments_settled: usize,
}

fn ensure_payable(invoice: &CreditCardInvoice) -> CoreResult<()> {
    match invoice.status {
        InvoiceStatus::Closed | InvoiceStatus::Overdue => Ok(()),
        status => Err(InvariantViolation::InvoiceNotPayable(status).into()),
    }
}

impl InvoiceService {
    pub fn new(
        stores: &StoreHandles,
        simple: SimpleTransactionService,
        scheduler: InvoiceStatusScheduler,
        clock: Arc<dyn Clock>,
        settings: LedgerSettings,
    ) -> Self {
        Self {
            accounts: stores.accounts.clone(),
            cards: stores.cards.clone(),
            invoices: stores.invoices.clone(),
            transactions: stores.transactions.clone(),
            simple,
            scheduler,
            clock,
            settings,
        }
    }

    pub fn invoices(&self, user: &UserId, card_id: Uuid) -> CoreResult<Vec<CreditCardInvoice>> {
        self.invoices.invoices(user, card_id)
    }

    pub fn invoice(
        &self,
        user: &UserId,
        card_id: Uuid,
        invoice_id: Uuid,
    ) -> CoreResult<CreditCardInvoice> {
        self.invoices.invoice(user, card_id, invoice_id)
    }

    /// Brings the statuses of one card's invoices up to date.
    pub fn refresh_card_statuses(&self, user: &UserId, card_id: Uuid) -> CoreResult<CardRefresh> {
        let card = self.cards.card(user, card_id)?;
        self.scheduler.refresh(user, &card)
    }

    /// Refreshes every card of the user, logging cards that fail.
    pub fn refresh_all(&self, user: &UserId) -> CoreResult<usize> {
        let mut changed = 0;
        for card in self.cards.cards(user)? {
            match self.scheduler.refresh(user, &card) {
                Ok(refresh) => changed += refresh.changes.len(),
                Err(err) => warn!(
                    user = %user,
                    card = %card.id,
                    error = %err,
                    "invoice status refresh failed"
                ),
            }
        }
        Ok(changed)
    }

    /// Settles a CLOSED or OVERDUE invoice from `bank_account_id`.
    ///
    /// An invoice past its due date remains payable; OPEN and PAID invoices
    /// fail with `InvoiceNotPayable`.
    ///
    /// Marks every installment paid, records one paid EXPENSE for the invoice
    /// total and finally flips the invoice to PAID. Earlier steps are undone
    /// when a later one fails.
    pub fn pay_invoice(
        &self,
        user: &UserId,
        card_id: Uuid,
        invoice_id: Uuid,
        bank_account_id: Uuid,
    ) -> CoreResult<InvoicePayment> {
        let card = self.cards.card(user, card_id)?;
        let invoice = self.invoices.invoice(user, card_id, invoice_id)?;
        ensure_payable(&invoice)?;
        let account = self.accounts.account(user, bank_account_id)?;

        let unpaid: Vec<Transaction> = self
            .transactions
            .query(
                user,
                &TransactionQuery::Invoice {
                    credit_card_id: card_id,
                    invoice_id,
                },
            )?
            .into_iter()
            .filter(|txn| !txn.is_paid)
            .collect();
        let settled: Vec<Transaction> = unpaid
            .iter()
            .cloned()
            .map(|mut txn| {
                txn.is_paid = true;
                txn
            })
            .collect();
        self.transactions.update_many(user, settled.clone())?;

        let today = self.settings.today(self.clock.as_ref());
        let draft = TransactionDraft::new(
            format!("Invoice {} - {}", invoice.cycle().label(), card.name),
            self.settings.invoice_payment_category.clone(),
            invoice.total,
            today,
            TransactionType::Expense,
            account.currency.clone(),
            account.id,
        )
        .paid(true);
        let payment = match self.simple.create(user, &draft) {
            Ok(payment) => payment,
            Err(err) => {
                self.restore_installments(user, unpaid);
                return Err(err);
            }
        };

        match self.mark_paid(user, invoice, bank_account_id) {
            Ok(paid) => {
                info!(
                    user = %user,
                    card = %card_id,
                    invoice = %invoice_id,
                    account = %bank_account_id,
                    total = paid.total,
                    "invoice paid"
                );
                Ok(InvoicePayment {
                    invoice: paid,
                    payment,
                    installments_settled: settled.len(),
                })
            }
            Err(err) => {
                warn!(user = %user, invoice = %invoice_id, error = %err, "undoing invoice payment");
                if let Err(undo) = self.simple.delete(user, payment.id) {
                    error!(
                        user = %user,
                        transaction = %payment.id,
                        error = %undo,
                        "failed to remove invoice payment entry"
                    );
                }
                self.restore_installments(user, unpaid);
                Err(err)
            }
        }
    }

    fn mark_paid(
        &self,
        user: &UserId,
        mut invoice: CreditCardInvoice,
        bank_account_id: Uuid,
    ) -> CoreResult<CreditCardInvoice> {
        let mut attempt = 0;
        loop {
            let mut next = invoice.clone();
            next.status = InvoiceStatus::Paid;
            next.bank_account_id = Some(bank_account_id);
            match self.invoices.update_invoice(user, next) {
                Ok(stored) => return Ok(stored),
                Err(err) if err.is_retryable() && attempt < CONFLICT_RETRIES => {
                    attempt += 1;
                    invoice = self.invoices.invoice(user, invoice.card_id, invoice.id)?;
                    ensure_payable(&invoice)?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn restore_installments(&self, user: &UserId, original: Vec<Transaction>) {
        if original.is_empty() {
            return;
        }
        if let Err(err) = self.transactions.update_many(user, original) {
            error!(user = %user, error = %err, "failed to restore installment paid flags");
        }
    }
}
