//! Credit-card purchases split into installments charged to monthly invoices.

use std::{collections::BTreeMap, sync::Arc};

use chrono::NaiveDate;
use finledger_domain::{
    add_months, months_between, round_to_cents, CreditCard, CreditCardInvoice, InvoiceCycle,
    InvoiceStatus, Transaction, TransactionQuery, TransactionType, UserId,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    balance_reconciler::CONFLICT_RETRIES,
    error::InvariantViolation,
    requests::{InvoicePurchase, TransactionPatch},
    settings::LedgerSettings,
    storage::{CreditCardStore, InvoiceStore, TransactionStore},
    time::Clock,
    CoreError, CoreResult,
};

/// Oldest accepted cycle for a purchase's first installment, relative to today's cycle.
pub const MAX_CYCLES_BEHIND: i32 = 1;
/// Furthest accepted cycle for a purchase's first installment.
pub const MAX_CYCLES_AHEAD: i32 = 2;

#[derive(Debug, Clone, Copy)]
struct Reservation {
    card_id: Uuid,
    invoice_id: Uuid,
    delta: f64,
    /// Version of an invoice this reservation opened; `None` for existing invoices.
    created: Option<u64>,
}

/// Invoice total changes applied so far, released in reverse on failure.
/// Invoices opened by the failed operation are removed again.
#[derive(Debug, Default)]
struct ReservationJournal {
    entries: Vec<Reservation>,
}

#[derive(Debug, Clone, Copy)]
struct PlannedInstallment {
    date: NaiveDate,
    cycle: InvoiceCycle,
}

#[derive(Clone)]
pub struct InvoiceTransactionService {
    cards: Arc<dyn CreditCardStore>,
    invoices: Arc<dyn InvoiceStore>,
    transactions: Arc<dyn TransactionStore>,
    clock: Arc<dyn Clock>,
    settings: LedgerSettings,
}

fn exceeds_limit(total: f64, limit: f64) -> bool {
    round_to_cents(total) > round_to_cents(limit)
}

impl InvoiceTransactionService {
    pub fn new(
        cards: Arc<dyn CreditCardStore>,
        invoices: Arc<dyn InvoiceStore>,
        transactions: Arc<dyn TransactionStore>,
        clock: Arc<dyn Clock>,
        settings: LedgerSettings,
    ) -> Self {
        Self {
            cards,
            invoices,
            transactions,
            clock,
            settings,
        }
    }

    /// Number of monthly installments a purchase from `date` to `end` is split into.
    pub fn installment_count(date: NaiveDate, end: Option<NaiveDate>) -> u32 {
        match end {
            Some(end) if end > date => (months_between(date, end).max(0) + 1) as u32,
            _ => 1,
        }
    }

    /// Records a card purchase as unpaid installments, reserving credit on each invoice.
    pub fn create(
        &self,
        user: &UserId,
        purchase: &InvoicePurchase,
    ) -> CoreResult<Vec<Transaction>> {
        purchase.validate()?;
        let card = self.cards.card(user, purchase.credit_card_id)?;

        let count = Self::installment_count(purchase.date, purchase.end_date);
        let installment_value = round_to_cents(purchase.value / f64::from(count));
        let current = card.cycle_for(self.settings.today(self.clock.as_ref()));

        // Cycles step from the first one so month-end clamping never folds two
        // installments into the same invoice.
        let first_cycle = card.cycle_for(purchase.date);
        let plan: Vec<PlannedInstallment> = (0..count as i32)
            .map(|index| PlannedInstallment {
                date: add_months(purchase.date, index),
                cycle: first_cycle.offset(index),
            })
            .collect();

        if let Some(first) = plan.first() {
            let distance = current.months_until(first.cycle);
            if distance < -MAX_CYCLES_BEHIND || distance > MAX_CYCLES_AHEAD {
                return Err(InvariantViolation::InvoiceCycleOutOfRange(first.cycle).into());
            }
        }

        let mut per_cycle: BTreeMap<InvoiceCycle, f64> = BTreeMap::new();
        for planned in &plan {
            *per_cycle.entry(planned.cycle).or_default() += installment_value;
        }
        for (cycle, amount) in &per_cycle {
            let existing_total = match self.invoices.invoice_for_cycle(user, card.id, *cycle)? {
                Some(invoice) if invoice.is_paid() => {
                    return Err(InvariantViolation::InvoicePaid(invoice.id).into());
                }
                Some(invoice) => invoice.total,
                None => 0.0,
            };
            let attempted = round_to_cents(existing_total + amount);
            if exceeds_limit(attempted, card.limit) {
                return Err(InvariantViolation::CreditLimitExceeded {
                    limit: card.limit,
                    attempted,
                }
                .into());
            }
        }

        let primary_id = Uuid::new_v4();
        let mut journal = ReservationJournal::default();
        let mut installments = Vec::with_capacity(plan.len());
        for planned in &plan {
            let reserved =
                self.reserve(user, &card, planned.cycle, installment_value, current, &mut journal);
            let invoice = match reserved {
                Ok(invoice) => invoice,
                Err(err) => {
                    self.release(user, journal);
                    return Err(err);
                }
            };
            let mut txn = Transaction::new(
                purchase.name.trim(),
                purchase.category.clone(),
                installment_value,
                planned.date,
                TransactionType::Invoice,
                purchase.currency.clone(),
                card.bank_account_id,
            );
            txn.start_date = Some(purchase.date);
            txn.end_date = purchase.end_date;
            txn.invoice_id = Some(invoice.id);
            txn.credit_card_id = Some(card.id);
            txn.primary_transaction_id = Some(primary_id);
            installments.push(txn);
        }

        if let Err(err) = self.transactions.insert_many(user, installments.clone()) {
            self.release(user, journal);
            return Err(err);
        }
        info!(
            user = %user,
            card = %card.id,
            transaction = %primary_id,
            installments = installments.len(),
            installment_value,
            "card purchase recorded"
        );
        Ok(installments)
    }

    /// Every installment sharing `primary_id`, ordered by date.
    pub fn installments(&self, user: &UserId, primary_id: Uuid) -> CoreResult<Vec<Transaction>> {
        let rows = self
            .transactions
            .query(user, &TransactionQuery::Installments(primary_id))?;
        if rows.is_empty() {
            return Err(CoreError::InstallmentsNotFound(primary_id));
        }
        Ok(rows)
    }

    /// Removes an unpaid purchase, giving its credit back to each invoice.
    pub fn delete(&self, user: &UserId, primary_id: Uuid) -> CoreResult<Vec<Transaction>> {
        let installments = self.unpaid_installments(user, primary_id)?;

        let mut journal = ReservationJournal::default();
        for (invoice_key, amount) in per_invoice(&installments, |txn| txn.value) {
            let restored =
                self.adjust_total(user, invoice_key.0, invoice_key.1, -amount, None, &mut journal);
            if let Err(err) = restored {
                self.release(user, journal);
                return Err(err);
            }
        }
        let ids: Vec<Uuid> = installments.iter().map(|txn| txn.id).collect();
        match self.transactions.delete_many(user, &ids) {
            Ok(removed) => {
                info!(
                    user = %user,
                    transaction = %primary_id,
                    removed = removed.len(),
                    "card purchase deleted"
                );
                Ok(removed)
            }
            Err(err) => {
                self.release(user, journal);
                Err(err)
            }
        }
    }

    /// Renames, recategorises or reprices every installment of an unpaid purchase.
    ///
    /// `value` is the new per-installment amount; invoice totals follow the difference.
    pub fn update(
        &self,
        user: &UserId,
        primary_id: Uuid,
        patch: &TransactionPatch,
    ) -> CoreResult<Vec<Transaction>> {
        patch.validate_installments()?;
        let installments = self.unpaid_installments(user, primary_id)?;
        let allowed = TransactionPatch {
            name: patch.name.clone(),
            category: patch.category.clone(),
            value: patch.value.map(round_to_cents),
            ..Default::default()
        };

        let updated: Vec<Transaction> = installments
            .iter()
            .map(|txn| {
                let mut next = txn.clone();
                allowed.apply_to(&mut next);
                next
            })
            .collect();

        let mut journal = ReservationJournal::default();
        if let Some(new_value) = allowed.value {
            let deltas: Vec<((Uuid, Uuid), f64)> =
                per_invoice(&installments, |txn| new_value - txn.value)
                    .into_iter()
                    .filter(|(_, delta)| *delta != 0.0)
                    .collect();
            for ((card_id, invoice_id), delta) in &deltas {
                let card = self.cards.card(user, *card_id)?;
                let invoice = self.invoices.invoice(user, *card_id, *invoice_id)?;
                if invoice.is_paid() {
                    return Err(InvariantViolation::InvoicePaid(invoice.id).into());
                }
                let attempted = round_to_cents(invoice.total + delta);
                if *delta > 0.0 && exceeds_limit(attempted, card.limit) {
                    return Err(InvariantViolation::CreditLimitExceeded {
                        limit: card.limit,
                        attempted,
                    }
                    .into());
                }
            }
            for ((card_id, invoice_id), delta) in deltas {
                let limit = if delta > 0.0 {
                    Some(self.cards.card(user, card_id)?.limit)
                } else {
                    None
                };
                if let Err(err) =
                    self.adjust_total(user, card_id, invoice_id, delta, limit, &mut journal)
                {
                    self.release(user, journal);
                    return Err(err);
                }
            }
        }

        if let Err(err) = self.transactions.update_many(user, updated.clone()) {
            self.release(user, journal);
            return Err(err);
        }
        info!(user = %user, transaction = %primary_id, "card purchase updated");
        Ok(updated)
    }

    /// Marks one installment as settled without touching invoice totals.
    pub fn pay_installment(&self, user: &UserId, id: Uuid) -> CoreResult<Transaction> {
        let mut txn = self.transactions.transaction(user, id)?;
        if txn.kind != TransactionType::Invoice {
            return Err(InvariantViolation::UnsupportedTransactionType(txn.kind).into());
        }
        if txn.is_paid {
            return Err(InvariantViolation::AlreadyPaid.into());
        }
        txn.is_paid = true;
        self.transactions.update_many(user, vec![txn.clone()])?;
        info!(user = %user, transaction = %id, "installment paid");
        Ok(txn)
    }

    fn unpaid_installments(&self, user: &UserId, primary_id: Uuid) -> CoreResult<Vec<Transaction>> {
        let installments = self.installments(user, primary_id)?;
        if installments.iter().any(|txn| txn.is_paid) {
            return Err(InvariantViolation::InstallmentPaid.into());
        }
        Ok(installments)
    }

    /// Adds `amount` to the invoice of `cycle`, creating the invoice when missing.
    fn reserve(
        &self,
        user: &UserId,
        card: &CreditCard,
        cycle: InvoiceCycle,
        amount: f64,
        current: InvoiceCycle,
        journal: &mut ReservationJournal,
    ) -> CoreResult<CreditCardInvoice> {
        let mut attempt = 0;
        loop {
            let outcome = match self.invoices.invoice_for_cycle(user, card.id, cycle)? {
                Some(invoice) => {
                    self.adjust_total(user, card.id, invoice.id, amount, Some(card.limit), journal)
                }
                None => {
                    let status = if cycle < current {
                        InvoiceStatus::Closed
                    } else {
                        InvoiceStatus::Open
                    };
                    let mut invoice = CreditCardInvoice::new(card.id, cycle, status);
                    invoice.total = round_to_cents(amount);
                    if exceeds_limit(invoice.total, card.limit) {
                        return Err(InvariantViolation::CreditLimitExceeded {
                            limit: card.limit,
                            attempted: invoice.total,
                        }
                        .into());
                    }
                    match self.invoices.insert_invoice(user, invoice.clone()) {
                        Ok(()) => {
                            debug!(
                                user = %user,
                                card = %card.id,
                                invoice = %invoice.id,
                                cycle = %cycle,
                                status = %status,
                                "invoice opened"
                            );
                            journal.entries.push(Reservation {
                                card_id: card.id,
                                invoice_id: invoice.id,
                                delta: amount,
                                created: Some(invoice.version),
                            });
                            Ok(invoice)
                        }
                        Err(err) => Err(err),
                    }
                }
            };
            match outcome {
                Err(err) if err.is_retryable() && attempt < CONFLICT_RETRIES => {
                    attempt += 1;
                    warn!(
                        user = %user,
                        card = %card.id,
                        cycle = %cycle,
                        "invoice write conflicted, retrying"
                    );
                }
                other => return other,
            }
        }
    }

    /// Compare-and-set change of an invoice total, checked against `limit` when given.
    fn adjust_total(
        &self,
        user: &UserId,
        card_id: Uuid,
        invoice_id: Uuid,
        delta: f64,
        limit: Option<f64>,
        journal: &mut ReservationJournal,
    ) -> CoreResult<CreditCardInvoice> {
        let updated = self.write_total(user, card_id, invoice_id, delta, limit)?;
        journal.entries.push(Reservation {
            card_id,
            invoice_id,
            delta,
            created: None,
        });
        Ok(updated)
    }

    fn write_total(
        &self,
        user: &UserId,
        card_id: Uuid,
        invoice_id: Uuid,
        delta: f64,
        limit: Option<f64>,
    ) -> CoreResult<CreditCardInvoice> {
        let mut attempt = 0;
        loop {
            let mut invoice = self.invoices.invoice(user, card_id, invoice_id)?;
            if invoice.is_paid() {
                return Err(InvariantViolation::InvoicePaid(invoice.id).into());
            }
            let attempted = round_to_cents(invoice.total + delta);
            if let Some(limit) = limit {
                if exceeds_limit(attempted, limit) {
                    return Err(InvariantViolation::CreditLimitExceeded { limit, attempted }.into());
                }
            }
            invoice.total = attempted;
            match self.invoices.update_invoice(user, invoice) {
                Ok(stored) => {
                    debug!(
                        user = %user,
                        card = %card_id,
                        invoice = %invoice_id,
                        delta,
                        total = stored.total,
                        "invoice total adjusted"
                    );
                    return Ok(stored);
                }
                Err(err) if err.is_retryable() && attempt < CONFLICT_RETRIES => {
                    attempt += 1;
                    warn!(
                        user = %user,
                        invoice = %invoice_id,
                        "invoice write conflicted, retrying"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn release(&self, user: &UserId, journal: ReservationJournal) {
        if journal.entries.is_empty() {
            return;
        }
        warn!(
            user = %user,
            steps = journal.entries.len(),
            "releasing invoice reservations"
        );
        for entry in journal.entries.into_iter().rev() {
            if let Some(version) = entry.created {
                match self
                    .invoices
                    .delete_invoice(user, entry.card_id, entry.invoice_id, version)
                {
                    Ok(_) => {
                        debug!(user = %user, invoice = %entry.invoice_id, "invoice discarded");
                        continue;
                    }
                    Err(err) => warn!(
                        user = %user,
                        invoice = %entry.invoice_id,
                        error = %err,
                        "invoice changed since opened, releasing its total instead"
                    ),
                }
            }
            if let Err(err) =
                self.write_total(user, entry.card_id, entry.invoice_id, -entry.delta, None)
            {
                error!(
                    user = %user,
                    invoice = %entry.invoice_id,
                    error = %err,
                    "failed to release invoice reservation"
                );
            }
        }
    }
}

/// Sums `amount` per (card, invoice) pair referenced by the installments.
fn per_invoice(
    installments: &[Transaction],
    amount: impl Fn(&Transaction) -> f64,
) -> BTreeMap<(Uuid, Uuid), f64> {
    let mut sums = BTreeMap::new();
    for txn in installments {
        if let (Some(card_id), Some(invoice_id)) = (txn.credit_card_id, txn.invoice_id) {
            *sums.entry((card_id, invoice_id)).or_insert(0.0) += amount(txn);
        }
    }
    sums
}

#[cfg(test)]
mod tests {
    use finledger_domain::{AccountType, BankAccount, CardFlag};

    use super::*;
    use crate::{
        memory_store::MemoryLedgerStore,
        storage::{BankAccountStore, CreditCardStore},
        time::FixedClock,
    };

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    struct Fixture {
        store: Arc<MemoryLedgerStore>,
        service: InvoiceTransactionService,
        user: UserId,
        card: CreditCard,
    }

    fn fixture(today: NaiveDate, limit: f64) -> Fixture {
        let store = Arc::new(MemoryLedgerStore::new());
        let user = UserId::new("u-1");
        let account = BankAccount::new("Main", AccountType::Checking, "BRL", 0.0);
        let card = CreditCard::new("Gold", CardFlag::Visa, 10, 20, limit, account.id);
        store.insert_account(&user, account).unwrap();
        store.insert_card(&user, card.clone()).unwrap();
        let service = InvoiceTransactionService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(FixedClock::on(today)),
            LedgerSettings::default(),
        );
        Fixture {
            store,
            service,
            user,
            card,
        }
    }

    fn purchase(fx: &Fixture, value: f64, on: NaiveDate) -> InvoicePurchase {
        InvoicePurchase::new("Laptop", "Tech", value, on, "BRL", fx.card.id)
    }

    fn totals(fx: &Fixture) -> Vec<f64> {
        fx.store
            .invoices(&fx.user, fx.card.id)
            .unwrap()
            .iter()
            .map(|invoice| invoice.total)
            .collect()
    }

    #[test]
    fn splits_purchase_into_rounded_installments() {
        let fx = fixture(date(2024, 1, 5), 1000.0);
        let rows = fx
            .service
            .create(&fx.user, &purchase(&fx, 100.0, date(2024, 1, 5)).until(date(2024, 3, 5)))
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|txn| txn.value == 33.33));
        assert!(rows.iter().map(|txn| txn.value).sum::<f64>() <= 100.0);
        let primary = rows[0].primary_transaction_id;
        assert!(primary.is_some());
        assert!(rows.iter().all(|txn| txn.primary_transaction_id == primary));
        assert_eq!(totals(&fx), vec![33.33, 33.33, 33.33]);
    }

    #[test]
    fn purchase_after_closing_day_lands_on_next_invoice() {
        let fx = fixture(date(2024, 1, 15), 1000.0);
        let rows = fx
            .service
            .create(&fx.user, &purchase(&fx, 50.0, date(2024, 1, 15)))
            .unwrap();
        let invoices = fx.store.invoices(&fx.user, fx.card.id).unwrap();
        assert_eq!(invoices.len(), 1);
        assert_eq!((invoices[0].month, invoices[0].year), (2, 2024));
        assert_eq!(invoices[0].status, InvoiceStatus::Open);
        assert_eq!(rows[0].invoice_id, Some(invoices[0].id));
    }

    #[test]
    fn credit_limit_violation_leaves_totals_unchanged() {
        let fx = fixture(date(2024, 1, 5), 500.0);
        fx.service
            .create(&fx.user, &purchase(&fx, 400.0, date(2024, 1, 5)))
            .unwrap();
        let err = fx
            .service
            .create(&fx.user, &purchase(&fx, 150.0, date(2024, 1, 6)))
            .unwrap_err();
        assert!(matches!(
            err.invariant(),
            Some(InvariantViolation::CreditLimitExceeded { .. })
        ));
        assert_eq!(totals(&fx), vec![400.0]);
        let all = fx.store.query(&fx.user, &TransactionQuery::All).unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn first_installment_must_fall_near_the_current_cycle() {
        let fx = fixture(date(2024, 6, 5), 1000.0);
        let too_old = fx
            .service
            .create(&fx.user, &purchase(&fx, 10.0, date(2024, 4, 5)))
            .unwrap_err();
        assert!(matches!(
            too_old.invariant(),
            Some(InvariantViolation::InvoiceCycleOutOfRange(_))
        ));
        let too_far = fx
            .service
            .create(&fx.user, &purchase(&fx, 10.0, date(2024, 9, 5)))
            .unwrap_err();
        assert!(matches!(
            too_far.invariant(),
            Some(InvariantViolation::InvoiceCycleOutOfRange(_))
        ));

        fx.service
            .create(&fx.user, &purchase(&fx, 10.0, date(2024, 5, 5)))
            .unwrap();
        let invoices = fx.store.invoices(&fx.user, fx.card.id).unwrap();
        assert_eq!(invoices[0].status, InvoiceStatus::Closed);
    }

    #[test]
    fn later_installments_skip_the_range_check() {
        let fx = fixture(date(2024, 1, 5), 5000.0);
        let rows = fx
            .service
            .create(&fx.user, &purchase(&fx, 1200.0, date(2024, 1, 5)).until(date(2024, 12, 5)))
            .unwrap();
        assert_eq!(rows.len(), 12);
        assert_eq!(fx.store.invoices(&fx.user, fx.card.id).unwrap().len(), 12);
    }

    #[test]
    fn purchases_are_never_created_paid() {
        let fx = fixture(date(2024, 1, 5), 1000.0);
        let mut request = purchase(&fx, 10.0, date(2024, 1, 5));
        request.is_paid = true;
        let err = fx.service.create(&fx.user, &request).unwrap_err();
        assert_eq!(err.invariant(), Some(&InvariantViolation::InvoiceMustBeUnpaid));
    }

    #[test]
    fn delete_restores_invoice_totals() {
        let fx = fixture(date(2024, 1, 5), 1000.0);
        fx.service
            .create(&fx.user, &purchase(&fx, 80.0, date(2024, 1, 5)))
            .unwrap();
        let rows = fx
            .service
            .create(&fx.user, &purchase(&fx, 60.0, date(2024, 1, 5)).until(date(2024, 2, 5)))
            .unwrap();
        assert_eq!(totals(&fx), vec![110.0, 30.0]);

        let primary = rows[0].primary_transaction_id.unwrap();
        let removed = fx.service.delete(&fx.user, primary).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(totals(&fx), vec![80.0, 0.0]);
        assert!(matches!(
            fx.service.installments(&fx.user, primary),
            Err(CoreError::InstallmentsNotFound(_))
        ));
    }

    #[test]
    fn paid_installment_blocks_delete_and_update() {
        let fx = fixture(date(2024, 1, 5), 1000.0);
        let rows = fx
            .service
            .create(&fx.user, &purchase(&fx, 60.0, date(2024, 1, 5)).until(date(2024, 2, 5)))
            .unwrap();
        fx.service.pay_installment(&fx.user, rows[0].id).unwrap();
        assert_eq!(totals(&fx), vec![30.0, 30.0]);

        let primary = rows[0].primary_transaction_id.unwrap();
        let err = fx.service.delete(&fx.user, primary).unwrap_err();
        assert_eq!(err.invariant(), Some(&InvariantViolation::InstallmentPaid));
        let patch = TransactionPatch {
            name: Some("Phone".into()),
            ..Default::default()
        };
        let err = fx.service.update(&fx.user, primary, &patch).unwrap_err();
        assert_eq!(err.invariant(), Some(&InvariantViolation::InstallmentPaid));
        let err = fx.service.pay_installment(&fx.user, rows[0].id).unwrap_err();
        assert_eq!(err.invariant(), Some(&InvariantViolation::AlreadyPaid));
    }

    #[test]
    fn value_update_rederives_totals_within_limit() {
        let fx = fixture(date(2024, 1, 5), 100.0);
        let rows = fx
            .service
            .create(&fx.user, &purchase(&fx, 60.0, date(2024, 1, 5)).until(date(2024, 2, 5)))
            .unwrap();
        let primary = rows[0].primary_transaction_id.unwrap();

        let patch = TransactionPatch {
            value: Some(45.0),
            ..Default::default()
        };
        let updated = fx.service.update(&fx.user, primary, &patch).unwrap();
        assert!(updated.iter().all(|txn| txn.value == 45.0));
        assert_eq!(totals(&fx), vec![45.0, 45.0]);

        let too_much = TransactionPatch {
            value: Some(101.0),
            ..Default::default()
        };
        let err = fx.service.update(&fx.user, primary, &too_much).unwrap_err();
        assert!(matches!(
            err.invariant(),
            Some(InvariantViolation::CreditLimitExceeded { .. })
        ));
        assert_eq!(totals(&fx), vec![45.0, 45.0]);
    }
}
