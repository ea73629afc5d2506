//! Time-driven invoice status sweep.
//!
//! OPEN becomes CLOSED once the cycle's closing date has passed, and CLOSED
//! becomes OVERDUE once the due date (same month) has passed. PAID and
//! OVERDUE are never advanced here. Transitions are applied until the status
//! is stable, so an immediate second run changes nothing.

use std::sync::Arc;

use chrono::NaiveDate;
use finledger_domain::{CreditCard, CreditCardInvoice, InvoiceStatus, UserId};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    balance_reconciler::CONFLICT_RETRIES,
    settings::LedgerSettings,
    storage::{CreditCardStore, InvoiceStore, UserDirectory},
    time::Clock,
    CoreResult,
};

/// Next status for an invoice on `today`, or `None` when it stays put.
pub fn next_status(
    invoice: &CreditCardInvoice,
    card: &CreditCard,
    today: NaiveDate,
) -> Option<InvoiceStatus> {
    let cycle = invoice.cycle();
    match invoice.status {
        InvoiceStatus::Open => cycle
            .closing_date(card.closing_day)
            .filter(|closing| today > *closing)
            .map(|_| InvoiceStatus::Closed),
        InvoiceStatus::Closed => cycle
            .due_date(card.due_day)
            .filter(|due| today > *due)
            .map(|_| InvoiceStatus::Overdue),
        InvoiceStatus::Overdue | InvoiceStatus::Paid => None,
    }
}

/// Status reached after applying every due transition.
pub fn settled_status(
    invoice: &CreditCardInvoice,
    card: &CreditCard,
    today: NaiveDate,
) -> InvoiceStatus {
    let mut current = invoice.clone();
    while let Some(next) = next_status(&current, card, today) {
        current.status = next;
    }
    current.status
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub card_id: Uuid,
    pub invoice_id: Uuid,
    pub from: InvoiceStatus,
    pub to: InvoiceStatus,
}

/// Outcome of refreshing one card's invoices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CardRefresh {
    pub changes: Vec<StatusChange>,
    pub failures: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub date: Option<NaiveDate>,
    pub users: usize,
    pub cards: usize,
    pub invoices: usize,
    pub changes: Vec<StatusChange>,
    pub failures: usize,
}

impl SweepReport {
    pub fn transitions(&self) -> usize {
        self.changes.len()
    }
}

#[derive(Clone)]
pub struct InvoiceStatusScheduler {
    users: Arc<dyn UserDirectory>,
    cards: Arc<dyn CreditCardStore>,
    invoices: Arc<dyn InvoiceStore>,
    clock: Arc<dyn Clock>,
    settings: LedgerSettings,
}

impl InvoiceStatusScheduler {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        cards: Arc<dyn CreditCardStore>,
        invoices: Arc<dyn InvoiceStore>,
        clock: Arc<dyn Clock>,
        settings: LedgerSettings,
    ) -> Self {
        Self {
            users,
            cards,
            invoices,
            clock,
            settings,
        }
    }

    /// Sweeps every user, card and invoice. Failures are logged and counted.
    pub fn run(&self) -> SweepReport {
        let today = self.settings.today(self.clock.as_ref());
        let mut report = SweepReport {
            date: Some(today),
            ..SweepReport::default()
        };
        let users = match self.users.user_ids() {
            Ok(users) => users,
            Err(err) => {
                error!(error = %err, "invoice sweep could not list users");
                report.failures += 1;
                return report;
            }
        };

        for user in users {
            report.users += 1;
            let cards = match self.cards.cards(&user) {
                Ok(cards) => cards,
                Err(err) => {
                    warn!(user = %user, error = %err, "skipping user in invoice sweep");
                    report.failures += 1;
                    continue;
                }
            };
            for card in cards {
                report.cards += 1;
                match self.refresh_card(&user, &card, today) {
                    Ok((refresh, seen)) => {
                        report.invoices += seen;
                        report.failures += refresh.failures;
                        report.changes.extend(refresh.changes);
                    }
                    Err(err) => {
                        warn!(
                            user = %user,
                            card = %card.id,
                            error = %err,
                            "skipping card in invoice sweep"
                        );
                        report.failures += 1;
                    }
                }
            }
        }
        info!(
            date = %today,
            users = report.users,
            cards = report.cards,
            transitions = report.transitions(),
            failures = report.failures,
            "invoice sweep finished"
        );
        report
    }

    /// Applies due transitions to the invoices of one card.
    pub fn refresh(&self, user: &UserId, card: &CreditCard) -> CoreResult<CardRefresh> {
        let today = self.settings.today(self.clock.as_ref());
        self.refresh_card(user, card, today).map(|(refresh, _)| refresh)
    }

    fn refresh_card(
        &self,
        user: &UserId,
        card: &CreditCard,
        today: NaiveDate,
    ) -> CoreResult<(CardRefresh, usize)> {
        let invoices = self.invoices.invoices(user, card.id)?;
        let seen = invoices.len();
        let mut refresh = CardRefresh::default();
        for invoice in invoices {
            match self.advance(user, card, invoice, today) {
                Ok(Some(change)) => refresh.changes.push(change),
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        user = %user,
                        card = %card.id,
                        error = %err,
                        "invoice status update failed"
                    );
                    refresh.failures += 1;
                }
            }
        }
        Ok((refresh, seen))
    }

    fn advance(
        &self,
        user: &UserId,
        card: &CreditCard,
        mut invoice: CreditCardInvoice,
        today: NaiveDate,
    ) -> CoreResult<Option<StatusChange>> {
        let mut attempt = 0;
        loop {
            let target = settled_status(&invoice, card, today);
            if target == invoice.status {
                return Ok(None);
            }
            let from = invoice.status;
            let invoice_id = invoice.id;
            let mut next = invoice.clone();
            next.status = target;
            match self.invoices.update_invoice(user, next) {
                Ok(_) => {
                    debug!(
                        user = %user,
                        card = %card.id,
                        invoice = %invoice_id,
                        from = %from,
                        to = %target,
                        "invoice status advanced"
                    );
                    return Ok(Some(StatusChange {
                        card_id: card.id,
                        invoice_id,
                        from,
                        to: target,
                    }));
                }
                Err(err) if err.is_retryable() && attempt < CONFLICT_RETRIES => {
                    attempt += 1;
                    invoice = self.invoices.invoice(user, card.id, invoice_id)?;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use finledger_domain::{CardFlag, InvoiceCycle};

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn card(closing_day: u32, due_day: u32) -> CreditCard {
        CreditCard::new("Gold", CardFlag::Visa, closing_day, due_day, 1000.0, Uuid::new_v4())
    }

    #[test]
    fn open_invoice_closes_the_day_after_closing() {
        let card = card(10, 20);
        let invoice =
            CreditCardInvoice::new(card.id, InvoiceCycle::new(3, 2024), InvoiceStatus::Open);
        assert_eq!(next_status(&invoice, &card, date(2024, 3, 10)), None);
        assert_eq!(
            next_status(&invoice, &card, date(2024, 3, 11)),
            Some(InvoiceStatus::Closed)
        );
    }

    #[test]
    fn settles_through_both_transitions_when_both_dates_passed() {
        let card = card(10, 20);
        let invoice =
            CreditCardInvoice::new(card.id, InvoiceCycle::new(3, 2024), InvoiceStatus::Open);
        assert_eq!(
            settled_status(&invoice, &card, date(2024, 3, 21)),
            InvoiceStatus::Overdue
        );
        assert_eq!(
            settled_status(&invoice, &card, date(2024, 3, 15)),
            InvoiceStatus::Closed
        );
    }

    #[test]
    fn paid_and_overdue_are_terminal() {
        let card = card(10, 20);
        let mut invoice =
            CreditCardInvoice::new(card.id, InvoiceCycle::new(1, 2024), InvoiceStatus::Paid);
        assert_eq!(next_status(&invoice, &card, date(2025, 1, 1)), None);
        invoice.status = InvoiceStatus::Overdue;
        assert_eq!(next_status(&invoice, &card, date(2025, 1, 1)), None);
    }

    #[test]
    fn day_31_closing_clamps_in_february() {
        let card = card(31, 31);
        let invoice =
            CreditCardInvoice::new(card.id, InvoiceCycle::new(2, 2023), InvoiceStatus::Open);
        assert_eq!(
            next_status(&invoice, &card, date(2023, 3, 1)),
            Some(InvoiceStatus::Closed)
        );
    }
}
