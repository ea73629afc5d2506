use std::sync::Arc;

use finledger_domain::{CreditCard, UserId};
use tracing::info;
use uuid::Uuid;

use crate::{
    requests::CardUpdate,
    storage::{BankAccountStore, CreditCardStore},
    CoreError, CoreResult,
};

const NAME_LENGTH: std::ops::RangeInclusive<usize> = 3..=100;
const BILLING_DAYS: std::ops::RangeInclusive<u32> = 1..=31;

fn validate(card: &mut CreditCard) -> CoreResult<()> {
    card.name = card.name.trim().to_string();
    if !NAME_LENGTH.contains(&card.name.chars().count()) {
        return Err(CoreError::Validation(
            "card name must be between 3 and 100 characters".into(),
        ));
    }
    if !BILLING_DAYS.contains(&card.closing_day) || !BILLING_DAYS.contains(&card.due_day) {
        return Err(CoreError::Validation(
            "closing and due days must be between 1 and 31".into(),
        ));
    }
    if !card.limit.is_finite() || card.limit < 0.0 {
        return Err(CoreError::Validation(
            "credit limit must be a non-negative number".into(),
        ));
    }
    Ok(())
}

#[derive(Clone)]
pub struct CreditCardService {
    accounts: Arc<dyn BankAccountStore>,
    cards: Arc<dyn CreditCardStore>,
}

impl CreditCardService {
    pub fn new(accounts: Arc<dyn BankAccountStore>, cards: Arc<dyn CreditCardStore>) -> Self {
        Self { accounts, cards }
    }

    pub fn create_card(&self, user: &UserId, mut card: CreditCard) -> CoreResult<CreditCard> {
        validate(&mut card)?;
        self.accounts.account(user, card.bank_account_id)?;
        self.cards.insert_card(user, card.clone())?;
        info!(user = %user, card = %card.id, limit = card.limit, "credit card created");
        Ok(card)
    }

    pub fn update_card(
        &self,
        user: &UserId,
        id: Uuid,
        update: &CardUpdate,
    ) -> CoreResult<CreditCard> {
        let mut card = self.cards.card(user, id)?;
        update.apply(&mut card)?;
        validate(&mut card)?;
        let updated = self.cards.update_card(user, card)?;
        info!(user = %user, card = %id, limit = updated.limit, "credit card updated");
        Ok(updated)
    }

    /// Only cards that never received a purchase can be removed.
    pub fn delete_card(&self, user: &UserId, id: Uuid) -> CoreResult<CreditCard> {
        let removed = self.cards.delete_card(user, id)?;
        info!(user = %user, card = %id, "credit card deleted");
        Ok(removed)
    }

    pub fn card(&self, user: &UserId, id: Uuid) -> CoreResult<CreditCard> {
        self.cards.card(user, id)
    }

    pub fn cards(&self, user: &UserId) -> CoreResult<Vec<CreditCard>> {
        self.cards.cards(user)
    }
}

#[cfg(test)]
mod tests {
    use finledger_domain::{
        AccountType, BankAccount, CardFlag, CreditCardInvoice, InvoiceCycle, InvoiceStatus,
    };

    use super::*;
    use crate::{error::InvariantViolation, memory_store::MemoryLedgerStore, storage::InvoiceStore};

    fn service_with_account() -> (Arc<MemoryLedgerStore>, CreditCardService, UserId, Uuid) {
        let store = Arc::new(MemoryLedgerStore::new());
        let service = CreditCardService::new(store.clone(), store.clone());
        let user = UserId::new("u-1");
        let account = BankAccount::new("Main", AccountType::Checking, "BRL", 0.0);
        let account_id = account.id;
        store.insert_account(&user, account).unwrap();
        (store, service, user, account_id)
    }

    #[test]
    fn validates_days_limit_and_linked_account() {
        let (_store, service, user, account_id) = service_with_account();

        let bad_day = CreditCard::new("Gold", CardFlag::Visa, 0, 10, 100.0, account_id);
        assert!(matches!(
            service.create_card(&user, bad_day),
            Err(CoreError::Validation(_))
        ));
        let bad_limit = CreditCard::new("Gold", CardFlag::Visa, 5, 10, -1.0, account_id);
        assert!(matches!(
            service.create_card(&user, bad_limit),
            Err(CoreError::Validation(_))
        ));
        let orphan = CreditCard::new("Gold", CardFlag::Visa, 5, 10, 100.0, Uuid::new_v4());
        assert!(matches!(
            service.create_card(&user, orphan),
            Err(CoreError::AccountNotFound(_))
        ));

        let card = CreditCard::new("Gold", CardFlag::Mastercard, 5, 10, 100.0, account_id);
        let stored = service.create_card(&user, card).unwrap();
        assert_eq!(service.cards(&user).unwrap(), vec![stored]);
    }

    #[test]
    fn update_guards_limit_and_billing_days_once_invoiced() {
        let (store, service, user, account_id) = service_with_account();
        let card = service
            .create_card(
                &user,
                CreditCard::new("Gold", CardFlag::Visa, 5, 15, 500.0, account_id),
            )
            .unwrap();

        let renamed = service
            .update_card(
                &user,
                card.id,
                &CardUpdate {
                    name: Some(" Platinum ".into()),
                    closing_day: Some(8),
                    ..CardUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(renamed.name, "Platinum");
        assert_eq!(renamed.closing_day, 8);

        let mut invoice =
            CreditCardInvoice::new(card.id, InvoiceCycle::new(3, 2024), InvoiceStatus::Open);
        invoice.total = 300.0;
        store.insert_invoice(&user, invoice).unwrap();

        let lower = CardUpdate {
            limit: Some(250.0),
            ..CardUpdate::default()
        };
        assert_eq!(
            service.update_card(&user, card.id, &lower).unwrap_err().invariant(),
            Some(&InvariantViolation::LimitBelowInvoiceTotal {
                limit: 250.0,
                total: 300.0
            })
        );
        let days = CardUpdate {
            due_day: Some(20),
            ..CardUpdate::default()
        };
        assert_eq!(
            service.update_card(&user, card.id, &days).unwrap_err().invariant(),
            Some(&InvariantViolation::FieldNotAllowed("due_day"))
        );
        let orphan = CardUpdate {
            bank_account_id: Some(Uuid::new_v4()),
            ..CardUpdate::default()
        };
        assert!(matches!(
            service.update_card(&user, card.id, &orphan),
            Err(CoreError::AccountNotFound(_))
        ));
        let raised = CardUpdate {
            limit: Some(300.0),
            ..CardUpdate::default()
        };
        assert_eq!(service.update_card(&user, card.id, &raised).unwrap().limit, 300.0);
    }

    #[test]
    fn delete_refuses_cards_with_invoices() {
        let (store, service, user, account_id) = service_with_account();
        let used = service
            .create_card(
                &user,
                CreditCard::new("Gold", CardFlag::Visa, 5, 15, 500.0, account_id),
            )
            .unwrap();
        let spare = service
            .create_card(
                &user,
                CreditCard::new("Black", CardFlag::Elo, 5, 15, 500.0, account_id),
            )
            .unwrap();
        let invoice =
            CreditCardInvoice::new(used.id, InvoiceCycle::new(3, 2024), InvoiceStatus::Open);
        store.insert_invoice(&user, invoice).unwrap();

        assert_eq!(
            service.delete_card(&user, used.id).unwrap_err().invariant(),
            Some(&InvariantViolation::CardHasInvoices(used.id))
        );
        assert_eq!(service.delete_card(&user, spare.id).unwrap(), spare);
        assert_eq!(service.cards(&user).unwrap(), vec![used]);
    }
}
