mod common;

use std::sync::Arc;

use common::{date, setup_engine};
use finledger::LedgerEngine;
use finledger_config::Config;
use finledger_core::{
    FixedClock, InvoicePurchase, InvariantViolation, TransactionDraft, TransactionPatch,
};
use finledger_domain::{
    AccountType, BankAccount, CardFlag, CreditCard, Frequency, InvoiceStatus, TransactionType,
    UserId,
};

fn checking(engine: &LedgerEngine, user: &UserId, balance: f64) -> uuid::Uuid {
    engine
        .accounts()
        .create_account(user, BankAccount::new("Checking", AccountType::Checking, "BRL", balance))
        .expect("create account")
        .id
}

fn balance(engine: &LedgerEngine, user: &UserId, account: uuid::Uuid) -> f64 {
    engine
        .accounts()
        .account(user, account)
        .expect("load account")
        .balance
}

#[test]
fn paid_expense_round_trip_restores_balance() {
    finledger::init();
    let (engine, _clock, _home) = setup_engine(date(2024, 3, 5));
    let user = UserId::new("ana");
    let account = checking(&engine, &user, 250.0);

    let draft = TransactionDraft::new(
        "Groceries",
        "Food",
        50.0,
        date(2024, 3, 5),
        TransactionType::Expense,
        "BRL",
        account,
    )
    .paid(true);
    let created = engine
        .transactions()
        .create_income_or_expense(&user, &draft)
        .expect("create expense");
    assert_eq!(balance(&engine, &user, account), 200.0);

    let patch = TransactionPatch {
        is_paid: Some(false),
        ..TransactionPatch::default()
    };
    engine
        .transactions()
        .update_transaction(&user, created[0].id, &patch)
        .expect("mark unpaid");
    assert_eq!(balance(&engine, &user, account), 250.0);

    engine
        .transactions()
        .delete_income_or_expense(&user, created[0].id)
        .expect("delete expense");
    assert_eq!(balance(&engine, &user, account), 250.0);
    assert!(engine
        .transactions()
        .list_income_or_expense(&user)
        .expect("list")
        .is_empty());
}

#[test]
fn invoice_lifecycle_survives_reopening_the_store() {
    let (engine, clock, home) = setup_engine(date(2024, 3, 5));
    let user = UserId::new("bruno");
    let account = checking(&engine, &user, 1000.0);
    let card = engine
        .cards()
        .create_card(
            &user,
            CreditCard::new("Gold", CardFlag::Mastercard, 10, 20, 1500.0, account),
        )
        .expect("create card");

    let purchase = InvoicePurchase::new("Laptop", "Work", 300.0, date(2024, 3, 5), "BRL", card.id)
        .until(date(2024, 5, 5));
    let rows = engine
        .transactions()
        .create_invoice_transaction(&user, &purchase)
        .expect("create installments");
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|row| row.value == 100.0 && !row.is_paid));

    let invoices = engine.invoices().invoices(&user, card.id).expect("invoices");
    assert_eq!(invoices.len(), 3);
    assert!(invoices.iter().all(|invoice| invoice.status == InvoiceStatus::Open));

    clock.set_date(date(2024, 3, 11));
    let report = engine.sweep();
    assert_eq!(report.transitions(), 1);
    assert_eq!(report.failures, 0);
    assert_eq!(engine.sweep().transitions(), 0);

    let march = rows[0].invoice_id.expect("installment bound to invoice");
    let payment = engine
        .transactions()
        .pay_invoice(&user, card.id, march, account)
        .expect("pay invoice");
    assert_eq!(payment.invoice.status, InvoiceStatus::Paid);
    assert_eq!(payment.payment.value, 100.0);
    assert_eq!(balance(&engine, &user, account), 900.0);

    let reopened = LedgerEngine::open(
        &Config::default(),
        &home,
        Arc::new(FixedClock::on(date(2024, 4, 21))),
    )
    .expect("reopen engine");
    assert_eq!(balance(&reopened, &user, account), 900.0);
    let listed = reopened
        .transactions()
        .list_invoice_transactions(&user)
        .expect("list installments");
    assert_eq!(listed.len(), 3);

    let statuses: Vec<InvoiceStatus> = reopened
        .invoices()
        .invoices(&user, card.id)
        .expect("invoices")
        .into_iter()
        .map(|invoice| invoice.status)
        .collect();
    assert_eq!(
        statuses,
        vec![InvoiceStatus::Paid, InvoiceStatus::Overdue, InvoiceStatus::Open]
    );
}

#[test]
fn recurring_series_delete_forward_reverses_paid_occurrences() {
    let (engine, _clock, _home) = setup_engine(date(2024, 1, 10));
    let user = UserId::new("carla");
    let account = checking(&engine, &user, 1000.0);

    let draft = TransactionDraft::new(
        "Gym",
        "Health",
        100.0,
        date(2024, 1, 15),
        TransactionType::Expense,
        "BRL",
        account,
    )
    .recurring(Frequency::Monthly, date(2024, 1, 15), date(2024, 6, 15));
    let series = engine
        .transactions()
        .create_income_or_expense(&user, &draft)
        .expect("create series");
    assert_eq!(series.len(), 6);

    engine
        .transactions()
        .mark_recurring_paid(&user, series[2].id)
        .expect("mark paid");
    assert_eq!(balance(&engine, &user, account), 900.0);
    let err = engine
        .transactions()
        .mark_recurring_paid(&user, series[2].id)
        .expect_err("second mark must fail");
    assert_eq!(err.invariant(), Some(&InvariantViolation::AlreadyPaid));

    let removed = engine
        .transactions()
        .delete_recurring_transactions(&user, series[1].id)
        .expect("delete forward");
    assert_eq!(removed.len(), 5);
    assert_eq!(balance(&engine, &user, account), 1000.0);
    assert_eq!(
        engine
            .transactions()
            .series(&user, series[0].id)
            .expect("remaining series")
            .len(),
        1
    );
}

#[test]
fn users_are_isolated_partitions() {
    let (engine, _clock, home) = setup_engine(date(2024, 3, 5));
    let first = UserId::new("dora");
    let second = UserId::new("Dora");
    checking(&engine, &first, 10.0);
    checking(&engine, &second, 20.0);

    assert_eq!(engine.accounts().accounts(&first).unwrap().len(), 1);
    assert_eq!(engine.accounts().accounts(&second).unwrap()[0].balance, 20.0);
    assert_eq!(engine.stores().users.user_ids().unwrap().len(), 2);
    assert_eq!(
        std::fs::read_dir(home.join("users")).unwrap().count(),
        2
    );
}
