//! Wiring of stores and services into a single engine handle.

use std::{path::Path, sync::Arc};

use finledger_config::Config;
use finledger_core::{
    AccountService, Clock, CreditCardService, InvoiceService, InvoiceStatusScheduler,
    LedgerSettings, MemoryLedgerStore, PartitionBackend, StoreHandles, SweepReport,
    TransactionService,
};
use finledger_storage_json::JsonLedgerStorage;
use tracing::info;

use crate::{errors::AppResult, system_clock::SystemClock};

/// Services sharing one set of stores, one clock and one set of settings.
#[derive(Clone)]
pub struct LedgerEngine {
    settings: LedgerSettings,
    stores: StoreHandles,
    accounts: AccountService,
    cards: CreditCardService,
    transactions: TransactionService,
    scheduler: InvoiceStatusScheduler,
}

impl LedgerEngine {
    pub fn with_backend<S>(backend: Arc<S>, clock: Arc<dyn Clock>, settings: LedgerSettings) -> Self
    where
        S: PartitionBackend + 'static,
    {
        let stores = StoreHandles::from_backend(backend);
        let accounts = AccountService::new(stores.accounts.clone());
        let cards = CreditCardService::new(stores.accounts.clone(), stores.cards.clone());
        let transactions = TransactionService::new(&stores, clock.clone(), settings.clone());
        let scheduler = InvoiceStatusScheduler::new(
            stores.users.clone(),
            stores.cards.clone(),
            stores.invoices.clone(),
            clock,
            settings.clone(),
        );
        Self {
            settings,
            stores,
            accounts,
            cards,
            transactions,
            scheduler,
        }
    }

    /// Opens the JSON document store described by `config`, rooted at `home` unless overridden.
    pub fn open(config: &Config, home: &Path, clock: Arc<dyn Clock>) -> AppResult<Self> {
        let settings = settings_from_config(config)?;
        let data_dir = config.resolve_data_dir(home);
        let storage = JsonLedgerStorage::new(data_dir)?;
        info!(
            data_dir = %storage.root().display(),
            utc_offset_minutes = config.utc_offset_minutes,
            "ledger engine opened"
        );
        Ok(Self::with_backend(Arc::new(storage), clock, settings))
    }

    /// Opens the store described by `config` against the wall clock.
    pub fn open_system(config: &Config, home: &Path) -> AppResult<Self> {
        Self::open(config, home, Arc::new(SystemClock))
    }

    pub fn in_memory(clock: Arc<dyn Clock>, settings: LedgerSettings) -> Self {
        Self::with_backend(Arc::new(MemoryLedgerStore::new()), clock, settings)
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    pub fn stores(&self) -> &StoreHandles {
        &self.stores
    }

    pub fn accounts(&self) -> &AccountService {
        &self.accounts
    }

    pub fn cards(&self) -> &CreditCardService {
        &self.cards
    }

    pub fn transactions(&self) -> &TransactionService {
        &self.transactions
    }

    pub fn invoices(&self) -> &InvoiceService {
        self.transactions.invoice_service()
    }

    pub fn scheduler(&self) -> &InvoiceStatusScheduler {
        &self.scheduler
    }

    /// Runs one invoice status sweep across every stored user.
    pub fn sweep(&self) -> SweepReport {
        self.scheduler.run()
    }
}

pub fn settings_from_config(config: &Config) -> AppResult<LedgerSettings> {
    config.validate()?;
    Ok(LedgerSettings::new(
        config.utc_offset_minutes,
        config.invoice_payment_category.clone(),
    )?)
}
