#![allow(dead_code)]

use std::sync::Arc;

use bank_ledger::{
    config::Config,
    core::{
        services::{InMemoryNotifier, LedgerBalanceLookup, LedgerService, PaymentProcessor},
        FixedClock,
    },
    currency::{CurrencyCode, Money},
    storage::{AccountStore, InMemoryAccountStore},
};
use chrono::NaiveDate;

pub fn usd(text: &str) -> Money {
    Money::parse(text, CurrencyCode::USD).expect("valid USD amount")
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

/// Ledger, processor, and observers wired over an in-memory store.
pub struct TestBank {
    pub store: Arc<dyn AccountStore>,
    pub ledger: Arc<LedgerService>,
    pub processor: PaymentProcessor,
    pub notifier: Arc<InMemoryNotifier>,
    pub clock: Arc<FixedClock>,
}

pub fn test_bank() -> TestBank {
    test_bank_with(Config::default())
}

pub fn test_bank_with(config: Config) -> TestBank {
    let store: Arc<dyn AccountStore> = Arc::new(InMemoryAccountStore::new());
    let notifier = Arc::new(InMemoryNotifier::new());
    let clock = Arc::new(FixedClock::at_date(date(2024, 1, 1)));
    let lookup = Arc::new(LedgerBalanceLookup::new(store.clone(), &config));
    let ledger = Arc::new(
        LedgerService::new(store.clone(), config)
            .with_notifier(notifier.clone())
            .with_clock(clock.clone()),
    );
    let processor = PaymentProcessor::new(ledger.clone(), lookup);
    TestBank {
        store,
        ledger,
        processor,
        notifier,
        clock,
    }
}
