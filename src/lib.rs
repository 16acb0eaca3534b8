#![doc(test(attr(deny(warnings))))]

//! Bank Ledger keeps money-holding accounts with append-only transaction logs,
//! moves funds between them atomically, and executes recurring payment
//! schedules against them.

pub mod config;
pub mod core;
pub mod currency;
pub mod errors;
pub mod ledger;
pub mod storage;
pub mod utils;

pub use errors::{LedgerError, Result};

use std::sync::Once;

static INIT_TRACING: Once = Once::new();

/// Initializes global tracing and emits a startup info log.
pub fn init() {
    INIT_TRACING.call_once(|| {
        utils::init_tracing();
        tracing::info!("Bank ledger tracing initialized.");
    });
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_does_not_panic() {
        super::init();
        super::init();
    }
}
