//! Services that orchestrate the ledger domain: balance mutations, scheduled
//! payments, alerts, and the clock they share.

pub mod services;
pub mod time;

pub use time::{Clock, FixedClock, SystemClock};
