pub mod alert_service;
pub mod ledger_service;
pub mod notifier;
pub mod payment_processor;

pub use alert_service::{AlertKind, AlertService, AlertSettings, BalanceAlert};
pub use ledger_service::{
    CheckDeposit, CheckDepositUsage, LedgerService, TransferReceipt, WithdrawalChannel,
};
pub use notifier::{InMemoryNotifier, LedgerEvent, Notifier, TracingNotifier};
pub use payment_processor::{BalanceLookup, LedgerBalanceLookup, PaymentProcessor, RunSummary};
