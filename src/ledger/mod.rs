//! Ledger domain models: money-holding accounts, immutable transactions, and
//! recurring payment schedules.

pub mod account;
pub mod dispute;
pub mod external;
pub mod recurring;
pub mod reference;
pub mod time_interval;
pub mod transaction;

pub use account::{Account, AccountKind, AccountStatus, CreditTerms, SavingsTerms};
pub use dispute::{Dispute, DisputeOutcome, DisputeStatus};
pub use external::{ExternalRail, ExternalTransfer, ExternalTransferStatus};
pub use recurring::{
    next_occurrence, EndCondition, Frequency, Payee, PaymentRecord, PaymentStatus, PaymentType,
    RecurringSchedule, ScheduleStatus,
};
pub use reference::ReferenceGenerator;
pub use time_interval::{TimeInterval, TimeUnit};
pub use transaction::{EntryKind, Posting, Transaction, TransactionCategory};
