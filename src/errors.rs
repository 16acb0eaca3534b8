use thiserror::Error;
use uuid::Uuid;

use crate::currency::Money;

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Error type that captures every ledger, schedule, and persistence failure.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Insufficient funds in account {account}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        account: Uuid,
        balance: Money,
        requested: Money,
    },
    #[error("Credit limit exceeded on account {account}: limit {limit}, attempted {attempted}")]
    CreditLimitExceeded {
        account: Uuid,
        limit: Money,
        attempted: Money,
    },
    #[error("Currency mismatch: expected {expected}, found {found}")]
    CurrencyMismatch { expected: String, found: String },
    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),
    #[error("Account is closed: {0}")]
    AccountClosed(Uuid),
    #[error("Account is suspended: {0}")]
    AccountSuspended(Uuid),
    #[error("Concurrent modification of {account}: expected version {expected}, found {found}")]
    ConcurrentModification {
        account: Uuid,
        expected: u64,
        found: u64,
    },
    #[error("Schedule {schedule} is {status} and can no longer change")]
    ScheduleTerminalState { schedule: Uuid, status: String },
    #[error("Invalid status transition for schedule {schedule}: {from} -> {to}")]
    InvalidTransition {
        schedule: Uuid,
        from: String,
        to: String,
    },
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid transfer: {0}")]
    InvalidTransfer(String),
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),
    #[error("Account {account} cannot close with non-zero balance {balance}")]
    NonZeroBalance { account: Uuid, balance: Money },
    #[error("Caller {caller} does not own account {account}")]
    Unauthorized { caller: Uuid, account: Uuid },
    #[error("{channel} withdrawals are limited to {limit}")]
    WithdrawalLimitExceeded { channel: String, limit: Money },
    #[error("Check deposit exceeds the {rule} limit of {limit}")]
    DepositLimitExceeded { rule: String, limit: Money },
    #[error("No {collection} record with key {key}")]
    RecordNotFound { collection: &'static str, key: String },
    #[error("Transaction {transaction} not found on account {account}")]
    TransactionNotFound { account: Uuid, transaction: Uuid },
    #[error("Invalid dispute: {0}")]
    InvalidDispute(String),
    #[error("Amount overflow")]
    AmountOverflow,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl LedgerError {
    /// Returns true for lock/version conflicts that are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::ConcurrentModification { .. })
    }
}
