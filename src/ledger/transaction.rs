use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::currency::Money;

/// Immutable snapshot of one balance-affecting operation on an account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub kind: EntryKind,
    pub category: TransactionCategory,
    /// Always positive; the direction lives in `kind`.
    pub amount: Money,
    pub resulting_balance: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Credit,
    Debit,
}

impl EntryKind {
    pub fn opposite(self) -> EntryKind {
        match self {
            EntryKind::Credit => EntryKind::Debit,
            EntryKind::Debit => EntryKind::Credit,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TransactionCategory {
    Opening,
    Deposit,
    CheckDeposit,
    Withdrawal,
    Transfer,
    Payment,
    Purchase,
    Fee,
    Interest,
    Refund,
    ProvisionalCredit,
    Reversal,
    Other,
}

/// Parameters for a single balance mutation, see [`super::Account::apply_transaction`].
#[derive(Debug, Clone)]
pub struct Posting {
    pub amount: Money,
    pub kind: EntryKind,
    pub description: String,
    pub category: TransactionCategory,
    pub reference: Option<String>,
}

impl Posting {
    pub fn credit(
        amount: Money,
        description: impl Into<String>,
        category: TransactionCategory,
    ) -> Self {
        Self {
            amount,
            kind: EntryKind::Credit,
            description: description.into(),
            category,
            reference: None,
        }
    }

    pub fn debit(
        amount: Money,
        description: impl Into<String>,
        category: TransactionCategory,
    ) -> Self {
        Self {
            amount,
            kind: EntryKind::Debit,
            description: description.into(),
            category,
            reference: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Builds the entry that undoes `original`.
    pub fn reversal_of(original: &Transaction) -> Self {
        Self {
            amount: original.amount,
            kind: original.kind.opposite(),
            description: format!("Reversal: {}", original.description),
            category: TransactionCategory::Reversal,
            reference: original.reference.clone(),
        }
    }
}
