//! Customer disputes of posted debits.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::currency::Money;
use crate::errors::{LedgerError, Result};
use crate::storage::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisputeStatus {
    Open,
    ResolvedForCustomer,
    ResolvedForMerchant,
    Cancelled,
}

impl DisputeStatus {
    pub fn is_closed(self) -> bool {
        self != DisputeStatus::Open
    }
}

impl fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DisputeStatus::Open => "open",
            DisputeStatus::ResolvedForCustomer => "resolved for customer",
            DisputeStatus::ResolvedForMerchant => "resolved for merchant",
            DisputeStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Who a dispute was decided for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisputeOutcome {
    Customer,
    Merchant,
}

/// A challenge to one debit on an account.
///
/// `credit_reference` is set while a credit for the disputed amount stands on
/// the account: either the provisional credit issued when the dispute opened,
/// or the final refund posted when it was decided for the customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub account_id: Uuid,
    pub transaction_id: Uuid,
    pub amount: Money,
    pub reason: String,
    pub status: DisputeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credit_reference: Option<String>,
    pub opened_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl Dispute {
    pub fn new(
        owner_id: Uuid,
        account_id: Uuid,
        transaction_id: Uuid,
        amount: Money,
        reason: impl Into<String>,
        opened_at: DateTime<Utc>,
    ) -> Result<Self> {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(LedgerError::InvalidDispute("a reason is required".into()));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            owner_id,
            account_id,
            transaction_id,
            amount,
            reason,
            status: DisputeStatus::Open,
            credit_reference: None,
            opened_at,
            closed_at: None,
        })
    }

    pub fn has_standing_credit(&self) -> bool {
        self.credit_reference.is_some()
    }

    /// Closes an open dispute with `status`.
    pub fn close(&mut self, status: DisputeStatus, at: DateTime<Utc>) -> Result<()> {
        if self.status.is_closed() {
            return Err(LedgerError::InvalidDispute(format!(
                "dispute {} is already {}",
                self.id, self.status
            )));
        }
        if status == DisputeStatus::Open {
            return Err(LedgerError::InvalidDispute(
                "a dispute can only be closed into a final status".into(),
            ));
        }
        self.status = status;
        self.closed_at = Some(at);
        Ok(())
    }

    /// Undoes [`Dispute::close`] after the money side of the decision failed.
    pub(crate) fn reopen(&mut self, credit_reference: Option<String>) {
        self.status = DisputeStatus::Open;
        self.closed_at = None;
        self.credit_reference = credit_reference;
    }
}

impl Record for Dispute {
    const COLLECTION: &'static str = "disputes";

    fn key(&self) -> String {
        self.id.to_string()
    }
}
