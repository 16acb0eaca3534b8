use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::currency::Money;
use crate::errors::{LedgerError, Result};
use crate::storage::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExternalRail {
    Ach,
    Wire,
    BillPay,
}

impl fmt::Display for ExternalRail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExternalRail::Ach => "ACH",
            ExternalRail::Wire => "Wire",
            ExternalRail::BillPay => "Bill pay",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExternalTransferStatus {
    Pending,
    Settled,
    Returned,
}

/// Money that left the ledger for an outside institution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalTransfer {
    pub reference: String,
    pub source_account_id: Uuid,
    pub amount: Money,
    pub fee: Money,
    pub rail: ExternalRail,
    pub memo: String,
    pub status: ExternalTransferStatus,
    pub created_at: DateTime<Utc>,
}

impl ExternalTransfer {
    pub fn ensure_pending(&self) -> Result<()> {
        if self.status != ExternalTransferStatus::Pending {
            return Err(LedgerError::InvalidTransfer(format!(
                "transfer {} is {:?}, expected Pending",
                self.reference, self.status
            )));
        }
        Ok(())
    }
}

impl Record for ExternalTransfer {
    const COLLECTION: &'static str = "transfers";

    fn key(&self) -> String {
        self.reference.clone()
    }
}
