use uuid::Uuid;

use super::LedgerService;
use crate::currency::Money;
use crate::errors::{LedgerError, Result};
use crate::ledger::{
    ExternalRail, ExternalTransfer, ExternalTransferStatus, Posting, TransactionCategory,
};

impl LedgerService {
    pub fn external_transfer(&self, reference: &str) -> Result<ExternalTransfer> {
        self.transfers
            .get(reference)?
            .ok_or_else(|| LedgerError::RecordNotFound {
                collection: "transfers",
                key: reference.to_string(),
            })
    }

    /// Debits `amount` (plus the wire fee on the wire rail) and records a
    /// `Pending` transfer to an outside institution.
    pub fn send_external(
        &self,
        from: Uuid,
        amount: Money,
        rail: ExternalRail,
        memo: impl Into<String>,
    ) -> Result<ExternalTransfer> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidAmount(format!(
                "transfer amount must be positive, got {}",
                amount
            )));
        }
        let fee = match rail {
            ExternalRail::Wire => self.config.wire_fee(amount.currency()),
            ExternalRail::Ach | ExternalRail::BillPay => Money::zero(amount.currency()),
        };
        let memo = memo.into();
        self.exclusive(&[from], || {
            let now = self.clock.now();
            let reference = self.references.next(now);
            let category = match rail {
                ExternalRail::BillPay => TransactionCategory::Payment,
                ExternalRail::Ach | ExternalRail::Wire => TransactionCategory::Transfer,
            };
            let principal = Posting::debit(amount, format!("{} transfer: {}", rail, memo), category)
                .with_reference(&reference);
            let fee_posting = fee.is_positive().then(|| {
                Posting::debit(fee, format!("{} fee", rail), TransactionCategory::Fee)
                    .with_reference(&reference)
            });
            let (account, posted) = self.commit(from, |account| {
                let mut posted = vec![account.apply_transaction_at(principal.clone(), now)?];
                if let Some(fee_posting) = &fee_posting {
                    posted.push(account.apply_transaction_at(fee_posting.clone(), now)?);
                }
                Ok(posted)
            })?;
            self.publish(&account, &posted);

            let transfer = ExternalTransfer {
                reference: reference.clone(),
                source_account_id: from,
                amount,
                fee,
                rail,
                memo: memo.clone(),
                status: ExternalTransferStatus::Pending,
                created_at: now,
            };
            if let Err(err) = self.transfers.insert(&transfer) {
                tracing::error!(%reference, error = %err, "transfer record not stored, reversing");
                for txn in posted.iter().rev() {
                    self.compensate(from, txn);
                }
                return Err(err);
            }
            tracing::info!(%from, %amount, %fee, %rail, %reference, "external transfer sent");
            Ok(transfer)
        })
    }

    pub fn settle_external(&self, reference: &str) -> Result<ExternalTransfer> {
        let settled = self.transfers.update(reference, &mut |transfer| {
            transfer.ensure_pending()?;
            transfer.status = ExternalTransferStatus::Settled;
            Ok(())
        })?;
        tracing::info!(%reference, "external transfer settled");
        Ok(settled)
    }

    /// Marks a pending transfer `Returned` and credits the amount and any fee
    /// back to the source account under the transfer's reference.
    pub fn return_external(&self, reference: &str, reason: &str) -> Result<ExternalTransfer> {
        let source = self.external_transfer(reference)?.source_account_id;
        self.exclusive(&[source], || {
            let returned = self.transfers.update(reference, &mut |transfer| {
                transfer.ensure_pending()?;
                transfer.status = ExternalTransferStatus::Returned;
                Ok(())
            })?;

            let now = self.clock.now();
            let mut refunds = vec![Posting::credit(
                returned.amount,
                format!("{} returned: {}", returned.rail, reason),
                TransactionCategory::Reversal,
            )
            .with_reference(reference)];
            if returned.fee.is_positive() {
                refunds.push(
                    Posting::credit(
                        returned.fee,
                        format!("{} fee refund", returned.rail),
                        TransactionCategory::Reversal,
                    )
                    .with_reference(reference),
                );
            }
            let committed = self.commit(source, |account| {
                refunds
                    .iter()
                    .map(|posting| account.apply_transaction_at(posting.clone(), now))
                    .collect::<Result<Vec<_>>>()
            });
            match committed {
                Ok((account, posted)) => {
                    self.publish(&account, &posted);
                    tracing::info!(%reference, %reason, "external transfer returned");
                    Ok(returned)
                }
                Err(err) => {
                    tracing::warn!(%reference, error = %err, "return refund rejected");
                    self.transfers.update(reference, &mut |transfer| {
                        transfer.status = ExternalTransferStatus::Pending;
                        Ok(())
                    })?;
                    Err(err)
                }
            }
        })
    }
}
