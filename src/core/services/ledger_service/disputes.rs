use std::slice;

use uuid::Uuid;

use super::LedgerService;
use crate::errors::{LedgerError, Result};
use crate::ledger::{
    Dispute, DisputeOutcome, DisputeStatus, EntryKind, Posting, TransactionCategory,
};

impl LedgerService {
    pub fn dispute(&self, id: Uuid) -> Result<Dispute> {
        let key = id.to_string();
        self.disputes
            .get(&key)?
            .ok_or(LedgerError::RecordNotFound {
                collection: "disputes",
                key,
            })
    }

    pub fn disputes_for_owner(&self, owner_id: Uuid) -> Result<Vec<Dispute>> {
        let mut disputes: Vec<Dispute> = self
            .disputes
            .list()?
            .into_iter()
            .filter(|dispute| dispute.owner_id == owner_id)
            .collect();
        disputes.sort_by_key(|dispute| dispute.opened_at);
        Ok(disputes)
    }

    /// Opens a dispute against a debit on one of the caller's accounts. With
    /// `provisional_credit` the disputed amount is credited back right away
    /// and stands until the dispute is decided.
    pub fn open_dispute(
        &self,
        caller: Uuid,
        account_id: Uuid,
        transaction_id: Uuid,
        reason: &str,
        provisional_credit: bool,
    ) -> Result<Dispute> {
        self.ensure_owner(caller, account_id)?;
        self.exclusive(&[account_id], || {
            let account = self.store.load(account_id)?;
            let disputed = account
                .transactions()
                .iter()
                .find(|txn| txn.id == transaction_id)
                .ok_or(LedgerError::TransactionNotFound {
                    account: account_id,
                    transaction: transaction_id,
                })?;
            if disputed.kind != EntryKind::Debit
                || disputed.category == TransactionCategory::Reversal
            {
                return Err(LedgerError::InvalidDispute(format!(
                    "transaction {} is not a disputable debit",
                    transaction_id
                )));
            }
            let already_disputed = self.disputes.list()?.into_iter().any(|dispute| {
                dispute.transaction_id == transaction_id
                    && dispute.status != DisputeStatus::Cancelled
            });
            if already_disputed {
                return Err(LedgerError::InvalidDispute(format!(
                    "transaction {} is already disputed",
                    transaction_id
                )));
            }

            let now = self.clock.now();
            let mut dispute = Dispute::new(
                caller,
                account_id,
                transaction_id,
                disputed.amount,
                reason,
                now,
            )?;
            let mut credited = None;
            if provisional_credit {
                let reference = self.references.next(now);
                let posting = Posting::credit(
                    dispute.amount,
                    format!("Provisional credit: {}", disputed.description),
                    TransactionCategory::ProvisionalCredit,
                )
                .with_reference(&reference);
                let (account, txn) = self.commit(account_id, |account| {
                    account.apply_transaction_at(posting.clone(), now)
                })?;
                self.publish(&account, slice::from_ref(&txn));
                dispute.credit_reference = Some(reference);
                credited = Some(txn);
            }

            if let Err(err) = self.disputes.insert(&dispute) {
                tracing::error!(dispute = %dispute.id, error = %err, "dispute not stored");
                if let Some(txn) = &credited {
                    self.compensate(account_id, txn);
                }
                return Err(err);
            }
            tracing::info!(
                dispute = %dispute.id,
                account = %account_id,
                transaction = %transaction_id,
                provisional_credit,
                "dispute opened"
            );
            Ok(dispute)
        })
    }

    /// Decides an open dispute. For the customer, a provisional credit becomes
    /// final, otherwise a refund is posted. For the merchant, a provisional
    /// credit is withdrawn.
    pub fn resolve_dispute(&self, id: Uuid, outcome: DisputeOutcome) -> Result<Dispute> {
        let status = match outcome {
            DisputeOutcome::Customer => DisputeStatus::ResolvedForCustomer,
            DisputeOutcome::Merchant => DisputeStatus::ResolvedForMerchant,
        };
        self.close_dispute(id, status)
    }

    /// Withdraws an open dispute on the owner's request, taking back any
    /// provisional credit.
    pub fn cancel_dispute(&self, caller: Uuid, id: Uuid) -> Result<Dispute> {
        let dispute = self.dispute(id)?;
        if dispute.owner_id != caller {
            return Err(LedgerError::Unauthorized {
                caller,
                account: dispute.account_id,
            });
        }
        self.close_dispute(id, DisputeStatus::Cancelled)
    }

    /// Claims the final status in the dispute store, then moves the money. A
    /// rejected posting puts the dispute back to `Open`.
    fn close_dispute(&self, id: Uuid, status: DisputeStatus) -> Result<Dispute> {
        let account_id = self.dispute(id)?.account_id;
        let key = id.to_string();
        self.exclusive(&[account_id], || {
            let now = self.clock.now();
            let mut previous = None;
            let mut posting = None;
            let closed = self.disputes.update(&key, &mut |dispute| {
                dispute.close(status, now)?;
                previous = dispute.credit_reference.clone();
                posting = match (status, &previous) {
                    (DisputeStatus::ResolvedForCustomer, None) => {
                        let reference = self.references.next(now);
                        dispute.credit_reference = Some(reference.clone());
                        Some(
                            Posting::credit(
                                dispute.amount,
                                format!("Dispute refund: {}", dispute.reason),
                                TransactionCategory::Refund,
                            )
                            .with_reference(reference),
                        )
                    }
                    (DisputeStatus::ResolvedForCustomer, Some(_)) | (_, None) => None,
                    (_, Some(reference)) => {
                        dispute.credit_reference = None;
                        Some(
                            Posting::debit(
                                dispute.amount,
                                "Provisional credit withdrawn",
                                TransactionCategory::Reversal,
                            )
                            .with_reference(reference),
                        )
                    }
                };
                Ok(())
            })?;

            if let Some(posting) = posting.take() {
                let committed = self.commit(account_id, |account| {
                    account.apply_transaction_at(posting.clone(), now)
                });
                match committed {
                    Ok((account, txn)) => self.publish(&account, slice::from_ref(&txn)),
                    Err(err) => {
                        tracing::warn!(
                            dispute = %id,
                            %status,
                            error = %err,
                            "dispute posting rejected"
                        );
                        self.disputes.update(&key, &mut |dispute| {
                            dispute.reopen(previous.clone());
                            Ok(())
                        })?;
                        return Err(err);
                    }
                }
            }
            tracing::info!(dispute = %id, %status, "dispute closed");
            Ok(closed)
        })
    }
}
