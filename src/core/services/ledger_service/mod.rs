//! Atomic balance mutations over an [`AccountStore`].
//!
//! Every read-modify-write runs under the account's entry in the lock table and
//! is persisted through the store's version compare-and-swap. Operations that
//! touch several accounts take their locks in ascending id order. A lock table
//! entry lives only while some operation holds or waits on it.

mod check_deposit;
mod disputes;
mod external;

use std::{collections::HashMap, fmt, slice, sync::Arc, thread};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::core::services::alert_service::AlertService;
use crate::core::services::notifier::{LedgerEvent, Notifier, TracingNotifier};
use crate::core::time::{Clock, SystemClock};
use crate::currency::{CurrencyCode, Money};
use crate::errors::{LedgerError, Result};
use crate::ledger::{
    Account, AccountKind, Dispute, ExternalTransfer, Posting, ReferenceGenerator, Transaction,
    TransactionCategory,
};
use crate::storage::{AccountStore, InMemoryRecordStore, RecordStore};

pub use check_deposit::{CheckDeposit, CheckDepositUsage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawalChannel {
    Atm,
    Branch,
    CashAdvance,
}

impl fmt::Display for WithdrawalChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WithdrawalChannel::Atm => "ATM",
            WithdrawalChannel::Branch => "Branch",
            WithdrawalChannel::CashAdvance => "Cash advance",
        };
        f.write_str(label)
    }
}

/// Result of a completed transfer. Both legs carry `reference`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub reference: String,
    pub amount: Money,
    pub debit: Transaction,
    pub credit: Transaction,
}

pub struct LedgerService {
    store: Arc<dyn AccountStore>,
    transfers: Arc<dyn RecordStore<ExternalTransfer>>,
    disputes: Arc<dyn RecordStore<Dispute>>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    alerts: AlertService,
    references: ReferenceGenerator,
    config: Config,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl LedgerService {
    pub fn new(store: Arc<dyn AccountStore>, config: Config) -> Self {
        Self {
            store,
            transfers: Arc::new(InMemoryRecordStore::new()),
            disputes: Arc::new(InMemoryRecordStore::new()),
            notifier: Arc::new(TracingNotifier),
            clock: Arc::new(SystemClock),
            alerts: AlertService::new(&config),
            references: ReferenceGenerator::new(),
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_transfer_store(
        mut self,
        transfers: Arc<dyn RecordStore<ExternalTransfer>>,
    ) -> Self {
        self.transfers = transfers;
        self
    }

    pub fn with_dispute_store(mut self, disputes: Arc<dyn RecordStore<Dispute>>) -> Self {
        self.disputes = disputes;
        self
    }

    /// Seeds reference generation with every reference already persisted, so
    /// a restarted ledger never reissues one. Call after the stores are set.
    pub fn with_reference_history(mut self) -> Result<Self> {
        let mut known = Vec::new();
        for account in self.store.list_all()? {
            known.extend(
                account
                    .transactions()
                    .iter()
                    .filter_map(|txn| txn.reference.clone()),
            );
        }
        known.extend(
            self.transfers
                .list()?
                .into_iter()
                .map(|transfer| transfer.reference),
        );
        known.extend(
            self.disputes
                .list()?
                .into_iter()
                .filter_map(|dispute| dispute.credit_reference),
        );
        tracing::debug!(count = known.len(), "reference history loaded");
        self.references = ReferenceGenerator::with_existing(known);
        Ok(self)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn alerts(&self) -> &AlertService {
        &self.alerts
    }

    pub fn references(&self) -> &ReferenceGenerator {
        &self.references
    }

    pub fn notifier(&self) -> Arc<dyn Notifier> {
        Arc::clone(&self.notifier)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn account(&self, id: Uuid) -> Result<Account> {
        self.store.load(id)
    }

    pub fn accounts_for_owner(&self, owner_id: Uuid) -> Result<Vec<Account>> {
        self.store.list_for_owner(owner_id)
    }

    /// Fails with `Unauthorized` unless `caller` owns `account_id`.
    pub fn ensure_owner(&self, caller: Uuid, account_id: Uuid) -> Result<()> {
        let account = self.store.load(account_id)?;
        if account.owner_id != caller {
            tracing::warn!(%caller, account = %account_id, "ownership check failed");
            return Err(LedgerError::Unauthorized {
                caller,
                account: account_id,
            });
        }
        Ok(())
    }

    /// Opens an account in the currency of `initial_deposit`, posting the
    /// deposit as an `Opening` entry unless it is zero.
    pub fn open_account(
        &self,
        owner_id: Uuid,
        kind: AccountKind,
        initial_deposit: Money,
    ) -> Result<Account> {
        if initial_deposit.is_negative() {
            return Err(LedgerError::InvalidAmount(format!(
                "initial deposit must not be negative, got {}",
                initial_deposit
            )));
        }
        let mut account = Account::new(owner_id, kind, initial_deposit.currency())?
            .with_overdraft(self.config.allow_overdraft);
        let mut posted = Vec::new();
        if initial_deposit.is_positive() {
            posted.push(account.apply_transaction_at(
                Posting::credit(
                    initial_deposit,
                    "Opening deposit",
                    TransactionCategory::Opening,
                ),
                self.clock.now(),
            )?);
        }
        self.store.insert(&account)?;
        tracing::info!(
            account = %account.id,
            owner = %owner_id,
            kind = account.kind.label(),
            balance = %account.balance(),
            "account opened"
        );
        self.publish(&account, &posted);
        Ok(account)
    }

    pub fn close_account(&self, id: Uuid) -> Result<Account> {
        let (account, ()) = self.locked_commit(id, |account| account.close())?;
        tracing::info!(account = %id, "account closed");
        Ok(account)
    }

    pub fn suspend_account(&self, id: Uuid) -> Result<Account> {
        let (account, ()) = self.locked_commit(id, |account| account.suspend())?;
        tracing::info!(account = %id, "account suspended");
        Ok(account)
    }

    pub fn reactivate_account(&self, id: Uuid) -> Result<Account> {
        let (account, ()) = self.locked_commit(id, |account| account.reactivate())?;
        tracing::info!(account = %id, "account reactivated");
        Ok(account)
    }

    pub fn deposit(&self, id: Uuid, amount: Money, description: &str) -> Result<Transaction> {
        let posting = Posting::credit(amount, description, TransactionCategory::Deposit);
        self.post(id, posting)
    }

    /// Cash withdrawal subject to the channel's per-transaction limit. Cash
    /// advances draw on credit accounts; ATM and branch withdrawals on deposit accounts.
    pub fn withdraw(
        &self,
        id: Uuid,
        amount: Money,
        channel: WithdrawalChannel,
    ) -> Result<Transaction> {
        let limit = self.channel_limit(channel, amount.currency());
        if amount.try_cmp(&limit)?.is_gt() {
            tracing::warn!(account = %id, %amount, %channel, "withdrawal over channel limit");
            return Err(LedgerError::WithdrawalLimitExceeded {
                channel: channel.to_string(),
                limit,
            });
        }
        let now = self.clock.now();
        let posting = Posting::debit(
            amount,
            format!("{} withdrawal", channel),
            TransactionCategory::Withdrawal,
        );
        let (account, txn) = self.locked_commit(id, |account| {
            let is_advance = channel == WithdrawalChannel::CashAdvance;
            if account.is_credit() != is_advance {
                return Err(LedgerError::InvalidTransfer(format!(
                    "{} withdrawals are not available on {} accounts",
                    channel,
                    account.kind.label()
                )));
            }
            account.apply_transaction_at(posting.clone(), now)
        })?;
        self.publish(&account, slice::from_ref(&txn));
        Ok(txn)
    }

    /// Card purchase charged to a credit account.
    pub fn purchase(&self, id: Uuid, amount: Money, merchant: &str) -> Result<Transaction> {
        let posting = Posting::debit(amount, merchant, TransactionCategory::Purchase);
        self.post_to_credit(id, posting)
    }

    /// Payment received on a credit account from outside the ledger.
    pub fn pay_credit(&self, id: Uuid, amount: Money) -> Result<Transaction> {
        let posting = Posting::credit(amount, "Payment received", TransactionCategory::Payment);
        self.post_to_credit(id, posting)
    }

    /// Moves `amount` between two accounts of this ledger.
    ///
    /// If the credit leg fails after the debit committed, a `Reversal` credit is
    /// committed on the source before the error is returned. Both locks are held
    /// throughout, so no caller observes the intermediate state.
    pub fn transfer(
        &self,
        from: Uuid,
        to: Uuid,
        amount: Money,
        memo: Option<&str>,
    ) -> Result<TransferReceipt> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidAmount(format!(
                "transfer amount must be positive, got {}",
                amount
            )));
        }
        if from == to {
            return Err(LedgerError::InvalidTransfer(
                "source and destination accounts must differ".into(),
            ));
        }
        self.exclusive(&[from, to], || self.transfer_locked(from, to, amount, memo))
    }

    fn transfer_locked(
        &self,
        from: Uuid,
        to: Uuid,
        amount: Money,
        memo: Option<&str>,
    ) -> Result<TransferReceipt> {
        let destination = self.store.load(to)?;
        destination.ensure_open()?;
        amount.ensure_same_currency(&destination.balance())?;
        let category = if destination.is_credit() {
            TransactionCategory::Payment
        } else {
            TransactionCategory::Transfer
        };

        let now = self.clock.now();
        let reference = self.references.next(now);
        let debit = Posting::debit(
            amount,
            memo.map_or_else(|| format!("Transfer to {}", to), str::to_string),
            category,
        )
        .with_reference(&reference);
        let (source, debit_txn) = self
            .commit(from, |account| account.apply_transaction_at(debit.clone(), now))
            .map_err(|err| {
                tracing::warn!(%from, %to, %amount, error = %err, "transfer debit rejected");
                err
            })?;
        self.publish(&source, slice::from_ref(&debit_txn));

        let credit = Posting::credit(
            amount,
            memo.map_or_else(|| format!("Transfer from {}", from), str::to_string),
            category,
        )
        .with_reference(&reference);
        match self.commit(to, |account| account.apply_transaction_at(credit.clone(), now)) {
            Ok((destination, credit_txn)) => {
                self.publish(&destination, slice::from_ref(&credit_txn));
                tracing::info!(%from, %to, %amount, %reference, "transfer committed");
                Ok(TransferReceipt {
                    reference,
                    amount,
                    debit: debit_txn,
                    credit: credit_txn,
                })
            }
            Err(err) => {
                tracing::warn!(
                    %from,
                    %to,
                    %reference,
                    error = %err,
                    "transfer credit rejected, reversing debit"
                );
                self.compensate(from, &debit_txn);
                Err(err)
            }
        }
    }

    /// Posts one month of interest; `None` when nothing accrues.
    pub fn accrue_interest(&self, id: Uuid) -> Result<Option<Transaction>> {
        let now = self.clock.now();
        let (account, txn) = self.locked_commit(id, |account| match account.monthly_interest()? {
            Some(posting) => account.apply_transaction_at(posting, now).map(Some),
            None => Ok(None),
        })?;
        if let Some(txn) = &txn {
            self.publish(&account, slice::from_ref(txn));
        }
        Ok(txn)
    }

    /// Snapshots the current debt of a credit account as its statement balance.
    pub fn close_statement(&self, id: Uuid) -> Result<Money> {
        let (_, statement) = self.locked_commit(id, |account| account.close_statement())?;
        tracing::info!(account = %id, %statement, "statement closed");
        Ok(statement)
    }

    pub fn minimum_payment_due(&self, id: Uuid) -> Result<Money> {
        let account = self.store.load(id)?;
        let floor = self.config.minimum_payment_floor(account.currency());
        account.minimum_payment_due(floor, i64::from(self.config.minimum_payment_rate_bp))
    }

    fn post(&self, id: Uuid, posting: Posting) -> Result<Transaction> {
        let now = self.clock.now();
        let (account, txn) =
            self.locked_commit(id, |account| account.apply_transaction_at(posting.clone(), now))?;
        self.publish(&account, slice::from_ref(&txn));
        Ok(txn)
    }

    fn post_to_credit(&self, id: Uuid, posting: Posting) -> Result<Transaction> {
        let now = self.clock.now();
        let (account, txn) = self.locked_commit(id, |account| {
            if !account.is_credit() {
                return Err(LedgerError::InvalidTransfer(format!(
                    "account {} is not a credit account",
                    account.id
                )));
            }
            account.apply_transaction_at(posting.clone(), now)
        })?;
        self.publish(&account, slice::from_ref(&txn));
        Ok(txn)
    }

    fn channel_limit(&self, channel: WithdrawalChannel, currency: CurrencyCode) -> Money {
        match channel {
            WithdrawalChannel::Atm => self.config.atm_withdrawal_limit(currency),
            WithdrawalChannel::Branch => self.config.branch_withdrawal_limit(currency),
            WithdrawalChannel::CashAdvance => self.config.cash_advance_limit(currency),
        }
    }

    fn compensate(&self, account_id: Uuid, original: &Transaction) {
        let reversal = Posting::reversal_of(original);
        let now = self.clock.now();
        match self.commit(account_id, |account| {
            account.apply_transaction_at(reversal.clone(), now)
        }) {
            Ok((account, txn)) => self.publish(&account, slice::from_ref(&txn)),
            Err(err) => tracing::error!(
                account = %account_id,
                transaction = %original.id,
                error = %err,
                "compensating reversal failed"
            ),
        }
    }

    /// Runs `body` holding the lock table entries for `ids`, taken in
    /// ascending order. Entries no other caller references are removed
    /// afterwards. Not reentrant: `body` must not lock the same ids again.
    fn exclusive<T>(&self, ids: &[Uuid], body: impl FnOnce() -> Result<T>) -> Result<T> {
        let mut ordered = ids.to_vec();
        ordered.sort_unstable();
        ordered.dedup();
        let entries: Vec<Arc<Mutex<()>>> = {
            let mut table = self.locks.lock();
            ordered
                .iter()
                .map(|id| Arc::clone(table.entry(*id).or_default()))
                .collect()
        };

        let result = {
            let _guards: Vec<_> = entries.iter().map(|entry| entry.lock()).collect();
            tracing::trace!(locks = ordered.len(), "account locks acquired");
            body()
        };

        drop(entries);
        let mut table = self.locks.lock();
        for id in &ordered {
            if table
                .get(id)
                .map_or(false, |entry| Arc::strong_count(entry) == 1)
            {
                table.remove(id);
            }
        }
        result
    }

    fn locked_commit<T>(
        &self,
        id: Uuid,
        mutate: impl FnMut(&mut Account) -> Result<T>,
    ) -> Result<(Account, T)> {
        self.exclusive(&[id], || self.commit(id, mutate))
    }

    /// Load, mutate, compare-and-swap. Version conflicts reload and retry with
    /// linear backoff. The caller holds the account lock.
    fn commit<T>(
        &self,
        id: Uuid,
        mut mutate: impl FnMut(&mut Account) -> Result<T>,
    ) -> Result<(Account, T)> {
        let attempts = self.config.commit_attempts();
        let mut attempt = 1;
        loop {
            let mut account = self.store.load(id)?;
            let output = mutate(&mut account)?;
            match self.store.save(&mut account) {
                Ok(()) => return Ok((account, output)),
                Err(err) if err.is_retryable() && attempt < attempts => {
                    tracing::warn!(account = %id, attempt, "version conflict, retrying commit");
                    thread::sleep(self.config.backoff_for(attempt));
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn publish(&self, account: &Account, posted: &[Transaction]) {
        for transaction in posted {
            self.notifier.notify(&LedgerEvent::TransactionPosted {
                account_id: account.id,
                owner_id: account.owner_id,
                transaction: transaction.clone(),
            });
            for alert in self.alerts.evaluate(account, transaction) {
                self.notifier.notify(&LedgerEvent::Alert(alert));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::services::notifier::InMemoryNotifier;
    use crate::currency::CurrencyCode;
    use crate::ledger::{AccountStatus, EntryKind, ExternalRail, ExternalTransferStatus};
    use crate::storage::InMemoryAccountStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn usd(text: &str) -> Money {
        Money::parse(text, CurrencyCode::USD).unwrap()
    }

    fn service() -> (LedgerService, Arc<InMemoryNotifier>) {
        let notifier = Arc::new(InMemoryNotifier::new());
        let service = LedgerService::new(Arc::new(InMemoryAccountStore::new()), Config::default())
            .with_notifier(notifier.clone());
        (service, notifier)
    }

    /// Reports a version conflict for the first `conflicts` saves.
    struct ConflictingStore {
        inner: InMemoryAccountStore,
        conflicts: AtomicU32,
    }

    impl AccountStore for ConflictingStore {
        fn insert(&self, account: &Account) -> Result<()> {
            self.inner.insert(account)
        }

        fn load(&self, id: Uuid) -> Result<Account> {
            self.inner.load(id)
        }

        fn save(&self, account: &mut Account) -> Result<()> {
            let remaining = self.conflicts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.conflicts.store(remaining - 1, Ordering::SeqCst);
                return Err(LedgerError::ConcurrentModification {
                    account: account.id,
                    expected: account.version,
                    found: account.version + 1,
                });
            }
            self.inner.save(account)
        }

        fn list_for_owner(&self, owner_id: Uuid) -> Result<Vec<Account>> {
            self.inner.list_for_owner(owner_id)
        }

        fn list_all(&self) -> Result<Vec<Account>> {
            self.inner.list_all()
        }
    }

    #[test]
    fn transfer_moves_money_with_shared_reference() {
        let (ledger, notifier) = service();
        let owner = Uuid::new_v4();
        let a = ledger
            .open_account(owner, AccountKind::Checking, usd("1000.00"))
            .unwrap();
        let b = ledger
            .open_account(owner, AccountKind::savings(), usd("0.00"))
            .unwrap();

        let receipt = ledger.transfer(a.id, b.id, usd("250.00"), None).unwrap();
        assert_eq!(ledger.account(a.id).unwrap().balance(), usd("750.00"));
        assert_eq!(ledger.account(b.id).unwrap().balance(), usd("250.00"));
        assert_eq!(receipt.debit.reference.as_deref(), Some(receipt.reference.as_str()));
        assert_eq!(receipt.credit.reference.as_deref(), Some(receipt.reference.as_str()));
        assert!(receipt.reference.starts_with("TRN-"));

        let posted = notifier
            .events()
            .into_iter()
            .filter(|event| matches!(event, LedgerEvent::TransactionPosted { .. }))
            .count();
        assert_eq!(posted, 3);
    }

    #[test]
    fn transfer_rejects_same_account_and_non_positive_amounts() {
        let (ledger, _) = service();
        let a = ledger
            .open_account(Uuid::new_v4(), AccountKind::Checking, usd("10.00"))
            .unwrap();
        assert!(matches!(
            ledger.transfer(a.id, a.id, usd("1.00"), None),
            Err(LedgerError::InvalidTransfer(_))
        ));
        let other = ledger
            .open_account(Uuid::new_v4(), AccountKind::Checking, usd("0.00"))
            .unwrap();
        assert!(matches!(
            ledger.transfer(a.id, other.id, usd("0.00"), None),
            Err(LedgerError::InvalidAmount(_))
        ));
    }

    #[test]
    fn failed_credit_leg_is_compensated() {
        let (ledger, _) = service();
        let owner = Uuid::new_v4();
        let checking = ledger
            .open_account(owner, AccountKind::Checking, usd("500.00"))
            .unwrap();
        let card = ledger
            .open_account(owner, AccountKind::credit(usd("100.00")), usd("0.00"))
            .unwrap();

        let err = ledger
            .transfer(checking.id, card.id, usd("150.00"), Some("Overpayment"))
            .unwrap_err();
        assert!(matches!(err, LedgerError::CreditLimitExceeded { .. }));

        let source = ledger.account(checking.id).unwrap();
        assert_eq!(source.balance(), usd("500.00"));
        let log = source.transactions();
        assert_eq!(log.len(), 3);
        assert_eq!(log[2].category, TransactionCategory::Reversal);
        assert_eq!(log[2].kind, EntryKind::Credit);
        assert_eq!(log[2].reference, log[1].reference);
        assert_eq!(source.replay_balance().unwrap(), source.balance());
        assert!(ledger.account(card.id).unwrap().transactions().is_empty());
    }

    #[test]
    fn withdrawal_respects_channel_limits_and_account_kind() {
        let (ledger, _) = service();
        let owner = Uuid::new_v4();
        let checking = ledger
            .open_account(owner, AccountKind::Checking, usd("2000.00"))
            .unwrap();
        let card = ledger
            .open_account(owner, AccountKind::credit(usd("5000.00")), usd("0.00"))
            .unwrap();

        assert!(matches!(
            ledger.withdraw(checking.id, usd("600.00"), WithdrawalChannel::Atm),
            Err(LedgerError::WithdrawalLimitExceeded { .. })
        ));
        ledger
            .withdraw(checking.id, usd("600.00"), WithdrawalChannel::Branch)
            .unwrap();
        assert!(matches!(
            ledger.withdraw(checking.id, usd("10.00"), WithdrawalChannel::CashAdvance),
            Err(LedgerError::InvalidTransfer(_))
        ));
        ledger
            .withdraw(card.id, usd("300.00"), WithdrawalChannel::CashAdvance)
            .unwrap();
        assert_eq!(ledger.account(card.id).unwrap().balance(), usd("-300.00"));
        assert_eq!(ledger.account(checking.id).unwrap().balance(), usd("1400.00"));
    }

    #[test]
    fn wire_fee_is_debited_and_refunded_on_return() {
        let (ledger, _) = service();
        let account = ledger
            .open_account(Uuid::new_v4(), AccountKind::Checking, usd("1000.00"))
            .unwrap();
        let transfer = ledger
            .send_external(account.id, usd("200.00"), ExternalRail::Wire, "Landlord")
            .unwrap();
        assert_eq!(transfer.fee, usd("30.00"));
        assert_eq!(transfer.status, ExternalTransferStatus::Pending);
        assert_eq!(ledger.account(account.id).unwrap().balance(), usd("770.00"));

        let returned = ledger
            .return_external(&transfer.reference, "beneficiary account closed")
            .unwrap();
        assert_eq!(returned.status, ExternalTransferStatus::Returned);
        assert_eq!(ledger.account(account.id).unwrap().balance(), usd("1000.00"));
        assert!(matches!(
            ledger.settle_external(&transfer.reference),
            Err(LedgerError::InvalidTransfer(_))
        ));
    }

    #[test]
    fn wire_that_cannot_cover_fee_leaves_no_trace() {
        let (ledger, _) = service();
        let account = ledger
            .open_account(Uuid::new_v4(), AccountKind::Checking, usd("210.00"))
            .unwrap();
        assert!(matches!(
            ledger.send_external(account.id, usd("200.00"), ExternalRail::Wire, "Rent"),
            Err(LedgerError::InsufficientFunds { .. })
        ));
        let stored = ledger.account(account.id).unwrap();
        assert_eq!(stored.balance(), usd("210.00"));
        assert_eq!(stored.transactions().len(), 1);
    }

    #[test]
    fn ach_settles_without_fee() {
        let (ledger, _) = service();
        let account = ledger
            .open_account(Uuid::new_v4(), AccountKind::Checking, usd("100.00"))
            .unwrap();
        let transfer = ledger
            .send_external(account.id, usd("40.00"), ExternalRail::Ach, "Brokerage")
            .unwrap();
        assert!(transfer.fee.is_zero());
        let settled = ledger.settle_external(&transfer.reference).unwrap();
        assert_eq!(settled.status, ExternalTransferStatus::Settled);
        assert!(matches!(
            ledger.settle_external("TRN-00000000-00000000"),
            Err(LedgerError::RecordNotFound {
                collection: "transfers",
                ..
            })
        ));
    }

    #[test]
    fn closed_and_suspended_accounts_reject_postings() {
        let (ledger, _) = service();
        let account = ledger
            .open_account(Uuid::new_v4(), AccountKind::Checking, usd("5.00"))
            .unwrap();
        assert!(matches!(
            ledger.close_account(account.id),
            Err(LedgerError::NonZeroBalance { .. })
        ));

        ledger.suspend_account(account.id).unwrap();
        assert!(matches!(
            ledger.deposit(account.id, usd("1.00"), "Cash"),
            Err(LedgerError::AccountSuspended(_))
        ));
        ledger.reactivate_account(account.id).unwrap();
        ledger
            .withdraw(account.id, usd("5.00"), WithdrawalChannel::Atm)
            .unwrap();
        let closed = ledger.close_account(account.id).unwrap();
        assert_eq!(closed.status, AccountStatus::Closed);
        assert!(matches!(
            ledger.deposit(account.id, usd("1.00"), "Cash"),
            Err(LedgerError::AccountClosed(_))
        ));
    }

    #[test]
    fn ownership_is_enforced() {
        let (ledger, _) = service();
        let owner = Uuid::new_v4();
        let account = ledger
            .open_account(owner, AccountKind::Checking, usd("1.00"))
            .unwrap();
        ledger.ensure_owner(owner, account.id).unwrap();
        assert!(matches!(
            ledger.ensure_owner(Uuid::new_v4(), account.id),
            Err(LedgerError::Unauthorized { .. })
        ));
    }

    #[test]
    fn credit_card_purchase_payment_and_interest() {
        let (ledger, _) = service();
        let card = ledger
            .open_account(Uuid::new_v4(), AccountKind::credit(usd("5000.00")), usd("0.00"))
            .unwrap();
        ledger.purchase(card.id, usd("1200.00"), "Laptop").unwrap();
        let interest = ledger.accrue_interest(card.id).unwrap().unwrap();
        assert_eq!(interest.amount, usd("16.99"));
        assert_eq!(ledger.close_statement(card.id).unwrap(), usd("1216.99"));
        assert_eq!(ledger.minimum_payment_due(card.id).unwrap(), usd("25.00"));
        ledger.pay_credit(card.id, usd("216.99")).unwrap();
        assert_eq!(ledger.account(card.id).unwrap().balance(), usd("-1000.00"));
    }

    #[test]
    fn purchase_requires_credit_account() {
        let (ledger, _) = service();
        let checking = ledger
            .open_account(Uuid::new_v4(), AccountKind::Checking, usd("50.00"))
            .unwrap();
        assert!(matches!(
            ledger.purchase(checking.id, usd("5.00"), "Books"),
            Err(LedgerError::InvalidTransfer(_))
        ));
    }

    #[test]
    fn version_conflicts_are_retried() {
        let store = Arc::new(ConflictingStore {
            inner: InMemoryAccountStore::new(),
            conflicts: AtomicU32::new(0),
        });
        let ledger = LedgerService::new(store.clone(), Config::default());
        let account = ledger
            .open_account(Uuid::new_v4(), AccountKind::Checking, usd("10.00"))
            .unwrap();

        store.conflicts.store(2, Ordering::SeqCst);
        ledger.deposit(account.id, usd("5.00"), "Cash").unwrap();
        assert_eq!(ledger.account(account.id).unwrap().balance(), usd("15.00"));

        store.conflicts.store(3, Ordering::SeqCst);
        assert!(matches!(
            ledger.deposit(account.id, usd("5.00"), "Cash"),
            Err(LedgerError::ConcurrentModification { .. })
        ));
        assert_eq!(ledger.account(account.id).unwrap().balance(), usd("15.00"));
    }

    #[test]
    fn large_debit_raises_alert() {
        let (ledger, notifier) = service();
        let account = ledger
            .open_account(Uuid::new_v4(), AccountKind::Checking, usd("3000.00"))
            .unwrap();
        ledger
            .withdraw(account.id, usd("250.00"), WithdrawalChannel::Atm)
            .unwrap();
        let alerts = notifier.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].account_id, account.id);
    }

    #[test]
    fn lock_table_is_pruned_after_use() {
        let (ledger, _) = service();
        let owner = Uuid::new_v4();
        let a = ledger
            .open_account(owner, AccountKind::Checking, usd("100.00"))
            .unwrap();
        let b = ledger
            .open_account(owner, AccountKind::savings(), usd("0.00"))
            .unwrap();
        ledger.deposit(a.id, usd("1.00"), "Cash").unwrap();
        ledger.transfer(a.id, b.id, usd("10.00"), None).unwrap();
        assert!(ledger.transfer(a.id, b.id, usd("1000.00"), None).is_err());
        assert!(ledger.locks.lock().is_empty());
    }

    #[test]
    fn lock_table_stays_bounded_under_contention() {
        let (ledger, _) = service();
        let ledger = Arc::new(ledger);
        let owner = Uuid::new_v4();
        let accounts: Vec<Uuid> = (0..4)
            .map(|_| {
                ledger
                    .open_account(owner, AccountKind::Checking, usd("100.00"))
                    .unwrap()
                    .id
            })
            .collect();

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let ledger = Arc::clone(&ledger);
                let accounts = accounts.clone();
                thread::spawn(move || {
                    for round in 0..25 {
                        let from = accounts[(worker + round) % accounts.len()];
                        let to = accounts[(worker + round + 1) % accounts.len()];
                        let _ = ledger.transfer(from, to, usd("1.00"), None);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(ledger.locks.lock().is_empty());
        let total = accounts.iter().try_fold(Money::zero(CurrencyCode::USD), |sum, id| {
            sum.checked_add(ledger.account(*id).unwrap().balance())
        });
        assert_eq!(total.unwrap(), usd("400.00"));
    }

    #[test]
    fn reference_history_covers_stored_entries() {
        let store: Arc<dyn AccountStore> = Arc::new(InMemoryAccountStore::new());
        let first = LedgerService::new(store.clone(), Config::default());
        let owner = Uuid::new_v4();
        let a = first
            .open_account(owner, AccountKind::Checking, usd("100.00"))
            .unwrap();
        let b = first
            .open_account(owner, AccountKind::savings(), usd("0.00"))
            .unwrap();
        let receipt = first.transfer(a.id, b.id, usd("5.00"), None).unwrap();

        let restarted = LedgerService::new(store, Config::default())
            .with_reference_history()
            .unwrap();
        assert!(restarted.references().contains(&receipt.reference));
        assert!(!LedgerService::new(Arc::new(InMemoryAccountStore::new()), Config::default())
            .references()
            .contains(&receipt.reference));
    }

    #[test]
    fn withdrawal_limits_apply_in_the_account_currency() {
        let (ledger, _) = service();
        let euros = |text: &str| Money::parse(text, CurrencyCode::EUR).unwrap();
        let account = ledger
            .open_account(Uuid::new_v4(), AccountKind::Checking, euros("900.00"))
            .unwrap();
        assert!(matches!(
            ledger.withdraw(account.id, euros("501.00"), WithdrawalChannel::Atm),
            Err(LedgerError::WithdrawalLimitExceeded { limit, .. }) if limit == euros("500.00")
        ));
        ledger
            .withdraw(account.id, euros("500.00"), WithdrawalChannel::Atm)
            .unwrap();
    }
}
