//! Executes due recurring schedules against the ledger.

use std::{collections::HashMap, sync::Arc, thread};

use chrono::NaiveDate;
use uuid::Uuid;

use crate::config::Config;
use crate::core::services::ledger_service::LedgerService;
use crate::core::services::notifier::{LedgerEvent, Notifier};
use crate::currency::Money;
use crate::errors::{LedgerError, Result};
use crate::ledger::{
    Account, ExternalRail, Payee, PaymentRecord, PaymentStatus, PaymentType, RecurringSchedule,
};
use crate::storage::AccountStore;

/// Answers how much is owed to a payee.
pub trait BalanceLookup: Send + Sync {
    fn full_balance(&self, payee: &Payee) -> Result<Money>;
    fn statement_balance(&self, payee: &Payee) -> Result<Money>;
    fn minimum_due(&self, payee: &Payee) -> Result<Money>;
}

/// Resolves balances of internal credit accounts straight from the store.
pub struct LedgerBalanceLookup {
    store: Arc<dyn AccountStore>,
    config: Config,
}

impl LedgerBalanceLookup {
    pub fn new(store: Arc<dyn AccountStore>, config: &Config) -> Self {
        Self {
            store,
            config: config.clone(),
        }
    }

    fn credit_account(&self, payee: &Payee) -> Result<Account> {
        let account_id = match payee {
            Payee::Internal { account_id } => *account_id,
            Payee::Bill { name, .. } => {
                return Err(LedgerError::InvalidSchedule(format!(
                    "no balance information for bill payee {}",
                    name
                )))
            }
        };
        let account = self.store.load(account_id)?;
        if !account.is_credit() {
            return Err(LedgerError::InvalidSchedule(format!(
                "balance-based payments require a credit payee, {} is {}",
                account.id,
                account.kind.label()
            )));
        }
        Ok(account)
    }
}

impl BalanceLookup for LedgerBalanceLookup {
    fn full_balance(&self, payee: &Payee) -> Result<Money> {
        Ok(self.credit_account(payee)?.debt())
    }

    /// The last statement balance, reduced to the current debt if it has
    /// since been paid down.
    fn statement_balance(&self, payee: &Payee) -> Result<Money> {
        let account = self.credit_account(payee)?;
        let debt = account.debt();
        let statement = account
            .credit_terms()
            .map(|terms| terms.statement_balance)
            .unwrap_or(debt);
        if statement.try_cmp(&debt)?.is_gt() {
            Ok(debt)
        } else {
            Ok(statement)
        }
    }

    fn minimum_due(&self, payee: &Payee) -> Result<Money> {
        let account = self.credit_account(payee)?;
        let floor = self.config.minimum_payment_floor(account.currency());
        account.minimum_payment_due(floor, i64::from(self.config.minimum_payment_rate_bp))
    }
}

/// Outcome counts of a processor run. Pending bill payments count as succeeded.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunSummary {
    fn record(&mut self, status: PaymentStatus) {
        match status {
            PaymentStatus::Succeeded | PaymentStatus::Pending => self.succeeded += 1,
            PaymentStatus::Failed => self.failed += 1,
            PaymentStatus::Skipped => self.skipped += 1,
        }
    }

    fn merge(&mut self, other: RunSummary) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

enum Attempt {
    Posted { amount: Money, reference: String },
    Pending { amount: Money, reference: String },
    Skipped,
}

pub struct PaymentProcessor {
    ledger: Arc<LedgerService>,
    lookup: Arc<dyn BalanceLookup>,
    notifier: Arc<dyn Notifier>,
    workers: usize,
}

impl PaymentProcessor {
    pub fn new(ledger: Arc<LedgerService>, lookup: Arc<dyn BalanceLookup>) -> Self {
        let notifier = ledger.notifier();
        let workers = ledger.config().worker_count();
        Self {
            ledger,
            lookup,
            notifier,
            workers,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Executes one occurrence of every due schedule and advances it.
    ///
    /// Schedules sharing a source account run sequentially in slice order;
    /// groups for different source accounts are spread over worker threads.
    pub fn run_due_schedules(
        &self,
        schedules: &mut [RecurringSchedule],
        today: NaiveDate,
    ) -> RunSummary {
        let mut by_source: HashMap<Uuid, Vec<&mut RecurringSchedule>> = HashMap::new();
        let mut order = Vec::new();
        for schedule in schedules.iter_mut().filter(|schedule| schedule.is_due(today)) {
            let source = schedule.source_account_id;
            if !by_source.contains_key(&source) {
                order.push(source);
            }
            by_source.entry(source).or_default().push(schedule);
        }
        if by_source.is_empty() {
            tracing::debug!(%today, "no schedules due");
            return RunSummary::default();
        }

        let workers = self.workers.min(by_source.len()).max(1);
        let mut buckets: Vec<Vec<Vec<&mut RecurringSchedule>>> =
            (0..workers).map(|_| Vec::new()).collect();
        for (index, source) in order.iter().enumerate() {
            if let Some(group) = by_source.remove(source) {
                buckets[index % workers].push(group);
            }
        }

        let summaries: Vec<RunSummary> = thread::scope(|scope| {
            let handles: Vec<_> = buckets
                .into_iter()
                .map(|bucket| {
                    scope.spawn(move || {
                        let mut summary = RunSummary::default();
                        for group in bucket {
                            for schedule in group {
                                match self.execute(schedule, today) {
                                    Ok(status) => summary.record(status),
                                    Err(err) => tracing::warn!(
                                        schedule = %schedule.id,
                                        error = %err,
                                        "schedule not executed"
                                    ),
                                }
                            }
                        }
                        summary
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        tracing::error!("payment worker panicked");
                        RunSummary::default()
                    })
                })
                .collect()
        });

        let mut total = RunSummary::default();
        for summary in summaries {
            total.merge(summary);
        }
        tracing::info!(
            %today,
            succeeded = total.succeeded,
            failed = total.failed,
            skipped = total.skipped,
            "schedule run complete"
        );
        total
    }

    /// Runs the current occurrence of `schedule` and records the outcome in
    /// its history. Ledger errors become failed entries.
    ///
    /// A schedule that is paused, finished, or not yet due is refused before
    /// any money moves and its history is left untouched.
    pub fn execute(
        &self,
        schedule: &mut RecurringSchedule,
        today: NaiveDate,
    ) -> Result<PaymentStatus> {
        schedule.ensure_runnable()?;
        let scheduled_for = schedule.next_payment_date();
        if scheduled_for > today {
            return Err(LedgerError::InvalidSchedule(format!(
                "schedule {} is next due on {}",
                schedule.id, scheduled_for
            )));
        }
        let executed_at = self.ledger.now();
        let record = match self.attempt(schedule) {
            Ok(Attempt::Posted { amount, reference }) => PaymentRecord {
                scheduled_for,
                executed_at,
                amount: Some(amount),
                status: PaymentStatus::Succeeded,
                reference: Some(reference),
                failure_reason: None,
            },
            Ok(Attempt::Pending { amount, reference }) => PaymentRecord {
                scheduled_for,
                executed_at,
                amount: Some(amount),
                status: PaymentStatus::Pending,
                reference: Some(reference),
                failure_reason: None,
            },
            Ok(Attempt::Skipped) => PaymentRecord {
                scheduled_for,
                executed_at,
                amount: None,
                status: PaymentStatus::Skipped,
                reference: None,
                failure_reason: None,
            },
            Err(err) => {
                tracing::warn!(
                    schedule = %schedule.id,
                    %scheduled_for,
                    error = %err,
                    "scheduled payment rejected"
                );
                PaymentRecord {
                    scheduled_for,
                    executed_at,
                    amount: None,
                    status: PaymentStatus::Failed,
                    reference: None,
                    failure_reason: Some(err.to_string()),
                }
            }
        };
        let status = record.status;
        let event = match status {
            PaymentStatus::Failed => Some(LedgerEvent::PaymentFailed {
                schedule_id: schedule.id,
                owner_id: schedule.owner_id,
                scheduled_for,
                reason: record.failure_reason.clone().unwrap_or_default(),
            }),
            PaymentStatus::Succeeded | PaymentStatus::Pending => {
                record.amount.map(|amount| LedgerEvent::PaymentSucceeded {
                    schedule_id: schedule.id,
                    owner_id: schedule.owner_id,
                    amount,
                    status,
                    reference: record.reference.clone(),
                })
            }
            PaymentStatus::Skipped => None,
        };

        let next = schedule.record_execution(record)?;
        tracing::debug!(
            schedule = %schedule.id,
            %today,
            ?status,
            next_status = %next,
            next_date = %schedule.next_payment_date(),
            "schedule advanced"
        );
        if let Some(event) = event {
            self.notifier.notify(&event);
        }
        Ok(status)
    }

    fn attempt(&self, schedule: &RecurringSchedule) -> Result<Attempt> {
        let source = schedule.source_account_id;
        self.ledger.ensure_owner(schedule.owner_id, source)?;
        let amount = self.resolve_amount(schedule)?;
        if amount.is_zero() {
            return Ok(Attempt::Skipped);
        }
        match &schedule.payee {
            Payee::Internal { account_id } => {
                let memo = format!("Scheduled payment {}", schedule.id);
                let receipt = self
                    .ledger
                    .transfer(source, *account_id, amount, Some(&memo))?;
                Ok(Attempt::Posted {
                    amount,
                    reference: receipt.reference,
                })
            }
            Payee::Bill { payee_id, name } => {
                let transfer = self.ledger.send_external(
                    source,
                    amount,
                    ExternalRail::BillPay,
                    format!("{} ({})", name, payee_id),
                )?;
                Ok(Attempt::Pending {
                    amount,
                    reference: transfer.reference,
                })
            }
        }
    }

    fn resolve_amount(&self, schedule: &RecurringSchedule) -> Result<Money> {
        match schedule.payment_type() {
            PaymentType::Fixed(amount) => Ok(amount),
            PaymentType::FullBalance => self.lookup.full_balance(&schedule.payee),
            PaymentType::StatementBalance => self.lookup.statement_balance(&schedule.payee),
            PaymentType::MinimumPayment => self.lookup.minimum_due(&schedule.payee),
        }
    }
}
