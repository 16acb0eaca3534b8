//! Recurring payment schedules (autopay) and their date arithmetic.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::time_interval::{TimeInterval, TimeUnit};
use crate::currency::Money;
use crate::errors::{LedgerError, Result};

const MAX_ROLL_FORWARD_STEPS: usize = 100_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Frequency {
    Weekly,
    Biweekly,
    Monthly,
    Quarterly,
    SemiAnnually,
    Annually,
    Custom(TimeInterval),
}

impl Frequency {
    pub fn interval(&self) -> TimeInterval {
        match self {
            Frequency::Weekly => TimeInterval::new(1, TimeUnit::Week),
            Frequency::Biweekly => TimeInterval::new(2, TimeUnit::Week),
            Frequency::Monthly => TimeInterval::new(1, TimeUnit::Month),
            Frequency::Quarterly => TimeInterval::new(3, TimeUnit::Month),
            Frequency::SemiAnnually => TimeInterval::new(6, TimeUnit::Month),
            Frequency::Annually => TimeInterval::new(12, TimeUnit::Month),
            Frequency::Custom(interval) => *interval,
        }
    }
}

/// Next occurrence after `from`. Pure: identical inputs always give the same date.
pub fn next_occurrence(frequency: &Frequency, from: NaiveDate) -> NaiveDate {
    frequency.interval().next_date(from)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EndCondition {
    Never,
    ByDate(NaiveDate),
    ByOccurrences(u32),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScheduleStatus {
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ScheduleStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ScheduleStatus::Completed | ScheduleStatus::Cancelled)
    }

    /// Statuses the payment processor will execute. A failed schedule keeps
    /// retrying at its next occurrence.
    pub fn is_runnable(self) -> bool {
        matches!(self, ScheduleStatus::Active | ScheduleStatus::Failed)
    }

    fn allows_user_move(self, to: ScheduleStatus) -> bool {
        use ScheduleStatus::*;
        matches!(
            (self, to),
            (Active, Paused) | (Active, Cancelled) | (Paused, Active) | (Paused, Cancelled)
                | (Failed, Active) | (Failed, Cancelled)
        )
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScheduleStatus::Active => "active",
            ScheduleStatus::Paused => "paused",
            ScheduleStatus::Completed => "completed",
            ScheduleStatus::Failed => "failed",
            ScheduleStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// How much each occurrence pays.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentType {
    Fixed(Money),
    FullBalance,
    MinimumPayment,
    StatementBalance,
}

/// Where the money goes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Payee {
    /// Another account held in this ledger.
    Internal { account_id: Uuid },
    /// A biller reached through the external bill-pay rail.
    Bill { payee_id: String, name: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentStatus {
    Succeeded,
    Pending,
    Failed,
    Skipped,
}

/// One execution attempt in a schedule's history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentRecord {
    pub scheduled_for: NaiveDate,
    pub executed_at: DateTime<Utc>,
    pub amount: Option<Money>,
    pub status: PaymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecurringSchedule {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub source_account_id: Uuid,
    pub payee: Payee,
    payment_type: PaymentType,
    pub frequency: Frequency,
    pub start_date: NaiveDate,
    end_condition: EndCondition,
    remaining_occurrences: Option<u32>,
    next_payment_date: NaiveDate,
    status: ScheduleStatus,
    #[serde(default)]
    history: Vec<PaymentRecord>,
}

impl RecurringSchedule {
    pub fn new(
        owner_id: Uuid,
        source_account_id: Uuid,
        payee: Payee,
        payment_type: PaymentType,
        frequency: Frequency,
        start_date: NaiveDate,
        end_condition: EndCondition,
    ) -> Result<Self> {
        validate_payment_type(&payment_type)?;
        validate_frequency(&frequency)?;
        validate_end_condition(&end_condition, start_date)?;
        if payee == (Payee::Internal { account_id: source_account_id }) {
            return Err(LedgerError::InvalidSchedule(
                "payee account must differ from the source account".into(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            owner_id,
            source_account_id,
            payee,
            payment_type,
            frequency,
            start_date,
            end_condition,
            remaining_occurrences: remaining_for(&end_condition),
            next_payment_date: start_date,
            status: ScheduleStatus::Active,
            history: Vec::new(),
        })
    }

    pub fn payment_type(&self) -> PaymentType {
        self.payment_type
    }

    pub fn end_condition(&self) -> EndCondition {
        self.end_condition
    }

    pub fn remaining_occurrences(&self) -> Option<u32> {
        self.remaining_occurrences
    }

    pub fn next_payment_date(&self) -> NaiveDate {
        self.next_payment_date
    }

    pub fn status(&self) -> ScheduleStatus {
        self.status
    }

    pub fn history(&self) -> &[PaymentRecord] {
        &self.history
    }

    pub fn last_payment(&self) -> Option<&PaymentRecord> {
        self.history.last()
    }

    pub fn is_due(&self, now: NaiveDate) -> bool {
        self.status.is_runnable() && self.next_payment_date <= now
    }

    pub fn next_occurrence(&self, from: NaiveDate) -> NaiveDate {
        next_occurrence(&self.frequency, from)
    }

    /// Whether running `occurrence_just_run` exhausts the schedule.
    pub fn is_terminal(&self, occurrence_just_run: NaiveDate) -> bool {
        match self.end_condition {
            EndCondition::Never => false,
            EndCondition::ByOccurrences(_) => {
                self.remaining_occurrences.map_or(false, |left| left <= 1)
            }
            EndCondition::ByDate(end) => self.next_occurrence(occurrence_just_run) > end,
        }
    }

    /// Records an execution attempt of the current occurrence and advances the
    /// schedule. Success and failure both consume the occurrence; the next
    /// attempt happens at the following occurrence.
    pub fn record_execution(&mut self, record: PaymentRecord) -> Result<ScheduleStatus> {
        self.ensure_runnable()?;
        let ran = self.next_payment_date;
        let terminal = self.is_terminal(ran);
        let failed = record.status == PaymentStatus::Failed;

        self.history.push(record);
        if let Some(left) = self.remaining_occurrences.as_mut() {
            *left = left.saturating_sub(1);
        }
        self.next_payment_date = self.next_occurrence(ran);
        self.status = if terminal {
            ScheduleStatus::Completed
        } else if failed {
            ScheduleStatus::Failed
        } else {
            ScheduleStatus::Active
        };
        Ok(self.status)
    }

    /// Fails unless the schedule may run a payment: terminal schedules with
    /// `ScheduleTerminalState`, paused ones with `InvalidTransition`.
    pub fn ensure_runnable(&self) -> Result<()> {
        self.ensure_mutable()?;
        if !self.status.is_runnable() {
            return Err(LedgerError::InvalidTransition {
                schedule: self.id,
                from: self.status.to_string(),
                to: "executed".into(),
            });
        }
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.move_to(ScheduleStatus::Paused)
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.move_to(ScheduleStatus::Cancelled)
    }

    /// Reactivates a paused or failed schedule. Occurrences missed while it was
    /// inactive are skipped: the cadence rolls forward from its anchor to the
    /// first occurrence on or after `today`.
    pub fn resume(&mut self, today: NaiveDate) -> Result<ScheduleStatus> {
        self.move_to(ScheduleStatus::Active)?;
        let mut next = self.next_payment_date;
        let mut steps = 0usize;
        while next < today && steps < MAX_ROLL_FORWARD_STEPS {
            next = self.next_occurrence(next);
            steps += 1;
        }
        self.next_payment_date = next;
        if let EndCondition::ByDate(end) = self.end_condition {
            if next > end {
                self.status = ScheduleStatus::Completed;
            }
        }
        Ok(self.status)
    }

    /// Replaces the amount rule and/or end condition of a live schedule.
    ///
    /// An occurrence count covers the whole schedule, so runs already in the
    /// history count against it. A schedule whose new end condition is
    /// already met completes.
    pub fn amend(
        &mut self,
        payment_type: Option<PaymentType>,
        end_condition: Option<EndCondition>,
    ) -> Result<()> {
        self.ensure_mutable()?;
        if let Some(payment_type) = payment_type {
            validate_payment_type(&payment_type)?;
            self.payment_type = payment_type;
        }
        if let Some(end_condition) = end_condition {
            validate_end_condition(&end_condition, self.start_date)?;
            self.end_condition = end_condition;
            self.remaining_occurrences = match end_condition {
                EndCondition::ByOccurrences(count) => {
                    let ran = u32::try_from(self.history.len()).unwrap_or(u32::MAX);
                    Some(count.saturating_sub(ran))
                }
                _ => None,
            };
            let exhausted = match end_condition {
                EndCondition::Never => false,
                EndCondition::ByOccurrences(_) => self.remaining_occurrences == Some(0),
                EndCondition::ByDate(end) => self.next_payment_date > end,
            };
            if exhausted {
                self.status = ScheduleStatus::Completed;
            }
        }
        Ok(())
    }

    fn move_to(&mut self, to: ScheduleStatus) -> Result<()> {
        self.ensure_mutable()?;
        if !self.status.allows_user_move(to) {
            return Err(LedgerError::InvalidTransition {
                schedule: self.id,
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.status.is_terminal() {
            Err(LedgerError::ScheduleTerminalState {
                schedule: self.id,
                status: self.status.to_string(),
            })
        } else {
            Ok(())
        }
    }
}

fn remaining_for(end_condition: &EndCondition) -> Option<u32> {
    match end_condition {
        EndCondition::ByOccurrences(count) => Some(*count),
        _ => None,
    }
}

fn validate_payment_type(payment_type: &PaymentType) -> Result<()> {
    match payment_type {
        PaymentType::Fixed(amount) if !amount.is_positive() => Err(LedgerError::InvalidSchedule(
            format!("fixed payment amount must be positive, got {}", amount),
        )),
        _ => Ok(()),
    }
}

fn validate_frequency(frequency: &Frequency) -> Result<()> {
    match frequency {
        Frequency::Custom(interval) if interval.every == 0 => Err(LedgerError::InvalidSchedule(
            "custom frequency must repeat at least every 1 unit".into(),
        )),
        _ => Ok(()),
    }
}

fn validate_end_condition(end_condition: &EndCondition, start_date: NaiveDate) -> Result<()> {
    match end_condition {
        EndCondition::ByOccurrences(0) => Err(LedgerError::InvalidSchedule(
            "occurrence count must be at least 1".into(),
        )),
        EndCondition::ByDate(end) if *end < start_date => Err(LedgerError::InvalidSchedule(
            format!("end date {} precedes start date {}", end, start_date),
        )),
        _ => Ok(()),
    }
}
