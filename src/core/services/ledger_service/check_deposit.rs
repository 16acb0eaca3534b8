use std::slice;

use chrono::{Datelike, NaiveDate, Weekday};
use uuid::Uuid;

use super::LedgerService;
use crate::currency::{CurrencyCode, Money};
use crate::errors::{LedgerError, Result};
use crate::ledger::{EntryKind, Posting, Transaction, TransactionCategory};

/// Check deposits already counted against an owner's daily and monthly limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckDepositUsage {
    pub today: Money,
    pub this_month: Money,
}

/// Outcome of a successful check deposit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckDeposit {
    pub transaction: Transaction,
    /// First business day the funds are released to the customer.
    pub available_on: NaiveDate,
    /// Usage including this deposit.
    pub usage: CheckDepositUsage,
}

impl LedgerService {
    /// Totals the owner's check deposits in `currency` for the clock's
    /// current day and month. Usage comes from the posted entries, so it is
    /// the same after a restart.
    pub fn check_deposit_usage(
        &self,
        owner_id: Uuid,
        currency: CurrencyCode,
    ) -> Result<CheckDepositUsage> {
        let today = self.clock.today();
        let mut usage = CheckDepositUsage {
            today: Money::zero(currency),
            this_month: Money::zero(currency),
        };
        for account in self.store.list_for_owner(owner_id)? {
            if account.currency() != currency {
                continue;
            }
            let deposits = account.transactions().iter().filter(|txn| {
                txn.category == TransactionCategory::CheckDeposit && txn.kind == EntryKind::Credit
            });
            for txn in deposits {
                let day = txn.timestamp.date_naive();
                if day.year() != today.year() || day.month() != today.month() {
                    continue;
                }
                usage.this_month = usage.this_month.checked_add(txn.amount)?;
                if day == today {
                    usage.today = usage.today.checked_add(txn.amount)?;
                }
            }
        }
        Ok(usage)
    }

    /// Credits a check to one of the caller's deposit accounts after the
    /// per-check, daily and monthly limits pass.
    pub fn deposit_check(
        &self,
        caller: Uuid,
        account_id: Uuid,
        amount: Money,
    ) -> Result<CheckDeposit> {
        self.ensure_owner(caller, account_id)?;
        let limits = self.config.check_deposit_limits(amount.currency());
        if amount.try_cmp(&limits.min)?.is_lt() {
            return Err(LedgerError::InvalidAmount(format!(
                "check deposits must be at least {}, got {}",
                limits.min, amount
            )));
        }
        if amount.try_cmp(&limits.max)?.is_gt() {
            return Err(LedgerError::DepositLimitExceeded {
                rule: "per-check".into(),
                limit: limits.max,
            });
        }

        self.exclusive(&[caller, account_id], || {
            let usage = self.check_deposit_usage(caller, amount.currency())?;
            if usage.today.checked_add(amount)?.try_cmp(&limits.daily)?.is_gt() {
                tracing::warn!(owner = %caller, %amount, used = %usage.today, "daily limit hit");
                return Err(LedgerError::DepositLimitExceeded {
                    rule: "daily".into(),
                    limit: limits.daily,
                });
            }
            if usage.this_month.checked_add(amount)?.try_cmp(&limits.monthly)?.is_gt() {
                tracing::warn!(
                    owner = %caller,
                    %amount,
                    used = %usage.this_month,
                    "monthly limit hit"
                );
                return Err(LedgerError::DepositLimitExceeded {
                    rule: "monthly".into(),
                    limit: limits.monthly,
                });
            }

            let now = self.clock.now();
            let reference = self.references.next(now);
            let posting =
                Posting::credit(amount, "Check deposit", TransactionCategory::CheckDeposit)
                    .with_reference(&reference);
            let (account, txn) = self.commit(account_id, |account| {
                if account.is_credit() {
                    return Err(LedgerError::InvalidTransfer(format!(
                        "checks cannot be deposited to {} account {}",
                        account.kind.label(),
                        account.id
                    )));
                }
                account.apply_transaction_at(posting.clone(), now)
            })?;
            self.publish(&account, slice::from_ref(&txn));

            let available_on = next_business_day(now.date_naive());
            tracing::info!(
                account = %account_id,
                %amount,
                %reference,
                %available_on,
                "check deposited"
            );
            Ok(CheckDeposit {
                transaction: txn,
                available_on,
                usage: CheckDepositUsage {
                    today: usage.today.checked_add(amount)?,
                    this_month: usage.this_month.checked_add(amount)?,
                },
            })
        })
    }
}

/// The weekday after `date`, skipping Saturday and Sunday.
fn next_business_day(date: NaiveDate) -> NaiveDate {
    let mut day = date;
    loop {
        match day.succ_opt() {
            Some(next) => day = next,
            None => return day,
        }
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            return day;
        }
    }
}
