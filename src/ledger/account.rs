use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::transaction::{EntryKind, Posting, Transaction, TransactionCategory};
use crate::currency::{CurrencyCode, Money};
use crate::errors::{LedgerError, Result};

const DEFAULT_CREDIT_APR_BASIS_POINTS: i64 = 1_699;
const DEFAULT_SAVINGS_APY_BASIS_POINTS: i64 = 85;
const MONTHS_PER_YEAR: i64 = 12;
const BASIS_POINTS: i64 = 10_000;

/// A balance-holding account with an append-only transaction log.
///
/// Balances are signed. Debits subtract and credits add for every kind, so
/// debt on a credit account is a negative balance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub kind: AccountKind,
    pub status: AccountStatus,
    #[serde(default)]
    pub overdraft_enabled: bool,
    /// Bumped by the store on every successful save.
    #[serde(default)]
    pub version: u64,
    pub opened_at: DateTime<Utc>,
    balance: Money,
    #[serde(default)]
    transactions: Vec<Transaction>,
}

/// Closed set of account types, each carrying its own terms.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccountKind {
    Checking,
    Savings(SavingsTerms),
    Credit(CreditTerms),
}

impl AccountKind {
    pub fn savings() -> Self {
        AccountKind::Savings(SavingsTerms::default())
    }

    pub fn credit(credit_limit: Money) -> Self {
        AccountKind::Credit(CreditTerms::new(credit_limit))
    }

    pub fn label(&self) -> &'static str {
        match self {
            AccountKind::Checking => "Checking",
            AccountKind::Savings(_) => "Savings",
            AccountKind::Credit(_) => "Credit",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SavingsTerms {
    pub apy_basis_points: i64,
}

impl Default for SavingsTerms {
    fn default() -> Self {
        Self {
            apy_basis_points: DEFAULT_SAVINGS_APY_BASIS_POINTS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreditTerms {
    pub credit_limit: Money,
    pub apr_basis_points: i64,
    /// Debt owed as of the last statement close, as a positive amount.
    pub statement_balance: Money,
}

impl CreditTerms {
    pub fn new(credit_limit: Money) -> Self {
        Self {
            credit_limit,
            apr_basis_points: DEFAULT_CREDIT_APR_BASIS_POINTS,
            statement_balance: Money::zero(credit_limit.currency()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccountStatus {
    Active,
    Suspended,
    Closed,
}

impl Account {
    /// Creates an active account with a zero balance and an empty log.
    pub fn new(owner_id: Uuid, kind: AccountKind, currency: CurrencyCode) -> Result<Self> {
        if let AccountKind::Credit(terms) = &kind {
            if terms.credit_limit.currency() != currency {
                return Err(LedgerError::CurrencyMismatch {
                    expected: currency.to_string(),
                    found: terms.credit_limit.currency().to_string(),
                });
            }
            if terms.credit_limit.is_negative() {
                return Err(LedgerError::InvalidAmount(
                    "credit limit must not be negative".into(),
                ));
            }
        }
        Ok(Self {
            id: Uuid::new_v4(),
            owner_id,
            kind,
            status: AccountStatus::Active,
            overdraft_enabled: false,
            version: 0,
            opened_at: Utc::now(),
            balance: Money::zero(currency),
            transactions: Vec::new(),
        })
    }

    pub fn with_overdraft(mut self, enabled: bool) -> Self {
        self.overdraft_enabled = enabled;
        self
    }

    pub fn balance(&self) -> Money {
        self.balance
    }

    pub fn currency(&self) -> CurrencyCode {
        self.balance.currency()
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn is_credit(&self) -> bool {
        matches!(self.kind, AccountKind::Credit(_))
    }

    pub fn credit_terms(&self) -> Option<&CreditTerms> {
        match &self.kind {
            AccountKind::Credit(terms) => Some(terms),
            _ => None,
        }
    }

    pub fn apply_transaction(&mut self, posting: Posting) -> Result<Transaction> {
        self.apply_transaction_at(posting, Utc::now())
    }

    /// The only way to change `balance`. Either the balance moves and the
    /// snapshot is appended, or nothing changes.
    pub fn apply_transaction_at(
        &mut self,
        posting: Posting,
        timestamp: DateTime<Utc>,
    ) -> Result<Transaction> {
        self.ensure_open()?;
        if !posting.amount.is_positive() {
            return Err(LedgerError::InvalidAmount(format!(
                "transaction amount must be positive, got {}",
                posting.amount
            )));
        }
        let prospective = match posting.kind {
            EntryKind::Credit => self.balance.checked_add(posting.amount)?,
            EntryKind::Debit => self.balance.checked_sub(posting.amount)?,
        };

        match &self.kind {
            AccountKind::Credit(terms) => {
                if prospective.abs()?.try_cmp(&terms.credit_limit)?.is_gt() {
                    return Err(LedgerError::CreditLimitExceeded {
                        account: self.id,
                        limit: terms.credit_limit,
                        attempted: prospective,
                    });
                }
            }
            AccountKind::Checking | AccountKind::Savings(_) => {
                if prospective.is_negative() && !self.overdraft_enabled {
                    return Err(LedgerError::InsufficientFunds {
                        account: self.id,
                        balance: self.balance,
                        requested: posting.amount,
                    });
                }
            }
        }

        let transaction = Transaction {
            id: Uuid::new_v4(),
            timestamp,
            description: posting.description,
            kind: posting.kind,
            category: posting.category,
            amount: posting.amount,
            resulting_balance: prospective,
            reference: posting.reference,
        };
        self.balance = prospective;
        self.transactions.push(transaction.clone());
        Ok(transaction)
    }

    /// Recomputes the balance from the transaction log.
    pub fn replay_balance(&self) -> Result<Money> {
        self.transactions
            .iter()
            .try_fold(Money::zero(self.currency()), |total, txn| match txn.kind {
                EntryKind::Credit => total.checked_add(txn.amount),
                EntryKind::Debit => total.checked_sub(txn.amount),
            })
    }

    /// Amount owed on a credit account, zero when the balance is not negative.
    pub fn debt(&self) -> Money {
        if self.is_credit() && self.balance.is_negative() {
            Money::from_minor(-self.balance.minor_units(), self.currency())
        } else {
            Money::zero(self.currency())
        }
    }

    pub fn available_credit(&self) -> Result<Option<Money>> {
        match &self.kind {
            AccountKind::Credit(terms) => {
                Ok(Some(terms.credit_limit.checked_sub(self.balance.abs()?)?))
            }
            _ => Ok(None),
        }
    }

    /// Greater of `floor` and `rate_basis_points` of the debt, never more than the debt.
    pub fn minimum_payment_due(&self, floor: Money, rate_basis_points: i64) -> Result<Money> {
        let debt = self.debt();
        if debt.is_zero() {
            return Ok(debt);
        }
        let proportional = debt.percentage(rate_basis_points)?;
        let minimum = if proportional.try_cmp(&floor)?.is_gt() {
            proportional
        } else {
            floor
        };
        if minimum.try_cmp(&debt)?.is_gt() {
            Ok(debt)
        } else {
            Ok(minimum)
        }
    }

    /// Snapshots the current debt as the statement balance.
    pub fn close_statement(&mut self) -> Result<Money> {
        let debt = self.debt();
        match &mut self.kind {
            AccountKind::Credit(terms) => {
                terms.statement_balance = debt;
                Ok(debt)
            }
            _ => Err(LedgerError::InvalidTransfer(format!(
                "account {} has no statements",
                self.id
            ))),
        }
    }

    /// One month of interest: a charge on credit debt or an earning on savings.
    pub fn monthly_interest(&self) -> Result<Option<Posting>> {
        let monthly_rate =
            |basis: Money, points: i64| basis.mul_ratio(points, BASIS_POINTS * MONTHS_PER_YEAR);
        let posting = match &self.kind {
            AccountKind::Credit(terms) => {
                let charge = monthly_rate(self.debt(), terms.apr_basis_points)?;
                charge.is_positive().then(|| {
                    Posting::debit(charge, "Interest charge", TransactionCategory::Interest)
                })
            }
            AccountKind::Savings(terms) if self.balance.is_positive() => {
                let earned = monthly_rate(self.balance, terms.apy_basis_points)?;
                earned.is_positive().then(|| {
                    Posting::credit(earned, "Interest earned", TransactionCategory::Interest)
                })
            }
            _ => None,
        };
        Ok(posting)
    }

    pub fn close(&mut self) -> Result<()> {
        self.ensure_not_closed()?;
        if !self.balance.is_zero() {
            return Err(LedgerError::NonZeroBalance {
                account: self.id,
                balance: self.balance,
            });
        }
        self.status = AccountStatus::Closed;
        Ok(())
    }

    pub fn suspend(&mut self) -> Result<()> {
        self.ensure_not_closed()?;
        self.status = AccountStatus::Suspended;
        Ok(())
    }

    pub fn reactivate(&mut self) -> Result<()> {
        self.ensure_not_closed()?;
        self.status = AccountStatus::Active;
        Ok(())
    }

    pub fn ensure_open(&self) -> Result<()> {
        match self.status {
            AccountStatus::Active => Ok(()),
            AccountStatus::Suspended => Err(LedgerError::AccountSuspended(self.id)),
            AccountStatus::Closed => Err(LedgerError::AccountClosed(self.id)),
        }
    }

    fn ensure_not_closed(&self) -> Result<()> {
        if self.status == AccountStatus::Closed {
            Err(LedgerError::AccountClosed(self.id))
        } else {
            Ok(())
        }
    }
}
