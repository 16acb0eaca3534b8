use std::{collections::HashMap, fmt};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::currency::{CurrencyCode, Money};
use crate::ledger::{Account, EntryKind, Transaction};

/// Per-owner thresholds. `None` disables the corresponding alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSettings {
    pub low_balance: Option<Money>,
    pub large_debit: Option<Money>,
    pub large_credit: Option<Money>,
}

impl AlertSettings {
    /// The configured default thresholds, expressed in `currency`.
    pub fn from_config(config: &Config, currency: CurrencyCode) -> Self {
        Self {
            low_balance: config.low_balance_threshold(currency),
            large_debit: config.large_debit_threshold(currency),
            large_credit: config.large_credit_threshold(currency),
        }
    }

    pub fn disabled() -> Self {
        Self {
            low_balance: None,
            large_debit: None,
            large_credit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertKind {
    LowBalance { balance: Money, threshold: Money },
    LargeDebit { amount: Money, threshold: Money },
    LargeCredit { amount: Money, threshold: Money },
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::LowBalance { balance, threshold } => {
                write!(f, "balance {} fell below {}", balance, threshold)
            }
            AlertKind::LargeDebit { amount, threshold } => {
                write!(f, "debit of {} reached {}", amount, threshold)
            }
            AlertKind::LargeCredit { amount, threshold } => {
                write!(f, "credit of {} reached {}", amount, threshold)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceAlert {
    pub owner_id: Uuid,
    pub account_id: Uuid,
    pub transaction_id: Uuid,
    pub kind: AlertKind,
    pub raised_at: DateTime<Utc>,
}

/// Evaluates posted transactions against owner thresholds.
///
/// Owners without an override get the configured defaults in the currency of
/// the account being evaluated.
pub struct AlertService {
    defaults: Config,
    overrides: RwLock<HashMap<Uuid, AlertSettings>>,
}

impl AlertService {
    pub fn new(config: &Config) -> Self {
        Self {
            defaults: config.clone(),
            overrides: RwLock::new(HashMap::new()),
        }
    }

    pub fn configure(&self, owner_id: Uuid, settings: AlertSettings) {
        self.overrides.write().insert(owner_id, settings);
    }

    pub fn settings_for(&self, owner_id: Uuid, currency: CurrencyCode) -> AlertSettings {
        self.overrides
            .read()
            .get(&owner_id)
            .cloned()
            .unwrap_or_else(|| AlertSettings::from_config(&self.defaults, currency))
    }

    /// Alerts raised by `transaction`, which has already been applied to `account`.
    ///
    /// Low-balance alerts fire only when the balance crosses the threshold, and
    /// never for credit accounts. Override thresholds in another currency are ignored.
    pub fn evaluate(&self, account: &Account, transaction: &Transaction) -> Vec<BalanceAlert> {
        let settings = self.settings_for(account.owner_id, account.currency());
        let mut kinds = Vec::new();

        match transaction.kind {
            EntryKind::Debit => {
                if let Some(threshold) = settings.large_debit {
                    if at_least(&transaction.amount, &threshold) {
                        kinds.push(AlertKind::LargeDebit {
                            amount: transaction.amount,
                            threshold,
                        });
                    }
                }
                if let Some(threshold) = settings.low_balance {
                    if !account.is_credit() && crossed_below(transaction, &threshold) {
                        kinds.push(AlertKind::LowBalance {
                            balance: transaction.resulting_balance,
                            threshold,
                        });
                    }
                }
            }
            EntryKind::Credit => {
                if let Some(threshold) = settings.large_credit {
                    if at_least(&transaction.amount, &threshold) {
                        kinds.push(AlertKind::LargeCredit {
                            amount: transaction.amount,
                            threshold,
                        });
                    }
                }
            }
        }

        kinds
            .into_iter()
            .map(|kind| BalanceAlert {
                owner_id: account.owner_id,
                account_id: account.id,
                transaction_id: transaction.id,
                kind,
                raised_at: transaction.timestamp,
            })
            .collect()
    }
}

fn at_least(amount: &Money, threshold: &Money) -> bool {
    amount.try_cmp(threshold).map_or(false, |order| order.is_ge())
}

fn crossed_below(transaction: &Transaction, threshold: &Money) -> bool {
    let after = transaction.resulting_balance;
    let before = match after.checked_add(transaction.amount) {
        Ok(before) => before,
        Err(_) => return false,
    };
    let below_now = after.try_cmp(threshold).map_or(false, |order| order.is_lt());
    let below_before = before.try_cmp(threshold).map_or(true, |order| order.is_lt());
    below_now && !below_before
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::CurrencyCode;
    use crate::ledger::{AccountKind, Posting, TransactionCategory};

    fn usd(text: &str) -> Money {
        Money::parse(text, CurrencyCode::USD).unwrap()
    }

    fn funded_checking(amount: &str) -> Account {
        let mut account =
            Account::new(Uuid::new_v4(), AccountKind::Checking, CurrencyCode::USD).unwrap();
        account
            .apply_transaction(Posting::credit(
                usd(amount),
                "Opening deposit",
                TransactionCategory::Opening,
            ))
            .unwrap();
        account
    }

    #[test]
    fn debit_crossing_threshold_raises_low_balance_and_large_debit() {
        let service = AlertService::new(&Config::default());
        let mut account = funded_checking("800.00");
        let txn = account
            .apply_transaction(Posting::debit(
                usd("400.00"),
                "Rent",
                TransactionCategory::Payment,
            ))
            .unwrap();

        let alerts = service.evaluate(&account, &txn);
        assert_eq!(alerts.len(), 2);
        assert!(matches!(alerts[0].kind, AlertKind::LargeDebit { .. }));
        assert!(matches!(alerts[1].kind, AlertKind::LowBalance { .. }));
    }

    #[test]
    fn low_balance_fires_only_on_crossing() {
        let service = AlertService::new(&Config::default());
        let mut account = funded_checking("300.00");
        let txn = account
            .apply_transaction(Posting::debit(
                usd("10.00"),
                "Coffee",
                TransactionCategory::Purchase,
            ))
            .unwrap();
        assert!(service.evaluate(&account, &txn).is_empty());
    }

    #[test]
    fn owner_overrides_replace_defaults() {
        let service = AlertService::new(&Config::default());
        let mut account = funded_checking("50.00");
        service.configure(
            account.owner_id,
            AlertSettings {
                large_credit: Some(usd("1000.00")),
                ..AlertSettings::disabled()
            },
        );
        let txn = account
            .apply_transaction(Posting::credit(
                usd("1500.00"),
                "Payroll",
                TransactionCategory::Deposit,
            ))
            .unwrap();
        let alerts = service.evaluate(&account, &txn);
        assert_eq!(alerts.len(), 1);
        assert_eq!(
            alerts[0].kind,
            AlertKind::LargeCredit {
                amount: usd("1500.00"),
                threshold: usd("1000.00"),
            }
        );
    }

    #[test]
    fn foreign_currency_overrides_are_ignored() {
        let service = AlertService::new(&Config::default());
        let mut account =
            Account::new(Uuid::new_v4(), AccountKind::Checking, CurrencyCode::EUR).unwrap();
        service.configure(
            account.owner_id,
            AlertSettings {
                large_debit: Some(usd("1.00")),
                ..AlertSettings::disabled()
            },
        );
        let euros = Money::parse("900.00", CurrencyCode::EUR).unwrap();
        account
            .apply_transaction(Posting::credit(euros, "Opening", TransactionCategory::Opening))
            .unwrap();
        let txn = account
            .apply_transaction(Posting::debit(euros, "Transfer", TransactionCategory::Transfer))
            .unwrap();
        assert!(service.evaluate(&account, &txn).is_empty());
    }

    #[test]
    fn defaults_apply_in_the_account_currency() {
        let config = Config {
            large_credit_threshold_minor: Some(100_000),
            ..Config::default()
        };
        let service = AlertService::new(&config);
        let mut account =
            Account::new(Uuid::new_v4(), AccountKind::Checking, CurrencyCode::EUR).unwrap();
        let txn = account
            .apply_transaction(Posting::credit(
                Money::parse("1200.00", CurrencyCode::EUR).unwrap(),
                "Salary",
                TransactionCategory::Deposit,
            ))
            .unwrap();
        let alerts = service.evaluate(&account, &txn);
        assert_eq!(alerts.len(), 1);
        assert_eq!(
            alerts[0].kind,
            AlertKind::LargeCredit {
                amount: Money::parse("1200.00", CurrencyCode::EUR).unwrap(),
                threshold: Money::parse("1000.00", CurrencyCode::EUR).unwrap(),
            }
        );
    }
}
