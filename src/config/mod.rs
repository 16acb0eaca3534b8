use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    currency::{CurrencyCode, Money},
    errors::Result,
    utils::{ensure_dir, PathResolver},
};

const TMP_SUFFIX: &str = "tmp";

/// Ledger policy.
///
/// Monetary fields are minor units, applied in the currency of the account
/// they act on. `currency` is the currency for accounts opened without an
/// explicit one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub currency: CurrencyCode,
    pub allow_overdraft: bool,
    pub max_commit_attempts: u32,
    pub retry_backoff_ms: u64,
    pub wire_fee_minor: i64,
    pub atm_withdrawal_limit_minor: i64,
    pub branch_withdrawal_limit_minor: i64,
    pub cash_advance_limit_minor: i64,
    pub check_deposit_min_minor: i64,
    pub check_deposit_max_minor: i64,
    pub check_deposit_daily_limit_minor: i64,
    pub check_deposit_monthly_limit_minor: i64,
    pub minimum_payment_floor_minor: i64,
    pub minimum_payment_rate_bp: u32,
    pub low_balance_threshold_minor: Option<i64>,
    pub large_debit_threshold_minor: Option<i64>,
    /// Off unless set.
    pub large_credit_threshold_minor: Option<i64>,
    pub max_parallel_schedules: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            currency: CurrencyCode::USD,
            allow_overdraft: false,
            max_commit_attempts: 3,
            retry_backoff_ms: 10,
            wire_fee_minor: 3_000,
            atm_withdrawal_limit_minor: 50_000,
            branch_withdrawal_limit_minor: 1_000_000,
            cash_advance_limit_minor: 300_000,
            check_deposit_min_minor: 1,
            check_deposit_max_minor: 1_000_000,
            check_deposit_daily_limit_minor: 500_000,
            check_deposit_monthly_limit_minor: 2_000_000,
            minimum_payment_floor_minor: 2_500,
            minimum_payment_rate_bp: 200,
            low_balance_threshold_minor: Some(50_000),
            large_debit_threshold_minor: Some(20_000),
            large_credit_threshold_minor: None,
            max_parallel_schedules: 4,
        }
    }
}

/// Bounds on mobile check deposits for one owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckDepositLimits {
    pub min: Money,
    pub max: Money,
    pub daily: Money,
    pub monthly: Money,
}

impl Config {
    pub fn wire_fee(&self, currency: CurrencyCode) -> Money {
        Money::from_minor(self.wire_fee_minor, currency)
    }

    pub fn minimum_payment_floor(&self, currency: CurrencyCode) -> Money {
        Money::from_minor(self.minimum_payment_floor_minor, currency)
    }

    pub fn atm_withdrawal_limit(&self, currency: CurrencyCode) -> Money {
        Money::from_minor(self.atm_withdrawal_limit_minor, currency)
    }

    pub fn branch_withdrawal_limit(&self, currency: CurrencyCode) -> Money {
        Money::from_minor(self.branch_withdrawal_limit_minor, currency)
    }

    pub fn cash_advance_limit(&self, currency: CurrencyCode) -> Money {
        Money::from_minor(self.cash_advance_limit_minor, currency)
    }

    pub fn check_deposit_limits(&self, currency: CurrencyCode) -> CheckDepositLimits {
        CheckDepositLimits {
            min: Money::from_minor(self.check_deposit_min_minor, currency),
            max: Money::from_minor(self.check_deposit_max_minor, currency),
            daily: Money::from_minor(self.check_deposit_daily_limit_minor, currency),
            monthly: Money::from_minor(self.check_deposit_monthly_limit_minor, currency),
        }
    }

    pub fn low_balance_threshold(&self, currency: CurrencyCode) -> Option<Money> {
        self.low_balance_threshold_minor
            .map(|minor| Money::from_minor(minor, currency))
    }

    pub fn large_debit_threshold(&self, currency: CurrencyCode) -> Option<Money> {
        self.large_debit_threshold_minor
            .map(|minor| Money::from_minor(minor, currency))
    }

    pub fn large_credit_threshold(&self, currency: CurrencyCode) -> Option<Money> {
        self.large_credit_threshold_minor
            .map(|minor| Money::from_minor(minor, currency))
    }

    /// Linear backoff before the given retry attempt (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(attempt)))
    }

    pub fn commit_attempts(&self) -> u32 {
        self.max_commit_attempts.max(1)
    }

    pub fn worker_count(&self) -> usize {
        self.max_parallel_schedules.max(1)
    }
}

pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        Self::from_base(PathResolver::base_dir())
    }

    pub fn with_base_dir(base: PathBuf) -> Result<Self> {
        Self::from_base(base)
    }

    fn from_base(base: PathBuf) -> Result<Self> {
        ensure_dir(&base)?;
        ensure_dir(&PathResolver::config_dir_in(&base))?;
        Ok(Self {
            path: PathResolver::config_file_in(&base),
        })
    }

    /// Loads the stored configuration, falling back to defaults when absent.
    pub fn load(&self) -> Result<Config> {
        if self.path.exists() {
            let data = fs::read_to_string(&self.path)?;
            Ok(serde_json::from_str(&data)?)
        } else {
            tracing::debug!(path = %self.path.display(), "no config file, using defaults");
            Ok(Config::default())
        }
    }

    pub fn save(&self, config: &Config) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            ensure_dir(parent)?;
        }
        let json = serde_json::to_string_pretty(config)?;
        let tmp = tmp_path(&self.path);
        write_atomic(&tmp, &json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let ext = match path.extension().and_then(|ext| ext.to_str()) {
        Some(existing) => format!("{}.{}", existing, TMP_SUFFIX),
        None => TMP_SUFFIX.to_string(),
    };
    tmp.set_extension(ext);
    tmp
}

fn write_atomic(path: &Path, data: &str) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(data.as_bytes())?;
    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_published_fee_schedule() {
        let config = Config::default();
        let usd = CurrencyCode::USD;
        assert_eq!(config.wire_fee(usd).to_string(), "30.00 USD");
        assert_eq!(config.atm_withdrawal_limit(usd).to_string(), "500.00 USD");
        assert_eq!(config.minimum_payment_floor(usd).to_string(), "25.00 USD");
        assert_eq!(config.check_deposit_limits(usd).daily.to_string(), "5000.00 USD");
        assert_eq!(config.large_credit_threshold(usd), None);
        assert_eq!(config.backoff_for(3), Duration::from_millis(30));
    }

    #[test]
    fn policy_amounts_follow_the_account_currency() {
        let config = Config::default();
        assert_eq!(
            config.wire_fee(CurrencyCode::EUR).to_string(),
            "30.00 EUR"
        );
        assert_eq!(
            config.branch_withdrawal_limit(CurrencyCode::JPY).minor_units(),
            1_000_000
        );
    }

    #[test]
    fn load_returns_defaults_when_missing() {
        let temp = tempdir().unwrap();
        let manager = ConfigManager::with_base_dir(temp.path().to_path_buf()).unwrap();
        assert_eq!(manager.load().unwrap(), Config::default());
    }

    #[test]
    fn save_then_load_preserves_changes() {
        let temp = tempdir().unwrap();
        let manager = ConfigManager::with_base_dir(temp.path().to_path_buf()).unwrap();
        let config = Config {
            currency: CurrencyCode::EUR,
            max_commit_attempts: 7,
            ..Config::default()
        };
        manager.save(&config).unwrap();
        assert!(manager.path().exists());
        assert_eq!(manager.load().unwrap(), config);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let temp = tempdir().unwrap();
        let manager = ConfigManager::with_base_dir(temp.path().to_path_buf()).unwrap();
        fs::write(manager.path(), r#"{ "wire_fee_minor": 4500 }"#).unwrap();
        let loaded = manager.load().unwrap();
        assert_eq!(loaded.wire_fee_minor, 4500);
        assert_eq!(loaded.max_commit_attempts, 3);
    }
}
