use std::{env, path::PathBuf, process, sync::Arc};

use bank_ledger::{
    config::ConfigManager,
    core::services::{LedgerBalanceLookup, LedgerService, PaymentProcessor},
    currency::{CurrencyCode, Money},
    init,
    ledger::{AccountKind, DisputeOutcome, ExternalRail},
    storage::{
        load_schedules_from_path, save_schedules_to_path, AccountStore, JsonAccountStore,
        JsonRecordStore,
    },
};
use chrono::{NaiveDate, Utc};
use uuid::Uuid;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn main() {
    init();

    if let Err(err) = run() {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}

fn run() -> CliResult<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first() else {
        print_usage();
        process::exit(1);
    };

    let config = ConfigManager::new()?.load()?;
    let accounts = JsonAccountStore::new_default()?;
    let root = accounts.root().to_path_buf();
    let store: Arc<dyn AccountStore> = Arc::new(accounts);
    let ledger = Arc::new(
        LedgerService::new(store.clone(), config.clone())
            .with_transfer_store(Arc::new(JsonRecordStore::new(Some(root.clone()))?))
            .with_dispute_store(Arc::new(JsonRecordStore::new(Some(root))?))
            .with_reference_history()?,
    );

    match (command.as_str(), &args[1..]) {
        ("open", [owner, kind, deposit, rest @ ..]) => {
            let currency = match rest.first() {
                Some(code) => CurrencyCode::new(code)?,
                None => config.currency,
            };
            let kind = parse_kind(kind, currency)?;
            let deposit = Money::parse(deposit, currency)?;
            let account = ledger.open_account(parse_id(owner)?, kind, deposit)?;
            println!("{}", serde_json::to_string_pretty(&account)?);
        }
        ("show", [account]) => {
            let account = ledger.account(parse_id(account)?)?;
            println!("{}", serde_json::to_string_pretty(&account)?);
        }
        ("deposit", [account, amount]) => {
            let id = parse_id(account)?;
            let currency = ledger.account(id)?.currency();
            let txn = ledger.deposit(id, Money::parse(amount, currency)?, "Deposit")?;
            println!("{}", serde_json::to_string_pretty(&txn)?);
        }
        ("transfer", [from, to, amount]) => {
            let from = parse_id(from)?;
            let currency = ledger.account(from)?.currency();
            let receipt =
                ledger.transfer(from, parse_id(to)?, Money::parse(amount, currency)?, None)?;
            println!("Transferred {} ({})", receipt.amount, receipt.reference);
        }
        ("deposit-check", [owner, account, amount]) => {
            let id = parse_id(account)?;
            let currency = ledger.account(id)?.currency();
            let amount = Money::parse(amount, currency)?;
            let deposit = ledger.deposit_check(parse_id(owner)?, id, amount)?;
            println!(
                "Deposited {} ({}), available {}",
                deposit.transaction.amount,
                deposit.transaction.reference.unwrap_or_default(),
                deposit.available_on
            );
        }
        ("send", [account, amount, rail, memo]) => {
            let id = parse_id(account)?;
            let currency = ledger.account(id)?.currency();
            let rail = parse_rail(rail)?;
            let amount = Money::parse(amount, currency)?;
            let transfer = ledger.send_external(id, amount, rail, memo.as_str())?;
            println!("{}", serde_json::to_string_pretty(&transfer)?);
        }
        ("settle", [reference]) => {
            let transfer = ledger.settle_external(reference)?;
            println!("{} is {:?}", transfer.reference, transfer.status);
        }
        ("return", [reference, reason]) => {
            let transfer = ledger.return_external(reference, reason)?;
            println!("{} is {:?}", transfer.reference, transfer.status);
        }
        ("dispute", [owner, account, transaction, reason, rest @ ..]) => {
            let provisional = rest.first().is_some_and(|flag| flag == "--provisional");
            let dispute = ledger.open_dispute(
                parse_id(owner)?,
                parse_id(account)?,
                parse_id(transaction)?,
                reason,
                provisional,
            )?;
            println!("{}", serde_json::to_string_pretty(&dispute)?);
        }
        ("resolve", [dispute, outcome]) => {
            let outcome = match outcome.as_str() {
                "customer" => DisputeOutcome::Customer,
                "merchant" => DisputeOutcome::Merchant,
                other => return Err(format!("unknown dispute outcome `{}`", other).into()),
            };
            let dispute = ledger.resolve_dispute(parse_id(dispute)?, outcome)?;
            println!("Dispute {} {}", dispute.id, dispute.status);
        }
        ("run-due", [path, rest @ ..]) => {
            let path = PathBuf::from(path);
            let today = match rest.first() {
                Some(date) => NaiveDate::parse_from_str(date, "%Y-%m-%d")?,
                None => Utc::now().date_naive(),
            };
            let mut schedules = load_schedules_from_path(&path)?;
            let lookup = Arc::new(LedgerBalanceLookup::new(store, &config));
            let processor = PaymentProcessor::new(ledger, lookup);
            let summary = processor.run_due_schedules(&mut schedules, today);
            save_schedules_to_path(&schedules, &path)?;
            println!(
                "Ran {} schedule(s) for {}: {} succeeded, {} failed, {} skipped",
                summary.total(),
                today,
                summary.succeeded,
                summary.failed,
                summary.skipped
            );
        }
        _ => {
            print_usage();
            process::exit(1);
        }
    }

    Ok(())
}

fn parse_id(raw: &str) -> CliResult<Uuid> {
    Ok(Uuid::parse_str(raw)?)
}

fn parse_kind(raw: &str, currency: CurrencyCode) -> CliResult<AccountKind> {
    match raw.split_once(':') {
        Some(("credit", limit)) => Ok(AccountKind::credit(Money::parse(limit, currency)?)),
        None if raw == "checking" => Ok(AccountKind::Checking),
        None if raw == "savings" => Ok(AccountKind::savings()),
        _ => Err(format!("unknown account kind `{}`", raw).into()),
    }
}

fn parse_rail(raw: &str) -> CliResult<ExternalRail> {
    match raw {
        "ach" => Ok(ExternalRail::Ach),
        "wire" => Ok(ExternalRail::Wire),
        "bill" => Ok(ExternalRail::BillPay),
        _ => Err(format!("unknown rail `{}`", raw).into()),
    }
}

fn print_usage() {
    const COMMANDS: &[&str] = &[
        "open <owner-id> <checking|savings|credit:LIMIT> <deposit> [currency]",
        "show <account-id>",
        "deposit <account-id> <amount>",
        "deposit-check <owner-id> <account-id> <amount>",
        "transfer <from-id> <to-id> <amount>",
        "send <account-id> <amount> <ach|wire|bill> <memo>",
        "settle <reference>",
        "return <reference> <reason>",
        "dispute <owner-id> <account-id> <transaction-id> <reason> [--provisional]",
        "resolve <dispute-id> <customer|merchant>",
        "run-due <schedules.json> [YYYY-MM-DD]",
    ];
    eprintln!("Usage:");
    for command in COMMANDS {
        eprintln!("  bank_ledger_cli {}", command);
    }
    eprintln!();
    eprintln!("Data lives in $BANK_LEDGER_HOME (default ~/.bank_ledger).");
}
