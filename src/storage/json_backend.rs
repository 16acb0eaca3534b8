use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    marker::PhantomData,
    path::{Path, PathBuf},
};

use fs2::FileExt;
use uuid::Uuid;

use super::{AccountStore, Record, RecordStore};
use crate::{
    errors::{LedgerError, Result},
    ledger::{Account, RecurringSchedule},
    utils::{ensure_dir, PathResolver},
};

const DOCUMENT_EXTENSION: &str = "json";
const LOCK_EXTENSION: &str = "lock";
const TMP_SUFFIX: &str = "tmp";

/// Stores one pretty-printed JSON document per account under `<root>/accounts`.
///
/// Every write holds an exclusive advisory lock on the account's `.lock`
/// sidecar, so the compare-and-swap in `save` also holds between processes
/// and between separate store instances. Documents are staged to a uniquely
/// named temporary file and renamed into place; readers never see a partial
/// document.
#[derive(Debug)]
pub struct JsonAccountStore {
    root: PathBuf,
    accounts_dir: PathBuf,
}

impl JsonAccountStore {
    pub fn new(root: Option<PathBuf>) -> Result<Self> {
        let root = PathResolver::resolve_base(root);
        ensure_dir(&root)?;
        let accounts_dir = PathResolver::accounts_dir_in(&root);
        ensure_dir(&accounts_dir)?;
        Ok(Self { root, accounts_dir })
    }

    pub fn new_default() -> Result<Self> {
        Self::new(None)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn account_path(&self, id: Uuid) -> PathBuf {
        self.accounts_dir
            .join(format!("{}.{}", id, DOCUMENT_EXTENSION))
    }

    pub fn lock_path(&self, id: Uuid) -> PathBuf {
        self.accounts_dir.join(format!("{}.{}", id, LOCK_EXTENSION))
    }

    fn read_account(&self, id: Uuid) -> Result<Account> {
        read_document(&self.account_path(id))?.ok_or(LedgerError::AccountNotFound(id))
    }
}

impl AccountStore for JsonAccountStore {
    fn insert(&self, account: &Account) -> Result<()> {
        let _lock = FileLock::acquire(&self.lock_path(account.id))?;
        let path = self.account_path(account.id);
        if path.exists() {
            return Err(LedgerError::Persistence(format!(
                "account {} already exists",
                account.id
            )));
        }
        write_document(&path, account)
    }

    fn load(&self, id: Uuid) -> Result<Account> {
        self.read_account(id)
    }

    fn save(&self, account: &mut Account) -> Result<()> {
        let _lock = FileLock::acquire(&self.lock_path(account.id))?;
        let stored = self.read_account(account.id)?;
        if stored.version != account.version {
            return Err(LedgerError::ConcurrentModification {
                account: account.id,
                expected: account.version,
                found: stored.version,
            });
        }
        account.version += 1;
        if let Err(err) = write_document(&self.account_path(account.id), account) {
            account.version -= 1;
            return Err(err);
        }
        Ok(())
    }

    fn list_for_owner(&self, owner_id: Uuid) -> Result<Vec<Account>> {
        let mut owned = self.list_all()?;
        owned.retain(|account| account.owner_id == owner_id);
        Ok(owned)
    }

    fn list_all(&self) -> Result<Vec<Account>> {
        let mut accounts: Vec<Account> = read_collection(&self.accounts_dir)?;
        accounts.sort_by_key(|account| account.opened_at);
        Ok(accounts)
    }
}

/// One JSON document per record under `<root>/<collection>`, with the same
/// locking and staging rules as [`JsonAccountStore`].
#[derive(Debug)]
pub struct JsonRecordStore<T> {
    dir: PathBuf,
    _records: PhantomData<fn() -> T>,
}

impl<T: Record> JsonRecordStore<T> {
    pub fn new(root: Option<PathBuf>) -> Result<Self> {
        let root = PathResolver::resolve_base(root);
        let dir = root.join(T::COLLECTION);
        ensure_dir(&dir)?;
        Ok(Self {
            dir,
            _records: PhantomData,
        })
    }

    pub fn record_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.dir.join(format!("{}.{}", checked_key(key)?, DOCUMENT_EXTENSION)))
    }

    fn lock_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.dir.join(format!("{}.{}", checked_key(key)?, LOCK_EXTENSION)))
    }
}

impl<T: Record> RecordStore<T> for JsonRecordStore<T> {
    fn insert(&self, record: &T) -> Result<()> {
        let key = record.key();
        let _lock = FileLock::acquire(&self.lock_path(&key)?)?;
        let path = self.record_path(&key)?;
        if path.exists() {
            return Err(LedgerError::Persistence(format!(
                "{} record {} already exists",
                T::COLLECTION,
                key
            )));
        }
        write_document(&path, record)
    }

    fn get(&self, key: &str) -> Result<Option<T>> {
        read_document(&self.record_path(key)?)
    }

    fn update(&self, key: &str, change: &mut dyn FnMut(&mut T) -> Result<()>) -> Result<T> {
        let _lock = FileLock::acquire(&self.lock_path(key)?)?;
        let path = self.record_path(key)?;
        let mut record: T = read_document(&path)?.ok_or_else(|| LedgerError::RecordNotFound {
            collection: T::COLLECTION,
            key: key.to_string(),
        })?;
        change(&mut record)?;
        write_document(&path, &record)?;
        Ok(record)
    }

    fn list(&self) -> Result<Vec<T>> {
        read_collection(&self.dir)
    }
}

/// Loads a list of recurring schedules from a JSON array file.
pub fn load_schedules_from_path(path: &Path) -> Result<Vec<RecurringSchedule>> {
    Ok(read_document(path)?.unwrap_or_default())
}

/// Writes schedules back atomically by staging to a temporary file.
pub fn save_schedules_to_path(schedules: &[RecurringSchedule], path: &Path) -> Result<()> {
    write_document(path, &schedules)
}

/// Exclusive advisory lock on a sidecar file, released on drop.
struct FileLock {
    file: File,
}

impl FileLock {
    fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        FileExt::lock_exclusive(&file)?;
        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::warn!(error = %err, "failed to release file lock");
        }
    }
}

/// Record keys become file names, so only a conservative alphabet is accepted.
fn checked_key(key: &str) -> Result<&str> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(key)
    } else {
        Err(LedgerError::Persistence(format!("invalid record key `{}`", key)))
    }
}

fn read_document<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&data)?))
}

fn read_collection<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut documents = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(DOCUMENT_EXTENSION) {
            continue;
        }
        let contents = fs::read_to_string(&path)?;
        match serde_json::from_str(&contents) {
            Ok(document) => documents.push(document),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping unreadable file");
            }
        }
    }
    Ok(documents)
}

fn write_document<T: serde::Serialize + ?Sized>(path: &Path, document: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(document)?;
    let tmp = tmp_path(path);
    if let Err(err) = write_atomic(&tmp, &json).and_then(|()| Ok(fs::rename(&tmp, path)?)) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    Ok(())
}

/// `<name>.<ext>.<random>.tmp`, unique per write so concurrent writers never
/// share a staging file.
fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let nonce = Uuid::new_v4().simple().to_string();
    let ext = match path.extension().and_then(|ext| ext.to_str()) {
        Some(existing) => format!("{}.{}.{}", existing, nonce, TMP_SUFFIX),
        None => format!("{}.{}", nonce, TMP_SUFFIX),
    };
    tmp.set_extension(ext);
    tmp
}

fn write_atomic(path: &Path, data: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let mut file = File::create(path)?;
    file.write_all(data.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::{CurrencyCode, Money};
    use crate::ledger::{AccountKind, Posting, TransactionCategory};
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        id: String,
        hits: u32,
    }

    impl Record for Counter {
        const COLLECTION: &'static str = "counters";

        fn key(&self) -> String {
            self.id.clone()
        }
    }

    #[test]
    fn account_roundtrips_through_disk() {
        let temp = tempdir().unwrap();
        let store = JsonAccountStore::new(Some(temp.path().to_path_buf())).unwrap();
        let mut account =
            Account::new(Uuid::new_v4(), AccountKind::savings(), CurrencyCode::USD).unwrap();
        account
            .apply_transaction(Posting::credit(
                Money::parse("12.34", CurrencyCode::USD).unwrap(),
                "Opening deposit",
                TransactionCategory::Opening,
            ))
            .unwrap();
        store.insert(&account).unwrap();
        assert!(store.account_path(account.id).exists());

        let loaded = store.load(account.id).unwrap();
        assert_eq!(loaded, account);
        assert_eq!(loaded.replay_balance().unwrap(), loaded.balance());
    }

    #[test]
    fn save_enforces_version() {
        let temp = tempdir().unwrap();
        let store = JsonAccountStore::new(Some(temp.path().to_path_buf())).unwrap();
        let account =
            Account::new(Uuid::new_v4(), AccountKind::Checking, CurrencyCode::USD).unwrap();
        store.insert(&account).unwrap();

        let mut fresh = store.load(account.id).unwrap();
        let mut stale = store.load(account.id).unwrap();
        store.save(&mut fresh).unwrap();
        assert!(matches!(
            store.save(&mut stale),
            Err(LedgerError::ConcurrentModification { .. })
        ));
        assert_eq!(store.load(account.id).unwrap().version, 1);
    }

    #[test]
    fn list_skips_foreign_and_corrupt_files() {
        let temp = tempdir().unwrap();
        let store = JsonAccountStore::new(Some(temp.path().to_path_buf())).unwrap();
        let owner = Uuid::new_v4();
        let mine = Account::new(owner, AccountKind::Checking, CurrencyCode::USD).unwrap();
        let theirs =
            Account::new(Uuid::new_v4(), AccountKind::Checking, CurrencyCode::USD).unwrap();
        store.insert(&mine).unwrap();
        store.insert(&theirs).unwrap();
        fs::write(temp.path().join("accounts").join("broken.json"), "{").unwrap();

        let listed = store.list_for_owner(owner).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, mine.id);
        assert_eq!(store.list_all().unwrap().len(), 2);
    }

    #[test]
    fn staging_files_are_unique_and_cleaned_up() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("doc.json");
        assert_ne!(tmp_path(&path), tmp_path(&path));

        write_document(&path, &vec![1, 2, 3]).unwrap();
        let leftovers: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn record_updates_from_separate_instances_are_serialized() {
        let temp = tempdir().unwrap();
        let root = temp.path().to_path_buf();
        let first: Arc<JsonRecordStore<Counter>> =
            Arc::new(JsonRecordStore::new(Some(root.clone())).unwrap());
        let second: Arc<JsonRecordStore<Counter>> =
            Arc::new(JsonRecordStore::new(Some(root)).unwrap());
        first
            .insert(&Counter {
                id: "c-1".into(),
                hits: 0,
            })
            .unwrap();

        let handles: Vec<_> = [first.clone(), second]
            .into_iter()
            .map(|store| {
                thread::spawn(move || {
                    for _ in 0..50 {
                        store
                            .update("c-1", &mut |counter: &mut Counter| {
                                counter.hits += 1;
                                Ok(())
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(first.get("c-1").unwrap().unwrap().hits, 100);
    }

    #[test]
    fn record_keys_must_be_file_safe() {
        let temp = tempdir().unwrap();
        let store: JsonRecordStore<Counter> =
            JsonRecordStore::new(Some(temp.path().to_path_buf())).unwrap();
        assert!(store.get("../escape").is_err());
        assert!(store.get("TRN-12345678-ABCDEF01").unwrap().is_none());
    }

    #[test]
    fn missing_schedule_file_is_empty() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("schedules.json");
        assert!(load_schedules_from_path(&path).unwrap().is_empty());
        save_schedules_to_path(&[], &path).unwrap();
        assert!(path.exists());
    }
}
