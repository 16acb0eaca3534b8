use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

use super::{AccountStore, Record, RecordStore};
use crate::{
    errors::{LedgerError, Result},
    ledger::Account,
};

/// Process-local store, used by tests and embedders that persist elsewhere.
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    accounts: RwLock<HashMap<Uuid, Account>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.accounts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.read().is_empty()
    }
}

impl AccountStore for InMemoryAccountStore {
    fn insert(&self, account: &Account) -> Result<()> {
        let mut accounts = self.accounts.write();
        if accounts.contains_key(&account.id) {
            return Err(LedgerError::Persistence(format!(
                "account {} already exists",
                account.id
            )));
        }
        accounts.insert(account.id, account.clone());
        Ok(())
    }

    fn load(&self, id: Uuid) -> Result<Account> {
        self.accounts
            .read()
            .get(&id)
            .cloned()
            .ok_or(LedgerError::AccountNotFound(id))
    }

    fn save(&self, account: &mut Account) -> Result<()> {
        let mut accounts = self.accounts.write();
        let stored = accounts
            .get(&account.id)
            .ok_or(LedgerError::AccountNotFound(account.id))?;
        if stored.version != account.version {
            return Err(LedgerError::ConcurrentModification {
                account: account.id,
                expected: account.version,
                found: stored.version,
            });
        }
        account.version += 1;
        accounts.insert(account.id, account.clone());
        Ok(())
    }

    fn list_for_owner(&self, owner_id: Uuid) -> Result<Vec<Account>> {
        let mut owned: Vec<Account> = self
            .accounts
            .read()
            .values()
            .filter(|account| account.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by_key(|account| account.opened_at);
        Ok(owned)
    }

    fn list_all(&self) -> Result<Vec<Account>> {
        let mut all: Vec<Account> = self.accounts.read().values().cloned().collect();
        all.sort_by_key(|account| account.opened_at);
        Ok(all)
    }
}

/// Process-local [`RecordStore`].
#[derive(Debug)]
pub struct InMemoryRecordStore<T> {
    records: RwLock<HashMap<String, T>>,
}

impl<T> InMemoryRecordStore<T> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> Default for InMemoryRecordStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Record> RecordStore<T> for InMemoryRecordStore<T> {
    fn insert(&self, record: &T) -> Result<()> {
        let key = record.key();
        let mut records = self.records.write();
        if records.contains_key(&key) {
            return Err(LedgerError::Persistence(format!(
                "{} record {} already exists",
                T::COLLECTION,
                key
            )));
        }
        records.insert(key, record.clone());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<T>> {
        Ok(self.records.read().get(key).cloned())
    }

    fn update(&self, key: &str, change: &mut dyn FnMut(&mut T) -> Result<()>) -> Result<T> {
        let mut records = self.records.write();
        let stored = records.get_mut(key).ok_or_else(|| LedgerError::RecordNotFound {
            collection: T::COLLECTION,
            key: key.to_string(),
        })?;
        let mut draft = stored.clone();
        change(&mut draft)?;
        *stored = draft.clone();
        Ok(draft)
    }

    fn list(&self) -> Result<Vec<T>> {
        Ok(self.records.read().values().cloned().collect())
    }
}
