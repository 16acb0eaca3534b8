pub mod in_memory;
pub mod json_backend;

use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::{errors::Result, ledger::Account};

/// Persistence collaborator for accounts.
///
/// `save` is a compare-and-swap on [`Account::version`]: it succeeds only when
/// the stored version equals the caller's copy, then bumps the version on both.
/// A mismatch fails with `LedgerError::ConcurrentModification` and stores nothing.
pub trait AccountStore: Send + Sync {
    fn insert(&self, account: &Account) -> Result<()>;
    fn load(&self, id: Uuid) -> Result<Account>;
    fn save(&self, account: &mut Account) -> Result<()>;
    fn list_for_owner(&self, owner_id: Uuid) -> Result<Vec<Account>>;
    fn list_all(&self) -> Result<Vec<Account>>;
}

/// A document kept by key in a [`RecordStore`].
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync {
    /// Collection name. The JSON backend uses it as the directory name.
    const COLLECTION: &'static str;

    fn key(&self) -> String;
}

/// Keyed storage for records whose state changes after creation, such as
/// external transfers and disputes.
pub trait RecordStore<T: Record>: Send + Sync {
    fn insert(&self, record: &T) -> Result<()>;
    fn get(&self, key: &str) -> Result<Option<T>>;
    /// Applies `change` to the stored record with every other writer excluded
    /// and returns the stored result. Nothing is written when `change` fails.
    fn update(&self, key: &str, change: &mut dyn FnMut(&mut T) -> Result<()>) -> Result<T>;
    fn list(&self) -> Result<Vec<T>>;
}

pub use in_memory::{InMemoryAccountStore, InMemoryRecordStore};
pub use json_backend::{
    load_schedules_from_path, save_schedules_to_path, JsonAccountStore, JsonRecordStore,
};
