//! Blocking backend traits

use std::sync::Arc;

use super::{EntryQuery, NativeError, NativeResult, OpenOptions, ProvisionOptions, ScanRequest, ScanRow};
use crate::config::BackendConfig;
use crate::entry::Entry;
use crate::error::Error;
use crate::filter::TagFilter;
use crate::keys::{KeyMethod, PassKey};
use crate::release::ReleaseNumber;

/// Blocking iterator returned by [`SyncStore::scan`].
pub type ScanIter = Box<dyn Iterator<Item = NativeResult<ScanRow>> + Send>;

/// A blocking storage driver.
pub trait SyncBackend: Send + Sync {
    /// Create a store at `uri`.
    ///
    /// Fails with a duplicate error if one already exists and
    /// `options.recreate` is unset.
    fn provision(&self, uri: &str, options: &ProvisionOptions) -> NativeResult<Arc<dyn SyncStore>>;

    /// Open an existing store at `uri`.
    fn open(&self, uri: &str, options: &OpenOptions) -> NativeResult<Arc<dyn SyncStore>>;

    /// Delete the store at `uri`. Returns `false` if there was none.
    fn remove(
        &self,
        uri: &str,
        release: Option<&ReleaseNumber>,
        config: &BackendConfig,
    ) -> NativeResult<bool>;

    /// Map a native error into the taxonomy.
    fn translate_error(&self, error: NativeError) -> Error;
}

/// An opened blocking store.
pub trait SyncStore: Send + Sync {
    fn release_number(&self) -> ReleaseNumber;

    fn default_profile(&self) -> NativeResult<String>;

    fn set_default_profile(&self, profile: &str) -> NativeResult<()>;

    /// Create a profile, generating a name when none is given.
    fn create_profile(&self, name: Option<&str>) -> NativeResult<String>;

    fn list_profiles(&self) -> NativeResult<Vec<String>>;

    /// Returns `false` if the profile did not exist.
    fn remove_profile(&self, name: &str) -> NativeResult<bool>;

    /// Re-encrypt every value under new key material, atomically.
    fn rekey(&self, method: KeyMethod, pass_key: Option<&PassKey>) -> NativeResult<()>;

    /// Open a session on `profile` (the store default when `None`).
    fn session(&self, profile: Option<&str>, transaction: bool) -> NativeResult<Box<dyn SyncSession>>;

    /// Start a lazy scan. Implementations defer all work, including
    /// validation of `order_by`, to the first `next()`.
    fn scan(&self, request: ScanRequest) -> NativeResult<ScanIter>;

    /// Physically delete expired entries. Returns the number removed.
    fn purge_expired(&self, profile: Option<&str>) -> NativeResult<u64>;

    /// Release resources, deleting the store if `remove` is set.
    fn close(&self, remove: bool) -> NativeResult<bool>;
}

/// A blocking session. Dropping it without `commit` rolls back.
pub trait SyncSession: Send {
    fn count(&mut self, category: Option<&str>, tag_filter: Option<&TagFilter>) -> NativeResult<u64>;

    fn fetch(&mut self, category: &str, name: &str, for_update: bool) -> NativeResult<Option<Entry>>;

    fn fetch_all(&mut self, query: &EntryQuery) -> NativeResult<Vec<Entry>>;

    fn insert(&mut self, entry: &Entry) -> NativeResult<()>;

    fn replace(&mut self, entry: &Entry) -> NativeResult<()>;

    fn remove(&mut self, category: &str, name: &str) -> NativeResult<()>;

    fn remove_all(
        &mut self,
        category: Option<&str>,
        tag_filter: Option<&TagFilter>,
    ) -> NativeResult<u64>;

    fn commit(&mut self) -> NativeResult<()>;

    fn rollback(&mut self) -> NativeResult<()>;

    fn close(&mut self) -> NativeResult<()>;
}
