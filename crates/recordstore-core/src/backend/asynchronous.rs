//! Natively async backend traits
//!
//! Mirrors of the blocking traits in [`super::sync`], made object safe with
//! `async_trait`.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use super::{EntryQuery, NativeError, NativeResult, OpenOptions, ProvisionOptions, ScanRequest, ScanRow};
use crate::config::BackendConfig;
use crate::entry::Entry;
use crate::error::Error;
use crate::filter::TagFilter;
use crate::keys::{KeyMethod, PassKey};
use crate::release::ReleaseNumber;

/// Stream returned by [`AsyncStore::scan`].
pub type ScanStream = BoxStream<'static, NativeResult<ScanRow>>;

#[async_trait]
pub trait AsyncBackend: Send + Sync {
    async fn provision(
        &self,
        uri: &str,
        options: &ProvisionOptions,
    ) -> NativeResult<Arc<dyn AsyncStore>>;

    async fn open(&self, uri: &str, options: &OpenOptions) -> NativeResult<Arc<dyn AsyncStore>>;

    async fn remove(
        &self,
        uri: &str,
        release: Option<&ReleaseNumber>,
        config: &BackendConfig,
    ) -> NativeResult<bool>;

    fn translate_error(&self, error: NativeError) -> Error;
}

#[async_trait]
pub trait AsyncStore: Send + Sync {
    fn release_number(&self) -> ReleaseNumber;

    async fn default_profile(&self) -> NativeResult<String>;

    async fn set_default_profile(&self, profile: &str) -> NativeResult<()>;

    async fn create_profile(&self, name: Option<&str>) -> NativeResult<String>;

    async fn list_profiles(&self) -> NativeResult<Vec<String>>;

    async fn remove_profile(&self, name: &str) -> NativeResult<bool>;

    async fn rekey(&self, method: KeyMethod, pass_key: Option<&PassKey>) -> NativeResult<()>;

    async fn session(
        &self,
        profile: Option<&str>,
        transaction: bool,
    ) -> NativeResult<Box<dyn AsyncSession>>;

    /// Start a lazy scan; errors surface from the first poll.
    fn scan(&self, request: ScanRequest) -> ScanStream;

    async fn purge_expired(&self, profile: Option<&str>) -> NativeResult<u64>;

    async fn close(&self, remove: bool) -> NativeResult<bool>;
}

#[async_trait]
pub trait AsyncSession: Send {
    async fn count(
        &mut self,
        category: Option<&str>,
        tag_filter: Option<&TagFilter>,
    ) -> NativeResult<u64>;

    async fn fetch(
        &mut self,
        category: &str,
        name: &str,
        for_update: bool,
    ) -> NativeResult<Option<Entry>>;

    async fn fetch_all(&mut self, query: &EntryQuery) -> NativeResult<Vec<Entry>>;

    async fn insert(&mut self, entry: &Entry) -> NativeResult<()>;

    async fn replace(&mut self, entry: &Entry) -> NativeResult<()>;

    async fn remove(&mut self, category: &str, name: &str) -> NativeResult<()>;

    async fn remove_all(
        &mut self,
        category: Option<&str>,
        tag_filter: Option<&TagFilter>,
    ) -> NativeResult<u64>;

    async fn commit(&mut self) -> NativeResult<()>;

    async fn rollback(&mut self) -> NativeResult<()>;

    async fn close(&mut self) -> NativeResult<()>;
}
