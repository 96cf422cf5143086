//! Store handles
//!
//! A [`Store`] binds one URI to one opened backend store. Calls into a
//! blocking backend run on tokio's blocking pool; calls into an async backend
//! are awaited on the caller's task. Every native failure is translated by
//! the owning backend before it leaves this module.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use recordstore_core::{
    AsyncStore, Backend, BackendConfig, Error, KeyMethod, NativeResult, OpenOptions, PassKey,
    ProvisionOptions, ReleaseNumber, Result, ScanCursor, ScanRequest, SyncStore,
};
use tokio::sync::Semaphore;
use tracing::info;

use crate::registry;
use crate::scan::{KeysetScan, Scan, ScanOptions};
use crate::session::{SessionHandle, SessionOpener};
use crate::tracing::prefix;

/// How a store's backend is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Sync,
    Async,
}

#[derive(Clone)]
pub(crate) enum StoreHandle {
    Sync(Arc<dyn SyncStore>),
    Async(Arc<dyn AsyncStore>),
}

struct StoreInner {
    uri: String,
    backend: Backend,
    handle: StoreHandle,
    release: ReleaseNumber,
    closed: AtomicBool,
    /// Session slots when `max_sessions` is configured
    sessions: Option<Arc<Semaphore>>,
}

/// Handle to an opened store. Cheap to clone; all clones share one backend
/// store and one closed flag.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

/// Run a blocking backend call on tokio's blocking pool.
pub(crate) async fn blocking<T, F>(backend: &Backend, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> NativeResult<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(op).await {
        Ok(result) => result.map_err(|err| backend.translate_error(err)),
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(err) => Err(Error::unexpected(format!("Blocking backend call failed: {err}"))),
    }
}

fn session_slots(config: &BackendConfig) -> Option<Arc<Semaphore>> {
    config
        .max_sessions
        .map(|max| Arc::new(Semaphore::new(max)))
}

impl Store {
    fn new(uri: &str, backend: Backend, handle: StoreHandle, config: &BackendConfig) -> Self {
        let release = match &handle {
            StoreHandle::Sync(store) => store.release_number(),
            StoreHandle::Async(store) => store.release_number(),
        };
        Self {
            inner: Arc::new(StoreInner {
                uri: uri.to_string(),
                backend,
                handle,
                release,
                closed: AtomicBool::new(false),
                sessions: session_slots(config),
            }),
        }
    }

    /// Create a new store at `uri`.
    ///
    /// Fails `BACKEND` if no backend serves the URI scheme and `DUPLICATE`
    /// if a store already exists there and `recreate` is unset.
    pub async fn provision(uri: &str, options: ProvisionOptions) -> Result<Store> {
        options.config.validate()?;
        let backend = registry::for_uri(uri)?;
        let handle = match &backend {
            Backend::Sync(driver) => {
                let driver = driver.clone();
                let (uri, options) = (uri.to_string(), options.clone());
                StoreHandle::Sync(blocking(&backend, move || driver.provision(&uri, &options)).await?)
            }
            Backend::Async(driver) => StoreHandle::Async(
                driver
                    .provision(uri, &options)
                    .await
                    .map_err(|err| backend.translate_error(err))?,
            ),
        };
        let store = Store::new(uri, backend, handle, &options.config);
        info!(uri, release = %store.release_number(), "{} store provisioned", prefix::OPEN);
        Ok(store)
    }

    /// Open an existing store at `uri`.
    pub async fn open(uri: &str, options: OpenOptions) -> Result<Store> {
        options.config.validate()?;
        let backend = registry::for_uri(uri)?;
        let handle = match &backend {
            Backend::Sync(driver) => {
                let driver = driver.clone();
                let (uri, options) = (uri.to_string(), options.clone());
                StoreHandle::Sync(blocking(&backend, move || driver.open(&uri, &options)).await?)
            }
            Backend::Async(driver) => StoreHandle::Async(
                driver
                    .open(uri, &options)
                    .await
                    .map_err(|err| backend.translate_error(err))?,
            ),
        };
        let store = Store::new(uri, backend, handle, &options.config);
        info!(uri, release = %store.release_number(), "{} store opened", prefix::OPEN);
        Ok(store)
    }

    /// Delete the store at `uri` without opening it. Returns `false` if
    /// there was nothing to remove.
    pub async fn remove(
        uri: &str,
        release: Option<&ReleaseNumber>,
        config: &BackendConfig,
    ) -> Result<bool> {
        let backend = registry::for_uri(uri)?;
        let removed = match &backend {
            Backend::Sync(driver) => {
                let driver = driver.clone();
                let (uri, release, config) = (uri.to_string(), release.cloned(), config.clone());
                blocking(&backend, move || driver.remove(&uri, release.as_ref(), &config)).await?
            }
            Backend::Async(driver) => driver
                .remove(uri, release, config)
                .await
                .map_err(|err| backend.translate_error(err))?,
        };
        info!(uri, removed, "{} store removed", prefix::CLOSE);
        Ok(removed)
    }

    pub fn uri(&self) -> &str {
        &self.inner.uri
    }

    pub fn release_number(&self) -> &ReleaseNumber {
        &self.inner.release
    }

    pub fn backend_kind(&self) -> BackendKind {
        match self.inner.backend {
            Backend::Sync(_) => BackendKind::Sync,
            Backend::Async(_) => BackendKind::Async,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::wrapper(format!("Store is closed: {}", self.inner.uri)));
        }
        Ok(())
    }

    pub(crate) fn backend(&self) -> &Backend {
        &self.inner.backend
    }

    pub(crate) fn handle(&self) -> &StoreHandle {
        &self.inner.handle
    }

    pub(crate) fn session_slots(&self) -> Option<Arc<Semaphore>> {
        self.inner.sessions.clone()
    }

    fn translate(&self, err: recordstore_core::NativeError) -> Error {
        self.inner.backend.translate_error(err)
    }

    /// Profile used when none is named explicitly.
    pub async fn default_profile(&self) -> Result<String> {
        self.ensure_open()?;
        match self.handle() {
            StoreHandle::Sync(store) => {
                let store = store.clone();
                blocking(self.backend(), move || store.default_profile()).await
            }
            StoreHandle::Async(store) => store.default_profile().await.map_err(|e| self.translate(e)),
        }
    }

    pub async fn set_default_profile(&self, profile: &str) -> Result<()> {
        self.ensure_open()?;
        match self.handle() {
            StoreHandle::Sync(store) => {
                let (store, profile) = (store.clone(), profile.to_string());
                blocking(self.backend(), move || store.set_default_profile(&profile)).await
            }
            StoreHandle::Async(store) => store
                .set_default_profile(profile)
                .await
                .map_err(|e| self.translate(e)),
        }
    }

    /// Create a profile; a random name is generated when `name` is `None`.
    pub async fn create_profile(&self, name: Option<&str>) -> Result<String> {
        self.ensure_open()?;
        match self.handle() {
            StoreHandle::Sync(store) => {
                let (store, name) = (store.clone(), name.map(str::to_string));
                blocking(self.backend(), move || store.create_profile(name.as_deref())).await
            }
            StoreHandle::Async(store) => store
                .create_profile(name)
                .await
                .map_err(|e| self.translate(e)),
        }
    }

    pub async fn list_profiles(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        match self.handle() {
            StoreHandle::Sync(store) => {
                let store = store.clone();
                blocking(self.backend(), move || store.list_profiles()).await
            }
            StoreHandle::Async(store) => store.list_profiles().await.map_err(|e| self.translate(e)),
        }
    }

    /// Remove a profile and every entry in it. Removing the default profile
    /// fails `INPUT`; returns `false` if the profile did not exist.
    pub async fn remove_profile(&self, name: &str) -> Result<bool> {
        self.ensure_open()?;
        match self.handle() {
            StoreHandle::Sync(store) => {
                let (store, name) = (store.clone(), name.to_string());
                blocking(self.backend(), move || store.remove_profile(&name)).await
            }
            StoreHandle::Async(store) => store
                .remove_profile(name)
                .await
                .map_err(|e| self.translate(e)),
        }
    }

    /// Replace the store key, re-encrypting every value atomically.
    pub async fn rekey(&self, method: KeyMethod, pass_key: Option<PassKey>) -> Result<()> {
        self.ensure_open()?;
        match self.handle() {
            StoreHandle::Sync(store) => {
                let store = store.clone();
                blocking(self.backend(), move || store.rekey(method, pass_key.as_ref())).await?
            }
            StoreHandle::Async(store) => store
                .rekey(method, pass_key.as_ref())
                .await
                .map_err(|e| self.translate(e))?,
        }
        info!(uri = %self.inner.uri, key_method = %method, "{} store rekeyed", prefix::DB);
        Ok(())
    }

    /// Physically delete expired entries from a profile.
    pub async fn purge_expired(&self, profile: Option<&str>) -> Result<u64> {
        self.ensure_open()?;
        let purged = match self.handle() {
            StoreHandle::Sync(store) => {
                let (store, profile) = (store.clone(), profile.map(str::to_string));
                blocking(self.backend(), move || store.purge_expired(profile.as_deref())).await
            }
            StoreHandle::Async(store) => store
                .purge_expired(profile)
                .await
                .map_err(|e| self.translate(e)),
        }?;
        if purged > 0 {
            info!(uri = %self.inner.uri, purged, "{} expired entries purged", prefix::DB);
        }
        Ok(purged)
    }

    /// A session opener for `profile` (the default profile when `None`).
    pub fn session(&self, profile: Option<&str>) -> SessionOpener {
        SessionOpener::new(self.clone(), profile.map(str::to_string), false)
    }

    /// A transaction opener for `profile` (the default profile when `None`).
    pub fn transaction(&self, profile: Option<&str>) -> SessionOpener {
        SessionOpener::new(self.clone(), profile.map(str::to_string), true)
    }

    pub(crate) async fn open_session(
        &self,
        profile: Option<String>,
        transaction: bool,
    ) -> Result<SessionHandle> {
        self.ensure_open()?;
        match self.handle() {
            StoreHandle::Sync(store) => {
                let store = store.clone();
                let session = blocking(self.backend(), move || {
                    store.session(profile.as_deref(), transaction)
                })
                .await?;
                Ok(SessionHandle::Sync(session))
            }
            StoreHandle::Async(store) => {
                let session = store
                    .session(profile.as_deref(), transaction)
                    .await
                    .map_err(|e| self.translate(e))?;
                Ok(SessionHandle::Async(session))
            }
        }
    }

    fn scan_request(options: ScanOptions, cursor: ScanCursor) -> ScanRequest {
        ScanRequest {
            profile: options.profile,
            category: options.category,
            tag_filter: options.tag_filter,
            cursor,
            limit: options.limit,
            order_by: options.order_by,
            descending: options.descending,
        }
    }

    /// Offset scan: skip `offset` matching entries, then yield up to
    /// `options.limit`. Nothing runs until the first pull.
    pub fn scan(&self, options: ScanOptions, offset: usize) -> Scan {
        Scan::new(
            self.clone(),
            Self::scan_request(options, ScanCursor::Offset(offset)),
        )
    }

    /// Keyset scan: yield entries strictly after the row `last_id` in scan
    /// order (from the start when `None`). If that row has since been
    /// removed, the scan keeps to rows whose id is past `last_id` in scan
    /// direction.
    pub fn scan_keyset(&self, options: ScanOptions, last_id: Option<i64>) -> KeysetScan {
        KeysetScan::new(
            Scan::new(
                self.clone(),
                Self::scan_request(options, ScanCursor::After(last_id)),
            ),
            last_id,
        )
    }

    /// Close the store, deleting it if `remove` is set.
    ///
    /// Returns `true` when this call closed the store (and, with `remove`,
    /// deleted it). Every later operation on this store or any clone of it
    /// fails `WRAPPER`, as does a session open still waiting for a
    /// `max_sessions` slot. A second close returns `Ok(false)`.
    pub async fn close(&self, remove: bool) -> Result<bool> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        // Openers still waiting for a slot fail WRAPPER
        if let Some(slots) = &self.inner.sessions {
            slots.close();
        }
        let removed = match self.handle() {
            StoreHandle::Sync(store) => {
                let store = store.clone();
                blocking(self.backend(), move || store.close(remove)).await?
            }
            StoreHandle::Async(store) => store.close(remove).await.map_err(|e| self.translate(e))?,
        };
        info!(uri = %self.inner.uri, removed, "{} store closed", prefix::CLOSE);
        Ok(!remove || removed)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("uri", &self.inner.uri)
            .field("release", &self.inner.release)
            .field("backend", &self.backend_kind())
            .field("closed", &self.is_closed())
            .finish()
    }
}
