//! In-memory storage backend (`memory://<name>`)
//!
//! A natively async backend that keeps every store in process memory. Stores
//! live in the backend instance's database map, so a store provisioned at
//! `memory://wallet` can be closed and reopened for as long as the backend
//! is registered. Key material is verified on open exactly like a persistent
//! backend, but values are held in memory unencrypted.
//!
//! Useful for:
//! - Unit and integration testing
//! - Short-lived agents that don't need persistence

mod error;
mod session;
mod state;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use tokio::sync::RwLock;
use tracing::info;

pub use error::MemoryError;
pub use session::MemorySession;

use crate::backend::{
    passthrough, unexpected, AsyncBackend, AsyncSession, AsyncStore, NativeError, NativeResult,
    OpenOptions, OrderBy, ProvisionOptions, ScanRequest, ScanRow, ScanStream,
};
use crate::config::BackendConfig;
use crate::error::Error;
use crate::keys::{KeyMethod, KeyRecord, PassKey};
use crate::release::ReleaseNumber;
use state::{ProfileData, Selection};

/// URI scheme served by [`MemoryBackend`].
pub const SCHEME: &str = "memory";

/// The only schema release the memory backend speaks.
pub fn current_release() -> ReleaseNumber {
    ReleaseNumber::of(0, &[1])
}

type Databases = Arc<Mutex<HashMap<String, Arc<MemoryDatabase>>>>;

pub(crate) struct MemoryDatabase {
    state: RwLock<MemoryState>,
}

pub(crate) struct MemoryState {
    release: ReleaseNumber,
    key: KeyRecord,
    default_profile: String,
    profiles: BTreeMap<String, ProfileData>,
    next_id: i64,
}

impl MemoryDatabase {
    fn new(release: ReleaseNumber, key: KeyRecord, default_profile: String) -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(default_profile.clone(), ProfileData::default());
        Self {
            state: RwLock::new(MemoryState {
                release,
                key,
                default_profile,
                profiles,
                next_id: 1,
            }),
        }
    }
}

fn check_uri(uri: &str) -> Result<(), MemoryError> {
    match uri.split_once("://") {
        Some((SCHEME, _)) => Ok(()),
        _ => Err(MemoryError::InvalidUri(uri.to_string())),
    }
}

fn generated_profile_name() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Backend holding stores in process memory.
#[derive(Default, Clone)]
pub struct MemoryBackend {
    databases: Databases,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stores currently held (for testing).
    pub fn len(&self) -> usize {
        self.databases.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.databases.lock().is_empty()
    }
}

#[async_trait]
impl AsyncBackend for MemoryBackend {
    async fn provision(
        &self,
        uri: &str,
        options: &ProvisionOptions,
    ) -> NativeResult<Arc<dyn AsyncStore>> {
        check_uri(uri)?;
        let release = current_release();
        if let Some(requested) = &options.release_number {
            if *requested != release {
                return Err(MemoryError::UnsupportedRelease(requested.to_string()).into());
            }
        }

        let method = KeyMethod::resolve(options.key_method, options.pass_key.as_ref());
        let (key, _) = KeyRecord::create(method, options.pass_key.as_ref())?;
        let profile = options.profile.clone().unwrap_or_else(generated_profile_name);
        let db = Arc::new(MemoryDatabase::new(release.clone(), key, profile.clone()));

        {
            let mut databases = self.databases.lock();
            if databases.contains_key(uri) && !options.recreate {
                return Err(MemoryError::StoreExists(uri.to_string()).into());
            }
            databases.insert(uri.to_string(), db.clone());
        }

        info!(uri, %release, key_method = %method, "provisioned memory store");
        Ok(Arc::new(MemoryStore {
            uri: uri.to_string(),
            db,
            databases: self.databases.clone(),
            profile: Some(profile),
            release,
        }))
    }

    async fn open(&self, uri: &str, options: &OpenOptions) -> NativeResult<Arc<dyn AsyncStore>> {
        check_uri(uri)?;
        let db = self
            .databases
            .lock()
            .get(uri)
            .cloned()
            .ok_or_else(|| MemoryError::StoreNotFound(uri.to_string()))?;

        let release = {
            let state = db.state.read().await;
            if let Some(target) = &options.target_release {
                if *target > state.release {
                    return Err(MemoryError::UnsupportedRelease(target.to_string()).into());
                }
            }
            state.key.unlock(options.key_method, options.pass_key.as_ref())?;
            if let Some(profile) = &options.profile {
                if !state.profiles.contains_key(profile) {
                    return Err(MemoryError::ProfileNotFound(profile.clone()).into());
                }
            }
            state.release.clone()
        };

        info!(uri, %release, "opened memory store");
        Ok(Arc::new(MemoryStore {
            uri: uri.to_string(),
            db,
            databases: self.databases.clone(),
            profile: options.profile.clone(),
            release,
        }))
    }

    async fn remove(
        &self,
        uri: &str,
        _release: Option<&ReleaseNumber>,
        _config: &BackendConfig,
    ) -> NativeResult<bool> {
        check_uri(uri)?;
        Ok(self.databases.lock().remove(uri).is_some())
    }

    fn translate_error(&self, error: NativeError) -> Error {
        match passthrough(error) {
            Ok(err) => err,
            Err(native) => match native.downcast::<MemoryError>() {
                Ok(err) => Error::from(*err),
                Err(other) => unexpected(other),
            },
        }
    }
}

/// An opened memory store.
pub struct MemoryStore {
    uri: String,
    db: Arc<MemoryDatabase>,
    databases: Databases,
    /// Profile this handle was opened with, overriding the stored default
    profile: Option<String>,
    release: ReleaseNumber,
}

impl MemoryStore {
    async fn resolve_profile(&self, profile: Option<&str>) -> String {
        match profile.or(self.profile.as_deref()) {
            Some(profile) => profile.to_string(),
            None => self.db.state.read().await.default_profile.clone(),
        }
    }
}

#[async_trait]
impl AsyncStore for MemoryStore {
    fn release_number(&self) -> ReleaseNumber {
        self.release.clone()
    }

    async fn default_profile(&self) -> NativeResult<String> {
        Ok(self.resolve_profile(None).await)
    }

    async fn set_default_profile(&self, profile: &str) -> NativeResult<()> {
        let mut state = self.db.state.write().await;
        if !state.profiles.contains_key(profile) {
            return Err(MemoryError::ProfileNotFound(profile.to_string()).into());
        }
        state.default_profile = profile.to_string();
        Ok(())
    }

    async fn create_profile(&self, name: Option<&str>) -> NativeResult<String> {
        let name = name.map_or_else(generated_profile_name, str::to_string);
        let mut state = self.db.state.write().await;
        if state.profiles.contains_key(&name) {
            return Err(MemoryError::ProfileExists(name).into());
        }
        state.profiles.insert(name.clone(), ProfileData::default());
        Ok(name)
    }

    async fn list_profiles(&self) -> NativeResult<Vec<String>> {
        let state = self.db.state.read().await;
        Ok(state.profiles.keys().cloned().collect())
    }

    async fn remove_profile(&self, name: &str) -> NativeResult<bool> {
        let mut state = self.db.state.write().await;
        if state.default_profile == name || self.profile.as_deref() == Some(name) {
            return Err(MemoryError::DefaultProfile(name.to_string()).into());
        }
        Ok(state.profiles.remove(name).is_some())
    }

    async fn rekey(&self, method: KeyMethod, pass_key: Option<&PassKey>) -> NativeResult<()> {
        let (key, _) = KeyRecord::create(method, pass_key)?;
        self.db.state.write().await.key = key;
        info!(uri = %self.uri, key_method = %method, "rekeyed memory store");
        Ok(())
    }

    async fn session(
        &self,
        profile: Option<&str>,
        transaction: bool,
    ) -> NativeResult<Box<dyn AsyncSession>> {
        let profile = self.resolve_profile(profile).await;
        let session = MemorySession::open(self.db.clone(), profile, transaction).await?;
        Ok(Box::new(session))
    }

    fn scan(&self, request: ScanRequest) -> ScanStream {
        let db = self.db.clone();
        let profile = request.profile.clone().or_else(|| self.profile.clone());
        stream::once(async move { collect_scan(db, profile, request).await })
            .map_ok(|rows| stream::iter(rows.into_iter().map(Ok::<ScanRow, NativeError>)))
            .try_flatten()
            .boxed()
    }

    async fn purge_expired(&self, profile: Option<&str>) -> NativeResult<u64> {
        let profile = self.resolve_profile(profile).await;
        let mut state = self.db.state.write().await;
        let data = state
            .profiles
            .get_mut(&profile)
            .ok_or_else(|| MemoryError::ProfileNotFound(profile.clone()))?;
        let purged = data.purge_expired(Utc::now());
        info!(uri = %self.uri, profile = %profile, purged, "purged expired entries");
        Ok(purged)
    }

    async fn close(&self, remove: bool) -> NativeResult<bool> {
        if !remove {
            return Ok(false);
        }
        let mut databases = self.databases.lock();
        let ours = databases
            .get(&self.uri)
            .is_some_and(|db| Arc::ptr_eq(db, &self.db));
        if ours {
            databases.remove(&self.uri);
        }
        Ok(ours)
    }
}

async fn collect_scan(
    db: Arc<MemoryDatabase>,
    profile: Option<String>,
    request: ScanRequest,
) -> NativeResult<Vec<ScanRow>> {
    let order_by = OrderBy::parse(request.order_by.as_deref())?;
    let state = db.state.read().await;
    let profile = profile.unwrap_or_else(|| state.default_profile.clone());
    let data = state
        .profiles
        .get(&profile)
        .ok_or(MemoryError::ProfileNotFound(profile.clone()))?;
    let rows = data.select(
        &Selection {
            category: request.category.as_deref(),
            tag_filter: request.tag_filter.as_ref(),
            order_by,
            descending: request.descending,
            cursor: request.cursor,
            limit: request.limit,
        },
        Utc::now(),
    )?;
    Ok(rows)
}
