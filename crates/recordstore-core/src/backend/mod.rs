//! Backend contract
//!
//! A backend turns a URI into an opened store and hands out sessions and
//! scans over it. Backends come in two flavours, decided once when they are
//! registered:
//!
//! - [`SyncBackend`]: blocking drivers (SQLite). The engine runs every call
//!   on tokio's blocking pool and drains scans on a dedicated worker thread.
//! - [`AsyncBackend`]: natively async drivers (the in-memory backend). Calls
//!   are awaited directly on the caller's task.
//!
//! Both report failures as boxed native errors; [`SyncBackend::translate_error`]
//! / [`AsyncBackend::translate_error`] map them into the taxonomy at the store
//! boundary.

mod asynchronous;
mod sync;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use asynchronous::{AsyncBackend, AsyncSession, AsyncStore, ScanStream};
pub use sync::{ScanIter, SyncBackend, SyncSession, SyncStore};

use crate::config::{BackendConfig, SchemaConfig};
use crate::entry::Entry;
use crate::error::{BoxError, Error, ErrorKind, Result};
use crate::filter::TagFilter;
use crate::keys::{KeyMethod, PassKey};
use crate::release::ReleaseNumber;

/// Error type returned by backend drivers before translation.
pub type NativeError = BoxError;

pub type NativeResult<T> = std::result::Result<T, NativeError>;

/// A registered backend, tagged with how it must be driven.
#[derive(Clone)]
pub enum Backend {
    Sync(Arc<dyn SyncBackend>),
    Async(Arc<dyn AsyncBackend>),
}

impl Backend {
    pub fn is_async(&self) -> bool {
        matches!(self, Backend::Async(_))
    }

    pub fn translate_error(&self, error: NativeError) -> Error {
        match self {
            Backend::Sync(backend) => backend.translate_error(error),
            Backend::Async(backend) => backend.translate_error(error),
        }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Sync(_) => f.write_str("Backend::Sync"),
            Backend::Async(_) => f.write_str("Backend::Async"),
        }
    }
}

/// Return a taxonomy error unchanged if the native error already is one.
///
/// Drivers raise [`Error`] directly for conditions they classify themselves
/// (bad filters, unknown profiles); translation must not reclassify those.
pub fn passthrough(error: NativeError) -> std::result::Result<Error, NativeError> {
    error.downcast::<Error>().map(|boxed| *boxed)
}

/// Fallback translation for errors a backend does not recognise.
pub fn unexpected(error: NativeError) -> Error {
    match passthrough(error) {
        Ok(err) => err,
        Err(other) => Error::new(ErrorKind::Unexpected, other.to_string()).with_source(other),
    }
}

/// Parameters for creating a store.
#[derive(Debug, Clone, Default)]
pub struct ProvisionOptions {
    pub key_method: Option<KeyMethod>,
    pub pass_key: Option<PassKey>,
    pub profile: Option<String>,
    pub recreate: bool,
    pub release_number: Option<ReleaseNumber>,
    pub schema_config: SchemaConfig,
    pub config: BackendConfig,
}

impl ProvisionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_method(mut self, method: KeyMethod) -> Self {
        self.key_method = Some(method);
        self
    }

    pub fn pass_key(mut self, pass_key: impl Into<PassKey>) -> Self {
        self.pass_key = Some(pass_key.into());
        self
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn recreate(mut self, recreate: bool) -> Self {
        self.recreate = recreate;
        self
    }

    pub fn release_number(mut self, release: ReleaseNumber) -> Self {
        self.release_number = Some(release);
        self
    }

    pub fn schema_config(mut self, schema: SchemaConfig) -> Self {
        self.schema_config = schema;
        self
    }

    pub fn config(mut self, config: BackendConfig) -> Self {
        self.config = config;
        self
    }
}

/// Parameters for opening an existing store.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    pub key_method: Option<KeyMethod>,
    pub pass_key: Option<PassKey>,
    pub profile: Option<String>,
    pub schema_migration: bool,
    pub target_release: Option<ReleaseNumber>,
    pub config: BackendConfig,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_method(mut self, method: KeyMethod) -> Self {
        self.key_method = Some(method);
        self
    }

    pub fn pass_key(mut self, pass_key: impl Into<PassKey>) -> Self {
        self.pass_key = Some(pass_key.into());
        self
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn schema_migration(mut self, migrate: bool) -> Self {
        self.schema_migration = migrate;
        self
    }

    pub fn target_release(mut self, release: ReleaseNumber) -> Self {
        self.target_release = Some(release);
        self
    }

    pub fn config(mut self, config: BackendConfig) -> Self {
        self.config = config;
        self
    }
}

/// Columns a caller may order entries by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBy {
    Id,
    Category,
    Name,
    Expiry,
}

impl OrderBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderBy::Id => "id",
            OrderBy::Category => "category",
            OrderBy::Name => "name",
            OrderBy::Expiry => "expiry",
        }
    }

    /// Parse an optional column name; unset means row id.
    pub fn parse(column: Option<&str>) -> Result<Self> {
        column.map_or(Ok(OrderBy::Id), str::parse)
    }
}

impl FromStr for OrderBy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "id" => Ok(OrderBy::Id),
            "category" => Ok(OrderBy::Category),
            "name" => Ok(OrderBy::Name),
            "expiry" => Ok(OrderBy::Expiry),
            other => Err(Error::input(format!("Invalid order_by column: {other}"))),
        }
    }
}

/// Arguments to `fetch_all`.
#[derive(Debug, Clone, Default)]
pub struct EntryQuery {
    pub category: Option<String>,
    pub tag_filter: Option<TagFilter>,
    pub limit: Option<usize>,
    pub order_by: Option<String>,
    pub descending: bool,
}

impl EntryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn tag_filter(mut self, filter: TagFilter) -> Self {
        self.tag_filter = Some(filter);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by = Some(column.into());
        self
    }

    pub fn descending(mut self, descending: bool) -> Self {
        self.descending = descending;
        self
    }
}

/// Where a scan starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanCursor {
    /// Skip this many matching rows
    Offset(usize),
    /// Resume after the row with this id (`None` starts from the beginning)
    After(Option<i64>),
}

impl Default for ScanCursor {
    fn default() -> Self {
        ScanCursor::Offset(0)
    }
}

/// A backend scan over one profile.
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    pub profile: Option<String>,
    pub category: Option<String>,
    pub tag_filter: Option<TagFilter>,
    pub cursor: ScanCursor,
    pub limit: Option<usize>,
    pub order_by: Option<String>,
    pub descending: bool,
}

/// One scanned entry and the row id it is stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRow {
    pub id: i64,
    pub entry: Entry,
}
