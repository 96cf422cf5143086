//! Error types for the SQLite storage backend

use std::time::Duration;

use recordstore_core::backend::{passthrough, unexpected, NativeError};
use recordstore_core::{Error as StoreError, ErrorKind};
use rusqlite::ErrorCode;
use thiserror::Error;

/// Result type for SQLite backend operations
pub type Result<T> = std::result::Result<T, SqliteError>;

/// Errors that can occur during SQLite storage operations
#[derive(Debug, Error)]
pub enum SqliteError {
    /// Database connection or query error
    #[error("SQLite error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (for file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error already classified by the core (filters, key material)
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Store already exists: {0}")]
    StoreExists(String),

    #[error("Store not found: {0}")]
    StoreNotFound(String),

    #[error("Profile {0} already exists")]
    ProfileExists(String),

    #[error("Profile {0} not found")]
    ProfileNotFound(String),

    #[error("Cannot remove the default profile {0}")]
    DefaultProfile(String),

    #[error("Entry {category}/{name} already exists")]
    Duplicate { category: String, name: String },

    #[error("Entry {category}/{name} not found")]
    EntryNotFound { category: String, name: String },

    #[error("Invalid SQLite store uri: {0}")]
    InvalidUri(String),

    #[error("Unsupported schema config: {0}")]
    UnsupportedSchema(String),

    #[error("Unsupported release: {0}")]
    UnsupportedRelease(String),

    #[error("Store is at {stored}, {target} required")]
    MigrationRequired { stored: String, target: String },

    /// Stored data that cannot be decoded
    #[error("Corrupt store data: {0}")]
    Corrupt(String),

    #[error("No pooled connection available after {0:?}")]
    PoolTimeout(Duration),

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Session is not a transaction")]
    NotTransaction,

    #[error("Session is closed")]
    SessionClosed,
}

impl SqliteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SqliteError::Database(e) => database_kind(e),
            SqliteError::Store(e) => e.kind(),
            SqliteError::Json(_) | SqliteError::Io(_) | SqliteError::Corrupt(_) => {
                ErrorKind::Unexpected
            }
            SqliteError::StoreExists(_)
            | SqliteError::ProfileExists(_)
            | SqliteError::Duplicate { .. } => ErrorKind::Duplicate,
            SqliteError::StoreNotFound(_)
            | SqliteError::ProfileNotFound(_)
            | SqliteError::EntryNotFound { .. } => ErrorKind::NotFound,
            SqliteError::DefaultProfile(_)
            | SqliteError::InvalidUri(_)
            | SqliteError::UnsupportedSchema(_)
            | SqliteError::UnsupportedRelease(_) => ErrorKind::Input,
            SqliteError::MigrationRequired { .. } => ErrorKind::MigrationRequired,
            SqliteError::PoolTimeout(_) => ErrorKind::Busy,
            SqliteError::PoolClosed | SqliteError::NotTransaction | SqliteError::SessionClosed => {
                ErrorKind::Wrapper
            }
        }
    }
}

fn database_kind(err: &rusqlite::Error) -> ErrorKind {
    match err {
        rusqlite::Error::QueryReturnedNoRows => ErrorKind::NotFound,
        _ => match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => ErrorKind::Busy,
            Some(ErrorCode::ConstraintViolation) => ErrorKind::Duplicate,
            _ => ErrorKind::Unexpected,
        },
    }
}

/// Convert SqliteError to the store taxonomy
impl From<SqliteError> for StoreError {
    fn from(err: SqliteError) -> Self {
        match err {
            SqliteError::Store(e) => e,
            other => StoreError::new(other.kind(), other.to_string()).with_source(other),
        }
    }
}

/// Translate a boxed native error raised by this backend.
pub fn translate(error: NativeError) -> StoreError {
    match passthrough(error) {
        Ok(err) => err,
        Err(native) => match native.downcast::<SqliteError>() {
            Ok(err) => StoreError::from(*err),
            Err(native) => match native.downcast::<rusqlite::Error>() {
                Ok(err) => StoreError::from(SqliteError::Database(*err)),
                Err(other) => unexpected(other),
            },
        },
    }
}
