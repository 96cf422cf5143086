//! Memory backend error types

use thiserror::Error;

use crate::error::{Error as StoreError, ErrorKind};

/// Errors raised by the in-memory backend
#[derive(Debug, Clone, Error)]
pub enum MemoryError {
    #[error("store already exists: {0}")]
    StoreExists(String),

    #[error("store not found: {0}")]
    StoreNotFound(String),

    #[error("profile already exists: {0}")]
    ProfileExists(String),

    #[error("profile not found: {0}")]
    ProfileNotFound(String),

    #[error("cannot remove the default profile: {0}")]
    DefaultProfile(String),

    #[error("entry already exists: {category}/{name}")]
    Duplicate { category: String, name: String },

    #[error("entry not found: {category}/{name}")]
    EntryNotFound { category: String, name: String },

    #[error("invalid memory store uri: {0}")]
    InvalidUri(String),

    #[error("unsupported release: {0}")]
    UnsupportedRelease(String),

    #[error("session is not a transaction")]
    NotTransaction,

    #[error("session is closed")]
    SessionClosed,
}

impl MemoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MemoryError::StoreExists(_)
            | MemoryError::ProfileExists(_)
            | MemoryError::Duplicate { .. } => ErrorKind::Duplicate,
            MemoryError::StoreNotFound(_)
            | MemoryError::ProfileNotFound(_)
            | MemoryError::EntryNotFound { .. } => ErrorKind::NotFound,
            MemoryError::DefaultProfile(_)
            | MemoryError::InvalidUri(_)
            | MemoryError::UnsupportedRelease(_) => ErrorKind::Input,
            MemoryError::NotTransaction | MemoryError::SessionClosed => ErrorKind::Wrapper,
        }
    }
}

impl From<MemoryError> for StoreError {
    fn from(err: MemoryError) -> Self {
        StoreError::new(err.kind(), err.to_string()).with_source(err)
    }
}
