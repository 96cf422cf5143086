//! Backend-agnostic error taxonomy
//!
//! Every backend reports failures in its own vocabulary (`rusqlite::Error`,
//! `MemoryError`, ...). Those native errors are translated into [`Error`] at
//! the store boundary, so callers only ever branch on [`ErrorKind`].

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// Boxed error source carried by [`Error`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The URI scheme has no registered backend
    Backend,
    /// The backend reported resource contention (locks, pool exhaustion)
    Busy,
    /// A provision or insert collided with an existing key
    Duplicate,
    /// Malformed caller input: filters, order_by columns, key material, config
    Input,
    /// The store, profile or entry does not exist
    NotFound,
    /// Any other backend failure
    Unexpected,
    /// Caller misuse of the API (double open, commit outside a transaction)
    Wrapper,
    /// A session could not be opened within its timeout
    Timeout,
    /// The stored schema release is older than the caller requires
    MigrationRequired,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Backend => "BACKEND",
            ErrorKind::Busy => "BUSY",
            ErrorKind::Duplicate => "DUPLICATE",
            ErrorKind::Input => "INPUT",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Unexpected => "UNEXPECTED",
            ErrorKind::Wrapper => "WRAPPER",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::MigrationRequired => "MIGRATION_REQUIRED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A taxonomy-coded store error with a human-readable message.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the native error this one was translated from.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Backend, message)
    }

    pub fn busy(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Busy, message)
    }

    pub fn duplicate(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Duplicate, message)
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Input, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unexpected, message)
    }

    pub fn wrapper(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Wrapper, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn migration_required(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MigrationRequired, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_kind_and_message() {
        let err = Error::not_found("no entry 'a' in category 'b'");
        assert_eq!(err.to_string(), "NOT_FOUND: no entry 'a' in category 'b'");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_source_is_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let err = Error::unexpected("write failed").with_source(io);
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("disk on fire"));
    }
}
