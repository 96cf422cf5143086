//! recordstore core
//!
//! The backend-independent half of the record store engine: the stored
//! [`Entry`] model, the [`TagFilter`] query language, the error taxonomy every
//! backend translates into, and the contract a backend implements to be
//! registered with the engine.
//!
//! # Example
//!
//! ```rust
//! use recordstore_core::{Entry, TagFilter};
//!
//! let entry = Entry::new("credential", "cred-1")
//!     .with_value(b"{}".to_vec())
//!     .with_tag("schema", "degree")
//!     .with_tag("issuer", "did:example:uni");
//!
//! let filter: TagFilter = r#"{"schema": "degree", "issuer": {"$like": "did:example:%"}}"#
//!     .parse()
//!     .unwrap();
//! assert!(filter.matches(&entry.tags));
//! ```

pub mod backend;
pub mod config;
pub mod entry;
pub mod error;
pub mod filter;
pub mod keys;
pub mod memory;
pub mod release;

// Re-export main types at crate root
pub use backend::{
    AsyncBackend, AsyncSession, AsyncStore, Backend, EntryQuery, NativeError, NativeResult,
    OpenOptions, OrderBy, ProvisionOptions, ScanCursor, ScanIter, ScanRequest, ScanRow,
    ScanStream, SyncBackend, SyncSession, SyncStore,
};
pub use config::{BackendConfig, SchemaConfig};
pub use entry::{Entry, TagValue, Tags};
pub use error::{Error, ErrorKind, Result};
pub use filter::{CompareOp, TagFilter};
pub use keys::{KeyMethod, KeyRecord, PassKey, StoreKey};
pub use memory::{MemoryBackend, MemoryError};
pub use release::ReleaseNumber;
