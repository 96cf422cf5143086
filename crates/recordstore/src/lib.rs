//! # recordstore
//!
//! An async record store engine over pluggable backends. Every store is
//! addressed by a URI whose scheme selects the backend:
//! - **memory**: natively async, process-local stores (`memory://<name>`)
//! - **sqlite**: blocking SQLite databases (`sqlite://<path>`, `sqlite://:memory:`)
//!
//! Further backends are added at runtime through [`register_sync`] and
//! [`register_async`].
//!
//! Modules:
//! - **registry**: scheme to backend lookup
//! - **store**: provisioning, opening, profiles, key rotation and close
//! - **session**: sessions and transactions over one profile
//! - **scan**: lazy offset and keyset scans
//! - **tracing**: logging setup with recordstore segment prefixes
//!
//! ## Usage
//!
//! ```rust,no_run
//! use recordstore::{Entry, ProvisionOptions, ScanOptions, Store, TagFilter};
//!
//! # async fn run() -> recordstore::Result<()> {
//! let store = Store::provision("memory://wallet", ProvisionOptions::new()).await?;
//!
//! let mut session = store.session(None).open().await?;
//! session
//!     .insert(&Entry::new("credential", "cred-1").with_tag("schema", "degree"))
//!     .await?;
//! session.close().await?;
//!
//! let options = ScanOptions::new()
//!     .category("credential")
//!     .tag_filter(TagFilter::equals("schema", "degree"));
//! let entries = store.scan(options, 0).fetch_all().await?;
//! assert_eq!(entries.len(), 1);
//!
//! store.close(true).await?;
//! # Ok(())
//! # }
//! ```

pub mod registry;
pub mod scan;
pub mod session;
pub mod store;
pub mod tracing;

// Re-export commonly used items at crate root
pub use recordstore_core::{
    AsyncBackend, AsyncSession, AsyncStore, Backend, BackendConfig, CompareOp, Entry, EntryQuery,
    Error, ErrorKind, KeyMethod, OpenOptions, PassKey, ProvisionOptions, ReleaseNumber, Result,
    SchemaConfig, SyncBackend, SyncSession, SyncStore, TagFilter, TagValue, Tags,
};

pub use registry::{register, register_async, register_sync, resolve};
pub use scan::{KeysetScan, Scan, ScanOptions};
pub use session::{Session, SessionOpener, DEFAULT_SESSION_TIMEOUT};
pub use store::{BackendKind, Store};
