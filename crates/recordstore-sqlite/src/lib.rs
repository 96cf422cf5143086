//! SQLite storage backend for recordstore
//!
//! A blocking [`SyncBackend`](recordstore_core::SyncBackend) that keeps each
//! store in one SQLite database: profiles, entries, and one row per tag
//! value so that tag filters compile to indexed SQL.
//!
//! # Features
//!
//! - File databases in WAL mode and private in-memory databases
//! - A bounded connection pool configured from `BackendConfig`
//! - Values encrypted with the store key; tags stay plaintext for querying
//! - Versioned schema releases with opt-in migration on open
//! - Lazy batched scans with offset or keyset cursors
//!
//! # Example
//!
//! ```rust,no_run
//! use recordstore_core::{Entry, ProvisionOptions, SyncBackend};
//! use recordstore_sqlite::SqliteBackend;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let backend = SqliteBackend::new();
//! let store = backend.provision("sqlite://:memory:", &ProvisionOptions::new())?;
//!
//! let mut session = store.session(None, false)?;
//! session.insert(&Entry::new("credential", "cred-1").with_tag("schema", "degree"))?;
//! assert_eq!(session.count(Some("credential"), None)?, 1);
//! # Ok(())
//! # }
//! ```

mod backend;
mod codec;
mod error;
mod migrate;
mod pool;
mod query;
mod scan;
mod session;
mod store;

pub use backend::{SqliteBackend, SCHEME};
pub use error::{translate, Result, SqliteError};
pub use migrate::latest_release;
pub use pool::{Location, Pool, PoolOptions, PooledConnection};
pub use scan::{SqliteScan, BATCH_SIZE};
pub use session::SqliteSession;
pub use store::SqliteStore;
