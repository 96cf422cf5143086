//! Process-wide backend registry
//!
//! Maps a URI scheme to the [`Backend`] that serves it. The built-in
//! `memory` and `sqlite` backends are registered by a one-shot initializer
//! the first time a backend is needed, provided nothing has been registered
//! yet. Explicit registrations run that initializer first, so they layer
//! over the built-ins instead of suppressing them.

use std::collections::HashMap;
use std::sync::{Arc, Once};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use recordstore_core::{AsyncBackend, Backend, Error, MemoryBackend, Result, SyncBackend};
use recordstore_sqlite::SqliteBackend;
use tracing::debug;

static BACKENDS: Lazy<Mutex<HashMap<String, Backend>>> = Lazy::new(|| Mutex::new(HashMap::new()));
static DEFAULTS: Once = Once::new();

fn init_defaults() {
    DEFAULTS.call_once(|| {
        let mut backends = BACKENDS.lock();
        if backends.is_empty() {
            backends.insert(
                recordstore_core::memory::SCHEME.to_string(),
                Backend::Async(Arc::new(MemoryBackend::new())),
            );
            backends.insert(
                recordstore_sqlite::SCHEME.to_string(),
                Backend::Sync(Arc::new(SqliteBackend::new())),
            );
            debug!("registered built-in backends");
        }
    });
}

/// Register `backend` for `scheme`, returning the backend it replaced.
pub fn register(scheme: impl Into<String>, backend: Backend) -> Option<Backend> {
    init_defaults();
    let scheme = scheme.into();
    debug!(scheme = %scheme, is_async = backend.is_async(), "registering backend");
    BACKENDS.lock().insert(scheme, backend)
}

/// Register a blocking backend for `scheme`. Its stores, sessions and scans
/// run off the async runtime, on blocking tasks and scan worker threads.
pub fn register_sync(scheme: impl Into<String>, backend: impl SyncBackend + 'static) -> Option<Backend> {
    register(scheme, Backend::Sync(Arc::new(backend)))
}

/// Register a natively async backend for `scheme`; its futures and scan
/// streams are polled on the caller's task.
pub fn register_async(
    scheme: impl Into<String>,
    backend: impl AsyncBackend + 'static,
) -> Option<Backend> {
    register(scheme, Backend::Async(Arc::new(backend)))
}

/// Look up the backend registered for `scheme`.
pub fn resolve(scheme: &str) -> Option<Backend> {
    init_defaults();
    BACKENDS.lock().get(scheme).cloned()
}

/// Split the scheme off `uri` and resolve its backend.
pub(crate) fn for_uri(uri: &str) -> Result<Backend> {
    let (scheme, _) = uri
        .split_once("://")
        .ok_or_else(|| Error::backend(format!("No scheme in store uri: {uri}")))?;
    resolve(scheme)
        .ok_or_else(|| Error::backend(format!("No backend registered for scheme: {scheme}")))
}
