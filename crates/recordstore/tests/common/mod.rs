//! Shared fixtures for the engine integration tests

#![allow(dead_code)]

use chrono::{Duration, Utc};
use recordstore::{BackendConfig, Entry, ProvisionOptions, Store};
use tempfile::TempDir;

/// Which built-in backend a fixture store runs on.
#[derive(Debug, Clone, Copy)]
pub enum Flavor {
    Memory,
    Sqlite,
}

pub const FLAVORS: [Flavor; 2] = [Flavor::Memory, Flavor::Sqlite];

/// A provisioned store plus whatever keeps its files alive.
pub struct Fixture {
    pub store: Store,
    pub uri: String,
    _dir: Option<TempDir>,
}

pub fn memory_uri() -> String {
    format!("memory://test-{}", uuid::Uuid::new_v4())
}

pub fn sqlite_uri(dir: &TempDir) -> String {
    format!("sqlite://{}", dir.path().join("store.db").display())
}

pub async fn fixture_with(flavor: Flavor, config: BackendConfig) -> Fixture {
    let (uri, dir) = match flavor {
        Flavor::Memory => (memory_uri(), None),
        Flavor::Sqlite => {
            let dir = tempfile::tempdir().unwrap();
            (sqlite_uri(&dir), Some(dir))
        }
    };
    let options = ProvisionOptions::new().profile("main").config(config);
    let store = Store::provision(&uri, options).await.unwrap();
    Fixture {
        store,
        uri,
        _dir: dir,
    }
}

pub async fn fixture(flavor: Flavor) -> Fixture {
    fixture_with(flavor, BackendConfig::new()).await
}

/// Fifty records `rec-00`..`rec-49`: `status` cycles active/pending/revoked
/// and every tenth record is already expired.
pub fn scenario_records() -> Vec<Entry> {
    const STATUSES: [&str; 3] = ["active", "pending", "revoked"];
    (0..50)
        .map(|i| {
            let entry = Entry::new("record", format!("rec-{i:02}"))
                .with_value(format!("value-{i}").into_bytes())
                .with_tag("status", STATUSES[i % 3]);
            if (i + 1) % 10 == 0 {
                entry.with_expiry(Utc::now() - Duration::hours(1))
            } else {
                entry
            }
        })
        .collect()
}

pub async fn insert_all(store: &Store, entries: &[Entry]) {
    let mut session = store.session(None).open().await.unwrap();
    for entry in entries {
        session.insert(entry).await.unwrap();
    }
    session.close().await.unwrap();
}

pub fn names(entries: &[Entry]) -> Vec<String> {
    entries.iter().map(|e| e.name.clone()).collect()
}
