//! Entry and store lifecycle tests for the SQLite backend

use std::sync::Arc;

use chrono::Utc;
use recordstore_core::{
    Entry, EntryQuery, ErrorKind, KeyMethod, NativeError, OpenOptions, PassKey, ProvisionOptions,
    ReleaseNumber, SyncBackend, SyncStore,
};
use recordstore_sqlite::SqliteBackend;

fn memory_store() -> Arc<dyn SyncStore> {
    SqliteBackend::new()
        .provision(
            "sqlite://:memory:",
            &ProvisionOptions::new().profile("main"),
        )
        .unwrap()
}

fn file_uri(dir: &tempfile::TempDir) -> String {
    format!("sqlite://{}", dir.path().join("store.db").display())
}

fn kind(err: NativeError) -> ErrorKind {
    SqliteBackend::new().translate_error(err).kind()
}

/// Helper to create a tagged test entry
fn credential(name: &str) -> Entry {
    Entry::new("credential", name)
        .with_value(format!("{{\"id\":\"{name}\"}}").into_bytes())
        .with_tag("schema", "degree")
        .with_tag("roles", vec!["holder", "issuer"])
}

#[test]
fn test_insert_and_fetch() {
    let store = memory_store();
    let mut session = store.session(None, false).unwrap();

    session.insert(&credential("cred-1")).unwrap();

    let fetched = session.fetch("credential", "cred-1", false).unwrap().unwrap();
    assert_eq!(fetched, credential("cred-1"));
    assert!(session.fetch("credential", "missing", false).unwrap().is_none());
}

#[test]
fn test_insert_duplicate_fails() {
    let store = memory_store();
    let mut session = store.session(None, false).unwrap();

    session.insert(&credential("cred-1")).unwrap();
    let err = session.insert(&credential("cred-1")).unwrap_err();
    assert_eq!(kind(err), ErrorKind::Duplicate);

    // The failed insert left no partial tag rows behind
    assert_eq!(session.count(None, None).unwrap(), 1);
}

#[test]
fn test_replace_keeps_row_and_rewrites_tags() {
    let store = memory_store();
    let mut session = store.session(None, false).unwrap();
    session.insert(&credential("cred-1")).unwrap();

    let updated = Entry::new("credential", "cred-1")
        .with_value(b"v2".to_vec())
        .with_tag("schema", "license");
    session.replace(&updated).unwrap();

    let fetched = session.fetch("credential", "cred-1", false).unwrap().unwrap();
    assert_eq!(fetched, updated);

    let err = session.replace(&Entry::new("credential", "missing")).unwrap_err();
    assert_eq!(kind(err), ErrorKind::NotFound);
}

#[test]
fn test_remove() {
    let store = memory_store();
    let mut session = store.session(None, false).unwrap();
    session.insert(&credential("cred-1")).unwrap();

    session.remove("credential", "cred-1").unwrap();
    assert!(session.fetch("credential", "cred-1", false).unwrap().is_none());

    let err = session.remove("credential", "cred-1").unwrap_err();
    assert_eq!(kind(err), ErrorKind::NotFound);
}

#[test]
fn test_expired_entries_are_invisible_and_replaceable() {
    let store = memory_store();
    let mut session = store.session(None, false).unwrap();

    let expired = credential("old").with_expiry(Utc::now() - chrono::Duration::seconds(1));
    session.insert(&expired).unwrap();
    session
        .insert(&credential("live").expires_in(chrono::Duration::seconds(3600)))
        .unwrap();

    assert!(session.fetch("credential", "old", false).unwrap().is_none());
    assert_eq!(session.count(Some("credential"), None).unwrap(), 1);

    let err = session.remove("credential", "old").unwrap_err();
    assert_eq!(kind(err), ErrorKind::NotFound);

    // Same key can be inserted again once the previous entry expired
    session.insert(&credential("old")).unwrap();
    assert_eq!(session.count(Some("credential"), None).unwrap(), 2);
}

#[test]
fn test_purge_expired() {
    let store = memory_store();
    {
        let mut session = store.session(None, false).unwrap();
        for i in 0..3 {
            let entry =
                credential(&format!("gone-{i}")).with_expiry(Utc::now() - chrono::Duration::seconds(5));
            session.insert(&entry).unwrap();
        }
        session.insert(&credential("kept")).unwrap();
        session.close().unwrap();
    }

    assert_eq!(store.purge_expired(None).unwrap(), 3);
    assert_eq!(store.purge_expired(None).unwrap(), 0);
}

#[test]
fn test_fetch_all_order_and_limit() {
    let store = memory_store();
    let mut session = store.session(None, false).unwrap();
    for name in ["b", "c", "a"] {
        session.insert(&Entry::new("cat", name)).unwrap();
    }

    let query = EntryQuery::new().order_by("name").descending(true).limit(2);
    let names: Vec<String> = session
        .fetch_all(&query)
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["c", "b"]);

    let err = session
        .fetch_all(&EntryQuery::new().order_by("value"))
        .unwrap_err();
    assert_eq!(kind(err), ErrorKind::Input);
}

#[test]
fn test_remove_all_counts_live_matches() {
    let store = memory_store();
    let mut session = store.session(None, false).unwrap();
    for i in 0..4 {
        session.insert(&credential(&format!("c{i}"))).unwrap();
    }
    session.insert(&Entry::new("other", "x")).unwrap();

    assert_eq!(session.remove_all(Some("credential"), None).unwrap(), 4);
    assert_eq!(session.count(None, None).unwrap(), 1);
}

#[test]
fn test_transaction_commit_and_rollback() {
    let dir = tempfile::tempdir().unwrap();
    let uri = file_uri(&dir);
    let store = SqliteBackend::new()
        .provision(&uri, &ProvisionOptions::new())
        .unwrap();

    let mut txn = store.session(None, true).unwrap();
    txn.insert(&credential("kept")).unwrap();
    txn.commit().unwrap();

    let mut txn = store.session(None, true).unwrap();
    txn.insert(&credential("dropped")).unwrap();
    txn.rollback().unwrap();

    {
        // Dropped without commit
        let mut txn = store.session(None, true).unwrap();
        txn.insert(&credential("abandoned")).unwrap();
    }

    let mut session = store.session(None, false).unwrap();
    assert_eq!(session.count(None, None).unwrap(), 1);
    assert!(session.fetch("credential", "kept", false).unwrap().is_some());

    let err = session.commit().unwrap_err();
    assert_eq!(kind(err), ErrorKind::Wrapper);
}

#[test]
fn test_closed_session_is_rejected() {
    let store = memory_store();
    let mut session = store.session(None, false).unwrap();
    session.close().unwrap();
    let err = session.count(None, None).unwrap_err();
    assert_eq!(kind(err), ErrorKind::Wrapper);
}

#[test]
fn test_profiles() {
    let store = memory_store();
    assert_eq!(store.default_profile().unwrap(), "main");

    let generated = store.create_profile(None).unwrap();
    store.create_profile(Some("other")).unwrap();
    let err = store.create_profile(Some("other")).unwrap_err();
    assert_eq!(kind(err), ErrorKind::Duplicate);

    let mut profiles = store.list_profiles().unwrap();
    profiles.sort();
    let mut expected = vec![generated.clone(), "main".to_string(), "other".to_string()];
    expected.sort();
    assert_eq!(profiles, expected);

    // Entries are scoped per profile
    {
        let mut session = store.session(Some("other"), false).unwrap();
        session.insert(&credential("cred-1")).unwrap();
    }
    {
        let mut session = store.session(None, false).unwrap();
        assert_eq!(session.count(None, None).unwrap(), 0);
    }

    let err = store.remove_profile("main").unwrap_err();
    assert_eq!(kind(err), ErrorKind::Input);
    assert!(store.remove_profile("other").unwrap());
    assert!(!store.remove_profile("other").unwrap());

    let err = store.session(Some("other"), false).err().unwrap();
    assert_eq!(kind(err), ErrorKind::NotFound);
}

#[test]
fn test_file_store_reopen_with_key() {
    let dir = tempfile::tempdir().unwrap();
    let uri = file_uri(&dir);
    let backend = SqliteBackend::new();

    let store = backend
        .provision(&uri, &ProvisionOptions::new().pass_key("secret").profile("main"))
        .unwrap();
    store
        .session(None, false)
        .unwrap()
        .insert(&credential("cred-1"))
        .unwrap();
    store.close(false).unwrap();

    let err = backend
        .provision(&uri, &ProvisionOptions::new())
        .err()
        .unwrap();
    assert_eq!(kind(err), ErrorKind::Duplicate);

    let err = backend
        .open(&uri, &OpenOptions::new().pass_key("guess"))
        .err()
        .unwrap();
    assert_eq!(kind(err), ErrorKind::Input);

    let store = backend
        .open(&uri, &OpenOptions::new().pass_key("secret"))
        .unwrap();
    let fetched = store
        .session(None, false)
        .unwrap()
        .fetch("credential", "cred-1", false)
        .unwrap()
        .unwrap();
    assert_eq!(fetched, credential("cred-1"));
}

#[test]
fn test_values_are_encrypted_at_rest() {
    let dir = tempfile::tempdir().unwrap();
    let uri = file_uri(&dir);
    let store = SqliteBackend::new()
        .provision(&uri, &ProvisionOptions::new().pass_key("secret"))
        .unwrap();
    store
        .session(None, false)
        .unwrap()
        .insert(&Entry::new("c", "n").with_value(b"plaintext-marker".to_vec()))
        .unwrap();
    store.close(false).unwrap();

    let raw = std::fs::read(dir.path().join("store.db")).unwrap();
    let wal = std::fs::read(dir.path().join("store.db-wal")).unwrap_or_default();
    let marker = b"plaintext-marker";
    assert!(!raw.windows(marker.len()).any(|w| w == marker));
    assert!(!wal.windows(marker.len()).any(|w| w == marker));
}

#[test]
fn test_rekey() {
    let dir = tempfile::tempdir().unwrap();
    let uri = file_uri(&dir);
    let backend = SqliteBackend::new();
    let store = backend
        .provision(&uri, &ProvisionOptions::new().pass_key("old"))
        .unwrap();
    store
        .session(None, false)
        .unwrap()
        .insert(&credential("cred-1"))
        .unwrap();

    let raw_key = PassKey::new("11".repeat(32));
    store.rekey(KeyMethod::Raw, Some(&raw_key)).unwrap();

    // Still readable through the live handle
    let fetched = store
        .session(None, false)
        .unwrap()
        .fetch("credential", "cred-1", false)
        .unwrap();
    assert_eq!(fetched, Some(credential("cred-1")));
    store.close(false).unwrap();

    assert!(backend
        .open(&uri, &OpenOptions::new().pass_key("old"))
        .is_err());
    let reopened = backend
        .open(
            &uri,
            &OpenOptions::new().key_method(KeyMethod::Raw).pass_key(raw_key),
        )
        .unwrap();
    let fetched = reopened
        .session(None, false)
        .unwrap()
        .fetch("credential", "cred-1", false)
        .unwrap();
    assert_eq!(fetched, Some(credential("cred-1")));
}

#[test]
fn test_open_missing_store() {
    let dir = tempfile::tempdir().unwrap();
    let backend = SqliteBackend::new();

    let err = backend.open(&file_uri(&dir), &OpenOptions::new()).err().unwrap();
    assert_eq!(kind(err), ErrorKind::NotFound);

    let err = backend
        .open("sqlite://:memory:", &OpenOptions::new())
        .err()
        .unwrap();
    assert_eq!(kind(err), ErrorKind::NotFound);
}

#[test]
fn test_migration_required_on_old_release() {
    let dir = tempfile::tempdir().unwrap();
    let uri = file_uri(&dir);
    let backend = SqliteBackend::new();
    let r0: ReleaseNumber = "release_0".parse().unwrap();

    let store = backend
        .provision(&uri, &ProvisionOptions::new().release_number(r0.clone()))
        .unwrap();
    assert_eq!(store.release_number(), r0);
    store.close(false).unwrap();

    let err = backend.open(&uri, &OpenOptions::new()).err().unwrap();
    assert_eq!(kind(err), ErrorKind::MigrationRequired);

    let store = backend
        .open(&uri, &OpenOptions::new().schema_migration(true))
        .unwrap();
    assert_eq!(store.release_number(), recordstore_sqlite::latest_release());
}

#[test]
fn test_failed_unlock_leaves_old_release_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let uri = file_uri(&dir);
    let backend = SqliteBackend::new();
    let r0: ReleaseNumber = "release_0".parse().unwrap();

    let store = backend
        .provision(
            &uri,
            &ProvisionOptions::new()
                .release_number(r0)
                .pass_key("secret")
                .profile("main"),
        )
        .unwrap();
    store.close(false).unwrap();

    let migrate = || OpenOptions::new().schema_migration(true);
    let err = backend
        .open(&uri, &migrate().pass_key("guess"))
        .err()
        .unwrap();
    assert_eq!(kind(err), ErrorKind::Input);
    let err = backend
        .open(&uri, &migrate().pass_key("secret").profile("missing"))
        .err()
        .unwrap();
    assert_eq!(kind(err), ErrorKind::NotFound);

    // Neither attempt migrated the schema
    let err = backend
        .open(&uri, &OpenOptions::new().pass_key("secret"))
        .err()
        .unwrap();
    assert_eq!(kind(err), ErrorKind::MigrationRequired);

    let store = backend
        .open(&uri, &migrate().pass_key("secret"))
        .unwrap();
    assert_eq!(store.release_number(), recordstore_sqlite::latest_release());
}

#[test]
fn test_remove_and_recreate() {
    let dir = tempfile::tempdir().unwrap();
    let uri = file_uri(&dir);
    let backend = SqliteBackend::new();

    let store = backend.provision(&uri, &ProvisionOptions::new()).unwrap();
    store
        .session(None, false)
        .unwrap()
        .insert(&credential("cred-1"))
        .unwrap();
    store.close(false).unwrap();

    let store = backend
        .provision(&uri, &ProvisionOptions::new().recreate(true))
        .unwrap();
    assert_eq!(store.session(None, false).unwrap().count(None, None).unwrap(), 0);
    assert!(store.close(true).unwrap());
    assert!(!dir.path().join("store.db").exists());

    let config = Default::default();
    assert!(!backend.remove(&uri, None, &config).unwrap());
}
