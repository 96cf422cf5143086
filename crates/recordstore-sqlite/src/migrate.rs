//! Schema releases and the migration runner
//!
//! Each release is a SQL batch applied on top of the previous one. The
//! release a database is at is recorded in `config` under `version`; a
//! database without a `config` table holds no store at all.

use recordstore_core::ReleaseNumber;
use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::{Result, SqliteError};

const RELEASE_0: &str = "
CREATE TABLE config (
    name TEXT NOT NULL PRIMARY KEY,
    value TEXT
);

CREATE TABLE profiles (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    profile_id INTEGER NOT NULL REFERENCES profiles (id) ON DELETE CASCADE ON UPDATE CASCADE,
    category TEXT NOT NULL,
    name TEXT NOT NULL,
    value BLOB,
    expiry INTEGER,
    UNIQUE (profile_id, category, name)
);

CREATE TABLE items_tags (
    item_id INTEGER NOT NULL REFERENCES items (id) ON DELETE CASCADE ON UPDATE CASCADE,
    name TEXT NOT NULL,
    value TEXT NOT NULL,
    multi INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX ix_items_tags_item_id ON items_tags (item_id);
";

const RELEASE_0_1: &str = "
CREATE INDEX ix_items_tags_name_value ON items_tags (name, value);
CREATE INDEX ix_items_expiry ON items (expiry);
";

/// Known releases in application order
const MIGRATIONS: &[(&[u32], &str)] = &[(&[0], RELEASE_0), (&[0, 1], RELEASE_0_1)];

fn release_of(components: &[u32]) -> ReleaseNumber {
    ReleaseNumber::of(components[0], &components[1..])
}

/// The newest release this backend can create or migrate to.
pub fn latest_release() -> ReleaseNumber {
    let (components, _) = MIGRATIONS[MIGRATIONS.len() - 1];
    release_of(components)
}

/// Reject releases this backend has no migration for.
pub fn check_release(release: &ReleaseNumber) -> Result<()> {
    if MIGRATIONS.iter().any(|(c, _)| *c == release.components()) {
        Ok(())
    } else {
        Err(SqliteError::UnsupportedRelease(release.to_string()))
    }
}

/// Release recorded in the database, or `None` if it holds no store.
pub fn stored_release(conn: &Connection) -> Result<Option<ReleaseNumber>> {
    let has_config = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'config'")?
        .exists([])?;
    if !has_config {
        return Ok(None);
    }

    let version: Option<String> = conn
        .query_row("SELECT value FROM config WHERE name = 'version'", [], |row| {
            row.get(0)
        })
        .optional()?;
    version
        .map(|v| {
            v.parse::<ReleaseNumber>()
                .map_err(|_| SqliteError::Corrupt(format!("Invalid stored release: {v}")))
        })
        .transpose()
}

/// Bring the schema from `from` (`None` for an empty database) up to
/// `target`, applying every pending release in one transaction.
pub fn migrate(conn: &Connection, from: Option<&ReleaseNumber>, target: &ReleaseNumber) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    apply(&tx, from, target)?;
    tx.commit()?;
    Ok(())
}

/// Apply pending releases on a connection that is already inside a
/// transaction.
pub fn apply(conn: &Connection, from: Option<&ReleaseNumber>, target: &ReleaseNumber) -> Result<()> {
    check_release(target)?;

    let pending: Vec<(ReleaseNumber, &str)> = MIGRATIONS
        .iter()
        .map(|(components, sql)| (release_of(components), *sql))
        .filter(|(release, _)| from.map_or(true, |from| release > from) && release <= target)
        .collect();
    if pending.is_empty() {
        return Ok(());
    }

    for (release, sql) in &pending {
        conn.execute_batch(sql)?;
        info!(%release, "applied schema release");
    }
    conn.execute(
        "INSERT INTO config (name, value) VALUES ('version', ?)
         ON CONFLICT (name) DO UPDATE SET value = excluded.value",
        [target.to_string()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
            .unwrap()
            .exists([name])
            .unwrap()
    }

    fn index_exists(conn: &Connection, name: &str) -> bool {
        conn.prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND name = ?")
            .unwrap()
            .exists([name])
            .unwrap()
    }

    #[test]
    fn test_migrate_creates_schema() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(stored_release(&conn).unwrap(), None);

        migrate(&conn, None, &latest_release()).unwrap();

        for table in ["config", "profiles", "items", "items_tags"] {
            assert!(table_exists(&conn, table), "{table}");
        }
        assert_eq!(stored_release(&conn).unwrap(), Some(latest_release()));
    }

    #[test]
    fn test_migrate_in_steps() {
        let conn = Connection::open_in_memory().unwrap();
        let r0: ReleaseNumber = "release_0".parse().unwrap();

        migrate(&conn, None, &r0).unwrap();
        assert_eq!(stored_release(&conn).unwrap(), Some(r0.clone()));
        assert!(!index_exists(&conn, "ix_items_expiry"));

        migrate(&conn, Some(&r0), &latest_release()).unwrap();
        assert!(index_exists(&conn, "ix_items_expiry"));
        assert_eq!(stored_release(&conn).unwrap(), Some(latest_release()));
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        let latest = latest_release();
        migrate(&conn, None, &latest).unwrap();
        migrate(&conn, Some(&latest), &latest).unwrap();
    }

    #[test]
    fn test_unknown_release_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        let r9: ReleaseNumber = "release_9".parse().unwrap();
        assert!(matches!(
            migrate(&conn, None, &r9),
            Err(SqliteError::UnsupportedRelease(_))
        ));
    }
}
