//! SQLite sessions
//!
//! A session checks a connection out of the pool when it opens and holds it
//! until it is closed. A transaction issues `BEGIN IMMEDIATE` up front, so the
//! write lock is taken before any read and a competing writer waits out the
//! busy timeout instead of failing at commit. Every write runs inside its own
//! savepoint, which keeps an item and its tag rows in step even when a
//! statement fails halfway.

use std::sync::Arc;

use parking_lot::RwLock;
use recordstore_core::{
    Entry, EntryQuery, NativeResult, OrderBy, StoreKey, SyncSession, TagFilter,
};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::debug;

use crate::codec::{
    decrypt_value, encrypt_value, expiry_to_sql, insert_tags, load_tags, now_millis, sql_to_expiry,
};
use crate::error::{Result, SqliteError};
use crate::pool::PooledConnection;
use crate::query::RowQuery;

pub struct SqliteSession {
    conn: Option<PooledConnection>,
    profile_id: i64,
    key: Arc<RwLock<StoreKey>>,
    transaction: bool,
}

impl SqliteSession {
    pub(crate) fn open(
        conn: PooledConnection,
        profile: &str,
        key: Arc<RwLock<StoreKey>>,
        transaction: bool,
    ) -> Result<Self> {
        let db = conn.connection()?;
        let profile_id = profile_id(db, profile)?;
        if transaction {
            db.execute_batch("BEGIN IMMEDIATE")?;
        }
        debug!(profile, transaction, "sqlite session opened");
        Ok(Self {
            conn: Some(conn),
            profile_id,
            key,
            transaction,
        })
    }

    fn db(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or(SqliteError::SessionClosed)?
            .connection()
    }

    /// Run `f` inside a savepoint, undoing its partial work on failure.
    fn write<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let db = self.db()?;
        db.execute_batch("SAVEPOINT entry_write")?;
        match f(db) {
            Ok(value) => {
                db.execute_batch("RELEASE entry_write")?;
                Ok(value)
            }
            Err(err) => {
                db.execute_batch("ROLLBACK TO entry_write; RELEASE entry_write")?;
                Err(err)
            }
        }
    }

    fn finish(&mut self, statement: &str) -> Result<()> {
        if !self.transaction {
            return Err(SqliteError::NotTransaction);
        }
        let conn = self.conn.take().ok_or(SqliteError::SessionClosed)?;
        conn.connection()?.execute_batch(statement)?;
        debug!(statement, "sqlite transaction finished");
        Ok(())
    }

    fn insert_entry(&self, entry: &Entry) -> Result<()> {
        let mut entry = entry.clone();
        entry.prune_empty_tags();
        let profile_id = self.profile_id;
        let value = encrypt_value(&self.key.read(), entry.value.as_deref());

        self.write(|db| {
            // An expired row still holds the unique key until it is purged
            db.execute(
                "DELETE FROM items WHERE profile_id = ? AND category = ? AND name = ?
                 AND expiry IS NOT NULL AND expiry <= ?",
                params![profile_id, entry.category, entry.name, now_millis()],
            )?;
            let inserted = db.execute(
                "INSERT INTO items (profile_id, category, name, value, expiry)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    profile_id,
                    entry.category,
                    entry.name,
                    value,
                    expiry_to_sql(entry.expiry)
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(err) if err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                    return Err(SqliteError::Duplicate {
                        category: entry.category.clone(),
                        name: entry.name.clone(),
                    });
                }
                Err(err) => return Err(err.into()),
            }
            insert_tags(db, db.last_insert_rowid(), &entry.tags)
        })
    }

    fn replace_entry(&self, entry: &Entry) -> Result<()> {
        let mut entry = entry.clone();
        entry.prune_empty_tags();
        let profile_id = self.profile_id;
        let value = encrypt_value(&self.key.read(), entry.value.as_deref());

        self.write(|db| {
            let id = live_item_id(db, profile_id, &entry.category, &entry.name)?.ok_or_else(
                || SqliteError::EntryNotFound {
                    category: entry.category.clone(),
                    name: entry.name.clone(),
                },
            )?;
            db.execute(
                "UPDATE items SET value = ?, expiry = ? WHERE id = ?",
                params![value, expiry_to_sql(entry.expiry), id],
            )?;
            db.execute("DELETE FROM items_tags WHERE item_id = ?", [id])?;
            insert_tags(db, id, &entry.tags)
        })
    }

    fn remove_entry(&self, category: &str, name: &str) -> Result<()> {
        let removed = self.db()?.execute(
            "DELETE FROM items WHERE profile_id = ? AND category = ? AND name = ?
             AND (expiry IS NULL OR expiry > ?)",
            params![self.profile_id, category, name, now_millis()],
        )?;
        if removed == 0 {
            return Err(SqliteError::EntryNotFound {
                category: category.to_string(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn fetch_entry(&self, category: &str, name: &str) -> Result<Option<Entry>> {
        let db = self.db()?;
        let found = db
            .query_row(
                "SELECT id, value, expiry FROM items WHERE profile_id = ? AND category = ?
                 AND name = ? AND (expiry IS NULL OR expiry > ?)",
                params![self.profile_id, category, name, now_millis()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<Vec<u8>>>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, value, expiry)) = found else {
            return Ok(None);
        };
        Ok(Some(Entry {
            category: category.to_string(),
            name: name.to_string(),
            value: decrypt_value(&self.key.read(), value)?,
            tags: load_tags(db, id)?,
            expiry: sql_to_expiry(expiry)?,
        }))
    }

    fn fetch_entries(&self, query: &EntryQuery) -> Result<Vec<Entry>> {
        let order_by = OrderBy::parse(query.order_by.as_deref())?;
        let mut rows = RowQuery::new(self.profile_id)
            .category(query.category.as_deref())
            .tag_filter(query.tag_filter.as_ref());
        rows.order_by = order_by;
        rows.descending = query.descending;
        rows.limit = query.limit;
        let found = rows.rows(self.db()?, &self.key.read())?;
        Ok(found.into_iter().map(|row| row.entry).collect())
    }
}

pub(crate) fn profile_id(db: &Connection, profile: &str) -> Result<i64> {
    db.query_row("SELECT id FROM profiles WHERE name = ?", [profile], |row| {
        row.get(0)
    })
    .optional()?
    .ok_or_else(|| SqliteError::ProfileNotFound(profile.to_string()))
}

fn live_item_id(db: &Connection, profile_id: i64, category: &str, name: &str) -> Result<Option<i64>> {
    let id = db
        .query_row(
            "SELECT id FROM items WHERE profile_id = ? AND category = ? AND name = ?
             AND (expiry IS NULL OR expiry > ?)",
            params![profile_id, category, name, now_millis()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

impl SyncSession for SqliteSession {
    fn count(&mut self, category: Option<&str>, tag_filter: Option<&TagFilter>) -> NativeResult<u64> {
        let query = RowQuery::new(self.profile_id)
            .category(category)
            .tag_filter(tag_filter);
        Ok(query.count(self.db()?)?)
    }

    // Writers are already serialised by BEGIN IMMEDIATE, so row locks add nothing
    fn fetch(&mut self, category: &str, name: &str, _for_update: bool) -> NativeResult<Option<Entry>> {
        Ok(self.fetch_entry(category, name)?)
    }

    fn fetch_all(&mut self, query: &EntryQuery) -> NativeResult<Vec<Entry>> {
        Ok(self.fetch_entries(query)?)
    }

    fn insert(&mut self, entry: &Entry) -> NativeResult<()> {
        Ok(self.insert_entry(entry)?)
    }

    fn replace(&mut self, entry: &Entry) -> NativeResult<()> {
        Ok(self.replace_entry(entry)?)
    }

    fn remove(&mut self, category: &str, name: &str) -> NativeResult<()> {
        Ok(self.remove_entry(category, name)?)
    }

    fn remove_all(
        &mut self,
        category: Option<&str>,
        tag_filter: Option<&TagFilter>,
    ) -> NativeResult<u64> {
        let query = RowQuery::new(self.profile_id)
            .category(category)
            .tag_filter(tag_filter);
        Ok(query.delete(self.db()?)?)
    }

    fn commit(&mut self) -> NativeResult<()> {
        Ok(self.finish("COMMIT")?)
    }

    fn rollback(&mut self) -> NativeResult<()> {
        Ok(self.finish("ROLLBACK")?)
    }

    fn close(&mut self) -> NativeResult<()> {
        // Returning the connection rolls back anything uncommitted
        self.conn = None;
        Ok(())
    }
}
