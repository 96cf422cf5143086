//! An opened SQLite store

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use recordstore_core::{
    KeyMethod, KeyRecord, NativeResult, PassKey, ReleaseNumber, ScanIter, ScanRequest, StoreKey,
    SyncSession, SyncStore,
};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::{debug, info};

use crate::codec::now_millis;
use crate::error::{Result, SqliteError};
use crate::pool::{Location, Pool};
use crate::scan::SqliteScan;
use crate::session::{profile_id, SqliteSession};

pub(crate) const CONFIG_DEFAULT_PROFILE: &str = "default_profile";
pub(crate) const CONFIG_KEY: &str = "key";

pub(crate) fn read_config(db: &Connection, name: &str) -> Result<Option<String>> {
    let value = db
        .query_row("SELECT value FROM config WHERE name = ?", [name], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(value)
}

pub(crate) fn write_config(db: &Connection, name: &str, value: &str) -> Result<()> {
    db.execute(
        "INSERT INTO config (name, value) VALUES (?, ?)
         ON CONFLICT (name) DO UPDATE SET value = excluded.value",
        [name, value],
    )?;
    Ok(())
}

pub(crate) fn stored_default_profile(db: &Connection) -> Result<String> {
    read_config(db, CONFIG_DEFAULT_PROFILE)?
        .ok_or_else(|| SqliteError::Corrupt("Missing default profile".to_string()))
}

pub(crate) fn insert_profile(db: &Connection, name: &str) -> Result<()> {
    match db.execute("INSERT INTO profiles (name) VALUES (?)", [name]) {
        Ok(_) => Ok(()),
        Err(err) if err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
            Err(SqliteError::ProfileExists(name.to_string()))
        }
        Err(err) => Err(err.into()),
    }
}

/// Delete a database file together with its WAL and shared-memory files.
/// Returns `false` if the main file did not exist.
pub(crate) fn remove_files(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    std::fs::remove_file(path)?;
    for suffix in ["-wal", "-shm"] {
        let mut side = path.as_os_str().to_owned();
        side.push(suffix);
        match std::fs::remove_file(&side) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(true)
}

pub struct SqliteStore {
    uri: String,
    pool: Pool,
    key: Arc<RwLock<StoreKey>>,
    release: ReleaseNumber,
    /// Profile this handle was opened with, overriding the stored default
    profile: Option<String>,
}

impl SqliteStore {
    pub(crate) fn new(
        uri: String,
        pool: Pool,
        key: StoreKey,
        release: ReleaseNumber,
        profile: Option<String>,
    ) -> Self {
        Self {
            uri,
            pool,
            key: Arc::new(RwLock::new(key)),
            release,
            profile,
        }
    }

    fn resolve_profile(&self, db: &Connection, profile: Option<&str>) -> Result<String> {
        match profile.or(self.profile.as_deref()) {
            Some(profile) => Ok(profile.to_string()),
            None => stored_default_profile(db),
        }
    }

    fn rekey_values(&self, method: KeyMethod, pass_key: Option<&PassKey>) -> Result<()> {
        let (record, new_key) = KeyRecord::create(method, pass_key)?;
        let pooled = self.pool.get()?;
        let db = pooled.connection()?;
        db.execute_batch("BEGIN IMMEDIATE")?;
        let mut key = self.key.write();

        let values = {
            let mut stmt = db.prepare("SELECT id, value FROM items WHERE value IS NOT NULL")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        {
            let mut update = db.prepare("UPDATE items SET value = ? WHERE id = ?")?;
            for (id, value) in &values {
                let plain = key.decrypt(value)?;
                update.execute(params![new_key.encrypt(&plain), id])?;
            }
        }
        write_config(db, CONFIG_KEY, &record.to_json()?)?;
        db.execute_batch("COMMIT")?;

        *key = new_key;
        info!(uri = %self.uri, key_method = %method, values = values.len(), "rekeyed sqlite store");
        Ok(())
    }
}

impl SyncStore for SqliteStore {
    fn release_number(&self) -> ReleaseNumber {
        self.release.clone()
    }

    fn default_profile(&self) -> NativeResult<String> {
        let pooled = self.pool.get()?;
        Ok(self.resolve_profile(pooled.connection()?, None)?)
    }

    fn set_default_profile(&self, profile: &str) -> NativeResult<()> {
        let pooled = self.pool.get()?;
        let db = pooled.connection()?;
        profile_id(db, profile)?;
        write_config(db, CONFIG_DEFAULT_PROFILE, profile)?;
        Ok(())
    }

    fn create_profile(&self, name: Option<&str>) -> NativeResult<String> {
        let name = name.map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string);
        let pooled = self.pool.get()?;
        insert_profile(pooled.connection()?, &name)?;
        debug!(uri = %self.uri, profile = %name, "created profile");
        Ok(name)
    }

    fn list_profiles(&self) -> NativeResult<Vec<String>> {
        let pooled = self.pool.get()?;
        let db = pooled.connection()?;
        let mut stmt = db.prepare("SELECT name FROM profiles ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    fn remove_profile(&self, name: &str) -> NativeResult<bool> {
        let pooled = self.pool.get()?;
        let db = pooled.connection()?;
        if stored_default_profile(db)? == name || self.profile.as_deref() == Some(name) {
            return Err(SqliteError::DefaultProfile(name.to_string()).into());
        }
        let removed = db.execute("DELETE FROM profiles WHERE name = ?", [name])?;
        Ok(removed > 0)
    }

    fn rekey(&self, method: KeyMethod, pass_key: Option<&PassKey>) -> NativeResult<()> {
        Ok(self.rekey_values(method, pass_key)?)
    }

    fn session(&self, profile: Option<&str>, transaction: bool) -> NativeResult<Box<dyn SyncSession>> {
        let pooled = self.pool.get()?;
        let profile = self.resolve_profile(pooled.connection()?, profile)?;
        let session = SqliteSession::open(pooled, &profile, self.key.clone(), transaction)?;
        Ok(Box::new(session))
    }

    fn scan(&self, mut request: ScanRequest) -> NativeResult<ScanIter> {
        if request.profile.is_none() {
            request.profile = self.profile.clone();
        }
        Ok(Box::new(SqliteScan::new(
            self.pool.clone(),
            self.key.clone(),
            request,
        )))
    }

    fn purge_expired(&self, profile: Option<&str>) -> NativeResult<u64> {
        let pooled = self.pool.get()?;
        let db = pooled.connection()?;
        let profile = self.resolve_profile(db, profile)?;
        let id = profile_id(db, &profile)?;
        let purged = db.execute(
            "DELETE FROM items WHERE profile_id = ? AND expiry IS NOT NULL AND expiry <= ?",
            params![id, now_millis()],
        )? as u64;
        info!(uri = %self.uri, profile = %profile, purged, "purged expired entries");
        Ok(purged)
    }

    fn close(&self, remove: bool) -> NativeResult<bool> {
        self.pool.close();
        if !remove {
            return Ok(false);
        }
        let removed = match self.pool.location() {
            Location::File(path) => remove_files(path)?,
            // Gone once the last connection is released
            Location::Memory(_) => true,
        };
        info!(uri = %self.uri, removed, "closed sqlite store");
        Ok(removed)
    }
}
