//! The `sqlite://` backend
//!
//! URIs take two forms:
//!
//! - `sqlite://:memory:` provisions a private in-memory database that lives
//!   as long as the store handle. It can never be reopened.
//! - `sqlite://<path>` is a database file; relative paths resolve against
//!   the working directory.

use std::path::PathBuf;
use std::sync::Arc;

use recordstore_core::{
    BackendConfig, Error as StoreError, KeyMethod, KeyRecord, NativeError, NativeResult,
    OpenOptions, ProvisionOptions, ReleaseNumber, SchemaConfig, SyncBackend, SyncStore,
};
use tracing::{info, warn};

use crate::error::{translate, Result, SqliteError};
use crate::migrate::{apply, check_release, latest_release, migrate, stored_release};
use crate::pool::{Location, Pool, PoolOptions};
use crate::store::{
    insert_profile, read_config, remove_files, write_config, SqliteStore, CONFIG_DEFAULT_PROFILE,
    CONFIG_KEY,
};

/// URI scheme served by [`SqliteBackend`].
pub const SCHEME: &str = "sqlite";

const MEMORY_PATH: &str = ":memory:";

fn parse_uri(uri: &str) -> Result<Location> {
    let path = uri
        .strip_prefix("sqlite://")
        .filter(|path| !path.is_empty())
        .ok_or_else(|| SqliteError::InvalidUri(uri.to_string()))?;
    if path == MEMORY_PATH {
        Ok(Location::memory())
    } else {
        Ok(Location::File(PathBuf::from(path)))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteBackend;

impl SqliteBackend {
    pub fn new() -> Self {
        Self
    }

    fn provision_store(&self, uri: &str, options: &ProvisionOptions) -> Result<SqliteStore> {
        if options.schema_config != SchemaConfig::Generic {
            return Err(SqliteError::UnsupportedSchema(
                options.schema_config.to_string(),
            ));
        }
        let release = options
            .release_number
            .clone()
            .unwrap_or_else(latest_release);
        check_release(&release)?;

        let location = parse_uri(uri)?;
        if let Location::File(path) = &location {
            if options.recreate && remove_files(path)? {
                warn!(uri, "removed existing store before provisioning");
            }
        }

        let pool = Pool::new(
            location.clone(),
            PoolOptions::from_config(&options.config, true),
        )?;
        let method = KeyMethod::resolve(options.key_method, options.pass_key.as_ref());
        let (record, key) = KeyRecord::create(method, options.pass_key.as_ref())?;
        let profile = options
            .profile
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        {
            let pooled = pool.get()?;
            let db = pooled.connection()?;
            db.execute_batch("BEGIN IMMEDIATE")?;
            if stored_release(db)?.is_some() {
                return Err(SqliteError::StoreExists(uri.to_string()));
            }
            apply(db, None, &release)?;
            write_config(db, CONFIG_KEY, &record.to_json()?)?;
            write_config(db, CONFIG_DEFAULT_PROFILE, &profile)?;
            insert_profile(db, &profile)?;
            db.execute_batch("COMMIT")?;
        }

        info!(uri, %release, key_method = %method, "provisioned sqlite store");
        Ok(SqliteStore::new(
            uri.to_string(),
            pool,
            key,
            release,
            Some(profile),
        ))
    }

    fn open_store(&self, uri: &str, options: &OpenOptions) -> Result<SqliteStore> {
        let location = match parse_uri(uri)? {
            Location::Memory(_) => return Err(SqliteError::StoreNotFound(uri.to_string())),
            Location::File(path) if !path.exists() => {
                return Err(SqliteError::StoreNotFound(uri.to_string()))
            }
            location => location,
        };
        let target = options
            .target_release
            .clone()
            .unwrap_or_else(latest_release);
        check_release(&target)?;

        let pool = Pool::new(
            location.clone(),
            PoolOptions::from_config(&options.config, false),
        )?;
        let (release, key) = {
            let pooled = pool.get()?;
            let db = pooled.connection()?;
            let stored =
                stored_release(db)?.ok_or_else(|| SqliteError::StoreNotFound(uri.to_string()))?;
            if stored > latest_release() {
                return Err(SqliteError::UnsupportedRelease(stored.to_string()));
            }

            // Key and profile live in release 0 tables; check both before any
            // schema change
            let record = read_config(db, CONFIG_KEY)?
                .ok_or_else(|| SqliteError::Corrupt("Missing key record".to_string()))?;
            let key = KeyRecord::from_json(&record)?
                .unlock(options.key_method, options.pass_key.as_ref())?;
            if let Some(profile) = &options.profile {
                crate::session::profile_id(db, profile)?;
            }

            let release = if stored < target {
                if !options.schema_migration {
                    return Err(SqliteError::MigrationRequired {
                        stored: stored.to_string(),
                        target: target.to_string(),
                    });
                }
                migrate(db, Some(&stored), &target)?;
                info!(uri, from = %stored, to = %target, "migrated sqlite store");
                target
            } else {
                stored
            };
            (release, key)
        };

        info!(uri, %release, "opened sqlite store");
        Ok(SqliteStore::new(
            uri.to_string(),
            pool,
            key,
            release,
            options.profile.clone(),
        ))
    }
}

impl SyncBackend for SqliteBackend {
    fn provision(&self, uri: &str, options: &ProvisionOptions) -> NativeResult<Arc<dyn SyncStore>> {
        Ok(Arc::new(self.provision_store(uri, options)?))
    }

    fn open(&self, uri: &str, options: &OpenOptions) -> NativeResult<Arc<dyn SyncStore>> {
        Ok(Arc::new(self.open_store(uri, options)?))
    }

    fn remove(
        &self,
        uri: &str,
        _release: Option<&ReleaseNumber>,
        _config: &BackendConfig,
    ) -> NativeResult<bool> {
        match parse_uri(uri)? {
            Location::Memory(_) => Ok(false),
            Location::File(path) => {
                let removed = remove_files(&path)?;
                info!(uri, removed, "removed sqlite store");
                Ok(removed)
            }
        }
    }

    fn translate_error(&self, error: NativeError) -> StoreError {
        translate(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uri() {
        assert!(parse_uri("sqlite://:memory:").unwrap().is_memory());
        assert_eq!(
            parse_uri("sqlite://data/wallet.db").unwrap(),
            Location::File(PathBuf::from("data/wallet.db"))
        );
        assert!(matches!(
            parse_uri("sqlite://"),
            Err(SqliteError::InvalidUri(_))
        ));
        assert!(matches!(
            parse_uri("postgres://host/db"),
            Err(SqliteError::InvalidUri(_))
        ));
    }

    #[test]
    fn test_normalize_schema_is_rejected() {
        let options = ProvisionOptions::new().schema_config(SchemaConfig::Normalize);
        let err = SqliteBackend::new()
            .provision_store("sqlite://:memory:", &options)
            .err()
            .unwrap();
        assert!(matches!(err, SqliteError::UnsupportedSchema(_)));
    }
}
