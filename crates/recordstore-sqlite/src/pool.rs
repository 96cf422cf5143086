//! Blocking connection pool
//!
//! Connections are opened on demand up to `max_connections`; callers beyond
//! that wait on a condvar until one is returned or `connect_timeout` passes.
//! Idle connections are retired after `max_idle`, and every connection after
//! `max_lifetime`.
//!
//! A private in-memory database lives in the `memdb` VFS under a unique name,
//! shared by every connection that opens that name and freed when the last one
//! closes, so the pool keeps one extra "keeper" connection open for the pool's
//! lifetime. memdb locks like a rollback-journal file: an open write
//! transaction makes readers on other connections wait out the busy timeout.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use recordstore_core::BackendConfig;
use rusqlite::{Connection, OpenFlags};
use tracing::{debug, warn};

use crate::error::{Result, SqliteError};

const DEFAULT_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Where pooled connections point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    File(PathBuf),
    /// memdb URI of a private in-memory database
    Memory(String),
}

impl Location {
    pub fn memory() -> Self {
        Location::Memory(format!(
            "file:/recordstore-{}?vfs=memdb",
            uuid::Uuid::new_v4()
        ))
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Location::Memory(_))
    }
}

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub min_connections: u32,
    pub max_connections: u32,
    pub connect_timeout: Duration,
    pub max_idle: Option<Duration>,
    pub max_lifetime: Option<Duration>,
    /// Create the database file if it is missing
    pub create: bool,
}

impl PoolOptions {
    pub fn from_config(config: &BackendConfig, create: bool) -> Self {
        let max_connections = config
            .max_connections
            .unwrap_or(DEFAULT_MAX_CONNECTIONS)
            .max(1);
        Self {
            min_connections: config.min_connections.unwrap_or(0).min(max_connections),
            max_connections,
            connect_timeout: config.connect_timeout().unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            max_idle: config.max_idle(),
            max_lifetime: config.max_lifetime(),
            create,
        }
    }
}

struct IdleConnection {
    conn: Connection,
    created: Instant,
    idle_since: Instant,
}

struct PoolState {
    idle: VecDeque<IdleConnection>,
    open: u32,
    closed: bool,
    keeper: Option<Connection>,
}

struct PoolInner {
    location: Location,
    options: PoolOptions,
    state: Mutex<PoolState>,
    available: Condvar,
}

/// Cheaply cloneable handle to a connection pool.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    pub fn new(location: Location, options: PoolOptions) -> Result<Self> {
        let keeper = match &location {
            Location::Memory(_) => Some(connect(&location, &options)?),
            Location::File(_) => None,
        };
        let pool = Self {
            inner: Arc::new(PoolInner {
                location,
                options,
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    open: 0,
                    closed: false,
                    keeper,
                }),
                available: Condvar::new(),
            }),
        };

        let now = Instant::now();
        let mut state = pool.inner.state.lock();
        for _ in 0..pool.inner.options.min_connections {
            let conn = connect(&pool.inner.location, &pool.inner.options)?;
            state.idle.push_back(IdleConnection {
                conn,
                created: now,
                idle_since: now,
            });
            state.open += 1;
        }
        drop(state);
        Ok(pool)
    }

    pub fn location(&self) -> &Location {
        &self.inner.location
    }

    /// Take a connection, waiting up to `connect_timeout` for one to free up.
    pub fn get(&self) -> Result<PooledConnection> {
        let inner = &self.inner;
        let deadline = Instant::now().checked_add(inner.options.connect_timeout);
        let mut state = inner.state.lock();

        loop {
            if state.closed {
                return Err(SqliteError::PoolClosed);
            }

            let now = Instant::now();
            while let Some(idle) = state.idle.pop_front() {
                if inner.is_stale(&idle, now) {
                    state.open -= 1;
                    continue;
                }
                return Ok(PooledConnection {
                    conn: Some(idle.conn),
                    created: idle.created,
                    pool: inner.clone(),
                });
            }

            if state.open < inner.options.max_connections {
                state.open += 1;
                let opened =
                    MutexGuard::unlocked(&mut state, || connect(&inner.location, &inner.options));
                return match opened {
                    Ok(conn) => Ok(PooledConnection {
                        conn: Some(conn),
                        created: Instant::now(),
                        pool: inner.clone(),
                    }),
                    Err(err) => {
                        state.open -= 1;
                        inner.available.notify_one();
                        Err(err)
                    }
                };
            }

            match deadline {
                Some(deadline) => {
                    if inner.available.wait_until(&mut state, deadline).timed_out() {
                        return Err(SqliteError::PoolTimeout(inner.options.connect_timeout));
                    }
                }
                // Too far out to represent: wait without one
                None => inner.available.wait(&mut state),
            }
        }
    }

    /// Drop idle connections and refuse new checkouts.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        let idle = state.idle.len() as u32;
        state.idle.clear();
        state.open -= idle;
        state.keeper = None;
        self.inner.available.notify_all();
        debug!(location = ?self.inner.location, "connection pool closed");
    }
}

impl PoolInner {
    fn is_stale(&self, idle: &IdleConnection, now: Instant) -> bool {
        let idle_expired = self
            .options
            .max_idle
            .is_some_and(|max| now.duration_since(idle.idle_since) > max);
        let lifetime_expired = self
            .options
            .max_lifetime
            .is_some_and(|max| now.duration_since(idle.created) > max);
        lifetime_expired || idle_expired
    }

    fn release(&self, conn: Connection, created: Instant) {
        let now = Instant::now();
        let mut state = self.state.lock();
        let retire = state.closed
            || self
                .options
                .max_lifetime
                .is_some_and(|max| now.duration_since(created) > max);
        if retire {
            state.open -= 1;
        } else {
            state.idle.push_back(IdleConnection {
                conn,
                created,
                idle_since: now,
            });
        }
        self.available.notify_one();
    }
}

fn connect(location: &Location, options: &PoolOptions) -> Result<Connection> {
    let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    if options.create || location.is_memory() {
        flags |= OpenFlags::SQLITE_OPEN_CREATE;
    }

    let conn = match location {
        Location::File(path) => Connection::open_with_flags(path, flags)?,
        Location::Memory(uri) => Connection::open_with_flags(uri, flags)?,
    };

    conn.pragma_update(None, "foreign_keys", true)?;
    conn.pragma_update(None, "case_sensitive_like", true)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    // memdb has no WAL, and its rollback journal stays with the connection
    let journal_mode = match location {
        Location::File(_) => "WAL",
        Location::Memory(_) => "MEMORY",
    };
    conn.pragma_update_and_check(None, "journal_mode", journal_mode, |row| {
        row.get::<_, String>(0)
    })?;
    Ok(conn)
}

/// A connection checked out of a [`Pool`], returned on drop.
///
/// A connection still inside a transaction is rolled back before it goes
/// back to the pool.
pub struct PooledConnection {
    conn: Option<Connection>,
    created: Instant,
    pool: Arc<PoolInner>,
}

impl PooledConnection {
    pub fn connection(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or(SqliteError::PoolClosed)
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if !conn.is_autocommit() {
            if let Err(err) = conn.execute_batch("ROLLBACK") {
                warn!(error = %err, "rollback on connection release failed");
                // Not safe to reuse
                let mut state = self.pool.state.lock();
                state.open -= 1;
                self.pool.available.notify_one();
                return;
            }
        }
        self.pool.release(conn, self.created);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_pool(max: u32, timeout: Duration) -> Pool {
        let location = Location::memory();
        let options = PoolOptions {
            min_connections: 0,
            max_connections: max,
            connect_timeout: timeout,
            max_idle: None,
            max_lifetime: None,
            create: true,
        };
        Pool::new(location, options).unwrap()
    }

    #[test]
    fn test_exhausted_pool_times_out() {
        let pool = memory_pool(1, Duration::from_millis(50));
        let held = pool.get().unwrap();
        let err = pool.get().err().unwrap();
        assert!(matches!(err, SqliteError::PoolTimeout(_)));
        drop(held);
        assert!(pool.get().is_ok());
    }

    #[test]
    fn test_memory_database_is_shared_and_kept_alive() {
        let pool = memory_pool(2, Duration::from_secs(1));
        {
            let conn = pool.get().unwrap();
            conn.connection()
                .unwrap()
                .execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1);")
                .unwrap();
        }
        let a = pool.get().unwrap();
        let b = pool.get().unwrap();
        let count: i64 = b
            .connection()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
        drop(a);
    }

    #[test]
    fn test_memory_pool_defaults_to_several_connections() {
        let options = PoolOptions::from_config(&BackendConfig::new(), true);
        assert_eq!(options.max_connections, DEFAULT_MAX_CONNECTIONS);

        let pool = Pool::new(Location::memory(), options).unwrap();
        let held: Vec<_> = (0..DEFAULT_MAX_CONNECTIONS)
            .map(|_| pool.get().unwrap())
            .collect();
        assert_eq!(held.len(), 8);
    }

    #[test]
    fn test_memory_reader_survives_concurrent_writer() {
        let pool = memory_pool(2, Duration::from_secs(1));
        pool.get()
            .unwrap()
            .connection()
            .unwrap()
            .execute_batch("CREATE TABLE t (x INTEGER)")
            .unwrap();

        let (began, wait_began) = std::sync::mpsc::channel();
        let writer = {
            let pool = pool.clone();
            std::thread::spawn(move || {
                let pooled = pool.get().unwrap();
                let conn = pooled.connection().unwrap();
                conn.execute_batch("BEGIN IMMEDIATE; INSERT INTO t VALUES (1);")
                    .unwrap();
                began.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(50));
                conn.execute_batch("COMMIT").unwrap();
            })
        };

        wait_began.recv().unwrap();
        let pooled = pool.get().unwrap();
        let conn = pooled.connection().unwrap();
        let count = |conn: &Connection| -> i64 {
            conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))
                .unwrap()
        };
        // Waits on the busy handler rather than failing with a lock error
        assert!(count(conn) <= 1);
        writer.join().unwrap();
        assert_eq!(count(conn), 1);
    }

    #[test]
    fn test_open_transaction_is_rolled_back_on_release() {
        let pool = memory_pool(1, Duration::from_secs(1));
        pool.get()
            .unwrap()
            .connection()
            .unwrap()
            .execute_batch("CREATE TABLE t (x INTEGER)")
            .unwrap();
        {
            let pooled = pool.get().unwrap();
            let conn = pooled.connection().unwrap();
            conn.execute_batch("BEGIN; INSERT INTO t VALUES (1);").unwrap();
        }
        let pooled = pool.get().unwrap();
        let conn = pooled.connection().unwrap();
        assert!(conn.is_autocommit());
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_unbounded_connect_timeout_still_hands_out_connections() {
        let pool = memory_pool(1, Duration::MAX);
        let held = pool.get().unwrap();
        let waiter = {
            let pool = pool.clone();
            std::thread::spawn(move || pool.get().map(|_| ()))
        };
        std::thread::sleep(Duration::from_millis(20));
        drop(held);
        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn test_closed_pool_refuses_checkout() {
        let pool = memory_pool(1, Duration::from_secs(1));
        pool.close();
        assert!(matches!(pool.get().err().unwrap(), SqliteError::PoolClosed));
    }
}
