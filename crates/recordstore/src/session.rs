//! Sessions and transactions
//!
//! A [`SessionOpener`] is handed out by [`Store::session`] and
//! [`Store::transaction`] without touching the backend. [`SessionOpener::open`]
//! acquires the backend session under a timeout and yields a [`Session`].
//!
//! A transaction only persists through [`Session::commit`]. Closing,
//! rolling back, failing, dropping or cancelling it discards its writes.

use std::time::Duration;

use recordstore_core::{
    AsyncSession, Entry, EntryQuery, Error, NativeResult, Result, SyncSession, TagFilter,
};
use tokio::sync::OwnedSemaphorePermit;
use tracing::debug;

use crate::store::Store;

/// How long [`SessionOpener::open`] waits by default.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) enum SessionHandle {
    Sync(Box<dyn SyncSession>),
    Async(Box<dyn AsyncSession>),
}

/// A not-yet-opened session or transaction.
pub struct SessionOpener {
    store: Store,
    profile: Option<String>,
    transaction: bool,
    timeout: Duration,
    opened: bool,
}

impl SessionOpener {
    pub(crate) fn new(store: Store, profile: Option<String>, transaction: bool) -> Self {
        Self {
            store,
            profile,
            transaction,
            timeout: DEFAULT_SESSION_TIMEOUT,
            opened: false,
        }
    }

    /// Override how long `open` may take.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_transaction(&self) -> bool {
        self.transaction
    }

    /// Open the session. Each opener opens at most once; a second call fails
    /// `WRAPPER`. Running out of time, including while waiting for a free
    /// session slot, fails `TIMEOUT`.
    pub async fn open(&mut self) -> Result<Session> {
        if self.opened {
            return Err(Error::wrapper("Session already opened"));
        }
        self.opened = true;
        self.store.ensure_open()?;

        let store = self.store.clone();
        let profile = self.profile.clone();
        let transaction = self.transaction;
        let opening = async move {
            let permit = match store.session_slots() {
                Some(slots) => Some(
                    slots
                        .acquire_owned()
                        .await
                        .map_err(|_| Error::wrapper("Store is closed"))?,
                ),
                None => None,
            };
            let handle = store.open_session(profile, transaction).await?;
            Ok::<_, Error>((handle, permit))
        };

        let (handle, permit) = tokio::time::timeout(self.timeout, opening)
            .await
            .map_err(|_| {
                Error::timeout(format!("Session open timed out after {:?}", self.timeout))
            })??;

        debug!(
            uri = self.store.uri(),
            profile = ?self.profile,
            transaction = self.transaction,
            "session opened"
        );
        Ok(Session {
            store: self.store.clone(),
            handle: Some(handle),
            transaction: self.transaction,
            permit,
        })
    }
}

/// An open session on one profile.
///
/// Operations are strictly ordered (`&mut self`). After [`close`](Self::close),
/// [`commit`](Self::commit) or [`rollback`](Self::rollback) every operation
/// fails `WRAPPER`.
pub struct Session {
    store: Store,
    handle: Option<SessionHandle>,
    transaction: bool,
    /// Session slot, held until the session closes
    permit: Option<OwnedSemaphorePermit>,
}

fn closed() -> Error {
    Error::wrapper("Session is closed")
}

impl Session {
    pub fn is_transaction(&self) -> bool {
        self.transaction
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_none()
    }

    /// Run `op` against a blocking session on tokio's blocking pool.
    ///
    /// The backend session travels into the blocking task and back. If this
    /// future is dropped mid-call the session is dropped with the task,
    /// which rolls back whatever it had not committed.
    async fn run_sync<T, F>(&mut self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn SyncSession) -> NativeResult<T> + Send + 'static,
    {
        let mut session = match self.handle.take() {
            Some(SessionHandle::Sync(session)) => session,
            other => {
                self.handle = other;
                return Err(closed());
            }
        };
        let joined = tokio::task::spawn_blocking(move || {
            let result = op(session.as_mut());
            (session, result)
        })
        .await;
        match joined {
            Ok((session, result)) => {
                self.handle = Some(SessionHandle::Sync(session));
                result.map_err(|err| self.store.backend().translate_error(err))
            }
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => Err(Error::unexpected(format!("Blocking session call failed: {err}"))),
        }
    }

    /// Count live entries matching `category` and `tag_filter`.
    pub async fn count(
        &mut self,
        category: Option<&str>,
        tag_filter: Option<&TagFilter>,
    ) -> Result<u64> {
        match self.handle.as_mut() {
            None => Err(closed()),
            Some(SessionHandle::Async(session)) => session
                .count(category, tag_filter)
                .await
                .map_err(|e| self.store.backend().translate_error(e)),
            Some(SessionHandle::Sync(_)) => {
                let category = category.map(str::to_string);
                let tag_filter = tag_filter.cloned();
                self.run_sync(move |s| s.count(category.as_deref(), tag_filter.as_ref()))
                    .await
            }
        }
    }

    /// Fetch one live entry; missing or expired entries fail `NOT_FOUND`.
    pub async fn fetch(&mut self, category: &str, name: &str, for_update: bool) -> Result<Entry> {
        self.fetch_optional(category, name, for_update)
            .await?
            .ok_or_else(|| Error::not_found(format!("Entry {category}/{name} not found")))
    }

    /// Fetch one live entry, or `None` if it is missing or expired.
    pub async fn fetch_optional(
        &mut self,
        category: &str,
        name: &str,
        for_update: bool,
    ) -> Result<Option<Entry>> {
        match self.handle.as_mut() {
            None => Err(closed()),
            Some(SessionHandle::Async(session)) => session
                .fetch(category, name, for_update)
                .await
                .map_err(|e| self.store.backend().translate_error(e)),
            Some(SessionHandle::Sync(_)) => {
                let (category, name) = (category.to_string(), name.to_string());
                self.run_sync(move |s| s.fetch(&category, &name, for_update))
                    .await
            }
        }
    }

    pub async fn fetch_all(&mut self, query: &EntryQuery) -> Result<Vec<Entry>> {
        match self.handle.as_mut() {
            None => Err(closed()),
            Some(SessionHandle::Async(session)) => session
                .fetch_all(query)
                .await
                .map_err(|e| self.store.backend().translate_error(e)),
            Some(SessionHandle::Sync(_)) => {
                let query = query.clone();
                self.run_sync(move |s| s.fetch_all(&query)).await
            }
        }
    }

    /// Insert a new entry; an existing live entry with the same category
    /// and name fails `DUPLICATE`.
    pub async fn insert(&mut self, entry: &Entry) -> Result<()> {
        match self.handle.as_mut() {
            None => Err(closed()),
            Some(SessionHandle::Async(session)) => session
                .insert(entry)
                .await
                .map_err(|e| self.store.backend().translate_error(e)),
            Some(SessionHandle::Sync(_)) => {
                let entry = entry.clone();
                self.run_sync(move |s| s.insert(&entry)).await
            }
        }
    }

    /// Overwrite an existing live entry; fails `NOT_FOUND` if there is none.
    pub async fn replace(&mut self, entry: &Entry) -> Result<()> {
        match self.handle.as_mut() {
            None => Err(closed()),
            Some(SessionHandle::Async(session)) => session
                .replace(entry)
                .await
                .map_err(|e| self.store.backend().translate_error(e)),
            Some(SessionHandle::Sync(_)) => {
                let entry = entry.clone();
                self.run_sync(move |s| s.replace(&entry)).await
            }
        }
    }

    pub async fn remove(&mut self, category: &str, name: &str) -> Result<()> {
        match self.handle.as_mut() {
            None => Err(closed()),
            Some(SessionHandle::Async(session)) => session
                .remove(category, name)
                .await
                .map_err(|e| self.store.backend().translate_error(e)),
            Some(SessionHandle::Sync(_)) => {
                let (category, name) = (category.to_string(), name.to_string());
                self.run_sync(move |s| s.remove(&category, &name)).await
            }
        }
    }

    /// Remove every live entry matching `category` and `tag_filter`,
    /// returning how many were removed.
    pub async fn remove_all(
        &mut self,
        category: Option<&str>,
        tag_filter: Option<&TagFilter>,
    ) -> Result<u64> {
        match self.handle.as_mut() {
            None => Err(closed()),
            Some(SessionHandle::Async(session)) => session
                .remove_all(category, tag_filter)
                .await
                .map_err(|e| self.store.backend().translate_error(e)),
            Some(SessionHandle::Sync(_)) => {
                let category = category.map(str::to_string);
                let tag_filter = tag_filter.cloned();
                self.run_sync(move |s| s.remove_all(category.as_deref(), tag_filter.as_ref()))
                    .await
            }
        }
    }

    /// Forget the backend session and free its slot.
    fn release(&mut self) {
        self.handle = None;
        drop(self.permit.take());
    }

    fn ensure_transaction(&self) -> Result<()> {
        if !self.transaction {
            return Err(Error::wrapper("Session is not a transaction"));
        }
        if self.handle.is_none() {
            return Err(closed());
        }
        Ok(())
    }

    /// Persist the transaction and close it.
    pub async fn commit(&mut self) -> Result<()> {
        self.ensure_transaction()?;
        let result = match self.handle.as_mut() {
            Some(SessionHandle::Async(session)) => {
                session.commit().await.map_err(|e| self.store.backend().translate_error(e))
            }
            _ => self.run_sync(|s| s.commit()).await,
        };
        self.release();
        debug!(uri = self.store.uri(), ok = result.is_ok(), "transaction committed");
        result
    }

    /// Discard the transaction and close it.
    pub async fn rollback(&mut self) -> Result<()> {
        self.ensure_transaction()?;
        let result = match self.handle.as_mut() {
            Some(SessionHandle::Async(session)) => {
                session.rollback().await.map_err(|e| self.store.backend().translate_error(e))
            }
            _ => self.run_sync(|s| s.rollback()).await,
        };
        self.release();
        debug!(uri = self.store.uri(), "transaction rolled back");
        result
    }

    /// Release the backend session, rolling back an uncommitted
    /// transaction. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        let result = match self.handle.as_mut() {
            None => return Ok(()),
            Some(SessionHandle::Async(session)) => {
                session.close().await.map_err(|e| self.store.backend().translate_error(e))
            }
            Some(SessionHandle::Sync(_)) => self.run_sync(|s| s.close()).await,
        };
        self.release();
        debug!(uri = self.store.uri(), "session closed");
        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if self.transaction {
            debug!(uri = self.store.uri(), "transaction dropped without commit");
        }
        match handle {
            // Releasing a blocking session may run a rollback; keep it off
            // the async worker threads when a runtime is available.
            SessionHandle::Sync(session) => match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn_blocking(move || drop(session));
                }
                Err(_) => drop(session),
            },
            SessionHandle::Async(session) => drop(session),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("uri", &self.store.uri())
            .field("transaction", &self.transaction)
            .field("closed", &self.handle.is_none())
            .finish()
    }
}
