//! Memory backend sessions
//!
//! A plain session applies each write immediately under the database lock.
//! A transaction works on a private copy of its profile and records every
//! write; `commit` replays the log against the current profile contents and
//! swaps the result in, so a failed replay leaves the store untouched.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::error::MemoryError;
use super::state::{Op, ProfileData, Selection};
use super::MemoryDatabase;
use crate::backend::{AsyncSession, EntryQuery, NativeResult, OrderBy, ScanCursor};
use crate::entry::Entry;
use crate::filter::TagFilter;

struct Pending {
    working: ProfileData,
    next_id: i64,
    ops: Vec<Op>,
}

pub struct MemorySession {
    db: Arc<MemoryDatabase>,
    profile: String,
    transaction: bool,
    pending: Option<Pending>,
    closed: bool,
}

impl MemorySession {
    pub(crate) async fn open(
        db: Arc<MemoryDatabase>,
        profile: String,
        transaction: bool,
    ) -> Result<Self, MemoryError> {
        let pending = {
            let state = db.state.read().await;
            let data = state
                .profiles
                .get(&profile)
                .ok_or_else(|| MemoryError::ProfileNotFound(profile.clone()))?;
            transaction.then(|| Pending {
                working: data.clone(),
                next_id: state.next_id,
                ops: Vec::new(),
            })
        };
        debug!(profile = %profile, transaction, "memory session opened");
        Ok(Self {
            db,
            profile,
            transaction,
            pending,
            closed: false,
        })
    }

    fn ensure_open(&self) -> Result<(), MemoryError> {
        if self.closed {
            return Err(MemoryError::SessionClosed);
        }
        Ok(())
    }

    async fn read<T>(
        &self,
        f: impl FnOnce(&ProfileData) -> Result<T, MemoryError> + Send,
    ) -> Result<T, MemoryError> {
        self.ensure_open()?;
        if let Some(pending) = &self.pending {
            return f(&pending.working);
        }
        let state = self.db.state.read().await;
        let data = state
            .profiles
            .get(&self.profile)
            .ok_or_else(|| MemoryError::ProfileNotFound(self.profile.clone()))?;
        f(data)
    }

    async fn write(&mut self, op: Op) -> Result<u64, MemoryError> {
        self.ensure_open()?;
        let now = Utc::now();
        if let Some(pending) = &mut self.pending {
            let affected = pending.working.apply(&op, &mut pending.next_id, now)?;
            pending.ops.push(op);
            return Ok(affected);
        }

        let mut state = self.db.state.write().await;
        let state = &mut *state;
        let data = state
            .profiles
            .get_mut(&self.profile)
            .ok_or_else(|| MemoryError::ProfileNotFound(self.profile.clone()))?;
        data.apply(&op, &mut state.next_id, now)
    }
}

#[async_trait]
impl AsyncSession for MemorySession {
    async fn count(
        &mut self,
        category: Option<&str>,
        tag_filter: Option<&TagFilter>,
    ) -> NativeResult<u64> {
        let now = Utc::now();
        let count = self
            .read(|data| Ok(data.matching(category, tag_filter, now).count() as u64))
            .await?;
        Ok(count)
    }

    async fn fetch(
        &mut self,
        category: &str,
        name: &str,
        _for_update: bool,
    ) -> NativeResult<Option<Entry>> {
        let now = Utc::now();
        let entry = self
            .read(|data| Ok(data.get_live(category, name, now).map(|item| item.entry.clone())))
            .await?;
        Ok(entry)
    }

    async fn fetch_all(&mut self, query: &EntryQuery) -> NativeResult<Vec<Entry>> {
        let selection = Selection {
            category: query.category.as_deref(),
            tag_filter: query.tag_filter.as_ref(),
            order_by: OrderBy::parse(query.order_by.as_deref())?,
            descending: query.descending,
            cursor: ScanCursor::Offset(0),
            limit: query.limit,
        };
        let now = Utc::now();
        let rows = self.read(|data| data.select(&selection, now)).await?;
        Ok(rows.into_iter().map(|row| row.entry).collect())
    }

    async fn insert(&mut self, entry: &Entry) -> NativeResult<()> {
        self.write(Op::Insert(entry.clone())).await?;
        Ok(())
    }

    async fn replace(&mut self, entry: &Entry) -> NativeResult<()> {
        self.write(Op::Replace(entry.clone())).await?;
        Ok(())
    }

    async fn remove(&mut self, category: &str, name: &str) -> NativeResult<()> {
        self.write(Op::Remove {
            category: category.to_string(),
            name: name.to_string(),
        })
        .await?;
        Ok(())
    }

    async fn remove_all(
        &mut self,
        category: Option<&str>,
        tag_filter: Option<&TagFilter>,
    ) -> NativeResult<u64> {
        let removed = self
            .write(Op::RemoveAll {
                category: category.map(str::to_string),
                tag_filter: tag_filter.cloned(),
            })
            .await?;
        Ok(removed)
    }

    async fn commit(&mut self) -> NativeResult<()> {
        self.ensure_open()?;
        if !self.transaction {
            return Err(MemoryError::NotTransaction.into());
        }
        self.closed = true;
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };

        let now = Utc::now();
        let mut state = self.db.state.write().await;
        let mut updated = state
            .profiles
            .get(&self.profile)
            .cloned()
            .ok_or_else(|| MemoryError::ProfileNotFound(self.profile.clone()))?;
        let mut next_id = state.next_id;
        for op in &pending.ops {
            updated.apply(op, &mut next_id, now)?;
        }
        state.profiles.insert(self.profile.clone(), updated);
        state.next_id = next_id;
        debug!(profile = %self.profile, ops = pending.ops.len(), "memory transaction committed");
        Ok(())
    }

    async fn rollback(&mut self) -> NativeResult<()> {
        self.ensure_open()?;
        if !self.transaction {
            return Err(MemoryError::NotTransaction.into());
        }
        self.closed = true;
        self.pending = None;
        Ok(())
    }

    async fn close(&mut self) -> NativeResult<()> {
        self.closed = true;
        self.pending = None;
        Ok(())
    }
}
