//! Lazy batched scans
//!
//! A scan does nothing until it is first pulled. Rows are then read in
//! batches of [`BATCH_SIZE`], each on a freshly checked-out connection, so a
//! slow consumer never pins a connection between batches. The first batch
//! honours the starting cursor; every later batch resumes strictly after the
//! last row yielded.
//!
//! A keyset cursor whose row has since been deleted has no ordering value to
//! resume from. The scan then keeps to rows whose id lies past the cursor id
//! in scan direction, in the requested order.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;
use recordstore_core::{NativeResult, OrderBy, ScanCursor, ScanRequest, ScanRow, StoreKey};
use tracing::{debug, trace};

use crate::error::Result;
use crate::pool::Pool;
use crate::query::{Anchor, RowQuery};
use crate::session::profile_id;
use crate::store::stored_default_profile;

pub const BATCH_SIZE: usize = 64;

struct Position {
    profile_id: i64,
    order_by: OrderBy,
    offset: usize,
    after: Option<Anchor>,
    past_id: Option<i64>,
    remaining: Option<usize>,
}

pub struct SqliteScan {
    pool: Pool,
    key: Arc<RwLock<StoreKey>>,
    request: ScanRequest,
    position: Option<Position>,
    buffer: VecDeque<ScanRow>,
    exhausted: bool,
}

impl SqliteScan {
    pub(crate) fn new(pool: Pool, key: Arc<RwLock<StoreKey>>, request: ScanRequest) -> Self {
        Self {
            pool,
            key,
            request,
            position: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    fn fill(&mut self) -> Result<()> {
        let pooled = self.pool.get()?;
        let db = pooled.connection()?;

        let position = match self.position.take() {
            Some(position) => position,
            None => {
                let order_by = OrderBy::parse(self.request.order_by.as_deref())?;
                let profile = match &self.request.profile {
                    Some(profile) => profile.clone(),
                    None => stored_default_profile(db)?,
                };
                let profile_id = profile_id(db, &profile)?;
                let (offset, after, past_id) = match self.request.cursor {
                    ScanCursor::Offset(offset) => (offset, None, None),
                    ScanCursor::After(None) => (0, None, None),
                    ScanCursor::After(Some(id)) => {
                        match Anchor::lookup(db, profile_id, order_by, id)? {
                            Some(anchor) => (0, Some(anchor), None),
                            None => {
                                debug!(id, "keyset cursor row is gone, resuming past its id");
                                (0, None, Some(id))
                            }
                        }
                    }
                };
                Position {
                    profile_id,
                    order_by,
                    offset,
                    after,
                    past_id,
                    remaining: self.request.limit,
                }
            }
        };

        let batch = position.remaining.map_or(BATCH_SIZE, |r| r.min(BATCH_SIZE));
        let rows = if batch == 0 {
            Vec::new()
        } else {
            RowQuery {
                profile_id: position.profile_id,
                category: self.request.category.as_deref(),
                tag_filter: self.request.tag_filter.as_ref(),
                order_by: position.order_by,
                descending: self.request.descending,
                after: position.after.as_ref(),
                past_id: position.past_id,
                offset: position.offset,
                limit: Some(batch),
            }
            .rows(db, &self.key.read())?
        };
        trace!(rows = rows.len(), "scan batch");

        self.exhausted = rows.len() < batch || batch == 0;
        let after = rows
            .last()
            .map(|row| Anchor::after_row(position.order_by, row))
            .or(position.after);
        self.position = Some(Position {
            offset: 0,
            after,
            remaining: position.remaining.map(|r| r - rows.len()),
            ..position
        });
        self.buffer.extend(rows);
        Ok(())
    }
}

impl Iterator for SqliteScan {
    type Item = NativeResult<ScanRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(err) = self.fill() {
                self.exhausted = true;
                self.buffer.clear();
                return Some(Err(err.into()));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
