//! Offset and keyset scans
//!
//! A scan is constructed without touching the backend; the first pull opens
//! the backend scan and any error it raises, such as an invalid `order_by`
//! column, surfaces there.
//!
//! Async backends hand back a stream that is polled on the caller's task.
//! Blocking backends are drained by a worker thread owned by the scan, which
//! feeds rows through a bounded channel:
//!
//! ```text
//! backend iterator ──▶ worker thread ──▶ mpsc (bounded) ──▶ Scan::next()
//! ```
//!
//! [`Scan::close`] signals the worker and joins it. A scan dropped without
//! `close` drops its receiver, and the worker stops at its next send.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use futures::stream::{self, BoxStream, StreamExt};
use recordstore_core::backend::ScanStream;
use recordstore_core::{
    Entry, Error, NativeResult, Result, ScanRequest, ScanRow, SyncStore, TagFilter,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::store::{Store, StoreHandle};

/// Rows buffered between a scan worker and its consumer.
pub const SCAN_CHANNEL_CAPACITY: usize = 8;

/// Parameters shared by offset and keyset scans.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub profile: Option<String>,
    pub category: Option<String>,
    pub tag_filter: Option<TagFilter>,
    pub limit: Option<usize>,
    pub order_by: Option<String>,
    pub descending: bool,
}

impl ScanOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn tag_filter(mut self, filter: TagFilter) -> Self {
        self.tag_filter = Some(filter);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Order by `id` (default), `category`, `name` or `expiry`. Other
    /// columns fail `INPUT` on the first pull.
    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by = Some(column.into());
        self
    }

    pub fn descending(mut self, descending: bool) -> Self {
        self.descending = descending;
        self
    }
}

struct Worker {
    rows: mpsc::Receiver<NativeResult<ScanRow>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(store: Arc<dyn SyncStore>, request: ScanRequest) -> Result<Self> {
        let (tx, rows) = mpsc::channel(SCAN_CHANNEL_CAPACITY);
        let stop = Arc::new(AtomicBool::new(false));
        let stopped = stop.clone();

        let thread = std::thread::Builder::new()
            .name("recordstore-scan".to_string())
            .spawn(move || {
                let iter = match store.scan(request) {
                    Ok(iter) => iter,
                    Err(err) => {
                        let _ = tx.blocking_send(Err(err));
                        return;
                    }
                };
                for row in iter {
                    if stopped.load(Ordering::Acquire) {
                        break;
                    }
                    let failed = row.is_err();
                    // Receiver gone: the scan was dropped or closed
                    if tx.blocking_send(row).is_err() || failed {
                        break;
                    }
                }
            })
            .map_err(|err| {
                Error::unexpected(format!("Failed to start scan worker: {err}")).with_source(err)
            })?;

        debug!("scan worker started");
        Ok(Self {
            rows,
            stop,
            thread: Some(thread),
        })
    }

    /// Stop the worker and wait for it to exit.
    async fn shutdown(mut self) {
        self.stop.store(true, Ordering::Release);
        self.rows.close();
        // Unblock a worker waiting on a full channel
        while self.rows.try_recv().is_ok() {}
        if let Some(thread) = self.thread.take() {
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => debug!("scan worker joined"),
                _ => warn!("scan worker exited abnormally"),
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Best effort: the receiver drops with us and the next send fails
        self.stop.store(true, Ordering::Release);
    }
}

enum RowSource {
    Pending(ScanRequest),
    Stream(ScanStream),
    Worker(Worker),
    Done,
}

/// A lazy, forward-only scan over live entries.
pub struct Scan {
    store: Store,
    source: RowSource,
}

impl Scan {
    pub(crate) fn new(store: Store, request: ScanRequest) -> Self {
        Self {
            store,
            source: RowSource::Pending(request),
        }
    }

    fn start(&mut self, request: ScanRequest) -> Result<()> {
        self.store.ensure_open()?;
        self.source = match self.store.handle() {
            StoreHandle::Async(store) => RowSource::Stream(store.scan(request)),
            StoreHandle::Sync(store) => RowSource::Worker(Worker::spawn(store.clone(), request)?),
        };
        Ok(())
    }

    pub(crate) async fn next_row(&mut self) -> Result<Option<ScanRow>> {
        if matches!(self.source, RowSource::Pending(_)) {
            // A failed start leaves the scan done
            if let RowSource::Pending(request) =
                std::mem::replace(&mut self.source, RowSource::Done)
            {
                self.start(request)?;
            }
        }

        let next = match &mut self.source {
            RowSource::Stream(stream) => stream.next().await,
            RowSource::Worker(worker) => worker.rows.recv().await,
            RowSource::Pending(_) | RowSource::Done => return Ok(None),
        };
        match next {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(err)) => {
                self.finish().await;
                Err(self.store.backend().translate_error(err))
            }
            None => {
                self.finish().await;
                Ok(None)
            }
        }
    }

    async fn finish(&mut self) {
        if let RowSource::Worker(worker) = std::mem::replace(&mut self.source, RowSource::Done) {
            worker.shutdown().await;
        }
    }

    /// Next matching entry, or `None` once the scan is exhausted.
    pub async fn next(&mut self) -> Result<Option<Entry>> {
        Ok(self.next_row().await?.map(|row| row.entry))
    }

    /// Drain the remaining entries in order.
    pub async fn fetch_all(mut self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next().await? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Stop the scan, joining its worker thread if it has one. Later pulls
    /// return `None`.
    pub async fn close(&mut self) {
        self.finish().await;
    }

    pub fn into_stream(self) -> BoxStream<'static, Result<Entry>> {
        stream::unfold(self, |mut scan| async move {
            match scan.next().await {
                Ok(Some(entry)) => Some((Ok(entry), scan)),
                Ok(None) => None,
                Err(err) => Some((Err(err), scan)),
            }
        })
        .boxed()
    }
}

/// A scan resuming after a row id, tracking the cursor as it goes.
pub struct KeysetScan {
    scan: Scan,
    last_id: Option<i64>,
}

impl KeysetScan {
    pub(crate) fn new(scan: Scan, last_id: Option<i64>) -> Self {
        Self { scan, last_id }
    }

    /// Row id of the most recently yielded entry; pass it as `last_id` to
    /// fetch the next page.
    pub fn last_id(&self) -> Option<i64> {
        self.last_id
    }

    pub async fn next(&mut self) -> Result<Option<Entry>> {
        let row = self.scan.next_row().await?;
        Ok(row.map(|row| {
            self.last_id = Some(row.id);
            row.entry
        }))
    }

    /// Drain the remaining entries in order. The cursor stays readable
    /// through [`last_id`](Self::last_id) afterwards.
    pub async fn fetch_all(&mut self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next().await? {
            entries.push(entry);
        }
        Ok(entries)
    }

    pub async fn close(&mut self) {
        self.scan.close().await;
    }
}
