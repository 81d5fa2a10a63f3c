// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process source and destination stores.
//!
//! [`MemorySource`] keeps an ordered log in memory and serves finite and
//! tailing cursors over it; appends wake blocked tailing cursors through a
//! `watch` channel. [`MemoryDestination`] records every accepted batch.
//!
//! Both support fault injection (failed listings, failed queries, rejected
//! or transport-failed applies) so the engine's error paths can be driven
//! without a real server.

use super::{
    ApplyResponse, BoxFuture, Bound, DestinationStore, LogCursor, LogQuery, SortOrder, SourceStore,
    StoreError,
};
use crate::entry::{database_of, LogEntry, Timestamp};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::trace;

/// Injected source failures.
#[derive(Default)]
struct SourceFaults {
    list: Option<StoreError>,
    find: Option<StoreError>,
    tail_open: Option<StoreError>,
    /// Tailing cursors fail instead of delivering an entry at or after this timestamp.
    tail_at: Option<(Timestamp, StoreError)>,
    /// Tailing cursors close (without timing out) after this many entries.
    close_tail_after: Option<usize>,
}

struct SourceInner {
    log: RwLock<Vec<LogEntry>>,
    databases: RwLock<BTreeSet<String>>,
    /// Bumped on every append; tailing cursors wait on it.
    version_tx: watch::Sender<u64>,
    faults: Mutex<SourceFaults>,
    list_calls: AtomicUsize,
    find_calls: AtomicUsize,
    tail_opens: AtomicUsize,
    tail_bounds: Mutex<Vec<Bound>>,
}

/// In-memory operation log.
///
/// Cloning is cheap and shares the underlying log.
#[derive(Clone)]
pub struct MemorySource {
    inner: Arc<SourceInner>,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource {
    /// Create an empty log with no databases.
    pub fn new() -> Self {
        let (version_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(SourceInner {
                log: RwLock::new(Vec::new()),
                databases: RwLock::new(BTreeSet::new()),
                version_tx,
                faults: Mutex::new(SourceFaults::default()),
                list_calls: AtomicUsize::new(0),
                find_calls: AtomicUsize::new(0),
                tail_opens: AtomicUsize::new(0),
                tail_bounds: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a database (as if it had been created on the source).
    pub async fn add_database(&self, name: impl Into<String>) {
        self.inner.databases.write().await.insert(name.into());
    }

    /// Append an entry to the log.
    ///
    /// The entry's database is registered automatically. Fails if the
    /// timestamp does not strictly increase.
    pub async fn append(&self, entry: LogEntry) -> Result<(), StoreError> {
        {
            let mut log = self.inner.log.write().await;
            if let Some(last) = log.last() {
                if entry.timestamp <= last.timestamp {
                    return Err(StoreError::query(format!(
                        "out of order append: {} after {}",
                        entry.timestamp, last.timestamp
                    )));
                }
            }
            if !entry.namespace.is_empty() {
                self.inner
                    .databases
                    .write()
                    .await
                    .insert(database_of(&entry.namespace).to_string());
            }
            trace!(ts = %entry.timestamp, op = %entry.op, ns = %entry.namespace, "Appended to memory log");
            log.push(entry);
        }
        self.inner.version_tx.send_modify(|v| *v += 1);
        Ok(())
    }

    /// Append several entries in order.
    pub async fn extend(&self, entries: impl IntoIterator<Item = LogEntry>) -> Result<(), StoreError> {
        for entry in entries {
            self.append(entry).await?;
        }
        Ok(())
    }

    /// Snapshot of the whole log.
    pub async fn entries(&self) -> Vec<LogEntry> {
        self.inner.log.read().await.clone()
    }

    /// Make `list_databases()` fail.
    pub async fn fail_list(&self, error: StoreError) {
        self.inner.faults.lock().await.list = Some(error);
    }

    /// Make `find_log()` fail.
    pub async fn fail_find(&self, error: StoreError) {
        self.inner.faults.lock().await.find = Some(error);
    }

    /// Make `open_tail()` fail.
    pub async fn fail_tail_open(&self, error: StoreError) {
        self.inner.faults.lock().await.tail_open = Some(error);
    }

    /// Make tailing cursors fail when they reach `at`.
    pub async fn fail_tail_at(&self, at: Timestamp, error: StoreError) {
        self.inner.faults.lock().await.tail_at = Some((at, error));
    }

    /// Make every tailing cursor close after delivering `entries` entries,
    /// as a server-side cursor kill would.
    pub async fn close_tail_after(&self, entries: usize) {
        self.inner.faults.lock().await.close_tail_after = Some(entries);
    }

    /// Lower bound of every `open_tail()` query, in call order.
    pub async fn tail_bounds(&self) -> Vec<Bound> {
        self.inner.tail_bounds.lock().await.clone()
    }

    /// Number of `list_databases()` calls.
    pub fn list_calls(&self) -> usize {
        self.inner.list_calls.load(Ordering::SeqCst)
    }

    /// Number of `find_log()` calls.
    pub fn find_calls(&self) -> usize {
        self.inner.find_calls.load(Ordering::SeqCst)
    }

    /// Number of `open_tail()` calls.
    pub fn tail_opens(&self) -> usize {
        self.inner.tail_opens.load(Ordering::SeqCst)
    }
}

impl SourceStore for MemorySource {
    fn list_databases(&self) -> BoxFuture<'_, Vec<String>> {
        Box::pin(async move {
            self.inner.list_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.inner.faults.lock().await.list.clone() {
                return Err(err);
            }
            Ok(self.inner.databases.read().await.iter().cloned().collect())
        })
    }

    fn find_log(
        &self,
        query: LogQuery,
        order: SortOrder,
        limit: Option<usize>,
    ) -> BoxFuture<'_, Box<dyn LogCursor>> {
        Box::pin(async move {
            self.inner.find_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.inner.faults.lock().await.find.clone() {
                return Err(err);
            }

            let log = self.inner.log.read().await;
            let matching = log.iter().filter(|e| query.matches(e)).cloned();
            let mut entries: VecDeque<LogEntry> = match order {
                SortOrder::Ascending => matching.collect(),
                SortOrder::Descending => matching.rev().collect(),
            };
            if let Some(limit) = limit {
                entries.truncate(limit);
            }

            Ok(Box::new(SnapshotCursor { entries }) as Box<dyn LogCursor>)
        })
    }

    fn open_tail(&self, query: LogQuery, idle_timeout: Duration) -> BoxFuture<'_, Box<dyn LogCursor>> {
        Box::pin(async move {
            self.inner.tail_opens.fetch_add(1, Ordering::SeqCst);
            self.inner.tail_bounds.lock().await.push(query.bound);
            let faults = self.inner.faults.lock().await;
            if let Some(err) = faults.tail_open.clone() {
                return Err(err);
            }
            let remaining = faults.close_tail_after;
            drop(faults);

            Ok(Box::new(TailCursor {
                inner: Arc::clone(&self.inner),
                version_rx: self.inner.version_tx.subscribe(),
                query,
                delivered: None,
                idle_timeout,
                timed_out: false,
                remaining,
            }) as Box<dyn LogCursor>)
        })
    }
}

/// Finite cursor over a snapshot taken at open time.
struct SnapshotCursor {
    entries: VecDeque<LogEntry>,
}

impl LogCursor for SnapshotCursor {
    fn next(&mut self) -> BoxFuture<'_, Option<LogEntry>> {
        Box::pin(async move { Ok(self.entries.pop_front()) })
    }
}

/// Tailing cursor: waits for appends up to the idle timeout.
struct TailCursor {
    inner: Arc<SourceInner>,
    version_rx: watch::Receiver<u64>,
    query: LogQuery,
    /// Last timestamp handed out by this cursor.
    delivered: Option<Timestamp>,
    idle_timeout: Duration,
    timed_out: bool,
    /// Entries left before the cursor closes; `None` never closes.
    remaining: Option<usize>,
}

impl TailCursor {
    async fn next_matching(&self) -> Option<LogEntry> {
        let log = self.inner.log.read().await;
        let start = match self.delivered {
            Some(ts) => log.partition_point(|e| e.timestamp <= ts),
            None => 0,
        };
        log[start..].iter().find(|e| self.query.matches(e)).cloned()
    }
}

impl LogCursor for TailCursor {
    fn next(&mut self) -> BoxFuture<'_, Option<LogEntry>> {
        Box::pin(async move {
            self.timed_out = false;
            if self.remaining == Some(0) {
                return Ok(None);
            }
            loop {
                // Mark the current version seen before scanning so an append
                // racing with the scan still wakes us.
                self.version_rx.borrow_and_update();

                if let Some(entry) = self.next_matching().await {
                    if let Some((at, err)) = &self.inner.faults.lock().await.tail_at {
                        if entry.timestamp >= *at {
                            return Err(err.clone());
                        }
                    }
                    self.delivered = Some(entry.timestamp);
                    if let Some(remaining) = self.remaining.as_mut() {
                        *remaining -= 1;
                    }
                    return Ok(Some(entry));
                }

                match tokio::time::timeout(self.idle_timeout, self.version_rx.changed()).await {
                    Ok(Ok(())) => continue,
                    // Sender lives as long as the source; treat its loss as a dead cursor.
                    Ok(Err(_)) => return Ok(None),
                    Err(_) => {
                        self.timed_out = true;
                        return Ok(None);
                    }
                }
            }
        })
    }

    fn timed_out(&self) -> bool {
        self.timed_out
    }
}

/// In-memory destination that records accepted entries in apply order.
#[derive(Default)]
pub struct MemoryDestination {
    applied: RwLock<Vec<LogEntry>>,
    rejections: Mutex<HashMap<Timestamp, String>>,
    transport_failures: Mutex<HashMap<Timestamp, StoreError>>,
    calls: AtomicUsize,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse any batch containing `ts` with `reason` (a logical rejection).
    pub async fn reject(&self, ts: Timestamp, reason: impl Into<String>) {
        self.rejections.lock().await.insert(ts, reason.into());
    }

    /// Fail any batch containing `ts` with a transport error.
    pub async fn fail_transport(&self, ts: Timestamp, error: StoreError) {
        self.transport_failures.lock().await.insert(ts, error);
    }

    /// Entries accepted so far, in apply order.
    pub async fn applied(&self) -> Vec<LogEntry> {
        self.applied.read().await.clone()
    }

    /// Timestamps accepted so far, in apply order.
    pub async fn applied_timestamps(&self) -> Vec<Timestamp> {
        self.applied.read().await.iter().map(|e| e.timestamp).collect()
    }

    /// Number of `atomic_apply()` calls, accepted or not.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DestinationStore for MemoryDestination {
    fn atomic_apply<'a>(&'a self, batch: &'a [LogEntry]) -> BoxFuture<'a, ApplyResponse> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);

            {
                let failures = self.transport_failures.lock().await;
                if let Some(err) = batch.iter().find_map(|e| failures.get(&e.timestamp)) {
                    return Err(err.clone());
                }
            }

            {
                let rejections = self.rejections.lock().await;
                if let Some(reason) = batch.iter().find_map(|e| rejections.get(&e.timestamp)) {
                    return Ok(ApplyResponse::rejected(reason.clone()));
                }
            }

            self.applied.write().await.extend(batch.iter().cloned());
            Ok(ApplyResponse::accepted())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::OpType;
    use crate::store::{Bound, NamespaceFilter};

    fn insert(ts: u64, ns: &str) -> LogEntry {
        LogEntry::new(Timestamp::new(ts), OpType::Insert, ns)
    }

    async fn drain(cursor: &mut Box<dyn LogCursor>) -> Vec<u64> {
        let mut out = Vec::new();
        while let Some(e) = cursor.next().await.unwrap() {
            out.push(e.timestamp.as_u64());
        }
        out
    }

    #[tokio::test]
    async fn test_append_registers_database() {
        let source = MemorySource::new();
        source.append(insert(1, "shop.orders")).await.unwrap();
        let dbs = source.list_databases().await.unwrap();
        assert_eq!(dbs, vec!["shop".to_string()]);
    }

    #[tokio::test]
    async fn test_append_rejects_out_of_order() {
        let source = MemorySource::new();
        source.append(insert(5, "a.b")).await.unwrap();
        assert!(source.append(insert(5, "a.b")).await.is_err());
        assert!(source.append(insert(4, "a.b")).await.is_err());
        assert_eq!(source.entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_find_log_ascending_with_bound() {
        let source = MemorySource::new();
        source.extend((1..=5).map(|t| insert(t, "a.b"))).await.unwrap();

        let query = LogQuery::new(Bound::After(Timestamp::new(2)), NamespaceFilter::any());
        let mut cursor = source.find_log(query, SortOrder::Ascending, None).await.unwrap();
        assert_eq!(drain(&mut cursor).await, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_find_log_descending_limit() {
        let source = MemorySource::new();
        source.extend((1..=5).map(|t| insert(t, "a.b"))).await.unwrap();

        let mut cursor = source
            .find_log(LogQuery::all(), SortOrder::Descending, Some(1))
            .await
            .unwrap();
        assert_eq!(drain(&mut cursor).await, vec![5]);
    }

    #[tokio::test]
    async fn test_find_log_namespace_filter() {
        let source = MemorySource::new();
        source.append(insert(1, "a.x")).await.unwrap();
        source.append(insert(2, "admin.y")).await.unwrap();
        source.append(insert(3, "a.z")).await.unwrap();

        let query = LogQuery::new(Bound::Unbounded, NamespaceFilter::databases(["a"]));
        let mut cursor = source.find_log(query, SortOrder::Ascending, None).await.unwrap();
        assert_eq!(drain(&mut cursor).await, vec![1, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tail_times_out_when_idle() {
        let source = MemorySource::new();
        source.append(insert(1, "a.b")).await.unwrap();

        let mut cursor = source
            .open_tail(LogQuery::all(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(cursor.next().await.unwrap().map(|e| e.timestamp.as_u64()), Some(1));
        assert!(!cursor.timed_out());
        assert!(cursor.next().await.unwrap().is_none());
        assert!(cursor.timed_out());
        assert_eq!(source.tail_opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tail_wakes_on_append() {
        let source = MemorySource::new();
        let mut cursor = source
            .open_tail(
                LogQuery::new(Bound::AtOrAfter(Timestamp::new(2)), NamespaceFilter::any()),
                Duration::from_secs(10),
            )
            .await
            .unwrap();

        let writer = source.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            writer.append(insert(1, "a.b")).await.unwrap();
            writer.append(insert(2, "a.b")).await.unwrap();
        });

        let entry = cursor.next().await.unwrap().unwrap();
        assert_eq!(entry.timestamp, Timestamp::new(2));
        assert!(!cursor.timed_out());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tail_closes_after_limit() {
        let source = MemorySource::new();
        source.extend([insert(1, "a.b"), insert(2, "a.b"), insert(3, "a.b")]).await.unwrap();
        source.close_tail_after(2).await;

        let query = LogQuery::new(Bound::AtOrAfter(Timestamp::new(1)), NamespaceFilter::any());
        let mut cursor = source.open_tail(query, Duration::from_secs(1)).await.unwrap();
        assert!(cursor.next().await.unwrap().is_some());
        assert!(cursor.next().await.unwrap().is_some());
        assert!(cursor.next().await.unwrap().is_none());
        // Closed, not idle
        assert!(!cursor.timed_out());
        assert_eq!(source.tail_bounds().await, vec![Bound::AtOrAfter(Timestamp::new(1))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tail_fault_injection() {
        let source = MemorySource::new();
        source.extend((1..=3).map(|t| insert(t, "a.b"))).await.unwrap();
        source.fail_tail_at(Timestamp::new(2), StoreError::transport("reset")).await;

        let mut cursor = source
            .open_tail(LogQuery::all(), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(cursor.next().await.unwrap().is_some());
        assert!(cursor.next().await.is_err());
    }

    #[tokio::test]
    async fn test_destination_records_in_order() {
        let dest = MemoryDestination::new();
        dest.atomic_apply(&[insert(1, "a.b")]).await.unwrap();
        dest.atomic_apply(&[insert(2, "a.b")]).await.unwrap();
        assert_eq!(
            dest.applied_timestamps().await,
            vec![Timestamp::new(1), Timestamp::new(2)]
        );
        assert_eq!(dest.call_count(), 2);
    }

    #[tokio::test]
    async fn test_destination_rejection_is_atomic() {
        let dest = MemoryDestination::new();
        dest.reject(Timestamp::new(2), "E11000 duplicate key").await;

        let response = dest
            .atomic_apply(&[insert(1, "a.b"), insert(2, "a.b")])
            .await
            .unwrap();
        assert!(!response.ok);
        assert!(dest.applied().await.is_empty());
    }

    #[tokio::test]
    async fn test_destination_transport_failure() {
        let dest = MemoryDestination::new();
        dest.fail_transport(Timestamp::new(1), StoreError::transport("broken pipe")).await;
        let result = dest.atomic_apply(&[insert(1, "a.b")]).await;
        assert!(result.is_err());
        assert_eq!(dest.call_count(), 1);
    }
}
