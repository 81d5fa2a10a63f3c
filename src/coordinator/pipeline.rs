// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-entry pipeline shared by catch-up and tailing.
//!
//! For every entry the reader produces:
//! 1. Skip it if it is at or below the consumed position (seen again after
//!    an inclusive tail reopen)
//! 2. Advance the position
//! 3. Filter: no-ops and foreign namespaces stop here
//! 4. Apply to the destination; a rejection goes through the ignore policy
//! 5. Write the checkpoint (best-effort)
//!
//! Each step completes before the next entry is read.

use super::types::RunSummary;
use crate::applier::{ApplyOutcome, Applier};
use crate::checkpoint::CheckpointStore;
use crate::entry::{LogEntry, Timestamp};
use crate::error::{ReplicationError, Result};
use crate::filter::{DropReason, OperationFilter, Verdict};
use crate::metrics;
use crate::reader::{LogStream, ReadEvent, ReaderMode};
use crate::store::DestinationStore;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

/// Why a stream stopped producing entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Boundary {
    /// Tailing cursor hit its idle timeout.
    Idle,
    /// Catch-up finished, or the tailing cursor closed.
    Exhausted,
}

pub(super) struct Pipeline<D: DestinationStore> {
    filter: OperationFilter,
    applier: Applier<D>,
    checkpoint: Option<Arc<dyn CheckpointStore>>,
    ignore_apply_error: bool,
    /// Last consumed timestamp; the tail switch point.
    position: Option<Timestamp>,
    consumed: u64,
    summary: RunSummary,
    summary_tx: Arc<watch::Sender<RunSummary>>,
}

impl<D: DestinationStore> Pipeline<D> {
    pub(super) fn new(
        filter: OperationFilter,
        applier: Applier<D>,
        checkpoint: Option<Arc<dyn CheckpointStore>>,
        ignore_apply_error: bool,
        position: Option<Timestamp>,
        summary_tx: Arc<watch::Sender<RunSummary>>,
    ) -> Self {
        Self {
            filter,
            applier,
            checkpoint,
            ignore_apply_error,
            position,
            consumed: 0,
            summary: RunSummary::default(),
            summary_tx,
        }
    }

    pub(super) fn position(&self) -> Option<Timestamp> {
        self.position
    }

    /// Entries that passed the duplicate guard, no-ops included.
    pub(super) fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Move the position forward to `ts` if it is ahead.
    pub(super) fn advance_to(&mut self, ts: Option<Timestamp>) {
        if ts > self.position {
            self.position = ts;
        }
    }

    /// Checkpoint open or read failures from before the pipeline existed.
    pub(super) fn record_checkpoint_read_failures(&mut self, failures: u64) {
        self.summary.checkpoint_read_failures = failures;
        self.publish();
    }

    pub(super) fn record_reopen(&mut self) {
        self.summary.tail_reopens += 1;
        metrics::record_tail_reopen();
        self.publish();
    }

    pub(super) fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Drain `stream` through the pipeline until it reports a boundary.
    pub(super) async fn drive(&mut self, stream: &mut LogStream) -> Result<Boundary> {
        let mode = stream.mode();
        loop {
            match stream.next().await? {
                ReadEvent::Entry(entry) => self.process(entry, mode).await?,
                ReadEvent::Idle => return Ok(Boundary::Idle),
                ReadEvent::Exhausted => return Ok(Boundary::Exhausted),
            }
        }
    }

    async fn process(&mut self, entry: LogEntry, mode: ReaderMode) -> Result<()> {
        self.summary.entries_read += 1;
        metrics::record_entry_read(mode.as_str());

        if let Some(position) = self.position {
            if entry.timestamp <= position {
                trace!(ts = %entry.timestamp, "Skipping already consumed entry");
                self.summary.duplicates_skipped += 1;
                metrics::record_duplicate_skipped();
                return Ok(());
            }
        }
        self.position = Some(entry.timestamp);
        self.consumed += 1;

        if let Verdict::Drop(reason) = self.filter.filter(&entry) {
            match reason {
                DropReason::NoOp => self.summary.noops_skipped += 1,
                DropReason::Namespace => self.summary.namespace_skipped += 1,
            }
            debug!(
                ts = %entry.timestamp,
                ns = %entry.namespace,
                reason = reason.as_str(),
                "Skipping entry"
            );
            metrics::record_entry_skipped(reason.as_str());
            self.publish();
            return Ok(());
        }

        match self.applier.apply(&entry).await? {
            ApplyOutcome::Accepted => {
                self.summary.applied += 1;
                metrics::record_entry_applied(mode.as_str());
            }
            ApplyOutcome::Rejected(reason) if self.ignore_apply_error => {
                warn!(
                    ts = %entry.timestamp,
                    op = %entry.op,
                    ns = %entry.namespace,
                    reason = %reason,
                    "Destination rejected entry, continuing"
                );
                self.summary.rejected_ignored += 1;
                metrics::record_apply_rejected(true);
            }
            ApplyOutcome::Rejected(reason) => {
                metrics::record_apply_rejected(false);
                return Err(ReplicationError::ServerRejected {
                    timestamp: entry.timestamp,
                    reason,
                });
            }
        }

        self.summary.last_applied = Some(entry.timestamp);
        metrics::set_last_applied(entry.timestamp.seconds());
        metrics::record_replication_lag(lag_seconds(entry.timestamp));

        self.write_checkpoint(entry.timestamp).await;
        self.publish();
        Ok(())
    }

    async fn write_checkpoint(&mut self, ts: Timestamp) {
        let Some(store) = &self.checkpoint else {
            return;
        };

        match store.write(ts).await {
            Ok(()) => metrics::record_checkpoint_write(true),
            Err(e) => {
                warn!(ts = %ts, location = %store.location(), error = %e, "Failed to write checkpoint");
                self.summary.checkpoint_write_failures += 1;
                metrics::record_checkpoint_write(false);
            }
        }
    }

    fn publish(&self) {
        self.summary_tx.send_replace(self.summary.clone());
    }
}

/// Seconds between the entry's time component and now, floored at zero.
fn lag_seconds(ts: Timestamp) -> f64 {
    let now = chrono::Utc::now().timestamp();
    (now - i64::from(ts.seconds())).max(0) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::OpType;
    use crate::reader::LogReader;
    use crate::store::{MemoryDestination, MemorySource, NamespaceFilter};
    use std::time::Duration;

    fn pipeline(
        dest: &Arc<MemoryDestination>,
        ignore: bool,
        position: Option<Timestamp>,
    ) -> Pipeline<MemoryDestination> {
        let (tx, _rx) = watch::channel(RunSummary::default());
        Pipeline::new(
            OperationFilter::new(NamespaceFilter::databases(["shop"])),
            Applier::new(Arc::clone(dest)),
            None,
            ignore,
            position,
            Arc::new(tx),
        )
    }

    fn entry(ts: u64, op: OpType) -> LogEntry {
        LogEntry::new(Timestamp::new(ts), op, "shop.orders")
    }

    #[tokio::test]
    async fn test_process_skips_entries_at_or_below_position() {
        let dest = Arc::new(MemoryDestination::new());
        let mut p = pipeline(&dest, false, Some(Timestamp::new(5)));

        p.process(entry(5, OpType::Insert), ReaderMode::Tail).await.unwrap();
        p.process(entry(6, OpType::Insert), ReaderMode::Tail).await.unwrap();

        assert_eq!(dest.applied_timestamps().await, vec![Timestamp::new(6)]);
        assert_eq!(p.summary().duplicates_skipped, 1);
        assert_eq!(p.position(), Some(Timestamp::new(6)));
        assert_eq!(p.consumed(), 1);
    }

    #[tokio::test]
    async fn test_noop_advances_position_only() {
        let dest = Arc::new(MemoryDestination::new());
        let mut p = pipeline(&dest, false, None);

        p.process(entry(7, OpType::NoOp), ReaderMode::Tail).await.unwrap();

        assert_eq!(dest.call_count(), 0);
        assert_eq!(p.position(), Some(Timestamp::new(7)));
        assert_eq!(p.summary().noops_skipped, 1);
        assert_eq!(p.summary().last_applied, None);
    }

    #[tokio::test]
    async fn test_rejection_fatal_without_policy() {
        let dest = Arc::new(MemoryDestination::new());
        dest.reject(Timestamp::new(3), "bad op").await;
        let mut p = pipeline(&dest, false, None);

        let err = p.process(entry(3, OpType::Update), ReaderMode::CatchUp).await.unwrap_err();
        assert!(matches!(
            err,
            ReplicationError::ServerRejected { timestamp, .. } if timestamp == Timestamp::new(3)
        ));
        assert_eq!(p.summary().last_applied, None);
    }

    #[tokio::test]
    async fn test_rejection_ignored_with_policy() {
        let dest = Arc::new(MemoryDestination::new());
        dest.reject(Timestamp::new(3), "bad op").await;
        let mut p = pipeline(&dest, true, None);

        p.process(entry(3, OpType::Update), ReaderMode::CatchUp).await.unwrap();
        assert_eq!(p.summary().rejected_ignored, 1);
        assert_eq!(p.summary().last_applied, Some(Timestamp::new(3)));
    }

    #[test]
    fn test_advance_to_never_moves_back() {
        let dest = Arc::new(MemoryDestination::new());
        let mut p = pipeline(&dest, false, Some(Timestamp::new(10)));

        p.advance_to(Some(Timestamp::new(4)));
        assert_eq!(p.position(), Some(Timestamp::new(10)));
        p.advance_to(None);
        assert_eq!(p.position(), Some(Timestamp::new(10)));
        p.advance_to(Some(Timestamp::new(12)));
        assert_eq!(p.position(), Some(Timestamp::new(12)));
    }

    #[tokio::test]
    async fn test_drive_catch_up_until_exhausted() {
        let source = MemorySource::new();
        source
            .extend([entry(1, OpType::Insert), entry(2, OpType::NoOp), entry(3, OpType::Delete)])
            .await
            .unwrap();
        let reader = LogReader::open(Arc::new(source), Duration::from_secs(1)).await.unwrap();
        let mut stream = reader.catch_up(Timestamp::ZERO).await.unwrap();

        let dest = Arc::new(MemoryDestination::new());
        let mut p = pipeline(&dest, false, None);

        assert_eq!(p.drive(&mut stream).await.unwrap(), Boundary::Exhausted);
        assert_eq!(
            dest.applied_timestamps().await,
            vec![Timestamp::new(1), Timestamp::new(3)]
        );
        assert_eq!(p.summary().entries_read, 3);
    }

    #[test]
    fn test_lag_seconds_never_negative() {
        assert_eq!(lag_seconds(Timestamp::from_parts(u32::MAX, 0)), 0.0);
        assert!(lag_seconds(Timestamp::from_parts(1, 0)) > 0.0);
    }
}
