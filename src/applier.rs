// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Destination applier.
//!
//! Submits one entry per call as a single-element atomic batch, so a crash
//! mid-apply never leaves the destination holding half of a source
//! operation. Entries are never batched together: one apply per entry keeps
//! checkpoint granularity exact.
//!
//! ```text
//! entry ──► atomic_apply([entry]) ──► ok        → Accepted
//!                                 ├─► !ok       → Rejected(reason)   (policy decides)
//!                                 └─► Err(..)   → Transport error    (always fatal)
//! ```

use crate::entry::LogEntry;
use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::store::DestinationStore;
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

/// Result of a completed apply call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Accepted,
    /// The destination processed the call but refused it.
    Rejected(String),
}

impl ApplyOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ApplyOutcome::Accepted)
    }
}

/// Applies entries to the destination one at a time.
pub struct Applier<D: DestinationStore> {
    destination: Arc<D>,
}

impl<D: DestinationStore> Applier<D> {
    pub fn new(destination: Arc<D>) -> Self {
        Self { destination }
    }

    /// Apply exactly one entry.
    ///
    /// Transport failures are returned as [`ReplicationError::Transport`]
    /// and are never subject to the ignore policy.
    pub async fn apply(&self, entry: &LogEntry) -> Result<ApplyOutcome> {
        let start = Instant::now();
        let response = self
            .destination
            .atomic_apply(std::slice::from_ref(entry))
            .await
            .map_err(|e| ReplicationError::transport("apply", e))?;
        metrics::record_apply_latency(start.elapsed());

        trace!(
            ts = %entry.timestamp,
            op = %entry.op,
            ns = %entry.namespace,
            ok = response.ok,
            "Applied entry"
        );

        if response.ok {
            Ok(ApplyOutcome::Accepted)
        } else {
            Ok(ApplyOutcome::Rejected(response.err_msg))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{OpType, Timestamp};
    use crate::store::{MemoryDestination, StoreError};

    fn insert(ts: u64) -> LogEntry {
        LogEntry::new(Timestamp::new(ts), OpType::Insert, "shop.orders")
    }

    #[tokio::test]
    async fn test_apply_accepted() {
        let dest = Arc::new(MemoryDestination::new());
        let applier = Applier::new(Arc::clone(&dest));

        let outcome = applier.apply(&insert(1)).await.unwrap();
        assert!(outcome.is_accepted());
        assert_eq!(dest.applied_timestamps().await, vec![Timestamp::new(1)]);
    }

    #[tokio::test]
    async fn test_apply_one_entry_per_call() {
        let dest = Arc::new(MemoryDestination::new());
        let applier = Applier::new(Arc::clone(&dest));

        for ts in 1..=3 {
            applier.apply(&insert(ts)).await.unwrap();
        }
        assert_eq!(dest.call_count(), 3);
    }

    #[tokio::test]
    async fn test_apply_rejected_carries_reason() {
        let dest = Arc::new(MemoryDestination::new());
        dest.reject(Timestamp::new(1), "E11000 duplicate key").await;
        let applier = Applier::new(Arc::clone(&dest));

        let outcome = applier.apply(&insert(1)).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Rejected("E11000 duplicate key".to_string()));
        assert!(dest.applied().await.is_empty());
    }

    #[tokio::test]
    async fn test_apply_transport_error() {
        let dest = Arc::new(MemoryDestination::new());
        dest.fail_transport(Timestamp::new(1), StoreError::transport("broken pipe")).await;
        let applier = Applier::new(Arc::clone(&dest));

        let err = applier.apply(&insert(1)).await.unwrap_err();
        assert!(matches!(err, ReplicationError::Transport { .. }));
        assert!(err.is_fatal());
    }
}
