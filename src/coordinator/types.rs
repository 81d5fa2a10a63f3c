//! Engine state types.
//!
//! Defines the state machine for the replication engine lifecycle.
//!
//! # State Transitions
//!
//! ```text
//!               (start point set)
//! Resolving ─────────────────────→ CatchingUp
//!    │                                  │
//!    │ (log head)                       │ (catch-up exhausted)
//!    ↓                                  ↓
//! Tailing ←─────────────────────────────┘
//!    │
//!    │ (idle boundary + stop signal)
//!    ↓
//! Stopped
//!
//! any state ──(fatal error)──→ Failed
//! ```
//!
//! # State Descriptions
//!
//! - **Resolving**: Initial state. Listing namespaces, reading the
//!   checkpoint, choosing the start point.
//! - **CatchingUp**: Replaying the bounded range after the start point.
//! - **Tailing**: Following the live log, reopening on every idle timeout.
//! - **Stopped**: Clean shutdown at an idle boundary.
//! - **Failed**: Unrecoverable error; the error was returned from `run()`.

use crate::entry::Timestamp;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

/// State of the replication engine.
///
/// See module docs for the state transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Resolving the start point. Initial state.
    Resolving,

    /// Replaying entries after the resolved start point.
    CatchingUp,

    /// Following the live log.
    Tailing,

    /// Stopped cleanly. Terminal.
    Stopped,

    /// Unrecoverable error. Terminal.
    Failed,
}

impl EngineState {
    /// Whether the engine can make no further progress.
    pub fn is_terminal(self) -> bool {
        matches!(self, EngineState::Stopped | EngineState::Failed)
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Resolving => write!(f, "Resolving"),
            EngineState::CatchingUp => write!(f, "CatchingUp"),
            EngineState::Tailing => write!(f, "Tailing"),
            EngineState::Stopped => write!(f, "Stopped"),
            EngineState::Failed => write!(f, "Failed"),
        }
    }
}

/// Per-run counters, owned by the engine.
///
/// Returned from [`run()`](super::ReplicationEngine::run) and published
/// live on [`summary_receiver()`](super::ReplicationEngine::summary_receiver).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Entries delivered by the reader, duplicates included.
    pub entries_read: u64,
    /// Entries the destination accepted.
    pub applied: u64,
    /// Entries the destination refused while `ignore_apply_error` was set.
    pub rejected_ignored: u64,
    pub noops_skipped: u64,
    /// Entries outside the replicated databases.
    pub namespace_skipped: u64,
    /// Entries at or below the last consumed position, seen again after a
    /// tail reopen.
    pub duplicates_skipped: u64,
    pub checkpoint_write_failures: u64,
    /// Checkpoint store could not be opened or read; the run fell back to
    /// `since` or the log head.
    pub checkpoint_read_failures: u64,
    pub tail_reopens: u64,
    /// Timestamp of the last entry that was applied (or ignored per policy).
    pub last_applied: Option<Timestamp>,
}

/// Cooperative stop signal for a running engine.
///
/// The engine observes it only at idle boundaries while tailing; an entry
/// in flight is always finished first.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub(crate) fn new(tx: Arc<watch::Sender<bool>>) -> Self {
        Self { tx }
    }

    /// Request a stop. Idempotent.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}
