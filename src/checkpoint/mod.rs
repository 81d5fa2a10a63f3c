// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Checkpoint persistence for the replication position.
//!
//! The checkpoint is the timestamp of the last successfully applied entry.
//! It is read once at startup to resolve the resume point and written after
//! every applied entry.
//!
//! ## Failure Semantics
//!
//! Both directions are best-effort:
//! - A failed write is logged; replication continues and the durable record
//!   simply lags behind in-memory progress.
//! - A failed read is logged; the engine falls back to the configured
//!   `since` timestamp or the log head.
//!
//! ## Checkpoint Semantics
//!
//! ```text
//! read entry T → apply to destination → write checkpoint T
//!                (crash here = entry T re-applied on restart)
//! ```
//!
//! ## Backends
//!
//! - [`FileCheckpointStore`]: single text-encoded integer, atomically replaced
//! - [`SqliteCheckpointStore`]: one row per named checkpoint, WAL mode

mod file;
mod sqlite;

pub use file::FileCheckpointStore;
pub use sqlite::SqliteCheckpointStore;

use crate::config::CheckpointConfig;
use crate::entry::Timestamp;
use crate::error::Result;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by [`CheckpointStore`] methods.
pub type CheckpointFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Durable storage for the single latest applied timestamp.
///
/// A single writer (the engine) is assumed; implementations only need
/// atomic replacement of the stored value.
pub trait CheckpointStore: Send + Sync + 'static {
    /// The last persisted timestamp, or `None` if nothing was ever written.
    fn read(&self) -> CheckpointFuture<'_, Option<Timestamp>>;

    /// Persist `ts`, overwriting any previous value.
    fn write(&self, ts: Timestamp) -> CheckpointFuture<'_, ()>;

    /// Human-readable location, for logs.
    fn location(&self) -> String;
}

/// Open the checkpoint store described by `config`.
///
/// Returns `None` when checkpointing is disabled.
pub async fn open(config: &CheckpointConfig) -> Result<Option<Arc<dyn CheckpointStore>>> {
    let store: Arc<dyn CheckpointStore> = match config {
        CheckpointConfig::None => return Ok(None),
        CheckpointConfig::File { path } => Arc::new(FileCheckpointStore::new(path)),
        CheckpointConfig::Sqlite { path, name } => {
            Arc::new(SqliteCheckpointStore::new(path, name.clone()).await?)
        }
    };
    Ok(Some(store))
}

/// Where replication starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPoint {
    /// Resume after the persisted checkpoint.
    Checkpoint(Timestamp),
    /// Start after the explicitly configured timestamp.
    Since(Timestamp),
    /// Skip catch-up; start tailing at the current log head.
    LogHead,
}

impl StartPoint {
    /// Lower bound (exclusive) of the catch-up read, if there is one.
    pub fn timestamp(&self) -> Option<Timestamp> {
        match *self {
            StartPoint::Checkpoint(ts) | StartPoint::Since(ts) => Some(ts),
            StartPoint::LogHead => None,
        }
    }
}

impl fmt::Display for StartPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartPoint::Checkpoint(ts) => write!(f, "checkpoint {}", ts),
            StartPoint::Since(ts) => write!(f, "since {}", ts),
            StartPoint::LogHead => write!(f, "log head"),
        }
    }
}

/// Resolve the start point from a checkpoint value and an explicit `since`.
///
/// The checkpoint wins only when it is strictly greater than `since`.
/// Zero timestamps count as absent on both sides.
pub fn resolve_start(checkpoint: Option<Timestamp>, since: Option<Timestamp>) -> StartPoint {
    let checkpoint = checkpoint.and_then(Timestamp::non_zero);
    let since = since.and_then(Timestamp::non_zero);

    match (checkpoint, since) {
        (Some(c), Some(s)) if c > s => StartPoint::Checkpoint(c),
        (Some(c), None) => StartPoint::Checkpoint(c),
        (_, Some(s)) => StartPoint::Since(s),
        (None, None) => StartPoint::LogHead,
    }
}
