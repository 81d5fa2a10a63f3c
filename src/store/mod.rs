// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Store integration traits.
//!
//! Defines the capabilities the engine needs from the two document stores.
//! Connection management, authentication and transport security live behind
//! these traits; the engine treats each store as an opaque handle.
//!
//! | Capability | Trait method |
//! |---|---|
//! | list user databases | [`SourceStore::list_databases`] |
//! | bounded, ordered log read (head lookup, catch-up) | [`SourceStore::find_log`] |
//! | live tailing cursor with idle timeout | [`SourceStore::open_tail`] |
//! | all-or-nothing apply of a batch | [`DestinationStore::atomic_apply`] |
//!
//! Two implementations ship with the crate:
//! - [`memory`]: in-process log and destination (standalone runs, embedding, tests)
//! - `mongo` (feature `mongodb`): the MongoDB driver against `local.oplog.rs`
//!
//! # Example
//!
//! ```rust,no_run
//! use oplog_replicator::store::{ApplyResponse, BoxFuture, DestinationStore};
//! use oplog_replicator::LogEntry;
//!
//! struct PrintingDestination;
//!
//! impl DestinationStore for PrintingDestination {
//!     fn atomic_apply<'a>(&'a self, batch: &'a [LogEntry]) -> BoxFuture<'a, ApplyResponse> {
//!         Box::pin(async move {
//!             for entry in batch {
//!                 println!("{} {} {}", entry.timestamp, entry.op, entry.namespace);
//!             }
//!             Ok(ApplyResponse::accepted())
//!         })
//!     }
//! }
//! ```

pub mod memory;
#[cfg(feature = "mongodb")]
pub mod mongo;

use crate::entry::{database_of, LogEntry, Timestamp};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub use memory::{MemoryDestination, MemorySource};

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Broad class of a store failure, as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Could not reach or authenticate to the store.
    Connection,
    /// The store refused or failed to execute a query.
    Query,
    /// Network failure on an established connection.
    Transport,
}

/// Error reported by a store backend.
#[derive(Debug, Clone)]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self { kind: StoreErrorKind::Connection, message: message.into() }
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self { kind: StoreErrorKind::Query, message: message.into() }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self { kind: StoreErrorKind::Transport, message: message.into() }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StoreError {}

/// Lower bound of a log query on `timestamp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// Whole log.
    Unbounded,
    /// `timestamp > t`
    After(Timestamp),
    /// `timestamp >= t`
    AtOrAfter(Timestamp),
}

impl Bound {
    /// Check whether `ts` satisfies the bound.
    pub fn admits(&self, ts: Timestamp) -> bool {
        match *self {
            Bound::Unbounded => true,
            Bound::After(t) => ts > t,
            Bound::AtOrAfter(t) => ts >= t,
        }
    }
}

/// Restricts a log query to a set of databases.
///
/// A namespace `db.collection` matches when its database component is in the
/// set. An empty filter matches everything (used for the log-head lookup,
/// which must see the whole log).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceFilter {
    databases: BTreeSet<String>,
}

impl NamespaceFilter {
    /// Filter matching any namespace.
    pub fn any() -> Self {
        Self::default()
    }

    /// Filter matching the given databases.
    pub fn databases<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            databases: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Check whether `namespace` falls inside the filter.
    pub fn matches(&self, namespace: &str) -> bool {
        self.databases.is_empty() || self.databases.contains(database_of(namespace))
    }

    /// The database names in the filter (sorted).
    pub fn database_names(&self) -> impl Iterator<Item = &str> {
        self.databases.iter().map(String::as_str)
    }

    pub fn is_any(&self) -> bool {
        self.databases.is_empty()
    }
}

/// Query against the operation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub bound: Bound,
    pub namespaces: NamespaceFilter,
}

impl LogQuery {
    pub fn new(bound: Bound, namespaces: NamespaceFilter) -> Self {
        Self { bound, namespaces }
    }

    /// Whole log, every namespace.
    pub fn all() -> Self {
        Self::new(Bound::Unbounded, NamespaceFilter::any())
    }

    /// Check whether an entry satisfies the query.
    pub fn matches(&self, entry: &LogEntry) -> bool {
        self.bound.admits(entry.timestamp) && self.namespaces.matches(&entry.namespace)
    }
}

/// Result ordering for [`SourceStore::find_log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Destination's answer to an apply call.
///
/// `ok == false` means the destination processed the call but refused it
/// (e.g. a constraint violation); transport problems are reported as
/// [`StoreError`] instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyResponse {
    pub ok: bool,
    pub err_msg: String,
}

impl ApplyResponse {
    pub fn accepted() -> Self {
        Self { ok: true, err_msg: String::new() }
    }

    pub fn rejected(err_msg: impl Into<String>) -> Self {
        Self { ok: false, err_msg: err_msg.into() }
    }
}

/// Cursor over log entries, ascending by timestamp unless opened otherwise.
///
/// `next()` returning `Ok(None)` means the cursor has nothing more right now.
/// For a finite cursor that is exhaustion; for a tailing cursor, check
/// [`timed_out()`](Self::timed_out) to tell an idle timeout from a dead cursor.
pub trait LogCursor: Send {
    /// Fetch the next entry.
    fn next(&mut self) -> BoxFuture<'_, Option<LogEntry>>;

    /// `true` if the last `next()` returned `None` because the idle timeout
    /// elapsed without new data.
    fn timed_out(&self) -> bool {
        false
    }
}

/// What the engine needs from the source store.
pub trait SourceStore: Send + Sync + 'static {
    /// All database names on the source, including internal ones.
    fn list_databases(&self) -> BoxFuture<'_, Vec<String>>;

    /// Finite, ordered read of the log.
    fn find_log(
        &self,
        query: LogQuery,
        order: SortOrder,
        limit: Option<usize>,
    ) -> BoxFuture<'_, Box<dyn LogCursor>>;

    /// Live cursor that blocks up to `idle_timeout` waiting for new entries.
    fn open_tail(&self, query: LogQuery, idle_timeout: Duration) -> BoxFuture<'_, Box<dyn LogCursor>>;
}

/// What the engine needs from the destination store.
pub trait DestinationStore: Send + Sync + 'static {
    /// Apply every entry in `batch` as one all-or-nothing unit.
    fn atomic_apply<'a>(&'a self, batch: &'a [LogEntry]) -> BoxFuture<'a, ApplyResponse>;
}
