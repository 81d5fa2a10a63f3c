// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Operation log reader.
//!
//! Produces log entries in timestamp order in one of two modes:
//!
//! - **Catch-up**: bounded query `timestamp > from`. Finite; exhaustion
//!   ends the phase.
//! - **Tailing**: live cursor on `timestamp >= switch_point` that blocks up
//!   to the idle timeout. An idle timeout is reported as
//!   [`ReadEvent::Idle`], not as an error; the caller decides whether to
//!   stop or reopen.
//!
//! The namespace filter is computed once, when the reader is opened: every
//! database on the source except the internal ones. A source with no user
//! databases cannot be opened.
//!
//! Read errors are never retried here. Catch-up and head-lookup failures
//! surface as [`ReplicationError::Query`]; tailing failures as
//! [`ReplicationError::Transport`].

use crate::entry::{LogEntry, Timestamp};
use crate::error::{ReplicationError, Result};
use crate::store::{Bound, LogCursor, LogQuery, NamespaceFilter, SortOrder, SourceStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Databases that hold the store's own bookkeeping and are never replicated.
pub const INTERNAL_DATABASES: &[&str] = &["admin", "local", "config"];

/// Which phase a stream belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderMode {
    CatchUp,
    Tail,
}

impl ReaderMode {
    /// Label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            ReaderMode::CatchUp => "catch_up",
            ReaderMode::Tail => "tail",
        }
    }
}

/// What a stream produced.
#[derive(Debug)]
pub enum ReadEvent {
    Entry(LogEntry),
    /// Tailing cursor waited a full idle timeout without new data.
    Idle,
    /// No more entries: end of catch-up, or a tailing cursor that died.
    Exhausted,
}

/// Drop internal databases from a source listing.
pub fn user_databases(names: impl IntoIterator<Item = String>) -> Vec<String> {
    names
        .into_iter()
        .filter(|name| !INTERNAL_DATABASES.contains(&name.as_str()))
        .collect()
}

/// Reader over the source's operation log.
pub struct LogReader<S: SourceStore> {
    source: Arc<S>,
    namespaces: NamespaceFilter,
    idle_timeout: Duration,
}

impl<S: SourceStore> LogReader<S> {
    /// Open a reader, computing the namespace filter.
    ///
    /// Fails with [`ReplicationError::NoNamespaces`] if the source has no
    /// user databases.
    pub async fn open(source: Arc<S>, idle_timeout: Duration) -> Result<Self> {
        let all = source.list_databases().await.map_err(|e| {
            ReplicationError::from_store("list_databases", e, |op, e| ReplicationError::query(op, e))
        })?;
        let databases = user_databases(all);

        if databases.is_empty() {
            return Err(ReplicationError::NoNamespaces);
        }

        info!(databases = ?databases, "Replicating databases");

        Ok(Self {
            source,
            namespaces: NamespaceFilter::databases(databases),
            idle_timeout,
        })
    }

    /// The namespace filter computed at open time.
    pub fn namespaces(&self) -> &NamespaceFilter {
        &self.namespaces
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Timestamp of the newest entry in the whole log (all namespaces).
    ///
    /// Returns `None` for an empty log.
    pub async fn log_head(&self) -> Result<Option<Timestamp>> {
        let mut cursor = self
            .source
            .find_log(LogQuery::all(), SortOrder::Descending, Some(1))
            .await
            .map_err(|e| {
                ReplicationError::from_store("find_log_head", e, |op, e| ReplicationError::query(op, e))
            })?;

        let head = cursor
            .next()
            .await
            .map_err(|e| ReplicationError::query("find_log_head", e))?;

        Ok(head.map(|entry| entry.timestamp))
    }

    /// Open the bounded catch-up read: entries with `timestamp > from`.
    pub async fn catch_up(&self, from: Timestamp) -> Result<LogStream> {
        let query = LogQuery::new(Bound::After(from), self.namespaces.clone());
        debug!(from = %from, "Opening catch-up read");

        let cursor = self
            .source
            .find_log(query, SortOrder::Ascending, None)
            .await
            .map_err(|e| {
                ReplicationError::from_store("catch_up", e, |op, e| ReplicationError::query(op, e))
            })?;

        Ok(LogStream::new(cursor, ReaderMode::CatchUp))
    }

    /// Open a tailing cursor on `timestamp >= switch_point`, or on the whole
    /// log if there is no switch point yet.
    pub async fn tail(&self, switch_point: Option<Timestamp>) -> Result<LogStream> {
        let bound = match switch_point {
            Some(ts) => Bound::AtOrAfter(ts),
            None => Bound::Unbounded,
        };
        let query = LogQuery::new(bound, self.namespaces.clone());
        debug!(switch_point = ?switch_point.map(|t| t.as_u64()), "Opening tailing cursor");

        let cursor = self
            .source
            .open_tail(query, self.idle_timeout)
            .await
            .map_err(|e| {
                ReplicationError::from_store("open_tail", e, |op, e| ReplicationError::transport(op, e))
            })?;

        Ok(LogStream::new(cursor, ReaderMode::Tail))
    }
}

/// An open read in one of the two modes.
pub struct LogStream {
    cursor: Box<dyn LogCursor>,
    mode: ReaderMode,
}

impl LogStream {
    fn new(cursor: Box<dyn LogCursor>, mode: ReaderMode) -> Self {
        Self { cursor, mode }
    }

    pub fn mode(&self) -> ReaderMode {
        self.mode
    }

    /// Read the next event. Errors terminate the stream.
    pub async fn next(&mut self) -> Result<ReadEvent> {
        let next = self.cursor.next().await.map_err(|e| match self.mode {
            ReaderMode::CatchUp => ReplicationError::query("catch_up", e),
            ReaderMode::Tail => ReplicationError::transport("tail", e),
        })?;

        Ok(match next {
            Some(entry) => ReadEvent::Entry(entry),
            None if self.mode == ReaderMode::Tail && self.cursor.timed_out() => ReadEvent::Idle,
            None => ReadEvent::Exhausted,
        })
    }
}
