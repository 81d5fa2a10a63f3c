// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the replication engine.
//!
//! Errors are categorized by where in the pipeline they occurred, because
//! the same underlying failure (say, a dropped socket) means different
//! things during the log-head lookup and during an apply.
//!
//! # Error Categories
//!
//! | Error Type | Fatal | Description |
//! |------------|-------|-------------|
//! | `Connection` | Yes | Could not connect/authenticate to a store at startup |
//! | `Query` | Yes | Log-head lookup or catch-up query failed |
//! | `Transport` | Yes | Network failure while tailing or applying |
//! | `ServerRejected` | Policy | Destination refused an apply (see `ignore_apply_error`) |
//! | `CheckpointWrite` | No | Durable checkpoint fell behind, replication continues |
//! | `CheckpointRead` | No | Engine falls back to `since` or the log head |
//! | `NoNamespaces` | Yes | Source has no user databases, nothing to replicate |
//! | `Config` | Yes | Configuration invalid |
//! | `InvalidState` | Yes | Engine state machine violation |
//!
//! Nothing here is retried internally. Use [`ReplicationError::is_fatal()`]
//! to decide whether to keep going; fatal errors are expected to halt the
//! process with a non-zero exit.

use crate::entry::Timestamp;
use crate::store::{StoreError, StoreErrorKind};
use thiserror::Error;

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors that can occur during replication.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Connecting or authenticating to a store failed.
    #[error("Connection error ({store}): {message}")]
    Connection { store: String, message: String },

    /// A bounded log query failed (head lookup, catch-up read).
    #[error("Query error ({operation}): {message}")]
    Query { operation: String, message: String },

    /// Network failure while tailing the source or applying to the destination.
    #[error("Transport error ({operation}): {message}")]
    Transport { operation: String, message: String },

    /// The destination processed the apply call but reported a logical failure.
    #[error("Server rejected apply of {timestamp}: {reason}")]
    ServerRejected { timestamp: Timestamp, reason: String },

    /// Persisting the checkpoint failed.
    #[error("Checkpoint write error: {0}")]
    CheckpointWrite(String),

    /// Reading the persisted checkpoint failed.
    #[error("Checkpoint read error: {0}")]
    CheckpointRead(String),

    /// The source exposes no user databases.
    #[error("No databases found on source")]
    NoNamespaces,

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Engine state machine violation (e.g. running an engine twice).
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },
}

impl ReplicationError {
    /// Build a `Query` error from a collaborator failure.
    pub fn query(operation: impl Into<String>, source: StoreError) -> Self {
        Self::Query {
            operation: operation.into(),
            message: source.to_string(),
        }
    }

    /// Build a `Transport` error from a collaborator failure.
    pub fn transport(operation: impl Into<String>, source: StoreError) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: source.to_string(),
        }
    }

    /// Map a collaborator failure that happened while reading the log.
    ///
    /// Connection-level failures are reported as `Connection`, everything
    /// else keeps the phase-specific mapping given by `in_flight`.
    pub fn from_store(
        operation: impl Into<String>,
        source: StoreError,
        in_flight: fn(String, StoreError) -> Self,
    ) -> Self {
        match source.kind {
            StoreErrorKind::Connection => Self::Connection {
                store: operation.into(),
                message: source.message,
            },
            _ => in_flight(operation.into(), source),
        }
    }

    /// Check whether this error must stop replication.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::CheckpointWrite(_) => false, // In-memory progress unaffected
            Self::CheckpointRead(_) => false,  // Falls back to since/head
            Self::Connection { .. } => true,
            Self::Query { .. } => true,
            Self::Transport { .. } => true,
            // Policy decides before this is ever raised; once raised it is fatal.
            Self::ServerRejected { .. } => true,
            Self::NoNamespaces => true,
            Self::Config(_) => true,
            Self::InvalidState { .. } => true,
        }
    }

    /// Short machine-friendly label, used as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::Query { .. } => "query",
            Self::Transport { .. } => "transport",
            Self::ServerRejected { .. } => "server_rejected",
            Self::CheckpointWrite(_) => "checkpoint_write",
            Self::CheckpointRead(_) => "checkpoint_read",
            Self::NoNamespaces => "no_namespaces",
            Self::Config(_) => "config",
            Self::InvalidState { .. } => "invalid_state",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_connection() {
        let err = ReplicationError::Connection {
            store: "source".to_string(),
            message: "connection refused".to_string(),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("source"));
    }

    #[test]
    fn test_fatal_query() {
        let err = ReplicationError::query("find_log_head", StoreError::query("cursor killed"));
        assert!(err.is_fatal());
        assert!(err.to_string().contains("find_log_head"));
        assert!(err.to_string().contains("cursor killed"));
    }

    #[test]
    fn test_fatal_transport() {
        let err = ReplicationError::transport("apply", StoreError::transport("broken pipe"));
        assert!(err.is_fatal());
        assert_eq!(err.kind(), "transport");
    }

    #[test]
    fn test_not_fatal_checkpoint_write() {
        let err = ReplicationError::CheckpointWrite("disk full".to_string());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_not_fatal_checkpoint_read() {
        let err = ReplicationError::CheckpointRead("invalid digit".to_string());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_server_rejected_formatting() {
        let err = ReplicationError::ServerRejected {
            timestamp: Timestamp::from_parts(100, 2),
            reason: "E11000 duplicate key".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("E11000"));
        assert!(msg.contains(&Timestamp::from_parts(100, 2).to_string()));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_no_namespaces() {
        let err = ReplicationError::NoNamespaces;
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "No databases found on source");
    }

    #[test]
    fn test_from_store_connection_kind_wins() {
        let err = ReplicationError::from_store(
            "open_tail",
            StoreError::connection("server selection timeout"),
            |op, e| ReplicationError::transport(op, e),
        );
        assert!(matches!(err, ReplicationError::Connection { .. }));
    }

    #[test]
    fn test_from_store_keeps_phase_mapping() {
        let err = ReplicationError::from_store(
            "catch_up",
            StoreError::transport("reset by peer"),
            |op, e| ReplicationError::query(op, e),
        );
        assert!(matches!(err, ReplicationError::Query { .. }));
    }

    #[test]
    fn test_invalid_state_formatting() {
        let err = ReplicationError::InvalidState {
            expected: "Resolving".to_string(),
            actual: "Stopped".to_string(),
        };
        assert!(err.to_string().contains("Resolving"));
        assert!(err.to_string().contains("Stopped"));
    }
}
