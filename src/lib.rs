//! # Oplog Replicator
//!
//! Ordered, resumable one-way replication of a document store's operation
//! log into a second store.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                           ReplicationEngine                               │
//! │                                                                           │
//! │  ┌─────────────┐    ┌────────────────┐    ┌─────────┐    ┌────────────┐   │
//! │  │ SourceStore │───►│ LogReader      │───►│ Filter  │───►│ Applier    │   │
//! │  │ (oplog)     │    │ catch-up, tail │    │ (no-op) │    │ (1 entry)  │   │
//! │  └─────────────┘    └────────────────┘    └─────────┘    └────────────┘   │
//! │                                                                │          │
//! │                                                                ▼          │
//! │                                       ┌─────────────────┐  ┌──────────┐   │
//! │                                       │ CheckpointStore │◄─│ Dest.    │   │
//! │                                       │ (file / SQLite) │  │ Store    │   │
//! │                                       └─────────────────┘  └──────────┘   │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Two-Phase Replication
//!
//! 1. **Catch-up**: bounded replay of everything after the resume point
//! 2. **Tailing**: live cursor with a one-second idle timeout, reopened at
//!    every idle boundary until a stop is requested
//!
//! Delivery is at-least-once: a crash between apply and checkpoint write
//! re-applies that one entry on restart.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use oplog_replicator::store::{MemoryDestination, MemorySource};
//! use oplog_replicator::{ReplicationConfig, ReplicationEngine};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let source = Arc::new(MemorySource::new());
//!     let destination = Arc::new(MemoryDestination::new());
//!
//!     let mut engine = ReplicationEngine::new(ReplicationConfig::for_testing(), source, destination);
//!     let stop = engine.stop_handle();
//!     tokio::spawn(async move {
//!         tokio::signal::ctrl_c().await.ok();
//!         stop.stop();
//!     });
//!
//!     let summary = engine.run().await.expect("replication failed");
//!     println!("applied {} entries", summary.applied);
//! }
//! ```

pub mod applier;
pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod document;
pub mod entry;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod reader;
pub mod store;

// Re-exports for convenience
pub use applier::{ApplyOutcome, Applier};
pub use checkpoint::{
    resolve_start, CheckpointStore, FileCheckpointStore, SqliteCheckpointStore, StartPoint,
};
pub use config::{CheckpointConfig, ReplicationConfig, SinceConfig, StoreConfig, TailConfig};
pub use coordinator::{EngineState, ReplicationEngine, RunSummary, StopHandle};
pub use document::{Document, Value};
pub use entry::{LogEntry, OpType, Timestamp};
pub use error::{ReplicationError, Result};
pub use filter::{OperationFilter, Verdict};
pub use reader::{LogReader, ReadEvent, ReaderMode};
