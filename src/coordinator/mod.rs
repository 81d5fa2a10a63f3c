// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication engine coordinator.
//!
//! The main orchestrator that ties together:
//! - Log reading via [`crate::reader::LogReader`]
//! - Filtering via [`crate::filter::OperationFilter`]
//! - Destination writes via [`crate::applier::Applier`]
//! - Checkpoint persistence via [`crate::checkpoint::CheckpointStore`]
//!
//! # Architecture
//!
//! A single sequential worker drives the whole run:
//! 1. Lists source databases; an empty source fails here, before any query
//! 2. Reads the checkpoint and resolves the start point
//! 3. Catches up from the start point (skipped when starting at the log head)
//! 4. Tails the live log, reopening the cursor at every idle timeout, until
//!    a stop is requested
//!
//! Both phases share one per-entry pipeline, so entries are applied in log
//! order and the checkpoint only ever moves forward after a completed apply.

mod pipeline;
mod types;

pub use types::{EngineState, RunSummary, StopHandle};

use crate::applier::Applier;
use crate::checkpoint::{self, resolve_start, CheckpointStore, StartPoint};
use crate::config::ReplicationConfig;
use crate::entry::Timestamp;
use crate::error::{ReplicationError, Result};
use crate::filter::OperationFilter;
use crate::metrics;
use crate::reader::LogReader;
use crate::store::{DestinationStore, SourceStore};
use pipeline::{Boundary, Pipeline};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// The main replication engine.
///
/// Replicates the source's operation log to the destination, one entry at a
/// time, in log order. Owns all per-run state; nothing is shared globally.
///
/// An engine runs once. Create a new one (with the same checkpoint store)
/// to resume.
pub struct ReplicationEngine<S: SourceStore, D: DestinationStore> {
    config: ReplicationConfig,

    source: Arc<S>,

    destination: Arc<D>,

    /// Durable position; `None` disables checkpointing
    checkpoint: Option<Arc<dyn CheckpointStore>>,

    /// Engine state (broadcast to watchers)
    state_tx: watch::Sender<EngineState>,

    /// Engine state receiver (for internal use)
    state_rx: watch::Receiver<EngineState>,

    /// Cooperative stop signal
    stop_tx: Arc<watch::Sender<bool>>,

    /// Checkpoint stores that failed to open before the run
    checkpoint_open_failures: u64,

    /// Live run counters
    summary_tx: Arc<watch::Sender<RunSummary>>,
}

impl<S: SourceStore, D: DestinationStore> ReplicationEngine<S, D> {
    /// Create an engine without a checkpoint store.
    ///
    /// The engine starts in `Resolving`. Call [`run()`](Self::run) to
    /// replicate.
    pub fn new(config: ReplicationConfig, source: Arc<S>, destination: Arc<D>) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Resolving);
        let (stop_tx, _) = watch::channel(false);
        let (summary_tx, _) = watch::channel(RunSummary::default());

        Self {
            config,
            source,
            destination,
            checkpoint: None,
            state_tx,
            state_rx,
            stop_tx: Arc::new(stop_tx),
            summary_tx: Arc::new(summary_tx),
            checkpoint_open_failures: 0,
        }
    }

    /// Use `store` for reading the resume point and recording progress.
    pub fn with_checkpoint(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint = Some(store);
        self
    }

    /// Open the checkpoint store named by the config's `checkpoint` section.
    ///
    /// A store that cannot be opened is treated like an unreadable
    /// checkpoint: the engine runs without one and counts the failure in
    /// `checkpoint_read_failures`. Only fatal errors are returned.
    pub async fn with_configured_checkpoint(mut self) -> Result<Self> {
        match checkpoint::open(&self.config.checkpoint).await {
            Ok(store) => self.checkpoint = store,
            Err(e) if !e.is_fatal() => {
                warn!(error = %e, "Failed to open checkpoint store, running without one");
                metrics::record_error(e.kind());
                self.checkpoint = None;
                self.checkpoint_open_failures += 1;
            }
            Err(e) => return Err(e),
        }
        Ok(self)
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Get current engine state.
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Get a receiver for live run counters.
    pub fn summary_receiver(&self) -> watch::Receiver<RunSummary> {
        self.summary_tx.subscribe()
    }

    /// Handle for requesting a stop from another task.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle::new(Arc::clone(&self.stop_tx))
    }

    /// Run replication until stopped or failed.
    ///
    /// Returns the run's counters on a clean stop. Fatal errors move the
    /// engine to `Failed` and are returned unchanged.
    pub async fn run(&mut self) -> Result<RunSummary> {
        if self.state() != EngineState::Resolving {
            return Err(ReplicationError::InvalidState {
                expected: EngineState::Resolving.to_string(),
                actual: self.state().to_string(),
            });
        }
        metrics::set_engine_state("Resolving");

        let span = info_span!("replication");
        let result = self.run_phases().instrument(span).await;

        match result {
            Ok(summary) => {
                self.set_state(EngineState::Stopped);
                info!(
                    applied = summary.applied,
                    last_applied = ?summary.last_applied.map(Timestamp::as_u64),
                    "Replication stopped"
                );
                Ok(summary)
            }
            Err(e) => {
                self.set_state(EngineState::Failed);
                metrics::record_error(e.kind());
                error!(error = %e, kind = e.kind(), "Replication failed");
                Err(e)
            }
        }
    }

    async fn run_phases(&self) -> Result<RunSummary> {
        self.config.validate()?;
        let idle_timeout = self.config.tail.idle_timeout_duration();

        // Namespaces first: an empty source must fail before any log query.
        let reader = LogReader::open(Arc::clone(&self.source), idle_timeout).await?;

        let mut checkpoint_read_failures = self.checkpoint_open_failures;
        let checkpointed = match self.read_checkpoint().await {
            Ok(ts) => ts,
            Err(_) => {
                checkpoint_read_failures += 1;
                None
            }
        };
        let since = self.config.since_timestamp();
        let start = resolve_start(checkpointed, since);
        let head = reader.log_head().await?;

        info!(
            start = %start,
            checkpoint = ?checkpointed.map(Timestamp::as_u64),
            since = ?since.map(Timestamp::as_u64),
            head = ?head.map(Timestamp::as_u64),
            "Resolved start point"
        );
        if head.is_none() && start == StartPoint::LogHead {
            info!("Source log is empty, tailing from its beginning");
        }

        let mut pipeline = Pipeline::new(
            OperationFilter::new(reader.namespaces().clone()),
            Applier::new(Arc::clone(&self.destination)),
            self.checkpoint.clone(),
            self.config.ignore_apply_error,
            start.timestamp().or(head),
            Arc::clone(&self.summary_tx),
        );
        pipeline.record_checkpoint_read_failures(checkpoint_read_failures);

        if let StartPoint::Checkpoint(from) | StartPoint::Since(from) = start {
            self.set_state(EngineState::CatchingUp);
            info!(from = %from, "Catching up");

            let mut stream = reader.catch_up(from).await?;
            pipeline.drive(&mut stream).await?;

            if pipeline.consumed() == 0 {
                pipeline.advance_to(head);
            }
            info!(
                applied = pipeline.summary().applied,
                switch_point = ?pipeline.position().map(Timestamp::as_u64),
                "Catch-up complete"
            );
        }

        self.set_state(EngineState::Tailing);
        self.tail(&reader, &mut pipeline).await?;

        Ok(pipeline.summary().clone())
    }

    /// Tail until a stop is observed at an idle boundary.
    async fn tail(&self, reader: &LogReader<S>, pipeline: &mut Pipeline<D>) -> Result<()> {
        let fast_stop = self.config.tail.fast_stop;
        info!(
            switch_point = ?pipeline.position().map(Timestamp::as_u64),
            fast_stop,
            "Tailing"
        );

        let mut stream = reader.tail(pipeline.position()).await?;
        loop {
            let boundary = pipeline.drive(&mut stream).await?;

            if *self.stop_tx.borrow() {
                info!("Stop requested, stopping at idle boundary");
                return Ok(());
            }
            if fast_stop {
                info!("Fast stop enabled, stopping at idle boundary");
                return Ok(());
            }

            if boundary == Boundary::Exhausted {
                // Closed without timing out; wait one idle period before reopening.
                debug!("Tailing cursor closed");
                tokio::time::sleep(reader.idle_timeout()).await;
            }

            pipeline.record_reopen();
            debug!(switch_point = ?pipeline.position().map(Timestamp::as_u64), "Reopening tailing cursor");
            stream = reader.tail(pipeline.position()).await?;
        }
    }

    /// Read the stored checkpoint. The caller falls back to no checkpoint
    /// on error.
    async fn read_checkpoint(&self) -> Result<Option<Timestamp>> {
        let Some(store) = self.checkpoint.as_ref() else {
            return Ok(None);
        };
        match store.read().await {
            Ok(ts) => {
                debug!(location = %store.location(), checkpoint = ?ts.map(Timestamp::as_u64), "Read checkpoint");
                Ok(ts)
            }
            Err(e) => {
                warn!(location = %store.location(), error = %e, "Failed to read checkpoint, ignoring it");
                metrics::record_error(e.kind());
                Err(e)
            }
        }
    }

    fn set_state(&self, state: EngineState) {
        debug!(state = %state, "Engine state change");
        self.state_tx.send_replace(state);
        metrics::set_engine_state(&state.to_string());
    }
}
