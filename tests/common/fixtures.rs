//! Log entry builders and engine helpers.

use oplog_replicator::store::{MemoryDestination, MemorySource};
use oplog_replicator::{
    Document, EngineState, LogEntry, OpType, ReplicationConfig, ReplicationEngine, Result,
    RunSummary, SinceConfig, StopHandle, Timestamp,
};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Database every fixture entry lives in.
pub const DB: &str = "shop";

pub type MemoryEngine = ReplicationEngine<MemorySource, MemoryDestination>;

/// Timestamp at `secs` with ordinal 0.
pub fn t(secs: u32) -> Timestamp {
    Timestamp::from_parts(secs, 0)
}

pub fn insert(secs: u32) -> LogEntry {
    LogEntry::new(t(secs), OpType::Insert, "shop.orders")
        .with_payload(Document::new().with("_id", i64::from(secs)))
}

#[allow(dead_code)]
pub fn update(secs: u32) -> LogEntry {
    LogEntry::new(t(secs), OpType::Update, "shop.orders")
        .with_payload(Document::new().with("$set", Document::new().with("status", "paid")))
        .with_match_criteria(Document::new().with("_id", i64::from(secs)))
}

/// Heartbeat inside the replicated database, so it reaches the filter.
pub fn noop(secs: u32) -> LogEntry {
    LogEntry::new(t(secs), OpType::NoOp, DB)
        .with_payload(Document::new().with("msg", "periodic noop"))
}

/// Entry in an internal database; never replicated.
#[allow(dead_code)]
pub fn internal(secs: u32) -> LogEntry {
    LogEntry::new(t(secs), OpType::Insert, "admin.system.keys")
}

/// Config that stops at the first idle boundary.
pub fn fast_stop_config() -> ReplicationConfig {
    let mut config = ReplicationConfig::for_testing();
    config.tail.fast_stop = true;
    config
}

/// `config` with an explicit since point.
pub fn since(mut config: ReplicationConfig, secs: u32) -> ReplicationConfig {
    config.since = Some(SinceConfig {
        seconds: secs,
        ordinal: 0,
    });
    config
}

pub fn engine(
    config: ReplicationConfig,
    source: &MemorySource,
    destination: &Arc<MemoryDestination>,
) -> MemoryEngine {
    ReplicationEngine::new(config, Arc::new(source.clone()), Arc::clone(destination))
}

/// An engine running on a background task.
#[allow(dead_code)]
pub struct RunningEngine {
    pub stop: StopHandle,
    pub state: watch::Receiver<EngineState>,
    pub summary: watch::Receiver<RunSummary>,
    handle: JoinHandle<(Result<RunSummary>, EngineState)>,
}

#[allow(dead_code)]
impl RunningEngine {
    pub fn spawn(mut engine: MemoryEngine) -> Self {
        let stop = engine.stop_handle();
        let state = engine.state_receiver();
        let summary = engine.summary_receiver();
        let handle = tokio::spawn(async move {
            let result = engine.run().await;
            (result, engine.state())
        });
        Self {
            stop,
            state,
            summary,
            handle,
        }
    }

    pub async fn wait_for_state(&mut self, wanted: EngineState) {
        self.state
            .wait_for(|s| *s == wanted)
            .await
            .expect("engine dropped its state channel");
    }

    pub async fn wait_for_applied(&mut self, count: u64) {
        self.summary
            .wait_for(|s| s.applied >= count)
            .await
            .expect("engine dropped its summary channel");
    }

    /// Request a stop and wait for the run to end.
    pub async fn stop(self) -> (Result<RunSummary>, EngineState) {
        self.stop.stop();
        self.join().await
    }

    pub async fn join(self) -> (Result<RunSummary>, EngineState) {
        self.handle.await.expect("engine task panicked")
    }
}
