//! Recording CheckpointStore for testing.
//!
//! Records every write in order so tests can assert that the checkpoint
//! never moves backwards and only advances after applies. Reads and writes
//! can be made to fail.

use oplog_replicator::checkpoint::{CheckpointFuture, CheckpointStore};
use oplog_replicator::{ReplicationError, Timestamp};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// In-memory checkpoint that remembers its write history.
///
/// # Example
/// ```rust,ignore
/// let checkpoint = Arc::new(RecordingCheckpoint::with_value(t(105)));
/// checkpoint.fail_writes(true);
///
/// // Run the engine...
///
/// assert_eq!(checkpoint.writes(), vec![]);
/// ```
#[derive(Default)]
pub struct RecordingCheckpoint {
    value: Mutex<Option<Timestamp>>,
    writes: Mutex<Vec<Timestamp>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    read_count: AtomicUsize,
}

#[allow(dead_code)]
impl RecordingCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a persisted value, as if a previous run wrote it.
    pub fn with_value(ts: Timestamp) -> Self {
        let store = Self::new();
        *store.value.lock().unwrap() = Some(ts);
        store
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// The currently persisted value.
    pub fn value(&self) -> Option<Timestamp> {
        *self.value.lock().unwrap()
    }

    /// Every successful write, in order.
    pub fn writes(&self) -> Vec<Timestamp> {
        self.writes.lock().unwrap().clone()
    }

    pub fn read_count(&self) -> usize {
        self.read_count.load(Ordering::SeqCst)
    }
}

impl CheckpointStore for RecordingCheckpoint {
    fn read(&self) -> CheckpointFuture<'_, Option<Timestamp>> {
        Box::pin(async move {
            self.read_count.fetch_add(1, Ordering::SeqCst);
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(ReplicationError::CheckpointRead("injected read failure".to_string()));
            }
            Ok(self.value())
        })
    }

    fn write(&self, ts: Timestamp) -> CheckpointFuture<'_, ()> {
        Box::pin(async move {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(ReplicationError::CheckpointWrite("injected write failure".to_string()));
            }
            *self.value.lock().unwrap() = Some(ts);
            self.writes.lock().unwrap().push(ts);
            Ok(())
        })
    }

    fn location(&self) -> String {
        "recording".to_string()
    }
}
