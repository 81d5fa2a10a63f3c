//! Metrics for observability.
//!
//! Emitted through the `metrics` facade; the embedding application decides
//! whether and how they are exported (Prometheus, statsd, nothing).
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `oplog_replication_` and follow Prometheus
//! conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration)
//!
//! # Usage
//!
//! ```rust,no_run
//! use oplog_replicator::metrics;
//! use std::time::Duration;
//!
//! metrics::record_entry_read("tail");
//! metrics::record_apply_latency(Duration::from_millis(3));
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record an entry read from the source log.
pub fn record_entry_read(phase: &str) {
    counter!("oplog_replication_entries_read_total", "phase" => phase.to_string()).increment(1);
}

/// Record an entry accepted by the destination.
pub fn record_entry_applied(phase: &str) {
    counter!("oplog_replication_entries_applied_total", "phase" => phase.to_string()).increment(1);
}

/// Record an entry the destination refused.
pub fn record_apply_rejected(ignored: bool) {
    let policy = if ignored { "ignored" } else { "fatal" };
    counter!("oplog_replication_apply_rejections_total", "policy" => policy).increment(1);
}

/// Record an entry dropped by the filter.
pub fn record_entry_skipped(reason: &str) {
    counter!("oplog_replication_entries_skipped_total", "reason" => reason.to_string()).increment(1);
}

/// Record an entry already consumed before a tail reopen.
pub fn record_duplicate_skipped() {
    counter!("oplog_replication_duplicates_skipped_total").increment(1);
}

/// Record round-trip latency of a single destination apply.
pub fn record_apply_latency(duration: Duration) {
    histogram!("oplog_replication_apply_duration_seconds").record(duration.as_secs_f64());
}

/// Record a checkpoint write attempt.
pub fn record_checkpoint_write(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("oplog_replication_checkpoint_writes_total", "status" => status).increment(1);
}

/// Record checkpoint SQLite retry (for SQLITE_BUSY/SQLITE_LOCKED).
pub fn record_checkpoint_retry(operation: &str) {
    counter!("oplog_replication_checkpoint_retries_total", "operation" => operation.to_string())
        .increment(1);
}

/// Record replication lag: wall clock minus the last applied entry's time.
pub fn record_replication_lag(lag_seconds: f64) {
    gauge!("oplog_replication_lag_seconds").set(lag_seconds);
}

/// Gauge for the last applied timestamp (seconds component).
pub fn set_last_applied(seconds: u32) {
    gauge!("oplog_replication_last_applied_seconds").set(f64::from(seconds));
}

/// Record the tailing cursor being reopened.
pub fn record_tail_reopen() {
    counter!("oplog_replication_tail_reopens_total").increment(1);
}

/// Record errors by kind.
pub fn record_error(kind: &str) {
    counter!("oplog_replication_errors_total", "kind" => kind.to_string()).increment(1);
}

/// Gauge for engine state.
pub fn set_engine_state(state: &str) {
    // Numeric encoding for alerting
    let value = match state {
        "Resolving" => 0.0,
        "CatchingUp" => 1.0,
        "Tailing" => 2.0,
        "Stopped" => 3.0,
        "Failed" => 4.0,
        _ => -1.0,
    };
    gauge!("oplog_replication_engine_state").set(value);
}
