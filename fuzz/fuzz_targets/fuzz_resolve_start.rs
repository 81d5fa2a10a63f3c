//! Fuzz target for start-point resolution.
//!
//! Whatever the checkpoint and since values, the resolved start never
//! lies below either of them.

#![no_main]

use libfuzzer_sys::fuzz_target;
use oplog_replicator::{resolve_start, Timestamp};

fuzz_target!(|data: (u64, u64)| {
    let (checkpoint, since) = (Timestamp::new(data.0), Timestamp::new(data.1));
    let start = resolve_start(Some(checkpoint), Some(since));

    match start.timestamp() {
        Some(ts) => {
            assert!(checkpoint.is_zero() || ts >= checkpoint);
            assert!(since.is_zero() || ts >= since);
        }
        None => assert!(checkpoint.is_zero() && since.is_zero()),
    }
});
