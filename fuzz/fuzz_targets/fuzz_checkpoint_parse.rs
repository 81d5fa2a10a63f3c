//! Fuzz target for checkpoint text parsing.
//!
//! A checkpoint file may hold anything after a crash or a manual edit.
//! Parsing must never panic, and whatever parses must print back to a
//! form that parses to the same value.

#![no_main]

use libfuzzer_sys::fuzz_target;
use oplog_replicator::Timestamp;

fuzz_target!(|data: &str| {
    if let Ok(ts) = data.parse::<Timestamp>() {
        let printed = ts.to_string();
        assert_eq!(printed.parse::<Timestamp>(), Ok(ts));
        assert_eq!(Timestamp::from_parts(ts.seconds(), ts.ordinal()), ts);
    }
});
