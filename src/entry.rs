// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Operation log entries.
//!
//! A [`LogEntry`] is one record of the source's append-only operation log,
//! forwarded essentially verbatim to the destination's atomic apply call.
//!
//! # Timestamps
//!
//! A [`Timestamp`] is a 64-bit value: the high 32 bits are seconds since the
//! Unix epoch, the low 32 bits an ordinal disambiguating entries within the
//! same second. Comparing the packed value compares `(seconds, ordinal)`
//! lexicographically, so the raw `u64` doubles as cursor position and
//! checkpoint unit.
//!
//! ```text
//!  63                 32 31                  0
//! ┌──────────────────────┬─────────────────────┐
//! │   seconds (coarse)   │   ordinal (fine)    │
//! └──────────────────────┴─────────────────────┘
//! ```

use crate::document::Document;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Position in the operation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The zero timestamp. Treated as "unset" wherever a resume point is resolved.
    pub const ZERO: Timestamp = Timestamp(0);

    /// Wrap a raw packed value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Pack a `(seconds, ordinal)` pair.
    pub const fn from_parts(seconds: u32, ordinal: u32) -> Self {
        Self(((seconds as u64) << 32) | ordinal as u64)
    }

    /// The raw packed value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Coarse component: seconds since the Unix epoch.
    pub const fn seconds(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Fine component: ordinal within the second.
    pub const fn ordinal(self) -> u32 {
        self.0 as u32
    }

    /// `true` for the zero timestamp.
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// `None` for zero, `Some(self)` otherwise.
    pub fn non_zero(self) -> Option<Self> {
        if self.is_zero() {
            None
        } else {
            Some(self)
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Timestamp {
    type Err = std::num::ParseIntError;

    /// Parses the packed integer form written by [`Display`](fmt::Display).
    /// Surrounding whitespace (e.g. a trailing newline an operator added
    /// by hand) is ignored.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Timestamp)
    }
}

impl From<u64> for Timestamp {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Kind of operation an entry carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpType {
    Insert,
    Update,
    Delete,
    Command,
    /// Heartbeat/housekeeping record with no data effect.
    NoOp,
}

impl OpType {
    /// The single-letter code used in the log (`i`, `u`, `d`, `c`, `n`).
    pub fn code(self) -> &'static str {
        match self {
            OpType::Insert => "i",
            OpType::Update => "u",
            OpType::Delete => "d",
            OpType::Command => "c",
            OpType::NoOp => "n",
        }
    }

    /// Parse a log code. Returns `None` for unknown codes.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "i" => Some(OpType::Insert),
            "u" => Some(OpType::Update),
            "d" => Some(OpType::Delete),
            "c" => Some(OpType::Command),
            "n" => Some(OpType::NoOp),
            _ => None,
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One record from the source's operation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Log position; strictly increasing across the log.
    pub timestamp: Timestamp,
    /// Originating operation chain. Not interpreted.
    pub history_id: Option<i64>,
    /// Log entry format version.
    pub version: i32,
    pub op: OpType,
    /// `database.collection` the operation targets.
    pub namespace: String,
    /// Inserted/updated content or command body.
    pub payload: Document,
    /// Selector for the target document (updates, deletes).
    pub match_criteria: Option<Document>,
}

impl LogEntry {
    /// Create an entry with the given position, type and namespace, and an
    /// empty payload.
    pub fn new(timestamp: Timestamp, op: OpType, namespace: impl Into<String>) -> Self {
        Self {
            timestamp,
            history_id: None,
            version: 2,
            op,
            namespace: namespace.into(),
            payload: Document::new(),
            match_criteria: None,
        }
    }

    /// Set the payload (builder style).
    pub fn with_payload(mut self, payload: Document) -> Self {
        self.payload = payload;
        self
    }

    /// Set the match criteria (builder style).
    pub fn with_match_criteria(mut self, criteria: Document) -> Self {
        self.match_criteria = Some(criteria);
        self
    }

    /// Database component of the namespace (text before the first `.`).
    pub fn database(&self) -> &str {
        database_of(&self.namespace)
    }

    /// Check if this is a no-op (heartbeat) entry.
    pub fn is_noop(&self) -> bool {
        self.op == OpType::NoOp
    }
}

/// Database component of a `database.collection` namespace.
pub fn database_of(namespace: &str) -> &str {
    namespace.split_once('.').map_or(namespace, |(db, _)| db)
}
