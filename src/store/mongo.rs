// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! MongoDB store backend.
//!
//! Reads the replica set operation log (`local.oplog.rs`) and applies
//! entries with the `applyOps` admin command, one entry per command.
//!
//! # Query Shape
//!
//! ```text
//! { ts: { $gt | $gte: Timestamp(s, i) }, ns: { $in: [ /^shop(\.|$)/, ... ] } }
//! ```
//!
//! The log head is found with `sort: { $natural: -1 }, limit: 1`.
//!
//! # Tailing
//!
//! The tailing cursor is a `TailableAwait` cursor with `maxAwaitTime` equal
//! to the idle timeout. Each `next()` is additionally bounded by the idle
//! timeout on the client side, so an idle boundary is always reported even
//! if the server holds the getMore open longer.
//!
//! # Transport Security
//!
//! When TLS is enabled, server certificates are not verified.

use super::{
    ApplyResponse, BoxFuture, Bound, DestinationStore, LogCursor, LogQuery, SortOrder,
    SourceStore, StoreError, StoreResult,
};
use crate::config::StoreConfig;
use crate::document::{Document, Value};
use crate::entry::{LogEntry, OpType, Timestamp};
use crate::error::{ReplicationError, Result};
use mongodb::bson::{self, doc, spec::BinarySubtype, Bson};
use mongodb::error::ErrorKind;
use mongodb::options::{ClientOptions, Credential, CursorType, FindOptions, Tls, TlsOptions};
use mongodb::{Client, Collection, Cursor};
use std::time::Duration;
use tracing::{debug, info};

const OPLOG_DATABASE: &str = "local";
const OPLOG_COLLECTION: &str = "oplog.rs";
const ADMIN_DATABASE: &str = "admin";

/// A connected MongoDB deployment, usable as source or destination.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    label: String,
}

impl MongoStore {
    /// Connect and verify the deployment answers a `ping`.
    ///
    /// `label` names the side ("source", "destination") in errors and logs.
    pub async fn connect(config: &StoreConfig, label: &str) -> Result<Self> {
        let connection_error = |message: String| ReplicationError::Connection {
            store: label.to_string(),
            message,
        };

        let mut options = ClientOptions::parse(&config.uri)
            .await
            .map_err(|e| connection_error(e.to_string()))?;

        let timeout = config.connect_timeout_duration();
        options.connect_timeout = Some(timeout);
        options.server_selection_timeout = Some(timeout);

        if config.tls {
            options.tls = Some(Tls::Enabled(
                TlsOptions::builder().allow_invalid_certificates(true).build(),
            ));
        }

        if let Some(username) = config.username.as_ref().filter(|u| !u.is_empty()) {
            options.credential = Some(
                Credential::builder()
                    .username(username.clone())
                    .password(config.password.clone())
                    .build(),
            );
        }

        let client = Client::with_options(options).map_err(|e| connection_error(e.to_string()))?;
        client
            .database(ADMIN_DATABASE)
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| connection_error(e.to_string()))?;

        info!(store = label, tls = config.tls, "Connected");
        Ok(Self {
            client,
            label: label.to_string(),
        })
    }

    fn oplog(&self) -> Collection<bson::Document> {
        self.client
            .database(OPLOG_DATABASE)
            .collection::<bson::Document>(OPLOG_COLLECTION)
    }
}

impl SourceStore for MongoStore {
    fn list_databases(&self) -> BoxFuture<'_, Vec<String>> {
        Box::pin(async move {
            self.client
                .list_database_names(None, None)
                .await
                .map_err(store_error)
        })
    }

    fn find_log(
        &self,
        query: LogQuery,
        order: SortOrder,
        limit: Option<usize>,
    ) -> BoxFuture<'_, Box<dyn LogCursor>> {
        Box::pin(async move {
            let mut options = FindOptions::default();
            if order == SortOrder::Descending {
                options.sort = Some(doc! { "$natural": -1 });
            }
            options.limit = limit.and_then(|l| i64::try_from(l).ok());

            let cursor = self
                .oplog()
                .find(query_filter(&query), options)
                .await
                .map_err(store_error)?;

            Ok(Box::new(MongoCursor::new(cursor, None)) as Box<dyn LogCursor>)
        })
    }

    fn open_tail(&self, query: LogQuery, idle_timeout: Duration) -> BoxFuture<'_, Box<dyn LogCursor>> {
        Box::pin(async move {
            let mut options = FindOptions::default();
            options.cursor_type = Some(CursorType::TailableAwait);
            options.max_await_time = Some(idle_timeout);
            options.no_cursor_timeout = Some(true);

            let filter = query_filter(&query);
            debug!(store = %self.label, filter = %filter, "Opening tailable cursor");

            let cursor = self.oplog().find(filter, options).await.map_err(store_error)?;
            Ok(Box::new(MongoCursor::new(cursor, Some(idle_timeout))) as Box<dyn LogCursor>)
        })
    }
}

impl DestinationStore for MongoStore {
    fn atomic_apply<'a>(&'a self, batch: &'a [LogEntry]) -> BoxFuture<'a, ApplyResponse> {
        Box::pin(async move {
            let ops: Vec<Bson> = batch.iter().map(|e| Bson::Document(entry_to_bson(e))).collect();
            let result = self
                .client
                .database(ADMIN_DATABASE)
                .run_command(doc! { "applyOps": ops }, None)
                .await;

            match result {
                Ok(_) => Ok(ApplyResponse::accepted()),
                Err(e) => match e.kind.as_ref() {
                    ErrorKind::Command(command) => Ok(ApplyResponse::rejected(format!(
                        "{} (code {})",
                        command.message, command.code
                    ))),
                    _ => Err(store_error(e)),
                },
            }
        })
    }
}

struct MongoCursor {
    cursor: Cursor<bson::Document>,
    /// Client-side bound on each `next()`; `None` for finite reads.
    idle_timeout: Option<Duration>,
    timed_out: bool,
}

impl MongoCursor {
    fn new(cursor: Cursor<bson::Document>, idle_timeout: Option<Duration>) -> Self {
        Self {
            cursor,
            idle_timeout,
            timed_out: false,
        }
    }
}

impl LogCursor for MongoCursor {
    fn next(&mut self) -> BoxFuture<'_, Option<LogEntry>> {
        Box::pin(async move {
            self.timed_out = false;

            let advanced = match self.idle_timeout {
                Some(idle) => match tokio::time::timeout(idle, self.cursor.advance()).await {
                    Ok(advanced) => advanced,
                    Err(_) => {
                        self.timed_out = true;
                        return Ok(None);
                    }
                },
                None => self.cursor.advance().await,
            }
            .map_err(store_error)?;

            if !advanced {
                return Ok(None);
            }

            let raw: bson::Document = self.cursor.deserialize_current().map_err(store_error)?;
            entry_from_bson(raw).map(Some)
        })
    }

    fn timed_out(&self) -> bool {
        self.timed_out
    }
}

fn store_error(e: mongodb::error::Error) -> StoreError {
    match e.kind.as_ref() {
        ErrorKind::Io(_) | ErrorKind::ServerSelection { .. } | ErrorKind::ConnectionPoolCleared { .. } => {
            StoreError::transport(e.to_string())
        }
        _ => StoreError::query(e.to_string()),
    }
}

fn query_filter(query: &LogQuery) -> bson::Document {
    let mut filter = bson::Document::new();

    match query.bound {
        Bound::Unbounded => {}
        Bound::After(ts) => {
            filter.insert("ts", doc! { "$gt": timestamp_to_bson(ts) });
        }
        Bound::AtOrAfter(ts) => {
            filter.insert("ts", doc! { "$gte": timestamp_to_bson(ts) });
        }
    }

    if !query.namespaces.is_any() {
        let patterns: Vec<Bson> = query
            .namespaces
            .database_names()
            .map(|db| {
                Bson::RegularExpression(bson::Regex {
                    pattern: format!(r"^{}(\.|$)", escape_regex(db)),
                    options: String::new(),
                })
            })
            .collect();
        filter.insert("ns", doc! { "$in": patterns });
    }

    filter
}

fn escape_regex(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if r"\.+*?()|[]{}^$-".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn timestamp_to_bson(ts: Timestamp) -> Bson {
    Bson::Timestamp(bson::Timestamp {
        time: ts.seconds(),
        increment: ts.ordinal(),
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// Oplog entry <-> LogEntry
// ═══════════════════════════════════════════════════════════════════════════════

fn entry_from_bson(raw: bson::Document) -> StoreResult<LogEntry> {
    let ts = raw
        .get_timestamp("ts")
        .map_err(|e| StoreError::query(format!("oplog entry without ts: {}", e)))?;
    let code = raw
        .get_str("op")
        .map_err(|e| StoreError::query(format!("oplog entry without op: {}", e)))?;
    let op = OpType::from_code(code)
        .ok_or_else(|| StoreError::query(format!("unknown oplog op type {:?}", code)))?;

    let version = match raw.get("v") {
        Some(Bson::Int32(v)) => *v,
        Some(Bson::Int64(v)) => i32::try_from(*v).unwrap_or(i32::MAX),
        _ => 2,
    };

    Ok(LogEntry {
        timestamp: Timestamp::from_parts(ts.time, ts.increment),
        history_id: raw.get_i64("h").ok(),
        version,
        op,
        namespace: raw.get_str("ns").unwrap_or_default().to_string(),
        payload: raw.get_document("o").map(document_from_bson).unwrap_or_default(),
        match_criteria: raw.get_document("o2").ok().map(document_from_bson),
    })
}

fn entry_to_bson(entry: &LogEntry) -> bson::Document {
    let mut out = doc! {
        "ts": timestamp_to_bson(entry.timestamp),
    };
    if let Some(h) = entry.history_id {
        out.insert("h", h);
    }
    out.insert("v", entry.version);
    out.insert("op", entry.op.code());
    out.insert("ns", entry.namespace.as_str());
    out.insert("o", document_to_bson(&entry.payload));
    if let Some(criteria) = &entry.match_criteria {
        out.insert("o2", document_to_bson(criteria));
    }
    out
}

fn document_from_bson(doc: &bson::Document) -> Document {
    doc.iter()
        .map(|(k, v)| (k.clone(), value_from_bson(v)))
        .collect()
}

fn document_to_bson(doc: &Document) -> bson::Document {
    let mut out = bson::Document::new();
    for (k, v) in doc.iter() {
        out.insert(k, value_to_bson(v));
    }
    out
}

fn value_from_bson(value: &Bson) -> Value {
    match value {
        Bson::Null => Value::Null,
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Int32(v) => Value::Int32(*v),
        Bson::Int64(v) => Value::Int64(*v),
        Bson::Double(v) => Value::Double(*v),
        Bson::String(s) => Value::String(s.clone()),
        Bson::Binary(b) => Value::Binary {
            subtype: u8::from(b.subtype),
            bytes: b.bytes.clone(),
        },
        Bson::ObjectId(oid) => Value::ObjectId(oid.bytes()),
        Bson::DateTime(dt) => Value::DateTime(dt.timestamp_millis()),
        Bson::Timestamp(ts) => Value::Timestamp(Timestamp::from_parts(ts.time, ts.increment).as_u64()),
        Bson::Array(items) => Value::Array(items.iter().map(value_from_bson).collect()),
        Bson::Document(d) => Value::Document(document_from_bson(d)),
        // Decimal128, regex, code, min/max keys...: carried as encoded bytes
        other => match bson::to_vec(&doc! { "v": other.clone() }) {
            Ok(bytes) => Value::Opaque(bytes),
            Err(_) => Value::Null,
        },
    }
}

fn value_to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Int32(v) => Bson::Int32(*v),
        Value::Int64(v) => Bson::Int64(*v),
        Value::Double(v) => Bson::Double(*v),
        Value::String(s) => Bson::String(s.clone()),
        Value::Binary { subtype, bytes } => Bson::Binary(bson::Binary {
            subtype: BinarySubtype::from(*subtype),
            bytes: bytes.clone(),
        }),
        Value::ObjectId(bytes) => Bson::ObjectId(bson::oid::ObjectId::from_bytes(*bytes)),
        Value::DateTime(ms) => Bson::DateTime(bson::DateTime::from_millis(*ms)),
        Value::Timestamp(raw) => timestamp_to_bson(Timestamp::new(*raw)),
        Value::Array(items) => Bson::Array(items.iter().map(value_to_bson).collect()),
        Value::Document(d) => Bson::Document(document_to_bson(d)),
        Value::Opaque(bytes) => bson::from_slice::<bson::Document>(bytes)
            .ok()
            .and_then(|mut d| d.remove("v"))
            .unwrap_or(Bson::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NamespaceFilter;

    #[test]
    fn test_query_filter_bounds() {
        let ts = Timestamp::from_parts(100, 2);
        let after = query_filter(&LogQuery::new(Bound::After(ts), NamespaceFilter::any()));
        assert_eq!(
            after,
            doc! { "ts": { "$gt": Bson::Timestamp(bson::Timestamp { time: 100, increment: 2 }) } }
        );

        let at = query_filter(&LogQuery::new(Bound::AtOrAfter(ts), NamespaceFilter::any()));
        assert!(at.get_document("ts").unwrap().contains_key("$gte"));

        assert!(query_filter(&LogQuery::all()).is_empty());
    }

    #[test]
    fn test_query_filter_namespaces_anchored() {
        let query = LogQuery::new(Bound::Unbounded, NamespaceFilter::databases(["shop"]));
        let filter = query_filter(&query);
        let patterns = filter.get_document("ns").unwrap().get_array("$in").unwrap();
        match &patterns[0] {
            Bson::RegularExpression(re) => assert_eq!(re.pattern, r"^shop(\.|$)"),
            other => panic!("expected regex, got {:?}", other),
        }
    }

    #[test]
    fn test_escape_regex() {
        assert_eq!(escape_regex("my-db"), r"my\-db");
        assert_eq!(escape_regex("plain"), "plain");
    }

    #[test]
    fn test_entry_conversion_preserves_fields() {
        let entry = LogEntry::new(Timestamp::from_parts(1_700_000_000, 4), OpType::Update, "shop.orders")
            .with_payload(Document::new().with("$set", Document::new().with("qty", 3i32)))
            .with_match_criteria(Document::new().with("_id", Value::ObjectId([7; 12])));
        let mut entry = entry;
        entry.history_id = Some(-42);

        let back = entry_from_bson(entry_to_bson(&entry)).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_entry_field_order() {
        let entry = LogEntry::new(Timestamp::new(1), OpType::Insert, "shop.orders");
        let keys: Vec<&str> = entry_to_bson(&entry).keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["ts", "v", "op", "ns", "o"]);
    }

    #[test]
    fn test_unknown_bson_carried_opaque() {
        let original = Bson::JavaScriptCode("function() {}".to_string());
        let value = value_from_bson(&original);
        assert!(matches!(value, Value::Opaque(_)));
        assert_eq!(value_to_bson(&value), original);
    }

    #[test]
    fn test_entry_without_ts_is_error() {
        let raw = doc! { "op": "i", "ns": "shop.orders", "o": {} };
        assert!(entry_from_bson(raw).is_err());
    }
}
