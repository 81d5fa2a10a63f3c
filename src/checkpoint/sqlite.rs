// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite checkpoint store.
//!
//! Keeps one row per named checkpoint, so several replicators can share a
//! database file as long as each uses its own name.
//!
//! # SQLite Busy Handling
//!
//! SQLite can return SQLITE_BUSY/SQLITE_LOCKED when the database is
//! contended by another process. Statements are retried with exponential
//! backoff up to [`SQLITE_RETRY_MAX_ATTEMPTS`] times before the error is
//! surfaced (as a non-fatal checkpoint error).
//!
//! The path `:memory:` opens a private in-memory database, which is useful
//! for tests.

use super::{CheckpointFuture, CheckpointStore};
use crate::entry::Timestamp;
use crate::error::{ReplicationError, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum attempts for a statement that keeps hitting SQLITE_BUSY.
pub const SQLITE_RETRY_MAX_ATTEMPTS: u32 = 5;
const SQLITE_RETRY_BASE_DELAY_MS: u64 = 10;
const SQLITE_RETRY_MAX_DELAY_MS: u64 = 500;

const IN_MEMORY: &str = ":memory:";

/// Check if an error is a retryable SQLite busy/locked error
fn is_sqlite_busy_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            // SQLITE_BUSY = 5, SQLITE_LOCKED = 6
            if let Some(code) = db_err.code() {
                return code == "5" || code == "6";
            }
            let msg = db_err.message().to_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        _ => false,
    }
}

/// Execute a statement with retry on SQLITE_BUSY/SQLITE_LOCKED
async fn execute_with_retry<F, Fut, T>(
    operation_name: &str,
    mut f: F,
) -> std::result::Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;
    let mut delay_ms = SQLITE_RETRY_BASE_DELAY_MS;

    loop {
        attempts += 1;
        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(operation = operation_name, attempts, "SQLite statement succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if is_sqlite_busy_error(&e) && attempts < SQLITE_RETRY_MAX_ATTEMPTS => {
                warn!(
                    operation = operation_name,
                    attempts,
                    max_attempts = SQLITE_RETRY_MAX_ATTEMPTS,
                    delay_ms,
                    "SQLite busy, retrying"
                );
                crate::metrics::record_checkpoint_retry(operation_name);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(SQLITE_RETRY_MAX_DELAY_MS);
            }
            Err(e) => return Err(e),
        }
    }
}

fn connect_options(path: &str) -> Result<SqliteConnectOptions> {
    if path == IN_MEMORY {
        return SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| ReplicationError::Config(format!("Invalid SQLite path: {}", e)));
    }

    // Taken as a plain filename: `?` and `#` are not URL syntax here.
    let options = SqliteConnectOptions::new()
        .filename(path)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .create_if_missing(true);
    Ok(options)
}

/// Checkpoint stored as a row in a SQLite database.
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
    name: String,
    path: String,
}

impl SqliteCheckpointStore {
    /// Open (creating if needed) the database at `path` and use the row
    /// keyed by `name`.
    pub async fn new(path: impl AsRef<Path>, name: impl Into<String>) -> Result<Self> {
        let path = path.as_ref().to_string_lossy().to_string();
        let name = name.into();
        info!(path = %path, name = %name, "Initializing checkpoint store");

        // One connection, never recycled: an in-memory database lives only
        // as long as its connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect_options(&path)?)
            .await
            .map_err(|e| ReplicationError::CheckpointRead(format!("{}: {}", path, e)))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                name TEXT PRIMARY KEY,
                ts INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| ReplicationError::CheckpointRead(format!("{}: {}", path, e)))?;

        Ok(Self { pool, name, path })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Force the WAL into the main database file and close the pool.
    pub async fn close(&self) {
        let pool = &self.pool;
        if self.path != IN_MEMORY {
            let result = execute_with_retry("checkpoint_wal", || async {
                sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)").execute(pool).await
            })
            .await;
            if let Err(e) = result {
                warn!(error = %e, "Failed to checkpoint WAL on close");
            }
        }
        self.pool.close().await;
        debug!(path = %self.path, "Checkpoint store closed");
    }

    async fn read_row(&self) -> std::result::Result<Option<i64>, sqlx::Error> {
        let pool = &self.pool;
        let name = &self.name;
        let row: Option<(i64,)> = execute_with_retry("checkpoint_read", || async {
            sqlx::query_as("SELECT ts FROM checkpoints WHERE name = ?")
                .bind(name)
                .fetch_optional(pool)
                .await
        })
        .await?;
        Ok(row.map(|(ts,)| ts))
    }

    async fn upsert_row(&self, ts: i64) -> std::result::Result<(), sqlx::Error> {
        let pool = &self.pool;
        let name = &self.name;
        let now = chrono::Utc::now().timestamp_millis();
        execute_with_retry("checkpoint_write", || async {
            sqlx::query(
                r#"
                INSERT INTO checkpoints (name, ts, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT(name) DO UPDATE SET
                    ts = excluded.ts,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(name)
            .bind(ts)
            .bind(now)
            .execute(pool)
            .await
        })
        .await?;
        Ok(())
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn read(&self) -> CheckpointFuture<'_, Option<Timestamp>> {
        Box::pin(async move {
            let raw = self
                .read_row()
                .await
                .map_err(|e| ReplicationError::CheckpointRead(format!("{}: {}", self.location(), e)))?;

            raw.map(|v| {
                u64::try_from(v).map(Timestamp::new).map_err(|_| {
                    ReplicationError::CheckpointRead(format!(
                        "{}: negative timestamp {}",
                        self.location(),
                        v
                    ))
                })
            })
            .transpose()
        })
    }

    fn write(&self, ts: Timestamp) -> CheckpointFuture<'_, ()> {
        Box::pin(async move {
            // SQLite integers are signed; timestamps above i64::MAX are not
            // representable.
            let raw = i64::try_from(ts.as_u64()).map_err(|_| {
                ReplicationError::CheckpointWrite(format!(
                    "{}: timestamp {} out of range",
                    self.location(),
                    ts
                ))
            })?;

            self.upsert_row(raw)
                .await
                .map_err(|e| ReplicationError::CheckpointWrite(format!("{}: {}", self.location(), e)))
        })
    }

    fn location(&self) -> String {
        format!("sqlite://{}#{}", self.path, self.name)
    }
}
