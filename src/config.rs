//! Configuration for the replication engine.
//!
//! This module defines all configuration types needed to run the replication engine.
//! Configuration is passed to [`ReplicationEngine::new()`](crate::ReplicationEngine::new)
//! and can be constructed programmatically or deserialized from YAML/JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use oplog_replicator::config::{CheckpointConfig, ReplicationConfig, SinceConfig, StoreConfig};
//!
//! let config = ReplicationConfig {
//!     source: StoreConfig::new("mongodb://src:27017"),
//!     destination: StoreConfig::new("mongodb://dst:27017"),
//!     since: Some(SinceConfig { seconds: 1_700_000_000, ordinal: 0 }),
//!     checkpoint: CheckpointConfig::file("/var/lib/replicator/ts"),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ReplicationConfig
//! ├── source: StoreConfig          # Where the operation log is read
//! ├── destination: StoreConfig     # Where operations are applied
//! ├── since: Option<SinceConfig>   # Explicit resume point (seconds + ordinal)
//! ├── ignore_apply_error: bool     # Tolerate destination rejections
//! ├── checkpoint: CheckpointConfig # Durable resume point (none/file/sqlite)
//! └── tail: TailConfig             # Idle timeout, fast stop
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! source:
//!   uri: "mongodb://src.internal:27017"
//!   tls: true
//!   username: "replicator"
//!   password: "..."
//!   connect_timeout: "30s"
//! destination:
//!   uri: "mongodb://dr.internal:27017"
//! since:
//!   seconds: 1700000000
//!   ordinal: 0
//! ignore_apply_error: false
//! checkpoint:
//!   backend: file
//!   path: "/var/lib/replicator/ts"
//! tail:
//!   fast_stop: false
//! ```

use crate::entry::Timestamp;
use crate::error::{ReplicationError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default connection timeout when none (or zero) is configured.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default idle timeout of the tailing cursor.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(1);

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `ReplicationEngine::new()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Store whose operation log is replicated.
    pub source: StoreConfig,

    /// Store the operations are applied to.
    pub destination: StoreConfig,

    /// Explicit start point. Ignored when a later checkpoint exists.
    #[serde(default)]
    pub since: Option<SinceConfig>,

    /// Log and continue when the destination rejects an apply,
    /// instead of aborting the run.
    #[serde(default)]
    pub ignore_apply_error: bool,

    /// Checkpoint persistence.
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// Tailing behaviour.
    #[serde(default)]
    pub tail: TailConfig,
}

impl ReplicationConfig {
    /// Create a minimal config for testing (in-process stores, no checkpoint).
    pub fn for_testing() -> Self {
        Self {
            source: StoreConfig::new("memory://source"),
            destination: StoreConfig::new("memory://destination"),
            ..Default::default()
        }
    }

    /// The explicit since timestamp, if one is set.
    pub fn since_timestamp(&self) -> Option<Timestamp> {
        self.since.as_ref().and_then(SinceConfig::timestamp)
    }

    /// Check the configuration for errors that would only surface mid-run.
    pub fn validate(&self) -> Result<()> {
        self.source.validate("source")?;
        self.destination.validate("destination")?;
        self.tail.validate()?;
        self.checkpoint.validate()?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// StoreConfig: one per side
// ═══════════════════════════════════════════════════════════════════════════════

/// Connection settings for one store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Connection string, e.g. `"mongodb://host:27017"`.
    pub uri: String,

    /// Enable TLS. Certificates are not verified.
    #[serde(default)]
    pub tls: bool,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Connection timeout as a duration string (e.g., "30s").
    /// Empty or zero means [`DEFAULT_CONNECT_TIMEOUT`].
    #[serde(default)]
    pub connect_timeout: String,
}

impl StoreConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Default::default()
        }
    }

    /// Parse `connect_timeout`, falling back to the default for empty,
    /// zero or unparsable values.
    pub fn connect_timeout_duration(&self) -> Duration {
        if self.connect_timeout.trim().is_empty() {
            return DEFAULT_CONNECT_TIMEOUT;
        }
        match humantime::parse_duration(&self.connect_timeout) {
            Ok(d) if !d.is_zero() => d,
            _ => DEFAULT_CONNECT_TIMEOUT,
        }
    }

    fn validate(&self, side: &str) -> Result<()> {
        if self.uri.trim().is_empty() {
            return Err(ReplicationError::Config(format!("{} uri is empty", side)));
        }
        if !self.connect_timeout.trim().is_empty() {
            humantime::parse_duration(&self.connect_timeout).map_err(|e| {
                ReplicationError::Config(format!("{} connect_timeout: {}", side, e))
            })?;
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SinceConfig: explicit resume point
// ═══════════════════════════════════════════════════════════════════════════════

/// Explicit start point as `(seconds, ordinal)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinceConfig {
    /// Seconds since the Unix epoch. Zero means "not set".
    pub seconds: u32,

    /// Ordinal within that second.
    #[serde(default)]
    pub ordinal: u32,
}

impl SinceConfig {
    /// The packed timestamp, or `None` when `seconds` is zero.
    pub fn timestamp(&self) -> Option<Timestamp> {
        if self.seconds == 0 {
            None
        } else {
            Some(Timestamp::from_parts(self.seconds, self.ordinal))
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CheckpointConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Checkpoint persistence configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum CheckpointConfig {
    /// No checkpointing; every run resolves its start from `since` or the log head.
    #[default]
    None,

    /// Single text-encoded integer at `path`, replaced atomically on each write.
    File { path: String },

    /// Row `name` in a SQLite database at `path`.
    Sqlite {
        path: String,
        #[serde(default = "default_checkpoint_name")]
        name: String,
    },
}

fn default_checkpoint_name() -> String {
    "default".to_string()
}

impl CheckpointConfig {
    pub fn file(path: impl Into<String>) -> Self {
        Self::File { path: path.into() }
    }

    pub fn sqlite(path: impl Into<String>) -> Self {
        Self::Sqlite {
            path: path.into(),
            name: default_checkpoint_name(),
        }
    }

    /// Create an in-memory SQLite config for testing.
    pub fn in_memory() -> Self {
        Self::sqlite(":memory:")
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::None)
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::None => Ok(()),
            Self::File { path } | Self::Sqlite { path, .. } if path.trim().is_empty() => Err(
                ReplicationError::Config("checkpoint path is empty".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TailConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Tailing phase configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TailConfig {
    /// How long the tailing cursor waits for new entries before reporting
    /// an idle boundary, as a duration string. Parsed to Duration internally.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: String,

    /// End the run at the first idle boundary (no new data for one idle timeout).
    #[serde(default)]
    pub fast_stop: bool,
}

fn default_idle_timeout() -> String {
    "1s".to_string()
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            idle_timeout: default_idle_timeout(),
            fast_stop: false,
        }
    }
}

impl TailConfig {
    /// Parse the idle_timeout string to a Duration.
    pub fn idle_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.idle_timeout).unwrap_or(DEFAULT_IDLE_TIMEOUT)
    }

    fn validate(&self) -> Result<()> {
        let parsed = humantime::parse_duration(&self.idle_timeout)
            .map_err(|e| ReplicationError::Config(format!("tail idle_timeout: {}", e)))?;
        if parsed.is_zero() {
            return Err(ReplicationError::Config(
                "tail idle_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_since_zero_seconds_is_unset() {
        let since = SinceConfig { seconds: 0, ordinal: 5 };
        assert_eq!(since.timestamp(), None);
    }

    #[test]
    fn test_since_packs_parts() {
        let since = SinceConfig { seconds: 100, ordinal: 3 };
        assert_eq!(since.timestamp(), Some(Timestamp::from_parts(100, 3)));
    }

    #[test]
    fn test_since_timestamp_from_config() {
        let mut config = ReplicationConfig::for_testing();
        assert_eq!(config.since_timestamp(), None);
        config.since = Some(SinceConfig { seconds: 7, ordinal: 0 });
        assert_eq!(config.since_timestamp(), Some(Timestamp::from_parts(7, 0)));
    }

    #[test]
    fn test_connect_timeout_defaults() {
        let mut store = StoreConfig::new("mongodb://x");
        assert_eq!(store.connect_timeout_duration(), DEFAULT_CONNECT_TIMEOUT);

        store.connect_timeout = "0s".to_string();
        assert_eq!(store.connect_timeout_duration(), DEFAULT_CONNECT_TIMEOUT);

        store.connect_timeout = "30s".to_string();
        assert_eq!(store.connect_timeout_duration(), Duration::from_secs(30));

        store.connect_timeout = "garbage".to_string();
        assert_eq!(store.connect_timeout_duration(), DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_idle_timeout_various_formats() {
        let test_cases = [
            ("1s", Duration::from_secs(1)),
            ("500ms", Duration::from_millis(500)),
            ("2min", Duration::from_secs(120)),
        ];

        for (input, expected) in test_cases {
            let config = TailConfig {
                idle_timeout: input.to_string(),
                ..Default::default()
            };
            assert_eq!(config.idle_timeout_duration(), expected, "Failed for input: {}", input);
        }
    }

    #[test]
    fn test_idle_timeout_invalid_fallback() {
        let config = TailConfig {
            idle_timeout: "invalid".to_string(),
            ..Default::default()
        };
        assert_eq!(config.idle_timeout_duration(), DEFAULT_IDLE_TIMEOUT);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_ok_for_testing() {
        assert!(ReplicationConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_validate_empty_uri() {
        let config = ReplicationConfig::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("source uri is empty"));
    }

    #[test]
    fn test_validate_bad_connect_timeout() {
        let mut config = ReplicationConfig::for_testing();
        config.destination.connect_timeout = "soon".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_idle_timeout() {
        let mut config = ReplicationConfig::for_testing();
        config.tail.idle_timeout = "0s".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_checkpoint_path() {
        let mut config = ReplicationConfig::for_testing();
        config.checkpoint = CheckpointConfig::file("");
        assert!(config.validate().is_err());
        config.checkpoint = CheckpointConfig::file("/tmp/ts");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_checkpoint_config_serde_tagged() {
        let json = r#"{"backend":"sqlite","path":"/var/lib/ckpt.db"}"#;
        let config: CheckpointConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            config,
            CheckpointConfig::Sqlite {
                path: "/var/lib/ckpt.db".to_string(),
                name: "default".to_string(),
            }
        );
        assert!(config.is_enabled());
        assert!(!CheckpointConfig::None.is_enabled());
    }

    #[test]
    fn test_replication_config_from_json_defaults() {
        let json = r#"{
            "source": {"uri": "mongodb://a"},
            "destination": {"uri": "mongodb://b"}
        }"#;
        let config: ReplicationConfig = serde_json::from_str(json).unwrap();
        assert!(!config.ignore_apply_error);
        assert_eq!(config.checkpoint, CheckpointConfig::None);
        assert_eq!(config.tail.idle_timeout_duration(), Duration::from_secs(1));
        assert!(!config.tail.fast_stop);
        assert_eq!(config.since, None);
    }
}
