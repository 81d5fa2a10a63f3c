// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! oplog-replicator - replicate a MongoDB operation log into another deployment

use clap::{Args, Parser, Subcommand};
use oplog_replicator::store::mongo::MongoStore;
use oplog_replicator::{
    CheckpointConfig, ReplicationConfig, ReplicationEngine, Result, SinceConfig, StoreConfig,
};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "oplog-replicator",
    version,
    about = "Ordered, resumable oplog replication between MongoDB deployments"
)]
struct Cli {
    /// Log filter (e.g. "debug", "oplog_replicator=trace"); overrides RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replicate until stopped (Ctrl-C) or, with --fast-stop, until caught up
    Sync(SyncArgs),
}

#[derive(Args)]
struct SyncArgs {
    /// Source connection string
    #[arg(long, env = "OPLOG_SRC")]
    src: String,

    /// Use TLS for the source (certificates are not verified)
    #[arg(long)]
    src_ssl: bool,

    #[arg(long)]
    src_username: Option<String>,

    #[arg(long, env = "OPLOG_SRC_PASSWORD", hide_env_values = true)]
    src_password: Option<String>,

    /// Destination connection string
    #[arg(long, env = "OPLOG_DST")]
    dst: String,

    /// Use TLS for the destination (certificates are not verified)
    #[arg(long)]
    dst_ssl: bool,

    #[arg(long)]
    dst_username: Option<String>,

    #[arg(long, env = "OPLOG_DST_PASSWORD", hide_env_values = true)]
    dst_password: Option<String>,

    /// Connection timeout in seconds (0 = 300)
    #[arg(long, default_value_t = 0)]
    timeout: u64,

    /// Start after this oplog time (seconds); ignored if the checkpoint is later
    #[arg(long, default_value_t = 0)]
    since: u32,

    /// Ordinal within the --since second
    #[arg(long, default_value_t = 0)]
    ordinal: u32,

    /// Log and skip entries the destination rejects instead of aborting
    #[arg(long)]
    ignore_apply_error: bool,

    /// Checkpoint file holding the last applied timestamp
    #[arg(long)]
    timestamp_recorder_filepath: Option<String>,

    /// Keep the checkpoint in this SQLite database instead of a text file
    #[arg(long, conflicts_with = "timestamp_recorder_filepath")]
    checkpoint_sqlite: Option<String>,

    /// Stop at the first idle timeout instead of tailing forever
    #[arg(long)]
    fast_stop: bool,
}

impl SyncArgs {
    fn into_config(self) -> ReplicationConfig {
        let connect_timeout = if self.timeout > 0 {
            format!("{}s", self.timeout)
        } else {
            String::new()
        };

        let checkpoint = match (self.timestamp_recorder_filepath, self.checkpoint_sqlite) {
            (Some(path), _) => CheckpointConfig::file(path),
            (None, Some(path)) => CheckpointConfig::sqlite(path),
            (None, None) => CheckpointConfig::None,
        };

        let mut config = ReplicationConfig {
            source: StoreConfig {
                uri: self.src,
                tls: self.src_ssl,
                username: self.src_username,
                password: self.src_password,
                connect_timeout: connect_timeout.clone(),
            },
            destination: StoreConfig {
                uri: self.dst,
                tls: self.dst_ssl,
                username: self.dst_username,
                password: self.dst_password,
                connect_timeout,
            },
            since: Some(SinceConfig {
                seconds: self.since,
                ordinal: self.ordinal,
            }),
            ignore_apply_error: self.ignore_apply_error,
            checkpoint,
            ..Default::default()
        };
        config.tail.fast_stop = self.fast_stop;
        config
    }
}

fn init_logging(level: Option<&str>) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

async fn sync(args: SyncArgs) -> Result<()> {
    let config = args.into_config();
    config.validate()?;

    let source = Arc::new(MongoStore::connect(&config.source, "source").await?);
    let destination = Arc::new(MongoStore::connect(&config.destination, "destination").await?);

    let mut engine = ReplicationEngine::new(config, source, destination)
        .with_configured_checkpoint()
        .await?;

    let stop = engine.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping at next idle boundary");
            stop.stop();
        }
    });

    let summary = engine.run().await?;
    info!(
        applied = summary.applied,
        rejected_ignored = summary.rejected_ignored,
        noops_skipped = summary.noops_skipped,
        checkpoint_read_failures = summary.checkpoint_read_failures,
        checkpoint_write_failures = summary.checkpoint_write_failures,
        "Sync finished"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let result = match cli.command {
        Commands::Sync(args) => sync(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, fatal = e.is_fatal(), "Sync failed");
            ExitCode::FAILURE
        }
    }
}
