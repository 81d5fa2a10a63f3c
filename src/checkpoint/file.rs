// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Text-file checkpoint.
//!
//! The file holds a single integer: the packed timestamp of the last applied
//! entry, with no trailing newline. Writes go to a sibling `.tmp` file which
//! is synced and then renamed over the target, so a reader never observes a
//! partially written value.

use super::{CheckpointFuture, CheckpointStore};
use crate::entry::Timestamp;
use crate::error::ReplicationError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Checkpoint stored as a text file at an operator-configured path.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }

    async fn write_atomic(&self, contents: &[u8]) -> std::io::Result<()> {
        let tmp = self.temp_path();
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn read(&self) -> CheckpointFuture<'_, Option<Timestamp>> {
        Box::pin(async move {
            let contents = match tokio::fs::read_to_string(&self.path).await {
                Ok(contents) => contents,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(path = %self.path.display(), "No checkpoint file yet");
                    return Ok(None);
                }
                Err(e) => {
                    return Err(ReplicationError::CheckpointRead(format!(
                        "{}: {}",
                        self.path.display(),
                        e
                    )))
                }
            };

            let ts = contents.parse::<Timestamp>().map_err(|e| {
                ReplicationError::CheckpointRead(format!(
                    "{}: invalid timestamp {:?}: {}",
                    self.path.display(),
                    contents,
                    e
                ))
            })?;

            Ok(Some(ts))
        })
    }

    fn write(&self, ts: Timestamp) -> CheckpointFuture<'_, ()> {
        Box::pin(async move {
            self.write_atomic(ts.to_string().as_bytes())
                .await
                .map_err(|e| {
                    ReplicationError::CheckpointWrite(format!("{}: {}", self.path.display(), e))
                })
        })
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}
