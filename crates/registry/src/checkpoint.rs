use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::registry::Registry;
use crate::snapshot::RegistrySnapshot;
use log::info;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::io::AsyncWriteExt;

pub const CHECKPOINT_FILE_NAME: &str = "registry.json";

/// Result of one successful checkpoint write
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointReport {
    pub path: PathBuf,
    pub taken_at_unix_ms: u64,
    pub families: usize,
    pub samples: u64,
    pub bytes: u64,
    pub duration_ms: u64,
}

/// Durable home of the latest registry snapshot.
///
/// Writes go to a temporary sibling which is flushed and then renamed over
/// the previous checkpoint, so a crash mid-write leaves the last good
/// checkpoint intact.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILE_NAME)
    }

    fn tmp_path(&self) -> PathBuf {
        self.path().with_extension("json.tmp")
    }

    /// Snapshot the registry and persist it.
    pub async fn checkpoint(&self, registry: &Registry) -> Result<CheckpointReport> {
        let started = Instant::now();
        let (snapshot, pending) = registry.snapshot_with_pending();
        let bytes = self.write(&snapshot).await?;
        registry.mark_checkpointed(pending);

        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = started.elapsed().as_millis() as u64;
        Ok(CheckpointReport {
            path: self.path(),
            taken_at_unix_ms: snapshot.taken_at_unix_ms,
            families: snapshot.families.len(),
            samples: snapshot.total_samples(),
            bytes,
            duration_ms,
        })
    }

    /// Atomically replace the checkpoint with `snapshot`. Returns the number
    /// of bytes written.
    pub async fn write(&self, snapshot: &RegistrySnapshot) -> Result<u64> {
        let path = self.path();
        let write_error = |reason: String| RegistryError::CheckpointWrite {
            path: path.clone(),
            reason,
        };

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| write_error(format!("create dir: {err}")))?;

        let bytes = serde_json::to_vec_pretty(snapshot)
            .map_err(|err| write_error(format!("serialize: {err}")))?;

        let tmp = self.tmp_path();
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|err| write_error(format!("create {}: {err}", tmp.display())))?;
        file.write_all(&bytes)
            .await
            .map_err(|err| write_error(format!("write {}: {err}", tmp.display())))?;
        file.sync_all()
            .await
            .map_err(|err| write_error(format!("sync {}: {err}", tmp.display())))?;
        drop(file);

        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|err| write_error(format!("rename {}: {err}", tmp.display())))?;

        Ok(bytes.len() as u64)
    }

    /// Load the latest checkpoint. A missing file is `Ok(None)`; anything
    /// unreadable is [`RegistryError::CheckpointCorrupt`].
    pub async fn read(&self) -> Result<Option<RegistrySnapshot>> {
        let path = self.path();
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(RegistryError::CheckpointCorrupt {
                    path,
                    reason: format!("unreadable: {err}"),
                })
            }
        };

        let snapshot: RegistrySnapshot =
            serde_json::from_slice(&bytes).map_err(|err| RegistryError::CheckpointCorrupt {
                path: path.clone(),
                reason: format!("parse: {err}"),
            })?;
        snapshot
            .validate()
            .map_err(|err| RegistryError::CheckpointCorrupt {
                path: path.clone(),
                reason: err.to_string(),
            })?;
        Ok(Some(snapshot))
    }

    /// Rebuild the registry from the latest checkpoint, or start empty when
    /// none exists yet.
    pub async fn restore(&self, config: RegistryConfig) -> Result<Registry> {
        match self.read().await? {
            Some(snapshot) => {
                info!(
                    "Restored {} families from checkpoint {} (taken at {})",
                    snapshot.families.len(),
                    self.path().display(),
                    snapshot.taken_at_unix_ms
                );
                Registry::from_snapshot(snapshot, config)
            }
            None => {
                info!(
                    "No checkpoint at {}, starting with an empty registry",
                    self.path().display()
                );
                Registry::new(config)
            }
        }
    }
}
