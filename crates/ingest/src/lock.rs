use crate::{IngestError, Result};
use fs2::FileExt;
use std::path::{Path, PathBuf};

pub const LOCK_FILE_NAME: &str = "registry.lock";

/// Exclusive ownership of a checkpoint directory, released on drop.
#[derive(Debug)]
pub struct CheckpointLock {
    file: std::fs::File,
    path: PathBuf,
}

impl CheckpointLock {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CheckpointLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[must_use]
pub fn lock_path_for_dir(dir: &Path) -> PathBuf {
    dir.join(LOCK_FILE_NAME)
}

/// Take the directory lock without waiting. Fails with
/// [`IngestError::LockHeld`] when another process owns it.
pub async fn acquire_checkpoint_lock(dir: &Path) -> Result<CheckpointLock> {
    tokio::fs::create_dir_all(dir).await?;
    let path = lock_path_for_dir(dir);

    tokio::task::spawn_blocking(move || -> Result<CheckpointLock> {
        use std::fs::OpenOptions;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| {
                IngestError::Other(format!("open checkpoint lock {}: {err}", path.display()))
            })?;

        if let Err(err) = file.try_lock_exclusive() {
            if err.kind() == fs2::lock_contended_error().kind() {
                return Err(IngestError::LockHeld { path });
            }
            return Err(IngestError::Other(format!(
                "acquire checkpoint lock {}: {err}",
                path.display()
            )));
        }

        Ok(CheckpointLock { file, path })
    })
    .await
    .map_err(|err| IngestError::Other(format!("join checkpoint lock task: {err}")))?
}
