//! Local staging of raw and processed bytes.

use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::{WorkerError, WorkerResult};

/// Local directories mirroring object keys.
#[derive(Debug, Clone)]
pub struct StagingArea {
    raw_dir: PathBuf,
    processed_dir: PathBuf,
}

impl StagingArea {
    pub fn new(raw_dir: impl Into<PathBuf>, processed_dir: impl Into<PathBuf>) -> Self {
        Self {
            raw_dir: raw_dir.into(),
            processed_dir: processed_dir.into(),
        }
    }

    /// Where the raw object `key` is staged. Fails if `key` would escape the root.
    pub fn raw_path(&self, key: &str) -> WorkerResult<PathBuf> {
        resolve(&self.raw_dir, key)
    }

    /// Where the processed object `key` is staged.
    pub fn processed_path(&self, key: &str) -> WorkerResult<PathBuf> {
        resolve(&self.processed_dir, key)
    }

    /// Write downloaded bytes at `<raw_dir>/<key>`.
    pub async fn write_raw(&self, key: &str, bytes: &[u8]) -> WorkerResult<PathBuf> {
        let path = self.raw_path(key)?;
        write(&path, bytes).await?;
        Ok(path)
    }

    /// Write transformed bytes at `<processed_dir>/<key>`.
    pub async fn write_processed(&self, key: &str, bytes: &[u8]) -> WorkerResult<PathBuf> {
        let path = self.processed_path(key)?;
        write(&path, bytes).await?;
        Ok(path)
    }

    /// Create both roots.
    pub async fn ensure_dirs(&self) -> WorkerResult<()> {
        tokio::fs::create_dir_all(&self.raw_dir).await?;
        tokio::fs::create_dir_all(&self.processed_dir).await?;
        Ok(())
    }
}

/// Join `key` under `root`, refusing anything that would escape it.
fn resolve(root: &Path, key: &str) -> WorkerResult<PathBuf> {
    let relative = Path::new(key);
    let safe = !key.is_empty()
        && relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));

    if !safe {
        return Err(WorkerError::invalid_key(format!(
            "'{}' cannot be staged locally",
            key
        )));
    }
    Ok(root.join(relative))
}

async fn write(path: &Path, bytes: &[u8]) -> WorkerResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await?;
    debug!("Staged {} bytes at {}", bytes.len(), path.display());
    Ok(())
}
