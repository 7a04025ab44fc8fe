//! Atomic file writes.

use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Write `data` to `path` atomically with the given permission bits.
///
/// The data lands in a sibling temp file, is synced, then renamed over the
/// target. Parent directories are created as needed. A temp file left over
/// from an interrupted write is removed first, since it may carry a
/// read-only mode.
pub async fn write_atomic(path: &Path, data: &[u8], mode: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create directory {:?}", parent))?;
    }

    let tmp_path = path.with_extension("tmp");
    match tokio::fs::remove_file(&tmp_path).await {
        Ok(()) => debug!(path = ?tmp_path, "Removed stale temp file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("failed to remove stale {:?}", tmp_path))
        }
    }

    {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(&tmp_path)
            .await
            .with_context(|| format!("open failed: {:?}", tmp_path))?;
        file.write_all(data)
            .await
            .with_context(|| format!("write failed: {:?}", tmp_path))?;
        file.sync_all().await?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename failed: {:?} -> {:?}", tmp_path, path))?;

    Ok(())
}

/// Write `data` unless `path` already holds exactly these bytes.
///
/// Returns whether the file changed.
pub async fn write_if_changed(path: &Path, data: &[u8], mode: u32) -> Result<bool> {
    match tokio::fs::read(path).await {
        Ok(existing) if existing == data => return Ok(false),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_context(|| format!("failed to read {:?}", path)),
    }

    write_atomic(path, data, mode).await?;
    Ok(true)
}
