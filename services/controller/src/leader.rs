//! Leader settings: the cluster-wide key/value store only the leader writes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::fsutil::write_atomic;

/// Leader settings interface.
#[async_trait]
pub trait LeaderSettings: Send + Sync {
    /// Whether this unit currently leads.
    async fn is_leader(&self) -> Result<bool>;

    /// Read a setting.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write or (with `None`) remove a setting. Only the leader may write.
    async fn set(&self, key: &str, value: Option<&str>) -> Result<()>;

    /// Read all settings.
    async fn all(&self) -> Result<BTreeMap<String, String>>;
}

/// Leader settings kept as a JSON document shared by all units.
pub struct FileLeadership {
    path: PathBuf,
    is_leader: bool,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileLeadership {
    /// Settings stored at `leader-settings.json` under `dir`.
    pub fn new(dir: &Path, is_leader: bool) -> Self {
        Self {
            path: dir.join("leader-settings.json"),
            is_leader,
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<BTreeMap<String, String>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("Invalid leader settings in {:?}", self.path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {:?}", self.path)),
        }
    }
}

#[async_trait]
impl LeaderSettings for FileLeadership {
    async fn is_leader(&self) -> Result<bool> {
        Ok(self.is_leader)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, value: Option<&str>) -> Result<()> {
        if !self.is_leader {
            anyhow::bail!("Only the leader may write leader settings (key '{key}')");
        }

        let _guard = self.lock.lock().await;
        let mut settings = self.load().await?;
        match value {
            Some(value) => settings.insert(key.to_string(), value.to_string()),
            None => settings.remove(key),
        };

        let bytes = serde_json::to_vec_pretty(&settings)?;
        write_atomic(&self.path, &bytes, 0o600).await?;
        debug!(key, "Leader setting written");
        Ok(())
    }

    async fn all(&self) -> Result<BTreeMap<String, String>> {
        self.load().await
    }
}

/// In-memory leader settings for tests and development.
#[derive(Default)]
pub struct MemoryLeadership {
    is_leader: bool,
    settings: Mutex<BTreeMap<String, String>>,
}

impl MemoryLeadership {
    pub fn new(is_leader: bool) -> Self {
        Self {
            is_leader,
            settings: Mutex::new(BTreeMap::new()),
        }
    }

    /// Seed a value regardless of leadership, as another unit would have.
    pub async fn seed(&self, key: &str, value: &str) {
        self.settings
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
    }
}

#[async_trait]
impl LeaderSettings for MemoryLeadership {
    async fn is_leader(&self) -> Result<bool> {
        Ok(self.is_leader)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.settings.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Option<&str>) -> Result<()> {
        if !self.is_leader {
            anyhow::bail!("Only the leader may write leader settings (key '{key}')");
        }
        let mut settings = self.settings.lock().await;
        match value {
            Some(value) => settings.insert(key.to_string(), value.to_string()),
            None => settings.remove(key),
        };
        Ok(())
    }

    async fn all(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.settings.lock().await.clone())
    }
}
