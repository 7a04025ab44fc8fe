//! Relation transport: what the controller reads from and writes to its
//! worker, peer and accounting-database relations.
//!
//! The file adapter exchanges JSON snapshots through a per-unit directory
//! (`<relation_dir>/<application>-<number>/`) so the agent can be driven by
//! any host tooling that maintains those files:
//!
//! - `membership.json`: `{"units": [...], "nodes": [NodeRecord, ...]}`
//! - `peer.json`: `{"units": [...], "data": {...}}`
//! - `network.json`: this unit's addressing, unprefixed
//! - `dbd.json`: `{"host": ..., "port": ..., "ipaddr": ...}`
//!
//! It writes `downstream.json` (the document workers see from this unit)
//! and `peer-provided.json` (the document the HA peer sees). Host tooling
//! delivers one unit's `peer-provided.json` as the other unit's `peer.json`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use slurmha_reconcile::{DbdLocation, NodeArena, NodeRecord, Outbound, RelationData};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::fsutil::write_atomic;

/// Relation transport interface.
#[async_trait]
pub trait RelationStore: Send + Sync {
    /// Whether any worker unit is related.
    async fn membership_joined(&self) -> Result<bool>;

    /// Node records published by the workers, de-duplicated by hostname.
    async fn node_inventory(&self) -> Result<NodeArena>;

    /// The HA peer's published data; `None` without a peer.
    async fn peer_data(&self) -> Result<Option<RelationData>>;

    /// Publish this unit's data to the HA peer.
    async fn provide_peer_data(&self, data: &RelationData) -> Result<()>;

    /// This unit's own addressing.
    async fn network_details(&self) -> Result<RelationData>;

    /// Location advertised on the accounting-database relation.
    async fn dbd_location(&self) -> Result<Option<DbdLocation>>;

    /// Publish a document to every worker.
    async fn send_downstream(&self, outbound: &Outbound) -> Result<()>;
}

#[derive(Debug, Default, Deserialize)]
struct MembershipSnapshot {
    #[serde(default)]
    units: Vec<String>,
    #[serde(default)]
    nodes: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct PeerSnapshot {
    #[serde(default)]
    units: Vec<String>,
    #[serde(default)]
    data: RelationData,
}

/// Build the arena from raw worker records.
///
/// Records that do not parse are skipped; one malformed worker must not hide
/// the rest of the cluster.
fn arena_from_values(values: Vec<Value>) -> NodeArena {
    let mut arena = NodeArena::new();
    for value in values {
        match serde_json::from_value::<NodeRecord>(value) {
            Ok(record) => {
                if let Some(previous) = arena.insert(record) {
                    debug!(hostname = %previous.hostname, "Duplicate node record replaced");
                }
            }
            Err(e) => warn!(error = %e, "Skipping malformed node record"),
        }
    }
    arena
}

/// Relations exchanged as JSON files in a directory.
pub struct FileRelations {
    dir: PathBuf,
}

impl FileRelations {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.dir.join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .with_context(|| format!("Invalid relation snapshot {:?}", path))?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {:?}", path)),
        }
    }

    async fn write_json(&self, name: &str, data: &RelationData) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(data)?;
        write_atomic(&self.dir.join(name), &bytes, 0o640).await
    }
}

#[async_trait]
impl RelationStore for FileRelations {
    async fn membership_joined(&self) -> Result<bool> {
        let snapshot: Option<MembershipSnapshot> = self.read_json("membership.json").await?;
        Ok(snapshot.is_some_and(|s| !s.units.is_empty()))
    }

    async fn node_inventory(&self) -> Result<NodeArena> {
        let snapshot: MembershipSnapshot =
            self.read_json("membership.json").await?.unwrap_or_default();
        Ok(arena_from_values(snapshot.nodes))
    }

    async fn peer_data(&self) -> Result<Option<RelationData>> {
        let snapshot: Option<PeerSnapshot> = self.read_json("peer.json").await?;
        Ok(snapshot.filter(|s| !s.units.is_empty()).map(|s| s.data))
    }

    async fn provide_peer_data(&self, data: &RelationData) -> Result<()> {
        self.write_json("peer-provided.json", data).await
    }

    async fn network_details(&self) -> Result<RelationData> {
        Ok(self.read_json("network.json").await?.unwrap_or_default())
    }

    async fn dbd_location(&self) -> Result<Option<DbdLocation>> {
        self.read_json("dbd.json").await
    }

    async fn send_downstream(&self, outbound: &Outbound) -> Result<()> {
        self.write_json("downstream.json", &outbound.to_relation_data())
            .await
    }
}

/// In-memory relations for tests and development.
#[derive(Default)]
pub struct MemoryRelations {
    inner: Mutex<MemoryRelationState>,
}

/// Contents of [`MemoryRelations`].
#[derive(Debug, Clone, Default)]
pub struct MemoryRelationState {
    pub member_units: Vec<String>,
    pub nodes: Vec<Value>,
    pub peer_units: Vec<String>,
    pub peer_data: RelationData,
    pub network: RelationData,
    pub dbd: Option<DbdLocation>,
    /// Last document sent downstream.
    pub downstream: Option<RelationData>,
    /// How many documents were sent downstream.
    pub downstream_sends: usize,
    /// Last document provided to the peer.
    pub provided: Option<RelationData>,
}

impl MemoryRelations {
    pub fn new(state: MemoryRelationState) -> Self {
        Self {
            inner: Mutex::new(state),
        }
    }

    /// Mutate the relation contents.
    pub async fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut MemoryRelationState),
    {
        f(&mut *self.inner.lock().await);
    }

    pub async fn snapshot(&self) -> MemoryRelationState {
        self.inner.lock().await.clone()
    }
}

#[async_trait]
impl RelationStore for MemoryRelations {
    async fn membership_joined(&self) -> Result<bool> {
        Ok(!self.inner.lock().await.member_units.is_empty())
    }

    async fn node_inventory(&self) -> Result<NodeArena> {
        Ok(arena_from_values(self.inner.lock().await.nodes.clone()))
    }

    async fn peer_data(&self) -> Result<Option<RelationData>> {
        let inner = self.inner.lock().await;
        Ok((!inner.peer_units.is_empty()).then(|| inner.peer_data.clone()))
    }

    async fn provide_peer_data(&self, data: &RelationData) -> Result<()> {
        self.inner.lock().await.provided = Some(data.clone());
        Ok(())
    }

    async fn network_details(&self) -> Result<RelationData> {
        Ok(self.inner.lock().await.network.clone())
    }

    async fn dbd_location(&self) -> Result<Option<DbdLocation>> {
        Ok(self.inner.lock().await.dbd.clone())
    }

    async fn send_downstream(&self, outbound: &Outbound) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.downstream = Some(outbound.to_relation_data());
        inner.downstream_sends += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_relations_empty_dir() {
        let dir = tempdir().unwrap();
        let relations = FileRelations::new(dir.path());

        assert!(!relations.membership_joined().await.unwrap());
        assert!(relations.node_inventory().await.unwrap().is_empty());
        assert!(relations.peer_data().await.unwrap().is_none());
        assert!(relations.network_details().await.unwrap().is_empty());
        assert!(relations.dbd_location().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_relations_reads_snapshots() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("membership.json"),
            json!({
                "units": ["slurmd/0", "slurmd/1"],
                "nodes": [
                    {"hostname": "n1", "partition": "batch", "default": true, "timelimit": 60},
                    {"hostname": "bad host!", "partition": "batch"},
                    {"hostname": "n1", "partition": "gpu"},
                ],
            })
            .to_string(),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("peer.json"),
            json!({"units": ["slurm-controller/1"], "data": {"hostname": "ctl-1"}}).to_string(),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("dbd.json"),
            json!({"host": "dbd-0", "port": 6819, "ipaddr": "10.0.0.20"}).to_string(),
        )
        .unwrap();

        let relations = FileRelations::new(dir.path());
        assert!(relations.membership_joined().await.unwrap());

        let arena = relations.node_inventory().await.unwrap();
        assert_eq!(arena.len(), 1);
        assert_eq!(arena.get("n1").unwrap().partition.as_str(), "gpu");

        let peer = relations.peer_data().await.unwrap().unwrap();
        assert_eq!(peer["hostname"], json!("ctl-1"));

        let dbd = relations.dbd_location().await.unwrap().unwrap();
        assert_eq!(dbd.port, 6819);
    }

    #[tokio::test]
    async fn test_peer_without_units_is_absent() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("peer.json"),
            json!({"units": [], "data": {"hostname": "ctl-1"}}).to_string(),
        )
        .unwrap();

        let relations = FileRelations::new(dir.path());
        assert!(relations.peer_data().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_relations_records_sends() {
        let relations = MemoryRelations::default();
        let mut config = slurmha_reconcile::ControllerConfig::new();
        config.insert("nodes", json!([]));

        relations
            .send_downstream(&Outbound::Config(config))
            .await
            .unwrap();

        let state = relations.snapshot().await;
        assert_eq!(state.downstream_sends, 1);
        assert!(state.downstream.unwrap().contains_key("nodes"));
    }
}
