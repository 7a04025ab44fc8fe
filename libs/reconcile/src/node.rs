//! Worker node records and the hostname-indexed arena that holds them.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use slurmha_names::{Hostname, PartitionName};

/// One worker's advertised facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Unique key of the worker.
    pub hostname: Hostname,

    /// Partition the worker belongs to.
    pub partition: PartitionName,

    /// Whether the worker's partition is the cluster default.
    #[serde(default)]
    pub default: bool,

    /// Partition time limit as advertised by the worker.
    #[serde(
        default,
        deserialize_with = "deserialize_timelimit",
        skip_serializing_if = "Option::is_none"
    )]
    pub timelimit: Option<String>,

    /// Hardware attributes (`RealMemory`, `CPUs`, `NodeName`, ...).
    #[serde(default)]
    pub inventory: BTreeMap<String, Value>,
}

impl NodeRecord {
    /// Create a record with an empty inventory.
    pub fn new(hostname: Hostname, partition: PartitionName) -> Self {
        Self {
            hostname,
            partition,
            default: false,
            timelimit: None,
            inventory: BTreeMap::new(),
        }
    }
}

/// Workers publish the time limit either as a string (`"60"`, `"INFINITE"`)
/// or as a bare number.
fn deserialize_timelimit<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "timelimit must be a string or number, got {other}"
        ))),
    }
}

/// Node records in delivery order, indexed by hostname.
///
/// Inserting a record for a hostname that is already present replaces the
/// earlier record in place, so stale and fresh copies of one worker never
/// both reach the partition map.
#[derive(Debug, Clone, Default)]
pub struct NodeArena {
    records: Vec<NodeRecord>,
    index: HashMap<Hostname, usize>,
}

impl NodeArena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, returning the record it replaced.
    pub fn insert(&mut self, record: NodeRecord) -> Option<NodeRecord> {
        match self.index.get(&record.hostname) {
            Some(&slot) => Some(std::mem::replace(&mut self.records[slot], record)),
            None => {
                self.index.insert(record.hostname.clone(), self.records.len());
                self.records.push(record);
                None
            }
        }
    }

    /// Look up a record by hostname.
    pub fn get(&self, hostname: &str) -> Option<&NodeRecord> {
        self.index.get(hostname).map(|&slot| &self.records[slot])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in delivery order.
    pub fn iter(&self) -> std::slice::Iter<'_, NodeRecord> {
        self.records.iter()
    }

    /// Records in delivery order as a slice.
    pub fn as_slice(&self) -> &[NodeRecord] {
        &self.records
    }
}

impl FromIterator<NodeRecord> for NodeArena {
    fn from_iter<I: IntoIterator<Item = NodeRecord>>(iter: I) -> Self {
        let mut arena = NodeArena::new();
        for record in iter {
            arena.insert(record);
        }
        arena
    }
}

impl<'a> IntoIterator for &'a NodeArena {
    type Item = &'a NodeRecord;
    type IntoIter = std::slice::Iter<'a, NodeRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(host: &str, partition: &str) -> NodeRecord {
        NodeRecord::new(
            Hostname::parse(host).unwrap(),
            PartitionName::parse(partition).unwrap(),
        )
    }

    #[test]
    fn test_arena_keeps_delivery_order() {
        let arena: NodeArena = vec![node("n2", "batch"), node("n1", "batch"), node("n3", "gpu")]
            .into_iter()
            .collect();

        let hosts: Vec<_> = arena.iter().map(|n| n.hostname.as_str()).collect();
        assert_eq!(hosts, vec!["n2", "n1", "n3"]);
    }

    #[test]
    fn test_arena_replaces_duplicate_in_place() {
        let mut arena = NodeArena::new();
        arena.insert(node("n1", "batch"));
        arena.insert(node("n2", "batch"));

        let replaced = arena.insert(node("n1", "gpu")).unwrap();
        assert_eq!(replaced.partition.as_str(), "batch");

        assert_eq!(arena.len(), 2);
        assert_eq!(arena.as_slice()[0].partition.as_str(), "gpu");
        assert_eq!(arena.get("n1").unwrap().partition.as_str(), "gpu");
        assert!(arena.get("n9").is_none());
    }

    #[test]
    fn test_node_record_from_relation_json() {
        let json = serde_json::json!({
            "hostname": "n1",
            "partition": "batch",
            "default": true,
            "timelimit": 60,
            "inventory": {"NodeName": "n1", "RealMemory": 1000, "CPUs": "8"}
        });

        let record: NodeRecord = serde_json::from_value(json).unwrap();
        assert_eq!(record.timelimit.as_deref(), Some("60"));
        assert!(record.default);
        assert_eq!(record.inventory["CPUs"], "8");
    }

    #[test]
    fn test_node_record_defaults() {
        let json = serde_json::json!({"hostname": "n1", "partition": "batch"});
        let record: NodeRecord = serde_json::from_value(json).unwrap();
        assert!(!record.default);
        assert!(record.timelimit.is_none());
        assert!(record.inventory.is_empty());

        let out = serde_json::to_value(&record).unwrap();
        assert!(out.get("timelimit").is_none());
    }

    #[test]
    fn test_node_record_rejects_bad_timelimit() {
        let json = serde_json::json!({"hostname": "n1", "partition": "batch", "timelimit": [1]});
        assert!(serde_json::from_value::<NodeRecord>(json).is_err());
    }
}
