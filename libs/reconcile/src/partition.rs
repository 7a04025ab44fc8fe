//! Partition aggregation from node inventory.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use slurmha_names::{Hostname, PartitionName};

use crate::node::NodeRecord;

/// Hosts and metadata of one scheduler partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Hosts in the order their records were processed.
    pub hosts: Vec<Hostname>,

    /// Whether this is the cluster default partition.
    pub default: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timelimit: Option<String>,
}

/// Partition name to partition.
pub type PartitionMap = BTreeMap<PartitionName, Partition>;

/// Group nodes into partitions.
///
/// Nodes are processed in the order given. `default` and `timelimit` take the
/// values of the last node processed for each partition; nodes are not checked
/// for agreement. A hostname supplied twice is listed twice, so callers that
/// care de-duplicate first (see [`crate::NodeArena`]).
///
/// An empty input yields an empty map, which callers treat as "no data yet".
pub fn aggregate<'a, I>(nodes: I) -> PartitionMap
where
    I: IntoIterator<Item = &'a NodeRecord>,
{
    let mut partitions = PartitionMap::new();

    for node in nodes {
        let partition = partitions
            .entry(node.partition.clone())
            .or_insert_with(|| Partition {
                hosts: Vec::new(),
                default: node.default,
                timelimit: None,
            });
        partition.hosts.push(node.hostname.clone());
        partition.default = node.default;
        partition.timelimit = node.timelimit.clone();
    }

    partitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeArena;
    use proptest::prelude::*;
    use serde_json::json;

    fn node(host: &str, partition: &str, default: bool, timelimit: Option<&str>) -> NodeRecord {
        let mut record = NodeRecord::new(
            Hostname::parse(host).unwrap(),
            PartitionName::parse(partition).unwrap(),
        );
        record.default = default;
        record.timelimit = timelimit.map(str::to_string);
        record
    }

    #[test]
    fn test_aggregate_empty() {
        let nodes: Vec<NodeRecord> = Vec::new();
        assert!(aggregate(&nodes).is_empty());
    }

    #[test]
    fn test_aggregate_two_partitions() {
        let nodes = vec![
            node("n1", "batch", true, Some("60")),
            node("n2", "batch", true, Some("60")),
            node("n3", "gpu", false, Some("30")),
        ];

        let partitions = aggregate(&nodes);

        assert_eq!(
            serde_json::to_value(&partitions).unwrap(),
            json!({
                "batch": {"hosts": ["n1", "n2"], "default": true, "timelimit": "60"},
                "gpu": {"hosts": ["n3"], "default": false, "timelimit": "30"},
            })
        );
    }

    #[test]
    fn test_aggregate_last_record_wins_metadata() {
        let nodes = vec![
            node("n1", "batch", true, Some("60")),
            node("n2", "batch", false, None),
        ];

        let partitions = aggregate(&nodes);
        let batch = &partitions[&PartitionName::parse("batch").unwrap()];
        assert!(!batch.default);
        assert!(batch.timelimit.is_none());
    }

    #[test]
    fn test_aggregate_duplicate_input_duplicates_host() {
        let nodes = vec![node("n1", "batch", true, None), node("n1", "batch", true, None)];
        let partitions = aggregate(&nodes);
        assert_eq!(partitions.values().next().unwrap().hosts.len(), 2);
    }

    #[test]
    fn test_aggregate_arena_deduplicates() {
        let arena: NodeArena = vec![
            node("n1", "batch", true, None),
            node("n1", "gpu", false, None),
        ]
        .into_iter()
        .collect();

        let partitions = aggregate(&arena);
        assert_eq!(partitions.len(), 1);
        assert_eq!(
            partitions[&PartitionName::parse("gpu").unwrap()].hosts,
            vec![Hostname::parse("n1").unwrap()]
        );
    }

    proptest! {
        #[test]
        fn prop_hosts_follow_last_seen_partition(
            assignments in proptest::collection::vec((0usize..8, 0usize..3), 0..24)
        ) {
            let partitions_names = ["batch", "gpu", "debug"];
            let arena: NodeArena = assignments
                .iter()
                .map(|(h, p)| node(&format!("n{h}"), partitions_names[*p], false, None))
                .collect();

            let partitions = aggregate(&arena);

            // Key set is exactly the distinct partitions present.
            let mut expected_keys: Vec<&str> = arena.iter().map(|n| n.partition.as_str()).collect();
            expected_keys.sort_unstable();
            expected_keys.dedup();
            let keys: Vec<&str> = partitions.keys().map(|k| k.as_str()).collect();
            prop_assert_eq!(keys, expected_keys);

            // Every host sits in exactly its last-seen record's partition.
            for record in arena.iter() {
                for (name, partition) in &partitions {
                    let count = partition.hosts.iter().filter(|h| **h == record.hostname).count();
                    let expected = usize::from(*name == record.partition);
                    prop_assert_eq!(count, expected);
                }
            }
        }
    }
}
