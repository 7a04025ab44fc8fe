//! Node weight ranking.
//!
//! The scheduler prefers nodes with a lower `Weight`. Ranking assigns each
//! node a dense rank over the distinct values of one hardware attribute, so
//! the smallest machines are used first.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use slurmha_names::Hostname;
use tracing::{debug, warn};

use crate::error::ReconcileError;
use crate::node::{NodeArena, NodeRecord};

/// Inventory key the derived weight is written to.
pub const WEIGHT_KEY: &str = "Weight";

/// Weight given to nodes that do not advertise the chosen attribute.
pub const MISSING_ATTRIBUTE_WEIGHT: u32 = 1;

/// Hardware attribute used to rank nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WeightMetric {
    RealMemory,
    CPUs,
    CoresPerSocket,
}

impl WeightMetric {
    pub const ALL: [WeightMetric; 3] = [
        WeightMetric::RealMemory,
        WeightMetric::CPUs,
        WeightMetric::CoresPerSocket,
    ];

    /// Inventory attribute name.
    pub fn attribute(&self) -> &'static str {
        match self {
            WeightMetric::RealMemory => "RealMemory",
            WeightMetric::CPUs => "CPUs",
            WeightMetric::CoresPerSocket => "CoresPerSocket",
        }
    }

    fn allowed() -> String {
        Self::ALL
            .iter()
            .map(WeightMetric::attribute)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for WeightMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.attribute())
    }
}

impl FromStr for WeightMetric {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|metric| metric.attribute() == s)
            .ok_or_else(|| ReconcileError::InvalidWeightMetric {
                value: s.to_string(),
                allowed: Self::allowed(),
            })
    }
}

/// Operator setting for weight ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WeightCriteria {
    /// Ranking is off; nodes keep whatever weight they advertise.
    #[default]
    Disabled,
    Metric(WeightMetric),
}

impl FromStr for WeightCriteria {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "none" => Ok(WeightCriteria::Disabled),
            other => other.parse().map(WeightCriteria::Metric),
        }
    }
}

/// Metric value to dense rank, starting at 1 for the smallest value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeightTable(BTreeMap<i64, u32>);

impl WeightTable {
    /// Build a table over the distinct values seen.
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = i64>,
    {
        let mut distinct: Vec<i64> = values.into_iter().collect();
        distinct.sort_unstable();
        distinct.dedup();

        Self(
            distinct
                .into_iter()
                .zip(1u32..)
                .collect::<BTreeMap<_, _>>(),
        )
    }

    pub fn rank_of(&self, value: i64) -> Option<u32> {
        self.0.get(&value).copied()
    }

    /// Number of distinct values.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, u32)> + '_ {
        self.0.iter().map(|(value, rank)| (*value, *rank))
    }
}

/// Weights derived for a set of nodes, kept apart from the node records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightProjection {
    metric: WeightMetric,
    table: WeightTable,
    weights: BTreeMap<Hostname, u32>,
}

impl WeightProjection {
    pub fn metric(&self) -> WeightMetric {
        self.metric
    }

    pub fn table(&self) -> &WeightTable {
        &self.table
    }

    /// Weight assigned to a host.
    pub fn weight_of(&self, hostname: &str) -> Option<u32> {
        self.weights.get(hostname).copied()
    }

    /// Copies of the arena's records with `inventory["Weight"]` set.
    pub fn project(&self, arena: &NodeArena) -> Vec<NodeRecord> {
        arena
            .iter()
            .map(|node| {
                let mut enriched = node.clone();
                if let Some(weight) = self.weight_of(node.hostname.as_str()) {
                    enriched
                        .inventory
                        .insert(WEIGHT_KEY.to_string(), Value::String(weight.to_string()));
                }
                enriched
            })
            .collect()
    }
}

/// Read the metric attribute as an integer.
///
/// Returns `None` when the attribute is absent or not an integer.
fn read_metric(node: &NodeRecord, metric: WeightMetric) -> Option<i64> {
    let value = node.inventory.get(metric.attribute())?;
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    if parsed.is_none() {
        warn!(
            hostname = %node.hostname,
            attribute = metric.attribute(),
            value = %value,
            "Ignoring non-integer weight attribute"
        );
    }
    parsed
}

/// Rank nodes by one metric.
///
/// Nodes lacking the attribute get [`MISSING_ATTRIBUTE_WEIGHT`], which can
/// coincide with the rank of the smallest real value.
pub fn rank(metric: WeightMetric, arena: &NodeArena) -> WeightProjection {
    let observed: Vec<(&NodeRecord, Option<i64>)> = arena
        .iter()
        .map(|node| (node, read_metric(node, metric)))
        .collect();

    let table = WeightTable::from_values(observed.iter().filter_map(|(_, value)| *value));

    let weights = observed
        .into_iter()
        .map(|(node, value)| {
            let weight = value
                .and_then(|v| table.rank_of(v))
                .unwrap_or(MISSING_ATTRIBUTE_WEIGHT);
            (node.hostname.clone(), weight)
        })
        .collect();

    debug!(
        metric = %metric,
        nodes = arena.len(),
        classes = table.len(),
        table = ?table.iter().collect::<Vec<_>>(),
        "Ranked node weights"
    );

    WeightProjection {
        metric,
        table,
        weights,
    }
}

/// Parse the operator's criteria and rank accordingly.
///
/// Returns `Ok(None)` when ranking is disabled. An invalid criteria is
/// rejected before any node is looked at.
pub fn rank_by(
    criteria: &str,
    arena: &NodeArena,
) -> Result<Option<WeightProjection>, ReconcileError> {
    match criteria.parse::<WeightCriteria>()? {
        WeightCriteria::Disabled => Ok(None),
        WeightCriteria::Metric(metric) => Ok(Some(rank(metric, arena))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;
    use slurmha_names::PartitionName;

    fn node(host: &str, attrs: &[(&str, Value)]) -> NodeRecord {
        let mut record = NodeRecord::new(
            Hostname::parse(host).unwrap(),
            PartitionName::parse("batch").unwrap(),
        );
        for (key, value) in attrs {
            record.inventory.insert(key.to_string(), value.clone());
        }
        record
    }

    #[test]
    fn test_real_memory_ranking() {
        let arena: NodeArena = vec![
            node("n1", &[("RealMemory", 1000.into())]),
            node("n2", &[("RealMemory", 2000.into())]),
            node("n3", &[("RealMemory", 1000.into())]),
            node("n4", &[("CPUs", 4.into())]),
        ]
        .into_iter()
        .collect();

        let projection = rank(WeightMetric::RealMemory, &arena);

        assert_eq!(
            projection.table().iter().collect::<Vec<_>>(),
            vec![(1000, 1), (2000, 2)]
        );
        let weights: Vec<_> = ["n1", "n2", "n3", "n4"]
            .iter()
            .map(|h| projection.weight_of(h).unwrap())
            .collect();
        assert_eq!(weights, vec![1, 2, 1, 1]);
    }

    #[test]
    fn test_missing_attribute_is_weight_one_even_when_lowest_is_taken() {
        let arena: NodeArena = vec![
            node("n1", &[("CPUs", 16.into())]),
            node("n2", &[("CPUs", 32.into())]),
            node("n3", &[]),
        ]
        .into_iter()
        .collect();

        let projection = rank(WeightMetric::CPUs, &arena);
        assert_eq!(projection.weight_of("n1"), Some(1));
        assert_eq!(projection.weight_of("n2"), Some(2));
        assert_eq!(projection.weight_of("n3"), Some(MISSING_ATTRIBUTE_WEIGHT));
    }

    #[test]
    fn test_string_attribute_values_are_parsed() {
        let arena: NodeArena = vec![
            node("n1", &[("CoresPerSocket", "8".into())]),
            node("n2", &[("CoresPerSocket", "4".into())]),
            node("n3", &[("CoresPerSocket", "lots".into())]),
        ]
        .into_iter()
        .collect();

        let projection = rank(WeightMetric::CoresPerSocket, &arena);
        assert_eq!(projection.weight_of("n1"), Some(2));
        assert_eq!(projection.weight_of("n2"), Some(1));
        assert_eq!(projection.weight_of("n3"), Some(1));
    }

    #[test]
    fn test_project_leaves_arena_untouched() {
        let arena: NodeArena = vec![node("n1", &[("RealMemory", 512.into())])]
            .into_iter()
            .collect();

        let projection = rank(WeightMetric::RealMemory, &arena);
        let enriched = projection.project(&arena);

        assert_eq!(enriched[0].inventory[WEIGHT_KEY], "1");
        assert!(!arena.get("n1").unwrap().inventory.contains_key(WEIGHT_KEY));
    }

    #[rstest]
    #[case("none", None)]
    #[case("", None)]
    #[case("RealMemory", Some(WeightMetric::RealMemory))]
    #[case("CPUs", Some(WeightMetric::CPUs))]
    #[case("CoresPerSocket", Some(WeightMetric::CoresPerSocket))]
    fn test_rank_by_accepts(#[case] criteria: &str, #[case] expected: Option<WeightMetric>) {
        let arena: NodeArena = vec![node("n1", &[])].into_iter().collect();
        let projection = rank_by(criteria, &arena).unwrap();
        assert_eq!(projection.map(|p| p.metric()), expected);
    }

    #[rstest]
    #[case("realmemory")]
    #[case("Sockets")]
    #[case("Weight")]
    fn test_rank_by_rejects(#[case] criteria: &str) {
        let arena: NodeArena = vec![node("n1", &[("RealMemory", 1.into())])]
            .into_iter()
            .collect();

        let err = rank_by(criteria, &arena).unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidWeightMetric { ref value, .. } if value == criteria));
        assert!(err.to_string().contains(criteria));
        assert!(!arena.get("n1").unwrap().inventory.contains_key(WEIGHT_KEY));
    }

    proptest! {
        #[test]
        fn prop_ranks_are_dense_and_ordered(values in proptest::collection::vec(proptest::option::of(0i64..64), 1..20)) {
            let arena: NodeArena = values
                .iter()
                .enumerate()
                .map(|(i, v)| match v {
                    Some(v) => node(&format!("n{i}"), &[("RealMemory", (*v).into())]),
                    None => node(&format!("n{i}"), &[]),
                })
                .collect();

            let projection = rank(WeightMetric::RealMemory, &arena);

            let mut distinct: Vec<i64> = values.iter().flatten().copied().collect();
            distinct.sort_unstable();
            distinct.dedup();

            // Ranks are exactly 1..=k in ascending value order.
            let ranks: Vec<u32> = distinct.iter().map(|v| projection.table().rank_of(*v).unwrap()).collect();
            let expected: Vec<u32> = (1..=distinct.len() as u32).collect();
            prop_assert_eq!(ranks, expected);

            for (i, v) in values.iter().enumerate() {
                let weight = projection.weight_of(&format!("n{i}")).unwrap();
                match v {
                    Some(v) => prop_assert_eq!(weight, projection.table().rank_of(*v).unwrap()),
                    None => prop_assert_eq!(weight, MISSING_ATTRIBUTE_WEIGHT),
                }
            }
        }
    }
}
