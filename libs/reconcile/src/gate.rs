//! Propagation gate: what a controller tells the worker nodes.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::debug;

use crate::compose::{ControllerConfig, RelationData};
use crate::role::Role;

/// A document that nulls every key a controller config would carry.
///
/// Workers treat a retraction from a controller as authoritative and forget
/// whatever that controller sent before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retraction {
    keys: BTreeSet<String>,
}

impl Retraction {
    /// Retract every key of `config`.
    pub fn of(config: &ControllerConfig) -> Self {
        Self {
            keys: config.keys().map(str::to_string).collect(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Every key mapped to `null`.
    pub fn to_relation_data(&self) -> RelationData {
        self.keys
            .iter()
            .map(|key| (key.clone(), Value::Null))
            .collect()
    }
}

/// What goes downstream after a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Config(ControllerConfig),
    Retraction(Retraction),
}

impl Outbound {
    pub fn is_retraction(&self) -> bool {
        matches!(self, Outbound::Retraction(_))
    }

    /// Flat relation data to publish.
    pub fn to_relation_data(&self) -> RelationData {
        match self {
            Outbound::Config(config) => config.as_map().clone(),
            Outbound::Retraction(retraction) => retraction.to_relation_data(),
        }
    }
}

/// Decide what a controller in `role` sends downstream.
///
/// The active controller always asserts its config. A backup always retracts,
/// which also covers a former active controller that was demoted.
pub fn decide(role: Role, composed: ControllerConfig) -> Outbound {
    let outbound = match role {
        Role::ActiveController => Outbound::Config(composed),
        Role::BackupController => Outbound::Retraction(Retraction::of(&composed)),
    };
    debug!(
        role = %role,
        retraction = outbound.is_retraction(),
        "Decided downstream propagation"
    );
    outbound
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> ControllerConfig {
        let mut config = ControllerConfig::new();
        config.insert("cluster_name", json!("hpc"));
        config.insert("munge_key", json!("s3cret"));
        config.insert("active_controller_hostname", json!("ctl-0"));
        config
    }

    #[test]
    fn test_active_sends_config() {
        let outbound = decide(Role::ActiveController, config());
        assert!(!outbound.is_retraction());
        assert_eq!(outbound.to_relation_data()["munge_key"], json!("s3cret"));
    }

    #[test]
    fn test_backup_sends_retraction() {
        let outbound = decide(Role::BackupController, config());
        assert!(outbound.is_retraction());

        let data = outbound.to_relation_data();
        assert_eq!(data.len(), 3);
        assert!(data.values().all(Value::is_null));
        assert!(data.contains_key("active_controller_hostname"));
    }

    #[test]
    fn test_retraction_never_leaks_values() {
        let retraction = Retraction::of(&config());
        let keys: Vec<_> = retraction.keys().collect();
        assert_eq!(keys, vec!["active_controller_hostname", "cluster_name", "munge_key"]);
    }
}
