//! Controller configuration composition.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ReconcileError;
use crate::node::NodeRecord;
use crate::partition::PartitionMap;
use crate::role::{prefix_keys, Role};

/// Well-known keys of a composed config and of leader settings.
pub mod keys {
    pub const NODES: &str = "nodes";
    pub const PARTITIONS: &str = "partitions";
    pub const MUNGE_KEY: &str = "munge_key";
    pub const CONFIG_UPDATED: &str = "config_updated";

    pub const DBD_HOST: &str = "dbd_host";
    pub const DBD_PORT: &str = "dbd_port";
    pub const DBD_IPADDR: &str = "dbd_ipaddr";

    pub const ACTIVE_CONTROLLER: &str = "active_controller";
}

/// Flat key/value data as exchanged over relations.
pub type RelationData = BTreeMap<String, Value>;

/// Operator-supplied static configuration.
pub type StaticConfig = BTreeMap<String, Value>;

/// The configuration rendered locally and propagated to workers.
///
/// Keys are kept sorted so equal documents serialize to equal bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ControllerConfig(BTreeMap<String, Value>);

impl ControllerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> BTreeMap<String, Value> {
        self.0
    }

    /// Compact JSON bytes.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, ReconcileError> {
        Ok(serde_json::to_vec(&self.0)?)
    }

    fn extend(&mut self, entries: impl IntoIterator<Item = (String, Value)>) {
        self.0.extend(entries);
    }
}

impl From<BTreeMap<String, Value>> for ControllerConfig {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

/// Location of the accounting database, as published by the leader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbdLocation {
    pub host: String,
    pub port: u16,
    pub ipaddr: String,
}

impl DbdLocation {
    /// Read a location from string settings; all three keys must be present.
    pub fn from_settings<F>(get: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = get(keys::DBD_HOST).filter(|s| !s.is_empty())?;
        let port = get(keys::DBD_PORT)?.trim().parse().ok()?;
        let ipaddr = get(keys::DBD_IPADDR).filter(|s| !s.is_empty())?;
        Some(Self { host, port, ipaddr })
    }

    /// The three settings this location is stored under.
    pub fn to_settings(&self) -> [(&'static str, String); 3] {
        [
            (keys::DBD_HOST, self.host.clone()),
            (keys::DBD_PORT, self.port.to_string()),
            (keys::DBD_IPADDR, self.ipaddr.clone()),
        ]
    }

    fn entries(&self) -> [(String, Value); 3] {
        [
            (keys::DBD_HOST.to_string(), Value::from(self.host.clone())),
            (keys::DBD_PORT.to_string(), Value::from(self.port)),
            (keys::DBD_IPADDR.to_string(), Value::from(self.ipaddr.clone())),
        ]
    }
}

/// Whether and how the config-updated timestamp is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStamp {
    /// No stamp has ever been issued.
    None,
    /// Re-emit the previous stamp unchanged.
    Carry(i64),
    /// Issue a new stamp.
    Fresh(i64),
}

impl ChangeStamp {
    /// Decide the stamp for a pass.
    ///
    /// A fresh stamp is strictly greater than `previous`, even if the clock
    /// went backwards.
    pub fn next(previous: Option<i64>, now: i64, fresh: bool) -> Self {
        match (fresh, previous) {
            (true, Some(previous)) => ChangeStamp::Fresh(now.max(previous + 1)),
            (true, None) => ChangeStamp::Fresh(now),
            (false, Some(previous)) => ChangeStamp::Carry(previous),
            (false, None) => ChangeStamp::None,
        }
    }

    pub fn value(&self) -> Option<i64> {
        match self {
            ChangeStamp::None => None,
            ChangeStamp::Carry(ts) | ChangeStamp::Fresh(ts) => Some(*ts),
        }
    }
}

/// Everything the composer merges.
#[derive(Debug, Clone, Copy)]
pub struct ComposeInputs<'a> {
    pub static_config: &'a StaticConfig,
    pub nodes: &'a [NodeRecord],
    pub partitions: &'a PartitionMap,
    pub role: Role,
    pub peer_role: Role,
    pub network_details: &'a RelationData,
    pub peer_data: Option<&'a RelationData>,
    pub dbd: Option<&'a DbdLocation>,
    pub secret: &'a str,
    pub stamp: ChangeStamp,
}

/// Build the controller config.
///
/// Later layers win on key collisions: static config, then node data and the
/// secret, then this unit's addressing, then the peer's, then the database
/// location and stamp.
pub fn compose(inputs: &ComposeInputs<'_>) -> Result<ControllerConfig, ReconcileError> {
    let mut config = ControllerConfig::from(inputs.static_config.clone());

    config.insert(keys::NODES, serde_json::to_value(inputs.nodes)?);
    config.insert(keys::PARTITIONS, serde_json::to_value(inputs.partitions)?);
    config.insert(keys::MUNGE_KEY, Value::from(inputs.secret));

    config.extend(prefix_keys(inputs.network_details, inputs.role));

    if let Some(peer_data) = inputs.peer_data {
        config.extend(prefix_keys(peer_data, inputs.peer_role));
    }

    if let Some(dbd) = inputs.dbd {
        config.extend(dbd.entries());
    }

    if let Some(ts) = inputs.stamp.value() {
        config.insert(keys::CONFIG_UPDATED, Value::from(ts));
    }

    Ok(config)
}
