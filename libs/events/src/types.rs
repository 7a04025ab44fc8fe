//! Trigger kind definitions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::EventError;

// =============================================================================
// Event Kind Constants
// =============================================================================

/// All trigger kind names as constants.
pub mod event_kinds {
    // Membership relation (worker nodes)
    pub const MEMBERSHIP_CHANGED: &str = "membership-changed";
    pub const MEMBERSHIP_DEPARTED: &str = "membership-departed";

    // HA peer relation
    pub const PEER_CHANGED: &str = "peer-changed";
    pub const PEER_DEPARTED: &str = "peer-departed";

    // Local configuration
    pub const LOCAL_CONFIG_CHANGED: &str = "local-config-changed";

    // Accounting database relation
    pub const DB_LOCATION_CHANGED: &str = "db-location-changed";

    // Leadership
    pub const LEADER_ELECTED: &str = "leader-elected";
    pub const LEADER_SETTINGS_CHANGED: &str = "leader-settings-changed";

    // Operator
    pub const RECONFIGURE_REQUESTED: &str = "reconfigure-requested";
}

/// Where a trigger originates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Membership,
    Peer,
    LocalConfig,
    Database,
    Leadership,
    Operator,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Membership => "membership",
            EventSource::Peer => "peer",
            EventSource::LocalConfig => "local_config",
            EventSource::Database => "database",
            EventSource::Leadership => "leadership",
            EventSource::Operator => "operator",
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change event that may require a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    MembershipChanged,
    MembershipDeparted,
    PeerChanged,
    PeerDeparted,
    LocalConfigChanged,
    DbLocationChanged,
    LeaderElected,
    LeaderSettingsChanged,
    ReconfigureRequested,
}

impl EventKind {
    /// Every trigger kind, in declaration order.
    pub const ALL: [EventKind; 9] = [
        EventKind::MembershipChanged,
        EventKind::MembershipDeparted,
        EventKind::PeerChanged,
        EventKind::PeerDeparted,
        EventKind::LocalConfigChanged,
        EventKind::DbLocationChanged,
        EventKind::LeaderElected,
        EventKind::LeaderSettingsChanged,
        EventKind::ReconfigureRequested,
    ];

    /// Canonical name of the trigger kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::MembershipChanged => event_kinds::MEMBERSHIP_CHANGED,
            EventKind::MembershipDeparted => event_kinds::MEMBERSHIP_DEPARTED,
            EventKind::PeerChanged => event_kinds::PEER_CHANGED,
            EventKind::PeerDeparted => event_kinds::PEER_DEPARTED,
            EventKind::LocalConfigChanged => event_kinds::LOCAL_CONFIG_CHANGED,
            EventKind::DbLocationChanged => event_kinds::DB_LOCATION_CHANGED,
            EventKind::LeaderElected => event_kinds::LEADER_ELECTED,
            EventKind::LeaderSettingsChanged => event_kinds::LEADER_SETTINGS_CHANGED,
            EventKind::ReconfigureRequested => event_kinds::RECONFIGURE_REQUESTED,
        }
    }

    /// The collaborator this trigger comes from.
    pub fn source(&self) -> EventSource {
        match self {
            EventKind::MembershipChanged | EventKind::MembershipDeparted => {
                EventSource::Membership
            }
            EventKind::PeerChanged | EventKind::PeerDeparted => EventSource::Peer,
            EventKind::LocalConfigChanged => EventSource::LocalConfig,
            EventKind::DbLocationChanged => EventSource::Database,
            EventKind::LeaderElected | EventKind::LeaderSettingsChanged => {
                EventSource::Leadership
            }
            EventKind::ReconfigureRequested => EventSource::Operator,
        }
    }

    /// Returns true if this trigger warrants a fresh config-updated stamp,
    /// so workers reload even when nodes and partitions are unchanged.
    pub fn stamps_config(&self) -> bool {
        matches!(
            self,
            EventKind::LocalConfigChanged | EventKind::DbLocationChanged
        )
    }

    /// Returns true if this trigger can carry the operator's fix for a
    /// blocked controller.
    pub fn is_operator_fix(&self) -> bool {
        matches!(
            self,
            EventKind::LocalConfigChanged | EventKind::ReconfigureRequested
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| EventError::UnknownEventKind(s.to_string()))
    }
}
