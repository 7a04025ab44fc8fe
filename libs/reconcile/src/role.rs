//! Controller role resolution.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use slurmha_names::UnitName;

/// Role of a controller unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    ActiveController,
    BackupController,
}

impl Role {
    /// Key prefix used for this role's entries in a composed config.
    pub fn as_prefix(&self) -> &'static str {
        match self {
            Role::ActiveController => "active_controller",
            Role::BackupController => "backup_controller",
        }
    }

    /// The role the other controller holds.
    pub fn peer(&self) -> Role {
        match self {
            Role::ActiveController => Role::BackupController,
            Role::BackupController => Role::ActiveController,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Role::ActiveController)
    }

    /// `<role>_<key>`.
    pub fn prefixed(&self, key: &str) -> String {
        format!("{}_{}", self.as_prefix(), key)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_prefix())
    }
}

/// `(role, peer_role)` for a unit that is or is not the active controller.
pub fn resolve(is_active: bool) -> (Role, Role) {
    if is_active {
        (Role::ActiveController, Role::BackupController)
    } else {
        (Role::BackupController, Role::ActiveController)
    }
}

/// Copy a mapping with every key prefixed by a role.
pub fn prefix_keys<V: Clone>(data: &BTreeMap<String, V>, role: Role) -> BTreeMap<String, V> {
    data.iter()
        .map(|(key, value)| (role.prefixed(key), value.clone()))
        .collect()
}

/// Derives roles from the elected-active-unit record.
pub struct RoleResolver;

impl RoleResolver {
    /// Resolve roles for `local`.
    ///
    /// Returns `None` while no active controller has been elected; there is
    /// nothing to reconcile until then.
    pub fn from_leader(active_unit: Option<&UnitName>, local: &UnitName) -> Option<(Role, Role)> {
        active_unit.map(|active| resolve(active == local))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(s: &str) -> UnitName {
        UnitName::parse(s).unwrap()
    }

    #[test]
    fn test_resolve() {
        assert_eq!(resolve(true), (Role::ActiveController, Role::BackupController));
        assert_eq!(resolve(false), (Role::BackupController, Role::ActiveController));
    }

    #[test]
    fn test_peer_is_complement() {
        for role in [Role::ActiveController, Role::BackupController] {
            assert_ne!(role, role.peer());
            assert_eq!(role, role.peer().peer());
        }
    }

    #[test]
    fn test_from_leader() {
        let local = unit("slurm-controller/0");
        let other = unit("slurm-controller/1");

        assert_eq!(RoleResolver::from_leader(None, &local), None);
        assert_eq!(
            RoleResolver::from_leader(Some(&local), &local),
            Some((Role::ActiveController, Role::BackupController))
        );
        assert_eq!(
            RoleResolver::from_leader(Some(&other), &local),
            Some((Role::BackupController, Role::ActiveController))
        );
    }

    #[test]
    fn test_prefix_keys() {
        let mut data = BTreeMap::new();
        data.insert("hostname".to_string(), "ctl-0");
        data.insert("ingress_address".to_string(), "10.0.0.5");

        let prefixed = prefix_keys(&data, Role::BackupController);
        assert_eq!(prefixed["backup_controller_hostname"], "ctl-0");
        assert_eq!(prefixed["backup_controller_ingress_address"], "10.0.0.5");
        assert_eq!(prefixed.len(), 2);
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&Role::ActiveController).unwrap();
        assert_eq!(json, "\"active_controller\"");
    }
}
