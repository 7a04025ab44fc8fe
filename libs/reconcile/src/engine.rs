//! The reconciliation state machine.
//!
//! A pass takes every input explicitly and returns every effect explicitly;
//! the caller owns persistence and talks to the collaborators. This keeps
//! a pass deterministic: equal inputs give equal outcomes.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use slurmha_events::EventKind;
use slurmha_names::UnitName;
use tracing::{debug, info, warn};

use crate::compose::{compose, ChangeStamp, ComposeInputs, ControllerConfig, DbdLocation};
use crate::compose::{RelationData, StaticConfig};
use crate::digest::ConfigDigest;
use crate::gate::{decide, Outbound};
use crate::node::NodeArena;
use crate::partition::aggregate;
use crate::role::{Role, RoleResolver};
use crate::weight::rank_by;

/// Static config key holding the weight ranking criteria.
pub const WEIGHT_CRITERIA_KEY: &str = "node_weight_criteria";

/// Controller lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    #[default]
    Unconfigured,
    Configuring,
    Configured,
    /// Invalid operator configuration; only an operator fix leaves this state.
    Blocked,
}

impl ControllerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::Configuring => "configuring",
            Self::Configured => "configured",
            Self::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unconfigured" => Some(Self::Unconfigured),
            "configuring" => Some(Self::Configuring),
            "configured" => Some(Self::Configured),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a trigger does in a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Run a full pass.
    Reconcile,
    /// Keep the trigger pending; the current state cannot be changed by it.
    Defer,
}

/// Map `(state, trigger)` to a transition.
pub fn transition(state: ControllerState, event: EventKind) -> Transition {
    match state {
        ControllerState::Blocked if !event.is_operator_fix() => Transition::Defer,
        _ => Transition::Reconcile,
    }
}

/// Status reported by the unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnitStatus {
    WaitingForMembership,
    WaitingForPeer,
    Blocked { reason: String },
    Configuring,
    Ready,
}

impl UnitStatus {
    /// Coarse workload state as shown to operators.
    pub fn workload_state(&self) -> &'static str {
        match self {
            UnitStatus::WaitingForMembership | UnitStatus::WaitingForPeer => "waiting",
            UnitStatus::Blocked { .. } => "blocked",
            UnitStatus::Configuring => "maintenance",
            UnitStatus::Ready => "active",
        }
    }

    pub fn message(&self) -> String {
        match self {
            UnitStatus::WaitingForMembership => "Missing relation to worker nodes".to_string(),
            UnitStatus::WaitingForPeer => {
                "Waiting for peer data from the active controller".to_string()
            }
            UnitStatus::Blocked { reason } => reason.clone(),
            UnitStatus::Configuring => "Configuring controller".to_string(),
            UnitStatus::Ready => "Ready".to_string(),
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.workload_state(), self.message())
    }
}

/// What the local activation collaborator should do.
#[derive(Debug, Clone, PartialEq)]
pub enum Activation {
    /// Render this config and make sure the daemon runs it.
    Apply(ControllerConfig),
    /// Do not touch local rendering; this unit may not serve.
    Withhold,
    /// Stop the daemon; there is nothing to serve.
    Stop,
    /// Leave everything as it is.
    Unchanged,
}

/// Values published through leader settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaderView {
    /// The elected active controller.
    pub active_controller: Option<UnitName>,
    /// Shared authentication secret.
    pub secret: Option<String>,
    /// Accounting database location.
    pub dbd: Option<DbdLocation>,
}

/// Everything a pass reads.
#[derive(Debug, Clone)]
pub struct PassInputs {
    pub local_unit: UnitName,
    /// State left by the previous pass.
    pub state: ControllerState,
    /// Triggers received but not yet consumed, including the current one.
    pub pending: BTreeSet<EventKind>,
    pub leader: LeaderView,
    pub static_config: StaticConfig,
    /// Whether any worker is related at all.
    pub membership_joined: bool,
    pub nodes: NodeArena,
    /// This unit's own addressing, unprefixed.
    pub network_details: RelationData,
    /// The HA peer's addressing, unprefixed; `None` without a peer relation.
    pub peer_data: Option<RelationData>,
    /// Last issued config-updated stamp.
    pub previous_stamp: Option<i64>,
    pub now: DateTime<Utc>,
}

/// Everything a pass decided.
#[derive(Debug, Clone, PartialEq)]
pub struct PassOutcome {
    pub transition: Transition,
    pub state: ControllerState,
    /// `None` leaves the reported status as it is.
    pub status: Option<UnitStatus>,
    pub role: Option<Role>,
    pub activation: Activation,
    /// `None` sends nothing downstream.
    pub downstream: Option<Outbound>,
    /// Whether the pending triggers were consumed.
    pub clear_pending: bool,
    pub change_stamp: Option<i64>,
    pub digest: Option<ConfigDigest>,
}

impl PassOutcome {
    fn untouched(state: ControllerState, transition: Transition) -> Self {
        Self {
            transition,
            state,
            status: None,
            role: None,
            activation: Activation::Unchanged,
            downstream: None,
            clear_pending: false,
            change_stamp: None,
            digest: None,
        }
    }

    /// Record the result of local activation.
    ///
    /// Success settles a configuring unit as configured. Failure is reported
    /// and leaves the unit unconfigured so the next trigger retries.
    pub fn activation_finished(&mut self, result: Result<(), String>) {
        if self.state != ControllerState::Configuring {
            return;
        }
        match result {
            Ok(()) => {
                self.state = ControllerState::Configured;
                self.status = Some(UnitStatus::Ready);
            }
            Err(reason) => {
                self.state = ControllerState::Unconfigured;
                self.status = Some(UnitStatus::Blocked {
                    reason: format!("Local activation failed: {reason}"),
                });
            }
        }
    }
}

/// True iff this unit may activate locally: it is the active controller, or
/// it is the backup and has heard from the active controller.
pub fn is_configurable(role: Role, peer_data: Option<&RelationData>) -> bool {
    match role {
        Role::ActiveController => true,
        Role::BackupController => peer_data.is_some_and(|data| !data.is_empty()),
    }
}

/// Runs reconciliation passes.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationEngine {
    _private: (),
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one pass for `event`.
    pub fn run(&self, event: EventKind, inputs: &PassInputs) -> PassOutcome {
        if transition(inputs.state, event) == Transition::Defer {
            debug!(
                event = %event,
                state = %inputs.state,
                "Deferring trigger until the operator fixes the configuration"
            );
            return PassOutcome::untouched(inputs.state, Transition::Defer);
        }

        if !inputs.membership_joined {
            info!("No worker nodes related; stopping the controller");
            return PassOutcome {
                state: ControllerState::Unconfigured,
                status: Some(UnitStatus::WaitingForMembership),
                activation: Activation::Stop,
                clear_pending: true,
                ..PassOutcome::untouched(inputs.state, Transition::Reconcile)
            };
        }

        // 1. Election must have happened and the secret must be published.
        let roles = RoleResolver::from_leader(
            inputs.leader.active_controller.as_ref(),
            &inputs.local_unit,
        );
        let (Some((role, peer_role)), Some(secret)) = (roles, inputs.leader.secret.as_deref())
        else {
            debug!(
                elected = roles.is_some(),
                "Controller election not settled; nothing to reconcile yet"
            );
            return PassOutcome::untouched(inputs.state, Transition::Reconcile);
        };

        // 2. Weights.
        let criteria = criteria_setting(&inputs.static_config);
        let nodes = match rank_by(&criteria, &inputs.nodes) {
            Ok(Some(projection)) => projection.project(&inputs.nodes),
            Ok(None) => inputs.nodes.as_slice().to_vec(),
            Err(err) => {
                warn!(error = %err, "Invalid weight configuration; pass aborted");
                return PassOutcome {
                    state: ControllerState::Blocked,
                    status: Some(UnitStatus::Blocked {
                        reason: err.to_string(),
                    }),
                    role: Some(role),
                    ..PassOutcome::untouched(inputs.state, Transition::Reconcile)
                };
            }
        };

        // 3. Partitions; none means workers have not published yet.
        let partitions = aggregate(&nodes);
        if partitions.is_empty() {
            debug!("No partition data published yet");
            return PassOutcome {
                role: Some(role),
                clear_pending: true,
                ..PassOutcome::untouched(inputs.state, Transition::Reconcile)
            };
        }

        // 5. Compose.
        let fresh =
            event.stamps_config() || inputs.pending.iter().any(EventKind::stamps_config);
        let stamp = ChangeStamp::next(inputs.previous_stamp, inputs.now.timestamp(), fresh);
        let config = match compose(&ComposeInputs {
            static_config: &inputs.static_config,
            nodes: &nodes,
            partitions: &partitions,
            role,
            peer_role,
            network_details: &inputs.network_details,
            peer_data: inputs.peer_data.as_ref(),
            dbd: inputs.leader.dbd.as_ref(),
            secret,
            stamp,
        }) {
            Ok(config) => config,
            Err(err) => {
                warn!(error = %err, "Failed to compose controller config");
                return PassOutcome {
                    role: Some(role),
                    status: Some(UnitStatus::Blocked {
                        reason: err.to_string(),
                    }),
                    ..PassOutcome::untouched(inputs.state, Transition::Reconcile)
                };
            }
        };
        let digest = ConfigDigest::of(&config);

        // 6-7. Local activation gate.
        let configurable = is_configurable(role, inputs.peer_data.as_ref());
        let (state, status, activation) = if configurable {
            (
                ControllerState::Configuring,
                UnitStatus::Configuring,
                Activation::Apply(config.clone()),
            )
        } else {
            (
                ControllerState::Unconfigured,
                UnitStatus::WaitingForPeer,
                Activation::Withhold,
            )
        };

        info!(
            event = %event,
            role = %role,
            configurable,
            nodes = nodes.len(),
            partitions = partitions.len(),
            digest = %digest,
            "Reconciliation pass complete"
        );

        // 8. Downstream, regardless of local configurability.
        let downstream = decide(role, config);

        PassOutcome {
            transition: Transition::Reconcile,
            state,
            status: Some(status),
            role: Some(role),
            activation,
            downstream: Some(downstream),
            // 9.
            clear_pending: true,
            change_stamp: stamp.value(),
            digest: Some(digest),
        }
    }
}

fn criteria_setting(static_config: &StaticConfig) -> String {
    match static_config.get(WEIGHT_CRITERIA_KEY) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
