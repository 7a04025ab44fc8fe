//! Controller role and configuration reconciliation.
//!
//! This library decides, for one controller unit, what configuration the
//! scheduler control plane should run with and what the worker nodes should
//! be told. Key concepts:
//!
//! - **Node inventory**: facts each worker advertises about itself.
//! - **Role**: active or backup controller, derived from the election result.
//! - **Composed config**: one flat document merging operator config, node and
//!   partition data, peer addressing and the accounting database location.
//! - **Propagation**: the active controller asserts its config downstream; a
//!   backup retracts whatever it may have asserted before.
//!
//! # Invariants
//!
//! - A pass is a pure function of its inputs; running it twice on the same
//!   inputs produces the same outcome
//! - A backup controller without data from the active controller never
//!   activates locally
//! - A backup controller never sends live configuration downstream
//! - An invalid weight setting aborts the pass before anything is written

mod compose;
mod digest;
mod engine;
mod error;
mod gate;
mod node;
mod partition;
mod role;
mod weight;

pub use compose::{
    compose, keys, ChangeStamp, ComposeInputs, ControllerConfig, DbdLocation, RelationData,
    StaticConfig,
};
pub use digest::ConfigDigest;
pub use engine::{
    is_configurable, transition, Activation, ControllerState, LeaderView, PassInputs,
    PassOutcome, ReconciliationEngine, Transition, UnitStatus, WEIGHT_CRITERIA_KEY,
};
pub use error::ReconcileError;
pub use gate::{decide, Outbound, Retraction};
pub use node::{NodeArena, NodeRecord};
pub use partition::{aggregate, Partition, PartitionMap};
pub use role::{prefix_keys, resolve, Role, RoleResolver};
pub use weight::{
    rank, rank_by, WeightCriteria, WeightMetric, WeightProjection, WeightTable,
    MISSING_ATTRIBUTE_WEIGHT, WEIGHT_KEY,
};
