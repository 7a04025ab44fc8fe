//! # slurmha-events
//!
//! Trigger event definitions for the controller reconciliation engine.
//!
//! ## Design Principles
//!
//! - A trigger only says *that* something changed, never *what* changed;
//!   the engine always re-reads its inputs
//! - Trigger kinds form a closed set with a canonical kebab-case name
//! - Triggers delivered more than once must be harmless
//!
//! ## Trigger Kinds
//!
//! Triggers are grouped by where they originate:
//! - Membership relation (`membership-changed`, `membership-departed`)
//! - HA peer relation (`peer-changed`, `peer-departed`)
//! - Local operator configuration (`local-config-changed`)
//! - Accounting database relation (`db-location-changed`)
//! - Leadership (`leader-elected`, `leader-settings-changed`)
//! - Operator action (`reconfigure-requested`)

mod envelope;
mod error;
mod types;

pub use envelope::*;
pub use error::EventError;
pub use types::*;
