//! Local state persistence for the controller agent.
//!
//! This module provides SQLite-based storage for:
//! - Controller state (lifecycle state, last reported status)
//! - Pending triggers not yet consumed by a pass
//! - The last issued config-updated stamp and rendered config digest
//!
//! Everything else is recomputed on every pass.

mod store;

pub use store::{ControllerRecord, StateStore, StateStoreError};
