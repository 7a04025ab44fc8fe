//! slurmha controller agent library
//!
//! The controller agent runs on each slurm controller host of a two-unit
//! HA pair. Every trigger from the host's orchestration layer runs one
//! reconciliation pass: it decides this unit's role, renders the controller
//! config locally when the unit may serve, and tells the worker nodes what
//! to use.
//!
//! ## Modules
//!
//! - `agent`: The pass driver
//! - `activation`: Local rendering and daemon control
//! - `relations`: Worker, peer and accounting-database relation data
//! - `leader`: Cluster-wide leader settings
//! - `state`: Local SQLite state persistence

pub mod activation;
pub mod agent;
pub mod config;
pub mod leader;
pub mod relations;
pub mod secret;
pub mod state;

mod fsutil;

pub use agent::{ControllerAgent, PassReport};
