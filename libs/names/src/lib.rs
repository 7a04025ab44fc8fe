//! # slurmha-names
//!
//! Validated name types shared by the controller reconciliation crates.
//!
//! ## Design Principles
//!
//! - Names are checked once at the boundary (relation data, leader settings)
//!   and carried as typed values afterwards
//! - Every name has a canonical string form with strict parsing
//! - Names roundtrip through serde as plain strings
//! - Host and partition names are distinct types so they cannot be swapped
//!
//! ## Formats
//!
//! - `UnitName`: `{application}/{number}`, e.g. `slurm-controller/0`
//! - `Hostname`: RFC 1123 labels joined by `.`, e.g. `node-1.cluster`
//! - `PartitionName`: scheduler partition label, e.g. `batch`, `gpu_long`

mod error;
mod macros;
mod types;

pub use error::NameError;
pub use types::*;
