use thiserror::Error;

/// Reconciliation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// The operator-supplied weight criteria is outside the allowed set.
    #[error("invalid node_weight_criteria value '{value}' (expected one of: none, {allowed})")]
    InvalidWeightMetric { value: String, allowed: String },

    /// A composed document could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ReconcileError {
    fn from(err: serde_json::Error) -> Self {
        ReconcileError::Serialization(err.to_string())
    }
}
