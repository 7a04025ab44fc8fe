//! Trigger envelope - a trigger kind plus delivery metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use slurmha_names::UnitName;

use crate::{EventKind, EventSource};

/// A trigger as received by a controller unit.
///
/// Envelopes are recorded as pending markers until a pass consumes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEnvelope {
    /// The trigger kind.
    pub kind: EventKind,

    /// The unit that received the trigger.
    pub unit: UnitName,

    /// When the trigger was received.
    pub received_at: DateTime<Utc>,
}

impl TriggerEnvelope {
    /// Create an envelope stamped with the current time.
    pub fn new(kind: EventKind, unit: UnitName) -> Self {
        Self {
            kind,
            unit,
            received_at: Utc::now(),
        }
    }

    /// The collaborator the trigger originates from.
    pub fn source(&self) -> EventSource {
        self.kind.source()
    }
}
