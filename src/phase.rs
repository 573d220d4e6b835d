use std::fmt;

use serde::Serialize;

use crate::error::CompositionError;
use crate::graph::{Phase, ResourceId};

/// Whether the operator has confirmed that the Grafana and OnCall logical
/// databases exist. Read once per composition pass; there is no transition
/// back from `Active` within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseGate {
    #[default]
    Pending,
    Active,
}

impl From<bool> for PhaseGate {
    fn from(databases_created: bool) -> Self {
        if databases_created {
            Self::Active
        } else {
            Self::Pending
        }
    }
}

impl PhaseGate {
    pub fn allows(self, phase: Phase) -> bool {
        match phase {
            Phase::Foundation => true,
            Phase::Activation => self == Self::Active,
        }
    }

    /// Fails with `PhaseGateClosed` when `resource` lives in a phase the gate
    /// does not allow.
    pub fn check(self, phase: Phase, resource: &ResourceId) -> Result<(), CompositionError> {
        if self.allows(phase) {
            Ok(())
        } else {
            Err(CompositionError::PhaseGateClosed {
                resource: resource.to_string(),
            })
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
        }
    }
}

impl fmt::Display for PhaseGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
