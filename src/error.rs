/// Every way a composition pass can fail.
///
/// Structural errors are ordering bugs in the composition itself; declaration
/// errors point at the unit or container that declared something invalid.
/// Both abort the whole pass: no graph is emitted on error.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CompositionError {
    #[error("cyclic startup dependency in unit '{unit}' between containers: {}", containers.join(", "))]
    CyclicDependency {
        unit: String,
        containers: Vec<String>,
    },

    #[error("unresolved handle: '{resource}' has not been constructed")]
    UnresolvedHandle { resource: String },

    #[error("phase gate is pending: '{resource}' belongs to the activation phase")]
    PhaseGateClosed { resource: String },

    #[error("resource '{id}' is already defined")]
    DuplicateResource { id: String },

    #[error("unit '{unit}', container '{container}': duplicate environment key '{key}'")]
    DuplicateEnvironmentKey {
        unit: String,
        container: String,
        key: String,
    },

    #[error(
        "unit '{unit}', container '{container}': secret '{secret}' has no field '{field}'"
    )]
    MissingSecretField {
        unit: String,
        container: String,
        secret: String,
        field: String,
    },

    #[error("unit '{unit}', container '{container}': depends on unknown container '{dependency}'")]
    UnknownContainer {
        unit: String,
        container: String,
        dependency: String,
    },

    #[error("unit '{unit}' declares no containers")]
    EmptyUnit { unit: String },

    #[error("unit '{unit}': {reason}")]
    InvalidSpec { unit: String, reason: String },

    #[error("invalid route: {0}")]
    InvalidRoute(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl CompositionError {
    /// Structural errors come from the construction order itself rather than
    /// from a single unit's declaration.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::CyclicDependency { .. }
                | Self::UnresolvedHandle { .. }
                | Self::PhaseGateClosed { .. }
                | Self::DuplicateResource { .. }
        )
    }
}
