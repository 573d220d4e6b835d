//! Secret-store and parameter-store references.
//!
//! The composition never holds a secret value. Creating a secret adds a
//! `Secret` resource whose value the provisioning backend generates;
//! containers receive [`ValueRef`]s that the orchestrator resolves at start.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::error::CompositionError;
use crate::graph::{Phase, Resource, ResourceGraph, ResourceId, ResourceSpec};

/// Fields of a database credential secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialField {
    Host,
    Port,
    #[serde(rename = "dbname")]
    DbName,
    Username,
    Password,
}

impl CredentialField {
    pub const ALL: [Self; 5] = [
        Self::Host,
        Self::Port,
        Self::DbName,
        Self::Username,
        Self::Password,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Port => "port",
            Self::DbName => "dbname",
            Self::Username => "username",
            Self::Password => "password",
        }
    }
}

impl fmt::Display for CredentialField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the backend generates the secret value.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateSpec {
    /// Fixed JSON fields stored alongside the generated one.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub template: BTreeMap<&'static str, String>,
    /// JSON field that receives the generated string; `None` makes the whole
    /// secret value the generated string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generate_key: Option<CredentialField>,
    pub length: u32,
    pub exclude_punctuation: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecretProps {
    pub description: String,
    pub generate: GenerateSpec,
    /// Resource whose connection details (host, port) are written into the
    /// secret once it exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attached_to: Option<ResourceId>,
}

/// Reference to a created secret, carrying the fields it declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRef {
    id: ResourceId,
    fields: Vec<CredentialField>,
}

impl SecretRef {
    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn fields(&self) -> &[CredentialField] {
        &self.fields
    }
}

/// Reference to one secret value (or the whole secret when `field` is
/// `None`) resolved by the orchestrator when the container starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValueRef {
    pub secret: ResourceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<CredentialField>,
}

/// A secret request. Credential secrets declare every [`CredentialField`];
/// generated secrets are a single opaque string.
#[derive(Debug, Clone)]
pub struct SecretRequest {
    pub id: ResourceId,
    pub phase: Phase,
    pub props: SecretProps,
}

impl SecretRequest {
    /// Opaque generated string (admin passwords, signing keys).
    pub fn generated(id: ResourceId, phase: Phase, description: impl Into<String>) -> Self {
        Self {
            id,
            phase,
            props: SecretProps {
                description: description.into(),
                generate: GenerateSpec {
                    template: BTreeMap::new(),
                    generate_key: None,
                    length: 32,
                    exclude_punctuation: true,
                },
                attached_to: None,
            },
        }
    }

    /// Master credential created before its cluster exists; the cluster
    /// references it and the backend fills in host and port.
    pub fn master_credential(id: ResourceId, database: &str, username: &str) -> Self {
        Self::credential_with(id, None, database, username)
    }

    /// Database credential for `username` on `database`, attached to
    /// `cluster` so host and port are filled in by the backend.
    pub fn credential(
        id: ResourceId,
        cluster: &ResourceId,
        database: &str,
        username: &str,
    ) -> Self {
        Self::credential_with(id, Some(cluster.clone()), database, username)
    }

    fn credential_with(
        id: ResourceId,
        attached_to: Option<ResourceId>,
        database: &str,
        username: &str,
    ) -> Self {
        let template = BTreeMap::from([
            (CredentialField::DbName.as_str(), database.to_owned()),
            (CredentialField::Username.as_str(), username.to_owned()),
        ]);
        Self {
            id,
            phase: Phase::Foundation,
            props: SecretProps {
                description: format!("credential for {username} on {database}"),
                generate: GenerateSpec {
                    template,
                    generate_key: Some(CredentialField::Password),
                    length: 30,
                    exclude_punctuation: true,
                },
                attached_to,
            },
        }
    }
}

/// `createSecret() -> secretRef`: add the secret to the graph.
pub fn create_secret(
    graph: &mut ResourceGraph,
    request: SecretRequest,
) -> Result<SecretRef, CompositionError> {
    let fields = if request.props.generate.generate_key.is_some() {
        CredentialField::ALL.to_vec()
    } else {
        Vec::new()
    };
    let attached: Vec<ResourceId> = request.props.attached_to.iter().cloned().collect();
    let resource = Resource::new(
        request.id.clone(),
        request.phase,
        ResourceSpec::Secret(request.props),
    )
    .depends_on(&attached);
    graph.add(resource, vec![])?;
    Ok(SecretRef {
        id: request.id,
        fields,
    })
}

/// `readSecretField(secretRef, fieldName) -> valueRef`. `None` reads the
/// whole value, which is only meaningful for generated secrets.
pub fn read_secret_field(
    secret: &SecretRef,
    field: Option<CredentialField>,
) -> Result<ValueRef, MissingField> {
    match field {
        Some(f) if !secret.fields.contains(&f) => Err(MissingField {
            secret: secret.id.to_string(),
            field: f.as_str(),
        }),
        None if !secret.fields.is_empty() => Err(MissingField {
            secret: secret.id.to_string(),
            field: "<whole value>",
        }),
        _ => Ok(ValueRef {
            secret: secret.id.clone(),
            field,
        }),
    }
}

/// A field read against a secret that does not declare it. The unit builder
/// turns this into [`CompositionError::MissingSecretField`] with unit and
/// container context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingField {
    pub secret: String,
    pub field: &'static str,
}

/// A secret binding declared on a container: which secret, which field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretBinding {
    pub secret: SecretRef,
    pub field: Option<CredentialField>,
}

impl SecretBinding {
    pub fn whole(secret: &SecretRef) -> Self {
        Self {
            secret: secret.clone(),
            field: None,
        }
    }

    pub fn field(secret: &SecretRef, field: CredentialField) -> Self {
        Self {
            secret: secret.clone(),
            field: Some(field),
        }
    }
}

/// A database credential: one logical database and user inside the
/// relational store. Only the secret reference is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub secret: SecretRef,
    pub database: String,
    pub username: String,
}

impl Credential {
    pub fn binding(&self, field: CredentialField) -> SecretBinding {
        SecretBinding::field(&self.secret, field)
    }
}

/// Operator-managed parameter (created out-of-band), pinned to a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterRef {
    pub name: String,
    pub version: u32,
}

impl fmt::Display for ParameterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{parameter:{}:{}}}", self.name, self.version)
    }
}
