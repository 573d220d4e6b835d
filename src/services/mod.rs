//! The four concrete service units and their typed settings.

pub mod grafana;
pub mod ingester;
pub mod oncall;
pub mod pdc_agent;

use crate::graph::{Phase, ResourceId};
use crate::infra::cluster::ComputeCluster;
use crate::infra::network::{Network, SubnetTier};
use crate::secrets::{Credential, CredentialField, SecretBinding};
use crate::unit::{ContainerSpec, DeploymentPolicy, ServiceUnitSpec, TargetGroupSpec, TaskSizing};

/// One recognized environment variable of a service, with its value.
pub trait EnvSetting {
    fn key(&self) -> &'static str;
    fn value(&self) -> String;
}

/// Render typed settings into container environment pairs, in the given
/// order. Duplicates are left for the unit builder to reject.
pub fn environment<S: EnvSetting>(settings: &[S]) -> Vec<(String, String)> {
    settings
        .iter()
        .map(|s| (s.key().to_owned(), s.value()))
        .collect()
}

/// Names under which a container receives the fields of a database
/// credential.
#[derive(Debug, Clone, Copy)]
pub struct DatabaseSecretKeys {
    pub host: &'static str,
    pub dbname: &'static str,
    pub username: &'static str,
    pub password: &'static str,
}

impl DatabaseSecretKeys {
    pub fn bindings(&self, credential: &Credential) -> Vec<(String, SecretBinding)> {
        [
            (self.host, CredentialField::Host),
            (self.dbname, CredentialField::DbName),
            (self.username, CredentialField::Username),
            (self.password, CredentialField::Password),
        ]
        .into_iter()
        .map(|(key, field)| (key.to_owned(), credential.binding(field)))
        .collect()
    }
}

/// Where units are placed.
#[derive(Debug, Clone, Copy)]
pub struct Placement<'a> {
    pub network: &'a Network,
    pub cluster: &'a ComputeCluster,
}

impl Placement<'_> {
    /// Spec shared by every unit: private subnets with egress and the
    /// default rolling-update policy.
    pub fn unit_spec(
        &self,
        id: ResourceId,
        phase: Phase,
        sizing: TaskSizing,
        containers: Vec<ContainerSpec>,
        target_group: Option<TargetGroupSpec>,
    ) -> ServiceUnitSpec {
        let name = id
            .as_str()
            .rsplit('/')
            .next()
            .unwrap_or(id.as_str())
            .to_owned();
        ServiceUnitSpec {
            id,
            name,
            phase,
            placement: self.cluster.id().clone(),
            network: self.network.id().clone(),
            subnets: SubnetTier::PrivateWithEgress,
            sizing,
            containers,
            deployment: DeploymentPolicy::default(),
            target_group,
        }
    }
}
