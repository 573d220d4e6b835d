use std::collections::{BTreeMap, HashSet};

use super::ordering;
use super::{
    ContainerDefinition, ContainerSpec, PortMapping, ServiceUnitSpec, TargetGroupProps,
    TargetGroupSpec, UnitDefinition,
};
use crate::error::CompositionError;
use crate::graph::{Protocol, Resource, ResourceGraph, ResourceHandle, ResourceId, ResourceSpec};
use crate::secrets::{self, ValueRef};
use crate::validation;

/// Handles produced by [`build_unit`].
#[derive(Debug)]
pub struct BuiltUnit {
    pub service: ResourceHandle,
    pub target_group: Option<ResourceHandle>,
}

/// `buildUnit(spec) -> (handle, targetGroup?)`.
///
/// Validates the whole declaration before touching the graph, so a rejected
/// unit leaves no partial resources behind. Secrets are bound by reference;
/// every referenced secret, the placement cluster and the network must
/// already be in `graph`.
#[tracing::instrument(skip(graph, spec), fields(unit = %spec.name, phase = %spec.phase), err)]
pub fn build_unit(
    graph: &mut ResourceGraph,
    spec: ServiceUnitSpec,
) -> Result<BuiltUnit, CompositionError> {
    let unit = spec.name.as_str();
    let invalid = |reason: String| CompositionError::InvalidSpec {
        unit: unit.to_owned(),
        reason,
    };

    validation::check_name("unit name", unit).map_err(invalid)?;
    if spec.containers.is_empty() {
        return Err(CompositionError::EmptyUnit {
            unit: unit.to_owned(),
        });
    }
    let start_order = ordering::start_order(unit, &spec.containers)?;
    if !spec.containers.iter().any(|c| c.essential) {
        return Err(invalid("at least one container must be essential".into()));
    }
    spec.sizing.validate().map_err(invalid)?;
    spec.deployment.validate(unit)?;

    let mut containers = Vec::with_capacity(spec.containers.len());
    let mut secret_ids: Vec<ResourceId> = Vec::new();
    for c in &spec.containers {
        containers.push(resolve_container(unit, c, &mut secret_ids)?);
    }
    if let Some(tg) = &spec.target_group {
        check_target_group(unit, tg, &spec.containers)?;
    }

    let service_id = spec.id.child("Service");
    let definition = UnitDefinition {
        name: unit.to_owned(),
        cluster: spec.placement.clone(),
        subnets: spec.subnets,
        sizing: spec.sizing,
        deployment: spec.deployment,
        containers,
        start_order,
    };
    let service = graph.add(
        Resource::new(service_id, spec.phase, ResourceSpec::Service(definition))
            .depends_on([&spec.placement, &spec.network])
            .depends_on(&secret_ids),
        vec![],
    )?;

    let target_group = spec
        .target_group
        .map(|tg| {
            graph.add(
                Resource::new(
                    spec.id.child("TargetGroup"),
                    spec.phase,
                    ResourceSpec::TargetGroup(TargetGroupProps {
                        network: spec.network.clone(),
                        service: service.id().clone(),
                        container: tg.container,
                        port: tg.port,
                        protocol: Protocol::Http,
                        health_check: tg.health_check,
                    }),
                )
                .depends_on([&spec.network, service.id()]),
                vec![],
            )
        })
        .transpose()?;

    tracing::info!(
        service = %service.id(),
        containers = spec.containers.len(),
        routable = target_group.is_some(),
        "service unit defined"
    );
    Ok(BuiltUnit {
        service,
        target_group,
    })
}

fn resolve_container(
    unit: &str,
    c: &ContainerSpec,
    secret_ids: &mut Vec<ResourceId>,
) -> Result<ContainerDefinition, CompositionError> {
    let invalid = |reason: String| CompositionError::InvalidSpec {
        unit: unit.to_owned(),
        reason: format!("container '{}': {reason}", c.name),
    };

    validation::check_name("container name", &c.name).map_err(invalid)?;
    c.image.validate().map_err(invalid)?;
    if c.port == Some(0) {
        return Err(invalid("port 0 cannot be exposed".into()));
    }

    let mut seen = HashSet::new();
    let keys = c
        .environment
        .iter()
        .map(|(k, _)| k)
        .chain(c.secrets.iter().map(|(k, _)| k));
    for key in keys {
        validation::check_env_key(key).map_err(invalid)?;
        if !seen.insert(key.as_str()) {
            return Err(CompositionError::DuplicateEnvironmentKey {
                unit: unit.to_owned(),
                container: c.name.clone(),
                key: key.clone(),
            });
        }
    }

    let mut secrets_out: BTreeMap<String, ValueRef> = BTreeMap::new();
    for (key, binding) in &c.secrets {
        let value = secrets::read_secret_field(&binding.secret, binding.field).map_err(|missing| {
            CompositionError::MissingSecretField {
                unit: unit.to_owned(),
                container: c.name.clone(),
                secret: missing.secret,
                field: missing.field.to_owned(),
            }
        })?;
        if !secret_ids.contains(&value.secret) {
            secret_ids.push(value.secret.clone());
        }
        secrets_out.insert(key.clone(), value);
    }

    Ok(ContainerDefinition {
        name: c.name.clone(),
        image: c.image.resolve(),
        command: c.command.clone(),
        environment: c.environment.iter().cloned().collect(),
        secrets: secrets_out,
        port_mappings: c
            .port
            .map(|port| PortMapping {
                container_port: port,
                protocol: Protocol::Tcp,
            })
            .into_iter()
            .collect(),
        logging: c.logging.clone(),
        readonly_root_filesystem: c.readonly_filesystem,
        essential: c.essential,
        depends_on: c.depends_on.clone(),
    })
}

fn check_target_group(
    unit: &str,
    tg: &TargetGroupSpec,
    containers: &[ContainerSpec],
) -> Result<(), CompositionError> {
    let invalid = |reason: String| CompositionError::InvalidSpec {
        unit: unit.to_owned(),
        reason: format!("target group: {reason}"),
    };
    let Some(container) = containers.iter().find(|c| c.name == tg.container) else {
        return Err(invalid(format!("no container named '{}'", tg.container)));
    };
    if container.port != Some(tg.port) {
        return Err(invalid(format!(
            "container '{}' does not expose port {}",
            tg.container, tg.port
        )));
    }
    validation::check_path_pattern(&tg.health_check.path).map_err(invalid)?;
    validation::check_http_codes(&tg.health_check.healthy_http_codes).map_err(invalid)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Phase;
    use crate::image::ImageSource;
    use crate::infra::cluster::ComputeCluster;
    use crate::infra::database::{DatabaseSettings, RelationalStore};
    use crate::infra::network::{Network, NetworkProps, SubnetTier};
    use crate::secrets::{CredentialField, SecretBinding, SecretRequest};
    use crate::unit::{DependencyCondition, DeploymentPolicy, HealthCheck, TaskSizing};

    struct Fixture {
        graph: ResourceGraph,
        network: ResourceId,
        cluster: ResourceId,
        store: RelationalStore,
    }

    fn fixture() -> Fixture {
        let mut graph = ResourceGraph::new();
        let network =
            Network::build(&mut graph, ResourceId::new("S/Vpc"), NetworkProps::default()).unwrap();
        let store = RelationalStore::build(
            &mut graph,
            &ResourceId::new("S/Aurora"),
            &network,
            &DatabaseSettings::default(),
        )
        .unwrap();
        let cluster =
            ComputeCluster::build(&mut graph, ResourceId::new("S/Cluster"), &network).unwrap();
        Fixture {
            network: network.id().clone(),
            cluster: cluster.id().clone(),
            graph,
            store,
        }
    }

    fn spec(f: &Fixture, name: &str, containers: Vec<ContainerSpec>) -> ServiceUnitSpec {
        ServiceUnitSpec {
            id: ResourceId::new(format!("S/{name}")),
            name: name.into(),
            phase: Phase::Foundation,
            placement: f.cluster.clone(),
            network: f.network.clone(),
            subnets: SubnetTier::PrivateWithEgress,
            sizing: TaskSizing::arm64(256, 512),
            containers,
            deployment: DeploymentPolicy::default(),
            target_group: None,
        }
    }

    fn c(name: &str) -> ContainerSpec {
        ContainerSpec::new(name, ImageSource::registry("grafana/grafana:10.4.2"))
    }

    #[test]
    fn secrets_are_bound_by_reference() {
        let mut f = fixture();
        let cred = f.store.grafana_credential().clone();
        let s = spec(
            &f,
            "Grafana",
            vec![c("Grafana")
                .secret("GF_DATABASE_HOST", cred.binding(CredentialField::Host))
                .secret("GF_DATABASE_PASSWORD", cred.binding(CredentialField::Password))],
        );
        let built = build_unit(&mut f.graph, s).unwrap();
        let resource = f.graph.resolve(&built.service).unwrap();
        let ResourceSpec::Service(def) = &resource.spec else {
            panic!("expected service");
        };
        let pw = &def.containers[0].secrets["GF_DATABASE_PASSWORD"];
        assert_eq!(&pw.secret, cred.secret.id());
        assert_eq!(pw.field, Some(CredentialField::Password));
        assert!(resource.depends_on.contains(cred.secret.id()));

        let json = serde_json::to_string(&resource).unwrap();
        assert!(!json.contains("grafana-admin"));
    }

    #[test]
    fn readonly_flag_passed_through() {
        let mut f = fixture();
        let s = spec(&f, "Agent", vec![c("Agent").writable_filesystem()]);
        let built = build_unit(&mut f.graph, s).unwrap();
        let ResourceSpec::Service(def) = &f.graph.resolve(&built.service).unwrap().spec else {
            panic!("expected service");
        };
        assert!(!def.containers[0].readonly_root_filesystem);
    }

    #[test]
    fn cycle_rejected_without_touching_graph() {
        let mut f = fixture();
        let before = f.graph.len();
        let s = spec(
            &f,
            "Loop",
            vec![
                c("A").depends_on("B", DependencyCondition::Success),
                c("B").depends_on("A", DependencyCondition::Success),
            ],
        );
        let err = build_unit(&mut f.graph, s).unwrap_err();
        assert!(matches!(err, CompositionError::CyclicDependency { ref containers, .. } if containers.len() == 2));
        assert_eq!(f.graph.len(), before);
    }

    #[test]
    fn duplicate_key_across_env_and_secrets() {
        let mut f = fixture();
        let cred = f.store.oncall_credential().clone();
        let s = spec(
            &f,
            "Oncall",
            vec![c("Engine")
                .env("MYSQL_HOST", "x")
                .secret("MYSQL_HOST", cred.binding(CredentialField::Host))],
        );
        assert_eq!(
            build_unit(&mut f.graph, s).unwrap_err(),
            CompositionError::DuplicateEnvironmentKey {
                unit: "Oncall".into(),
                container: "Engine".into(),
                key: "MYSQL_HOST".into(),
            }
        );
    }

    #[test]
    fn whole_value_of_credential_is_missing_field() {
        let mut f = fixture();
        let cred = f.store.root_credential().clone();
        let s = spec(
            &f,
            "Ingester",
            vec![c("Ingester").secret("DB", SecretBinding::whole(&cred.secret))],
        );
        assert!(matches!(
            build_unit(&mut f.graph, s).unwrap_err(),
            CompositionError::MissingSecretField { ref container, .. } if container == "Ingester"
        ));
    }

    #[test]
    fn generated_secret_field_is_missing() {
        let mut f = fixture();
        let admin = secrets::create_secret(
            &mut f.graph,
            SecretRequest::generated(ResourceId::new("S/AdminPw"), Phase::Foundation, "pw"),
        )
        .unwrap();
        let s = spec(
            &f,
            "Grafana",
            vec![c("Grafana").secret("X", SecretBinding::field(&admin, CredentialField::Username))],
        );
        assert!(matches!(
            build_unit(&mut f.graph, s),
            Err(CompositionError::MissingSecretField { .. })
        ));
    }

    #[test]
    fn target_group_bound_to_exposed_port() {
        let mut f = fixture();
        let mut s = spec(&f, "Grafana", vec![c("Grafana").port(3000)]);
        s.target_group = Some(TargetGroupSpec {
            container: "Grafana".into(),
            port: 3000,
            health_check: HealthCheck::path("/api/health"),
        });
        let built = build_unit(&mut f.graph, s).unwrap();
        let tg = built.target_group.unwrap();
        assert_eq!(tg.id().as_str(), "S/Grafana/TargetGroup");
        let ResourceSpec::TargetGroup(props) = &f.graph.resolve(&tg).unwrap().spec else {
            panic!("expected target group");
        };
        assert_eq!(props.port, 3000);
        assert_eq!(&props.service, built.service.id());
    }

    #[test]
    fn target_group_on_unexposed_port_rejected() {
        let mut f = fixture();
        let mut s = spec(&f, "Grafana", vec![c("Grafana").port(3000)]);
        s.target_group = Some(TargetGroupSpec {
            container: "Grafana".into(),
            port: 8080,
            health_check: HealthCheck::path("/api/health"),
        });
        assert!(matches!(
            build_unit(&mut f.graph, s),
            Err(CompositionError::InvalidSpec { .. })
        ));
    }

    #[test]
    fn empty_unit_rejected() {
        let mut f = fixture();
        let s = spec(&f, "Empty", vec![]);
        assert_eq!(
            build_unit(&mut f.graph, s).unwrap_err(),
            CompositionError::EmptyUnit {
                unit: "Empty".into()
            }
        );
    }

    #[test]
    fn needs_an_essential_container() {
        let mut f = fixture();
        let s = spec(&f, "Jobs", vec![c("Job").non_essential()]);
        assert!(matches!(
            build_unit(&mut f.graph, s),
            Err(CompositionError::InvalidSpec { .. })
        ));
    }

    #[test]
    fn unknown_cluster_is_unresolved() {
        let mut f = fixture();
        let mut s = spec(&f, "Agent", vec![c("Agent")]);
        s.placement = ResourceId::new("S/Elsewhere");
        assert!(matches!(
            build_unit(&mut f.graph, s),
            Err(CompositionError::UnresolvedHandle { .. })
        ));
    }
}
