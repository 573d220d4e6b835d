//! How the orchestrator honors startup conditions for one unit, given what
//! each container does once started.

use std::collections::HashMap;

use serde::Serialize;

use super::{DependencyCondition, UnitDefinition};

/// What a container does when it is allowed to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerOutcome {
    /// The process exits with this status.
    Exits(i32),
    /// The process keeps running; `healthy` is its health-check result.
    Runs { healthy: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ContainerState {
    Running { healthy: bool },
    Exited { code: i32 },
    /// Never started: `on` did not satisfy the declared condition.
    Blocked { on: String, condition: DependencyCondition },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "health", rename_all = "snake_case")]
pub enum UnitHealth {
    Healthy,
    /// An essential container is running but failing its health check.
    Unhealthy { container: String },
    /// An essential container could not start.
    Blocked { container: String, on: String },
    /// An essential container exited; the orchestrator stops the unit.
    Stopped { container: String },
}

impl UnitHealth {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Stopped { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StartupReport {
    /// In start order.
    pub containers: Vec<(String, ContainerState)>,
    pub health: UnitHealth,
}

impl StartupReport {
    pub fn state(&self, container: &str) -> Option<&ContainerState> {
        self.containers
            .iter()
            .find(|(name, _)| name == container)
            .map(|(_, state)| state)
    }
}

fn satisfied(condition: DependencyCondition, state: &ContainerState) -> bool {
    match (condition, state) {
        (_, ContainerState::Blocked { .. }) => false,
        (DependencyCondition::Start, _) => true,
        (DependencyCondition::Complete, ContainerState::Exited { .. }) => true,
        (DependencyCondition::Success, ContainerState::Exited { code }) => *code == 0,
        (DependencyCondition::Healthy, ContainerState::Running { healthy }) => *healthy,
        _ => false,
    }
}

/// Walk the unit's start order. Containers without an outcome run healthy.
pub fn evaluate(unit: &UnitDefinition, outcomes: &HashMap<&str, ContainerOutcome>) -> StartupReport {
    let mut states: HashMap<&str, ContainerState> = HashMap::new();
    let mut ordered = Vec::with_capacity(unit.start_order.len());

    for name in &unit.start_order {
        let Some(def) = unit.containers.iter().find(|c| &c.name == name) else {
            continue;
        };

        let blocker = def.depends_on.iter().find(|dep| {
            states
                .get(dep.container.as_str())
                .is_none_or(|state| !satisfied(dep.condition, state))
        });

        let state = match blocker {
            Some(dep) => ContainerState::Blocked {
                on: dep.container.clone(),
                condition: dep.condition,
            },
            None => match outcomes
                .get(name.as_str())
                .copied()
                .unwrap_or(ContainerOutcome::Runs { healthy: true })
            {
                ContainerOutcome::Exits(code) => ContainerState::Exited { code },
                ContainerOutcome::Runs { healthy } => ContainerState::Running { healthy },
            },
        };
        if let ContainerState::Blocked { on, .. } = &state {
            tracing::debug!(unit = %unit.name, container = %name, %on, "container blocked");
        }
        states.insert(name.as_str(), state.clone());
        ordered.push((name.clone(), state));
    }

    let health = unit_health(unit, &ordered);
    StartupReport {
        containers: ordered,
        health,
    }
}

fn unit_health(unit: &UnitDefinition, states: &[(String, ContainerState)]) -> UnitHealth {
    let essential = |name: &str| {
        unit.containers
            .iter()
            .any(|c| c.name == name && c.essential)
    };

    let mut blocked = None;
    let mut unhealthy = None;
    for (name, state) in states.iter().filter(|(n, _)| essential(n)) {
        match state {
            ContainerState::Exited { .. } => {
                return UnitHealth::Stopped {
                    container: name.clone(),
                };
            }
            ContainerState::Blocked { on, .. } if blocked.is_none() => {
                blocked = Some(UnitHealth::Blocked {
                    container: name.clone(),
                    on: on.clone(),
                });
            }
            ContainerState::Running { healthy: false } if unhealthy.is_none() => {
                unhealthy = Some(UnitHealth::Unhealthy {
                    container: name.clone(),
                });
            }
            _ => {}
        }
    }
    blocked.or(unhealthy).unwrap_or(UnitHealth::Healthy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Phase, Resource, ResourceGraph, ResourceId, ResourceSpec};
    use crate::image::ImageSource;
    use crate::infra::cluster::ClusterProps;
    use crate::infra::network::{NetworkProps, SubnetTier};
    use crate::unit::{ContainerSpec, DeploymentPolicy, ServiceUnitSpec, TaskSizing, build_unit};

    fn unit(containers: Vec<ContainerSpec>) -> UnitDefinition {
        let mut graph = ResourceGraph::new();
        let network = ResourceId::new("S/Vpc");
        graph
            .add(
                Resource::new(
                    network.clone(),
                    Phase::Foundation,
                    ResourceSpec::Network(NetworkProps::default()),
                ),
                vec![],
            )
            .unwrap();
        let cluster = ResourceId::new("S/Cluster");
        graph
            .add(
                Resource::new(
                    cluster.clone(),
                    Phase::Foundation,
                    ResourceSpec::ComputeCluster(ClusterProps {
                        network: network.clone(),
                        container_insights: false,
                    }),
                ),
                vec![],
            )
            .unwrap();
        let built = build_unit(
            &mut graph,
            ServiceUnitSpec {
                id: ResourceId::new("S/Unit"),
                name: "Unit".into(),
                phase: Phase::Foundation,
                placement: cluster,
                network,
                subnets: SubnetTier::PrivateWithEgress,
                sizing: TaskSizing::arm64(256, 512),
                containers,
                deployment: DeploymentPolicy::default(),
                target_group: None,
            },
        )
        .unwrap();
        let ResourceSpec::Service(def) = &graph.resolve(&built.service).unwrap().spec else {
            panic!("expected a service");
        };
        def.clone()
    }

    fn c(name: &str) -> ContainerSpec {
        ContainerSpec::new(name, ImageSource::registry("img:1"))
    }

    #[test]
    fn all_running_is_healthy() {
        let def = unit(vec![c("App")]);
        let report = evaluate(&def, &HashMap::new());
        assert_eq!(report.health, UnitHealth::Healthy);
    }

    #[test]
    fn complete_accepts_any_exit_status() {
        let def = unit(vec![
            c("Migrate").non_essential(),
            c("App").depends_on("Migrate", DependencyCondition::Complete),
        ]);
        let outcomes = HashMap::from([("Migrate", ContainerOutcome::Exits(3))]);
        let report = evaluate(&def, &outcomes);
        assert_eq!(
            report.state("App"),
            Some(&ContainerState::Running { healthy: true })
        );
        assert_eq!(report.health, UnitHealth::Healthy);
    }

    #[test]
    fn complete_waits_for_running_prerequisite() {
        let def = unit(vec![
            c("Sidecar"),
            c("App").depends_on("Sidecar", DependencyCondition::Complete),
        ]);
        let report = evaluate(&def, &HashMap::new());
        assert!(matches!(
            report.state("App"),
            Some(ContainerState::Blocked { on, .. }) if on == "Sidecar"
        ));
    }

    #[test]
    fn healthy_condition_needs_passing_check() {
        let def = unit(vec![
            c("Db"),
            c("App").depends_on("Db", DependencyCondition::Healthy),
        ]);
        let outcomes = HashMap::from([("Db", ContainerOutcome::Runs { healthy: false })]);
        let report = evaluate(&def, &outcomes);
        assert!(matches!(report.state("App"), Some(ContainerState::Blocked { .. })));
        assert_eq!(
            report.health,
            UnitHealth::Blocked {
                container: "App".into(),
                on: "Db".into()
            }
        );
    }

    #[test]
    fn essential_exit_stops_unit() {
        let def = unit(vec![c("App")]);
        let outcomes = HashMap::from([("App", ContainerOutcome::Exits(0))]);
        let report = evaluate(&def, &outcomes);
        assert!(report.health.is_fatal());
    }

    #[test]
    fn blocked_propagates_through_start_condition() {
        let def = unit(vec![
            c("Migrate").non_essential(),
            c("App").depends_on("Migrate", DependencyCondition::Success),
            c("Worker").depends_on("App", DependencyCondition::Start),
        ]);
        let outcomes = HashMap::from([("Migrate", ContainerOutcome::Exits(1))]);
        let report = evaluate(&def, &outcomes);
        assert!(matches!(
            report.state("Worker"),
            Some(ContainerState::Blocked { on, .. }) if on == "App"
        ));
    }
}
