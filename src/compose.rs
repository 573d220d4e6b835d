//! Composition root: builds every resource in a fixed order, wires access
//! grants as soon as both ends exist, and evaluates the phase gate once.

use std::fmt;

use serde::Serialize;

use crate::config::StackConfig;
use crate::error::CompositionError;
use crate::graph::grants::{AccessGrant, AccessGraph, EgressRule};
use crate::graph::{Phase, Resource, ResourceGraph, ResourceHandle, ResourceId};
use crate::infra::alerts::AlertTopic;
use crate::infra::cache::{CacheStore, REDIS_PORT};
use crate::infra::cluster::ComputeCluster;
use crate::infra::database::{DatabaseSettings, MYSQL_PORT, RelationalStore};
use crate::infra::entry_point::{EntryPoint, Route};
use crate::infra::network::{Network, NetworkProps};
use crate::phase::PhaseGate;
use crate::services::{self, Placement};
use crate::unit::{BuiltUnit, build_unit};

/// Name of the cache cluster.
pub const CACHE_CLUSTER_NAME: &str = "grafana-oncall";

/// Path pattern and priority under which Grafana is routed.
pub const GRAFANA_ROUTE: (&str, u32) = ("/grafana/*", 1);

/// Logical components that can take part in a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Network,
    Store,
    Bastion,
    Cache,
    Cluster,
    PdcAgent,
    Ingester,
    AlertTopic,
    EntryPoint,
    Grafana,
    Oncall,
}

impl Component {
    pub fn phase(self) -> Phase {
        match self {
            Self::EntryPoint | Self::Grafana | Self::Oncall => Phase::Activation,
            _ => Phase::Foundation,
        }
    }

    /// Id the component's primary resource gets under `root`.
    pub fn resource_id(self, root: &ResourceId) -> ResourceId {
        match self {
            Self::Network => root.child("Vpc"),
            Self::Store => root.child("Aurora").child("Cluster"),
            Self::Bastion => root.child("Aurora").child("Bastion"),
            Self::Cache => root.child("MemoryDB").child("Cluster"),
            Self::Cluster => root.child("FargateCluster"),
            Self::PdcAgent => root.child("GrafanaPdcAgent").child("Service"),
            Self::Ingester => root.child("IotDataIngester").child("Service"),
            Self::AlertTopic => root.child("AlertTopic"),
            Self::EntryPoint => root.child("MainAlb").child("LoadBalancer"),
            Self::Grafana => root.child("GrafanaService").child("Service"),
            Self::Oncall => root.child("OncallService").child("Service"),
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug)]
struct Foundation {
    network: Network,
    store: RelationalStore,
    cache: CacheStore,
    cluster: ComputeCluster,
    pdc_agent: BuiltUnit,
    ingester: BuiltUnit,
    alerts: AlertTopic,
}

#[derive(Debug)]
struct Activation {
    entry: EntryPoint,
    grafana: BuiltUnit,
    oncall: BuiltUnit,
}

/// Step-wise composition. [`compose`] drives it end to end; the steps are
/// public so callers can observe ordering failures.
#[derive(Debug)]
pub struct Composer<'c> {
    config: &'c StackConfig,
    gate: PhaseGate,
    root: ResourceId,
    graph: ResourceGraph,
    access: AccessGraph,
    foundation: Option<Foundation>,
    activation: Option<Activation>,
}

impl<'c> Composer<'c> {
    pub fn new(gate: PhaseGate, config: &'c StackConfig) -> Self {
        Self {
            config,
            gate,
            root: ResourceId::new(config.prefix.as_str()),
            graph: ResourceGraph::new(),
            access: AccessGraph::new(),
            foundation: None,
            activation: None,
        }
    }

    pub fn gate(&self) -> PhaseGate {
        self.gate
    }

    pub fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    pub fn grants(&self) -> &[AccessGrant] {
        self.access.grants()
    }

    /// Network, stores, cluster, the agent and ingester units, and the alert
    /// topic. Built regardless of the gate.
    #[tracing::instrument(skip(self), fields(root = %self.root), err)]
    pub fn build_foundation(&mut self) -> Result<(), CompositionError> {
        if self.foundation.is_some() {
            return Err(CompositionError::DuplicateResource {
                id: Component::Network.resource_id(&self.root).to_string(),
            });
        }
        let graph = &mut self.graph;
        let access = &mut self.access;
        let root = &self.root;
        let config = self.config;

        let network = Network::build(graph, root.child("Vpc"), NetworkProps::default())?;

        let store = RelationalStore::build(
            graph,
            &root.child("Aurora"),
            &network,
            &DatabaseSettings::default(),
        )?;
        network.allow_outbound_from(graph, access, store.bastion())?;

        let cache = CacheStore::build(graph, &root.child("MemoryDB"), &network, CACHE_CLUSTER_NAME)?;
        let cluster = ComputeCluster::build(graph, root.child("FargateCluster"), &network)?;
        let placement = Placement {
            network: &network,
            cluster: &cluster,
        };

        let pdc_agent = build_unit(graph, services::pdc_agent::unit_spec(root, &placement, config))?;
        network.allow_outbound_from(graph, access, &pdc_agent.service)?;
        store.allow_access_from(graph, access, &pdc_agent.service)?;

        let ingester = build_unit(
            graph,
            services::ingester::unit_spec(root, &placement, config, store.root_credential()),
        )?;
        network.allow_outbound_from(graph, access, &ingester.service)?;
        store.allow_access_from(graph, access, &ingester.service)?;

        let alerts = AlertTopic::build(
            graph,
            &root.child("AlertTopic"),
            config.alert_webhook_url.as_deref(),
        )?;

        tracing::info!(
            resources = graph.len(),
            grants = access.grants().len(),
            "foundation composed"
        );
        self.foundation = Some(Foundation {
            network,
            store,
            cache,
            cluster,
            pdc_agent,
            ingester,
            alerts,
        });
        Ok(())
    }

    /// Entry point, Grafana and OnCall units, their grants and the listener
    /// routes. Fails with `PhaseGateClosed` while the gate is pending.
    #[tracing::instrument(skip(self), fields(root = %self.root), err)]
    pub fn build_activation(&mut self) -> Result<(), CompositionError> {
        self.gate
            .check(Phase::Activation, &Component::EntryPoint.resource_id(&self.root))?;
        let Some(f) = &self.foundation else {
            return Err(CompositionError::UnresolvedHandle {
                resource: Component::Network.resource_id(&self.root).to_string(),
            });
        };
        if self.activation.is_some() {
            return Err(CompositionError::DuplicateResource {
                id: Component::EntryPoint.resource_id(&self.root).to_string(),
            });
        }
        let graph = &mut self.graph;
        let access = &mut self.access;
        let root = &self.root;
        let config = self.config;
        let placement = Placement {
            network: &f.network,
            cluster: &f.cluster,
        };

        // The services need the load balancer's DNS name in their URLs, so
        // it comes first; routes come last, after both target groups.
        let mut entry = EntryPoint::build(graph, &root.child("MainAlb"), &f.network)?;
        let grafana_root = entry.url("/grafana");
        let oncall_base = entry.url("");

        let grafana = services::grafana::build(
            graph,
            root,
            &placement,
            config,
            f.store.grafana_credential(),
            &grafana_root,
        )?;
        f.network.allow_outbound_from(graph, access, &grafana.service)?;
        f.store.allow_access_from(graph, access, &grafana.service)?;

        let oncall = services::oncall::build(
            graph,
            root,
            &placement,
            config,
            f.store.oncall_credential(),
            &services::oncall::OncallUrls {
                base_url: &oncall_base,
                grafana_api_url: &grafana_root,
                redis_uri: f.cache.redis_uri(),
            },
        )?;
        f.network.allow_outbound_from(graph, access, &oncall.service)?;
        f.store.allow_access_from(graph, access, &oncall.service)?;
        f.cache.allow_from(graph, access, &oncall.service)?;

        let grafana_tg = required_target_group(&grafana)?;
        let oncall_tg = required_target_group(&oncall)?;
        let (pattern, priority) = GRAFANA_ROUTE;
        entry.add_route(graph, "Grafana", grafana_tg, Route::path(&[pattern], priority))?;
        entry.add_route(graph, "Oncall", oncall_tg, Route::default_action())?;

        tracing::info!(
            resources = graph.len(),
            grants = access.grants().len(),
            routes = entry.routes().len(),
            "activation composed"
        );
        self.activation = Some(Activation {
            entry,
            grafana,
            oncall,
        });
        Ok(())
    }

    /// `grant(source, target, port)` between two components. Both must
    /// already be built; components of a phase the gate does not allow fail
    /// with `PhaseGateClosed`.
    pub fn grant(
        &mut self,
        source: Component,
        target: Component,
        port: u16,
    ) -> Result<bool, CompositionError> {
        let built = Built {
            gate: self.gate,
            root: &self.root,
            foundation: self.foundation.as_ref(),
            activation: self.activation.as_ref(),
        };
        let source = built.handle(source)?;
        let target = built.handle(target)?;
        self.access.grant(&self.graph, source, target, port)
    }

    /// Consume the composer. Fails if a step the gate requires was skipped.
    pub fn finish(self) -> Result<CompositionResult, CompositionError> {
        if self.foundation.is_none() {
            return Err(CompositionError::UnresolvedHandle {
                resource: Component::Network.resource_id(&self.root).to_string(),
            });
        }
        if self.gate == PhaseGate::Active && self.activation.is_none() {
            return Err(CompositionError::UnresolvedHandle {
                resource: Component::EntryPoint.resource_id(&self.root).to_string(),
            });
        }
        let (grants, egress) = self.access.into_parts();
        Ok(CompositionResult {
            gate: self.gate,
            resources: self.graph.into_resources(),
            grants,
            egress,
        })
    }
}

/// Borrowed view of what has been built so far.
struct Built<'a> {
    gate: PhaseGate,
    root: &'a ResourceId,
    foundation: Option<&'a Foundation>,
    activation: Option<&'a Activation>,
}

impl<'a> Built<'a> {
    fn handle(&self, component: Component) -> Result<&'a ResourceHandle, CompositionError> {
        let id = component.resource_id(self.root);
        self.gate.check(component.phase(), &id)?;
        let unresolved = || CompositionError::UnresolvedHandle {
            resource: id.to_string(),
        };
        match component.phase() {
            Phase::Foundation => {
                let f = self.foundation.ok_or_else(unresolved)?;
                Ok(match component {
                    Component::Network => f.network.handle(),
                    Component::Store => f.store.cluster(),
                    Component::Bastion => f.store.bastion(),
                    Component::Cache => f.cache.cluster(),
                    Component::Cluster => f.cluster.handle(),
                    Component::PdcAgent => &f.pdc_agent.service,
                    Component::Ingester => &f.ingester.service,
                    Component::AlertTopic => f.alerts.topic(),
                    Component::EntryPoint | Component::Grafana | Component::Oncall => {
                        return Err(unresolved());
                    }
                })
            }
            Phase::Activation => {
                let a = self.activation.ok_or_else(unresolved)?;
                Ok(match component {
                    Component::EntryPoint => a.entry.load_balancer(),
                    Component::Grafana => &a.grafana.service,
                    Component::Oncall => &a.oncall.service,
                    _ => return Err(unresolved()),
                })
            }
        }
    }
}

fn required_target_group(unit: &BuiltUnit) -> Result<&ResourceHandle, CompositionError> {
    unit.target_group
        .as_ref()
        .ok_or_else(|| CompositionError::InvalidRoute(format!("{} has no target group", unit.service.id())))
}

/// `compose(phaseGateValue) -> CompositionResult`. All or nothing: any error
/// aborts the pass and nothing is returned.
#[tracing::instrument(skip(config), fields(prefix = %config.prefix), err)]
pub fn compose(gate: PhaseGate, config: &StackConfig) -> Result<CompositionResult, CompositionError> {
    let mut composer = Composer::new(gate, config);
    composer.build_foundation()?;
    if gate.allows(Phase::Activation) {
        composer.build_activation()?;
    } else {
        tracing::info!("phase gate pending; activation resources skipped");
    }
    composer.finish()
}

/// The emitted graph and the grant log, both in creation order.
#[derive(Debug, Clone, Serialize)]
pub struct CompositionResult {
    pub gate: PhaseGate,
    pub resources: Vec<Resource>,
    pub grants: Vec<AccessGrant>,
    pub egress: Vec<EgressRule>,
}

impl CompositionResult {
    pub fn resource(&self, id: &ResourceId) -> Option<&Resource> {
        self.resources.iter().find(|r| &r.id == id)
    }

    pub fn in_phase(&self, phase: Phase) -> impl Iterator<Item = &Resource> {
        self.resources.iter().filter(move |r| r.phase == phase)
    }

    pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Resource> {
        self.resources.iter().filter(move |r| r.kind() == kind)
    }

    pub fn position(&self, id: &ResourceId) -> Option<usize> {
        self.resources.iter().position(|r| &r.id == id)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}
