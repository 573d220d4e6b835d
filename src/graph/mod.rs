pub mod grants;

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::error::CompositionError;
use crate::infra::alerts::{SubscriptionProps, TopicProps};
use crate::infra::cache::{CacheClusterProps, CacheSubnetGroupProps};
use crate::infra::cluster::ClusterProps;
use crate::infra::database::{BastionProps, DatabaseProps};
use crate::infra::entry_point::{ListenerProps, LoadBalancerProps, RouteProps};
use crate::infra::network::NetworkProps;
use crate::secrets::SecretProps;
use crate::unit::{TargetGroupProps, UnitDefinition};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Stable identity of a resource: a slash-separated construction path such as
/// `GrafanaSelfHostingBackend/Aurora/Cluster`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn child(&self, name: &str) -> Self {
        Self(format!("{}/{name}", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provisioning phase a resource belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Always constructed: network, stores, cluster, agent and ingester.
    Foundation,
    /// Constructed only once the phase gate is active.
    Activation,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Foundation => "foundation",
            Self::Activation => "activation",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// An attribute of a resource that only the provisioning backend can resolve
/// (an endpoint address, a DNS name). Rendered as `${<id>.<attribute>}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttrRef {
    pub resource: ResourceId,
    pub attribute: &'static str,
}

impl AttrRef {
    pub fn new(resource: &ResourceId, attribute: &'static str) -> Self {
        Self {
            resource: resource.clone(),
            attribute,
        }
    }
}

impl fmt::Display for AttrRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.resource, self.attribute)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Http,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub host: AttrRef,
    pub port: u16,
    pub protocol: Protocol,
}

impl Endpoint {
    pub fn tcp(host: AttrRef, port: u16) -> Self {
        Self {
            host,
            port,
            protocol: Protocol::Tcp,
        }
    }

    pub fn http(host: AttrRef, port: u16) -> Self {
        Self {
            host,
            port,
            protocol: Protocol::Http,
        }
    }

    /// `host:port`, with the host still as an unresolved attribute reference.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// Declarative properties of every resource kind this engine can emit.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "properties")]
pub enum ResourceSpec {
    Network(NetworkProps),
    DatabaseCluster(DatabaseProps),
    BastionHost(BastionProps),
    Secret(SecretProps),
    CacheSubnetGroup(CacheSubnetGroupProps),
    CacheCluster(CacheClusterProps),
    ComputeCluster(ClusterProps),
    Service(UnitDefinition),
    TargetGroup(TargetGroupProps),
    LoadBalancer(LoadBalancerProps),
    Listener(ListenerProps),
    ListenerRoute(RouteProps),
    Topic(TopicProps),
    TopicSubscription(SubscriptionProps),
}

impl ResourceSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "Network",
            Self::DatabaseCluster(_) => "DatabaseCluster",
            Self::BastionHost(_) => "BastionHost",
            Self::Secret(_) => "Secret",
            Self::CacheSubnetGroup(_) => "CacheSubnetGroup",
            Self::CacheCluster(_) => "CacheCluster",
            Self::ComputeCluster(_) => "ComputeCluster",
            Self::Service(_) => "Service",
            Self::TargetGroup(_) => "TargetGroup",
            Self::LoadBalancer(_) => "LoadBalancer",
            Self::Listener(_) => "Listener",
            Self::ListenerRoute(_) => "ListenerRoute",
            Self::Topic(_) => "Topic",
            Self::TopicSubscription(_) => "TopicSubscription",
        }
    }
}

/// One node of the emitted graph.
#[derive(Debug, Clone, Serialize)]
pub struct Resource {
    pub id: ResourceId,
    pub phase: Phase,
    #[serde(flatten)]
    pub spec: ResourceSpec,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<ResourceId>,
}

impl Resource {
    pub fn new(id: ResourceId, phase: Phase, spec: ResourceSpec) -> Self {
        Self {
            id,
            phase,
            spec,
            depends_on: Vec::new(),
        }
    }

    #[must_use]
    pub fn depends_on<'a>(mut self, ids: impl IntoIterator<Item = &'a ResourceId>) -> Self {
        for id in ids {
            if !self.depends_on.contains(id) {
                self.depends_on.push(id.clone());
            }
        }
        self
    }

    pub fn kind(&self) -> &'static str {
        self.spec.kind()
    }
}

/// Reference to a constructed resource. Only [`ResourceGraph::add`] creates
/// handles; dependents borrow them and never clone or mutate them.
#[derive(Debug, PartialEq, Eq)]
pub struct ResourceHandle {
    id: ResourceId,
    kind: &'static str,
    phase: Phase,
    endpoints: Vec<Endpoint>,
}

impl ResourceHandle {
    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// The endpoint listening on `port`, if the resource exposes one.
    pub fn endpoint(&self, port: u16) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.port == port)
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// Insertion-ordered resource graph. The order of `resources()` is the
/// construction order, which is also a valid topological order because
/// every dependency must exist before a dependent is added.
#[derive(Debug, Default)]
pub struct ResourceGraph {
    resources: Vec<Resource>,
    index: HashMap<ResourceId, usize>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource and return its handle. Every `depends_on` entry must
    /// already be in the graph.
    pub fn add(
        &mut self,
        resource: Resource,
        endpoints: Vec<Endpoint>,
    ) -> Result<ResourceHandle, CompositionError> {
        if self.index.contains_key(&resource.id) {
            return Err(CompositionError::DuplicateResource {
                id: resource.id.to_string(),
            });
        }
        if let Some(missing) = resource
            .depends_on
            .iter()
            .find(|dep| !self.index.contains_key(*dep))
        {
            return Err(CompositionError::UnresolvedHandle {
                resource: missing.to_string(),
            });
        }
        // A foundation resource never depends on an activation resource, so
        // the foundation subgraph is the same whichever way the gate is set.
        if resource.phase == Phase::Foundation {
            if let Some(late) = resource
                .depends_on
                .iter()
                .find(|dep| self.resources[self.index[*dep]].phase == Phase::Activation)
            {
                return Err(CompositionError::PhaseGateClosed {
                    resource: late.to_string(),
                });
            }
        }

        let handle = ResourceHandle {
            id: resource.id.clone(),
            kind: resource.kind(),
            phase: resource.phase,
            endpoints,
        };

        tracing::debug!(id = %resource.id, kind = resource.kind(), phase = %resource.phase, "resource added");
        self.index.insert(resource.id.clone(), self.resources.len());
        self.resources.push(resource);
        Ok(handle)
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.index.contains_key(id)
    }

    /// Look up the resource behind `handle`, failing if it was never added to
    /// this graph.
    pub fn resolve(&self, handle: &ResourceHandle) -> Result<&Resource, CompositionError> {
        self.get(&handle.id)
            .ok_or_else(|| CompositionError::UnresolvedHandle {
                resource: handle.id.to_string(),
            })
    }

    pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
        self.index.get(id).map(|&i| &self.resources[i])
    }

    /// Construction position of `id`.
    pub fn position(&self, id: &ResourceId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn into_resources(self) -> Vec<Resource> {
        self.resources
    }
}
