use std::collections::BTreeSet;

use serde::Serialize;

use super::network::{Network, SubnetTier};
use crate::error::CompositionError;
use crate::graph::{
    AttrRef, Endpoint, Phase, Protocol, Resource, ResourceGraph, ResourceHandle, ResourceId,
    ResourceSpec,
};
use crate::validation;

pub const HTTP_PORT: u16 = 80;

/// Highest rule priority the listener accepts.
pub const MAX_PRIORITY: u32 = 50_000;

#[derive(Debug, Clone, Serialize)]
pub struct LoadBalancerProps {
    pub network: ResourceId,
    pub subnets: SubnetTier,
    pub internet_facing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListenerProps {
    pub load_balancer: ResourceId,
    pub port: u16,
    pub protocol: Protocol,
    /// Accept traffic from anywhere.
    pub open: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RouteCondition {
    PathPatterns { patterns: Vec<String> },
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteProps {
    pub listener: ResourceId,
    pub target_group: ResourceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<RouteCondition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
}

/// `addRoute(targetGroup, [pathCondition?, priority?])` arguments. A route
/// without condition is the listener's catch-all default.
#[derive(Debug, Clone, Default)]
pub struct Route {
    pub condition: Option<RouteCondition>,
    pub priority: Option<u32>,
}

impl Route {
    pub fn default_action() -> Self {
        Self::default()
    }

    pub fn path(patterns: &[&str], priority: u32) -> Self {
        Self {
            condition: Some(RouteCondition::PathPatterns {
                patterns: patterns.iter().map(|p| (*p).to_owned()).collect(),
            }),
            priority: Some(priority),
        }
    }

    fn validate(&self) -> Result<(), CompositionError> {
        match (&self.condition, self.priority) {
            (None, None) => Ok(()),
            (None, Some(_)) => Err(CompositionError::InvalidRoute(
                "a default route takes no priority".into(),
            )),
            (Some(_), None) => Err(CompositionError::InvalidRoute(
                "a conditional route needs a priority".into(),
            )),
            (Some(RouteCondition::PathPatterns { patterns }), Some(priority)) => {
                if !(1..=MAX_PRIORITY).contains(&priority) {
                    return Err(CompositionError::InvalidRoute(format!(
                        "priority {priority} outside 1..={MAX_PRIORITY}"
                    )));
                }
                if patterns.is_empty() || patterns.len() > 5 {
                    return Err(CompositionError::InvalidRoute(
                        "path condition needs between 1 and 5 patterns".into(),
                    ));
                }
                for pattern in patterns {
                    validation::check_path_pattern(pattern)
                        .map_err(CompositionError::InvalidRoute)?;
                }
                Ok(())
            }
        }
    }
}

/// Public load balancer with one HTTP listener.
#[derive(Debug)]
pub struct EntryPoint {
    load_balancer: ResourceHandle,
    listener: ResourceHandle,
    dns_name: AttrRef,
    priorities: BTreeSet<u32>,
    has_default: bool,
    routes: Vec<ResourceHandle>,
}

impl EntryPoint {
    #[tracing::instrument(skip(graph, network), fields(%id), err)]
    pub fn build(
        graph: &mut ResourceGraph,
        id: &ResourceId,
        network: &Network,
    ) -> Result<Self, CompositionError> {
        let subnets = network.require_tier(SubnetTier::Public)?;
        let lb_id = id.child("LoadBalancer");
        let dns_name = AttrRef::new(&lb_id, "DnsName");

        let load_balancer = graph.add(
            Resource::new(
                lb_id,
                Phase::Activation,
                ResourceSpec::LoadBalancer(LoadBalancerProps {
                    network: network.id().clone(),
                    subnets,
                    internet_facing: true,
                }),
            )
            .depends_on([network.id()]),
            vec![Endpoint::http(dns_name.clone(), HTTP_PORT)],
        )?;

        let listener = graph.add(
            Resource::new(
                id.child("Listener"),
                Phase::Activation,
                ResourceSpec::Listener(ListenerProps {
                    load_balancer: load_balancer.id().clone(),
                    port: HTTP_PORT,
                    protocol: Protocol::Http,
                    open: true,
                }),
            )
            .depends_on([load_balancer.id()]),
            vec![Endpoint::http(dns_name.clone(), HTTP_PORT)],
        )?;

        tracing::info!(load_balancer = %load_balancer.id(), "entry point defined");
        Ok(Self {
            load_balancer,
            listener,
            dns_name,
            priorities: BTreeSet::new(),
            has_default: false,
            routes: Vec::new(),
        })
    }

    pub fn load_balancer(&self) -> &ResourceHandle {
        &self.load_balancer
    }

    pub fn listener(&self) -> &ResourceHandle {
        &self.listener
    }

    pub fn dns_name(&self) -> &AttrRef {
        &self.dns_name
    }

    /// `http://<dns name><path>`, with the DNS name still unresolved.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.dns_name)
    }

    pub fn routes(&self) -> &[ResourceHandle] {
        &self.routes
    }

    /// Forward matching listener traffic to `target_group`, which must
    /// already be in the graph.
    pub fn add_route(
        &mut self,
        graph: &mut ResourceGraph,
        name: &str,
        target_group: &ResourceHandle,
        route: Route,
    ) -> Result<&ResourceHandle, CompositionError> {
        graph.resolve(target_group)?;
        if target_group.kind() != "TargetGroup" {
            return Err(CompositionError::InvalidRoute(format!(
                "{} is a {}, not a target group",
                target_group.id(),
                target_group.kind()
            )));
        }
        validation::check_name("route name", name).map_err(CompositionError::InvalidRoute)?;
        route.validate()?;

        match route.priority {
            Some(priority) if self.priorities.contains(&priority) => {
                return Err(CompositionError::InvalidRoute(format!(
                    "priority {priority} is already used on {}",
                    self.listener.id()
                )));
            }
            None if self.has_default => {
                return Err(CompositionError::InvalidRoute(format!(
                    "{} already has a default route",
                    self.listener.id()
                )));
            }
            _ => {}
        }

        let handle = graph.add(
            Resource::new(
                self.listener.id().child(name),
                Phase::Activation,
                ResourceSpec::ListenerRoute(RouteProps {
                    listener: self.listener.id().clone(),
                    target_group: target_group.id().clone(),
                    condition: route.condition,
                    priority: route.priority,
                }),
            )
            .depends_on([self.listener.id(), target_group.id()]),
            vec![],
        )?;

        match route.priority {
            Some(priority) => {
                self.priorities.insert(priority);
            }
            None => self.has_default = true,
        }
        tracing::info!(route = %handle.id(), "listener route attached");
        self.routes.push(handle);
        Ok(&self.routes[self.routes.len() - 1])
    }
}
