use std::collections::HashSet;

use serde::Serialize;

use super::{ResourceGraph, ResourceHandle, ResourceId};
use crate::error::CompositionError;

/// Destination of every egress rule: the NAT path out of the network.
pub const ANY_IPV4: &str = "0.0.0.0/0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    OutboundFromSource,
}

/// Permission for `source` to open TCP connections to `target` on `port`.
/// The reverse direction is a separate grant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AccessGrant {
    pub source: ResourceId,
    pub target: ResourceId,
    pub port: u16,
    pub direction: Direction,
}

impl AccessGrant {
    pub fn touches(&self, id: &ResourceId) -> bool {
        self.source == *id || self.target == *id
    }
}

/// Permission for `source` to reach anything outside the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EgressRule {
    pub source: ResourceId,
    pub destination: &'static str,
}

/// Accumulates grants and egress rules in creation order. Repeating a request
/// is a no-op.
#[derive(Debug, Default)]
pub struct AccessGraph {
    grants: Vec<AccessGrant>,
    seen: HashSet<(ResourceId, ResourceId, u16)>,
    egress: Vec<EgressRule>,
    egress_seen: HashSet<ResourceId>,
}

impl AccessGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `source` to reach `target` on `port`. Both handles must already
    /// be in `graph`. Returns `false` when the grant already existed.
    pub fn grant(
        &mut self,
        graph: &ResourceGraph,
        source: &ResourceHandle,
        target: &ResourceHandle,
        port: u16,
    ) -> Result<bool, CompositionError> {
        graph.resolve(source)?;
        graph.resolve(target)?;

        let key = (source.id().clone(), target.id().clone(), port);
        if self.seen.contains(&key) {
            tracing::debug!(source = %source.id(), target = %target.id(), port, "grant already present");
            return Ok(false);
        }

        tracing::info!(source = %source.id(), target = %target.id(), port, "access granted");
        self.seen.insert(key);
        self.grants.push(AccessGrant {
            source: source.id().clone(),
            target: target.id().clone(),
            port,
            direction: Direction::OutboundFromSource,
        });
        Ok(true)
    }

    /// Allow `source` to open outbound connections through the egress path.
    pub fn allow_egress(
        &mut self,
        graph: &ResourceGraph,
        source: &ResourceHandle,
    ) -> Result<bool, CompositionError> {
        graph.resolve(source)?;
        if !self.egress_seen.insert(source.id().clone()) {
            return Ok(false);
        }
        tracing::debug!(source = %source.id(), "egress allowed");
        self.egress.push(EgressRule {
            source: source.id().clone(),
            destination: ANY_IPV4,
        });
        Ok(true)
    }

    pub fn grants(&self) -> &[AccessGrant] {
        &self.grants
    }

    pub fn egress(&self) -> &[EgressRule] {
        &self.egress
    }

    pub fn into_parts(self) -> (Vec<AccessGrant>, Vec<EgressRule>) {
        (self.grants, self.egress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Phase, Resource, ResourceSpec};
    use crate::infra::alerts::TopicProps;

    fn add(graph: &mut ResourceGraph, id: &str) -> ResourceHandle {
        graph
            .add(
                Resource::new(
                    ResourceId::new(id),
                    Phase::Foundation,
                    ResourceSpec::Topic(TopicProps { display_name: None }),
                ),
                vec![],
            )
            .unwrap()
    }

    #[test]
    fn repeated_grant_is_single_edge() {
        let mut graph = ResourceGraph::new();
        let a = add(&mut graph, "a");
        let b = add(&mut graph, "b");
        let mut access = AccessGraph::new();

        assert!(access.grant(&graph, &a, &b, 6379).unwrap());
        assert!(!access.grant(&graph, &a, &b, 6379).unwrap());
        assert_eq!(access.grants().len(), 1);
        assert_eq!(access.grants()[0].port, 6379);
    }

    #[test]
    fn grants_are_directional() {
        let mut graph = ResourceGraph::new();
        let a = add(&mut graph, "a");
        let b = add(&mut graph, "b");
        let mut access = AccessGraph::new();

        access.grant(&graph, &a, &b, 3306).unwrap();
        access.grant(&graph, &b, &a, 3306).unwrap();
        access.grant(&graph, &a, &b, 6379).unwrap();
        assert_eq!(access.grants().len(), 3);
    }

    #[test]
    fn grant_to_unknown_target_fails_without_recording() {
        let mut graph = ResourceGraph::new();
        let a = add(&mut graph, "a");
        let mut elsewhere = ResourceGraph::new();
        let ghost = add(&mut elsewhere, "ghost");
        let mut access = AccessGraph::new();

        let err = access.grant(&graph, &a, &ghost, 3306).unwrap_err();
        assert!(matches!(err, CompositionError::UnresolvedHandle { ref resource } if resource == "ghost"));
        assert!(access.grants().is_empty());
    }

    #[test]
    fn egress_is_idempotent() {
        let mut graph = ResourceGraph::new();
        let a = add(&mut graph, "a");
        let mut access = AccessGraph::new();

        assert!(access.allow_egress(&graph, &a).unwrap());
        assert!(!access.allow_egress(&graph, &a).unwrap());
        assert_eq!(access.egress().len(), 1);
        assert_eq!(access.egress()[0].destination, ANY_IPV4);
    }

    #[test]
    fn touches_matches_either_end() {
        let grant = AccessGrant {
            source: ResourceId::new("a"),
            target: ResourceId::new("b"),
            port: 1,
            direction: Direction::OutboundFromSource,
        };
        assert!(grant.touches(&ResourceId::new("a")));
        assert!(grant.touches(&ResourceId::new("b")));
        assert!(!grant.touches(&ResourceId::new("c")));
    }
}
