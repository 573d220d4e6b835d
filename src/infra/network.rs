use serde::Serialize;

use crate::error::CompositionError;
use crate::graph::grants::AccessGraph;
use crate::graph::{Phase, Resource, ResourceGraph, ResourceHandle, ResourceId, ResourceSpec};

/// Subnet tier a resource is placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubnetTier {
    Public,
    PrivateWithEgress,
    Isolated,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubnetConfig {
    pub name: &'static str,
    pub tier: SubnetTier,
    pub cidr_mask: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkProps {
    pub cidr: String,
    pub max_azs: u8,
    pub nat_gateways: u8,
    pub subnets: Vec<SubnetConfig>,
}

impl Default for NetworkProps {
    fn default() -> Self {
        Self {
            cidr: "10.0.0.0/16".into(),
            max_azs: 2,
            nat_gateways: 1,
            subnets: vec![
                SubnetConfig {
                    name: "Public",
                    tier: SubnetTier::Public,
                    cidr_mask: 24,
                },
                SubnetConfig {
                    name: "Private",
                    tier: SubnetTier::PrivateWithEgress,
                    cidr_mask: 24,
                },
            ],
        }
    }
}

impl NetworkProps {
    pub fn has_tier(&self, tier: SubnetTier) -> bool {
        self.subnets.iter().any(|s| s.tier == tier)
    }
}

/// The virtual network every other resource is placed in.
#[derive(Debug)]
pub struct Network {
    handle: ResourceHandle,
    props: NetworkProps,
}

impl Network {
    pub fn build(
        graph: &mut ResourceGraph,
        id: ResourceId,
        props: NetworkProps,
    ) -> Result<Self, CompositionError> {
        if props.nat_gateways > 0 && !props.has_tier(SubnetTier::Public) {
            return Err(CompositionError::InvalidConfig(
                "NAT gateways need a public subnet tier".into(),
            ));
        }
        let handle = graph.add(
            Resource::new(id, Phase::Foundation, ResourceSpec::Network(props.clone())),
            vec![],
        )?;
        tracing::info!(id = %handle.id(), "network defined");
        Ok(Self { handle, props })
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    pub fn id(&self) -> &ResourceId {
        self.handle.id()
    }

    /// Fails if `tier` is not part of this network.
    pub fn require_tier(&self, tier: SubnetTier) -> Result<SubnetTier, CompositionError> {
        if self.props.has_tier(tier) {
            Ok(tier)
        } else {
            Err(CompositionError::InvalidConfig(format!(
                "network {} has no {tier:?} subnets",
                self.handle.id()
            )))
        }
    }

    /// Let `source` open outbound connections to the internet through the
    /// NAT path.
    pub fn allow_outbound_from(
        &self,
        graph: &ResourceGraph,
        access: &mut AccessGraph,
        source: &ResourceHandle,
    ) -> Result<bool, CompositionError> {
        if self.props.nat_gateways == 0 {
            return Err(CompositionError::InvalidConfig(format!(
                "network {} has no egress path",
                self.handle.id()
            )));
        }
        access.allow_egress(graph, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_network_has_both_tiers() {
        let props = NetworkProps::default();
        assert!(props.has_tier(SubnetTier::Public));
        assert!(props.has_tier(SubnetTier::PrivateWithEgress));
        assert!(!props.has_tier(SubnetTier::Isolated));
    }

    #[test]
    fn nat_without_public_tier_rejected() {
        let mut graph = ResourceGraph::new();
        let props = NetworkProps {
            subnets: vec![SubnetConfig {
                name: "Private",
                tier: SubnetTier::PrivateWithEgress,
                cidr_mask: 24,
            }],
            ..NetworkProps::default()
        };
        let err = Network::build(&mut graph, ResourceId::new("Vpc"), props).unwrap_err();
        assert!(matches!(err, CompositionError::InvalidConfig(_)));
        assert!(graph.is_empty());
    }

    #[test]
    fn outbound_requires_egress_path() {
        let mut graph = ResourceGraph::new();
        let props = NetworkProps {
            nat_gateways: 0,
            ..NetworkProps::default()
        };
        let network = Network::build(&mut graph, ResourceId::new("Vpc"), props).unwrap();
        let mut access = AccessGraph::new();
        let err = network
            .allow_outbound_from(&graph, &mut access, network.handle())
            .unwrap_err();
        assert!(matches!(err, CompositionError::InvalidConfig(_)));
    }

    #[test]
    fn missing_tier_reported() {
        let mut graph = ResourceGraph::new();
        let network =
            Network::build(&mut graph, ResourceId::new("Vpc"), NetworkProps::default()).unwrap();
        assert!(network.require_tier(SubnetTier::Public).is_ok());
        assert!(network.require_tier(SubnetTier::Isolated).is_err());
    }
}
