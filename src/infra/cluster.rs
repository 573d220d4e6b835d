use serde::Serialize;

use super::network::Network;
use crate::error::CompositionError;
use crate::graph::{Phase, Resource, ResourceGraph, ResourceHandle, ResourceId, ResourceSpec};

#[derive(Debug, Clone, Serialize)]
pub struct ClusterProps {
    pub network: ResourceId,
    pub container_insights: bool,
}

/// Container-orchestration cluster; placement target for every unit.
#[derive(Debug)]
pub struct ComputeCluster {
    handle: ResourceHandle,
}

impl ComputeCluster {
    pub fn build(
        graph: &mut ResourceGraph,
        id: ResourceId,
        network: &Network,
    ) -> Result<Self, CompositionError> {
        let handle = graph.add(
            Resource::new(
                id,
                Phase::Foundation,
                ResourceSpec::ComputeCluster(ClusterProps {
                    network: network.id().clone(),
                    container_insights: false,
                }),
            )
            .depends_on([network.id()]),
            vec![],
        )?;
        tracing::info!(cluster = %handle.id(), "compute cluster defined");
        Ok(Self { handle })
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    pub fn id(&self) -> &ResourceId {
        self.handle.id()
    }
}
