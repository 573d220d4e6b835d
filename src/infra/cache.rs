use serde::Serialize;

use super::network::{Network, SubnetTier};
use crate::error::CompositionError;
use crate::graph::grants::AccessGraph;
use crate::graph::{
    AttrRef, Endpoint, Phase, Resource, ResourceGraph, ResourceHandle, ResourceId, ResourceSpec,
};

pub const REDIS_PORT: u16 = 6379;

#[derive(Debug, Clone, Serialize)]
pub struct CacheSubnetGroupProps {
    pub name: String,
    pub network: ResourceId,
    pub subnets: SubnetTier,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheClusterProps {
    pub name: String,
    pub node_type: &'static str,
    pub shards: u8,
    pub replicas_per_shard: u8,
    pub engine_version: &'static str,
    pub tls: bool,
    pub acl: &'static str,
    pub auto_minor_version_upgrade: bool,
    pub subnet_group: ResourceId,
    pub port: u16,
}

/// Managed in-memory cluster used by the oncall workers as their broker.
#[derive(Debug)]
pub struct CacheStore {
    subnet_group: ResourceHandle,
    cluster: ResourceHandle,
    redis_uri: String,
}

impl CacheStore {
    #[tracing::instrument(skip(graph, network), fields(%id), err)]
    pub fn build(
        graph: &mut ResourceGraph,
        id: &ResourceId,
        network: &Network,
        cluster_name: &str,
    ) -> Result<Self, CompositionError> {
        let subnets = network.require_tier(SubnetTier::PrivateWithEgress)?;

        let subnet_group = graph.add(
            Resource::new(
                id.child("SubnetGroup"),
                Phase::Foundation,
                ResourceSpec::CacheSubnetGroup(CacheSubnetGroupProps {
                    name: format!("{cluster_name}-subnet-group"),
                    network: network.id().clone(),
                    subnets,
                    description: format!("{cluster_name} subnet group"),
                }),
            )
            .depends_on([network.id()]),
            vec![],
        )?;

        let cluster_id = id.child("Cluster");
        let endpoint = Endpoint::tcp(
            AttrRef::new(&cluster_id, "ClusterEndpoint.Address"),
            REDIS_PORT,
        );
        let redis_uri = format!("redis://{}", endpoint.authority());
        let cluster = graph.add(
            Resource::new(
                cluster_id,
                Phase::Foundation,
                ResourceSpec::CacheCluster(CacheClusterProps {
                    name: cluster_name.to_owned(),
                    node_type: "db.t4g.small",
                    shards: 1,
                    replicas_per_shard: 1,
                    engine_version: "7.1",
                    tls: true,
                    acl: "open-access",
                    auto_minor_version_upgrade: true,
                    subnet_group: subnet_group.id().clone(),
                    port: REDIS_PORT,
                }),
            )
            .depends_on([subnet_group.id()]),
            vec![endpoint],
        )?;

        tracing::info!(cluster = %cluster.id(), "cache store defined");
        Ok(Self {
            subnet_group,
            cluster,
            redis_uri,
        })
    }

    pub fn cluster(&self) -> &ResourceHandle {
        &self.cluster
    }

    pub fn subnet_group(&self) -> &ResourceHandle {
        &self.subnet_group
    }

    /// Connection URI handed to clients, with the host still unresolved.
    pub fn redis_uri(&self) -> &str {
        &self.redis_uri
    }

    /// Let `source` connect to the cluster on the Redis port.
    pub fn allow_from(
        &self,
        graph: &ResourceGraph,
        access: &mut AccessGraph,
        source: &ResourceHandle,
    ) -> Result<bool, CompositionError> {
        access.grant(graph, source, &self.cluster, REDIS_PORT)
    }
}
