use serde::Serialize;

use super::network::{Network, SubnetTier};
use crate::error::CompositionError;
use crate::graph::grants::AccessGraph;
use crate::graph::{
    AttrRef, Endpoint, Phase, Resource, ResourceGraph, ResourceHandle, ResourceId, ResourceSpec,
};
use crate::secrets::{self, Credential, SecretRequest};

pub const MYSQL_PORT: u16 = 3306;

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseProps {
    pub engine: &'static str,
    pub engine_version: &'static str,
    pub instance_class: &'static str,
    pub instances: u8,
    pub network: ResourceId,
    pub subnets: SubnetTier,
    pub port: u16,
    pub default_database: String,
    pub master_credentials: ResourceId,
    pub backup_retention_days: u16,
    pub deletion_protection: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BastionProps {
    pub network: ResourceId,
    pub subnets: SubnetTier,
    pub instance_type: &'static str,
    pub session_manager: bool,
}

/// One logical database and the user owning it.
#[derive(Debug, Clone, Copy)]
pub struct LogicalDatabase<'a> {
    pub name: &'a str,
    pub username: &'a str,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings<'a> {
    pub root: LogicalDatabase<'a>,
    pub grafana: LogicalDatabase<'a>,
    pub oncall: LogicalDatabase<'a>,
}

impl Default for DatabaseSettings<'_> {
    fn default() -> Self {
        Self {
            root: LogicalDatabase {
                name: "iot",
                username: "admin",
            },
            grafana: LogicalDatabase {
                name: "grafana",
                username: "grafana-admin",
            },
            oncall: LogicalDatabase {
                name: "oncall",
                username: "oncall-admin",
            },
        }
    }
}

/// Managed MySQL-compatible cluster, its break-glass host, and one
/// credential per logical database.
///
/// The grafana and oncall credentials exist from the start, but the
/// databases and users behind them are created by an operator through the
/// bastion before the phase gate is opened.
#[derive(Debug)]
pub struct RelationalStore {
    cluster: ResourceHandle,
    bastion: ResourceHandle,
    root: Credential,
    grafana: Credential,
    oncall: Credential,
}

impl RelationalStore {
    #[tracing::instrument(skip(graph, network, settings), fields(%id), err)]
    pub fn build(
        graph: &mut ResourceGraph,
        id: &ResourceId,
        network: &Network,
        settings: &DatabaseSettings<'_>,
    ) -> Result<Self, CompositionError> {
        let subnets = network.require_tier(SubnetTier::PrivateWithEgress)?;
        let bastion_subnets = network.require_tier(SubnetTier::Public)?;

        let root_secret = secrets::create_secret(
            graph,
            SecretRequest::master_credential(
                id.child("RootSecret"),
                settings.root.name,
                settings.root.username,
            ),
        )?;

        let cluster_id = id.child("Cluster");
        let cluster = graph.add(
            Resource::new(
                cluster_id.clone(),
                Phase::Foundation,
                ResourceSpec::DatabaseCluster(DatabaseProps {
                    engine: "aurora-mysql",
                    engine_version: "8.0.mysql_aurora.3.07.1",
                    instance_class: "db.t4g.medium",
                    instances: 1,
                    network: network.id().clone(),
                    subnets,
                    port: MYSQL_PORT,
                    default_database: settings.root.name.to_owned(),
                    master_credentials: root_secret.id().clone(),
                    backup_retention_days: 7,
                    deletion_protection: true,
                }),
            )
            .depends_on([network.id(), root_secret.id()]),
            vec![Endpoint::tcp(
                AttrRef::new(&cluster_id, "Endpoint.Address"),
                MYSQL_PORT,
            )],
        )?;

        let bastion = graph.add(
            Resource::new(
                id.child("Bastion"),
                Phase::Foundation,
                ResourceSpec::BastionHost(BastionProps {
                    network: network.id().clone(),
                    subnets: bastion_subnets,
                    instance_type: "t4g.nano",
                    session_manager: true,
                }),
            )
            .depends_on([network.id()]),
            vec![],
        )?;

        let grafana_secret = secrets::create_secret(
            graph,
            SecretRequest::credential(
                id.child("GrafanaSecret"),
                &cluster_id,
                settings.grafana.name,
                settings.grafana.username,
            ),
        )?;
        let oncall_secret = secrets::create_secret(
            graph,
            SecretRequest::credential(
                id.child("OncallSecret"),
                &cluster_id,
                settings.oncall.name,
                settings.oncall.username,
            ),
        )?;

        tracing::info!(cluster = %cluster.id(), "relational store defined");
        Ok(Self {
            cluster,
            bastion,
            root: credential(root_secret, settings.root),
            grafana: credential(grafana_secret, settings.grafana),
            oncall: credential(oncall_secret, settings.oncall),
        })
    }

    pub fn cluster(&self) -> &ResourceHandle {
        &self.cluster
    }

    pub fn bastion(&self) -> &ResourceHandle {
        &self.bastion
    }

    pub fn root_credential(&self) -> &Credential {
        &self.root
    }

    pub fn grafana_credential(&self) -> &Credential {
        &self.grafana
    }

    pub fn oncall_credential(&self) -> &Credential {
        &self.oncall
    }

    /// Let `source` connect to the cluster on the MySQL port.
    pub fn allow_access_from(
        &self,
        graph: &ResourceGraph,
        access: &mut AccessGraph,
        source: &ResourceHandle,
    ) -> Result<bool, CompositionError> {
        access.grant(graph, source, &self.cluster, MYSQL_PORT)
    }
}

fn credential(secret: secrets::SecretRef, db: LogicalDatabase<'_>) -> Credential {
    Credential {
        secret,
        database: db.name.to_owned(),
        username: db.username.to_owned(),
    }
}
