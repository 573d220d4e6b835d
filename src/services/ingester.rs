//! IoT data ingester: a locally built image plus a one-shot schema
//! migration that must finish before the ingester starts.

use super::{DatabaseSecretKeys, Placement};
use crate::config::StackConfig;
use crate::graph::{Phase, ResourceId};
use crate::image::{BuildAsset, IgnoreMode, ImageSource};
use crate::secrets::Credential;
use crate::unit::{ContainerSpec, DependencyCondition, ServiceUnitSpec, TaskSizing};

pub const INGESTER: &str = "IotDataIngester";
pub const MIGRATION: &str = "DBMigration";

pub const SECRET_KEYS: DatabaseSecretKeys = DatabaseSecretKeys {
    host: "DB_HOST",
    dbname: "DB_DBNAME",
    username: "DB_USERNAME",
    password: "DB_PASSWORD",
};

const EXCLUDE: [&str; 3] = ["**/node_modules", ".git", "packages/cdk"];

fn asset(config: &StackConfig, target: &str) -> ImageSource {
    ImageSource::Asset(BuildAsset {
        context: config.build_context.clone(),
        target: target.to_owned(),
        ignore_mode: IgnoreMode::Docker,
        exclude: EXCLUDE.iter().map(|p| (*p).to_owned()).collect(),
    })
}

/// Both containers read the root credential. The migration is not
/// essential: once it exits the unit keeps running, and a failed migration
/// still lets the ingester start.
pub fn unit_spec(
    parent: &ResourceId,
    placement: &Placement<'_>,
    config: &StackConfig,
    root: &Credential,
) -> ServiceUnitSpec {
    // tsx writes its cache next to the sources.
    let ingester = ContainerSpec::new(INGESTER, asset(config, "iot-data-ingester"))
        .secrets(SECRET_KEYS.bindings(root))
        .writable_filesystem()
        .depends_on(MIGRATION, DependencyCondition::Complete);

    let migration = ContainerSpec::new(MIGRATION, asset(config, "iot-data-ingester-dev"))
        .command(["pnpm", "prisma", "migrate", "deploy"])
        .secrets(SECRET_KEYS.bindings(root))
        .non_essential();

    placement.unit_spec(
        parent.child("IotDataIngester"),
        Phase::Foundation,
        TaskSizing::arm64(256, 512),
        vec![ingester, migration],
        None,
    )
}
