//! Grafana OnCall: web engine, celery workers and a schema migration that
//! gates both.

use super::{DatabaseSecretKeys, EnvSetting, Placement, environment};
use crate::config::StackConfig;
use crate::error::CompositionError;
use crate::graph::{Phase, ResourceGraph, ResourceId};
use crate::image::ImageSource;
use crate::secrets::{self, Credential, SecretBinding, SecretRef, SecretRequest};
use crate::unit::{
    BuiltUnit, ContainerSpec, DependencyCondition, HealthCheck, TargetGroupSpec, TaskSizing,
    build_unit,
};

pub const ENGINE: &str = "Engine";
pub const CELERY: &str = "Celery";
pub const MIGRATION: &str = "DBMigration";
pub const PORT: u16 = 8080;
pub const HEALTH_PATH: &str = "/health/";

pub const SECRET_KEYS: DatabaseSecretKeys = DatabaseSecretKeys {
    host: "MYSQL_HOST",
    dbname: "MYSQL_DB_NAME",
    username: "MYSQL_USER",
    password: "MYSQL_PASSWORD",
};

pub const SECRET_KEY_KEY: &str = "SECRET_KEY";

const WORKER_QUEUES: [&str; 9] = [
    "default", "critical", "long", "slack", "telegram", "webhook", "retry", "celery", "grafana",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OncallSetting {
    DatabaseType(&'static str),
    BrokerType(&'static str),
    BaseUrl(String),
    RedisUri(String),
    DjangoSettingsModule(&'static str),
    CeleryWorkerQueue(Vec<&'static str>),
    CeleryWorkerConcurrency(u32),
    CeleryWorkerMaxTasksPerChild(u32),
    CeleryWorkerShutdownInterval(&'static str),
    CeleryWorkerBeatEnabled(bool),
    GrafanaApiUrl(String),
    /// `None` leaves the port to the driver default.
    MysqlPort(Option<u16>),
}

impl EnvSetting for OncallSetting {
    fn key(&self) -> &'static str {
        match self {
            Self::DatabaseType(_) => "DATABASE_TYPE",
            Self::BrokerType(_) => "BROKER_TYPE",
            Self::BaseUrl(_) => "BASE_URL",
            Self::RedisUri(_) => "REDIS_URI",
            Self::DjangoSettingsModule(_) => "DJANGO_SETTINGS_MODULE",
            Self::CeleryWorkerQueue(_) => "CELERY_WORKER_QUEUE",
            Self::CeleryWorkerConcurrency(_) => "CELERY_WORKER_CONCURRENCY",
            Self::CeleryWorkerMaxTasksPerChild(_) => "CELERY_WORKER_MAX_TASKS_PER_CHILD",
            Self::CeleryWorkerShutdownInterval(_) => "CELERY_WORKER_SHUTDOWN_INTERVAL",
            Self::CeleryWorkerBeatEnabled(_) => "CELERY_WORKER_BEAT_ENABLED",
            Self::GrafanaApiUrl(_) => "GRAFANA_API_URL",
            Self::MysqlPort(_) => "MYSQL_PORT",
        }
    }

    fn value(&self) -> String {
        match self {
            Self::DatabaseType(v)
            | Self::BrokerType(v)
            | Self::DjangoSettingsModule(v)
            | Self::CeleryWorkerShutdownInterval(v) => (*v).to_owned(),
            Self::BaseUrl(v) | Self::RedisUri(v) | Self::GrafanaApiUrl(v) => v.clone(),
            Self::CeleryWorkerQueue(queues) => queues.join(","),
            Self::CeleryWorkerConcurrency(n) | Self::CeleryWorkerMaxTasksPerChild(n) => {
                n.to_string()
            }
            // Django reads booleans capitalized.
            Self::CeleryWorkerBeatEnabled(on) => String::from(if *on { "True" } else { "False" }),
            Self::MysqlPort(port) => port.map(|p| p.to_string()).unwrap_or_default(),
        }
    }
}

/// Endpoints oncall needs to know about.
#[derive(Debug, Clone)]
pub struct OncallUrls<'a> {
    pub base_url: &'a str,
    pub grafana_api_url: &'a str,
    pub redis_uri: &'a str,
}

pub fn settings(urls: &OncallUrls<'_>) -> Vec<OncallSetting> {
    vec![
        OncallSetting::DatabaseType("mysql"),
        OncallSetting::BrokerType("redis"),
        OncallSetting::BaseUrl(urls.base_url.to_owned()),
        OncallSetting::RedisUri(urls.redis_uri.to_owned()),
        // The prod settings force an SSL redirect; the helm ones do not.
        OncallSetting::DjangoSettingsModule("settings.helm"),
        OncallSetting::CeleryWorkerQueue(WORKER_QUEUES.to_vec()),
        OncallSetting::CeleryWorkerConcurrency(1),
        OncallSetting::CeleryWorkerMaxTasksPerChild(100),
        OncallSetting::CeleryWorkerShutdownInterval("65m"),
        OncallSetting::CeleryWorkerBeatEnabled(true),
        OncallSetting::GrafanaApiUrl(urls.grafana_api_url.to_owned()),
        OncallSetting::MysqlPort(None),
    ]
}

fn container(
    name: &str,
    config: &StackConfig,
    env: &[(String, String)],
    secret_key: &SecretRef,
    credential: &Credential,
) -> ContainerSpec {
    ContainerSpec::new(name, ImageSource::registry(config.oncall_image.as_str()))
        .envs(env.iter().cloned())
        .secret(SECRET_KEY_KEY, SecretBinding::whole(secret_key))
        .secrets(SECRET_KEYS.bindings(credential))
}

/// Adds the generated Django secret key, then the unit and its target
/// group. Engine and Celery only start after the migration succeeds.
#[tracing::instrument(skip_all, fields(%parent), err)]
pub fn build(
    graph: &mut ResourceGraph,
    parent: &ResourceId,
    placement: &Placement<'_>,
    config: &StackConfig,
    credential: &Credential,
    urls: &OncallUrls<'_>,
) -> Result<BuiltUnit, CompositionError> {
    let id = parent.child("OncallService");
    let secret_key = secrets::create_secret(
        graph,
        SecretRequest::generated(id.child("SecretKey"), Phase::Activation, "oncall secret key"),
    )?;
    let env = environment(&settings(urls));

    // Engine and Celery create a tmp directory at startup.
    let engine = container(ENGINE, config, &env, &secret_key, credential)
        .command(["uwsgi", "--ini", "uwsgi.ini"])
        .port(PORT)
        .writable_filesystem()
        .depends_on(MIGRATION, DependencyCondition::Success);
    let celery = container(CELERY, config, &env, &secret_key, credential)
        .command(["sh", "-c", "./celery_with_exporter.sh"])
        .writable_filesystem()
        .depends_on(MIGRATION, DependencyCondition::Success);
    let migration = container(MIGRATION, config, &env, &secret_key, credential)
        .command(["python", "manage.py", "migrate", "--noinput"])
        .non_essential();

    build_unit(
        graph,
        placement.unit_spec(
            id,
            Phase::Activation,
            TaskSizing::arm64(1024, 2048),
            vec![engine, celery, migration],
            Some(TargetGroupSpec {
                container: ENGINE.into(),
                port: PORT,
                health_check: HealthCheck::path(HEALTH_PATH).codes("200"),
            }),
        ),
    )
}
