//! Grafana, served from the `/grafana` sub-path of the entry point and
//! backed by its own logical database.

use super::{DatabaseSecretKeys, EnvSetting, Placement, environment};
use crate::config::StackConfig;
use crate::error::CompositionError;
use crate::graph::{Phase, ResourceGraph, ResourceId};
use crate::image::ImageSource;
use crate::secrets::{self, Credential, SecretBinding, SecretRequest};
use crate::unit::{
    BuiltUnit, ContainerSpec, HealthCheck, TargetGroupSpec, TaskSizing, build_unit,
};

pub const CONTAINER: &str = "Grafana";
pub const PORT: u16 = 3000;
pub const HEALTH_PATH: &str = "/api/health";
pub const ONCALL_PLUGIN: &str = "grafana-oncall-app";

pub const SECRET_KEYS: DatabaseSecretKeys = DatabaseSecretKeys {
    host: "GF_DATABASE_HOST",
    dbname: "GF_DATABASE_NAME",
    username: "GF_DATABASE_USER",
    password: "GF_DATABASE_PASSWORD",
};

pub const ADMIN_PASSWORD_KEY: &str = "GF_SECURITY_ADMIN_PASSWORD";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrafanaSetting {
    ServerRootUrl(String),
    ServeFromSubPath(bool),
    DatabaseType(&'static str),
    AdminUser(String),
    AllowUnsignedPlugins(Vec<String>),
    /// `(plugin id, version)` pairs installed at startup.
    InstallPlugins(Vec<(String, String)>),
}

impl EnvSetting for GrafanaSetting {
    fn key(&self) -> &'static str {
        match self {
            Self::ServerRootUrl(_) => "GF_SERVER_ROOT_URL",
            Self::ServeFromSubPath(_) => "GF_SERVER_SERVE_FROM_SUB_PATH",
            Self::DatabaseType(_) => "GF_DATABASE_TYPE",
            Self::AdminUser(_) => "GF_SECURITY_ADMIN_USER",
            Self::AllowUnsignedPlugins(_) => "GF_PLUGINS_ALLOW_LOADING_UNSIGNED_PLUGINS",
            Self::InstallPlugins(_) => "GF_INSTALL_PLUGINS",
        }
    }

    fn value(&self) -> String {
        match self {
            Self::ServerRootUrl(url) => url.clone(),
            Self::ServeFromSubPath(on) => on.to_string(),
            Self::DatabaseType(t) => (*t).to_owned(),
            Self::AdminUser(user) => user.clone(),
            Self::AllowUnsignedPlugins(ids) => ids.join(","),
            Self::InstallPlugins(plugins) => plugins
                .iter()
                .map(|(id, version)| format!("{id} {version}"))
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// Settings for a Grafana reachable at `root_url` with the oncall plugin
/// preinstalled at the oncall release in use.
pub fn settings(root_url: &str, config: &StackConfig) -> Vec<GrafanaSetting> {
    vec![
        GrafanaSetting::ServerRootUrl(root_url.to_owned()),
        GrafanaSetting::ServeFromSubPath(true),
        GrafanaSetting::DatabaseType("mysql"),
        GrafanaSetting::AdminUser("admin".into()),
        GrafanaSetting::AllowUnsignedPlugins(vec![ONCALL_PLUGIN.into()]),
        GrafanaSetting::InstallPlugins(vec![(
            ONCALL_PLUGIN.into(),
            config.oncall_version().to_owned(),
        )]),
    ]
}

/// Adds the generated admin password, then the unit and its target group.
#[tracing::instrument(skip_all, fields(%parent), err)]
pub fn build(
    graph: &mut ResourceGraph,
    parent: &ResourceId,
    placement: &Placement<'_>,
    config: &StackConfig,
    credential: &Credential,
    root_url: &str,
) -> Result<BuiltUnit, CompositionError> {
    let id = parent.child("GrafanaService");
    let admin_password = secrets::create_secret(
        graph,
        SecretRequest::generated(
            id.child("AdminPassword"),
            Phase::Activation,
            "grafana admin password",
        ),
    )?;

    // Grafana writes plugins and its sqlite cache to disk.
    let container = ContainerSpec::new(CONTAINER, ImageSource::registry(config.grafana_image.as_str()))
        .port(PORT)
        .envs(environment(&settings(root_url, config)))
        .secret(ADMIN_PASSWORD_KEY, SecretBinding::whole(&admin_password))
        .secrets(SECRET_KEYS.bindings(credential))
        .writable_filesystem();

    build_unit(
        graph,
        placement.unit_spec(
            id,
            Phase::Activation,
            TaskSizing::arm64(256, 512),
            vec![container],
            Some(TargetGroupSpec {
                container: CONTAINER.into(),
                port: PORT,
                health_check: HealthCheck::path(HEALTH_PATH),
            }),
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_render_expected_environment() {
        let env = environment(&settings("http://lb/grafana", &StackConfig::default()));
        let get = |k: &str| env.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("GF_SERVER_ROOT_URL"), Some("http://lb/grafana"));
        assert_eq!(get("GF_SERVER_SERVE_FROM_SUB_PATH"), Some("true"));
        assert_eq!(get("GF_DATABASE_TYPE"), Some("mysql"));
        assert_eq!(get("GF_INSTALL_PLUGINS"), Some("grafana-oncall-app v1.8.13"));
        assert_eq!(
            get("GF_PLUGINS_ALLOW_LOADING_UNSIGNED_PLUGINS"),
            Some("grafana-oncall-app")
        );
    }

    #[test]
    fn every_setting_has_a_distinct_key() {
        let s = settings("http://x", &StackConfig::default());
        let mut keys: Vec<_> = s.iter().map(EnvSetting::key).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), s.len());
    }
}
