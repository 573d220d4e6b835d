use std::env;

use crate::error::CompositionError;
use crate::validation;

/// Everything baked into the composed stack that an operator may want to
/// override. The phase gate is deliberately not here; it is passed to
/// [`crate::compose::compose`] on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackConfig {
    /// Root of every resource id.
    pub prefix: String,
    pub grafana_image: String,
    pub oncall_image: String,
    pub pdc_agent_image: String,
    /// Path prefix of the operator-managed parameters read by the PDC agent.
    pub parameter_prefix: String,
    pub parameter_version: u32,
    pub alert_webhook_url: Option<String>,
    /// Build context of the locally built ingester images.
    pub build_context: String,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            prefix: "GrafanaSelfHosting".into(),
            grafana_image: "grafana/grafana:11.1.4".into(),
            oncall_image: "grafana/oncall:v1.8.13".into(),
            pdc_agent_image: "grafana/pdc-agent:0.0.32".into(),
            parameter_prefix: "/grafana-oncall-hosting".into(),
            parameter_version: 2,
            alert_webhook_url: None,
            build_context: "../../".into(),
        }
    }
}

impl StackConfig {
    pub fn load() -> Result<Self, CompositionError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`StackConfig::load`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CompositionError> {
        let defaults = Self::default();
        let config = Self {
            prefix: lookup("ONCALL_STACK_PREFIX").unwrap_or(defaults.prefix),
            grafana_image: lookup("ONCALL_GRAFANA_IMAGE").unwrap_or(defaults.grafana_image),
            oncall_image: lookup("ONCALL_ONCALL_IMAGE").unwrap_or(defaults.oncall_image),
            pdc_agent_image: lookup("ONCALL_PDC_AGENT_IMAGE").unwrap_or(defaults.pdc_agent_image),
            parameter_prefix: lookup("ONCALL_PARAMETER_PREFIX")
                .map(|p| p.trim_end_matches('/').to_owned())
                .unwrap_or(defaults.parameter_prefix),
            parameter_version: match lookup("ONCALL_PARAMETER_VERSION") {
                Some(v) => v.parse().map_err(|_| {
                    CompositionError::InvalidConfig(format!(
                        "ONCALL_PARAMETER_VERSION must be a positive integer, got '{v}'"
                    ))
                })?,
                None => defaults.parameter_version,
            },
            alert_webhook_url: lookup("ONCALL_ALERT_WEBHOOK_URL").filter(|v| !v.is_empty()),
            build_context: lookup("ONCALL_BUILD_CONTEXT").unwrap_or(defaults.build_context),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CompositionError> {
        let invalid = CompositionError::InvalidConfig;
        validation::check_name("ONCALL_STACK_PREFIX", &self.prefix).map_err(invalid)?;
        for (key, image) in [
            ("ONCALL_GRAFANA_IMAGE", &self.grafana_image),
            ("ONCALL_ONCALL_IMAGE", &self.oncall_image),
            ("ONCALL_PDC_AGENT_IMAGE", &self.pdc_agent_image),
        ] {
            validation::check_container_image(image)
                .map_err(|e| CompositionError::InvalidConfig(format!("{key}: {e}")))?;
        }
        if !self.parameter_prefix.starts_with('/') {
            return Err(CompositionError::InvalidConfig(
                "ONCALL_PARAMETER_PREFIX must start with '/'".into(),
            ));
        }
        if self.parameter_version == 0 {
            return Err(CompositionError::InvalidConfig(
                "ONCALL_PARAMETER_VERSION must be at least 1".into(),
            ));
        }
        if let Some(url) = &self.alert_webhook_url {
            validation::check_url(url)
                .map_err(|e| CompositionError::InvalidConfig(format!("ONCALL_ALERT_WEBHOOK_URL: {e}")))?;
        }
        validation::check_length("ONCALL_BUILD_CONTEXT", &self.build_context, 1, 1024)
            .map_err(invalid)?;
        Ok(())
    }

    /// Full name of an operator-managed parameter.
    pub fn parameter(&self, name: &str) -> String {
        format!("{}/{name}", self.parameter_prefix)
    }

    /// Tag of the oncall image, used to pin the Grafana plugin to the same
    /// release.
    pub fn oncall_version(&self) -> &str {
        self.oncall_image
            .rsplit_once(':')
            .map_or("latest", |(_, tag)| tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = StackConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, StackConfig::default());
        assert_eq!(config.parameter_version, 2);
        assert!(config.alert_webhook_url.is_none());
    }

    #[test]
    fn overrides_applied() {
        let config = StackConfig::from_lookup(lookup(&[
            ("ONCALL_STACK_PREFIX", "Staging"),
            ("ONCALL_PARAMETER_PREFIX", "/staging/"),
            ("ONCALL_PARAMETER_VERSION", "5"),
            ("ONCALL_ALERT_WEBHOOK_URL", "https://oncall.example.com/hook/"),
        ]))
        .unwrap();
        assert_eq!(config.prefix, "Staging");
        assert_eq!(config.parameter("pdc-agent-token"), "/staging/pdc-agent-token");
        assert_eq!(config.parameter_version, 5);
        assert_eq!(
            config.alert_webhook_url.as_deref(),
            Some("https://oncall.example.com/hook/")
        );
    }

    #[test]
    fn bad_version_rejected() {
        let err = StackConfig::from_lookup(lookup(&[("ONCALL_PARAMETER_VERSION", "two")]))
            .unwrap_err();
        assert!(matches!(err, CompositionError::InvalidConfig(ref m) if m.contains("two")));
    }

    #[test]
    fn bad_webhook_rejected() {
        assert!(
            StackConfig::from_lookup(lookup(&[("ONCALL_ALERT_WEBHOOK_URL", "ftp://x")])).is_err()
        );
    }

    #[test]
    fn empty_webhook_means_none() {
        let config =
            StackConfig::from_lookup(lookup(&[("ONCALL_ALERT_WEBHOOK_URL", "")])).unwrap();
        assert!(config.alert_webhook_url.is_none());
    }

    #[test]
    fn oncall_version_from_tag() {
        assert_eq!(StackConfig::default().oncall_version(), "v1.8.13");
    }
}
