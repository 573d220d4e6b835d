//! Private data-source connect agent: a phase-1 unit with no port that opens
//! an outbound tunnel to the hosted Grafana.

use super::Placement;
use crate::config::StackConfig;
use crate::graph::{Phase, ResourceId};
use crate::image::ImageSource;
use crate::secrets::ParameterRef;
use crate::unit::{CommandArg, ContainerSpec, ServiceUnitSpec, TaskSizing};

pub const CONTAINER: &str = "PdcAgent";

/// Operator-managed parameters passed on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdcParameter {
    Token,
    Cluster,
    HostedGrafanaId,
}

impl PdcParameter {
    pub const ALL: [Self; 3] = [Self::Token, Self::Cluster, Self::HostedGrafanaId];

    /// Parameter name under the configured prefix.
    pub fn name(self) -> &'static str {
        match self {
            Self::Token => "pdc-agent-token",
            Self::Cluster => "pdc-agent-cluster",
            Self::HostedGrafanaId => "gcloud-hosted-grafana-id",
        }
    }

    pub fn flag(self) -> &'static str {
        match self {
            Self::Token => "-token",
            Self::Cluster => "-cluster",
            Self::HostedGrafanaId => "-gcloud-hosted-grafana-id",
        }
    }
}

fn command(config: &StackConfig) -> Vec<CommandArg> {
    PdcParameter::ALL
        .into_iter()
        .flat_map(|p| {
            [
                CommandArg::from(p.flag()),
                CommandArg::Parameter(ParameterRef {
                    name: config.parameter(p.name()),
                    version: config.parameter_version,
                }),
            ]
        })
        .collect()
}

pub fn unit_spec(parent: &ResourceId, placement: &Placement<'_>, config: &StackConfig) -> ServiceUnitSpec {
    // The agent writes its state to the root filesystem.
    let agent = ContainerSpec::new(CONTAINER, ImageSource::registry(config.pdc_agent_image.as_str()))
        .command(command(config))
        .writable_filesystem();

    placement.unit_spec(
        parent.child("GrafanaPdcAgent"),
        Phase::Foundation,
        TaskSizing::arm64(256, 512),
        vec![agent],
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_pairs_flags_with_parameters() {
        let args = command(&StackConfig::default());
        assert_eq!(args.len(), 6);
        assert_eq!(args[0], CommandArg::from("-token"));
        assert_eq!(
            args[1],
            CommandArg::Parameter(ParameterRef {
                name: "/grafana-oncall-hosting/pdc-agent-token".into(),
                version: 2,
            })
        );
        assert_eq!(args[4], CommandArg::from("-gcloud-hosted-grafana-id"));
    }

    #[test]
    fn parameter_values_never_inlined() {
        let json = serde_json::to_string(&command(&StackConfig::default())).unwrap();
        assert!(json.contains("\"version\":2"));
    }
}
