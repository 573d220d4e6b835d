//! Service units: one or more containers sharing placement, sizing and a
//! rolling-update policy.

pub mod builder;
pub mod ordering;
pub mod rollout;
pub mod startup;

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

pub use builder::{BuiltUnit, build_unit};
pub use rollout::{CircuitBreaker, DeploymentPolicy};

use crate::graph::{Phase, Protocol, ResourceId};
use crate::image::{ImageRef, ImageSource};
use crate::infra::network::SubnetTier;
use crate::secrets::{ParameterRef, SecretBinding, ValueRef};

// ---------------------------------------------------------------------------
// Startup dependencies
// ---------------------------------------------------------------------------

/// What a prerequisite container must reach before its dependent starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DependencyCondition {
    /// The prerequisite has been started.
    Start,
    /// The prerequisite ran to completion, whatever its exit status.
    Complete,
    /// The prerequisite exited with status zero.
    Success,
    /// The prerequisite passes its health check and keeps running.
    Healthy,
}

impl DependencyCondition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::Complete => "COMPLETE",
            Self::Success => "SUCCESS",
            Self::Healthy => "HEALTHY",
        }
    }
}

impl fmt::Display for DependencyCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Edge from the owning (dependent) container to `container`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartupDependency {
    pub container: String,
    pub condition: DependencyCondition,
}

// ---------------------------------------------------------------------------
// Container spec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionDays {
    OneMonth,
    ThreeMonths,
    SixMonths,
    OneYear,
}

impl RetentionDays {
    pub fn days(self) -> u16 {
        match self {
            Self::OneMonth => 30,
            Self::ThreeMonths => 90,
            Self::SixMonths => 180,
            Self::OneYear => 365,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogSink {
    pub stream_prefix: String,
    pub retention: RetentionDays,
}

/// One command-line argument. Parameters are resolved by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CommandArg {
    Literal(String),
    Parameter(ParameterRef),
}

impl From<&str> for CommandArg {
    fn from(value: &str) -> Self {
        Self::Literal(value.to_owned())
    }
}

impl From<ParameterRef> for CommandArg {
    fn from(value: ParameterRef) -> Self {
        Self::Parameter(value)
    }
}

#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: ImageSource,
    pub command: Vec<CommandArg>,
    /// Declared in order; keys must be unique.
    pub environment: Vec<(String, String)>,
    pub secrets: Vec<(String, SecretBinding)>,
    pub port: Option<u16>,
    pub logging: LogSink,
    pub readonly_filesystem: bool,
    pub essential: bool,
    pub depends_on: Vec<StartupDependency>,
}

impl ContainerSpec {
    /// Essential container with a read-only root filesystem, logging under
    /// its own name for three months.
    pub fn new(name: &str, image: ImageSource) -> Self {
        Self {
            name: name.to_owned(),
            image,
            command: Vec::new(),
            environment: Vec::new(),
            secrets: Vec::new(),
            port: None,
            logging: LogSink {
                stream_prefix: name.to_owned(),
                retention: RetentionDays::ThreeMonths,
            },
            readonly_filesystem: true,
            essential: true,
            depends_on: Vec::new(),
        }
    }

    #[must_use]
    pub fn command<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<CommandArg>,
    {
        self.command = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.environment.push((key.to_owned(), value.into()));
        self
    }

    #[must_use]
    pub fn envs(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.environment.extend(vars);
        self
    }

    #[must_use]
    pub fn secret(mut self, key: &str, binding: SecretBinding) -> Self {
        self.secrets.push((key.to_owned(), binding));
        self
    }

    #[must_use]
    pub fn secrets(mut self, bindings: impl IntoIterator<Item = (String, SecretBinding)>) -> Self {
        self.secrets.extend(bindings);
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn writable_filesystem(mut self) -> Self {
        self.readonly_filesystem = false;
        self
    }

    #[must_use]
    pub fn non_essential(mut self) -> Self {
        self.essential = false;
        self
    }

    #[must_use]
    pub fn depends_on(mut self, container: &str, condition: DependencyCondition) -> Self {
        self.depends_on.push(StartupDependency {
            container: container.to_owned(),
            condition,
        });
        self
    }
}

// ---------------------------------------------------------------------------
// Unit spec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuArchitecture {
    Arm64,
    X86_64,
}

/// Task-level CPU units and memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskSizing {
    pub cpu: u32,
    pub memory_mib: u32,
    pub architecture: CpuArchitecture,
}

impl TaskSizing {
    pub fn arm64(cpu: u32, memory_mib: u32) -> Self {
        Self {
            cpu,
            memory_mib,
            architecture: CpuArchitecture::Arm64,
        }
    }

    /// Only the serverless CPU/memory combinations are accepted.
    pub fn validate(&self) -> Result<(), String> {
        let (min, max, step) = match self.cpu {
            256 => (512, 2048, 512),
            512 => (1024, 4096, 1024),
            1024 => (2048, 8192, 1024),
            2048 => (4096, 16384, 1024),
            4096 => (8192, 30720, 1024),
            other => return Err(format!("unsupported cpu value {other}")),
        };
        let mem = self.memory_mib;
        if mem < min || mem > max || (mem != min && (mem - min) % step != 0) {
            return Err(format!(
                "memory {mem} MiB is not valid for {} cpu (allowed {min}..={max} in steps of {step})",
                self.cpu
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub path: String,
    pub healthy_http_codes: String,
    pub interval_secs: u32,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
}

impl HealthCheck {
    pub fn path(path: &str) -> Self {
        Self {
            path: path.to_owned(),
            healthy_http_codes: "200".into(),
            interval_secs: 30,
            healthy_threshold: 5,
            unhealthy_threshold: 2,
        }
    }

    #[must_use]
    pub fn codes(mut self, codes: &str) -> Self {
        codes.clone_into(&mut self.healthy_http_codes);
        self
    }
}

/// Exposes `container`'s `port` through a routable target group.
#[derive(Debug, Clone)]
pub struct TargetGroupSpec {
    pub container: String,
    pub port: u16,
    pub health_check: HealthCheck,
}

#[derive(Debug, Clone)]
pub struct ServiceUnitSpec {
    /// Construct path; the service and target group are children of it.
    pub id: ResourceId,
    pub name: String,
    pub phase: Phase,
    /// Compute cluster the unit is placed on.
    pub placement: ResourceId,
    pub network: ResourceId,
    pub subnets: SubnetTier,
    pub sizing: TaskSizing,
    pub containers: Vec<ContainerSpec>,
    pub deployment: DeploymentPolicy,
    pub target_group: Option<TargetGroupSpec>,
}

// ---------------------------------------------------------------------------
// Emitted definitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortMapping {
    pub container_port: u16,
    pub protocol: Protocol,
}

/// A container as the orchestrator runs it. Secrets appear only as
/// references.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerDefinition {
    pub name: String,
    pub image: ImageRef,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<CommandArg>,
    pub environment: BTreeMap<String, String>,
    pub secrets: BTreeMap<String, ValueRef>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub port_mappings: Vec<PortMapping>,
    pub logging: LogSink,
    pub readonly_root_filesystem: bool,
    pub essential: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<StartupDependency>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitDefinition {
    pub name: String,
    pub cluster: ResourceId,
    pub subnets: SubnetTier,
    pub sizing: TaskSizing,
    pub deployment: DeploymentPolicy,
    pub containers: Vec<ContainerDefinition>,
    /// A start order honoring every startup dependency.
    pub start_order: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetGroupProps {
    pub network: ResourceId,
    pub service: ResourceId,
    pub container: String,
    pub port: u16,
    pub protocol: Protocol,
    pub health_check: HealthCheck,
}
