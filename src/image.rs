use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::validation;

/// How files are matched against exclude patterns when hashing a build
/// context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IgnoreMode {
    Glob,
    Docker,
}

impl IgnoreMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Glob => "glob",
            Self::Docker => "docker",
        }
    }
}

/// A local build context built at deploy time by the image pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildAsset {
    pub context: String,
    pub target: String,
    pub ignore_mode: IgnoreMode,
    pub exclude: Vec<String>,
}

impl BuildAsset {
    /// Digest over everything that identifies the build. Exclude patterns
    /// are sorted first so their declaration order does not matter.
    pub fn digest(&self) -> String {
        let mut exclude = self.exclude.clone();
        exclude.sort();
        exclude.dedup();

        let mut hasher = Sha256::new();
        for part in [
            self.context.as_str(),
            self.target.as_str(),
            self.ignore_mode.as_str(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        for pattern in &exclude {
            hasher.update(pattern.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}

/// Where a container image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Registry(String),
    Asset(BuildAsset),
}

impl ImageSource {
    pub fn registry(reference: impl Into<String>) -> Self {
        Self::Registry(reference.into())
    }

    /// Check the source is well-formed. Whether the image actually exists is
    /// only known at deploy time.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Registry(reference) => validation::check_container_image(reference),
            Self::Asset(asset) => {
                validation::check_length("build context", &asset.context, 1, 1024)?;
                validation::check_name("build target", &asset.target)
            }
        }
    }

    /// Resolve to an immutable reference. Never fails at composition time.
    pub fn resolve(&self) -> ImageRef {
        match self {
            Self::Registry(reference) => ImageRef::Registry {
                reference: reference.clone(),
            },
            Self::Asset(asset) => ImageRef::Asset {
                reference: format!("asset:{}", asset.digest()),
                target: asset.target.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum ImageRef {
    Registry { reference: String },
    Asset { reference: String, target: String },
}

impl ImageRef {
    pub fn reference(&self) -> &str {
        match self {
            Self::Registry { reference } | Self::Asset { reference, .. } => reference,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(target: &str, exclude: &[&str]) -> BuildAsset {
        BuildAsset {
            context: "../../".into(),
            target: target.into(),
            ignore_mode: IgnoreMode::Docker,
            exclude: exclude.iter().map(|s| (*s).to_owned()).collect(),
        }
    }

    #[test]
    fn registry_resolves_to_itself() {
        let image = ImageSource::registry("grafana/grafana:11.1.4");
        assert_eq!(image.resolve().reference(), "grafana/grafana:11.1.4");
    }

    #[test]
    fn asset_digest_is_stable_and_order_insensitive() {
        let a = asset("iot-data-ingester", &["**/node_modules", ".git"]);
        let b = asset("iot-data-ingester", &[".git", "**/node_modules"]);
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
    }

    #[test]
    fn asset_digest_depends_on_target() {
        let a = asset("iot-data-ingester", &[]);
        let b = asset("iot-data-ingester-dev", &[]);
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn asset_resolves_to_digest_reference() {
        let source = ImageSource::Asset(asset("iot-data-ingester", &[]));
        let ImageRef::Asset { reference, target } = source.resolve() else {
            panic!("expected asset image");
        };
        assert!(reference.starts_with("asset:"));
        assert_eq!(target, "iot-data-ingester");
    }

    #[test]
    fn invalid_registry_reference_rejected() {
        assert!(ImageSource::registry("bad image").validate().is_err());
        assert!(ImageSource::registry("grafana/oncall:v1.8.13").validate().is_ok());
    }
}
