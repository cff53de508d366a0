//! Version-stable Devbox types
//!
//! Fields that have the same shape in every served version. Both `v1alpha1`
//! and `v1alpha2` embed these directly, so conversion copies them verbatim.

use k8s_openapi::api::core::v1::{ContainerPort, EnvVar, ServicePort, Volume, VolumeMount};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Container configuration of a Devbox
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// User the container runs as
    #[serde(default)]
    pub user: String,

    /// Extra pod labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Extra pod annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Container entrypoint
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    /// Entrypoint arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Working directory
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub working_dir: String,

    /// Container environment
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    /// Command used when a release image is started
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub release_command: Vec<String>,

    /// Arguments used when a release image is started
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub release_args: Vec<String>,

    /// Ports exposed by the container (ssh by default)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,

    /// Application ports published through the Devbox service
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub app_ports: Vec<ServicePort>,

    /// Volume mounts of the container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,

    /// Volumes of the Devbox pod
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
}

/// `as_str`, `Display` and `FromStr` for enums serialized as their bare
/// variant names.
macro_rules! variant_names {
    ($name:ident { $($variant:ident),+ $(,)? }) => {
        impl $name {
            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => stringify!($variant),)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $(stringify!($variant) => Ok(Self::$variant),)+
                    other => Err(format!("unknown {}: {other}", stringify!($name))),
                }
            }
        }
    };
}

pub(crate) use variant_names;
