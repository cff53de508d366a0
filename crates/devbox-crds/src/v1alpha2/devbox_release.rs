//! DevBoxRelease CRD (v1alpha2)
//!
//! Same shape as v1alpha1. The types stay distinct so every conversion
//! between the two is explicit.

use crate::common::variant_names;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// DevBoxRelease specification
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "devbox.sealos.io",
    version = "v1alpha2",
    kind = "DevBoxRelease",
    plural = "devboxreleases",
    namespaced,
    status = "DevBoxReleaseStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct DevBoxReleaseSpec {
    /// Devbox the release was taken from
    pub devbox_name: String,

    /// Tag given to the released image
    pub new_tag: String,

    /// Free-form release notes
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,
}

/// Observed release state
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DevBoxReleaseStatus {
    /// Release progress
    #[serde(default)]
    pub phase: DevboxReleasePhase,

    /// Image of the Devbox at release time
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub original_image: String,
}

/// Release progress
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum DevboxReleasePhase {
    /// Image tagged and pushed
    Success,
    /// Release in progress
    #[default]
    Pending,
    /// Release failed
    Failed,
}

variant_names!(DevboxReleasePhase { Success, Pending, Failed });
