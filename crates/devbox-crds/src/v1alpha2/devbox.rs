//! Devbox CRD (v1alpha2)
//!
//! Commit history is stored as a chain of commit records keyed by container
//! id. Each record names the image it was based on and the image it produced.

use crate::common::{variant_names, Config};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Affinity, ContainerPort, Toleration};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Devbox specification
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "devbox.sealos.io",
    version = "v1alpha2",
    kind = "Devbox",
    plural = "devboxes",
    namespaced,
    status = "DevboxStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".spec.state"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Content","type":"string","jsonPath":".status.contentID"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DevboxSpec {
    /// Desired lifecycle state
    pub state: DevboxState,

    /// Resource requests (cpu, memory)
    #[serde(default)]
    pub resource: BTreeMap<String, Quantity>,

    /// Image the Devbox was created from
    pub image: String,

    /// Template the Devbox was created from
    #[serde(rename = "templateID", default)]
    pub template_id: String,

    /// Container configuration
    #[serde(default)]
    pub config: Config,

    /// Size limit of the writable container layer, e.g. `10Gi`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub storage_limit: String,

    /// How the Devbox is exposed
    #[serde(default)]
    pub network: NetworkSpec,

    /// Runtime class of the Devbox pod
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_class_name: Option<String>,

    /// Node selector of the Devbox pod
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    /// Tolerations of the Devbox pod
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,

    /// Affinity of the Devbox pod
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
}

/// Network exposure
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// Exposure mechanism
    #[serde(rename = "type", default)]
    pub network_type: NetworkType,

    /// Ports exposed besides ssh
    #[serde(default)]
    pub extra_ports: Vec<ContainerPort>,
}

/// Observed Devbox state
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DevboxStatus {
    /// Key of the pending record that tracks uncommitted work
    #[serde(rename = "contentID", default)]
    pub content_id: String,

    /// Node the current container is scheduled on
    #[serde(default)]
    pub node: String,

    /// State last acted on by the controller
    #[serde(default)]
    pub state: DevboxState,

    /// Commit chain keyed by container id, plus the content record
    #[serde(default)]
    pub commit_records: BTreeMap<String, CommitRecord>,

    /// Lifecycle phase
    #[serde(default)]
    pub phase: DevboxPhase,

    /// Observed network exposure
    #[serde(default)]
    pub network: NetworkStatus,
}

impl DevboxStatus {
    /// Record for the uncommitted content, if the map holds one
    #[must_use]
    pub fn content_record(&self) -> Option<&CommitRecord> {
        self.commit_records.get(&self.content_id)
    }
}

/// One link of the commit chain
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommitRecord {
    /// Image this commit was layered on
    #[serde(default)]
    pub base_image: String,

    /// Image produced by this commit; empty until committed
    #[serde(default)]
    pub commit_image: String,

    /// Node the commit ran on
    #[serde(default)]
    pub node: String,

    /// When the record was created
    #[serde(default)]
    pub generate_time: DateTime<Utc>,

    /// When the container was scheduled
    #[serde(default)]
    pub schedule_time: DateTime<Utc>,

    /// When the commit was made
    #[serde(default)]
    pub commit_time: DateTime<Utc>,

    /// When the record last changed
    #[serde(default)]
    pub update_time: DateTime<Utc>,

    /// Commit status
    #[serde(default)]
    pub commit_status: CommitStatus,
}

/// Observed network exposure
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    /// Exposure mechanism
    #[serde(rename = "type", default)]
    pub network_type: NetworkType,

    /// Allocated node port for ssh
    #[serde(default)]
    pub node_port: i32,

    /// Tailnet address
    #[serde(default)]
    pub tailnet: String,
}

/// Desired lifecycle state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum DevboxState {
    /// Container should run
    #[default]
    Running,
    /// Waiting to be scheduled
    Pending,
    /// Container stopped, storage kept
    Stopped,
    /// Container and node resources released
    Shutdown,
}

/// Devbox exposure mechanism
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum NetworkType {
    /// Kubernetes node port
    #[default]
    NodePort,
    /// Tailscale network
    Tailnet,
}

/// Status of one container commit
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum CommitStatus {
    /// No commit attempted
    #[default]
    Unset,
    /// Image pushed
    Success,
    /// Commit failed
    Failed,
    /// Outcome not known
    Unknown,
    /// Commit in flight
    Pending,
    /// Commit deliberately skipped
    Skipped,
}

/// Observed lifecycle phase
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum DevboxPhase {
    /// Container running
    Running,
    /// Container being created
    #[default]
    Pending,
    /// Container stopped
    Stopped,
    /// Container stopping
    Stopping,
    /// Devbox shut down
    Shutdown,
    /// Devbox shutting down
    Shutting,
    /// Container failed
    Error,
    /// Phase not known
    Unknown,
}

variant_names!(DevboxState { Running, Pending, Stopped, Shutdown });
variant_names!(DevboxPhase { Running, Pending, Stopped, Stopping, Shutdown, Shutting, Error, Unknown });
