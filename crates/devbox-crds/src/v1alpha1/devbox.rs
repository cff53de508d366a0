//! Devbox CRD (v1alpha1)
//!
//! A development container environment whose commits are tracked as a flat
//! history list.

use crate::common::{variant_names, Config};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Affinity, ContainerPort, ContainerState, Toleration};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Devbox specification
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "devbox.sealos.io",
    version = "v1alpha1",
    kind = "Devbox",
    plural = "devboxes",
    namespaced,
    status = "DevboxStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".spec.state"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DevboxSpec {
    /// Desired lifecycle state
    pub state: DevboxState,

    /// Resource requests (cpu, memory)
    #[serde(default)]
    pub resource: BTreeMap<String, Quantity>,

    /// Squash the image layers on the next commit
    #[serde(default)]
    pub squash: bool,

    /// Image the Devbox was created from
    pub image: String,

    /// Template the Devbox was created from
    #[serde(rename = "templateID", default)]
    pub template_id: String,

    /// Container configuration
    #[serde(default)]
    pub config: Config,

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
    /// Every container commit recorded for this Devbox, oldest first
    #[serde(default)]
    pub commit_history: Vec<CommitHistory>,

    /// Lifecycle phase
    #[serde(default)]
    pub phase: DevboxPhase,

    /// Runtime state of the current container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ContainerState>,

    /// How the previous container ended
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_termination_state: Option<ContainerState>,

    /// Observed network exposure
    #[serde(default)]
    pub network: NetworkStatus,
}

/// One container commit
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommitHistory {
    /// Container the image was committed from; the natural key of a commit
    #[serde(rename = "containerID", default)]
    pub container_id: String,

    /// Image produced by the commit
    #[serde(default)]
    pub image: String,

    /// When the commit was made
    #[serde(default)]
    pub time: DateTime<Utc>,

    /// Pod the container ran in
    #[serde(default)]
    pub pod: String,

    /// Node the container ran on
    #[serde(default)]
    pub node: String,

    /// Observed commit status
    #[serde(default)]
    pub status: CommitStatus,

    /// Status the controller expects the commit to reach
    #[serde(default)]
    pub predicated_status: CommitStatus,
}

impl CommitHistory {
    /// A commit is in flight while either status is still pending
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == CommitStatus::Pending || self.predicated_status == CommitStatus::Pending
    }
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

impl Devbox {
    /// True when any commit is still pending
    #[must_use]
    pub fn has_pending_commit(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|status| status.commit_history.iter().any(CommitHistory::is_pending))
    }
}

variant_names!(DevboxState { Running, Pending, Stopped, Shutdown });
variant_names!(DevboxPhase { Running, Pending, Stopped, Stopping, Shutdown, Shutting, Error, Unknown });
