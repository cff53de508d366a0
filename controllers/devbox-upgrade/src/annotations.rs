//! # Upgrade Progress Annotations
//!
//! Per-resource upgrade state lives in the resource's own annotations, so
//! progress survives restarts of the tool and can be inspected with kubectl.
//!
//! Rules:
//! - every write re-reads the object first (read-modify-write) and stamps
//!   `upgrade-timestamp`
//! - only non-empty fields of an [`UpgradeInfo`] are written
//! - `original-state` is written once; later writes never replace it
//! - clearing removes every tracked key except `original-state`

use crate::error::UpgradeError;
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use resource_store::{ResourceStore, StoreObject};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

pub const ANNOTATION_UPGRADE_STATUS: &str = "devbox.sealos.io/upgrade-status";
pub const ANNOTATION_UPGRADE_STEP: &str = "devbox.sealos.io/upgrade-step";
pub const ANNOTATION_OPERATION_ID: &str = "devbox.sealos.io/upgrade-operation-id";
pub const ANNOTATION_UPGRADE_TIMESTAMP: &str = "devbox.sealos.io/upgrade-timestamp";
pub const ANNOTATION_ORIGINAL_STATE: &str = "devbox.sealos.io/original-state";
pub const ANNOTATION_UPGRADE_VERSION: &str = "devbox.sealos.io/upgrade-version";
pub const ANNOTATION_UPGRADE_ERROR: &str = "devbox.sealos.io/upgrade-error";
pub const ANNOTATION_UPGRADE_PROGRESS: &str = "devbox.sealos.io/upgrade-progress";

/// Version tag written by the upgrade phases
pub const UPGRADE_VERSION: &str = "v1alpha1-to-v1alpha2";

/// Version tag written by restore
pub const RESTORE_VERSION: &str = "restore-v1alpha1";

/// Phase of the upgrade that last touched a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpgradeStep {
    Backup,
    Pause,
    CrdUpdate,
    Transform,
    Finalize,
    Restore,
}

impl UpgradeStep {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            UpgradeStep::Backup => "backup",
            UpgradeStep::Pause => "pause",
            UpgradeStep::CrdUpdate => "crd-update",
            UpgradeStep::Transform => "transform",
            UpgradeStep::Finalize => "finalize",
            UpgradeStep::Restore => "restore",
        }
    }
}

impl FromStr for UpgradeStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backup" => Ok(UpgradeStep::Backup),
            "pause" => Ok(UpgradeStep::Pause),
            "crd-update" => Ok(UpgradeStep::CrdUpdate),
            "transform" => Ok(UpgradeStep::Transform),
            "finalize" => Ok(UpgradeStep::Finalize),
            "restore" => Ok(UpgradeStep::Restore),
            other => Err(format!("unknown upgrade step: {other}")),
        }
    }
}

impl fmt::Display for UpgradeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a resource within its current step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpgradeStatus {
    Pending,
    InProgress,
    Paused,
    Completed,
    Failed,
    RolledBack,
}

impl UpgradeStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            UpgradeStatus::Pending => "pending",
            UpgradeStatus::InProgress => "in-progress",
            UpgradeStatus::Paused => "paused",
            UpgradeStatus::Completed => "completed",
            UpgradeStatus::Failed => "failed",
            UpgradeStatus::RolledBack => "rolled-back",
        }
    }
}

impl FromStr for UpgradeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UpgradeStatus::Pending),
            "in-progress" => Ok(UpgradeStatus::InProgress),
            "paused" => Ok(UpgradeStatus::Paused),
            "completed" => Ok(UpgradeStatus::Completed),
            "failed" => Ok(UpgradeStatus::Failed),
            "rolled-back" => Ok(UpgradeStatus::RolledBack),
            other => Err(format!("unknown upgrade status: {other}")),
        }
    }
}

impl fmt::Display for UpgradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upgrade state carried in a resource's annotations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeInfo {
    /// Run that last wrote the resource
    pub operation_id: String,
    /// Phase that last wrote the resource
    pub step: Option<UpgradeStep>,
    /// Outcome of that phase for the resource
    pub status: Option<UpgradeStatus>,
    /// Migration direction tag
    pub version: String,
    /// Desired state before the upgrade first touched the resource
    pub original_state: String,
    /// Failure message, if any
    pub error: String,
    /// Free-form progress, e.g. `3/10`
    pub progress: String,
    /// RFC3339 time of the last write; read-only
    #[serde(skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
}

impl UpgradeInfo {
    /// Info for a phase of `operation_id` of the v1alpha1 to v1alpha2 upgrade
    #[must_use]
    pub fn upgrade(operation_id: &str, step: UpgradeStep, status: UpgradeStatus) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            step: Some(step),
            status: Some(status),
            version: UPGRADE_VERSION.to_string(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_original_state(mut self, state: &str) -> Self {
        self.original_state = state.to_string();
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: &str) -> Self {
        self.error = error.to_string();
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: &str) -> Self {
        self.progress = progress.to_string();
        self
    }
}

/// A single tracked annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeField {
    Status,
    Step,
    OperationId,
    Version,
    OriginalState,
    Error,
    Progress,
}

impl UpgradeField {
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            UpgradeField::Status => ANNOTATION_UPGRADE_STATUS,
            UpgradeField::Step => ANNOTATION_UPGRADE_STEP,
            UpgradeField::OperationId => ANNOTATION_OPERATION_ID,
            UpgradeField::Version => ANNOTATION_UPGRADE_VERSION,
            UpgradeField::OriginalState => ANNOTATION_ORIGINAL_STATE,
            UpgradeField::Error => ANNOTATION_UPGRADE_ERROR,
            UpgradeField::Progress => ANNOTATION_UPGRADE_PROGRESS,
        }
    }
}

/// Keys removed by [`ProgressTracker::clear`]
const CLEARED_KEYS: [&str; 7] = [
    ANNOTATION_UPGRADE_STATUS,
    ANNOTATION_UPGRADE_STEP,
    ANNOTATION_OPERATION_ID,
    ANNOTATION_UPGRADE_TIMESTAMP,
    ANNOTATION_UPGRADE_VERSION,
    ANNOTATION_UPGRADE_ERROR,
    ANNOTATION_UPGRADE_PROGRESS,
];

fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Write `value` under `field`, honouring first-write-wins for the original
/// state. Empty values are ignored.
fn apply_field(annotations: &mut BTreeMap<String, String>, field: UpgradeField, value: &str) {
    if value.is_empty() {
        return;
    }
    if field == UpgradeField::OriginalState && annotations.contains_key(field.key()) {
        return;
    }
    annotations.insert(field.key().to_string(), value.to_string());
}

/// Apply `info` to `meta` in place
pub fn apply_info(meta: &mut ObjectMeta, info: &UpgradeInfo, now: DateTime<Utc>) {
    let annotations = meta.annotations.get_or_insert_with(BTreeMap::new);
    apply_field(annotations, UpgradeField::OperationId, &info.operation_id);
    apply_field(annotations, UpgradeField::Step, info.step.map_or("", UpgradeStep::as_str));
    apply_field(annotations, UpgradeField::Status, info.status.map_or("", UpgradeStatus::as_str));
    apply_field(annotations, UpgradeField::Version, &info.version);
    apply_field(annotations, UpgradeField::OriginalState, &info.original_state);
    apply_field(annotations, UpgradeField::Error, &info.error);
    apply_field(annotations, UpgradeField::Progress, &info.progress);
    annotations.insert(ANNOTATION_UPGRADE_TIMESTAMP.to_string(), timestamp(now));
}

/// Read the upgrade state of a resource. Unknown step or status values read
/// as `None`.
#[must_use]
pub fn get_info(meta: &ObjectMeta) -> UpgradeInfo {
    let Some(annotations) = meta.annotations.as_ref() else {
        return UpgradeInfo::default();
    };
    let get = |key: &str| annotations.get(key).cloned().unwrap_or_default();
    UpgradeInfo {
        operation_id: get(ANNOTATION_OPERATION_ID),
        step: annotations
            .get(ANNOTATION_UPGRADE_STEP)
            .and_then(|s| s.parse().ok()),
        status: annotations
            .get(ANNOTATION_UPGRADE_STATUS)
            .and_then(|s| s.parse().ok()),
        version: get(ANNOTATION_UPGRADE_VERSION),
        original_state: get(ANNOTATION_ORIGINAL_STATE),
        error: get(ANNOTATION_UPGRADE_ERROR),
        progress: get(ANNOTATION_UPGRADE_PROGRESS),
        timestamp: get(ANNOTATION_UPGRADE_TIMESTAMP),
    }
}

/// True while the resource is pending or in progress
#[must_use]
pub fn is_in_progress(meta: &ObjectMeta) -> bool {
    matches!(
        get_info(meta).status,
        Some(UpgradeStatus::InProgress | UpgradeStatus::Pending)
    )
}

#[must_use]
pub fn has_failed(meta: &ObjectMeta) -> bool {
    get_info(meta).status == Some(UpgradeStatus::Failed)
}

/// Reads and writes upgrade annotations through a resource store
#[derive(Debug)]
pub struct ProgressTracker<'a, S> {
    store: &'a S,
}

impl<'a, S: ResourceStore> ProgressTracker<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Write the non-empty fields of `info`
    pub async fn set_info<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        info: &UpgradeInfo,
    ) -> Result<K, UpgradeError> {
        let mut object: K = self.store.get(namespace, name).await?;
        apply_info(object.meta_mut(), info, Utc::now());
        let updated = self.store.update(&object).await?;
        debug!(
            "Set upgrade info on {} {}/{}: {:?}",
            K::kind(&()),
            namespace,
            name,
            info.status
        );
        Ok(updated)
    }

    /// Write one field
    pub async fn update_field<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        field: UpgradeField,
        value: &str,
    ) -> Result<K, UpgradeError> {
        let mut object: K = self.store.get(namespace, name).await?;
        let now = Utc::now();
        let annotations = object.meta_mut().annotations.get_or_insert_with(BTreeMap::new);
        apply_field(annotations, field, value);
        annotations.insert(ANNOTATION_UPGRADE_TIMESTAMP.to_string(), timestamp(now));
        Ok(self.store.update(&object).await?)
    }

    /// Remove every tracked key except the original state.
    /// Returns false, without writing, when there was nothing to remove.
    pub async fn clear<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<bool, UpgradeError> {
        let mut object: K = self.store.get(namespace, name).await?;
        let Some(annotations) = object.meta_mut().annotations.as_mut() else {
            return Ok(false);
        };
        let before = annotations.len();
        annotations.retain(|key, _| !CLEARED_KEYS.contains(&key.as_str()));
        if annotations.len() == before {
            return Ok(false);
        }
        self.store.update(&object).await?;
        Ok(true)
    }

    /// Tag a resource with `status` (and `error`), logging instead of
    /// returning any failure.
    ///
    /// Used on failure paths: the write only records an outcome, and an error
    /// from it would hide the failure that is being recorded.
    pub async fn mark_best_effort<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        info: &UpgradeInfo,
    ) {
        if let Err(e) = self.set_info::<K>(namespace, name, info).await {
            warn!(
                "Failed to mark {} {}/{} as {}: {}",
                K::kind(&()),
                namespace,
                name,
                info.status.map_or("-", UpgradeStatus::as_str),
                e
            );
        }
    }
}

#[cfg(test)]
#[path = "annotations_test.rs"]
mod annotations_test;
