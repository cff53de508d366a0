//! CRD version conversion between v1alpha1 and v1alpha2
//!
//! v1alpha2 is the hub: every conversion goes through it.
//!
//! ## Conversion rules:
//! - v1alpha1 -> v1alpha2: re-tag enums, drop `squash`, fill `storageLimit`,
//!   replay the commit history into a commit-record chain
//! - v1alpha2 -> v1alpha1: re-tag enums, flatten the commit-record map into a
//!   history ordered by commit time. The content record is kept as a history
//!   entry with an empty image so existing readers see the same shape they
//!   always have.
//!
//! Identity metadata is copied as-is, except owner references into the
//! `devbox.sealos.io` group which are rewritten to the target version.

use crate::commit_chain;
use crate::error::ConversionError;
use crate::{v1alpha1, v1alpha2, ANNOTATION_STORAGE_LIMIT, DEVBOX_KIND, GROUP, RELEASE_KIND};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Default `storageLimit` when upgrading an object that carries none
pub const DEFAULT_STORAGE_LIMIT: &str = "10Gi";

/// Knobs for the v1alpha1 -> v1alpha2 direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionOptions {
    /// Used when the object has no `devbox.sealos.io/storage-limit` annotation
    pub default_storage_limit: String,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            default_storage_limit: DEFAULT_STORAGE_LIMIT.to_string(),
        }
    }
}

/// Served versions of the devbox.sealos.io group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ApiVersion {
    /// `devbox.sealos.io/v1alpha1`, the commit-history version
    V1alpha1,
    /// `devbox.sealos.io/v1alpha2`, the commit-record version and hub
    V1alpha2,
}

impl ApiVersion {
    /// Version every conversion passes through
    pub const HUB: ApiVersion = ApiVersion::V1alpha2;

    /// Bare version, e.g. `v1alpha2`
    #[must_use]
    pub fn version(self) -> &'static str {
        match self {
            ApiVersion::V1alpha1 => v1alpha1::VERSION,
            ApiVersion::V1alpha2 => v1alpha2::VERSION,
        }
    }

    /// Group-qualified apiVersion, e.g. `devbox.sealos.io/v1alpha2`
    #[must_use]
    pub fn api_version(self) -> String {
        format!("{GROUP}/{}", self.version())
    }

    /// Parse a group-qualified apiVersion as found on an object.
    pub fn from_api_version(api_version: &str) -> Result<Self, ConversionError> {
        match api_version.split_once('/') {
            Some((GROUP, version)) => Self::from_version(version)
                .ok_or_else(|| ConversionError::UnsupportedVersion(api_version.to_string())),
            _ => Err(ConversionError::UnsupportedVersion(api_version.to_string())),
        }
    }

    fn from_version(version: &str) -> Option<Self> {
        match version {
            v1alpha1::VERSION => Some(ApiVersion::V1alpha1),
            v1alpha2::VERSION => Some(ApiVersion::V1alpha2),
            _ => None,
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.version())
    }
}

/// Accepts either the bare version or the group-qualified form.
impl FromStr for ApiVersion {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains('/') {
            Self::from_api_version(s)
        } else {
            Self::from_version(s).ok_or_else(|| ConversionError::UnsupportedVersion(s.to_string()))
        }
    }
}

/// Enums whose values are spelled identically in both versions convert by
/// matching variant names.
macro_rules! retag {
    ($name:ident { $($variant:ident),+ $(,)? }) => {
        impl From<v1alpha1::$name> for v1alpha2::$name {
            fn from(value: v1alpha1::$name) -> Self {
                match value {
                    $(v1alpha1::$name::$variant => Self::$variant,)+
                }
            }
        }

        impl From<v1alpha2::$name> for v1alpha1::$name {
            fn from(value: v1alpha2::$name) -> Self {
                match value {
                    $(v1alpha2::$name::$variant => Self::$variant,)+
                }
            }
        }
    };
}

retag!(DevboxState { Running, Pending, Stopped, Shutdown });
retag!(NetworkType { NodePort, Tailnet });
retag!(CommitStatus { Unset, Success, Failed, Unknown, Pending, Skipped });
retag!(DevboxPhase { Running, Pending, Stopped, Stopping, Shutdown, Shutting, Error, Unknown });
retag!(DevboxReleasePhase { Success, Pending, Failed });

/// Copy metadata, pointing owner references in our group at `target`.
fn retarget_metadata(metadata: &ObjectMeta, target: ApiVersion) -> ObjectMeta {
    let mut metadata = metadata.clone();
    for owner in metadata.owner_references.iter_mut().flatten() {
        if owner
            .api_version
            .split_once('/')
            .is_some_and(|(group, _)| group == GROUP)
        {
            owner.api_version = target.api_version();
        }
    }
    metadata
}

/// Storage limit for an upgraded object: annotation first, then the default.
#[must_use]
pub fn storage_limit_for(metadata: &ObjectMeta, options: &ConversionOptions) -> String {
    metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(ANNOTATION_STORAGE_LIMIT))
        .filter(|limit| !limit.is_empty())
        .cloned()
        .unwrap_or_else(|| options.default_storage_limit.clone())
}

/// Convert a v1alpha1 Devbox to v1alpha2 with default options
#[must_use]
pub fn upgrade_devbox(src: &v1alpha1::Devbox) -> v1alpha2::Devbox {
    upgrade_devbox_with(src, &ConversionOptions::default())
}

/// Convert a v1alpha1 Devbox to v1alpha2
///
/// A missing status is treated as an empty commit history, so the result
/// always carries a content record based on `spec.image`.
#[must_use]
pub fn upgrade_devbox_with(src: &v1alpha1::Devbox, options: &ConversionOptions) -> v1alpha2::Devbox {
    let status = src.status.clone().unwrap_or_default();
    let chain = commit_chain::reconstruct(&status.commit_history, &src.spec.image);

    v1alpha2::Devbox {
        metadata: retarget_metadata(&src.metadata, ApiVersion::V1alpha2),
        spec: v1alpha2::DevboxSpec {
            state: src.spec.state.into(),
            resource: src.spec.resource.clone(),
            image: src.spec.image.clone(),
            template_id: src.spec.template_id.clone(),
            config: src.spec.config.clone(),
            storage_limit: storage_limit_for(&src.metadata, options),
            network: v1alpha2::NetworkSpec {
                network_type: src.spec.network.network_type.into(),
                extra_ports: src.spec.network.extra_ports.clone(),
            },
            runtime_class_name: src.spec.runtime_class_name.clone(),
            node_selector: src.spec.node_selector.clone(),
            tolerations: src.spec.tolerations.clone(),
            affinity: src.spec.affinity.clone(),
        },
        status: Some(v1alpha2::DevboxStatus {
            content_id: chain.content_id,
            node: String::new(),
            state: src.spec.state.into(),
            commit_records: chain.records,
            phase: status.phase.into(),
            network: v1alpha2::NetworkStatus {
                network_type: status.network.network_type.into(),
                node_port: status.network.node_port,
                tailnet: status.network.tailnet,
            },
        }),
    }
}

/// Convert a v1alpha2 Devbox to v1alpha1
///
/// `storageLimit`, the content id and per-record timestamps other than the
/// commit time have no v1alpha1 field and are dropped. Container state
/// snapshots are left empty.
#[must_use]
pub fn downgrade_devbox(src: &v1alpha2::Devbox) -> v1alpha1::Devbox {
    let status = src.status.as_ref().map(|status| {
        let mut records: Vec<_> = status.commit_records.iter().collect();
        records.sort_by_key(|(_, record)| record.commit_time);

        v1alpha1::DevboxStatus {
            commit_history: records
                .into_iter()
                .map(|(container_id, record)| v1alpha1::CommitHistory {
                    container_id: container_id.clone(),
                    image: record.commit_image.clone(),
                    time: record.commit_time,
                    pod: String::new(),
                    node: record.node.clone(),
                    status: record.commit_status.into(),
                    predicated_status: record.commit_status.into(),
                })
                .collect(),
            phase: status.phase.into(),
            state: None,
            last_termination_state: None,
            network: v1alpha1::NetworkStatus {
                network_type: status.network.network_type.into(),
                node_port: status.network.node_port,
                tailnet: status.network.tailnet.clone(),
            },
        }
    });

    v1alpha1::Devbox {
        metadata: retarget_metadata(&src.metadata, ApiVersion::V1alpha1),
        spec: v1alpha1::DevboxSpec {
            state: src.spec.state.into(),
            resource: src.spec.resource.clone(),
            squash: false,
            image: src.spec.image.clone(),
            template_id: src.spec.template_id.clone(),
            config: src.spec.config.clone(),
            network: v1alpha1::NetworkSpec {
                network_type: src.spec.network.network_type.into(),
                extra_ports: src.spec.network.extra_ports.clone(),
            },
            runtime_class_name: src.spec.runtime_class_name.clone(),
            node_selector: src.spec.node_selector.clone(),
            tolerations: src.spec.tolerations.clone(),
            affinity: src.spec.affinity.clone(),
        },
        status,
    }
}

/// Convert a v1alpha1 DevBoxRelease to v1alpha2. Every field carries over.
#[must_use]
pub fn upgrade_release(src: &v1alpha1::DevBoxRelease) -> v1alpha2::DevBoxRelease {
    v1alpha2::DevBoxRelease {
        metadata: retarget_metadata(&src.metadata, ApiVersion::V1alpha2),
        spec: v1alpha2::DevBoxReleaseSpec {
            devbox_name: src.spec.devbox_name.clone(),
            new_tag: src.spec.new_tag.clone(),
            notes: src.spec.notes.clone(),
        },
        status: src.status.as_ref().map(|status| v1alpha2::DevBoxReleaseStatus {
            phase: status.phase.into(),
            original_image: status.original_image.clone(),
        }),
    }
}

/// Convert a v1alpha2 DevBoxRelease to v1alpha1
#[must_use]
pub fn downgrade_release(src: &v1alpha2::DevBoxRelease) -> v1alpha1::DevBoxRelease {
    v1alpha1::DevBoxRelease {
        metadata: retarget_metadata(&src.metadata, ApiVersion::V1alpha1),
        spec: v1alpha1::DevBoxReleaseSpec {
            devbox_name: src.spec.devbox_name.clone(),
            new_tag: src.spec.new_tag.clone(),
            notes: src.spec.notes.clone(),
        },
        status: src.status.as_ref().map(|status| v1alpha1::DevBoxReleaseStatus {
            phase: status.phase.into(),
            original_image: status.original_image.clone(),
        }),
    }
}

/// A Devbox in either served version
#[derive(Debug, Clone)]
pub enum DevboxVersion {
    /// Stored with a commit history
    V1alpha1(v1alpha1::Devbox),
    /// Stored with commit records
    V1alpha2(v1alpha2::Devbox),
}

impl DevboxVersion {
    /// Version of the held object
    #[must_use]
    pub fn version(&self) -> ApiVersion {
        match self {
            DevboxVersion::V1alpha1(_) => ApiVersion::V1alpha1,
            DevboxVersion::V1alpha2(_) => ApiVersion::V1alpha2,
        }
    }

    /// Upgrade to the hub version
    #[must_use]
    pub fn into_hub(self) -> v1alpha2::Devbox {
        match self {
            DevboxVersion::V1alpha1(devbox) => upgrade_devbox(&devbox),
            DevboxVersion::V1alpha2(devbox) => devbox,
        }
    }

    /// Convert to `target`; a no-op when already there.
    #[must_use]
    pub fn convert_to(self, target: ApiVersion) -> Self {
        if self.version() == target {
            return self;
        }
        match target {
            ApiVersion::V1alpha2 => DevboxVersion::V1alpha2(self.into_hub()),
            ApiVersion::V1alpha1 => DevboxVersion::V1alpha1(downgrade_devbox(&self.into_hub())),
        }
    }
}

/// A DevBoxRelease in either served version
#[derive(Debug, Clone)]
pub enum ReleaseVersion {
    /// Release at v1alpha1
    V1alpha1(v1alpha1::DevBoxRelease),
    /// Release at v1alpha2
    V1alpha2(v1alpha2::DevBoxRelease),
}

impl ReleaseVersion {
    /// Version of the held object
    #[must_use]
    pub fn version(&self) -> ApiVersion {
        match self {
            ReleaseVersion::V1alpha1(_) => ApiVersion::V1alpha1,
            ReleaseVersion::V1alpha2(_) => ApiVersion::V1alpha2,
        }
    }

    /// Upgrade to the hub version
    #[must_use]
    pub fn into_hub(self) -> v1alpha2::DevBoxRelease {
        match self {
            ReleaseVersion::V1alpha1(release) => upgrade_release(&release),
            ReleaseVersion::V1alpha2(release) => release,
        }
    }

    /// Convert to `target`; a no-op when already there.
    #[must_use]
    pub fn convert_to(self, target: ApiVersion) -> Self {
        if self.version() == target {
            return self;
        }
        match target {
            ApiVersion::V1alpha2 => ReleaseVersion::V1alpha2(self.into_hub()),
            ApiVersion::V1alpha1 => ReleaseVersion::V1alpha1(downgrade_release(&self.into_hub())),
        }
    }
}

/// Any object this crate can convert
#[derive(Debug, Clone)]
pub enum VersionedObject {
    /// A Devbox
    Devbox(DevboxVersion),
    /// A DevBoxRelease
    Release(ReleaseVersion),
}

impl VersionedObject {
    /// Decode an untyped object, dispatching on its `kind` and `apiVersion`.
    pub fn from_value(value: Value) -> Result<Self, ConversionError> {
        let api_version = value
            .get("apiVersion")
            .and_then(Value::as_str)
            .ok_or(ConversionError::MissingTypeMeta("apiVersion"))?;
        let version = ApiVersion::from_api_version(api_version)?;
        let kind = value
            .get("kind")
            .and_then(Value::as_str)
            .ok_or(ConversionError::MissingTypeMeta("kind"))?
            .to_string();

        match (kind.as_str(), version) {
            (DEVBOX_KIND, ApiVersion::V1alpha1) => {
                Ok(Self::Devbox(DevboxVersion::V1alpha1(decode(&kind, value)?)))
            }
            (DEVBOX_KIND, ApiVersion::V1alpha2) => {
                Ok(Self::Devbox(DevboxVersion::V1alpha2(decode(&kind, value)?)))
            }
            (RELEASE_KIND, ApiVersion::V1alpha1) => {
                Ok(Self::Release(ReleaseVersion::V1alpha1(decode(&kind, value)?)))
            }
            (RELEASE_KIND, ApiVersion::V1alpha2) => {
                Ok(Self::Release(ReleaseVersion::V1alpha2(decode(&kind, value)?)))
            }
            _ => Err(ConversionError::UnsupportedKind(kind)),
        }
    }

    /// Version of the held object
    #[must_use]
    pub fn version(&self) -> ApiVersion {
        match self {
            VersionedObject::Devbox(devbox) => devbox.version(),
            VersionedObject::Release(release) => release.version(),
        }
    }

    /// Convert to `target` through the hub
    #[must_use]
    pub fn convert_to(self, target: ApiVersion) -> Self {
        match self {
            VersionedObject::Devbox(devbox) => VersionedObject::Devbox(devbox.convert_to(target)),
            VersionedObject::Release(release) => {
                VersionedObject::Release(release.convert_to(target))
            }
        }
    }

    /// Encode back to an untyped object
    pub fn into_value(self) -> Result<Value, ConversionError> {
        let value = match self {
            VersionedObject::Devbox(DevboxVersion::V1alpha1(devbox)) => serde_json::to_value(devbox),
            VersionedObject::Devbox(DevboxVersion::V1alpha2(devbox)) => serde_json::to_value(devbox),
            VersionedObject::Release(ReleaseVersion::V1alpha1(release)) => {
                serde_json::to_value(release)
            }
            VersionedObject::Release(ReleaseVersion::V1alpha2(release)) => {
                serde_json::to_value(release)
            }
        }?;
        Ok(value)
    }
}

fn decode<K: DeserializeOwned>(kind: &str, value: Value) -> Result<K, ConversionError> {
    serde_json::from_value(value).map_err(|source| ConversionError::Decode {
        kind: kind.to_string(),
        source,
    })
}

/// Convert an untyped Devbox or DevBoxRelease to `target_api_version`
/// (bare or group-qualified).
pub fn convert_value(value: Value, target_api_version: &str) -> Result<Value, ConversionError> {
    let target: ApiVersion = target_api_version.parse()?;
    VersionedObject::from_value(value)?
        .convert_to(target)
        .into_value()
}

#[cfg(test)]
#[path = "conversion_test.rs"]
mod tests;
