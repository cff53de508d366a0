//! # Backup Files
//!
//! Everything the upgrade writes outside the cluster:
//!
//! - `<kind>_<namespace>_<name>.yaml`: one snapshot per resource, with the
//!   server-populated metadata removed so the file can be re-applied
//! - `<plural>_crd.yaml`: the schema definitions as found before the upgrade
//! - `devbox_backup_states.json`: the desired state and phase of every
//!   Devbox, per operation, read back by restore

use crate::error::{io, UpgradeError};
use chrono::{DateTime, Utc};
use devbox_crds::KindSchema;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use resource_store::StoreObject;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const BACKUP_STATES_FILE: &str = "devbox_backup_states.json";

/// Metadata the API server fills in; a snapshot carrying them cannot be
/// re-applied as-is
const SERVER_FIELDS: [&str; 5] = [
    "resourceVersion",
    "uid",
    "generation",
    "managedFields",
    "creationTimestamp",
];

/// Pre-upgrade state of one Devbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupState {
    pub name: String,
    pub namespace: String,
    /// `spec.state` at backup time
    pub state: String,
    /// `status.phase` at backup time
    pub phase: String,
    pub operation_id: String,
    pub backup_time: DateTime<Utc>,
}

/// A backup directory
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn states_path(&self) -> PathBuf {
        self.dir.join(BACKUP_STATES_FILE)
    }

    pub fn ensure_dir(&self) -> Result<(), UpgradeError> {
        fs::create_dir_all(&self.dir).map_err(|e| io(&self.dir, e))
    }

    /// Snapshot one resource
    pub fn save_object<K: StoreObject>(&self, object: &K) -> Result<PathBuf, UpgradeError> {
        let meta = object.meta();
        let file = format!(
            "{}_{}_{}.yaml",
            K::kind(&()).to_lowercase(),
            meta.namespace.as_deref().unwrap_or_default(),
            meta.name.as_deref().unwrap_or_default()
        );
        let mut value = serde_json::to_value(object)?;
        strip_server_fields(&mut value);
        self.write_yaml(&file, &value)
    }

    /// Snapshot a schema definition
    pub fn save_schema(
        &self,
        schema: &KindSchema,
        crd: &CustomResourceDefinition,
    ) -> Result<PathBuf, UpgradeError> {
        let mut value = serde_json::to_value(crd)?;
        strip_server_fields(&mut value);
        self.write_yaml(&schema.crd_backup_file(), &value)
    }

    fn write_yaml(&self, file: &str, value: &Value) -> Result<PathBuf, UpgradeError> {
        let path = self.dir.join(file);
        fs::write(&path, serde_yaml::to_string(value)?).map_err(|e| io(&path, e))?;
        debug!("Wrote backup {}", path.display());
        Ok(path)
    }

    /// Record the states of one operation. Entries of other operations are
    /// kept; earlier entries of the same operation are replaced.
    pub fn record_states(&self, states: &[BackupState]) -> Result<PathBuf, UpgradeError> {
        let path = self.states_path();
        let mut all = if path.exists() {
            load_states(&path)?
        } else {
            Vec::new()
        };
        all.retain(|existing| !states.iter().any(|s| s.operation_id == existing.operation_id));
        all.extend_from_slice(states);
        fs::write(&path, serde_json::to_string_pretty(&all)?).map_err(|e| io(&path, e))?;
        Ok(path)
    }
}

/// Read a batch-state file
pub fn load_states(path: &Path) -> Result<Vec<BackupState>, UpgradeError> {
    let raw = fs::read_to_string(path).map_err(|e| io(path, e))?;
    Ok(serde_json::from_str(&raw)?)
}

fn strip_server_fields(value: &mut Value) {
    if let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        for field in SERVER_FIELDS {
            metadata.remove(field);
        }
    }
}
