//! Schema update phase
//!
//! Applies the new definition of each kind, serving both versions with
//! v1alpha2 as the storage version, then waits for the API server to report
//! it `Established`. Definitions are read from the manifest directory and a
//! missing file is a configuration error: the released manifests carry the
//! conversion webhook, which the definition generated from the typed
//! resources lacks.

use super::{PhaseContext, PhaseReport};
use crate::error::{io, UpgradeError};
use devbox_crds::KindSchema;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use resource_store::{is_established, ResourceStore};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};

/// Apply the new definitions
pub async fn run<S: ResourceStore>(ctx: &PhaseContext<'_, S>) -> Result<PhaseReport, UpgradeError> {
    let mut report = PhaseReport::default();
    for schema in ctx.kinds() {
        ctx.check_cancelled()?;
        let crd = load_definition(&ctx.config.crd_dir, schema)?;
        let name = schema.crd_name();

        if ctx.config.dry_run {
            info!(
                "DRY-RUN: would apply schema {} with storage version {}",
                name,
                schema.new_version.version()
            );
            report.processed += 1;
            continue;
        }

        apply(ctx.store, crd).await?;
        info!("Applied schema {}", name);
        if ctx.config.wait_for_schema {
            wait_established(ctx, &name).await?;
        }
        report.processed += 1;
    }
    Ok(report)
}

/// Read `<crd-dir>/<manifest file>`
pub fn load_definition(
    crd_dir: &Path,
    schema: &KindSchema,
) -> Result<CustomResourceDefinition, UpgradeError> {
    let path = crd_dir.join(schema.manifest_file);
    if !path.exists() {
        return Err(UpgradeError::InvalidConfig(format!(
            "{} definition not found at {}",
            schema.kind,
            path.display()
        )));
    }

    let raw = std::fs::read_to_string(&path).map_err(|e| io(&path, e))?;
    let crd: CustomResourceDefinition = serde_yaml::from_str(&raw)?;
    let expected = schema.crd_name();
    if crd.metadata.name.as_deref() != Some(expected.as_str()) {
        return Err(UpgradeError::InvalidConfig(format!(
            "{} defines {:?}, expected {}",
            path.display(),
            crd.metadata.name,
            expected
        )));
    }
    Ok(crd)
}

/// Create the schema, or replace it if it exists
pub async fn apply<S: ResourceStore>(
    store: &S,
    mut crd: CustomResourceDefinition,
) -> Result<CustomResourceDefinition, UpgradeError> {
    let name = crd.metadata.name.clone().unwrap_or_default();
    match store.get_schema(&name).await {
        Ok(existing) => {
            crd.metadata.resource_version = existing.metadata.resource_version;
            Ok(store.update_schema(&crd).await?)
        }
        Err(e) if e.is_not_found() => Ok(store.create_schema(&crd).await?),
        Err(e) => Err(e.into()),
    }
}

/// Poll the `Established` condition a bounded number of times
async fn wait_established<S: ResourceStore>(
    ctx: &PhaseContext<'_, S>,
    name: &str,
) -> Result<(), UpgradeError> {
    let attempts = ctx.config.schema_wait_attempts;
    let interval = ctx.config.schema_poll_interval;
    for attempt in 1..=attempts {
        if ctx.store.schema_established(name).await? {
            info!("Schema {} is established", name);
            return Ok(());
        }
        debug!("Schema {} not established yet (attempt {}/{})", name, attempt, attempts);
        tokio::time::sleep(interval).await;
    }
    Err(UpgradeError::Timeout {
        what: format!("schema {name} to be established"),
        elapsed: interval.saturating_mul(attempts),
    })
}

/// Stop serving the old version of each kind. The storage version is never
/// touched.
pub async fn disable_old_versions<S: ResourceStore>(
    ctx: &PhaseContext<'_, S>,
) -> Result<PhaseReport, UpgradeError> {
    let mut report = PhaseReport::default();
    for schema in ctx.kinds() {
        ctx.check_cancelled()?;
        let name = schema.crd_name();
        let old = schema.old_version.version();
        let mut crd = ctx.store.get_schema(&name).await?;

        let Some(version) = crd.spec.versions.iter_mut().find(|v| v.name == old) else {
            info!("Schema {} does not define {}, nothing to disable", name, old);
            report.skipped += 1;
            continue;
        };
        if version.storage {
            if ctx.config.dry_run {
                warn!("DRY-RUN: {} is still the storage version of {}, it would not be disabled", old, name);
                report.skipped += 1;
                continue;
            }
            return Err(UpgradeError::InvalidState(format!(
                "{old} is still the storage version of {name}"
            )));
        }
        if !version.served {
            info!("{} of {} is already not served", old, name);
            report.skipped += 1;
            continue;
        }

        if ctx.config.dry_run {
            info!("DRY-RUN: would stop serving {} of {}", old, name);
        } else {
            version.served = false;
            ctx.store.update_schema(&crd).await?;
            info!("Stopped serving {} of {}", old, name);
        }
        report.processed += 1;
    }
    Ok(report)
}

/// Versions and conditions of one installed schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaStatus {
    pub name: String,
    /// Served versions
    pub served: Vec<String>,
    pub storage: Option<String>,
    pub stored_versions: Vec<String>,
    pub established: bool,
}

/// Report the versions of each installed schema
pub async fn check_status<S: ResourceStore>(
    ctx: &PhaseContext<'_, S>,
) -> Result<Vec<SchemaStatus>, UpgradeError> {
    let mut statuses = Vec::new();
    for schema in ctx.kinds() {
        let crd = ctx.store.get_schema(&schema.crd_name()).await?;
        let status = SchemaStatus {
            name: schema.crd_name(),
            served: crd
                .spec
                .versions
                .iter()
                .filter(|v| v.served)
                .map(|v| v.name.clone())
                .collect(),
            storage: crd
                .spec
                .versions
                .iter()
                .find(|v| v.storage)
                .map(|v| v.name.clone()),
            stored_versions: crd
                .status
                .as_ref()
                .and_then(|s| s.stored_versions.clone())
                .unwrap_or_default(),
            established: is_established(&crd),
        };
        info!(
            "Schema {}: served {:?}, storage {}, stored {:?}, established {}",
            status.name,
            status.served,
            status.storage.as_deref().unwrap_or("-"),
            status.stored_versions,
            status.established
        );
        statuses.push(status);
    }
    Ok(statuses)
}

