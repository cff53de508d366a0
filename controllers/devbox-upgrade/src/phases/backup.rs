//! Backup phase
//!
//! Snapshots the schema definitions, every Devbox and every release, and
//! records the state of each Devbox under the run's operation id. A kind
//! that is not installed is skipped with a warning.

use super::{object_key, PhaseContext, PhaseReport};
use crate::backup::BackupState;
use crate::error::UpgradeError;
use crate::workload::Workload;
use chrono::Utc;
use devbox_crds::v1alpha1;
use resource_store::{ResourceStore, StoreObject};
use tracing::{info, warn};

pub async fn run<S: ResourceStore>(ctx: &PhaseContext<'_, S>) -> Result<PhaseReport, UpgradeError> {
    let mut report = PhaseReport::default();
    if !ctx.config.dry_run {
        ctx.backups.ensure_dir()?;
    }

    for schema in ctx.kinds() {
        let name = schema.crd_name();
        match ctx.store.get_schema(&name).await {
            Ok(crd) => {
                if ctx.config.dry_run {
                    info!("DRY-RUN: would back up schema {}", name);
                } else {
                    let path = ctx.backups.save_schema(schema, &crd)?;
                    info!("Backed up schema {} to {}", name, path.display());
                }
            }
            Err(e) if e.is_not_found() => warn!("Schema {} not found, skipping its backup", name),
            Err(e) => return Err(e.into()),
        }
    }

    let mut states = Vec::new();
    if ctx.config.kinds.devboxes() {
        for devbox in list_or_skip::<S, v1alpha1::Devbox>(ctx).await? {
            ctx.check_cancelled()?;
            snapshot(ctx, &devbox)?;
            let (namespace, name) = object_key(&devbox);
            states.push(BackupState {
                name,
                namespace,
                state: devbox.desired_state().to_string(),
                phase: devbox.phase(),
                operation_id: ctx.operation_id.to_string(),
                backup_time: Utc::now(),
            });
            report.processed += 1;
        }
    }
    if ctx.config.kinds.releases() {
        for release in list_or_skip::<S, v1alpha1::DevBoxRelease>(ctx).await? {
            ctx.check_cancelled()?;
            snapshot(ctx, &release)?;
            report.processed += 1;
        }
    }

    if ctx.config.dry_run {
        info!(
            "DRY-RUN: would record {} devbox state(s) for operation {}",
            states.len(),
            ctx.operation_id
        );
    } else {
        let path = ctx.backups.record_states(&states)?;
        info!(
            "Recorded {} devbox state(s) for operation {} in {}",
            states.len(),
            ctx.operation_id,
            path.display()
        );
    }
    Ok(report)
}

async fn list_or_skip<S: ResourceStore, K: StoreObject>(
    ctx: &PhaseContext<'_, S>,
) -> Result<Vec<K>, UpgradeError> {
    match ctx.store.list::<K>(ctx.config.namespace()).await {
        Ok(objects) => Ok(objects),
        Err(e) if e.is_not_found() => {
            warn!("No {} resources to back up: {}", K::kind(&()), e);
            Ok(Vec::new())
        }
        Err(e) => Err(e.into()),
    }
}

fn snapshot<S, K: StoreObject>(ctx: &PhaseContext<'_, S>, object: &K) -> Result<(), UpgradeError> {
    let (namespace, name) = object_key(object);
    if ctx.config.dry_run {
        info!("DRY-RUN: would back up {} {}/{}", K::kind(&()), namespace, name);
        return Ok(());
    }
    let path = ctx.backups.save_object(object)?;
    info!("Backed up {} {}/{} to {}", K::kind(&()), namespace, name, path.display());
    Ok(())
}
