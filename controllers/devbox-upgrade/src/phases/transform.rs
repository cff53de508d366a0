//! Transform phase
//!
//! Rewrites every object once so the API server re-encodes it at the new
//! storage version. The write is a marker annotation; its content does not
//! matter, only that an update goes through. The same write records the
//! transform progress annotations.
//!
//! Objects are written one at a time in batches. Any object that cannot be
//! written after retries aborts the phase.

use super::{object_key, PhaseContext, PhaseReport};
use crate::annotations::{apply_info, UpgradeInfo, UpgradeStatus, UpgradeStep};
use crate::backoff::retry_with_backoff;
use crate::error::UpgradeError;
use chrono::Utc;
use devbox_crds::{v1alpha2, ANNOTATION_STORAGE_UPGRADE};
use kube::ResourceExt;
use resource_store::{ResourceStore, StoreObject};
use tracing::info;

pub async fn run<S: ResourceStore>(ctx: &PhaseContext<'_, S>) -> Result<PhaseReport, UpgradeError> {
    let mut report = PhaseReport::default();
    if ctx.config.kinds.devboxes() {
        transform_kind::<S, v1alpha2::Devbox>(ctx, &mut report).await?;
    }
    if ctx.config.kinds.releases() {
        transform_kind::<S, v1alpha2::DevBoxRelease>(ctx, &mut report).await?;
    }
    Ok(report)
}

async fn transform_kind<S: ResourceStore, K: StoreObject>(
    ctx: &PhaseContext<'_, S>,
    report: &mut PhaseReport,
) -> Result<(), UpgradeError> {
    let kind = K::kind(&());
    let objects: Vec<K> = ctx.store.list(ctx.config.namespace()).await?;
    let total = objects.len();
    let batch_size = ctx.config.batch_size.max(1);
    info!(
        "Transforming {} {} object(s) in batches of {}",
        total, kind, batch_size
    );

    let mut done = 0;
    for (batch_index, batch) in objects.chunks(batch_size).enumerate() {
        if batch_index > 0 {
            ctx.pace(ctx.config.batch_delay).await;
        }
        info!("Processing {} batch {} ({} object(s))", kind, batch_index + 1, batch.len());

        for (item_index, object) in batch.iter().enumerate() {
            ctx.check_cancelled()?;
            if item_index > 0 {
                ctx.pace(ctx.config.item_delay).await;
                ctx.check_cancelled()?;
            }
            let (namespace, name) = object_key(object);
            done += 1;

            if ctx.config.dry_run {
                info!("DRY-RUN: would rewrite {} {}/{}", kind, namespace, name);
                report.processed += 1;
                continue;
            }

            let completed = UpgradeInfo::upgrade(
                ctx.operation_id,
                UpgradeStep::Transform,
                UpgradeStatus::Completed,
            )
            .with_progress(&format!("{done}/{total}"));
            if let Err(e) = touch::<S, K>(ctx, &namespace, &name, &completed).await {
                ctx.tracker()
                    .mark_best_effort::<K>(
                        &namespace,
                        &name,
                        &UpgradeInfo::upgrade(ctx.operation_id, UpgradeStep::Transform, UpgradeStatus::Failed)
                            .with_error(&e.to_string()),
                    )
                    .await;
                return Err(e);
            }
            info!("Rewrote {} {}/{} ({}/{})", kind, namespace, name, done, total);
            report.processed += 1;
        }
    }
    Ok(())
}

/// Stamp the storage-upgrade marker and `info` in one write, retrying
/// conflicts
async fn touch<S: ResourceStore, K: StoreObject>(
    ctx: &PhaseContext<'_, S>,
    namespace: &str,
    name: &str,
    info: &UpgradeInfo,
) -> Result<K, UpgradeError> {
    let operation = format!("rewrite {} {namespace}/{name}", K::kind(&()));
    retry_with_backoff(&ctx.config.retry, &operation, move || async move {
        let mut object: K = ctx.store.get(namespace, name).await?;
        object.annotations_mut().insert(
            ANNOTATION_STORAGE_UPGRADE.to_string(),
            format!("transform-{name}-{}", Utc::now().timestamp()),
        );
        apply_info(object.meta_mut(), info, Utc::now());
        Ok::<_, UpgradeError>(ctx.store.update(&object).await?)
    })
    .await
}
