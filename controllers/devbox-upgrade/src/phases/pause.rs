//! Pause phase
//!
//! Stops every running Devbox so nothing commits while the storage version
//! changes. A Devbox with a commit in flight is waited on first, up to the
//! configured timeout. A timeout or a failed stop aborts the phase: the
//! remaining Devboxes are left untouched.

use super::{object_key, PhaseContext, PhaseReport};
use crate::annotations::{UpgradeField, UpgradeInfo, UpgradeStatus, UpgradeStep};
use crate::backoff::retry_with_backoff;
use crate::error::UpgradeError;
use crate::workload::{Workload, STATE_STOPPED};
use devbox_crds::v1alpha1::Devbox;
use resource_store::ResourceStore;
use tokio::time::Instant;
use tracing::{info, warn};

pub async fn run<S: ResourceStore>(ctx: &PhaseContext<'_, S>) -> Result<PhaseReport, UpgradeError> {
    let mut report = PhaseReport::default();
    if !ctx.config.kinds.devboxes() {
        return Ok(report);
    }

    let devboxes: Vec<Devbox> = ctx.store.list(ctx.config.namespace()).await?;
    info!("Pausing {} devbox(es)", devboxes.len());

    for devbox in devboxes {
        ctx.check_cancelled()?;
        let (namespace, name) = object_key(&devbox);
        let original_state = devbox.desired_state();

        if ctx.config.dry_run {
            if devbox.is_running() {
                info!("DRY-RUN: would stop devbox {}/{}", namespace, name);
            } else {
                info!("DRY-RUN: would mark devbox {}/{} as paused", namespace, name);
            }
            report.processed += 1;
            continue;
        }

        if devbox.is_running() {
            pause_running(ctx, &namespace, &name, original_state).await?;
        } else {
            ctx.tracker()
                .set_info::<Devbox>(
                    &namespace,
                    &name,
                    &pause_info(ctx, UpgradeStatus::Paused).with_original_state(original_state),
                )
                .await?;
            info!("Devbox {}/{} is {}, marked paused", namespace, name, original_state);
        }
        report.processed += 1;
        ctx.pace(ctx.config.item_delay).await;
    }

    Ok(report)
}

fn pause_info<S>(ctx: &PhaseContext<'_, S>, status: UpgradeStatus) -> UpgradeInfo {
    UpgradeInfo::upgrade(ctx.operation_id, UpgradeStep::Pause, status)
}

async fn pause_running<S: ResourceStore>(
    ctx: &PhaseContext<'_, S>,
    namespace: &str,
    name: &str,
    original_state: &str,
) -> Result<(), UpgradeError> {
    let tracker = ctx.tracker();
    tracker
        .set_info::<Devbox>(
            namespace,
            name,
            &pause_info(ctx, UpgradeStatus::InProgress).with_original_state(original_state),
        )
        .await?;

    if let Err(e) = wait_for_commits(ctx, namespace, name).await {
        tracker
            .mark_best_effort::<Devbox>(
                namespace,
                name,
                &pause_info(ctx, UpgradeStatus::Failed).with_error(&e.to_string()),
            )
            .await;
        return Err(e);
    }

    let operation = format!("stop devbox {namespace}/{name}");
    let stopped = retry_with_backoff(&ctx.config.retry, &operation, move || async move {
        let mut devbox: Devbox = ctx.store.get(namespace, name).await?;
        devbox.set_desired_state(STATE_STOPPED)?;
        Ok::<_, UpgradeError>(ctx.store.update(&devbox).await?)
    })
    .await;
    if let Err(e) = stopped {
        tracker
            .mark_best_effort::<Devbox>(
                namespace,
                name,
                &pause_info(ctx, UpgradeStatus::Failed).with_error(&e.to_string()),
            )
            .await;
        return Err(e);
    }

    tracker
        .set_info::<Devbox>(namespace, name, &pause_info(ctx, UpgradeStatus::Paused))
        .await?;
    info!("Stopped devbox {}/{}", namespace, name);
    Ok(())
}

/// Poll until no commit is pending, or fail with a timeout
async fn wait_for_commits<S: ResourceStore>(
    ctx: &PhaseContext<'_, S>,
    namespace: &str,
    name: &str,
) -> Result<(), UpgradeError> {
    let timeout = ctx.config.commit_timeout;
    let started = Instant::now();
    let mut recorded = false;
    loop {
        let devbox: Devbox = ctx.store.get(namespace, name).await?;
        if !Workload::has_pending_commit(&devbox) {
            return Ok(());
        }
        if !recorded {
            ctx.tracker()
                .update_field::<Devbox>(namespace, name, UpgradeField::Progress, "waiting-for-commits")
                .await?;
            recorded = true;
        }
        let elapsed = started.elapsed();
        if elapsed >= timeout {
            warn!(
                "Devbox {}/{} still has pending commits after {:?}",
                namespace, name, elapsed
            );
            return Err(UpgradeError::Timeout {
                what: format!("pending commits of devbox {namespace}/{name}"),
                elapsed,
            });
        }
        info!("Devbox {}/{} has pending commits, waiting", namespace, name);
        tokio::time::sleep(ctx.config.commit_poll_interval.min(timeout - elapsed)).await;
    }
}
