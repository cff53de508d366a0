//! Finalize phase
//!
//! Stops serving v1alpha1 and drops it from `status.storedVersions`, after
//! which the API server no longer needs to decode it. Refuses to run while
//! v1alpha1 is still the storage version of a kind.

use super::{schema, PhaseContext, PhaseReport};
use crate::error::UpgradeError;
use resource_store::ResourceStore;
use tracing::{info, warn};

pub async fn run<S: ResourceStore>(ctx: &PhaseContext<'_, S>) -> Result<PhaseReport, UpgradeError> {
    let mut report = schema::disable_old_versions(ctx).await?;

    for kind in ctx.kinds() {
        ctx.check_cancelled()?;
        let name = kind.crd_name();
        let old = kind.old_version.version();
        let crd = ctx.store.get_schema(&name).await?;

        let stored = crd
            .status
            .as_ref()
            .and_then(|status| status.stored_versions.clone())
            .unwrap_or_default();
        if !stored.iter().any(|v| v == old) {
            info!("{} is not a stored version of {}", old, name);
            continue;
        }
        let remaining: Vec<String> = stored.into_iter().filter(|v| v != old).collect();
        if remaining.is_empty() {
            if ctx.config.dry_run {
                warn!("DRY-RUN: {} has no stored version besides {}, it would not be finalized", name, old);
                report.skipped += 1;
                continue;
            }
            return Err(UpgradeError::InvalidState(format!(
                "{name} would be left without a stored version"
            )));
        }

        if ctx.config.dry_run {
            info!("DRY-RUN: would set stored versions of {} to {:?}", name, remaining);
        } else {
            ctx.store.set_stored_versions(&name, &remaining).await?;
            info!("Stored versions of {} are now {:?}", name, remaining);
        }
        report.processed += 1;
    }
    Ok(report)
}
