//! # Restore
//!
//! Puts the desired state of each Devbox back to what the backup phase
//! recorded. Only `spec.state` is written; the rest of the object is left as
//! it is now. A Devbox already in its recorded state is skipped, so running
//! restore twice changes nothing the second time.

use crate::annotations::{ProgressTracker, UpgradeInfo, UpgradeStatus, UpgradeStep, RESTORE_VERSION};
use crate::backoff::retry_with_backoff;
use crate::backup::{load_states, BackupState};
use crate::config::UpgradeConfig;
use crate::error::UpgradeError;
use crate::workload::Workload;
use devbox_crds::{v1alpha1, v1alpha2, ApiVersion};
use resource_store::ResourceStore;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Batch-state file to read
    pub states_file: PathBuf,
    /// Restore only the entries of this operation
    pub operation_id: Option<String>,
    /// Restore at most this many entries
    pub limit: Option<usize>,
    /// Keep going past per-resource failures
    pub force: bool,
    /// Served version to read and write the Devboxes at
    pub api_version: ApiVersion,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub total: usize,
    pub restored: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum Outcome {
    Restored,
    Skipped,
}

pub async fn restore<S: ResourceStore>(
    store: &S,
    config: &UpgradeConfig,
    options: &RestoreOptions,
    cancel: &CancellationToken,
) -> Result<RestoreReport, UpgradeError> {
    let states = select_states(load_states(&options.states_file)?, options)?;
    info!(
        "Restoring {} devbox state(s) from {}",
        states.len(),
        options.states_file.display()
    );

    match options.api_version {
        ApiVersion::V1alpha1 => restore_as::<S, v1alpha1::Devbox>(store, config, options, cancel, &states).await,
        ApiVersion::V1alpha2 => restore_as::<S, v1alpha2::Devbox>(store, config, options, cancel, &states).await,
    }
}

/// Apply the operation filter and the limit
fn select_states(
    states: Vec<BackupState>,
    options: &RestoreOptions,
) -> Result<Vec<BackupState>, UpgradeError> {
    let mut selected: Vec<BackupState> = states
        .into_iter()
        .filter(|state| {
            options
                .operation_id
                .as_deref()
                .is_none_or(|id| state.operation_id == id)
        })
        .collect();
    if selected.is_empty() {
        return Err(UpgradeError::NoBackupStates(
            options.operation_id.clone().unwrap_or_else(|| "any".to_string()),
        ));
    }
    if let Some(limit) = options.limit {
        selected.truncate(limit);
    }
    Ok(selected)
}

async fn restore_as<S: ResourceStore, K: Workload>(
    store: &S,
    config: &UpgradeConfig,
    options: &RestoreOptions,
    cancel: &CancellationToken,
    states: &[BackupState],
) -> Result<RestoreReport, UpgradeError> {
    let mut report = RestoreReport {
        total: states.len(),
        ..Default::default()
    };

    for state in states {
        if cancel.is_cancelled() {
            return Err(UpgradeError::Cancelled);
        }
        match restore_one::<S, K>(store, config, state).await {
            Ok(Outcome::Restored) => report.restored += 1,
            Ok(Outcome::Skipped) => report.skipped += 1,
            Err(e) if options.force => {
                warn!(
                    "Failed to restore devbox {}/{}, continuing: {}",
                    state.namespace, state.name, e
                );
                report.failed += 1;
            }
            Err(e) => {
                error!("Failed to restore devbox {}/{}: {}", state.namespace, state.name, e);
                return Err(e);
            }
        }
    }

    info!(
        "Restore finished: {} restored, {} already matching, {} failed",
        report.restored, report.skipped, report.failed
    );
    if report.failed > 0 {
        return Err(UpgradeError::RestoreIncomplete {
            failed: report.failed,
            total: report.total,
        });
    }
    Ok(report)
}

async fn restore_one<S: ResourceStore, K: Workload>(
    store: &S,
    config: &UpgradeConfig,
    state: &BackupState,
) -> Result<Outcome, UpgradeError> {
    let namespace = state.namespace.as_str();
    let name = state.name.as_str();

    let current: K = match store.get(namespace, name).await {
        Ok(object) => object,
        Err(e) if e.is_not_found() => {
            warn!("Devbox {}/{} no longer exists, skipping", namespace, name);
            return Ok(Outcome::Skipped);
        }
        Err(e) => return Err(e.into()),
    };
    if current.desired_state() == state.state {
        info!(
            "Devbox {}/{} is already {}, skipping",
            namespace, name, state.state
        );
        return Ok(Outcome::Skipped);
    }

    if config.dry_run {
        info!(
            "DRY-RUN: would restore devbox {}/{} from {} to {}",
            namespace,
            name,
            current.desired_state(),
            state.state
        );
        return Ok(Outcome::Restored);
    }

    let target = state.state.as_str();
    let operation = format!("restore devbox {namespace}/{name}");
    retry_with_backoff(&config.retry, &operation, move || async move {
        let mut devbox: K = store.get(namespace, name).await?;
        devbox.set_desired_state(target)?;
        Ok::<_, UpgradeError>(store.update(&devbox).await?)
    })
    .await?;

    // The state is restored at this point; the tag only records it
    ProgressTracker::new(store)
        .mark_best_effort::<K>(
            namespace,
            name,
            &UpgradeInfo {
                operation_id: format!("restore-{}", state.operation_id),
                step: Some(UpgradeStep::Restore),
                status: Some(UpgradeStatus::RolledBack),
                version: RESTORE_VERSION.to_string(),
                ..Default::default()
            },
        )
        .await;

    info!("Restored devbox {}/{} to {}", namespace, name, state.state);
    Ok(Outcome::Restored)
}

#[cfg(test)]
#[path = "restore_test.rs"]
mod restore_test;
