//! # Upgrade Orchestrator
//!
//! Runs the phases of a [`PhasePlan`] in order under one operation id:
//!
//! ```text
//! backup -> pause -> schema-update -> transform -> finalize
//! ```
//!
//! A failing phase stops the run; later phases are not entered. Cancellation
//! is checked before each phase and, inside the phases, before each resource.

use crate::backup::BackupStore;
use crate::config::UpgradeConfig;
use crate::error::UpgradeError;
use crate::phases::schema::SchemaStatus;
use crate::phases::{self, new_operation_id, Phase, PhaseContext, PhaseReport};
use devbox_crds::SchemaRegistry;
use resource_store::ResourceStore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Which phases a run executes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhasePlan {
    phases: Vec<Phase>,
}

impl PhasePlan {
    /// All five phases
    #[must_use]
    pub fn full() -> Self {
        Self {
            phases: Phase::ALL.to_vec(),
        }
    }

    #[must_use]
    pub fn only(phase: Phase) -> Self {
        Self {
            phases: vec![phase],
        }
    }

    /// Plan from the run flags. `only` wins over the skip flags.
    #[must_use]
    pub fn from_flags(skip_backup: bool, skip_pause: bool, only: Option<Phase>) -> Self {
        if let Some(phase) = only {
            return Self::only(phase);
        }
        let mut plan = Self::full();
        plan.phases.retain(|phase| match phase {
            Phase::Backup => !skip_backup,
            Phase::Pause => !skip_pause,
            _ => true,
        });
        plan
    }

    #[must_use]
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub operation_id: String,
    pub phases: Vec<(Phase, PhaseReport)>,
}

#[derive(Debug)]
pub struct Orchestrator<'a, S> {
    store: &'a S,
    registry: &'a SchemaRegistry,
    config: &'a UpgradeConfig,
    cancel: CancellationToken,
}

impl<'a, S: ResourceStore> Orchestrator<'a, S> {
    pub fn new(
        store: &'a S,
        registry: &'a SchemaRegistry,
        config: &'a UpgradeConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            cancel,
        }
    }

    /// Run `plan` under a fresh operation id
    pub async fn run(&self, plan: &PhasePlan) -> Result<RunSummary, UpgradeError> {
        self.run_with_operation_id(plan, &new_operation_id()).await
    }

    pub async fn run_with_operation_id(
        &self,
        plan: &PhasePlan,
        operation_id: &str,
    ) -> Result<RunSummary, UpgradeError> {
        self.config.validate()?;
        let backups = BackupStore::new(&self.config.backup_dir);
        let ctx = self.context(&backups, operation_id);

        info!(
            "Starting upgrade {} with phases {:?}{}",
            operation_id,
            plan.phases().iter().map(|p| p.as_str()).collect::<Vec<_>>(),
            if self.config.dry_run { " (dry-run)" } else { "" }
        );

        let mut summary = RunSummary {
            operation_id: operation_id.to_string(),
            phases: Vec::new(),
        };
        for &phase in plan.phases() {
            ctx.check_cancelled()?;
            info!("Phase {} starting", phase);
            let result = match phase {
                Phase::Backup => phases::backup::run(&ctx).await,
                Phase::Pause => phases::pause::run(&ctx).await,
                Phase::SchemaUpdate => phases::schema::run(&ctx).await,
                Phase::Transform => phases::transform::run(&ctx).await,
                Phase::Finalize => phases::finalize::run(&ctx).await,
            };
            match result {
                Ok(report) => {
                    info!(
                        "Phase {} completed: {} processed, {} skipped",
                        phase, report.processed, report.skipped
                    );
                    summary.phases.push((phase, report));
                }
                Err(e) => {
                    error!("Phase {} of upgrade {} failed: {}", phase, operation_id, e);
                    return Err(e);
                }
            }
        }

        info!("Upgrade {} finished", operation_id);
        Ok(summary)
    }

    /// Stop serving the old versions without touching stored versions
    pub async fn disable_old_versions(&self) -> Result<PhaseReport, UpgradeError> {
        let backups = BackupStore::new(&self.config.backup_dir);
        let operation_id = new_operation_id();
        phases::schema::disable_old_versions(&self.context(&backups, &operation_id)).await
    }

    /// Versions and conditions of the installed schemas
    pub async fn schema_status(&self) -> Result<Vec<SchemaStatus>, UpgradeError> {
        let backups = BackupStore::new(&self.config.backup_dir);
        let operation_id = new_operation_id();
        phases::schema::check_status(&self.context(&backups, &operation_id)).await
    }

    fn context<'b>(&'b self, backups: &'b BackupStore, operation_id: &'b str) -> PhaseContext<'b, S> {
        PhaseContext {
            store: self.store,
            registry: self.registry,
            config: self.config,
            backups,
            cancel: &self.cancel,
            operation_id,
        }
    }
}

#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod orchestrator_test;
