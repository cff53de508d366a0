//! Upgrade phases
//!
//! Each phase is a free function over a [`PhaseContext`]. Phases run one
//! resource at a time and check for cancellation before starting the next
//! resource, so an interrupted run never leaves a write half-issued.

pub mod backup;
pub mod finalize;
pub mod pause;
pub mod schema;
pub mod transform;

use crate::annotations::ProgressTracker;
use crate::backup::BackupStore;
use crate::config::UpgradeConfig;
use crate::error::UpgradeError;
use chrono::Utc;
use devbox_crds::{KindSchema, SchemaRegistry};
use resource_store::ResourceStore;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One step of the upgrade, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Backup,
    Pause,
    SchemaUpdate,
    Transform,
    Finalize,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Backup,
        Phase::Pause,
        Phase::SchemaUpdate,
        Phase::Transform,
        Phase::Finalize,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Backup => "backup",
            Phase::Pause => "pause",
            Phase::SchemaUpdate => "schema-update",
            Phase::Transform => "transform",
            Phase::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a phase did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseReport {
    /// Resources (or schemas) acted on, or that would have been in dry-run
    pub processed: usize,
    /// Resources left alone
    pub skipped: usize,
}

/// Everything a phase needs, borrowed from the orchestrator
#[derive(Debug)]
pub struct PhaseContext<'a, S> {
    /// Store every read and write goes through
    pub store: &'a S,
    /// Kinds and versions being migrated
    pub registry: &'a SchemaRegistry,
    /// Run configuration
    pub config: &'a UpgradeConfig,
    /// Where backups are written
    pub backups: &'a BackupStore,
    /// Checked between resources
    pub cancel: &'a CancellationToken,
    /// Shared by every phase of one run
    pub operation_id: &'a str,
}

impl<'a, S: ResourceStore> PhaseContext<'a, S> {
    /// Progress tracker over the same store
    pub fn tracker(&self) -> ProgressTracker<'a, S> {
        ProgressTracker::new(self.store)
    }

    /// Fail with [`UpgradeError::Cancelled`] once cancellation was requested
    pub fn check_cancelled(&self) -> Result<(), UpgradeError> {
        if self.cancel.is_cancelled() {
            return Err(UpgradeError::Cancelled);
        }
        Ok(())
    }

    /// Pacing delay; returns early on cancellation
    pub async fn pace(&self, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = self.cancel.cancelled() => {}
        }
    }

    /// Registry kinds selected by the config
    pub fn kinds(&self) -> impl Iterator<Item = &'a KindSchema> + 'a {
        let filter = self.config.kinds;
        self.registry
            .kinds()
            .iter()
            .filter(move |schema| filter.includes(schema.kind))
    }
}

/// `upgrade-<unix seconds>-<8 hex>`
#[must_use]
pub fn new_operation_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("upgrade-{}-{}", Utc::now().timestamp(), &suffix[..8])
}

/// `namespace/name`
pub(crate) fn object_key<K: kube::Resource>(object: &K) -> (String, String) {
    let meta = object.meta();
    (
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}
