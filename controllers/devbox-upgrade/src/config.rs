//! Upgrade configuration
//!
//! Folded from the command line once in `main` and passed by reference to
//! every phase.

use crate::backoff::RetryPolicy;
use crate::error::UpgradeError;
use std::path::PathBuf;
use std::time::Duration;

/// Which of the two migrated kinds a run touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KindFilter {
    #[default]
    All,
    DevboxesOnly,
    ReleasesOnly,
}

impl KindFilter {
    #[must_use]
    pub fn from_flags(only_devboxes: bool, only_releases: bool) -> Self {
        match (only_devboxes, only_releases) {
            (true, false) => KindFilter::DevboxesOnly,
            (false, true) => KindFilter::ReleasesOnly,
            _ => KindFilter::All,
        }
    }

    #[must_use]
    pub fn devboxes(self) -> bool {
        self != KindFilter::ReleasesOnly
    }

    #[must_use]
    pub fn releases(self) -> bool {
        self != KindFilter::DevboxesOnly
    }

    /// Whether the registry kind `kind` is selected
    #[must_use]
    pub fn includes(self, kind: &str) -> bool {
        match kind {
            devbox_crds::DEVBOX_KIND => self.devboxes(),
            devbox_crds::RELEASE_KIND => self.releases(),
            _ => false,
        }
    }
}

/// Settings shared by every phase
#[derive(Debug, Clone)]
pub struct UpgradeConfig {
    /// Restrict to one namespace; all namespaces when `None`
    pub namespace: Option<String>,
    /// Log intended mutations instead of performing them
    pub dry_run: bool,
    /// Where backups and the batch-state file live
    pub backup_dir: PathBuf,
    /// Directory holding the new schema definitions
    pub crd_dir: PathBuf,
    /// Block until applied schemas report `Established`
    pub wait_for_schema: bool,
    /// Kinds the phases act on
    pub kinds: KindFilter,

    /// Objects per transform batch
    pub batch_size: usize,
    /// Pause between transform batches
    pub batch_delay: Duration,
    /// Pause between writes within a batch
    pub item_delay: Duration,

    /// Longest wait for a devbox's commits to finish
    pub commit_timeout: Duration,
    /// How often pending commits are re-read
    pub commit_poll_interval: Duration,

    /// How many times `Established` is polled
    pub schema_wait_attempts: u32,
    /// Pause between `Established` polls
    pub schema_poll_interval: Duration,

    /// Retry policy for conflicting writes
    pub retry: RetryPolicy,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            dry_run: false,
            backup_dir: PathBuf::from("./backup"),
            crd_dir: PathBuf::from("./scripts/manifests"),
            wait_for_schema: true,
            kinds: KindFilter::All,
            batch_size: 10,
            batch_delay: Duration::from_secs(1),
            item_delay: Duration::from_millis(100),
            commit_timeout: Duration::from_secs(5 * 60),
            commit_poll_interval: Duration::from_secs(10),
            schema_wait_attempts: 60,
            schema_poll_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }
}

impl UpgradeConfig {
    /// Reject values no phase can work with
    pub fn validate(&self) -> Result<(), UpgradeError> {
        if self.batch_size == 0 {
            return Err(UpgradeError::InvalidConfig(
                "batch size must be at least 1".to_string(),
            ));
        }
        if self.commit_poll_interval.is_zero() {
            return Err(UpgradeError::InvalidConfig(
                "commit poll interval must be positive".to_string(),
            ));
        }
        if self.namespace.as_deref() == Some("") {
            return Err(UpgradeError::InvalidConfig(
                "namespace must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Namespace filter in the form the store takes
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}
