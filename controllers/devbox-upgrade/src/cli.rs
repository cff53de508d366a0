//! Command-line interface
//!
//! Every flag can also be set through a `DEVBOX_UPGRADE_*` environment
//! variable.

use crate::config::{KindFilter, UpgradeConfig};
use crate::phases::Phase;
use crate::status::OutputFormat;
use clap::{Args, Parser, Subcommand, ValueEnum};
use devbox_crds::ApiVersion;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "devbox-upgrade", version, about = "Migrate Devbox resources from v1alpha1 to v1alpha2 storage")]
pub struct Cli {
    /// Log intended changes without making them
    #[arg(long, global = true, env = "DEVBOX_UPGRADE_DRY_RUN")]
    pub dry_run: bool,

    /// Only touch resources in this namespace
    #[arg(short, long, global = true, env = "DEVBOX_UPGRADE_NAMESPACE")]
    pub namespace: Option<String>,

    /// Directory for backups and the batch-state file
    #[arg(long, global = true, env = "DEVBOX_UPGRADE_BACKUP_DIR", default_value = "./backup")]
    pub backup_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the upgrade phases in order
    Run(RunArgs),
    /// Back up resources, schemas and devbox states
    Backup(KindArgs),
    /// Stop running devboxes once their commits have finished
    Pause(PauseArgs),
    /// Apply, disable or inspect the schema definitions
    Crd(CrdArgs),
    /// Rewrite every resource at the new storage version
    Transform(TransformArgs),
    /// Stop serving v1alpha1 and drop it from the stored versions
    Finalize(KindArgs),
    /// Put devbox states back from a backup
    Restore(RestoreArgs),
    /// Show the upgrade state of devboxes
    Status(StatusArgs),
    /// Remove upgrade annotations from devboxes, keeping the original state
    Clear(ClearArgs),
}

#[derive(Debug, Clone, Args)]
pub struct KindArgs {
    /// Only process Devbox resources
    #[arg(long, conflicts_with = "only_releases", env = "DEVBOX_UPGRADE_ONLY_DEVBOXES")]
    pub only_devboxes: bool,

    /// Only process DevBoxRelease resources
    #[arg(long, env = "DEVBOX_UPGRADE_ONLY_RELEASES")]
    pub only_releases: bool,
}

impl KindArgs {
    fn filter(&self) -> KindFilter {
        KindFilter::from_flags(self.only_devboxes, self.only_releases)
    }
}

#[derive(Debug, Clone, Args)]
pub struct SchemaArgs {
    /// Directory holding the v1alpha2 schema definitions
    #[arg(long, env = "DEVBOX_UPGRADE_CRD_DIR", default_value = "./scripts/manifests")]
    pub crd_dir: PathBuf,

    /// Do not wait for applied schemas to become established
    #[arg(long, env = "DEVBOX_UPGRADE_NO_WAIT")]
    pub no_wait: bool,
}

#[derive(Debug, Clone, Args)]
pub struct PauseArgs {
    #[command(flatten)]
    pub kinds: KindArgs,

    /// Seconds to wait for pending commits of one devbox
    #[arg(long, env = "DEVBOX_UPGRADE_COMMIT_TIMEOUT", default_value_t = 300)]
    pub commit_timeout_secs: u64,
}

#[derive(Debug, Clone, Args)]
pub struct TransformArgs {
    #[command(flatten)]
    pub kinds: KindArgs,

    /// Resources per batch
    #[arg(long, env = "DEVBOX_UPGRADE_BATCH_SIZE", default_value_t = 10)]
    pub batch_size: usize,

    /// Milliseconds between batches
    #[arg(long, env = "DEVBOX_UPGRADE_BATCH_DELAY_MS", default_value_t = 1000)]
    pub batch_delay_ms: u64,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub transform: TransformArgs,

    #[command(flatten)]
    pub schema: SchemaArgs,

    /// Seconds to wait for pending commits of one devbox
    #[arg(long, env = "DEVBOX_UPGRADE_COMMIT_TIMEOUT", default_value_t = 300)]
    pub commit_timeout_secs: u64,

    #[arg(long, env = "DEVBOX_UPGRADE_SKIP_BACKUP")]
    pub skip_backup: bool,

    #[arg(long, env = "DEVBOX_UPGRADE_SKIP_PAUSE")]
    pub skip_pause: bool,

    /// Run a single phase
    #[arg(long, value_enum, env = "DEVBOX_UPGRADE_ONLY_PHASE")]
    pub only: Option<PhaseArg>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PhaseArg {
    Backup,
    Pause,
    Crd,
    Transform,
    Finalize,
}

impl From<PhaseArg> for Phase {
    fn from(arg: PhaseArg) -> Self {
        match arg {
            PhaseArg::Backup => Phase::Backup,
            PhaseArg::Pause => Phase::Pause,
            PhaseArg::Crd => Phase::SchemaUpdate,
            PhaseArg::Transform => Phase::Transform,
            PhaseArg::Finalize => Phase::Finalize,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CrdAction {
    /// Apply the v1alpha2 definitions
    #[default]
    Apply,
    /// Stop serving v1alpha1
    DisableOldVersions,
    /// Show served, storage and stored versions
    CheckStatus,
}

#[derive(Debug, Clone, Args)]
pub struct CrdArgs {
    #[arg(long, value_enum, default_value_t = CrdAction::Apply, env = "DEVBOX_UPGRADE_CRD_ACTION")]
    pub action: CrdAction,

    #[command(flatten)]
    pub schema: SchemaArgs,

    #[command(flatten)]
    pub kinds: KindArgs,
}

#[derive(Debug, Clone, Args)]
pub struct RestoreArgs {
    /// Batch-state file; defaults to the one in the backup directory
    #[arg(long, env = "DEVBOX_UPGRADE_BACKUP_STATES")]
    pub backup_states: Option<PathBuf>,

    /// Restore only the devboxes of this operation
    #[arg(long, env = "DEVBOX_UPGRADE_OPERATION_ID")]
    pub operation_id: Option<String>,

    /// Restore at most this many devboxes
    #[arg(long, env = "DEVBOX_UPGRADE_LIMIT")]
    pub limit: Option<usize>,

    /// Continue past devboxes that fail to restore
    #[arg(long, env = "DEVBOX_UPGRADE_FORCE")]
    pub force: bool,

    /// Version to read and write devboxes at
    #[arg(long, default_value = "v1alpha1", env = "DEVBOX_UPGRADE_API_VERSION")]
    pub api_version: ApiVersion,
}

#[derive(Debug, Clone, Args)]
pub struct StatusArgs {
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,

    /// Only devboxes whose upgrade is pending or in progress
    #[arg(long, conflicts_with = "only_failed")]
    pub only_upgrading: bool,

    /// Only devboxes whose upgrade failed
    #[arg(long)]
    pub only_failed: bool,

    /// Include devboxes the upgrade never touched
    #[arg(long)]
    pub all: bool,

    /// Only this devbox
    #[arg(long)]
    pub devbox: Option<String>,

    /// Version to read devboxes at
    #[arg(long, default_value = "v1alpha2", env = "DEVBOX_UPGRADE_API_VERSION")]
    pub api_version: ApiVersion,
}

#[derive(Debug, Clone, Args)]
pub struct ClearArgs {
    /// Only this devbox
    #[arg(long)]
    pub devbox: Option<String>,

    /// Only devboxes whose upgrade failed
    #[arg(long)]
    pub only_failed: bool,

    /// Version to read and write devboxes at
    #[arg(long, default_value = "v1alpha2", env = "DEVBOX_UPGRADE_API_VERSION")]
    pub api_version: ApiVersion,
}

impl Cli {
    /// Fold the global flags and the subcommand's own flags into a config
    #[must_use]
    pub fn config(&self) -> UpgradeConfig {
        let mut config = UpgradeConfig {
            namespace: self.namespace.clone(),
            dry_run: self.dry_run,
            backup_dir: self.backup_dir.clone(),
            ..UpgradeConfig::default()
        };
        match &self.command {
            Command::Run(args) => {
                apply_transform(&mut config, &args.transform);
                apply_schema(&mut config, &args.schema);
                config.commit_timeout = Duration::from_secs(args.commit_timeout_secs);
            }
            Command::Backup(kinds) | Command::Finalize(kinds) => config.kinds = kinds.filter(),
            Command::Pause(args) => {
                config.kinds = args.kinds.filter();
                config.commit_timeout = Duration::from_secs(args.commit_timeout_secs);
            }
            Command::Crd(args) => {
                config.kinds = args.kinds.filter();
                apply_schema(&mut config, &args.schema);
            }
            Command::Transform(args) => apply_transform(&mut config, args),
            Command::Restore(_) | Command::Status(_) | Command::Clear(_) => {}
        }
        config
    }
}

fn apply_transform(config: &mut UpgradeConfig, args: &TransformArgs) {
    config.kinds = args.kinds.filter();
    config.batch_size = args.batch_size;
    config.batch_delay = Duration::from_millis(args.batch_delay_ms);
}

fn apply_schema(config: &mut UpgradeConfig, args: &SchemaArgs) {
    config.crd_dir = args.crd_dir.clone();
    config.wait_for_schema = !args.no_wait;
}
