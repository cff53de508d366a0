//! Devbox Upgrade
//!
//! Moves Devbox and DevBoxRelease resources from v1alpha1 to v1alpha2
//! storage in five phases, each of which can also be run on its own:
//! - backup: snapshot resources, schemas and devbox states to disk
//! - pause: stop running devboxes once their commits have finished
//! - crd: apply the v1alpha2 schema definitions
//! - transform: rewrite every resource so it is stored at v1alpha2
//! - finalize: stop serving v1alpha1 and drop it from the stored versions
//!
//! `restore` puts devbox states back from a backup; `status` reports the
//! upgrade state recorded on each devbox.

mod annotations;
mod backoff;
mod backup;
mod cli;
mod config;
mod error;
mod orchestrator;
mod phases;
mod restore;
mod status;
mod workload;

#[cfg(test)]
mod test_utils;

use crate::cli::{Cli, Command, CrdAction};
use crate::error::UpgradeError;
use crate::orchestrator::{Orchestrator, PhasePlan};
use crate::phases::Phase;
use crate::restore::RestoreOptions;
use crate::status::StatusFilter;
use clap::Parser;
use devbox_crds::{v1alpha1, v1alpha2, ApiVersion, SchemaRegistry};
use resource_store::KubeStore;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube's rustls client needs a process-wide crypto provider
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("devbox-upgrade failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), UpgradeError> {
    let config = cli.config();
    config.validate()?;
    let store = KubeStore::try_default().await?;
    let registry = SchemaRegistry::devbox();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing the current resource before stopping");
            on_signal.cancel();
        }
    });

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace().unwrap_or("all namespaces"));
    info!("  Backup directory: {}", config.backup_dir.display());
    info!("  Dry run: {}", config.dry_run);

    let orchestrator = Orchestrator::new(&store, &registry, &config, cancel.clone());
    match &cli.command {
        Command::Run(args) => {
            let plan = PhasePlan::from_flags(args.skip_backup, args.skip_pause, args.only.map(Phase::from));
            let summary = orchestrator.run(&plan).await?;
            info!("Operation ID: {}", summary.operation_id);
        }
        Command::Backup(_) => {
            let summary = orchestrator.run(&PhasePlan::only(Phase::Backup)).await?;
            info!(
                "Backup written to {} under operation ID {}",
                config.backup_dir.display(),
                summary.operation_id
            );
        }
        Command::Pause(_) => {
            orchestrator.run(&PhasePlan::only(Phase::Pause)).await?;
        }
        Command::Crd(args) => match args.action {
            CrdAction::Apply => {
                orchestrator.run(&PhasePlan::only(Phase::SchemaUpdate)).await?;
            }
            CrdAction::DisableOldVersions => {
                orchestrator.disable_old_versions().await?;
            }
            CrdAction::CheckStatus => {
                orchestrator.schema_status().await?;
            }
        },
        Command::Transform(_) => {
            orchestrator.run(&PhasePlan::only(Phase::Transform)).await?;
        }
        Command::Finalize(_) => {
            orchestrator.run(&PhasePlan::only(Phase::Finalize)).await?;
        }
        Command::Restore(args) => {
            let options = RestoreOptions {
                states_file: args
                    .backup_states
                    .clone()
                    .unwrap_or_else(|| backup::BackupStore::new(&config.backup_dir).states_path()),
                operation_id: args.operation_id.clone(),
                limit: args.limit,
                force: args.force,
                api_version: args.api_version,
            };
            restore::restore(&store, &config, &options, &cancel).await?;
        }
        Command::Status(args) => {
            let filter = StatusFilter {
                all: args.all,
                only_upgrading: args.only_upgrading,
                only_failed: args.only_failed,
                devbox: args.devbox.clone(),
            };
            let rows = match args.api_version {
                ApiVersion::V1alpha1 => {
                    status::collect::<_, v1alpha1::Devbox>(&store, config.namespace(), &filter).await?
                }
                ApiVersion::V1alpha2 => {
                    status::collect::<_, v1alpha2::Devbox>(&store, config.namespace(), &filter).await?
                }
            };
            print!("{}", status::render(&rows, args.output)?);
        }
        Command::Clear(args) => {
            let filter = StatusFilter {
                only_failed: args.only_failed,
                devbox: args.devbox.clone(),
                ..StatusFilter::default()
            };
            let namespace = config.namespace();
            let cleared = match args.api_version {
                ApiVersion::V1alpha1 => {
                    status::clear::<_, v1alpha1::Devbox>(&store, namespace, &filter, config.dry_run).await?
                }
                ApiVersion::V1alpha2 => {
                    status::clear::<_, v1alpha2::Devbox>(&store, namespace, &filter, config.dry_run).await?
                }
            };
            info!("Cleared upgrade annotations of {} devbox(es)", cleared);
        }
    }
    Ok(())
}
