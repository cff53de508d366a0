//! Upgrade status report
//!
//! Lists Devboxes with the upgrade state recorded in their annotations.

use crate::annotations::{get_info, has_failed, is_in_progress, ProgressTracker, UpgradeInfo};
use crate::error::UpgradeError;
use crate::phases::object_key;
use crate::workload::Workload;
use clap::ValueEnum;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use resource_store::ResourceStore;
use serde::Serialize;
use std::fmt::Write;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

/// Which Devboxes to report
#[derive(Debug, Clone, Default)]
pub struct StatusFilter {
    /// Include Devboxes the upgrade never touched
    pub all: bool,
    /// Only Devboxes whose upgrade is pending or in progress
    pub only_upgrading: bool,
    /// Only Devboxes whose upgrade failed
    pub only_failed: bool,
    /// Only the Devbox with this name
    pub devbox: Option<String>,
}

impl StatusFilter {
    fn matches(&self, name: &str, meta: &ObjectMeta, info: &UpgradeInfo) -> bool {
        if self.devbox.as_deref().is_some_and(|wanted| wanted != name) {
            return false;
        }
        if self.only_upgrading {
            return is_in_progress(meta);
        }
        if self.only_failed {
            return has_failed(meta);
        }
        self.all || self.devbox.is_some() || !info.operation_id.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusRow {
    pub namespace: String,
    pub name: String,
    pub state: String,
    pub phase: String,
    pub upgrade: UpgradeInfo,
}

/// Collect the rows for Devboxes read at the version of `K`
pub async fn collect<S: ResourceStore, K: Workload>(
    store: &S,
    namespace: Option<&str>,
    filter: &StatusFilter,
) -> Result<Vec<StatusRow>, UpgradeError> {
    let devboxes: Vec<K> = store.list(namespace).await?;
    let rows = devboxes
        .iter()
        .filter_map(|devbox| {
            let (namespace, name) = object_key(devbox);
            let info = get_info(devbox.meta());
            filter
                .matches(&name, devbox.meta(), &info)
                .then(|| StatusRow {
                    namespace,
                    name,
                    state: devbox.desired_state().to_string(),
                    phase: devbox.phase(),
                    upgrade: info,
                })
        })
        .collect();
    Ok(rows)
}

/// Remove the upgrade annotations, except the original state, from the
/// Devboxes selected by `filter`. Returns how many were cleared.
pub async fn clear<S: ResourceStore, K: Workload>(
    store: &S,
    namespace: Option<&str>,
    filter: &StatusFilter,
    dry_run: bool,
) -> Result<usize, UpgradeError> {
    let tracker = ProgressTracker::new(store);
    let mut cleared = 0;
    for row in collect::<S, K>(store, namespace, filter).await? {
        if dry_run {
            info!("DRY-RUN: would clear upgrade annotations of {}/{}", row.namespace, row.name);
            cleared += 1;
        } else if tracker.clear::<K>(&row.namespace, &row.name).await? {
            info!("Cleared upgrade annotations of {}/{}", row.namespace, row.name);
            cleared += 1;
        }
    }
    Ok(cleared)
}

pub fn render(rows: &[StatusRow], format: OutputFormat) -> Result<String, UpgradeError> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(rows)?),
        OutputFormat::Yaml => Ok(serde_yaml::to_string(rows)?),
        OutputFormat::Table => Ok(render_table(rows)),
    }
}

fn render_table(rows: &[StatusRow]) -> String {
    if rows.is_empty() {
        return "No devboxes found\n".to_string();
    }
    let dash = |s: &str| if s.is_empty() { "-".to_string() } else { s.to_string() };
    let mut table: Vec<[String; 8]> = vec![[
        "NAMESPACE", "NAME", "STATE", "PHASE", "STATUS", "STEP", "PROGRESS", "OPERATION",
    ]
    .map(str::to_string)];
    table.extend(rows.iter().map(|row| {
        [
            row.namespace.clone(),
            row.name.clone(),
            row.state.clone(),
            dash(&row.phase),
            row.upgrade.status.map_or("-", |s| s.as_str()).to_string(),
            row.upgrade.step.map_or("-", |s| s.as_str()).to_string(),
            dash(&row.upgrade.progress),
            dash(&row.upgrade.operation_id),
        ]
    }));

    let mut widths = [0usize; 8];
    for line in &table {
        for (width, cell) in widths.iter_mut().zip(line) {
            *width = (*width).max(cell.len());
        }
    }
    let mut out = String::new();
    for line in &table {
        let cells: Vec<String> = line
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        let _ = writeln!(out, "{}", cells.join("  ").trim_end());
    }
    out
}
