//! Test utilities for the upgrade phases
//!
//! Builders for test resources and a mock store that converts between
//! versions and starts out with the pre-migration schemas installed.

use crate::backoff::RetryPolicy;
use crate::config::{KindFilter, UpgradeConfig};
use chrono::{DateTime, TimeZone, Utc};
use devbox_crds::{v1alpha1, v1alpha2, KindSchema, SchemaRegistry};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, CustomResourceDefinitionCondition, CustomResourceDefinitionStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::crd::merge_crds;
use kube::CustomResourceExt;
use resource_store::mock::Converter;
use resource_store::MockResourceStore;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const TEST_NAMESPACE: &str = "ns-test";

/// Mock store converting through the devbox conversion engine
pub fn converting_store() -> MockResourceStore {
    let converter: Converter = Arc::new(|value, target| {
        devbox_crds::convert_value(value, target).map_err(|e| e.to_string())
    });
    MockResourceStore::new().with_converter(converter)
}

/// Schema as installed before the migration: both versions served,
/// v1alpha1 stored
pub fn old_schema(schema: &KindSchema) -> CustomResourceDefinition {
    let definitions = match schema.plural {
        "devboxes" => vec![v1alpha1::Devbox::crd(), v1alpha2::Devbox::crd()],
        _ => vec![v1alpha1::DevBoxRelease::crd(), v1alpha2::DevBoxRelease::crd()],
    };
    let mut crd = merge_crds(definitions, "v1alpha1").unwrap();
    crd.metadata.resource_version = Some("1".to_string());
    crd.status = Some(CustomResourceDefinitionStatus {
        stored_versions: Some(vec!["v1alpha1".to_string()]),
        conditions: Some(vec![CustomResourceDefinitionCondition {
            type_: "Established".to_string(),
            status: "True".to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    });
    crd
}

/// Converting store with the pre-migration schemas of both kinds
pub fn pre_migration_store(registry: &SchemaRegistry) -> MockResourceStore {
    let store = converting_store();
    for schema in registry.kinds() {
        store.insert_schema(old_schema(schema));
    }
    store
}

/// Write the generated definition of every kind into `crd_dir`
pub fn write_manifests(crd_dir: &Path) {
    std::fs::create_dir_all(crd_dir).unwrap();
    for schema in SchemaRegistry::devbox().kinds() {
        let crd = schema.generated_definition().unwrap();
        std::fs::write(
            crd_dir.join(schema.manifest_file),
            serde_yaml::to_string(&crd).unwrap(),
        )
        .unwrap();
    }
}

/// Config with the production pacing, writing backups under `dir/backup`
/// and reading definitions from `dir/manifests`, which is populated
pub fn test_config(dir: &Path) -> UpgradeConfig {
    write_manifests(&dir.join("manifests"));
    UpgradeConfig {
        namespace: None,
        dry_run: false,
        backup_dir: dir.join("backup"),
        crd_dir: dir.join("manifests"),
        wait_for_schema: true,
        kinds: KindFilter::All,
        retry: RetryPolicy::default(),
        ..UpgradeConfig::default()
    }
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// Helper to create a commit history entry
pub fn create_test_commit(
    id: &str,
    image: &str,
    secs: i64,
    status: v1alpha1::CommitStatus,
) -> v1alpha1::CommitHistory {
    v1alpha1::CommitHistory {
        container_id: id.to_string(),
        image: image.to_string(),
        time: at(secs),
        pod: format!("{id}-pod"),
        node: "node-1".to_string(),
        status,
        predicated_status: status,
    }
}

/// Helper to create a v1alpha1 Devbox
pub fn create_test_devbox(
    name: &str,
    state: v1alpha1::DevboxState,
    history: Vec<v1alpha1::CommitHistory>,
) -> v1alpha1::Devbox {
    v1alpha1::Devbox {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: v1alpha1::DevboxSpec {
            state,
            image: "base:v0".to_string(),
            ..Default::default()
        },
        status: Some(v1alpha1::DevboxStatus {
            commit_history: history,
            phase: match state {
                v1alpha1::DevboxState::Running => v1alpha1::DevboxPhase::Running,
                _ => v1alpha1::DevboxPhase::Stopped,
            },
            ..Default::default()
        }),
    }
}

/// Helper to create a v1alpha1 DevBoxRelease
pub fn create_test_release(name: &str, devbox_name: &str) -> v1alpha1::DevBoxRelease {
    v1alpha1::DevBoxRelease {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: v1alpha1::DevBoxReleaseSpec {
            devbox_name: devbox_name.to_string(),
            new_tag: "v1".to_string(),
            notes: String::new(),
        },
        status: Some(v1alpha1::DevBoxReleaseStatus {
            phase: v1alpha1::DevboxReleasePhase::Success,
            original_image: "base:v0".to_string(),
        }),
    }
}

/// Retry policy that never waits, for tests that do not run on a paused clock
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    }
}
