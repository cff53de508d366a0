//! Unit tests for the orchestrator and its phases
//!
//! Runs against a mock store that converts between versions and persists
//! writes at the storage version of the installed schema, so a test can see
//! which version each object ended up stored at.

#[cfg(test)]
mod tests {
    use crate::annotations::{get_info, has_failed, UpgradeStatus, UpgradeStep};
    use crate::backup::{load_states, BACKUP_STATES_FILE};
    use crate::config::{KindFilter, UpgradeConfig};
    use crate::error::UpgradeError;
    use crate::orchestrator::{Orchestrator, PhasePlan};
    use crate::phases::Phase;
    use crate::test_utils::*;
    use devbox_crds::v1alpha1::{CommitStatus, DevboxState};
    use devbox_crds::{v1alpha1, v1alpha2, SchemaRegistry, ANNOTATION_STORAGE_UPGRADE};
    use resource_store::mock::{FailureKind, Operation};
    use resource_store::{MockResourceStore, ResourceStore};
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    const V1: &str = "devbox.sealos.io/v1alpha1";
    const V2: &str = "devbox.sealos.io/v1alpha2";

    async fn run_plan(
        store: &MockResourceStore,
        config: &UpgradeConfig,
        plan: PhasePlan,
    ) -> Result<(), UpgradeError> {
        let registry = SchemaRegistry::devbox();
        Orchestrator::new(store, &registry, config, CancellationToken::new())
            .run_with_operation_id(&plan, "op-test")
            .await
            .map(|_| ())
    }

    fn stored_at(store: &MockResourceStore, name: &str) -> String {
        store
            .stored_api_version::<v1alpha1::Devbox>(TEST_NAMESPACE, name)
            .unwrap()
    }

    /// Store with the old schemas installed and the new one applied
    async fn migrated_schema_store(config: &UpgradeConfig) -> MockResourceStore {
        let store = pre_migration_store(&SchemaRegistry::devbox());
        run_plan(&store, config, PhasePlan::only(Phase::SchemaUpdate))
            .await
            .unwrap();
        store
    }

    #[test]
    fn test_plan_from_flags() {
        assert_eq!(PhasePlan::from_flags(false, false, None), PhasePlan::full());
        assert_eq!(
            PhasePlan::from_flags(true, true, None).phases(),
            &[Phase::SchemaUpdate, Phase::Transform, Phase::Finalize]
        );
        assert_eq!(
            PhasePlan::from_flags(true, false, Some(Phase::Transform)).phases(),
            &[Phase::Transform]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_run_migrates_storage() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store = pre_migration_store(&SchemaRegistry::devbox());
        store
            .insert(&create_test_devbox(
                "a-running",
                DevboxState::Running,
                vec![create_test_commit("c1", "img:v1", 1, CommitStatus::Success)],
            ))
            .unwrap();
        store
            .insert(&create_test_devbox("b-stopped", DevboxState::Stopped, vec![]))
            .unwrap();
        store.insert(&create_test_release("r1", "a-running")).unwrap();

        run_plan(&store, &config, PhasePlan::full()).await.unwrap();

        assert_eq!(stored_at(&store, "a-running"), V2);
        assert_eq!(stored_at(&store, "b-stopped"), V2);
        assert_eq!(
            store
                .stored_api_version::<v1alpha1::DevBoxRelease>(TEST_NAMESPACE, "r1")
                .as_deref(),
            Some(V2)
        );

        let devbox: v1alpha2::Devbox = store.get(TEST_NAMESPACE, "a-running").await.unwrap();
        assert_eq!(devbox.spec.state, v1alpha2::DevboxState::Stopped);
        assert!(devbox.metadata.annotations.as_ref().unwrap().contains_key(ANNOTATION_STORAGE_UPGRADE));
        let info = get_info(&devbox.metadata);
        assert_eq!(info.operation_id, "op-test");
        assert_eq!(info.step, Some(UpgradeStep::Transform));
        assert_eq!(info.status, Some(UpgradeStatus::Completed));
        assert_eq!(info.original_state, "Running");
        assert_eq!(info.progress, "1/2");
        let records = &devbox.status.as_ref().unwrap().commit_records;
        assert_eq!(records.len(), 2);
        assert_eq!(records["c1"].base_image, "base:v0");

        for kind in SchemaRegistry::devbox().kinds() {
            let crd = store.get_schema(&kind.crd_name()).await.unwrap();
            let stored = crd.status.unwrap().stored_versions.unwrap();
            assert_eq!(stored, vec!["v1alpha2".to_string()]);
            let old = crd.spec.versions.iter().find(|v| v.name == "v1alpha1").unwrap();
            assert!(!old.served);
        }

        let backup_dir = config.backup_dir;
        assert!(backup_dir.join("devbox_ns-test_a-running.yaml").exists());
        assert!(backup_dir.join("devboxrelease_ns-test_r1.yaml").exists());
        assert!(backup_dir.join("devboxes_crd.yaml").exists());
        let states = load_states(&backup_dir.join(BACKUP_STATES_FILE)).unwrap();
        assert_eq!(states.len(), 2);
        assert!(states.iter().all(|s| s.operation_id == "op-test"));
        assert_eq!(states[0].state, "Running");
        assert_eq!(states[1].state, "Stopped");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_waits_for_pending_commit() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store = pre_migration_store(&SchemaRegistry::devbox());
        store
            .insert(&create_test_devbox(
                "a",
                DevboxState::Running,
                vec![create_test_commit("c1", "img:v1", 1, CommitStatus::Pending)],
            ))
            .unwrap();

        let committer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(25)).await;
            committer
                .modify_stored::<v1alpha1::Devbox>(TEST_NAMESPACE, "a", |value| {
                    value["status"]["commitHistory"][0]["status"] = json!("Success");
                    value["status"]["commitHistory"][0]["predicatedStatus"] = json!("Success");
                })
                .unwrap();
        });

        let started = Instant::now();
        run_plan(&store, &config, PhasePlan::only(Phase::Pause)).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(30));
        let devbox: v1alpha1::Devbox = store.get(TEST_NAMESPACE, "a").await.unwrap();
        assert_eq!(devbox.spec.state, DevboxState::Stopped);
        let info = get_info(&devbox.metadata);
        assert_eq!(info.status, Some(UpgradeStatus::Paused));
        assert_eq!(info.original_state, "Running");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_timeout_aborts_phase() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store = pre_migration_store(&SchemaRegistry::devbox());
        store
            .insert(&create_test_devbox(
                "a",
                DevboxState::Running,
                vec![create_test_commit("c1", "img:v1", 1, CommitStatus::Pending)],
            ))
            .unwrap();
        store
            .insert(&create_test_devbox("b", DevboxState::Running, vec![]))
            .unwrap();

        let started = Instant::now();
        let err = run_plan(&store, &config, PhasePlan::only(Phase::Pause))
            .await
            .unwrap_err();

        assert!(matches!(err, UpgradeError::Timeout { .. }));
        assert!(started.elapsed() >= Duration::from_secs(300));

        let stuck: v1alpha1::Devbox = store.get(TEST_NAMESPACE, "a").await.unwrap();
        assert_eq!(stuck.spec.state, DevboxState::Running);
        assert!(has_failed(&stuck.metadata));

        let untouched: v1alpha1::Devbox = store.get(TEST_NAMESPACE, "b").await.unwrap();
        assert_eq!(untouched.spec.state, DevboxState::Running);
        assert!(untouched.metadata.annotations.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_marks_stopped_devbox_without_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store = pre_migration_store(&SchemaRegistry::devbox());
        store
            .insert(&create_test_devbox(
                "a",
                DevboxState::Stopped,
                vec![create_test_commit("c1", "img:v1", 1, CommitStatus::Pending)],
            ))
            .unwrap();

        run_plan(&store, &config, PhasePlan::only(Phase::Pause)).await.unwrap();

        let devbox: v1alpha1::Devbox = store.get(TEST_NAMESPACE, "a").await.unwrap();
        let info = get_info(&devbox.metadata);
        assert_eq!(info.step, Some(UpgradeStep::Pause));
        assert_eq!(info.status, Some(UpgradeStatus::Paused));
        assert_eq!(info.original_state, "Stopped");
        assert_eq!(store.mutation_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transform_retries_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store = migrated_schema_store(&config).await;
        store
            .insert(&create_test_devbox("a", DevboxState::Stopped, vec![]))
            .unwrap();
        store.fail_next(Operation::Update, FailureKind::Conflict, 2);

        run_plan(&store, &config, PhasePlan::only(Phase::Transform))
            .await
            .unwrap();

        assert_eq!(stored_at(&store, "a"), V2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transform_records_progress_in_the_retried_write() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store = migrated_schema_store(&config).await;
        store
            .insert(&create_test_devbox("a", DevboxState::Stopped, vec![]))
            .unwrap();
        store
            .insert(&create_test_devbox("b", DevboxState::Stopped, vec![]))
            .unwrap();
        let before = store.mutation_count();
        store.fail_next(Operation::Update, FailureKind::Conflict, 3);

        run_plan(&store, &config, PhasePlan::only(Phase::Transform))
            .await
            .unwrap();

        assert_eq!(store.mutation_count() - before, 2);
        let devbox: v1alpha2::Devbox = store.get(TEST_NAMESPACE, "a").await.unwrap();
        assert!(devbox.metadata.annotations.as_ref().unwrap().contains_key(ANNOTATION_STORAGE_UPGRADE));
        let info = get_info(&devbox.metadata);
        assert_eq!(info.step, Some(UpgradeStep::Transform));
        assert_eq!(info.status, Some(UpgradeStatus::Completed));
        assert_eq!(info.progress, "1/2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transform_failure_aborts_remaining_objects() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store = migrated_schema_store(&config).await;
        for name in ["a", "b", "c"] {
            store
                .insert(&create_test_devbox(name, DevboxState::Stopped, vec![]))
                .unwrap();
        }
        store.fail_object(Operation::Update, "b", FailureKind::Conflict, 10);

        let err = run_plan(&store, &config, PhasePlan::only(Phase::Transform))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(stored_at(&store, "a"), V2);
        assert_eq!(stored_at(&store, "b"), V1);
        assert_eq!(stored_at(&store, "c"), V1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transform_paces_batches() {
        let dir = tempfile::tempdir().unwrap();
        let config = UpgradeConfig {
            batch_size: 2,
            ..test_config(dir.path())
        };
        let store = migrated_schema_store(&config).await;
        for name in ["a", "b", "c", "d", "e"] {
            store
                .insert(&create_test_devbox(name, DevboxState::Stopped, vec![]))
                .unwrap();
        }

        let started = Instant::now();
        run_plan(&store, &config, PhasePlan::only(Phase::Transform))
            .await
            .unwrap();

        // 3 batches: 2 inter-batch delays, 2 intra-batch delays
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(2_200) && elapsed < Duration::from_millis(2_300));
        for name in ["a", "b", "c", "d", "e"] {
            assert_eq!(stored_at(&store, name), V2);
        }
        let last: v1alpha2::Devbox = store.get(TEST_NAMESPACE, "e").await.unwrap();
        assert_eq!(get_info(&last.metadata).progress, "5/5");
    }

    #[tokio::test(start_paused = true)]
    async fn test_kind_filter_limits_transform() {
        let dir = tempfile::tempdir().unwrap();
        let config = UpgradeConfig {
            kinds: KindFilter::DevboxesOnly,
            ..test_config(dir.path())
        };
        let store = migrated_schema_store(&test_config(dir.path())).await;
        store
            .insert(&create_test_devbox("a", DevboxState::Stopped, vec![]))
            .unwrap();
        store.insert(&create_test_release("r1", "a")).unwrap();

        run_plan(&store, &config, PhasePlan::only(Phase::Transform))
            .await
            .unwrap();

        assert_eq!(stored_at(&store, "a"), V2);
        assert_eq!(
            store
                .stored_api_version::<v1alpha1::DevBoxRelease>(TEST_NAMESPACE, "r1")
                .as_deref(),
            Some(V1)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_schema_wait_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let config = UpgradeConfig {
            kinds: KindFilter::DevboxesOnly,
            ..test_config(dir.path())
        };
        let store = converting_store().with_manual_establish();

        let started = Instant::now();
        let err = run_plan(&store, &config, PhasePlan::only(Phase::SchemaUpdate))
            .await
            .unwrap_err();

        assert!(matches!(err, UpgradeError::Timeout { .. }));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(60) && elapsed < Duration::from_secs(61));
        assert!(store.get_schema("devboxes.devbox.sealos.io").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_schema_update_reads_manifest_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = UpgradeConfig {
            kinds: KindFilter::DevboxesOnly,
            ..test_config(dir.path())
        };
        let registry = SchemaRegistry::devbox();
        let schema = registry.devbox_kind().unwrap();
        let mut crd = schema.generated_definition().unwrap();
        crd.metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert("source".to_string(), "manifest".to_string());
        std::fs::create_dir_all(&config.crd_dir).unwrap();
        std::fs::write(
            config.crd_dir.join(schema.manifest_file),
            serde_yaml::to_string(&crd).unwrap(),
        )
        .unwrap();
        let store = pre_migration_store(&registry);

        run_plan(&store, &config, PhasePlan::only(Phase::SchemaUpdate))
            .await
            .unwrap();

        let applied = store.get_schema(&schema.crd_name()).await.unwrap();
        assert_eq!(applied.metadata.labels.unwrap()["source"], "manifest");
        let storage = applied.spec.versions.iter().find(|v| v.storage).unwrap();
        assert_eq!(storage.name, "v1alpha2");
    }

    #[tokio::test]
    async fn test_schema_update_requires_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let config = UpgradeConfig {
            crd_dir: dir.path().join("empty"),
            ..test_config(dir.path())
        };
        let store = pre_migration_store(&SchemaRegistry::devbox());

        let err = run_plan(&store, &config, PhasePlan::only(Phase::SchemaUpdate))
            .await
            .unwrap_err();

        assert!(matches!(err, UpgradeError::InvalidConfig(_)));
        assert_eq!(store.mutation_count(), 0);
        let crd = store.get_schema("devboxes.devbox.sealos.io").await.unwrap();
        let storage = crd.spec.versions.iter().find(|v| v.storage).unwrap();
        assert_eq!(storage.name, "v1alpha1");
    }

    #[tokio::test]
    async fn test_dry_run_requires_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let config = UpgradeConfig {
            dry_run: true,
            crd_dir: dir.path().join("empty"),
            ..test_config(dir.path())
        };
        let store = pre_migration_store(&SchemaRegistry::devbox());

        let err = run_plan(&store, &config, PhasePlan::only(Phase::SchemaUpdate))
            .await
            .unwrap_err();

        assert!(matches!(err, UpgradeError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_finalize_refuses_while_old_version_is_storage() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store = pre_migration_store(&SchemaRegistry::devbox());

        let err = run_plan(&store, &config, PhasePlan::only(Phase::Finalize))
            .await
            .unwrap_err();

        assert!(matches!(err, UpgradeError::InvalidState(_)));
        assert_eq!(store.mutation_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dry_run_makes_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = UpgradeConfig {
            dry_run: true,
            ..test_config(dir.path())
        };
        let store = pre_migration_store(&SchemaRegistry::devbox());
        store
            .insert(&create_test_devbox("a", DevboxState::Running, vec![]))
            .unwrap();
        store.insert(&create_test_release("r1", "a")).unwrap();

        run_plan(&store, &config, PhasePlan::full()).await.unwrap();

        assert_eq!(store.mutation_count(), 0);
        assert!(!config.backup_dir.exists());
        assert_eq!(stored_at(&store, "a"), V1);
        let devbox: v1alpha1::Devbox = store.get(TEST_NAMESPACE, "a").await.unwrap();
        assert_eq!(devbox.spec.state, DevboxState::Running);
    }

    #[tokio::test]
    async fn test_cancelled_run_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store = pre_migration_store(&SchemaRegistry::devbox());
        store
            .insert(&create_test_devbox("a", DevboxState::Running, vec![]))
            .unwrap();
        let registry = SchemaRegistry::devbox();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = Orchestrator::new(&store, &registry, &config, cancel)
            .run(&PhasePlan::full())
            .await
            .unwrap_err();

        assert!(matches!(err, UpgradeError::Cancelled));
        assert_eq!(store.mutation_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_pause_stops_before_next_devbox() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store = pre_migration_store(&SchemaRegistry::devbox());
        for name in ["a", "b"] {
            store
                .insert(&create_test_devbox(name, DevboxState::Stopped, vec![]))
                .unwrap();
        }
        let registry = SchemaRegistry::devbox();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = Orchestrator::new(&store, &registry, &config, cancel)
            .run_with_operation_id(&PhasePlan::only(Phase::Pause), "op-test")
            .await
            .unwrap_err();

        assert!(matches!(err, UpgradeError::Cancelled));
        let first: v1alpha1::Devbox = store.get(TEST_NAMESPACE, "a").await.unwrap();
        let second: v1alpha1::Devbox = store.get(TEST_NAMESPACE, "b").await.unwrap();
        assert!(first.metadata.annotations.is_some());
        assert!(second.metadata.annotations.is_none());
    }

    #[tokio::test]
    async fn test_backup_skips_missing_schemas() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store = converting_store();
        store
            .insert(&create_test_devbox("a", DevboxState::Running, vec![]))
            .unwrap();

        run_plan(&store, &config, PhasePlan::only(Phase::Backup))
            .await
            .unwrap();

        assert!(config.backup_dir.join("devbox_ns-test_a.yaml").exists());
        assert!(!config.backup_dir.join("devboxes_crd.yaml").exists());
        assert_eq!(store.mutation_count(), 0);
    }
}
