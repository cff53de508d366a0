//! Unit tests for the mock store

#[cfg(test)]
mod tests {
    use crate::mock::{Converter, FailureKind, MockResourceStore, Operation};
    use crate::{ResourceStore, StoreError};
    use devbox_crds::{v1alpha1, v1alpha2, SchemaRegistry};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::sync::Arc;

    fn converting_store() -> MockResourceStore {
        let converter: Converter = Arc::new(|value, target| {
            devbox_crds::convert_value(value, target).map_err(|e| e.to_string())
        });
        MockResourceStore::new().with_converter(converter)
    }

    fn devbox(name: &str) -> v1alpha1::Devbox {
        v1alpha1::Devbox {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ns-test".to_string()),
                ..Default::default()
            },
            spec: v1alpha1::DevboxSpec {
                image: "img:base".to_string(),
                ..Default::default()
            },
            status: None,
        }
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MockResourceStore::new();

        let err = store
            .get::<v1alpha1::Devbox>("ns-test", "missing")
            .await
            .unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_read_at_other_version_converts() {
        let store = converting_store();
        store.insert(&devbox("a")).unwrap();

        let upgraded: v1alpha2::Devbox = store.get("ns-test", "a").await.unwrap();

        assert_eq!(upgraded.spec.storage_limit, "10Gi");
        assert_eq!(
            store.stored_api_version::<v1alpha1::Devbox>("ns-test", "a").as_deref(),
            Some("devbox.sealos.io/v1alpha1")
        );
    }

    #[tokio::test]
    async fn test_read_at_other_version_without_converter_fails() {
        let store = MockResourceStore::new();
        store.insert(&devbox("a")).unwrap();

        let err = store
            .get::<v1alpha2::Devbox>("ns-test", "a")
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_update_persists_at_storage_version() {
        let store = converting_store();
        let registry = SchemaRegistry::devbox();
        store.insert(&devbox("a")).unwrap();

        let crd = registry.devbox_kind().unwrap().generated_definition().unwrap();
        store.create_schema(&crd).await.unwrap();

        let current: v1alpha2::Devbox = store.get("ns-test", "a").await.unwrap();
        store.update(&current).await.unwrap();

        assert_eq!(
            store.stored_api_version::<v1alpha2::Devbox>("ns-test", "a").as_deref(),
            Some("devbox.sealos.io/v1alpha2")
        );
        assert_eq!(store.mutation_count(), 2);
    }

    #[tokio::test]
    async fn test_stale_resource_version_conflicts() {
        let store = MockResourceStore::new();
        store.insert(&devbox("a")).unwrap();

        let first: v1alpha1::Devbox = store.get("ns-test", "a").await.unwrap();
        let second = first.clone();
        store.update(&first).await.unwrap();

        let err = store.update(&second).await.unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(store.mutation_count(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let store = MockResourceStore::new();
        store.insert(&devbox("a")).unwrap();
        store.fail_object(Operation::Update, "a", FailureKind::Conflict, 2);

        let current: v1alpha1::Devbox = store.get("ns-test", "a").await.unwrap();
        assert!(store.update(&current).await.unwrap_err().is_conflict());
        assert!(store.update(&current).await.unwrap_err().is_conflict());
        assert!(store.update(&current).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_filters_by_namespace() {
        let store = MockResourceStore::new();
        store.insert(&devbox("a")).unwrap();
        let mut other = devbox("b");
        other.metadata.namespace = Some("ns-other".to_string());
        store.insert(&other).unwrap();

        let all: Vec<v1alpha1::Devbox> = store.list(None).await.unwrap();
        let scoped: Vec<v1alpha1::Devbox> = store.list(Some("ns-other")).await.unwrap();

        assert_eq!(all.len(), 2);
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].metadata.name.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_create_and_delete() {
        let store = MockResourceStore::new();

        store.create(&devbox("a")).await.unwrap();
        let err = store.create(&devbox("a")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));

        store.delete::<v1alpha1::Devbox>("ns-test", "a").await.unwrap();
        assert!(store
            .delete::<v1alpha1::Devbox>("ns-test", "a")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_schema_lifecycle() {
        let store = MockResourceStore::new().with_manual_establish();
        let crd = SchemaRegistry::devbox()
            .release_kind()
            .unwrap()
            .generated_definition()
            .unwrap();
        let name = crd.metadata.name.clone().unwrap();

        store.create_schema(&crd).await.unwrap();
        assert!(!store.schema_established(&name).await.unwrap());

        store.establish(&name);
        assert!(store.schema_established(&name).await.unwrap());

        let stored = store.get_schema(&name).await.unwrap();
        assert_eq!(
            stored.status.unwrap().stored_versions,
            Some(vec!["v1alpha2".to_string()])
        );

        store
            .set_stored_versions(&name, &["v1alpha2".to_string()])
            .await
            .unwrap();
        store.delete_schema(&name).await.unwrap();
        assert!(store.get_schema(&name).await.unwrap_err().is_not_found());
    }
}
