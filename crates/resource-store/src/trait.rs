//! ResourceStore trait for mocking
//!
//! Abstracts the Kubernetes API behind typed calls so the upgrade phases can
//! run against [`KubeStore`](crate::KubeStore) in production and an
//! in-memory store in unit tests.

use crate::error::StoreError;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// A namespaced, statically typed Kubernetes object
pub trait StoreObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> StoreObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Trait for resource store operations
///
/// The object's Rust type selects both kind and version: reading a
/// `v1alpha2::Devbox` returns the object as the API server serves it at
/// v1alpha2, whatever version it is stored in.
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<K, StoreError>;

    /// List objects in `namespace`, or in every namespace when `None`
    async fn list<K: StoreObject>(&self, namespace: Option<&str>) -> Result<Vec<K>, StoreError>;

    /// Replace an object. A set `resourceVersion` must match the stored one.
    async fn update<K: StoreObject>(&self, object: &K) -> Result<K, StoreError>;

    async fn create<K: StoreObject>(&self, object: &K) -> Result<K, StoreError>;

    async fn delete<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    // Schema (CustomResourceDefinition) operations
    async fn get_schema(&self, name: &str) -> Result<CustomResourceDefinition, StoreError>;
    async fn create_schema(
        &self,
        crd: &CustomResourceDefinition,
    ) -> Result<CustomResourceDefinition, StoreError>;
    async fn update_schema(
        &self,
        crd: &CustomResourceDefinition,
    ) -> Result<CustomResourceDefinition, StoreError>;
    /// Overwrite `status.storedVersions`
    async fn set_stored_versions(
        &self,
        name: &str,
        versions: &[String],
    ) -> Result<CustomResourceDefinition, StoreError>;
    async fn delete_schema(&self, name: &str) -> Result<(), StoreError>;

    /// Whether the schema reports the `Established` condition as true
    async fn schema_established(&self, name: &str) -> Result<bool, StoreError> {
        Ok(is_established(&self.get_schema(name).await?))
    }
}

/// True when the CRD carries `Established=True`
#[must_use]
pub fn is_established(crd: &CustomResourceDefinition) -> bool {
    crd.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Established" && c.status == "True")
        })
}

/// `namespace/name` of an object, for errors and logs
pub(crate) fn object_ref<K: StoreObject>(object: &K) -> String {
    let meta = object.meta();
    format!(
        "{}/{}",
        meta.namespace.as_deref().unwrap_or_default(),
        meta.name.as_deref().unwrap_or_default()
    )
}
