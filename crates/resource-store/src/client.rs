//! Kubernetes-backed resource store

use crate::error::StoreError;
use crate::store_trait::{object_ref, ResourceStore, StoreObject};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use serde_json::json;
use tracing::debug;

const CRD_KIND: &str = "CustomResourceDefinition";

/// Resource store talking to the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    /// Store over an existing client
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the in-cluster config or `KUBECONFIG`
    pub async fn try_default() -> Result<Self, StoreError> {
        Ok(Self::new(Client::try_default().await?))
    }

    fn namespaced<K: StoreObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn schemas(&self) -> Api<CustomResourceDefinition> {
        Api::all(self.client.clone())
    }
}

fn kind_of<K: StoreObject>() -> String {
    K::kind(&()).to_string()
}

/// Namespace and name of an object about to be written
fn write_target<K: StoreObject>(object: &K) -> Result<(String, String), StoreError> {
    let meta = object.meta();
    match (meta.namespace.clone(), meta.name.clone()) {
        (Some(namespace), Some(name)) => Ok((namespace, name)),
        _ => Err(StoreError::Invalid(format!(
            "{} {} has no namespace or name",
            kind_of::<K>(),
            object_ref(object)
        ))),
    }
}

#[async_trait::async_trait]
impl ResourceStore for KubeStore {
    async fn get<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<K, StoreError> {
        self.namespaced::<K>(namespace)
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube(e, &kind_of::<K>(), &format!("{namespace}/{name}")))
    }

    async fn list<K: StoreObject>(&self, namespace: Option<&str>) -> Result<Vec<K>, StoreError> {
        let api: Api<K> = match namespace {
            Some(namespace) => self.namespaced(namespace),
            None => Api::all(self.client.clone()),
        };
        let list = api.list(&ListParams::default()).await?;
        debug!(
            "Listed {} {} object(s) in {}",
            list.items.len(),
            kind_of::<K>(),
            namespace.unwrap_or("all namespaces")
        );
        Ok(list.items)
    }

    async fn update<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let (namespace, name) = write_target(object)?;
        self.namespaced::<K>(&namespace)
            .replace(&name, &PostParams::default(), object)
            .await
            .map_err(|e| StoreError::from_kube(e, &kind_of::<K>(), &format!("{namespace}/{name}")))
    }

    async fn create<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let (namespace, name) = write_target(object)?;
        self.namespaced::<K>(&namespace)
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| StoreError::from_kube(e, &kind_of::<K>(), &format!("{namespace}/{name}")))
    }

    async fn delete<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.namespaced::<K>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| StoreError::from_kube(e, &kind_of::<K>(), &format!("{namespace}/{name}")))?;
        Ok(())
    }

    async fn get_schema(&self, name: &str) -> Result<CustomResourceDefinition, StoreError> {
        self.schemas()
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube(e, CRD_KIND, name))
    }

    async fn create_schema(
        &self,
        crd: &CustomResourceDefinition,
    ) -> Result<CustomResourceDefinition, StoreError> {
        let name = crd.meta().name.clone().unwrap_or_default();
        self.schemas()
            .create(&PostParams::default(), crd)
            .await
            .map_err(|e| StoreError::from_kube(e, CRD_KIND, &name))
    }

    async fn update_schema(
        &self,
        crd: &CustomResourceDefinition,
    ) -> Result<CustomResourceDefinition, StoreError> {
        let name = crd
            .meta()
            .name
            .clone()
            .ok_or_else(|| StoreError::Invalid("CustomResourceDefinition has no name".to_string()))?;
        self.schemas()
            .replace(&name, &PostParams::default(), crd)
            .await
            .map_err(|e| StoreError::from_kube(e, CRD_KIND, &name))
    }

    async fn set_stored_versions(
        &self,
        name: &str,
        versions: &[String],
    ) -> Result<CustomResourceDefinition, StoreError> {
        // Merge patch replaces the list wholesale
        let patch = json!({ "status": { "storedVersions": versions } });
        self.schemas()
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| StoreError::from_kube(e, CRD_KIND, name))
    }

    async fn delete_schema(&self, name: &str) -> Result<(), StoreError> {
        self.schemas()
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| StoreError::from_kube(e, CRD_KIND, name))?;
        Ok(())
    }
}
