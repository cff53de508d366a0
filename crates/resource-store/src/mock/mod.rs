//! Mock ResourceStore for unit testing
//!
//! Keeps objects in memory as JSON and behaves like the API server where the
//! upgrade tooling depends on it:
//! - reads at a version other than the stored one go through an injected
//!   converter (the conversion webhook)
//! - writes are persisted at the schema's storage version, if a schema for
//!   the kind is registered
//! - a `resourceVersion` on an update must match the stored one
//! - applying a schema marks it `Established` and adds its storage version
//!   to `status.storedVersions`
//!
//! Status is written along with the rest of the object; there is no status
//! subresource.
//!
//! The mock is organized into:
//! - `objects.rs` - namespaced object operations
//! - `schemas.rs` - CustomResourceDefinition operations

mod objects;
mod schemas;

use crate::error::StoreError;
use crate::store_trait::{ResourceStore, StoreObject};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Converts a JSON object to the given group-qualified apiVersion
pub type Converter = Arc<dyn Fn(Value, &str) -> Result<Value, String> + Send + Sync>;

/// Operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// `get`
    Get,
    /// `list`
    List,
    /// `update`
    Update,
    /// `create`
    Create,
    /// `delete`
    Delete,
    /// `update_schema`
    UpdateSchema,
}

/// Error returned by an injected failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Stale resourceVersion
    Conflict,
    /// Object missing
    NotFound,
}

#[derive(Debug)]
struct InjectedFailure {
    operation: Operation,
    name: Option<String>,
    kind: FailureKind,
    remaining: usize,
}

/// (plural, namespace, name)
type ObjectKey = (String, String, String);

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<ObjectKey, Value>,
    schemas: BTreeMap<String, CustomResourceDefinition>,
    last_resource_version: u64,
    mutations: usize,
    failures: Vec<InjectedFailure>,
}

impl State {
    fn next_resource_version(&mut self) -> String {
        self.last_resource_version += 1;
        self.last_resource_version.to_string()
    }

    fn take_failure(&mut self, operation: Operation, kind: &str, name: &str) -> Option<StoreError> {
        let failure = self.failures.iter_mut().find(|f| {
            f.operation == operation
                && f.remaining > 0
                && f.name.as_deref().is_none_or(|target| target == name)
        })?;
        failure.remaining -= 1;
        Some(match failure.kind {
            FailureKind::Conflict => StoreError::Conflict {
                kind: kind.to_string(),
                name: name.to_string(),
                message: "injected conflict".to_string(),
            },
            FailureKind::NotFound => StoreError::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            },
        })
    }
}

/// Mock ResourceStore for testing
///
/// Cheap to clone; clones share the same state.
#[derive(Clone, Default)]
pub struct MockResourceStore {
    state: Arc<Mutex<State>>,
    converter: Option<Converter>,
    manual_establish: bool,
}

impl std::fmt::Debug for MockResourceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockResourceStore")
            .field("state", &self.state)
            .field("has_converter", &self.converter.is_some())
            .finish_non_exhaustive()
    }
}

impl MockResourceStore {
    /// Create an empty mock store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `converter` for reads and writes across versions
    #[must_use]
    pub fn with_converter(mut self, converter: Converter) -> Self {
        self.converter = Some(converter);
        self
    }

    /// Leave applied schemas un-established until [`Self::establish`]
    #[must_use]
    pub fn with_manual_establish(mut self) -> Self {
        self.manual_establish = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of successful writes since creation (seeding excluded)
    #[must_use]
    pub fn mutation_count(&self) -> usize {
        self.lock().mutations
    }

    /// Fail the next `times` calls of `operation` with `kind`
    pub fn fail_next(&self, operation: Operation, kind: FailureKind, times: usize) {
        self.lock().failures.push(InjectedFailure {
            operation,
            name: None,
            kind,
            remaining: times,
        });
    }

    /// Fail the next `times` calls of `operation` on objects or schemas
    /// called `name`
    pub fn fail_object(&self, operation: Operation, name: &str, kind: FailureKind, times: usize) {
        self.lock().failures.push(InjectedFailure {
            operation,
            name: Some(name.to_string()),
            kind,
            remaining: times,
        });
    }

    fn convert(&self, value: Value, api_version: &str) -> Result<Value, StoreError> {
        if value.get("apiVersion").and_then(Value::as_str) == Some(api_version) {
            return Ok(value);
        }
        let converter = self.converter.as_ref().ok_or_else(|| {
            StoreError::Invalid(format!("no converter registered to reach {api_version}"))
        })?;
        converter(value, api_version).map_err(StoreError::Invalid)
    }
}

fn key<K: StoreObject>(namespace: &str, name: &str) -> ObjectKey {
    (
        K::plural(&()).to_string(),
        namespace.to_string(),
        name.to_string(),
    )
}

#[async_trait::async_trait]
impl ResourceStore for MockResourceStore {
    async fn get<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<K, StoreError> {
        self.get_object(namespace, name)
    }

    async fn list<K: StoreObject>(&self, namespace: Option<&str>) -> Result<Vec<K>, StoreError> {
        self.list_objects(namespace)
    }

    async fn update<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        self.update_object(object)
    }

    async fn create<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        self.create_object(object)
    }

    async fn delete<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.delete_object::<K>(namespace, name)
    }

    async fn get_schema(&self, name: &str) -> Result<CustomResourceDefinition, StoreError> {
        self.get_schema_sync(name)
    }

    async fn create_schema(
        &self,
        crd: &CustomResourceDefinition,
    ) -> Result<CustomResourceDefinition, StoreError> {
        self.create_schema_sync(crd)
    }

    async fn update_schema(
        &self,
        crd: &CustomResourceDefinition,
    ) -> Result<CustomResourceDefinition, StoreError> {
        self.update_schema_sync(crd)
    }

    async fn set_stored_versions(
        &self,
        name: &str,
        versions: &[String],
    ) -> Result<CustomResourceDefinition, StoreError> {
        self.set_stored_versions_sync(name, versions)
    }

    async fn delete_schema(&self, name: &str) -> Result<(), StoreError> {
        self.delete_schema_sync(name)
    }
}

#[cfg(test)]
mod mock_test;
