//! Namespaced object operations for the mock store

use super::{key, MockResourceStore, Operation, State};
use crate::error::StoreError;
use crate::store_trait::StoreObject;
use serde_json::{json, Value};

impl MockResourceStore {
    /// Seed an object as-is, at the version of `K`. Not counted as a mutation.
    pub fn insert<K: StoreObject>(&self, object: &K) -> Result<(), StoreError> {
        let (namespace, name) = target(object)?;
        let mut value = serde_json::to_value(object)?;
        let mut state = self.lock();
        value["metadata"]["resourceVersion"] = json!(state.next_resource_version());
        state.objects.insert(key::<K>(&namespace, &name), value);
        Ok(())
    }

    /// Raw stored JSON of an object, at whatever version it is stored
    #[must_use]
    pub fn stored_value<K: StoreObject>(&self, namespace: &str, name: &str) -> Option<Value> {
        self.lock().objects.get(&key::<K>(namespace, name)).cloned()
    }

    /// apiVersion the object is stored at
    #[must_use]
    pub fn stored_api_version<K: StoreObject>(&self, namespace: &str, name: &str) -> Option<String> {
        self.stored_value::<K>(namespace, name)
            .and_then(|value| value.get("apiVersion").and_then(Value::as_str).map(str::to_string))
    }

    /// Edit the stored JSON directly, as another writer would.
    /// Bumps the resourceVersion but is not counted as a mutation.
    pub fn modify_stored<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        edit: impl FnOnce(&mut Value),
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        let resource_version = state.next_resource_version();
        let value = state
            .objects
            .get_mut(&key::<K>(namespace, name))
            .ok_or_else(|| not_found::<K>(namespace, name))?;
        edit(value);
        value["metadata"]["resourceVersion"] = json!(resource_version);
        Ok(())
    }

    pub(super) fn get_object<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<K, StoreError> {
        let value = {
            let mut state = self.lock();
            if let Some(err) = state.take_failure(Operation::Get, &K::kind(&()), name) {
                return Err(err);
            }
            state
                .objects
                .get(&key::<K>(namespace, name))
                .cloned()
                .ok_or_else(|| not_found::<K>(namespace, name))?
        };
        self.read_as(value)
    }

    pub(super) fn list_objects<K: StoreObject>(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<K>, StoreError> {
        let plural = K::plural(&()).to_string();
        let values: Vec<Value> = {
            let mut state = self.lock();
            if let Some(err) = state.take_failure(Operation::List, &K::kind(&()), "") {
                return Err(err);
            }
            state
                .objects
                .iter()
                .filter(|((p, ns, _), _)| *p == plural && namespace.is_none_or(|want| want == ns))
                .map(|(_, value)| value.clone())
                .collect()
        };
        values.into_iter().map(|value| self.read_as(value)).collect()
    }

    pub(super) fn update_object<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let (namespace, name) = target(object)?;
        let value = serde_json::to_value(object)?;
        let stored = {
            let mut state = self.lock();
            if let Some(err) = state.take_failure(Operation::Update, &K::kind(&()), &name) {
                return Err(err);
            }
            let object_key = key::<K>(&namespace, &name);
            let current = state
                .objects
                .get(&object_key)
                .ok_or_else(|| not_found::<K>(&namespace, &name))?;
            let current_version = resource_version(current);
            if let Some(expected) = object.meta().resource_version.as_deref() {
                if current_version.as_deref() != Some(expected) {
                    return Err(StoreError::Conflict {
                        kind: K::kind(&()).to_string(),
                        name: format!("{namespace}/{name}"),
                        message: format!(
                            "resourceVersion {expected} does not match {}",
                            current_version.unwrap_or_default()
                        ),
                    });
                }
            }
            let mut stored = self.to_storage_version(&state, &object_key.0, value)?;
            stored["metadata"]["resourceVersion"] = json!(state.next_resource_version());
            state.objects.insert(object_key, stored.clone());
            state.mutations += 1;
            stored
        };
        self.read_as(stored)
    }

    pub(super) fn create_object<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let (namespace, name) = target(object)?;
        let value = serde_json::to_value(object)?;
        let stored = {
            let mut state = self.lock();
            if let Some(err) = state.take_failure(Operation::Create, &K::kind(&()), &name) {
                return Err(err);
            }
            let object_key = key::<K>(&namespace, &name);
            if state.objects.contains_key(&object_key) {
                return Err(StoreError::AlreadyExists {
                    kind: K::kind(&()).to_string(),
                    name: format!("{namespace}/{name}"),
                });
            }
            let mut stored = self.to_storage_version(&state, &object_key.0, value)?;
            stored["metadata"]["resourceVersion"] = json!(state.next_resource_version());
            state.objects.insert(object_key, stored.clone());
            state.mutations += 1;
            stored
        };
        self.read_as(stored)
    }

    pub(super) fn delete_object<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        if let Some(err) = state.take_failure(Operation::Delete, &K::kind(&()), name) {
            return Err(err);
        }
        state
            .objects
            .remove(&key::<K>(namespace, name))
            .ok_or_else(|| not_found::<K>(namespace, name))?;
        state.mutations += 1;
        Ok(())
    }

    /// Decode a stored value as `K`, converting versions if needed
    fn read_as<K: StoreObject>(&self, value: Value) -> Result<K, StoreError> {
        let value = self.convert(value, &K::api_version(&()))?;
        Ok(serde_json::from_value(value)?)
    }

    fn to_storage_version(
        &self,
        state: &State,
        plural: &str,
        value: Value,
    ) -> Result<Value, StoreError> {
        match storage_api_version(state, plural) {
            Some(api_version) => self.convert(value, &api_version),
            None => Ok(value),
        }
    }
}

/// Group-qualified storage version of the registered schema for `plural`
fn storage_api_version(state: &State, plural: &str) -> Option<String> {
    state
        .schemas
        .values()
        .find(|crd| crd.spec.names.plural == plural)
        .and_then(|crd| {
            crd.spec
                .versions
                .iter()
                .find(|version| version.storage)
                .map(|version| format!("{}/{}", crd.spec.group, version.name))
        })
}

fn resource_version(value: &Value) -> Option<String> {
    value
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn target<K: StoreObject>(object: &K) -> Result<(String, String), StoreError> {
    let meta = object.meta();
    match (meta.namespace.clone(), meta.name.clone()) {
        (Some(namespace), Some(name)) => Ok((namespace, name)),
        _ => Err(StoreError::Invalid(format!(
            "{} has no namespace or name",
            K::kind(&())
        ))),
    }
}

fn not_found<K: StoreObject>(namespace: &str, name: &str) -> StoreError {
    StoreError::NotFound {
        kind: K::kind(&()).to_string(),
        name: format!("{namespace}/{name}"),
    }
}
