//! CustomResourceDefinition operations for the mock store

use super::{MockResourceStore, Operation};
use crate::error::StoreError;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, CustomResourceDefinitionCondition, CustomResourceDefinitionStatus,
};

const CRD_KIND: &str = "CustomResourceDefinition";

impl MockResourceStore {
    /// Seed a schema as-is. Not counted as a mutation.
    pub fn insert_schema(&self, crd: CustomResourceDefinition) {
        let name = crd.metadata.name.clone().unwrap_or_default();
        self.lock().schemas.insert(name, crd);
    }

    /// Mark a schema `Established`
    pub fn establish(&self, name: &str) {
        if let Some(crd) = self.lock().schemas.get_mut(name) {
            set_established(crd);
        }
    }

    pub(super) fn get_schema_sync(&self, name: &str) -> Result<CustomResourceDefinition, StoreError> {
        self.lock()
            .schemas
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(name))
    }

    pub(super) fn create_schema_sync(
        &self,
        crd: &CustomResourceDefinition,
    ) -> Result<CustomResourceDefinition, StoreError> {
        let name = schema_name(crd)?;
        let mut state = self.lock();
        if state.schemas.contains_key(&name) {
            return Err(StoreError::AlreadyExists {
                kind: CRD_KIND.to_string(),
                name,
            });
        }
        let mut created = crd.clone();
        created.metadata.resource_version = Some(state.next_resource_version());
        created.status = Some(CustomResourceDefinitionStatus::default());
        record_storage_version(&mut created);
        if !self.manual_establish {
            set_established(&mut created);
        }
        state.schemas.insert(name, created.clone());
        state.mutations += 1;
        Ok(created)
    }

    pub(super) fn update_schema_sync(
        &self,
        crd: &CustomResourceDefinition,
    ) -> Result<CustomResourceDefinition, StoreError> {
        let name = schema_name(crd)?;
        let mut state = self.lock();
        if let Some(err) = state.take_failure(Operation::UpdateSchema, CRD_KIND, &name) {
            return Err(err);
        }
        let current = state.schemas.get(&name).ok_or_else(|| not_found(&name))?;
        if let Some(expected) = crd.metadata.resource_version.as_deref() {
            if current.metadata.resource_version.as_deref() != Some(expected) {
                return Err(StoreError::Conflict {
                    kind: CRD_KIND.to_string(),
                    name,
                    message: format!("resourceVersion {expected} is stale"),
                });
            }
        }
        let mut updated = crd.clone();
        // Status is owned by the server
        updated.status = current.status.clone();
        updated.metadata.resource_version = Some(state.next_resource_version());
        record_storage_version(&mut updated);
        if !self.manual_establish {
            set_established(&mut updated);
        }
        state.schemas.insert(name, updated.clone());
        state.mutations += 1;
        Ok(updated)
    }

    pub(super) fn set_stored_versions_sync(
        &self,
        name: &str,
        versions: &[String],
    ) -> Result<CustomResourceDefinition, StoreError> {
        let mut state = self.lock();
        let resource_version = state.next_resource_version();
        let crd = state.schemas.get_mut(name).ok_or_else(|| not_found(name))?;
        crd.status.get_or_insert_with(Default::default).stored_versions = Some(versions.to_vec());
        crd.metadata.resource_version = Some(resource_version);
        let updated = crd.clone();
        state.mutations += 1;
        Ok(updated)
    }

    pub(super) fn delete_schema_sync(&self, name: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.schemas.remove(name).ok_or_else(|| not_found(name))?;
        state.mutations += 1;
        Ok(())
    }
}

fn schema_name(crd: &CustomResourceDefinition) -> Result<String, StoreError> {
    crd.metadata
        .name
        .clone()
        .ok_or_else(|| StoreError::Invalid("CustomResourceDefinition has no name".to_string()))
}

/// The API server appends a new storage version to `storedVersions`
fn record_storage_version(crd: &mut CustomResourceDefinition) {
    let Some(storage) = crd.spec.versions.iter().find(|v| v.storage).map(|v| v.name.clone())
    else {
        return;
    };
    let stored = crd
        .status
        .get_or_insert_with(Default::default)
        .stored_versions
        .get_or_insert_with(Vec::new);
    if !stored.contains(&storage) {
        stored.push(storage);
    }
}

fn set_established(crd: &mut CustomResourceDefinition) {
    let conditions = crd
        .status
        .get_or_insert_with(Default::default)
        .conditions
        .get_or_insert_with(Vec::new);
    conditions.retain(|c| c.type_ != "Established");
    conditions.push(CustomResourceDefinitionCondition {
        type_: "Established".to_string(),
        status: "True".to_string(),
        ..Default::default()
    });
}

fn not_found(name: &str) -> StoreError {
    StoreError::NotFound {
        kind: CRD_KIND.to_string(),
        name: name.to_string(),
    }
}
