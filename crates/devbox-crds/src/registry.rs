//! Schema registry
//!
//! The kinds served by the devbox.sealos.io group, with the names and
//! versions the upgrade tooling needs. Built once at start-up and passed to
//! whatever needs it.

use crate::conversion::ApiVersion;
use crate::error::SchemaError;
use crate::{v1alpha1, v1alpha2, DEVBOX_KIND, GROUP, RELEASE_KIND};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;
use kube::core::crd::merge_crds;

/// One kind of the group
#[derive(Debug, Clone)]
pub struct KindSchema {
    /// Kind name, e.g. `Devbox`
    pub kind: &'static str,
    /// Plural resource name, e.g. `devboxes`
    pub plural: &'static str,
    /// Version being migrated away from
    pub old_version: ApiVersion,
    /// Version being migrated to; the storage version once applied
    pub new_version: ApiVersion,
    /// File holding the new definition in the manifest directory
    pub manifest_file: &'static str,
    definitions: fn() -> Vec<CustomResourceDefinition>,
}

impl KindSchema {
    /// CRD object name, e.g. `devboxes.devbox.sealos.io`
    #[must_use]
    pub fn crd_name(&self) -> String {
        format!("{}.{GROUP}", self.plural)
    }

    /// Backup file name for the CRD, e.g. `devboxes_crd.yaml`
    #[must_use]
    pub fn crd_backup_file(&self) -> String {
        format!("{}_crd.yaml", self.plural)
    }

    /// Definition generated from the typed resources, serving both versions
    /// with the new version as storage. It declares no conversion strategy,
    /// so the API server would not rebuild commit records with it.
    pub fn generated_definition(&self) -> Result<CustomResourceDefinition, SchemaError> {
        Ok(merge_crds((self.definitions)(), self.new_version.version())?)
    }
}

/// Every kind the upgrade touches
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    kinds: Vec<KindSchema>,
}

impl SchemaRegistry {
    /// Registry for the Devbox and DevBoxRelease kinds
    #[must_use]
    pub fn devbox() -> Self {
        Self {
            kinds: vec![
                KindSchema {
                    kind: DEVBOX_KIND,
                    plural: "devboxes",
                    old_version: ApiVersion::V1alpha1,
                    new_version: ApiVersion::V1alpha2,
                    manifest_file: "devbox_v1alpha2_crd.yaml",
                    definitions: || vec![v1alpha1::Devbox::crd(), v1alpha2::Devbox::crd()],
                },
                KindSchema {
                    kind: RELEASE_KIND,
                    plural: "devboxreleases",
                    old_version: ApiVersion::V1alpha1,
                    new_version: ApiVersion::V1alpha2,
                    manifest_file: "devboxrelease_v1alpha2_crd.yaml",
                    definitions: || {
                        vec![v1alpha1::DevBoxRelease::crd(), v1alpha2::DevBoxRelease::crd()]
                    },
                },
            ],
        }
    }

    /// Every registered kind, Devbox first
    #[must_use]
    pub fn kinds(&self) -> &[KindSchema] {
        &self.kinds
    }

    /// Look up a kind by name
    pub fn get(&self, kind: &str) -> Result<&KindSchema, SchemaError> {
        self.kinds
            .iter()
            .find(|schema| schema.kind == kind)
            .ok_or_else(|| SchemaError::UnknownKind(kind.to_string()))
    }

    /// The Devbox kind
    pub fn devbox_kind(&self) -> Result<&KindSchema, SchemaError> {
        self.get(DEVBOX_KIND)
    }

    /// The release kind
    pub fn release_kind(&self) -> Result<&KindSchema, SchemaError> {
        self.get(RELEASE_KIND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_names() {
        let registry = SchemaRegistry::devbox();

        let devbox = registry.devbox_kind().unwrap();
        assert_eq!(devbox.crd_name(), "devboxes.devbox.sealos.io");
        assert_eq!(devbox.crd_backup_file(), "devboxes_crd.yaml");

        let release = registry.release_kind().unwrap();
        assert_eq!(release.crd_name(), "devboxreleases.devbox.sealos.io");
        assert_eq!(release.manifest_file, "devboxrelease_v1alpha2_crd.yaml");

        assert!(matches!(registry.get("Pod"), Err(SchemaError::UnknownKind(_))));
    }

    #[test]
    fn test_generated_definition_serves_both_versions() {
        let registry = SchemaRegistry::devbox();

        for schema in registry.kinds() {
            let crd = schema.generated_definition().unwrap();
            assert_eq!(crd.metadata.name.as_deref(), Some(schema.crd_name().as_str()));

            let versions: Vec<_> = crd
                .spec
                .versions
                .iter()
                .map(|v| (v.name.as_str(), v.served, v.storage))
                .collect();
            assert_eq!(versions.len(), 2);
            assert!(versions.contains(&("v1alpha1", true, false)));
            assert!(versions.contains(&("v1alpha2", true, true)));
        }
    }
}
