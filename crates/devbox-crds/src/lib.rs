//! Devbox CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the Devbox controllers, in both
//! served versions (`v1alpha1` and `v1alpha2`), together with the pure
//! machinery used to move objects between them:
//!
//! - [`commit_chain`]: rebuilds the v1alpha2 commit-record map from a v1alpha1
//!   commit history
//! - [`conversion`]: upgrade/downgrade functions and the version sum types
//! - [`registry`]: the explicit list of kinds and versions this crate serves

pub mod commit_chain;
pub mod common;
pub mod conversion;
pub mod error;
pub mod registry;
pub mod v1alpha1;
pub mod v1alpha2;

pub use commit_chain::{reconstruct, reconstruct_with, CommitChain};
pub use conversion::{
    convert_value, ApiVersion, ConversionOptions, DevboxVersion, ReleaseVersion,
    VersionedObject, DEFAULT_STORAGE_LIMIT,
};
pub use error::{ConversionError, SchemaError};
pub use registry::{KindSchema, SchemaRegistry};

/// Kind name of the Devbox resource
pub const DEVBOX_KIND: &str = "Devbox";

/// Kind name of the release resource
pub const RELEASE_KIND: &str = "DevBoxRelease";

/// API group shared by every Devbox kind
pub const GROUP: &str = "devbox.sealos.io";

/// Per-object override for the v1alpha2 `storageLimit` default
pub const ANNOTATION_STORAGE_LIMIT: &str = "devbox.sealos.io/storage-limit";

/// Marker stamped on every object during the storage transform
pub const ANNOTATION_STORAGE_UPGRADE: &str = "devbox.sealos.io/storage-upgrade";
