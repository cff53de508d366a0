//! Conversion and schema errors

use thiserror::Error;

/// Errors raised at the JSON boundary of the conversion engine.
///
/// The typed conversion functions are total; these only occur when an
/// untyped object names a kind or version this crate does not serve.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// Object kind is not one of the Devbox kinds
    #[error("Unsupported kind: {0}")]
    UnsupportedKind(String),

    /// apiVersion is outside the devbox.sealos.io group or not served
    #[error("Unsupported apiVersion: {0}")]
    UnsupportedVersion(String),

    /// Object has no apiVersion or kind
    #[error("Object is missing {0}")]
    MissingTypeMeta(&'static str),

    /// Payload does not match the schema of its declared version
    #[error("Failed to decode {kind}: {source}")]
    Decode {
        /// Kind being decoded
        kind: String,
        /// Underlying serde error
        #[source]
        source: serde_json::Error,
    },

    /// Converted object could not be serialized
    #[error("Failed to encode converted object: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors building schema definitions from the typed resources
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The per-version definitions disagree
    #[error("Failed to merge CRD versions: {0}")]
    Merge(#[from] kube::core::crd::MergeError),

    /// Kind is not in the registry
    #[error("Unknown kind: {0}")]
    UnknownKind(String),
}
