//! Resource store errors

use thiserror::Error;

/// Errors returned by a [`ResourceStore`](crate::ResourceStore)
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object or schema does not exist
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    /// Write raced with another writer (stale resourceVersion)
    #[error("Conflict writing {kind} {name}: {message}")]
    Conflict {
        kind: String,
        name: String,
        message: String,
    },

    /// Create of an object that already exists
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    /// Object cannot be written as given (e.g. missing name)
    #[error("Invalid object: {0}")]
    Invalid(String),

    /// Any other Kubernetes API or transport error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Map a kube error for `kind`/`name` into the store taxonomy.
    pub fn from_kube(err: kube::Error, kind: &str, name: &str) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                StoreError::AlreadyExists {
                    kind: kind.to_string(),
                    name: name.to_string(),
                }
            }
            kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict {
                kind: kind.to_string(),
                name: name.to_string(),
                message: ae.message.clone(),
            },
            other => StoreError::Kube(other),
        }
    }

    /// Object or schema does not exist
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Write lost a resourceVersion race
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// Conflicts, throttling, server errors and transport failures may
    /// succeed on a later attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Conflict { .. } => true,
            StoreError::Kube(kube::Error::Api(ae)) => ae.code == 429 || ae.code >= 500,
            StoreError::Kube(_) => true,
            StoreError::NotFound { .. }
            | StoreError::AlreadyExists { .. }
            | StoreError::Invalid(_)
            | StoreError::Serialization(_) => false,
        }
    }
}
