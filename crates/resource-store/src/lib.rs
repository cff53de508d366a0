//! Resource Store
//!
//! A narrow, typed view of the Kubernetes API: get, list, update, create and
//! delete namespaced objects, plus the CustomResourceDefinition operations a
//! storage-version migration needs.
//!
//! # Example
//!
//! ```no_run
//! use resource_store::{KubeStore, ResourceStore};
//! use devbox_crds::v1alpha2::Devbox;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = KubeStore::try_default().await?;
//!
//! let devboxes: Vec<Devbox> = store.list(Some("ns-dev")).await?;
//! for devbox in &devboxes {
//!     store.update(devbox).await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **test-util**: [`MockResourceStore`], an in-memory store that converts
//!   between versions the way the API server does

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::KubeStore;
pub use error::StoreError;
pub use store_trait::{is_established, ResourceStore, StoreObject};
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockResourceStore;
