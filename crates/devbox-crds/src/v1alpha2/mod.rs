//! `devbox.sealos.io/v1alpha2`
//!
//! The storage version. Commits are kept as a map of container id to
//! commit record, with one synthetic entry for uncommitted content.

pub mod devbox;
pub mod devbox_release;

pub use devbox::*;
pub use devbox_release::*;

/// Version string of this module's kinds
pub const VERSION: &str = "v1alpha2";
