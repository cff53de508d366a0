//! `devbox.sealos.io/v1alpha1`
//!
//! The original served version. Commit history is an ordered list of
//! container commits.

pub mod devbox;
pub mod devbox_release;

pub use devbox::*;
pub use devbox_release::*;

/// Version string of this module's kinds
pub const VERSION: &str = "v1alpha1";
