//! Version-independent view of a Devbox
//!
//! Pause, restore and the status report only need the desired state, the
//! observed phase and whether a commit is in flight. Both served versions
//! provide those.

use crate::error::UpgradeError;
use devbox_crds::{v1alpha1, v1alpha2};
use resource_store::StoreObject;

pub const STATE_RUNNING: &str = "Running";
pub const STATE_STOPPED: &str = "Stopped";

pub trait Workload: StoreObject {
    /// `spec.state`
    fn desired_state(&self) -> &'static str;

    fn set_desired_state(&mut self, state: &str) -> Result<(), UpgradeError>;

    /// `status.phase`, empty when the status is absent
    fn phase(&self) -> String;

    /// True while any commit is still pending
    fn has_pending_commit(&self) -> bool;

    fn is_running(&self) -> bool {
        self.desired_state() == STATE_RUNNING
    }
}

fn invalid_state(state: &str) -> UpgradeError {
    UpgradeError::InvalidState(format!("unknown devbox state {state:?}"))
}

impl Workload for v1alpha1::Devbox {
    fn desired_state(&self) -> &'static str {
        self.spec.state.as_str()
    }

    fn set_desired_state(&mut self, state: &str) -> Result<(), UpgradeError> {
        self.spec.state = state.parse().map_err(|_| invalid_state(state))?;
        Ok(())
    }

    fn phase(&self) -> String {
        self.status
            .as_ref()
            .map(|status| status.phase.to_string())
            .unwrap_or_default()
    }

    fn has_pending_commit(&self) -> bool {
        v1alpha1::Devbox::has_pending_commit(self)
    }
}

impl Workload for v1alpha2::Devbox {
    fn desired_state(&self) -> &'static str {
        self.spec.state.as_str()
    }

    fn set_desired_state(&mut self, state: &str) -> Result<(), UpgradeError> {
        self.spec.state = state.parse().map_err(|_| invalid_state(state))?;
        Ok(())
    }

    fn phase(&self) -> String {
        self.status
            .as_ref()
            .map(|status| status.phase.to_string())
            .unwrap_or_default()
    }

    // The content record is always pending; only real commits count
    fn has_pending_commit(&self) -> bool {
        self.status.as_ref().is_some_and(|status| {
            status.commit_records.iter().any(|(id, record)| {
                *id != status.content_id && record.commit_status == v1alpha2::CommitStatus::Pending
            })
        })
    }
}
