//! # Commit Chain
//!
//! Rebuilds the v1alpha2 commit-record map from a v1alpha1 commit history.
//!
//! v1alpha1 only knows which image each container commit produced. v1alpha2
//! also records the image every commit was layered on, so the history is
//! replayed in time order and each record's base image is the previous
//! record's commit image. One extra `Pending` record, keyed by a fresh
//! content id, stands for work that has not been committed yet.
//!
//! Ordering rules:
//! - commits without a container id are dropped and do not advance the chain
//! - commits are ordered by `time`; commits with equal times keep the order
//!   they had in the input history
//! - if two commits share a container id the later one in chain order
//!   replaces the earlier record, though both still advance the chain

use crate::v1alpha1::CommitHistory;
use crate::v1alpha2::{CommitRecord, CommitStatus};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Result of replaying a commit history
#[derive(Debug, Clone, PartialEq)]
pub struct CommitChain {
    /// One record per commit plus the content record
    pub records: BTreeMap<String, CommitRecord>,
    /// Key of the content record in `records`
    pub content_id: String,
}

impl CommitChain {
    /// The pending content record. Always present for a chain built by
    /// [`reconstruct`].
    #[must_use]
    pub fn content_record(&self) -> Option<&CommitRecord> {
        self.records.get(&self.content_id)
    }

    /// Image the next commit will be layered on
    #[must_use]
    pub fn head_image(&self) -> Option<&str> {
        self.content_record().map(|record| record.base_image.as_str())
    }
}

/// Generate a content id.
#[must_use]
pub fn new_content_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Replay `events` on top of `initial_image` with a freshly generated
/// content id, stamped with the current time.
#[must_use]
pub fn reconstruct(events: &[CommitHistory], initial_image: &str) -> CommitChain {
    reconstruct_with(events, initial_image, new_content_id(), Utc::now())
}

/// Replay `events` with a caller-chosen content id and generation time.
///
/// A content id that is empty or equal to one of the container ids is
/// replaced with a generated one.
#[must_use]
pub fn reconstruct_with(
    events: &[CommitHistory],
    initial_image: &str,
    content_id: String,
    generated_at: DateTime<Utc>,
) -> CommitChain {
    let mut ordered: Vec<&CommitHistory> = events
        .iter()
        .filter(|event| !event.container_id.is_empty())
        .collect();
    // sort_by_key is stable: equal times keep input order
    ordered.sort_by_key(|event| event.time);

    let mut records = BTreeMap::new();
    let mut previous_image = initial_image.to_string();

    for event in ordered {
        let record = CommitRecord {
            base_image: std::mem::replace(&mut previous_image, event.image.clone()),
            commit_image: event.image.clone(),
            node: event.node.clone(),
            generate_time: event.time,
            schedule_time: event.time,
            commit_time: event.time,
            update_time: event.time,
            commit_status: event.status.into(),
        };
        records.insert(event.container_id.clone(), record);
    }

    let mut content_id = content_id;
    while content_id.is_empty() || records.contains_key(&content_id) {
        content_id = new_content_id();
    }

    records.insert(
        content_id.clone(),
        CommitRecord {
            base_image: previous_image,
            commit_image: String::new(),
            node: String::new(),
            generate_time: generated_at,
            schedule_time: generated_at,
            commit_time: generated_at,
            update_time: generated_at,
            commit_status: CommitStatus::Pending,
        },
    );

    CommitChain { records, content_id }
}

#[cfg(test)]
#[path = "commit_chain_test.rs"]
mod tests;
