//! Open write transactions.

use super::branch::Branch;
use crate::types::{CommitType, InternalId, Timestamp};
use std::collections::BTreeSet;

/// Handle for one open write against a locked branch.
///
/// Never persisted; only its effects on branch rows and entities are. Every
/// document written under the commit carries [`Commit::timepoint`] as its
/// start. Hand it back to the directory's `complete_commit` on every path,
/// including failures, or the branch stays locked.
#[derive(Debug)]
pub struct Commit {
    branch: Branch,
    timepoint: Timestamp,
    commit_type: CommitType,
    source_branch_path: Option<String>,
    entity_versions_replaced: BTreeSet<InternalId>,
}

impl Commit {
    pub(crate) fn new(branch: Branch, timepoint: Timestamp, commit_type: CommitType) -> Self {
        Self {
            branch,
            timepoint,
            commit_type,
            source_branch_path: None,
            entity_versions_replaced: BTreeSet::new(),
        }
    }

    /// Snapshot of the locked row, with the advanced base for rebases.
    pub fn branch(&self) -> &Branch {
        &self.branch
    }

    pub fn timepoint(&self) -> Timestamp {
        self.timepoint
    }

    pub fn commit_type(&self) -> CommitType {
        self.commit_type
    }

    pub fn source_branch_path(&self) -> Option<&str> {
        self.source_branch_path.as_deref()
    }

    pub(crate) fn set_source_branch_path(&mut self, source: impl Into<String>) {
        self.source_branch_path = Some(source.into());
    }

    pub fn branch_path(&self) -> &str {
        &self.branch.path
    }

    pub fn flat_branch_path(&self) -> String {
        self.branch.flat_path()
    }

    /// Ancestor versions hidden by this commit so far.
    pub fn entity_versions_replaced(&self) -> &BTreeSet<InternalId> {
        &self.entity_versions_replaced
    }

    pub fn add_version_replaced(&mut self, id: InternalId) {
        self.entity_versions_replaced.insert(id);
    }

    pub fn add_versions_replaced(&mut self, ids: impl IntoIterator<Item = InternalId>) {
        self.entity_versions_replaced.extend(ids);
    }

    /// Everything hidden as of this commit: the row's set plus this commit's.
    pub fn all_versions_replaced(&self) -> BTreeSet<InternalId> {
        self.branch
            .versions_replaced
            .union(&self.entity_versions_replaced)
            .copied()
            .collect()
    }
}
