//! Branch rows.

use crate::path;
use crate::types::{BranchState, InternalId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One segment of a branch's timeline.
///
/// A branch path is represented by a sequence of non-overlapping rows, each
/// valid over `[start, end)`. Exactly one row per path has no `end`; that is
/// the branch's current row. Rows with an `end` are immutable history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Hierarchical path, e.g. `MAIN/PROJECT`.
    pub path: String,

    /// Parent timepoint this row inherits content from.
    pub base: Timestamp,

    /// Row is valid from here (inclusive).
    pub start: Timestamp,

    /// Latest committed timepoint on this row.
    pub head: Timestamp,

    /// Row is valid until here (exclusive); `None` for the current row.
    pub end: Option<Timestamp>,

    /// Set while a commit or external operation holds the branch.
    pub locked: bool,

    /// Whether a content-bearing commit ever happened on this lineage.
    pub contains_content: bool,

    /// Ancestor versions hidden from inherited visibility.
    pub versions_replaced: BTreeSet<InternalId>,
}

impl Branch {
    /// A fresh, unlocked, content-free row starting at `timepoint`.
    pub(crate) fn new(path: impl Into<String>, base: Timestamp, timepoint: Timestamp) -> Self {
        Self {
            path: path.into(),
            base,
            start: timepoint,
            head: timepoint,
            end: None,
            locked: false,
            contains_content: false,
            versions_replaced: BTreeSet::new(),
        }
    }

    /// Path as stored on entities.
    pub fn flat_path(&self) -> String {
        path::flatten(&self.path)
    }

    pub fn parent_path(&self) -> Option<&str> {
        path::parent_path(&self.path)
    }

    pub fn is_current(&self) -> bool {
        self.end.is_none()
    }

    /// Whether `timepoint` falls inside `[start, end)`.
    pub fn covers(&self, timepoint: Timestamp) -> bool {
        self.start <= timepoint && self.end.map_or(true, |end| end > timepoint)
    }

    /// True when `other` is a direct child of this branch.
    pub fn is_parent_of(&self, other: &Branch) -> bool {
        other.parent_path() == Some(self.path.as_str())
    }

    /// Whether this row inherits everything its parent has committed.
    pub fn is_up_to_date_with(&self, parent_head: Timestamp) -> bool {
        self.base >= parent_head
    }

    /// State relative to the parent's current head (`None` for the root).
    pub fn state_against(&self, parent_head: Option<Timestamp>) -> BranchState {
        let up_to_date = parent_head.map_or(true, |head| self.is_up_to_date_with(head));
        match (up_to_date, self.contains_content) {
            (true, false) => BranchState::UpToDate,
            (true, true) => BranchState::Forward,
            (false, false) => BranchState::Behind,
            (false, true) => BranchState::Diverged,
        }
    }
}
