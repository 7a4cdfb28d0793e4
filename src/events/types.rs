//! Event and subscription types.

use crate::path;
use crate::types::{CommitType, Timestamp};
use serde::{Deserialize, Serialize};

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before dropping subscriber.
    /// Default: 1000
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: EventFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            filter: EventFilter::default(),
        }
    }
}

/// Filter criteria for subscriptions.
#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    /// Only events for this path and its descendants (None = every path).
    pub path_prefix: Option<String>,

    /// Include lock/unlock events.
    pub include_locks: bool,
}

impl EventFilter {
    /// Everything, including lock traffic.
    pub fn all() -> Self {
        Self {
            path_prefix: None,
            include_locks: true,
        }
    }

    /// Lifecycle events for `prefix` and the branches below it.
    pub fn under(prefix: impl Into<String>) -> Self {
        Self {
            path_prefix: Some(prefix.into()),
            include_locks: false,
        }
    }

    pub(crate) fn matches_path(&self, branch_path: &str) -> bool {
        match &self.path_prefix {
            None => true,
            Some(prefix) => branch_path == prefix || path::is_descendant(prefix, branch_path),
        }
    }
}

/// Events delivered to subscribers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BranchEvent {
    /// A branch path got its first row.
    BranchCreated {
        path: String,
        base: Timestamp,
        head: Timestamp,
    },

    /// A branch was locked, by a commit or an external operation.
    BranchLocked { path: String },

    /// A lock was released outside commit completion.
    BranchUnlocked { path: String, forced: bool },

    /// A commit split the branch timeline.
    CommitCompleted {
        path: String,
        timepoint: Timestamp,
        commit_type: CommitType,
        /// Promoted branch, for promotion commits.
        source: Option<String>,
    },

    /// Every branch row was deleted.
    BranchesPurged { rows: usize },

    /// Subscription was dropped.
    Dropped { reason: DropReason },
}

impl BranchEvent {
    /// Path the event concerns, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            BranchEvent::BranchCreated { path, .. }
            | BranchEvent::BranchLocked { path }
            | BranchEvent::BranchUnlocked { path, .. }
            | BranchEvent::CommitCompleted { path, .. } => Some(path),
            BranchEvent::BranchesPurged { .. } | BranchEvent::Dropped { .. } => None,
        }
    }

    pub(crate) fn is_lock_event(&self) -> bool {
        matches!(
            self,
            BranchEvent::BranchLocked { .. } | BranchEvent::BranchUnlocked { .. }
        )
    }
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to manage a subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<BranchEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<BranchEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<BranchEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<BranchEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches_subtree() {
        let filter = EventFilter::under("MAIN/A");
        assert!(filter.matches_path("MAIN/A"));
        assert!(filter.matches_path("MAIN/A/B"));
        assert!(!filter.matches_path("MAIN/AB"));
        assert!(!filter.matches_path("MAIN"));
        assert!(EventFilter::all().matches_path("MAIN"));
    }
}
