//! Core types shared by branches, commits and entities.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current wall-clock time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }

    /// The next representable timepoint.
    pub fn next(self) -> Self {
        Timestamp(self.0 + 1)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of strictly increasing timepoints.
///
/// Branch segments are half-open intervals keyed by timepoint, so two
/// commits must never share one. Wall-clock readings that do not advance
/// past the last issued value are bumped by one microsecond.
#[derive(Debug, Default)]
pub struct Clock {
    last: Mutex<i64>,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a timepoint later than every previously issued one.
    pub fn tick(&self) -> Timestamp {
        let mut last = self.last.lock();
        let now = Timestamp::now().0.max(*last + 1);
        *last = now;
        Timestamp(now)
    }

    /// Make sure future ticks land after `floor` (used after loading history).
    pub fn observe(&self, floor: Timestamp) {
        let mut last = self.last.lock();
        if floor.0 > *last {
            *last = floor.0;
        }
    }
}

/// Identity of one stored version of an entity.
///
/// Assigned by the store on save. Unique across every entity kind because a
/// branch's replaced-versions set mixes kinds.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InternalId(pub Uuid);

impl InternalId {
    pub fn generate() -> Self {
        InternalId(Uuid::new_v4())
    }
}

impl fmt::Debug for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InternalId({})", self.0)
    }
}

impl fmt::Display for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of write a commit performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommitType {
    /// Ordinary content edit.
    Content,
    /// Pull the parent's changes forward without new content.
    Rebase,
    /// Push a child branch's changes up into this branch.
    Promotion,
}

impl Default for CommitType {
    fn default() -> Self {
        CommitType::Content
    }
}

/// Position of a branch relative to its parent's current head.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BranchState {
    /// Inherits the parent's head and has no content of its own.
    UpToDate,
    /// Inherits the parent's head and has content of its own.
    Forward,
    /// Parent has moved on; no content of its own.
    Behind,
    /// Parent has moved on and this branch has content of its own.
    Diverged,
}
