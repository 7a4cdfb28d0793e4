//! Branch directory: lifecycle, lookup, locking and commit completion.

use super::branch::Branch;
use super::commit::Commit;
use crate::codec;
use crate::error::{Result, StoreError};
use crate::events::{BranchEvent, SubscriptionConfig, SubscriptionHandle, SubscriptionId, SubscriptionManager};
use crate::path;
use crate::types::{BranchState, Clock, CommitType, Timestamp};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// Magic bytes for branch directory file.
const DIRECTORY_MAGIC: &[u8; 4] = b"BRD\0";

/// Current branch directory format version.
const DIRECTORY_VERSION: u8 = 1;

/// Default number of closed rows kept in the history cache.
pub const DEFAULT_HISTORY_CACHE_SIZE: usize = 1024;

/// Every branch row, grouped by flattened path and ordered by start.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct BranchIndex {
    rows: BTreeMap<String, Vec<Branch>>,
}

impl BranchIndex {
    fn rows_for(&self, flat_path: &str) -> &[Branch] {
        self.rows.get(flat_path).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The unended row for a path, failing if there is more than one.
    fn current(&self, branch_path: &str) -> Result<Option<&Branch>> {
        let mut current = self
            .rows_for(&path::flatten(branch_path))
            .iter()
            .filter(|b| b.is_current());

        let first = current.next();
        if current.next().is_some() {
            return Err(integrity_violation(format!(
                "There should not be more than one version of branch {} with no end date.",
                branch_path
            )));
        }
        Ok(first)
    }

    fn at_timepoint(&self, branch_path: &str, timepoint: Timestamp) -> Result<Option<&Branch>> {
        let mut matching = self
            .rows_for(&path::flatten(branch_path))
            .iter()
            .filter(|b| b.covers(timepoint));

        let first = matching.next();
        if matching.next().is_some() {
            return Err(integrity_violation(format!(
                "There should not be more than one version of branch {} at timepoint {}.",
                branch_path, timepoint
            )));
        }
        Ok(first)
    }

    fn current_rows(&self) -> impl Iterator<Item = &Branch> {
        self.rows.values().flatten().filter(|b| b.is_current())
    }

    /// Upsert rows, keyed by path and start.
    fn apply(&mut self, rows: Vec<Branch>) {
        for row in rows {
            let versions = self.rows.entry(row.flat_path()).or_default();
            match versions.iter_mut().find(|b| b.start == row.start) {
                Some(existing) => *existing = row,
                None => {
                    versions.push(row);
                    versions.sort_by_key(|b| b.start);
                }
            }
        }
    }

    fn row_count(&self) -> usize {
        self.rows.values().map(Vec::len).sum()
    }

    fn latest_timepoint(&self) -> Option<Timestamp> {
        self.rows
            .values()
            .flatten()
            .flat_map(|b| [Some(b.head), b.end])
            .flatten()
            .max()
    }
}

fn integrity_violation(message: String) -> StoreError {
    error!("{}", message);
    StoreError::DataIntegrity(message)
}

/// Manages branch rows and the commit lifecycle.
///
/// Opening a commit, completing it, and locking or unlocking a branch all
/// run inside one process-wide critical section (`commit_lock`). It is not
/// sharded by path: a promotion rewrites two paths at once and must never
/// interleave with another commit on either.
pub struct BranchDirectory {
    /// Backing file; `None` keeps the directory in memory only.
    path: Option<PathBuf>,

    /// All rows.
    index: RwLock<BranchIndex>,

    /// The single critical section for lock/commit state changes. Holds the
    /// timepoint of every commit still open, by path.
    commit_lock: Mutex<HashMap<String, Timestamp>>,

    /// Timepoint source for creations and commits.
    clock: Clock,

    /// Closed rows by (flat path, timepoint) lookup.
    history_cache: Mutex<LruCache<(String, Timestamp), Branch>>,

    events: SubscriptionManager,
}

impl BranchDirectory {
    /// A directory that is never written to disk.
    pub fn in_memory() -> Self {
        Self::with_parts(None, BranchIndex::default(), DEFAULT_HISTORY_CACHE_SIZE)
    }

    /// Open the directory file at `path`, starting empty if it does not exist.
    pub fn open(path: impl AsRef<Path>, history_cache_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let index = if path.exists() {
            codec::read_framed(&path, DIRECTORY_MAGIC, DIRECTORY_VERSION)?
        } else {
            BranchIndex::default()
        };
        Ok(Self::with_parts(Some(path), index, history_cache_size))
    }

    fn with_parts(path: Option<PathBuf>, index: BranchIndex, history_cache_size: usize) -> Self {
        let clock = Clock::new();
        if let Some(latest) = index.latest_timepoint() {
            clock.observe(latest);
        }
        let capacity = NonZeroUsize::new(history_cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);

        Self {
            path,
            index: RwLock::new(index),
            commit_lock: Mutex::new(HashMap::new()),
            clock,
            history_cache: Mutex::new(LruCache::new(capacity)),
            events: SubscriptionManager::new(),
        }
    }

    // --- Lifecycle ---

    /// Create a branch inheriting from its parent's current head.
    pub fn create(&self, branch_path: &str) -> Result<Branch> {
        path::validate(branch_path)?;
        debug!(path = branch_path, "creating branch");

        let _commit = self.commit_lock.lock();
        let timepoint = self.clock.tick();

        let base = {
            let index = self.index.read();
            if index.current(branch_path)?.is_some() {
                return Err(StoreError::BranchExists(branch_path.to_string()));
            }
            match path::parent_path(branch_path) {
                Some(parent_path) => index
                    .current(parent_path)?
                    .map(|parent| parent.head)
                    .ok_or_else(|| StoreError::ParentNotFound(parent_path.to_string()))?,
                None => timepoint,
            }
        };

        let branch = Branch::new(branch_path, base, timepoint);
        self.write_rows(vec![branch.clone()])?;
        debug!(path = branch_path, base = base.0, head = timepoint.0, "persisted branch");

        self.events.broadcast(BranchEvent::BranchCreated {
            path: branch.path.clone(),
            base: branch.base,
            head: branch.head,
        });
        Ok(branch)
    }

    // --- Lookup ---

    /// The current row for a path.
    ///
    /// Fails with `DataIntegrity` if the path has more than one current row,
    /// or if it is a child whose parent has none.
    pub fn find_latest(&self, branch_path: &str) -> Result<Option<Branch>> {
        Ok(self.find_latest_with_parent(branch_path)?.map(|(branch, _)| branch))
    }

    /// The current row together with its state relative to the parent's head.
    pub fn find_latest_with_state(&self, branch_path: &str) -> Result<Option<(Branch, BranchState)>> {
        Ok(self
            .find_latest_with_parent(branch_path)?
            .map(|(branch, parent_head)| {
                let state = branch.state_against(parent_head);
                (branch, state)
            }))
    }

    fn find_latest_with_parent(&self, branch_path: &str) -> Result<Option<(Branch, Option<Timestamp>)>> {
        let index = self.index.read();
        let branch = match index.current(branch_path)? {
            Some(branch) => branch.clone(),
            None => return Ok(None),
        };

        let parent_head = match path::parent_path(branch_path) {
            Some(parent_path) => match index.current(parent_path)? {
                Some(parent) => Some(parent.head),
                None => {
                    return Err(integrity_violation(format!(
                        "Parent branch of {} not found.",
                        branch_path
                    )))
                }
            },
            None => None,
        };

        Ok(Some((branch, parent_head)))
    }

    /// The current row for a path, or `BranchNotFound`.
    pub fn require_latest(&self, branch_path: &str) -> Result<Branch> {
        self.find_latest(branch_path)?
            .ok_or_else(|| StoreError::BranchNotFound(branch_path.to_string()))
    }

    /// Whether the path has a current row.
    pub fn exists(&self, branch_path: &str) -> Result<bool> {
        Ok(self.index.read().current(branch_path)?.is_some())
    }

    /// The row whose `[start, end)` contains `timepoint`.
    pub fn find_at_timepoint(&self, branch_path: &str, timepoint: Timestamp) -> Result<Branch> {
        let key = (path::flatten(branch_path), timepoint);
        if let Some(row) = self.history_cache.lock().get(&key) {
            return Ok(row.clone());
        }

        let row = self
            .index
            .read()
            .at_timepoint(branch_path, timepoint)?
            .cloned()
            .ok_or_else(|| StoreError::BranchNotFoundAt {
                path: branch_path.to_string(),
                timepoint,
            })?;

        // Closed rows never change again.
        if !row.is_current() {
            self.history_cache.lock().put(key, row.clone());
        }
        Ok(row)
    }

    /// Every current row, ordered by path.
    pub fn find_all(&self) -> Result<Vec<Branch>> {
        let mut branches: Vec<Branch> = self.index.read().current_rows().cloned().collect();
        branches.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(branches)
    }

    /// Current rows of every descendant of `branch_path`, ordered by path.
    pub fn find_children(&self, branch_path: &str) -> Result<Vec<Branch>> {
        let mut children: Vec<Branch> = self
            .index
            .read()
            .current_rows()
            .filter(|b| path::is_descendant(branch_path, &b.path))
            .cloned()
            .collect();
        children.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(children)
    }

    /// Whether a previously observed `(base, head)` still describes the current row.
    pub fn is_branch_state_current(&self, branch_path: &str, base: Timestamp, head: Timestamp) -> Result<bool> {
        let branch = self.require_latest(branch_path)?;
        Ok(branch.base == base && branch.head == head)
    }

    pub fn branches_have_parent_child_relationship(a: &Branch, b: &Branch) -> bool {
        a.is_parent_of(b) || b.is_parent_of(a)
    }

    // --- Commits ---

    /// Lock the branch and open a commit at a fresh timepoint.
    ///
    /// Never waits: a locked branch fails with `BranchLocked` and retrying
    /// is up to the caller.
    pub fn open_commit(&self, branch_path: &str, commit_type: CommitType) -> Result<Commit> {
        let mut open_commits = self.commit_lock.lock();
        let timepoint = self.clock.tick();
        let mut branch = self.lock_current(branch_path)?;

        if commit_type == CommitType::Rebase {
            if let Some(parent_path) = path::parent_path(branch_path) {
                // The parent cannot move while we hold the critical section.
                match self.find_at_timepoint(parent_path, timepoint) {
                    Ok(parent) => branch.base = parent.head,
                    Err(e) => {
                        self.release_announced(branch_path)?;
                        return Err(e);
                    }
                }
            }
        }

        open_commits.insert(branch_path.to_string(), timepoint);
        debug!(
            path = branch_path,
            timepoint = timepoint.0,
            commit_type = ?commit_type,
            "opened commit"
        );
        Ok(Commit::new(branch, timepoint, commit_type))
    }

    /// Open a commit that moves the branch base up to the parent's head.
    pub fn open_rebase_commit(&self, branch_path: &str) -> Result<Commit> {
        self.open_commit(branch_path, CommitType::Rebase)
    }

    /// Open a commit on `branch_path` that receives the content of `source_path`.
    ///
    /// Both branches are locked until the commit completes, so no other
    /// commit can run on the source in between.
    pub fn open_promotion_commit(&self, branch_path: &str, source_path: &str) -> Result<Commit> {
        if branch_path == source_path {
            return Err(StoreError::CommitState(format!(
                "Branch {} cannot be promoted into itself",
                branch_path
            )));
        }

        let mut open_commits = self.commit_lock.lock();
        let timepoint = self.clock.tick();
        let branch = self.lock_current(branch_path)?;
        if let Err(e) = self.lock_current(source_path) {
            self.release_announced(branch_path)?;
            return Err(e);
        }

        open_commits.insert(branch_path.to_string(), timepoint);
        open_commits.insert(source_path.to_string(), timepoint);
        debug!(
            path = branch_path,
            source = source_path,
            timepoint = timepoint.0,
            "opened promotion commit"
        );

        let mut commit = Commit::new(branch, timepoint, CommitType::Promotion);
        commit.set_source_branch_path(source_path);
        Ok(commit)
    }

    /// Split the branch timeline at the commit's timepoint and release the lock.
    ///
    /// The locked row is ended and a new current row starts at the commit
    /// timepoint. Promotions also restart the source branch with a clean
    /// inheritance state. All rows are written in one batch. Completing the
    /// same commit twice fails with `CommitState`.
    pub fn complete_commit(&self, commit: &Commit) -> Result<Branch> {
        let mut open_commits = self.commit_lock.lock();
        let timepoint = commit.timepoint();
        let branch_path = commit.branch_path();

        if open_commits.get(branch_path) != Some(&timepoint) {
            return Err(StoreError::CommitState(format!(
                "Commit {} on branch {} is not open",
                timepoint, branch_path
            )));
        }

        if commit.commit_type() == CommitType::Promotion && commit.source_branch_path().is_none() {
            return Err(StoreError::CommitState(format!(
                "The source branch path must be set for a commit of type {:?}",
                CommitType::Promotion
            )));
        }

        let mut batch = Vec::with_capacity(4);
        let new_row = {
            let index = self.index.read();
            let stored = index.current(branch_path)?.ok_or_else(|| {
                StoreError::CommitState(format!("Branch {} has no current row", branch_path))
            })?;
            if !stored.locked || stored.start != commit.branch().start {
                return Err(StoreError::CommitState(format!(
                    "Branch {} is not locked by this commit",
                    branch_path
                )));
            }

            let mut closed = stored.clone();
            closed.end = Some(timepoint);
            closed.locked = false;

            let mut new_row = Branch::new(branch_path, commit.branch().base, timepoint);
            new_row.versions_replaced = closed.versions_replaced.clone();
            new_row
                .versions_replaced
                .extend(commit.entity_versions_replaced().iter().copied());
            new_row.contains_content =
                commit.commit_type() != CommitType::Rebase || closed.contains_content;

            if let Some(source_path) = commit.source_branch_path() {
                let source = index
                    .current(source_path)?
                    .ok_or_else(|| StoreError::BranchNotFound(source_path.to_string()))?;
                if !source.locked || open_commits.get(source_path) != Some(&timepoint) {
                    return Err(StoreError::CommitState(format!(
                        "Source branch {} is not locked by this promotion",
                        source_path
                    )));
                }

                let mut closed_source = source.clone();
                closed_source.end = Some(timepoint);
                closed_source.locked = false;
                new_row
                    .versions_replaced
                    .extend(closed_source.versions_replaced.iter().copied());

                // Promoted content is now inherited, nothing left to hide.
                let new_source = Branch::new(source_path, timepoint, timepoint);
                debug!(path = source_path, base = timepoint.0, "restarting promoted branch");

                batch.push(closed_source);
                batch.push(new_source);
            }

            debug!(path = branch_path, end = timepoint.0, "ending branch timespan");
            debug!(path = branch_path, start = timepoint.0, "starting branch timespan");
            batch.insert(0, new_row.clone());
            batch.insert(0, closed);
            new_row
        };

        self.write_rows(batch)?;
        open_commits.remove(branch_path);
        if let Some(source_path) = commit.source_branch_path() {
            open_commits.remove(source_path);
        }

        self.events.broadcast(BranchEvent::CommitCompleted {
            path: branch_path.to_string(),
            timepoint,
            commit_type: commit.commit_type(),
            source: commit.source_branch_path().map(str::to_string),
        });
        Ok(new_row)
    }

    // --- Locking ---

    /// Hold a branch quiescent without opening a commit.
    pub fn lock_branch(&self, branch_path: &str) -> Result<Branch> {
        let _commit = self.commit_lock.lock();
        self.lock_current(branch_path)
    }

    /// Release a lock taken with [`lock_branch`](Self::lock_branch).
    ///
    /// Fails with `CommitState` while a commit is open on the branch; only
    /// [`force_unlock`](Self::force_unlock) abandons an open commit.
    pub fn unlock(&self, branch_path: &str) -> Result<()> {
        let open_commits = self.commit_lock.lock();
        if let Some(timepoint) = open_commits.get(branch_path) {
            return Err(StoreError::CommitState(format!(
                "Branch {} has commit {} open",
                branch_path, timepoint
            )));
        }

        self.release_announced(branch_path)?;
        debug!(path = branch_path, "unlocked branch");
        Ok(())
    }

    /// Administrative escape hatch for a branch left locked by a commit that
    /// was never completed, or by a process that exited with it open. The
    /// abandoned commit can no longer complete. A promotion abandoned this
    /// way also releases the other branch it held.
    pub fn force_unlock(&self, branch_path: &str) -> Result<()> {
        let mut open_commits = self.commit_lock.lock();
        let mut released = vec![(branch_path.to_string(), self.release_lock(branch_path)?)];

        if let Some(timepoint) = open_commits.remove(branch_path) {
            let held: Vec<String> = open_commits
                .iter()
                .filter(|(_, open)| **open == timepoint)
                .map(|(held_path, _)| held_path.clone())
                .collect();
            for held_path in held {
                open_commits.remove(&held_path);
                let was_locked = self.release_lock(&held_path)?;
                released.push((held_path, was_locked));
            }
        }

        for (path, was_locked) in released {
            warn!(
                path = %path,
                was_locked, "force-unlocking branch outside commit completion"
            );
            self.events.broadcast(BranchEvent::BranchUnlocked { path, forced: true });
        }
        Ok(())
    }

    /// Caller holds `commit_lock`.
    fn lock_current(&self, branch_path: &str) -> Result<Branch> {
        let mut branch = self.require_latest(branch_path)?;
        if branch.locked {
            return Err(StoreError::BranchLocked(branch_path.to_string()));
        }

        branch.locked = true;
        self.write_rows(vec![branch.clone()])?;
        self.events.broadcast(BranchEvent::BranchLocked {
            path: branch_path.to_string(),
        });
        Ok(branch)
    }

    /// Caller holds `commit_lock`.
    fn release_announced(&self, branch_path: &str) -> Result<()> {
        self.release_lock(branch_path)?;
        self.events.broadcast(BranchEvent::BranchUnlocked {
            path: branch_path.to_string(),
            forced: false,
        });
        Ok(())
    }

    /// Caller holds `commit_lock`. Returns whether the row was locked.
    fn release_lock(&self, branch_path: &str) -> Result<bool> {
        let mut branch = self
            .index
            .read()
            .current(branch_path)?
            .cloned()
            .ok_or_else(|| StoreError::BranchNotFound(branch_path.to_string()))?;

        let was_locked = branch.locked;
        branch.locked = false;
        self.write_rows(vec![branch])?;
        Ok(was_locked)
    }

    // --- Administration ---

    /// Delete every row. Returns the number of rows removed.
    pub fn delete_all(&self) -> Result<usize> {
        let mut open_commits = self.commit_lock.lock();
        let removed = {
            let mut index = self.index.write();
            let removed = index.row_count();
            let empty = BranchIndex::default();
            self.persist(&empty)?;
            *index = empty;
            removed
        };
        open_commits.clear();
        self.history_cache.lock().clear();
        warn!(rows = removed, "purged all branch rows");

        self.events.broadcast(BranchEvent::BranchesPurged { rows: removed });
        Ok(removed)
    }

    /// Total rows, current and closed.
    pub fn row_count(&self) -> usize {
        self.index.read().row_count()
    }

    /// Every row of a path, oldest first.
    pub fn history(&self, branch_path: &str) -> Vec<Branch> {
        self.index
            .read()
            .rows_for(&path::flatten(branch_path))
            .to_vec()
    }

    // --- Events ---

    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        self.events.subscribe(config)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.events.unsubscribe(id)
    }

    // --- Persistence ---

    /// Write the whole directory to its backing file.
    pub fn save(&self) -> Result<()> {
        self.persist(&self.index.read())
    }

    /// Apply a batch of rows; on disk-backed directories the batch is
    /// durable, or nothing changes, before this returns.
    fn write_rows(&self, rows: Vec<Branch>) -> Result<()> {
        let mut index = self.index.write();
        if self.path.is_none() {
            index.apply(rows);
            return Ok(());
        }

        let mut next = index.clone();
        next.apply(rows);
        self.persist(&next)?;
        *index = next;
        Ok(())
    }

    fn persist(&self, index: &BranchIndex) -> Result<()> {
        match &self.path {
            Some(path) => codec::write_framed(path, DIRECTORY_MAGIC, DIRECTORY_VERSION, index),
            None => Ok(()),
        }
    }
}
