//! Branch visibility criteria.

use super::predicate::Predicate;
use crate::branches::{Branch, BranchDirectory, Commit};
use crate::entity::TemporalEntity;
use crate::error::Result;
use crate::path;
use crate::storage::EntityStore;
use crate::types::{InternalId, Timestamp};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// One clause of a branch's visibility criteria.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CriteriaLevel {
    /// Branch path the clause selects documents from.
    pub path: String,

    /// Documents must have started at or before this timepoint.
    pub timepoint: Timestamp,

    /// False for the branch's own level, true for ancestor levels.
    pub inherited: bool,

    /// Ancestor versions hidden at this level.
    pub excluded: BTreeSet<InternalId>,
}

impl CriteriaLevel {
    pub fn to_predicate(&self) -> Predicate {
        let on_path = Predicate::path_eq(path::flatten(&self.path))
            .and(Predicate::StartLte(self.timepoint));

        if !self.inherited {
            return on_path.and(Predicate::EndUnset);
        }

        on_path
            .and(Predicate::live_at(self.timepoint))
            .and(Predicate::InternalIdNotIn(self.excluded.clone()))
    }
}

/// Visibility criteria for one branch: its own clause first, then one clause
/// per ancestor up to the root.
///
/// A document is visible if any level matches it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BranchCriteria {
    levels: Vec<CriteriaLevel>,
}

impl BranchCriteria {
    pub fn levels(&self) -> &[CriteriaLevel] {
        &self.levels
    }

    pub fn to_predicate(&self) -> Predicate {
        Predicate::Or(self.levels.iter().map(CriteriaLevel::to_predicate).collect())
    }

    pub fn matches<E: TemporalEntity + ?Sized>(&self, entity: &E) -> bool {
        self.levels.iter().any(|level| level.to_predicate().matches(entity))
    }
}

/// Counts reported by [`BranchCriteriaBuilder::end_old_versions`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EndedVersions {
    /// Ancestor versions hidden by the commit.
    pub replaced: usize,
    /// Versions on the commit's own path that were ended.
    pub ended: usize,
}

/// Builds visibility criteria from the rows of a [`BranchDirectory`].
pub struct BranchCriteriaBuilder<'a> {
    directory: &'a BranchDirectory,
}

impl<'a> BranchCriteriaBuilder<'a> {
    pub fn new(directory: &'a BranchDirectory) -> Self {
        Self { directory }
    }

    /// Criteria for the current row of `branch_path`, as of its head.
    pub fn branch_criteria(&self, branch_path: &str) -> Result<BranchCriteria> {
        let branch = self.directory.require_latest(branch_path)?;
        self.branch_criteria_for(&branch)
    }

    /// Criteria for a specific row, as of its head.
    pub fn branch_criteria_for(&self, branch: &Branch) -> Result<BranchCriteria> {
        self.build(branch, branch.head, branch.versions_replaced.clone())
    }

    /// Criteria frozen at the commit's timepoint.
    ///
    /// Includes everything the commit has hidden so far, so reads during the
    /// write see a consistent view while the branch row is still changing.
    pub fn within_open_commit(&self, commit: &Commit) -> Result<BranchCriteria> {
        self.build(
            commit.branch(),
            commit.timepoint(),
            commit.all_versions_replaced(),
        )
    }

    /// Documents authored directly on the branch, ignoring inheritance.
    pub fn changes_on_branch(&self, branch: &Branch) -> Predicate {
        Predicate::path_eq(branch.flat_path()).and(Predicate::StartLte(branch.head))
    }

    fn build(
        &self,
        branch: &Branch,
        timepoint: Timestamp,
        versions_replaced: BTreeSet<InternalId>,
    ) -> Result<BranchCriteria> {
        let mut levels = vec![CriteriaLevel {
            path: branch.path.clone(),
            timepoint,
            inherited: false,
            excluded: BTreeSet::new(),
        }];

        // Each ancestor is evaluated as of the base its child inherited.
        let mut excluded = versions_replaced;
        let mut child_base = branch.base;
        for parent_path in path::ancestors(&branch.path) {
            let parent = self.directory.find_at_timepoint(parent_path, child_base)?;
            excluded.extend(parent.versions_replaced.iter().copied());

            levels.push(CriteriaLevel {
                path: parent.path.clone(),
                timepoint: child_base,
                inherited: true,
                excluded: excluded.clone(),
            });

            child_base = parent.base;
        }

        debug!(path = %branch.path, levels = levels.len(), "built branch criteria");
        Ok(BranchCriteria { levels })
    }

    /// Retire the previous versions of the entities a commit is about to write.
    ///
    /// Versions on the commit's own path are ended at the commit timepoint.
    /// Versions inherited from ancestors are left untouched and recorded as
    /// replaced on the commit instead. Must finish before the new versions
    /// are saved.
    pub fn end_old_versions<T, S, I>(
        &self,
        commit: &mut Commit,
        id_field: &str,
        ids: I,
        store: &S,
    ) -> Result<EndedVersions>
    where
        T: TemporalEntity,
        S: EntityStore<T> + ?Sized,
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let ids: BTreeSet<String> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return Ok(EndedVersions::default());
        }

        let timepoint = commit.timepoint();
        let own_path = commit.flat_branch_path();
        let superseded = Predicate::StartLt(timepoint)
            .and(Predicate::EndUnset)
            .and(Predicate::FieldIn {
                field: id_field.to_string(),
                values: ids,
            });

        let local = Predicate::path_eq(own_path.clone()).and(superseded.clone());
        let to_end: Vec<InternalId> = store
            .find(&local)?
            .iter()
            .filter_map(|entity| entity.internal_id())
            .collect();
        let ended = if to_end.is_empty() {
            0
        } else {
            store.end_versions(&to_end, timepoint)?
        };

        let inherited = self
            .within_open_commit(commit)?
            .to_predicate()
            .and(superseded)
            .and(Predicate::path_eq(own_path).not());
        let hidden: Vec<InternalId> = store
            .find(&inherited)?
            .iter()
            .filter_map(|entity| entity.internal_id())
            .collect();
        let replaced = hidden.len();
        commit.add_versions_replaced(hidden);

        info!(
            " - {} versions of {} replaced, {} ended on this branch.",
            replaced,
            std::any::type_name::<T>(),
            ended
        );
        Ok(EndedVersions { replaced, ended })
    }
}

/// Stamp an entity for writing under `commit`.
///
/// Clears the internal id so the store assigns a fresh one.
pub fn set_entity_meta<E: TemporalEntity + ?Sized>(entity: &mut E, commit: &Commit) {
    let meta = entity.meta_mut();
    meta.path = commit.flat_branch_path();
    meta.start = commit.timepoint();
    meta.end = None;
    meta.internal_id = None;
}

pub fn set_entity_meta_all<E: TemporalEntity>(entities: &mut [E], commit: &Commit) {
    for entity in entities {
        set_entity_meta(entity, commit);
    }
}

/// Drop entities flagged as deleted before saving a batch.
pub fn remove_deleted<E: TemporalEntity>(entities: &mut Vec<E>) {
    entities.retain(|entity| !entity.is_deleted());
}
