//! Visibility criteria: which document versions a branch sees.
//!
//! A branch sees the current documents written on its own path up to its
//! head, plus the documents of each ancestor as they were at the base the
//! branch inherited, minus anything it has replaced. The builder turns a
//! branch row (or an open commit) into a [`Predicate`] that consumers AND
//! into their queries.

mod builder;
mod predicate;

pub use builder::{
    remove_deleted, set_entity_meta, set_entity_meta_all, BranchCriteria, BranchCriteriaBuilder,
    CriteriaLevel, EndedVersions,
};
pub use predicate::Predicate;
