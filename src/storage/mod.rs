//! Storage capability for temporal entities.
//!
//! The branching engine never talks to a concrete document store. Writers
//! hand it anything implementing [`EntityStore`] for the entity kind being
//! written; [`DocumentCollection`] is the in-process implementation.

mod collection;

pub use collection::DocumentCollection;

use crate::criteria::Predicate;
use crate::entity::TemporalEntity;
use crate::error::Result;
use crate::types::{InternalId, Timestamp};

/// Narrow storage contract, implemented once per entity kind.
pub trait EntityStore<T: TemporalEntity> {
    /// Upsert a batch. Entities without an internal id get a fresh one.
    fn save_all(&self, entities: Vec<T>) -> Result<Vec<T>>;

    /// Every stored version matching `predicate`.
    fn find(&self, predicate: &Predicate) -> Result<Vec<T>>;

    /// Set `end` on the given versions. Returns how many were updated.
    fn end_versions(&self, ids: &[InternalId], end: Timestamp) -> Result<usize>;

    fn count(&self, predicate: &Predicate) -> Result<usize> {
        Ok(self.find(predicate)?.len())
    }
}
