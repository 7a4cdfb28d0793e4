//! The storage contract every versioned document satisfies.
//!
//! A temporal entity is one *version* of a business object. Versions are
//! never updated in place apart from having their `end` set: an edit writes
//! a new version stamped with the commit's path and timepoint and ends (or
//! hides) the previous one.

use crate::types::{InternalId, Timestamp};
use serde::{Deserialize, Serialize};

/// Field name under which [`TemporalEntity::business_id`] is addressable.
pub const BUSINESS_ID_FIELD: &str = "businessId";

/// Version metadata embedded in every temporal entity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMeta {
    /// Identity of this version; `None` until the store assigns one.
    pub internal_id: Option<InternalId>,
    /// Flattened branch path this version belongs to.
    pub path: String,
    /// Timepoint at which this version became visible.
    pub start: Timestamp,
    /// Timepoint at which this version stopped being visible.
    pub end: Option<Timestamp>,
}

impl EntityMeta {
    pub fn is_current(&self) -> bool {
        self.end.is_none()
    }
}

/// A versioned document stored per branch path.
///
/// Implementors only need to expose their [`EntityMeta`] and business
/// identity; everything else has a default.
pub trait TemporalEntity {
    fn meta(&self) -> &EntityMeta;

    fn meta_mut(&mut self) -> &mut EntityMeta;

    /// Stable identity of the thing being versioned, if it has one.
    fn business_id(&self) -> Option<&str>;

    /// Look up a natural-id field by name.
    ///
    /// Types with several natural keys (e.g. a member keyed both by its own
    /// id and by the component it references) override this.
    fn field_value(&self, field: &str) -> Option<&str> {
        if field == BUSINESS_ID_FIELD {
            self.business_id()
        } else {
            None
        }
    }

    fn internal_id(&self) -> Option<InternalId> {
        self.meta().internal_id
    }

    fn path(&self) -> &str {
        &self.meta().path
    }

    fn start(&self) -> Timestamp {
        self.meta().start
    }

    fn end(&self) -> Option<Timestamp> {
        self.meta().end
    }

    fn is_current(&self) -> bool {
        self.meta().is_current()
    }

    /// Marked for deletion; such entities are dropped before a batch is saved.
    fn is_deleted(&self) -> bool {
        false
    }
}
