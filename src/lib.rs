//! # Branchline
//!
//! Branch-based temporal version control for versioned documents.
//!
//! ## Core Concepts
//!
//! - **Branches**: hierarchical paths (`MAIN/PROJECT/TASK`), each stored as a
//!   timeline of rows split at every commit
//! - **Commits**: one locked write per branch at a fixed timepoint
//! - **Temporal entities**: document versions stamped with path, start and end
//! - **Criteria**: the predicate selecting exactly the versions a branch sees,
//!   including what it inherits from its ancestors
//!
//! ## Example
//!
//! ```ignore
//! use branchline::{BUSINESS_ID_FIELD, CommitType, DocumentCollection, Store, StoreConfig};
//!
//! let store = Store::open_or_create(StoreConfig {
//!     path: "./my-store".into(),
//!     ..Default::default()
//! })?;
//! let concepts = DocumentCollection::<Concept>::new();
//!
//! store.branches().create("MAIN")?;
//! store.branches().create("MAIN/PROJECT")?;
//!
//! let mut commit = store.branches().open_commit("MAIN/PROJECT", CommitType::Content)?;
//! store
//!     .criteria()
//!     .end_old_versions(&mut commit, BUSINESS_ID_FIELD, ["100"], &concepts)?;
//! branchline::set_entity_meta_all(&mut batch, &commit);
//! concepts.save_all(batch)?;
//! store.branches().complete_commit(&commit)?;
//!
//! let visible = concepts.find(&store.criteria().branch_criteria("MAIN/PROJECT")?.to_predicate())?;
//! ```

pub mod branches;
pub mod codec;
pub mod criteria;
pub mod entity;
pub mod error;
pub mod events;
pub mod path;
pub mod storage;
pub mod store;
pub mod types;

// Re-exports
pub use branches::{Branch, BranchDirectory, Commit};
pub use criteria::{
    remove_deleted, set_entity_meta, set_entity_meta_all, BranchCriteria, BranchCriteriaBuilder,
    CriteriaLevel, EndedVersions, Predicate,
};
pub use entity::{EntityMeta, TemporalEntity, BUSINESS_ID_FIELD};
pub use error::{Result, StoreError};
pub use events::{
    BranchEvent, DropReason, EventFilter, SubscriptionConfig, SubscriptionHandle, SubscriptionId,
    SubscriptionManager,
};
pub use storage::{DocumentCollection, EntityStore};
pub use store::{Store, StoreConfig, StoreStats};
pub use types::*;
