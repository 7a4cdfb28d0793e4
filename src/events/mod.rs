//! In-process notifications of branch lifecycle changes.
//!
//! Consumers that maintain derived data (semantic indexes, traceability
//! logs, review caches) subscribe here instead of polling the directory:
//! - Branch creation
//! - Lock and unlock, including forced unlocks
//! - Completed commits (content, rebase, promotion)
//! - Administrative purges
//!
//! Buffers are bounded; a subscriber that falls behind is dropped rather
//! than slowing down commits.
//!
//! # Example
//!
//! ```ignore
//! let handle = directory.subscribe(SubscriptionConfig {
//!     filter: EventFilter::under("MAIN/PROJECT"),
//!     ..Default::default()
//! });
//!
//! while let Ok(event) = handle.recv() {
//!     match event {
//!         BranchEvent::CommitCompleted { path, timepoint, .. } => reindex(&path, timepoint),
//!         BranchEvent::Dropped { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{
    BranchEvent, DropReason, EventFilter, SubscriptionConfig, SubscriptionHandle, SubscriptionId,
};
