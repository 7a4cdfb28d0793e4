//! Branches and commits.
//!
//! A branch is stored as a sequence of rows, one per segment of its
//! timeline. Every completed commit closes the current row and opens a new
//! one at the commit timepoint, so the row covering any past timepoint
//! records exactly what the branch looked like then (its base, head and
//! hidden ancestor versions).

mod branch;
mod commit;
mod directory;

pub use branch::Branch;
pub use commit::Commit;
pub use directory::{BranchDirectory, DEFAULT_HISTORY_CACHE_SIZE};
