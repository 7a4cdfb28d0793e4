//! Branch path helpers.
//!
//! Branch paths are hierarchical (`MAIN/PROJECT/TASK`). The document store
//! cannot hold the separator in identifier fields, so every stored path is
//! "flattened" by substituting [`FLAT_SEPARATOR`]. Paths may therefore never
//! contain the substitute character themselves.

use crate::error::{Result, StoreError};

/// Name of the root branch.
pub const MAIN: &str = "MAIN";

/// Separator between path segments.
pub const SEPARATOR: char = '/';

/// Reserved substitute for [`SEPARATOR`] in stored paths.
pub const FLAT_SEPARATOR: char = '_';

/// Reject paths that cannot round-trip through [`flatten`].
pub fn validate(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(StoreError::InvalidPath("branch path can not be empty".into()));
    }
    if path.contains(FLAT_SEPARATOR) {
        return Err(StoreError::InvalidPath(format!(
            "branch path may not contain the '{}' character: {}",
            FLAT_SEPARATOR, path
        )));
    }
    if path.split(SEPARATOR).any(str::is_empty) {
        return Err(StoreError::InvalidPath(format!(
            "branch path has an empty segment: {}",
            path
        )));
    }
    Ok(())
}

/// `MAIN/A` -> `MAIN_A`.
pub fn flatten(path: &str) -> String {
    path.replace(SEPARATOR, &FLAT_SEPARATOR.to_string())
}

/// `MAIN_A` -> `MAIN/A`.
pub fn fatten(flat_path: &str) -> String {
    flat_path.replace(FLAT_SEPARATOR, &SEPARATOR.to_string())
}

/// Parent of a path, or `None` for a single-segment path.
pub fn parent_path(path: &str) -> Option<&str> {
    path.rfind(SEPARATOR).map(|idx| &path[..idx])
}

/// Ancestor paths from the immediate parent up to the root.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(parent_path(path), |p| parent_path(*p))
}

/// True when `descendant` sits anywhere below `ancestor`.
pub fn is_descendant(ancestor: &str, descendant: &str) -> bool {
    descendant.len() > ancestor.len()
        && descendant.starts_with(ancestor)
        && descendant[ancestor.len()..].starts_with(SEPARATOR)
}
