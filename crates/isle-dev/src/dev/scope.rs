//! Change scoping: decides whether a changed file warrants a client rebuild.

use crate::config::normalize;
use std::path::{Path, PathBuf};

/// Path of `changed` relative to `root`, if `changed` lies inside `root`.
///
/// Both paths are normalized lexically first. Returns `None` when the path
/// escapes `root` through `..`, is relative while `root` is absolute (or
/// vice versa), or sits on a different filesystem root.
pub fn relative_to(changed: &Path, root: &Path) -> Option<PathBuf> {
    if changed.is_absolute() != root.is_absolute() {
        return None;
    }
    let changed = normalize(changed);
    let root = normalize(root);
    changed.strip_prefix(&root).ok().map(Path::to_path_buf)
}

/// Whether a change to `changed` is inside the application source root.
///
/// Any file under the root counts; there is no extension or ignore-list
/// filtering at this level.
pub fn in_scope(changed: &Path, source_root: &Path) -> bool {
    relative_to(changed, source_root).is_some()
}
