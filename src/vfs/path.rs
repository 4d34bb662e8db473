//! Slash-path helpers shared by resolution and the tree operations.
//!
//! Canonical paths are absolute, `/`-separated, with no empty, `.` or `..`
//! segments. Canonicalization itself happens by walking the tree (so `..`
//! follows real parent links); these helpers only slice and glue strings.

/// Segments of `path` with empty and `.` components dropped. `..` is kept
/// for the resolver to interpret against parent links.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty() && *s != ".")
}

/// True when `path` should be resolved from the root rather than the
/// caller's working directory.
pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}

/// Canonical path of a child named `name` under the directory at
/// `parent_path`.
pub fn child_path(parent_path: &str, name: &str) -> String {
    if parent_path == "/" {
        format!("/{name}")
    } else {
        format!("{parent_path}/{name}")
    }
}

/// Final segment of a canonical path; the root has none.
pub fn base_name(path: &str) -> Option<&str> {
    if path == "/" {
        None
    } else {
        path.rsplit('/').next()
    }
}
