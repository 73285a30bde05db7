//! Path helpers for index-relative paths.
//!
//! Relative paths are always stored with `/` separators, without a leading
//! `./` or `/`, so the same file has one spelling on every platform.

use std::path::{Component, Path};

/// Normalize a relative path to the stored form.
pub fn normalize_rel(rel: &str) -> String {
    let unified = rel.replace('\\', "/");
    unified
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Album path that directly contains `rel` (`""` for the index root).
pub fn parent_album_path(rel: &str) -> String {
    let rel = normalize_rel(rel);
    match rel.rsplit_once('/') {
        Some((parent, _)) => parent.to_string(),
        None => String::new(),
    }
}

/// Express `path` relative to `root` in stored form.
///
/// Returns `None` when `path` is not below `root` or tries to escape it.
pub fn relative_to(path: &Path, root: &Path) -> Option<String> {
    let rest = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rest.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
