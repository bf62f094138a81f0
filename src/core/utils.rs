use std::path::{Component, Path, PathBuf};

use crate::core::{FsError, Result};

/// Removes `.` and `..` components without touching the file system.
///
/// For absolute paths `..` never climbs above the root. For relative paths
/// leading `..` components that cannot be folded are kept, so `a/../../b`
/// becomes `../b`. A relative path that folds away completely becomes the
/// empty path.
pub fn normalize<P: AsRef<Path>>(path: P) -> PathBuf {
    let mut result = PathBuf::new();
    let mut depth = 0usize; // normal components pushed after the root/prefix

    for component in path.as_ref().components() {
        match component {
            Component::Prefix(_) | Component::RootDir => {
                result.push(component.as_os_str());
                depth = 0;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth > 0 {
                    result.pop();
                    depth -= 1;
                } else if !result.has_root() {
                    result.push("..");
                }
            }
            Component::Normal(name) => {
                result.push(name);
                depth += 1;
            }
        }
    }
    result
}

/// Returns true if `path` contains a `..` component.
pub fn has_parent_refs<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .components()
        .any(|c| matches!(c, Component::ParentDir))
}

/// Returns true if `path` is a file system root (`/`, `C:\`).
pub fn is_root<P: AsRef<Path>>(path: P) -> bool {
    let path = path.as_ref();
    path.has_root() && path.parent().is_none()
}

/// Computes the path that, joined to `base`, yields `target`.
///
/// Both sides are normalized first and must agree on absoluteness. Existence
/// on disk is irrelevant.
pub fn relativize<P: AsRef<Path>, Q: AsRef<Path>>(base: P, target: Q) -> Result<PathBuf> {
    let base = normalize(base);
    let target = normalize(target);
    if base.has_root() != target.has_root() {
        return Err(FsError::InvalidPath(format!(
            "cannot relativize {} against {}",
            target.display(),
            base.display()
        )));
    }

    let base_parts: Vec<_> = base.components().collect();
    let target_parts: Vec<_> = target.components().collect();
    let common = base_parts
        .iter()
        .zip(target_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    // a `..` left in the base cannot be walked back
    if base_parts[common..]
        .iter()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(FsError::InvalidPath(format!(
            "cannot relativize {} against {}",
            target.display(),
            base.display()
        )));
    }

    let mut result = PathBuf::new();
    for _ in common..base_parts.len() {
        result.push("..");
    }
    for part in &target_parts[common..] {
        result.push(part.as_os_str());
    }
    Ok(result)
}

/// Checks that `name` is a single, well-formed path segment.
pub fn validate_segment(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(FsError::InvalidPath("empty name".into()));
    }
    if name.contains('\0') {
        return Err(FsError::InvalidPath(format!("{name:?} contains NUL")));
    }
    if name.chars().any(std::path::is_separator) {
        return Err(FsError::InvalidPath(format!(
            "{name:?} is not a single path segment"
        )));
    }
    Ok(())
}

/// Checks a caller-supplied path string.
pub fn validate_path_str(path: &str) -> Result<()> {
    if path.contains('\0') {
        return Err(FsError::InvalidPath(format!("{path:?} contains NUL")));
    }
    Ok(())
}
