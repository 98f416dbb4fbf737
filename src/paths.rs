//! Path helpers shared by the engine and the backends.
//!
//! Source paths are "/"-separated and may carry a `scheme://` prefix
//! (`s3://bucket/dir`, `file:///tmp`). Local destinations are `PathBuf`s.

use crate::error::{EngineError, EngineResult};
use std::path::{Path, PathBuf};

/// Split `path` into its `scheme://` prefix (if any) and the remainder.
fn split_scheme(path: &str) -> (&str, &str) {
    if let Some(idx) = path.find("://") {
        let scheme = &path[..idx];
        let valid = !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if valid {
            return (&path[..idx + 3], &path[idx + 3..]);
        }
    }
    ("", path)
}

/// Join `segment` onto `base`, collapsing redundant separators.
///
/// The `//` of a leading `scheme://` is kept, as is a leading `/` of an
/// absolute path. Trailing separators are removed.
pub fn join_path(base: &str, segment: &str) -> String {
    let (scheme, rest) = split_scheme(base);
    let absolute = rest.starts_with('/') || (rest.is_empty() && segment.starts_with('/'));

    let parts: Vec<&str> = rest
        .split('/')
        .chain(segment.split('/'))
        .filter(|part| !part.is_empty())
        .collect();

    let mut joined = String::with_capacity(base.len() + segment.len() + 1);
    joined.push_str(scheme);
    if absolute {
        joined.push('/');
    }
    joined.push_str(&parts.join("/"));
    joined
}

/// Normalized form of a single path.
pub fn normalize_path(path: &str) -> String {
    join_path(path, "")
}

/// Last segment of a path.
pub fn file_name(path: &str) -> String {
    let normalized = normalize_path(path);
    let (_, rest) = split_scheme(&normalized);
    rest.rsplit('/').next().unwrap_or_default().to_string()
}

/// The part of `path` below `root`, or `None` when `path` is outside it.
pub fn relative_path(root: &str, path: &str) -> Option<String> {
    let root = normalize_path(root);
    let path = normalize_path(path);
    if root.is_empty() || root == "/" {
        return Some(path.trim_start_matches('/').to_string());
    }
    if path == root {
        return Some(String::new());
    }
    path.strip_prefix(&root)
        .and_then(|rest| rest.strip_prefix('/'))
        .map(|rest| rest.to_string())
}

/// Build a local path from a "/"-separated relative path below `dest_root`.
pub fn local_destination(dest_root: &Path, relative: &str) -> EngineResult<PathBuf> {
    let mut path = dest_root.to_path_buf();
    for segment in relative.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(EngineError::InvalidDestination {
                    path: relative.to_string(),
                    reason: "path escapes the destination directory".to_string(),
                })
            }
            _ => path.push(segment),
        }
    }
    Ok(path)
}
