use std::path::{Component, Path, PathBuf};

use crate::ProbeError;

/// System prefixes a private-key path must never resolve under.
const SENSITIVE_PREFIXES: &[&str] = &[
    "/etc", "/usr/bin", "/usr/sbin", "/bin", "/sbin", "/boot", "/sys", "/proc", "/dev",
];

/// Validate a user-supplied private-key path before it is handed to the SSH
/// layer. An empty path is fine (password authentication); otherwise the path
/// must be traversal-free, outside sensitive system directories, and point at
/// an existing regular file.
pub fn validate_private_key_path(key_path: &str) -> Result<(), ProbeError> {
    if key_path.is_empty() {
        return Ok(());
    }

    let path = Path::new(key_path);
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(ProbeError::KeyPath(format!(
            "{key_path}: parent-directory traversal is not allowed"
        )));
    }

    let absolute: PathBuf = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| ProbeError::KeyPath(e.to_string()))?
            .join(path)
    };

    for prefix in SENSITIVE_PREFIXES {
        if absolute.starts_with(prefix) {
            return Err(ProbeError::KeyPath(format!(
                "{key_path}: refusing to read from {prefix}"
            )));
        }
    }

    let metadata = std::fs::metadata(&absolute)
        .map_err(|e| ProbeError::KeyPath(format!("{key_path}: {e}")))?;
    if metadata.is_dir() {
        return Err(ProbeError::KeyPath(format!(
            "{key_path}: path is a directory, not a key file"
        )));
    }

    Ok(())
}

/// True when `name` is usable as a bare file name: non-empty and free of
/// separators, traversal, and shell-hostile characters.
pub fn is_safe_filename(name: &str) -> bool {
    if name.is_empty() || name.contains("..") {
        return false;
    }
    !name
        .chars()
        .any(|c| matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
}
