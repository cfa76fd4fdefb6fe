//! Path normalization shared by the cache lookups.

use std::path::{Component, Path, PathBuf};

/// Absolute, lexically normalized form of `path` (no symlink resolution).
pub fn absolute_path(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// `file://` URL form of an absolute path, with a trailing slash as the
/// toolchain writes it for directories.
pub fn file_url(path: &Path) -> String {
    let mut url = format!("file://{}", path.display());
    if !url.ends_with('/') {
        url.push('/');
    }
    url.replace(' ', "%20")
}
