//! Build cache (derived data) directory resolution and corruption checks.
//!
//! The build tool keeps one cache directory per project under a shared
//! root, named `<Project>-<random suffix>` with an `info.plist` that records
//! the project path. Reusing that directory keeps builds incremental. When
//! it cannot be used, a deterministic `<Project>-<fnv1a64 hex>` directory
//! takes its place.

use crate::error::BuildError;
use crate::system::file_url;
use fnv::FnvHasher;
use std::fs;
use std::hash::Hasher;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const METADATA_FILE: &str = "info.plist";
const WORKSPACE_KEY: &str = "WorkspacePath";
const PACKAGE_STATE_DIR: &str = "SourcePackages";
const PACKAGE_STATE_MANIFEST: &str = "workspace-state.json";

/// Where a build should write its products.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheResolution {
    pub path: PathBuf,
    /// True when an existing toolchain-created directory was matched
    pub reused: bool,
    /// Set when a matched directory was rejected as corrupted
    pub advisory: Option<String>,
}

/// 64-bit FNV-1a.
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

pub fn fallback_dir_name(project_name: &str, absolute_project: &Path) -> String {
    let hash = fnv1a64(absolute_project.to_string_lossy().as_bytes());
    format!("{}-{:016x}", project_name, hash)
}

/// A cache directory is corrupted when it exists but is not a directory,
/// its package state is not a directory, or its package manifest is not
/// valid JSON. A missing manifest is a fresh cache, not a corrupt one.
pub fn is_corrupted(dir: &Path) -> bool {
    let meta = match fs::symlink_metadata(dir) {
        Ok(meta) => meta,
        Err(_) => return false,
    };
    if !meta.is_dir() {
        return true;
    }

    let packages = dir.join(PACKAGE_STATE_DIR);
    if packages.exists() && !packages.is_dir() {
        return true;
    }

    let manifest = packages.join(PACKAGE_STATE_MANIFEST);
    if !manifest.exists() {
        return false;
    }
    match fs::read(&manifest) {
        Ok(bytes) => serde_json::from_slice::<serde_json::Value>(&bytes).is_err(),
        Err(_) => true,
    }
}

/// Find or create the cache directory for `absolute_project` under `root`.
pub fn resolve_cache_dir(
    root: &Path,
    project_name: &str,
    absolute_project: &Path,
) -> Result<CacheResolution, BuildError> {
    fs::create_dir_all(root).map_err(|e| {
        BuildError::CacheDirectory(format!("Failed to create {}: {}", root.display(), e))
    })?;

    let mut advisory = None;
    if let Some(existing) = find_existing(root, project_name, absolute_project) {
        if !is_corrupted(&existing) {
            log::info!("[Build] [CACHE] Reusing {}", existing.display());
            return Ok(CacheResolution {
                path: existing,
                reused: true,
                advisory: None,
            });
        }
        log::warn!("[Build] [CACHE] {} is corrupted", existing.display());
        advisory = Some(format!(
            "Build cache at {} is corrupted; using a clean cache directory",
            existing.display()
        ));
    }

    let fallback = root.join(fallback_dir_name(project_name, absolute_project));
    if is_corrupted(&fallback) {
        log::warn!("[Build] [CACHE] Removing corrupted {}", fallback.display());
        remove_path(&fallback)?;
    }
    fs::create_dir_all(&fallback).map_err(|e| {
        BuildError::CacheDirectory(format!("Failed to create {}: {}", fallback.display(), e))
    })?;

    Ok(CacheResolution {
        path: fallback,
        reused: false,
        advisory,
    })
}

/// Most recently modified `<Project>-*` directory whose recorded
/// `WorkspacePath` is the project, given as its path, resolved path or
/// file URL.
fn find_existing(root: &Path, project_name: &str, absolute_project: &Path) -> Option<PathBuf> {
    let mut paths = vec![absolute_project.to_path_buf()];
    if let Ok(canonical) = fs::canonicalize(absolute_project) {
        if !paths.contains(&canonical) {
            paths.push(canonical);
        }
    }
    let mut accepted: Vec<String> = paths
        .iter()
        .map(|p| p.to_string_lossy().trim_end_matches('/').to_string())
        .collect();
    accepted.extend(paths.iter().map(|p| file_url(p).trim_end_matches('/').to_string()));

    let prefix = format!("{}-", project_name);
    let entries = fs::read_dir(root).ok()?;

    let mut best: Option<(SystemTime, PathBuf)> = None;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with(&prefix) {
            continue;
        }
        let path = entry.path();
        let recorded = match recorded_workspace(&path.join(METADATA_FILE)) {
            Some(recorded) => recorded,
            None => continue,
        };
        if !accepted.iter().any(|a| *a == recorded.trim_end_matches('/')) {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        if best.as_ref().map_or(true, |(t, _)| modified > *t) {
            best = Some((modified, path));
        }
    }
    best.map(|(_, path)| path)
}

/// `WorkspacePath` from a cache directory's metadata plist.
fn recorded_workspace(metadata: &Path) -> Option<String> {
    let value = match plist::Value::from_file(metadata) {
        Ok(value) => value,
        Err(e) => {
            log::debug!("[Build] [CACHE] Unreadable {}: {}", metadata.display(), e);
            return None;
        }
    };
    value
        .as_dictionary()?
        .get(WORKSPACE_KEY)?
        .as_string()
        .map(str::to_string)
}

fn remove_path(path: &Path) -> Result<(), BuildError> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| {
        BuildError::CacheDirectory(format!("Failed to remove {}: {}", path.display(), e))
    })
}
