//! Locating the built app bundle after the build tool exits.

use crate::models::{BuildRequest, TargetKind};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const BUNDLE_EXT: &str = "app";
const SCAN_DEPTH: usize = 6;
const SCAN_ENTRY_LIMIT: usize = 10_000;

/// Resolve the installable bundle for `request`.
///
/// The path captured from build output wins when it exists as a directory.
/// Otherwise the products tree under `cache_dir` is scanned: every
/// configuration/platform products directory is checked for
/// `<scheme>.app`, then for any bundle, and finally the whole tree is
/// searched recursively. Blocking.
pub fn resolve_artifact(
    captured: Option<&Path>,
    cache_dir: &Path,
    request: &BuildRequest,
) -> Option<PathBuf> {
    if let Some(path) = captured {
        if path.is_dir() {
            return Some(path.to_path_buf());
        }
        log::debug!(
            "[Build] [ARTIFACT] Captured path {} does not exist, scanning products",
            path.display()
        );
    }

    let products = cache_dir.join("Build").join("Products");
    let candidates = product_dirs(&products, request);
    let exact = format!("{}.{}", request.scheme, BUNDLE_EXT);

    if let Some(found) = candidates
        .iter()
        .map(|dir| dir.join(&exact))
        .find(|p| p.is_dir())
    {
        return Some(found);
    }
    if let Some(found) = candidates.iter().find_map(|dir| first_bundle_in(dir)) {
        return Some(found);
    }
    find_bundle_in_tree(&products, SCAN_ENTRY_LIMIT)
}

/// `<Configuration>-<sdk>` products directories, preferring the target's own
/// SDK and the requested configuration.
fn product_dirs(products: &Path, request: &BuildRequest) -> Vec<PathBuf> {
    let mut configurations = vec![request.configuration.clone()];
    for standard in ["Debug", "Release"] {
        if !configurations.iter().any(|c| c == standard) {
            configurations.push(standard.to_string());
        }
    }

    let platform = request.target.platform;
    let suffixes = match request.target.kind {
        TargetKind::Simulated => [platform.simulator_sdk_suffix(), platform.device_sdk_suffix()],
        _ => [platform.device_sdk_suffix(), platform.simulator_sdk_suffix()],
    };

    let mut dirs = Vec::new();
    for configuration in &configurations {
        for suffix in suffixes {
            let name = if suffix.is_empty() {
                configuration.clone()
            } else {
                format!("{}-{}", configuration, suffix)
            };
            let dir = products.join(name);
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
    }
    dirs
}

fn is_bundle(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == BUNDLE_EXT) && path.is_dir()
}

fn sorted_entries(dir: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .map(|rd| rd.flatten().map(|e| e.path()).collect())
        .unwrap_or_default();
    entries.sort();
    entries
}

fn first_bundle_in(dir: &Path) -> Option<PathBuf> {
    sorted_entries(dir).into_iter().find(|p| is_bundle(p))
}

/// Shallowest bundle under `root`, first by name among equals. Bundles are
/// not descended into and the walk stops after `entry_limit` entries.
fn find_bundle_in_tree(root: &Path, entry_limit: usize) -> Option<PathBuf> {
    let mut walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(SCAN_DEPTH)
        .sort_by_file_name()
        .into_iter();
    let mut best: Option<(usize, PathBuf)> = None;
    let mut visited = 0usize;

    while let Some(entry) = walker.next() {
        visited += 1;
        if visited > entry_limit {
            log::debug!(
                "[Build] [ARTIFACT] Stopped scanning {} after {} entries",
                root.display(),
                entry_limit
            );
            break;
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => continue,
        };
        if !is_bundle(entry.path()) {
            continue;
        }
        walker.skip_current_dir();
        if best.as_ref().map_or(true, |(depth, _)| entry.depth() < *depth) {
            best = Some((entry.depth(), entry.into_path()));
        }
    }
    best.map(|(_, path)| path)
}
