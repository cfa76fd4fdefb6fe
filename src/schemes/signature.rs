//! Content signatures for scheme-list caching.
//!
//! A signature is the newest modification time (epoch seconds) among the
//! files that can change a project's scheme list. Workspaces fold in the
//! signatures of every project they reference.

use super::cache::epoch_seconds;
use crate::models::ProjectKind;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<(/?)(Group|FileRef)\b((?:[^>"']|"[^"]*"|'[^']*')*?)(/?)>"#).expect("valid regex")
});
static LOCATION_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:^|\s)location\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
});
static COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));
static CHAR_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&#(x[0-9A-Fa-f]+|[0-9]+);").expect("valid regex"));

const SCHEME_EXT: &str = "xcscheme";

pub fn compute_signature(path: &Path, kind: ProjectKind) -> Option<f64> {
    match kind {
        ProjectKind::Project => project_signature(path),
        ProjectKind::Workspace => workspace_signature(path),
    }
}

/// `project.pbxproj` plus shared and per-user scheme files.
pub fn project_signature(project: &Path) -> Option<f64> {
    let mut inputs = vec![project.join("project.pbxproj")];
    inputs.extend(scheme_files(project));
    newest_or_container(project, &inputs)
}

/// `contents.xcworkspacedata`, the workspace's own scheme files, and the
/// signature of every referenced project.
pub fn workspace_signature(workspace: &Path) -> Option<f64> {
    let mut inputs = vec![workspace.join("contents.xcworkspacedata")];
    inputs.extend(scheme_files(workspace));
    let own = newest_or_container(workspace, &inputs)?;

    let folded = workspace_project_refs(workspace)
        .iter()
        .filter_map(|project| project_signature(project))
        .fold(own, f64::max);
    Some(folded)
}

/// Projects referenced from a workspace's contents descriptor, resolved
/// and deduplicated in document order.
pub fn workspace_project_refs(workspace: &Path) -> Vec<PathBuf> {
    let contents = match fs::read_to_string(workspace.join("contents.xcworkspacedata")) {
        Ok(contents) => contents,
        Err(e) => {
            log::debug!(
                "[Schemes] [SIG] No workspace contents in {}: {}",
                workspace.display(),
                e
            );
            return Vec::new();
        }
    };
    parse_project_refs(&contents, workspace)
}

fn parse_project_refs(contents: &str, workspace: &Path) -> Vec<PathBuf> {
    let container = workspace.parent().unwrap_or(Path::new("/")).to_path_buf();
    let mut groups: Vec<PathBuf> = vec![container.clone()];
    let mut seen = HashSet::new();
    let mut refs = Vec::new();
    let contents = COMMENT.replace_all(contents, "");

    for tag in TAG_PATTERN.captures_iter(&contents) {
        let closing = !tag[1].is_empty();
        let self_closing = !tag[4].is_empty();
        let location = LOCATION_ATTR
            .captures(&tag[3])
            .and_then(|c| c.get(1).or_else(|| c.get(2)))
            .map(|m| unescape_entities(m.as_str()));
        let base = groups.last().cloned().unwrap_or_else(|| container.clone());

        match &tag[2] {
            "Group" if closing => {
                if groups.len() > 1 {
                    groups.pop();
                }
            }
            "Group" => {
                if self_closing {
                    continue;
                }
                let resolved = location
                    .as_deref()
                    .and_then(|loc| resolve_location(loc, &base, &container, workspace))
                    .unwrap_or(base);
                groups.push(resolved);
            }
            "FileRef" if !closing => {
                let Some(resolved) = location
                    .as_deref()
                    .and_then(|loc| resolve_location(loc, &base, &container, workspace))
                else {
                    continue;
                };
                let is_project = resolved
                    .extension()
                    .map_or(false, |ext| ext == "xcodeproj");
                if is_project && seen.insert(resolved.clone()) {
                    refs.push(resolved);
                }
            }
            _ => {}
        }
    }
    refs
}

/// Resolve one `location` attribute against the current group directory.
fn resolve_location(
    location: &str,
    group_base: &Path,
    container: &Path,
    workspace: &Path,
) -> Option<PathBuf> {
    let (scheme, rest) = location.split_once(':')?;
    let resolved = match scheme {
        "absolute" => PathBuf::from(rest),
        "group" => join_non_empty(group_base, rest),
        "container" => join_non_empty(container, rest),
        "file" if rest.starts_with('/') => PathBuf::from(rest),
        "file" => join_non_empty(container, rest),
        "self" if rest.is_empty() => {
            // Embedded workspace inside a project bundle refers to its project.
            let parent = workspace.parent()?;
            if parent.extension().map_or(true, |ext| ext != "xcodeproj") {
                return None;
            }
            parent.to_path_buf()
        }
        "self" => join_non_empty(container, rest),
        _ => return None,
    };
    Some(crate::system::absolute_path(&resolved))
}

fn join_non_empty(base: &Path, rest: &str) -> PathBuf {
    if rest.is_empty() {
        base.to_path_buf()
    } else {
        base.join(rest)
    }
}

fn unescape_entities(value: &str) -> String {
    let value = CHAR_REF.replace_all(value, |caps: &regex::Captures| {
        let code = &caps[1];
        let parsed = match code.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse().ok(),
        };
        // '&' stays escaped so the named pass below cannot re-read it.
        match parsed.and_then(char::from_u32) {
            Some('&') => "&amp;".to_string(),
            Some(c) => c.to_string(),
            None => caps[0].to_string(),
        }
    });
    value
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Shared schemes and every user's schemes under a container.
fn scheme_files(container: &Path) -> Vec<PathBuf> {
    let mut files = list_schemes(&container.join("xcshareddata").join("xcschemes"));
    if let Ok(users) = fs::read_dir(container.join("xcuserdata")) {
        for user in users.flatten() {
            let path = user.path();
            if path.extension().map_or(false, |ext| ext == "xcuserdatad") {
                files.extend(list_schemes(&path.join("xcschemes")));
            }
        }
    }
    files
}

fn list_schemes(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.extension().map_or(false, |ext| ext == SCHEME_EXT))
                .collect()
        })
        .unwrap_or_default()
}

fn modified_seconds(path: &Path) -> Option<f64> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(epoch_seconds(modified))
}

fn newest_or_container(container: &Path, inputs: &[PathBuf]) -> Option<f64> {
    inputs
        .iter()
        .filter_map(|p| modified_seconds(p))
        .reduce(f64::max)
        .or_else(|| modified_seconds(container))
}
