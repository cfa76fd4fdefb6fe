//! Scheme listing with a signature-keyed persistent cache.
//!
//! Listing schemes means running the build tool against the project, which
//! takes seconds on large workspaces. Results are cached per absolute
//! project path and reused while the project's signature is unchanged.

pub mod cache;
pub mod signature;

pub use cache::{SchemeCache, SchemeCacheEntry, SchemeCacheStore, MAX_ENTRIES};
pub use signature::{compute_signature, project_signature, workspace_project_refs, workspace_signature};

use crate::config::Settings;
use crate::error::DiscoveryError;
use crate::models::ProjectKind;
use crate::system::{absolute_path, describe_command, run_command};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct SchemeListing {
    workspace: Option<SchemeContainer>,
    project: Option<SchemeContainer>,
}

#[derive(Debug, Deserialize)]
struct SchemeContainer {
    #[serde(default)]
    schemes: Vec<String>,
}

/// Decode `-list -json` output. The build tool sometimes prints warnings
/// ahead of the JSON body, so everything before the first `{` is skipped.
pub fn decode_scheme_list(output: &str) -> Result<Vec<String>, DiscoveryError> {
    let start = output.find('{').unwrap_or(output.len());
    let listing: SchemeListing =
        serde_json::from_str(&output[start..]).map_err(DiscoveryError::InvalidSchemeList)?;
    Ok(listing
        .workspace
        .or(listing.project)
        .map(|c| c.schemes)
        .unwrap_or_default())
}

/// Lists schemes for a project or workspace, consulting the cache first.
pub struct SchemeLister {
    build_tool: String,
    cache: Arc<SchemeCacheStore>,
}

impl SchemeLister {
    pub fn new(settings: &Settings, cache: Arc<SchemeCacheStore>) -> Self {
        SchemeLister {
            build_tool: settings.build_tool.clone(),
            cache,
        }
    }

    pub async fn list(&self, project: &Path) -> Result<Vec<String>, DiscoveryError> {
        let kind = ProjectKind::from_path(project)
            .ok_or_else(|| DiscoveryError::UnsupportedProject(project.display().to_string()))?;
        let absolute = absolute_path(project);
        let key = absolute.to_string_lossy().to_string();
        let signature = compute_signature(&absolute, kind);

        if let Some(schemes) = self.cache.lookup(&key, signature) {
            log::debug!("[Schemes] [CACHE] Hit for {}", key);
            return Ok(schemes);
        }

        let args = vec![
            kind.flag().to_string(),
            key.clone(),
            "-list".to_string(),
            "-json".to_string(),
        ];
        let cmd = describe_command(&self.build_tool, &args);
        log::info!("[Schemes] Listing schemes for {}", key);
        let output = run_command(&self.build_tool, &args)
            .await
            .map_err(|e| DiscoveryError::CommandFailed {
                cmd: cmd.clone(),
                reason: e.to_string(),
            })?;
        if !output.success {
            return Err(DiscoveryError::CommandFailed {
                cmd,
                reason: output.combined(),
            });
        }

        let schemes = decode_scheme_list(&output.stdout)?;
        self.cache.store(&key, schemes.clone(), signature);
        Ok(schemes)
    }
}

/// Finds the buildable container inside a directory.
pub struct ProjectLocator;

impl ProjectLocator {
    /// A workspace wins over a project; the `project.xcworkspace` embedded
    /// in every project bundle never counts. Ties resolve alphabetically.
    pub fn find(dir: &Path) -> Option<PathBuf> {
        let mut entries: Vec<PathBuf> = fs::read_dir(dir)
            .ok()?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        entries.sort();

        let workspace = entries.iter().find(|p| {
            ProjectKind::from_path(p) == Some(ProjectKind::Workspace)
                && p.file_name().map_or(false, |n| n != "project.xcworkspace")
        });
        workspace
            .or_else(|| {
                entries
                    .iter()
                    .find(|p| ProjectKind::from_path(p) == Some(ProjectKind::Project))
            })
            .cloned()
    }
}
