//! App bundle metadata.

use crate::error::DeployError;
use plist::Value;
use std::path::{Path, PathBuf};

/// Info.plist locations, tried in order: flat (iOS family) then
/// `Contents/` (macOS).
const MANIFEST_PATHS: &[&str] = &["Info.plist", "Contents/Info.plist"];

fn read_manifest(app: &Path) -> Option<(PathBuf, Value)> {
    MANIFEST_PATHS.iter().find_map(|relative| {
        let path = app.join(relative);
        if !path.is_file() {
            return None;
        }
        match Value::from_file(&path) {
            Ok(value) => Some((path, value)),
            Err(e) => {
                log::warn!("[Deploy] [BUNDLE] Unreadable {}: {}", path.display(), e);
                None
            }
        }
    })
}

fn manifest_string(app: &Path, key: &str) -> Option<(PathBuf, String)> {
    let (path, manifest) = read_manifest(app)?;
    let value = manifest
        .as_dictionary()
        .and_then(|dict| dict.get(key))
        .and_then(Value::as_string)
        .map(str::trim)
        .filter(|s| !s.is_empty())?
        .to_string();
    Some((path, value))
}

/// `CFBundleIdentifier` of the bundle.
pub fn bundle_identifier(app: &Path) -> Result<String, DeployError> {
    manifest_string(app, "CFBundleIdentifier")
        .map(|(_, id)| id)
        .ok_or_else(|| DeployError::BundleIdMissing(app.display().to_string()))
}

/// Main executable named by `CFBundleExecutable`, placed where the bundle
/// layout keeps it.
pub fn executable_path(app: &Path) -> Option<PathBuf> {
    let (manifest, name) = manifest_string(app, "CFBundleExecutable")?;
    let path = if manifest.starts_with(app.join("Contents")) {
        app.join("Contents").join("MacOS").join(name)
    } else {
        app.join(name)
    };
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn plist(entries: &[(&str, &str)]) -> String {
        let body: String = entries
            .iter()
            .map(|(k, v)| format!("<key>{}</key><string>{}</string>", k, v))
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0"><dict>{}</dict></plist>"#,
            body
        )
    }

    #[test]
    fn test_flat_bundle() {
        let temp_dir = TempDir::new().unwrap();
        let app = temp_dir.path().join("App.app");
        fs::create_dir_all(&app).unwrap();
        fs::write(
            app.join("Info.plist"),
            plist(&[("CFBundleIdentifier", "com.example.App"), ("CFBundleExecutable", "App")]),
        )
        .unwrap();

        assert_eq!(bundle_identifier(&app).unwrap(), "com.example.App");
        assert_eq!(executable_path(&app), Some(app.join("App")));
    }

    #[test]
    fn test_macos_bundle_layout() {
        let temp_dir = TempDir::new().unwrap();
        let app = temp_dir.path().join("Tool.app");
        fs::create_dir_all(app.join("Contents")).unwrap();
        fs::write(
            app.join("Contents/Info.plist"),
            plist(&[("CFBundleIdentifier", "com.example.Tool"), ("CFBundleExecutable", "Tool")]),
        )
        .unwrap();

        assert_eq!(bundle_identifier(&app).unwrap(), "com.example.Tool");
        assert_eq!(executable_path(&app), Some(app.join("Contents/MacOS/Tool")));
    }

    #[test]
    fn test_missing_manifest_or_key() {
        let temp_dir = TempDir::new().unwrap();
        let app = temp_dir.path().join("Empty.app");
        fs::create_dir_all(&app).unwrap();
        assert!(matches!(
            bundle_identifier(&app),
            Err(DeployError::BundleIdMissing(_))
        ));

        fs::write(app.join("Info.plist"), plist(&[("CFBundleName", "Empty")])).unwrap();
        assert!(matches!(
            bundle_identifier(&app),
            Err(DeployError::BundleIdMissing(_))
        ));
        assert_eq!(executable_path(&app), None);
    }
}
