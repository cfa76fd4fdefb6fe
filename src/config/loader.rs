//! Settings file loader and serialization.

use super::Settings;
use crate::error::ConfigError;
use std::fs;
use std::path::{Path, PathBuf};

/// Get the global settings path: ~/.config/xcdeploy/settings.json
pub fn get_global_settings_path() -> Result<PathBuf, ConfigError> {
    let config_dir = dirs::config_dir().ok_or_else(|| {
        ConfigError::ValidationFailed("Cannot determine config directory".to_string())
    })?;

    Ok(config_dir.join("xcdeploy").join("settings.json"))
}

/// Load settings from a JSON file.
pub fn load_settings_from_file(path: &Path) -> Result<Settings, ConfigError> {
    validate_settings_path(path)?;

    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(format!("Settings file not found at: {}", path.display()))
        } else {
            ConfigError::IoError(e)
        }
    })?;

    let settings: Settings = serde_json::from_str(&content).map_err(ConfigError::InvalidJson)?;
    Ok(settings)
}

/// Save settings to a JSON file.
pub fn save_settings_to_file(settings: &Settings, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(ConfigError::IoError)?;
        }
    }

    let json_content =
        serde_json::to_string_pretty(settings).map_err(ConfigError::InvalidJson)?;
    fs::write(path, json_content).map_err(ConfigError::IoError)?;

    Ok(())
}

/// Validate that the settings path has a .json extension.
pub fn validate_settings_path(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "Settings path cannot be empty".to_string(),
        ));
    }

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(()),
        _ => Err(ConfigError::ValidationFailed(format!(
            "Settings file must have .json extension: {}",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_settings() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/settings.json");

        let original = Settings {
            build_tool: "/usr/local/bin/xcodebuild".to_string(),
            lock_wait_timeout_secs: None,
            derived_data_root: Some(PathBuf::from("/tmp/dd")),
            ..Settings::default()
        };

        save_settings_to_file(&original, &path).expect("Failed to save settings");
        assert!(path.exists(), "Settings file should exist after save");

        let loaded = load_settings_from_file(&path).expect("Failed to load settings");
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_validate_settings_path_invalid_extension() {
        assert!(validate_settings_path(Path::new("settings.toml")).is_err());
        assert!(validate_settings_path(Path::new("settings")).is_err());
        assert!(validate_settings_path(Path::new("")).is_err());
        assert!(validate_settings_path(Path::new("/tmp/settings.json")).is_ok());
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = load_settings_from_file(Path::new("/nonexistent/path/settings.json"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_invalid_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("invalid.json");

        let mut file = fs::File::create(&path).unwrap();
        file.write_all(b"{ invalid json }").unwrap();

        let result = load_settings_from_file(&path);
        assert!(matches!(result, Err(ConfigError::InvalidJson(_))));
    }
}
