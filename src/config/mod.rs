//! Configuration module for the build & deploy engine.
//!
//! # Module Structure
//!
//! - `loader`: Locates, loads and saves the settings file
//!
//! # Settings Management
//!
//! `Settings` holds tool locations, the build cache root and the delays used
//! by the deploy flow. `SettingsManager` loads it from
//! `~/.config/xcdeploy/settings.json`, falling back to defaults when the file
//! is missing or unreadable.

pub mod loader;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Engine settings
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    // Toolchain
    pub build_tool: String,
    pub device_tool: String,
    pub open_tool: String,

    // Build cache
    /// Root of the toolchain-native build cache; defaults to
    /// `~/Library/Developer/Xcode/DerivedData`
    pub derived_data_root: Option<PathBuf>,
    pub default_configuration: String,

    /// Namespace for persisted state (scheme cache etc.)
    pub suite: String,
    pub state_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,

    // Deploy timing
    pub boot_settle_ms: u64,
    pub viewer_settle_ms: u64,
    pub lock_poll_interval_ms: u64,
    /// Upper bound on waiting for a locked device; `None` waits until cancelled
    pub lock_wait_timeout_secs: Option<u64>,
    /// Grace period between SIGTERM and SIGKILL
    pub terminate_grace_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            build_tool: "xcodebuild".to_string(),
            device_tool: "xcrun".to_string(),
            open_tool: "open".to_string(),
            derived_data_root: None,
            default_configuration: "Debug".to_string(),
            suite: "xcdeploy".to_string(),
            state_dir: None,
            log_dir: None,
            boot_settle_ms: 2000,
            viewer_settle_ms: 1000,
            lock_poll_interval_ms: 1000,
            lock_wait_timeout_secs: Some(300),
            terminate_grace_ms: 3000,
        }
    }
}

impl Settings {
    /// Resolved build cache root.
    pub fn derived_data_root(&self) -> PathBuf {
        if let Some(root) = &self.derived_data_root {
            return root.clone();
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Library/Developer/Xcode/DerivedData")
    }

    /// Directory holding persisted key/value state for this suite.
    pub fn state_dir(&self) -> PathBuf {
        if let Some(dir) = &self.state_dir {
            return dir.clone();
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(&self.suite)
    }

    pub fn boot_settle(&self) -> Duration {
        Duration::from_millis(self.boot_settle_ms)
    }

    pub fn viewer_settle(&self) -> Duration {
        Duration::from_millis(self.viewer_settle_ms)
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }

    pub fn lock_wait_timeout(&self) -> Option<Duration> {
        self.lock_wait_timeout_secs.map(Duration::from_secs)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.build_tool.trim().is_empty() || self.device_tool.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "build_tool and device_tool must not be empty".to_string(),
            ));
        }
        if self.lock_poll_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "lock_poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.suite.trim().is_empty() || self.suite.contains('/') {
            return Err(ConfigError::ValidationFailed(format!(
                "invalid suite name: '{}'",
                self.suite
            )));
        }
        Ok(())
    }
}

/// Loads and persists `Settings`.
pub struct SettingsManager;

impl SettingsManager {
    /// Load settings from the global settings file, or return defaults if
    /// it doesn't exist.
    ///
    /// A file that fails to parse or validate is reported and replaced by
    /// defaults instead of aborting the run.
    pub fn load() -> Settings {
        match loader::get_global_settings_path() {
            Ok(path) => Self::load_from(&path),
            Err(e) => {
                log::warn!("[Config] [WARNING] {}; using defaults", e);
                Settings::default()
            }
        }
    }

    /// Load settings from an explicit path with the same fallback rules.
    pub fn load_from(path: &std::path::Path) -> Settings {
        match loader::load_settings_from_file(path) {
            Ok(settings) => match settings.validate() {
                Ok(()) => settings,
                Err(e) => {
                    log::warn!("[Config] [WARNING] {}; using defaults", e);
                    Settings::default()
                }
            },
            Err(ConfigError::FileNotFound(_)) => Settings::default(),
            Err(e) => {
                log::warn!(
                    "[Config] [WARNING] Failed to parse {}, falling back to defaults: {}",
                    path.display(),
                    e
                );
                Settings::default()
            }
        }
    }

    /// Save settings to the global settings file.
    pub fn save(settings: &Settings) -> Result<(), ConfigError> {
        settings.validate()?;
        let path = loader::get_global_settings_path()?;
        loader::save_settings_to_file(settings, &path)
    }
}
