//! Unified error type hierarchy for xcdeploy
//!
//! Provides structured error handling with DiscoveryError, BuildError,
//! DeployError, ConfigError and StoreError.

use std::io;
use thiserror::Error;

use crate::models::RunPhase;

/// Target discovery and scheme listing errors.
///
/// Only the structured sources surface here; the line-oriented device
/// listing degrades to an empty list instead of failing.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Command '{cmd}' failed: {reason}")]
    CommandFailed { cmd: String, reason: String },

    #[error("Could not decode simulator list: {0}")]
    InvalidSimulatorList(#[source] serde_json::Error),

    #[error("Could not decode scheme list: {0}")]
    InvalidSchemeList(#[source] serde_json::Error),

    #[error("Unsupported project container: {0}")]
    UnsupportedProject(String),
}

/// Build process execution errors.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Build cache directory unavailable: {0}")]
    CacheDirectory(String),

    #[error("Failed to spawn build process: {0}")]
    SpawnFailed(String),

    #[error("Build failed ({} errors, {} warnings)", errors.len(), warnings.len())]
    BuildFailed {
        errors: Vec<String>,
        warnings: Vec<String>,
        exit_code: Option<i32>,
    },

    #[error("Build succeeded but no app bundle was found under {0}")]
    ArtifactMissing(String),

    #[error("Build cancelled by user")]
    BuildCancelled,

    #[error("IO error during build: {0}")]
    IoError(#[from] io::Error),
}

impl BuildError {
    /// Get a user-facing error message suitable for a one-line report
    pub fn user_message(&self) -> String {
        match self {
            BuildError::BuildFailed { errors, .. } => match errors.first() {
                Some(first) => format!("Build failed: {}", first.trim()),
                None => "Build failed".to_string(),
            },
            other => other.to_string(),
        }
    }

    /// Optional remediation text shown under the message
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            BuildError::ArtifactMissing(_) => {
                Some("Check that the scheme builds an application target.")
            }
            BuildError::CacheDirectory(_) => {
                Some("Remove the project's DerivedData folder and try again.")
            }
            _ => None,
        }
    }
}

/// Install and launch errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeployError {
    /// Device is locked, untrusted or has developer mode disabled
    #[error("Device not ready: {reason}")]
    DeviceNotReady { reason: String, hint: String },

    #[error("Install failed: {detail}")]
    InstallFailed { detail: String, hint: Option<String> },

    #[error("Launch failed: {detail}")]
    LaunchFailed { phase: RunPhase, detail: String },

    #[error("Bundle identifier missing: {0}")]
    BundleIdMissing(String),

    #[error("Command '{cmd}' failed: {reason}")]
    CommandFailed { cmd: String, reason: String },

    #[error("Deploy cancelled by user")]
    Cancelled,
}

impl DeployError {
    /// Phase the error was raised in, for rendering
    pub fn phase(&self) -> RunPhase {
        match self {
            DeployError::DeviceNotReady { .. } => RunPhase::WaitingForUnlock,
            DeployError::InstallFailed { .. } => RunPhase::Installing,
            DeployError::LaunchFailed { phase, .. } => *phase,
            DeployError::BundleIdMissing(_) => RunPhase::Preparing,
            DeployError::CommandFailed { .. } | DeployError::Cancelled => RunPhase::Failed,
        }
    }

    /// Get a user-facing error message suitable for a one-line report
    pub fn user_message(&self) -> String {
        match self {
            DeployError::DeviceNotReady { reason, .. } => format!("Device not ready: {}", reason),
            DeployError::InstallFailed { detail, .. } => {
                format!("Could not install app: {}", first_line(detail))
            }
            DeployError::LaunchFailed { detail, .. } => {
                format!("Could not launch app: {}", first_line(detail))
            }
            DeployError::BundleIdMissing(path) => {
                format!("No bundle identifier found in {}", path)
            }
            DeployError::CommandFailed { cmd, reason } => {
                format!("Failed to execute '{}': {}", cmd, reason)
            }
            DeployError::Cancelled => "Cancelled".to_string(),
        }
    }

    /// Optional remediation text shown under the message
    pub fn remediation(&self) -> Option<&str> {
        match self {
            DeployError::DeviceNotReady { hint, .. } => Some(hint.as_str()),
            DeployError::InstallFailed { hint, .. } => hint.as_deref(),
            _ => None,
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("")
}

/// Configuration file parsing and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid JSON in config: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error during config operations: {0}")]
    IoError(#[from] io::Error),
}

/// Persisted key/value store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to encode value for '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("IO error during store write: {0}")]
    IoError(#[from] io::Error),
}
