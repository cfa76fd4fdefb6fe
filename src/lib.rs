//! xcdeploy: build and deploy orchestration for Xcode projects
//!
//! This crate drives the external Apple toolchain (`xcodebuild`, `xcrun
//! simctl`, `xcrun devicectl`) to build a scheme and run it on a simulator,
//! a connected device or this Mac, reporting live progress along the way.
//!
//! The system is organized into functional modules:
//! - **error**: Per-component error types
//! - **models**: Targets, build requests, progress phases and events
//! - **config**: Persistent settings (tool paths, cache root, delays)
//! - **log_collector**: Disk-persisted transcripts and `log` backend
//! - **system**: Subprocess execution and output streaming
//! - **store**: JSON key/value store for cross-run state
//! - **discovery**: Simulator and device enumeration
//! - **schemes**: Signature-keyed scheme list cache
//! - **orchestrator**: Build execution, output classification, artifacts
//! - **deploy**: Install and launch strategies per target kind

// Core foundational modules
pub mod error;
pub mod models;

pub mod config;
pub mod log_collector;
pub mod store;
pub mod system;

pub mod discovery;
pub mod schemes;

pub mod deploy;
pub mod orchestrator;

// Re-export the log crate for macro usage
pub use log;

pub use log_collector::{LogCollector, LogLine};

// ============================================================================
// PUBLIC RE-EXPORTS FOR CONVENIENCE
// ============================================================================

pub use error::{BuildError, ConfigError, DeployError, DiscoveryError, StoreError};

pub use models::{
    BuildEvent, BuildPhase, BuildProgressEvent, BuildRequest, BuildResult, ConsoleLine,
    ConsoleSource, Platform, PowerState, ProjectKind, RunEvent, RunPhase, RunProgressEvent,
    Target, TargetKind,
};

pub use config::{Settings, SettingsManager};
pub use store::PreferenceStore;

pub use discovery::TargetDiscovery;
pub use schemes::{ProjectLocator, SchemeCacheStore, SchemeLister};

pub use deploy::DeployOrchestrator;
pub use orchestrator::{BuildOrchestrator, CancelHandle};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
