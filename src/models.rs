//! Core data types for xcdeploy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::BuildError;

/// Where a target runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetKind {
    Simulated,
    Physical,
    LocalHost,
}

/// OS family of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Ios,
    MacOs,
    WatchOs,
    TvOs,
    VisionOs,
}

impl Platform {
    /// Human-readable platform name, also used for sorting.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "iOS",
            Platform::MacOs => "macOS",
            Platform::WatchOs => "watchOS",
            Platform::TvOs => "tvOS",
            Platform::VisionOs => "visionOS",
        }
    }

    /// Runtime identifier prefix used by the simulator runtime list.
    /// macOS has no simulator runtime.
    pub fn runtime_prefix(&self) -> Option<&'static str> {
        match self {
            Platform::Ios => Some("com.apple.CoreSimulator.SimRuntime.iOS-"),
            Platform::WatchOs => Some("com.apple.CoreSimulator.SimRuntime.watchOS-"),
            Platform::TvOs => Some("com.apple.CoreSimulator.SimRuntime.tvOS-"),
            Platform::VisionOs => Some("com.apple.CoreSimulator.SimRuntime.xrOS-"),
            Platform::MacOs => None,
        }
    }

    /// SDK directory suffix for device builds (`Debug-iphoneos`).
    pub fn device_sdk_suffix(&self) -> &'static str {
        match self {
            Platform::Ios => "iphoneos",
            Platform::MacOs => "",
            Platform::WatchOs => "watchos",
            Platform::TvOs => "appletvos",
            Platform::VisionOs => "xros",
        }
    }

    /// SDK directory suffix for simulator builds (`Debug-iphonesimulator`).
    pub fn simulator_sdk_suffix(&self) -> &'static str {
        match self {
            Platform::Ios => "iphonesimulator",
            Platform::MacOs => "",
            Platform::WatchOs => "watchsimulator",
            Platform::TvOs => "appletvsimulator",
            Platform::VisionOs => "xrsimulator",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Power or reachability state of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    Running,
    Stopped,
    Available,
    Unreachable,
}

/// A concrete place an artifact can be installed and run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub name: String,
    pub kind: TargetKind,
    pub platform: Platform,
    pub state: PowerState,
    pub os_version: Option<String>,
}

impl Target {
    pub fn is_running(&self) -> bool {
        self.state == PowerState::Running
    }

    /// `-destination` argument for the build tool.
    pub fn destination(&self) -> String {
        let platform = match self.kind {
            TargetKind::Simulated => format!("{} Simulator", self.platform.as_str()),
            TargetKind::Physical | TargetKind::LocalHost => self.platform.as_str().to_string(),
        };
        if self.id.is_empty() {
            format!("platform={}", platform)
        } else {
            format!("platform={},id={}", platform, self.id)
        }
    }

    /// Name plus version, e.g. `iPhone 15 (17.2)`.
    pub fn display_name(&self) -> String {
        match &self.os_version {
            Some(version) => format!("{} ({})", self.name, version),
            None => self.name.clone(),
        }
    }
}

/// Kind of Xcode container being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectKind {
    Project,
    Workspace,
}

impl ProjectKind {
    /// Derive the kind from the container extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("xcodeproj") => Some(ProjectKind::Project),
            Some("xcworkspace") => Some(ProjectKind::Workspace),
            _ => None,
        }
    }

    /// Build tool flag selecting this container kind.
    pub fn flag(&self) -> &'static str {
        match self {
            ProjectKind::Project => "-project",
            ProjectKind::Workspace => "-workspace",
        }
    }
}

/// Everything needed to run one build.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub project_path: PathBuf,
    pub project_kind: ProjectKind,
    pub scheme: String,
    pub target: Target,
    pub configuration: String,
    pub verbose: bool,
}

impl BuildRequest {
    /// Create a request with the default "Debug" configuration.
    ///
    /// The container kind is derived from the extension; anything that is not
    /// a workspace is treated as a project.
    pub fn new(project_path: impl Into<PathBuf>, scheme: impl Into<String>, target: Target) -> Self {
        let project_path = project_path.into();
        let project_kind = ProjectKind::from_path(&project_path).unwrap_or(ProjectKind::Project);
        BuildRequest {
            project_path,
            project_kind,
            scheme: scheme.into(),
            target,
            configuration: "Debug".to_string(),
            verbose: false,
        }
    }

    pub fn with_configuration(mut self, configuration: impl Into<String>) -> Self {
        self.configuration = configuration.into();
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Project name used for cache directory lookups (`App` for `App.xcodeproj`).
    pub fn project_name(&self) -> String {
        self.project_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "Project".to_string())
    }
}

/// Build progress phases, declared in the order a successful build passes
/// through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildPhase {
    Preparing,
    ResolvingPackages,
    FetchingPackages,
    UpdatingPackages,
    CheckingOutPackages,
    Processing,
    Compiling,
    Linking,
    Signing,
    Copying,
    Succeeded,
    Failed,
    WaitingForDevice,
    PreparingDevice,
    RegisteringDevice,
}

impl BuildPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildPhase::Preparing => "preparing",
            BuildPhase::ResolvingPackages => "resolving-packages",
            BuildPhase::FetchingPackages => "fetching-packages",
            BuildPhase::UpdatingPackages => "updating-packages",
            BuildPhase::CheckingOutPackages => "checking-out-packages",
            BuildPhase::Processing => "processing",
            BuildPhase::Compiling => "compiling",
            BuildPhase::Linking => "linking",
            BuildPhase::Signing => "signing",
            BuildPhase::Copying => "copying",
            BuildPhase::Succeeded => "succeeded",
            BuildPhase::Failed => "failed",
            BuildPhase::WaitingForDevice => "waiting-for-device",
            BuildPhase::PreparingDevice => "preparing-device",
            BuildPhase::RegisteringDevice => "registering-device",
        }
    }

    /// Position in the main progression. Package phases share one stage
    /// because they repeat per package. Device phases have no stage.
    pub fn stage(&self) -> Option<u8> {
        match self {
            BuildPhase::Preparing => Some(0),
            BuildPhase::ResolvingPackages
            | BuildPhase::FetchingPackages
            | BuildPhase::UpdatingPackages
            | BuildPhase::CheckingOutPackages => Some(1),
            BuildPhase::Processing => Some(2),
            BuildPhase::Compiling => Some(3),
            BuildPhase::Linking => Some(4),
            BuildPhase::Signing => Some(5),
            BuildPhase::Copying => Some(6),
            BuildPhase::Succeeded | BuildPhase::Failed => Some(7),
            BuildPhase::WaitingForDevice
            | BuildPhase::PreparingDevice
            | BuildPhase::RegisteringDevice => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildPhase::Succeeded | BuildPhase::Failed)
    }

    pub fn is_device_phase(&self) -> bool {
        self.stage().is_none()
    }

    /// Percentage reported when the phase is entered.
    pub fn base_percent(&self) -> u8 {
        match self {
            BuildPhase::Preparing => 2,
            BuildPhase::ResolvingPackages => 5,
            BuildPhase::FetchingPackages => 8,
            BuildPhase::UpdatingPackages => 11,
            BuildPhase::CheckingOutPackages => 14,
            BuildPhase::Processing => 20,
            BuildPhase::Compiling => 25,
            BuildPhase::Linking => 88,
            BuildPhase::Signing => 92,
            BuildPhase::Copying => 96,
            BuildPhase::Succeeded | BuildPhase::Failed => 100,
            BuildPhase::WaitingForDevice
            | BuildPhase::PreparingDevice
            | BuildPhase::RegisteringDevice => 0,
        }
    }
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let all = [
            BuildPhase::Preparing,
            BuildPhase::ResolvingPackages,
            BuildPhase::FetchingPackages,
            BuildPhase::UpdatingPackages,
            BuildPhase::CheckingOutPackages,
            BuildPhase::Processing,
            BuildPhase::Compiling,
            BuildPhase::Linking,
            BuildPhase::Signing,
            BuildPhase::Copying,
            BuildPhase::Succeeded,
            BuildPhase::Failed,
            BuildPhase::WaitingForDevice,
            BuildPhase::PreparingDevice,
            BuildPhase::RegisteringDevice,
        ];
        all.into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("Unknown build phase: {}", s))
    }
}

/// One recognized build progress transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildProgressEvent {
    pub phase: BuildPhase,
    pub percent: u8,
    pub message: String,
    pub detail: Option<String>,
}

/// Outcome of one build.
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub success: bool,
    pub artifact_path: Option<PathBuf>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub duration: Duration,
    pub exit_code: Option<i32>,
    pub cancelled: bool,
    /// Directory the build tool wrote its products into
    pub cache_dir: PathBuf,
    pub transcript_lines: usize,
}

impl BuildResult {
    /// Convert into the installable artifact path, mapping failure
    /// outcomes onto the matching error category.
    pub fn into_artifact(self) -> Result<PathBuf, BuildError> {
        if self.cancelled {
            return Err(BuildError::BuildCancelled);
        }
        if !self.success {
            return Err(BuildError::BuildFailed {
                errors: self.errors,
                warnings: self.warnings,
                exit_code: self.exit_code,
            });
        }
        self.artifact_path
            .ok_or_else(|| BuildError::ArtifactMissing(self.cache_dir.display().to_string()))
    }
}

/// Deploy progress phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunPhase {
    CheckingDevice,
    WaitingForUnlock,
    Preparing,
    Booting,
    Installing,
    Copying,
    Verifying,
    Launching,
    Running,
    Streaming,
    Failed,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::CheckingDevice => "checking-device",
            RunPhase::WaitingForUnlock => "waiting-for-unlock",
            RunPhase::Preparing => "preparing",
            RunPhase::Booting => "booting",
            RunPhase::Installing => "installing",
            RunPhase::Copying => "copying",
            RunPhase::Verifying => "verifying",
            RunPhase::Launching => "launching",
            RunPhase::Running => "running",
            RunPhase::Streaming => "streaming",
            RunPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProgressEvent {
    pub phase: RunPhase,
    pub message: String,
}

/// Origin of a relayed console line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsoleSource {
    Stdout,
    Stderr,
    SystemLog,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleLine {
    pub source: ConsoleSource,
    pub text: String,
}

/// Events emitted by the build orchestrator.
#[derive(Debug, Clone)]
pub enum BuildEvent {
    Progress(BuildProgressEvent),
    /// Raw output line, only emitted in verbose mode
    Output(String),
}

/// Events emitted by the deploy orchestrator.
#[derive(Debug, Clone)]
pub enum RunEvent {
    Progress(RunProgressEvent),
    Console(ConsoleLine),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim(id: &str) -> Target {
        Target {
            id: id.to_string(),
            name: "iPhone 15".to_string(),
            kind: TargetKind::Simulated,
            platform: Platform::Ios,
            state: PowerState::Stopped,
            os_version: Some("17.2".to_string()),
        }
    }

    #[test]
    fn test_destination_strings() {
        assert_eq!(sim("ABC").destination(), "platform=iOS Simulator,id=ABC");
        let mut mac = sim("");
        mac.kind = TargetKind::LocalHost;
        mac.platform = Platform::MacOs;
        assert_eq!(mac.destination(), "platform=macOS");
    }

    #[test]
    fn test_build_request_defaults() {
        let req = BuildRequest::new("/tmp/App.xcworkspace", "App", sim("A"));
        assert_eq!(req.configuration, "Debug");
        assert_eq!(req.project_kind, ProjectKind::Workspace);
        assert_eq!(req.project_name(), "App");
        assert!(!req.verbose);
    }

    #[test]
    fn test_phase_stages_are_ordered() {
        assert!(BuildPhase::Preparing.stage() < BuildPhase::FetchingPackages.stage());
        assert_eq!(
            BuildPhase::FetchingPackages.stage(),
            BuildPhase::CheckingOutPackages.stage()
        );
        assert!(BuildPhase::Compiling.stage() < BuildPhase::Linking.stage());
        assert!(BuildPhase::WaitingForDevice.is_device_phase());
    }

    #[test]
    fn test_phase_round_trips_through_str() {
        for phase in [BuildPhase::Compiling, BuildPhase::RegisteringDevice] {
            assert_eq!(phase.as_str().parse::<BuildPhase>().unwrap(), phase);
        }
        assert!("bogus".parse::<BuildPhase>().is_err());
    }

    #[test]
    fn test_result_into_artifact_categories() {
        let base = BuildResult {
            success: true,
            artifact_path: None,
            errors: vec![],
            warnings: vec![],
            duration: Duration::from_secs(1),
            exit_code: Some(0),
            cancelled: false,
            cache_dir: PathBuf::from("/tmp/dd"),
            transcript_lines: 0,
        };
        assert!(matches!(
            base.clone().into_artifact(),
            Err(BuildError::ArtifactMissing(_))
        ));

        let mut cancelled = base.clone();
        cancelled.success = false;
        cancelled.cancelled = true;
        assert!(matches!(cancelled.into_artifact(), Err(BuildError::BuildCancelled)));

        let mut ok = base;
        ok.artifact_path = Some(PathBuf::from("/tmp/dd/App.app"));
        assert_eq!(ok.into_artifact().unwrap(), PathBuf::from("/tmp/dd/App.app"));
    }
}
