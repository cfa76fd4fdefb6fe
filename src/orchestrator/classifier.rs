//! Build output classifier.
//!
//! Turns raw build tool output, one line at a time, into progress events.
//! Phase detection is an ordered table of triggers: the first pattern that
//! matches a line decides the proposed phase, and the [`PhaseTracker`]
//! decides whether that proposal is reported.

use super::state::{compile_percent, PhaseTracker};
use crate::models::{BuildPhase, BuildProgressEvent};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

const DETAIL_LIMIT: usize = 200;

struct Trigger {
    pattern: Regex,
    phase: BuildPhase,
    message: &'static str,
}

fn trigger(pattern: &str, phase: BuildPhase, message: &'static str) -> Trigger {
    Trigger {
        pattern: Regex::new(pattern).expect("valid regex"),
        phase,
        message,
    }
}

/// Ordered phase triggers; first match wins.
static TRIGGERS: Lazy<Vec<Trigger>> = Lazy::new(|| {
    vec![
        trigger(r"BUILD SUCCEEDED", BuildPhase::Succeeded, "Build succeeded"),
        trigger(r"BUILD (FAILED|INTERRUPTED)", BuildPhase::Failed, "Build failed"),
        trigger(
            r"(?i)waiting for .*(to become available|device to be ready|to be unlocked)",
            BuildPhase::WaitingForDevice,
            "Waiting for device",
        ),
        trigger(
            r"(?i)preparing (the )?device|preparing .* for development",
            BuildPhase::PreparingDevice,
            "Preparing device",
        ),
        trigger(
            r"(?i)registering (the )?device|registering .* with your team",
            BuildPhase::RegisteringDevice,
            "Registering device",
        ),
        trigger(
            r"(?i)^\s*resolv(e|ing) package graph|^\s*resolving (package|dependencies)",
            BuildPhase::ResolvingPackages,
            "Resolving packages",
        ),
        trigger(r"(?i)^\s*fetching ", BuildPhase::FetchingPackages, "Fetching packages"),
        trigger(
            r"(?i)^\s*updating (from )?https?://",
            BuildPhase::UpdatingPackages,
            "Updating packages",
        ),
        trigger(
            r"(?i)^\s*(checking out|cloning) ",
            BuildPhase::CheckingOutPackages,
            "Checking out packages",
        ),
        trigger(
            r"^(ComputeTargetDependencyGraph|CreateBuildDescription|CreateBuildDirectory|WriteAuxiliaryFile|MkDir|ProcessInfoPlistFile|ProcessProductPackaging|ProcessProductPackagingDER)\b",
            BuildPhase::Processing,
            "Processing build graph",
        ),
        trigger(
            r"^(CompileSwift|CompileSwiftSources|SwiftCompile|SwiftEmitModule|SwiftDriver|CompileC|CompileAssetCatalog|CompileStoryboard|CompileXIB|CompileMetalFile|LinkStoryboards)\b|^\s*\[\s*\d+\s*/\s*\d+\s*\]\s*Compiling",
            BuildPhase::Compiling,
            "Compiling",
        ),
        trigger(r"^(Ld|Libtool|Linking)\b", BuildPhase::Linking, "Linking"),
        trigger(r"^(CodeSign|Signing)\b", BuildPhase::Signing, "Signing"),
        trigger(
            r"^(Validate|Touch|RegisterWithLaunchServices)\b",
            BuildPhase::Copying,
            "Copying products",
        ),
    ]
});

static UNIT_RATIO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\s*(\d+)\s*/\s*(\d+)\s*\]").expect("valid regex"));
static PRODUCTS_BUNDLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(/[^\s"']*/Build/Products/[^\s"']*?\.app)(?:[/\s"',]|$)"#).expect("valid regex")
});
static BARE_BUNDLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(/[^\s"']*?\.app)(?:[/\s"',]|$)"#).expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
enum ArtifactSource {
    Products,
    Bare,
}

/// Stateful classifier for one build's output.
#[derive(Debug, Default)]
pub struct OutputClassifier {
    tracker: PhaseTracker,
    transcript: Vec<String>,
    errors: Vec<String>,
    warnings: Vec<String>,
    artifact: Option<(PathBuf, ArtifactSource)>,
    compiled_units: usize,
    total_units: Option<usize>,
}

impl OutputClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the compile total from an estimate; `[n/m]` markers override it.
    pub fn with_expected_units(mut self, units: Option<usize>) -> Self {
        self.total_units = units.filter(|u| *u > 0);
        self
    }

    /// Classify one line. Returns an event only for a reportable transition.
    pub fn feed(&mut self, line: &str) -> Option<BuildProgressEvent> {
        self.transcript.push(line.to_string());
        self.collect_diagnostics(line);
        self.capture_artifact(line);

        let trigger = TRIGGERS.iter().find(|t| t.pattern.is_match(line))?;
        let percent = match trigger.phase {
            BuildPhase::Compiling => self.next_compile_percent(line),
            phase => phase.base_percent(),
        };
        let (phase, percent) = self.tracker.advance(trigger.phase, percent)?;

        let message = match phase {
            BuildPhase::Compiling if self.compiled_units > 0 => match self.total_units {
                Some(total) => format!("Compiling ({}/{})", self.compiled_units.min(total), total),
                None => format!("Compiling ({} units)", self.compiled_units),
            },
            _ => trigger.message.to_string(),
        };
        Some(BuildProgressEvent {
            phase,
            percent,
            message,
            detail: Some(truncate(line.trim(), DETAIL_LIMIT)),
        })
    }

    /// Close the build with its exit status; emits the terminal phase if
    /// the output never printed one.
    pub fn finish(&mut self, success: bool) -> Option<BuildProgressEvent> {
        let phase = if success {
            BuildPhase::Succeeded
        } else {
            BuildPhase::Failed
        };
        let (phase, percent) = self.tracker.advance(phase, 100)?;
        let message = if success { "Build succeeded" } else { "Build failed" };
        Some(BuildProgressEvent {
            phase,
            percent,
            message: message.to_string(),
            detail: None,
        })
    }

    pub fn phase(&self) -> BuildPhase {
        self.tracker.phase()
    }

    pub fn percent(&self) -> u8 {
        self.tracker.percent()
    }

    /// Provisional artifact path captured from output.
    pub fn artifact(&self) -> Option<&Path> {
        self.artifact.as_ref().map(|(p, _)| p.as_path())
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    fn collect_diagnostics(&mut self, line: &str) {
        if line.contains("error:") {
            self.errors.push(line.trim().to_string());
        } else if line.contains("warning:") {
            self.warnings.push(line.trim().to_string());
        }
    }

    fn capture_artifact(&mut self, line: &str) {
        if matches!(self.artifact, Some((_, ArtifactSource::Products))) {
            return;
        }
        if let Some(caps) = PRODUCTS_BUNDLE.captures(line) {
            self.artifact = Some((PathBuf::from(&caps[1]), ArtifactSource::Products));
            return;
        }
        if self.artifact.is_none() {
            if let Some(caps) = BARE_BUNDLE.captures(line) {
                self.artifact = Some((PathBuf::from(&caps[1]), ArtifactSource::Bare));
            }
        }
    }

    fn next_compile_percent(&mut self, line: &str) -> u8 {
        match UNIT_RATIO.captures(line) {
            Some(caps) => {
                let done = caps[1].parse::<usize>().unwrap_or(self.compiled_units);
                let total = caps[2].parse::<usize>().ok().filter(|t| *t > 0);
                self.compiled_units = done;
                if total.is_some() {
                    self.total_units = total;
                }
            }
            None => self.compiled_units += 1,
        }
        if self.tracker.phase() != BuildPhase::Compiling {
            return BuildPhase::Compiling.base_percent();
        }
        compile_percent(self.compiled_units, self.total_units)
    }
}

const SOURCE_EXTS: &[&str] = &["swift", "m", "mm", "c", "cc", "cpp", "metal"];
const SKIP_DIRS: &[&str] = &["Pods", "Carthage", "DerivedData", "build", "node_modules"];
const SCAN_DEPTH: usize = 8;
const SCAN_ENTRY_LIMIT: usize = 20_000;

/// Rough compile-unit count: source files next to the project, skipping
/// hidden, dependency and build output directories. Blocking; the walk
/// stops after a fixed number of entries.
pub fn estimate_compile_units(project_dir: &Path) -> Option<usize> {
    count_source_files(project_dir, SCAN_ENTRY_LIMIT)
}

fn count_source_files(project_dir: &Path, entry_limit: usize) -> Option<usize> {
    let count = WalkDir::new(project_dir)
        .max_depth(SCAN_DEPTH)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_skipped(entry))
        .filter_map(Result::ok)
        .take(entry_limit)
        .filter(|entry| entry.file_type().is_file() && is_source(entry.path()))
        .count();
    (count > 0).then_some(count)
}

fn is_skipped(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') {
        return true;
    }
    if !entry.file_type().is_dir() {
        return false;
    }
    let is_bundle = entry
        .path()
        .extension()
        .map_or(false, |ext| ext == "xcodeproj" || ext == "xcworkspace");
    is_bundle || SKIP_DIRS.contains(&&*name)
}

fn is_source(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| SOURCE_EXTS.contains(&ext))
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
