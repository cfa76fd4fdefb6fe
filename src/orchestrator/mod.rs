//! Build orchestration: cache directory resolution, build tool execution
//! with live progress, and artifact resolution.
//!
//! One [`BuildOrchestrator`] runs one build at a time. Progress is pushed
//! to an optional event channel; cancellation goes through a watch channel
//! shared with [`CancelHandle`]s.

pub mod artifact;
pub mod cache_dir;
pub mod classifier;
pub mod executor;
pub mod state;

pub use artifact::resolve_artifact;
pub use cache_dir::{fallback_dir_name, fnv1a64, is_corrupted, resolve_cache_dir, CacheResolution};
pub use classifier::{estimate_compile_units, OutputClassifier};
pub use executor::{run_build_process, EventSink, ProcessOutcome};
pub use state::PhaseTracker;

use crate::config::Settings;
use crate::error::BuildError;
use crate::models::{BuildEvent, BuildPhase, BuildProgressEvent, BuildRequest, BuildResult};
use crate::system::absolute_path;
use crate::LogCollector;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};

/// Arguments for one build tool invocation.
pub fn build_arguments(request: &BuildRequest, cache_dir: &Path) -> Vec<String> {
    vec![
        request.project_kind.flag().to_string(),
        request.project_path.display().to_string(),
        "-scheme".to_string(),
        request.scheme.clone(),
        "-configuration".to_string(),
        request.configuration.clone(),
        "-derivedDataPath".to_string(),
        cache_dir.display().to_string(),
        "-parallelizeTargets".to_string(),
        "-allowProvisioningUpdates".to_string(),
        "-destination".to_string(),
        request.target.destination(),
        "build".to_string(),
    ]
}

/// Requests cancellation of whatever build the orchestrator is running.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub(crate) fn from_sender(tx: Arc<watch::Sender<bool>>) -> Self {
        CancelHandle { tx }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

pub struct BuildOrchestrator {
    settings: Settings,
    events: Option<mpsc::UnboundedSender<BuildEvent>>,
    log_collector: Option<Arc<LogCollector>>,
    cancel_tx: Arc<watch::Sender<bool>>,
}

impl BuildOrchestrator {
    pub fn new(settings: Settings) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        BuildOrchestrator {
            settings,
            events: None,
            log_collector: None,
            cancel_tx: Arc::new(cancel_tx),
        }
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<BuildEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Dual-write build output into a log collector.
    pub fn with_log_collector(mut self, collector: Arc<LogCollector>) -> Self {
        self.log_collector = Some(collector);
        self
    }

    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::from_sender(Arc::clone(&self.cancel_tx))
    }

    /// Run one build.
    ///
    /// Returns `Err` only when the build could not be started. A failed or
    /// cancelled build is an `Ok` result with `success == false`. A cancel
    /// requested before the call is honored; the flag is cleared once the
    /// build returns.
    pub async fn build(&self, request: &BuildRequest) -> Result<BuildResult, BuildError> {
        let result = self.run_build(request).await;
        self.cancel_tx.send_replace(false);
        result
    }

    async fn run_build(&self, request: &BuildRequest) -> Result<BuildResult, BuildError> {
        let started = Instant::now();
        let sink = EventSink::new(
            self.events.clone(),
            self.log_collector.clone(),
            request.verbose,
        );

        let project_path = absolute_path(&request.project_path);
        let project_name = request.project_name();
        sink.progress(BuildProgressEvent {
            phase: BuildPhase::Preparing,
            percent: BuildPhase::Preparing.base_percent(),
            message: format!("Preparing {} ({})", request.scheme, request.configuration),
            detail: Some(request.target.display_name()),
        });

        let root = self.settings.derived_data_root();
        let cache = resolve_cache_dir(&root, &project_name, &project_path)?;
        if let Some(advisory) = cache.advisory.clone() {
            sink.progress(BuildProgressEvent {
                phase: BuildPhase::Preparing,
                percent: BuildPhase::Preparing.base_percent(),
                message: advisory,
                detail: Some(cache.path.display().to_string()),
            });
        }

        let expected_units = match project_path.parent().map(Path::to_path_buf) {
            Some(dir) => tokio::task::spawn_blocking(move || estimate_compile_units(&dir))
                .await
                .ok()
                .flatten(),
            None => None,
        };
        let mut classifier = OutputClassifier::new().with_expected_units(expected_units);
        let args = build_arguments(request, &cache.path);

        let outcome = run_build_process(
            &self.settings.build_tool,
            &args,
            &mut classifier,
            &sink,
            self.cancel_tx.subscribe(),
            self.settings.terminate_grace(),
        )
        .await?;

        if outcome.cancelled {
            log::warn!("[Build] [CANCEL] Build of {} cancelled", request.scheme);
        } else if let Some(event) = classifier.finish(outcome.success) {
            sink.progress(event);
        }

        let artifact_path = if outcome.success {
            let captured = classifier.artifact().map(Path::to_path_buf);
            let cache_path = cache.path.clone();
            let scan_request = request.clone();
            tokio::task::spawn_blocking(move || {
                resolve_artifact(captured.as_deref(), &cache_path, &scan_request)
            })
            .await
            .unwrap_or_else(|e| {
                log::warn!("[Build] [ARTIFACT] Products scan aborted: {}", e);
                None
            })
        } else {
            None
        };
        match (&artifact_path, outcome.success) {
            (Some(path), _) => log::info!("[Build] [ARTIFACT] {}", path.display()),
            (None, true) => log::warn!(
                "[Build] [ARTIFACT] Build succeeded but no app bundle was found under {}",
                cache.path.display()
            ),
            (None, false) => {}
        }

        if let Some(ref collector) = self.log_collector {
            if let Err(e) = collector.wait_for_empty().await {
                log::warn!("[Build] [LOG] {}", e);
            }
        }

        Ok(BuildResult {
            success: outcome.success,
            artifact_path,
            errors: classifier.errors().to_vec(),
            warnings: classifier.warnings().to_vec(),
            duration: started.elapsed(),
            exit_code: outcome.exit_code,
            cancelled: outcome.cancelled,
            cache_dir: cache.path,
            transcript_lines: classifier.transcript().len(),
        })
    }
}
