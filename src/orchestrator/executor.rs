//! Build process execution: spawning the build tool and streaming its output
//! through the classifier.
//!
//! stdout and stderr are read by separate tasks into one bounded queue, so
//! ordering holds within each stream. A single loop owns the classifier and
//! forwards progress events, mirrors raw lines in verbose mode, and
//! dual-writes everything into the log collector.

use super::classifier::OutputClassifier;
use crate::error::BuildError;
use crate::models::{BuildEvent, BuildProgressEvent};
use crate::system::{describe_command, spawn_line_readers, terminate_child, StreamSource};
use crate::LogCollector;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{mpsc, watch};

/// Destination for everything a build reports.
#[derive(Clone, Default)]
pub struct EventSink {
    events: Option<mpsc::UnboundedSender<BuildEvent>>,
    log_collector: Option<Arc<LogCollector>>,
    verbose: bool,
}

impl EventSink {
    pub fn new(
        events: Option<mpsc::UnboundedSender<BuildEvent>>,
        log_collector: Option<Arc<LogCollector>>,
        verbose: bool,
    ) -> Self {
        EventSink {
            events,
            log_collector,
            verbose,
        }
    }

    pub fn progress(&self, event: BuildProgressEvent) {
        log::info!(
            "[Build] [PHASE] {} ({}%): {}",
            event.phase,
            event.percent,
            event.message
        );
        if let Some(ref collector) = self.log_collector {
            collector.log_with_progress(
                format!("{}: {}", event.phase, event.message),
                event.percent,
            );
        }
        if let Some(ref tx) = self.events {
            let _ = tx.send(BuildEvent::Progress(event));
        }
    }

    fn output(&self, line: &str) {
        if let Some(ref collector) = self.log_collector {
            collector.log_str(line);
        }
        if self.verbose {
            if let Some(ref tx) = self.events {
                let _ = tx.send(BuildEvent::Output(line.to_string()));
            }
        }
    }
}

/// How the build process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub cancelled: bool,
}

/// Run the build tool to completion (or cancellation), classifying every
/// output line.
///
/// Cancellation is requested by setting the watch value to `true`; the
/// process receives SIGTERM and is killed if it outlives `grace`.
pub async fn run_build_process(
    program: &str,
    args: &[String],
    classifier: &mut OutputClassifier,
    sink: &EventSink,
    mut cancel_rx: watch::Receiver<bool>,
    grace: Duration,
) -> Result<ProcessOutcome, BuildError> {
    if *cancel_rx.borrow() {
        log::warn!("[Build] [CANCEL] Cancelled before the build tool started");
        return Ok(ProcessOutcome {
            success: false,
            exit_code: None,
            cancelled: true,
        });
    }
    log::info!("[Build] [EXEC] {}", describe_command(program, args));

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| BuildError::SpawnFailed(format!("{}: {}", program, e)))?;

    let mut lines = spawn_line_readers(&mut child);
    let mut cancel_open = true;
    let mut cancelled = *cancel_rx.borrow();

    while !cancelled {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else { break };
                if line.source == StreamSource::Stderr {
                    log::debug!("[Build] [STDERR] {}", line.text);
                }
                sink.output(&line.text);
                if let Some(event) = classifier.feed(&line.text) {
                    sink.progress(event);
                }
            }
            changed = cancel_rx.changed(), if cancel_open => {
                match changed {
                    Ok(()) => cancelled = *cancel_rx.borrow(),
                    // Orchestrator dropped; nobody can cancel any more.
                    Err(_) => cancel_open = false,
                }
            }
        }
    }

    if cancelled {
        log::warn!("[Build] [CANCEL] Terminating build process");
        terminate_child(&mut child, grace).await;
        return Ok(ProcessOutcome {
            success: false,
            exit_code: None,
            cancelled: true,
        });
    }

    let status = child.wait().await?;
    log::info!("[Build] [EXIT] Build tool exited with {}", status);
    Ok(ProcessOutcome {
        success: status.success(),
        exit_code: status.code(),
        cancelled: false,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::models::BuildPhase;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<BuildEvent>) -> Vec<BuildEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_streams_and_classifies_output() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(Some(tx), None, true);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let mut classifier = OutputClassifier::new();

        let outcome = run_build_process(
            "sh",
            &sh("echo 'CompileSwift normal arm64 A.swift'; echo 'x.swift:1: error: boom' >&2; echo '** BUILD FAILED **'; exit 65"),
            &mut classifier,
            &sink,
            cancel_rx,
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, Some(65));
        assert_eq!(classifier.errors().len(), 1);
        assert_eq!(classifier.phase(), BuildPhase::Failed);

        let events = drain(&mut rx);
        let outputs = events
            .iter()
            .filter(|e| matches!(e, BuildEvent::Output(_)))
            .count();
        assert_eq!(outputs, 3);
        assert!(events.iter().any(|e| matches!(
            e,
            BuildEvent::Progress(p) if p.phase == BuildPhase::Failed && p.percent == 100
        )));
    }

    #[tokio::test]
    async fn test_quiet_mode_sends_no_raw_lines() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(Some(tx), None, false);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let mut classifier = OutputClassifier::new();

        run_build_process(
            "sh",
            &sh("echo hello; echo '** BUILD SUCCEEDED **'"),
            &mut classifier,
            &sink,
            cancel_rx,
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], BuildEvent::Progress(p) if p.phase == BuildPhase::Succeeded));
    }

    #[tokio::test]
    async fn test_cancel_terminates_process() {
        let sink = EventSink::default();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut classifier = OutputClassifier::new();

        let handle = tokio::spawn(async move {
            run_build_process(
                "sh",
                &sh("echo 'CompileC a.c'; sleep 30"),
                &mut classifier,
                &sink,
                cancel_rx,
                Duration::from_secs(1),
            )
            .await
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel_tx.send(true).unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("cancelled build should finish promptly")
            .unwrap()
            .unwrap();
        assert!(outcome.cancelled);
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn test_cancel_before_start_skips_spawn() {
        let (_cancel_tx, cancel_rx) = watch::channel(true);
        let mut classifier = OutputClassifier::new();
        let outcome = run_build_process(
            "/nonexistent/xcodebuild",
            &[],
            &mut classifier,
            &EventSink::default(),
            cancel_rx,
            Duration::from_secs(1),
        )
        .await
        .expect("pending cancel is not a spawn failure");
        assert!(outcome.cancelled);
        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, None);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let mut classifier = OutputClassifier::new();
        let result = run_build_process(
            "/nonexistent/xcodebuild",
            &[],
            &mut classifier,
            &EventSink::default(),
            cancel_rx,
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(BuildError::SpawnFailed(_))));
    }
}
