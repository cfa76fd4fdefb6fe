//! Deploy orchestration: install the built bundle on a target and launch it.
//!
//! Each target kind has its own strategy module:
//! - `simulator`: boot, install and launch through `simctl`
//! - `device`: install and launch through `devicectl`, waiting out a locked
//!   device once
//! - `host`: open the bundle on this Mac
//!
//! Every external command goes through [`RunContext`], which emits progress
//! and observes the cancellation signal.

pub mod bundle;
pub mod console;
pub mod device;
pub mod host;
pub mod simulator;

pub use bundle::{bundle_identifier, executable_path};
pub use console::{stream_console, ConsoleExit};
pub use device::{classify_install_failure, classify_install_line, is_lock_error, parse_lock_state};

use crate::config::Settings;
use crate::error::DeployError;
use crate::models::{
    ConsoleLine, ConsoleSource, PowerState, RunEvent, RunPhase, RunProgressEvent, Target,
    TargetKind,
};
use crate::system::{
    describe_command, run_command, spawn_line_readers, terminate_child, CommandOutput, StreamLine,
};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{mpsc, watch};

/// Resolves once cancellation is requested; never resolves if the sender
/// is gone.
pub(crate) async fn cancelled(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Per-deploy state shared by the strategy modules.
pub struct RunContext {
    pub settings: Settings,
    events: Option<mpsc::UnboundedSender<RunEvent>>,
    cancel_rx: watch::Receiver<bool>,
}

impl RunContext {
    pub fn new(
        settings: Settings,
        events: Option<mpsc::UnboundedSender<RunEvent>>,
        cancel_rx: watch::Receiver<bool>,
    ) -> Self {
        RunContext {
            settings,
            events,
            cancel_rx,
        }
    }

    pub fn progress(&self, phase: RunPhase, message: impl Into<String>) {
        let message = message.into();
        log::info!("[Deploy] [PHASE] {}: {}", phase, message);
        if let Some(ref tx) = self.events {
            let _ = tx.send(RunEvent::Progress(RunProgressEvent { phase, message }));
        }
    }

    pub fn console(&self, source: ConsoleSource, text: String) {
        if let Some(ref tx) = self.events {
            let _ = tx.send(RunEvent::Console(ConsoleLine { source, text }));
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    pub fn cancel_receiver(&self) -> watch::Receiver<bool> {
        self.cancel_rx.clone()
    }

    /// Sleep unless cancelled first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), DeployError> {
        if duration.is_zero() {
            return self.check_cancelled();
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = cancelled(self.cancel_receiver()) => Err(DeployError::Cancelled),
        }
    }

    pub fn check_cancelled(&self) -> Result<(), DeployError> {
        if self.is_cancelled() {
            Err(DeployError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run a tool to completion. Cancellation drops the child, which kills it.
    pub async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, DeployError> {
        self.check_cancelled()?;
        let result = tokio::select! {
            result = run_command(program, args) => result,
            _ = cancelled(self.cancel_receiver()) => return Err(DeployError::Cancelled),
        };
        result.map_err(|e| DeployError::CommandFailed {
            cmd: describe_command(program, args),
            reason: e.to_string(),
        })
    }

    /// Run a tool while handing each output line to `on_line`. Returns the
    /// exit success and the full output text.
    pub async fn stream<F>(
        &self,
        program: &str,
        args: &[String],
        mut on_line: F,
    ) -> Result<(bool, String), DeployError>
    where
        F: FnMut(&StreamLine),
    {
        self.check_cancelled()?;
        log::debug!("[Deploy] [EXEC] {}", describe_command(program, args));
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DeployError::CommandFailed {
                cmd: describe_command(program, args),
                reason: e.to_string(),
            })?;

        let mut lines = spawn_line_readers(&mut child);
        let mut text = String::new();
        let mut cancel = Box::pin(cancelled(self.cancel_receiver()));
        loop {
            tokio::select! {
                line = lines.recv() => {
                    let Some(line) = line else { break };
                    on_line(&line);
                    text.push_str(&line.text);
                    text.push('\n');
                }
                _ = &mut cancel => {
                    terminate_child(&mut child, self.settings.terminate_grace()).await;
                    return Err(DeployError::Cancelled);
                }
            }
        }

        let status = child.wait().await.map_err(|e| DeployError::CommandFailed {
            cmd: describe_command(program, args),
            reason: e.to_string(),
        })?;
        Ok((status.success(), text))
    }

    pub fn device_tool(&self) -> &str {
        &self.settings.device_tool
    }
}

/// Installs and launches built bundles.
pub struct DeployOrchestrator {
    settings: Settings,
    events: Option<mpsc::UnboundedSender<RunEvent>>,
    cancel_tx: Arc<watch::Sender<bool>>,
}

impl DeployOrchestrator {
    pub fn new(settings: Settings) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        DeployOrchestrator {
            settings,
            events: None,
            cancel_tx: Arc::new(cancel_tx),
        }
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<RunEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Abort the running deploy. Subprocesses are terminated and lock
    /// polling stops at its next check.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn cancel_handle(&self) -> crate::orchestrator::CancelHandle {
        crate::orchestrator::CancelHandle::from_sender(Arc::clone(&self.cancel_tx))
    }

    /// Install `app` on `target` and launch it. With `console`, the launch
    /// stays attached and relays the app's output until it exits.
    ///
    /// A cancel requested before the call aborts it; the flag is cleared
    /// once the deploy returns.
    pub async fn deploy(&self, target: &Target, app: &Path, console: bool) -> Result<(), DeployError> {
        let ctx = RunContext::new(
            self.settings.clone(),
            self.events.clone(),
            self.cancel_tx.subscribe(),
        );

        let result = self.run_deploy(&ctx, target, app, console).await;
        if let Err(ref e) = result {
            log::warn!("[Deploy] [FAILED] {}", e);
            ctx.progress(RunPhase::Failed, e.user_message());
        }
        self.cancel_tx.send_replace(false);
        result
    }

    async fn run_deploy(
        &self,
        ctx: &RunContext,
        target: &Target,
        app: &Path,
        console: bool,
    ) -> Result<(), DeployError> {
        ctx.check_cancelled()?;
        ctx.progress(
            RunPhase::CheckingDevice,
            format!("Checking {}", target.display_name()),
        );
        if target.state == PowerState::Unreachable {
            return Err(DeployError::DeviceNotReady {
                reason: format!("{} is unreachable", target.name),
                hint: "Reconnect the device or join it to the same network".to_string(),
            });
        }
        if !app.is_dir() {
            return Err(DeployError::InstallFailed {
                detail: format!("{} is not an app bundle", app.display()),
                hint: None,
            });
        }

        match target.kind {
            TargetKind::Simulated => {
                let bundle_id = bundle_identifier(app)?;
                simulator::deploy(ctx, target, app, &bundle_id, console).await
            }
            TargetKind::Physical => {
                let bundle_id = bundle_identifier(app)?;
                device::deploy(ctx, target, app, &bundle_id, console).await
            }
            TargetKind::LocalHost => host::launch(ctx, app, console).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Platform;

    fn target(kind: TargetKind, state: PowerState) -> Target {
        Target {
            id: "T".to_string(),
            name: "Device".to_string(),
            kind,
            platform: Platform::Ios,
            state,
            os_version: None,
        }
    }

    #[tokio::test]
    async fn test_unreachable_target_is_not_ready() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let orchestrator = DeployOrchestrator::new(Settings::default()).with_events(tx);
        let result = orchestrator
            .deploy(
                &target(TargetKind::Physical, PowerState::Unreachable),
                Path::new("/tmp/App.app"),
                false,
            )
            .await;
        assert!(matches!(result, Err(DeployError::DeviceNotReady { .. })));

        let mut phases = Vec::new();
        while let Ok(RunEvent::Progress(p)) = rx.try_recv() {
            phases.push(p.phase);
        }
        assert_eq!(phases, vec![RunPhase::CheckingDevice, RunPhase::Failed]);
    }

    #[tokio::test]
    async fn test_missing_bundle_id_reported_before_install() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let app = temp_dir.path().join("App.app");
        std::fs::create_dir(&app).unwrap();
        let orchestrator = DeployOrchestrator::new(Settings::default());
        let result = orchestrator
            .deploy(&target(TargetKind::Simulated, PowerState::Running), &app, false)
            .await;
        assert!(matches!(result, Err(DeployError::BundleIdMissing(_))));
    }

    #[tokio::test]
    async fn test_cancel_before_deploy_is_honored_once() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let app = temp_dir.path().join("App.app");
        std::fs::create_dir(&app).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let orchestrator = DeployOrchestrator::new(Settings::default()).with_events(tx);
        let host = target(TargetKind::Simulated, PowerState::Running);

        orchestrator.cancel();
        let result = orchestrator.deploy(&host, &app, false).await;
        assert_eq!(result, Err(DeployError::Cancelled));
        let mut phases = Vec::new();
        while let Ok(RunEvent::Progress(p)) = rx.try_recv() {
            phases.push(p.phase);
        }
        assert_eq!(phases, vec![RunPhase::Failed]);

        // The next deploy runs normally and fails on the missing bundle id.
        let result = orchestrator.deploy(&host, &app, false).await;
        assert!(matches!(result, Err(DeployError::BundleIdMissing(_))));
    }

    #[tokio::test]
    async fn test_sleep_interrupted_by_cancel() {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let ctx = RunContext::new(Settings::default(), None, cancel_rx);
        let sleeper = ctx.sleep(Duration::from_secs(30));
        let trigger = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_tx.send_replace(true);
        };
        let (result, _) = tokio::join!(sleeper, trigger);
        assert_eq!(result, Err(DeployError::Cancelled));
    }
}
