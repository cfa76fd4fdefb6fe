//! Simulator strategy: boot, install and launch through `simctl`.

use super::console::{stream_console, Invocation};
use super::{executable_path, RunContext};
use crate::error::DeployError;
use crate::models::{RunPhase, Target};
use std::path::Path;

fn simctl(args: &[&str]) -> Vec<String> {
    std::iter::once("simctl")
        .chain(args.iter().copied())
        .map(str::to_string)
        .collect()
}

/// Boot (when needed), install, then launch. Install and launch failures
/// are terminal for this attempt.
pub async fn deploy(
    ctx: &RunContext,
    target: &Target,
    app: &Path,
    bundle_id: &str,
    console: bool,
) -> Result<(), DeployError> {
    if !target.is_running() {
        boot(ctx, target).await?;
    }

    ctx.progress(RunPhase::Installing, format!("Installing on {}", target.name));
    let app_arg = app.display().to_string();
    let install = ctx
        .run(ctx.device_tool(), &simctl(&["install", &target.id, &app_arg]))
        .await?;
    if !install.success {
        return Err(DeployError::InstallFailed {
            detail: install.combined(),
            hint: None,
        });
    }

    ctx.progress(RunPhase::Launching, format!("Launching {}", bundle_id));
    if console {
        return launch_attached(ctx, target, app, bundle_id).await;
    }

    let launch = ctx
        .run(ctx.device_tool(), &simctl(&["launch", &target.id, bundle_id]))
        .await?;
    if !launch.success {
        return Err(DeployError::LaunchFailed {
            phase: RunPhase::Launching,
            detail: launch.combined(),
        });
    }
    ctx.progress(
        RunPhase::Running,
        format!("{} running on {} {}", bundle_id, target.name, pid_suffix(&launch.stdout)),
    );
    Ok(())
}

async fn boot(ctx: &RunContext, target: &Target) -> Result<(), DeployError> {
    ctx.progress(RunPhase::Booting, format!("Booting {}", target.display_name()));
    let output = ctx
        .run(ctx.device_tool(), &simctl(&["boot", &target.id]))
        .await?;
    // A simulator booted since discovery reports its state as an error.
    if !output.success && !output.combined().contains("current state: Booted") {
        return Err(DeployError::LaunchFailed {
            phase: RunPhase::Booting,
            detail: output.combined(),
        });
    }
    ctx.sleep(ctx.settings.boot_settle()).await?;

    let viewer = vec!["-a".to_string(), "Simulator".to_string()];
    match ctx.run(&ctx.settings.open_tool, &viewer).await {
        Ok(out) if out.success => {}
        Ok(out) => log::warn!("[Deploy] [SIM] Could not open Simulator: {}", out.combined()),
        Err(DeployError::Cancelled) => return Err(DeployError::Cancelled),
        Err(e) => log::warn!("[Deploy] [SIM] Could not open Simulator: {}", e),
    }
    ctx.sleep(ctx.settings.viewer_settle()).await
}

async fn launch_attached(
    ctx: &RunContext,
    target: &Target,
    app: &Path,
    bundle_id: &str,
) -> Result<(), DeployError> {
    let launcher = Invocation::new(
        ctx.device_tool(),
        simctl(&["launch", "--console-pty", &target.id, bundle_id]),
    );
    let relay = system_log_relay(ctx, target, app);

    ctx.progress(RunPhase::Running, format!("{} running on {}", bundle_id, target.name));
    let exit = stream_console(ctx, &launcher, relay.as_ref()).await?;
    if exit.success {
        return Ok(());
    }
    Err(DeployError::LaunchFailed {
        phase: RunPhase::Streaming,
        detail: exit.failure_detail(),
    })
}

/// `simctl spawn <id> log stream` filtered to the app's executable.
fn system_log_relay(ctx: &RunContext, target: &Target, app: &Path) -> Option<Invocation> {
    let executable = executable_path(app)?;
    let name = executable.file_name()?.to_string_lossy().to_string();
    let predicate = format!("process == \"{}\"", name);
    Some(Invocation::new(
        ctx.device_tool(),
        simctl(&[
            "spawn",
            &target.id,
            "log",
            "stream",
            "--style",
            "compact",
            "--predicate",
            &predicate,
        ]),
    ))
}

/// `com.example.App: 4242` -> `(pid 4242)`
fn pid_suffix(launch_stdout: &str) -> String {
    launch_stdout
        .trim()
        .rsplit(':')
        .next()
        .map(str::trim)
        .filter(|pid| !pid.is_empty() && pid.chars().all(|c| c.is_ascii_digit()))
        .map(|pid| format!("(pid {})", pid))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simctl_args() {
        assert_eq!(simctl(&["boot", "ABC"]), vec!["simctl", "boot", "ABC"]);
    }

    #[test]
    fn test_pid_suffix() {
        assert_eq!(pid_suffix("com.example.App: 4242\n"), "(pid 4242)");
        assert_eq!(pid_suffix(""), "");
        assert_eq!(pid_suffix("launched"), "");
    }
}
