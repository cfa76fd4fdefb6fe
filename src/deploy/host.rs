//! Local host strategy: the bundle is already on this machine, so launching
//! is the only step.

use super::console::{stream_console, Invocation};
use super::{executable_path, RunContext};
use crate::error::DeployError;
use crate::models::RunPhase;
use std::path::Path;

pub async fn launch(ctx: &RunContext, app: &Path, console: bool) -> Result<(), DeployError> {
    ctx.progress(RunPhase::Launching, format!("Opening {}", app.display()));

    if console {
        // Attached runs execute the binary directly so its output is ours.
        let executable = executable_path(app).ok_or_else(|| DeployError::LaunchFailed {
            phase: RunPhase::Launching,
            detail: format!("{} does not name its executable", app.display()),
        })?;
        let launcher = Invocation::new(executable.display().to_string(), Vec::new());
        ctx.progress(RunPhase::Running, format!("{} running", app.display()));
        let exit = stream_console(ctx, &launcher, None).await?;
        if exit.success {
            return Ok(());
        }
        return Err(DeployError::LaunchFailed {
            phase: RunPhase::Streaming,
            detail: exit.failure_detail(),
        });
    }

    let output = ctx
        .run(&ctx.settings.open_tool, &[app.display().to_string()])
        .await?;
    if !output.success {
        return Err(DeployError::LaunchFailed {
            phase: RunPhase::Launching,
            detail: output.combined(),
        });
    }
    ctx.progress(RunPhase::Running, format!("{} running", app.display()));
    Ok(())
}
