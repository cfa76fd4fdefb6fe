//! Attached launches: relay an app's console output until it exits.

use super::{cancelled, RunContext};
use crate::error::DeployError;
use crate::models::{ConsoleSource, RunPhase};
use crate::system::{describe_command, spawn_line_readers, terminate_child, StreamLine, StreamSource};
use std::collections::VecDeque;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

const TAIL_LINES: usize = 20;

/// A command line to spawn.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Matches the launcher line that confirms the app started. Output
    /// before it belongs to the launcher, output after it to the app.
    pub ready_marker: Option<fn(&str) -> bool>,
}

impl Invocation {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Invocation {
            program: program.into(),
            args,
            ready_marker: None,
        }
    }

    pub fn with_ready_marker(mut self, marker: fn(&str) -> bool) -> Self {
        self.ready_marker = Some(marker);
        self
    }
}

/// How an attached session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleExit {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Last lines of the launcher's own output, for failure reports.
    /// Without a confirmed launch this holds launcher output only.
    pub tail: String,
    pub lines_relayed: usize,
    /// The ready marker was seen, or the invocation has none.
    pub launch_confirmed: bool,
}

impl ConsoleExit {
    /// Tail text, or the exit code when the launcher printed nothing.
    pub fn failure_detail(&self) -> String {
        if self.tail.trim().is_empty() {
            match self.exit_code {
                Some(code) => format!("launcher exited with code {}", code),
                None => "launcher terminated by signal".to_string(),
            }
        } else {
            self.tail.clone()
        }
    }
}

fn spawn_piped(invocation: &Invocation) -> Result<Child, DeployError> {
    log::debug!(
        "[Deploy] [CONSOLE] {}",
        describe_command(&invocation.program, &invocation.args)
    );
    Command::new(&invocation.program)
        .args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| DeployError::CommandFailed {
            cmd: describe_command(&invocation.program, &invocation.args),
            reason: e.to_string(),
        })
}

/// Run `launcher` attached, relaying its stdout/stderr as console lines.
/// When `system_log` is given, that process runs alongside and its lines
/// are relayed as system-log output; it is stopped when the launcher exits.
/// Cancellation terminates both.
pub async fn stream_console(
    ctx: &RunContext,
    launcher: &Invocation,
    system_log: Option<&Invocation>,
) -> Result<ConsoleExit, DeployError> {
    ctx.check_cancelled()?;
    let mut child = spawn_piped(launcher)?;
    let mut lines = spawn_line_readers(&mut child);

    let mut log_child = None;
    let mut log_lines: Option<mpsc::Receiver<StreamLine>> = None;
    if let Some(invocation) = system_log {
        match spawn_piped(invocation) {
            Ok(mut relay) => {
                log_lines = Some(spawn_line_readers(&mut relay));
                log_child = Some(relay);
            }
            Err(e) => log::warn!("[Deploy] [CONSOLE] System log relay unavailable: {}", e),
        }
    }

    ctx.progress(RunPhase::Streaming, "Streaming app console (cancel to stop)");

    let mut tail: VecDeque<String> = VecDeque::with_capacity(TAIL_LINES);
    let mut relayed = 0usize;
    let mut cancel = Box::pin(cancelled(ctx.cancel_receiver()));
    let mut was_cancelled = false;
    let mut confirmed = launcher.ready_marker.is_none();

    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else { break };
                let source = match line.source {
                    StreamSource::Stdout => ConsoleSource::Stdout,
                    StreamSource::Stderr => ConsoleSource::Stderr,
                };
                if !confirmed && launcher.ready_marker.map_or(false, |m| m(&line.text)) {
                    confirmed = true;
                    ctx.progress(RunPhase::Running, line.text.trim().to_string());
                }
                if tail.len() == TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line.text.clone());
                relayed += 1;
                ctx.console(source, line.text);
            }
            line = recv_optional(&mut log_lines) => {
                match line {
                    Some(line) => {
                        relayed += 1;
                        ctx.console(ConsoleSource::SystemLog, line.text);
                    }
                    None => log_lines = None,
                }
            }
            _ = &mut cancel => {
                was_cancelled = true;
                break;
            }
        }
    }

    let grace = ctx.settings.terminate_grace();
    if let Some(ref mut relay) = log_child {
        terminate_child(relay, grace).await;
    }
    if was_cancelled {
        terminate_child(&mut child, grace).await;
        return Err(DeployError::Cancelled);
    }

    let status = child.wait().await.map_err(|e| DeployError::CommandFailed {
        cmd: describe_command(&launcher.program, &launcher.args),
        reason: e.to_string(),
    })?;
    log::info!("[Deploy] [CONSOLE] Session ended with {}", status);
    Ok(ConsoleExit {
        success: status.success(),
        exit_code: status.code(),
        tail: Vec::from(tail).join("\n"),
        lines_relayed: relayed,
        launch_confirmed: confirmed,
    })
}

async fn recv_optional(rx: &mut Option<mpsc::Receiver<StreamLine>>) -> Option<StreamLine> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
