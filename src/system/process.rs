//! Subprocess helpers: captured runs, per-stream line readers and graceful
//! termination.

use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// Bounded queue size between stream readers and the consuming loop.
pub const LINE_QUEUE_CAPACITY: usize = 1024;

/// Result of a captured (non-streaming) tool run.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// stdout and stderr joined, trimmed, for diagnostics.
    pub fn combined(&self) -> String {
        let mut text = String::new();
        for part in [self.stdout.trim(), self.stderr.trim()] {
            if part.is_empty() {
                continue;
            }
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(part);
        }
        text
    }
}

/// `program arg1 arg2` for log messages.
pub fn describe_command(program: &str, args: &[String]) -> String {
    std::iter::once(program.to_string())
        .chain(args.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run a tool to completion and capture its output. Non-UTF-8 bytes are
/// replaced rather than rejected.
pub async fn run_command(program: &str, args: &[String]) -> io::Result<CommandOutput> {
    let output = run_command_raw(program, args).await?;

    Ok(CommandOutput {
        exit_code: output.status.code(),
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Run a tool to completion and return its raw output bytes, for callers
/// that need to reject undecodable output themselves.
pub async fn run_command_raw(program: &str, args: &[String]) -> io::Result<std::process::Output> {
    log::debug!("[System] [EXEC] {}", describe_command(program, args));
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

/// One decoded output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamLine {
    pub source: StreamSource,
    pub text: String,
}

/// Take the child's piped stdout/stderr and feed their lines into a single
/// bounded queue. Order is preserved within each stream only. The receiver
/// closes once both streams reach EOF.
pub fn spawn_line_readers(child: &mut Child) -> mpsc::Receiver<StreamLine> {
    let (tx, rx) = mpsc::channel(LINE_QUEUE_CAPACITY);
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump_lines(stdout, StreamSource::Stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump_lines(stderr, StreamSource::Stderr, tx));
    }
    rx
}

async fn pump_lines<R>(reader: R, source: StreamSource, tx: mpsc::Sender<StreamLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf)
                    .trim_end_matches(&['\r', '\n'][..])
                    .to_string();
                if tx.send(StreamLine { source, text }).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                log::warn!("[System] [STREAM] {:?} read error: {}", source, e);
                break;
            }
        }
    }
}

/// Ask the child to exit with SIGTERM, then SIGKILL it if it is still
/// alive after `grace`.
pub async fn terminate_child(child: &mut Child, grace: Duration) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }

    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) => {
                    if tokio::time::timeout(grace, child.wait()).await.is_ok() {
                        log::debug!("[System] [TERM] pid {} exited after SIGTERM", pid);
                        return;
                    }
                    log::warn!("[System] [TERM] pid {} ignored SIGTERM, killing", pid);
                }
                Err(e) => log::warn!("[System] [TERM] SIGTERM to {} failed: {}", pid, e),
            }
        }
    }

    if let Err(e) = child.kill().await {
        log::warn!("[System] [TERM] Failed to kill process: {}", e);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_command_captures_both_streams() {
        let out = run_command(
            "sh",
            &["-c".to_string(), "echo out; echo err >&2; exit 3".to_string()],
        )
        .await
        .unwrap();
        assert!(!out.success);
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.combined(), "out\nerr");
    }

    #[tokio::test]
    async fn test_line_readers_preserve_per_stream_order() {
        let mut child = Command::new("sh")
            .args(["-c", "printf 'a\\nb\\r\\nc'; echo x >&2"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let mut rx = spawn_line_readers(&mut child);

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        while let Some(line) = rx.recv().await {
            match line.source {
                StreamSource::Stdout => stdout.push(line.text),
                StreamSource::Stderr => stderr.push(line.text),
            }
        }
        child.wait().await.unwrap();

        assert_eq!(stdout, vec!["a", "b", "c"]);
        assert_eq!(stderr, vec!["x"]);
    }

    #[tokio::test]
    async fn test_terminate_child_stops_sleeping_process() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        terminate_child(&mut child, Duration::from_secs(2)).await;
        let status = child.try_wait().unwrap();
        assert!(status.is_some());
    }
}
