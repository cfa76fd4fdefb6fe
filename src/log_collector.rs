//! Decoupled transcript logging for builds and deploys.
//!
//! Every raw toolchain output line and every recognized milestone is pushed
//! through an unbounded channel to a background writer thread, so slow disks
//! never stall the output readers.
//!
//! ```text
//! Build / deploy output
//!     |
//! [LogCollector] (non-blocking send)
//!     | (crossbeam channel)
//!     v
//! [writer thread]
//!     |-- logs/full/<session>.log     (every line)
//!     `-- logs/parsed/<session>.log   (milestones only)
//! ```
//!
//! The collector also implements `log::Log`, so it can serve as the global
//! logger: records with target `"parsed"` land in both files.

use chrono::Local;
use crossbeam_channel::{unbounded, Sender};
use log::{Log, Metadata, Record};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

enum LogMessage {
    Line(LogLine),
    /// Flush marker; the sender is signalled once everything before it is on disk
    Flush(std::sync::mpsc::Sender<()>),
}

#[derive(Clone, Debug, Default)]
struct SessionState {
    /// Session file name shared by the full and parsed streams
    name: Option<String>,
    /// Bumped on every new session so the writer drops stale handles
    generation: u64,
}

/// Which file a line is written to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogKind {
    Full,
    Parsed,
}

impl LogKind {
    fn dir_name(&self) -> &'static str {
        match self {
            LogKind::Full => "full",
            LogKind::Parsed => "parsed",
        }
    }
}

/// A log line with metadata
#[derive(Clone, Debug)]
pub struct LogLine {
    pub message: String,
    pub kind: LogKind,
    pub timestamp: String,
    pub progress: Option<u8>,
}

impl LogLine {
    pub fn new(message: String) -> Self {
        LogLine {
            message,
            kind: LogKind::Full,
            timestamp: Local::now().format("%H:%M:%S%.3f").to_string(),
            progress: None,
        }
    }

    pub fn parsed(message: String) -> Self {
        LogLine {
            kind: LogKind::Parsed,
            ..LogLine::new(message)
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    fn render(&self) -> String {
        match self.progress {
            Some(p) => format!("[{}] [{:>3}%] {}\n", self.timestamp, p, self.message),
            None => format!("[{}] {}\n", self.timestamp, self.message),
        }
    }
}

/// Default logs directory: `<cache_dir>/xcdeploy/logs`
pub fn get_global_logs_path() -> Result<PathBuf, String> {
    let cache = dirs::cache_dir().ok_or_else(|| "Cannot determine cache directory".to_string())?;
    Ok(cache.join("xcdeploy").join("logs"))
}

/// Unified transcript logger
#[derive(Clone)]
pub struct LogCollector {
    tx: Sender<LogMessage>,
    log_dir: PathBuf,
    session_state: Arc<Mutex<SessionState>>,
}

impl LogCollector {
    /// Create the log directories and spawn the writer thread.
    pub fn new(log_dir: PathBuf) -> Result<Self, String> {
        for kind in [LogKind::Full, LogKind::Parsed] {
            std::fs::create_dir_all(log_dir.join(kind.dir_name()))
                .map_err(|e| format!("Failed to create {} log dir: {}", kind.dir_name(), e))?;
        }

        let (tx, rx) = unbounded::<LogMessage>();
        let session_state = Arc::new(Mutex::new(SessionState::default()));
        let writer_state = Arc::clone(&session_state);
        let writer_dir = log_dir.clone();

        // OS thread rather than a tokio task: it must keep draining even when
        // no runtime is polling it.
        std::thread::spawn(move || {
            let mut handles: HashMap<LogKind, File> = HashMap::new();
            let mut seen_generation = 0u64;

            while let Ok(msg) = rx.recv() {
                match msg {
                    LogMessage::Line(line) => {
                        let session = writer_state
                            .lock()
                            .map(|s| s.clone())
                            .unwrap_or_default();
                        if session.generation != seen_generation {
                            handles.clear();
                            seen_generation = session.generation;
                        }

                        let mut kinds = vec![LogKind::Full];
                        if line.kind == LogKind::Parsed {
                            kinds.push(LogKind::Parsed);
                        }
                        for kind in kinds {
                            if !handles.contains_key(&kind) {
                                let dir = writer_dir.join(kind.dir_name());
                                let path = match &session.name {
                                    Some(name) => Ok(dir.join(name)),
                                    None => get_or_create_latest_log(&dir, kind),
                                };
                                if let Ok(path) = path {
                                    if let Ok(file) =
                                        OpenOptions::new().create(true).append(true).open(&path)
                                    {
                                        handles.insert(kind, file);
                                    }
                                }
                            }
                            if let Some(file) = handles.get_mut(&kind) {
                                let _ = file.write_all(line.render().as_bytes());
                            }
                        }
                    }
                    LogMessage::Flush(done) => {
                        for file in handles.values_mut() {
                            let _ = file.flush();
                        }
                        let _ = done.send(());
                    }
                }
            }
        });

        Ok(LogCollector {
            tx,
            log_dir,
            session_state,
        })
    }

    /// Start a new session with a dedicated file name in both streams.
    pub fn start_new_session(&self, filename: &str) -> Result<PathBuf, String> {
        let mut session = self
            .session_state
            .lock()
            .map_err(|e| format!("Failed to lock session state: {}", e))?;
        session.name = Some(filename.to_string());
        session.generation = session.generation.wrapping_add(1);
        Ok(self.log_dir.join(LogKind::Full.dir_name()).join(filename))
    }

    /// Current full-log session path, if a session was started
    pub fn get_session_log_path(&self) -> Option<PathBuf> {
        self.session_state
            .lock()
            .ok()
            .and_then(|s| s.name.clone())
            .map(|name| self.log_dir.join(LogKind::Full.dir_name()).join(name))
    }

    /// Send a log line (non-blocking, never fails)
    pub fn log(&self, line: LogLine) {
        let _ = self.tx.send(LogMessage::Line(line));
    }

    pub fn log_str(&self, message: impl Into<String>) {
        self.log(LogLine::new(message.into()));
    }

    /// Send a milestone line
    pub fn log_parsed(&self, message: impl Into<String>) {
        self.log(LogLine::parsed(message.into()));
    }

    pub fn log_with_progress(&self, message: impl Into<String>, progress: u8) {
        self.log(LogLine::parsed(message.into()).with_progress(progress));
    }

    /// Wait until every line sent before this call is flushed to disk.
    pub async fn wait_for_empty(&self) -> Result<(), String> {
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        self.tx
            .send(LogMessage::Flush(done_tx))
            .map_err(|e| format!("Failed to send flush marker: {}", e))?;
        tokio::task::spawn_blocking(move || done_rx.recv())
            .await
            .map_err(|e| format!("Flush wait task failed: {}", e))?
            .map_err(|e| format!("Flush signal interrupted: {}", e))
    }

    /// Install this collector as the process-wide `log` backend.
    pub fn init_global_logger(self: Arc<Self>, level: log::LevelFilter) -> Result<(), String> {
        log::set_boxed_logger(Box::new((*self).clone()))
            .map(|()| log::set_max_level(level))
            .map_err(|e| format!("Failed to set global logger: {}", e))
    }
}

impl Log for LogCollector {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let message = format!("[{}] {}", record.level(), record.args());
        if record.target() == "parsed" {
            self.log_parsed(message);
        } else {
            self.log_str(message);
        }
    }

    fn flush(&self) {}
}

/// Most recently modified `.log` in `dir`, or a new timestamped one.
fn get_or_create_latest_log(dir: &Path, kind: LogKind) -> Result<PathBuf, String> {
    if let Ok(entries) = std::fs::read_dir(dir) {
        let latest = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map_or(false, |ext| ext == "log"))
            .max_by_key(|e| e.metadata().ok().and_then(|m| m.modified().ok()));
        if let Some(entry) = latest {
            return Ok(entry.path());
        }
    }

    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("{}_{}.log", timestamp, kind.dir_name()));
    File::create(&path).map_err(|e| format!("Failed to create log file: {}", e))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_log_collector_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let result = LogCollector::new(temp_dir.path().to_path_buf());

        assert!(result.is_ok());
        assert!(temp_dir.path().join("full").exists());
        assert!(temp_dir.path().join("parsed").exists());
    }

    #[tokio::test]
    async fn test_session_routes_parsed_lines_to_both_files() {
        let temp_dir = TempDir::new().unwrap();
        let collector = LogCollector::new(temp_dir.path().to_path_buf()).unwrap();
        let full_path = collector.start_new_session("build_App.log").unwrap();

        collector.log_str("CompileSwift normal arm64 main.swift");
        collector.log_with_progress("PHASE: compiling", 60);
        collector.wait_for_empty().await.unwrap();

        let full = std::fs::read_to_string(&full_path).unwrap();
        assert!(full.contains("CompileSwift normal arm64"));
        assert!(full.contains("[ 60%] PHASE: compiling"));

        let parsed =
            std::fs::read_to_string(temp_dir.path().join("parsed/build_App.log")).unwrap();
        assert!(parsed.contains("PHASE: compiling"));
        assert!(!parsed.contains("CompileSwift"));
        assert_eq!(collector.get_session_log_path(), Some(full_path));
    }

    #[tokio::test]
    async fn test_global_logger_routes_records_to_session() {
        let temp_dir = TempDir::new().unwrap();
        let collector = Arc::new(LogCollector::new(temp_dir.path().to_path_buf()).unwrap());
        let full_path = collector.start_new_session("global.log").unwrap();

        Arc::clone(&collector)
            .init_global_logger(log::LevelFilter::Info)
            .unwrap();
        assert!(Arc::clone(&collector)
            .init_global_logger(log::LevelFilter::Info)
            .is_err());

        log::info!("[Test] [GLOBAL] routed through the facade");
        log::info!(target: "parsed", "[Test] [GLOBAL] milestone");
        collector.wait_for_empty().await.unwrap();

        let full = std::fs::read_to_string(&full_path).unwrap();
        assert!(full.contains("routed through the facade"));
        let parsed = std::fs::read_to_string(temp_dir.path().join("parsed/global.log")).unwrap();
        assert!(parsed.contains("milestone"));

        // Records from later tests keep arriving here.
        std::mem::forget(temp_dir);
    }

    #[tokio::test]
    async fn test_log_collector_non_blocking() {
        let temp_dir = TempDir::new().unwrap();
        let collector = LogCollector::new(temp_dir.path().to_path_buf()).unwrap();

        for i in 0..1000 {
            collector.log_str(format!("Log message {}", i));
        }
        collector.wait_for_empty().await.unwrap();

        let full_logs = temp_dir.path().join("full");
        assert!(std::fs::read_dir(&full_logs)
            .ok()
            .map_or(false, |mut d| d.next().is_some()));
    }
}
