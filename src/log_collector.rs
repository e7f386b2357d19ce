//! Decoupled logging pipeline for packaging runs.
//!
//! Every line (build output, dependency progress, `log::*` records) goes
//! through one crossbeam channel to a dedicated OS thread that appends it to
//! disk and forwards a copy to an optional consumer channel.
//!
//! ```text
//! Build output / log::info!()
//!     |
//! [LogCollector]  (unbounded, never blocks)
//!     |
//! [persister thread]
//!     +--> logs/full/<ts>_full.log        (every line)
//!     +--> logs/parsed/<ts>_parsed.log    (milestones only)
//!     +--> consumer mpsc (try_send, dropped when full)
//! ```

use chrono::Local;
use crossbeam_channel::{unbounded, Sender};
use log::{Log, Metadata, Record};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Environment variable overriding the log directory.
pub const LOG_DIR_ENV: &str = "PACKER_LOG_DIR";

enum LogMessage {
    Line(LogLine),
    /// Flush marker; the sender is signalled once everything before it is on disk
    Flush(std::sync::mpsc::Sender<()>),
}

#[derive(Clone, Debug)]
struct SessionState {
    path: Option<PathBuf>,
    /// Bumped on every new session so the writer reopens its file handle
    generation: u64,
}

/// Log directory: `$PACKER_LOG_DIR`, else `./logs`.
pub fn get_global_logs_path() -> Result<PathBuf, String> {
    if let Some(dir) = std::env::var_os(LOG_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Failed to get current working directory: {}", e))?;
    Ok(cwd.join("logs"))
}

/// Kind of log line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogKind {
    /// Raw line, written to the full log only
    Full,
    /// High-level milestone, written to both logs
    Parsed,
}

/// A log line with metadata
#[derive(Clone, Debug)]
pub struct LogLine {
    pub message: String,
    pub kind: LogKind,
    /// Wall clock time the line was created (HH:MM:SS.mmm)
    pub timestamp: String,
}

impl LogLine {
    pub fn new(message: String) -> Self {
        LogLine {
            message,
            kind: LogKind::Full,
            timestamp: Local::now().format("%H:%M:%S%.3f").to_string(),
        }
    }

    pub fn parsed(message: String) -> Self {
        LogLine {
            kind: LogKind::Parsed,
            ..LogLine::new(message)
        }
    }
}

/// Unified logger that handles disk persistence and consumer dispatch
#[derive(Clone)]
pub struct LogCollector {
    tx: Sender<LogMessage>,
    log_dir: PathBuf,
    session_state: Arc<Mutex<SessionState>>,
}

impl LogCollector {
    /// Create the collector and spawn its persister thread.
    pub fn new(
        log_dir: PathBuf,
        consumer_tx: Option<tokio::sync::mpsc::Sender<LogLine>>,
    ) -> Result<Self, String> {
        let full_log_dir = log_dir.join("full");
        let parsed_log_dir = log_dir.join("parsed");
        std::fs::create_dir_all(&full_log_dir)
            .map_err(|e| format!("Failed to create full log dir: {}", e))?;
        std::fs::create_dir_all(&parsed_log_dir)
            .map_err(|e| format!("Failed to create parsed log dir: {}", e))?;

        let (tx, rx) = unbounded::<LogMessage>();
        let session_state = Arc::new(Mutex::new(SessionState {
            path: None,
            generation: 0,
        }));
        let session_for_thread = Arc::clone(&session_state);

        // OS thread rather than a tokio task so records from any runtime or
        // blocking context still reach disk.
        std::thread::spawn(move || {
            let mut handles: HashMap<LogKind, File> = HashMap::new();
            let mut seen_generation = 0_u64;

            while let Ok(msg) = rx.recv() {
                match msg {
                    LogMessage::Line(line) => {
                        let session_path = match session_for_thread.lock() {
                            Ok(session) => {
                                if session.generation != seen_generation {
                                    handles.clear();
                                    seen_generation = session.generation;
                                }
                                session.path.clone()
                            }
                            Err(_) => None,
                        };

                        let formatted = format!("[{}] {}\n", line.timestamp, line.message);

                        if !handles.contains_key(&LogKind::Full) {
                            let path = session_path
                                .or_else(|| new_log_path(&full_log_dir, "full").ok());
                            if let Some(file) = path.and_then(|p| open_append(&p)) {
                                handles.insert(LogKind::Full, file);
                            }
                        }
                        if let Some(file) = handles.get_mut(&LogKind::Full) {
                            let _ = file.write_all(formatted.as_bytes());
                        }

                        if line.kind == LogKind::Parsed {
                            if !handles.contains_key(&LogKind::Parsed) {
                                if let Some(file) = new_log_path(&parsed_log_dir, "parsed")
                                    .ok()
                                    .and_then(|p| open_append(&p))
                                {
                                    handles.insert(LogKind::Parsed, file);
                                }
                            }
                            if let Some(file) = handles.get_mut(&LogKind::Parsed) {
                                let _ = file.write_all(formatted.as_bytes());
                            }
                        }

                        if let Some(ref consumer) = consumer_tx {
                            let _ = consumer.try_send(line);
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

    /// Route subsequent lines into a dedicated file under `full/`.
    pub fn start_new_session(&self, filename: &str) -> Result<PathBuf, String> {
        let log_path = self.log_dir.join("full").join(filename);
        let mut session = self
            .session_state
            .lock()
            .map_err(|e| format!("Failed to lock session state: {}", e))?;
        session.path = Some(log_path.clone());
        session.generation = session.generation.wrapping_add(1);
        Ok(log_path)
    }

    pub fn session_log_path(&self) -> Option<PathBuf> {
        self.session_state
            .lock()
            .ok()
            .and_then(|session| session.path.clone())
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Send a log line. Never blocks.
    pub fn log(&self, line: LogLine) {
        let _ = self.tx.send(LogMessage::Line(line));
    }

    pub fn log_str(&self, message: impl Into<String>) {
        self.log(LogLine::new(message.into()));
    }

    /// Send a milestone line (written to both logs).
    pub fn log_parsed(&self, message: impl Into<String>) {
        self.log(LogLine::parsed(message.into()));
    }

    /// Wait until every line sent before this call is flushed to disk.
    pub async fn wait_for_empty(&self) -> Result<(), String> {
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        self.tx
            .send(LogMessage::Flush(done_tx))
            .map_err(|e| format!("Failed to send flush marker: {}", e))?;

        tokio::task::spawn_blocking(move || done_rx.recv())
            .await
            .map_err(|e| format!("Flush task failed: {}", e))?
            .map_err(|e| format!("Flush signal interrupted: {}", e))
    }
}

/// Wires `log::info!()` and friends into the collector.
/// Records with target `parsed` are treated as milestones.
impl Log for LogCollector {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let message = format!("[{}] {}", record.level(), record.args());
            if record.target() == "parsed" {
                self.log_parsed(message);
            } else {
                self.log_str(message);
            }
        }
    }

    fn flush(&self) {}
}

fn open_append(path: &Path) -> Option<File> {
    OpenOptions::new().create(true).append(true).open(path).ok()
}

/// Fresh timestamped log file path, e.g. `20250101_120000_full.log`.
fn new_log_path(dir: &Path, kind: &str) -> Result<PathBuf, String> {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("{}_{}.log", timestamp, kind));
    File::create(&path).map_err(|e| format!("Failed to create log file: {}", e))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn read_all_logs(dir: &Path) -> String {
        let mut out = String::new();
        if let Ok(entries) = fs::read_dir(dir) {
            for entry in entries.flatten() {
                out.push_str(&fs::read_to_string(entry.path()).unwrap_or_default());
            }
        }
        out
    }

    #[tokio::test]
    async fn test_log_collector_creates_directories() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = LogCollector::new(temp_dir.path().to_path_buf(), None);

        assert!(result.is_ok());
        assert!(temp_dir.path().join("full").exists());
        assert!(temp_dir.path().join("parsed").exists());
    }

    #[tokio::test]
    async fn test_lines_reach_disk_after_flush() {
        let temp_dir = tempfile::tempdir().unwrap();
        let collector = LogCollector::new(temp_dir.path().to_path_buf(), None).unwrap();

        for i in 0..500 {
            collector.log_str(format!("line {}", i));
        }
        collector.log_parsed("Build started");
        collector.wait_for_empty().await.unwrap();

        let full = read_all_logs(&temp_dir.path().join("full"));
        assert!(full.contains("line 0"));
        assert!(full.contains("line 499"));
        assert!(full.contains("Build started"));

        let parsed = read_all_logs(&temp_dir.path().join("parsed"));
        assert!(parsed.contains("Build started"));
        assert!(!parsed.contains("line 0"));
    }

    #[tokio::test]
    async fn test_session_file_receives_lines() {
        let temp_dir = tempfile::tempdir().unwrap();
        let collector = LogCollector::new(temp_dir.path().to_path_buf(), None).unwrap();

        let session = collector.start_new_session("build_app.log").unwrap();
        collector.log_str("inside session");
        collector.wait_for_empty().await.unwrap();

        assert_eq!(collector.session_log_path(), Some(session.clone()));
        assert!(fs::read_to_string(session).unwrap().contains("inside session"));
    }

    #[tokio::test]
    async fn test_consumer_receives_lines_in_order() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let collector = LogCollector::new(temp_dir.path().to_path_buf(), Some(tx)).unwrap();

        collector.log_str("first");
        collector.log_str("second");
        collector.wait_for_empty().await.unwrap();

        assert_eq!(rx.recv().await.unwrap().message, "first");
        assert_eq!(rx.recv().await.unwrap().message, "second");
    }
}
