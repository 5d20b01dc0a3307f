//! Decoupled, file-backed logging for the build server.
//!
//! # Architecture
//!
//! ```text
//! log::info!() / JobLog::info()
//!     |
//! [LogCollector] (non-blocking, crossbeam unbounded channel)
//!     |
//! [DiskPersister thread] -> <file>.log (append, flushed per line)
//! ```
//!
//! One `LogCollector` backs the process-wide `log` facade (installed once by
//! the binary). Every build job and remote relay gets its own `JobLog`, passed
//! explicitly into the components that work on that job, so no global logger
//! is ever swapped per job.

use chrono::Local;
use crossbeam_channel::{unbounded, Sender};
use log::{Level, Log, Metadata, Record};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Internal log line or special marker
enum LogMessage {
    Line(String),
    /// Flush marker with channel sender to signal completion
    Flush(std::sync::mpsc::Sender<()>),
}

/// Format one line the way the build host log readers expect:
/// `[LEVEL:YYYY-MM-DD HH:MM:SS] message`
pub fn format_line(level: Level, message: &str) -> String {
    format!(
        "[{}:{}] {}\n",
        level,
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        message
    )
}

/// Ensure the parent directory of a log file exists
pub fn ensure_log_dir_exists(log_file: &Path) -> Result<(), String> {
    if let Some(parent) = log_file.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create log directory {}: {}", parent.display(), e))?;
    }
    Ok(())
}

/// Append-only log sink backed by a background persister thread
#[derive(Clone)]
pub struct LogCollector {
    tx: Sender<LogMessage>,
    path: PathBuf,
    max_level: Level,
}

impl LogCollector {
    /// Open (append) `path` and start the persister thread.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, String> {
        Self::with_level(path, Level::Debug)
    }

    pub fn with_level(path: impl Into<PathBuf>, max_level: Level) -> Result<Self, String> {
        let path = path.into();
        ensure_log_dir_exists(&path)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| format!("Failed to open log file {}: {}", path.display(), e))?;

        let (tx, rx) = unbounded::<LogMessage>();

        // OS thread, not a tokio task: log lines from any runtime (or none) reach disk.
        std::thread::spawn(move || {
            while let Ok(msg) = rx.recv() {
                match msg {
                    LogMessage::Line(line) => {
                        let _ = file.write_all(line.as_bytes());
                        let _ = file.flush();
                    }
                    LogMessage::Flush(done) => {
                        let _ = file.flush();
                        let _ = done.send(());
                    }
                }
            }
        });

        Ok(LogCollector {
            tx,
            path,
            max_level,
        })
    }

    /// Path of the file this collector writes to
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue a line (non-blocking). Lines above the collector level are dropped.
    pub fn log_line(&self, level: Level, message: impl AsRef<str>) {
        if level <= self.max_level {
            let _ = self
                .tx
                .send(LogMessage::Line(format_line(level, message.as_ref())));
        }
    }

    /// Block until every line queued before this call is on disk.
    pub fn flush_blocking(&self) -> Result<(), String> {
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        self.tx
            .send(LogMessage::Flush(tx))
            .map_err(|e| format!("Failed to send flush marker: {}", e))?;
        rx.recv()
            .map_err(|e| format!("Flush signal interrupted: {}", e))
    }
}

/// Wires all log::info!(), log::warn!(), log::error!() calls into the collector
impl Log for LogCollector {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.log_line(record.level(), record.args().to_string());
        }
    }

    fn flush(&self) {
        let _ = self.flush_blocking();
    }
}

/// Install `collector` as the process-wide logger. Call once at startup.
pub fn install_global(collector: LogCollector, max_level: log::LevelFilter) -> Result<(), String> {
    log::set_boxed_logger(Box::new(collector))
        .map(|()| log::set_max_level(max_level))
        .map_err(|e| format!("Failed to install global logger: {}", e))
}

/// Per-job logger, writing to the job's dedicated `run.log`.
///
/// Every line is also forwarded to the `log` facade at debug level, prefixed
/// with the job key, so the service log keeps a trace of all jobs.
#[derive(Clone)]
pub struct JobLog {
    key: String,
    collector: LogCollector,
}

impl JobLog {
    pub fn open(key: impl Into<String>, path: impl Into<PathBuf>) -> Result<Self, String> {
        Ok(JobLog {
            key: key.into(),
            collector: LogCollector::new(path)?,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn path(&self) -> &Path {
        self.collector.path()
    }

    pub fn log(&self, level: Level, message: impl AsRef<str>) {
        let message = message.as_ref();
        self.collector.log_line(level, message);
        log::debug!("[{}] {}", self.key, message);
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.log(Level::Debug, message);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(Level::Info, message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(Level::Warn, message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(Level::Error, message);
    }

    /// Wait until everything logged so far has reached the job's log file.
    pub async fn flush(&self) -> Result<(), String> {
        let collector = self.collector.clone();
        tokio::task::spawn_blocking(move || collector.flush_blocking())
            .await
            .map_err(|e| format!("Flush task failed: {}", e))?
    }
}
