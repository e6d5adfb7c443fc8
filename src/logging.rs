//! Logger collaborator
//!
//! The host reports every lifecycle transition (load, start, retry, timeout,
//! phase completion) through a [`Logger`]. Nothing in the host depends on
//! what a logger does with a line.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Maximum log file size before rotation (1MB)
const MAX_LOG_SIZE: u64 = 1024 * 1024;

/// Number of log files to keep
const LOG_ROTATION_COUNT: usize = 7;

/// Severity of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "Info",
            LogLevel::Error => "Error",
        }
    }
}

/// Sink for lifecycle messages
///
/// `flush` asks the sink to make the line durable before returning.
pub trait Logger: Send + Sync {
    fn log(&self, message: &str, flush: bool, level: LogLevel);
}

/// Forwards lines to `tracing` events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, message: &str, _flush: bool, level: LogLevel) {
        match level {
            LogLevel::Info => tracing::info!(target: "prepost_hooks", "{}", message),
            LogLevel::Error => tracing::error!(target: "prepost_hooks", "{}", message),
        }
    }
}

/// Appends timestamped lines to a file, rotating it when it grows too large
///
/// The size is checked when the file is opened and before every line, so a
/// logger kept open for a long time still rotates.
pub struct FileLogger {
    path: PathBuf,
    file: Mutex<LogFile>,
}

/// Open log file and its current length
struct LogFile {
    writer: BufWriter<File>,
    size: u64,
}

impl LogFile {
    fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            writer: BufWriter::new(file),
            size,
        })
    }
}

impl FileLogger {
    /// Opens (or creates) the log file, rotating first if needed
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create log directory: {}", parent.display())
                })?;
            }
        }

        rotate_logs_if_needed(&path)?;
        let file = LogFile::open(&path)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    fn rotate(&self, file: &mut LogFile) -> Result<()> {
        file.writer.flush()?;
        rotate_logs_if_needed(&self.path)?;
        *file = LogFile::open(&self.path)?;
        Ok(())
    }
}

impl Logger for FileLogger {
    fn log(&self, message: &str, flush: bool, level: LogLevel) {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let line = format!("[{}] [{}] {}\n", timestamp, level.as_str(), message);

        // A poisoned lock only means another writer panicked mid-line
        let mut file = match self.file.lock() {
            Ok(f) => f,
            Err(poisoned) => poisoned.into_inner(),
        };

        if file.size >= MAX_LOG_SIZE {
            if let Err(e) = self.rotate(&mut file) {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to rotate log file");
            }
        }

        let written = file
            .writer
            .write_all(line.as_bytes())
            .and_then(|_| if flush { file.writer.flush() } else { Ok(()) });
        match written {
            Ok(()) => file.size += line.len() as u64,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to write log line")
            }
        }
    }
}

/// Rotates log files if the current log exceeds MAX_LOG_SIZE
fn rotate_logs_if_needed(log_path: &Path) -> Result<()> {
    if !log_path.exists() {
        return Ok(());
    }

    let metadata = fs::metadata(log_path)?;
    if metadata.len() < MAX_LOG_SIZE {
        return Ok(());
    }

    for i in (1..LOG_ROTATION_COUNT).rev() {
        let old_path = rotated_path(log_path, i);
        if old_path.exists() {
            if i + 1 >= LOG_ROTATION_COUNT {
                fs::remove_file(&old_path)?;
            } else {
                fs::rename(&old_path, rotated_path(log_path, i + 1))?;
            }
        }
    }

    fs::rename(log_path, rotated_path(log_path, 1))?;
    Ok(())
}

fn rotated_path(log_path: &Path, index: usize) -> PathBuf {
    let mut name = log_path.as_os_str().to_owned();
    name.push(format!(".{}", index));
    PathBuf::from(name)
}

/// Captures lines in memory
#[derive(Debug, Default)]
pub struct MemoryLogger {
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every line logged so far
    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Returns true if any line contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|(_, line)| line.contains(needle))
    }

    /// Counts lines containing `needle`
    pub fn count(&self, needle: &str) -> usize {
        self.lines()
            .iter()
            .filter(|(_, line)| line.contains(needle))
            .count()
    }
}

impl Logger for MemoryLogger {
    fn log(&self, message: &str, _flush: bool, level: LogLevel) {
        let mut lines = match self.lines.lock() {
            Ok(lines) => lines,
            Err(poisoned) => poisoned.into_inner(),
        };
        lines.push((level, message.to_string()));
    }
}

/// Sends every line to two loggers
pub struct TeeLogger {
    first: Arc<dyn Logger>,
    second: Arc<dyn Logger>,
}

impl TeeLogger {
    pub fn new(first: Arc<dyn Logger>, second: Arc<dyn Logger>) -> Self {
        Self { first, second }
    }
}

impl Logger for TeeLogger {
    fn log(&self, message: &str, flush: bool, level: LogLevel) {
        self.first.log(message, flush, level);
        self.second.log(message, flush, level);
    }
}

/// Installs the process-wide `tracing` subscriber
///
/// Honors `RUST_LOG`; defaults to `prepost_hooks=info`, or `debug` when
/// verbose. Safe to call more than once.
pub fn init_tracing(verbose: bool) {
    let default = if verbose {
        "prepost_hooks=debug"
    } else {
        "prepost_hooks=info"
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn memory_logger_records_levels() {
        let logger = MemoryLogger::new();
        logger.log("started", true, LogLevel::Info);
        logger.log("broke", true, LogLevel::Error);

        let lines = logger.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], (LogLevel::Error, "broke".to_string()));
        assert!(logger.contains("start"));
        assert_eq!(logger.count("o"), 1);
    }

    #[test]
    fn file_logger_writes_flushed_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("prepost.log");

        let logger = FileLogger::open(&path).unwrap();
        logger.log("Running prescript for oracle module...", true, LogLevel::Info);

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("[Info] Running prescript for oracle module..."));
    }

    #[test]
    fn file_logger_rotates_large_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prepost.log");
        fs::write(&path, vec![b'x'; MAX_LOG_SIZE as usize]).unwrap();

        let logger = FileLogger::open(&path).unwrap();
        logger.log("fresh", true, LogLevel::Info);

        assert!(rotated_path(&path, 1).exists());
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("fresh"));
        assert!(!content.contains("xxx"));
    }

    #[test]
    fn file_logger_rotates_while_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prepost.log");

        let logger = FileLogger::open(&path).unwrap();
        logger.log(&"x".repeat(MAX_LOG_SIZE as usize), true, LogLevel::Info);
        assert!(!rotated_path(&path, 1).exists());

        logger.log("after rotation", true, LogLevel::Info);

        assert!(rotated_path(&path, 1).exists());
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("after rotation"));
        assert!(!content.contains("xxx"));
        let rotated = fs::read_to_string(rotated_path(&path, 1)).unwrap();
        assert!(rotated.contains("xxx"));
    }

    #[test]
    fn tee_logger_fans_out() {
        let a = Arc::new(MemoryLogger::new());
        let b = Arc::new(MemoryLogger::new());
        let tee = TeeLogger::new(a.clone(), b.clone());

        tee.log("both", false, LogLevel::Info);

        assert!(a.contains("both"));
        assert!(b.contains("both"));
    }
}
