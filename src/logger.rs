// Unified logger: stdout via `log`, an optional daily file, and in-process subscribers.
//
// Usage from any module:
//      ulog_info!("[dify] Stream opened");
//      ulog_warn!("[ragflow] Reference dropped: {}", err);
//
// Features:
// - Forwards to the `log` facade (whatever logger the host installed)
// - Persists to {log_dir}/unified-{YYYY-MM-DD}.log once init_log_dir() has been called
// - Broadcasts every entry to logger::subscribe() receivers (e.g. a UI log panel)

use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO ",
            LogLevel::Warn => "WARN ",
            LogLevel::Error => "ERROR",
            LogLevel::Debug => "DEBUG",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub source: &'static str,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: String,
}

static LOG_DIR: OnceLock<PathBuf> = OnceLock::new();
static SUBSCRIBERS: OnceLock<broadcast::Sender<LogEntry>> = OnceLock::new();

/// `~/.agent-chat/logs`
pub fn default_log_dir() -> PathBuf {
    crate::config::app_dir().join("logs")
}

/// Enable file persistence. Only the first call wins.
pub fn init_log_dir(dir: impl Into<PathBuf>) -> bool {
    let dir = dir.into();
    if let Err(e) = fs::create_dir_all(&dir) {
        log::error!("Failed to create logs directory {}: {}", dir.display(), e);
        return false;
    }
    if LOG_DIR.set(dir).is_err() {
        log::warn!("Log directory already initialized");
        return false;
    }
    true
}

pub fn log_dir() -> Option<&'static Path> {
    LOG_DIR.get().map(PathBuf::as_path)
}

fn sink() -> &'static broadcast::Sender<LogEntry> {
    SUBSCRIBERS.get_or_init(|| broadcast::channel(512).0)
}

/// Receive every entry logged after this call.
pub fn subscribe() -> broadcast::Receiver<LogEntry> {
    sink().subscribe()
}

fn log_file_path(dir: &Path) -> PathBuf {
    let today = chrono::Local::now().format("%Y-%m-%d").to_string();
    dir.join(format!("unified-{}.log", today))
}

fn format_line(entry: &LogEntry) -> String {
    format!(
        "{} [RUST ] [{}] {}\n",
        entry.timestamp,
        entry.level.as_str(),
        entry.message
    )
}

fn persist_log(entry: &LogEntry) {
    let Some(dir) = LOG_DIR.get() else {
        return;
    };
    let path = log_file_path(dir);
    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(mut file) => {
            if let Err(e) = file.write_all(format_line(entry).as_bytes()) {
                log::error!("Failed to write to log file: {}", e);
            }
        }
        Err(e) => log::error!("Failed to open log file {}: {}", path.display(), e),
    }
}

pub fn create_log_entry(level: LogLevel, message: String) -> LogEntry {
    LogEntry {
        source: "rust",
        level,
        message,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

/// Log to stdout, the unified file and subscribers.
pub fn unified_log(level: LogLevel, message: String) {
    match level {
        LogLevel::Info => log::info!("{}", message),
        LogLevel::Warn => log::warn!("{}", message),
        LogLevel::Error => log::error!("{}", message),
        LogLevel::Debug => log::debug!("{}", message),
    }
    let entry = create_log_entry(level, message);
    persist_log(&entry);
    // no receivers is the common case
    let _ = sink().send(entry);
}

/// Usage: ulog_info!("[module] message {}", arg);
#[macro_export]
macro_rules! ulog_info {
    ($($arg:tt)*) => {{
        $crate::logger::unified_log($crate::logger::LogLevel::Info, format!($($arg)*));
    }};
}

#[macro_export]
macro_rules! ulog_warn {
    ($($arg:tt)*) => {{
        $crate::logger::unified_log($crate::logger::LogLevel::Warn, format!($($arg)*));
    }};
}

#[macro_export]
macro_rules! ulog_error {
    ($($arg:tt)*) => {{
        $crate::logger::unified_log($crate::logger::LogLevel::Error, format!($($arg)*));
    }};
}

#[macro_export]
macro_rules! ulog_debug {
    ($($arg:tt)*) => {{
        $crate::logger::unified_log($crate::logger::LogLevel::Debug, format!($($arg)*));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_format() {
        let entry = LogEntry {
            source: "rust",
            level: LogLevel::Warn,
            message: "[dify] slow".into(),
            timestamp: "2024-05-01T00:00:00+00:00".into(),
        };
        assert_eq!(
            format_line(&entry),
            "2024-05-01T00:00:00+00:00 [RUST ] [WARN ] [dify] slow\n"
        );
    }

    #[test]
    fn test_subscribers_receive_entries() {
        let mut rx = subscribe();
        crate::ulog_error!("[test] broadcast {}", 42);
        // other tests may log concurrently
        let found = std::iter::from_fn(|| rx.try_recv().ok())
            .any(|e| e.level == LogLevel::Error && e.message == "[test] broadcast 42");
        assert!(found);
    }

    #[test]
    fn test_persists_to_daily_file() {
        let dir = std::env::temp_dir().join(format!("agent-chat-logs-{}", uuid::Uuid::new_v4()));
        assert!(init_log_dir(&dir));
        assert!(!init_log_dir(&dir), "second init is rejected");
        crate::ulog_info!("[test] persisted line");

        let written = fs::read_to_string(log_file_path(&dir)).unwrap();
        assert!(written.contains("[RUST ] [INFO ] [test] persisted line"));
        let _ = fs::remove_dir_all(&dir);
    }
}
