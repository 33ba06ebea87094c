//! Tracing setup for the server binary
//!
//! stdout carries the LSP stream, so console output goes to stderr. A
//! per-session debug log is written to the user cache directory unless file
//! logging is disabled.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_RETENTION_DAYS: u64 = 7;
const SESSION_PREFIX: &str = "session-";

/// Log directory inside the OS cache directory:
/// - Linux: ~/.cache/mdsvex/mdsvex-language-server/
/// - macOS: ~/Library/Caches/mdsvex/mdsvex-language-server/
/// - Windows: %LOCALAPPDATA%\mdsvex\mdsvex-language-server\
pub fn log_dir() -> io::Result<PathBuf> {
    let cache_dir = dirs::cache_dir()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Unable to determine user cache directory"))?;
    let log_dir = cache_dir.join("mdsvex").join("mdsvex-language-server");
    fs::create_dir_all(&log_dir)?;
    Ok(log_dir)
}

/// Deletes session logs older than `retention`. Returns how many were removed.
pub fn cleanup_old_logs(log_dir: &Path, retention: Duration) -> usize {
    let now = SystemTime::now();
    let Ok(entries) = fs::read_dir(log_dir) else {
        return 0;
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !(name.starts_with(SESSION_PREFIX) && name.ends_with(".log")) {
            continue;
        }
        let expired = entry
            .metadata()
            .ok()
            .filter(|metadata| metadata.is_file())
            .and_then(|metadata| metadata.modified().ok())
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age > retention);
        if !expired {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to remove old log file {:?}: {}", entry.path(), e),
        }
    }
    removed
}

/// `YYYYMMDD-HHMMSS-<pid>`, shared by everything written in one session.
fn session_id() -> String {
    let timestamp = OffsetDateTime::now_utc()
        .format(format_description!("[year][month][day]-[hour][minute][second]"))
        .unwrap_or_else(|_| "unknown".to_string());
    format!("{}-{}", timestamp, std::process::id())
}

/// Installs the global subscriber. The returned guard flushes the session
/// log and must live until the process exits.
///
/// * `no_color` - plain stderr output
/// * `log_level` - stderr filter; falls back to `RUST_LOG`, then `info`
/// * `enable_file_logging` - also write a debug-level session log
pub fn init_logger(no_color: bool, log_level: Option<&str>, enable_file_logging: bool) -> io::Result<WorkerGuard> {
    let timer = fmt::time::OffsetTime::new(
        UtcOffset::UTC,
        format_description!("[[[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z]"),
    );

    let stderr_filter = match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_timer(timer.clone())
        .with_ansi(!no_color)
        .with_filter(stderr_filter);

    if !enable_file_logging {
        let (_, guard) = tracing_appender::non_blocking(io::sink());
        return finish_init(tracing_subscriber::registry().with(stderr_layer).try_init(), guard);
    }

    let log_dir = log_dir()?;
    let removed = cleanup_old_logs(&log_dir, Duration::from_secs(LOG_RETENTION_DAYS * 24 * 60 * 60));
    if removed > 0 {
        eprintln!("Removed {} old log file(s) from {:?}", removed, log_dir);
    }

    let log_path = log_dir.join(format!("{}{}.log", SESSION_PREFIX, session_id()));
    let file = fs::OpenOptions::new().create(true).append(true).open(&log_path)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_timer(timer)
        .with_ansi(false)
        .with_filter(EnvFilter::new("debug"));

    let result = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    eprintln!("Logging to file: {:?}", log_path);
    finish_init(result, guard)
}

/// A subscriber that is already installed (tests, embedding) is fine.
fn finish_init(
    result: Result<(), tracing_subscriber::util::TryInitError>,
    guard: WorkerGuard,
) -> io::Result<WorkerGuard> {
    match result {
        Ok(()) => Ok(guard),
        Err(e) if e.to_string().contains("already been set") || e.to_string().contains("SetLoggerError") => Ok(guard),
        Err(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_only_touches_expired_session_logs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("session-old.log"), "x").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        // Nothing is older than a day yet.
        assert_eq!(cleanup_old_logs(dir.path(), Duration::from_secs(86_400)), 0);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cleanup_old_logs(dir.path(), Duration::from_millis(1)), 1);
        assert!(!dir.path().join("session-old.log").exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_session_id_ends_with_pid() {
        assert!(session_id().ends_with(&format!("-{}", std::process::id())));
    }

    #[test]
    fn test_init_twice_is_harmless() {
        assert!(init_logger(true, Some("warn"), false).is_ok());
        assert!(init_logger(true, Some("warn"), false).is_ok());
    }
}
