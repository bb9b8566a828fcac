//! Durable append-only log consumed by external dashboards.
//!
//! One line per event, `[<ISO8601>] [<LEVEL>] <message>`. The file is rotated
//! wholesale (renamed aside) once it exceeds the size cap. Logging must never
//! fail the caller: write errors are swallowed and counted.

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Debug => "DEBUG",
        };
        f.write_str(s)
    }
}

pub struct ProtectorLog {
    path: PathBuf,
    max_bytes: u64,
    debug_enabled: bool,
    // serializes append+rotate so two writers cannot interleave a rotation
    write_lock: Mutex<()>,
    dropped: AtomicU64,
}

impl ProtectorLog {
    pub fn new<P: AsRef<Path>>(path: P, debug_enabled: bool) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_bytes: MAX_LOG_BYTES,
            debug_enabled,
            write_lock: Mutex::new(()),
            dropped: AtomicU64::new(0),
        }
    }

    #[cfg(test)]
    fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.append(LogLevel::Info, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.append(LogLevel::Warn, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.append(LogLevel::Error, message.as_ref());
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.append(LogLevel::Debug, message.as_ref());
    }

    /// Append one event line. Never propagates a failure; a write that cannot
    /// complete increments the dropped counter instead.
    pub fn append(&self, level: LogLevel, message: &str) {
        if level == LogLevel::Debug && !self.debug_enabled {
            return;
        }
        let _guard = self.write_lock.lock();
        if self.try_append(level, message).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of log lines lost to write failures since startup.
    pub fn dropped_writes(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Last `limit` lines, oldest first, for observers replaying the tail.
    pub fn read_recent(&self, limit: usize) -> std::io::Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let file = fs::File::open(&self.path)?;
        let lines: Vec<String> = BufReader::new(file).lines().collect::<std::io::Result<_>>()?;
        let start = lines.len().saturating_sub(limit);
        Ok(lines[start..].to_vec())
    }

    fn try_append(&self, level: LogLevel, message: &str) -> std::io::Result<()> {
        self.rotate_if_needed()?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        writeln!(file, "[{timestamp}] [{level}] {message}")?;
        file.flush()?;
        Ok(())
    }

    fn rotate_if_needed(&self) -> std::io::Result<()> {
        let len = match fs::metadata(&self.path) {
            Ok(m) => m.len(),
            Err(_) => return Ok(()),
        };
        if len < self.max_bytes {
            return Ok(());
        }
        let ts = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let mut archive = self.path.clone();
        if let Some(name) = self.path.file_name() {
            archive.set_file_name(format!("{}.{}", name.to_string_lossy(), ts));
        }
        fs::rename(&self.path, &archive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn line_format() {
        let dir = tempdir().unwrap();
        let log = ProtectorLog::new(dir.path().join("protector.log"), false);
        log.warn("target file too large");
        let lines = log.read_recent(10).unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("] [WARN] target file too large"));
        assert!(lines[0].starts_with('['));
    }

    #[test]
    fn debug_suppressed_unless_enabled() {
        let dir = tempdir().unwrap();
        let quiet = ProtectorLog::new(dir.path().join("a.log"), false);
        quiet.debug("hidden");
        assert!(quiet.read_recent(10).unwrap().is_empty());

        let verbose = ProtectorLog::new(dir.path().join("b.log"), true);
        verbose.debug("shown");
        assert_eq!(verbose.read_recent(10).unwrap().len(), 1);
    }

    #[test]
    fn rotates_wholesale_past_cap() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("protector.log");
        let log = ProtectorLog::new(&path, false).with_max_bytes(256);
        for i in 0..50 {
            log.info(format!("event number {i}"));
        }
        let rotated: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with("protector.log."))
            .collect();
        assert!(!rotated.is_empty(), "expected at least one rotated log file");
        // current file stays under cap plus a single line of slack
        assert!(fs::metadata(&path).unwrap().len() < 512);
    }

    #[test]
    fn write_failure_is_counted_not_propagated() {
        // a directory at the log path makes every append fail
        let dir = tempdir().unwrap();
        let path = dir.path().join("protector.log");
        fs::create_dir(&path).unwrap();
        let log = ProtectorLog::new(&path, false);
        log.info("cannot land anywhere");
        assert_eq!(log.dropped_writes(), 1);
    }
}
