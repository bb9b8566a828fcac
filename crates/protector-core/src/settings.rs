use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_MAX_SIZE: u64 = 5 * 1024 * 1024;
pub const DEFAULT_MAX_BACKUPS: usize = 10;
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_secs(1);
pub const DEFAULT_BACKUP_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_THROTTLE: Duration = Duration::from_secs(1);

/// Knobs for the protection daemon, plus the resolved well-known paths.
///
/// Paths are fixed at startup from the home directory; they are fields here
/// (rather than re-resolved at each call site) so tests can point the whole
/// stack at a temp directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectorSettings {
    pub target_path: PathBuf,
    pub backup_dir: PathBuf,
    pub max_size: u64,
    pub max_backups: usize,
    pub check_interval: Duration,
    pub debounce_window: Duration,
    pub periodic_backup_interval: Duration,
    pub throttle: Duration,
    pub debug_logging: bool,
}

impl ProtectorSettings {
    /// Default knobs over the well-known home-directory paths.
    pub fn resolve() -> anyhow::Result<Self> {
        Ok(Self::for_paths(paths::target_path()?, paths::backup_dir()?))
    }

    /// Default knobs over explicit paths.
    pub fn for_paths(target_path: PathBuf, backup_dir: PathBuf) -> Self {
        Self {
            target_path,
            backup_dir,
            max_size: DEFAULT_MAX_SIZE,
            max_backups: DEFAULT_MAX_BACKUPS,
            check_interval: DEFAULT_CHECK_INTERVAL,
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            periodic_backup_interval: DEFAULT_BACKUP_INTERVAL,
            throttle: DEFAULT_THROTTLE,
            debug_logging: false,
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.backup_dir.join(paths::LOG_FILE_NAME)
    }

    pub fn pid_path(&self) -> PathBuf {
        self.backup_dir.join(paths::PID_FILE_NAME)
    }

    /// Overlay environment knobs. Malformed values are ignored with a warning
    /// rather than failing startup.
    pub fn apply_env(&mut self) {
        if let Some(mb) = env_u64("CLAUDE_PROTECTOR_MAX_SIZE_MB") {
            self.max_size = mb * 1024 * 1024;
        }
        if let Some(n) = env_u64("CLAUDE_PROTECTOR_MAX_BACKUPS") {
            self.max_backups = n as usize;
        }
        if let Some(secs) = env_u64("CLAUDE_PROTECTOR_CHECK_INTERVAL_SECS") {
            self.check_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = env_u64("CLAUDE_PROTECTOR_DEBOUNCE_MS") {
            self.debounce_window = Duration::from_millis(ms);
        }
        if let Some(secs) = env_u64("CLAUDE_PROTECTOR_BACKUP_INTERVAL_SECS") {
            self.periodic_backup_interval = Duration::from_secs(secs);
        }
        if let Ok(v) = std::env::var("CLAUDE_PROTECTOR_DEBUG") {
            self.debug_logging = v == "true" || v == "1";
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = name, value = %raw, "ignoring malformed environment value");
            None
        }
    }
}
