use directories::BaseDirs;
use std::path::PathBuf;

pub const TARGET_FILE_NAME: &str = ".claude.json";
pub const BACKUP_DIR_NAME: &str = ".claude-backups";
pub const LOG_FILE_NAME: &str = "protector.log";
pub const PID_FILE_NAME: &str = "protector.pid";
pub const SNAPSHOT_PREFIX: &str = "claude";

pub fn home_dir() -> anyhow::Result<PathBuf> {
    let dirs = BaseDirs::new().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(dirs.home_dir().to_path_buf())
}

pub fn target_path() -> anyhow::Result<PathBuf> {
    Ok(home_dir()?.join(TARGET_FILE_NAME))
}

pub fn backup_dir() -> anyhow::Result<PathBuf> {
    Ok(home_dir()?.join(BACKUP_DIR_NAME))
}

pub fn log_path() -> anyhow::Result<PathBuf> {
    Ok(backup_dir()?.join(LOG_FILE_NAME))
}

pub fn pid_path() -> anyhow::Result<PathBuf> {
    Ok(backup_dir()?.join(PID_FILE_NAME))
}
