//! Atomic-write primitive shared by every writer of the target file.
//!
//! Full new content goes to a staging file in the target's own directory
//! (same filesystem), is fsynced, then renamed over the original in a single
//! step. A reader at any instant sees either the complete prior version or
//! the complete new one, never a partial write.

use anyhow::{anyhow, Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::warn;
use uuid::Uuid;

/// Staging file prefix so orphans from a crash can be swept on startup.
pub const STAGING_PREFIX: &str = ".protector_write_";

/// Replace `target` with `bytes` via write-to-staging-then-rename.
pub fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| anyhow!("no parent directory for {}", target.display()))?;
    fs::create_dir_all(parent)?;

    let staging = parent.join(format!("{}{}", STAGING_PREFIX, Uuid::new_v4()));
    {
        let mut file = File::create(&staging)
            .with_context(|| format!("create staging {}", staging.display()))?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    if let Err(e) = fs::rename(&staging, target) {
        // leave nothing behind on a failed replace
        let _ = fs::remove_file(&staging);
        return Err(e).with_context(|| {
            format!("atomic rename {} -> {}", staging.display(), target.display())
        });
    }
    fsync_dir(parent);
    Ok(())
}

/// Remove orphaned staging files left by a previous crash.
pub fn cleanup_staging(dir: &Path) {
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(STAGING_PREFIX) {
                warn!(path = %entry.path().display(), "removing orphaned staging file");
                let _ = fs::remove_file(entry.path());
            }
        }
    }
}

fn fsync_dir(path: &Path) {
    #[cfg(unix)]
    {
        if let Ok(dir) = OpenOptions::new().read(true).open(path) {
            let _ = dir.sync_all();
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn replaces_existing_content() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("state.json");
        fs::write(&target, b"{\"old\":true}").unwrap();

        write_atomic(&target, b"{\"new\":true}").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"{\"new\":true}");

        // no staging leftovers
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with(STAGING_PREFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn creates_missing_target() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("state.json");
        write_atomic(&target, b"{}").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"{}");
    }

    #[test]
    fn cleanup_sweeps_orphans() {
        let dir = tempdir().unwrap();
        let orphan = dir.path().join(format!("{STAGING_PREFIX}deadbeef"));
        fs::write(&orphan, b"partial").unwrap();
        fs::write(dir.path().join("unrelated.json"), b"{}").unwrap();

        cleanup_staging(dir.path());
        assert!(!orphan.exists());
        assert!(dir.path().join("unrelated.json").exists());
    }
}
