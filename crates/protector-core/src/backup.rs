//! Timestamped snapshot store with bounded retention.
//!
//! Snapshots are plain byte copies of the target file, named
//! `<prefix>-<sortable UTC timestamp>-<reason>.json`, and are immutable once
//! written; rotation deletes the oldest beyond the retention cap. A snapshot
//! taken while the owning application is mid-write may itself be corrupt.
//! That is fine: validity is only checked when a snapshot is read back for
//! recovery.

use crate::integrity;
use anyhow::{Context, Result};
use chrono::Utc;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotReason {
    Periodic,
    SizeLimit,
    Corruption,
    Manual,
}

impl fmt::Display for SnapshotReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SnapshotReason::Periodic => "periodic",
            SnapshotReason::SizeLimit => "size-limit",
            SnapshotReason::Corruption => "corruption",
            SnapshotReason::Manual => "manual",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotRef {
    pub path: PathBuf,
    pub modified: SystemTime,
}

impl SnapshotRef {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

pub struct BackupStore {
    target: PathBuf,
    root: PathBuf,
    prefix: String,
    max_backups: usize,
}

impl BackupStore {
    /// Open the store, creating the backup directory if needed.
    pub fn open(target: PathBuf, root: PathBuf, max_backups: usize) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("create backup dir {}", root.display()))?;
        restrict_dir_permissions(&root);
        Ok(Self {
            target,
            root,
            prefix: crate::paths::SNAPSHOT_PREFIX.to_string(),
            max_backups,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy the target's current bytes to a new snapshot, then rotate.
    /// Returns `None` when the target does not exist.
    pub fn snapshot(&self, reason: SnapshotReason) -> Result<Option<SnapshotRef>> {
        if !self.target.exists() {
            return Ok(None);
        }
        let ts = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let mut dest = self.root.join(format!("{}-{}-{}.json", self.prefix, ts, reason));
        // same-millisecond snapshots get a numeric disambiguator
        let mut n = 1;
        while dest.exists() {
            n += 1;
            dest = self
                .root
                .join(format!("{}-{}-{}-{}.json", self.prefix, ts, reason, n));
        }
        fs::copy(&self.target, &dest)
            .with_context(|| format!("copy {} to {}", self.target.display(), dest.display()))?;
        debug!(snapshot = %dest.display(), %reason, "snapshot created");
        self.rotate();
        let modified = fs::metadata(&dest)
            .and_then(|m| m.modified())
            .unwrap_or_else(|_| SystemTime::now());
        Ok(Some(SnapshotRef { path: dest, modified }))
    }

    /// Delete every snapshot beyond the retention cap, oldest first.
    /// Deletion failures are logged and skipped; a leftover snapshot over the
    /// cap is degraded-but-safe, not fatal.
    pub fn rotate(&self) {
        let snapshots = match self.list() {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "cannot list snapshots for rotation");
                return;
            }
        };
        for stale in snapshots.iter().skip(self.max_backups) {
            match fs::remove_file(&stale.path) {
                Ok(()) => debug!(snapshot = %stale.file_name(), "removed old snapshot"),
                Err(e) => warn!(snapshot = %stale.file_name(), error = %e, "cannot remove old snapshot"),
            }
        }
    }

    /// All snapshots, newest first.
    pub fn list(&self) -> Result<Vec<SnapshotRef>> {
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.root)
            .with_context(|| format!("read backup dir {}", self.root.display()))?
            .flatten()
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(&format!("{}-", self.prefix)) || !name.ends_with(".json") {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            snapshots.push(SnapshotRef {
                path: entry.path(),
                modified,
            });
        }
        // mtime descending, file name (sortable timestamp) as tie-break
        snapshots.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| b.path.cmp(&a.path))
        });
        Ok(snapshots)
    }

    /// Newest snapshot whose bytes parse; never returns a corrupt snapshot.
    pub fn find_latest_valid(&self) -> Result<Option<SnapshotRef>> {
        for snap in self.list()? {
            if integrity::is_valid_json(&snap.path) {
                return Ok(Some(snap));
            }
            debug!(snapshot = %snap.file_name(), "skipping unparseable snapshot");
        }
        Ok(None)
    }
}

fn restrict_dir_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o700)) {
            warn!(path = %path.display(), error = %e, "cannot restrict backup dir permissions");
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

    fn store_with_target(content: &[u8], max_backups: usize) -> (tempfile::TempDir, BackupStore) {
        let dir = tempdir().unwrap();
        let target = dir.path().join(".claude.json");
        fs::write(&target, content).unwrap();
        let store =
            BackupStore::open(target, dir.path().join("backups"), max_backups).unwrap();
        (dir, store)
    }

    #[test]
    fn snapshot_of_missing_target_is_none() {
        let dir = tempdir().unwrap();
        let store = BackupStore::open(
            dir.path().join("absent.json"),
            dir.path().join("backups"),
            10,
        )
        .unwrap();
        assert!(store.snapshot(SnapshotReason::Periodic).unwrap().is_none());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn snapshot_name_carries_prefix_and_reason() {
        let (_dir, store) = store_with_target(b"{}", 10);
        let snap = store.snapshot(SnapshotReason::SizeLimit).unwrap().unwrap();
        let name = snap.file_name();
        assert!(name.starts_with("claude-"), "{name}");
        assert!(name.contains("size-limit"), "{name}");
        assert!(name.ends_with(".json"), "{name}");
    }

    #[test]
    fn retention_never_exceeds_cap_after_rotation() {
        let (_dir, store) = store_with_target(b"{\"k\":1}", 5);
        for _ in 0..12 {
            store.snapshot(SnapshotReason::Manual).unwrap().unwrap();
        }
        assert!(store.list().unwrap().len() <= 5);
    }

    #[test]
    fn find_latest_valid_skips_corrupt_snapshots() {
        let (_dir, store) = store_with_target(b"{\"good\":true}", 10);
        let valid = store.snapshot(SnapshotReason::Periodic).unwrap().unwrap();
        // a newer snapshot that raced a writer and captured garbage
        let corrupt = store.snapshot(SnapshotReason::Corruption).unwrap().unwrap();
        fs::write(&corrupt.path, b"{\"good\":tru").unwrap();

        let found = store.find_latest_valid().unwrap().unwrap();
        assert_eq!(found.path, valid.path);
        assert_eq!(fs::read(&found.path).unwrap(), b"{\"good\":true}");
    }

    #[test]
    fn find_latest_valid_none_when_all_corrupt() {
        let (_dir, store) = store_with_target(b"not json at all", 10);
        store.snapshot(SnapshotReason::Corruption).unwrap().unwrap();
        assert!(store.find_latest_valid().unwrap().is_none());
    }
}
