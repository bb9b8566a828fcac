//! Recovery engine: the per-cycle state machine.
//!
//! One evaluation classifies the target, then branches: corrupt files are
//! restored from the newest valid snapshot or quarantined aside; oversized
//! valid files are snapshotted and truncated; healthy files earn a periodic
//! backup. Every mutation of the target goes through the shared atomic-write
//! primitive, and no failure inside a cycle may take the daemon down.

use anyhow::{Context, Result};
use chrono::Utc;
use protector_core::atomic;
use protector_core::backup::{BackupStore, SnapshotReason, SnapshotRef};
use protector_core::error::ProtectError;
use protector_core::integrity::{self, Document, FileState};
use protector_core::log::ProtectorLog;
use protector_core::settings::ProtectorSettings;
use protector_core::truncate::TruncationPolicy;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::state::ProtectionState;

/// What a single evaluation cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Target absent; the owning application has not created it yet.
    Missing,
    /// Valid, within bounds, nothing owed.
    Healthy,
    /// Valid and within bounds; an hourly snapshot was taken.
    PeriodicBackup,
    /// Corrupt target replaced with the newest valid snapshot.
    Recovered { snapshot: PathBuf },
    /// Corrupt target with no valid snapshot; moved aside, never deleted.
    Quarantined { moved_to: PathBuf },
    /// Oversized target reduced in place (after a pre-image snapshot).
    Truncated { old_bytes: u64, new_bytes: u64 },
}

pub struct RecoveryEngine {
    settings: ProtectorSettings,
    store: BackupStore,
    policy: TruncationPolicy,
    log: Arc<ProtectorLog>,
}

impl RecoveryEngine {
    pub fn new(settings: ProtectorSettings, store: BackupStore, log: Arc<ProtectorLog>) -> Self {
        Self {
            settings,
            store,
            policy: TruncationPolicy::default_rules(),
            log,
        }
    }

    pub fn settings(&self) -> &ProtectorSettings {
        &self.settings
    }

    pub fn store(&self) -> &BackupStore {
        &self.store
    }

    /// Run one cycle, containing any fault: an error is logged and the
    /// daemon carries on with the next trigger.
    pub fn run_cycle(&self, state: &mut ProtectionState, now: Instant) {
        match self.evaluate(state, now) {
            Ok(outcome) => debug!(?outcome, "evaluation cycle complete"),
            Err(e) => {
                error!(error = %format!("{e:#}"), "evaluation cycle failed");
                self.log.error(format!("evaluation cycle failed: {e:#}"));
            }
        }
    }

    /// One pass of the state machine. Public so tests can drive cycles with
    /// explicit instants.
    pub fn evaluate(&self, state: &mut ProtectionState, now: Instant) -> Result<CycleOutcome> {
        match integrity::classify(&self.settings.target_path) {
            FileState::Missing => Ok(CycleOutcome::Missing),
            FileState::Corrupt(reason) => self.recover(&reason),
            FileState::Valid(doc) if doc.byte_len > self.settings.max_size => self.shrink(&doc),
            FileState::Valid(_) => {
                if state.backup_due(now, self.settings.periodic_backup_interval) {
                    if self.take_snapshot(SnapshotReason::Periodic)?.is_some() {
                        state.mark_backup(now);
                        return Ok(CycleOutcome::PeriodicBackup);
                    }
                }
                Ok(CycleOutcome::Healthy)
            }
        }
    }

    fn recover(&self, reason: &str) -> Result<CycleOutcome> {
        warn!(%reason, "target file is corrupt, attempting recovery");
        self.log
            .error(format!("target file is corrupt ({reason}), attempting recovery"));

        // forensic copy of the corrupt bytes; best effort
        if let Err(e) = self.take_snapshot(SnapshotReason::Corruption) {
            self.log
                .error(format!("failed to snapshot corrupt target: {e:#}"));
        }

        match self.restore_from_backup() {
            Ok(snapshot) => {
                self.log.warn(format!(
                    "recovered target from backup {}",
                    snapshot.file_name()
                ));
                info!(snapshot = %snapshot.file_name(), "target recovered from backup");
                Ok(CycleOutcome::Recovered {
                    snapshot: snapshot.path,
                })
            }
            Err(e) if matches!(e.downcast_ref(), Some(ProtectError::NoValidBackup)) => {
                self.log.error("no valid backup found for recovery");
                let moved_to = self.quarantine()?;
                self.log.error(format!(
                    "quarantined corrupt target to {}; owning application will recreate it",
                    moved_to.display()
                ));
                Ok(CycleOutcome::Quarantined { moved_to })
            }
            Err(e) => Err(e),
        }
    }

    /// Replace the target with the newest parseable snapshot.
    fn restore_from_backup(&self) -> Result<SnapshotRef> {
        let snapshot = self
            .store
            .find_latest_valid()?
            .ok_or(ProtectError::NoValidBackup)?;
        let bytes = fs::read(&snapshot.path)
            .with_context(|| format!("read snapshot {}", snapshot.file_name()))?;
        atomic::write_atomic(&self.settings.target_path, &bytes)?;
        self.verify_target()?;
        Ok(snapshot)
    }

    /// Move the unrecoverable target aside. The daemon never deletes user
    /// data; the owning application recreates the file on its next start.
    fn quarantine(&self) -> Result<PathBuf> {
        let target = &self.settings.target_path;
        let ts = Utc::now().format("%Y%m%dT%H%M%S%.3f");
        let mut dest = target.clone();
        if let Some(name) = target.file_name() {
            dest.set_file_name(format!("{}.corrupt.{}", name.to_string_lossy(), ts));
        }
        match fs::rename(target, &dest) {
            Ok(()) => {}
            Err(rename_err) => {
                // cross-filesystem rename fails; fall back to copy-then-remove
                warn!(error = %rename_err, "rename to quarantine failed, trying copy");
                fs::copy(target, &dest)
                    .with_context(|| format!("copy {} to quarantine", target.display()))?;
                fs::remove_file(target)
                    .with_context(|| format!("remove {} after quarantine copy", target.display()))?;
            }
        }
        info!(from = %target.display(), to = %dest.display(), "corrupt target quarantined");
        Ok(dest)
    }

    fn shrink(&self, doc: &Document) -> Result<CycleOutcome> {
        let old_bytes = doc.byte_len;
        warn!(
            size_bytes = old_bytes,
            max_bytes = self.settings.max_size,
            "target file too large, truncating"
        );
        self.log.warn(format!(
            "target file too large ({:.2} MiB), truncating",
            old_bytes as f64 / 1024.0 / 1024.0
        ));

        // keep the pre-truncation bytes; without this snapshot we refuse to
        // shrink and let the next cycle retry
        self.take_snapshot(SnapshotReason::SizeLimit)?
            .context("target vanished before size-limit snapshot")?;

        let reduced = self.policy.apply(&doc.value);
        let bytes = serde_json::to_vec_pretty(&reduced)?;
        atomic::write_atomic(&self.settings.target_path, &bytes)?;

        if let Err(e) = self.verify_target() {
            // the policy guarantees parseable output; reaching this is an
            // invariant violation, not a recoverable condition
            self.log
                .error(format!("truncated target failed verification: {e:#}"));
            return Err(e);
        }

        let new_bytes = bytes.len() as u64;
        self.log.info(format!(
            "truncated target: {:.1} KiB -> {:.1} KiB",
            old_bytes as f64 / 1024.0,
            new_bytes as f64 / 1024.0
        ));
        info!(old_bytes, new_bytes, "target truncated");
        Ok(CycleOutcome::Truncated {
            old_bytes,
            new_bytes,
        })
    }

    /// Post-write check: the target must re-parse after any corrective
    /// replace.
    fn verify_target(&self) -> Result<()> {
        match integrity::classify(&self.settings.target_path) {
            FileState::Valid(_) => Ok(()),
            FileState::Corrupt(reason) => Err(ProtectError::Verification(reason).into()),
            FileState::Missing => {
                Err(ProtectError::Verification("target absent after write".into()).into())
            }
        }
    }

    fn take_snapshot(&self, reason: SnapshotReason) -> Result<Option<SnapshotRef>> {
        let snap = self.store.snapshot(reason)?;
        if let Some(snap) = &snap {
            self.log
                .info(format!("created backup ({reason}): {}", snap.file_name()));
        }
        Ok(snap)
    }
}
