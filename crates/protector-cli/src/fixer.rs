//! One-shot destructive cleanup of the protected file.
//!
//! Unlike the daemon's truncation policy (a strict subset operation), the
//! fixer rebuilds the document from scratch keeping only the fields the
//! owning application needs to keep working, and falls back to a fresh
//! minimal document when the current bytes don't parse. The pre-fix bytes
//! are always backed up first.

use anyhow::{Context, Result};
use chrono::Utc;
use protector_core::atomic;
use protector_core::backup::{BackupStore, SnapshotReason};
use protector_core::integrity::{classify, FileState};
use protector_core::settings::ProtectorSettings;
use rand::RngCore;
use serde_json::{json, Value};
use std::fs;

const MAX_PROJECTS: usize = 5;
const MAX_HISTORY: usize = 10;

pub fn run(settings: &ProtectorSettings) -> Result<()> {
    let target = &settings.target_path;
    if !target.exists() {
        println!("No state file found at {}", target.display());
        println!("The owning application will create one on its next run.");
        return Ok(());
    }

    let store = BackupStore::open(
        target.clone(),
        settings.backup_dir.clone(),
        settings.max_backups,
    )?;
    let snapshot = store
        .snapshot(SnapshotReason::Manual)?
        .context("target vanished before backup")?;
    println!("Backed up current file to {}", snapshot.file_name());

    let old_size = fs::metadata(target)?.len();

    match classify(target) {
        FileState::Valid(doc) => {
            let clean = rebuild_essential(&doc.value);
            let bytes = serde_json::to_vec_pretty(&clean)?;
            atomic::write_atomic(target, &bytes)?;
            let new_size = bytes.len() as u64;
            println!("Cleaned state file.");
            println!("Old size: {:.2} MiB", old_size as f64 / 1024.0 / 1024.0);
            println!("New size: {:.2} KiB", new_size as f64 / 1024.0);
            if old_size > 0 {
                println!(
                    "Reduction: {:.1}%",
                    (1.0 - new_size as f64 / old_size as f64) * 100.0
                );
            }
        }
        FileState::Corrupt(reason) => {
            println!("State file does not parse ({reason}); writing a minimal one.");
            let bytes = serde_json::to_vec_pretty(&minimal_document())?;
            atomic::write_atomic(target, &bytes)?;
            println!("Created new minimal state file.");
        }
        FileState::Missing => unreachable!("existence checked above"),
    }
    Ok(())
}

/// Rebuild keeping only essential fields: identity, counters, and up to
/// `MAX_PROJECTS` projects with slimmed history.
fn rebuild_essential(config: &Value) -> Value {
    let mut clean = json!({
        "numStartups": field_or(config, "numStartups", json!(1)),
        "installMethod": field_or(config, "installMethod", json!("npm")),
        "autoUpdates": field_or(config, "autoUpdates", json!(true)),
        "hasSeenTasksHint": field_or(config, "hasSeenTasksHint", json!(false)),
        "tipsHistory": {},
        "promptQueueUseCount": field_or(config, "promptQueueUseCount", json!(0)),
        "userID": field_or(config, "userID", json!(random_user_id())),
        "firstStartTime": field_or(config, "firstStartTime", json!(Utc::now().to_rfc3339())),
        "projects": {}
    });

    if let Some(Value::Object(projects)) = config.get("projects") {
        let dest = clean["projects"].as_object_mut().expect("built above");
        for (path, project) in projects.iter().take(MAX_PROJECTS) {
            dest.insert(
                path.clone(),
                json!({
                    "allowedTools": project.get("allowedTools").cloned().unwrap_or(json!([])),
                    "history": slim_history(project.get("history")),
                }),
            );
        }
    }
    clean
}

fn minimal_document() -> Value {
    json!({
        "numStartups": 1,
        "installMethod": "npm",
        "autoUpdates": true,
        "hasSeenTasksHint": false,
        "tipsHistory": {},
        "promptQueueUseCount": 0,
        "userID": random_user_id(),
        "firstStartTime": Utc::now().to_rfc3339(),
        "projects": {}
    })
}

fn field_or(config: &Value, field: &str, default: Value) -> Value {
    config.get(field).cloned().unwrap_or(default)
}

/// Last `MAX_HISTORY` entries, each reduced to display + timestamp.
fn slim_history(history: Option<&Value>) -> Value {
    let Some(Value::Array(items)) = history else {
        return json!([]);
    };
    let start = items.len().saturating_sub(MAX_HISTORY);
    Value::Array(
        items[start..]
            .iter()
            .map(|entry| match entry {
                Value::Object(fields) => json!({
                    "display": fields.get("display").cloned().unwrap_or(json!("")),
                    "timestamp": fields
                        .get("timestamp")
                        .cloned()
                        .unwrap_or_else(|| json!(Utc::now().to_rfc3339())),
                }),
                other => other.clone(),
            })
            .collect(),
    )
}

fn random_user_id() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
