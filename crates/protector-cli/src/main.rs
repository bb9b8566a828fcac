use anyhow::Result;
use clap::{Parser, Subcommand};
use protector_core::backup::{BackupStore, SnapshotReason};
use protector_core::integrity::{classify, FileState};
use protector_core::log::ProtectorLog;
use protector_core::settings::ProtectorSettings;
use std::fs;

mod fixer;
mod process;

#[derive(Parser)]
#[command(name = "protector")]
#[command(about = "Manage protection of the Claude state file", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the protection daemon
    Start {
        /// Run in the foreground instead of detaching (useful for debugging)
        #[arg(long)]
        foreground: bool,
    },
    /// Stop the protection daemon
    Stop,
    /// Show daemon, state-file, and backup status
    Status,
    /// Create a manual backup of the state file
    Backup,
    /// One-shot destructive cleanup of a corrupted or oversized state file
    Fix,
    /// Show recent protector log lines
    Logs {
        /// Number of recent lines to show
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = ProtectorSettings::resolve()?;
    settings.apply_env();

    match cli.command {
        Commands::Start { foreground } => start(&settings, foreground),
        Commands::Stop => stop(&settings),
        Commands::Status => status(&settings),
        Commands::Backup => backup(&settings),
        Commands::Fix => fixer::run(&settings),
        Commands::Logs { limit } => logs(&settings, limit),
    }
}

fn start(settings: &ProtectorSettings, foreground: bool) -> Result<()> {
    if let Some(pid) = process::running_pid(&settings.pid_path()) {
        println!("Protector already running (pid {pid})");
        return Ok(());
    }

    let binary = process::find_daemon_binary();
    if foreground {
        let status = std::process::Command::new(&binary).status()?;
        if !status.success() {
            anyhow::bail!("daemon exited with status {status}");
        }
        return Ok(());
    }

    fs::create_dir_all(&settings.backup_dir)?;
    process::spawn_detached(&binary)?;
    println!("Protector started");
    println!("Logs: {}", settings.log_path().display());
    Ok(())
}

fn stop(settings: &ProtectorSettings) -> Result<()> {
    match process::running_pid(&settings.pid_path()) {
        Some(pid) => {
            process::terminate(pid)?;
            println!("Protector stopped");
            Ok(())
        }
        None => {
            println!("Protector is not running");
            Ok(())
        }
    }
}

fn status(settings: &ProtectorSettings) -> Result<()> {
    match process::running_pid(&settings.pid_path()) {
        Some(pid) => println!("Protector running (pid {pid})"),
        None => {
            println!("Protector is not running");
            println!("Run: protector start");
        }
    }

    match classify(&settings.target_path) {
        FileState::Missing => {
            println!("State file: not created yet ({})", settings.target_path.display());
        }
        FileState::Valid(doc) => {
            println!(
                "State file: {:.2} MiB, valid JSON",
                doc.byte_len as f64 / 1024.0 / 1024.0
            );
        }
        FileState::Corrupt(reason) => {
            println!("State file: CORRUPT ({reason})");
        }
    }

    let store = BackupStore::open(
        settings.target_path.clone(),
        settings.backup_dir.clone(),
        settings.max_backups,
    )?;
    println!("Backups: {}", store.list()?.len());

    let tail = ProtectorLog::new(settings.log_path(), false).read_recent(5)?;
    if !tail.is_empty() {
        println!();
        println!("Recent activity:");
        for line in tail {
            println!("  {line}");
        }
    }
    Ok(())
}

fn backup(settings: &ProtectorSettings) -> Result<()> {
    let store = BackupStore::open(
        settings.target_path.clone(),
        settings.backup_dir.clone(),
        settings.max_backups,
    )?;
    match store.snapshot(SnapshotReason::Manual)? {
        Some(snap) => println!("Backup created: {}", snap.file_name()),
        None => println!("No state file to back up"),
    }
    Ok(())
}

fn logs(settings: &ProtectorSettings, limit: usize) -> Result<()> {
    let log = ProtectorLog::new(settings.log_path(), false);
    let lines = log.read_recent(limit)?;
    if lines.is_empty() {
        println!("No log entries at {}", settings.log_path().display());
        return Ok(());
    }
    for line in lines {
        println!("{line}");
    }
    Ok(())
}
