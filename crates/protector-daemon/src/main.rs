use anyhow::{Context, Result};
use clap::Parser;
use protector_core::atomic;
use protector_core::backup::BackupStore;
use protector_core::log::ProtectorLog;
use protector_core::settings::ProtectorSettings;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};
use protector_daemon::recovery::RecoveryEngine;
use protector_daemon::state::ProtectionState;
use protector_daemon::watch;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Protection daemon for the Claude state file", long_about = None)]
struct Cli {
    /// Maximum target size in MiB before truncation
    #[arg(long)]
    max_size_mb: Option<u64>,

    /// Number of snapshots to retain
    #[arg(long)]
    max_backups: Option<usize>,

    /// Polling interval in seconds
    #[arg(long)]
    check_interval_secs: Option<u64>,

    /// Debounce window for change notifications, in milliseconds
    #[arg(long)]
    debounce_ms: Option<u64>,

    /// Periodic backup interval in seconds
    #[arg(long)]
    backup_interval_secs: Option<u64>,

    /// Write DEBUG lines to the durable log
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut settings = ProtectorSettings::resolve()?;
    settings.apply_env();
    if let Some(mb) = cli.max_size_mb {
        settings.max_size = mb * 1024 * 1024;
    }
    if let Some(n) = cli.max_backups {
        settings.max_backups = n;
    }
    if let Some(secs) = cli.check_interval_secs {
        settings.check_interval = Duration::from_secs(secs);
    }
    if let Some(ms) = cli.debounce_ms {
        settings.debounce_window = Duration::from_millis(ms);
    }
    if let Some(secs) = cli.backup_interval_secs {
        settings.periodic_backup_interval = Duration::from_secs(secs);
    }
    if cli.debug {
        settings.debug_logging = true;
    }

    run(settings).await
}

async fn run(settings: ProtectorSettings) -> Result<()> {
    let store = BackupStore::open(
        settings.target_path.clone(),
        settings.backup_dir.clone(),
        settings.max_backups,
    )?;
    let log = Arc::new(ProtectorLog::new(settings.log_path(), settings.debug_logging));

    // sweep staging orphans from a previous crash before touching anything
    if let Some(parent) = settings.target_path.parent() {
        atomic::cleanup_staging(parent);
    }

    write_pidfile(&settings)?;

    info!(
        platform = std::env::consts::OS,
        target = %settings.target_path.display(),
        backups = %settings.backup_dir.display(),
        max_size_mib = settings.max_size / 1024 / 1024,
        "protection daemon starting"
    );
    log.info(format!(
        "protection active: {} (max {} MiB), backups in {}",
        settings.target_path.display(),
        settings.max_size / 1024 / 1024,
        settings.backup_dir.display()
    ));

    let engine = RecoveryEngine::new(settings.clone(), store, log.clone());
    let mut state = ProtectionState::new();

    // a corrupt or oversized file is corrected immediately at launch, not
    // only on the first trigger
    let now = Instant::now();
    if state.should_check(now, settings.throttle) {
        engine.run_cycle(&mut state, now);
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let loop_task = tokio::spawn(watch::run(engine, state, shutdown_rx));

    wait_for_termination().await;

    info!("shutting down");
    log.info("shutting down protection daemon");
    let _ = shutdown_tx.send(true);
    let _ = loop_task.await;
    remove_pidfile(&settings);
    Ok(())
}

async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal as unix_signal, SignalKind};
        let mut term = match unix_signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "cannot install SIGTERM handler");
                let _ = signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}

fn write_pidfile(settings: &ProtectorSettings) -> Result<()> {
    let path = settings.pid_path();
    fs::write(&path, format!("{}\n", std::process::id()))
        .with_context(|| format!("write pidfile {}", path.display()))
}

fn remove_pidfile(settings: &ProtectorSettings) {
    let _ = fs::remove_file(settings.pid_path());
}
