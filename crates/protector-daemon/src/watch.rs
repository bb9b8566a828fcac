//! Watch/schedule loop: two trigger sources, one evaluator.
//!
//! Filesystem notifications (debounced) and a fixed ticker both funnel into
//! the same evaluation entry point, throttled through `ProtectionState` so
//! concurrent triggers cannot exceed one cycle per throttle window. The
//! parent directory is watched rather than the file itself, so atomic
//! rename-over and recreate by the owning application stay visible.

use anyhow::{Context, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use crate::recovery::RecoveryEngine;
use crate::state::ProtectionState;

/// Coalesces a burst of change notifications into a single deferred firing.
/// Pure over explicit instants so it tests without timers.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// A change arrived: arm (or push back) the deadline.
    pub fn note_change(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    /// Whether the armed deadline has elapsed.
    pub fn due(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(d) if now >= d)
    }

    /// Time left until the deadline, `None` when disarmed.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(now))
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }
}

/// Run the loop until `shutdown` flips. The initial synchronous evaluation
/// has already happened by the time this is entered.
pub async fn run(
    engine: RecoveryEngine,
    mut state: ProtectionState,
    mut shutdown: watch::Receiver<bool>,
) {
    let settings = engine.settings().clone();
    let (change_tx, mut change_rx) = mpsc::channel::<()>(256);

    // Hold the watcher for the life of the loop; dropping it unsubscribes.
    let _watcher = match subscribe(&settings.target_path, change_tx) {
        Ok(w) => Some(w),
        Err(e) => {
            error!(error = %format!("{e:#}"), "file watching unavailable, polling only");
            None
        }
    };

    let mut ticker = tokio::time::interval(settings.check_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut debounce = Debouncer::new(settings.debounce_window);

    loop {
        let idle = settings.check_interval;
        let sleep_for = debounce.remaining(Instant::now()).unwrap_or(idle);

        tokio::select! {
            changed = change_rx.recv() => {
                if changed.is_none() {
                    debug!("change channel closed");
                    return;
                }
                debounce.note_change(Instant::now());
            }
            _ = ticker.tick() => {
                fire(&engine, &mut state);
            }
            _ = tokio::time::sleep(sleep_for) => {
                let now = Instant::now();
                if debounce.due(now) {
                    debounce.disarm();
                    fire(&engine, &mut state);
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("watch loop shutting down");
                    return;
                }
            }
        }
    }
}

fn fire(engine: &RecoveryEngine, state: &mut ProtectionState) {
    let now = Instant::now();
    if !state.should_check(now, engine.settings().throttle) {
        debug!("evaluation throttled");
        return;
    }
    engine.run_cycle(state, now);
}

/// Subscribe to change notifications for `target`, watching its parent
/// directory non-recursively and filtering to the target's file name.
fn subscribe(target: &Path, tx: mpsc::Sender<()>) -> Result<RecommendedWatcher> {
    let parent = target
        .parent()
        .with_context(|| format!("no parent directory for {}", target.display()))?
        .to_path_buf();
    let file_name = target
        .file_name()
        .with_context(|| format!("no file name in {}", target.display()))?
        .to_os_string();

    let mut watcher = RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| match res {
            Ok(event) => {
                if is_relevant(&event, &file_name) {
                    let _ = tx.try_send(());
                }
            }
            Err(e) => error!(error = %e, "file watcher error"),
        },
        Config::default(),
    )?;
    watcher
        .watch(&parent, RecursiveMode::NonRecursive)
        .with_context(|| format!("watch {}", parent.display()))?;
    info!(path = %target.display(), "watching target for changes");
    Ok(watcher)
}

fn is_relevant(event: &Event, file_name: &std::ffi::OsStr) -> bool {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return false;
    }
    event
        .paths
        .iter()
        .any(|p| p.file_name() == Some(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_of_changes_yields_one_firing() {
        let window = Duration::from_secs(1);
        let mut debounce = Debouncer::new(window);
        let t0 = Instant::now();

        // two notifications inside the window
        debounce.note_change(t0);
        debounce.note_change(t0 + Duration::from_millis(300));

        // not due until the *last* change has been quiet for the window
        assert!(!debounce.due(t0 + Duration::from_millis(900)));
        assert!(debounce.due(t0 + Duration::from_millis(1300)));

        // one firing consumes the deadline
        debounce.disarm();
        assert!(!debounce.due(t0 + Duration::from_secs(10)));
    }

    #[test]
    fn disarmed_debouncer_is_never_due() {
        let debounce = Debouncer::new(Duration::from_secs(1));
        assert!(!debounce.due(Instant::now()));
        assert!(debounce.remaining(Instant::now()).is_none());
    }

    #[test]
    fn remaining_counts_down_to_zero() {
        let mut debounce = Debouncer::new(Duration::from_secs(1));
        let t0 = Instant::now();
        debounce.note_change(t0);
        assert_eq!(
            debounce.remaining(t0 + Duration::from_millis(250)),
            Some(Duration::from_millis(750))
        );
        assert_eq!(
            debounce.remaining(t0 + Duration::from_secs(5)),
            Some(Duration::ZERO)
        );
    }
}
