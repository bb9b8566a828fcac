//! Daemon process management: pidfile, liveness, detached spawn.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

pub const DAEMON_BINARY: &str = "protectord";

/// Pid from the pidfile, if that process is still alive. A stale pidfile
/// (dead pid) reads as not-running.
pub fn running_pid(pid_path: &Path) -> Option<i32> {
    let raw = fs::read_to_string(pid_path).ok()?;
    let pid: i32 = raw.trim().parse().ok()?;
    is_alive(pid).then_some(pid)
}

#[cfg(unix)]
pub fn is_alive(pid: i32) -> bool {
    pid > 0 && unsafe { libc::kill(pid, 0) } == 0
}

#[cfg(not(unix))]
pub fn is_alive(_pid: i32) -> bool {
    false
}

#[cfg(unix)]
pub fn terminate(pid: i32) -> Result<()> {
    if unsafe { libc::kill(pid, libc::SIGTERM) } == 0 {
        Ok(())
    } else {
        Err(anyhow!(
            "cannot signal pid {pid}: {}",
            std::io::Error::last_os_error()
        ))
    }
}

#[cfg(not(unix))]
pub fn terminate(_pid: i32) -> Result<()> {
    Err(anyhow!("stopping the daemon is not supported on this platform"))
}

/// Locate the daemon binary: next to the current executable first, then the
/// PATH.
pub fn find_daemon_binary() -> PathBuf {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join(DAEMON_BINARY);
            if sibling.exists() {
                return sibling;
            }
        }
    }
    PathBuf::from(DAEMON_BINARY)
}

/// Spawn the daemon detached from this terminal. The daemon writes its own
/// pidfile once it is up.
pub fn spawn_detached(binary: &Path) -> Result<u32> {
    let child = Command::new(binary)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("spawn {}", binary.display()))?;
    Ok(child.id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_pidfile_reads_as_not_running() {
        let dir = tempdir().unwrap();
        assert!(running_pid(&dir.path().join("protector.pid")).is_none());
    }

    #[test]
    fn garbage_pidfile_reads_as_not_running() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("protector.pid");
        fs::write(&path, "not a pid\n").unwrap();
        assert!(running_pid(&path).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn own_pid_is_alive() {
        assert!(is_alive(std::process::id() as i32));
    }

    #[cfg(unix)]
    #[test]
    fn stale_pid_reads_as_not_running() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("protector.pid");
        // far beyond pid_max on any reasonable system
        fs::write(&path, "999999999\n").unwrap();
        assert!(running_pid(&path).is_none());
    }
}
