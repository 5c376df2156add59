use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use crate::archiver::config::ArchiverConfig;
use crate::commands::watch_lock::{self, LockState};
use crate::commands::{CommandReport, watch_lock_path};

const STOP_TIMEOUT: Duration = Duration::from_secs(10);
const RELEASE_POLL: Duration = Duration::from_millis(100);

fn remove_lock_file(path: &Path, report: &mut CommandReport) {
    match fs::remove_file(path) {
        Ok(()) => report.detail(format!("removed stale watch lock {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => report.issue(format!(
            "failed to remove watch lock {}: {err}",
            path.display()
        )),
    }
}

fn terminate(pid: u32) -> Result<()> {
    let status = Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .status()
        .context("failed to run `kill -TERM`")?;
    if !status.success() {
        anyhow::bail!("`kill -TERM {pid}` exited with {status}");
    }
    Ok(())
}

pub fn run(cfg: &ArchiverConfig) -> Result<CommandReport> {
    let mut report = CommandReport::new("stop");
    let lock_path = watch_lock_path(cfg);
    report.detail(format!("watch_lock={}", lock_path.display()));

    let (held, pid) = match watch_lock::inspect(&lock_path)? {
        LockState::Missing => {
            report.detail("watcher already stopped (lock file not found)");
            return Ok(report);
        }
        LockState::Stale(_stale) => {
            report.detail("no watcher holds the lock");
            remove_lock_file(&lock_path, &mut report);
            return Ok(report);
        }
        LockState::Held { file, pid: Some(pid) } => (file, pid),
        LockState::Held { pid: None, .. } => {
            report.issue(format!(
                "a watcher holds {} but its pid could not be read",
                lock_path.display()
            ));
            return Ok(report);
        }
    };
    report.detail(format!("watcher_pid={pid}"));

    terminate(pid)?;
    let deadline = Instant::now() + STOP_TIMEOUT;
    while Instant::now() < deadline {
        if watch_lock::released(&held)? {
            report.detail(format!("stopped watcher pid={pid}"));
            remove_lock_file(&lock_path, &mut report);
            return Ok(report);
        }
        thread::sleep(RELEASE_POLL);
    }

    report.issue(format!(
        "watcher pid {pid} still holds the lock after {}s",
        STOP_TIMEOUT.as_secs()
    ));
    Ok(report)
}
