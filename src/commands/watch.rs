use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use tracing::info;

use crate::archiver::config::ArchiverConfig;
use crate::archiver::session::{ArchiverSession, PreprocessOutcome};
use crate::archiver::watcher::{LiveWatcher, WatchCapability, WatchOptions};
use crate::commands::watch_lock::WatchLock;
use crate::commands::{CommandReport, preprocess, watch_lock_path};
use crate::error::ArchiveError;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Default)]
pub struct WatchCommandOptions {
    pub catch_up: bool,
}

/// Subscribe first, then run the catch-up pass, so a message delivered
/// while catching up is seen by the watcher. Sorting twice is harmless.
fn watch_then_catch_up(
    session: &Arc<ArchiverSession>,
    opts: &WatchOptions,
    catch_up: impl FnOnce() -> Option<PreprocessOutcome>,
) -> Result<(LiveWatcher, Option<PreprocessOutcome>), ArchiveError> {
    let capability = WatchCapability::probe(opts.queue_capacity);
    let watcher = LiveWatcher::start(Arc::clone(session), capability, opts)?;
    let outcome = catch_up();
    if let Some(outcome) = &outcome {
        info!(
            ok = outcome.ok(),
            copied = outcome.copied(),
            "catch-up preprocess finished"
        );
    }
    Ok((watcher, outcome))
}

pub fn run(
    cfg: &ArchiverConfig,
    session: ArchiverSession,
    opts: &WatchCommandOptions,
) -> Result<CommandReport> {
    let mut report = CommandReport::new("watch");

    if !session.sorted_base().is_persistent() {
        report.issue("watch needs a persistent sorted dir (set --sorted-dir or [archive] sorted_dir)");
        return Ok(report);
    }

    let lock = WatchLock::acquire(&watch_lock_path(cfg))?;
    report.detail(format!("watch_lock={}", lock.path().display()));

    let session = Arc::new(session);
    let shutdown = session.shutdown_flag();
    let watch_opts = cfg.watch.options();
    let started = watch_then_catch_up(&session, &watch_opts, || {
        opts.catch_up.then(|| session.preprocess())
    });
    let (watcher, caught_up) = match started {
        Ok(started) => started,
        Err(ArchiveError::CapabilityUnavailable(reason)) => {
            report.issue(format!("live watching unavailable: {reason}"));
            return Ok(report);
        }
        Err(err) => return Err(err.into()),
    };

    for dir in watcher.watched() {
        report.detail(format!("watching={}", dir.display()));
    }
    if let Some(outcome) = &caught_up {
        preprocess::describe(outcome, &mut report);
    }
    if watcher.watched().is_empty() {
        report.issue("no incoming directory could be watched");
        watcher.stop();
        return Ok(report);
    }

    info!(
        grace_millis = watch_opts.grace.as_millis() as u64,
        "watching for new messages; SIGINT or SIGTERM stops"
    );
    while !shutdown.load(Ordering::SeqCst) {
        if !watcher.is_running() {
            report.issue("watch handler exited unexpectedly");
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    let stats = watcher.stop();
    report.detail(format!("events.received={}", stats.received));
    report.detail(format!("events.dropped={}", stats.dropped));
    report.detail(format!("events.ignored={}", stats.ignored));
    report.detail(format!("messages.sorted={}", stats.sorted));
    report.detail(format!("messages.already_present={}", stats.already_present));
    report.detail(format!("messages.failed={}", stats.failed));
    report.detail(format!("messages.abandoned={}", stats.abandoned));
    if stats.dropped > 0 {
        report.detail("dropped events are picked up by the next `mlarchive preprocess`");
    }
    drop(lock);
    Ok(report)
}
