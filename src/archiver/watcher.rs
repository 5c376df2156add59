//! Live mode: sort messages into their bucket as mlmmj delivers them.
//!
//! notify's callback only forwards candidate paths into a bounded queue.
//! A single handler thread drains it, waits out the delivery grace period
//! and then sorts the message under the session lock. Events that do not
//! fit in the queue are dropped; the next `preprocess` picks them up.

use crate::archiver::paths::MailingList;
use crate::archiver::session::ArchiverSession;
use crate::archiver::sorted_tree::Placement;
use crate::archiver::store::is_message_name;
use crate::error::ArchiveError;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

const GRACE_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Pause between seeing a new file and reading it, so the delivery
    /// agent can finish writing.
    pub grace: Duration,
    pub queue_capacity: usize,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(2),
            queue_capacity: 1024,
        }
    }
}

#[derive(Debug, Default)]
pub struct WatchStats {
    pub received: AtomicUsize,
    pub dropped: AtomicUsize,
    pub ignored: AtomicUsize,
    pub sorted: AtomicUsize,
    pub already_present: AtomicUsize,
    pub failed: AtomicUsize,
    pub abandoned: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchStatsSnapshot {
    pub received: usize,
    pub dropped: usize,
    pub ignored: usize,
    pub sorted: usize,
    pub already_present: usize,
    pub failed: usize,
    pub abandoned: usize,
}

impl WatchStats {
    pub fn snapshot(&self) -> WatchStatsSnapshot {
        WatchStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            sorted: self.sorted.load(Ordering::Relaxed),
            already_present: self.already_present.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

/// A subscription ready to be attached to directories.
pub struct WatchHandle {
    watcher: RecommendedWatcher,
    events: Receiver<PathBuf>,
    stats: Arc<WatchStats>,
}

/// Result of the one-time check whether filesystem events work here.
pub enum WatchCapability {
    Available(WatchHandle),
    Unavailable(String),
}

impl WatchCapability {
    pub fn probe(queue_capacity: usize) -> Self {
        let (tx, rx) = sync_channel(queue_capacity.max(1));
        let stats = Arc::new(WatchStats::default());
        let callback_stats = Arc::clone(&stats);

        match notify::recommended_watcher(move |res: notify::Result<Event>| {
            forward_event(res, &tx, &callback_stats)
        }) {
            Ok(watcher) => Self::Available(WatchHandle {
                watcher,
                events: rx,
                stats,
            }),
            Err(err) => Self::Unavailable(err.to_string()),
        }
    }
}

fn forward_event(res: notify::Result<Event>, tx: &SyncSender<PathBuf>, stats: &WatchStats) {
    let event = match res {
        Ok(event) => event,
        Err(err) => {
            warn!(error = %err, "filesystem watch error");
            return;
        }
    };

    for path in created_paths(&event) {
        stats.received.fetch_add(1, Ordering::Relaxed);
        match tx.try_send(path) {
            Ok(()) => {}
            Err(TrySendError::Full(path)) => {
                stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(path = %path.display(), "watch queue full, event dropped");
            }
            Err(TrySendError::Disconnected(_)) => return,
        }
    }
}

/// Paths that newly appeared: created, or renamed into a watched directory.
fn created_paths(event: &Event) -> Vec<PathBuf> {
    match &event.kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.clone()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.last().cloned().into_iter().collect()
        }
        _ => Vec::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Ignored(&'static str),
    Abandoned,
    Sorted(Placement),
    Failed(String),
}

struct Handler {
    session: Arc<ArchiverSession>,
    lists_by_dir: HashMap<PathBuf, MailingList>,
    grace: Duration,
    stop: Arc<AtomicBool>,
    stats: Arc<WatchStats>,
}

impl Handler {
    fn list_for(&self, path: &Path) -> Option<&MailingList> {
        let parent = path.parent()?;
        if let Some(list) = self.lists_by_dir.get(parent) {
            return Some(list);
        }
        let canonical = fs::canonicalize(parent).ok()?;
        self.lists_by_dir.get(&canonical)
    }

    fn wait_grace(&self) -> bool {
        let deadline = Instant::now() + self.grace;
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(GRACE_SLICE.min(deadline - now));
        }
    }

    fn handle(&self, path: &Path) -> EventOutcome {
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            return EventOutcome::Ignored("unnamed");
        };
        if !is_message_name(name) {
            return EventOutcome::Ignored("not a message name");
        }
        if !fs::metadata(path).map(|m| m.is_file()).unwrap_or(false) {
            return EventOutcome::Ignored("not a plain file");
        }
        let Some(list) = self.list_for(path) else {
            return EventOutcome::Ignored("outside watched lists");
        };
        if !self.wait_grace() {
            return EventOutcome::Abandoned;
        }
        if !list.archive_requested() {
            return EventOutcome::Ignored("archiving not requested");
        }

        match self.session.sort_one(list, path) {
            Ok(placement) => EventOutcome::Sorted(placement),
            Err(err) => EventOutcome::Failed(err.to_string()),
        }
    }

    fn record(&self, path: &Path, outcome: &EventOutcome) {
        let counter = match outcome {
            EventOutcome::Ignored(reason) => {
                trace!(path = %path.display(), reason, "event ignored");
                &self.stats.ignored
            }
            EventOutcome::Abandoned => {
                debug!(path = %path.display(), "event abandoned on stop");
                &self.stats.abandoned
            }
            EventOutcome::Sorted(Placement::Copied) => {
                info!(path = %path.display(), "sorted new message");
                &self.stats.sorted
            }
            EventOutcome::Sorted(Placement::AlreadyPresent) => &self.stats.already_present,
            EventOutcome::Failed(err) => {
                warn!(path = %path.display(), error = %err, "live sort failed");
                &self.stats.failed
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn run(self, events: Receiver<PathBuf>) {
        while let Ok(path) = events.recv() {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            let outcome = self.handle(&path);
            self.record(&path, &outcome);
        }
        debug!("watch handler loop finished");
    }
}

/// Running live watcher. `stop` (or drop) ends the subscription.
pub struct LiveWatcher {
    watcher: Option<RecommendedWatcher>,
    worker: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    stats: Arc<WatchStats>,
    watched: Vec<PathBuf>,
}

impl LiveWatcher {
    pub fn start(
        session: Arc<ArchiverSession>,
        capability: WatchCapability,
        opts: &WatchOptions,
    ) -> Result<Self, ArchiveError> {
        let WatchHandle {
            mut watcher,
            events,
            stats,
        } = match capability {
            WatchCapability::Available(handle) => handle,
            WatchCapability::Unavailable(reason) => {
                return Err(ArchiveError::CapabilityUnavailable(reason));
            }
        };

        let mut lists_by_dir = HashMap::new();
        let mut watched = Vec::new();
        for list in session.lists() {
            if !list.incoming_dir.is_dir() {
                warn!(list = %list.name, dir = %list.incoming_dir.display(), "incoming dir missing, not watched");
                continue;
            }
            if let Err(err) = watcher.watch(&list.incoming_dir, RecursiveMode::NonRecursive) {
                warn!(list = %list.name, error = %err, "failed to watch incoming dir");
                continue;
            }
            if let Ok(canonical) = fs::canonicalize(&list.incoming_dir) {
                lists_by_dir.insert(canonical, list.clone());
            }
            watched.push(list.incoming_dir.clone());
            lists_by_dir.insert(list.incoming_dir.clone(), list);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let handler = Handler {
            session,
            lists_by_dir,
            grace: opts.grace,
            stop: Arc::clone(&stop),
            stats: Arc::clone(&stats),
        };
        let worker = thread::Builder::new()
            .name("mlarchive-watch".to_string())
            .spawn(move || handler.run(events))
            .map_err(|err| ArchiveError::io("mlarchive-watch", err))?;

        info!(dirs = watched.len(), "live watch started");
        Ok(Self {
            watcher: Some(watcher),
            worker: Some(worker),
            stop,
            stats,
            watched,
        })
    }

    pub fn watched(&self) -> &[PathBuf] {
        &self.watched
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    pub fn stop(mut self) -> WatchStatsSnapshot {
        self.shutdown();
        self.stats.snapshot()
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // Dropping the watcher drops the queue sender, which ends `run`.
        self.watcher.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("watch handler thread panicked");
            }
            info!("live watch stopped");
        }
    }
}

impl Drop for LiveWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
