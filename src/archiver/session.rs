//! The archiver session: registered lists, render settings, and the one
//! lock that keeps sorting and rendering apart.
//!
//! Every mutation of a sorted tree and every renderer run happens while
//! holding `ArchiverSession::lock`. The lock is session-wide rather than
//! per list, so archiving one list also waits for unrelated lists. That is
//! a throughput limit only; correctness does not depend on it being finer.

use crate::archiver::bucket::bucket_messages;
use crate::archiver::paths::{MailingList, absolutize};
use crate::archiver::render::{RenderParams, Renderer, write_rc_file};
use crate::archiver::search::{self, SearchQuery};
use crate::archiver::sorted_tree::{self, Placement};
use crate::archiver::store::{parse_message_date, read_store};
use crate::error::{ArchiveError, ItemFailure};
use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Where sorted year/month trees live.
#[derive(Debug)]
pub enum SortedBase {
    Persistent(PathBuf),
    /// Removed together with the session.
    Temporary(TempDir),
}

impl SortedBase {
    pub fn path(&self) -> &Path {
        match self {
            Self::Persistent(path) => path,
            Self::Temporary(dir) => dir.path(),
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Persistent(_))
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub target_dir: PathBuf,
    pub sorted_dir: Option<PathBuf>,
    pub params: RenderParams,
}

pub struct ArchiverSession {
    target_dir: PathBuf,
    sorted_base: SortedBase,
    lists: RwLock<Vec<MailingList>>,
    lock: Mutex<()>,
    params: RenderParams,
    renderer: Box<dyn Renderer>,
    shutdown: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
pub struct ListPreprocess {
    pub list: String,
    pub scanned: usize,
    pub copied: usize,
    pub already_present: usize,
    pub failures: Vec<ItemFailure>,
}

#[derive(Debug, Default)]
pub struct PreprocessOutcome {
    pub lists: Vec<ListPreprocess>,
    /// Registered lists without the control marker.
    pub skipped_lists: Vec<String>,
    pub interrupted: bool,
}

impl PreprocessOutcome {
    pub fn copied(&self) -> usize {
        self.lists.iter().map(|l| l.copied).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemFailure> {
        self.lists.iter().flat_map(|l| l.failures.iter())
    }

    pub fn ok(&self) -> bool {
        !self.interrupted && self.failures().next().is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedBucket {
    pub list: String,
    pub year: u32,
    pub month: u32,
    pub source: PathBuf,
    pub target: PathBuf,
}

#[derive(Debug, Default)]
pub struct ArchiveOutcome {
    pub rendered: Vec<RenderedBucket>,
    pub failures: Vec<ItemFailure>,
    pub skipped_lists: Vec<String>,
    pub interrupted: bool,
}

impl ArchiveOutcome {
    pub fn ok(&self) -> bool {
        !self.interrupted && self.failures.is_empty()
    }
}

impl ArchiverSession {
    pub fn new(opts: SessionOptions, renderer: Box<dyn Renderer>) -> Result<Self> {
        let target_dir = absolutize(&opts.target_dir)?;
        let sorted_base = match opts.sorted_dir {
            Some(dir) => SortedBase::Persistent(absolutize(&dir)?),
            None => SortedBase::Temporary(
                tempfile::Builder::new()
                    .prefix("archive")
                    .tempdir()
                    .context("failed to create temporary sorted directory")?,
            ),
        };
        debug!(
            target = %target_dir.display(),
            sorted = %sorted_base.path().display(),
            "archiver session created"
        );

        Ok(Self {
            target_dir,
            sorted_base,
            lists: RwLock::new(Vec::new()),
            lock: Mutex::new(()),
            params: opts.params,
            renderer,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Add a mailing list root (the directory mlmmj keeps the list in).
    pub fn register(&self, root: &Path) -> Result<MailingList> {
        let list = MailingList::new(root, self.sorted_base.path(), &self.target_dir)?;
        let mut lists = self.lists.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = lists.iter().find(|l| l.name == list.name) {
            if existing.root == list.root {
                return Ok(existing.clone());
            }
            bail!(
                "mailing list name `{}` is already taken by {}",
                list.name,
                existing.root.display()
            );
        }
        debug!(list = %list.name, root = %list.root.display(), "registered mailing list");
        lists.push(list.clone());
        Ok(list)
    }

    pub fn lists(&self) -> Vec<MailingList> {
        self.lists
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn list(&self, name: &str) -> Option<MailingList> {
        self.lists
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|l| l.name == name)
            .cloned()
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    pub fn sorted_base(&self) -> &SortedBase {
        &self.sorted_base
    }

    pub fn params(&self) -> &RenderParams {
        &self.params
    }

    pub fn renderer(&self) -> &dyn Renderer {
        self.renderer.as_ref()
    }

    /// Flag polled between lists and buckets; set it to wind down early.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    fn shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn archived_lists(&self) -> (Vec<MailingList>, Vec<String>) {
        let mut active = Vec::new();
        let mut skipped = Vec::new();
        for list in self.lists() {
            if list.archive_requested() {
                active.push(list);
            } else {
                debug!(list = %list.name, "no control marker, skipping");
                skipped.push(list.name);
            }
        }
        (active, skipped)
    }

    /// Sort every opted-in list's incoming store into its bucket tree.
    pub fn preprocess(&self) -> PreprocessOutcome {
        let _guard = self.guard();
        let (active, skipped_lists) = self.archived_lists();
        let mut out = PreprocessOutcome {
            skipped_lists,
            ..PreprocessOutcome::default()
        };

        for list in active {
            if self.shutting_down() {
                out.interrupted = true;
                break;
            }
            out.lists.push(preprocess_list(&list));
        }
        out
    }

    /// Render every bucket of every opted-in list.
    pub fn archive(&self) -> Result<ArchiveOutcome, ArchiveError> {
        let _guard = self.guard();
        let (active, skipped_lists) = self.archived_lists();
        let mut out = ArchiveOutcome {
            skipped_lists,
            ..ArchiveOutcome::default()
        };
        if active.is_empty() {
            return Ok(out);
        }

        let rc_file = write_rc_file(&self.params)?;

        'lists: for list in active {
            let buckets = match sorted_tree::list_buckets(&list.sorted_dir) {
                Ok(buckets) => buckets,
                Err(err) => {
                    out.failures
                        .push(ItemFailure::new(list.sorted_dir.clone(), err));
                    continue;
                }
            };
            info!(list = %list.name, buckets = buckets.len(), "rendering");

            for (year, month, source) in buckets {
                if self.shutting_down() {
                    out.interrupted = true;
                    break 'lists;
                }
                let target = list.rendered_month_dir(year, month);
                if let Err(err) = fs::create_dir_all(&target) {
                    out.failures
                        .push(ItemFailure::new(source, ArchiveError::io(&target, err)));
                    continue;
                }

                match self.renderer.render(&source, &target, rc_file.path()) {
                    Ok(()) => out.rendered.push(RenderedBucket {
                        list: list.name.clone(),
                        year,
                        month,
                        source,
                        target,
                    }),
                    Err(err) => {
                        warn!(list = %list.name, year, month, error = %err, "render failed");
                        out.failures.push(ItemFailure::new(source, err.into()));
                    }
                }
            }
        }

        Ok(out)
    }

    /// Sort a single newly delivered message; used by the live watcher.
    pub fn sort_one(&self, list: &MailingList, message: &Path) -> Result<Placement, ArchiveError> {
        let _guard = self.guard();
        let date = parse_message_date(message)?;
        let placement = sorted_tree::place(&list.sorted_dir, date.year, date.month, message)?;
        debug!(
            list = %list.name,
            message = %message.display(),
            year = date.year,
            month = date.month,
            ?placement,
            "live sort"
        );
        Ok(placement)
    }

    /// Lock-free scan of a list's rendered pages.
    pub fn search(&self, list_name: &str, query: &SearchQuery) -> Result<Vec<PathBuf>, ArchiveError> {
        let list = self
            .list(list_name)
            .ok_or_else(|| ArchiveError::UnknownList(list_name.to_string()))?;
        search::search(&list.output_dir, query)
    }
}

fn preprocess_list(list: &MailingList) -> ListPreprocess {
    let mut out = ListPreprocess {
        list: list.name.clone(),
        ..ListPreprocess::default()
    };

    let scan = match read_store(&list.incoming_dir) {
        Ok(scan) => scan,
        Err(err) => {
            out.failures
                .push(ItemFailure::new(list.incoming_dir.clone(), err));
            return out;
        }
    };
    out.scanned = scan.messages.len() + scan.failures.len();
    out.failures = scan.failures;

    let buckets = bucket_messages(
        scan.messages
            .iter()
            .map(|m| (m.name.clone(), m.date.year, m.date.month)),
    );
    if buckets.is_empty() {
        debug!(list = %list.name, "incoming store has nothing to sort");
    } else {
        debug!(
            list = %list.name,
            buckets = buckets.len(),
            messages = buckets.message_count(),
            "bucketed incoming store"
        );
    }

    for (year, month, names) in buckets.months() {
        for name in names {
            let source = list.incoming_dir.join(&name.0);
            match sorted_tree::place(&list.sorted_dir, year, month, &source) {
                Ok(Placement::Copied) => out.copied += 1,
                Ok(Placement::AlreadyPresent) => out.already_present += 1,
                Err(err) => out.failures.push(ItemFailure::new(source, err)),
            }
        }
    }

    info!(
        list = %list.name,
        scanned = out.scanned,
        copied = out.copied,
        already_present = out.already_present,
        failed = out.failures.len(),
        "preprocessed"
    );
    out
}
