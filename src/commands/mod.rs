pub mod archive;
pub mod preprocess;
pub mod rcfile;
pub mod search;
pub mod status;
pub mod stop;
pub mod watch;
pub mod watch_lock;

use anyhow::{Context, Result};
use serde::Serialize;
use signal_hook::consts::{SIGINT, SIGTERM};
use std::path::PathBuf;

use crate::archiver::config::{ArchiverConfig, load_config};
use crate::archiver::render::MhonArcRenderer;
use crate::archiver::session::{ArchiverSession, SessionOptions};
use crate::error::ItemFailure;

/// Name of the pid lock file a running `watch` keeps in the target dir.
pub const WATCH_LOCK_FILE: &str = ".mlarchive-watch.lock";

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }

    pub fn failures<'a>(&mut self, failures: impl IntoIterator<Item = &'a ItemFailure>) {
        for failure in failures {
            self.issue(format!("{}: {}", failure.path.display(), failure.error));
        }
    }
}

/// Overrides given on the command line, applied on top of the config.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub config: Option<PathBuf>,
    pub target: Option<PathBuf>,
    pub lists: Vec<PathBuf>,
    pub sorted_dir: Option<PathBuf>,
}

pub fn resolve_config(global: &GlobalOptions) -> Result<ArchiverConfig> {
    let mut cfg = load_config(global.config.as_deref())?;
    if let Some(target) = &global.target {
        cfg.archive.target_dir = target.clone();
    }
    if let Some(sorted) = &global.sorted_dir {
        cfg.archive.sorted_dir = Some(sorted.clone());
    }
    for list in &global.lists {
        if !cfg.archive.lists.contains(list) {
            cfg.archive.lists.push(list.clone());
        }
    }
    Ok(cfg)
}

pub fn watch_lock_path(cfg: &ArchiverConfig) -> PathBuf {
    cfg.archive.target_dir.join(WATCH_LOCK_FILE)
}

/// Build a session with every configured list registered and SIGINT/SIGTERM
/// wired to its shutdown flag, so temporary files are still cleaned up.
pub fn open_session(cfg: &ArchiverConfig) -> Result<ArchiverSession> {
    let renderer = MhonArcRenderer::new(cfg.render.mhonarc_bin.clone(), cfg.render.timeout_secs);
    let session = ArchiverSession::new(
        SessionOptions {
            target_dir: cfg.archive.target_dir.clone(),
            sorted_dir: cfg.archive.sorted_dir.clone(),
            params: cfg.render.params.clone(),
        },
        Box::new(renderer),
    )?;
    for root in &cfg.archive.lists {
        session
            .register(root)
            .with_context(|| format!("failed to register mailing list {}", root.display()))?;
    }

    let flag = session.shutdown_flag();
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, flag.clone())
            .context("failed to install signal handler")?;
    }
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ArchiveError;

    #[test]
    fn item_failures_become_issues() {
        let mut report = CommandReport::new("preprocess");
        report.detail("list=dev copied=3");
        assert!(report.ok);

        report.failures([&ItemFailure::new(
            "/lists/dev/archive/4",
            ArchiveError::UnparseableMessage {
                path: "/lists/dev/archive/4".into(),
                reason: "missing or invalid Date header".to_string(),
            },
        )]);

        assert!(!report.ok);
        assert_eq!(report.details.len(), 1);
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].starts_with("/lists/dev/archive/4: unparseable message"));
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let global = GlobalOptions {
            config: Some(PathBuf::from("/nonexistent/mlarchive.toml")),
            ..GlobalOptions::default()
        };
        assert!(resolve_config(&global).is_err(), "explicit missing config must fail");
    }
}
