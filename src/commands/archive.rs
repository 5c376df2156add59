use anyhow::Result;
use tracing::info;

use crate::archiver::session::ArchiverSession;
use crate::commands::{CommandReport, preprocess};

#[derive(Debug, Clone, Default)]
pub struct ArchiveOptions {
    pub skip_preprocess: bool,
}

pub fn run(session: &ArchiverSession, opts: &ArchiveOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("archive");
    report.detail(format!("target_dir={}", session.target_dir().display()));
    report.detail(format!("renderer={}", session.renderer().describe()));

    if opts.skip_preprocess {
        if !session.sorted_base().is_persistent() {
            report.issue("--skip-preprocess needs a persistent sorted dir (set --sorted-dir)");
            return Ok(report);
        }
        report.detail("preprocess skipped");
    } else {
        let outcome = session.preprocess();
        preprocess::describe(&outcome, &mut report);
        if outcome.interrupted {
            return Ok(report);
        }
    }

    let outcome = session.archive()?;
    if opts.skip_preprocess {
        for name in &outcome.skipped_lists {
            report.detail(format!("list={name} skipped (no control/webarchive)"));
        }
    }
    for bucket in &outcome.rendered {
        report.detail(format!(
            "rendered list={} bucket={:04}-{:02} target={}",
            bucket.list,
            bucket.year,
            bucket.month,
            bucket.target.display()
        ));
    }
    report.detail(format!("buckets_rendered={}", outcome.rendered.len()));
    info!(
        ok = outcome.ok(),
        rendered = outcome.rendered.len(),
        failed = outcome.failures.len(),
        "archive run finished"
    );
    report.failures(&outcome.failures);
    if outcome.interrupted {
        report.issue("archive interrupted before all buckets were rendered");
    }
    Ok(report)
}
