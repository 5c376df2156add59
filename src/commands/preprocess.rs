use anyhow::Result;

use crate::archiver::session::{ArchiverSession, PreprocessOutcome};
use crate::commands::CommandReport;

pub fn describe(outcome: &PreprocessOutcome, report: &mut CommandReport) {
    for list in &outcome.lists {
        report.detail(format!(
            "list={} scanned={} copied={} already_present={} failed={}",
            list.list,
            list.scanned,
            list.copied,
            list.already_present,
            list.failures.len()
        ));
    }
    for name in &outcome.skipped_lists {
        report.detail(format!("list={name} skipped (no control/webarchive)"));
    }
    report.detail(format!("copied_total={}", outcome.copied()));
    report.failures(outcome.failures());
    if outcome.interrupted {
        report.issue("preprocess interrupted before all lists were sorted");
    }
}

pub fn run(session: &ArchiverSession) -> Result<CommandReport> {
    let mut report = CommandReport::new("preprocess");
    report.detail(format!(
        "sorted_dir={}",
        session.sorted_base().path().display()
    ));

    let outcome = session.preprocess();
    describe(&outcome, &mut report);
    Ok(report)
}
