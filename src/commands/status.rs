use anyhow::Result;

use crate::archiver::session::ArchiverSession;
use crate::commands::CommandReport;

pub fn run(session: &ArchiverSession) -> Result<CommandReport> {
    let mut report = CommandReport::new("status");

    report.detail(format!("target_dir={}", session.target_dir().display()));
    report.detail(format!(
        "sorted_dir={} ({})",
        session.sorted_base().path().display(),
        if session.sorted_base().is_persistent() {
            "persistent"
        } else {
            "temporary"
        }
    ));
    report.detail(format!("renderer={}", session.renderer().describe()));
    let params = session.params();
    report.detail(format!(
        "render tlevels={} check_no_archive={} archive_admin={}",
        params.tlevels, params.check_no_archive, params.archive_admin
    ));

    let lists = session.lists();
    if lists.is_empty() {
        report.issue("no mailing lists registered (use --list or [archive] lists)");
    }
    for list in lists {
        let requested = list.archive_requested();
        report.detail(format!(
            "list={} root={} archive_requested={} output={}",
            list.name,
            list.root.display(),
            requested,
            list.output_dir.display()
        ));
        if requested && !list.incoming_dir.is_dir() {
            report.issue(format!(
                "list {} requests archiving but {} is missing",
                list.name,
                list.incoming_dir.display()
            ));
        }
    }

    Ok(report)
}
