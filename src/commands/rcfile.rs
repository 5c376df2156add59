use anyhow::Result;

use crate::archiver::config::ArchiverConfig;
use crate::archiver::render::render_rc;
use crate::commands::CommandReport;

pub fn run(cfg: &ArchiverConfig) -> Result<CommandReport> {
    let mut report = CommandReport::new("rcfile");
    report.detail(render_rc(&cfg.render.params));
    Ok(report)
}
