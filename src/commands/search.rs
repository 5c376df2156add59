use anyhow::Result;

use crate::archiver::search::SearchQuery;
use crate::archiver::session::ArchiverSession;
use crate::commands::CommandReport;

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub list: String,
    pub query: String,
    pub regex: bool,
}

pub fn run(session: &ArchiverSession, opts: &SearchOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("search");

    let query = if opts.regex {
        SearchQuery::pattern(&opts.query)?
    } else {
        SearchQuery::literal(opts.query.as_str())
    };

    let hits = session.search(&opts.list, &query)?;
    for hit in &hits {
        report.detail(hit.display().to_string());
    }
    Ok(report)
}
