use crate::error::ArchiveError;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;
use walkdir::WalkDir;

static MESSAGE_PAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+\.html$").expect("static page pattern"));

/// What a rendered page has to contain to be a hit.
#[derive(Debug, Clone)]
pub enum SearchQuery {
    /// Case-insensitive substring, compared after Unicode lowercasing.
    Literal(String),
    /// Regular expression (`regex` crate syntax), case-sensitive unless it
    /// says `(?i)`.
    Pattern(Regex),
}

impl SearchQuery {
    pub fn literal(text: impl Into<String>) -> Self {
        Self::Literal(text.into().to_lowercase())
    }

    pub fn pattern(pattern: &str) -> Result<Self, ArchiveError> {
        Ok(Self::Pattern(Regex::new(pattern)?))
    }

    pub fn matches(&self, content: &str) -> bool {
        match self {
            Self::Literal(needle) => content.to_lowercase().contains(needle.as_str()),
            Self::Pattern(re) => re.is_match(content),
        }
    }
}

pub fn is_message_page(name: &str) -> bool {
    MESSAGE_PAGE.is_match(name)
}

/// Scan every message page below `output_dir` and return the matching
/// ones relative to it, sorted.
///
/// Pages may be rewritten by a concurrent render; unreadable ones are
/// skipped rather than failing the search.
pub fn search(output_dir: &Path, query: &SearchQuery) -> Result<Vec<PathBuf>, ArchiveError> {
    if !output_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut hits = Vec::new();
    for entry in WalkDir::new(output_dir).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if !is_message_page(name) {
            continue;
        }

        let raw = match fs::read(entry.path()) {
            Ok(raw) => raw,
            Err(err) => {
                debug!(path = %entry.path().display(), error = %err, "skipping unreadable page");
                continue;
            }
        };
        if !query.matches(&String::from_utf8_lossy(&raw)) {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(output_dir) {
            hits.push(relative.to_path_buf());
        }
    }

    hits.sort();
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn page(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, body).expect("write page");
    }

    fn fixture() -> tempfile::TempDir {
        let tmp = tempdir().expect("tempdir");
        let root = tmp.path();
        page(root, "2013/01/0000000.html", "<p>Find the NEEDLE in here</p>");
        page(root, "2013/01/0000001.html", "<p>nothing to see</p>");
        page(root, "2013/02/0000000.html", "<p>another needle</p>");
        page(root, "2013/02/index.html", "<p>needle in an index page</p>");
        page(root, "2013/02/seq.html", "<p>needle</p>");
        page(root, "2013/02/0000002.htm", "<p>needle</p>");
        tmp
    }

    #[test]
    fn literal_search_is_case_insensitive_and_skips_index_pages() {
        let tmp = fixture();
        let hits = search(tmp.path(), &SearchQuery::literal("Needle")).expect("search");
        assert_eq!(
            hits,
            vec![
                PathBuf::from("2013/01/0000000.html"),
                PathBuf::from("2013/02/0000000.html"),
            ]
        );
    }

    #[test]
    fn pattern_search_uses_regex_semantics() {
        let tmp = fixture();
        let hits = search(tmp.path(), &SearchQuery::pattern(r"an(other)? needle").expect("re"))
            .expect("search");
        assert_eq!(hits, vec![PathBuf::from("2013/02/0000000.html")]);

        let exact = search(tmp.path(), &SearchQuery::pattern("NEEDLE in here").expect("re"))
            .expect("search");
        assert_eq!(exact, vec![PathBuf::from("2013/01/0000000.html")]);

        let case_sensitive =
            search(tmp.path(), &SearchQuery::pattern("Needle").expect("re")).expect("search");
        assert!(case_sensitive.is_empty());
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        assert!(matches!(
            SearchQuery::pattern("(unclosed"),
            Err(ArchiveError::Pattern(_))
        ));
    }

    #[test]
    fn missing_output_dir_has_no_hits() {
        let tmp = tempdir().expect("tempdir");
        let hits = search(&tmp.path().join("none"), &SearchQuery::literal("x")).expect("search");
        assert!(hits.is_empty());
    }

    #[test]
    fn page_names_are_numeric_html() {
        assert!(is_message_page("0000042.html"));
        assert!(!is_message_page("index.html"));
        assert!(!is_message_page("42.html.tmp"));
        assert!(!is_message_page(".html"));
    }
}
