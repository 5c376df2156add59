use crate::error::{ArchiveError, ItemFailure};
use chrono::{Datelike, NaiveDate};
use mail_parser::MessageParser;
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MessageDate {
    pub year: u32,
    pub month: u32,
    pub day: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub name: String,
    pub path: PathBuf,
    pub date: MessageDate,
}

#[derive(Debug, Default)]
pub struct StoreScan {
    pub messages: Vec<StoredMessage>,
    pub failures: Vec<ItemFailure>,
}

/// mlmmj numbers archived mails sequentially; anything else in the
/// directory (lock files, half-written temp files) is not a message.
pub fn is_message_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}

/// Numeric names sort by value, everything else after them by bytes.
pub fn compare_message_names(a: &str, b: &str) -> Ordering {
    match (is_message_name(a), is_message_name(b)) {
        (true, true) => {
            let a_trim = a.trim_start_matches('0');
            let b_trim = b.trim_start_matches('0');
            a_trim
                .len()
                .cmp(&b_trim.len())
                .then_with(|| a_trim.cmp(b_trim))
                .then_with(|| a.cmp(b))
        }
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.cmp(b),
    }
}

pub fn parse_message_date(path: &Path) -> Result<MessageDate, ArchiveError> {
    let raw = fs::read(path).map_err(|err| ArchiveError::io(path, err))?;
    parse_date_from_bytes(&raw).map_err(|reason| ArchiveError::UnparseableMessage {
        path: path.to_path_buf(),
        reason,
    })
}

fn parse_date_from_bytes(raw: &[u8]) -> Result<MessageDate, String> {
    let message = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| "not a mail message".to_string())?;
    let date = message
        .date()
        .ok_or_else(|| "missing or invalid Date header".to_string())?;

    // The header's own local date decides the bucket, not UTC.
    let checked = NaiveDate::from_ymd_opt(
        i32::from(date.year),
        u32::from(date.month),
        u32::from(date.day),
    )
    .ok_or_else(|| {
        format!(
            "Date header out of range: {:04}-{:02}-{:02}",
            date.year, date.month, date.day
        )
    })?;

    Ok(MessageDate {
        year: checked.year() as u32,
        month: checked.month(),
        day: checked.day(),
    })
}

pub fn read_store(dir: &Path) -> Result<StoreScan, ArchiveError> {
    let entries = fs::read_dir(dir).map_err(|err| ArchiveError::io(dir, err))?;
    let mut scan = StoreScan::default();

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                scan.failures
                    .push(ItemFailure::new(dir, ArchiveError::io(dir, err)));
                continue;
            }
        };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|s| s.to_str()).map(str::to_owned) else {
            warn!(path = %path.display(), "skipping message with non-UTF-8 name");
            continue;
        };

        match parse_message_date(&path) {
            Ok(date) => scan.messages.push(StoredMessage { name, path, date }),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "message skipped");
                scan.failures.push(ItemFailure::new(path, err));
            }
        }
    }

    scan.messages
        .sort_by(|a, b| compare_message_names(&a.name, &b.name));
    Ok(scan)
}
