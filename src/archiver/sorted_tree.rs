use crate::error::ArchiveError;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tempfile::Builder;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Copied,
    AlreadyPresent,
}

pub fn month_dir(bucket_root: &Path, year: u32, month: u32) -> PathBuf {
    bucket_root.join(year.to_string()).join(month.to_string())
}

/// Copy `source` into `bucket_root/<year>/<month>/` unless a file of the
/// same name is already there.
///
/// The copy is staged in a dot-file (MHonArc's `MHPATTERN` skips those) and
/// hard-linked into place, so the final name only ever refers to a complete
/// file and a racing placement of the same name keeps the first copy.
pub fn place(
    bucket_root: &Path,
    year: u32,
    month: u32,
    source: &Path,
) -> Result<Placement, ArchiveError> {
    let file_name = source.file_name().ok_or_else(|| {
        ArchiveError::io(
            source,
            std::io::Error::new(ErrorKind::InvalidInput, "message path has no file name"),
        )
    })?;

    let dir = month_dir(bucket_root, year, month);
    fs::create_dir_all(&dir).map_err(|err| ArchiveError::io(&dir, err))?;

    let target = dir.join(file_name);
    if fs::symlink_metadata(&target).is_ok() {
        trace!(target = %target.display(), "already sorted");
        return Ok(Placement::AlreadyPresent);
    }

    let staged = Builder::new()
        .prefix(".incoming-")
        .tempfile_in(&dir)
        .map_err(|err| ArchiveError::io(&dir, err))?;
    fs::copy(source, staged.path()).map_err(|err| ArchiveError::io(source, err))?;

    match staged.persist_noclobber(&target) {
        Ok(_) => Ok(Placement::Copied),
        Err(err) if err.error.kind() == ErrorKind::AlreadyExists => Ok(Placement::AlreadyPresent),
        Err(err) => Err(ArchiveError::io(&target, err.error)),
    }
}

/// Bucket directories present under a sorted root, ascending.
///
/// Entries that are not numeric directories are ignored.
pub fn list_buckets(bucket_root: &Path) -> Result<Vec<(u32, u32, PathBuf)>, ArchiveError> {
    let mut out = Vec::new();
    if !bucket_root.is_dir() {
        return Ok(out);
    }

    for (year, year_dir) in numeric_subdirs(bucket_root)? {
        for (month, month_dir) in numeric_subdirs(&year_dir)? {
            out.push((year, month, month_dir));
        }
    }
    out.sort_by_key(|(year, month, _)| (*year, *month));
    Ok(out)
}

fn numeric_subdirs(dir: &Path) -> Result<Vec<(u32, PathBuf)>, ArchiveError> {
    let entries = fs::read_dir(dir).map_err(|err| ArchiveError::io(dir, err))?;
    let mut out = Vec::new();
    for entry in entries {
        let path = entry.map_err(|err| ArchiveError::io(dir, err))?.path();
        if !path.is_dir() {
            continue;
        }
        let Some(value) = path
            .file_name()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u32>().ok())
        else {
            continue;
        };
        out.push((value, path));
    }
    Ok(out)
}
