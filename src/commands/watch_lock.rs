//! The `<target>/.mlarchive-watch.lock` file. A running `watch` holds an
//! fs2 exclusive lock on it and keeps its pid inside; whether the lock can
//! be taken is what tells `stop` if a watcher is alive.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Held by a running watcher; unlocks and removes the file when dropped.
pub struct WatchLock {
    file: File,
    path: PathBuf,
}

impl WatchLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut file = open_lock_file(path, true)
            .with_context(|| format!("failed to open watch lock {}", path.display()))?;
        file.try_lock_exclusive().with_context(|| {
            format!(
                "another watcher holds {}; run `mlarchive stop` first",
                path.display()
            )
        })?;
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.sync_all()?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WatchLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %err, "failed to remove watch lock");
            }
        }
        let _ = FileExt::unlock(&self.file);
    }
}

/// What `stop` finds at the lock path.
pub enum LockState {
    Missing,
    /// The file exists but nobody holds it; the caller now holds it.
    Stale(File),
    /// A live watcher holds it. `pid` is what it wrote into the file.
    Held { file: File, pid: Option<u32> },
}

fn open_lock_file(path: &Path, create: bool) -> std::io::Result<File> {
    OpenOptions::new()
        .create(create)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
}

fn parse_pid(raw: &str) -> Option<u32> {
    raw.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.parse().ok())
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

pub fn inspect(path: &Path) -> Result<LockState> {
    let mut file = match open_lock_file(path, false) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(LockState::Missing),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to open watch lock {}", path.display()));
        }
    };

    match file.try_lock_exclusive() {
        Ok(()) => Ok(LockState::Stale(file)),
        Err(err) if is_contended(&err) => {
            let mut raw = String::new();
            file.seek(SeekFrom::Start(0))?;
            file.read_to_string(&mut raw)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Ok(LockState::Held {
                file,
                pid: parse_pid(&raw),
            })
        }
        Err(err) => {
            Err(err).with_context(|| format!("failed to check watch lock {}", path.display()))
        }
    }
}

/// True once the holder has let go of the lock.
pub fn released(file: &File) -> Result<bool> {
    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = FileExt::unlock(file);
            Ok(true)
        }
        Err(err) if is_contended(&err) => Ok(false),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_writes_pid_and_drop_removes_file() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("www/.mlarchive-watch.lock");
        let lock = WatchLock::acquire(&path).expect("acquire");
        let raw = fs::read_to_string(lock.path()).expect("read");
        assert_eq!(parse_pid(&raw), Some(std::process::id()));

        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join(".mlarchive-watch.lock");
        let _lock = WatchLock::acquire(&path).expect("acquire");
        assert!(WatchLock::acquire(&path).is_err());
    }

    #[test]
    fn inspect_tells_held_stale_and_missing_apart() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join(".mlarchive-watch.lock");
        assert!(matches!(inspect(&path).expect("inspect"), LockState::Missing));

        let lock = WatchLock::acquire(&path).expect("acquire");
        match inspect(&path).expect("inspect") {
            LockState::Held { file, pid } => {
                assert_eq!(pid, Some(std::process::id()));
                assert!(!released(&file).expect("poll"));
                drop(lock);
                assert!(released(&file).expect("poll"));
            }
            _ => panic!("lock should be held"),
        }

        fs::write(&path, "4242\n").expect("leftover lock");
        assert!(matches!(inspect(&path).expect("inspect"), LockState::Stale(_)));
    }

    #[test]
    fn pid_is_first_non_empty_line() {
        assert_eq!(parse_pid("\n  4242 \n"), Some(4242));
        assert_eq!(parse_pid("not-a-pid\n"), None);
        assert_eq!(parse_pid(""), None);
    }
}
