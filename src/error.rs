use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("unparseable message {}: {reason}", path.display())]
    UnparseableMessage { path: PathBuf, reason: String },
    #[error("i/o failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("live watch unavailable: {0}")]
    CapabilityUnavailable(String),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("no registered mailing list named `{0}`")]
    UnknownList(String),
    #[error("invalid search pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl ArchiveError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("renderer binary unavailable: {0}")]
    MissingBinary(String),
    #[error("failed to launch renderer for {}: {message}", source_dir.display())]
    Launch { source_dir: PathBuf, message: String },
    #[error("renderer exited with {status} for {}: {stderr}", source_dir.display())]
    Failed {
        source_dir: PathBuf,
        status: String,
        stderr: String,
    },
    #[error("failed to write render configuration: {0}")]
    Config(#[source] std::io::Error),
}

/// One item of a batch operation that did not go through.
#[derive(Debug)]
pub struct ItemFailure {
    pub path: PathBuf,
    pub error: ArchiveError,
}

impl ItemFailure {
    pub fn new(path: impl Into<PathBuf>, error: ArchiveError) -> Self {
        Self {
            path: path.into(),
            error,
        }
    }
}
