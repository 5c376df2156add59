use anyhow::{Result, anyhow};
use std::path::{Path, PathBuf};

/// Directory below a list root holding the delivered mails.
pub const INCOMING_DIR: &str = "archive";
/// File below a list root whose presence opts the list into web archiving.
pub const CONTROL_FILE: &str = "control/webarchive";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailingList {
    pub name: String,
    pub root: PathBuf,
    pub incoming_dir: PathBuf,
    pub control_file: PathBuf,
    pub sorted_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl MailingList {
    pub fn new(root: &Path, sorted_base: &Path, target_dir: &Path) -> Result<Self> {
        let root = absolutize(root)?;
        let name = root
            .file_name()
            .and_then(|s| s.to_str())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| anyhow!("mailing list root has no usable name: {}", root.display()))?
            .to_string();

        Ok(Self {
            incoming_dir: root.join(INCOMING_DIR),
            control_file: root.join(CONTROL_FILE),
            sorted_dir: sorted_base.join(&name),
            output_dir: target_dir.join(&name),
            name,
            root,
        })
    }

    pub fn archive_requested(&self) -> bool {
        self.control_file.is_file()
    }

    /// Rendered output location for one bucket, e.g. `<output>/2013/01`.
    pub fn rendered_month_dir(&self, year: u32, month: u32) -> PathBuf {
        self.output_dir
            .join(format!("{year:04}"))
            .join(format!("{month:02}"))
    }
}

pub fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir()
        .map_err(|err| anyhow!("current directory could not be resolved: {err}"))?;
    Ok(cwd.join(path))
}
