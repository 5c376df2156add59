use crate::error::RenderError;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tracing::debug;

const RC_TEMPLATE: &str = include_str!("mhonarc.rc");
const DEFAULT_MHONARC_BIN: &str = "/usr/bin/mhonarc";

/// Knobs of the generated MHonArc resource file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderParams {
    /// HTML prepended to every page; MHonArc expands `$IDXTITLE$` in it.
    pub header: String,
    /// Thread nesting depth before flattening.
    pub tlevels: u32,
    pub archive_admin: String,
    /// When false, mails asking not to be archived are archived anyway.
    pub check_no_archive: bool,
    pub search_target: String,
    pub style_file: String,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            header: "<p>ML archive</p>".to_string(),
            tlevels: 8,
            archive_admin: "postmaster@example.org".to_string(),
            check_no_archive: true,
            search_target: "/search".to_string(),
            style_file: "/archive.css".to_string(),
        }
    }
}

fn placeholder_value<'a>(params: &'a RenderParams, key: &str) -> Option<Cow<'a, str>> {
    let value = match key {
        "tlevels" => Cow::Owned(params.tlevels.to_string()),
        "checknoarchive" if params.check_no_archive => Cow::Borrowed("<CHECKNOARCHIVE>"),
        "checknoarchive" => Cow::Borrowed("<NOCHECKNOARCHIVE>"),
        "header" => Cow::Borrowed(params.header.as_str()),
        "archiveadmin" => Cow::Borrowed(params.archive_admin.as_str()),
        "searchtarget" => Cow::Borrowed(params.search_target.as_str()),
        "stylefile" => Cow::Borrowed(params.style_file.as_str()),
        _ => return None,
    };
    Some(value)
}

/// Expands `{{name}}` placeholders in one pass; substituted values are
/// never scanned again.
pub fn render_rc(params: &RenderParams) -> String {
    let mut out = String::with_capacity(RC_TEMPLATE.len() + params.header.len() * 3);
    let mut rest = RC_TEMPLATE;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => match placeholder_value(params, &after[..end]) {
                Some(value) => {
                    out.push_str(&value);
                    rest = &after[end + 2..];
                }
                None => {
                    out.push_str("{{");
                    rest = after;
                }
            },
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Writes the resource file to a temp file that is removed when dropped.
pub fn write_rc_file(params: &RenderParams) -> Result<NamedTempFile, RenderError> {
    let mut file = tempfile::Builder::new()
        .prefix("archive-mhonarc")
        .suffix(".rc")
        .tempfile()
        .map_err(RenderError::Config)?;
    file.write_all(render_rc(params).as_bytes())
        .map_err(RenderError::Config)?;
    file.flush().map_err(RenderError::Config)?;
    debug!(path = %file.path().display(), "generated MHonArc rc file");
    Ok(file)
}

/// Turns one month directory of raw mails into HTML.
pub trait Renderer: Send + Sync {
    fn render(&self, source: &Path, target: &Path, rc_path: &Path) -> Result<(), RenderError>;

    fn describe(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct MhonArcRenderer {
    bin: PathBuf,
    timeout_secs: Option<u64>,
}

impl MhonArcRenderer {
    pub fn new(bin: Option<PathBuf>, timeout_secs: Option<u64>) -> Self {
        Self {
            bin: bin.unwrap_or_else(|| PathBuf::from(DEFAULT_MHONARC_BIN)),
            timeout_secs,
        }
    }

    pub fn resolve_bin(&self) -> Result<PathBuf, RenderError> {
        if self.bin.exists() {
            return Ok(self.bin.clone());
        }
        which::which("mhonarc").map_err(|err| {
            RenderError::MissingBinary(format!(
                "{} not found and no mhonarc on PATH: {err}",
                self.bin.display()
            ))
        })
    }
}

impl Renderer for MhonArcRenderer {
    fn render(&self, source: &Path, target: &Path, rc_path: &Path) -> Result<(), RenderError> {
        let bin = self.resolve_bin()?;
        let mut cmd = Command::new(&bin);
        cmd.arg("-rcfile")
            .arg(rc_path)
            .arg("-outdir")
            .arg(target)
            .arg("-add")
            .arg(source);
        debug!(command = ?cmd, "running renderer");

        let output = run_renderer(&mut cmd, self.timeout_secs).map_err(|message| {
            RenderError::Launch {
                source_dir: source.to_path_buf(),
                message,
            }
        })?;

        if output.status.success() {
            return Ok(());
        }
        Err(RenderError::Failed {
            source_dir: source.to_path_buf(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    fn describe(&self) -> String {
        format!("mhonarc ({})", self.bin.display())
    }
}

/// Exit status and captured stderr of one renderer run.
struct RenderRun {
    status: ExitStatus,
    stderr: Vec<u8>,
}

/// Runs the renderer with stdout discarded and stderr drained on its own
/// thread, so a chatty child never blocks on a full pipe.
fn run_renderer(cmd: &mut Command, timeout_secs: Option<u64>) -> Result<RenderRun, String> {
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|err| err.to_string())?;

    let stderr_reader = child.stderr.take().map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    });

    let status = match timeout_secs {
        None => child.wait().map_err(|err| err.to_string())?,
        Some(timeout_secs) => {
            let deadline = Instant::now() + Duration::from_secs(timeout_secs);
            loop {
                if let Some(status) = child.try_wait().map_err(|err| err.to_string())? {
                    break status;
                }
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    // The reader thread ends once every holder of the pipe is gone;
                    // it is not joined here since grandchildren may still hold it.
                    return Err(format!("renderer timed out after {timeout_secs}s"));
                }
                thread::sleep(Duration::from_millis(50));
            }
        }
    };

    let stderr = stderr_reader
        .and_then(|reader| reader.join().ok())
        .unwrap_or_default();
    Ok(RenderRun { status, stderr })
}
