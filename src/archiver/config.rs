use crate::archiver::render::RenderParams;
use crate::archiver::watcher::WatchOptions;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

include!(concat!(env!("OUT_DIR"), "/mlarchive_env_allowlist.rs"));

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSection {
    pub target_dir: PathBuf,
    pub lists: Vec<PathBuf>,
    pub sorted_dir: Option<PathBuf>,
}

impl Default for ArchiveSection {
    fn default() -> Self {
        Self {
            target_dir: PathBuf::from("output"),
            lists: Vec::new(),
            sorted_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RenderSection {
    #[serde(flatten)]
    pub params: RenderParams,
    pub mhonarc_bin: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchSection {
    pub grace_millis: u64,
    pub queue_capacity: usize,
}

impl Default for WatchSection {
    fn default() -> Self {
        let defaults = WatchOptions::default();
        Self {
            grace_millis: defaults.grace.as_millis() as u64,
            queue_capacity: defaults.queue_capacity,
        }
    }
}

impl WatchSection {
    pub fn options(&self) -> WatchOptions {
        WatchOptions {
            grace: Duration::from_millis(self.grace_millis),
            queue_capacity: self.queue_capacity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ArchiverConfig {
    pub archive: ArchiveSection,
    pub render: RenderSection,
    pub watch: WatchSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialArchiverConfig {
    archive: Option<ArchiveSection>,
    render: Option<RenderSection>,
    watch: Option<WatchSection>,
}

fn env_value(var: &str) -> Option<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env_value(var) {
        Some(v) => v.parse::<u64>().ok().unwrap_or(fallback),
        None => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env_value(var).as_deref() {
        Some("1" | "true" | "TRUE" | "yes" | "on") => true,
        Some("0" | "false" | "FALSE" | "no" | "off") => false,
        _ => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    env_value(var).unwrap_or_else(|| fallback.to_string())
}

fn env_csv_paths(var: &str) -> Option<Vec<PathBuf>> {
    let raw = env_value(var)?;
    let out = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect::<Vec<_>>();
    if out.is_empty() { None } else { Some(out) }
}

fn validate(cfg: &ArchiverConfig) -> Result<()> {
    if cfg.archive.target_dir.as_os_str().is_empty() {
        return Err(anyhow!("invalid target dir: cannot be empty"));
    }
    if cfg.render.params.tlevels == 0 {
        return Err(anyhow!("invalid thread levels: must be >= 1"));
    }
    if cfg.watch.queue_capacity == 0 {
        return Err(anyhow!("invalid watch queue capacity: must be >= 1"));
    }
    if cfg.render.timeout_secs == Some(0) {
        return Err(anyhow!("invalid render timeout: must be >= 1 second"));
    }
    Ok(())
}

fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(custom) = env_value("MLARCHIVE_CONFIG_PATH") {
        return Some(PathBuf::from(custom));
    }
    let base = dirs::config_dir()?;
    Some(base.join("mlarchive").join("config.toml"))
}

fn merge_file_config(base: &mut ArchiverConfig, explicit: Option<&Path>) -> Result<()> {
    let Some(path) = resolve_config_path(explicit) else {
        return Ok(());
    };
    if !path.exists() {
        if explicit.is_some() {
            return Err(anyhow!("config file {} does not exist", path.display()));
        }
        return Ok(());
    }

    let raw = fs::read_to_string(&path)
        .map_err(|err| anyhow!("failed to read config {}: {err}", path.display()))?;
    let parsed: PartialArchiverConfig = toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse config {}: {err}", path.display()))?;
    debug!(path = %path.display(), "loaded config file");
    if let Some(archive) = parsed.archive {
        base.archive = archive;
    }
    if let Some(render) = parsed.render {
        base.render = render;
    }
    if let Some(watch) = parsed.watch {
        base.watch = watch;
    }
    Ok(())
}

fn merge_env(cfg: &mut ArchiverConfig) {
    if let Some(target) = env_value("MLARCHIVE_TARGET_DIR") {
        cfg.archive.target_dir = PathBuf::from(target);
    }
    if let Some(lists) = env_csv_paths("MLARCHIVE_LISTS") {
        cfg.archive.lists = lists;
    }
    if let Some(sorted) = env_value("MLARCHIVE_SORTED_DIR") {
        cfg.archive.sorted_dir = Some(PathBuf::from(sorted));
    }

    let params = &mut cfg.render.params;
    params.header = env_or_string("MLARCHIVE_HEADER", &params.header);
    params.tlevels = env_or_u64("MLARCHIVE_TLEVELS", u64::from(params.tlevels))
        .try_into()
        .unwrap_or(params.tlevels);
    params.archive_admin = env_or_string("MLARCHIVE_ARCHIVE_ADMIN", &params.archive_admin);
    params.check_no_archive = env_or_bool("MLARCHIVE_CHECK_NO_ARCHIVE", params.check_no_archive);
    params.search_target = env_or_string("MLARCHIVE_SEARCH_TARGET", &params.search_target);
    params.style_file = env_or_string("MLARCHIVE_STYLE_FILE", &params.style_file);

    if let Some(bin) = env_value("MLARCHIVE_MHONARC_BIN") {
        cfg.render.mhonarc_bin = Some(PathBuf::from(bin));
    }
    if let Some(timeout) = env_value("MLARCHIVE_RENDER_TIMEOUT_SECS") {
        cfg.render.timeout_secs = timeout.parse().ok().or(cfg.render.timeout_secs);
    }

    cfg.watch.grace_millis = env_or_u64("MLARCHIVE_WATCH_GRACE_MILLIS", cfg.watch.grace_millis);
    cfg.watch.queue_capacity = env_or_u64(
        "MLARCHIVE_WATCH_QUEUE_CAPACITY",
        cfg.watch.queue_capacity as u64,
    ) as usize;
}

/// `MLARCHIVE_*` variables the binary never reads are most likely typos.
fn warn_unknown_env() {
    for (key, _) in env::vars() {
        if key.starts_with("MLARCHIVE_") && !GENERATED_MLARCHIVE_ENV_ALLOWLIST.contains(&key.as_str())
        {
            warn!(var = %key, "unknown MLARCHIVE_ environment variable ignored");
        }
    }
}

/// Defaults, then the TOML file, then `MLARCHIVE_*` environment variables.
pub fn load_config(explicit: Option<&Path>) -> Result<ArchiverConfig> {
    let mut cfg = ArchiverConfig::default();
    merge_file_config(&mut cfg, explicit)?;
    merge_env(&mut cfg);
    warn_unknown_env();
    validate(&cfg)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_sections_override_defaults() {
        let raw = r#"
[archive]
target_dir = "/srv/www/archive"
lists = ["/var/spool/mlmmj/dev", "/var/spool/mlmmj/users"]
sorted_dir = "/var/lib/mlarchive/sorted"

[render]
header = "<p>Our lists</p>"
tlevels = 4
check_no_archive = false
mhonarc_bin = "/opt/mhonarc/bin/mhonarc"
"#;
        let parsed: PartialArchiverConfig = toml::from_str(raw).expect("parse");
        let archive = parsed.archive.expect("archive");
        assert_eq!(archive.lists.len(), 2);
        assert_eq!(
            archive.sorted_dir,
            Some(PathBuf::from("/var/lib/mlarchive/sorted"))
        );

        let render = parsed.render.expect("render");
        assert_eq!(render.params.header, "<p>Our lists</p>");
        assert_eq!(render.params.tlevels, 4);
        assert!(!render.params.check_no_archive);
        assert_eq!(render.params.style_file, "/archive.css");
        assert_eq!(
            render.mhonarc_bin,
            Some(PathBuf::from("/opt/mhonarc/bin/mhonarc"))
        );
        assert!(parsed.watch.is_none());
    }

    #[test]
    fn defaults_validate() {
        let cfg = ArchiverConfig::default();
        assert!(validate(&cfg).is_ok());
        assert_eq!(cfg.render.params.tlevels, 8);
        assert_eq!(cfg.watch.grace_millis, 2000);
    }

    #[test]
    fn zero_thread_levels_are_rejected() {
        let mut cfg = ArchiverConfig::default();
        cfg.render.params.tlevels = 0;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn allowlist_knows_the_config_variables() {
        for key in ["MLARCHIVE_TARGET_DIR", "MLARCHIVE_LISTS", "MLARCHIVE_TLEVELS"] {
            assert!(GENERATED_MLARCHIVE_ENV_ALLOWLIST.contains(&key), "{key}");
        }
    }
}
