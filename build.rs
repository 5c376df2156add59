use regex::Regex;
use std::collections::BTreeSet;
use std::error::Error;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// Every `MLARCHIVE_*` variable named anywhere in `src/`, so the binary can
/// warn about the ones it will never read.
fn referenced_env_vars(src: &Path) -> Result<BTreeSet<String>, Box<dyn Error>> {
    let name = Regex::new(r"\bMLARCHIVE_[A-Z0-9_]*[A-Z0-9]\b")?;
    let mut found = BTreeSet::new();
    for entry in WalkDir::new(src) {
        let entry = entry?;
        if entry.path().extension().is_none_or(|ext| ext != "rs") {
            continue;
        }
        let text = fs::read_to_string(entry.path())?;
        found.extend(name.find_iter(&text).map(|m| m.as_str().to_owned()));
    }
    Ok(found)
}

fn main() -> Result<(), Box<dyn Error>> {
    let vars = referenced_env_vars(Path::new("src"))?;
    let entries: String = vars.iter().map(|var| format!("    {var:?},\n")).collect();
    let out = Path::new(&std::env::var("OUT_DIR")?).join("mlarchive_env_allowlist.rs");
    fs::write(
        out,
        format!("pub const GENERATED_MLARCHIVE_ENV_ALLOWLIST: &[&str] = &[\n{entries}];\n"),
    )?;

    println!("cargo:rerun-if-changed=src");
    Ok(())
}
