use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{TempDir, tempdir};

fn write_fake_mhonarc(bin_path: &Path, exit_code: i32) {
    let script = format!(
        r#"#!/usr/bin/env bash
set -euo pipefail

rc="" outdir="" source=""
while [[ $# -gt 0 ]]; do
  case "$1" in
    -rcfile) rc="$2"; shift 2 ;;
    -outdir) outdir="$2"; shift 2 ;;
    -add) source="$2"; shift 2 ;;
    *) shift ;;
  esac
done

if [[ -n "${{FAKE_MHONARC_LOG:-}}" ]]; then
  printf "%s %s %s\n" "$source" "$outdir" "$(grep -c CHECKNOARCHIVE "$rc")" >> "$FAKE_MHONARC_LOG"
fi

n=0
for msg in "$source"/*; do
  cat "$msg" > "$outdir/$(printf '%05d' "$n").html"
  n=$((n + 1))
done
exit {exit_code}
"#
    );
    write_script(bin_path, &script);
}

fn write_script(bin_path: &Path, script: &str) {
    fs::write(bin_path, script).expect("write fake mhonarc");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(bin_path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(bin_path, perms).expect("chmod");
    }
}

struct Setup {
    tmp: TempDir,
    list_root: PathBuf,
    mhonarc: PathBuf,
}

impl Setup {
    fn new(render_exit: i32) -> Self {
        let tmp = tempdir().expect("tempdir");
        let list_root = tmp.path().join("spool/dev");
        fs::create_dir_all(list_root.join("archive")).expect("mkdir archive");
        fs::create_dir_all(list_root.join("control")).expect("mkdir control");
        fs::write(list_root.join("control/webarchive"), "").expect("marker");

        let mhonarc = tmp.path().join("mhonarc");
        write_fake_mhonarc(&mhonarc, render_exit);
        Self {
            tmp,
            list_root,
            mhonarc,
        }
    }

    fn deliver(&self, name: &str, date: &str, body: &str) {
        let raw = format!(
            "From: dev@example.org\r\nTo: dev@lists.example.org\r\nSubject: msg {name}\r\nDate: {date}\r\n\r\n{body}\r\n"
        );
        fs::write(self.list_root.join("archive").join(name), raw).expect("deliver");
    }

    fn render_log(&self) -> PathBuf {
        self.tmp.path().join("render.log")
    }

    fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("mlarchive");
        cmd.current_dir(self.tmp.path())
            .env("MLARCHIVE_HOME", self.tmp.path())
            .env("MLARCHIVE_CONFIG_PATH", self.tmp.path().join("absent.toml"))
            .env("MLARCHIVE_MHONARC_BIN", &self.mhonarc)
            .env("FAKE_MHONARC_LOG", self.render_log())
            .arg("--list")
            .arg(&self.list_root)
            .arg("--target")
            .arg(self.tmp.path().join("www"))
            .arg("--sorted-dir")
            .arg(self.tmp.path().join("sorted"));
        cmd
    }

    fn three_messages(&self) {
        self.deliver("1", "Sat, 05 Jan 2013 10:00:00 +0000", "first january note");
        self.deliver("2", "Sun, 20 Jan 2013 10:00:00 +0000", "kernel segfault report");
        self.deliver("3", "Fri, 01 Feb 2013 10:00:00 +0000", "february wrap-up");
    }
}

#[test]
fn archive_sorts_and_renders_each_month_once() {
    let setup = Setup::new(0);
    setup.three_messages();

    setup
        .cmd()
        .arg("archive")
        .assert()
        .success()
        .stdout(predicate::str::contains("buckets_rendered=2"));

    let sorted = setup.tmp.path().join("sorted/dev");
    assert!(sorted.join("2013/1/1").is_file());
    assert!(sorted.join("2013/1/2").is_file());
    assert!(sorted.join("2013/2/3").is_file());

    let log = fs::read_to_string(setup.render_log()).expect("render log");
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 2, "one renderer run per bucket: {log}");
    assert!(lines[0].contains("sorted/dev/2013/1 "));
    assert!(lines[0].contains("www/dev/2013/01"));
    assert!(lines[1].contains("sorted/dev/2013/2 "));
    assert!(lines[1].contains("www/dev/2013/02"));

    let www = setup.tmp.path().join("www/dev");
    assert!(www.join("2013/01/00000.html").is_file());
    assert!(www.join("2013/02/00000.html").is_file());
}

#[test]
fn second_preprocess_finds_everything_already_sorted() {
    let setup = Setup::new(0);
    setup.three_messages();

    setup
        .cmd()
        .arg("preprocess")
        .assert()
        .success()
        .stdout(predicate::str::contains("copied=3"));

    setup
        .cmd()
        .arg("preprocess")
        .assert()
        .success()
        .stdout(predicate::str::contains("copied=0 already_present=3"));
}

#[test]
fn unparseable_message_fails_the_run_but_sorts_the_rest() {
    let setup = Setup::new(0);
    setup.three_messages();
    fs::write(
        setup.list_root.join("archive/4"),
        "Subject: no date here\r\n\r\nbody\r\n",
    )
    .expect("write broken");

    setup
        .cmd()
        .arg("preprocess")
        .assert()
        .failure()
        .stdout(predicate::str::contains("copied=3"))
        .stderr(predicate::str::contains("unparseable message"));
}

#[test]
fn renderer_failure_is_reported_with_nonzero_exit() {
    let setup = Setup::new(3);
    setup.three_messages();

    setup
        .cmd()
        .arg("archive")
        .assert()
        .failure()
        .stderr(predicate::str::contains("issue:"));

    let log = fs::read_to_string(setup.render_log()).expect("render log");
    assert_eq!(log.lines().count(), 2, "a failing bucket does not stop the run");
}

#[test]
fn search_lists_matching_pages_after_archive() {
    let setup = Setup::new(0);
    setup.three_messages();
    setup.cmd().arg("archive").assert().success();

    setup
        .cmd()
        .args(["search", "dev", "SEGFAULT"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2013/01/00001.html"))
        .stdout(predicate::str::contains("2013/02").not());

    setup
        .cmd()
        .args(["search", "dev", "--regex", "(january|february) "])
        .assert()
        .success()
        .stdout(predicate::str::contains("2013/01/00000.html"))
        .stdout(predicate::str::contains("2013/02/00000.html"));

    setup
        .cmd()
        .args(["search", "nope", "x"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no registered mailing list named `nope`"));
}

#[test]
fn list_without_marker_is_left_alone() {
    let setup = Setup::new(0);
    setup.three_messages();
    fs::remove_file(setup.list_root.join("control/webarchive")).expect("rm marker");

    setup
        .cmd()
        .arg("archive")
        .assert()
        .success()
        .stdout(predicate::str::contains("list=dev skipped"));

    assert!(!setup.tmp.path().join("sorted/dev").exists());
    assert!(!setup.render_log().exists());
}

#[test]
fn rcfile_reflects_render_settings() {
    let setup = Setup::new(0);
    setup
        .cmd()
        .env("MLARCHIVE_ARCHIVE_ADMIN", "lists@example.net")
        .env("MLARCHIVE_CHECK_NO_ARCHIVE", "false")
        .arg("rcfile")
        .assert()
        .success()
        .stdout(predicate::str::contains("lists@example.net"))
        .stdout(predicate::str::contains("<NOCHECKNOARCHIVE>"))
        .stdout(predicate::str::contains("{{").not());
}

#[test]
fn status_reports_lists_as_json() {
    let setup = Setup::new(0);
    let assert = setup.cmd().args(["--json", "status"]).assert().success();
    let report: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("json report");
    assert_eq!(report["command"], "status");
    assert_eq!(report["ok"], true);
    let details = report["details"].as_array().expect("details");
    assert!(details.iter().any(|d| d == "render tlevels=8 check_no_archive=true archive_admin=postmaster@example.org"));
    assert!(
        details
            .iter()
            .any(|d| d.as_str().is_some_and(|s| s.contains("list=dev") && s.contains("archive_requested=true")))
    );
}

#[test]
fn stop_without_running_watcher_is_a_noop() {
    let setup = Setup::new(0);
    setup
        .cmd()
        .arg("stop")
        .assert()
        .success()
        .stdout(predicate::str::contains("watcher already stopped"));
}

#[test]
fn watch_requires_a_persistent_sorted_dir() {
    let setup = Setup::new(0);
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("mlarchive");
    cmd.current_dir(setup.tmp.path())
        .env("MLARCHIVE_HOME", setup.tmp.path())
        .env("MLARCHIVE_CONFIG_PATH", setup.tmp.path().join("absent.toml"))
        .env_remove("MLARCHIVE_SORTED_DIR")
        .arg("--list")
        .arg(&setup.list_root)
        .arg("--target")
        .arg(setup.tmp.path().join("www"))
        .arg("watch")
        .assert()
        .failure()
        .stderr(predicate::str::contains("persistent sorted dir"));
}

#[test]
fn repeated_interrupts_still_clean_up_temporary_files() {
    let setup = Setup::new(0);
    setup.three_messages();
    let interrupting = setup.tmp.path().join("mhonarc-interrupt");
    write_script(
        &interrupting,
        "#!/usr/bin/env bash\nkill -INT \"$PPID\"\nkill -INT \"$PPID\"\nsleep 0.2\nexit 0\n",
    );
    let scratch = setup.tmp.path().join("scratch");
    fs::create_dir_all(&scratch).expect("mkdir scratch");

    let output = assert_cmd::cargo::cargo_bin_cmd!("mlarchive")
        .current_dir(setup.tmp.path())
        .env("TMPDIR", &scratch)
        .env("MLARCHIVE_HOME", setup.tmp.path())
        .env("MLARCHIVE_CONFIG_PATH", setup.tmp.path().join("absent.toml"))
        .env("MLARCHIVE_MHONARC_BIN", &interrupting)
        .arg("--list")
        .arg(&setup.list_root)
        .arg("--target")
        .arg(setup.tmp.path().join("www"))
        .arg("archive")
        .output()
        .expect("run mlarchive");

    assert_ne!(output.status.code(), Some(130), "exited without cleanup");
    let leftovers: Vec<_> = fs::read_dir(&scratch)
        .expect("read scratch")
        .filter_map(|e| e.ok())
        .map(|e| e.file_name())
        .collect();
    assert!(leftovers.is_empty(), "temporary files left behind: {leftovers:?}");
}

#[test]
fn skip_preprocess_still_reports_unmarked_lists() {
    let setup = Setup::new(0);
    fs::remove_file(setup.list_root.join("control/webarchive")).expect("rm marker");

    setup
        .cmd()
        .args(["archive", "--skip-preprocess"])
        .assert()
        .success()
        .stdout(predicate::str::contains("preprocess skipped"))
        .stdout(predicate::str::contains("list=dev skipped (no control/webarchive)"))
        .stdout(predicate::str::contains("buckets_rendered=0"));
}
