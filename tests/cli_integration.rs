//! CLI integration tests for dcmview
//!
//! The external tools are replaced by shell scripts: the dump tool prints
//! the "DICOM" file itself (fixtures are XML dumps), the image tool writes
//! a stub PNG and the video tools write a stub MP4.

#![cfg(unix)]

use predicates::prelude::*;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Get a command instance for the dcmview binary
fn dcmview_cmd() -> assert_cmd::Command {
    assert_cmd::Command::new(assert_cmd::cargo::cargo_bin!("dcmview"))
}

const DICOMDIR: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<file-format>
<meta-header xfer="1.2.840.10008.1.2.1" name="Little Endian Explicit">
<element tag="0002,0003" vr="UI" vm="1" len="8" name="MediaStorageSOPInstanceUID">1.2.3.4</element>
</meta-header>
<data-set xfer="1.2.840.10008.1.2.1" name="Little Endian Explicit">
<element tag="0004,1130" vr="CS" vm="1" len="8" name="FileSetID">STUDY_01</element>
<sequence tag="0004,1220" vr="SQ" card="3" len="300" name="DirectoryRecordSequence">
<item card="2" len="100">
<element tag="0004,1430" vr="CS" vm="1" len="8" name="DirectoryRecordType">PATIENT</element>
<element tag="0010,0010" vr="PN" vm="1" len="8" name="PatientName">Doe^John</element>
</item>
<item card="3" len="100">
<element tag="0004,1430" vr="CS" vm="1" len="6" name="DirectoryRecordType">IMAGE</element>
<element tag="0004,1500" vr="CS" vm="2" len="10" name="ReferencedFileID">DIR\IMG1</element>
<element tag="0020,0013" vr="IS" vm="1" len="2" name="InstanceNumber">1</element>
</item>
<item card="2" len="100">
<element tag="0004,1430" vr="CS" vm="1" len="6" name="DirectoryRecordType">IMAGE</element>
<element tag="0004,1500" vr="CS" vm="2" len="10" name="ReferencedFileID">DIR\IMG2</element>
</item>
</sequence>
</data-set>
</file-format>
"#;

const CINE: &str = r#"<file-format><data-set>
<element name="Rows">64</element>
<element name="Columns">64</element>
<element name="NumberOfFrames">10</element>
<element name="RecommendedDisplayFrameRate">12</element>
</data-set></file-format>"#;

struct Fixture {
    dir: TempDir,
    config: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        Self::with_image_tool(r#"echo png > "$last""#)
    }

    fn with_image_tool(image_body: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("bin");
        fs::create_dir(&bin).unwrap();

        let dump = script(
            &bin,
            "dump",
            r#"case "$last" in *broken*) echo "cannot read" >&2; exit 1;; esac; cat "$last""#,
        );
        let image = script(&bin, "image", image_body);
        let frames = script(&bin, "frames", "echo frames");
        let encoder = script(&bin, "encoder", r#"cat > /dev/null; echo mp4 > "$last""#);
        let player = script(&bin, "player", "exit 0");

        let config = dir.path().join("config.toml");
        fs::write(
            &config,
            format!(
                r#"[conversion]
jobs = 2
timeout_secs = 10

[cache]
dir = "{cache}"

[tools]
dump = "{dump}"
image = "{image}"
frames = "{frames}"
encoder = "{encoder}"

[player]
command = "{player}"
"#,
                cache = dir.path().join("cache").display(),
                dump = dump.display(),
                image = image.display(),
                frames = frames.display(),
                encoder = encoder.display(),
                player = player.display(),
            ),
        )
        .unwrap();

        Self { dir, config }
    }

    fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = dcmview_cmd();
        cmd.arg("--config").arg(&self.config);
        cmd
    }

    fn file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    fn cache_files(&self) -> Vec<String> {
        match fs::read_dir(self.dir.path().join("cache")) {
            Ok(entries) => entries
                .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(
        &path,
        format!("#!/bin/sh\nfor last; do :; done\n{body}\n"),
    )
    .unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

// =============================================================================
// Show
// =============================================================================

#[test]
fn test_show_directory_converts_thumbnails() {
    let fx = Fixture::new();
    let dicomdir = fx.file("media/DICOMDIR", DICOMDIR);

    fx.cmd()
        .arg("show")
        .arg(&dicomdir)
        .assert()
        .success()
        .stdout(predicate::str::contains("# Patient: Doe^John"))
        .stdout(predicate::str::contains("#### Image: 1"))
        .stdout(predicate::str::contains("FileSetID"))
        .stdout(predicate::str::contains("MediaStorageSOPInstanceUID").not())
        .stdout(predicate::str::contains("2 image(s) ready, 0 pending"));

    let files = fx.cache_files();
    assert_eq!(files.len(), 2);
    assert!(files.iter().all(|name| name.ends_with(".png") && !name.contains(".tmp.")));
}

#[test]
fn test_show_no_wait_prints_placeholders() {
    let fx = Fixture::with_image_tool(r#"sleep 5; echo png > "$last""#);
    let dicomdir = fx.file("media/DICOMDIR", DICOMDIR);

    fx.cmd()
        .args(["show", "--no-wait"])
        .arg(&dicomdir)
        .assert()
        .success()
        .stdout(predicate::str::contains("[thumbnail pending: 128x128]"))
        .stdout(predicate::str::contains("0 image(s) ready, 2 pending"));

    // Cancelled conversions leave nothing behind
    assert!(fx.cache_files().is_empty());
}

#[test]
fn test_show_json() {
    let fx = Fixture::new();
    let dicomdir = fx.file("media/DICOMDIR", DICOMDIR);

    let output = fx
        .cmd()
        .args(["--format", "json", "show"])
        .arg(&dicomdir)
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["ready"], 2);
    assert_eq!(json["pending"], 0);
    assert_eq!(json["document"]["slots"].as_array().unwrap().len(), 2);
    assert_eq!(json["document"]["slots"][0]["kind"], "thumbnail");
    assert_eq!(json["document"]["slots"][0]["state"]["state"], "ready");
}

#[test]
fn test_show_failed_conversion_keeps_placeholder() {
    let fx = Fixture::with_image_tool(r#"echo partial > "$last"; exit 1"#);
    let dicomdir = fx.file("media/DICOMDIR", DICOMDIR);

    fx.cmd()
        .arg("show")
        .arg(&dicomdir)
        .assert()
        .success()
        .stdout(predicate::str::contains("0 image(s) ready, 2 pending"));

    assert!(fx.cache_files().is_empty());
}

#[test]
fn test_show_dump_failure() {
    let fx = Fixture::new();
    let broken = fx.file("broken.dcm", "");

    fx.cmd()
        .arg("show")
        .arg(&broken)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read attributes"))
        .stderr(predicate::str::contains("cannot read"));
}

#[test]
fn test_show_single_image() {
    let fx = Fixture::new();
    let cine = fx.file("cine.dcm", CINE);

    fx.cmd()
        .arg("show")
        .arg(&cine)
        .assert()
        .success()
        .stdout(predicate::str::contains("[image: "))
        .stdout(predicate::str::contains("(10 frames; playback available)"))
        .stdout(predicate::str::contains("1 image(s) ready, 0 pending"));
}

// =============================================================================
// Tree
// =============================================================================

#[test]
fn test_tree_prints_filtered_attributes() {
    let fx = Fixture::new();
    let dicomdir = fx.file("DICOMDIR", DICOMDIR);

    fx.cmd()
        .arg("tree")
        .arg(&dicomdir)
        .assert()
        .success()
        .stdout(predicate::str::contains("FileSetID: STUDY_01"))
        .stdout(predicate::str::contains("DirectoryRecordSequence:"))
        .stdout(predicate::str::contains("PatientName: Doe^John"))
        .stdout(predicate::str::contains("UID").not());

    // Reading the tree converts nothing
    assert!(fx.cache_files().is_empty());
}

#[test]
fn test_tree_json() {
    let fx = Fixture::new();
    let dicomdir = fx.file("DICOMDIR", DICOMDIR);

    let output = fx
        .cmd()
        .args(["-f", "json", "tree"])
        .arg(&dicomdir)
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["directory"], true);
    assert_eq!(json["records"].as_array().unwrap().len(), 3);
}

#[test]
fn test_tree_needs_only_dump_tool() {
    let fx = Fixture::new();
    let dicomdir = fx.file("DICOMDIR", DICOMDIR);
    let config = fx.dir.path().join("dump-only.toml");
    fs::write(
        &config,
        format!(
            "[tools]\ndump = \"{}\"\nimage = \"dcmview-no-such-image\"\n",
            fx.dir.path().join("bin").join("dump").display()
        ),
    )
    .unwrap();

    dcmview_cmd()
        .arg("--config")
        .arg(&config)
        .arg("tree")
        .arg(&dicomdir)
        .assert()
        .success()
        .stdout(predicate::str::contains("FileSetID: STUDY_01"));
}

// =============================================================================
// Play
// =============================================================================

#[test]
fn test_play_converts_and_starts_player() {
    let fx = Fixture::new();
    let cine = fx.file("cine.dcm", CINE);

    fx.cmd()
        .arg("play")
        .arg(&cine)
        .assert()
        .success()
        .stdout(predicate::str::contains("Player started for cine.dcm"));

    assert!(fx.cache_files().iter().any(|name| name.ends_with(".mp4")));

    // Second run uses the cached preview
    fx.cmd()
        .arg("play")
        .arg(&cine)
        .assert()
        .success()
        .stdout(predicate::str::contains("Player started (pid"));
}

#[test]
fn test_play_single_frame_fails() {
    let fx = Fixture::new();
    let dicomdir = fx.file("DICOMDIR", DICOMDIR);

    fx.cmd()
        .arg("play")
        .arg(&dicomdir)
        .assert()
        .failure()
        .stderr(predicate::str::contains("single frame"));
}

// =============================================================================
// Cache
// =============================================================================

#[test]
fn test_cache_status_and_clear() {
    let fx = Fixture::new();
    let dicomdir = fx.file("media/DICOMDIR", DICOMDIR);
    fx.cmd().arg("show").arg(&dicomdir).assert().success();

    fx.cmd()
        .args(["cache", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Artifacts: 2"));

    fx.cmd()
        .args(["cache", "clear"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 2 cached file(s)"));

    assert!(fx.cache_files().is_empty());
}

// =============================================================================
// Config
// =============================================================================

#[test]
fn test_config_init_refuses_overwrite() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("nested/config.toml");

    dcmview_cmd()
        .arg("--config")
        .arg(&config)
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote default configuration"));

    let content = fs::read_to_string(&config).unwrap();
    assert!(content.contains("timeout_secs = 30"));

    dcmview_cmd()
        .arg("--config")
        .arg(&config)
        .args(["config", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_config_show_applies_overrides() {
    let fx = Fixture::new();

    let output = fx
        .cmd()
        .args(["--format", "json", "--jobs", "3", "--timeout", "0", "config", "show"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["conversion"]["jobs"], 3);
    assert_eq!(json["conversion"]["timeout_secs"], 0);
}

#[test]
fn test_config_path_uses_env() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("custom.toml");

    dcmview_cmd()
        .env("DCMVIEW_CONFIG", &config)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("custom.toml"));
}

#[test]
fn test_invalid_jobs_rejected() {
    let fx = Fixture::new();

    fx.cmd()
        .args(["--jobs", "0", "config", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("conversion.jobs"));
}

#[test]
fn test_missing_tool_fails_setup() {
    let fx = Fixture::new();
    let dicomdir = fx.file("DICOMDIR", DICOMDIR);
    let config = fx.dir.path().join("missing.toml");
    fs::write(&config, "[tools]\ndump = \"dcmview-no-such-dump\"\n").unwrap();

    dcmview_cmd()
        .arg("--config")
        .arg(&config)
        .arg("show")
        .arg(&dicomdir)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Required dump tool not found"));
}
