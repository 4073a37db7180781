//! Integration tests for the `cccopy` binary: exit codes and basic flows.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command as StdCommand;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// The test process's own group name.
fn own_group() -> String {
    let output = StdCommand::new("id").arg("-gn").output().expect("id -gn");
    String::from_utf8(output.stdout).expect("group name").trim().to_string()
}

struct CliProject {
    tmp: TempDir,
    template: PathBuf,
}

impl CliProject {
    fn new() -> Self {
        let tmp = TempDir::new().expect("tempdir");
        let prod = tmp.path().join("prod");
        let work = tmp.path().join("work");
        fs::create_dir_all(&prod).unwrap();
        fs::create_dir_all(&work).unwrap();

        let template = tmp.path().join("project.ini");
        fs::write(
            &template,
            format!(
                "[CONFIG]\n\
                 PRODUCTION_DIR = {}\n\
                 WORKING_DIR = {}\n\
                 PROJECT_ID = 9\n\
                 \n\
                 [SOURCES]\n\
                 1 = **\n\
                 \n\
                 [UPLOAD]\n\
                 GROUP = {}\n",
                prod.display(),
                work.display(),
                own_group()
            ),
        )
        .unwrap();
        Self { tmp, template }
    }

    fn prod(&self) -> PathBuf {
        self.tmp.path().join("prod")
    }

    fn work(&self) -> PathBuf {
        self.tmp.path().join("work")
    }

    fn cccopy(&self) -> Command {
        let mut cmd = Command::cargo_bin("cccopy").expect("binary");
        cmd.arg("--config").arg(&self.template);
        cmd
    }
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[test]
fn missing_configuration_exits_5() {
    Command::cargo_bin("cccopy")
        .expect("binary")
        .arg("download")
        .assert()
        .code(5)
        .stderr(predicate::str::contains("error"));
}

#[test]
fn broken_template_exits_5() {
    let tmp = TempDir::new().unwrap();
    let template = tmp.path().join("broken.ini");
    fs::write(&template, "[CONFIG]\nPRODUCTION_DIR = /p\n").unwrap();

    Command::cargo_bin("cccopy")
        .expect("binary")
        .arg("--config")
        .arg(&template)
        .arg("download")
        .assert()
        .code(5);
}

#[test]
fn download_then_status_reports_same() {
    let project = CliProject::new();
    write(&project.prod(), "src/a.txt", "A");

    project
        .cccopy()
        .arg("download")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("src/a.txt")
                .and(predicate::str::contains("download: 1 file(s)")),
        );

    project
        .cccopy()
        .args(["status", "src"])
        .assert()
        .success()
        .stdout(predicate::str::contains("src/a.txt").and(predicate::str::contains("same")));
}

#[test]
fn held_lock_exits_2() {
    let project = CliProject::new();
    write(&project.prod(), "src/a.txt", "A");

    // A fresh foreign lock: live owner, current timestamp.
    let lock_dir = project.prod().join(".cccopy/lock/production.lockdir");
    fs::create_dir_all(&lock_dir).unwrap();
    let now = chrono::Utc::now().timestamp_millis();
    fs::write(lock_dir.join("owner"), format!("peerhost:4242:{now}:peer\n")).unwrap();

    project
        .cccopy()
        .args(["--lock-timeout", "1", "download"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("timed out"));
}

#[test]
fn save_and_upload_round_trip() {
    let project = CliProject::new();
    write(&project.prod(), "src/a.txt", "A");
    project.cccopy().arg("download").assert().success();

    write(&project.work(), "src/a.txt", "A'");
    project
        .cccopy()
        .args(["save", "-m", "checkpoint"])
        .assert()
        .success();
    project
        .cccopy()
        .args(["upload", "-m", "ship it"])
        .assert()
        .success()
        .stdout(predicate::str::contains("upload: 1 file(s)"));

    assert_eq!(
        fs::read_to_string(project.prod().join("src/a.txt")).unwrap(),
        "A'"
    );
}

#[test]
fn history_shows_production_commits() {
    let project = CliProject::new();
    write(&project.prod(), "src/a.txt", "A");
    project.cccopy().arg("download").assert().success();
    write(&project.work(), "src/a.txt", "A'");
    project
        .cccopy()
        .args(["upload", "-m", "ship it"])
        .assert()
        .success();

    project
        .cccopy()
        .args(["history", "src/a.txt", "--production"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ship it"));
}

#[test]
fn show_prints_blob_at_revision() {
    let project = CliProject::new();
    write(&project.prod(), "src/a.txt", "A");
    project.cccopy().arg("download").assert().success();

    project
        .cccopy()
        .args(["show", "src/a.txt", "--production"])
        .assert()
        .success()
        .stdout(predicate::str::contains("A"));
}
