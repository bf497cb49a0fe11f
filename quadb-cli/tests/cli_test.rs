use std::fs;

mod common;

use common::{run_cli, stdout, write_log};

#[test]
fn test_cli_help() {
    let output = run_cli().arg("--help").output().unwrap();
    assert!(output.status.success());
    let help = stdout(&output);
    for command in ["compact", "clone", "backup", "replay", "stats"] {
        assert!(help.contains(command), "{command} missing from:\n{help}");
    }
}

#[test]
fn test_replay_then_stats() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("changes.log");
    let db = dir.path().join("db");
    write_log(&log, 10, 1);

    let output = run_cli().arg("replay").arg(&log).arg(&db).output().unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("added 10, deleted 1, skipped 0"));

    let output = run_cli().arg("stats").arg(&db).output().unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("quads: 9"));
}

#[test]
fn test_clone_into_empty_directory_only() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("changes.log");
    let db = dir.path().join("db");
    write_log(&log, 5, 0);
    assert!(run_cli().arg("replay").arg(&log).arg(&db).status().unwrap().success());

    // 1. A structural clone into a fresh directory
    let copy = dir.path().join("copy");
    let output = run_cli()
        .arg("clone")
        .arg(&db)
        .arg(&copy)
        .arg("--structural")
        .output()
        .unwrap();
    assert!(output.status.success());
    let output = run_cli().arg("stats").arg(&copy).output().unwrap();
    assert!(stdout(&output).contains("quads: 5"));

    // 2. A directory with content is refused
    let occupied = dir.path().join("occupied");
    fs::create_dir_all(&occupied).unwrap();
    fs::write(occupied.join("keep.txt"), b"keep").unwrap();
    let output = run_cli().arg("clone").arg(&db).arg(&occupied).output().unwrap();
    assert!(!output.status.success());
    assert_eq!(fs::read_dir(&occupied).unwrap().count(), 1);
}

#[test]
fn test_container_backup_and_compact() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("changes.log");
    let container = dir.path().join("container");
    write_log(&log, 20, 5);
    let first = container.join("Data-0001");
    assert!(run_cli().arg("replay").arg(&log).arg(&first).status().unwrap().success());

    let output = run_cli().arg("backup").arg(&container).output().unwrap();
    assert!(output.status.success());
    assert_eq!(fs::read_dir(container.join("Backups")).unwrap().count(), 1);

    let output = run_cli()
        .arg("compact")
        .arg(&container)
        .arg("--catch-up")
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(container.join("Data-0002").exists());
    assert!(first.exists());

    let output = run_cli().arg("stats").arg(&container).output().unwrap();
    let stats = stdout(&output);
    assert!(stats.contains("Data-0002"), "{stats}");
    assert!(stats.contains("quads: 15"), "{stats}");
}

#[test]
fn test_replay_rejects_truncated_log() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("changes.log");
    write_log(&log, 3, 0);
    let bytes = fs::read(&log).unwrap();
    fs::write(&log, &bytes[..bytes.len() - 1]).unwrap();

    let db = dir.path().join("db");
    let output = run_cli().arg("replay").arg(&log).arg(&db).output().unwrap();
    assert!(!output.status.success());

    let output = run_cli().arg("stats").arg(&db).output().unwrap();
    assert!(stdout(&output).contains("quads: 0"));
}

#[test]
fn test_missing_source_is_not_created() {
    let dir = tempfile::tempdir().unwrap();
    let typo = dir.path().join("typo");
    let out = dir.path().join("out");

    let output = run_cli().arg("clone").arg(&typo).arg(&out).output().unwrap();
    assert!(!output.status.success());
    assert!(!typo.exists());
    assert!(!out.exists());

    for command in ["stats", "backup", "compact"] {
        let output = run_cli().arg(command).arg(&typo).output().unwrap();
        assert!(!output.status.success(), "{command} succeeded");
        assert!(!typo.exists(), "{command} created {}", typo.display());
    }
}
