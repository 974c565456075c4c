#![cfg(unix)]

mod support;

use predicates::prelude::*;
use std::fs;
use support::Fixture;
use tempfile::tempdir;

#[test]
fn status_flags_unknown_env_keys() {
    let tmp = tempdir().expect("tempdir");
    let fx = Fixture::new(tmp.path());

    fx.cmd()
        .env("COLDVAULT_RETENTON_DAYS", "30")
        .arg("status")
        .assert()
        .code(2)
        .stdout(predicate::str::contains(
            "unknown environment variable COLDVAULT_RETENTON_DAYS",
        ))
        .stdout(predicate::str::contains("bucket=lake"));
}

#[test]
fn status_reads_toml_config() {
    let tmp = tempdir().expect("tempdir");
    let fx = Fixture::new(tmp.path());
    fs::write(
        fx.home.join("coldvault.toml"),
        "[retention]\nretention_days = 45\n\n[run]\nmax_workers = 3\n",
    )
    .expect("config");

    fx.cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("retention_days=45"))
        .stdout(predicate::str::contains("max_workers=3"));
}

#[test]
fn ledger_command_summarizes_then_clears() {
    let tmp = tempdir().expect("tempdir");
    let fx = Fixture::new(tmp.path());
    fx.seed_scenario();

    fx.cmd()
        .args(["run", "--company", "acme", "--as-of", "2024-09-01"])
        .assert()
        .success();

    fx.cmd()
        .args(["ledger", "--company", "acme"])
        .assert()
        .success()
        .stdout(predicate::str::contains("entries=6"))
        .stdout(predicate::str::contains("outcome.ALL=3"))
        .stdout(predicate::str::contains("outcome.IGNORED_RULE_1=1"));

    fx.cmd()
        .args(["ledger", "--company", "acme", "--clear"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cleared=true"));
    assert!(!fx.ledger("acme.ledger").exists());
}

#[test]
fn restore_generates_toc_and_extracts() {
    let tmp = tempdir().expect("tempdir");
    let fx = Fixture::new(tmp.path());

    fx.cmd()
        .args([
            "restore",
            "--archive",
            "archive/raw/acme/Invoice/year=2024/month=05/day=02.tar",
            "--dest",
            "restored/acme/",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("extracted=true"));

    let calls = fx.s3tar_calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].contains("--generate-toc"));
    assert!(calls[1].starts_with("-x"));
    assert!(calls[1].contains("s3://lake/restored/acme/"));
}

#[test]
fn malformed_ledger_lines_are_skipped_not_fatal() {
    let tmp = tempdir().expect("tempdir");
    let fx = Fixture::new(tmp.path());
    fx.seed_scenario();
    fs::create_dir_all(fx.home.join("ledgers")).expect("mkdir");
    // torn tail from an interrupted append
    fs::write(fx.ledger("acme.ledger"), "acme:Invoice:2024:05:02\nacme:Invo").expect("seed");

    fx.cmd()
        .args(["run", "--company", "acme", "--as-of", "2024-09-01"])
        .assert()
        .success()
        .stderr(predicate::str::contains("LEDGER_LINE_MALFORMED"))
        .stdout(predicate::str::contains("archived=1"));

    let lines = fx.ledger_lines("acme.ledger");
    assert!(lines.contains(&"acme:Invoice:ALL".to_string()));
}
