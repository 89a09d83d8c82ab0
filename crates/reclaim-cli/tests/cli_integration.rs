use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;
use ulid::Ulid;

fn unique_temp_db(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("{prefix}-{}", Ulid::new()));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir.join("reclaim.sqlite3")
}

fn run_rcl<I, S>(db: &Path, args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_rcl"))
        .arg("--db")
        .arg(db)
        .args(args)
        .output()
        .unwrap_or_else(|err| panic!("failed to execute rcl binary: {err}"))
}

fn run_json<I, S>(db: &Path, args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_rcl(db, args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "rcl command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let envelope: Value = serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"));
    assert_eq!(
        envelope.get("cli_contract_version").and_then(Value::as_str),
        Some("cli.v1"),
        "missing contract version in: {envelope}"
    );
    envelope
        .get("data")
        .cloned()
        .unwrap_or_else(|| panic!("missing data field in: {envelope}"))
}

fn as_str<'a>(value: &'a Value, pointer: &str) -> &'a str {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string at `{pointer}` in: {value}"))
}

fn array_len(value: &Value, pointer: &str) -> usize {
    value
        .pointer(pointer)
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or_else(|| panic!("missing array at `{pointer}` in: {value}"))
}

#[test]
fn report_match_claim_lifecycle() {
    let db = unique_temp_db("rcl-lifecycle");

    let status = run_json(&db, ["db", "migrate"]);
    assert_eq!(status.pointer("/current_version").and_then(Value::as_i64), Some(1));
    assert_eq!(array_len(&status, "/pending_versions"), 0);

    let added = run_json(
        &db,
        [
            "lost",
            "add",
            "--name",
            "mouse",
            "--description",
            "black wireless mouse",
            "--category",
            "electronics",
            "--location",
            "3rd Floor",
            "--date",
            "2025-03-03",
            "--notify-email",
            "none",
        ],
    );
    assert_eq!(as_str(&added, "/item/lost_id"), "L0001");
    assert_eq!(as_str(&added, "/item/status"), "pending");
    assert_eq!(array_len(&added, "/matches_created"), 0);

    let added = run_json(
        &db,
        [
            "found",
            "add",
            "--name",
            "mouse",
            "--description",
            "wireless mouse black color",
            "--category",
            "electronics",
            "--location",
            "6th Floor (Library)",
            "--date",
            "2025-03-05",
        ],
    );
    assert_eq!(as_str(&added, "/item/found_id"), "F0001");
    assert_eq!(as_str(&added, "/item/department"), "SHS");
    assert_eq!(array_len(&added, "/matches_created"), 1);
    assert_eq!(as_str(&added, "/matches_created/0/record/match_id"), "M0001");
    assert_eq!(as_str(&added, "/matches_created/0/lost/status"), "matched");
    let match_key = as_str(&added, "/matches_created/0/record/key").to_string();

    let listed = run_json(&db, ["match", "list"]);
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    let claimed = run_json(
        &db,
        [
            "match",
            "claim",
            &match_key,
            "--claimed-by-id",
            "2021-00123",
            "--claimed-by-name",
            "Dana Cruz",
        ],
    );
    assert_eq!(as_str(&claimed, "/lost/item/status"), "claimed");
    assert_eq!(as_str(&claimed, "/found/claimed_by_name"), "Dana Cruz");

    let archive = run_json(&db, ["archive", "list"]);
    assert_eq!(archive.as_array().map(Vec::len), Some(2));

    let listed = run_json(&db, ["match", "list"]);
    assert_eq!(listed.as_array().map(Vec::len), Some(0));

    let lost = run_json(&db, ["lost", "list"]);
    assert_eq!(lost.as_array().map(Vec::len), Some(0));
}

#[test]
fn cancel_frees_the_pair_for_rematching() {
    let db = unique_temp_db("rcl-cancel");
    run_json(&db, ["db", "migrate"]);

    run_json(
        &db,
        [
            "lost",
            "add",
            "--name",
            "notebook",
            "--description",
            "blue notebook",
            "--category",
            "documents",
            "--location",
            "2nd Floor",
            "--date",
            "2025-03-03",
        ],
    );
    let added = run_json(
        &db,
        [
            "found",
            "add",
            "--name",
            "notebook",
            "--description",
            "blue notebook",
            "--category",
            "documents",
            "--location",
            "2nd Floor",
            "--date",
            "2025-03-04",
        ],
    );
    assert_eq!(array_len(&added, "/matches_created"), 1);
    let match_key = as_str(&added, "/matches_created/0/record/key").to_string();

    let cancelled = run_json(&db, ["match", "cancel", &match_key]);
    assert_eq!(as_str(&cancelled, "/lost/status"), "pending");
    assert_eq!(as_str(&cancelled, "/found/status"), "pending");

    let pending = run_json(&db, ["lost", "list", "--status", "pending"]);
    assert_eq!(pending.as_array().map(Vec::len), Some(1));

    let rerun = run_json(&db, ["match", "run"]);
    assert_eq!(rerun.as_array().map(Vec::len), Some(1));
    assert_eq!(as_str(&rerun, "/0/record/match_id"), "M0002");
}

#[test]
fn category_mismatch_is_not_matched() {
    let db = unique_temp_db("rcl-mismatch");
    run_json(&db, ["db", "migrate"]);

    run_json(
        &db,
        [
            "lost",
            "add",
            "--name",
            "notebook",
            "--description",
            "blue notebook",
            "--category",
            "documents",
            "--location",
            "2nd Floor",
        ],
    );
    let added = run_json(
        &db,
        [
            "found",
            "add",
            "--name",
            "notebook",
            "--description",
            "blue notebook",
            "--category",
            "electronics",
            "--location",
            "2nd Floor",
        ],
    );
    assert_eq!(array_len(&added, "/matches_created"), 0);

    let count = run_json(&db, ["found", "category-count", "electronics"]);
    assert_eq!(count.pointer("/count").and_then(Value::as_u64), Some(1));
}

#[test]
fn cancelling_an_unknown_match_fails_cleanly() {
    let db = unique_temp_db("rcl-unknown");
    run_json(&db, ["db", "migrate"]);

    let missing = Ulid::new().to_string();
    let output = run_rcl(&db, ["match", "cancel", missing.as_str()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not found"), "unexpected stderr: {stderr}");
}
