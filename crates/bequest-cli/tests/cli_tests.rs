//! Command-line flows against a throwaway data directory.
//!
//! Tests cover:
//!  1. Unknown vault and wrong password are refused
//!  2. Import, list, tag, search
//!  3. Shards stay on the device until the item unlocks
//!  4. Full inheritance: inherit → tick → package → recover → decrypt
//!  5. Audit trail is verifiable after a session
//!  6. Invalid settings are rejected
//!  7. Owner commands restart the idle clock; read-only ones do not

use assert_cmd::Command;
use chrono::{DateTime, Utc};
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;
use tempfile::tempdir;

const PASSWORD: &str = "a long enough vault password";

fn bequest(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("bequest").unwrap();
    cmd.arg("--data-dir")
        .arg(root)
        .env("BEQUEST_VAULT_PASSWORD", PASSWORD)
        .env_remove("BEQUEST_VAULT_PASSWORD_CONFIRM")
        .env("RUST_LOG", "warn");
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(output).unwrap()
}

fn init_vault(root: &Path) {
    bequest(root)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Vault created"));
}

/// Import `contents` as `name` and return the item id.
fn import(root: &Path, name: &str, contents: &[u8]) -> String {
    let source = root.parent().unwrap().join(name);
    fs::write(&source, contents).unwrap();
    let out = stdout_of(bequest(root).arg("import").arg(&source));
    out.split_whitespace().nth(1).unwrap().to_string()
}

fn item_json(root: &Path, id: &str) -> serde_json::Value {
    let out = stdout_of(bequest(root).arg("list").arg("--json"));
    let items: Vec<serde_json::Value> = serde_json::from_str(&out).unwrap();
    items
        .into_iter()
        .find(|item| item["id"] == id)
        .unwrap()
}

// ─── Test 1: refusals ───────────────────────────────────────────────────────

#[test]
fn test_commands_require_initialised_vault() {
    let dir = tempdir().unwrap();
    bequest(&dir.path().join("vault"))
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("run init first"));
}

#[test]
fn test_wrong_password_is_refused() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("vault");
    init_vault(&root);
    bequest(&root)
        .env("BEQUEST_VAULT_PASSWORD", "not the vault password")
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("different password"));
}

// ─── Test 2: catalog commands ───────────────────────────────────────────────

#[test]
fn test_import_tag_and_search() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("vault");
    init_vault(&root);
    let id = import(&root, "passwords.txt", b"bank: hunter2");

    bequest(&root)
        .args(["tag", &id, "--add", "finance"])
        .assert()
        .success();
    bequest(&root)
        .args(["search", "FINANCE"])
        .assert()
        .success()
        .stdout(predicate::str::contains("passwords.txt"));
    bequest(&root)
        .args(["search", "recipes"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    let out = dir.path().join("exported.txt");
    bequest(&root)
        .args(["export", &id])
        .arg(&out)
        .assert()
        .success();
    assert_eq!(fs::read(&out).unwrap(), b"bank: hunter2");
}

// ─── Test 3: transport gate ─────────────────────────────────────────────────

#[test]
fn test_package_refused_while_locked() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("vault");
    init_vault(&root);
    let id = import(&root, "will.txt", b"everything to the cat");
    bequest(&root)
        .args([
            "inherit",
            &id,
            "--beneficiary",
            "alice",
            "--witness",
            "bob",
            "--inactivity-days",
            "90",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 of 2 shards required"));

    bequest(&root)
        .args(["package", &id, "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot leave the device"));
}

// ─── Test 4: full inheritance ───────────────────────────────────────────────

#[test]
fn test_inheritance_round_trip() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("vault");
    init_vault(&root);
    let letter = b"Dear Alice, the key is under the mat.".repeat(500);
    let id = import(&root, "letter.txt", &letter);

    bequest(&root)
        .args([
            "inherit",
            &id,
            "--beneficiary",
            "alice",
            "--witness",
            "bob",
            "--witness",
            "carol",
            "--unlock-date",
            "2000-01-01T00:00:00Z",
        ])
        .assert()
        .success();
    bequest(&root)
        .arg("tick")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("unlocked {id}")));

    let shard_dir = dir.path().join("shards");
    let uri = stdout_of(bequest(&root).args(["package", &id, "1"]));
    bequest(&root)
        .args(["package", &id, "3", "--out-dir"])
        .arg(&shard_dir)
        .assert()
        .success();
    let shard_file = fs::read_dir(&shard_dir)
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();

    let item = item_json(&root, &id);
    let blob = root
        .join("blobs")
        .join(item["ciphertext_file"].as_str().unwrap());
    let checksum = item["metadata"]["checksum"].as_str().unwrap().to_string();
    let recovered = dir.path().join("recovered.txt");

    Command::cargo_bin("bequest")
        .unwrap()
        .env("RUST_LOG", "warn")
        .args(["recover", "--required", "2", "--checksum", &checksum])
        .arg("--blob")
        .arg(&blob)
        .arg("--out")
        .arg(&recovered)
        .arg(uri.trim())
        .arg(&shard_file)
        .assert()
        .success()
        .stdout(predicate::str::contains("recovered"));
    assert_eq!(fs::read(&recovered).unwrap(), letter);

    bequest(&root)
        .args(["mark", &id, "released"])
        .assert()
        .success()
        .stdout(predicate::str::contains("released"));
}

#[test]
fn test_recover_with_one_shard_fails() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("vault");
    init_vault(&root);
    let id = import(&root, "note.txt", b"note");
    bequest(&root)
        .args([
            "inherit",
            &id,
            "--beneficiary",
            "alice",
            "--witness",
            "bob",
            "--unlock-date",
            "2000-01-01T00:00:00Z",
        ])
        .assert()
        .success();
    bequest(&root).arg("tick").assert().success();
    let uri = stdout_of(bequest(&root).args(["package", &id, "2"]));

    Command::cargo_bin("bequest")
        .unwrap()
        .args(["recover", "--required", "2", "--print-key"])
        .arg(uri.trim())
        .assert()
        .failure()
        .stderr(predicate::str::contains("insufficient shards"));
}

// ─── Test 5: audit ──────────────────────────────────────────────────────────

#[test]
fn test_audit_chain_verifies() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("vault");
    init_vault(&root);
    let id = import(&root, "a.txt", b"a");
    bequest(&root).args(["rename", &id, "b.txt"]).assert().success();
    bequest(&root).args(["delete", &id]).assert().success();

    bequest(&root)
        .args(["events", "--verify"])
        .assert()
        .success()
        .stdout(predicate::str::contains("audit chain intact: 7 entries"))
        .stdout(predicate::str::contains("ITEM_DELETED"));
}

// ─── Test 6: settings ───────────────────────────────────────────────────────

#[test]
fn test_settings_validation() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("vault");
    init_vault(&root);
    bequest(&root)
        .args(["settings", "set", "--chunk-size", "12"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Chunk size"));
    bequest(&root)
        .args(["settings", "set", "--warning-days", "14,2", "--compress-packages", "true"])
        .assert()
        .success();
    bequest(&root)
        .args(["settings", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("14"))
        .stdout(predicate::str::contains("\"compress_packages\": true"));
}

// ─── Test 7: owner activity ─────────────────────────────────────────────────

fn activity_json(root: &Path) -> serde_json::Value {
    serde_json::from_slice(&fs::read(root.join("activity.json")).unwrap()).unwrap()
}

fn last_activity(root: &Path) -> DateTime<Utc> {
    let state = activity_json(root);
    serde_json::from_value(state["tracker"]["last_activity"].clone()).unwrap()
}

#[test]
fn test_owner_commands_record_activity() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("vault");
    init_vault(&root);
    let created = last_activity(&root);

    sleep(Duration::from_millis(20));
    let id = import(&root, "deeds.txt", b"plot 42");
    let after_import = last_activity(&root);
    assert!(after_import > created);
    let kinds = activity_json(&root)["tracker"]["history"].to_string();
    assert!(kinds.contains("\"import\""), "{kinds}");

    sleep(Duration::from_millis(20));
    bequest(&root).arg("list").assert().success();
    bequest(&root).arg("status").assert().success();
    assert_eq!(last_activity(&root), after_import);

    sleep(Duration::from_millis(20));
    bequest(&root)
        .args(["tag", &id, "--add", "property"])
        .assert()
        .success();
    assert!(last_activity(&root) > after_import);
}
