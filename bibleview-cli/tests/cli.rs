use std::path::Path;

use assert_cmd::Command;
use serde_json::Value;
use tempfile::{tempdir, TempDir};

const KJV: &str = r#"
initials = "KJV"
name = "King James Version"
category = "bible"

[[pages]]
key = "Gen.1"

[[pages.verses]]
id = "Gen.1.1"
text = "In the beginning God created the heaven and the earth."

[[pages]]
key = "Gen.2"

[[pages.verses]]
id = "Gen.2.1"
text = "Thus the heavens and the earth were finished."
"#;

const EASTON: &str = r#"
initials = "Easton"
category = "dictionary"

[[pages]]
key = "Aaron"

[[pages.verses]]
id = "Aaron.1"
text = "The eldest son of Amram and Jochebed."
"#;

struct Env {
    home: TempDir,
    catalog: TempDir,
}

fn env() -> Env {
    let catalog = tempdir().unwrap();
    std::fs::write(catalog.path().join("kjv.toml"), KJV).unwrap();
    std::fs::write(catalog.path().join("easton.toml"), EASTON).unwrap();
    Env {
        home: tempdir().unwrap(),
        catalog,
    }
}

fn bibleview(env: &Env) -> Command {
    let mut cmd = Command::cargo_bin("bibleview").unwrap();
    let home = env.home.path();
    cmd.env("HOME", home)
        .env("XDG_DATA_HOME", home.join("data"))
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env_remove("RUST_LOG")
        .arg("--catalog")
        .arg(env.catalog.path())
        .arg("--state-dir")
        .arg(state_dir(home));
    cmd
}

fn state_dir(home: &Path) -> std::path::PathBuf {
    home.join("state")
}

fn print_state(cmd: &mut Command) -> Value {
    let output = cmd.arg("--print-state").assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).unwrap()
}

#[test]
fn print_state_applies_flags() {
    let env = env();
    let state = print_state(bibleview(&env).args(["--document", "KJV", "--key", "Gen.2.1"]));

    assert_eq!(state["version"], 1);
    assert_eq!(state["active"], "bible");
    assert_eq!(state["pages"]["bible"]["document"], "KJV");
    assert_eq!(state["pages"]["bible"]["key"], "Gen.2");
}

#[test]
fn session_is_restored_on_next_start() {
    let env = env();
    print_state(bibleview(&env).args(["--document", "Easton", "--key", "Aaron"]));

    let state = print_state(&mut bibleview(&env));
    assert_eq!(state["active"], "dictionary");
    assert_eq!(state["pages"]["dictionary"]["document"], "Easton");
    assert_eq!(state["pages"]["dictionary"]["key"], "Aaron");
    assert!(state_dir(env.home.path()).join("session.json").exists());
}

#[test]
fn unknown_document_fails() {
    let env = env();
    bibleview(&env)
        .args(["--document", "NIV", "--print-state"])
        .assert()
        .failure();
}

#[test]
fn corrupt_session_is_ignored() {
    let env = env();
    let dir = state_dir(env.home.path());
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("session.json"), "not json").unwrap();

    let state = print_state(bibleview(&env).args(["--category", "dictionary"]));
    assert_eq!(state["active"], "dictionary");
    // slots nobody opened are not written
    assert_eq!(state["pages"], serde_json::json!({}));
}
