//! Integration tests for the keyward CLI binary.
//!
//! Every test gets its own data directory and uses the file secret store
//! backend, so no OS keyring is touched. Passphrases are passed through the
//! environment.

use std::process::{Command, Output};

use tempfile::TempDir;

struct Env {
    dir: TempDir,
}

impl Env {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = format!(
            "[data]\ndir = '{}'\n\n[secret_store]\nbackend = \"file\"\n",
            dir.path().join("data").display()
        );
        std::fs::write(dir.path().join("config.toml"), config).unwrap();
        Self { dir }
    }

    fn cmd(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_keyward"));
        cmd.arg("--config")
            .arg(self.dir.path().join("config.toml"))
            .args(args)
            .env_remove("KEYWARD_PASSPHRASE")
            .env_remove("KEYWARD_NEW_PASSPHRASE")
            .env_remove("KEYWARD_CONFIRM_PASSPHRASE");
        cmd
    }

    fn init_protected(&self, passphrase: &str) {
        run(self
            .cmd(&["init", "--protect"])
            .env("KEYWARD_NEW_PASSPHRASE", passphrase)
            .env("KEYWARD_CONFIRM_PASSPHRASE", passphrase));
    }

    fn change(&self, current: &str, new: &str, confirm: &str) -> Output {
        self.cmd(&["passphrase"])
            .env("KEYWARD_PASSPHRASE", current)
            .env("KEYWARD_NEW_PASSPHRASE", new)
            .env("KEYWARD_CONFIRM_PASSPHRASE", confirm)
            .output()
            .expect("Failed to execute command")
    }

    fn status(&self) -> serde_json::Value {
        let out = run(&mut self.cmd(&["status"]));
        serde_json::from_str(&out).unwrap()
    }
}

fn run(cmd: &mut Command) -> String {
    let output = cmd.output().expect("Failed to execute command");
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    if !output.status.success() {
        panic!(
            "Command failed with status {:?}\nstdout: {stdout}\nstderr: {stderr}",
            output.status
        );
    }
    stdout
}

#[test]
fn test_change_passphrase_round_trip() {
    let env = Env::new();
    env.init_protected("first");

    run(env
        .cmd(&["put", "--key", "email", "--value", "hunter2"])
        .env("KEYWARD_PASSPHRASE", "first"));

    let out = env.change("first", "second", "second");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(String::from_utf8_lossy(&out.stdout).contains("Passphrase updated"));

    let value = run(env
        .cmd(&["get", "--key", "email"])
        .env("KEYWARD_PASSPHRASE", "second"));
    assert_eq!(value.trim(), "hunter2");

    let stale = env
        .cmd(&["get", "--key", "email"])
        .env("KEYWARD_PASSPHRASE", "first")
        .output()
        .unwrap();
    assert!(!stale.status.success());

    let status = env.status();
    assert_eq!(status["is_protected"], true);
    assert_eq!(status["changed_since_last_unlock"], true);

    let unlocked = run(env.cmd(&["unlock"]).env("KEYWARD_PASSPHRASE", "second"));
    assert!(unlocked.contains("changed since the last unlock"));
    assert_eq!(env.status()["changed_since_last_unlock"], false);
}

#[test]
fn test_mismatched_confirmation_changes_nothing() {
    let env = Env::new();
    env.init_protected("first");

    let out = env.change("first", "second", "secnod");
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("do not match"));

    run(env.cmd(&["list"]).env("KEYWARD_PASSPHRASE", "first"));
}

#[test]
fn test_remove_and_restore_protection() {
    let env = Env::new();
    env.init_protected("first");
    run(env
        .cmd(&["put", "--key", "pin", "--value", "1234"])
        .env("KEYWARD_PASSPHRASE", "first"));

    let out = env.change("first", "", "");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(String::from_utf8_lossy(&out.stdout).contains("Passphrase removed"));
    assert_eq!(env.status()["is_protected"], false);

    // No passphrase needed anymore.
    let value = run(&mut env.cmd(&["get", "--key", "pin"]));
    assert_eq!(value.trim(), "1234");

    let out = env.change("", "again", "again");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let value = run(env
        .cmd(&["get", "--key", "pin"])
        .env("KEYWARD_PASSPHRASE", "again"));
    assert_eq!(value.trim(), "1234");
}

#[test]
fn test_empty_passphrase_rejected_when_unprotected() {
    let env = Env::new();
    run(&mut env.cmd(&["init"]));

    let out = env.change("", "", "");
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("cannot be empty"));
    assert_eq!(env.status()["is_protected"], false);
}

#[test]
fn test_wrong_current_passphrase_rejected() {
    let env = Env::new();
    env.init_protected("first");

    let out = env.change("wrong", "second", "second");
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("incorrect passphrase"));
}

#[test]
fn test_passphrase_change_revokes_bypass() {
    let env = Env::new();
    env.init_protected("first");

    run(env
        .cmd(&["bypass", "enable"])
        .env("KEYWARD_PASSPHRASE", "first"));
    assert_eq!(env.status()["biometric_bypass_enabled"], true);
    run(&mut env.cmd(&["unlock", "--bypass"]));

    let out = env.change("first", "second", "second");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(env.status()["biometric_bypass_enabled"], false);

    let out = env.cmd(&["unlock", "--bypass"]).output().unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("bypass is not enabled"));
}

#[test]
fn test_commands_require_init() {
    let env = Env::new();
    let out = env.cmd(&["list"]).output().unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("keyward init"));
}

#[test]
fn test_protection_comes_from_the_vault_not_the_state_file() {
    let env = Env::new();
    env.init_protected("first");
    std::fs::remove_file(env.dir.path().join("data/protection.json")).unwrap();

    let out = env.change("first", "", "");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(String::from_utf8_lossy(&out.stdout).contains("Passphrase removed"));
    assert_eq!(env.status()["is_protected"], false);
}

#[test]
fn test_passphrase_refused_while_vault_is_locked_by_another_process() {
    let env = Env::new();
    env.init_protected("first");
    let lock = env.dir.path().join("data/keyward.vault.lock");
    std::fs::write(&lock, "4242").unwrap();

    let out = env.change("first", "second", "second");
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("busy"), "{stderr}");
    assert!(!stderr.contains("CRITICAL"));

    std::fs::remove_file(&lock).unwrap();
    run(env.cmd(&["list"]).env("KEYWARD_PASSPHRASE", "first"));
}

#[test]
fn test_secret_store_failure_reverts_and_exits_one() {
    let env = Env::new();
    env.init_protected("first");
    let bypass = env.dir.path().join("data/bypass.secret");
    std::fs::remove_file(&bypass).unwrap();
    std::fs::create_dir_all(bypass.join("occupied")).unwrap();

    let out = env.change("first", "second", "second");
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("nothing changed"), "{stderr}");
    assert!(!String::from_utf8_lossy(&out.stdout).contains("Passphrase updated"));

    run(env.cmd(&["list"]).env("KEYWARD_PASSPHRASE", "first"));
}
