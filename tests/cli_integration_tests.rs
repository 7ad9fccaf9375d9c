//! End-to-end CLI integration tests
//!
//! These run the cmdb-lifecycle binary against a file-backed store in a
//! temporary directory, so every invocation starts from a clean slate.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

/// Helper for running the binary against one state file
struct CliTestEnvironment {
    temp_dir: TempDir,
}

impl CliTestEnvironment {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("temp dir"),
        }
    }

    fn state_file(&self) -> PathBuf {
        self.temp_dir.path().join("state.json")
    }

    fn cmd(&self, actor: &str) -> Command {
        let mut cmd = Command::cargo_bin("cmdb-lifecycle").expect("binary builds");
        cmd.current_dir(self.temp_dir.path())
            .env("RUST_LOG", "warn")
            .arg("--state-file")
            .arg(self.state_file())
            .arg("--actor-id")
            .arg(actor);
        cmd
    }

    /// Run a command that must succeed and parse its stdout as JSON.
    fn json(&self, actor: &str, args: &[&str]) -> Value {
        let output = self.cmd(actor).args(args).output().expect("binary runs");
        assert!(
            output.status.success(),
            "{args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).expect("stdout is JSON")
    }
}

#[test]
fn help_lists_lifecycle_commands() {
    Command::cargo_bin("cmdb-lifecycle")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("register"))
        .stdout(predicate::str::contains("approve"))
        .stdout(predicate::str::contains("audit"));
}

#[test]
fn full_lifecycle_through_the_cli() {
    let env = CliTestEnvironment::new();

    let registered = env.json("alice", &["register", "--name", "web-01", "--type", "server"]);
    assert_eq!(registered["asset"]["id"], "SRV-001");
    assert_eq!(registered["asset"]["status"], "offline");
    let onboarding_id = registered["onboarding"]["id"].as_str().unwrap().to_string();
    assert_eq!(registered["onboarding"]["type"], "onboarding");

    let onboarded = env.json("cab", &["approve", &onboarding_id]);
    assert_eq!(onboarded["asset"]["status"], "online");
    assert_eq!(onboarded["workflow"]["status"], "approved");

    let submitted = env.json(
        "ops",
        &[
            "submit", "SRV-001", "--type", "maintenance", "--reason", "Firmware", "--priority",
            "high",
        ],
    );
    assert_eq!(submitted["status"], "pending");
    assert_eq!(submitted["priority"], "high");
    let workflow_id = submitted["id"].as_str().unwrap().to_string();

    env.cmd("ops")
        .args(["submit", "SRV-001", "--type", "decommission", "--reason", "Retire"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("asset_locked"));

    env.cmd("ops")
        .args(["approve", &workflow_id])
        .assert()
        .code(5)
        .stderr(predicate::str::contains("unauthorized"));

    let pending = env.json("cab", &["pending"]);
    assert_eq!(pending.as_array().unwrap().len(), 1);

    let decided = env.json("cab", &["approve", &workflow_id, "--comments", "Go ahead"]);
    assert_eq!(decided["asset"]["status"], "maintenance");
    assert!(decided["asset"].get("activeWorkflowId").map_or(true, Value::is_null));

    env.cmd("cab")
        .args(["reject", &workflow_id, "--comments", "Changed my mind"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("invalid_state"));

    let history = env.json("cab", &["history", "SRV-001"]);
    assert_eq!(history.as_array().unwrap().len(), 2);
    assert_eq!(history[0]["id"], workflow_id.as_str());

    let approvals = env.json("cab", &["audit", "--action", "workflow_approved"]);
    assert_eq!(approvals.as_array().unwrap().len(), 2);

    let check = env.json("cab", &["check"]);
    assert_eq!(check["consistent"], true);
}

#[test]
fn unknown_asset_and_bad_input_have_distinct_exit_codes() {
    let env = CliTestEnvironment::new();

    env.cmd("alice")
        .args(["show", "SRV-404"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("not_found"));

    env.cmd("alice")
        .args(["register", "--name", "web-01", "--type", "server", "--ip", "not-an-ip"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("validation_error"));

    env.cmd("alice")
        .args(["pending", "--priority", "whenever"])
        .assert()
        .code(2);
}

#[test]
fn decommission_keeps_the_asset_row() {
    let env = CliTestEnvironment::new();
    let config = env.temp_dir.path().join("cmdb-lifecycle.toml");
    std::fs::write(&config, "[engine]\nonboarding = \"direct\"\n").unwrap();

    let registered = env.json(
        "alice",
        &[
            "--config",
            config.to_str().unwrap(),
            "register",
            "--name",
            "core-sw",
            "--type",
            "network",
            "--status",
            "online",
        ],
    );
    assert_eq!(registered["asset"]["status"], "online");
    assert!(registered.get("onboarding").map_or(true, Value::is_null));

    let workflow = env.json("alice", &["decommission", "NET-001", "--reason", "Replaced"]);
    assert_eq!(workflow["type"], "decommission");
    assert_eq!(workflow["status"], "pending");

    let asset = env.json("alice", &["show", "NET-001"]);
    assert_eq!(asset["status"], "online");
    assert_eq!(asset["activeWorkflowId"], workflow["id"]);

    let updated = env.json("alice", &["update", "NET-001", "--owner", "netops"]);
    assert_eq!(updated["owner"], "netops");
    assert_eq!(updated["status"], "online");

    let stats = env.json("alice", &["stats"]);
    assert_eq!(stats["pending"], 1);
    assert_eq!(stats["byType"]["decommission"], 1);
}
