use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;

const WORKLOAD: &str = r#"{
    "dataset": "toy",
    "runs": [{
        "steps": ["Alice moved to Paris.", "Bob adopted a cat."],
        "questions": [
            {"question": "Where does Alice live?", "answer": "Paris"},
            {"question": "What pet does Bob have?", "answer": "a cat"}
        ]
    }]
}"#;

struct Sandbox {
    dir: tempfile::TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("workload.json"), WORKLOAD).unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn results(&self) -> PathBuf {
        self.path().join("results")
    }

    fn membench(&self) -> Command {
        let mut cmd = Command::cargo_bin("membench").unwrap();
        cmd.current_dir(self.path())
            .env("MEMBENCH_RESULTS_DIR", self.results())
            // Nothing listens here; every question fails fast.
            .env("MEMBENCH_LLM_BASE_URL", "http://127.0.0.1:9")
            .env("NO_COLOR", "1")
            .env_remove("MEMBENCH_BIN")
            .env_remove("MEMBENCH_MODEL")
            .env_remove("RUST_LOG");
        cmd
    }

    fn selector(&self, agent: &str) -> Vec<String> {
        vec![
            "--workload".into(),
            self.path().join("workload.json").display().to_string(),
            "--agent".into(),
            agent.into(),
            "--model".into(),
            "m".into(),
        ]
    }
}

#[test]
fn version_prints_package_version() {
    Sandbox::new()
        .membench()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn selector_out_of_range_is_a_setup_error() {
    let sb = Sandbox::new();
    sb.membench()
        .arg("run-instance")
        .args(sb.selector("long-context"))
        .args(["--global-idx", "5"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("out of range"));
    assert!(!sb.results().exists());
}

#[test]
fn external_agent_without_command_is_a_setup_error() {
    let sb = Sandbox::new();
    sb.membench()
        .arg("run-instance")
        .args(sb.selector("episodic-memory"))
        .args(["--global-idx", "0"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("agent.command"));
}

#[test]
fn misspelled_config_key_is_a_setup_error() {
    let sb = Sandbox::new();
    let config = sb.path().join("membench.yaml");
    std::fs::write(&config, "reslts_dir: out\n").unwrap();
    sb.membench()
        .arg("status")
        .args(sb.selector("long-context"))
        .assert()
        .code(2);
}

#[test]
fn status_of_a_fresh_sweep_as_json() {
    let sb = Sandbox::new();
    let output = sb
        .membench()
        .arg("status")
        .args(sb.selector("long-context"))
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success());

    let line = String::from_utf8(output.stdout).unwrap();
    let status: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
    assert_eq!(status["global_idx"], 0);
    assert_eq!(status["current_step"], -1);
    assert_eq!(status["total_steps"], 2);
    assert_eq!(status["answered"], 0);
    assert_eq!(status["total_questions"], 2);
}

#[test]
fn sweep_runs_children_and_records_failed_questions_as_placeholders() {
    let sb = Sandbox::new();
    sb.membench()
        .arg("sweep")
        .args(sb.selector("long-context"))
        .assert()
        .success()
        .stdout(predicate::str::contains("1 of 1 runs succeeded"));

    let out_dir = sb
        .results()
        .join("long-context_toy-m")
        .join("0_subsetNone_cksizeNone");
    let marker = std::fs::read_to_string(out_dir.join("current_step.txt")).unwrap();
    assert_eq!(marker.trim(), "1");

    let results: Vec<serde_json::Value> =
        serde_json::from_str(&std::fs::read_to_string(out_dir.join("results.json")).unwrap())
            .unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r["response"] == "ERROR"));
    assert_eq!(results[0]["answer"], "Paris");
    assert!(out_dir.join("parameters.json").exists());
    assert!(out_dir.join("agent_state").join("long_context.json").exists());

    let logs: Vec<_> = std::fs::read_dir(out_dir.join("logs"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    let child_log = logs.iter().find(|n| n.starts_with("child_")).unwrap();
    assert!(logs.iter().any(|n| n.starts_with("parent_")));
    let child = std::fs::read_to_string(out_dir.join("logs").join(child_log)).unwrap();
    assert!(child.contains("answering questions"));

    sb.membench()
        .arg("status")
        .args(sb.selector("long-context"))
        .assert()
        .success()
        .stdout(predicate::str::contains("steps 2/2  answered 0/2  errors 2"));
}
