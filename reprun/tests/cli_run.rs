//! CLI tests for `reprun run` and `reprun runs`.
//!
//! Spawns the binary inside a scratch git repository and checks exit codes
//! and the files left in the results directory.

#![cfg(unix)]

use std::fs;
use std::process::{Command, Output};

use reprun::exit_codes;
use reprun::io::stamp::{INVOCATION_FILE, REVISION_FILE};
use reprun::test_support::{FAILING_SCRIPT, Fixture, SUCCEEDING_SCRIPT};

fn reprun(fixture: &Fixture, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_reprun"))
        .current_dir(fixture.root())
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("spawn reprun")
}

#[test]
fn clean_run_is_stamped_with_head() {
    let fixture = Fixture::new(&["A", "B"]);
    let head = fixture.commit_all();

    let output = reprun(&fixture, &["run", "-o", "r1"]);
    assert_eq!(
        output.status.code(),
        Some(exit_codes::OK),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let dir = fixture.results().join("r1");
    assert_eq!(
        fs::read_to_string(dir.join(REVISION_FILE)).expect("rev"),
        format!("{head}\n")
    );
    assert_eq!(
        fs::read_to_string(dir.join(INVOCATION_FILE)).expect("invocation"),
        "args = [\"run\",\"-o\",\"r1\"]\n"
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("steps run: #1..=#2"));
}

#[test]
fn dirty_tree_exits_invalid_without_side_effects() {
    let fixture = Fixture::new(&["A"]);
    fixture.commit_all();
    fs::write(fixture.script_path("A"), "#!/bin/sh\necho edited\n").expect("edit script");

    let output = reprun(&fixture, &["run", "-o", "r1"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("the pipeline failed to start"));
    assert!(!fixture.results().join("r1").exists());
}

#[test]
fn forced_dirty_run_is_sealed_and_marked() {
    let fixture = Fixture::new(&["A"]);
    fixture.commit_all();
    fs::write(
        fixture.script_path("A"),
        format!("{SUCCEEDING_SCRIPT}# edited\n"),
    )
    .expect("edit script");

    let output = reprun(&fixture, &["run", "-o", "r1", "--force"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let dir = fixture.results().join("r1");
    let rev = fs::read_to_string(dir.join(REVISION_FILE)).expect("rev");
    assert!(rev.ends_with("NOT CLEAN\n"));
    assert!(dir.join(".final").is_file());
}

#[test]
fn step_failure_exits_with_step_code() {
    let fixture = Fixture::new(&["A", "B"]);
    fixture.set_script("B", FAILING_SCRIPT);
    fixture.commit_all();

    let output = reprun(&fixture, &["run", "-o", "r1"]);
    assert_eq!(output.status.code(), Some(exit_codes::STEP_FAILED));
    assert!(String::from_utf8_lossy(&output.stderr).contains("a step in the pipeline failed"));
    assert!(fixture.results().join("r1").join("A").is_dir());
    assert!(!fixture.results().join("r1").join("B").exists());
}

#[test]
fn conflicting_flags_are_usage_errors() {
    let fixture = Fixture::new(&["A"]);
    let output = reprun(&fixture, &["run", "--only", "1", "--from", "1"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(fs::read_dir(fixture.results()).expect("results").next().is_none());
}

#[test]
fn runs_lists_the_continuation_candidate() {
    let fixture = Fixture::new(&["A", "B"]);
    fixture.make_run("sealed", &["A"], true, true);
    fixture.age_run("sealed", 60);
    fixture.make_run("open", &["A", "B"], true, false);

    let output = reprun(&fixture, &["runs", "--json"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let runs: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    let runs = runs.as_array().expect("array");
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0]["name"], "sealed");
    assert_eq!(runs[0]["status"], "final");
    assert_eq!(runs[0]["candidate"], false);
    assert_eq!(runs[1]["name"], "open");
    assert_eq!(runs[1]["steps"], 2);
    assert_eq!(runs[1]["candidate"], true);
}
