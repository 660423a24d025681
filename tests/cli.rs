//! Integration tests for the read-only commands and CLI plumbing:
//! `extract`, `check`, `init`, `completions` and exit-code mapping.

mod util;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use serde_json::Value;
use util::{SIMPLE_CONFLICT, conflicted_project, mend};

#[test]
fn extract_json_lists_regions_with_context() {
    let tmp = conflicted_project(SIMPLE_CONFLICT);

    let assert = mend()
        .current_dir(tmp.path())
        .args(["extract", "src", "--json", "--margin", "1"])
        .assert()
        .success();

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    let v: Value = serde_json::from_str(stdout.trim()).expect("valid json");

    assert_eq!(v["schema_version"], "1");
    assert_eq!(v["total_files"], 1);
    assert!(
        v["files"][0]["file"]
            .as_str()
            .unwrap()
            .ends_with("lib.rs")
    );

    insta::assert_yaml_snapshot!(v["files"][0]["regions"], @r#"
    - context_end_line: 7
      context_start_line: 1
      end_line: 6
      start_line: 2
    "#);
}

#[test]
fn extract_text_prints_numbered_section() {
    let tmp = conflicted_project(SIMPLE_CONFLICT);

    mend()
        .current_dir(tmp.path())
        .args(["extract", "src/lib.rs", "--margin", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("---conflict_section---0 (lines 2-6, context 2-6)"))
        .stdout(predicate::str::contains("let right = 2;"))
        .stdout(predicate::str::contains("fn a() {}").not());
}

#[test]
fn extract_on_clean_tree_reports_nothing() {
    let tmp = conflicted_project("fn a() {}\n");

    mend()
        .current_dir(tmp.path())
        .arg("extract")
        .assert()
        .success()
        .stdout(predicate::str::contains("No conflicts found"));
}

#[test]
fn check_fails_with_code_two_on_markers() {
    let tmp = conflicted_project(SIMPLE_CONFLICT);

    mend()
        .current_dir(tmp.path())
        .arg("check")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("marker still present"));
}

#[test]
fn check_json_lists_one_based_lines() {
    let tmp = conflicted_project(SIMPLE_CONFLICT);

    let assert = mend()
        .current_dir(tmp.path())
        .args(["check", "--json"])
        .assert()
        .code(2);

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    let v: Value = serde_json::from_str(stdout.trim()).expect("valid json");
    assert_eq!(v["exit_code"], 2);
    assert_eq!(v["files"][0]["lines"], serde_json::json!([2, 4, 6]));
}

#[test]
fn check_passes_on_clean_tree() {
    let tmp = conflicted_project("fn a() {}\nfn z() {}\n");

    mend()
        .current_dir(tmp.path())
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("No conflict markers found."));
}

#[test]
fn missing_path_is_invalid_input() {
    let tmp = conflicted_project(SIMPLE_CONFLICT);

    mend()
        .current_dir(tmp.path())
        .args(["extract", "does/not/exist"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Path not found"));
}

#[test]
fn usage_error_is_invalid_input() {
    mend()
        .args(["apply", "src/lib.rs"])
        .assert()
        .code(3);
}

#[test]
fn help_exits_zero() {
    mend()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("resolve"));
}

#[test]
fn init_writes_default_config_once() {
    let tmp = conflicted_project("fn a() {}\n");

    mend()
        .current_dir(tmp.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created config file"));

    let written =
        std::fs::read_to_string(tmp.path().join("mendmerge.toml")).expect("config written");
    assert!(written.contains("margin = 10"));

    mend()
        .current_dir(tmp.path())
        .arg("init")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("--force"));
}

#[test]
fn config_file_margin_is_honored() {
    let tmp = conflicted_project(SIMPLE_CONFLICT);
    std::fs::write(tmp.path().join("mendmerge.toml"), "margin = 0\n").expect("write config");

    let assert = mend()
        .current_dir(tmp.path())
        .args(["extract", "src", "--json"])
        .assert()
        .success();

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    let v: Value = serde_json::from_str(stdout.trim()).expect("valid json");
    assert_eq!(v["files"][0]["regions"][0]["context_start_line"], 2);
}

#[test]
fn completions_to_stdout() {
    mend()
        .args(["completions", "bash", "--stdout"])
        .assert()
        .success()
        .stdout(predicate::str::contains("mend"));
}
