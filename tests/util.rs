//! Shared test utilities for integration tests
//!
//! Provides conflicted fixtures and a binary handle used across
//! multiple test files.

#![allow(dead_code)]

use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use std::process::Command;

/// One conflict between two function definitions, LF endings.
pub const SIMPLE_CONFLICT: &str = "fn a() {}\n\
<<<<<<< HEAD\n\
let left = 1;\n\
=======\n\
let right = 2;\n\
>>>>>>> feature\n\
fn z() {}\n";

/// Handle on the compiled binary with colors off.
pub fn mend() -> Command {
    let mut cmd = Command::cargo_bin("mend").expect("mend binary");
    cmd.arg("--no-color");
    cmd
}

/// Temp project with `src/lib.rs` holding `contents` and a clean README.
pub fn conflicted_project(contents: &str) -> assert_fs::TempDir {
    let tmp = assert_fs::TempDir::new().expect("tempdir");

    tmp.child("src/lib.rs")
        .write_str(contents)
        .expect("write lib.rs");

    tmp.child("README.md")
        .write_str("# Fixture\n\nNothing to merge here.\n")
        .expect("write readme");

    tmp
}

/// Write a model reply file next to the project files.
pub fn reply(tmp: &assert_fs::TempDir, name: &str, body: &str) -> std::path::PathBuf {
    let child = tmp.child(name);
    child.write_str(body).expect("write reply");
    child.path().to_path_buf()
}
