//! Thin wrappers over the `git` executable used by discovery, the upload
//! check, and the review adapter.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to run git: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("`git {args}` failed: {stderr}")]
    Failed { args: String, stderr: String },
}

/// Run `git` in `repo` and return the raw output, failing on non-zero exit.
pub fn run_git(repo: &Path, args: &[&str]) -> Result<Output, GitError> {
    debug!(repo = %repo.display(), ?args, "git");
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()?;

    if !output.status.success() {
        return Err(GitError::Failed {
            args: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}

/// Worktree top-level containing `start`, if any.
pub fn discover_repo_root(start: &Path) -> Option<PathBuf> {
    let output = run_git(start, &["rev-parse", "--show-toplevel"]).ok()?;
    let top = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if top.is_empty() {
        return None;
    }
    let path = PathBuf::from(top);
    Some(dunce::canonicalize(&path).unwrap_or(path))
}

/// Unmerged path codes reported by `git status --porcelain`.
const UNMERGED_CODES: [&str; 7] = ["UU", "AA", "DD", "AU", "UA", "DU", "UD"];

/// Parse porcelain v1 output into the unmerged paths (relative to the repo root).
pub fn parse_unmerged(porcelain: &str) -> Vec<PathBuf> {
    porcelain
        .lines()
        .filter(|l| l.len() > 3)
        .filter(|l| UNMERGED_CODES.contains(&&l[..2]))
        .map(|l| PathBuf::from(l[3..].trim().trim_matches('"')))
        .collect()
}

/// Files git currently considers unmerged, as absolute paths.
pub fn unmerged_files(repo: &Path) -> Result<Vec<PathBuf>, GitError> {
    let output = run_git(repo, &["status", "--porcelain"])?;
    let text = String::from_utf8_lossy(&output.stdout);
    Ok(parse_unmerged(&text)
        .into_iter()
        .map(|p| repo.join(p))
        .collect())
}

/// Working-tree diff of `path`, ignoring line-ending-only changes.
pub fn diff(repo: &Path, path: &Path) -> Result<String, GitError> {
    let target = path.to_string_lossy();
    let output = run_git(
        repo,
        &["diff", "--ignore-space-at-eol", "--ignore-cr-at-eol", "--", &target],
    )?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// New-side `(start, length)` of an `@@ -a,b +c,d @@` header. A missing
/// length means one line.
pub fn parse_hunk_header(line: &str) -> Option<(usize, usize)> {
    let rest = line.strip_prefix("@@")?;
    let new_side = rest
        .split_whitespace()
        .find(|tok| tok.starts_with('+'))?;
    let mut parts = new_side[1..].splitn(2, ',');
    let start = parts.next()?.parse().ok()?;
    let len = match parts.next() {
        Some(n) => n.parse().ok()?,
        None => 1,
    };
    Some((start, len))
}
