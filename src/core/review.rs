//! Gerrit review-server adapter: query changes over SSH, download a patch
//! set into a working copy, resolve its conflicts and push it back.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Local, NaiveDate, TimeZone};
use owo_colors::OwoColorize;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::cli::{AppContext, CliError, ReviewArgs};
use crate::core::comments::{
    CommentApplier, CommentReport, CommentRewriter, InlineComment, open_comments,
};
use crate::core::git::{self, GitError};
use crate::core::resolve::{
    FileResolver, FileSummary, ModelSetup, ResolutionOrchestrator, conflicted_targets, report,
};
use crate::core::solver::{PromptPair, UploadChecker};
use crate::infra::config::Config;
use crate::infra::io::{read_text_file, write_lines};

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("unsupported --since value `{0}` (use \"N days ago\" or YYYY-MM-DD)")]
    Since(String),

    #[error("review i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("gerrit query failed: {0}")]
    Query(String),

    #[error(transparent)]
    Git(#[from] GitError),
}

/// Absolute `after:` timestamp for a relative or calendar `since`.
pub fn parse_since(since: &str, now: DateTime<Local>) -> Result<String, ReviewError> {
    let since = since.trim();
    let bad = || ReviewError::Since(since.to_string());

    let date = if since.ends_with("ago") {
        let mut parts = since.split_whitespace();
        let num: i64 = parts
            .next()
            .and_then(|n| n.parse().ok())
            .ok_or_else(bad)?;
        let days = match parts.next().ok_or_else(bad)? {
            "day" | "days" => num,
            "week" | "weeks" => num * 7,
            "month" | "months" => num * 30,
            "year" | "years" => num * 365,
            _ => return Err(bad()),
        };
        now - Duration::days(days)
    } else {
        let day = NaiveDate::parse_from_str(since, "%Y-%m-%d").map_err(|_| bad())?;
        let midnight = day.and_hms_opt(0, 0, 0).ok_or_else(bad)?;
        Local
            .from_local_datetime(&midnight)
            .earliest()
            .ok_or_else(bad)?
    };

    Ok(date.format("%Y-%m-%d %H:%M:%S %z").to_string())
}

#[derive(Debug, Clone, Deserialize)]
struct PatchSetRef {
    #[serde(rename = "ref")]
    reference: String,
    /// Present when queried with `--comments`
    #[serde(default)]
    comments: Vec<InlineComment>,
}

/// One change as returned by `gerrit query --format=json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub project: String,
    pub branch: String,
    pub number: u64,
    #[serde(rename = "id")]
    pub change_id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub status: String,
    pub url: String,
    #[serde(default)]
    pub created_on: i64,
    #[serde(default)]
    pub last_updated: i64,
    #[serde(default, skip_serializing)]
    current_patch_set: Option<PatchSetRef>,
}

impl ChangeRecord {
    /// Last component of the project path, used as the clone directory.
    pub fn project_dir(&self) -> &str {
        self.project
            .rsplit('/')
            .next()
            .unwrap_or(&self.project)
    }

    /// `refs/changes/NN/<number>/1`
    pub fn first_patch_set_ref(&self) -> String {
        format!("refs/changes/{:02}/{}/1", self.number % 100, self.number)
    }

    pub fn current_patch_set_ref(&self) -> Option<&str> {
        self.current_patch_set
            .as_ref()
            .map(|p| p.reference.as_str())
    }

    /// Inline comments on the current patch set.
    pub fn comments(&self) -> &[InlineComment] {
        self.current_patch_set
            .as_ref()
            .map(|p| p.comments.as_slice())
            .unwrap_or_default()
    }

    /// Project URL on the server, rewritten to the SSH host.
    pub fn clone_url(&self, host: &str) -> String {
        let base = match self.url.find("/c/") {
            Some(pos) => &self.url[..pos],
            None => self.url.trim_end_matches('/'),
        };
        rewrite_to_ssh(&format!("{base}/{}", self.project), host)
    }

    fn timestamp(secs: i64) -> String {
        DateTime::from_timestamp(secs, 0)
            .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default()
    }
}

/// Replace an `http(s)://server/` prefix with `ssh://<host>/`.
pub fn rewrite_to_ssh(url: &str, host: &str) -> String {
    match Regex::new(r"^https?://[^/]+/") {
        Ok(re) => re
            .replace(url, format!("ssh://{host}/").as_str())
            .into_owned(),
        Err(_) => url.to_string(),
    }
}

/// Keep the change lines of query output; the trailing stats line has no project.
pub fn parse_query_output(stdout: &str) -> Vec<ChangeRecord> {
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| match serde_json::from_str::<ChangeRecord>(l) {
            Ok(rec) => Some(rec),
            Err(e) => {
                debug!(error = %e, "skipping non-change query line");
                None
            }
        })
        .collect()
}

/// Query parameters after CLI/config merging.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub host: String,
    pub branch: String,
    pub status: String,
    pub since: String,
    pub numbers: Vec<String>,
    /// Ask for the current patch set with its inline comments
    pub comments: bool,
}

impl QueryOptions {
    /// Remote `gerrit query` arguments.
    pub fn remote_args(&self, now: DateTime<Local>) -> Result<Vec<String>, ReviewError> {
        let mut args = vec!["gerrit".to_string(), "query".to_string(), "--format=json".to_string()];

        let numbers: Vec<&String> = self
            .numbers
            .iter()
            .filter(|n| !n.trim().is_empty())
            .collect();
        if numbers.is_empty() {
            self.push_filters(&mut args, now)?;
        } else {
            args.extend(numbers.into_iter().cloned());
        }

        if self.comments {
            args.push("--comments".to_string());
            args.push("--current-patch-set".to_string());
        }
        Ok(args)
    }

    fn push_filters(
        &self,
        args: &mut Vec<String>,
        now: DateTime<Local>,
    ) -> Result<(), ReviewError> {
        let status = self
            .status
            .split('|')
            .filter(|s| !s.is_empty())
            .map(|s| format!("status:{s}"))
            .collect::<Vec<_>>()
            .join(" OR ");
        let after = parse_since(&self.since, now)?;

        args.push(format!("branch:{}", self.branch));
        args.push(format!("AND ({status})"));
        args.push(format!("'AND after:\"{after}\"'"));
        Ok(())
    }
}

#[instrument(skip_all, fields(host = %opts.host))]
pub fn query(opts: &QueryOptions) -> Result<Vec<ChangeRecord>, ReviewError> {
    let args = opts.remote_args(Local::now())?;
    debug!(?args, "gerrit query");

    let output = Command::new("ssh")
        .arg(&opts.host)
        .args(&args)
        .output()?;
    if !output.status.success() {
        return Err(ReviewError::Query(String::from_utf8_lossy(&output.stderr).trim().to_string()));
    }

    let records = parse_query_output(&String::from_utf8_lossy(&output.stdout));
    info!(count = records.len(), "changes found");
    Ok(records)
}

/// Clone the project into `<base>/<number>` and pull `patch_set` with
/// `--rebase`. Returns the working copy directory.
#[instrument(skip_all, fields(change = change.number, patch_set = %patch_set))]
pub fn download(
    change: &ChangeRecord,
    host: &str,
    base: &Path,
    patch_set: &str,
    renew: bool,
) -> Result<PathBuf, ReviewError> {
    let target = base.join(change.number.to_string());
    if renew && target.exists() {
        std::fs::remove_dir_all(&target)?;
    }
    std::fs::create_dir_all(&target)?;

    let url = change.clone_url(host);
    let workdir = target.join(change.project_dir());
    if !workdir.exists() {
        git::run_git(&target, &["clone", &url, "-b", &change.branch])?;
    }
    git::run_git(&workdir, &["pull", &url, patch_set, "--rebase"])?;
    Ok(workdir)
}

/// Stage everything, amend the change commit and push it for review.
pub fn upload(workdir: &Path, branch: &str) -> Result<(), ReviewError> {
    if !workdir.join(".git").exists() {
        warn!(dir = %workdir.display(), "not a git working copy, skipping upload");
        return Ok(());
    }
    git::run_git(workdir, &["add", "-A"])?;
    git::run_git(workdir, &["commit", "--amend", "--no-edit"])?;
    git::run_git(workdir, &["push", "origin", &format!("HEAD:refs/for/{branch}")])?;
    Ok(())
}

fn print_change(change: &ChangeRecord, ctx: &AppContext) {
    if ctx.quiet {
        return;
    }
    let title = format!("{} {}", change.number, change.subject);
    if ctx.no_color {
        println!("{title}");
    } else {
        println!("{}", title.bold());
    }
    println!("  project: {}", change.project);
    println!("  branch: {}", change.branch);
    println!("  status: {}", change.status);
    println!("  url: {}", change.url);
    println!("  created: {}", ChangeRecord::timestamp(change.created_on));
    println!("  updated: {}", ChangeRecord::timestamp(change.last_updated));
    if let Some(r) = change.current_patch_set_ref() {
        println!("  current patch set: {r}");
    }
}

/// CLI entry point for review command
pub fn run(args: ReviewArgs, cfg: &Config, ctx: &AppContext) -> Result<()> {
    let review = &cfg.review;
    let opts = QueryOptions {
        host: args.host.clone().unwrap_or_else(|| review.host.clone()),
        branch: args.branch.clone().unwrap_or_else(|| review.branch.clone()),
        status: args.status.clone().unwrap_or_else(|| review.status.clone()),
        since: args.since.clone().unwrap_or_else(|| review.since.clone()),
        numbers: args.numbers.clone(),
        comments: args.comments,
    };
    let base = args.download_dir.clone().unwrap_or_else(|| review.download_dir.clone());

    let changes = query(&opts).map_err(|e| match e {
        ReviewError::Since(_) => CliError::InvalidInput(e.to_string()),
        other => CliError::Vcs(other.into()),
    })?;

    if args.json {
        println!("{}", serde_json::to_string(&changes)?);
    } else {
        for change in &changes {
            print_change(change, ctx);
        }
    }

    let rework = args.resolve || args.comments;
    if ctx.dry_run || (!rework && args.download_dir.is_none()) {
        return Ok(());
    }

    let margin = args.region.margin.unwrap_or(cfg.margin);
    let merge_overlaps = args.region.merge_overlaps || cfg.merge_overlaps;
    let setup = if rework {
        Some(ModelSetup::from_overrides(
            cfg,
            args.backend,
            args.prompt_file.as_deref(),
            args.retries,
        )?)
    } else {
        None
    };
    let comment_prompt = match &setup {
        Some(setup) if args.comments => Some(setup.prompts.comment_modifier.as_ref().ok_or_else(|| {
            CliError::InvalidInput("prompt set has no comment_modifier prompt".to_string())
        })?),
        _ => None,
    };

    let mut summaries = Vec::new();
    for change in &changes {
        // inline comments belong to the current patch set
        let first = change.first_patch_set_ref();
        let patch_set = match change.current_patch_set_ref() {
            Some(current) if args.comments => current,
            _ => first.as_str(),
        };
        let workdir = download(change, &opts.host, &base, patch_set, args.renew)
            .map_err(|e| CliError::Vcs(e.into()))?;
        if !ctx.quiet && !args.json {
            println!("Downloaded {} to {}", change.number, workdir.display());
        }

        let Some(setup) = &setup else {
            continue;
        };

        let reworked = match comment_prompt {
            Some(prompt) => {
                let files = rework_comments(&workdir, change, setup, prompt, cfg, margin)?;
                print_comment_reports(change, &files, args.json, ctx)?;
                files.iter().any(CommentedFile::changed)
            }
            None => true,
        };
        let resolved = if args.resolve {
            resolve_working_copy(&workdir, setup, cfg, margin, merge_overlaps, &mut summaries)?
        } else {
            true
        };

        if args.upload && reworked && resolved {
            upload(&workdir, &change.branch).map_err(|e| CliError::Vcs(e.into()))?;
            if !ctx.quiet && !args.json {
                println!("Uploaded {} for review", change.number);
            }
        }
    }

    if args.resolve && setup.is_some() {
        return report(&summaries, args.json, ctx);
    }
    Ok(())
}

/// Comment outcomes for one file of a change.
#[derive(Debug, Clone, Serialize)]
pub struct CommentedFile {
    pub file: PathBuf,
    pub comments: Vec<CommentReport>,
}

impl CommentedFile {
    pub fn changed(&self) -> bool {
        self.comments.iter().any(|c| c.outcome.is_applied())
    }
}

/// Rework every file with open inline comments and write the changed ones.
fn rework_comments(
    workdir: &Path,
    change: &ChangeRecord,
    setup: &ModelSetup,
    prompt: &PromptPair,
    cfg: &Config,
    margin: usize,
) -> Result<Vec<CommentedFile>> {
    let rewriter = CommentRewriter::new(setup.client.as_ref(), prompt, setup.retries);
    let applier = CommentApplier::new(rewriter, margin)
        .with_diff_options(cfg.prioritize_diff, cfg.loose_apply);

    let mut files = Vec::new();
    for (name, comments) in open_comments(change.comments()) {
        let path = workdir.join(name);
        let Some(original) = read_text_file(&path) else {
            warn!(file = name, "commented file is missing from the working copy");
            continue;
        };

        let (lines, reports) = applier.apply(&original.lines, &comments);
        let file = CommentedFile { file: PathBuf::from(name), comments: reports };
        if file.changed() {
            write_lines(&path, &lines)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        files.push(file);
    }
    Ok(files)
}

fn print_comment_reports(
    change: &ChangeRecord,
    files: &[CommentedFile],
    json: bool,
    ctx: &AppContext,
) -> Result<()> {
    if json {
        let out = serde_json::json!({ "change": change.number, "comment_files": files });
        println!("{}", serde_json::to_string(&out)?);
        return Ok(());
    }
    if ctx.quiet {
        return Ok(());
    }
    for file in files {
        let applied = file.comments.iter().filter(|c| c.outcome.is_applied()).count();
        println!("{}: {applied}/{} comments applied", file.file.display(), file.comments.len());
        for c in file.comments.iter().filter(|c| !c.outcome.is_applied()) {
            let line = format!("  line {}: {:?}", c.line, c.outcome);
            if ctx.no_color {
                println!("{line}");
            } else {
                println!("{}", line.yellow());
            }
        }
    }
    Ok(())
}

/// Resolve every conflicted file of a working copy in place; each clean
/// resolution must also pass the upload check. True when all files resolved.
fn resolve_working_copy(
    workdir: &Path,
    setup: &ModelSetup,
    cfg: &Config,
    margin: usize,
    merge_overlaps: bool,
    summaries: &mut Vec<FileSummary>,
) -> Result<bool> {
    let orchestrator = ResolutionOrchestrator::from_config(cfg, margin);
    let resolver =
        FileResolver::new(&orchestrator, setup.solver(), margin, merge_overlaps, setup.retries);
    let checker = UploadChecker::new(setup.client.as_ref(), &setup.prompts, setup.retries);

    let mut all_resolved = true;
    for file in conflicted_targets(&[workdir.to_path_buf()], cfg)? {
        let Some(original) = read_text_file(&file) else {
            continue;
        };

        let outcome = resolver.resolve(&original.lines, |res| {
            write_lines(&file, &res.lines)?;
            let ok = checker
                .is_diff_ok(workdir, &file, &cfg.markers)
                .context("Upload check failed")?;
            if !ok {
                write_lines(&file, &original.lines)?;
            }
            Ok(ok)
        })?;
        let Some(outcome) = outcome else {
            continue;
        };

        all_resolved &= outcome.accepted;
        // accepted resolutions stay on disk
        summaries.push(FileSummary::from_outcome(&file, &outcome, outcome.accepted));
    }
    Ok(all_resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 7, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_since_relative_units() {
        let now = fixed_now();
        assert!(parse_since("2 days ago", now).unwrap().starts_with("2024-07-13 12:00:00"));
        assert!(parse_since("1 week ago", now).unwrap().starts_with("2024-07-08 12:00:00"));
        assert!(parse_since("1 month ago", now).unwrap().starts_with("2024-06-15 12:00:00"));
        assert!(parse_since("1 year ago", now).unwrap().starts_with("2023-07-16 12:00:00"));
    }

    #[test]
    fn test_parse_since_calendar_and_errors() {
        let now = fixed_now();
        assert!(parse_since("2024-01-02", now).unwrap().starts_with("2024-01-02 00:00:00"));
        assert!(matches!(parse_since("3 fortnights ago", now), Err(ReviewError::Since(_))));
        assert!(parse_since("yesterday", now).is_err());
    }

    const QUERY_OUTPUT: &str = concat!(
        r#"{"project":"platform/app","branch":"main","id":"I1234","number":12345,"#,
        r#""subject":"Fix parser","status":"NEW","#,
        r#""url":"http://review.example.com/c/platform/app/+/12345","#,
        r#""createdOn":1700000000,"lastUpdated":1700003600,"#,
        r#""currentPatchSet":{"number":3,"ref":"refs/changes/45/12345/3"}}"#,
        "\n",
        r#"{"type":"stats","rowCount":1,"runTimeMilliseconds":12}"#,
        "\n",
    );

    #[test]
    fn test_query_output_parsing() {
        let records = parse_query_output(QUERY_OUTPUT);
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.number, 12345);
        assert_eq!(rec.change_id, "I1234");
        assert_eq!(rec.project_dir(), "app");
        assert_eq!(rec.first_patch_set_ref(), "refs/changes/45/12345/1");
        assert_eq!(rec.current_patch_set_ref(), Some("refs/changes/45/12345/3"));

        let short = ChangeRecord { number: 7, ..rec.clone() };
        assert_eq!(short.first_patch_set_ref(), "refs/changes/07/7/1");
    }

    #[test]
    fn test_clone_url_is_rewritten_to_ssh_host() {
        let rec = &parse_query_output(QUERY_OUTPUT)[0];
        assert_eq!(rec.clone_url("gerrit-ssh"), "ssh://gerrit-ssh/platform/app");
        assert_eq!(rewrite_to_ssh("ssh://other/x", "h"), "ssh://other/x");
    }

    #[test]
    fn test_remote_args_by_filter_and_by_number() {
        let mut opts = QueryOptions {
            host: "gerrit-ssh".to_string(),
            branch: "main".to_string(),
            status: "merged|open".to_string(),
            since: "2024-01-02".to_string(),
            numbers: Vec::new(),
            comments: false,
        };
        let args = opts.remote_args(fixed_now()).unwrap();
        assert_eq!(&args[..3], ["gerrit", "query", "--format=json"]);
        assert_eq!(args[3], "branch:main");
        assert_eq!(args[4], "AND (status:merged OR status:open)");
        assert!(args[5].starts_with("'AND after:\"2024-01-02 00:00:00"));

        opts.numbers = vec!["42".to_string(), String::new()];
        let args = opts.remote_args(fixed_now()).unwrap();
        assert_eq!(args, ["gerrit", "query", "--format=json", "42"]);

        opts.comments = true;
        let args = opts.remote_args(fixed_now()).unwrap();
        assert_eq!(args[3..], ["42", "--comments", "--current-patch-set"]);
    }

    #[test]
    fn test_current_patch_set_comments_are_parsed() {
        let line = serde_json::json!({
            "project": "platform/app",
            "branch": "main",
            "id": "I9",
            "number": 9,
            "url": "http://r/c/platform/app/+/9",
            "currentPatchSet": {
                "number": 2,
                "ref": "refs/changes/09/9/2",
                "comments": [
                    {"file": "src/a.rs", "line": 3, "message": "rename"},
                    {"file": "/PATCHSET_LEVEL", "line": 0, "message": "ok"}
                ]
            }
        })
        .to_string();
        let rec = &parse_query_output(&line)[0];
        assert_eq!(rec.current_patch_set_ref(), Some("refs/changes/09/9/2"));
        assert_eq!(rec.comments().len(), 2);
        assert_eq!(rec.comments()[0].message, "rename");

        let open = open_comments(rec.comments());
        assert_eq!(open.len(), 1);
        assert_eq!(open["src/a.rs"][0].line, 3);

        let bare = &parse_query_output(QUERY_OUTPUT)[0];
        assert!(bare.comments().is_empty());
    }
}
