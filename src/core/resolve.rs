//! Conflict resolution across a whole file.
//!
//! [`ResolutionOrchestrator`] turns one candidate per region into a resolved
//! buffer by trying two strategies:
//! 1. Per-region: materialize each candidate against its section and splice
//!    it with the region's captured context
//! 2. Whole-file: run the concatenated candidates as one diff over the file
//!
//! Per-region wins when it leaves no residual markers, then whole-file; if
//! both leave markers the per-region buffer is reported unresolved.
//!
//! [`FileResolver`] wraps that in the model query and retry loop used by the
//! `resolve` and `review` commands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indexmap::IndexSet;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use serde::Serialize;
use similar::TextDiff;
use tracing::{debug, info, instrument, warn};

use crate::cli::{AppContext, ApplyArgs, CliError, ResolveArgs};
use crate::core::anchor::{AnchorMatcher, SpliceOutcome};
use crate::core::candidate::ReplacementCandidate;
use crate::core::conflict::{self, ConflictRegion, MarkerSet, find_residual_markers};
use crate::core::diff_apply::apply_true_diff;
use crate::core::git;
use crate::core::solver::{MergeConflictSolver, PromptSet};
use crate::infra::config::Config;
use crate::infra::io::{TextFile, read_text_file, write_lines};
use crate::infra::walk::{FileWalker, likely_has_conflict_markers};
use crate::llm::{ModelClient, client_from_env};

/// Which strategy produced the final buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    PerRegion,
    WholeFile,
}

/// What happened to one region during per-region splicing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionReport {
    pub index: usize,
    /// 1-based inclusive marker lines in the original file
    pub line_range: (usize, usize),
    /// `None` when no candidate was available
    pub outcome: Option<SpliceOutcome>,
    pub absorbed: usize,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub lines: Vec<String>,
    pub resolved: bool,
    pub strategy: Strategy,
    pub regions: Vec<RegionReport>,
    /// 0-based indices of marker lines left in `lines`
    pub residual: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct ResolutionOrchestrator {
    matcher: AnchorMatcher,
    markers: MarkerSet,
    prioritize_diff: bool,
    loose_apply: bool,
}

impl ResolutionOrchestrator {
    pub fn new(margin: usize, markers: MarkerSet) -> Self {
        Self {
            matcher: AnchorMatcher::new(margin),
            markers,
            prioritize_diff: false,
            loose_apply: false,
        }
    }

    /// Diff application flags used when materializing diff-shaped candidates.
    pub fn with_diff_flags(mut self, prioritize_diff: bool, loose_apply: bool) -> Self {
        self.prioritize_diff = prioritize_diff;
        self.loose_apply = loose_apply;
        self
    }

    pub fn from_config(cfg: &Config, margin: usize) -> Self {
        Self::new(margin, cfg.markers.clone()).with_diff_flags(cfg.prioritize_diff, cfg.loose_apply)
    }

    pub fn markers(&self) -> &MarkerSet {
        &self.markers
    }

    /// Concrete replacement lines for `section`.
    pub fn materialize(&self, section: &[String], candidate: &ReplacementCandidate) -> Vec<String> {
        match candidate {
            ReplacementCandidate::Literal(lines) => lines.clone(),
            ReplacementCandidate::Diff(diff) => {
                apply_true_diff(section, diff, self.prioritize_diff, self.loose_apply)
            }
        }
    }

    /// Resolve `lines` given one optional candidate per region (same order).
    #[instrument(skip_all, fields(regions = regions.len()))]
    pub fn solve(
        &self,
        lines: &[String],
        regions: &[ConflictRegion],
        candidates: &[Option<ReplacementCandidate>],
    ) -> Resolution {
        let (per_region, reports) = self.per_region(lines, regions, candidates);
        let residual = find_residual_markers(&per_region, &self.markers);
        if residual.is_empty() {
            debug!("per-region replacement is clean");
            return Resolution {
                lines: per_region,
                resolved: true,
                strategy: Strategy::PerRegion,
                regions: reports,
                residual,
            };
        }

        let whole = self.whole_file(lines, candidates);
        if find_residual_markers(&whole, &self.markers).is_empty() {
            debug!(per_region_residual = residual.len(), "whole-file diff is clean");
            return Resolution {
                lines: whole,
                resolved: true,
                strategy: Strategy::WholeFile,
                regions: reports,
                residual: Vec::new(),
            };
        }

        info!(residual = residual.len(), "both strategies left conflict markers");
        Resolution {
            lines: per_region,
            resolved: false,
            strategy: Strategy::PerRegion,
            regions: reports,
            residual,
        }
    }

    fn per_region(
        &self,
        lines: &[String],
        regions: &[ConflictRegion],
        candidates: &[Option<ReplacementCandidate>],
    ) -> (Vec<String>, Vec<RegionReport>) {
        let mut buffer = lines.to_vec();
        let mut reports = Vec::with_capacity(regions.len());

        for (index, region) in regions.iter().enumerate() {
            let line_range = (region.start + 1, region.end);
            let Some(candidate) = candidates.get(index).and_then(Option::as_ref) else {
                debug!(index, "no candidate for region");
                reports.push(RegionReport { index, line_range, outcome: None, absorbed: 0 });
                continue;
            };

            // Context is captured from the original so shifted regions still re-anchor
            let info = region.splice_info(lines);
            let replacement = self.materialize(region.section(lines), candidate);
            let splice = self
                .matcher
                .replace_conflict_section_ex(&buffer, &replacement, &info);

            debug!(index, outcome = ?splice.outcome, absorbed = splice.absorbed, "region spliced");
            reports.push(RegionReport {
                index,
                line_range,
                outcome: Some(splice.outcome),
                absorbed: splice.absorbed,
            });
            buffer = splice.lines;
        }

        (buffer, reports)
    }

    fn whole_file(
        &self,
        lines: &[String],
        candidates: &[Option<ReplacementCandidate>],
    ) -> Vec<String> {
        let diff: Vec<String> = candidates
            .iter()
            .flatten()
            .flat_map(|c| c.lines().iter().cloned())
            .collect();
        apply_true_diff(lines, &diff, false, false)
    }
}

/// Final state of a file after the retry loop.
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub regions: usize,
    pub resolution: Resolution,
    pub attempts: usize,
    pub accepted: bool,
}

/// Queries the model per region and retries whole-file passes until a
/// resolution is clean and accepted.
pub struct FileResolver<'a> {
    orchestrator: &'a ResolutionOrchestrator,
    solver: MergeConflictSolver<'a>,
    margin: usize,
    merge_overlaps: bool,
    attempts: usize,
}

impl<'a> FileResolver<'a> {
    pub fn new(
        orchestrator: &'a ResolutionOrchestrator,
        solver: MergeConflictSolver<'a>,
        margin: usize,
        merge_overlaps: bool,
        attempts: usize,
    ) -> Self {
        Self { orchestrator, solver, margin, merge_overlaps, attempts: attempts.max(1) }
    }

    /// Every attempt restarts from `original`. `accept` sees each clean
    /// resolution and can veto it. `None` when the file has no conflicts.
    pub fn resolve<F>(&self, original: &[String], mut accept: F) -> Result<Option<FileOutcome>>
    where
        F: FnMut(&Resolution) -> Result<bool>,
    {
        let markers = self.orchestrator.markers();
        let regions = conflict::extract(original, markers, self.margin, self.merge_overlaps);
        if regions.is_empty() {
            return Ok(None);
        }

        let mut last = None;
        for attempt in 1..=self.attempts {
            let candidates: Vec<Option<ReplacementCandidate>> = regions
                .iter()
                .map(|r| {
                    let section = r.section(original).join("\n");
                    self.solver
                        .query(&section)
                        .and_then(|reply| ReplacementCandidate::from_reply(&reply))
                })
                .collect();

            let resolution = self.orchestrator.solve(original, &regions, &candidates);
            if resolution.resolved && accept(&resolution)? {
                debug!(attempt, "resolution accepted");
                return Ok(Some(FileOutcome {
                    regions: regions.len(),
                    resolution,
                    attempts: attempt,
                    accepted: true,
                }));
            }

            warn!(attempt, residual = resolution.residual.len(), "resolution rejected");
            last = Some(FileOutcome {
                regions: regions.len(),
                resolution,
                attempts: attempt,
                accepted: false,
            });
        }
        Ok(last)
    }
}

/// Files to work on: explicit files as given, directories walked for
/// column-0 start markers plus git's unmerged entries beneath them.
pub fn conflicted_targets(paths: &[PathBuf], cfg: &Config) -> Result<Vec<PathBuf>> {
    let walker = FileWalker::new(&cfg.ignore_patterns).context("Invalid ignore pattern")?;
    let mut out: IndexSet<PathBuf> = IndexSet::new();

    for path in paths {
        if path.is_file() {
            out.insert(path.clone());
            continue;
        }
        if !path.is_dir() {
            let missing = format!("Path not found: {}", path.display());
            return Err(CliError::InvalidInput(missing).into());
        }

        out.extend(walker.conflicted_files(path, &cfg.markers));

        let Some(repo) = git::discover_repo_root(path) else {
            continue;
        };
        let base = dunce::canonicalize(path).unwrap_or_else(|_| path.clone());
        match git::unmerged_files(&repo) {
            Ok(files) => {
                for abs in files {
                    let Ok(rel) = abs.strip_prefix(&base) else {
                        continue;
                    };
                    let candidate = path.join(rel);
                    if candidate.is_file()
                        && likely_has_conflict_markers(&candidate, &cfg.markers)
                    {
                        out.insert(candidate);
                    }
                }
            }
            Err(e) => debug!(error = %e, "git status unavailable"),
        }
    }

    Ok(out.into_iter().collect())
}

/// Machine-readable per-file result.
#[derive(Debug, Serialize)]
pub struct FileSummary {
    pub file: PathBuf,
    pub regions: usize,
    pub resolved: bool,
    /// Clean resolution vetoed by the accept hook on every attempt
    pub rejected: bool,
    pub strategy: Option<Strategy>,
    pub attempts: usize,
    pub written: bool,
    /// 1-based lines still holding markers
    pub residual_lines: Vec<usize>,
    pub splices: Vec<RegionReport>,
}

impl FileSummary {
    pub fn from_outcome(file: &Path, outcome: &FileOutcome, written: bool) -> Self {
        let res = &outcome.resolution;
        Self {
            file: file.to_path_buf(),
            regions: outcome.regions,
            resolved: res.resolved && outcome.accepted,
            rejected: res.resolved && !outcome.accepted,
            strategy: Some(res.strategy),
            attempts: outcome.attempts,
            written,
            residual_lines: res.residual.iter().map(|i| i + 1).collect(),
            splices: res.regions.clone(),
        }
    }
}

/// Unified diff of the original against the resolved lines.
pub fn render_preview(file: &Path, original: &[String], resolved: &[String]) -> String {
    let old = original.join("\n") + "\n";
    let new = resolved.join("\n") + "\n";
    let name = file.display().to_string();
    TextDiff::from_lines(&old, &new)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{name}"), &format!("b/{name}"))
        .to_string()
}

fn print_preview(text: &str, ctx: &AppContext) {
    for line in text.lines() {
        if ctx.no_color {
            println!("{line}");
        } else if line.starts_with('+') && !line.starts_with("+++") {
            println!("{}", line.green());
        } else if line.starts_with('-') && !line.starts_with("---") {
            println!("{}", line.red());
        } else if line.starts_with("@@") {
            println!("{}", line.cyan());
        } else {
            println!("{line}");
        }
    }
}

/// Persist or preview one file's outcome.
fn finish_file(
    file: &Path,
    original: &TextFile,
    outcome: &FileOutcome,
    write: bool,
    json: bool,
    ctx: &AppContext,
) -> Result<FileSummary> {
    let res = &outcome.resolution;
    let mut written = false;

    if res.resolved && write && !ctx.dry_run {
        write_lines(file, &res.lines)
            .with_context(|| format!("Failed to write {}", file.display()))?;
        written = true;
    } else if !json && !ctx.quiet && res.lines != original.lines {
        print_preview(&render_preview(file, &original.lines, &res.lines), ctx);
    }

    Ok(FileSummary::from_outcome(file, outcome, written))
}

/// Print summaries (text or one JSON line) and map unresolved files to exit code 2.
pub fn report(summaries: &[FileSummary], json: bool, ctx: &AppContext) -> Result<()> {
    let unresolved = summaries.iter().filter(|s| !s.resolved).count();

    if json {
        let written: Vec<&PathBuf> = summaries
            .iter()
            .filter(|s| s.written)
            .map(|s| &s.file)
            .collect();
        let output = serde_json::json!({
            "schema_version": "1",
            "total_files": summaries.len(),
            "written_files": written,
            "exit_code": if unresolved > 0 { 2 } else { 0 },
            "files": summaries
        });
        println!("{}", serde_json::to_string(&output)?);
    } else {
        print_resolution_summary(summaries, ctx);
    }

    if unresolved > 0 {
        return Err(CliError::Unresolved(unresolved).into());
    }
    Ok(())
}

fn print_resolution_summary(summaries: &[FileSummary], ctx: &AppContext) {
    if ctx.quiet {
        return;
    }

    let total_regions: usize = summaries.iter().map(|s| s.regions).sum();
    let resolved = summaries.iter().filter(|s| s.resolved).count();

    println!("Conflict Resolution Summary:");
    println!("  Files with conflicts: {}", summaries.len());
    println!("  Conflict regions: {}", total_regions);
    println!("  Files resolved: {}", resolved);
    println!();

    for summary in summaries {
        let status = match (summary.resolved, summary.rejected) {
            (true, _) => "resolved",
            (false, true) => "rejected by upload check",
            (false, false) => "unresolved",
        };
        let status = if ctx.no_color {
            status.to_string()
        } else if summary.resolved {
            status.green().to_string()
        } else {
            status.red().to_string()
        };
        println!("{}: {}", summary.file.display(), status);

        for splice in &summary.splices {
            let tier = match splice.outcome {
                Some(SpliceOutcome::Full) => "full window",
                Some(SpliceOutcome::Partial { .. }) => "anchored",
                Some(SpliceOutcome::MarkersNotFound) => "markers not found",
                Some(SpliceOutcome::AnchorNotFound) => "no anchor",
                None => "no candidate",
            };
            println!("  lines {}-{}: {}", splice.line_range.0, splice.line_range.1, tier);
        }
        if !summary.residual_lines.is_empty() {
            println!("  markers left at lines {:?}", summary.residual_lines);
        }
        if summary.written {
            println!("  Wrote resolution to file");
        }
        println!();
    }

    if resolved < summaries.len() {
        println!("{} file(s) still need manual resolution", summaries.len() - resolved);
        println!("  Run `mend check` after editing to verify");
    }
}

fn spinner(ctx: &AppContext, json: bool) -> ProgressBar {
    if ctx.quiet || json {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    pb
}

/// Everything needed to build a [`FileResolver`] from CLI overrides.
pub struct ModelSetup {
    pub client: Box<dyn ModelClient>,
    pub prompts: PromptSet,
    pub retries: usize,
}

impl ModelSetup {
    pub fn from_overrides(
        cfg: &Config,
        backend: Option<crate::llm::Backend>,
        prompt_file: Option<&Path>,
        retries: Option<usize>,
    ) -> Result<Self> {
        let mut model = cfg.model.clone();
        if let Some(b) = backend {
            model.backend = b;
        }
        let prompt_path = prompt_file.or(model.prompt_file.as_deref());
        let prompts =
            PromptSet::load(prompt_path).map_err(|e| CliError::InvalidInput(format!("{e:#}")))?;
        let client = client_from_env(&model).map_err(|e| CliError::Internal(e.into()))?;
        Ok(Self { client, prompts, retries: retries.unwrap_or(cfg.retry_budget) })
    }

    pub fn solver(&self) -> MergeConflictSolver<'_> {
        MergeConflictSolver::new(self.client.as_ref(), &self.prompts, self.retries)
    }
}

/// CLI entry point for the resolve command
pub fn run(args: ResolveArgs, cfg: &Config, ctx: &AppContext) -> Result<()> {
    let margin = args.region.margin.unwrap_or(cfg.margin);
    let merge_overlaps = args.region.merge_overlaps || cfg.merge_overlaps;

    let files = conflicted_targets(&args.paths, cfg)?;
    if files.is_empty() {
        if !ctx.quiet {
            if args.json {
                println!("{{\"message\": \"No conflicts found\", \"files\": []}}");
            } else {
                println!("No conflicts found in specified paths.");
            }
        }
        return Ok(());
    }

    let setup =
        ModelSetup::from_overrides(cfg, args.backend, args.prompt_file.as_deref(), args.retries)?;
    let orchestrator = ResolutionOrchestrator::from_config(cfg, margin);
    let resolver =
        FileResolver::new(&orchestrator, setup.solver(), margin, merge_overlaps, setup.retries);

    let progress = spinner(ctx, args.json);
    let mut summaries = Vec::new();

    for file in &files {
        progress.set_message(format!("Resolving {}", file.display()));
        let Some(original) = read_text_file(file) else {
            warn!(path = %file.display(), "skipping unreadable or non-UTF-8 file");
            continue;
        };
        let Some(outcome) = resolver.resolve(&original.lines, |_| Ok(true))? else {
            debug!(path = %file.display(), "no complete conflict regions");
            continue;
        };
        let summary = progress
            .suspend(|| finish_file(file, &original, &outcome, args.write, args.json, ctx))?;
        summaries.push(summary);
    }

    progress.finish_and_clear();
    report(&summaries, args.json, ctx)
}

/// CLI entry point for the apply command: replies come from files, one per region.
pub fn run_apply(args: ApplyArgs, cfg: &Config, ctx: &AppContext) -> Result<()> {
    let margin = args.region.margin.unwrap_or(cfg.margin);
    let merge_overlaps = args.region.merge_overlaps || cfg.merge_overlaps;

    let original = read_text_file(&args.file).ok_or_else(|| {
        CliError::InvalidInput(format!("Cannot read {} as UTF-8 text", args.file.display()))
    })?;

    let candidates = args
        .replies
        .iter()
        .map(|path| {
            std::fs::read_to_string(path)
                .map(|text| ReplacementCandidate::from_reply(&text))
                .map_err(|e| {
                    CliError::InvalidInput(format!("Failed to read reply {}: {e}", path.display()))
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let orchestrator = ResolutionOrchestrator::from_config(cfg, margin);
    let regions =
        conflict::extract(&original.lines, orchestrator.markers(), margin, merge_overlaps);
    if regions.is_empty() {
        if !ctx.quiet {
            println!("No conflicts found in {}.", args.file.display());
        }
        return Ok(());
    }
    if candidates.len() != regions.len() {
        warn!(
            regions = regions.len(),
            replies = candidates.len(),
            "reply count differs from region count"
        );
    }

    let resolution = orchestrator.solve(&original.lines, &regions, &candidates);
    let outcome = FileOutcome { regions: regions.len(), resolution, attempts: 1, accepted: true };
    let summary = finish_file(&args.file, &original, &outcome, args.write, args.json, ctx)?;
    report(&[summary], args.json, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedClient;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    fn orchestrator(margin: usize) -> ResolutionOrchestrator {
        ResolutionOrchestrator::new(margin, MarkerSet::default())
    }

    fn regions(lines: &[String], margin: usize) -> Vec<ConflictRegion> {
        conflict::extract(lines, &MarkerSet::default(), margin, false)
    }

    #[test]
    fn test_end_to_end_literal_scenario() {
        let file = s(&["a", "<<<<<<<", "b", "=======", "c", ">>>>>>>", "d"]);
        let regs = regions(&file, 10);
        let cand = Some(ReplacementCandidate::Literal(s(&["b", "x", "c"])));

        let res = orchestrator(10).solve(&file, &regs, &[cand]);
        assert_eq!(res.lines, s(&["a", "b", "x", "c", "d"]));
        assert!(res.resolved);
        assert_eq!(res.strategy, Strategy::PerRegion);
    }

    #[test]
    fn test_diff_candidate_is_materialized_against_section() {
        let file = s(&["x", "<<<<<<< HEAD", "one", "=======", "two", ">>>>>>> br", "y"]);
        let regs = regions(&file, 10);
        let diff = ReplacementCandidate::Diff(s(&[
            " x",
            "-<<<<<<< HEAD",
            "-one",
            "-=======",
            " two",
            "->>>>>>> br",
            " y",
        ]));

        let res = orchestrator(10).solve(&file, &regs, &[Some(diff)]);
        assert_eq!(res.lines, s(&["x", "two", "y"]));
        assert_eq!(res.regions[0].outcome, Some(SpliceOutcome::Full));
    }

    #[test]
    fn test_later_regions_reanchor_after_shift() {
        let mut file = s(&["a0", "<<<<<<< HEAD", "one", "=======", "two", ">>>>>>> br"]);
        file.extend(s(&["a1", "a2", "a3", "a4", "a5"]));
        file.extend(s(&["<<<<<<< HEAD", "three", "=======", "four", ">>>>>>> br", "a6"]));
        let regs = regions(&file, 2);
        assert_eq!(regs.len(), 2);

        let first = ReplacementCandidate::Diff(s(&[
            " a0",
            "-<<<<<<< HEAD",
            " one",
            "+one-and-a-half",
            "-=======",
            "-two",
            "->>>>>>> br",
            " a1",
            " a2",
        ]));
        let second = ReplacementCandidate::Literal(s(&["a4", "a5", "three", "four", "a6"]));

        let res = orchestrator(2).solve(&file, &regs, &[Some(first), Some(second)]);
        assert!(res.resolved);
        assert_eq!(
            res.lines,
            s(&["a0", "one", "one-and-a-half", "a1", "a2", "a3", "a4", "a5", "three", "four", "a6"])
        );
    }

    #[test]
    fn test_whole_file_used_when_per_region_leaves_markers() {
        let file = s(&["ctx", "<<<<<<<", "one", "=======", "two", ">>>>>>>", "after"]);
        let regs = regions(&file, 0);
        // context lives outside the zero-margin section, so only the whole-file pass can use it
        let diff = ReplacementCandidate::Diff(s(&[
            " ctx",
            "-<<<<<<<",
            " one",
            "-=======",
            "-two",
            "->>>>>>>",
            " after",
        ]));

        let res = orchestrator(0).solve(&file, &regs, &[Some(diff)]);
        assert!(res.resolved);
        assert_eq!(res.strategy, Strategy::WholeFile);
        assert_eq!(res.lines, s(&["ctx", "one", "after"]));
    }

    #[test]
    fn test_missing_candidates_leave_file_unresolved() {
        let file = s(&["a", "<<<<<<<", "b", "=======", "c", ">>>>>>>", "d"]);
        let regs = regions(&file, 10);

        let res = orchestrator(10).solve(&file, &regs, &[None]);
        assert!(!res.resolved);
        assert_eq!(res.strategy, Strategy::PerRegion);
        assert_eq!(res.lines, file);
        assert_eq!(res.residual, vec![1, 3, 5]);
        assert_eq!(res.regions[0].outcome, None);
    }

    #[test]
    fn test_diff_remnant_keeps_file_unresolved() {
        let file = s(&["a", "<<<<<<<", "b", "=======", "c", ">>>>>>>", "d"]);
        let regs = regions(&file, 10);
        // the stray `-=======` survives the full-window splice, and the
        // whole-file pass keeps the start and end markers
        let cand = ReplacementCandidate::Literal(s(&["a", "b", "-=======", "d"]));

        let res = orchestrator(10).solve(&file, &regs, &[Some(cand)]);
        assert!(!res.resolved);
        assert_eq!(res.strategy, Strategy::PerRegion);
        assert_eq!(res.lines, s(&["a", "b", "-=======", "d"]));
        assert_eq!(res.residual, vec![2]);
        assert_eq!(find_residual_markers(&res.lines, &MarkerSet::default()), vec![2]);
    }

    #[test]
    fn test_vetoed_resolution_is_reported_unresolved() {
        let file = s(&["a", "<<<<<<< HEAD", "b", "=======", "c", ">>>>>>> br", "d"]);
        let good = "```diff\n a\n-<<<<<<< HEAD\n b\n-=======\n c\n->>>>>>> br\n d\n```";
        let client = ScriptedClient::new([Some(good), Some(good)]);
        let prompts = PromptSet::builtin().unwrap();
        let orch = orchestrator(10);
        let solver = MergeConflictSolver::new(&client, &prompts, 1);
        let resolver = FileResolver::new(&orch, solver, 10, false, 2);

        let outcome = resolver
            .resolve(&file, |_| Ok(false))
            .unwrap()
            .unwrap();
        assert!(!outcome.accepted);
        assert!(outcome.resolution.resolved);

        let summary = FileSummary::from_outcome(Path::new("f.rs"), &outcome, false);
        assert!(!summary.resolved);
        assert!(summary.rejected);

        let ctx = AppContext { quiet: true, no_color: true, dry_run: false };
        let err = report(&[summary], false, &ctx).unwrap_err();
        assert!(matches!(err.downcast_ref::<CliError>(), Some(CliError::Unresolved(1))));
    }

    #[test]
    fn test_file_resolver_retries_from_original() {
        let file = s(&["a", "<<<<<<< HEAD", "b", "=======", "c", ">>>>>>> br", "d"]);
        let good = "```diff\n a\n-<<<<<<< HEAD\n b\n-=======\n c\n->>>>>>> br\n d\n```";
        let client = ScriptedClient::new([Some(good), Some(good)]);
        let prompts = PromptSet::builtin().unwrap();
        let orch = orchestrator(10);
        let solver = MergeConflictSolver::new(&client, &prompts, 1);
        let resolver = FileResolver::new(&orch, solver, 10, false, 2);

        // first clean resolution is vetoed, the second accepted
        let mut calls = 0;
        let outcome = resolver
            .resolve(&file, |res| {
                calls += 1;
                assert_eq!(res.lines, s(&["a", "b", "c", "d"]));
                Ok(calls > 1)
            })
            .unwrap()
            .unwrap();

        assert!(outcome.accepted);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(client.prompts.borrow().len(), 2);
    }

    #[test]
    fn test_file_resolver_without_conflicts() {
        let client = ScriptedClient::new(Vec::<Option<&str>>::new());
        let prompts = PromptSet::builtin().unwrap();
        let orch = orchestrator(10);
        let solver = MergeConflictSolver::new(&client, &prompts, 1);
        let resolver = FileResolver::new(&orch, solver, 10, false, 3);
        assert!(resolver.resolve(&s(&["clean"]), |_| Ok(true)).unwrap().is_none());
    }

    #[test]
    fn test_preview_is_unified_diff() {
        let preview =
            render_preview(Path::new("f.txt"), &s(&["a", "<<<<<<<", "b"]), &s(&["a", "b"]));
        assert!(preview.contains("--- a/f.txt"));
        assert!(preview.contains("+++ b/f.txt"));
        assert!(preview.contains("-<<<<<<<"));
    }
}
