//! Read-only commands: `extract` lists conflict regions, `check` reports
//! leftover markers with source diagnostics.

use std::path::PathBuf;

use anyhow::{Context, Result};
use miette::{Diagnostic, GraphicalReportHandler, GraphicalTheme, SourceSpan};
use owo_colors::OwoColorize;
use serde::Serialize;

use crate::cli::{AppContext, CheckArgs, CliError, ExtractArgs};
use crate::core::conflict::{self, ConflictRegion, MarkerSet, find_residual_markers};
use crate::core::resolve::conflicted_targets;
use crate::infra::config::Config;
use crate::infra::io::read_lines;
use crate::infra::walk::FileWalker;

/// A marker line that survived resolution.
#[derive(Debug, Diagnostic, thiserror::Error)]
#[error("Conflict marker left in {file}:{line}")]
#[diagnostic(code(mend::residual_marker))]
pub struct ResidualMarkerError {
    pub file: String,
    pub line: usize,

    #[source_code]
    pub src: String,

    #[label("marker still present")]
    pub span: SourceSpan,

    #[help]
    pub help: String,
}

impl ResidualMarkerError {
    /// Diagnostic for 0-based line `index` of `lines`.
    pub fn new(file: &str, lines: &[String], index: usize) -> Self {
        let offset: usize = lines[..index].iter().map(|l| l.len() + 1).sum();
        Self {
            file: file.to_string(),
            line: index + 1,
            src: lines.join("\n"),
            span: (offset, lines[index].len()).into(),
            help: "resolve the conflict by hand or rerun `mend resolve`, then remove the marker"
                .to_string(),
        }
    }

    pub fn render(&self, no_color: bool) -> String {
        let theme = if no_color {
            GraphicalTheme::unicode_nocolor()
        } else {
            GraphicalTheme::default()
        };
        let mut out = String::new();
        if GraphicalReportHandler::new_themed(theme)
            .render_report(&mut out, self)
            .is_err()
        {
            out = format!("{self}\n");
        }
        out
    }
}

/// One region as reported by `extract` (1-based inclusive lines).
#[derive(Debug, Serialize)]
pub struct RegionEntry {
    pub start_line: usize,
    pub end_line: usize,
    pub context_start_line: usize,
    pub context_end_line: usize,
}

impl From<&ConflictRegion> for RegionEntry {
    fn from(r: &ConflictRegion) -> Self {
        Self {
            start_line: r.start + 1,
            end_line: r.end,
            context_start_line: r.margined_start + 1,
            context_end_line: r.margined_end,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ExtractEntry {
    pub file: PathBuf,
    pub regions: Vec<RegionEntry>,
}

/// CLI entry point for extract command
pub fn run_extract(args: ExtractArgs, cfg: &Config, ctx: &AppContext) -> Result<()> {
    let margin = args.region.margin.unwrap_or(cfg.margin);
    let merge_overlaps = args.region.merge_overlaps || cfg.merge_overlaps;

    let mut entries = Vec::new();
    for file in conflicted_targets(&args.paths, cfg)? {
        let lines = read_lines(&file);
        let regions = conflict::extract(&lines, &cfg.markers, margin, merge_overlaps);
        if regions.is_empty() {
            continue;
        }

        if !args.json && !ctx.quiet {
            print_regions(&file, &lines, &regions, ctx);
        }
        entries.push(ExtractEntry {
            file,
            regions: regions.iter().map(RegionEntry::from).collect(),
        });
    }

    if args.json {
        let output = serde_json::json!({
            "schema_version": "1",
            "total_files": entries.len(),
            "files": entries
        });
        println!("{}", serde_json::to_string(&output)?);
    } else if entries.is_empty() && !ctx.quiet {
        println!("No conflicts found in specified paths.");
    }
    Ok(())
}

fn print_regions(
    file: &std::path::Path,
    lines: &[String],
    regions: &[ConflictRegion],
    ctx: &AppContext,
) {
    let header = format!("{}: {} conflict region(s)", file.display(), regions.len());
    if ctx.no_color {
        println!("{header}");
    } else {
        println!("{}", header.bold());
    }

    for (i, region) in regions.iter().enumerate() {
        println!(
            "---conflict_section---{} (lines {}-{}, context {}-{})",
            i,
            region.start + 1,
            region.end,
            region.margined_start + 1,
            region.margined_end
        );
        for (n, line) in region.section(lines).iter().enumerate() {
            println!("{:>6} | {}", region.margined_start + n + 1, line);
        }
    }
    println!();
}

#[derive(Debug, Serialize)]
struct CheckEntry {
    file: PathBuf,
    lines: Vec<usize>,
}

/// Residual marker lines (0-based) of every readable text file under `paths`.
fn scan_residuals(
    args: &CheckArgs,
    walker: &FileWalker,
    markers: &MarkerSet,
) -> Result<Vec<(PathBuf, Vec<String>, Vec<usize>)>> {
    let mut found = Vec::new();
    for path in &args.paths {
        let files = if path.is_file() {
            vec![path.clone()]
        } else if path.is_dir() {
            walker.walk_files(path)
        } else {
            let missing = format!("Path not found: {}", path.display());
            return Err(CliError::InvalidInput(missing).into());
        };

        for file in files {
            let lines = read_lines(&file);
            let hits = find_residual_markers(&lines, markers);
            if !hits.is_empty() {
                found.push((file, lines, hits));
            }
        }
    }
    Ok(found)
}

/// CLI entry point for check command
pub fn run_check(args: CheckArgs, cfg: &Config, ctx: &AppContext) -> Result<()> {
    let walker = FileWalker::new(&cfg.ignore_patterns).context("Invalid ignore pattern")?;
    let found = scan_residuals(&args, &walker, &cfg.markers)?;

    if args.json {
        let entries: Vec<CheckEntry> = found
            .iter()
            .map(|(file, _, hits)| CheckEntry {
                file: file.clone(),
                lines: hits.iter().map(|i| i + 1).collect(),
            })
            .collect();
        let output = serde_json::json!({
            "schema_version": "1",
            "files": entries,
            "exit_code": if found.is_empty() { 0 } else { 2 }
        });
        println!("{}", serde_json::to_string(&output)?);
    } else if !ctx.quiet {
        for (file, lines, hits) in &found {
            let name = file.display().to_string();
            for &index in hits {
                eprint!("{}", ResidualMarkerError::new(&name, lines, index).render(ctx.no_color));
            }
        }
        if found.is_empty() {
            println!("No conflict markers found.");
        }
    }

    if !found.is_empty() {
        return Err(CliError::Unresolved(found.len()).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn test_diagnostic_points_at_marker_line() {
        let lines = s(&["fn a() {}", "=======", "fn b() {}"]);
        let err = ResidualMarkerError::new("src/lib.rs", &lines, 1);
        assert_eq!(err.line, 2);
        assert_eq!(err.span.offset(), 10);
        assert_eq!(err.span.len(), 7);
        assert_eq!(err.to_string(), "Conflict marker left in src/lib.rs:2");

        let rendered = err.render(true);
        assert!(rendered.contains("marker still present"));
    }

    #[test]
    fn test_region_entry_is_one_based() {
        let lines = s(&["a", "<<<<<<<", "b", "=======", "c", ">>>>>>>", "d"]);
        let regions = conflict::extract(&lines, &MarkerSet::default(), 1, false);
        let entry = RegionEntry::from(&regions[0]);
        assert_eq!((entry.start_line, entry.end_line), (2, 6));
        assert_eq!((entry.context_start_line, entry.context_end_line), (1, 7));
    }
}
