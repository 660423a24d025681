//! Review-comment rework: cut a margined window around each commented
//! line, ask the model to rewrite it as the comment asks, and splice the
//! reply back through the anchor matcher.
//!
//! Windows are computed on the file as downloaded; splices are applied one
//! after another and re-anchor on the captured context, so earlier edits
//! that shift lines do not misplace later ones.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::anchor::{AnchorMatcher, SpliceOutcome};
use crate::core::candidate::ReplacementCandidate;
use crate::core::conflict::SpliceInfo;
use crate::core::diff_apply::apply_true_diff;
use crate::core::solver::PromptPair;
use crate::llm::ModelClient;

const COMMENT_SLOT: &str = "[COMMENT]";
const RELATIVE_POSITION_SLOT: &str = "[RELATIVE_POSITION]";
const TARGET_LINES_SLOT: &str = "[TARGET_LINES]";

/// Smallest margin that leaves anchor lines on both sides of the cut.
const MIN_COMMENT_MARGIN: usize = 2;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reviewer {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// Inline comment on the current patch set, as listed by
/// `gerrit query --comments --current-patch-set`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineComment {
    pub file: String,
    /// 1-based; 0 for file-level comments
    #[serde(default)]
    pub line: usize,
    pub message: String,
    #[serde(default)]
    pub reviewer: Option<Reviewer>,
}

impl InlineComment {
    pub fn is_done(&self) -> bool {
        self.message.trim().eq_ignore_ascii_case("done")
    }
}

/// Comments still asking for a change, grouped by file in query order.
///
/// Patch-set-level and file-level comments are skipped, and a "Done" reply
/// on a line retires every comment on that line.
pub fn open_comments(comments: &[InlineComment]) -> IndexMap<&str, Vec<&InlineComment>> {
    let done: HashSet<(&str, usize)> = comments
        .iter()
        .filter(|c| c.is_done())
        .map(|c| (c.file.as_str(), c.line))
        .collect();

    let mut by_file: IndexMap<&str, Vec<&InlineComment>> = IndexMap::new();
    for c in comments {
        if c.line == 0 || c.file.starts_with('/') || done.contains(&(c.file.as_str(), c.line)) {
            continue;
        }
        by_file.entry(c.file.as_str()).or_default().push(c);
    }
    by_file
}

/// The window of file lines shown to the model for one comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommentWindow {
    /// 0-based index of the commented line
    pub target: usize,
    pub start: usize,
    /// Exclusive
    pub end: usize,
    margin: usize,
}

impl CommentWindow {
    /// `None` when the comment points past the end of the file.
    pub fn new(lines: &[String], line: usize, margin: usize) -> Option<Self> {
        let target = line.checked_sub(1)?;
        if target >= lines.len() {
            return None;
        }
        let margin = margin.max(MIN_COMMENT_MARGIN);
        Some(Self {
            target,
            start: target.saturating_sub(margin),
            end: (target + margin + 1).min(lines.len()),
            margin,
        })
    }

    /// Offset of the commented line inside the window.
    pub fn relative_pos(&self) -> usize {
        self.target - self.start
    }

    pub fn section<'a>(&self, lines: &'a [String]) -> &'a [String] {
        &lines[self.start..self.end]
    }

    /// Anchor context for splicing a rewrite of this window: half a margin
    /// of lines at each edge, with the cut always covering the target.
    /// `None` when the target sits too close to the start or end of the file
    /// to leave an anchor line on both sides.
    pub fn splice_info(&self, lines: &[String]) -> Option<SpliceInfo> {
        let half = (self.margin / 2).max(1);
        if self.target <= self.start || self.target + 2 > self.end {
            return None;
        }
        let tight_start = (self.start + half).min(self.target);
        let tight_end = self
            .end
            .saturating_sub(half)
            .max(self.target + 1)
            .min(self.end - 1);
        if tight_end < tight_start + 2 {
            return None;
        }

        Some(SpliceInfo {
            window_start: self.start,
            window_end: self.end,
            tight_start,
            tight_end,
            start_context: lines[self.start..=tight_start].to_vec(),
            end_context: lines[tight_end - 1..self.end].to_vec(),
        })
    }
}

/// Asks the model to rework one window according to a review comment.
pub struct CommentRewriter<'a> {
    client: &'a dyn ModelClient,
    prompt: &'a PromptPair,
    retry_budget: usize,
}

impl<'a> CommentRewriter<'a> {
    pub fn new(client: &'a dyn ModelClient, prompt: &'a PromptPair, retry_budget: usize) -> Self {
        Self { client, prompt, retry_budget: retry_budget.max(1) }
    }

    /// First non-empty reply, or `None` once the budget is spent.
    #[instrument(skip_all, fields(backend = self.client.name()))]
    pub fn rewrite(
        &self,
        section: &[String],
        comment: &str,
        relative_pos: usize,
    ) -> Option<String> {
        let prompt = self
            .prompt
            .user_prompt
            .replace(COMMENT_SLOT, comment)
            .replace(RELATIVE_POSITION_SLOT, &relative_pos.to_string())
            .replace(TARGET_LINES_SLOT, &section.join("\n"));

        for attempt in 1..=self.retry_budget {
            match self.client.query(&self.prompt.system_prompt, &prompt) {
                Ok(reply) => match reply.text {
                    Some(text) if !text.trim().is_empty() => return Some(text),
                    _ => warn!(attempt, "model returned no rewrite"),
                },
                Err(e) => warn!(attempt, error = %e, "model query failed"),
            }
        }
        None
    }
}

/// What happened to one comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "splice", rename_all = "kebab-case")]
pub enum CommentOutcome {
    Applied(SpliceOutcome),
    /// The reply could not be anchored; the buffer is unchanged
    Unplaced(SpliceOutcome),
    NoReply,
    /// Commented line missing or too close to the file edge
    OutOfRange,
}

impl CommentOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, CommentOutcome::Applied(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentReport {
    pub line: usize,
    pub message: String,
    #[serde(flatten)]
    pub outcome: CommentOutcome,
}

/// Rewrites one file's commented windows and splices the replies back.
pub struct CommentApplier<'a> {
    rewriter: CommentRewriter<'a>,
    matcher: AnchorMatcher,
    margin: usize,
    prioritize_diff: bool,
    loose_apply: bool,
}

impl<'a> CommentApplier<'a> {
    pub fn new(rewriter: CommentRewriter<'a>, margin: usize) -> Self {
        Self {
            rewriter,
            matcher: AnchorMatcher::new(margin),
            margin,
            prioritize_diff: false,
            loose_apply: false,
        }
    }

    pub fn with_diff_options(mut self, prioritize_diff: bool, loose_apply: bool) -> Self {
        self.prioritize_diff = prioritize_diff;
        self.loose_apply = loose_apply;
        self
    }

    /// Returns the reworked buffer and one report per comment, in order.
    #[instrument(skip_all, fields(comments = comments.len()))]
    pub fn apply(
        &self,
        lines: &[String],
        comments: &[&InlineComment],
    ) -> (Vec<String>, Vec<CommentReport>) {
        let mut buffer = lines.to_vec();
        let mut reports = Vec::with_capacity(comments.len());

        for comment in comments {
            let outcome = self.apply_one(lines, &mut buffer, comment);
            debug!(line = comment.line, ?outcome, "comment processed");
            reports.push(CommentReport {
                line: comment.line,
                message: comment.message.clone(),
                outcome,
            });
        }

        let applied = reports.iter().filter(|r| r.outcome.is_applied()).count();
        info!(applied, total = reports.len(), "review comments reworked");
        (buffer, reports)
    }

    fn apply_one(
        &self,
        original: &[String],
        buffer: &mut Vec<String>,
        comment: &InlineComment,
    ) -> CommentOutcome {
        let Some(window) = CommentWindow::new(original, comment.line, self.margin) else {
            warn!(line = comment.line, "comment points past the end of the file");
            return CommentOutcome::OutOfRange;
        };
        let Some(info) = window.splice_info(original) else {
            warn!(line = comment.line, "commented line has no context to anchor on");
            return CommentOutcome::OutOfRange;
        };

        let section = window.section(original);
        let Some(reply) = self
            .rewriter
            .rewrite(section, &comment.message, window.relative_pos())
        else {
            return CommentOutcome::NoReply;
        };
        let Some(candidate) = ReplacementCandidate::from_reply(&reply) else {
            return CommentOutcome::NoReply;
        };

        let replacement = match &candidate {
            ReplacementCandidate::Literal(lines) => lines.clone(),
            ReplacementCandidate::Diff(diff) => {
                apply_true_diff(section, diff, self.prioritize_diff, self.loose_apply)
            }
        };

        let splice = self
            .matcher
            .replace_conflict_section_ex(buffer, &replacement, &info);
        if splice.outcome.is_applied() {
            *buffer = splice.lines;
            CommentOutcome::Applied(splice.outcome)
        } else {
            CommentOutcome::Unplaced(splice.outcome)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedClient;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    fn comment(file: &str, line: usize, message: &str) -> InlineComment {
        InlineComment { file: file.to_string(), line, message: message.to_string(), reviewer: None }
    }

    fn prompt() -> PromptPair {
        PromptPair {
            system_prompt: "rewrite".to_string(),
            user_prompt: "[COMMENT]@[RELATIVE_POSITION]\n[TARGET_LINES]".to_string(),
        }
    }

    fn program() -> Vec<String> {
        s(&[
            "fn main() {",
            "    let a = 1;",
            "    let b = 2;",
            "    let c = a + b;",
            "    println!(\"{c}\");",
            "    let d = 4;",
            "    drop(d);",
            "}",
        ])
    }

    #[test]
    fn test_done_reply_retires_the_line() {
        let comments = vec![
            comment("src/a.rs", 4, "use checked_add"),
            comment("src/a.rs", 4, "Done"),
            comment("src/a.rs", 7, "rename"),
            comment("/PATCHSET_LEVEL", 1, "looks good"),
            comment("src/b.rs", 0, "file-level note"),
            comment("src/b.rs", 2, "typo"),
        ];

        let open = open_comments(&comments);
        assert_eq!(open.keys().copied().collect::<Vec<_>>(), ["src/a.rs", "src/b.rs"]);
        assert_eq!(open["src/a.rs"].len(), 1);
        assert_eq!(open["src/a.rs"][0].message, "rename");
        assert_eq!(open["src/b.rs"][0].line, 2);
    }

    #[test]
    fn test_comment_record_decodes_from_query_json() {
        let c: InlineComment = serde_json::from_str(
            r#"{"file":"src/a.rs","line":4,"reviewer":{"username":"r"},"message":"DONE "}"#,
        )
        .unwrap();
        assert!(c.is_done());
        assert_eq!(c.reviewer.and_then(|r| r.username).as_deref(), Some("r"));
    }

    #[test]
    fn test_window_and_anchor_context() {
        let lines = program();
        let window = CommentWindow::new(&lines, 4, 2).unwrap();
        assert_eq!((window.start, window.end, window.relative_pos()), (1, 6, 2));

        let info = window.splice_info(&lines).unwrap();
        assert_eq!((info.tight_start, info.tight_end), (2, 5));
        assert_eq!(info.start_context, s(&["    let a = 1;", "    let b = 2;"]));
        assert_eq!(info.end_context, s(&["    println!(\"{c}\");", "    let d = 4;"]));

        // edge lines leave nothing to anchor on one side
        assert!(CommentWindow::new(&lines, 1, 2).unwrap().splice_info(&lines).is_none());
        assert!(CommentWindow::new(&lines, 8, 2).unwrap().splice_info(&lines).is_none());
        assert!(CommentWindow::new(&lines, 9, 2).is_none());
        assert!(CommentWindow::new(&lines, 0, 2).is_none());
    }

    #[test]
    fn test_small_margin_is_widened() {
        let lines = program();
        let window = CommentWindow::new(&lines, 4, 0).unwrap();
        assert_eq!((window.start, window.end), (1, 6));
        assert!(window.splice_info(&lines).is_some());
    }

    #[test]
    fn test_literal_rewrite_replaces_window() {
        let client = ScriptedClient::new([Some(
            "```rust\n    let a = 1;\n    let b = 2;\n    let c = a.checked_add(b).unwrap();\n    \
             println!(\"{c}\");\n    let d = 4;\n```",
        )]);
        let pair = prompt();
        let applier = CommentApplier::new(CommentRewriter::new(&client, &pair, 1), 2);
        let c = comment("src/main.rs", 4, "use checked_add");

        let (lines, reports) = applier.apply(&program(), &[&c]);

        assert_eq!(lines[3], "    let c = a.checked_add(b).unwrap();");
        assert_eq!(lines.len(), 8);
        assert_eq!(reports[0].outcome, CommentOutcome::Applied(SpliceOutcome::Full));

        let prompts = client.prompts.borrow();
        assert!(prompts[0].1.starts_with("use checked_add@2\n    let a = 1;"));
    }

    #[test]
    fn test_later_comment_reanchors_after_earlier_growth() {
        let client = ScriptedClient::new([
            Some("fn main() {\n    // inputs\n    let a = 1;\n    let b = 2;\n    let c = a + b;"),
            Some("    println!(\"{c}\");\n    let d = 4;\n    std::mem::drop(d);\n}"),
        ]);
        let pair = prompt();
        let applier = CommentApplier::new(CommentRewriter::new(&client, &pair, 1), 2);
        let first = comment("src/main.rs", 2, "say what these are");
        let second = comment("src/main.rs", 7, "spell out the path");

        let (lines, reports) = applier.apply(&program(), &[&first, &second]);

        assert!(reports.iter().all(|r| r.outcome.is_applied()));
        assert_eq!(
            lines,
            s(&[
                "fn main() {",
                "    // inputs",
                "    let a = 1;",
                "    let b = 2;",
                "    let c = a + b;",
                "    println!(\"{c}\");",
                "    let d = 4;",
                "    std::mem::drop(d);",
                "}",
            ])
        );
    }

    #[test]
    fn test_diff_rewrite_is_applied_to_window() {
        let client = ScriptedClient::new([Some(
            "```diff\n     let b = 2;\n-    let c = a + b;\n\
             +    let c = a.saturating_add(b);\n     println!(\"{c}\");\n```",
        )]);
        let pair = prompt();
        let applier = CommentApplier::new(CommentRewriter::new(&client, &pair, 1), 2);
        let c = comment("src/main.rs", 4, "avoid overflow");

        let (lines, reports) = applier.apply(&program(), &[&c]);

        assert!(reports[0].outcome.is_applied());
        assert_eq!(lines[3], "    let c = a.saturating_add(b);");
        assert_eq!(lines.len(), 8);
    }

    #[test]
    fn test_unanchored_reply_leaves_file_unchanged() {
        let client = ScriptedClient::new([Some("    let c = a.checked_add(b)?;")]);
        let pair = prompt();
        let applier = CommentApplier::new(CommentRewriter::new(&client, &pair, 1), 2);
        let c = comment("src/main.rs", 4, "use checked_add");

        let (lines, reports) = applier.apply(&program(), &[&c]);

        assert_eq!(lines, program());
        assert_eq!(reports[0].outcome, CommentOutcome::Unplaced(SpliceOutcome::AnchorNotFound));
    }

    #[test]
    fn test_empty_replies_spend_the_budget() {
        let client = ScriptedClient::new([None::<&str>, Some("  ")]);
        let pair = prompt();
        let applier = CommentApplier::new(CommentRewriter::new(&client, &pair, 2), 2);
        let c = comment("src/main.rs", 4, "use checked_add");
        let edge = comment("src/main.rs", 1, "rename main");

        let (lines, reports) = applier.apply(&program(), &[&c, &edge]);

        assert_eq!(lines, program());
        assert_eq!(reports[0].outcome, CommentOutcome::NoReply);
        assert_eq!(reports[1].outcome, CommentOutcome::OutOfRange);
        // the edge comment never reached the model
        assert_eq!(client.prompts.borrow().len(), 2);
    }
}
