//! Model-driven resolution of a single conflict section, plus the
//! YES/NO sanity check run before a resolved file is uploaded.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::candidate::code_sections;
use crate::core::conflict::{END_MARKER, MarkerSet, SEPARATOR, START_MARKER, find_residual_markers};
use crate::core::git;
use crate::infra::io::read_lines;
use crate::llm::ModelClient;

const BUILTIN_PROMPTS: &str = include_str!("../../prompts/default.json");

const MERGE_CONFLICT_SLOT: &str = "[MERGE_CONFLICT]";
const DIFF_OUTPUT_SLOT: &str = "[DIFF_OUTPUT]";
const GIT_DIFF_SLOT: &str = "[GIT_DIFF]";

/// Prepended to the resolver prompt after a reply that kept its markers.
pub const AMEND_REMINDER: &str =
    "Don't forget to remove '<<<<<<<', '=======', '>>>>>>>' with '-' line in the resolution diff\n";

/// Context lines shown around each hunk in the non-diff fallback view.
const NON_DIFF_MARGIN: usize = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct PromptPair {
    pub system_prompt: String,
    pub user_prompt: String,
}

/// Prompts for every model interaction; only the resolver is mandatory.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptSet {
    #[serde(default)]
    is_replace_allowed: Value,
    pub resolver: PromptPair,
    #[serde(default)]
    pub checker: Option<PromptPair>,
    #[serde(default)]
    pub upload_checker: Option<PromptPair>,
    /// Rewrites a code window as a review comment asks
    #[serde(default)]
    pub comment_modifier: Option<PromptPair>,
}

impl PromptSet {
    pub fn builtin() -> Result<Self> {
        serde_json::from_str(BUILTIN_PROMPTS).context("Built-in prompt set is malformed")
    }

    /// Load a prompt file (`~` and `$VAR` expanded) or fall back to the built-in set.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Self::builtin();
        };
        let expanded = shellexpand::full(&path.to_string_lossy())
            .with_context(|| format!("Failed to expand prompt path {}", path.display()))?
            .into_owned();
        let text = std::fs::read_to_string(&expanded)
            .with_context(|| format!("Failed to read prompt file {expanded}"))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse prompt file {expanded}"))
    }

    /// Whether plain replacement text (not a diff) is an acceptable reply.
    pub fn replace_allowed(&self) -> bool {
        match &self.is_replace_allowed {
            Value::Bool(b) => *b,
            Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
            _ => false,
        }
    }
}

fn has_removal_of(lines: &[&str], marker: &str) -> bool {
    lines.iter().any(|l| {
        l.trim()
            .strip_prefix('-')
            .is_some_and(|rest| rest.trim_start().starts_with(marker))
    })
}

/// A diff-shaped reply must remove all three markers; a literal reply (when
/// allowed) must not contain any of them.
pub fn reply_is_valid(reply: &str, replace_allowed: bool) -> bool {
    let lines: Vec<&str> = reply.lines().collect();
    let diff_ok = [START_MARKER, SEPARATOR, END_MARKER]
        .iter()
        .all(|m| has_removal_of(&lines, m));
    if diff_ok {
        return true;
    }

    replace_allowed
        && !reply.trim().is_empty()
        && ![START_MARKER, SEPARATOR, END_MARKER]
            .iter()
            .any(|m| reply.contains(m))
}

/// Queries the model for one conflict section, validating and retrying.
pub struct MergeConflictSolver<'a> {
    client: &'a dyn ModelClient,
    prompts: &'a PromptSet,
    retry_budget: usize,
}

impl<'a> MergeConflictSolver<'a> {
    pub fn new(client: &'a dyn ModelClient, prompts: &'a PromptSet, retry_budget: usize) -> Self {
        Self { client, prompts, retry_budget: retry_budget.max(1) }
    }

    fn ask(&self, pair: &PromptPair, user_prompt: &str) -> Option<String> {
        match self.client.query(&pair.system_prompt, user_prompt) {
            Ok(reply) => reply.text,
            Err(e) => {
                warn!(backend = self.client.name(), error = %e, "model query failed");
                None
            }
        }
    }

    fn extract_code(reply: &str) -> String {
        code_sections(reply).join("\n")
    }

    /// Ask the checker prompt to repair an invalid resolution.
    fn check(&self, section: &str, proposed: &str) -> Option<String> {
        let pair = self.prompts.checker.as_ref()?;
        let prompt = pair
            .user_prompt
            .replace(MERGE_CONFLICT_SLOT, section)
            .replace(DIFF_OUTPUT_SLOT, proposed);
        self.ask(pair, &prompt)
            .map(|r| Self::extract_code(&r))
    }

    /// Returns the first valid reply (code sections only), or `None` once the
    /// budget is spent.
    #[instrument(skip_all, fields(backend = self.client.name()))]
    pub fn query(&self, section: &str) -> Option<String> {
        let allowed = self.prompts.replace_allowed();
        let base = self
            .prompts
            .resolver
            .user_prompt
            .replace(MERGE_CONFLICT_SLOT, section);
        let mut amend = false;

        for attempt in 1..=self.retry_budget {
            let prompt = if amend { format!("{AMEND_REMINDER}{base}") } else { base.clone() };

            let Some(raw) = self.ask(&self.prompts.resolver, &prompt) else {
                warn!(attempt, "model returned no resolution");
                continue;
            };
            let mut code = Self::extract_code(&raw);

            if !reply_is_valid(&code, allowed) {
                if let Some(fixed) = self.check(section, &code) {
                    code = fixed;
                }
            }

            if reply_is_valid(&code, allowed) {
                debug!(attempt, "accepted model resolution");
                return Some(code);
            }

            warn!(attempt, "resolution kept conflict markers, retrying");
            amend = true;
        }
        None
    }
}

/// Pre-upload gate: asks the model whether the change to a file looks sound.
pub struct UploadChecker<'a> {
    client: &'a dyn ModelClient,
    prompts: &'a PromptSet,
    retry_budget: usize,
}

impl<'a> UploadChecker<'a> {
    pub fn new(client: &'a dyn ModelClient, prompts: &'a PromptSet, retry_budget: usize) -> Self {
        Self { client, prompts, retry_budget: retry_budget.max(1) }
    }

    /// `Some(true)` for YES, `Some(false)` for NO, `None` when no usable answer came back.
    pub fn ask_yes_no(&self, change: &str) -> Option<bool> {
        let pair = self.prompts.upload_checker.as_ref()?;
        let prompt = pair.user_prompt.replace(GIT_DIFF_SLOT, change);

        for attempt in 1..=self.retry_budget {
            let text = match self.client.query(&pair.system_prompt, &prompt) {
                Ok(reply) => reply.text.unwrap_or_default(),
                Err(e) => {
                    warn!(attempt, error = %e, "upload check query failed");
                    continue;
                }
            };
            let head = text.trim_start().to_ascii_uppercase();
            if head.starts_with("YES") {
                return Some(true);
            }
            if head.starts_with("NO") {
                return Some(false);
            }
            debug!(attempt, "upload check answer was neither YES nor NO");
        }
        None
    }

    /// Whether the file is ready to upload. Residual markers always fail.
    /// Without a configured checker prompt, a clean file passes.
    #[instrument(skip(self, markers), fields(path = %path.display()))]
    pub fn is_diff_ok(&self, repo: &Path, path: &Path, markers: &MarkerSet) -> Result<bool> {
        let lines = read_lines(path);
        if !find_residual_markers(&lines, markers).is_empty() {
            return Ok(false);
        }
        if self.prompts.upload_checker.is_none() {
            return Ok(true);
        }

        let diff = git::diff(repo, path)?;
        if !diff_has_content(&diff) {
            return Ok(true);
        }
        if self.ask_yes_no(&diff) == Some(true) {
            return Ok(true);
        }

        // second opinion on the plain text around each hunk
        let view = non_diff_view(&diff, &lines, NON_DIFF_MARGIN);
        Ok(self.ask_yes_no(&view) == Some(true))
    }
}

/// True when the diff changes at least one line.
pub fn diff_has_content(diff: &str) -> bool {
    diff.lines().any(|l| {
        (l.starts_with('+') && !l.starts_with("+++"))
            || (l.starts_with('-') && !l.starts_with("---"))
    })
}

/// Current file text around every `@@` hunk, without diff prefixes.
pub fn non_diff_view(diff: &str, lines: &[String], margin: usize) -> String {
    let mut out = String::from("The following is a part of changed code (non-diff):\n");
    let mut last_end = 0usize;

    for header in diff.lines().filter(|l| l.starts_with("@@")) {
        let Some((start, len)) = git::parse_hunk_header(header) else {
            continue;
        };
        let from = start.saturating_sub(1).saturating_sub(margin).max(last_end);
        let to = (start.saturating_sub(1) + len + margin).min(lines.len());
        if from >= to {
            continue;
        }
        if last_end != 0 || from != 0 {
            out.push_str("..snip..\n");
        }
        for line in &lines[from..to] {
            out.push_str(line);
            out.push('\n');
        }
        last_end = to;
    }
    if last_end < lines.len() && last_end != 0 {
        out.push_str("..snip..\n");
    }
    out
}
