//! Turning free-form model replies into replacement candidates.

use serde::Serialize;

use crate::core::diff_apply::is_diff;
use crate::infra::io::split_lines;

/// A model reply reduced to lines, classified once at ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "lines", rename_all = "lowercase")]
pub enum ReplacementCandidate {
    /// Lines to splice in verbatim
    Literal(Vec<String>),
    /// Context / `+` / `-` lines to apply against the conflict section
    Diff(Vec<String>),
}

impl ReplacementCandidate {
    pub fn from_lines(lines: Vec<String>) -> Self {
        if is_diff(&lines) {
            ReplacementCandidate::Diff(lines)
        } else {
            ReplacementCandidate::Literal(lines)
        }
    }

    /// Extract code sections, drop diff headers, classify.
    /// `None` when nothing but whitespace remains.
    pub fn from_reply(reply: &str) -> Option<Self> {
        let lines = clean_up_diff(code_sections(reply));
        if lines.iter().all(|l| l.trim().is_empty()) {
            return None;
        }
        Some(Self::from_lines(lines))
    }

    pub fn lines(&self) -> &[String] {
        match self {
            ReplacementCandidate::Literal(lines) | ReplacementCandidate::Diff(lines) => lines,
        }
    }

    pub fn is_diff(&self) -> bool {
        matches!(self, ReplacementCandidate::Diff(_))
    }
}

/// Collect the bodies of fenced blocks (```` ``` ```` with optional language
/// tag) and of `+++ b/` diff bodies. An unclosed block runs to the end of the
/// text. Without any block, the whole reply is returned.
pub fn code_sections(reply: &str) -> Vec<String> {
    let lines = split_lines(reply);
    let mut out = Vec::new();
    let mut open: Option<usize> = None;
    let mut any_block = false;

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        match open {
            None if trimmed.starts_with("```") || trimmed.starts_with("+++ b/") => {
                open = Some(i);
                any_block = true;
            }
            Some(start) if trimmed.starts_with("```") => {
                out.extend_from_slice(&lines[start + 1..i]);
                open = None;
            }
            _ => {}
        }
    }
    if let Some(start) = open {
        out.extend_from_slice(&lines[start + 1..]);
    }

    if any_block { out } else { lines }
}

fn is_diff_header(line: &str) -> bool {
    line.starts_with("@@")
        || line.starts_with("--- a/")
        || line.starts_with("+++ b/")
        || line.starts_with("--- /dev/null")
        || line.starts_with("+++ /dev/null")
        || line.starts_with("diff --git ")
        || line.starts_with("index ")
}

/// Drop unified-diff header decoration.
pub fn clean_up_diff(lines: Vec<String>) -> Vec<String> {
    lines
        .into_iter()
        .filter(|l| !is_diff_header(l))
        .collect()
}
