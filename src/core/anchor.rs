//! Splice-boundary resolution for model replacements.
//!
//! Given a buffer containing a conflict and a replacement block, decide
//! which buffer lines to cut and which replacement lines to insert. Three
//! tiers are tried in order:
//!
//! 1. **Full replace**: the replacement's first and last lines match the
//!    edges of the margin window, so the whole window is swapped.
//! 2. **Anchored replace**: walk outward from the markers, pairing buffer
//!    lines with replacement lines, and cut only the matched span. Both
//!    walks must find an anchor; a reply that echoed no context at all is
//!    accepted only when its first and last lines occur in the window.
//! 3. **Loose absorption** (`replace_conflict_section_ex` only): leftover
//!    replacement lines outside the anchored span are placed where two of
//!    their lines anchor in the already-spliced buffer.
//!
//! Every tier is a no-op when its anchors are missing.

use serde::Serialize;
use tracing::debug;

use crate::core::conflict::{self, MarkerSet, SpliceInfo, is_residual_marker};

/// Cap on loose absorption passes per splice.
pub const MAX_LOOSE_PASSES: usize = 16;

/// Which tier produced a splice, or why nothing was spliced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SpliceOutcome {
    Full,
    Partial { pre: usize, post: usize, replace_start: usize, replace_end: usize },
    MarkersNotFound,
    AnchorNotFound,
}

impl SpliceOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, SpliceOutcome::Full | SpliceOutcome::Partial { .. })
    }
}

/// Result of one splice: the new buffer plus diagnostics.
#[derive(Debug, Clone)]
pub struct Splice {
    pub lines: Vec<String>,
    pub outcome: SpliceOutcome,
    /// Leftover chunks placed by loose absorption
    pub absorbed: usize,
}

impl Splice {
    fn unchanged(buffer: &[String], outcome: SpliceOutcome) -> Self {
        Self { lines: buffer.to_vec(), outcome, absorbed: 0 }
    }
}

/// Whitespace-stripped equality used by the anchor walks.
fn trim_eq(a: &str, b: &str) -> bool {
    a.trim() == b.trim()
}

/// Token-split equality: insensitive to the width of internal spacing.
fn token_eq(a: &str, b: &str) -> bool {
    a.split_whitespace().eq(b.split_whitespace())
}

/// A line worth anchoring on: has an alphanumeric and is not a marker.
fn is_meaningful(line: &str, markers: &MarkerSet) -> bool {
    line.chars().any(char::is_alphanumeric) && !is_residual_marker(line, markers)
}

#[derive(Debug, Clone, Copy)]
pub struct AnchorMatcher {
    margin: usize,
}

impl AnchorMatcher {
    /// `margin` bounds the anchor walks when the markers carry no context.
    pub fn new(margin: usize) -> Self {
        Self { margin }
    }

    /// Splice `replacement` over the first region matched by `markers`.
    pub fn replace_conflict_section(
        &self,
        buffer: &[String],
        replacement: &[String],
        markers: &MarkerSet,
    ) -> Splice {
        let Some(region) = conflict::locate(buffer, markers, self.margin) else {
            debug!("markers not found, leaving buffer unchanged");
            return Splice::unchanged(buffer, SpliceOutcome::MarkersNotFound);
        };

        let (start, end) = (region.start, region.end);
        let (ms, me) = (region.margined_start, region.margined_end);

        // Tier 1: the replacement echoes both window edges
        let edges_match = match (replacement.first(), replacement.last()) {
            (Some(first), Some(last)) => {
                ms < start
                    && me > end
                    && token_eq(&buffer[ms], first)
                    && token_eq(&buffer[me - 1], last)
            }
            _ => false,
        };
        if edges_match {
            debug!(ms, me, "full-window replace");
            let mut out = Vec::with_capacity(buffer.len() - (me - ms) + replacement.len());
            out.extend_from_slice(&buffer[..ms]);
            out.extend_from_slice(replacement);
            out.extend_from_slice(&buffer[me..]);
            return Splice { lines: out, outcome: SpliceOutcome::Full, absorbed: 0 };
        }

        // Tier 2: anchored walks, bounded by the margin window
        let (lower, upper) = if markers.has_context() {
            (ms, me)
        } else {
            (start.saturating_sub(self.margin), (end + self.margin).min(buffer.len()))
        };

        let front = walk_front(buffer, replacement, start, lower);
        let tail_from = front.map_or(0, |(_, rs)| rs + 1);
        let tail = walk_tail(buffer, replacement, end, upper, tail_from);

        let (pre, replace_start, post, replace_end) = match (front, tail) {
            (Some((pre, rs)), Some((post, re))) => (pre, rs, post, re),
            (None, None) if interior_anchored(&buffer[lower..upper], replacement, markers) => {
                (start, 0, end, replacement.len())
            }
            _ => {
                debug!(
                    front = front.is_some(),
                    tail = tail.is_some(),
                    "anchor missing, leaving buffer unchanged"
                );
                return Splice::unchanged(buffer, SpliceOutcome::AnchorNotFound);
            }
        };

        let replace_end = replace_end.max(replace_start);
        debug!(pre, post, replace_start, replace_end, "anchored replace");

        let mut out = Vec::with_capacity(buffer.len() + replacement.len());
        out.extend_from_slice(&buffer[..pre]);
        out.extend_from_slice(&replacement[replace_start..replace_end]);
        out.extend_from_slice(&buffer[post..]);

        Splice {
            lines: out,
            outcome: SpliceOutcome::Partial { pre, post, replace_start, replace_end },
            absorbed: 0,
        }
    }

    /// Splice using the captured context of `info`, then place leftover
    /// replacement material through loose anchoring.
    pub fn replace_conflict_section_ex(
        &self,
        buffer: &[String],
        replacement: &[String],
        info: &SpliceInfo,
    ) -> Splice {
        let markers = MarkerSet::from_splice(info);
        let mut splice = self.replace_conflict_section(buffer, replacement, &markers);

        let SpliceOutcome::Partial { replace_start, replace_end, .. } = splice.outcome else {
            return splice;
        };

        let leftovers = [&replacement[..replace_start], &replacement[replace_end..]];
        let mut pending: Vec<Vec<String>> = leftovers
            .into_iter()
            .filter(|chunk| chunk.iter().any(|l| !l.trim().is_empty()))
            .map(<[String]>::to_vec)
            .collect();

        let mut passes = 0usize;
        while let Some(chunk) = pending.pop() {
            if passes == MAX_LOOSE_PASSES {
                debug!(remaining = pending.len() + 1, "loose pass cap reached");
                break;
            }
            passes += 1;

            match Self::loose_splice(&splice.lines, &chunk, &markers) {
                Some(lines) => {
                    splice.lines = lines;
                    splice.absorbed += 1;
                }
                None => {
                    // Retry blank-line separated hunks on their own
                    let hunks = split_hunks(&chunk);
                    if hunks.len() > 1 {
                        pending.extend(hunks);
                    }
                }
            }
        }

        splice
    }

    /// Place `chunk` between its first and last non-blank lines, when both
    /// occur in `buffer` in order. The tightest such pair wins.
    fn loose_splice(
        buffer: &[String],
        chunk: &[String],
        markers: &MarkerSet,
    ) -> Option<Vec<String>> {
        let first = chunk.iter().position(|l| !l.trim().is_empty())?;
        let last = chunk.iter().rposition(|l| !l.trim().is_empty())?;
        // Two distinct anchors, at least one carrying real content
        let anchored =
            is_meaningful(&chunk[first], markers) || is_meaningful(&chunk[last], markers);
        if first == last || !anchored {
            return None;
        }

        let (p1, p2) = buffer
            .iter()
            .enumerate()
            .filter(|(_, l)| trim_eq(l, &chunk[first]))
            .filter_map(|(p1, _)| {
                (p1 + 1..buffer.len())
                    .find(|&p2| trim_eq(&buffer[p2], &chunk[last]))
                    .map(|p2| (p1, p2))
            })
            .min_by_key(|(p1, p2)| p2 - p1)?;

        debug!(p1, p2, lines = last - first + 1, "loose anchor placement");
        let mut out = Vec::with_capacity(buffer.len() + chunk.len());
        out.extend_from_slice(&buffer[..p1]);
        out.extend_from_slice(&chunk[first..=last]);
        out.extend_from_slice(&buffer[p2 + 1..]);
        Some(out)
    }
}

/// Walk backward from just before `start`; each buffer line must match a
/// replacement line strictly before the previous match.
/// Returns `(pre_margin_index, replace_start_index)` of the outermost match.
fn walk_front(
    buffer: &[String],
    replacement: &[String],
    start: usize,
    lower: usize,
) -> Option<(usize, usize)> {
    let mut found = None;
    let mut search_end = replacement.len();
    let mut i = start;

    while i > lower {
        let line = &buffer[i - 1];
        match (0..search_end).rev().find(|&j| trim_eq(&replacement[j], line)) {
            Some(j) => {
                found = Some((i - 1, j));
                search_end = j;
                i -= 1;
            }
            None => break,
        }
    }
    found
}

/// Walk forward from `end`; each buffer line must match a replacement line
/// after the previous match. Returns `(post_margin_index, replace_end_index)`,
/// both exclusive.
fn walk_tail(
    buffer: &[String],
    replacement: &[String],
    end: usize,
    upper: usize,
    from: usize,
) -> Option<(usize, usize)> {
    let mut found = None;
    let mut search_start = from;
    let mut i = end;

    while i < upper {
        let line = &buffer[i];
        match (search_start..replacement.len()).find(|&k| trim_eq(&replacement[k], line)) {
            Some(k) => {
                found = Some((i + 1, k + 1));
                search_start = k + 1;
                i += 1;
            }
            None => break,
        }
    }
    found
}

/// A reply that echoed no context at all still anchors when both its first
/// and last non-blank lines occur in the window and carry real content.
fn interior_anchored(window: &[String], replacement: &[String], markers: &MarkerSet) -> bool {
    let first = replacement.iter().find(|l| !l.trim().is_empty());
    let last = replacement.iter().rfind(|l| !l.trim().is_empty());
    let (Some(first), Some(last)) = (first, last) else {
        return false;
    };
    [first, last]
        .iter()
        .all(|r| is_meaningful(r, markers) && window.iter().any(|w| trim_eq(w, r)))
}

fn split_hunks(chunk: &[String]) -> Vec<Vec<String>> {
    chunk
        .split(|l| l.trim().is_empty())
        .filter(|h| !h.is_empty())
        .map(<[String]>::to_vec)
        .collect()
}
