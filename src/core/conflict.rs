//! Conflict region extraction over line buffers.
//!
//! Regions are half-open line ranges: `start` is the start-marker line and
//! `end` is one past the end-marker line. Margins widen a region with
//! surrounding context but never reach into a neighbouring conflict.

use serde::{Deserialize, Serialize};
use tracing::debug;

pub const START_MARKER: &str = "<<<<<<<";
pub const SEPARATOR: &str = "=======";
pub const END_MARKER: &str = ">>>>>>>";

/// Start/end marker sequences, matched consecutively by line prefix.
///
/// The default is a single-line `<<<<<<<` / `>>>>>>>` pair. Synthetic sets
/// built from a [`SpliceInfo`] carry margin context around the marker line:
/// the marker is the *last* line of `start` and the *first* line of `end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerSet {
    pub start: Vec<String>,
    pub end: Vec<String>,
}

impl Default for MarkerSet {
    fn default() -> Self {
        Self { start: vec![START_MARKER.to_string()], end: vec![END_MARKER.to_string()] }
    }
}

impl MarkerSet {
    /// Markers that re-find a region by its captured context.
    pub fn from_splice(info: &SpliceInfo) -> Self {
        Self { start: info.start_context.clone(), end: info.end_context.clone() }
    }

    pub fn start_marker(&self) -> Option<&str> {
        self.start.last().map(String::as_str)
    }

    pub fn end_marker(&self) -> Option<&str> {
        self.end.first().map(String::as_str)
    }

    /// True when the sequences carry context beyond the marker lines.
    pub fn has_context(&self) -> bool {
        self.start.len() > 1 || self.end.len() > 1
    }

    fn is_valid(&self) -> bool {
        !self.start.is_empty() && !self.end.is_empty()
    }
}

/// A conflict-marked span plus its margin window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConflictRegion {
    pub start: usize,
    pub end: usize,
    pub margined_start: usize,
    pub margined_end: usize,
}

impl ConflictRegion {
    /// Tight marker-delimited lines.
    pub fn lines<'a>(&self, buffer: &'a [String]) -> &'a [String] {
        &buffer[self.start..self.end]
    }

    /// Margin-expanded lines, the text sent to the model.
    pub fn section<'a>(&self, buffer: &'a [String]) -> &'a [String] {
        &buffer[self.margined_start..self.margined_end]
    }

    /// Capture the context needed to re-find this region after earlier splices.
    pub fn splice_info(&self, buffer: &[String]) -> SpliceInfo {
        SpliceInfo {
            window_start: self.margined_start,
            window_end: self.margined_end,
            tight_start: self.start,
            tight_end: self.end,
            start_context: buffer[self.margined_start..=self.start].to_vec(),
            end_context: buffer[self.end - 1..self.margined_end].to_vec(),
        }
    }

    fn absorb(&mut self, other: &ConflictRegion) {
        self.start = self.start.min(other.start);
        self.end = self.end.max(other.end);
        self.margined_start = self.margined_start.min(other.margined_start);
        self.margined_end = self.margined_end.max(other.margined_end);
    }
}

/// Positional context carried alongside a replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpliceInfo {
    pub window_start: usize,
    pub window_end: usize,
    pub tight_start: usize,
    pub tight_end: usize,
    pub start_context: Vec<String>,
    pub end_context: Vec<String>,
}

fn matches_at(lines: &[String], at: usize, seq: &[String]) -> bool {
    at + seq.len() <= lines.len()
        && seq
            .iter()
            .zip(&lines[at..])
            .all(|(prefix, line)| line.starts_with(prefix.as_str()))
}

fn find_seq(lines: &[String], from: usize, seq: &[String]) -> Option<usize> {
    (from..lines.len()).find(|&i| matches_at(lines, i, seq))
}

/// Locate the first complete region at or after `from`.
///
/// For single-line markers the margins walk outward up to `margin` lines;
/// for context-bearing markers the margins are the matched sequences.
pub fn locate_from(
    lines: &[String],
    from: usize,
    markers: &MarkerSet,
    margin: usize,
) -> Option<ConflictRegion> {
    if !markers.is_valid() {
        return None;
    }

    let mut cursor = from;
    loop {
        let seq_start = find_seq(lines, cursor, &markers.start)?;
        let start = seq_start + markers.start.len() - 1;

        let Some(seq_end) = find_seq(lines, start + 1, &markers.end) else {
            // Dangling start marker: resume after it
            debug!(line = start + 1, "dangling start marker");
            cursor = seq_start + 1;
            continue;
        };
        let end = seq_end + 1;

        let region = if markers.has_context() {
            ConflictRegion {
                start,
                end,
                margined_start: seq_start,
                margined_end: seq_end + markers.end.len(),
            }
        } else {
            ConflictRegion {
                start,
                end,
                margined_start: walk_back(lines, start, margin, markers),
                margined_end: walk_forward(lines, end, margin, markers),
            }
        };
        return Some(region);
    }
}

/// Locate the first region in the buffer.
pub fn locate(lines: &[String], markers: &MarkerSet, margin: usize) -> Option<ConflictRegion> {
    locate_from(lines, 0, markers, margin)
}

fn walk_back(lines: &[String], start: usize, margin: usize, markers: &MarkerSet) -> usize {
    let floor = start.saturating_sub(margin);
    let end_marker = markers.end_marker().unwrap_or(END_MARKER);

    let mut ms = start;
    while ms > floor && !lines[ms - 1].starts_with(end_marker) {
        ms -= 1;
    }
    ms
}

fn walk_forward(lines: &[String], end: usize, margin: usize, markers: &MarkerSet) -> usize {
    let ceil = (end + margin).min(lines.len());
    let start_marker = markers.start_marker().unwrap_or(START_MARKER);

    let mut me = end;
    while me < ceil && !lines[me].starts_with(start_marker) {
        me += 1;
    }
    me
}

/// Scan the whole buffer for conflict regions, in file order.
pub fn extract(
    lines: &[String],
    markers: &MarkerSet,
    margin: usize,
    merge_overlaps: bool,
) -> Vec<ConflictRegion> {
    let mut regions = Vec::new();
    let mut cursor = 0usize;

    while let Some(region) = locate_from(lines, cursor, markers, margin) {
        cursor = region.end;
        regions.push(region);
    }

    debug!(count = regions.len(), margin, "extracted conflict regions");

    if merge_overlaps { merge_regions(regions) } else { regions }
}

/// Coalesce regions whose margin windows overlap or touch.
pub fn merge_regions(mut regions: Vec<ConflictRegion>) -> Vec<ConflictRegion> {
    if regions.len() < 2 {
        return regions;
    }

    regions.sort_by_key(|r| (r.margined_start, r.start));

    let mut merged: Vec<ConflictRegion> = Vec::with_capacity(regions.len());
    for region in regions {
        match merged.last_mut() {
            Some(prev) if region.margined_start <= prev.margined_end => prev.absorb(&region),
            _ => merged.push(region),
        }
    }
    merged
}

/// A line that still looks like a conflict marker, including `+`/`-` diff remnants.
pub fn is_residual_marker(line: &str, markers: &MarkerSet) -> bool {
    let trimmed = line.trim();
    let payload = trimmed
        .strip_prefix('+')
        .or_else(|| trimmed.strip_prefix('-'))
        .map(str::trim)
        .unwrap_or(trimmed);

    let start = markers.start_marker().unwrap_or(START_MARKER);
    let end = markers.end_marker().unwrap_or(END_MARKER);
    payload == SEPARATOR
        || (!start.is_empty() && payload.starts_with(start))
        || (!end.is_empty() && payload.starts_with(end))
}

/// Indices of residual marker lines.
pub fn find_residual_markers(lines: &[String], markers: &MarkerSet) -> Vec<usize> {
    lines
        .iter()
        .enumerate()
        .filter(|(_, l)| is_residual_marker(l, markers))
        .map(|(i, _)| i)
        .collect()
}
