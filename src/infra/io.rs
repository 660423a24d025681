//! Line-oriented file access with line-ending preservation.
//!
//! Reads never fail: a missing, unreadable or non-UTF-8 file yields an
//! empty line list so conflict scanning can skip it. Writes join lines
//! with the style that dominated the original bytes.

use anyhow::{Context, Result};
use memmap2::Mmap;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

const MMAP_THRESHOLD: u64 = 1024 * 1024; // 1 MiB

pub enum FileContent {
    Mapped(Mmap),
    Buffered(Vec<u8>),
}

impl AsRef<[u8]> for FileContent {
    fn as_ref(&self) -> &[u8] {
        match self {
            FileContent::Mapped(mmap) => mmap,
            FileContent::Buffered(bytes) => bytes,
        }
    }
}

/// Line terminator style of a text file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LineEnding {
    Lf,
    Cr,
    CrLf,
}

impl LineEnding {
    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::Cr => "\r",
            LineEnding::CrLf => "\r\n",
        }
    }
}

/// A file read as lines plus what is needed to write it back faithfully.
#[derive(Debug, Clone)]
pub struct TextFile {
    pub lines: Vec<String>,
    pub ending: LineEnding,
    pub trailing_newline: bool,
}

pub fn read_file_smart<P: AsRef<Path>>(path: P) -> Result<FileContent> {
    let path = path.as_ref();
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Failed to read metadata for {}", path.display()))?;

    if metadata.len() > MMAP_THRESHOLD {
        let file =
            File::open(path).with_context(|| format!("Failed to open file {}", path.display()))?;

        // Safety: the mapping is only read, and dropped before any write
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("Failed to memory-map {}", path.display()))?;

        Ok(FileContent::Mapped(mmap))
    } else {
        let content =
            std::fs::read(path).with_context(|| format!("Failed to read file {}", path.display()))?;

        Ok(FileContent::Buffered(content))
    }
}

/// Count terminators and pick the most frequent.
/// Ties resolve as `\n` > `\r` > `\r\n`.
pub fn detect_line_ending(bytes: &[u8]) -> LineEnding {
    let mut lf = 0usize;
    let mut cr = 0usize;
    let mut crlf = 0usize;

    let mut i = 0usize;
    while let Some(pos) = memchr::memchr2(b'\n', b'\r', &bytes[i..]) {
        let abs = i + pos;
        if bytes[abs] == b'\n' {
            lf += 1;
            i = abs + 1;
        } else if bytes.get(abs + 1) == Some(&b'\n') {
            crlf += 1;
            i = abs + 2;
        } else {
            cr += 1;
            i = abs + 1;
        }
    }

    if lf >= cr && lf >= crlf {
        LineEnding::Lf
    } else if cr >= crlf {
        LineEnding::Cr
    } else {
        LineEnding::CrLf
    }
}

/// Split on `\n`, `\r\n` and `\r`. A final terminator does not open an extra line.
pub fn split_lines(text: &str) -> Vec<String> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while let Some(pos) = memchr::memchr2(b'\n', b'\r', &bytes[i..]) {
        let abs = i + pos;
        out.push(text[start..abs].to_string());
        i = if bytes[abs] == b'\r' && bytes.get(abs + 1) == Some(&b'\n') {
            abs + 2
        } else {
            abs + 1
        };
        start = i;
    }

    if start < bytes.len() {
        out.push(text[start..].to_string());
    }
    out
}

/// Read a file as a [`TextFile`]; `None` when missing, unreadable or not UTF-8.
pub fn read_text_file<P: AsRef<Path>>(path: P) -> Option<TextFile> {
    let path = path.as_ref();
    let content = match read_file_smart(path) {
        Ok(c) => c,
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "skipping unreadable file");
            return None;
        }
    };
    let bytes = content.as_ref();
    let text = std::str::from_utf8(bytes).ok()?;

    Some(TextFile {
        lines: split_lines(text),
        ending: detect_line_ending(bytes),
        trailing_newline: matches!(bytes.last(), Some(b'\n') | Some(b'\r')),
    })
}

/// Read a file as lines; empty on any failure.
pub fn read_lines<P: AsRef<Path>>(path: P) -> Vec<String> {
    read_text_file(path)
        .map(|f| f.lines)
        .unwrap_or_default()
}

/// Join lines with `ending`, appending a final terminator when requested.
pub fn join_lines(lines: &[String], ending: LineEnding, trailing_newline: bool) -> String {
    let mut out = lines.join(ending.as_str());
    if trailing_newline && !lines.is_empty() {
        out.push_str(ending.as_str());
    }
    out
}

/// Write lines back using the line-ending style of the file currently on disk.
///
/// The write goes through a temp file in the same directory and is renamed
/// into place so a crash never leaves a half-written source file.
pub fn write_lines<P: AsRef<Path>>(path: P, lines: &[String]) -> Result<()> {
    let path = path.as_ref();
    let (ending, trailing) = match std::fs::read(path) {
        Ok(bytes) => (
            detect_line_ending(&bytes),
            bytes.is_empty() || matches!(bytes.last(), Some(b'\n') | Some(b'\r')),
        ),
        Err(_) => (LineEnding::Lf, true),
    };
    write_atomic(path, join_lines(lines, ending, trailing).as_bytes())
}

pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    tmp.write_all(data)
        .with_context(|| format!("Failed to write temp file for {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
