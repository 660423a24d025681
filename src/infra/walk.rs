//! Gitignore-aware discovery of files that carry conflict markers.
//! - Respects .gitignore, .git/info/exclude, and global gitignore
//! - Extra ignore globs (early prune + late filter)
//! - Optional hidden file policy
//! - Deterministic ordering for stable tests/CI
//!
//! Backed by ripgrep's `ignore` crate and `globset`.

use std::path::{Path, PathBuf};

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::{DirEntry, WalkBuilder};

use crate::core::conflict::MarkerSet;

/// Gitignore-aware walker with optional extra ignore globs.
/// Extra globs are applied in two places:
///   1) Early: prune directories during traversal (filter_entry).
///   2) Late: filter out files that still slipped through.
pub struct FileWalker
{
    /// Compiled set of additional ignore patterns
    ignore_patterns: GlobSet,

    /// Include hidden (dot) files
    include_hidden: bool,
}

impl FileWalker
{
    /// Create a walker with extra ignore globs.
    pub fn new(ignore_patterns: &[String]) -> Result<Self>
    {
        let mut builder = GlobSetBuilder::new();

        for pattern in ignore_patterns
        {
            builder.add(Glob::new(pattern)?);
        }

        Ok(Self { ignore_patterns: builder.build()?, include_hidden: true })
    }

    /// (Optional) Include or exclude hidden files (dotfiles).
    pub fn with_include_hidden(
        mut self,
        include_hidden: bool,
    ) -> Self
    {
        self.include_hidden = include_hidden;
        self
    }

    fn build_walk(
        &self,
        root: &Path,
    ) -> WalkBuilder
    {
        let mut b = WalkBuilder::new(root);

        // WalkBuilder::hidden(true) skips dotfiles
        b.hidden(!self.include_hidden);

        b.git_ignore(true);
        b.git_global(true);
        b.git_exclude(true);

        let extra = self
            .ignore_patterns
            .clone();
        b.filter_entry(move |ent: &DirEntry| {
            let is_dir = ent
                .file_type()
                .map(|ft| ft.is_dir())
                .unwrap_or(false);

            // Never descend into VCS metadata
            if is_dir && ent.file_name() == ".git"
            {
                return false;
            }
            !(is_dir && extra.is_match(ent.path()))
        });

        b
    }

    /// Traverse files under `root`. Returns a **sorted** list for determinism.
    pub fn walk_files<P: AsRef<Path>>(
        &self,
        root: P,
    ) -> Vec<PathBuf>
    {
        let root_path = root.as_ref();
        let walker = self
            .build_walk(root_path)
            .build();

        let mut out: Vec<PathBuf> = walker
            .filter_map(|res| res.ok())
            .filter(|entry| {
                entry
                    .file_type()
                    .is_some_and(|ft| ft.is_file())
            })
            .map(|entry| entry.into_path())
            // Late filter on the path relative to the walk root
            .filter(|abs| {
                let rel = abs
                    .strip_prefix(root_path)
                    .unwrap_or(abs);
                !self
                    .ignore_patterns
                    .is_match(rel)
            })
            .collect();

        out.sort();

        out
    }

    /// Files under `root` that contain at least one start-marker sequence.
    pub fn conflicted_files<P: AsRef<Path>>(
        &self,
        root: P,
        markers: &MarkerSet,
    ) -> Vec<PathBuf>
    {
        self.walk_files(root)
            .into_iter()
            .filter(|p| likely_has_conflict_markers(p, markers))
            .collect()
    }
}

/// Byte-level prefilter: a start-marker prefix at column 0 anywhere in the file.
pub fn likely_has_conflict_markers(
    path: &Path,
    markers: &MarkerSet,
) -> bool
{
    let Some(first) = markers
        .start
        .first()
    else
    {
        return false;
    };
    let Ok(content) = crate::infra::io::read_file_smart(path)
    else
    {
        return false;
    };
    let bytes = content.as_ref();
    let needle = first.as_bytes();

    if bytes.starts_with(needle)
    {
        return true;
    }
    memchr::memchr_iter(b'\n', bytes).any(|nl| bytes[nl + 1..].starts_with(needle))
}

#[cfg(test)]
mod tests
{
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn write_file(
        root: &Path,
        rel: &str,
        contents: &str,
    ) -> Result<()>
    {
        let path = root.join(rel);
        if let Some(parent) = path.parent()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    #[test]
    fn test_finds_only_conflicted_files() -> Result<()>
    {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        write_file(root, "clean.rs", "fn main() {}\n")?;
        write_file(root, "src/merged.rs", "a\n<<<<<<< HEAD\nb\n=======\nc\n>>>>>>> x\n")?;
        write_file(root, "docs/indented.md", "  <<<<<<< not a marker\n")?;

        let walker = FileWalker::new(&[])?;
        let files = walker.conflicted_files(root, &MarkerSet::default());

        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("src/merged.rs"));
        Ok(())
    }

    #[test]
    fn test_marker_on_first_line_counts() -> Result<()>
    {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        write_file(root, "top.txt", "<<<<<<< ours\nx\n=======\ny\n>>>>>>> theirs\n")?;

        assert!(likely_has_conflict_markers(&root.join("top.txt"), &MarkerSet::default()));
        Ok(())
    }

    #[test]
    fn test_additional_globs_prune_and_filter() -> Result<()>
    {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        write_file(root, "target/build/a.rs", "<<<<<<< a\n")?;
        write_file(root, "src/lib.rs", "pub fn x() {}")?;

        let ignores = vec!["target/**".to_string()];
        let walker = FileWalker::new(&ignores)?;
        let files = walker.walk_files(root);

        assert_eq!(files.len(), 1, "unexpected files: {files:?}");
        assert_eq!(
            files[0]
                .strip_prefix(root)
                .unwrap(),
            Path::new("src/lib.rs")
        );
        Ok(())
    }

    #[test]
    fn test_hidden_files_policy() -> Result<()>
    {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        write_file(root, ".hidden.txt", "h")?;
        write_file(root, "visible.txt", "v")?;

        let all = FileWalker::new(&[])?.walk_files(root);
        assert_eq!(all.len(), 2);

        let visible = FileWalker::new(&[])?
            .with_include_hidden(false)
            .walk_files(root);
        assert_eq!(visible.len(), 1);
        assert!(visible[0].ends_with("visible.txt"));
        Ok(())
    }
}
