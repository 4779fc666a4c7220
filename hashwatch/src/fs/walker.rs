//! Directory traversal and per-file classification.
//!
//! Each target directory is walked level by level up to the configured
//! search depth. Files whose name matches one of the search patterns are
//! checked against the [`Index`] and the fresh entry is appended to the new
//! index file as soon as the file has been classified.

use crate::fs::checksum::{checksums_match, file_checksum};
use crate::index::{is_indexable, ComparisonResult, Entry, Index, IndexWriter, FIELD_SEPARATOR};
use crate::utils::Result;
use chrono::Utc;
use globset::{Glob, GlobMatcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// Options for directory walking
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Maximum depth; the target directory itself is level 1
    pub max_depth: usize,

    /// Glob patterns matched against file names, in order
    pub patterns: Vec<String>,

    /// Index file, never scanned itself
    pub index_file: PathBuf,

    /// Directories never descended into (the backup folder)
    pub excluded_dirs: Vec<PathBuf>,
}

impl WalkOptions {
    pub fn new(index_file: impl Into<PathBuf>) -> Self {
        Self {
            max_depth: 1,
            patterns: vec!["*".to_string()],
            index_file: index_file.into(),
            excluded_dirs: Vec::new(),
        }
    }
}

/// Counters collected while walking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub directories: usize,
    pub files_checked: usize,
    /// Files left out of the index: unreadable new files and paths that
    /// cannot be stored on one index line
    pub files_skipped: usize,
    /// Directories that vanished or could not be listed
    pub directories_skipped: usize,
    pub lines_written: usize,
}

/// Walks target directories and classifies every matching file
pub struct TreeWalker<'a> {
    index: &'a mut Index,
    patterns: Vec<GlobMatcher>,
    max_depth: usize,
    index_file: PathBuf,
    index_key: String,
    excluded_keys: HashSet<String>,
    /// Files already classified during this run, across all targets
    visited: HashSet<PathBuf>,
    stats: WalkStats,
}

impl<'a> TreeWalker<'a> {
    pub fn new(index: &'a mut Index, options: &WalkOptions) -> Result<Self> {
        let patterns = options
            .patterns
            .iter()
            .map(|p| Glob::new(p).map(|g| g.compile_matcher()))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            index,
            patterns,
            max_depth: options.max_depth.max(1),
            index_key: path_key(&options.index_file),
            index_file: options.index_file.clone(),
            excluded_keys: options.excluded_dirs.iter().map(|d| path_key(d)).collect(),
            visited: HashSet::new(),
            stats: WalkStats::default(),
        })
    }

    pub fn stats(&self) -> WalkStats {
        self.stats
    }

    /// Walk one target directory, appending to the index file.
    ///
    /// The index file is opened for this target only and flushed and closed
    /// before returning.
    pub fn walk_target(&mut self, root: &Path) -> Result<()> {
        let mut writer = IndexWriter::open(&self.index_file)?;
        self.visit(root, 1, &mut writer)?;
        self.stats.lines_written += writer.finish()?;
        Ok(())
    }

    fn visit(&mut self, dir: &Path, level: usize, writer: &mut IndexWriter) -> Result<()> {
        let Some((files, subdirs)) = self.list_directory(dir) else {
            self.stats.directories_skipped += 1;
            return Ok(());
        };
        self.stats.directories += 1;

        for pattern in &self.patterns {
            for file in &files {
                let matched = file
                    .file_name()
                    .map(|name| pattern.is_match(name))
                    .unwrap_or(false);
                if !matched || !self.visited.insert(file.clone()) {
                    continue;
                }
                if path_key(file) == self.index_key {
                    continue;
                }
                if !is_indexable(file) {
                    warn!(
                        "Not indexing {}: path is not valid UTF-8 or contains a line break or '{}'",
                        file.display(),
                        FIELD_SEPARATOR
                    );
                    self.stats.files_skipped += 1;
                    continue;
                }

                if classify(self.index, file).is_none() {
                    self.stats.files_skipped += 1;
                    continue;
                }
                self.stats.files_checked += 1;

                if let Some(entry) = self.index.get(file) {
                    writer.append(entry)?;
                }
            }
        }

        if level < self.max_depth {
            for subdir in &subdirs {
                if self.excluded_keys.contains(&path_key(subdir)) {
                    debug!("Skipping excluded directory {}", subdir.display());
                    continue;
                }
                self.visit(subdir, level + 1, writer)?;
            }
        }

        Ok(())
    }

    /// Direct child files and directories of `dir`, sorted by name.
    ///
    /// Returns `None` when the directory itself cannot be read.
    fn list_directory(&self, dir: &Path) -> Option<(Vec<PathBuf>, Vec<PathBuf>)> {
        let mut files = Vec::new();
        let mut subdirs = Vec::new();

        let walker = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    warn!("Skipping directory {}: {}", dir.display(), e);
                    return None;
                }
                Err(e) => {
                    warn!("Skipping entry in {}: {}", dir.display(), e);
                    continue;
                }
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                if entry.path_is_symlink() {
                    debug!("Not following directory link {}", entry.path().display());
                    continue;
                }
                subdirs.push(entry.into_path());
            } else if file_type.is_file() {
                files.push(entry.into_path());
            }
        }

        Some((files, subdirs))
    }
}

/// Classify `path` against the index, updating or inserting its entry.
///
/// Returns `None` when the file is new and its checksum could not be
/// computed; such a file is not recorded. [`ComparisonResult::Deleted`] is
/// never produced here: deletion is only known once every target has been
/// walked.
pub fn classify(index: &mut Index, path: &Path) -> Option<ComparisonResult> {
    let checksum = file_checksum(path);

    let result = match index.get_mut(path) {
        Some(entry) => {
            let result = match checksum {
                Ok(checksum) if checksums_match(&checksum, &entry.checksum) => {
                    ComparisonResult::Unmodified
                }
                Ok(checksum) => {
                    entry.mark_modified(checksum, Utc::now());
                    ComparisonResult::Modified
                }
                Err(e) => {
                    warn!(error = &e as &dyn std::error::Error, "Could not check file");
                    ComparisonResult::Error
                }
            };
            entry.last_result = result;
            trace!("Checked {} -> {}", path.display(), result);
            result
        }
        None => match checksum {
            Ok(checksum) => {
                index.insert(Entry::added(path.to_path_buf(), checksum, Utc::now()));
                trace!("Added {} to index", path.display());
                ComparisonResult::Added
            }
            Err(e) => {
                warn!(error = &e as &dyn std::error::Error, "Not indexing new file");
                return None;
            }
        },
    };

    Some(result)
}

/// Key used to recognise the index file among scanned files
fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}
