//! Persisted checksum index.
//!
//! The index maps every tracked file path to its last known checksum and
//! comparison metadata. On disk it is a flat UTF-8 file with one record per
//! line:
//!
//! ```text
//! path|lastResult|checksum|previousChecksum|createdAt|changedAt
//! ```
//!
//! Timestamps are UTC in `YYYYMMDDHHMMSS` form and `changedAt` is empty
//! until the file is first seen to change. A run loads the previous file,
//! archives it (see [`backup`]) and then appends a fresh line for every file
//! it visits, so the new file holds exactly this run's entries.

pub mod backup;

use crate::utils::{Result, ScanError};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// Field separator of an index line
pub const FIELD_SEPARATOR: char = '|';

/// Timestamp layout of the `createdAt` / `changedAt` fields
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

const FIELD_COUNT: usize = 6;

/// Outcome of comparing a file against its index entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum ComparisonResult {
    /// Loaded from a previous run and not visited yet
    #[default]
    None,
    Unmodified,
    Added,
    Modified,
    /// Known to the index but gone from disk. Only assigned when results are
    /// aggregated after the walk, never by the per-file classifier.
    Deleted,
    /// The checksum could not be computed
    Error,
}

impl ComparisonResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonResult::None => "None",
            ComparisonResult::Unmodified => "Unmodified",
            ComparisonResult::Added => "Added",
            ComparisonResult::Modified => "Modified",
            ComparisonResult::Deleted => "Deleted",
            ComparisonResult::Error => "Error",
        }
    }
}

impl fmt::Display for ComparisonResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComparisonResult {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "None" => Ok(ComparisonResult::None),
            "Unmodified" => Ok(ComparisonResult::Unmodified),
            "Added" => Ok(ComparisonResult::Added),
            "Modified" => Ok(ComparisonResult::Modified),
            "Deleted" => Ok(ComparisonResult::Deleted),
            "Error" => Ok(ComparisonResult::Error),
            other => Err(format!("unknown comparison result '{other}'")),
        }
    }
}

/// One tracked file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub path: PathBuf,
    pub checksum: String,
    /// Checksum before the most recent detected change (empty if never changed)
    pub previous_checksum: String,
    pub created_at: DateTime<Utc>,
    pub changed_at: Option<DateTime<Utc>>,
    pub last_result: ComparisonResult,
}

impl Entry {
    /// Entry for a file seen for the first time
    pub fn added(path: PathBuf, checksum: String, now: DateTime<Utc>) -> Self {
        Self {
            path,
            checksum,
            previous_checksum: String::new(),
            created_at: now,
            changed_at: None,
            last_result: ComparisonResult::Added,
        }
    }

    /// Record a content change
    pub fn mark_modified(&mut self, checksum: String, now: DateTime<Utc>) {
        self.previous_checksum = std::mem::replace(&mut self.checksum, checksum);
        self.changed_at = Some(now);
        self.last_result = ComparisonResult::Modified;
    }

    /// Serialize to one index line (without the trailing newline).
    ///
    /// Returns `None` when the path is not valid UTF-8 or cannot be
    /// represented on a single line.
    pub fn to_line(&self) -> Option<String> {
        if !is_indexable(&self.path) {
            return None;
        }
        let path = self.path.to_str()?;

        Some(format!(
            "{path}{sep}{result}{sep}{checksum}{sep}{previous}{sep}{created}{sep}{changed}",
            sep = FIELD_SEPARATOR,
            result = self.last_result,
            checksum = self.checksum,
            previous = self.previous_checksum,
            created = format_timestamp(&self.created_at),
            changed = self
                .changed_at
                .as_ref()
                .map(format_timestamp)
                .unwrap_or_default(),
        ))
    }

    /// Parse one index line. `line_no` is 1-based and only used for errors.
    pub fn parse_line(line: &str, line_no: usize) -> Result<Self> {
        let parse_error = |reason: String| ScanError::Parse {
            line: line_no,
            reason,
        };

        if !line.contains(FIELD_SEPARATOR) {
            return Err(parse_error("missing field separator".into()));
        }

        let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
        if fields.len() != FIELD_COUNT {
            return Err(parse_error(format!(
                "expected {FIELD_COUNT} fields, found {}",
                fields.len()
            )));
        }

        if fields[0].is_empty() {
            return Err(parse_error("empty path".into()));
        }
        let last_result = fields[1].parse::<ComparisonResult>().map_err(parse_error)?;
        if fields[2].is_empty() {
            return Err(parse_error("empty checksum".into()));
        }
        let created_at = parse_timestamp(fields[4]).map_err(parse_error)?;
        let changed_at = match fields[5] {
            "" => None,
            value => Some(parse_timestamp(value).map_err(parse_error)?),
        };

        Ok(Self {
            path: PathBuf::from(fields[0]),
            checksum: fields[2].to_string(),
            previous_checksum: fields[3].to_string(),
            created_at,
            changed_at,
            last_result,
        })
    }
}

/// Whether `path` can be stored on a single index line
pub fn is_indexable(path: &Path) -> bool {
    path.to_str()
        .is_some_and(|p| !p.contains(FIELD_SEPARATOR) && !p.contains(['\n', '\r']))
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("invalid timestamp '{value}': {e}"))
}

/// Counters from loading an index file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub loaded: usize,
    pub skipped: usize,
}

/// In-memory index, keyed by path
#[derive(Debug, Default)]
pub struct Index {
    entries: HashMap<PathBuf, Entry>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate the index from `path`.
    ///
    /// A missing file is an empty index. Malformed lines are skipped with a
    /// warning. Every loaded entry starts with [`ComparisonResult::None`]
    /// whatever result was stored.
    pub fn load(&mut self, path: &Path) -> Result<LoadStats> {
        let mut stats = LoadStats::default();

        if !path.exists() {
            debug!("No index file at {}, starting empty", path.display());
            return Ok(stats);
        }

        let file = File::open(path).map_err(|e| ScanError::io(path, e))?;
        for (idx, raw) in BufReader::new(file).split(b'\n').enumerate() {
            let raw = raw.map_err(|e| ScanError::io(path, e))?;
            let line = match std::str::from_utf8(&raw) {
                Ok(line) => line.trim_end_matches('\r'),
                Err(e) => {
                    warn!(
                        "Skipping malformed entry in {}: line {} is not valid UTF-8 ({})",
                        path.display(),
                        idx + 1,
                        e
                    );
                    stats.skipped += 1;
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            match Entry::parse_line(line, idx + 1) {
                Ok(mut entry) => {
                    entry.last_result = ComparisonResult::None;
                    self.entries.insert(entry.path.clone(), entry);
                    stats.loaded += 1;
                }
                Err(e) => {
                    warn!("Skipping malformed entry in {}: {}", path.display(), e);
                    stats.skipped += 1;
                }
            }
        }

        debug!(
            "Loaded {} index entries from {} ({} skipped)",
            stats.loaded,
            path.display(),
            stats.skipped
        );
        Ok(stats)
    }

    pub fn get(&self, path: &Path) -> Option<&Entry> {
        self.entries.get(path)
    }

    pub fn get_mut(&mut self, path: &Path) -> Option<&mut Entry> {
        self.entries.get_mut(path)
    }

    pub fn insert(&mut self, entry: Entry) {
        self.entries.insert(entry.path.clone(), entry);
    }

    pub fn remove(&mut self, path: &Path) -> Option<Entry> {
        self.entries.remove(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    /// Paths whose entry currently carries `result`, sorted
    pub fn paths_with(&self, result: ComparisonResult) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .entries
            .values()
            .filter(|e| e.last_result == result)
            .map(|e| e.path.clone())
            .collect();
        paths.sort();
        paths
    }
}

/// Appends entries to the on-disk index.
///
/// The file is created if absent and opened in append mode. Dropping the
/// writer without calling [`IndexWriter::finish`] still flushes on a best
/// effort basis, but errors are only reported by `finish`.
pub struct IndexWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    written: usize,
}

impl IndexWriter {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ScanError::io(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    /// Append `entry`. Deleted entries are never persisted; returns whether a
    /// line was written.
    pub fn append(&mut self, entry: &Entry) -> Result<bool> {
        if entry.last_result == ComparisonResult::Deleted {
            return Ok(false);
        }

        let Some(line) = entry.to_line() else {
            warn!(
                "Path {} is not valid UTF-8 or contains a line break or '{}' and cannot be indexed",
                entry.path.display(),
                FIELD_SEPARATOR
            );
            return Ok(false);
        };

        writeln!(self.writer, "{line}").map_err(|e| ScanError::io(&self.path, e))?;
        self.written += 1;
        Ok(true)
    }

    /// Lines written through this writer
    pub fn written(&self) -> usize {
        self.written
    }

    /// Flush and close the file
    pub fn finish(mut self) -> Result<usize> {
        self.writer.flush().map_err(|e| ScanError::io(&self.path, e))?;
        Ok(self.written)
    }
}
