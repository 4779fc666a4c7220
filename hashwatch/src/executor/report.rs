//! Scan results and their human-readable summary.

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::fmt::Write;
use std::path::PathBuf;

/// Outcome of a completed scan
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub target_directories: Vec<PathBuf>,
    /// Configured targets that did not exist and were not scanned
    pub missing_directories: Vec<PathBuf>,
    pub index_file: PathBuf,
    /// Archive holding the previous index, if there was one
    pub backup_archive: Option<PathBuf>,
    /// Entries tracked in memory when results were aggregated
    pub total_files: usize,
    pub new_files: Vec<PathBuf>,
    pub modified_files: Vec<PathBuf>,
    /// Known files whose checksum could not be computed
    pub unchecked_files: Vec<PathBuf>,
    pub deleted_files: Vec<PathBuf>,
    /// Files left out of the index (unreadable new files, unrepresentable paths)
    pub skipped_files: usize,
}

impl ScanReport {
    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    /// True when nothing was added, modified, deleted or left unchecked
    pub fn is_clean(&self) -> bool {
        self.new_files.is_empty()
            && self.modified_files.is_empty()
            && self.unchecked_files.is_empty()
            && self.deleted_files.is_empty()
    }

    /// Multi-line summary: timings, counts, then the changed file lists
    pub fn summary(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "Scanning was completed.");
        let _ = writeln!(out, "Start Time: {}", local_time(&self.started_at));
        let _ = writeln!(out, "Finish Time: {}", local_time(&self.finished_at));
        let _ = writeln!(out, "Duration: {:.1} seconds", self.duration_secs());
        let _ = writeln!(out, "Total File Count: {}", self.total_files);
        let _ = writeln!(out, "Modified: {}", self.modified_files.len());
        let _ = writeln!(out, "Added: {}", self.new_files.len());
        let _ = writeln!(out, "Unchecked: {}", self.unchecked_files.len());
        let _ = writeln!(out, "Deleted: {}", self.deleted_files.len());
        if self.skipped_files > 0 {
            let _ = writeln!(out, "Skipped: {}", self.skipped_files);
        }

        append_list(&mut out, "Modified files", &self.modified_files);
        append_list(&mut out, "Deleted files", &self.deleted_files);
        append_list(&mut out, "New files", &self.new_files);
        append_list(&mut out, "Unchecked files", &self.unchecked_files);

        out
    }
}

fn local_time(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn append_list(out: &mut String, title: &str, paths: &[PathBuf]) {
    if paths.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n{title}:");
    for path in paths {
        let _ = writeln!(out, "{}", path.display());
    }
}
