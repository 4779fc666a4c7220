//! Scan executor - Orchestrates a complete integrity scan.
//!
//! A run validates the target directories, loads the previous index,
//! archives and retires the old index file, walks every target while writing
//! the new index, and finally partitions the tracked entries into the
//! added / modified / unchecked / deleted result sets.

pub mod report;

use crate::config::{ScanConfig, DEFAULT_INDEX_FILE_NAME};
use crate::fs::walker::{TreeWalker, WalkOptions};
use crate::index::backup::backup_and_rotate;
use crate::index::{ComparisonResult, Index};
use crate::utils::{Result, ScanError};
use chrono::Utc;
use globset::Glob;
pub use report::ScanReport;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Name of the backup folder created next to the index by default
const DEFAULT_BACKUP_FOLDER: &str = "backups";

/// Settings of a run after defaults have been resolved
#[derive(Debug, Clone)]
struct ResolvedPlan {
    targets: Vec<PathBuf>,
    missing: Vec<PathBuf>,
    index_file: PathBuf,
    backup_folder: PathBuf,
    patterns: Vec<String>,
    max_depth: usize,
}

/// Main scan executor
pub struct ScanExecutor {
    config: ScanConfig,
    index: Index,
}

impl ScanExecutor {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            index: Index::new(),
        }
    }

    /// Index as left by the last run
    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Execute a scan.
    ///
    /// Fails when no target directory exists, when the configuration is
    /// invalid, or when the previous index could not be backed up.
    pub fn run(&mut self) -> Result<ScanReport> {
        let started_at = Utc::now();
        let plan = self.resolve()?;

        info!(
            "Scanning is started. Targets: {}, index: {}, pattern: {}, level: {}",
            display_paths(&plan.targets),
            plan.index_file.display(),
            plan.patterns.join(";"),
            plan.max_depth
        );

        self.index = Index::new();
        let load = self.index.load(&plan.index_file)?;
        info!(
            "Loaded {} entries from previous index ({} malformed lines skipped)",
            load.loaded, load.skipped
        );

        let backup_archive = backup_and_rotate(&plan.index_file, &plan.backup_folder)?;

        let options = WalkOptions {
            max_depth: plan.max_depth,
            patterns: plan.patterns.clone(),
            excluded_dirs: vec![plan.backup_folder.clone()],
            ..WalkOptions::new(&plan.index_file)
        };
        let mut walker = TreeWalker::new(&mut self.index, &options)?;
        for target in &plan.targets {
            debug!("Walking {}", target.display());
            walker.walk_target(target)?;
        }
        let stats = walker.stats();
        debug!(?stats, "Walk finished");

        let total_files = self.index.len();
        let new_files = self.index.paths_with(ComparisonResult::Added);
        let modified_files = self.index.paths_with(ComparisonResult::Modified);
        let unchecked_files = self.index.paths_with(ComparisonResult::Error);
        let deleted_files = self.collect_deleted();

        let report = ScanReport {
            started_at,
            finished_at: Utc::now(),
            target_directories: plan.targets,
            missing_directories: plan.missing,
            index_file: plan.index_file,
            backup_archive,
            total_files,
            new_files,
            modified_files,
            unchecked_files,
            deleted_files,
            skipped_files: stats.files_skipped,
        };

        info!(
            "Scan finished: {} tracked, {} added, {} modified, {} unchecked, {} deleted",
            report.total_files,
            report.new_files.len(),
            report.modified_files.len(),
            report.unchecked_files.len(),
            report.deleted_files.len()
        );

        Ok(report)
    }

    /// Entries not revisited this run whose file no longer exists.
    ///
    /// This is the only place a file is considered deleted; the entries are
    /// dropped from memory and were never written to the new index.
    fn collect_deleted(&mut self) -> Vec<PathBuf> {
        let deleted = self
            .index
            .iter()
            .filter(|e| e.last_result == ComparisonResult::None && !e.path.exists())
            .map(|e| e.path.clone())
            .collect::<Vec<_>>();

        let mut deleted_files = Vec::with_capacity(deleted.len());
        for path in deleted {
            if let Some(mut entry) = self.index.remove(&path) {
                entry.last_result = ComparisonResult::Deleted;
                debug!("Deleted {}", entry.path.display());
                deleted_files.push(entry.path);
            }
        }
        deleted_files.sort();
        deleted_files
    }

    fn resolve(&self) -> Result<ResolvedPlan> {
        let mut unique: Vec<PathBuf> = Vec::with_capacity(self.config.target_directories.len());
        for dir in &self.config.target_directories {
            let dir = absolute(dir);
            if unique.contains(&dir) {
                debug!("Ignoring duplicate target {}", dir.display());
                continue;
            }
            unique.push(dir);
        }
        let (targets, missing): (Vec<PathBuf>, Vec<PathBuf>) =
            unique.into_iter().partition(|dir| dir.is_dir());

        if !missing.is_empty() {
            error!("Target directories ({}) could not be found", display_paths(&missing));
        }
        let Some(first) = targets.first() else {
            return Err(ScanError::Config(
                "none of the configured target directories exist".into(),
            ));
        };

        let index_file = match &self.config.index_file {
            Some(path) => absolute(path),
            None => first.join(DEFAULT_INDEX_FILE_NAME),
        };
        let backup_folder = match &self.config.backup_folder {
            Some(path) => absolute(path),
            None => index_file
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(DEFAULT_BACKUP_FOLDER),
        };

        let mut patterns: Vec<String> = self
            .config
            .patterns()
            .into_iter()
            .map(str::to_string)
            .collect();
        if patterns.is_empty() {
            patterns.push("*".to_string());
        }
        // Reject bad patterns before the previous index is rotated away
        for pattern in &patterns {
            Glob::new(pattern)?;
        }

        Ok(ResolvedPlan {
            targets,
            missing,
            index_file,
            backup_folder,
            patterns,
            max_depth: self.config.search_level.max(1),
        })
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::checksum::bytes_checksum;
    use crate::index::backup::{read_archive, ARCHIVE_EXTENSION};
    use crate::index::Entry;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _temp_dir: TempDir,
        target: PathBuf,
        index_file: PathBuf,
        backups: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let target = temp_dir.path().join("target");
            let backups = temp_dir.path().join("backups");
            fs::create_dir(&target).unwrap();
            Self {
                index_file: target.join(DEFAULT_INDEX_FILE_NAME),
                target,
                backups,
                _temp_dir: temp_dir,
            }
        }

        fn config(&self) -> ScanConfig {
            let mut config = ScanConfig::new([self.target.clone()]);
            config.backup_folder = Some(self.backups.clone());
            config
        }

        fn run(&self) -> ScanReport {
            self.run_with(self.config())
        }

        fn run_with(&self, config: ScanConfig) -> ScanReport {
            ScanExecutor::new(config).run().unwrap()
        }

        fn index_entries(&self) -> Vec<Entry> {
            fs::read_to_string(&self.index_file)
                .unwrap_or_default()
                .lines()
                .enumerate()
                .map(|(i, l)| Entry::parse_line(l, i + 1).unwrap())
                .collect()
        }

        fn archives(&self) -> Vec<PathBuf> {
            fs::read_dir(&self.backups)
                .map(|rd| {
                    rd.filter_map(|e| e.ok())
                        .map(|e| e.path())
                        .filter(|p| p.to_string_lossy().ends_with(ARCHIVE_EXTENSION))
                        .collect()
                })
                .unwrap_or_default()
        }
    }

    #[test]
    fn test_add_modify_delete_scenario() {
        let fx = Fixture::new();
        let a = fx.target.join("a.txt");

        fs::write(&a, "X").unwrap();
        let run1 = fx.run();
        assert_eq!(run1.new_files, vec![a.clone()]);
        assert_eq!(run1.total_files, 1);
        let entries = fx.index_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, a);
        assert_eq!(entries[0].last_result, ComparisonResult::Added);

        fs::write(&a, "Y").unwrap();
        let run2 = fx.run();
        assert_eq!(run2.modified_files, vec![a.clone()]);
        assert!(run2.new_files.is_empty());
        let entries = fx.index_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].previous_checksum, bytes_checksum(b"X"));
        assert_eq!(entries[0].checksum, bytes_checksum(b"Y"));
        assert!(entries[0].changed_at.is_some());

        fs::remove_file(&a).unwrap();
        let run3 = fx.run();
        assert_eq!(run3.deleted_files, vec![a.clone()]);
        assert!(fx.index_entries().iter().all(|e| e.path != a));

        // Gone for good: the next run no longer knows the file
        let run4 = fx.run();
        assert!(run4.deleted_files.is_empty());
        assert_eq!(run4.total_files, 0);
    }

    #[test]
    fn test_second_run_is_idempotent() {
        let fx = Fixture::new();
        fs::create_dir(fx.target.join("sub")).unwrap();
        fs::write(fx.target.join("one.txt"), "1").unwrap();
        fs::write(fx.target.join("sub/two.txt"), "2").unwrap();
        let mut config = fx.config();
        config.search_level = 2;

        let first = fx.run_with(config.clone());
        assert_eq!(first.new_files.len(), 2);
        let checksums: Vec<String> = fx.index_entries().into_iter().map(|e| e.checksum).collect();

        let second = fx.run_with(config);
        assert!(second.is_clean());
        assert_eq!(second.total_files, 2);

        let entries = fx.index_entries();
        assert!(entries.iter().all(|e| e.last_result == ComparisonResult::Unmodified));
        let mut again: Vec<String> = entries.into_iter().map(|e| e.checksum).collect();
        let mut before = checksums;
        again.sort();
        before.sort();
        assert_eq!(again, before);
    }

    #[test]
    fn test_new_file_timestamps() {
        let fx = Fixture::new();
        fs::write(fx.target.join("a.txt"), "a").unwrap();
        fx.run();

        let before = Utc::now() - chrono::Duration::seconds(1);
        fs::write(fx.target.join("b.txt"), "b").unwrap();
        let report = fx.run();
        let after = Utc::now();

        assert_eq!(report.new_files, vec![fx.target.join("b.txt")]);
        let entry = fx
            .index_entries()
            .into_iter()
            .find(|e| e.path == fx.target.join("b.txt"))
            .unwrap();
        assert!(entry.previous_checksum.is_empty());
        assert!(entry.changed_at.is_none());
        assert!(entry.created_at >= before && entry.created_at <= after);
    }

    #[test]
    fn test_backup_contains_previous_index() {
        let fx = Fixture::new();
        fs::write(fx.target.join("a.txt"), "a").unwrap();
        fx.run();
        assert!(fx.archives().is_empty());
        let previous = fs::read(&fx.index_file).unwrap();

        fs::write(fx.target.join("b.txt"), "b").unwrap();
        let report = fx.run();

        let archives = fx.archives();
        assert_eq!(archives.len(), 1);
        assert_eq!(report.backup_archive.as_ref(), Some(&archives[0]));

        let files = read_archive(&archives[0]).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].1, previous);

        // Fresh index holds only this run's entries
        let entries = fx.index_entries();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.last_result == ComparisonResult::Unmodified));
        assert!(entries.iter().any(|e| e.last_result == ComparisonResult::Added));
    }

    #[test]
    fn test_default_backup_folder_is_not_scanned() {
        let fx = Fixture::new();
        fs::write(fx.target.join("a.txt"), "a").unwrap();
        let mut config = fx.config();
        config.backup_folder = None;
        config.search_level = 3;

        fx.run_with(config.clone());
        fx.run_with(config.clone());
        let third = fx.run_with(config);

        assert!(fx.target.join(DEFAULT_BACKUP_FOLDER).is_dir());
        assert!(third.is_clean());
        assert_eq!(third.total_files, 1);
    }

    #[test]
    fn test_all_targets_missing_fails() {
        let temp_dir = TempDir::new().unwrap();
        let config = ScanConfig::new([temp_dir.path().join("nope"), temp_dir.path().join("gone")]);

        let err = ScanExecutor::new(config).run().unwrap_err();
        assert!(matches!(err, ScanError::Config(_)));
    }

    #[test]
    fn test_missing_target_is_skipped() {
        let fx = Fixture::new();
        fs::write(fx.target.join("a.txt"), "a").unwrap();
        let missing = fx.target.parent().unwrap().join("missing");
        let mut config = fx.config();
        config.target_directories.insert(0, missing.clone());

        let report = fx.run_with(config);

        assert_eq!(report.missing_directories, vec![missing]);
        assert_eq!(report.new_files, vec![fx.target.join("a.txt")]);
        // Default index lands in the first existing target
        assert_eq!(report.index_file, fx.index_file);
    }

    #[test]
    fn test_stale_entry_for_unvisited_existing_file_is_not_deleted() {
        let fx = Fixture::new();
        fs::write(fx.target.join("a.txt"), "a").unwrap();
        fs::write(fx.target.join("b.log"), "b").unwrap();
        fx.run();

        // Narrow the pattern: b.log is no longer visited but still exists
        let mut config = fx.config();
        config.search_pattern = "*.txt".to_string();
        let report = fx.run_with(config);

        assert!(report.deleted_files.is_empty());
        assert_eq!(report.total_files, 2);
        let entries = fx.index_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, fx.target.join("a.txt"));
    }

    #[test]
    fn test_multiple_targets_share_one_index() {
        let fx = Fixture::new();
        let second = fx.target.parent().unwrap().join("second");
        fs::create_dir(&second).unwrap();
        fs::write(fx.target.join("a.txt"), "a").unwrap();
        fs::write(second.join("b.txt"), "b").unwrap();

        let mut config = fx.config();
        config.target_directories.push(second.clone());
        let report = fx.run_with(config);

        let mut expected = vec![fx.target.join("a.txt"), second.join("b.txt")];
        expected.sort();
        assert_eq!(report.new_files, expected);
        assert_eq!(fx.index_entries().len(), 2);
    }

    #[test]
    fn test_malformed_previous_index_lines_are_ignored() {
        let fx = Fixture::new();
        fs::write(fx.target.join("a.txt"), "a").unwrap();
        fs::write(&fx.index_file, "this is not an index line\n").unwrap();

        let report = fx.run();

        assert_eq!(report.new_files, vec![fx.target.join("a.txt")]);
        assert!(report.deleted_files.is_empty());
        assert_eq!(fx.archives().len(), 1);
    }

    #[test]
    fn test_non_utf8_index_line_does_not_abort() {
        let fx = Fixture::new();
        let a = fx.target.join("a.txt");
        fs::write(&a, "a").unwrap();
        fx.run();

        let mut previous = fs::read(&fx.index_file).unwrap();
        previous.extend_from_slice(b"/bad\xff\xfe|Added|abc=||20240101000000|\n");
        fs::write(&fx.index_file, previous).unwrap();

        let report = fx.run();

        assert!(report.is_clean());
        assert_eq!(report.total_files, 1);
        assert_eq!(fx.index_entries().len(), 1);
        assert_eq!(fx.archives().len(), 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_file_name_stays_clean() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let fx = Fixture::new();
        fs::write(fx.target.join(OsStr::from_bytes(b"caf\xe9.txt")), "c").unwrap();
        fs::write(fx.target.join("a.txt"), "a").unwrap();

        let first = fx.run();
        assert_eq!(first.new_files, vec![fx.target.join("a.txt")]);
        assert_eq!(first.skipped_files, 1);

        let second = fx.run();
        assert!(second.is_clean());
        assert_eq!(second.total_files, 1);
        assert_eq!(second.skipped_files, 1);
    }

    #[test]
    fn test_duplicate_and_nested_targets_classify_once() {
        let fx = Fixture::new();
        fs::create_dir(fx.target.join("sub")).unwrap();
        fs::write(fx.target.join("a.txt"), "a").unwrap();
        fs::write(fx.target.join("sub/b.txt"), "b").unwrap();

        let mut config = fx.config();
        config.search_level = 2;
        config.target_directories = vec![
            fx.target.clone(),
            fx.target.join("."),
            fx.target.join("sub"),
        ];
        let report = fx.run_with(config.clone());

        assert_eq!(report.target_directories.len(), 2);
        assert_eq!(
            report.new_files,
            vec![fx.target.join("a.txt"), fx.target.join("sub/b.txt")]
        );
        let entries = fx.index_entries();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.last_result == ComparisonResult::Added));

        let second = fx.run_with(config);
        assert!(second.is_clean());
        assert_eq!(fx.index_entries().len(), 2);
    }

    #[test]
    fn test_invalid_pattern_keeps_previous_index() {
        let fx = Fixture::new();
        fs::write(fx.target.join("a.txt"), "a").unwrap();
        fx.run();

        let mut config = fx.config();
        config.search_pattern = "[broken".to_string();
        let err = ScanExecutor::new(config).run().unwrap_err();

        assert!(matches!(err, ScanError::Pattern(_)));
        assert!(fx.index_file.exists());
        assert!(fx.archives().is_empty());
    }

    #[test]
    fn test_executor_exposes_index() {
        let fx = Fixture::new();
        fs::write(fx.target.join("a.txt"), "a").unwrap();

        let mut executor = ScanExecutor::new(fx.config());
        executor.run().unwrap();

        let entry = executor.index().get(&fx.target.join("a.txt")).unwrap();
        assert_eq!(entry.last_result, ComparisonResult::Added);
    }
}
