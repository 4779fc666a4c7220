//! Configuration management for the scanner.
//!
//! Loads configuration from a TOML file, then applies `HASHWATCH_*`
//! environment variable overrides (a `.env` file is honoured).

use crate::utils::{Result, ScanError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Index file name used when no location is configured
pub const DEFAULT_INDEX_FILE_NAME: &str = "_hc_index.dat";

/// Separator for the list form of `HASHWATCH_TARGET_DIRECTORIES`
const TARGET_LIST_SEPARATOR: char = '|';

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub log: LogConfig,
}

/// Settings consumed by the scan itself
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Directories to scan
    #[serde(default)]
    pub target_directories: Vec<PathBuf>,

    /// Index file location (defaults to `_hc_index.dat` in the first target)
    #[serde(default)]
    pub index_file: Option<PathBuf>,

    /// Root folder for index backups (defaults to `backups/` next to the index)
    #[serde(default)]
    pub backup_folder: Option<PathBuf>,

    /// Semicolon-separated glob patterns matched against file names
    #[serde(default = "default_search_pattern")]
    pub search_pattern: String,

    /// Maximum recursion depth; 1 scans only the target directory itself
    #[serde(default = "default_search_level")]
    pub search_level: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_search_pattern() -> String {
    "*".to_string()
}

fn default_search_level() -> usize {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            target_directories: Vec::new(),
            index_file: None,
            backup_folder: None,
            search_pattern: default_search_pattern(),
            search_level: default_search_level(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ScanError::io(path, e))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.scan.normalize();
        Ok(config)
    }

    /// Load the optional file, apply environment overrides and fill in
    /// the working directory when no target is configured.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());

        if config.scan.target_directories.is_empty() {
            let cwd = std::env::current_dir().map_err(|e| ScanError::io(".", e))?;
            config.scan.target_directories.push(cwd);
        }

        Ok(config)
    }

    /// Apply `HASHWATCH_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dirs) = non_empty("HASHWATCH_TARGET_DIRECTORIES") {
            self.scan.target_directories = dirs
                .split(TARGET_LIST_SEPARATOR)
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(PathBuf::from)
                .collect();
        }
        if let Some(index) = non_empty("HASHWATCH_INDEX_FILE") {
            self.scan.index_file = Some(PathBuf::from(index));
        }
        if let Some(folder) = non_empty("HASHWATCH_BACKUP_FOLDER") {
            self.scan.backup_folder = Some(PathBuf::from(folder));
        }
        if let Some(pattern) = non_empty("HASHWATCH_SEARCH_PATTERN") {
            self.scan.search_pattern = pattern;
        }
        if let Some(level) = non_empty("HASHWATCH_SEARCH_LEVEL").and_then(|v| v.trim().parse().ok()) {
            self.scan.search_level = level;
        }
        if let Some(level) = non_empty("HASHWATCH_LOG_LEVEL") {
            self.log.level = level;
        }

        self.scan.normalize();
    }
}

impl ScanConfig {
    /// Create a scan configuration for the given targets with default settings
    pub fn new<I, P>(targets: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            target_directories: targets.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Individual glob patterns, in configured order
    pub fn patterns(&self) -> Vec<&str> {
        self.search_pattern
            .split(';')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect()
    }

    fn normalize(&mut self) {
        if self.search_pattern.trim().is_empty() {
            self.search_pattern = default_search_pattern();
        }
        if self.search_level == 0 {
            self.search_level = default_search_level();
        }
    }
}
