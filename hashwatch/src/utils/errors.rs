//! Custom error types for the scanner.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse configuration file: {0}")]
    ConfigFile(#[from] toml::de::Error),

    #[error("Invalid search pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error("I/O error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to compute checksum of {}", path.display())]
    Checksum {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Index line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("Failed to archive index backup {}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Index backup failed: {0}")]
    Backup(String),
}

impl ScanError {
    /// Wrap an `io::Error` with the path it occurred on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ScanError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io;

    #[test]
    fn test_checksum_error_keeps_source() {
        let err = ScanError::Checksum {
            path: PathBuf::from("/data/locked.bin"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "access denied"),
        };
        assert_eq!(err.to_string(), "Failed to compute checksum of /data/locked.bin");
        assert_eq!(err.source().unwrap().to_string(), "access denied");
    }

    #[test]
    fn test_io_helper() {
        let err = ScanError::io("/data/index.dat", io::Error::other("disk full"));
        assert_eq!(err.to_string(), "I/O error on /data/index.dat");
        assert!(err.source().is_some());
    }
}
