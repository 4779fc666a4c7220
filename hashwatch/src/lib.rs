//! hashwatch library
//!
//! Index-based file integrity scanner: keeps a per-file checksum index
//! between runs and reports which files were added, modified, deleted or
//! could not be read since the previous run.

pub mod config;
pub mod executor;
pub mod fs;
pub mod index;
pub mod utils;

// Re-export commonly used types
pub use config::{Config, ScanConfig};
pub use executor::{ScanExecutor, ScanReport};
pub use index::{ComparisonResult, Entry, Index};
pub use utils::{Result, ScanError};
