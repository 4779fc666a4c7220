//! Backup and rotation of the previous index file.
//!
//! Before a run writes anything, the existing index is copied into a
//! uniquely named staging folder under the backup root, the folder is packed
//! into `<timestamp>_<uuid>.tar.zst`, and the staging folder is removed. The
//! index file itself is deleted only once the archive has been verified on disk.

use super::TIMESTAMP_FORMAT;
use crate::utils::{Result, ScanError};
use chrono::Utc;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

/// zstd level for index archives
const COMPRESSION_LEVEL: i32 = 3;

/// Extension of the produced archives
pub const ARCHIVE_EXTENSION: &str = "tar.zst";

/// Archive `index_file` under `backup_root` and delete it.
///
/// Returns the archive path, or `None` when there was no index to back up.
/// Failing to produce the archive is fatal: the index file is left in place.
pub fn backup_and_rotate(index_file: &Path, backup_root: &Path) -> Result<Option<PathBuf>> {
    rotate_with(index_file, backup_root, write_archive)
}

fn rotate_with<F>(index_file: &Path, backup_root: &Path, archive: F) -> Result<Option<PathBuf>>
where
    F: FnOnce(&Path, &Path, &str) -> io::Result<()>,
{
    if !index_file.is_file() {
        return Ok(None);
    }

    fs::create_dir_all(backup_root).map_err(|e| ScanError::io(backup_root, e))?;

    let name = format!(
        "{}_{}",
        Utc::now().format(TIMESTAMP_FORMAT),
        Uuid::new_v4().simple()
    );
    let staging = backup_root.join(&name);
    fs::create_dir(&staging).map_err(|e| ScanError::io(&staging, e))?;

    let file_name = index_file
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "index.dat".into());
    let staged_copy = staging.join(file_name);

    let archive_path = backup_root.join(format!("{name}.{ARCHIVE_EXTENSION}"));
    let archived = fs::copy(index_file, &staged_copy)
        .map_err(|e| ScanError::io(index_file, e))
        .and_then(|_| {
            archive(&staging, &archive_path, &name).map_err(|source| {
                // Drop whatever part of the archive was written
                if archive_path.exists() {
                    if let Err(e) = fs::remove_file(&archive_path) {
                        warn!("Failed to remove partial archive {}: {}", archive_path.display(), e);
                    }
                }
                ScanError::Archive {
                    path: archive_path.clone(),
                    source,
                }
            })
        });

    if let Err(e) = fs::remove_dir_all(&staging) {
        warn!("Failed to remove staging folder {}: {}", staging.display(), e);
    }
    archived?;

    let verified = fs::metadata(&archive_path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false);
    if !verified {
        return Err(ScanError::Backup(format!(
            "archive {} was not created, keeping {}",
            archive_path.display(),
            index_file.display()
        )));
    }

    fs::remove_file(index_file).map_err(|e| ScanError::io(index_file, e))?;
    info!(
        "Backed up index {} to {}",
        index_file.display(),
        archive_path.display()
    );

    Ok(Some(archive_path))
}

/// Pack `staging` into a zstd-compressed tar at `archive_path`, rooted at `name`
fn write_archive(staging: &Path, archive_path: &Path, name: &str) -> io::Result<()> {
    let file = File::create(archive_path)?;
    let encoder = zstd::Encoder::new(file, COMPRESSION_LEVEL)?;

    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(name, staging)?;
    let encoder = builder.into_inner()?;
    let file = encoder.finish()?;
    file.sync_all()?;

    Ok(())
}

/// Entries (path, content) of an index archive
#[cfg(test)]
pub(crate) fn read_archive(archive_path: &Path) -> io::Result<Vec<(PathBuf, Vec<u8>)>> {
    use std::io::Read;

    let decoder = zstd::Decoder::new(File::open(archive_path)?)?;
    let mut archive = tar::Archive::new(decoder);
    let mut files = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path()?.into_owned();
        let mut content = Vec::new();
        entry.read_to_end(&mut content)?;
        files.push((path, content));
    }

    Ok(files)
}
