//! Content checksums for change detection.
//!
//! Files are digested with MD5 and the 16-byte digest is stored base64
//! encoded, giving a fixed 24-character token that fits on one index line.

use crate::utils::{Result, ScanError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use md5::{Digest, Md5};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Read buffer size for streaming file content (64KB)
const BUFFER_SIZE: usize = 64 * 1024;

/// Compute the checksum of the file at `path`.
///
/// Any failure to open or read the file is returned as
/// [`ScanError::Checksum`] with the underlying I/O error as its source;
/// no digest is produced for partially read content.
pub fn file_checksum(path: &Path) -> Result<String> {
    let checksum_error = |source| ScanError::Checksum {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(checksum_error)?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer).map_err(checksum_error)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(STANDARD.encode(hasher.finalize()))
}

/// Checksum of an in-memory buffer, in the same encoding as [`file_checksum`]
pub fn bytes_checksum(data: &[u8]) -> String {
    STANDARD.encode(Md5::digest(data))
}

/// Compare two checksums the way the index does (ASCII case-insensitive)
pub fn checksums_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
