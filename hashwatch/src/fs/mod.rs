//! File system access: content checksums and directory traversal.

pub mod checksum;
pub mod walker;
