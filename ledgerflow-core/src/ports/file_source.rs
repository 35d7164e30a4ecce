//! File source port
//!
//! Statement files live in a bucket-like store addressed by relative path.
//! The pipeline only ever reads whole files.

use crate::domain::result::Result;

/// Read-only access to uploaded statement files
pub trait FileSource: Send + Sync {
    /// Fetch the raw bytes of a file
    ///
    /// A missing or unreadable file is an upstream error. Paths that try to
    /// escape the store are rejected as validation errors.
    fn fetch(&self, path: &str) -> Result<Vec<u8>>;
}

/// File name component of a store path (`uploads/2024/jan.csv` -> `jan.csv`)
pub fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
