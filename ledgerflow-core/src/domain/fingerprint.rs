//! Content fingerprints for files and parsed rows

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

/// SHA-256 digest of a file's raw bytes, lowercase hex
///
/// Two files with identical bytes share a fingerprint regardless of their
/// name or location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileFingerprint(String);

impl FileFingerprint {
    /// Fingerprint raw file bytes
    pub fn of(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for log lines
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for FileFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint a row's normalized field set
///
/// Fields are serialized as canonical JSON with sorted keys, so the column
/// order of the source file never changes the row's identity.
pub fn row_fingerprint(fields: &BTreeMap<&str, JsonValue>) -> String {
    // BTreeMap serializes in key order
    let canonical = serde_json::to_string(fields).unwrap_or_default();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}
