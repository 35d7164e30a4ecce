//! Local directory standing in for the upload bucket

use std::path::{Component, Path, PathBuf};

use crate::domain::result::{Error, Result};
use crate::ports::FileSource;

/// Serves statement files from a root directory
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a store path under the root, rejecting absolute paths and `..`
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if path.trim().is_empty() {
            return Err(Error::validation("Empty file path"));
        }
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(Error::validation(format!(
                        "File path '{}' escapes the file store",
                        path
                    )))
                }
            }
        }
        Ok(self.root.join(relative))
    }
}

impl FileSource for LocalFileStore {
    fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        std::fs::read(&full)
            .map_err(|e| Error::upstream(format!("Failed to read '{}': {}", path, e)))
    }
}
