//! Container discovery
//!
//! The batch input is a single directory of container archives,
//! enumerated once at startup. Anything that is not a `.zip` regular file
//! is ignored. Entries are sorted so batch order is deterministic across
//! platforms.

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::Result;

/// Discovery over the batch input directory.
#[derive(Debug, Clone)]
pub struct ArchiveDiscovery {
    /// Container file extension, without the dot
    extension: String,
}

impl ArchiveDiscovery {
    pub fn new() -> Self {
        Self {
            extension: "zip".to_string(),
        }
    }

    /// Override the container extension.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Check whether a path names a container archive.
    pub fn is_container(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|extension| extension.to_str())
            .map(|extension| extension.eq_ignore_ascii_case(&self.extension))
            .unwrap_or(false)
    }

    /// Enumerate the container archives in `dir`, sorted by name.
    pub async fn discover_archives(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut archives = Vec::new();
        let mut read_dir = fs::read_dir(dir).await?;

        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if !self.is_container(&path) {
                continue;
            }
            let file_type = entry.file_type().await?;
            if file_type.is_file() {
                archives.push(path);
            }
        }

        archives.sort();
        Ok(archives)
    }
}

impl Default for ArchiveDiscovery {
    fn default() -> Self {
        Self::new()
    }
}
