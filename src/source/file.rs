//! File-based poll source.
//!
//! Reads a saved `/stats` document from disk on every poll. Useful for
//! offline inspection of a captured fleet state, or for driving a session
//! from a file another process rewrites.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{decode_stats, PollBatch, PollSource};
use crate::error::SyncError;

/// A poll source that reads `/stats`-shaped JSON from a file.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    description: String,
}

impl FileSource {
    /// Create a new file source for the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let description = format!("file: {}", path.display());
        Self { path, description }
    }

    /// Returns the path being read.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PollSource for FileSource {
    async fn fetch(&self) -> Result<PollBatch, SyncError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let value: Value = serde_json::from_str(&content)?;
        let batch = decode_stats(value)?;
        debug!(
            "Read {} servers from {} ({} dropped)",
            batch.entities.len(),
            self.path.display(),
            batch.dropped
        );
        Ok(batch)
    }

    fn description(&self) -> &str {
        &self.description
    }
}
