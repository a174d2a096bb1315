//! Persistent disk tier
//!
//! One artifact file per cache key, named by the key's hex form, living in a
//! flat cache directory. The directory itself is the index. Artifacts are
//! written to a temp name and renamed into place so a concurrent reader
//! (including one in another server process sharing the directory) never
//! observes a truncated file. There is no garbage collector: stale artifacts
//! are simply overwritten by fresher ones, and artifacts for sources that
//! were deleted or renamed accumulate. That growth is a documented
//! operational tradeoff.

use crate::identity::{CacheKey, FreshnessToken};
use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create cache directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn artifact_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.jpg", key.as_str()))
    }

    /// Read an artifact if it exists and is at least as new as the source
    /// the token was taken from. A stale artifact is indistinguishable from
    /// a missing one.
    pub fn get(&self, key: &CacheKey, required: &FreshnessToken) -> Option<Vec<u8>> {
        let path = self.artifact_path(key);
        let metadata = fs::metadata(&path).ok()?;
        let generated_at = metadata.modified().ok()?;
        if generated_at < required.modified() {
            return None;
        }
        fs::read(&path).ok()
    }

    /// Persist an artifact atomically: write to a temp file in the same
    /// directory, then rename over the final name.
    pub fn put(&self, key: &CacheKey, bytes: &[u8]) -> Result<()> {
        let path = self.artifact_path(key);
        let mut tmp = NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("failed to create temp file in {}", self.dir.display()))?;
        tmp.write_all(bytes).context("failed to write artifact")?;
        tmp.flush().context("failed to flush artifact")?;
        tmp.persist(&path)
            .with_context(|| format!("failed to persist artifact {}", path.display()))?;
        Ok(())
    }
}
