//! Pipeline orchestrator
//!
//! The entry point tying the tiers together: validate, short-circuit hidden
//! files to the placeholder, consult memory then disk, and only then hand
//! the request to the bounded generation scheduler, writing successful
//! results back into both tiers. Built once at process start and shared by
//! handle; tests construct isolated instances against throwaway
//! directories.

use crate::backend::Backend;
use crate::disk::DiskCache;
use crate::error::PreviewError;
use crate::identity::{CacheKey, FileKind, FreshnessToken};
use crate::memory::{CacheEntry, MemoryCache};
use crate::placeholder::placeholder;
use crate::scheduler::Scheduler;
use crate::storage::Storage;
use crate::{Preview, PreviewConfig};
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, warn};

/// Largest preview edge a client may request.
pub const MAX_DIMENSION: u32 = 4096;

/// The preview service: two cache tiers, a deduplicating bounded scheduler,
/// and the backend strategy runner, behind one `get_preview` call.
pub struct PreviewService<S: Storage> {
    storage: Arc<S>,
    memory: Arc<MemoryCache>,
    disk: Arc<DiskCache>,
    scheduler: Scheduler,
    backend: Arc<Backend>,
}

impl<S: Storage> PreviewService<S> {
    pub fn new(storage: S, config: PreviewConfig) -> Result<Self> {
        let memory = Arc::new(MemoryCache::new(
            config.memory_max_entries,
            config.memory_ttl(),
        ));
        let disk = Arc::new(DiskCache::new(&config.cache_dir)?);
        let scheduler = Scheduler::new(config.max_concurrent);
        let backend = Arc::new(Backend::new(config));

        Ok(Self {
            storage: Arc::new(storage),
            memory,
            disk,
            scheduler,
            backend,
        })
    }

    /// Produce a preview for a stored file at the requested bounds.
    ///
    /// Only malformed requests error. A missing, hidden, unsupported or
    /// unconvertible source resolves to the placeholder instead, so every
    /// well-formed request yields a displayable image.
    pub async fn get_preview(
        &self,
        path: &str,
        width: u32,
        height: u32,
    ) -> Result<Preview, PreviewError> {
        validate_dimensions(width, height)?;
        let key = CacheKey::resolve(path, width, height)?;
        let Some(source) = self.storage.resolve(path) else {
            return Err(PreviewError::PathOutsideRoot(path.to_string()));
        };

        // Policy, not fallback: hidden/system files are never generated for.
        if FileKind::classify(path) == FileKind::Hidden {
            return Ok(placeholder());
        }

        let info = match self.storage.stat(path) {
            Ok(Some(info)) if !info.is_dir => info,
            Ok(_) => return Ok(placeholder()),
            Err(e) => {
                warn!(path, error = %e, "stat failed, serving placeholder");
                return Ok(placeholder());
            }
        };
        let token = FreshnessToken::of(&info);

        // Memory tier: short TTL, freshness taken on trust.
        if let Some(entry) = self.memory.get(&key) {
            debug!(path, "memory tier hit");
            return Ok(Preview {
                bytes: entry.bytes,
                content_type: entry.content_type,
                token: Some(entry.token),
            });
        }

        // Disk tier: durable, always re-checked against the live source.
        if let Some(bytes) = self.disk.get(&key, &token) {
            debug!(path, "disk tier hit");
            self.memory.insert(
                key,
                CacheEntry {
                    bytes: bytes.clone(),
                    content_type: "image/jpeg",
                    token,
                },
            );
            return Ok(Preview {
                bytes,
                content_type: "image/jpeg",
                token: Some(token),
            });
        }

        // The write-back lives inside the work future, which the scheduler
        // runs as a detached task: a generation whose callers all
        // disconnected still populates both tiers for the next request.
        let work = {
            let backend = Arc::clone(&self.backend);
            let storage = Arc::clone(&self.storage);
            let memory = Arc::clone(&self.memory);
            let disk = Arc::clone(&self.disk);
            let logical = path.to_string();
            let key = key.clone();
            async move {
                let result = backend
                    .generate(&*storage, &logical, &source, width, height, token)
                    .await;

                // Placeholder results carry no token and are never cached; a
                // later request gets a fresh attempt. Persistence is
                // best-effort: a disk write failure still serves the result.
                if let Some(token) = result.token {
                    if result.content_type == "image/jpeg" {
                        if let Err(e) = disk.put(&key, &result.bytes) {
                            warn!(path = %logical, error = %e, "failed to persist preview artifact");
                        }
                    }
                    memory.insert(
                        key,
                        CacheEntry {
                            bytes: result.bytes.clone(),
                            content_type: result.content_type,
                            token,
                        },
                    );
                }
                result
            }
        };

        Ok(self.scheduler.run(key, work).await)
    }

    /// Conditional-fetch support: true when the client's entity tag still
    /// matches the live source, without touching either cache tier.
    pub fn check_not_modified(&self, path: &str, if_none_match: &str) -> bool {
        match self.storage.stat(path) {
            Ok(Some(info)) if !info.is_dir => {
                FreshnessToken::of(&info).etag() == if_none_match
            }
            _ => false,
        }
    }

    /// Current entity tag for a source, if it exists.
    pub fn etag(&self, path: &str) -> Option<String> {
        match self.storage.stat(path) {
            Ok(Some(info)) if !info.is_dir => Some(FreshnessToken::of(&info).etag()),
            _ => None,
        }
    }
}

fn validate_dimensions(width: u32, height: u32) -> Result<(), PreviewError> {
    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(PreviewError::InvalidDimensions { width, height });
    }
    Ok(())
}
