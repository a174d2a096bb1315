//! On-demand media preview generation and caching for a personal
//! file-storage dashboard
//!
//! Given a stored file and requested bounds, this crate produces a small
//! raster preview cheaply and repeatably: a fast in-process cache in front
//! of a persistent disk cache, a scheduler that deduplicates identical
//! in-flight requests and bounds concurrent generations, and per-file-type
//! backend chains with ordered fallbacks (native resize, external image
//! converters, video frame extraction, document-to-PDF-to-raster).
//!
//! # Features
//!
//! - **Two-tier caching**: short-TTL bounded memory cache + durable disk
//!   artifacts invalidated by source (mtime, size)
//! - **Request deduplication**: concurrent identical requests join one
//!   in-flight generation
//! - **Bounded concurrency**: at most a configured number of generations
//!   run at once, FIFO-queued
//! - **Fallback chains**: each backend strategy is a bounded-time attempt;
//!   exhaustion yields a fixed placeholder, never an error
//! - **External tools**: exiftool, ImageMagick, ffmpeg, LibreOffice and
//!   pdftoppm invoked as black-box converters with per-attempt timeouts

pub mod backend;
pub mod disk;
pub mod error;
pub mod identity;
pub mod memory;
pub mod pipeline;
pub mod placeholder;
pub mod scheduler;
pub mod storage;

pub use backend::{strategies_for, Backend, Strategy};
pub use disk::DiskCache;
pub use error::PreviewError;
pub use identity::{CacheKey, FileKind, FreshnessToken};
pub use memory::{CacheEntry, MemoryCache};
pub use pipeline::{PreviewService, MAX_DIMENSION};
pub use placeholder::placeholder;
pub use scheduler::Scheduler;
pub use storage::{LocalStorage, SourceInfo, Storage};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// A generated (or fallback) preview: always displayable.
#[derive(Debug, Clone)]
pub struct Preview {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    /// Source fingerprint the preview was generated against. `None` for the
    /// placeholder, which is never persisted.
    pub token: Option<FreshnessToken>,
}

impl Preview {
    /// Entity tag for conditional fetches, when the preview has one.
    pub fn etag(&self) -> Option<String> {
        self.token.map(|token| token.etag())
    }
}

/// Standard configuration for the preview pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewConfig {
    /// Directory holding the persistent disk tier.
    pub cache_dir: PathBuf,
    /// Memory tier entry ceiling; oldest-inserted entries are evicted.
    pub memory_max_entries: usize,
    /// Memory tier TTL. Short enough that hits skip freshness re-checks.
    pub memory_ttl_secs: u64,
    /// System-wide ceiling on concurrently running generations.
    pub max_concurrent: usize,
    /// JPEG quality for natively encoded previews.
    pub jpeg_quality: u8,
    /// Video frame outputs below this size are treated as black/corrupt.
    pub min_frame_bytes: u64,
    /// Per-attempt timeout for image and video tools.
    pub tool_timeout_secs: u64,
    /// Timeout for office-to-PDF conversion, which is inherently slower.
    pub document_timeout_secs: u64,
    pub exiftool_cmd: String,
    pub convert_cmd: String,
    pub ffmpeg_cmd: String,
    pub soffice_cmd: String,
    pub pdftoppm_cmd: String,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        let cache_root = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
        Self {
            cache_dir: cache_root.join("preview-cache"),
            memory_max_entries: 128,
            memory_ttl_secs: 30,
            max_concurrent: 3,
            jpeg_quality: 80,
            min_frame_bytes: 1024,
            tool_timeout_secs: 8,
            document_timeout_secs: 40,
            exiftool_cmd: "exiftool".to_string(),
            convert_cmd: "convert".to_string(),
            ffmpeg_cmd: "ffmpeg".to_string(),
            soffice_cmd: "soffice".to_string(),
            pdftoppm_cmd: "pdftoppm".to_string(),
        }
    }
}

impl PreviewConfig {
    pub fn memory_ttl(&self) -> Duration {
        Duration::from_secs(self.memory_ttl_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn document_timeout(&self) -> Duration {
        Duration::from_secs(self.document_timeout_secs)
    }
}
