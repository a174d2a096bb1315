//! Cache identity and freshness resolution
//!
//! Derives the stable cache key for a (path, dimensions) request, the
//! freshness fingerprint of a source file, and the closed file-type
//! classification that drives backend selection. Pure functions, no I/O.

use crate::error::PreviewError;
use crate::storage::SourceInfo;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Deterministic identifier for one (source path, width, height) combination.
///
/// Acts as the join key across the memory tier, the disk tier filenames and
/// the pending-generation table. Hex of the first 16 bytes of a SHA-256,
/// compact but collision-resistant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a logical path and requested bounds.
    ///
    /// The only failure mode is an empty path, rejected as a client error.
    pub fn resolve(path: &str, width: u32, height: u32) -> Result<Self, PreviewError> {
        if path.trim().is_empty() {
            return Err(PreviewError::EmptyPath);
        }

        let mut hasher = Sha256::new();
        hasher.update(path.as_bytes());
        hasher.update(width.to_le_bytes());
        hasher.update(height.to_le_bytes());
        let digest = hasher.finalize();

        Ok(Self(hex::encode(&digest[..16])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint of a source file's (modification time, byte size).
///
/// A cached artifact whose token no longer matches the live source is
/// treated as absent, never as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessToken {
    pub modified_ms: u64,
    pub len: u64,
}

impl FreshnessToken {
    pub fn of(info: &SourceInfo) -> Self {
        Self {
            modified_ms: info.modified_ms,
            len: info.len,
        }
    }

    /// Modification instant the token was derived from.
    pub fn modified(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.modified_ms)
    }

    /// Entity tag for conditional fetches, nginx-style `"mtime-size"`.
    pub fn etag(&self) -> String {
        format!("\"{:x}-{:x}\"", self.modified_ms, self.len)
    }
}

/// Closed file-type classification, resolved once per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    Image,
    Video,
    Document,
    Other,
    /// Hidden/system files are never generated for, by policy.
    Hidden,
}

const IMAGE_EXTS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "tif", "tiff",
];

const CAMERA_RAW_EXTS: &[&str] = &["cr2", "cr3", "nef", "arw", "dng", "orf", "raf", "rw2"];

const VIDEO_EXTS: &[&str] = &[
    "mp4", "mov", "mkv", "avi", "webm", "m4v", "wmv", "flv", "mpg", "mpeg", "3gp",
];

const DOCUMENT_EXTS: &[&str] = &[
    "pdf", "odt", "ods", "odp", "doc", "docx", "xls", "xlsx", "ppt", "pptx",
];

impl FileKind {
    /// Classify a logical path by file name and extension.
    pub fn classify(path: &str) -> Self {
        let name = file_name(path);
        if name.starts_with('.') {
            return FileKind::Hidden;
        }

        let ext = extension(path);
        if IMAGE_EXTS.contains(&ext.as_str()) || CAMERA_RAW_EXTS.contains(&ext.as_str()) {
            FileKind::Image
        } else if VIDEO_EXTS.contains(&ext.as_str()) {
            FileKind::Video
        } else if DOCUMENT_EXTS.contains(&ext.as_str()) {
            FileKind::Document
        } else {
            FileKind::Other
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileKind::Image => write!(f, "image"),
            FileKind::Video => write!(f, "video"),
            FileKind::Document => write!(f, "document"),
            FileKind::Other => write!(f, "other"),
            FileKind::Hidden => write!(f, "hidden"),
        }
    }
}

/// Camera raw formats need an external decode path instead of the native
/// resizer.
pub fn is_camera_raw(ext: &str) -> bool {
    CAMERA_RAW_EXTS.contains(&ext)
}

/// Lowercased extension of a logical path, empty when there is none.
pub fn extension(path: &str) -> String {
    let name = file_name(path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => name[idx + 1..].to_ascii_lowercase(),
        _ => String::new(),
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
