//! Caller-facing error taxonomy
//!
//! Only malformed requests are real errors to the pipeline's callers.
//! Backend failures, stale caches, and missing sources all resolve to a
//! displayable placeholder instead.

use thiserror::Error;

/// Validation errors surfaced to the request layer as client errors.
///
/// Everything else that can go wrong inside the pipeline (tool failures,
/// timeouts, cache I/O) is recovered internally and never reaches callers.
#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("empty source path")]
    EmptyPath,

    #[error("path escapes the storage root: {0}")]
    PathOutsideRoot(String),

    #[error("invalid preview dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
}
