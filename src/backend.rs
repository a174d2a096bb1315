//! Backend resolution and strategy execution
//!
//! Maps a file's classification to an ordered chain of generation
//! strategies and runs them in sequence until one produces a preview.
//! Plain raster images are resized in-process with the `image` crate;
//! everything else shells out to single-purpose external tools (exiftool,
//! ImageMagick, ffmpeg, LibreOffice, pdftoppm), each invocation bounded by
//! its own timeout so one bad file can never stall a worker slot. A
//! strategy failure is never fatal: the chain advances, and only full
//! exhaustion falls back to the placeholder.

use crate::identity::{extension, is_camera_raw, FileKind, FreshnessToken};
use crate::placeholder::placeholder;
use crate::storage::Storage;
use crate::{Preview, PreviewConfig};
use anyhow::{anyhow, bail, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView, ImageReader};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Timestamps tried for video frame grabs, in order. Non-zero first to skip
/// the black leader frames many encoders produce; zero last for clips
/// shorter than the earlier seek points.
const FRAME_TIMESTAMPS: [f64; 3] = [3.0, 10.0, 0.0];

/// One generation method in a fallback chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    /// Decode and downscale in-process, high-quality Lanczos filtering.
    NativeResize,
    /// Pull the embedded preview JPEG out of a camera raw file with
    /// exiftool, then downscale it natively.
    ExtractEmbedded,
    /// Single-shot ImageMagick conversion to a bounded JPEG.
    ExternalConvert,
    /// Serve the original bytes verbatim. A last resort, not a failure.
    Passthrough,
    /// ffmpeg single-frame grab at a timestamp (seconds).
    VideoFrame { at: f64 },
    /// ffmpeg grab of the first detected scene change.
    VideoScene,
    /// Office document -> PDF (headless LibreOffice) -> first page raster.
    DocumentConvert,
}

/// Ordered strategy chain for a file classification.
pub fn strategies_for(kind: FileKind, ext: &str) -> Vec<Strategy> {
    match kind {
        FileKind::Image if is_camera_raw(ext) => vec![
            Strategy::ExtractEmbedded,
            Strategy::ExternalConvert,
            Strategy::Passthrough,
        ],
        FileKind::Image => vec![Strategy::NativeResize],
        FileKind::Video => {
            let mut chain: Vec<Strategy> = FRAME_TIMESTAMPS
                .iter()
                .map(|&at| Strategy::VideoFrame { at })
                .collect();
            chain.push(Strategy::VideoScene);
            chain
        }
        FileKind::Document => vec![Strategy::DocumentConvert],
        FileKind::Other | FileKind::Hidden => Vec::new(),
    }
}

/// Executes strategy chains against external tools and the native resizer.
pub struct Backend {
    config: PreviewConfig,
}

impl Backend {
    pub fn new(config: PreviewConfig) -> Self {
        Self { config }
    }

    /// Run the chain for a source until one strategy succeeds. Exhaustion
    /// yields the placeholder; callers always get something displayable.
    pub async fn generate(
        &self,
        storage: &dyn Storage,
        logical: &str,
        source: &Path,
        width: u32,
        height: u32,
        token: FreshnessToken,
    ) -> Preview {
        let kind = FileKind::classify(logical);
        let ext = extension(logical);

        for strategy in strategies_for(kind, &ext) {
            match self
                .attempt(&strategy, storage, logical, source, width, height)
                .await
            {
                Ok((bytes, content_type)) => {
                    debug!(path = logical, strategy = ?strategy, "generated preview");
                    return Preview {
                        bytes,
                        content_type,
                        token: Some(token),
                    };
                }
                Err(e) => {
                    warn!(path = logical, strategy = ?strategy, error = %e, "preview strategy failed");
                }
            }
        }

        debug!(path = logical, kind = %kind, "all strategies exhausted, serving placeholder");
        placeholder()
    }

    async fn attempt(
        &self,
        strategy: &Strategy,
        storage: &dyn Storage,
        logical: &str,
        source: &Path,
        width: u32,
        height: u32,
    ) -> Result<(Vec<u8>, &'static str)> {
        match strategy {
            Strategy::NativeResize => {
                let bytes = tokio::fs::read(source)
                    .await
                    .with_context(|| format!("failed to read {}", source.display()))?;
                let jpeg = self.downscale(bytes, width, height).await?;
                Ok((jpeg, "image/jpeg"))
            }

            Strategy::ExtractEmbedded => {
                let mut cmd = Command::new(&self.config.exiftool_cmd);
                cmd.arg("-b").arg("-PreviewImage").arg(source);
                let output = run_tool(&mut cmd, self.config.tool_timeout(), "exiftool").await?;
                if output.stdout.is_empty() {
                    bail!("no embedded preview in {}", source.display());
                }
                let jpeg = self.downscale(output.stdout, width, height).await?;
                Ok((jpeg, "image/jpeg"))
            }

            Strategy::ExternalConvert => {
                let work = tempfile::tempdir().context("failed to create work directory")?;
                let out = work.path().join("preview.jpg");
                let mut cmd = Command::new(&self.config.convert_cmd);
                cmd.arg(source)
                    .arg("-auto-orient")
                    .arg("-thumbnail")
                    .arg(format!("{width}x{height}"))
                    .arg(&out);
                run_tool(&mut cmd, self.config.tool_timeout(), "convert").await?;
                Ok((read_output(&out, 1)?, "image/jpeg"))
            }

            Strategy::Passthrough => {
                let bytes = storage.read_bytes(logical)?;
                Ok((bytes, content_type_for(&extension(logical))))
            }

            Strategy::VideoFrame { at } => {
                let work = tempfile::tempdir().context("failed to create work directory")?;
                let out = work.path().join("frame.jpg");
                let mut cmd = Command::new(&self.config.ffmpeg_cmd);
                cmd.arg("-y")
                    .arg("-loglevel")
                    .arg("error")
                    .arg("-ss")
                    .arg(format!("{at}"))
                    .arg("-i")
                    .arg(source)
                    .arg("-frames:v")
                    .arg("1")
                    .arg("-vf")
                    .arg(scale_filter(width, height))
                    .arg(&out);
                run_tool(&mut cmd, self.config.tool_timeout(), "ffmpeg").await?;
                // A tiny output is an empirical signal of a black or corrupt
                // frame; treat it as a failure so the next timestamp runs.
                Ok((read_output(&out, self.config.min_frame_bytes)?, "image/jpeg"))
            }

            Strategy::VideoScene => {
                let work = tempfile::tempdir().context("failed to create work directory")?;
                let out = work.path().join("frame.jpg");
                let mut cmd = Command::new(&self.config.ffmpeg_cmd);
                cmd.arg("-y")
                    .arg("-loglevel")
                    .arg("error")
                    .arg("-i")
                    .arg(source)
                    .arg("-vf")
                    .arg(format!(
                        "select='gt(scene,0.4)',{}",
                        scale_filter(width, height)
                    ))
                    .arg("-frames:v")
                    .arg("1")
                    .arg("-vsync")
                    .arg("vfr")
                    .arg(&out);
                run_tool(&mut cmd, self.config.tool_timeout(), "ffmpeg").await?;
                Ok((read_output(&out, self.config.min_frame_bytes)?, "image/jpeg"))
            }

            Strategy::DocumentConvert => {
                let work = tempfile::tempdir().context("failed to create work directory")?;

                // Office formats take a trip through PDF first; PDFs render
                // directly. If the intermediate conversion fails or times
                // out, the whole strategy fails.
                let pdf = if extension(logical) == "pdf" {
                    source.to_path_buf()
                } else {
                    self.office_to_pdf(source, work.path()).await?
                };

                let prefix = work.path().join("page");
                let mut cmd = Command::new(&self.config.pdftoppm_cmd);
                cmd.arg("-jpeg")
                    .arg("-f")
                    .arg("1")
                    .arg("-l")
                    .arg("1")
                    .arg("-singlefile")
                    .arg("-scale-to")
                    .arg(width.max(height).to_string())
                    .arg(&pdf)
                    .arg(&prefix);
                run_tool(&mut cmd, self.config.tool_timeout(), "pdftoppm").await?;
                Ok((read_output(&prefix.with_extension("jpg"), 1)?, "image/jpeg"))
            }
        }
    }

    /// Headless LibreOffice conversion of an office document to PDF.
    /// Inherently slow, so it gets the long document timeout.
    async fn office_to_pdf(&self, source: &Path, outdir: &Path) -> Result<PathBuf> {
        let mut cmd = Command::new(&self.config.soffice_cmd);
        cmd.arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(outdir)
            .arg(source);
        run_tool(&mut cmd, self.config.document_timeout(), "soffice").await?;

        let stem = source
            .file_stem()
            .with_context(|| format!("source has no file name: {}", source.display()))?;
        let pdf = outdir.join(stem).with_extension("pdf");
        if !pdf.exists() {
            bail!("soffice produced no pdf for {}", source.display());
        }
        Ok(pdf)
    }

    /// In-process decode + bounded downscale + JPEG encode, off the async
    /// runtime's worker threads.
    async fn downscale(&self, bytes: Vec<u8>, width: u32, height: u32) -> Result<Vec<u8>> {
        let quality = self.config.jpeg_quality;
        tokio::task::spawn_blocking(move || downscale_to_jpeg(&bytes, width, height, quality))
            .await
            .map_err(|e| anyhow!("resize task panicked: {e}"))?
    }
}

/// ffmpeg scale filter that fits inside the requested box without
/// stretching.
fn scale_filter(width: u32, height: u32) -> String {
    format!("scale={width}:{height}:force_original_aspect_ratio=decrease")
}

/// Run one external tool with a hard deadline. The child is killed on drop,
/// so a timeout also releases the process, not just the await.
async fn run_tool(cmd: &mut Command, limit: Duration, label: &str) -> Result<Output> {
    cmd.kill_on_drop(true).stdin(Stdio::null());
    let output = timeout(limit, cmd.output())
        .await
        .map_err(|_| anyhow!("{label} timed out after {limit:?}"))?
        .with_context(|| format!("failed to run {label}"))?;

    if !output.status.success() {
        bail!(
            "{label} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(output)
}

/// Read a tool's output file, rejecting missing or implausibly small
/// results.
fn read_output(path: &Path, min_len: u64) -> Result<Vec<u8>> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("tool produced no output at {}", path.display()))?;
    if metadata.len() < min_len {
        bail!(
            "tool output implausibly small ({} bytes) at {}",
            metadata.len(),
            path.display()
        );
    }
    std::fs::read(path).with_context(|| format!("failed to read tool output {}", path.display()))
}

/// Decode, fit within the requested bounds without upscaling, encode JPEG.
fn downscale_to_jpeg(bytes: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>> {
    let img = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .context("unrecognized image data")?
        .decode()
        .context("failed to decode image")?;

    let resized = resize_to_fit(img, width, height);

    // JPEG has no alpha channel; flatten before encoding.
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());
    let mut jpeg = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut jpeg, quality);
    rgb.write_with_encoder(encoder)
        .context("failed to encode jpeg")?;
    Ok(jpeg)
}

/// Fit within (width, height) preserving aspect ratio; never upscale.
fn resize_to_fit(img: DynamicImage, width: u32, height: u32) -> DynamicImage {
    let (w, h) = img.dimensions();
    if w <= width && h <= height {
        return img;
    }
    img.resize(width, height, image::imageops::FilterType::Lanczos3)
}

/// Content type for verbatim passthrough of original bytes.
fn content_type_for(ext: &str) -> &'static str {
    match ext {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
}
