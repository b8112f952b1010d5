//! Rasterization: turn each input PDF into one image file per page.
//!
//! The rasterizer is a capability behind the [`Rasterizer`] trait so the
//! orchestrator can be exercised without Poppler or pdfium installed. Two
//! implementations ship with the crate:
//!
//! * [`PdftoppmRasterizer`] — runs Poppler's `pdftoppm` as a child process;
//! * [`crate::pipeline::render::PdfiumRasterizer`] — renders in-process.
//!
//! Both write `<dir>/<basename>-<page>.<ext>`, the page number zero-padded to
//! the digit width of the page count. A plain sort of the scratch directory
//! therefore still reconstructs document and page order, but the pipeline
//! never relies on that: every raster travels with its `(source_index, page)`
//! pair.
//!
//! The scratch directory outlives a run, so `pdftoppm` first deletes any page
//! images an earlier run left under the same basename; otherwise a re-run
//! would pick them up as extra pages.
//!
//! Inputs are processed one at a time. The first failure ends the run; files
//! already rendered stay on disk and later inputs are never touched.

use crate::config::RasterFormat;
use crate::error::CleanPdfError;
use crate::pipeline::input::{output_basename, InputSet};
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One rasterizer invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterRequest {
    /// PDF to render.
    pub pdf_path: PathBuf,
    /// Render resolution in pixels per inch.
    pub resolution: u32,
    /// Directory the page images are written into.
    pub output_dir: PathBuf,
    /// File name prefix of the page images.
    pub basename: String,
    /// Inclusive 1-indexed page range; `None` renders every page.
    pub pages: Option<(u32, u32)>,
}

/// A page image produced by one invocation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RasterPage {
    /// 1-indexed page number within its PDF.
    pub page: u32,
    pub path: PathBuf,
}

/// A page image placed within the whole batch.
///
/// Ordering is by `(source_index, page)`: document order, then page order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RasterFile {
    /// 0-indexed position of the source PDF in the input set.
    pub source_index: usize,
    /// 1-indexed page number within the source PDF.
    pub page: u32,
    pub path: PathBuf,
}

/// All page images of one input file.
#[derive(Debug, Clone)]
pub struct RasterGroup {
    pub source_index: usize,
    pub source: PathBuf,
    pub basename: String,
    pub pages: Vec<RasterFile>,
}

/// Renders PDF pages to image files on disk.
pub trait Rasterizer: Send + Sync {
    /// Short name used in logs and reports.
    fn name(&self) -> &'static str;

    /// Render the requested pages. The returned pages are sorted by page
    /// number.
    fn rasterize(
        &self,
        request: &RasterRequest,
    ) -> impl Future<Output = Result<Vec<RasterPage>, CleanPdfError>> + Send;
}

// ── pdftoppm ─────────────────────────────────────────────────────────────

/// Rasterizer backed by Poppler's `pdftoppm` program.
///
/// Each invocation is bounded by `timeout`; a process that overruns it is
/// killed and the run fails with [`CleanPdfError::RasterizerTimeout`].
#[derive(Debug, Clone)]
pub struct PdftoppmRasterizer {
    program: PathBuf,
    format: RasterFormat,
    timeout: Duration,
}

impl PdftoppmRasterizer {
    pub fn new(program: impl Into<PathBuf>, format: RasterFormat, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            format,
            timeout,
        }
    }

    /// Command-line arguments for `request`, program name excluded.
    pub fn arguments(&self, request: &RasterRequest) -> Vec<String> {
        let mut args = vec!["-r".to_string(), request.resolution.to_string()];
        if let Some((first, last)) = request.pages {
            args.extend([
                "-f".to_string(),
                first.to_string(),
                "-l".to_string(),
                last.to_string(),
            ]);
        }
        if self.format == RasterFormat::Png {
            args.push("-png".to_string());
        }
        args.push(request.pdf_path.to_string_lossy().into_owned());
        args.push(
            request
                .output_dir
                .join(&request.basename)
                .to_string_lossy()
                .into_owned(),
        );
        args
    }
}

impl Rasterizer for PdftoppmRasterizer {
    fn name(&self) -> &'static str {
        "pdftoppm"
    }

    async fn rasterize(&self, request: &RasterRequest) -> Result<Vec<RasterPage>, CleanPdfError> {
        let extension = self.format.extension();
        let stale =
            remove_stale_pages(&request.output_dir, &request.basename, extension, request.pages)
                .await?;
        if stale > 0 {
            info!(
                "Removed {} stale page image(s) for {} in {}",
                stale,
                request.basename,
                request.output_dir.display()
            );
        }

        let args = self.arguments(request);
        info!("{} {}", self.program.display(), args.join(" "));

        let child = tokio::process::Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CleanPdfError::RasterizerMissing {
                tool: self.program.display().to_string(),
                detail: e.to_string(),
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| CleanPdfError::RasterizerTimeout {
                path: request.pdf_path.clone(),
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| CleanPdfError::RasterizerFailed {
                path: request.pdf_path.clone(),
                status: "wait failed".into(),
                stderr: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(CleanPdfError::RasterizerFailed {
                path: request.pdf_path.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let pages =
            collect_rendered_pages(&request.output_dir, &request.basename, extension).await?;
        Ok(pages
            .into_iter()
            .filter(|p| in_range(p.page, request.pages))
            .collect())
    }
}

fn in_range(page: u32, pages: Option<(u32, u32)>) -> bool {
    pages.is_none_or(|(first, last)| (first..=last).contains(&page))
}

/// Delete page images for `basename` already in `dir`, restricted to `pages`
/// when a range is given. Returns how many were removed.
pub async fn remove_stale_pages(
    dir: &Path,
    basename: &str,
    extension: &str,
    pages: Option<(u32, u32)>,
) -> Result<usize, CleanPdfError> {
    let mut removed = 0;
    for stale in collect_rendered_pages(dir, basename, extension).await? {
        if !in_range(stale.page, pages) {
            continue;
        }
        tokio::fs::remove_file(&stale.path)
            .await
            .map_err(|e| CleanPdfError::StaleRasterRemovalFailed {
                path: stale.path.clone(),
                source: e,
            })?;
        debug!("Removed stale {}", stale.path.display());
        removed += 1;
    }
    Ok(removed)
}

/// Page number encoded in a raster file name `<basename>-<digits>.<extension>`.
pub fn parse_page_number(file_name: &str, basename: &str, extension: &str) -> Option<u32> {
    let rest = file_name.strip_prefix(basename)?.strip_prefix('-')?;
    let digits = rest.strip_suffix(extension)?.strip_suffix('.')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// File name for page `page` of a document with `page_count` pages, padded
/// the way `pdftoppm` pads it.
pub fn raster_file_name(basename: &str, page: u32, page_count: u32, extension: &str) -> String {
    let width = page_count.max(1).to_string().len();
    format!("{basename}-{page:0width$}.{extension}")
}

/// Find the page images written for `basename` in `dir`, sorted by page.
pub async fn collect_rendered_pages(
    dir: &Path,
    basename: &str,
    extension: &str,
) -> Result<Vec<RasterPage>, CleanPdfError> {
    let read_err = |e: std::io::Error| CleanPdfError::DirectoryReadFailed {
        path: dir.to_path_buf(),
        source: e,
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(read_err)?;

    let mut pages = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(page) = parse_page_number(name, basename, extension) {
            pages.push(RasterPage {
                page,
                path: entry.path(),
            });
        }
    }
    pages.sort();
    Ok(pages)
}

// ── Driver ───────────────────────────────────────────────────────────────

/// Rasterize every input at `resolution` into `scratch_dir`, in input order.
///
/// Returns one group per input. Stops at the first failing input.
pub async fn rasterize_all<R: Rasterizer>(
    rasterizer: &R,
    inputs: &InputSet,
    resolution: u32,
    scratch_dir: &Path,
    progress: Option<&ProgressCallback>,
) -> Result<Vec<RasterGroup>, CleanPdfError> {
    let total = inputs.len();
    let mut groups = Vec::with_capacity(total);

    for (source_index, source) in inputs.files().iter().enumerate() {
        let basename = output_basename(source);
        if let Some(cb) = progress {
            cb.on_file_start(source_index + 1, total, source);
        }

        let request = RasterRequest {
            pdf_path: source.clone(),
            resolution,
            output_dir: scratch_dir.to_path_buf(),
            basename: basename.clone(),
            pages: None,
        };
        let rendered = rasterizer.rasterize(&request).await?;
        if rendered.is_empty() {
            warn!("{} produced no page images", source.display());
        }
        debug!(
            "{} → {} page image(s) at {} ppi",
            source.display(),
            rendered.len(),
            resolution
        );

        if let Some(cb) = progress {
            cb.on_file_complete(source_index + 1, total, rendered.len());
        }

        groups.push(RasterGroup {
            source_index,
            source: source.clone(),
            basename,
            pages: rendered
                .into_iter()
                .map(|p| RasterFile {
                    source_index,
                    page: p.page,
                    path: p.path,
                })
                .collect(),
        });
    }

    Ok(groups)
}

/// Flatten groups into the page order of the final document.
pub fn ordered_rasters(groups: &[RasterGroup]) -> Vec<RasterFile> {
    let mut files: Vec<RasterFile> = groups.iter().flat_map(|g| g.pages.iter().cloned()).collect();
    files.sort();
    files
}
