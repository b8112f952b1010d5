//! In-process rasterization via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto a dedicated thread pool
//! thread designed for blocking operations, preventing the Tokio worker
//! threads from stalling during CPU-heavy rendering.
//!
//! Pages are written with the same names `pdftoppm` would use, so the two
//! backends are interchangeable.

use crate::config::RasterFormat;
use crate::error::CleanPdfError;
use crate::pipeline::rasterize::{raster_file_name, RasterPage, RasterRequest, Rasterizer};
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable naming an explicit pdfium shared library.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Rasterizer backed by the pdfium library.
///
/// The library is bound afresh on every call: pdfium is not shareable across
/// the blocking pool's threads.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    format: RasterFormat,
    library_path: Option<PathBuf>,
}

impl PdfiumRasterizer {
    /// Bind to `$PDFIUM_LIB_PATH` when set, the system library otherwise.
    pub fn new(format: RasterFormat) -> Self {
        Self {
            format,
            library_path: std::env::var_os(PDFIUM_LIB_PATH_ENV).map(PathBuf::from),
        }
    }

    pub fn with_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.library_path = Some(path.into());
        self
    }
}

impl Rasterizer for PdfiumRasterizer {
    fn name(&self) -> &'static str {
        "pdfium"
    }

    async fn rasterize(&self, request: &RasterRequest) -> Result<Vec<RasterPage>, CleanPdfError> {
        let request = request.clone();
        let format = self.format;
        let library_path = self.library_path.clone();

        tokio::task::spawn_blocking(move || {
            render_blocking(&request, format, library_path.as_deref())
        })
        .await
        .map_err(|e| CleanPdfError::Internal(format!("Render task panicked: {}", e)))?
    }
}

fn bind(library_path: Option<&Path>) -> Result<Pdfium, CleanPdfError> {
    let bindings = match library_path {
        Some(path) => Pdfium::bind_to_library(path),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| CleanPdfError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

/// Blocking implementation of page rendering.
fn render_blocking(
    request: &RasterRequest,
    format: RasterFormat,
    library_path: Option<&Path>,
) -> Result<Vec<RasterPage>, CleanPdfError> {
    let pdfium = bind(library_path)?;
    let pdf_path = &request.pdf_path;

    let document =
        pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| CleanPdfError::CorruptPdf {
                path: pdf_path.clone(),
                detail: format!("{:?}", e),
            })?;

    let pages = document.pages();
    let total_pages = pages.len() as u32;
    info!("{}: {} page(s)", pdf_path.display(), total_pages);

    let (first, last) = request.pages.unwrap_or((1, total_pages));
    if last > total_pages {
        warn!(
            "Page range {}-{} exceeds {} page(s); clamping",
            first, last, total_pages
        );
    }
    let last = last.min(total_pages);

    let render_config =
        PdfRenderConfig::new().scale_page_by_factor(request.resolution as f32 / 72.0);

    let mut rendered = Vec::new();
    for page_num in first.max(1)..=last {
        let rasterisation_failed = |detail: String| CleanPdfError::RasterisationFailed {
            path: pdf_path.clone(),
            page: page_num,
            detail,
        };

        let index = u16::try_from(page_num - 1)
            .map_err(|_| rasterisation_failed("page index out of range".into()))?;
        let page = pages
            .get(index)
            .map_err(|e| rasterisation_failed(format!("{:?}", e)))?;
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| rasterisation_failed(format!("{:?}", e)))?;

        // PPM holds RGB only; drop any alpha pdfium hands back.
        let image = bitmap.as_image().to_rgb8();
        let path = request.output_dir.join(raster_file_name(
            &request.basename,
            page_num,
            total_pages,
            format.extension(),
        ));
        image
            .save(&path)
            .map_err(|e| CleanPdfError::OutputWriteFailed {
                path: path.clone(),
                source: std::io::Error::other(e),
            })?;
        debug!(
            "Rendered page {} → {}x{} px ({})",
            page_num,
            image.width(),
            image.height(),
            path.display()
        );

        rendered.push(RasterPage {
            page: page_num,
            path,
        });
    }

    Ok(rendered)
}
