//! # cleanpdf
//!
//! Turn a folder of scanned PDFs into one small, clean, bitonal PDF.
//!
//! ## Why this crate?
//!
//! Scanned archives arrive as many image-only PDFs, often with tinted paper,
//! slight skew and speckle, and sometimes with nonsensical page sizes. Naively
//! rendering every page at 300 ppi can produce gigantic bitmaps when a
//! producer declares a 200-inch page. This crate picks one render resolution
//! per batch from the *median* declared page size, renders every page, cleans
//! it to black and white, and concatenates the lot into a single
//! Group 4 compressed 1-bit PDF.
//!
//! ## Pipeline Overview
//!
//! ```text
//! <basedir>/*.pdf
//!  │
//!  ├─ 1. Input       list *.pdf (sorted), create <basedir>/image
//!  ├─ 2. Estimate    median /MediaBox of the first file (lopdf)
//!  ├─ 3. Resolve     nominal ppi, scaled down for oversized pages
//!  ├─ 4. Rasterize   pdftoppm (or pdfium), one file per page
//!  ├─ 5. Clean       rotate, flatten, deskew, threshold, despeckle
//!  └─ 6. Assemble    1-bpp image pages → <fileout>
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cleanpdf::{convert_directory, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder("scans", "scans.pdf")
//!         .resolution(300)
//!         .contrast(5)
//!         .open_size(2)
//!         .build()?;
//!     let output = convert_directory(&config).await?;
//!     eprintln!("{} pages, {} bytes", output.stats.pages, output.stats.output_bytes);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `cleanpdf` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! cleanpdf = { version = "0.1", default-features = false }
//! ```
//!
//! ## External tools
//!
//! The default rasterizer is Poppler's `pdftoppm`, which must be on `PATH`
//! (or named explicitly). The pdfium backend needs a pdfium shared library,
//! located through `PDFIUM_LIB_PATH` or the system search path.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    Contrast, OpenSize, OutputResolution, PipelineConfig, PipelineConfigBuilder, RasterBackend,
    RasterFormat, Rotation, ScratchPolicy,
};
pub use convert::{convert_directory, convert_sync, Pipeline};
pub use error::CleanPdfError;
pub use output::{RunOutput, RunStats};
pub use pipeline::assemble::{BitonalPdfBuilder, BuildRequest, BuildSummary, PdfBuilder};
pub use pipeline::rasterize::{
    PdftoppmRasterizer, RasterFile, RasterPage, RasterRequest, Rasterizer,
};
pub use pipeline::render::PdfiumRasterizer;
pub use pipeline::resolution::{Resolution, ResolutionSource};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
