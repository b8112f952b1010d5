//! Pipeline stages for turning a folder of scanned PDFs into one bitonal PDF.
//!
//! Each submodule implements exactly one step. The rasterizer and the PDF
//! builder sit behind traits so the orchestrator in [`crate::convert`] can be
//! driven by test doubles.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ mediabox ──▶ resolution ──▶ rasterize ──▶ clean ──▶ assemble
//! (*.pdf)   (lopdf)      (ppi)          (pdftoppm /   (1 bpp)   (lopdf)
//!                                        pdfium)
//! ```
//!
//! 1. [`input`]      — list the input PDFs and stage the scratch directory
//! 2. [`mediabox`]   — median declared page size of the first input
//! 3. [`resolution`] — pick one render resolution for the whole batch,
//!    probe-rendering a page when no size is declared
//! 4. [`rasterize`]  — render every page of every input, in order;
//!    [`render`] is the in-process pdfium backend
//! 5. [`clean`]      — grayscale, rotate, flatten background, deskew,
//!    threshold, despeckle
//! 6. [`assemble`]   — write the cleaned pages into the output document

pub mod assemble;
pub mod clean;
pub mod input;
pub mod mediabox;
pub mod rasterize;
pub mod render;
pub mod resolution;
