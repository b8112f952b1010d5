//! Error type for the cleanpdf library.
//!
//! Every failure in a run is fatal: the pipeline produces one consistent
//! output document or nothing at all. There is deliberately no page-level
//! error type; a rasterizer that fails on one input aborts the whole run and
//! leaves the scratch directory untouched so the operator can inspect it.
//!
//! Each variant carries the operation and the offending path or value, so a
//! failed run can be diagnosed from its message alone.
//!
//! Missing media-box metadata is *not* an error. The resolver treats it as a
//! signal to take the probe-render path instead.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the cleanpdf library.
#[derive(Debug, Error)]
pub enum CleanPdfError {
    // ── Argument errors ───────────────────────────────────────────────────
    /// A run parameter is outside its domain.
    #[error("invalid {name} = {value}; {name} must be in {allowed}")]
    InvalidParameter {
        name: &'static str,
        value: i64,
        allowed: &'static str,
    },

    /// Builder validation failed for a non-numeric setting.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Discovery errors ──────────────────────────────────────────────────
    /// The base directory does not exist or is not a directory.
    #[error("Input directory not found: '{path}'")]
    BaseDirNotFound { path: PathBuf },

    /// Listing a directory failed.
    #[error("Failed to read directory '{path}': {source}")]
    DirectoryReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The scratch directory could not be created.
    #[error("Failed to create scratch directory '{path}': {source}")]
    ScratchDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No `*.pdf` files in the base directory.
    #[error("No input files found: '{dir}' contains no *.pdf files")]
    NoInputFiles { dir: PathBuf },

    // ── Rasterizer errors ─────────────────────────────────────────────────
    /// A page image left by an earlier run could not be deleted.
    #[error("Failed to remove stale page image '{path}': {source}")]
    StaleRasterRemovalFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The external rasterizer program could not be started.
    #[error(
        "Rasterizer '{tool}' could not be started: {detail}\n\
Install Poppler (it provides pdftoppm) or pass --pdftoppm /path/to/pdftoppm."
    )]
    RasterizerMissing { tool: String, detail: String },

    /// The external rasterizer exited unsuccessfully for one input.
    #[error("Rasterizer failed on '{path}' ({status}): {stderr}")]
    RasterizerFailed {
        path: PathBuf,
        status: String,
        stderr: String,
    },

    /// The external rasterizer did not finish within the configured bound.
    #[error("Rasterizer timed out after {secs}s on '{path}' and was killed")]
    RasterizerTimeout { path: PathBuf, secs: u64 },

    /// pdfium returned an error for a specific page.
    #[error("Rasterisation failed for '{path}' page {page}: {detail}")]
    RasterisationFailed {
        path: PathBuf,
        page: u32,
        detail: String,
    },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or use the default pdftoppm rasterizer."
    )]
    PdfiumBindingFailed(String),

    /// A PDF could not be opened by the renderer.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// Every input was rasterized but no page images came out.
    #[error("No pages were rendered into '{dir}'")]
    NoPagesRendered { dir: PathBuf },

    // ── Builder errors ────────────────────────────────────────────────────
    /// A raster file could not be decoded.
    #[error("Failed to decode raster image '{path}': {detail}")]
    ImageDecodeFailed { path: PathBuf, detail: String },

    /// Assembling or serialising the output PDF failed.
    #[error("Failed to assemble output PDF: {0}")]
    PdfWriteFailed(String),

    /// Could not create or write the output PDF file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_parameter_names_field_and_domain() {
        let e = CleanPdfError::InvalidParameter {
            name: "contrast",
            value: 11,
            allowed: "{1,...,10}",
        };
        let msg = e.to_string();
        assert_eq!(msg, "invalid contrast = 11; contrast must be in {1,...,10}");
    }

    #[test]
    fn rasterizer_failed_display() {
        let e = CleanPdfError::RasterizerFailed {
            path: PathBuf::from("/scans/b.pdf"),
            status: "exit status: 1".into(),
            stderr: "Syntax Error: Couldn't read xref table".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("/scans/b.pdf"), "got: {msg}");
        assert!(msg.contains("xref"), "got: {msg}");
    }

    #[test]
    fn rasterizer_timeout_display() {
        let e = CleanPdfError::RasterizerTimeout {
            path: PathBuf::from("a.pdf"),
            secs: 30,
        };
        assert!(e.to_string().contains("30s"));
    }

    #[test]
    fn no_input_files_display() {
        let e = CleanPdfError::NoInputFiles {
            dir: PathBuf::from("/empty"),
        };
        assert!(e.to_string().contains("No input files found"));
    }
}
