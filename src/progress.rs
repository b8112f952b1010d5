//! Progress-callback trait for run events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to follow a
//! run: one event per rasterized input file and one per cleaned page.
//!
//! The pipeline is sequential, so events arrive in order. Page events are
//! emitted from the blocking thread pool, hence the `Send + Sync` bound.
//!
//! # Example
//!
//! ```rust
//! use cleanpdf::{PipelineConfig, PipelineProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PageCounter(AtomicUsize);
//!
//! impl PipelineProgressCallback for PageCounter {
//!     fn on_page_cleaned(&self, page_num: usize, total_pages: usize) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("cleaned {page_num}/{total_pages}");
//!     }
//! }
//!
//! let config = PipelineConfig::builder("scans", "out.pdf")
//!     .progress_callback(Arc::new(PageCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::path::Path;
use std::sync::Arc;

/// Called by the pipeline as it moves through its stages.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once the input set is known, before any rendering.
    fn on_run_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called once the render resolution has been chosen.
    fn on_resolution_chosen(&self, ppi: u32) {
        let _ = ppi;
    }

    /// Called just before an input file is handed to the rasterizer.
    ///
    /// # Arguments
    /// * `file_num`    — 1-indexed position in the input set
    /// * `total_files` — size of the input set
    /// * `path`        — the input PDF
    fn on_file_start(&self, file_num: usize, total_files: usize, path: &Path) {
        let _ = (file_num, total_files, path);
    }

    /// Called when an input file has been rasterized.
    fn on_file_complete(&self, file_num: usize, total_files: usize, pages: usize) {
        let _ = (file_num, total_files, pages);
    }

    /// Called before the first page is cleaned.
    fn on_build_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called after each page has been binarized and added to the output.
    fn on_page_cleaned(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called once the output PDF has been written.
    fn on_run_complete(&self, total_pages: usize) {
        let _ = total_pages;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
