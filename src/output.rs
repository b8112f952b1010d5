//! Result types returned by a run.

use crate::pipeline::assemble::BuildSummary;
use crate::pipeline::rasterize::RasterFile;
use crate::pipeline::resolution::Resolution;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Everything a successful run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    /// The written document.
    pub output_path: PathBuf,
    /// Input PDFs in processing order.
    pub inputs: Vec<PathBuf>,
    /// Chosen render resolution and how it was derived.
    pub resolution: Resolution,
    /// Page images in output order. Empty when the scratch directory was
    /// cleaned up after the run.
    pub rasters: Vec<RasterFile>,
    /// Scratch directory the rasters were written to.
    pub scratch_dir: PathBuf,
    /// Whether every raster of this run was deleted after the build.
    pub rasters_removed: bool,
    /// Whether the scratch directory itself is gone. It stays when it holds
    /// files this run did not write.
    pub scratch_dir_removed: bool,
    pub stats: RunStats,
}

/// Counters and timings for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub input_files: usize,
    pub pages: usize,
    pub output_bytes: u64,
    pub render_ppi: u32,
    pub output_ppi: u32,
    pub total_duration_ms: u64,
    pub rasterize_duration_ms: u64,
    pub build_duration_ms: u64,
}

impl RunStats {
    pub(crate) fn record_build(&mut self, summary: &BuildSummary) {
        self.pages = summary.pages;
        self.output_bytes = summary.bytes;
    }
}
