//! Run orchestration: inputs → resolution → rasters → output PDF.
//!
//! [`Pipeline`] owns the two injected capabilities (a [`Rasterizer`] and a
//! [`PdfBuilder`]) and sequences the stages. Every stage is a hard
//! precondition for the next; the first error ends the run.
//!
//! [`convert_directory`] is the usual entry point: it picks the rasterizer
//! named in the config and the default bitonal builder.

use crate::config::{PipelineConfig, RasterBackend, ScratchPolicy};
use crate::error::CleanPdfError;
use crate::output::{RunOutput, RunStats};
use crate::pipeline::assemble::{BitonalPdfBuilder, BuildRequest, PdfBuilder};
use crate::pipeline::clean::CleanSettings;
use crate::pipeline::input;
use crate::pipeline::rasterize::{self, PdftoppmRasterizer, RasterFile, Rasterizer};
use crate::pipeline::render::PdfiumRasterizer;
use crate::pipeline::resolution;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A configured pair of rasterizer and builder.
#[derive(Debug, Clone)]
pub struct Pipeline<R, B> {
    rasterizer: R,
    builder: B,
}

impl<R: Rasterizer, B: PdfBuilder> Pipeline<R, B> {
    pub fn new(rasterizer: R, builder: B) -> Self {
        Self {
            rasterizer,
            builder,
        }
    }

    pub fn rasterizer(&self) -> &R {
        &self.rasterizer
    }

    pub fn builder(&self) -> &B {
        &self.builder
    }

    /// Process every PDF in `config.base_dir` into `config.output_path`.
    ///
    /// # Errors
    /// Returns the first failure of any stage. Rasters already written stay
    /// in the scratch directory whatever the [`ScratchPolicy`].
    pub async fn run(&self, config: &PipelineConfig) -> Result<RunOutput, CleanPdfError> {
        let total_start = Instant::now();
        let scratch_dir = config.scratch_dir();
        info!(
            "Starting run: {} → {} (rasterizer: {})",
            config.base_dir.display(),
            config.output_path.display(),
            self.rasterizer.name()
        );

        // ── Step 1: Stage scratch directory ──────────────────────────────
        input::check_base_dir(&config.base_dir).await?;
        input::prepare_scratch_dir(&scratch_dir).await?;

        // ── Step 2: Discover inputs ──────────────────────────────────────
        let inputs = input::discover_inputs(&config.base_dir).await?;
        if let Some(ref cb) = config.progress_callback {
            cb.on_run_start(inputs.len());
        }

        // ── Step 3: Choose render resolution ─────────────────────────────
        let resolution = resolution::resolve_render_resolution(
            &self.rasterizer,
            &inputs,
            config.output_resolution,
            &scratch_dir,
        )
        .await?;
        if let Some(ref cb) = config.progress_callback {
            cb.on_resolution_chosen(resolution.ppi);
        }

        // ── Step 4: Rasterize ────────────────────────────────────────────
        let rasterize_start = Instant::now();
        let groups = rasterize::rasterize_all(
            &self.rasterizer,
            &inputs,
            resolution.ppi,
            &scratch_dir,
            config.progress_callback.as_ref(),
        )
        .await?;
        let rasters = rasterize::ordered_rasters(&groups);
        let rasterize_duration_ms = rasterize_start.elapsed().as_millis() as u64;
        if rasters.is_empty() {
            return Err(CleanPdfError::NoPagesRendered { dir: scratch_dir });
        }
        info!(
            "Rasterized {} page(s) from {} file(s) at {} ppi in {}ms",
            rasters.len(),
            inputs.len(),
            resolution.ppi,
            rasterize_duration_ms
        );

        // ── Step 5: Clean and assemble ───────────────────────────────────
        let build_start = Instant::now();
        let request = BuildRequest {
            images: rasters.iter().map(|r| r.path.clone()).collect(),
            output_ppi: config.output_resolution.ppi(),
            settings: CleanSettings::from(config),
            title: config.title.clone(),
            output_path: config.output_path.clone(),
            progress: config.progress_callback.clone(),
        };
        let summary = self.builder.build(request).await?;
        let build_duration_ms = build_start.elapsed().as_millis() as u64;

        // ── Step 6: Scratch policy ───────────────────────────────────────
        let cleanup = match config.scratch_policy {
            ScratchPolicy::Keep => ScratchCleanup::default(),
            ScratchPolicy::RemoveOnSuccess => remove_rasters(&scratch_dir, &rasters).await,
        };

        let mut stats = RunStats {
            input_files: inputs.len(),
            render_ppi: resolution.ppi,
            output_ppi: config.output_resolution.ppi(),
            rasterize_duration_ms,
            build_duration_ms,
            ..RunStats::default()
        };
        stats.record_build(&summary);
        stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

        info!(
            "Run complete: {} page(s), {} bytes, {}ms total",
            stats.pages, stats.output_bytes, stats.total_duration_ms
        );
        if let Some(ref cb) = config.progress_callback {
            cb.on_run_complete(stats.pages);
        }

        Ok(RunOutput {
            output_path: config.output_path.clone(),
            inputs: inputs.files().to_vec(),
            resolution,
            rasters: if cleanup.rasters_removed { Vec::new() } else { rasters },
            scratch_dir,
            rasters_removed: cleanup.rasters_removed,
            scratch_dir_removed: cleanup.dir_removed,
            stats,
        })
    }
}

/// What [`remove_rasters`] managed to delete.
#[derive(Debug, Default, Clone, Copy)]
struct ScratchCleanup {
    rasters_removed: bool,
    dir_removed: bool,
}

/// Delete this run's rasters, then the scratch directory if nothing else is
/// left in it.
async fn remove_rasters(scratch_dir: &Path, rasters: &[RasterFile]) -> ScratchCleanup {
    let mut rasters_removed = true;
    for raster in rasters {
        if let Err(e) = tokio::fs::remove_file(&raster.path).await {
            warn!("Could not remove {}: {}", raster.path.display(), e);
            rasters_removed = false;
        }
    }
    // Fails when the directory holds anything else.
    let dir_removed = match tokio::fs::remove_dir(scratch_dir).await {
        Ok(()) => {
            debug!("Removed scratch directory {}", scratch_dir.display());
            true
        }
        Err(e) => {
            debug!("Kept scratch directory {}: {}", scratch_dir.display(), e);
            false
        }
    };
    ScratchCleanup {
        rasters_removed,
        dir_removed,
    }
}

/// Run with the rasterizer selected by `config.raster_backend` and the
/// default bitonal builder.
///
/// This is the primary entry point for the library.
///
/// # Example
/// ```rust,no_run
/// use cleanpdf::{convert_directory, PipelineConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = PipelineConfig::builder("scans/1998", "minutes-1998.pdf")
///     .contrast(5)
///     .title("Minutes 1998")
///     .build()?;
/// let output = convert_directory(&config).await?;
/// eprintln!("{} pages at {} ppi", output.stats.pages, output.resolution.ppi);
/// # Ok(())
/// # }
/// ```
pub async fn convert_directory(config: &PipelineConfig) -> Result<RunOutput, CleanPdfError> {
    match config.raster_backend {
        RasterBackend::Pdftoppm => {
            let rasterizer = PdftoppmRasterizer::new(
                &config.pdftoppm_path,
                config.raster_format,
                Duration::from_secs(config.rasterizer_timeout_secs),
            );
            Pipeline::new(rasterizer, BitonalPdfBuilder).run(config).await
        }
        RasterBackend::Pdfium => {
            let rasterizer = PdfiumRasterizer::new(config.raster_format);
            Pipeline::new(rasterizer, BitonalPdfBuilder).run(config).await
        }
    }
}

/// Synchronous wrapper around [`convert_directory`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(config: &PipelineConfig) -> Result<RunOutput, CleanPdfError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| CleanPdfError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert_directory(config))
}
