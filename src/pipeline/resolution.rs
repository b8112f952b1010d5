//! Choose the render resolution for a batch.
//!
//! Scanned PDFs that declare letter-sized pages render at the nominal
//! resolution (300 or 600 ppi). Batches whose median page is larger than
//! [`OVERSIZE_TRIGGER_PT`] on its long side are rendered at a proportionally
//! reduced resolution so the long side comes out roughly as many pixels as a
//! letter page would at the nominal resolution. The result never drops below
//! [`MIN_RENDER_RESOLUTION`].
//!
//! When the representative file declares no usable media boxes, its first
//! page is rendered once at [`PROBE_RESOLUTION`] and the pixel size of that
//! image stands in for the missing geometry.

use crate::config::OutputResolution;
use crate::error::CleanPdfError;
use crate::pipeline::input::{output_basename, InputSet};
use crate::pipeline::mediabox::{self, MedianGeometry};
use crate::pipeline::rasterize::{RasterRequest, Rasterizer};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// Long side of a US-letter page in points.
pub const REFERENCE_LONG_SIDE_PT: f64 = 792.0;

/// Long sides up to this many points render at the nominal resolution.
pub const OVERSIZE_TRIGGER_PT: f64 = 850.0;

/// Lower bound on any computed render resolution.
pub const MIN_RENDER_RESOLUTION: u32 = 72;

/// Resolution of the one-page fallback probe. At 72 ppi one pixel is one point.
pub const PROBE_RESOLUTION: u32 = 72;

/// Where a chosen resolution came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionSource {
    /// Nothing measured; the nominal resolution was used as-is.
    Nominal,
    /// Derived from the median declared media box.
    MediaBox { width_pt: f64, height_pt: f64 },
    /// Derived from a probe render of the first page.
    ProbeRender { width_px: u32, height_px: u32 },
}

/// The render resolution for a run and how it was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub ppi: u32,
    pub source: ResolutionSource,
}

/// Render resolution for a page whose long side is `long_side_pt` points.
pub fn resolve_for_long_side(long_side_pt: f64, output: OutputResolution) -> u32 {
    let nominal = output.ppi();
    if !long_side_pt.is_finite() || long_side_pt <= OVERSIZE_TRIGGER_PT {
        return nominal;
    }
    let scaled = (f64::from(nominal) * REFERENCE_LONG_SIDE_PT / long_side_pt).round() as u32;
    scaled.max(MIN_RENDER_RESOLUTION)
}

/// Render resolution for a batch of the given median geometry.
///
/// No geometry means nothing is known, so the nominal resolution is used.
pub fn resolve(geometry: Option<MedianGeometry>, output: OutputResolution) -> u32 {
    match geometry {
        Some(g) => resolve_for_long_side(g.long_side_pt(), output),
        None => output.ppi(),
    }
}

/// Pick the render resolution for `inputs`.
///
/// Reads media boxes from the representative file. Without any, asks
/// `rasterizer` for a single probe page in a temporary directory inside
/// `scratch_dir`; that directory is removed before returning. A failed probe
/// is not fatal: the nominal resolution is used and the real rasterization
/// will report any problem with the file.
pub async fn resolve_render_resolution<R: Rasterizer>(
    rasterizer: &R,
    inputs: &InputSet,
    output: OutputResolution,
    scratch_dir: &Path,
) -> Result<Resolution, CleanPdfError> {
    let representative = inputs.representative();

    if let Some(geometry) = mediabox::estimate(representative).await? {
        let ppi = resolve(Some(geometry), output);
        info!(
            "Median page {:.0} × {:.0} pt → rendering at {} ppi",
            geometry.width_pt, geometry.height_pt, ppi
        );
        return Ok(Resolution {
            ppi,
            source: ResolutionSource::MediaBox {
                width_pt: geometry.width_pt,
                height_pt: geometry.height_pt,
            },
        });
    }

    match probe_first_page(rasterizer, representative, scratch_dir).await {
        Ok((width_px, height_px)) => {
            // At the probe resolution pixels and points coincide.
            let scale = 72.0 / f64::from(PROBE_RESOLUTION);
            let long_side_pt = f64::from(width_px.max(height_px)) * scale;
            let ppi = resolve_for_long_side(long_side_pt, output);
            info!(
                "Probe page {} × {} px at {} ppi → rendering at {} ppi",
                width_px, height_px, PROBE_RESOLUTION, ppi
            );
            Ok(Resolution {
                ppi,
                source: ResolutionSource::ProbeRender {
                    width_px,
                    height_px,
                },
            })
        }
        Err(e) => {
            warn!(
                "Could not measure {}: {}; using {} ppi",
                representative.display(),
                e,
                output.ppi()
            );
            Ok(Resolution {
                ppi: output.ppi(),
                source: ResolutionSource::Nominal,
            })
        }
    }
}

async fn probe_first_page<R: Rasterizer>(
    rasterizer: &R,
    pdf_path: &Path,
    scratch_dir: &Path,
) -> Result<(u32, u32), CleanPdfError> {
    let probe_dir = tempfile::Builder::new()
        .prefix(".probe-")
        .tempdir_in(scratch_dir)
        .map_err(|e| CleanPdfError::ScratchDirFailed {
            path: scratch_dir.to_path_buf(),
            source: e,
        })?;

    let request = RasterRequest {
        pdf_path: pdf_path.to_path_buf(),
        resolution: PROBE_RESOLUTION,
        output_dir: probe_dir.path().to_path_buf(),
        basename: output_basename(pdf_path),
        pages: Some((1, 1)),
    };
    let pages = rasterizer.rasterize(&request).await?;
    let first = pages
        .into_iter()
        .next()
        .ok_or_else(|| CleanPdfError::NoPagesRendered {
            dir: probe_dir.path().to_path_buf(),
        })?;

    let dims = image::image_dimensions(&first.path).map_err(|e| {
        CleanPdfError::ImageDecodeFailed {
            path: first.path.clone(),
            detail: e.to_string(),
        }
    })?;
    debug!("Probe image {}: {} × {} px", first.path.display(), dims.0, dims.1);
    // `probe_dir` is removed on drop.
    Ok(dims)
}
