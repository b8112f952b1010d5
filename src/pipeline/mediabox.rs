//! Media-box probing and the median page geometry of a batch.
//!
//! Image-only PDFs say how big to print their pixels only through each
//! page's `/MediaBox` (in printer points, 1/72 in). Some producers write
//! absurd boxes, so rendering "at 300 ppi" can yield enormous bitmaps. The
//! resolver works from the *median* width and height of one representative
//! file: one or two broken boxes cannot drag the estimate to an extreme.
//!
//! Widths and heights are medianed independently, not as pairs.

use crate::error::CleanPdfError;
use lopdf::{Dictionary, Document, Object};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// Declared size of one page, in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageGeometry {
    pub width_pt: f64,
    pub height_pt: f64,
}

/// Element-wise median of the sampled [`PageGeometry`] values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MedianGeometry {
    pub width_pt: f64,
    pub height_pt: f64,
}

impl MedianGeometry {
    /// The longer of the two median dimensions.
    pub fn long_side_pt(&self) -> f64 {
        self.width_pt.max(self.height_pt)
    }
}

/// Media boxes are inherited through the page tree; this bounds the walk.
const MAX_PARENT_DEPTH: usize = 32;

/// Read the declared media box of every page of `pdf_path`, in page order.
///
/// Pages without a usable box are skipped. A file that cannot be parsed at
/// all yields an empty list: the renderer may still handle it, and an empty
/// sample sends the resolver down its probe-render path.
pub async fn probe_media_boxes(pdf_path: &Path) -> Result<Vec<PageGeometry>, CleanPdfError> {
    let path = pdf_path.to_path_buf();
    tokio::task::spawn_blocking(move || probe_media_boxes_blocking(&path))
        .await
        .map_err(|e| CleanPdfError::Internal(format!("Media-box probe panicked: {}", e)))
}

fn probe_media_boxes_blocking(pdf_path: &Path) -> Vec<PageGeometry> {
    let document = match Document::load(pdf_path) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(
                "Could not parse {} for media boxes: {}",
                pdf_path.display(),
                e
            );
            return Vec::new();
        }
    };

    let pages = document.get_pages();
    let page_count = pages.len();
    let mut boxes = Vec::with_capacity(page_count);
    for (page_num, page_id) in pages {
        let Ok(page) = document.get_dictionary(page_id) else {
            debug!("Page {} is not a dictionary", page_num);
            continue;
        };
        match inherited_media_box(&document, page).and_then(|obj| parse_box(&document, obj)) {
            Some(geometry) => boxes.push(geometry),
            None => debug!("Page {} declares no usable media box", page_num),
        }
    }

    debug!(
        "{}: {} media box(es) over {} page(s)",
        pdf_path.display(),
        boxes.len(),
        page_count
    );
    boxes
}

/// Find `/MediaBox` on the page or the nearest ancestor that defines it.
fn inherited_media_box<'a>(document: &'a Document, page: &'a Dictionary) -> Option<&'a Object> {
    let mut node = page;
    for _ in 0..MAX_PARENT_DEPTH {
        if let Ok(media_box) = node.get(b"MediaBox") {
            return Some(media_box);
        }
        let parent = node.get(b"Parent").ok()?;
        node = resolve(document, parent)?.as_dict().ok()?;
    }
    None
}

fn resolve<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => document.get_object(*id).ok(),
        other => Some(other),
    }
}

fn number(document: &Document, object: &Object) -> Option<f64> {
    match resolve(document, object)? {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

fn parse_box(document: &Document, object: &Object) -> Option<PageGeometry> {
    let values = resolve(document, object)?.as_array().ok()?;
    if values.len() != 4 {
        return None;
    }
    let coords: Vec<f64> = values
        .iter()
        .map(|v| number(document, v))
        .collect::<Option<_>>()?;
    let geometry = PageGeometry {
        width_pt: (coords[2] - coords[0]).abs(),
        height_pt: (coords[3] - coords[1]).abs(),
    };
    (geometry.width_pt.is_finite() && geometry.height_pt.is_finite()).then_some(geometry)
}

/// Rank-0.5 value of `values`: the middle element after sorting, the upper
/// of the two middle elements for an even count. `None` when empty.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let index = ((sorted.len() - 1) as f64 * 0.5 + 0.5) as usize;
    Some(sorted[index])
}

/// Summarise sampled geometry; `None` when nothing was sampled.
pub fn median_geometry(boxes: &[PageGeometry]) -> Option<MedianGeometry> {
    let widths: Vec<f64> = boxes.iter().map(|b| b.width_pt).collect();
    let heights: Vec<f64> = boxes.iter().map(|b| b.height_pt).collect();
    Some(MedianGeometry {
        width_pt: median(&widths)?,
        height_pt: median(&heights)?,
    })
}

/// Estimate the batch geometry from its representative file.
pub async fn estimate(pdf_path: &Path) -> Result<Option<MedianGeometry>, CleanPdfError> {
    let boxes = probe_media_boxes(pdf_path).await?;
    let geometry = median_geometry(&boxes);
    match geometry {
        Some(g) => debug!(
            "Median media box of {}: {:.1} × {:.1} pt",
            pdf_path.display(),
            g.width_pt,
            g.height_pt
        ),
        None => debug!("No media box found in {}", pdf_path.display()),
    }
    Ok(geometry)
}
