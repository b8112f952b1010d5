//! Per-page image cleaning: turn one rendered scan into a bitonal bitmap.
//!
//! Steps, in order:
//!
//! 1. grayscale;
//! 2. clockwise quarter-turn rotation;
//! 3. background normalisation (uneven lighting and paper tint go to white);
//! 4. deskew by projection-profile search;
//! 5. contrast-dependent global threshold;
//! 6. optional morphological opening to drop specks;
//! 7. packing to one bit per pixel, MSB first, `1` = white.
//!
//! Everything here is synchronous and CPU-bound; callers run it on the
//! blocking pool.

use crate::config::{Contrast, OpenSize, PipelineConfig, Rotation};
use crate::error::CleanPdfError;
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::morphology::{grayscale_dilate, grayscale_erode, Mask};
use std::path::Path;
use tracing::debug;

/// Side of the square tiles sampled for the background map.
const BACKGROUND_TILE: u32 = 32;

/// Smoothing applied to the tile-maximum map, in tiles.
const BACKGROUND_SIGMA: f32 = 1.5;

/// Deskew runs on a copy no larger than this on its long side.
const DESKEW_THUMBNAIL: u32 = 800;

/// Largest skew considered, in degrees either way.
const DESKEW_MAX_DEGREES: f32 = 3.0;
const DESKEW_STEP_DEGREES: f32 = 0.25;

/// Smaller corrections are not worth a resample.
const DESKEW_MIN_DEGREES: f32 = 0.1;

/// The best angle must beat the unrotated score by this factor.
const DESKEW_MIN_GAIN: f64 = 1.01;

/// Threshold used when binarizing the deskew thumbnail.
const DESKEW_THRESHOLD: u8 = 160;

/// Value of an ink pixel in a mask.
const INK: u8 = 255;

/// Knobs for [`clean_page`].
#[derive(Debug, Clone, Copy)]
pub struct CleanSettings {
    pub contrast: Contrast,
    pub rotation: Rotation,
    pub open_size: OpenSize,
    pub deskew: bool,
}

impl From<&PipelineConfig> for CleanSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            contrast: config.contrast,
            rotation: config.rotation,
            open_size: config.open_size,
            deskew: config.deskew,
        }
    }
}

/// A cleaned page, packed one bit per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitonalPage {
    pub width: u32,
    pub height: u32,
    /// Rows of `ceil(width / 8)` bytes, MSB first; a set bit is white.
    pub data: Vec<u8>,
}

impl BitonalPage {
    pub fn row_bytes(&self) -> usize {
        (self.width as usize).div_ceil(8)
    }

    /// Whether the pixel at `(x, y)` is black.
    pub fn is_black(&self, x: u32, y: u32) -> bool {
        let byte = self.data[y as usize * self.row_bytes() + x as usize / 8];
        byte & (0x80 >> (x % 8)) == 0
    }

    pub fn black_pixels(&self) -> usize {
        (0..self.height)
            .flat_map(|y| (0..self.width).map(move |x| (x, y)))
            .filter(|&(x, y)| self.is_black(x, y))
            .count()
    }
}

/// Decode a raster file to 8-bit grayscale.
pub fn load_grayscale(path: &Path) -> Result<GrayImage, CleanPdfError> {
    let image = image::open(path).map_err(|e| CleanPdfError::ImageDecodeFailed {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    Ok(image.to_luma8())
}

/// Run the whole cleaning chain on one page.
pub fn clean_page(gray: GrayImage, settings: &CleanSettings) -> BitonalPage {
    let rotated = rotate_orthogonal(gray, settings.rotation);
    let normalized = normalize_background(&rotated);
    let straightened = if settings.deskew {
        deskew(normalized)
    } else {
        normalized
    };
    let ink = binarize(&straightened, threshold_for(settings.contrast));
    pack(&open(&ink, settings.open_size))
}

/// Gray level below which a pixel becomes black.
pub fn threshold_for(contrast: Contrast) -> u8 {
    180 + 6 * (contrast.get() - Contrast::MIN)
}

pub fn rotate_orthogonal(image: GrayImage, rotation: Rotation) -> GrayImage {
    match rotation {
        Rotation::None => image,
        Rotation::Cw90 => imageops::rotate90(&image),
        Rotation::Cw180 => imageops::rotate180(&image),
        Rotation::Cw270 => imageops::rotate270(&image),
    }
}

/// Scale every pixel so the local paper colour maps to white.
///
/// The background is estimated as the brightest value in each tile, smoothed
/// across tiles and stretched back to full size.
pub fn normalize_background(image: &GrayImage) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let tiles_x = width.div_ceil(BACKGROUND_TILE);
    let tiles_y = height.div_ceil(BACKGROUND_TILE);
    let tile_max = GrayImage::from_fn(tiles_x, tiles_y, |tx, ty| {
        let x0 = tx * BACKGROUND_TILE;
        let y0 = ty * BACKGROUND_TILE;
        let x1 = (x0 + BACKGROUND_TILE).min(width);
        let y1 = (y0 + BACKGROUND_TILE).min(height);
        let mut max = 0u8;
        for y in y0..y1 {
            for x in x0..x1 {
                max = max.max(image.get_pixel(x, y)[0]);
            }
        }
        Luma([max])
    });

    let smoothed = gaussian_blur_f32(&tile_max, BACKGROUND_SIGMA);
    let background = imageops::resize(&smoothed, width, height, FilterType::Triangle);

    GrayImage::from_fn(width, height, |x, y| {
        let pixel = u32::from(image.get_pixel(x, y)[0]);
        let bg = u32::from(background.get_pixel(x, y)[0]).max(1);
        Luma([(pixel * 255 / bg).min(255) as u8])
    })
}

/// Straighten a page skewed by up to a few degrees.
pub fn deskew(image: GrayImage) -> GrayImage {
    let angle = estimate_skew(&image);
    if angle == 0.0 {
        return image;
    }
    debug!("Deskewing by {:.2}°", angle);
    rotate_about_center(
        &image,
        angle.to_radians(),
        Interpolation::Bilinear,
        Luma([255]),
    )
}

/// Rotation in degrees that best aligns text lines with rows, or `0.0` when
/// no angle is clearly better than leaving the page alone.
pub fn estimate_skew(image: &GrayImage) -> f32 {
    let (width, height) = image.dimensions();
    if width < 2 || height < 2 {
        return 0.0;
    }

    let long_side = width.max(height);
    let thumbnail = if long_side > DESKEW_THUMBNAIL {
        let scale = DESKEW_THUMBNAIL as f32 / long_side as f32;
        let w = ((width as f32 * scale).round() as u32).max(1);
        let h = ((height as f32 * scale).round() as u32).max(1);
        imageops::resize(image, w, h, FilterType::Triangle)
    } else {
        image.clone()
    };
    let thumbnail = GrayImage::from_fn(thumbnail.width(), thumbnail.height(), |x, y| {
        if thumbnail.get_pixel(x, y)[0] < DESKEW_THRESHOLD {
            Luma([0])
        } else {
            Luma([255])
        }
    });

    let baseline = projection_score(&thumbnail);
    let steps = (DESKEW_MAX_DEGREES / DESKEW_STEP_DEGREES).round() as i32;
    let mut best_angle = 0.0f32;
    let mut best_score = baseline;
    for step in -steps..=steps {
        if step == 0 {
            continue;
        }
        let angle = step as f32 * DESKEW_STEP_DEGREES;
        let rotated = rotate_about_center(
            &thumbnail,
            angle.to_radians(),
            Interpolation::Bilinear,
            Luma([255]),
        );
        let score = projection_score(&rotated);
        if score > best_score {
            best_score = score;
            best_angle = angle;
        }
    }

    if best_angle.abs() >= DESKEW_MIN_DEGREES && best_score > baseline * DESKEW_MIN_GAIN {
        best_angle
    } else {
        0.0
    }
}

/// Sum of squared differences between the ink counts of adjacent rows.
/// Sharp, level text lines maximise it.
fn projection_score(image: &GrayImage) -> f64 {
    let rows: Vec<f64> = image
        .rows()
        .map(|row| row.filter(|p| p[0] < 128).count() as f64)
        .collect();
    rows.windows(2).map(|w| (w[1] - w[0]).powi(2)).sum()
}

/// Ink mask: `255` where the pixel is darker than `threshold`, else `0`.
pub fn binarize(image: &GrayImage, threshold: u8) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        if image.get_pixel(x, y)[0] < threshold {
            Luma([INK])
        } else {
            Luma([0])
        }
    })
}

/// Morphological opening of the ink with a `size × size` brick.
///
/// Ink survives only where a whole brick fits inside it; sizes below 2 leave
/// the mask unchanged.
pub fn open(ink: &GrayImage, size: OpenSize) -> GrayImage {
    if !size.is_active() {
        return ink.clone();
    }
    let side = size.get();
    let brick = GrayImage::from_pixel(u32::from(side), u32::from(side), Luma([INK]));
    let anchor = (side - 1) / 2;
    let eroded = grayscale_erode(ink, &Mask::from_image(&brick, anchor, anchor));
    // Dilate with the reflected brick so even sizes do not shift the page.
    let reflected = side - 1 - anchor;
    grayscale_dilate(&eroded, &Mask::from_image(&brick, reflected, reflected))
}

/// Pack an ink mask into 1-bpp rows, MSB first, white = 1.
pub fn pack(ink: &GrayImage) -> BitonalPage {
    let (width, height) = ink.dimensions();
    let row_bytes = (width as usize).div_ceil(8);
    let mut data = vec![0xFFu8; row_bytes * height as usize];
    for (x, y, pixel) in ink.enumerate_pixels() {
        if pixel[0] != 0 {
            data[y as usize * row_bytes + x as usize / 8] &= !(0x80 >> (x % 8));
        }
    }
    BitonalPage {
        width,
        height,
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(contrast: i64, rotation: i64, open_size: i64) -> CleanSettings {
        CleanSettings {
            contrast: Contrast::from_arg(contrast).unwrap(),
            rotation: Rotation::from_arg(rotation).unwrap(),
            open_size: OpenSize::from_arg(open_size).unwrap(),
            deskew: false,
        }
    }

    /// White page with black horizontal bars, like lines of text.
    fn ruled_page(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |_, y| {
            if y % 20 < 4 && y > 10 && y < height - 10 {
                Luma([0])
            } else {
                Luma([255])
            }
        })
    }

    #[test]
    fn threshold_tracks_contrast() {
        assert_eq!(threshold_for(Contrast::from_arg(1).unwrap()), 180);
        assert_eq!(threshold_for(Contrast::from_arg(5).unwrap()), 204);
        assert_eq!(threshold_for(Contrast::from_arg(10).unwrap()), 234);
    }

    #[test]
    fn rotation_swaps_dimensions() {
        let image = GrayImage::new(30, 10);
        assert_eq!(rotate_orthogonal(image.clone(), Rotation::None).dimensions(), (30, 10));
        assert_eq!(rotate_orthogonal(image.clone(), Rotation::Cw90).dimensions(), (10, 30));
        assert_eq!(rotate_orthogonal(image.clone(), Rotation::Cw180).dimensions(), (30, 10));
        assert_eq!(rotate_orthogonal(image, Rotation::Cw270).dimensions(), (10, 30));
    }

    #[test]
    fn rotation_is_clockwise() {
        let mut image = GrayImage::from_pixel(4, 2, Luma([255]));
        image.put_pixel(0, 0, Luma([0]));
        // Top-left goes to top-right after a clockwise quarter turn.
        let rotated = rotate_orthogonal(image, Rotation::Cw90);
        assert_eq!(rotated.get_pixel(1, 0)[0], 0);
    }

    #[test]
    fn normalization_whitens_tinted_paper() {
        let tinted = GrayImage::from_fn(128, 128, |x, y| {
            if (60..68).contains(&x) && (60..68).contains(&y) {
                Luma([20])
            } else {
                Luma([200])
            }
        });
        let normalized = normalize_background(&tinted);
        assert_eq!(normalized.get_pixel(5, 5)[0], 255);
        assert!(normalized.get_pixel(64, 64)[0] < 40);
    }

    #[test]
    fn light_gray_noise_depends_on_contrast() {
        // A 190-gray page: white at contrast 1, black at contrast 10.
        let page = GrayImage::from_pixel(4, 4, Luma([190]));
        assert!(binarize(&page, 180).pixels().all(|p| p[0] == 0));
        assert!(binarize(&page, 234).pixels().all(|p| p[0] == INK));
    }

    fn ink_count(ink: &GrayImage) -> usize {
        ink.pixels().filter(|p| p[0] == INK).count()
    }

    /// 12×12 mask with a lone speck at (2, 2) and a 3×3 block at (6..9, 6..9).
    fn specked_mask() -> GrayImage {
        GrayImage::from_fn(12, 12, |x, y| {
            let speck = (x, y) == (2, 2);
            let block = (6..9).contains(&x) && (6..9).contains(&y);
            Luma([if speck || block { INK } else { 0 }])
        })
    }

    #[test]
    fn opening_removes_specks_but_keeps_strokes() {
        let ink = specked_mask();

        let opened = open(&ink, OpenSize::from_arg(2).unwrap());
        assert_eq!(opened.get_pixel(2, 2)[0], 0);
        assert_eq!(ink_count(&opened), 9);
        // The block stays where it was.
        for y in 6..9 {
            for x in 6..9 {
                assert_eq!(opened.get_pixel(x, y)[0], INK, "lost ({x}, {y})");
            }
        }

        // A 3×3 brick still fits the block exactly.
        let opened = open(&ink, OpenSize::from_arg(3).unwrap());
        assert_eq!(opened, {
            let mut block = ink.clone();
            block.put_pixel(2, 2, Luma([0]));
            block
        });
    }

    #[test]
    fn two_by_two_opening_keeps_a_two_pixel_stroke() {
        let mut ink = GrayImage::new(6, 6);
        for y in 0..6 {
            ink.put_pixel(3, y, Luma([INK]));
            ink.put_pixel(4, y, Luma([INK]));
        }
        ink.put_pixel(0, 0, Luma([INK]));
        let opened = open(&ink, OpenSize::from_arg(2).unwrap());
        assert_eq!(ink_count(&opened), 12);
        assert_eq!(opened.get_pixel(0, 0)[0], 0);
        assert_eq!(opened.get_pixel(4, 5)[0], INK);
    }

    #[test]
    fn opening_below_two_is_identity() {
        let ink = specked_mask();
        for size in [-1, 0, 1] {
            assert_eq!(open(&ink, OpenSize::from_arg(size).unwrap()), ink);
        }
    }

    #[test]
    fn packing_is_msb_first_white_set() {
        let mut ink = GrayImage::new(10, 1);
        ink.put_pixel(0, 0, Luma([INK]));
        ink.put_pixel(9, 0, Luma([INK]));
        let page = pack(&ink);
        assert_eq!(page.row_bytes(), 2);
        assert_eq!(page.data, vec![0b0111_1111, 0b1011_1111]);
        assert!(page.is_black(0, 0));
        assert!(page.is_black(9, 0));
        assert_eq!(page.black_pixels(), 2);
    }

    #[test]
    fn clean_page_keeps_ruled_lines() {
        let page = clean_page(ruled_page(64, 100), &settings(5, 0, 0));
        assert_eq!((page.width, page.height), (64, 100));
        assert!(page.is_black(30, 20));
        assert!(!page.is_black(30, 30));
    }

    #[test]
    fn clean_page_rotates_before_packing() {
        let page = clean_page(ruled_page(64, 100), &settings(5, 1, 0));
        assert_eq!((page.width, page.height), (100, 64));
    }

    #[test]
    fn straight_page_is_not_deskewed() {
        assert_eq!(estimate_skew(&ruled_page(200, 300)), 0.0);
    }

    #[test]
    fn skewed_page_is_detected() {
        let straight = ruled_page(300, 300);
        let skewed = rotate_about_center(
            &straight,
            2.0f32.to_radians(),
            Interpolation::Bilinear,
            Luma([255]),
        );
        let angle = estimate_skew(&skewed);
        assert!((angle + 2.0).abs() <= 0.5, "estimated {angle}");
    }
}
