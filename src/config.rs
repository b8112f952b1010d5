//! Configuration types for a cleanpdf run.
//!
//! A run is controlled by one [`PipelineConfig`], built through its
//! [`PipelineConfigBuilder`]. The builder accepts the raw integers exactly as
//! they arrive on the command line and validates them all in
//! [`PipelineConfigBuilder::build`]. Once built, the config is immutable and
//! no pipeline stage checks a parameter again.
//!
//! # Parameter domains
//!
//! | Parameter | Accepted | Normalised |
//! |-----------|----------|------------|
//! | resolution | `0`, `300`, `600` | `0 → 300` |
//! | contrast | `0..=10` | `0 → 1` |
//! | rotation | `0..=3` (quarter turns clockwise) | |
//! | opensize | `..=3` (values below `2` do nothing) | negative `→ 0` |

use crate::error::CleanPdfError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Name of the scratch directory created under the base directory.
pub const DEFAULT_SCRATCH_DIR: &str = "image";

/// Default upper bound on one rasterizer invocation.
pub const DEFAULT_RASTERIZER_TIMEOUT_SECS: u64 = 600;

/// Validated parameters for one run.
///
/// # Example
/// ```rust
/// use cleanpdf::PipelineConfig;
///
/// let config = PipelineConfig::builder("scans", "out.pdf")
///     .resolution(0)
///     .contrast(0)
///     .title("Minutes 1998")
///     .build()
///     .unwrap();
/// assert_eq!(config.output_resolution.ppi(), 300);
/// assert_eq!(config.contrast.get(), 1);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Directory scanned (non-recursively) for `*.pdf` inputs.
    pub base_dir: PathBuf,

    /// Resolution of the bitonal output pages. Also the nominal resolution
    /// requested from the rasterizer when media boxes are sane.
    pub output_resolution: OutputResolution,

    /// Binarization contrast, 1 (lightest, removes noise) to 10 (keeps
    /// faint detail).
    pub contrast: Contrast,

    /// Orthogonal rotation applied to every page.
    pub rotation: Rotation,

    /// Side of the square opening brick used to remove speckle.
    pub open_size: OpenSize,

    /// Straighten pages skewed by up to 3°. Default: on.
    pub deskew: bool,

    /// Title written to the output PDF's `/Info` dictionary.
    pub title: Option<String>,

    /// Path of the final PDF.
    pub output_path: PathBuf,

    /// Scratch directory name, relative to `base_dir`. Default: `image`.
    pub scratch_dir_name: String,

    /// What happens to the scratch directory after a successful run.
    /// Default: [`ScratchPolicy::Keep`].
    pub scratch_policy: ScratchPolicy,

    /// Which rasterizer renders the pages. Default: [`RasterBackend::Pdftoppm`].
    pub raster_backend: RasterBackend,

    /// Intermediate raster file format. Default: [`RasterFormat::Ppm`].
    pub raster_format: RasterFormat,

    /// Program invoked by the `pdftoppm` backend. Default: `pdftoppm` on `PATH`.
    pub pdftoppm_path: PathBuf,

    /// Upper bound on a single rasterizer invocation, in seconds. Default: 600.
    ///
    /// A rasterizer that exceeds it is killed and the run fails.
    pub rasterizer_timeout_secs: u64,

    /// Optional progress events sink.
    pub progress_callback: Option<ProgressCallback>,
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("base_dir", &self.base_dir)
            .field("output_resolution", &self.output_resolution)
            .field("contrast", &self.contrast)
            .field("rotation", &self.rotation)
            .field("open_size", &self.open_size)
            .field("deskew", &self.deskew)
            .field("title", &self.title)
            .field("output_path", &self.output_path)
            .field("scratch_dir_name", &self.scratch_dir_name)
            .field("scratch_policy", &self.scratch_policy)
            .field("raster_backend", &self.raster_backend)
            .field("raster_format", &self.raster_format)
            .field("pdftoppm_path", &self.pdftoppm_path)
            .field("rasterizer_timeout_secs", &self.rasterizer_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a builder for a run over `base_dir` writing `output_path`.
    pub fn builder(
        base_dir: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
    ) -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            base_dir: base_dir.into(),
            output_path: output_path.into(),
            resolution: 0,
            contrast: 0,
            rotation: 0,
            open_size: 0,
            deskew: true,
            title: None,
            scratch_dir_name: DEFAULT_SCRATCH_DIR.to_string(),
            scratch_policy: ScratchPolicy::default(),
            raster_backend: RasterBackend::default(),
            raster_format: RasterFormat::default(),
            pdftoppm_path: PathBuf::from("pdftoppm"),
            rasterizer_timeout_secs: DEFAULT_RASTERIZER_TIMEOUT_SECS,
            progress_callback: None,
        }
    }

    /// Absolute-or-relative path of the scratch directory for this run.
    pub fn scratch_dir(&self) -> PathBuf {
        self.base_dir.join(&self.scratch_dir_name)
    }
}

/// Builder for [`PipelineConfig`].
///
/// Numeric setters store the raw value; nothing is clamped. Out-of-range
/// values are reported by [`build`](Self::build).
pub struct PipelineConfigBuilder {
    base_dir: PathBuf,
    output_path: PathBuf,
    resolution: i64,
    contrast: i64,
    rotation: i64,
    open_size: i64,
    deskew: bool,
    title: Option<String>,
    scratch_dir_name: String,
    scratch_policy: ScratchPolicy,
    raster_backend: RasterBackend,
    raster_format: RasterFormat,
    pdftoppm_path: PathBuf,
    rasterizer_timeout_secs: u64,
    progress_callback: Option<ProgressCallback>,
}

impl PipelineConfigBuilder {
    pub fn resolution(mut self, ppi: i64) -> Self {
        self.resolution = ppi;
        self
    }

    pub fn contrast(mut self, contrast: i64) -> Self {
        self.contrast = contrast;
        self
    }

    pub fn rotation(mut self, quarter_turns: i64) -> Self {
        self.rotation = quarter_turns;
        self
    }

    pub fn open_size(mut self, size: i64) -> Self {
        self.open_size = size;
        self
    }

    pub fn deskew(mut self, enabled: bool) -> Self {
        self.deskew = enabled;
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn maybe_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    pub fn scratch_dir_name(mut self, name: impl Into<String>) -> Self {
        self.scratch_dir_name = name.into();
        self
    }

    pub fn scratch_policy(mut self, policy: ScratchPolicy) -> Self {
        self.scratch_policy = policy;
        self
    }

    pub fn raster_backend(mut self, backend: RasterBackend) -> Self {
        self.raster_backend = backend;
        self
    }

    pub fn raster_format(mut self, format: RasterFormat) -> Self {
        self.raster_format = format;
        self
    }

    pub fn pdftoppm_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.pdftoppm_path = path.into();
        self
    }

    pub fn rasterizer_timeout_secs(mut self, secs: u64) -> Self {
        self.rasterizer_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.progress_callback = Some(cb);
        self
    }

    /// Validate every parameter and build the configuration.
    ///
    /// Parameters are checked in command-line order; the first violation is
    /// returned.
    pub fn build(self) -> Result<PipelineConfig, CleanPdfError> {
        let output_resolution = OutputResolution::from_arg(self.resolution)?;
        let contrast = Contrast::from_arg(self.contrast)?;
        let rotation = Rotation::from_arg(self.rotation)?;
        let open_size = OpenSize::from_arg(self.open_size)?;

        if self.output_path.as_os_str().is_empty() {
            return Err(CleanPdfError::InvalidConfig(
                "output file path must not be empty".into(),
            ));
        }
        if self.scratch_dir_name.is_empty() || Path::new(&self.scratch_dir_name).is_absolute() {
            return Err(CleanPdfError::InvalidConfig(format!(
                "scratch directory name must be a non-empty relative name, got {:?}",
                self.scratch_dir_name
            )));
        }
        if self.rasterizer_timeout_secs == 0 {
            return Err(CleanPdfError::InvalidConfig(
                "rasterizer timeout must be ≥ 1 second".into(),
            ));
        }

        Ok(PipelineConfig {
            base_dir: self.base_dir,
            output_resolution,
            contrast,
            rotation,
            open_size,
            deskew: self.deskew,
            title: self.title,
            output_path: self.output_path,
            scratch_dir_name: self.scratch_dir_name,
            scratch_policy: self.scratch_policy,
            raster_backend: self.raster_backend,
            raster_format: self.raster_format,
            pdftoppm_path: self.pdftoppm_path,
            rasterizer_timeout_secs: self.rasterizer_timeout_secs,
            progress_callback: self.progress_callback,
        })
    }
}

// ── Parameter types ──────────────────────────────────────────────────────

/// Resolution of the bitonal output, in pixels per inch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputResolution {
    /// 300 ppi: an 8.5 × 11 in page is 2550 × 3300 px. (default)
    #[default]
    Ppi300,
    /// 600 ppi: twice the linear resolution, for small print.
    Ppi600,
}

impl OutputResolution {
    /// Parse the command-line value; `0` selects the default.
    pub fn from_arg(value: i64) -> Result<Self, CleanPdfError> {
        match value {
            0 | 300 => Ok(Self::Ppi300),
            600 => Ok(Self::Ppi600),
            _ => Err(CleanPdfError::InvalidParameter {
                name: "resolution",
                value,
                allowed: "{0, 300, 600}",
            }),
        }
    }

    pub fn ppi(self) -> u32 {
        match self {
            Self::Ppi300 => 300,
            Self::Ppi600 => 600,
        }
    }
}

/// Binarization contrast in `1..=10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contrast(u8);

impl Contrast {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    /// Parse the command-line value; `0` means the lightest setting, `1`.
    pub fn from_arg(value: i64) -> Result<Self, CleanPdfError> {
        let value = if value == 0 { 1 } else { value };
        if !(i64::from(Self::MIN)..=i64::from(Self::MAX)).contains(&value) {
            return Err(CleanPdfError::InvalidParameter {
                name: "contrast",
                value,
                allowed: "{1,...,10}",
            });
        }
        Ok(Self(value as u8))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for Contrast {
    fn default() -> Self {
        Self(Self::MIN)
    }
}

/// Clockwise rotation applied to every page before binarization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    /// Parse the number of clockwise quarter turns.
    pub fn from_arg(value: i64) -> Result<Self, CleanPdfError> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Cw90),
            2 => Ok(Self::Cw180),
            3 => Ok(Self::Cw270),
            _ => Err(CleanPdfError::InvalidParameter {
                name: "rotation",
                value,
                allowed: "{0,1,2,3}",
            }),
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Cw90 => 90,
            Self::Cw180 => 180,
            Self::Cw270 => 270,
        }
    }
}

/// Size of the square structuring element used for speckle removal.
///
/// A size of 2 removes every foreground pixel that is not part of some 2×2
/// block of foreground; 3 is often too aggressive for thin strokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OpenSize(u8);

impl OpenSize {
    pub const MAX: u8 = 3;

    /// Any value up to 3 is accepted; everything below 2 disables the opening.
    pub fn from_arg(value: i64) -> Result<Self, CleanPdfError> {
        if value > i64::from(Self::MAX) {
            return Err(CleanPdfError::InvalidParameter {
                name: "opensize",
                value,
                allowed: "{...,2,3}",
            });
        }
        Ok(Self(value.max(0) as u8))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Whether an opening actually changes the image.
    pub fn is_active(self) -> bool {
        self.0 >= 2
    }
}

/// What to do with the scratch directory once the output PDF is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScratchPolicy {
    /// Leave every raster on disk for inspection. (default)
    #[default]
    Keep,
    /// Delete the rasters this run created, then the directory if it is empty.
    /// Failed runs always keep their rasters.
    RemoveOnSuccess,
}

/// Page rasterizer implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RasterBackend {
    /// Poppler's `pdftoppm`, run as an external process. (default)
    #[default]
    Pdftoppm,
    /// pdfium, loaded in-process through `pdfium-render`.
    Pdfium,
}

/// File format of the intermediate page rasters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RasterFormat {
    /// Uncompressed portable pixmap; fastest to write, large on disk. (default)
    #[default]
    Ppm,
    /// PNG; slower, a fraction of the disk space.
    Png,
}

impl RasterFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Ppm => "ppm",
            Self::Png => "png",
        }
    }
}
