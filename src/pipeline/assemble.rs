//! Output assembly: clean every raster and concatenate them into one PDF.
//!
//! Each page becomes a single full-page image XObject: 1 bit per component,
//! `/DeviceGray`, CCITT Group 4 compressed. Pages wider or taller than Group 4
//! can describe (65535 px) fall back to Flate. The page is sized so the image
//! prints at the requested output resolution, whatever resolution it was
//! rendered at.
//!
//! The file is written to a temporary sibling and renamed into place, so a
//! failed run never leaves a truncated output behind.

use crate::error::CleanPdfError;
use crate::pipeline::clean::{self, BitonalPage, CleanSettings};
use crate::progress::ProgressCallback;
use fax::encoder::Encoder;
use fax::{Color, VecWriter};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Value of the `/Producer` entry of every output document.
pub const PRODUCER: &str = concat!("cleanpdf ", env!("CARGO_PKG_VERSION"));

/// Everything a [`PdfBuilder`] needs for one output document.
#[derive(Clone)]
pub struct BuildRequest {
    /// Raster files in final page order.
    pub images: Vec<PathBuf>,
    /// Resolution the cleaned pages are printed at, in ppi.
    pub output_ppi: u32,
    pub settings: CleanSettings,
    pub title: Option<String>,
    pub output_path: PathBuf,
    pub progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for BuildRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildRequest")
            .field("images", &self.images.len())
            .field("output_ppi", &self.output_ppi)
            .field("settings", &self.settings)
            .field("title", &self.title)
            .field("output_path", &self.output_path)
            .field("progress", &self.progress.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

/// What a build produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSummary {
    pub pages: usize,
    pub bytes: u64,
}

/// Turns an ordered list of page images into the output document.
pub trait PdfBuilder: Send + Sync {
    fn build(
        &self,
        request: BuildRequest,
    ) -> impl Future<Output = Result<BuildSummary, CleanPdfError>> + Send;
}

/// The default builder: binarize, deskew and denoise each page, then write a
/// bitonal PDF with `lopdf`.
#[derive(Debug, Clone, Default)]
pub struct BitonalPdfBuilder;

impl PdfBuilder for BitonalPdfBuilder {
    async fn build(&self, request: BuildRequest) -> Result<BuildSummary, CleanPdfError> {
        let output_path = request.output_path.clone();
        let pages = request.images.len();

        let bytes = tokio::task::spawn_blocking(move || assemble_blocking(&request))
            .await
            .map_err(|e| CleanPdfError::Internal(format!("Assembly task panicked: {}", e)))??;

        write_atomically(&output_path, &bytes).await?;
        info!(
            "Wrote {} page(s), {} bytes → {}",
            pages,
            bytes.len(),
            output_path.display()
        );
        Ok(BuildSummary {
            pages,
            bytes: bytes.len() as u64,
        })
    }
}

/// Clean every image and serialise the finished document.
fn assemble_blocking(request: &BuildRequest) -> Result<Vec<u8>, CleanPdfError> {
    let total = request.images.len();
    if let Some(cb) = &request.progress {
        cb.on_build_start(total);
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::with_capacity(total);

    for (i, image_path) in request.images.iter().enumerate() {
        let gray = clean::load_grayscale(image_path)?;
        let page = clean::clean_page(gray, &request.settings);
        let page_id = add_page(&mut doc, pages_id, &page, request.output_ppi)?;
        kids.push(Object::Reference(page_id));
        debug!(
            "Page {}/{}: {} ({}×{} px)",
            i + 1,
            total,
            image_path.display(),
            page.width,
            page.height
        );
        if let Some(cb) = &request.progress {
            cb.on_page_cleaned(i + 1, total);
        }
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => Object::Integer(kids.len() as i64),
            "Kids" => kids,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut info = dictionary! { "Producer" => text_string(PRODUCER) };
    if let Some(title) = &request.title {
        info.set("Title", text_string(title));
    }
    let info_id = doc.add_object(info);
    doc.trailer.set("Info", Object::Reference(info_id));

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| CleanPdfError::PdfWriteFailed(e.to_string()))?;
    Ok(bytes)
}

fn add_page(
    doc: &mut Document,
    pages_id: ObjectId,
    page: &BitonalPage,
    output_ppi: u32,
) -> Result<ObjectId, CleanPdfError> {
    let mut image_dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => Object::Integer(i64::from(page.width)),
        "Height" => Object::Integer(i64::from(page.height)),
        "ColorSpace" => "DeviceGray",
        "BitsPerComponent" => Object::Integer(1),
    };
    let data = match encode_group4(page) {
        Some(data) => {
            image_dict.set("Filter", "CCITTFaxDecode");
            image_dict.set("DecodeParms", group4_parms(page));
            data
        }
        None => {
            debug!("{}×{} px page is too large for Group 4", page.width, page.height);
            image_dict.set("Filter", "FlateDecode");
            deflate(&page.data)?
        }
    };
    let image_id = doc.add_object(Stream::new(image_dict, data).with_compression(false));

    let (width_pt, height_pt) = page_size_pt(page.width, page.height, output_ppi);
    let content = format!(
        "q {} 0 0 {} 0 0 cm /Im0 Do Q",
        format_number(width_pt),
        format_number(height_pt)
    );
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

    Ok(doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => Object::Reference(pages_id),
        "MediaBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Real(width_pt),
            Object::Real(height_pt),
        ],
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im0" => Object::Reference(image_id) },
        },
        "Contents" => Object::Reference(content_id),
    }))
}

/// CCITT Group 4 (T.6) encoding of `page`, or `None` when a side is empty or
/// does not fit the encoder's 16-bit line width.
pub fn encode_group4(page: &BitonalPage) -> Option<Vec<u8>> {
    let width = u16::try_from(page.width).ok()?;
    u16::try_from(page.height).ok()?;
    if page.width == 0 || page.height == 0 {
        return None;
    }

    let mut encoder = Encoder::new(VecWriter::with_capacity(page.data.len()));
    for y in 0..page.height {
        let pels = (0..page.width).map(|x| {
            if page.is_black(x, y) {
                Color::Black
            } else {
                Color::White
            }
        });
        let Ok(()) = encoder.encode_line(pels, width);
    }
    let Ok(writer) = encoder.finish();
    Some(writer.finish())
}

/// `/DecodeParms` matching [`encode_group4`]: pure 2-D coding, `0` = black.
fn group4_parms(page: &BitonalPage) -> Dictionary {
    dictionary! {
        "K" => Object::Integer(-1),
        "Columns" => Object::Integer(i64::from(page.width)),
        "Rows" => Object::Integer(i64::from(page.height)),
        "BlackIs1" => Object::Boolean(false),
    }
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, CleanPdfError> {
    let flate_err = |e: std::io::Error| {
        CleanPdfError::PdfWriteFailed(format!("Flate encoding failed: {}", e))
    };
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data).map_err(flate_err)?;
    encoder.finish().map_err(flate_err)
}

/// Page size in points for an image printed at `ppi`.
pub fn page_size_pt(width_px: u32, height_px: u32, ppi: u32) -> (f32, f32) {
    let ppi = ppi.max(1) as f32;
    (width_px as f32 * 72.0 / ppi, height_px as f32 * 72.0 / ppi)
}

fn format_number(value: f32) -> String {
    let s = format!("{:.4}", value);
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// PDF text string: literal for ASCII, UTF-16BE with a byte-order mark
/// otherwise.
fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        return Object::string_literal(text);
    }
    let mut bytes = vec![0xFE, 0xFF];
    bytes.extend(text.encode_utf16().flat_map(|unit| unit.to_be_bytes()));
    Object::String(bytes, StringFormat::Hexadecimal)
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), CleanPdfError> {
    let write_err = |e: std::io::Error| CleanPdfError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, bytes).await.map_err(write_err)?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        if let Err(cleanup) = tokio::fs::remove_file(&tmp_path).await {
            warn!("Could not remove {}: {}", tmp_path.display(), cleanup);
        }
        return Err(write_err(e));
    }
    Ok(())
}
