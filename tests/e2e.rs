//! End-to-end tests for the cleanpdf pipeline.
//!
//! Most tests drive [`Pipeline`] with an in-memory rasterizer double that
//! writes small PNGs, so they need neither Poppler nor pdfium. Input PDFs are
//! generated with `lopdf`.
//!
//! The tests at the bottom run the real `pdftoppm`. They print `SKIP` and
//! return when it is not installed.
//!
//! Run with:
//!   cargo test --test e2e -- --nocapture

use cleanpdf::pipeline::rasterize::raster_file_name;
use cleanpdf::{
    convert_directory, BitonalPdfBuilder, BuildRequest, BuildSummary, CleanPdfError, OutputResolution,
    Pipeline, PipelineConfig, PipelineProgressCallback, PdfBuilder, RasterPage, RasterRequest,
    Rasterizer, ResolutionSource, ScratchPolicy,
};
use image::{GrayImage, Luma};
use lopdf::{dictionary, Document, Object, Stream};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Write an image-less PDF with one page per entry of `page_boxes`.
fn write_pdf(path: &Path, page_boxes: &[Option<[i64; 4]>]) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::new();
    for media_box in page_boxes {
        let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
        let mut page = dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "Contents" => Object::Reference(content_id),
            "Resources" => dictionary! {},
        };
        if let Some(b) = media_box {
            page.set(
                "MediaBox",
                b.iter().map(|v| Object::Integer(*v)).collect::<Vec<_>>(),
            );
        }
        kids.push(Object::Reference(doc.add_object(page)));
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
    doc.save(path).unwrap();
}

fn letter(pages: usize) -> Vec<Option<[i64; 4]>> {
    vec![Some([0, 0, 612, 792]); pages]
}

fn tabloid(pages: usize) -> Vec<Option<[i64; 4]>> {
    vec![Some([0, 0, 1224, 1584]); pages]
}

fn file_names(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect()
}

/// Rasterizer double: writes `pages[basename]` small PNGs per call (one by
/// default) and records every request.
#[derive(Default)]
struct FakeRasterizer {
    pages: HashMap<String, u32>,
    fail_on: Option<String>,
    image_size: (u32, u32),
    calls: Mutex<Vec<RasterRequest>>,
}

impl FakeRasterizer {
    fn new() -> Self {
        Self {
            image_size: (40, 60),
            ..Self::default()
        }
    }

    fn with_pages(mut self, basename: &str, pages: u32) -> Self {
        self.pages.insert(basename.to_string(), pages);
        self
    }

    fn failing_on(mut self, basename: &str) -> Self {
        self.fail_on = Some(basename.to_string());
        self
    }

    fn with_image_size(mut self, width: u32, height: u32) -> Self {
        self.image_size = (width, height);
        self
    }

    fn calls(&self) -> Vec<RasterRequest> {
        self.calls.lock().unwrap().clone()
    }
}

impl Rasterizer for FakeRasterizer {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn rasterize(&self, request: &RasterRequest) -> Result<Vec<RasterPage>, CleanPdfError> {
        self.calls.lock().unwrap().push(request.clone());
        if self.fail_on.as_deref() == Some(request.basename.as_str()) {
            return Err(CleanPdfError::RasterizerFailed {
                path: request.pdf_path.clone(),
                status: "exit status: 1".into(),
                stderr: "Syntax Error: Couldn't read xref table".into(),
            });
        }

        let count = self.pages.get(&request.basename).copied().unwrap_or(1);
        let (first, last) = request.pages.unwrap_or((1, count));
        let (width, height) = self.image_size;
        let mut out = Vec::new();
        for page in first..=last.min(count) {
            let path = request
                .output_dir
                .join(raster_file_name(&request.basename, page, count, "png"));
            GrayImage::from_fn(width, height, |_, y| {
                if y % 10 < 2 {
                    Luma([0])
                } else {
                    Luma([255])
                }
            })
            .save(&path)
            .unwrap();
            out.push(RasterPage { page, path });
        }
        Ok(out)
    }
}

/// Builder double: records the image list and writes a placeholder file.
#[derive(Default)]
struct RecordingBuilder {
    requests: Mutex<Vec<BuildRequest>>,
}

impl RecordingBuilder {
    fn images(&self) -> Vec<PathBuf> {
        self.requests
            .lock()
            .unwrap()
            .last()
            .map(|r| r.images.clone())
            .unwrap_or_default()
    }

    fn build_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl PdfBuilder for RecordingBuilder {
    async fn build(&self, request: BuildRequest) -> Result<BuildSummary, CleanPdfError> {
        std::fs::write(&request.output_path, b"%PDF-1.5\n%%EOF\n").unwrap();
        let pages = request.images.len();
        self.requests.lock().unwrap().push(request);
        Ok(BuildSummary { pages, bytes: 15 })
    }
}

fn config(base: &Path) -> cleanpdf::PipelineConfigBuilder {
    PipelineConfig::builder(base, base.join("out.pdf"))
}

// ── Orchestration ────────────────────────────────────────────────────────────

#[tokio::test]
async fn letter_batch_renders_once_at_nominal_resolution() {
    let dir = tempfile::tempdir().unwrap();
    write_pdf(&dir.path().join("a.pdf"), &letter(1));

    let pipeline = Pipeline::new(FakeRasterizer::new(), RecordingBuilder::default());
    let output = pipeline.run(&config(dir.path()).build().unwrap()).await.unwrap();

    let calls = pipeline.rasterizer().calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].resolution, 300);
    assert_eq!(calls[0].pages, None);
    assert_eq!(calls[0].basename, "a");
    assert_eq!(calls[0].output_dir, dir.path().join("image"));

    assert_eq!(output.resolution.ppi, 300);
    assert!(matches!(output.resolution.source, ResolutionSource::MediaBox { .. }));
    assert_eq!(output.rasters.len(), 1);
    assert_eq!(output.stats.pages, 1);
    assert!(dir.path().join("out.pdf").exists());
    assert!(dir.path().join("image/a-1.png").exists());
}

#[tokio::test]
async fn oversized_batch_renders_at_reduced_resolution() {
    let dir = tempfile::tempdir().unwrap();
    write_pdf(&dir.path().join("big.pdf"), &tabloid(3));

    let pipeline = Pipeline::new(FakeRasterizer::new(), RecordingBuilder::default());
    let output = pipeline.run(&config(dir.path()).build().unwrap()).await.unwrap();
    assert_eq!(output.resolution.ppi, 150);
    assert_eq!(pipeline.rasterizer().calls()[0].resolution, 150);

    let pipeline = Pipeline::new(FakeRasterizer::new(), RecordingBuilder::default());
    let output = pipeline
        .run(&config(dir.path()).resolution(600).build().unwrap())
        .await
        .unwrap();
    assert_eq!(output.resolution.ppi, 300);
    assert_eq!(output.stats.output_ppi, 600);
}

#[tokio::test]
async fn geometry_comes_from_first_file_only() {
    let dir = tempfile::tempdir().unwrap();
    write_pdf(&dir.path().join("a.pdf"), &letter(2));
    write_pdf(&dir.path().join("b.pdf"), &tabloid(5));

    let pipeline = Pipeline::new(FakeRasterizer::new(), RecordingBuilder::default());
    let output = pipeline.run(&config(dir.path()).build().unwrap()).await.unwrap();
    assert_eq!(output.resolution.ppi, 300);
    assert!(pipeline.rasterizer().calls().iter().all(|c| c.resolution == 300));
}

#[tokio::test]
async fn pages_reach_builder_in_document_then_page_order() {
    let dir = tempfile::tempdir().unwrap();
    write_pdf(&dir.path().join("b.pdf"), &letter(2));
    write_pdf(&dir.path().join("a.pdf"), &letter(10));
    write_pdf(&dir.path().join("c.PDF"), &letter(1));

    let rasterizer = FakeRasterizer::new().with_pages("a", 10).with_pages("b", 2);
    let pipeline = Pipeline::new(rasterizer, RecordingBuilder::default());
    let output = pipeline.run(&config(dir.path()).build().unwrap()).await.unwrap();

    let expected: Vec<String> = (1..=10)
        .map(|p| format!("a-{p:02}.png"))
        .chain(["b-1.png".to_string(), "b-2.png".to_string()])
        .collect();
    assert_eq!(file_names(&pipeline.builder().images()), expected);

    // The upper-case extension is not an input.
    assert_eq!(file_names(&output.inputs), vec!["a.pdf", "b.pdf"]);
    let pairs: Vec<_> = output.rasters.iter().map(|r| (r.source_index, r.page)).collect();
    assert_eq!(pairs.first(), Some(&(0, 1)));
    assert_eq!(pairs.last(), Some(&(1, 2)));
}

#[tokio::test]
async fn failure_on_second_file_stops_the_run() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["a.pdf", "b.pdf", "c.pdf"] {
        write_pdf(&dir.path().join(name), &letter(1));
    }

    let rasterizer = FakeRasterizer::new().with_pages("a", 2).failing_on("b");
    let pipeline = Pipeline::new(rasterizer, RecordingBuilder::default());
    let err = pipeline
        .run(&config(dir.path()).scratch_policy(ScratchPolicy::RemoveOnSuccess).build().unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err, CleanPdfError::RasterizerFailed { .. }), "got {err:?}");
    let called: Vec<_> = pipeline
        .rasterizer()
        .calls()
        .iter()
        .map(|c| c.basename.clone())
        .collect();
    assert_eq!(called, vec!["a", "b"]);
    assert_eq!(pipeline.builder().build_count(), 0);
    assert!(!dir.path().join("out.pdf").exists());

    // The first file's rasters are kept for inspection, whatever the policy.
    let mut left: Vec<String> = std::fs::read_dir(dir.path().join("image"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    left.sort();
    assert_eq!(left, vec!["a-1.png", "a-2.png"]);
}

#[tokio::test]
async fn missing_media_boxes_trigger_one_probe_render() {
    let dir = tempfile::tempdir().unwrap();
    write_pdf(&dir.path().join("a.pdf"), &[None, None]);

    let rasterizer = FakeRasterizer::new()
        .with_pages("a", 2)
        .with_image_size(1224, 1584);
    let pipeline = Pipeline::new(rasterizer, RecordingBuilder::default());
    let output = pipeline.run(&config(dir.path()).build().unwrap()).await.unwrap();

    let calls = pipeline.rasterizer().calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].resolution, 72);
    assert_eq!(calls[0].pages, Some((1, 1)));
    assert_ne!(calls[0].output_dir, dir.path().join("image"));
    assert_eq!(calls[1].resolution, 150);
    assert_eq!(calls[1].pages, None);

    assert_eq!(
        output.resolution.source,
        ResolutionSource::ProbeRender {
            width_px: 1224,
            height_px: 1584
        }
    );
    // Only the real rasters remain; the probe directory is gone.
    assert_eq!(std::fs::read_dir(dir.path().join("image")).unwrap().count(), 2);
}

#[tokio::test]
async fn empty_directory_fails_after_creating_scratch() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"no pdfs here").unwrap();

    let pipeline = Pipeline::new(FakeRasterizer::new(), RecordingBuilder::default());
    let err = pipeline
        .run(&config(dir.path()).build().unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err, CleanPdfError::NoInputFiles { .. }), "got {err:?}");
    assert!(err.to_string().contains("No input files found"));
    assert!(dir.path().join("image").is_dir());
    assert!(pipeline.rasterizer().calls().is_empty());
}

#[tokio::test]
async fn missing_base_directory_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("absent");

    let pipeline = Pipeline::new(FakeRasterizer::new(), RecordingBuilder::default());
    let err = pipeline.run(&config(&base).build().unwrap()).await.unwrap_err();
    assert!(matches!(err, CleanPdfError::BaseDirNotFound { .. }), "got {err:?}");
    assert!(!base.exists());
}

#[tokio::test]
async fn zero_pages_overall_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    write_pdf(&dir.path().join("a.pdf"), &letter(1));

    let rasterizer = FakeRasterizer::new().with_pages("a", 0);
    let pipeline = Pipeline::new(rasterizer, RecordingBuilder::default());
    let err = pipeline
        .run(&config(dir.path()).build().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, CleanPdfError::NoPagesRendered { .. }), "got {err:?}");
    assert_eq!(pipeline.builder().build_count(), 0);
}

#[tokio::test]
async fn scratch_is_kept_by_default() {
    let dir = tempfile::tempdir().unwrap();
    write_pdf(&dir.path().join("a.pdf"), &letter(1));

    let pipeline = Pipeline::new(FakeRasterizer::new(), RecordingBuilder::default());
    let output = pipeline.run(&config(dir.path()).build().unwrap()).await.unwrap();
    assert!(!output.rasters_removed);
    assert!(!output.scratch_dir_removed);
    assert!(output.rasters.iter().all(|r| r.path.exists()));
}

#[tokio::test]
async fn remove_on_success_cleans_up_rasters() {
    let dir = tempfile::tempdir().unwrap();
    write_pdf(&dir.path().join("a.pdf"), &letter(1));
    let cfg = config(dir.path())
        .scratch_policy(ScratchPolicy::RemoveOnSuccess)
        .build()
        .unwrap();

    let pipeline = Pipeline::new(FakeRasterizer::new().with_pages("a", 3), RecordingBuilder::default());
    let output = pipeline.run(&cfg).await.unwrap();
    assert!(output.rasters_removed);
    assert!(output.scratch_dir_removed);
    assert!(output.rasters.is_empty());
    assert!(!dir.path().join("image").exists());

    // Files that are not ours keep the directory alive.
    std::fs::create_dir(dir.path().join("image")).unwrap();
    std::fs::write(dir.path().join("image/keep.txt"), b"operator notes").unwrap();
    let pipeline = Pipeline::new(FakeRasterizer::new().with_pages("a", 3), RecordingBuilder::default());
    let output = pipeline.run(&cfg).await.unwrap();
    assert!(output.rasters_removed);
    assert!(!output.scratch_dir_removed);
    let left: Vec<_> = std::fs::read_dir(dir.path().join("image")).unwrap().collect();
    assert_eq!(left.len(), 1);
}

#[derive(Default)]
struct CountingCallback {
    files: AtomicUsize,
    pages: AtomicUsize,
    ppi: AtomicUsize,
    completed: AtomicUsize,
}

impl PipelineProgressCallback for CountingCallback {
    fn on_resolution_chosen(&self, ppi: u32) {
        self.ppi.store(ppi as usize, Ordering::SeqCst);
    }

    fn on_file_complete(&self, _file_num: usize, _total: usize, _pages: usize) {
        self.files.fetch_add(1, Ordering::SeqCst);
    }

    fn on_page_cleaned(&self, _page_num: usize, _total: usize) {
        self.pages.fetch_add(1, Ordering::SeqCst);
    }

    fn on_run_complete(&self, total_pages: usize) {
        self.completed.store(total_pages, Ordering::SeqCst);
    }
}

// ── Real builder ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn bitonal_output_has_one_page_per_raster() {
    let dir = tempfile::tempdir().unwrap();
    write_pdf(&dir.path().join("a.pdf"), &letter(2));
    write_pdf(&dir.path().join("b.pdf"), &letter(1));

    let callback = Arc::new(CountingCallback::default());
    let cfg = config(dir.path())
        .contrast(5)
        .open_size(2)
        .title("Minutes 1998")
        .progress_callback(callback.clone())
        .build()
        .unwrap();

    let pipeline = Pipeline::new(FakeRasterizer::new().with_pages("a", 2), BitonalPdfBuilder);
    let output = pipeline.run(&cfg).await.unwrap();
    assert_eq!(output.stats.pages, 3);

    let doc = Document::load(dir.path().join("out.pdf")).unwrap();
    assert_eq!(doc.get_pages().len(), 3);
    let info_id = doc.trailer.get(b"Info").unwrap().as_reference().unwrap();
    let title = doc.get_dictionary(info_id).unwrap().get(b"Title").unwrap();
    assert_eq!(title.as_str().unwrap(), b"Minutes 1998");

    assert_eq!(callback.files.load(Ordering::SeqCst), 2);
    assert_eq!(callback.pages.load(Ordering::SeqCst), 3);
    assert_eq!(callback.ppi.load(Ordering::SeqCst), 300);
    assert_eq!(callback.completed.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn run_report_serialises_to_json() {
    let dir = tempfile::tempdir().unwrap();
    write_pdf(&dir.path().join("a.pdf"), &letter(1));

    let pipeline = Pipeline::new(FakeRasterizer::new(), RecordingBuilder::default());
    let output = pipeline.run(&config(dir.path()).build().unwrap()).await.unwrap();

    let json = serde_json::to_value(&output).unwrap();
    assert_eq!(json["resolution"]["ppi"], 300);
    assert_eq!(json["resolution"]["source"]["kind"], "media_box");
    assert_eq!(json["stats"]["pages"], 1);
}

// ── pdftoppm (skipped when not installed) ────────────────────────────────────

fn pdftoppm_available() -> bool {
    std::process::Command::new("pdftoppm")
        .arg("-v")
        .output()
        .is_ok()
}

macro_rules! skip_unless_pdftoppm {
    () => {
        if !pdftoppm_available() {
            println!("SKIP — pdftoppm not installed");
            return;
        }
    };
}

#[tokio::test]
async fn pdftoppm_end_to_end() {
    skip_unless_pdftoppm!();
    let dir = tempfile::tempdir().unwrap();
    // One-inch pages keep the rasters small.
    write_pdf(&dir.path().join("a.pdf"), &vec![Some([0, 0, 72, 72]); 2]);
    write_pdf(&dir.path().join("b.pdf"), &vec![Some([0, 0, 72, 72]); 1]);

    let cfg = config(dir.path()).title("Scans").build().unwrap();
    let output = convert_directory(&cfg).await.unwrap();

    assert_eq!(output.resolution.ppi, OutputResolution::Ppi300.ppi());
    assert_eq!(output.stats.pages, 3);
    assert!(dir.path().join("image/a-1.ppm").exists());
    assert!(dir.path().join("image/a-2.ppm").exists());
    assert!(dir.path().join("image/b-1.ppm").exists());
    assert_eq!(image::image_dimensions(dir.path().join("image/b-1.ppm")).unwrap(), (300, 300));

    let doc = Document::load(dir.path().join("out.pdf")).unwrap();
    assert_eq!(doc.get_pages().len(), 3);
}

#[tokio::test]
async fn pdftoppm_failure_on_corrupt_input() {
    skip_unless_pdftoppm!();
    let dir = tempfile::tempdir().unwrap();
    write_pdf(&dir.path().join("a.pdf"), &vec![Some([0, 0, 72, 72]); 1]);
    std::fs::write(dir.path().join("b.pdf"), b"%PDF-1.5 truncated").unwrap();

    let err = convert_directory(&config(dir.path()).build().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, CleanPdfError::RasterizerFailed { .. }), "got {err:?}");
    assert!(dir.path().join("image/a-1.ppm").exists());
    assert!(!dir.path().join("out.pdf").exists());
}
