//! CLI binary for cleanpdf.
//!
//! A thin shim over the library crate that maps the seven positional
//! arguments (plus optional flags) to a `PipelineConfig` and prints results.
//! Exit status is 0 on success and 1 on any error, including bad arguments.

use anyhow::{Context, Result};
use clap::Parser;
use cleanpdf::{
    convert_directory, PipelineConfig, PipelineProgressCallback, ProgressCallback, RasterBackend,
    RasterFormat, ScratchPolicy,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one bar over input files while rasterizing, then one
/// over pages while cleaning.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Scanning input directory…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn activate_bar(&self, total: usize, prefix: &'static str, unit: &str) {
        let style = ProgressStyle::with_template(&format!(
            "{{spinner:.cyan}} {{prefix:.bold}}  \
             [{{bar:42.green/238}}] {{pos:>3}}/{{len}} {unit}  \
             ⏱ {{elapsed_precise}}  {{msg}}"
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_style(style);
        self.bar.set_prefix(prefix);
        self.bar.set_message("");
        self.bar.reset_eta();
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_files: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Found {total_files} input file(s)"))
        ));
    }

    fn on_resolution_chosen(&self, ppi: u32) {
        self.bar
            .println(format!("{} rendering at {}", cyan("◆"), bold(&format!("{ppi} ppi"))));
    }

    fn on_file_start(&self, file_num: usize, total_files: usize, path: &Path) {
        if file_num == 1 {
            self.activate_bar(total_files, "Rasterizing", "files");
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.bar.set_message(name);
    }

    fn on_file_complete(&self, file_num: usize, total_files: usize, pages: usize) {
        self.bar.println(format!(
            "  {} File {:>3}/{:<3}  {}",
            green("✓"),
            file_num,
            total_files,
            dim(&format!("{pages} page(s)")),
        ));
        self.bar.inc(1);
    }

    fn on_build_start(&self, total_pages: usize) {
        self.activate_bar(total_pages, "Cleaning", "pages");
    }

    fn on_page_cleaned(&self, _page_num: usize, _total_pages: usize) {
        self.bar.inc(1);
    }

    fn on_run_complete(&self, total_pages: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} pages written",
            green("✔"),
            bold(&total_pages.to_string())
        );
    }
}

const AFTER_HELP: &str = r#"ARGUMENTS:
  basedir     directory holding the input *.pdf files (not searched recursively)
  resolution  output resolution: 0 (= 300), 300 or 600
  contrast    0 (= 1) to 10; 1 drops light noise, 10 keeps faint detail
  rotation    clockwise quarter turns: 0, 1, 2 or 3
  opensize    speckle removal brick size: 2 or 3, anything lower is off
  title       document title, or "none"
  fileout     output PDF path

EXAMPLES:
  # Clean a folder of scans at 300 ppi, no title
  cleanpdf scans/1998 300 5 0 2 none minutes-1998.pdf

  # Rotated scans, 600 ppi output, keep faint pencil
  cleanpdf scans/plans 600 9 1 0 "Site plans" plans.pdf

  # Use pdfium instead of pdftoppm and drop the rasters afterwards
  cleanpdf --rasterizer pdfium --remove-scratch scans 0 0 0 0 none out.pdf

SIDE EFFECTS:
  Creates <basedir>/image/ and writes one raster per source page into it.
  The rasters are kept unless --remove-scratch is given.

ENVIRONMENT VARIABLES:
  PDFIUM_LIB_PATH   Path to libpdfium for --rasterizer pdfium
  RUST_LOG          Overrides the log level chosen by -v / -q
"#;

/// Turn a folder of scanned PDFs into one clean bitonal PDF.
#[derive(Parser, Debug)]
#[command(
    name = "cleanpdf",
    version,
    about = "Turn a folder of scanned PDFs into one clean bitonal PDF",
    long_about = "Rasterize every *.pdf in <basedir> at a resolution chosen from the median page \
size, clean each page to black and white (rotate, flatten background, deskew, threshold, \
despeckle) and concatenate the result into <fileout>.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Directory containing the input PDFs.
    basedir: PathBuf,

    /// Output resolution: 0 (= 300), 300 or 600.
    #[arg(allow_negative_numbers = true)]
    resolution: i64,

    /// Contrast, 0 (= 1) to 10.
    #[arg(allow_negative_numbers = true)]
    contrast: i64,

    /// Clockwise quarter turns, 0 to 3.
    #[arg(allow_negative_numbers = true)]
    rotation: i64,

    /// Opening brick size, 0 to 3.
    #[arg(allow_negative_numbers = true)]
    opensize: i64,

    /// Document title, or "none".
    title: String,

    /// Output PDF path.
    fileout: PathBuf,

    /// Page rasterizer.
    #[arg(long, env = "CLEANPDF_RASTERIZER", value_enum, default_value = "pdftoppm")]
    rasterizer: BackendArg,

    /// Intermediate raster format.
    #[arg(long, env = "CLEANPDF_FORMAT", value_enum, default_value = "ppm")]
    format: FormatArg,

    /// pdftoppm program to run.
    #[arg(long, env = "CLEANPDF_PDFTOPPM", default_value = "pdftoppm")]
    pdftoppm: PathBuf,

    /// Kill a rasterizer invocation after this many seconds.
    #[arg(long, env = "CLEANPDF_TIMEOUT", default_value_t = cleanpdf::config::DEFAULT_RASTERIZER_TIMEOUT_SECS,
          value_parser = clap::value_parser!(u64).range(1..))]
    timeout: u64,

    /// Delete this run's rasters after a successful build.
    #[arg(long, env = "CLEANPDF_REMOVE_SCRATCH")]
    remove_scratch: bool,

    /// Skip the deskew step.
    #[arg(long, env = "CLEANPDF_NO_DESKEW")]
    no_deskew: bool,

    /// Print a JSON run report (RunOutput) on stdout.
    #[arg(long, env = "CLEANPDF_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "CLEANPDF_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "CLEANPDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "CLEANPDF_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum BackendArg {
    Pdftoppm,
    Pdfium,
}

impl From<BackendArg> for RasterBackend {
    fn from(v: BackendArg) -> Self {
        match v {
            BackendArg::Pdftoppm => RasterBackend::Pdftoppm,
            BackendArg::Pdfium => RasterBackend::Pdfium,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Ppm,
    Png,
}

impl From<FormatArg> for RasterFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Ppm => RasterFormat::Ppm,
            FormatArg::Png => RasterFormat::Png,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Usage errors exit 1 like every other failure; help and version exit 0.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Run ──────────────────────────────────────────────────────────────
    let output = convert_directory(&config).await.context("Run failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else if !cli.quiet {
        eprintln!(
            "{}  {} file(s)  {} pages @ {} ppi  {}ms  →  {}",
            green("✔"),
            output.stats.input_files,
            output.stats.pages,
            output.stats.render_ppi,
            output.stats.total_duration_ms,
            bold(&output.output_path.display().to_string()),
        );
        eprintln!(
            "   {} bytes  /  {} {}",
            dim(&output.stats.output_bytes.to_string()),
            match (output.rasters_removed, output.scratch_dir_removed) {
                (true, true) => "removed",
                (true, false) => "rasters removed, other files kept in",
                (false, _) => "rasters kept in",
            },
            dim(&output.scratch_dir.display().to_string()),
        );
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`. Validation happens here, before any
/// file system side effect.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder(&cli.basedir, &cli.fileout)
        .resolution(cli.resolution)
        .contrast(cli.contrast)
        .rotation(cli.rotation)
        .open_size(cli.opensize)
        .maybe_title(parse_title(&cli.title))
        .deskew(!cli.no_deskew)
        .raster_backend(cli.rasterizer.into())
        .raster_format(cli.format.into())
        .pdftoppm_path(&cli.pdftoppm)
        .rasterizer_timeout_secs(cli.timeout)
        .scratch_policy(if cli.remove_scratch {
            ScratchPolicy::RemoveOnSuccess
        } else {
            ScratchPolicy::Keep
        });

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid arguments")
}

/// The literal title `none` means no title.
fn parse_title(title: &str) -> Option<String> {
    (title != "none").then(|| title.to_string())
}
