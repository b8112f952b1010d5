//! Input discovery: find the PDFs to process and stage the scratch directory.
//!
//! The input set is every regular file directly inside the base directory
//! whose extension is exactly `pdf`. Matching is case-sensitive, so
//! `scan.PDF` is not picked up. Files are sorted by name; that order is the
//! page order of the final document.

use crate::error::CleanPdfError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Extension (without the dot) an input file must carry.
pub const INPUT_EXTENSION: &str = "pdf";

/// The ordered, non-empty list of input PDFs for one run.
#[derive(Debug, Clone)]
pub struct InputSet {
    base_dir: PathBuf,
    files: Vec<PathBuf>,
}

impl InputSet {
    /// Build an input set from explicit paths, sorting them.
    ///
    /// Fails with [`CleanPdfError::NoInputFiles`] when `files` is empty.
    pub fn new(base_dir: impl Into<PathBuf>, mut files: Vec<PathBuf>) -> Result<Self, CleanPdfError> {
        let base_dir = base_dir.into();
        if files.is_empty() {
            return Err(CleanPdfError::NoInputFiles { dir: base_dir });
        }
        files.sort();
        Ok(Self { base_dir, files })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Always false; an input set cannot be constructed empty.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// The file whose geometry stands in for the whole batch: the first one.
    pub fn representative(&self) -> &Path {
        &self.files[0]
    }
}

/// Whether `path` names an input PDF by extension alone.
pub fn is_input_pdf(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == INPUT_EXTENSION)
}

/// Raster file prefix for an input: its file name without the last extension.
pub fn output_basename(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// List the input PDFs in `base_dir`, non-recursively, in sorted order.
pub async fn discover_inputs(base_dir: &Path) -> Result<InputSet, CleanPdfError> {
    let mut entries =
        tokio::fs::read_dir(base_dir)
            .await
            .map_err(|e| CleanPdfError::DirectoryReadFailed {
                path: base_dir.to_path_buf(),
                source: e,
            })?;

    let mut files = Vec::new();
    loop {
        let entry = entries
            .next_entry()
            .await
            .map_err(|e| CleanPdfError::DirectoryReadFailed {
                path: base_dir.to_path_buf(),
                source: e,
            })?;
        let Some(entry) = entry else { break };

        let path = entry.path();
        if !is_input_pdf(&path) {
            continue;
        }
        // Follow symlinks; only regular files are inputs.
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => files.push(path),
            Ok(_) => debug!("Skipping non-file entry {}", path.display()),
            Err(e) => debug!("Skipping unreadable entry {}: {}", path.display(), e),
        }
    }

    let inputs = InputSet::new(base_dir, files)?;
    info!("Found {} input PDF(s) in {}", inputs.len(), base_dir.display());
    for file in inputs.files() {
        debug!("  {}", file.display());
    }
    Ok(inputs)
}

/// Ensure the base directory exists before anything is written under it.
pub async fn check_base_dir(base_dir: &Path) -> Result<(), CleanPdfError> {
    match tokio::fs::metadata(base_dir).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        _ => Err(CleanPdfError::BaseDirNotFound {
            path: base_dir.to_path_buf(),
        }),
    }
}

/// Create the scratch directory. An existing directory is not an error.
pub async fn prepare_scratch_dir(dir: &Path) -> Result<(), CleanPdfError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| CleanPdfError::ScratchDirFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;
    debug!("Scratch directory ready: {}", dir.display());
    Ok(())
}
